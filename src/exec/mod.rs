//! The `exec` module is the capability layer between callers and execution backends.
//!
//! A backend describes itself with an [`Executor`] implementation: its [`ExecutionCategory`],
//! its native index and shape types, and a [`NativeOps`] descriptor listing the bulk operations
//! it actually implements. The free functions in [`dispatch`] resolve every call against that
//! descriptor, picking the most specific native operation and synthesizing the rest:
//!
//! | Caller wants | Tried in order |
//! |---|---|
//! | [`bulk_async`] | [`BulkAsync`], [`BulkAsyncShaped`], [`BulkInvoke`] on a helper thread |
//! | [`bulk_async_shaped`] | [`BulkAsyncShaped`], [`BulkAsync`], [`BulkInvoke`] on a helper thread |
//! | [`bulk_async_shared`] | [`BulkAsyncShared`], [`BulkInvokeShared`] on a helper thread, closure capture |
//! | [`bulk_invoke`] | [`BulkInvoke`], `bulk_async(..).wait()` |
//! | [`bulk_invoke_shaped`] | [`BulkInvoke`], `bulk_async_shaped(..).wait()` |
//! | [`bulk_invoke_shared`] | [`BulkInvokeShared`], closure capture over [`BulkInvoke`], `bulk_async_shared(..).wait()` |

use std::{any::Any, sync::Arc};

use thiserror::Error;

pub use category::{
    Category, Concurrent, ExecutionCategory, FlatCategory, Nested, Parallel, Sequential,
};
pub use completion::{Completion, Signal};
pub use dispatch::{
    bulk_async, bulk_async_cast, bulk_async_shaped, bulk_async_shared, bulk_invoke,
    bulk_invoke_cast, bulk_invoke_shaped, bulk_invoke_shared,
};
pub use share::ShareWith;

use crate::{
    gpu::DriverError,
    grid::{CastError, Point},
};

pub mod category;
pub mod completion;
pub mod dispatch;
pub mod share;

#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("platform error: {0}")]
    Platform(#[from] DriverError),
    #[error("platform error: {error}; restoring the device failed as well: {restore}")]
    Restore {
        error: Box<ExecError>,
        restore: DriverError,
    },
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error("agent panicked: {0}")]
    Panicked(String),
    #[error("completion dropped before being fulfilled")]
    Disconnected,
}

/// A shared object handed to agents, type-erased for the native operation traits.
pub type Shared = dyn Any + Send + Sync;
/// Creates one shared object of a grid level.
pub type Factory = Arc<dyn Fn() -> Box<Shared> + Send + Sync>;

/// An agent function receiving its index.
pub type IndexFn<I> = Arc<dyn Fn(I) + Send + Sync>;
/// An agent function receiving its index and the shape of the dispatch.
pub type ShapedFn<I, S> = Arc<dyn Fn(I, &S) + Send + Sync>;
/// An agent function receiving its index, the shape and one shared object per grid level.
pub type SharedFn<I, S> = Arc<dyn Fn(I, &S, &[&Shared]) + Send + Sync>;

/// Native asynchronous bulk operation over agents taking their index only.
pub trait BulkAsync<I, S>: Send + Sync {
    fn bulk_async(&self, shape: S, f: IndexFn<I>) -> Result<Completion, ExecError>;
}

/// Native asynchronous bulk operation over agents taking their index and the shape.
pub trait BulkAsyncShaped<I, S>: Send + Sync {
    fn bulk_async_shaped(&self, shape: S, f: ShapedFn<I, S>) -> Result<Completion, ExecError>;
}

/// Native asynchronous bulk operation with shared objects.
///
/// `levels` holds one factory per grid level: level `0` is created once per dispatch,
/// level `k` once per group, i.e., per distinct prefix `index[..k]`.
/// Each agent receives one reference per level, in level order.
pub trait BulkAsyncShared<I, S>: Send + Sync {
    fn bulk_async_shared(
        &self,
        shape: S,
        f: SharedFn<I, S>,
        levels: Vec<Factory>,
    ) -> Result<Completion, ExecError>;
}

/// Native synchronous bulk operation. Returns once every agent has completed.
pub trait BulkInvoke<I, S>: Send + Sync {
    fn bulk_invoke(&self, shape: S, f: IndexFn<I>) -> Result<(), ExecError>;
}

/// Native synchronous bulk operation with shared objects. See [`BulkAsyncShared`] for `levels`.
pub trait BulkInvokeShared<I, S>: Send + Sync {
    fn bulk_invoke_shared(
        &self,
        shape: S,
        f: SharedFn<I, S>,
        levels: Vec<Factory>,
    ) -> Result<(), ExecError>;
}

/// Describes which bulk operations a backend implements natively.
pub struct NativeOps<I, S> {
    pub bulk_async: Option<Arc<dyn BulkAsync<I, S>>>,
    pub bulk_async_shaped: Option<Arc<dyn BulkAsyncShaped<I, S>>>,
    pub bulk_async_shared: Option<Arc<dyn BulkAsyncShared<I, S>>>,
    pub bulk_invoke: Option<Arc<dyn BulkInvoke<I, S>>>,
    pub bulk_invoke_shared: Option<Arc<dyn BulkInvokeShared<I, S>>>,
}

impl<I, S> Default for NativeOps<I, S> {
    fn default() -> Self {
        Self {
            bulk_async: None,
            bulk_async_shaped: None,
            bulk_async_shared: None,
            bulk_invoke: None,
            bulk_invoke_shared: None,
        }
    }
}

impl<I, S> Clone for NativeOps<I, S> {
    fn clone(&self) -> Self {
        Self {
            bulk_async: self.bulk_async.clone(),
            bulk_async_shaped: self.bulk_async_shaped.clone(),
            bulk_async_shared: self.bulk_async_shared.clone(),
            bulk_invoke: self.bulk_invoke.clone(),
            bulk_invoke_shared: self.bulk_invoke_shared.clone(),
        }
    }
}

impl<I, S> std::fmt::Debug for NativeOps<I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<I, S> NativeOps<I, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bulk_async(mut self, op: Arc<dyn BulkAsync<I, S>>) -> Self {
        self.bulk_async = Some(op);
        self
    }

    pub fn with_bulk_async_shaped(mut self, op: Arc<dyn BulkAsyncShaped<I, S>>) -> Self {
        self.bulk_async_shaped = Some(op);
        self
    }

    pub fn with_bulk_async_shared(mut self, op: Arc<dyn BulkAsyncShared<I, S>>) -> Self {
        self.bulk_async_shared = Some(op);
        self
    }

    pub fn with_bulk_invoke(mut self, op: Arc<dyn BulkInvoke<I, S>>) -> Self {
        self.bulk_invoke = Some(op);
        self
    }

    pub fn with_bulk_invoke_shared(mut self, op: Arc<dyn BulkInvokeShared<I, S>>) -> Self {
        self.bulk_invoke_shared = Some(op);
        self
    }

    /// Names of the native operations present, in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        [
            ("bulk_async", self.bulk_async.is_some()),
            ("bulk_async_shaped", self.bulk_async_shaped.is_some()),
            ("bulk_async_shared", self.bulk_async_shared.is_some()),
            ("bulk_invoke", self.bulk_invoke.is_some()),
            ("bulk_invoke_shared", self.bulk_invoke_shared.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }
}

/// A backend capable of bulk execution.
pub trait Executor: Send + Sync {
    type Category: ExecutionCategory;
    type Index: Point;
    type Shape: Point;

    /// The operations this backend implements natively.
    fn ops(&self) -> NativeOps<Self::Index, Self::Shape>;
}

/// A backend without grid vocabulary of its own: its agents are numbered by `usize` in a `usize` shape.
pub trait FlatExecutor: Send + Sync {
    type Category: ExecutionCategory;

    fn ops(&self) -> NativeOps<usize, usize>;
}

impl<E: FlatExecutor> Executor for E {
    type Category = <E as FlatExecutor>::Category;
    type Index = usize;
    type Shape = usize;

    #[inline]
    fn ops(&self) -> NativeOps<usize, usize> {
        FlatExecutor::ops(self)
    }
}
