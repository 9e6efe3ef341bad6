//! The `gpu` module drives kernel launches on accelerator devices.
//!
//! [`GpuExecutor`] turns bulk calls into grid launches of `(group, lane)` agents. Every interaction with
//! the device goes through an explicit [`Driver`] handle, so the current device is the driver's state
//! and not the process's; [`DeviceGuard`] scopes a device switch around a launch.
//! [`Emulator`] implements the driver on host threads.

use std::{any::type_name, sync::Arc};

use derive_more::{Display, From, Into};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::ExecError;

pub use emulator::{Emulator, EmulatorBuildError, EmulatorBuilder};
pub use executor::GpuExecutor;

pub use crate::platform::sync_lanes;

pub mod emulator;
pub mod executor;

/// Identifies one device of a driver. [`GpuId::NONE`] stands for "no device".
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[display("gpu {_0}")]
pub struct GpuId(i32);

impl Default for GpuId {
    fn default() -> Self {
        Self::NONE
    }
}

impl GpuId {
    pub const NONE: Self = Self(-1);

    #[inline]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// The identifier the driver knows the device by.
    #[inline]
    pub const fn native_handle(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }
}

#[derive(Debug, Default, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(uid::Id<StreamId>);

/// A queue of device commands executed in order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// The stream every device starts with.
    #[default]
    Default,
    Created(StreamId),
}

/// Native error codes reported by a driver.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(i32)]
pub enum ErrorCode {
    #[display("out of memory")]
    MemoryAllocation = 2,
    #[display("too many resources requested for launch")]
    LaunchOutOfResources = 7,
    #[display("invalid configuration argument")]
    InvalidConfiguration = 9,
    #[display("invalid device ordinal")]
    InvalidDevice = 101,
    #[display("invalid resource handle")]
    InvalidHandle = 400,
    #[display("unspecified launch failure")]
    LaunchFailure = 719,
    #[display("operation not supported")]
    NotSupported = 801,
}

impl ErrorCode {
    #[inline]
    pub fn native(self) -> i32 {
        self as i32
    }
}

/// A failed driver call: the native code and the operation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{context}: {code} ({})", .code.native())]
pub struct DriverError {
    pub code: ErrorCode,
    pub context: &'static str,
}

impl DriverError {
    #[inline]
    pub fn new(code: ErrorCode, context: &'static str) -> Self {
        Self { code, context }
    }
}

/// Invoked once every command issued to a stream before it has finished.
pub type Callback = Box<dyn FnOnce(Result<(), DriverError>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of groups and number of lanes per group.
    pub shape: [u32; 2],
    /// Bytes of group-local memory per group.
    pub shared_memory: usize,
    pub stream: Stream,
}

/// A device function, launched once per `(group, lane)` of a grid.
#[derive(Clone)]
pub struct Kernel {
    entry: &'static str,
    function: Arc<dyn Fn([u32; 2]) + Send + Sync>,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").field("entry", &self.entry).finish()
    }
}

impl Kernel {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn([u32; 2]) + Send + Sync + 'static,
    {
        let entry = Self::entry_point::<F>();
        let function = Arc::new(f);
        Self { entry, function }
    }

    /// The entry point a kernel of function type `F` is launched through.
    #[inline]
    pub fn entry_point<F>() -> &'static str {
        type_name::<F>()
    }

    #[inline]
    pub fn entry(&self) -> &'static str {
        self.entry
    }

    #[inline]
    pub fn call(&self, index: [u32; 2]) {
        (self.function)(index)
    }
}

/// Explicit handle to a device runtime.
pub trait Driver: Send + Sync {
    fn device_count(&self) -> Result<usize, DriverError>;

    /// The device the calling context issues commands to.
    fn current_device(&self) -> Result<GpuId, DriverError>;

    fn set_device(&self, gpu: GpuId) -> Result<(), DriverError>;

    /// Creates a stream on the current device.
    fn create_stream(&self) -> Result<Stream, DriverError>;

    /// Enqueues `kernel` on the current device. Returns once the launch is issued, not once it has run.
    fn launch(&self, kernel: Kernel, config: LaunchConfig) -> Result<(), DriverError>;

    /// Enqueues `callback` on `stream` of the current device.
    fn add_callback(&self, stream: Stream, callback: Callback) -> Result<(), DriverError>;

    /// Returns `true` when called by an agent of a running kernel.
    fn in_kernel(&self) -> bool;

    /// Whether kernels may launch kernels themselves.
    fn supports_device_launch(&self) -> bool;
}

/// Switches the current device for as long as it lives.
///
/// Call [`DeviceGuard::restore`] to observe a failed restore; dropping the guard restores silently
/// and only logs the failure.
pub struct DeviceGuard<'a> {
    driver: &'a dyn Driver,
    prior: Option<GpuId>,
}

impl<'a> DeviceGuard<'a> {
    /// Makes `gpu` current, unless it already is.
    pub fn switch(driver: &'a dyn Driver, gpu: GpuId) -> Result<Self, ExecError> {
        let current = driver.current_device()?;
        if current == gpu {
            return Ok(Self {
                driver,
                prior: None,
            });
        }
        if driver.in_kernel() {
            return Err(ExecError::Unsupported(
                "cannot switch devices from inside a kernel",
            ));
        }
        driver.set_device(gpu)?;
        Ok(Self {
            driver,
            prior: Some(current),
        })
    }

    #[inline]
    pub fn prior(&self) -> Option<GpuId> {
        self.prior
    }

    pub fn restore(mut self) -> Result<(), DriverError> {
        match self.prior.take() {
            Some(prior) => self.driver.set_device(prior),
            None => Ok(()),
        }
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        let Some(prior) = self.prior.take() else {
            return;
        };
        if let Err(err) = self.driver.set_device(prior) {
            log::error!("failed to restore {prior}: {err}");
        }
    }
}
