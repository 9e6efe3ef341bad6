//! Bulk-parallel execution over pluggable executors.
//!
//! A bulk call launches one function over every index of a grid. The call is written once against
//! the [`exec`] layer and runs on any backend that describes its capabilities there, whether a
//! sequential loop, a thread pool, host-side thread teams, or kernel launches on a device [`gpu`].
//!
//! ```no_run
//! use std::sync::{
//!     Arc,
//!     atomic::{AtomicUsize, Ordering},
//! };
//!
//! use cohort::{cpu::SequentialExecutor, exec};
//!
//! let count = Arc::new(AtomicUsize::new(0));
//! let sink = count.clone();
//! exec::bulk_invoke(&SequentialExecutor, 16, move |_| {
//!     sink.fetch_add(1, Ordering::Relaxed);
//! })?;
//! assert_eq!(count.load(Ordering::Relaxed), 16);
//! # Ok::<(), cohort::exec::ExecError>(())
//! ```

pub mod cpu;
pub mod exec;
pub mod gpu;
pub mod grid;
pub mod platform;

pub use exec::{Completion, ExecError, Executor, FlatExecutor, NativeOps};
pub use grid::{Coord, Point, cast};
