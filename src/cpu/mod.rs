//! Executors running agents on host threads.

#[cfg(feature = "rayon")]
pub use pool::{ThreadPoolBuildError, ThreadPoolBuilder, ThreadPoolExecutor};
pub use sequential::SequentialExecutor;
pub use team::TeamExecutor;

#[cfg(feature = "rayon")]
pub mod pool;
pub mod sequential;
pub mod team;
