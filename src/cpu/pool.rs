use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use crate::{
    exec::{
        BulkAsync, BulkInvoke, Completion, ExecError, FlatExecutor, IndexFn, NativeOps, Parallel,
        completion,
    },
    platform,
};

/// Runs agents in parallel on a `rayon` thread pool of its own.
#[derive(Debug, Clone)]
pub struct ThreadPoolExecutor {
    pool: Arc<rayon::ThreadPool>,
}

#[derive(Debug, Default, Clone)]
pub struct ThreadPoolBuilder {
    /// Number of worker threads; `0` lets `rayon` decide.
    pub threads: usize,
}

#[derive(Debug, Error)]
pub enum ThreadPoolBuildError {
    #[error("failed to build thread pool")]
    Build(#[from] rayon::ThreadPoolBuildError),
}

impl ThreadPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn build(self) -> Result<ThreadPoolExecutor, ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|index| format!("bulk worker {index}"))
            .build()?;
        let pool = Arc::new(pool);
        Ok(ThreadPoolExecutor { pool })
    }
}

impl ThreadPoolExecutor {
    #[inline]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl BulkAsync<usize, usize> for ThreadPoolExecutor {
    fn bulk_async(&self, shape: usize, f: IndexFn<usize>) -> Result<Completion, ExecError> {
        let (signal, completion) = completion::channel();
        self.pool.spawn(move || {
            let result = platform::catch(|| (0..shape).into_par_iter().for_each(|index| f(index)));
            signal.fulfill(result)
        });
        Ok(completion)
    }
}

impl BulkInvoke<usize, usize> for ThreadPoolExecutor {
    fn bulk_invoke(&self, shape: usize, f: IndexFn<usize>) -> Result<(), ExecError> {
        platform::catch(|| {
            self.pool
                .install(|| (0..shape).into_par_iter().for_each(|index| f(index)))
        })
    }
}

impl FlatExecutor for ThreadPoolExecutor {
    type Category = Parallel;

    fn ops(&self) -> NativeOps<usize, usize> {
        let op = Arc::new(self.clone());
        NativeOps::new()
            .with_bulk_async(op.clone())
            .with_bulk_invoke(op)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use super::ThreadPoolBuilder;
    use crate::exec::{self, Completion, ExecError};

    #[test]
    fn test_pool() -> Result<(), Box<dyn Error>> {
        let executor = ThreadPoolBuilder::new().threads(4).build()?;
        assert_eq!(executor.threads(), 4);

        let sum = Arc::new(AtomicUsize::new(0));
        let sink = sum.clone();
        exec::bulk_invoke(&executor, 1000, move |index| {
            sink.fetch_add(index, Ordering::Relaxed);
        })?;
        assert_eq!(sum.load(Ordering::Relaxed), 999 * 1000 / 2);

        let sink = sum.clone();
        let completions = (0..4).map(|_| {
            let sink = sink.clone();
            exec::bulk_async(&executor, 10, move |_| {
                sink.fetch_sub(1, Ordering::Relaxed);
            })
        });
        Completion::join(completions.collect::<Result<Vec<_>, _>>()?).wait()?;
        assert_eq!(sum.load(Ordering::Relaxed), 999 * 1000 / 2 - 40);
        Ok(())
    }

    #[test]
    fn test_panic() -> Result<(), Box<dyn Error>> {
        let executor = ThreadPoolBuilder::new().threads(2).build()?;
        let result = exec::bulk_async(&executor, 8, |index| assert!(index < 7))?.wait();
        assert!(matches!(result, Err(ExecError::Panicked(_))));
        Ok(())
    }
}
