use std::sync::Arc;

use super::{Callback, DeviceGuard, Driver, DriverError, GpuId, Kernel, LaunchConfig, Stream};
use crate::exec::{
    BulkAsync, Completion, Concurrent, ExecError, Executor, IndexFn, NativeOps, Nested, Parallel,
    completion,
};

/// Launches bulk calls as kernels over a grid of `(group, lane)` agents.
///
/// Groups execute in parallel; lanes of one group execute concurrently and may synchronize.
#[derive(Clone)]
pub struct GpuExecutor {
    driver: Arc<dyn Driver>,
    shared_memory: usize,
    stream: Stream,
    gpu: GpuId,
}

impl std::fmt::Debug for GpuExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuExecutor")
            .field("shared_memory", &self.shared_memory)
            .field("stream", &self.stream)
            .field("gpu", &self.gpu)
            .finish_non_exhaustive()
    }
}

impl GpuExecutor {
    /// Creates an executor targeting the current device of `driver`.
    pub fn new(driver: Arc<dyn Driver>) -> Result<Self, ExecError> {
        let gpu = driver.current_device()?;
        Ok(Self {
            driver,
            shared_memory: 0,
            stream: Stream::Default,
            gpu,
        })
    }

    pub fn with_shared_memory(mut self, bytes: usize) -> Self {
        self.shared_memory = bytes;
        self
    }

    pub fn with_stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_gpu(mut self, gpu: GpuId) -> Self {
        self.gpu = gpu;
        self
    }

    #[inline]
    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    #[inline]
    pub fn shared_memory(&self) -> usize {
        self.shared_memory
    }

    #[inline]
    pub fn stream(&self) -> Stream {
        self.stream
    }

    #[inline]
    pub fn gpu(&self) -> GpuId {
        self.gpu
    }

    /// Launches `f` over `shape` with the executor's settings, without waiting for it.
    pub fn bulk_add<F>(&self, shape: [u32; 2], f: F) -> Result<(), ExecError>
    where
        F: Fn([u32; 2]) + Send + Sync + 'static,
    {
        self.bulk_add_with(shape, f, self.shared_memory, self.stream, self.gpu)
    }

    /// Launches `f` over `shape` on `stream` of `gpu`, without waiting for it.
    pub fn bulk_add_with<F>(
        &self,
        shape: [u32; 2],
        f: F,
        shared_memory: usize,
        stream: Stream,
        gpu: GpuId,
    ) -> Result<(), ExecError>
    where
        F: Fn([u32; 2]) + Send + Sync + 'static,
    {
        let kernel = Kernel::new(f);
        let config = LaunchConfig {
            shape,
            shared_memory,
            stream,
        };
        self.submit(kernel, config, gpu, None)
    }

    /// Issues `kernel`, then `callback` behind it on the same stream, with `gpu` made current in between.
    fn submit(
        &self,
        kernel: Kernel,
        config: LaunchConfig,
        gpu: GpuId,
        callback: Option<Callback>,
    ) -> Result<(), ExecError> {
        let driver = self.driver();
        if driver.in_kernel() && !driver.supports_device_launch() {
            return Err(ExecError::Unsupported(
                "launching from a kernel requires dynamic parallelism",
            ));
        }

        let guard = DeviceGuard::switch(driver, gpu)?;
        let launched = driver.launch(kernel, config).and_then(|_| match callback {
            Some(callback) => driver.add_callback(config.stream, callback),
            None => Ok(()),
        });
        let restored = guard.restore();

        match (launched, restored) {
            (Ok(_), Ok(_)) => Ok(()),
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Err(restore)) => Err(ExecError::Restore {
                error: Box::new(err.into()),
                restore,
            }),
        }
    }
}

impl BulkAsync<[u32; 2], [u32; 2]> for GpuExecutor {
    fn bulk_async(&self, shape: [u32; 2], f: IndexFn<[u32; 2]>) -> Result<Completion, ExecError> {
        let (signal, completion) = completion::channel();
        let callback: Callback = Box::new(move |result: Result<(), DriverError>| {
            signal.fulfill(result.map_err(Into::into))
        });
        let kernel = Kernel::new(move |index| f(index));
        let config = LaunchConfig {
            shape,
            shared_memory: self.shared_memory,
            stream: self.stream,
        };
        self.submit(kernel, config, self.gpu, Some(callback))?;
        Ok(completion)
    }
}

impl Executor for GpuExecutor {
    type Category = Nested<Parallel, Concurrent>;
    type Index = [u32; 2];
    type Shape = [u32; 2];

    fn ops(&self) -> NativeOps<[u32; 2], [u32; 2]> {
        NativeOps::new().with_bulk_async(Arc::new(self.clone()))
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

    use super::GpuExecutor;
    use crate::{
        exec::{self, ExecError},
        gpu::{Driver, EmulatorBuilder, ErrorCode, GpuId},
    };

    #[test]
    fn test_native_ops() -> Result<(), Box<dyn Error>> {
        let executor = GpuExecutor::new(Arc::new(EmulatorBuilder::new().build()?))?;
        let ops = exec::Executor::ops(&executor);
        assert_eq!(ops.names(), vec!["bulk_async"]);
        assert_eq!(executor.gpu(), GpuId::new(0));
        assert_eq!(executor.shared_memory(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_bulk_async() -> Result<(), Box<dyn Error>> {
        let executor = GpuExecutor::new(Arc::new(EmulatorBuilder::new().build()?))?;
        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        let completion = exec::bulk_async(&executor, [4, 32], move |[group, lane]| {
            assert!(group < 4 && lane < 32);
            sink.fetch_add(1, Ordering::Relaxed);
        })?;
        completion.await?;
        assert_eq!(count.load(Ordering::Relaxed), 128);
        Ok(())
    }

    #[test]
    fn test_bulk_add_with() -> Result<(), Box<dyn Error>> {
        let driver = Arc::new(EmulatorBuilder::new().devices(2).build()?);
        let executor = GpuExecutor::new(driver.clone())?.with_shared_memory(1 << 10);

        let stream = driver.create_stream()?;
        executor.bulk_add_with([1, 1], |_| (), 0, stream, GpuId::new(0))?;
        executor.bulk_add([2, 2], |_| ())?;
        exec::bulk_invoke(&executor.clone().with_gpu(GpuId::new(1)), [1, 1], |_| ())?;
        assert_eq!(driver.launches(GpuId::new(0)), 2);
        assert_eq!(driver.launches(GpuId::new(1)), 1);

        let err = executor.bulk_add_with([1, 1], |_| (), 0, stream, GpuId::new(1));
        assert!(matches!(err, Err(ExecError::Platform(err)) if err.code == ErrorCode::InvalidHandle));
        assert_eq!(driver.current_device()?, GpuId::new(0));
        Ok(())
    }
}
