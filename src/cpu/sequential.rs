use std::sync::Arc;

use crate::exec::{BulkInvoke, ExecError, FlatExecutor, IndexFn, NativeOps, Sequential};

/// Runs agents one after another on the calling thread.
///
/// Only the synchronous operation is native; asynchronous calls run it on a helper thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialExecutor;

impl BulkInvoke<usize, usize> for SequentialExecutor {
    #[inline]
    fn bulk_invoke(&self, shape: usize, f: IndexFn<usize>) -> Result<(), ExecError> {
        (0..shape).for_each(|index| f(index));
        Ok(())
    }
}

impl FlatExecutor for SequentialExecutor {
    type Category = Sequential;

    fn ops(&self) -> NativeOps<usize, usize> {
        NativeOps::new().with_bulk_invoke(Arc::new(*self))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        sync::{Arc, Mutex},
    };

    use itertools::Itertools;

    use super::SequentialExecutor;
    use crate::exec::{self, Category, ExecutionCategory, Executor};

    #[test]
    fn test_vocabulary() {
        assert_eq!(
            <<SequentialExecutor as Executor>::Category as ExecutionCategory>::category(),
            Category::Sequential
        );
        let ops = Executor::ops(&SequentialExecutor);
        assert_eq!(ops.names(), vec!["bulk_invoke"]);
    }

    #[tokio::test]
    async fn test_order() -> Result<(), Box<dyn Error>> {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        exec::bulk_async(&SequentialExecutor, 100, move |index| {
            sink.lock().expect("failed to lock").push(index)
        })?
        .await?;

        let seen = seen.lock().expect("failed to lock").clone();
        assert_eq!(seen, (0..100).collect_vec());
        Ok(())
    }
}
