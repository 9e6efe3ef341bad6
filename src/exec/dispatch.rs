//! Resolution of bulk calls against the [`NativeOps`] descriptor of an executor.

use std::sync::Arc;

use super::{
    Completion, ExecError, Executor, Factory, IndexFn, NativeOps, ShapedFn, ShareWith, Shared,
    SharedFn, completion, share::Levels,
};
use crate::{
    grid::{CastError, Coord, Point, cast},
    platform,
};

/// An agent function in one of the forms the native operations accept.
enum Agent<I, S> {
    Indexed(IndexFn<I>),
    Shaped(ShapedFn<I, S>),
}

impl<I: Point, S: Point> Agent<I, S> {
    /// Narrows to an index-only function, capturing a copy of `shape` if needed.
    fn into_indexed(self, shape: &S) -> IndexFn<I> {
        match self {
            Agent::Indexed(f) => f,
            Agent::Shaped(f) => {
                let shape = shape.clone();
                Arc::new(move |index: I| f(index, &shape))
            }
        }
    }

    /// Widens to an index-and-shape function that ignores the shape if needed.
    fn into_shaped(self) -> ShapedFn<I, S> {
        match self {
            Agent::Indexed(f) => Arc::new(move |index: I, _: &S| f(index)),
            Agent::Shaped(f) => f,
        }
    }
}

fn launch_async<I: Point, S: Point>(
    ops: &NativeOps<I, S>,
    shape: S,
    agent: Agent<I, S>,
) -> Result<Completion, ExecError> {
    let agent = match (agent, &ops.bulk_async, &ops.bulk_async_shaped) {
        (Agent::Indexed(f), Some(op), _) => return op.bulk_async(shape, f),
        (Agent::Shaped(f), _, Some(op)) => return op.bulk_async_shaped(shape, f),
        (agent @ Agent::Indexed(_), None, Some(op)) => {
            log::debug!("bulk_async resolved to native bulk_async_shaped");
            return op.bulk_async_shaped(shape, agent.into_shaped());
        }
        (agent @ Agent::Shaped(_), Some(op), None) => {
            log::debug!("bulk_async_shaped resolved to native bulk_async");
            let f = agent.into_indexed(&shape);
            return op.bulk_async(shape, f);
        }
        (agent, _, _) => agent,
    };
    let f = agent.into_indexed(&shape);
    blocking(ops, shape, f)
}

/// Runs the native synchronous operation on a helper thread.
fn blocking<I: Point, S: Point>(
    ops: &NativeOps<I, S>,
    shape: S,
    f: IndexFn<I>,
) -> Result<Completion, ExecError> {
    let Some(op) = ops.bulk_invoke.clone() else {
        return Err(ExecError::Unsupported("executor implements no bulk operation"));
    };
    log::debug!("bulk_async resolved to native bulk_invoke on a helper thread");

    let (signal, completion) = completion::channel();
    platform::spawn_blocking(move || {
        let result = platform::catch(|| op.bulk_invoke(shape, f)).and_then(|result| result);
        signal.fulfill(result)
    });
    Ok(completion)
}

fn invoke<I: Point, S: Point>(
    ops: &NativeOps<I, S>,
    shape: S,
    agent: Agent<I, S>,
) -> Result<(), ExecError> {
    match &ops.bulk_invoke {
        Some(op) => {
            let f = agent.into_indexed(&shape);
            op.bulk_invoke(shape, f)
        }
        None => {
            log::debug!("bulk_invoke resolved to waiting on bulk_async");
            launch_async(ops, shape, agent)?.wait()
        }
    }
}

/// Materializes the shared objects ahead of the dispatch and binds them into a shaped agent.
fn capture<I: Point, S: Point>(
    shape: &S,
    f: SharedFn<I, S>,
    factories: &[Factory],
) -> Result<Agent<I, S>, ExecError> {
    let levels = Levels::build(factories, &shape.to_coord())?;
    let agent = move |index: I, shape: &S| {
        let refs = levels.refs(&index.to_coord());
        f(index, shape, &refs)
    };
    Ok(Agent::Shaped(Arc::new(agent)))
}

fn launch_async_shared<I: Point, S: Point>(
    ops: &NativeOps<I, S>,
    shape: S,
    f: SharedFn<I, S>,
    factories: Vec<Factory>,
) -> Result<Completion, ExecError> {
    if let Some(op) = &ops.bulk_async_shared {
        return op.bulk_async_shared(shape, f, factories);
    }

    if let Some(op) = ops.bulk_invoke_shared.clone() {
        log::debug!("bulk_async_shared resolved to native bulk_invoke_shared on a helper thread");
        let (signal, completion) = completion::channel();
        platform::spawn_blocking(move || {
            let result = platform::catch(|| op.bulk_invoke_shared(shape, f, factories))
                .and_then(|result| result);
            signal.fulfill(result)
        });
        return Ok(completion);
    }

    log::debug!("bulk_async_shared resolved to closure capture");
    let agent = capture(&shape, f, &factories)?;
    launch_async(ops, shape, agent)
}

fn invoke_shared<I: Point, S: Point>(
    ops: &NativeOps<I, S>,
    shape: S,
    f: SharedFn<I, S>,
    factories: Vec<Factory>,
) -> Result<(), ExecError> {
    if let Some(op) = &ops.bulk_invoke_shared {
        return op.bulk_invoke_shared(shape, f, factories);
    }

    if ops.bulk_invoke.is_some() {
        log::debug!("bulk_invoke_shared resolved to closure capture over native bulk_invoke");
        let agent = capture(&shape, f, &factories)?;
        return invoke(ops, shape, agent);
    }

    log::debug!("bulk_invoke_shared resolved to waiting on bulk_async_shared");
    launch_async_shared(ops, shape, f, factories)?.wait()
}

/// Erases the typed shared parameter of `f` for the native operation traits.
fn erase_shared<E, T, F>(f: F) -> SharedFn<E::Index, E::Shape>
where
    E: Executor + ?Sized,
    T: ShareWith<E::Category>,
    F: for<'a, 'b> Fn(E::Index, &'a E::Shape, T::Param<'b>) + Send + Sync + 'static,
{
    Arc::new(move |index, shape: &E::Shape, levels: &[&Shared]| {
        f(index, shape, T::param(levels))
    })
}

/// Launches `f` once per index of `shape` without waiting for it.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn bulk_async<E, F>(executor: &E, shape: E::Shape, f: F) -> Result<Completion, ExecError>
where
    E: Executor + ?Sized,
    F: Fn(E::Index) + Send + Sync + 'static,
{
    let ops = Executor::ops(executor);
    launch_async(&ops, shape, Agent::Indexed(Arc::new(f)))
}

/// Like [`bulk_async`], but each agent also receives the shape of the dispatch.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn bulk_async_shaped<E, F>(executor: &E, shape: E::Shape, f: F) -> Result<Completion, ExecError>
where
    E: Executor + ?Sized,
    F: Fn(E::Index, &E::Shape) + Send + Sync + 'static,
{
    let ops = Executor::ops(executor);
    launch_async(&ops, shape, Agent::Shaped(Arc::new(f)))
}

/// Like [`bulk_async_shaped`], with shared objects created from `shared` and distributed over
/// the levels of the executor's category. See [`ShareWith`].
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn bulk_async_shared<E, T, F>(
    executor: &E,
    shape: E::Shape,
    shared: T,
    f: F,
) -> Result<Completion, ExecError>
where
    E: Executor + ?Sized,
    T: ShareWith<E::Category>,
    F: for<'a, 'b> Fn(E::Index, &'a E::Shape, T::Param<'b>) + Send + Sync + 'static,
{
    let ops = Executor::ops(executor);
    let f = erase_shared::<E, T, F>(f);
    launch_async_shared(&ops, shape, f, shared.into_factories())
}

/// Runs `f` once per index of `shape`, returning after every agent has completed.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn bulk_invoke<E, F>(executor: &E, shape: E::Shape, f: F) -> Result<(), ExecError>
where
    E: Executor + ?Sized,
    F: Fn(E::Index) + Send + Sync + 'static,
{
    let ops = Executor::ops(executor);
    invoke(&ops, shape, Agent::Indexed(Arc::new(f)))
}

#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn bulk_invoke_shaped<E, F>(executor: &E, shape: E::Shape, f: F) -> Result<(), ExecError>
where
    E: Executor + ?Sized,
    F: Fn(E::Index, &E::Shape) + Send + Sync + 'static,
{
    let ops = Executor::ops(executor);
    invoke(&ops, shape, Agent::Shaped(Arc::new(f)))
}

#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn bulk_invoke_shared<E, T, F>(
    executor: &E,
    shape: E::Shape,
    shared: T,
    f: F,
) -> Result<(), ExecError>
where
    E: Executor + ?Sized,
    T: ShareWith<E::Category>,
    F: for<'a, 'b> Fn(E::Index, &'a E::Shape, T::Param<'b>) + Send + Sync + 'static,
{
    let ops = Executor::ops(executor);
    let f = erase_shared::<E, T, F>(f);
    invoke_shared(&ops, shape, f, shared.into_factories())
}

/// Wraps `f`, written against `shape`, into an agent of the executor's `native` grid.
///
/// Native agents past the size of `shape` do nothing.
fn recast<I, S, P, Q, F>(native: &S, shape: Q, f: F) -> Result<impl Fn(I) + Send + Sync + 'static, ExecError>
where
    I: Point,
    S: Point,
    P: Point,
    Q: Point,
    F: Fn(P) + Send + Sync + 'static,
{
    if I::RANK == 0 || S::RANK == 0 || P::RANK == 0 || Q::RANK == 0 {
        return Err(CastError::RankZero.into());
    }
    if I::RANK != S::RANK {
        return Err(CastError::Mismatch(Coord::zeros(I::RANK), native.to_coord()).into());
    }
    if P::RANK != Q::RANK {
        return Err(CastError::Mismatch(Coord::zeros(P::RANK), shape.to_coord()).into());
    }

    let (shape_coord, native_coord) = (shape.to_coord(), native.to_coord());
    let size = shape_coord
        .checked_size()
        .ok_or(CastError::SizeOverflow(shape_coord))?;
    let native_size = native_coord
        .checked_size()
        .ok_or(CastError::SizeOverflow(native_coord))?;
    if native_size < size {
        return Err(ExecError::Unsupported(
            "native shape is smaller than the requested shape",
        ));
    }

    let native = native.clone();
    Ok(move |index: I| {
        let linear: usize = cast(&index, &native, &native_size);
        if linear < size {
            f(cast(&linear, &size, &shape))
        }
    })
}

/// Launches `f` once per index of `shape`, a grid of any rank, over the `native` grid of the executor.
///
/// Each native agent casts its index to the rank of `shape`, preserving its linear rank.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn bulk_async_cast<E, P, Q, F>(
    executor: &E,
    native: E::Shape,
    shape: Q,
    f: F,
) -> Result<Completion, ExecError>
where
    E: Executor + ?Sized,
    P: Point,
    Q: Point,
    F: Fn(P) + Send + Sync + 'static,
{
    let f = recast::<E::Index, _, P, _, _>(&native, shape, f)?;
    bulk_async(executor, native, f)
}

/// Synchronous twin of [`bulk_async_cast`].
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn bulk_invoke_cast<E, P, Q, F>(
    executor: &E,
    native: E::Shape,
    shape: Q,
    f: F,
) -> Result<(), ExecError>
where
    E: Executor + ?Sized,
    P: Point,
    Q: Point,
    F: Fn(P) + Send + Sync + 'static,
{
    let f = recast::<E::Index, _, P, _, _>(&native, shape, f)?;
    bulk_invoke(executor, native, f)
}

#[cfg(test)]
mod tests {
    use std::{
        error::Error,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use itertools::Itertools;

    use super::{bulk_async, bulk_async_shaped, bulk_invoke, bulk_invoke_cast, bulk_invoke_shared};
    use crate::{
        exec::{
            BulkAsyncShaped, BulkInvoke, Completion, ExecError, FlatExecutor, IndexFn, NativeOps,
            Parallel, ShapedFn,
        },
        grid::CastError,
    };

    /// Implements only the shaped asynchronous operation, synchronously.
    #[derive(Debug, Default, Clone)]
    struct ShapedOnly(Arc<AtomicUsize>);

    impl BulkAsyncShaped<usize, usize> for ShapedOnly {
        fn bulk_async_shaped(
            &self,
            shape: usize,
            f: ShapedFn<usize, usize>,
        ) -> Result<Completion, ExecError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            (0..shape).for_each(|index| f(index, &shape));
            Ok(Completion::ready(Ok(())))
        }
    }

    impl FlatExecutor for ShapedOnly {
        type Category = Parallel;

        fn ops(&self) -> NativeOps<usize, usize> {
            NativeOps::new().with_bulk_async_shaped(Arc::new(self.clone()))
        }
    }

    /// Implements only the synchronous operation.
    #[derive(Debug, Default, Clone)]
    struct InvokeOnly;

    impl BulkInvoke<usize, usize> for InvokeOnly {
        fn bulk_invoke(&self, shape: usize, f: IndexFn<usize>) -> Result<(), ExecError> {
            (0..shape).for_each(|index| f(index));
            Ok(())
        }
    }

    impl FlatExecutor for InvokeOnly {
        type Category = Parallel;

        fn ops(&self) -> NativeOps<usize, usize> {
            NativeOps::new().with_bulk_invoke(Arc::new(self.clone()))
        }
    }

    struct Nothing;

    impl FlatExecutor for Nothing {
        type Category = Parallel;

        fn ops(&self) -> NativeOps<usize, usize> {
            NativeOps::new()
        }
    }

    #[test]
    fn test_index_through_shaped() -> Result<(), Box<dyn Error>> {
        let executor = ShapedOnly::default();
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        bulk_invoke(&executor, 5, move |index| {
            sink.lock().expect("failed to lock").push(index)
        })?;

        let seen = seen.lock().expect("failed to lock").clone();
        assert_eq!(seen, (0..5).collect_vec());
        assert_eq!(executor.0.load(Ordering::Relaxed), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_async_from_invoke() -> Result<(), Box<dyn Error>> {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        let completion = bulk_async_shaped(&InvokeOnly, 16, move |_, &shape| {
            assert_eq!(shape, 16);
            sink.fetch_add(1, Ordering::Relaxed);
        })?;
        completion.await?;
        assert_eq!(count.load(Ordering::Relaxed), 16);
        Ok(())
    }

    #[test]
    fn test_agent_panic() {
        let completion = bulk_async(&InvokeOnly, 4, |index| assert_ne!(index, 2));
        let result = completion.and_then(Completion::wait);
        assert!(matches!(result, Err(ExecError::Panicked(_))));
    }

    #[test]
    fn test_shared_capture() -> Result<(), Box<dyn Error>> {
        let total = Arc::new(AtomicUsize::new(0));
        let sink = total.clone();
        bulk_invoke_shared(
            &InvokeOnly,
            10,
            || AtomicUsize::new(0),
            move |index: usize, _: &usize, counter: &AtomicUsize| {
                let before = counter.fetch_add(index, Ordering::Relaxed);
                sink.fetch_max(before + index, Ordering::Relaxed);
            },
        )?;
        assert_eq!(total.load(Ordering::Relaxed), 45);
        Ok(())
    }

    #[test]
    fn test_cast() -> Result<(), Box<dyn Error>> {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        bulk_invoke_cast(&InvokeOnly, 16, [3usize, 4], move |index: [usize; 2]| {
            sink.lock().expect("failed to lock").push(index)
        })?;

        let seen = seen.lock().expect("failed to lock").clone();
        let expected = (0..4).cartesian_product(0..3).map(|(y, x)| [x, y]).collect_vec();
        assert_eq!(seen, expected);

        let result = bulk_invoke_cast(&InvokeOnly, 8, [3usize, 4], |_: [usize; 2]| ());
        assert!(matches!(result, Err(ExecError::Unsupported(_))));

        let huge = [usize::MAX, 2, 2];
        let result = bulk_invoke_cast(&InvokeOnly, 8, huge, |_: [usize; 3]| ());
        assert!(matches!(result, Err(ExecError::Cast(CastError::SizeOverflow(_)))));
        Ok(())
    }

    #[test]
    fn test_unsupported() {
        assert!(matches!(
            bulk_invoke(&Nothing, 4, |_| ()),
            Err(ExecError::Unsupported(_))
        ));
    }
}
