//! Distribution of shared arguments over the levels of a grid.
//!
//! Shared arguments are passed as factories. For a flat category, one factory `Fn() -> T` is called
//! once per dispatch and every agent receives `&T`. For a nested category, a tuple of factories is
//! expected, one per level: the outermost object is created once, and each inner level once per group
//! of the level above, so every group sees a private share of its own.
//!
//! A backend needing another distribution declares its own category type together with its own
//! [`ShareWith`] implementations.

use std::{any::type_name, sync::Arc};

use itertools::Itertools;

use super::{
    Concurrent, ExecError, ExecutionCategory, Factory, FlatCategory, Nested, Parallel, Sequential,
    Shared,
};
use crate::grid::Coord;

/// Shared arguments for backends of category `C`.
pub trait ShareWith<C: ExecutionCategory>: Send + 'static {
    /// What each agent receives.
    type Param<'a>;

    /// One factory per level of `C`, outermost first.
    fn into_factories(self) -> Vec<Factory>;

    /// Recovers the typed parameter from one reference per level.
    fn param<'a>(levels: &[&'a Shared]) -> Self::Param<'a>;
}

fn factory<F, T>(f: F) -> Factory
where
    F: Fn() -> T + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    Arc::new(move || Box::new(f()) as Box<Shared>)
}

fn downcast<'a, T: 'static>(shared: &'a Shared) -> &'a T {
    match shared.downcast_ref::<T>() {
        Some(shared) => shared,
        None => unreachable!("shared level does not hold a {}", type_name::<T>()),
    }
}

macro_rules! impl_share_flat {
    ($c:ty) => {
        impl<F, T> ShareWith<$c> for F
        where
            F: Fn() -> T + Send + Sync + 'static,
            T: Send + Sync + 'static,
        {
            type Param<'a> = &'a T;

            fn into_factories(self) -> Vec<Factory> {
                vec![factory(self)]
            }

            fn param<'a>(levels: &[&'a Shared]) -> Self::Param<'a> {
                downcast(levels[0])
            }
        }
    };
}

impl_share_flat!(Sequential);
impl_share_flat!(Parallel);
impl_share_flat!(Concurrent);

impl<O, I, F0, F1, T0, T1> ShareWith<Nested<O, I>> for (F0, F1)
where
    O: FlatCategory,
    I: FlatCategory,
    F0: Fn() -> T0 + Send + Sync + 'static,
    F1: Fn() -> T1 + Send + Sync + 'static,
    T0: Send + Sync + 'static,
    T1: Send + Sync + 'static,
{
    type Param<'a> = (&'a T0, &'a T1);

    fn into_factories(self) -> Vec<Factory> {
        let (f0, f1) = self;
        vec![factory(f0), factory(f1)]
    }

    fn param<'a>(levels: &[&'a Shared]) -> Self::Param<'a> {
        (downcast(levels[0]), downcast(levels[1]))
    }
}

impl<O, M, I, F0, F1, F2, T0, T1, T2> ShareWith<Nested<O, Nested<M, I>>> for (F0, F1, F2)
where
    O: FlatCategory,
    M: FlatCategory,
    I: FlatCategory,
    F0: Fn() -> T0 + Send + Sync + 'static,
    F1: Fn() -> T1 + Send + Sync + 'static,
    F2: Fn() -> T2 + Send + Sync + 'static,
    T0: Send + Sync + 'static,
    T1: Send + Sync + 'static,
    T2: Send + Sync + 'static,
{
    type Param<'a> = (&'a T0, &'a T1, &'a T2);

    fn into_factories(self) -> Vec<Factory> {
        let (f0, f1, f2) = self;
        vec![factory(f0), factory(f1), factory(f2)]
    }

    fn param<'a>(levels: &[&'a Shared]) -> Self::Param<'a> {
        (
            downcast(levels[0]),
            downcast(levels[1]),
            downcast(levels[2]),
        )
    }
}

/// Shared objects materialized by the capability layer for backends without a native shared operation.
#[derive(Debug)]
pub(crate) struct Levels {
    shape: Coord,
    levels: Vec<Vec<Box<Shared>>>,
}

impl Levels {
    /// Creates every object of every level ahead of the dispatch.
    pub fn build(factories: &[Factory], shape: &Coord) -> Result<Self, ExecError> {
        if factories.len() > shape.rank() {
            return Err(ExecError::Unsupported(
                "shared levels exceed the rank of the shape",
            ));
        }
        let levels = factories
            .iter()
            .enumerate()
            .map(|(depth, f)| {
                let groups: usize = shape[..depth].iter().product();
                (0..groups).map(|_| f()).collect_vec()
            })
            .collect();
        let shape = *shape;
        Ok(Self { shape, levels })
    }

    /// One reference per level for the agent at `index`.
    pub fn refs(&self, index: &Coord) -> Vec<&Shared> {
        self.levels
            .iter()
            .enumerate()
            .map(|(depth, level)| {
                let group = Coord::from_slice(&index[..depth]);
                let shape = Coord::from_slice(&self.shape[..depth]);
                level[group.linear(&shape)].as_ref()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{Levels, ShareWith};
    use crate::{
        exec::{Concurrent, Nested, Parallel},
        grid::Coord,
    };

    #[test]
    fn test_flat_param() {
        let factories = <_ as ShareWith<Parallel>>::into_factories(|| AtomicUsize::new(3));
        assert_eq!(factories.len(), 1);

        let shared = factories[0]();
        let param = <fn() -> AtomicUsize as ShareWith<Parallel>>::param(&[shared.as_ref()]);
        assert_eq!(param.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_levels() -> Result<(), Box<dyn std::error::Error>> {
        let share = (|| AtomicUsize::new(0), || AtomicUsize::new(0));
        let factories = <_ as ShareWith<Nested<Parallel, Concurrent>>>::into_factories(share);

        let shape = Coord::from_slice(&[3, 4]);
        let levels = Levels::build(&factories, &shape)?;
        assert_eq!(levels.levels[0].len(), 1);
        assert_eq!(levels.levels[1].len(), 3);

        for index in shape.iter_shape() {
            let refs = levels.refs(&index);
            let (outer, inner) =
                <(fn() -> AtomicUsize, fn() -> AtomicUsize) as ShareWith<
                    Nested<Parallel, Concurrent>,
                >>::param(&refs);
            outer.fetch_add(1, Ordering::Relaxed);
            inner.fetch_add(index[0] + 1, Ordering::Relaxed);
        }

        let refs = levels.refs(&Coord::from_slice(&[2, 0]));
        let (outer, inner) = <(fn() -> AtomicUsize, fn() -> AtomicUsize) as ShareWith<
            Nested<Parallel, Concurrent>,
        >>::param(&refs);
        assert_eq!(outer.load(Ordering::Relaxed), 12);
        assert_eq!(inner.load(Ordering::Relaxed), 3 * 4);

        assert!(Levels::build(&factories, &Coord::scalar(3)).is_err());
        Ok(())
    }
}
