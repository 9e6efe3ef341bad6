use std::sync::Arc;

use itertools::Itertools;

use crate::{
    exec::{
        BulkInvoke, BulkInvokeShared, Concurrent, ExecError, Executor, Factory, IndexFn,
        NativeOps, Nested, Parallel, SharedFn,
    },
    platform,
};

/// Runs a grid of teams on host threads: teams in parallel, the lanes of a team concurrently.
///
/// Lanes of one team may rendezvous with [`sync_lanes`](crate::platform::sync_lanes).
/// Shared objects are created by the executor itself, the inner one by each team before it starts.
#[derive(Debug, Default, Clone, Copy)]
pub struct TeamExecutor;

impl BulkInvoke<[usize; 2], [usize; 2]> for TeamExecutor {
    fn bulk_invoke(&self, shape: [usize; 2], f: IndexFn<[usize; 2]>) -> Result<(), ExecError> {
        let [groups, lanes] = shape;
        platform::run_teams(groups, lanes, |_| (), |_, group, lane| f([group, lane]))
    }
}

impl BulkInvokeShared<[usize; 2], [usize; 2]> for TeamExecutor {
    fn bulk_invoke_shared(
        &self,
        shape: [usize; 2],
        f: SharedFn<[usize; 2], [usize; 2]>,
        levels: Vec<Factory>,
    ) -> Result<(), ExecError> {
        let (outer, inner) = match levels.as_slice() {
            [] => (None, None),
            [outer] => (Some(outer()), None),
            [outer, inner] => (Some(outer()), Some(inner.clone())),
            _ => {
                return Err(ExecError::Unsupported(
                    "a team grid has no more than two levels",
                ));
            }
        };

        let [groups, lanes] = shape;
        let setup = |_: usize| inner.as_ref().map(|inner| inner());
        // a panicking inner factory unwinds through the team rather than one of its lanes
        platform::catch(|| {
            platform::run_teams(groups, lanes, setup, |team, group, lane| {
                let shared = outer.iter().chain(team).map(|shared| &**shared).collect_vec();
                f([group, lane], &shape, &shared)
            })
        })?
    }
}

impl Executor for TeamExecutor {
    type Category = Nested<Parallel, Concurrent>;
    type Index = [usize; 2];
    type Shape = [usize; 2];

    fn ops(&self) -> NativeOps<[usize; 2], [usize; 2]> {
        let op = Arc::new(*self);
        NativeOps::new()
            .with_bulk_invoke(op.clone())
            .with_bulk_invoke_shared(op)
    }
}
