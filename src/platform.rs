//! Host threading primitives shared by the backends.

use std::{
    any::Any,
    cell::RefCell,
    panic::AssertUnwindSafe,
    sync::{Arc, Condvar, Mutex},
};

use crate::exec::ExecError;

thread_local! {
    static LANES: RefCell<Option<Arc<Rendezvous>>> = const { RefCell::new(None) };
}

/// Unwind payload of lanes released from [`sync_lanes`] because a sibling panicked.
struct Abandoned;

#[derive(Debug, Default)]
struct Phase {
    arrived: usize,
    generation: usize,
    abandoned: bool,
}

/// A reusable barrier for the lanes of one team, which a panicking lane can abandon.
#[derive(Debug)]
struct Rendezvous {
    lanes: usize,
    phase: Mutex<Phase>,
    condvar: Condvar,
}

impl Rendezvous {
    fn new(lanes: usize) -> Self {
        Self {
            lanes,
            phase: Default::default(),
            condvar: Condvar::new(),
        }
    }

    /// Returns `false` if the team was abandoned before every lane arrived.
    fn wait(&self) -> bool {
        let mut phase = self.phase.lock().expect("failed to lock");
        if phase.abandoned {
            return false;
        }
        phase.arrived += 1;
        if phase.arrived == self.lanes {
            phase.arrived = 0;
            phase.generation += 1;
            self.condvar.notify_all();
            return true;
        }

        let generation = phase.generation;
        let phase = self
            .condvar
            .wait_while(phase, |phase| phase.generation == generation && !phase.abandoned)
            .expect("failed to lock");
        phase.generation != generation
    }

    fn abandon(&self) {
        self.phase.lock().expect("failed to lock").abandoned = true;
        self.condvar.notify_all();
    }
}

/// Runs blocking work off the calling thread: on the blocking pool of the ambient `tokio` runtime if any,
/// or on a fresh thread otherwise.
pub fn spawn_blocking<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => _ = handle.spawn_blocking(f),
        Err(_) => _ = std::thread::spawn(f),
    }
}

pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    match (payload.downcast_ref::<&str>(), payload.downcast_ref::<String>()) {
        (Some(message), _) => message.to_string(),
        (_, Some(message)) => message.clone(),
        _ => "unknown panic".into(),
    }
}

/// Runs `f`, turning a panic into [`ExecError::Panicked`].
pub fn catch<T, F: FnOnce() -> T>(f: F) -> Result<T, ExecError> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| ExecError::Panicked(panic_message(payload.as_ref())))
}

/// Runs a grid of `groups` teams with `lanes` agents each.
///
/// Teams run in parallel (on `rayon` if enabled); the lanes of one team run concurrently on
/// threads of their own, so they can rendezvous with [`sync_lanes`].
/// `setup` creates the team-local state before any of its lanes start.
///
/// A panicking lane abandons its team: siblings waiting in [`sync_lanes`] unwind instead of
/// blocking forever. The first panic is returned as [`ExecError::Panicked`] once every team is done.
pub fn run_teams<G, S, F>(groups: usize, lanes: usize, setup: S, f: F) -> Result<(), ExecError>
where
    G: Sync,
    S: Fn(usize) -> G + Sync,
    F: Fn(&G, usize, usize) + Sync,
{
    let failure = Mutex::new(None);
    let team = |group: usize| {
        let state = setup(group);
        let rendezvous = Arc::new(Rendezvous::new(lanes));
        std::thread::scope(|scope| {
            for lane in 0..lanes {
                let (f, state, failure) = (&f, &state, &failure);
                let rendezvous = rendezvous.clone();
                scope.spawn(move || {
                    LANES.set(Some(rendezvous.clone()));
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(state, group, lane)));
                    LANES.set(None);

                    let Err(payload) = result else {
                        return;
                    };
                    if !payload.is::<Abandoned>() {
                        let mut failure = failure.lock().expect("failed to lock");
                        if failure.is_none() {
                            *failure = Some(panic_message(payload.as_ref()));
                        }
                    }
                    rendezvous.abandon();
                });
            }
        });
    };

    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..groups).into_par_iter().for_each(team);
    }
    #[cfg(not(feature = "rayon"))]
    (0..groups).for_each(team);

    match failure.into_inner().expect("failed to lock") {
        Some(message) => Err(ExecError::Panicked(message)),
        None => Ok(()),
    }
}

/// Blocks until every lane of the calling agent's team reaches this point.
///
/// Returns `false` without waiting when called outside of a team.
/// Unwinds if another lane of the team panicked, so the team can finish.
pub fn sync_lanes() -> bool {
    match LANES.with_borrow(Option::clone) {
        Some(rendezvous) if rendezvous.wait() => true,
        Some(_) => std::panic::resume_unwind(Box::new(Abandoned)),
        None => false,
    }
}
