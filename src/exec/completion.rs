use std::future::IntoFuture;

use futures::{FutureExt, future::BoxFuture};

use super::ExecError;

/// Creates a connected pair of a [`Signal`] and the [`Completion`] it fulfils.
pub fn channel() -> (Signal, Completion) {
    let (sender, receiver) = flume::bounded(1);
    let signal = Signal(sender);
    let completion = Completion(State::Pending(receiver));
    (signal, completion)
}

/// The producing side of a [`Completion`]. Consumed by fulfilling it, so it fires at most once.
#[derive(Debug)]
pub struct Signal(flume::Sender<Result<(), ExecError>>);

impl Signal {
    #[inline]
    pub fn fulfill(self, result: Result<(), ExecError>) {
        _ = self.0.send(result)
    }
}

#[derive(Debug)]
enum State {
    Pending(flume::Receiver<Result<(), ExecError>>),
    Joined(Vec<Completion>),
}

/// Handle to the eventual completion of one bulk dispatch.
///
/// Wait on it with [`Completion::wait`], or `.await` it.
/// If the producer goes away without fulfilling it, waiting yields [`ExecError::Disconnected`].
#[derive(Debug)]
pub struct Completion(State);

impl Completion {
    /// A completion that is already fulfilled with `result`.
    pub fn ready(result: Result<(), ExecError>) -> Self {
        let (signal, completion) = channel();
        signal.fulfill(result);
        completion
    }

    /// Combines several completions into one that is ready when all of them are.
    /// Reports the first error in order, after every handle has been waited on.
    pub fn join(completions: impl IntoIterator<Item = Completion>) -> Self {
        Self(State::Joined(completions.into_iter().collect()))
    }

    /// Returns `true` if waiting would not block.
    pub fn is_ready(&self) -> bool {
        match &self.0 {
            State::Pending(receiver) => !receiver.is_empty() || receiver.is_disconnected(),
            State::Joined(completions) => completions.iter().all(Completion::is_ready),
        }
    }

    /// Blocks the calling thread until the dispatch completes.
    pub fn wait(self) -> Result<(), ExecError> {
        match self.0 {
            State::Pending(receiver) => receiver.recv().map_err(|_| ExecError::Disconnected)?,
            State::Joined(completions) => completions
                .into_iter()
                .map(Completion::wait)
                .fold(Ok(()), Result::and),
        }
    }
}

impl IntoFuture for Completion {
    type Output = Result<(), ExecError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        match self.0 {
            State::Pending(receiver) => async move {
                receiver
                    .recv_async()
                    .await
                    .map_err(|_| ExecError::Disconnected)?
            }
            .boxed(),
            State::Joined(completions) => async move {
                let futures = completions.into_iter().map(IntoFuture::into_future);
                let results = futures::future::join_all(futures).await;
                results.into_iter().fold(Ok(()), Result::and)
            }
            .boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, time::Duration};

    use super::{Completion, channel};
    use crate::exec::ExecError;

    #[test]
    fn test_signal() -> Result<(), Box<dyn Error>> {
        let (signal, completion) = channel();
        assert!(!completion.is_ready());
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            signal.fulfill(Ok(()))
        });
        completion.wait()?;
        handle.join().expect("producer panicked");
        Ok(())
    }

    #[test]
    fn test_disconnected() {
        let (signal, completion) = channel();
        drop(signal);
        assert!(completion.is_ready());
        assert!(matches!(completion.wait(), Err(ExecError::Disconnected)));
    }

    #[tokio::test]
    async fn test_join() {
        let ok = Completion::ready(Ok(()));
        let err = Completion::ready(Err(ExecError::Unsupported("test")));
        let (signal, pending) = channel();
        let joined = Completion::join([ok, pending, err]);
        assert!(!joined.is_ready());

        signal.fulfill(Ok(()));
        assert!(joined.is_ready());
        assert!(matches!(joined.await, Err(ExecError::Unsupported("test"))));
    }
}
