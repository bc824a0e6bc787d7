//! The shapes a producer may settle a promise with.
//!
//! [`Downstream::accept`] dispatches through [`Resolution`], one implementation
//! per shape. A new kind of async handle plugs in by implementing the trait;
//! nothing at the dispatch site changes.

use std::future::Future;

use futures::channel::oneshot;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::pair::{catch_panics, Downstream, Promise};
use crate::{panic_message, Error};

/// Something that knows how to settle a [`Downstream`].
///
/// Returns `true` if this call settled the promise, `false` if it had already
/// been settled.
pub trait Resolution<V, E> {
    fn resolve(self, sink: &Downstream<V, E>) -> bool;
}

/// A plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value<V>(pub V);

/// An error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Failure<E>(pub E);

/// An already running async computation. The promise waits for it and
/// exposes its outcome as its own.
#[derive(Debug)]
pub struct InFlight<F>(pub F);

impl<V, E> Resolution<V, E> for Value<V> {
    fn resolve(self, sink: &Downstream<V, E>) -> bool {
        sink.succeed(self.0)
    }
}

impl<V, E> Resolution<V, E> for Failure<E> {
    fn resolve(self, sink: &Downstream<V, E>) -> bool {
        sink.fail(self.0)
    }
}

impl<V, E> Resolution<V, E> for Result<V, E> {
    fn resolve(self, sink: &Downstream<V, E>) -> bool {
        match self {
            Ok(value) => sink.succeed(value),
            Err(err) => sink.fail(err),
        }
    }
}

impl<V, E, F> Resolution<V, E> for InFlight<F>
where
    F: Future<Output = Result<V, E>> + Send + 'static,
    E: From<Error>,
{
    fn resolve(self, sink: &Downstream<V, E>) -> bool {
        sink.delegate(catch_panics(self.0))
    }
}

impl<V, E> Resolution<V, E> for Promise<V, E>
where
    V: Send + 'static,
    E: From<Error> + Send + 'static,
{
    fn resolve(self, sink: &Downstream<V, E>) -> bool {
        sink.delegate(self.boxed())
    }
}

impl<V, E> Resolution<V, E> for JoinHandle<Result<V, E>>
where
    V: Send + 'static,
    E: From<Error> + Send + 'static,
{
    fn resolve(self, sink: &Downstream<V, E>) -> bool {
        sink.delegate(
            async move {
                match self.await {
                    Ok(result) => result,
                    Err(err) if err.is_panic() => {
                        Err(Error::Panicked(panic_message(&*err.into_panic())).into())
                    }
                    Err(_) => Err(Error::Cancelled.into()),
                }
            }
            .boxed(),
        )
    }
}

impl<V, E> Resolution<V, E> for oneshot::Receiver<Result<V, E>>
where
    V: Send + 'static,
    E: From<Error> + Send + 'static,
{
    fn resolve(self, sink: &Downstream<V, E>) -> bool {
        sink.delegate(
            self.map(|received| received.unwrap_or_else(|_| Err(Error::ProducerDropped.into())))
                .boxed(),
        )
    }
}
