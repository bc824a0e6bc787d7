use std::fmt::{self, Debug};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::trace;

use crate::resolution::Resolution;
use crate::{panic_message, Error};

/// The write half of a [`Promise`].
///
/// A `Downstream` may be cloned and moved across threads. Whichever clone
/// settles first wins; every later `succeed`, `fail` or `accept` is a no-op
/// and returns `false`. If every clone is dropped while the promise is still
/// pending, the promise fails with [`Error::ProducerDropped`].
///
/// # Examples
///
/// ```
/// use promise_bridge::Promise;
/// use futures::executor::block_on;
/// use std::thread;
/// let (sink, promise) = Promise::<String>::pending();
///
/// let task1 = thread::spawn(move || block_on(async {
///     println!("Received {:?}", promise.await);
/// }));
/// assert!(sink.succeed("Hi".into()));
/// assert!(!sink.succeed("Again".into()));
/// task1.join().expect("The task1 thread has panicked.");
/// ```
pub struct Downstream<V, E = Error> {
    shared: Arc<Producer<V, E>>,
}

/// A value that becomes available at most once, as `Ok(V)` or `Err(E)`.
///
/// `Promise` is a plain future: nothing attached to it runs until it is polled,
/// and continuations run on whatever executor does the polling.
#[must_use = "promises do nothing unless polled"]
pub struct Promise<V, E = Error> {
    inner: Arc<Mutex<Inner<V, E>>>,
    driver: Option<BoxFuture<'static, Result<V, E>>>,
}

/// Dropping the last one abandons a still-pending promise.
struct Producer<V, E> {
    inner: Arc<Mutex<Inner<V, E>>>,
}

struct Inner<V, E> {
    state: State<V, E>,
    waker: Option<Waker>,
}

enum State<V, E> {
    Pending,
    /// Settled by handing over an in-flight handle, not yet picked up.
    Deferred(BoxFuture<'static, Result<V, E>>),
    /// The consumer is driving the deferred handle itself.
    Driving,
    Settled(Result<V, E>),
    Abandoned,
    Taken,
}

impl<V, E> State<V, E> {
    fn name(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Deferred(_) => "deferred",
            State::Driving => "driving",
            State::Settled(Ok(_)) => "resolved",
            State::Settled(Err(_)) => "failed",
            State::Abandoned => "abandoned",
            State::Taken => "taken",
        }
    }
}

fn lock<V, E>(inner: &Mutex<Inner<V, E>>) -> MutexGuard<'_, Inner<V, E>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V, E> Downstream<V, E> {
    /// Settles the promise with `value`.
    pub fn succeed(&self, value: V) -> bool {
        self.settle(State::Settled(Ok(value)))
    }

    /// Settles the promise with `err`.
    pub fn fail(&self, err: E) -> bool {
        self.settle(State::Settled(Err(err)))
    }

    /// Settles the promise with whatever shape `resolution` has: a plain value,
    /// an error, or an in-flight handle to wait on.
    pub fn accept<R>(&self, resolution: R) -> bool
    where
        R: Resolution<V, E>,
    {
        resolution.resolve(self)
    }

    /// Hands the promise over to an in-flight future.
    ///
    /// The future is driven by whoever polls the promise. Claims the sink like
    /// any other settle call.
    pub(crate) fn delegate(&self, handle: BoxFuture<'static, Result<V, E>>) -> bool {
        self.settle(State::Deferred(handle))
    }

    /// Whether some clone of this sink has already settled the promise.
    pub fn is_settled(&self) -> bool {
        !matches!(lock(&self.shared.inner).state, State::Pending)
    }

    fn settle(&self, next: State<V, E>) -> bool {
        let mut inner = lock(&self.shared.inner);
        if !matches!(inner.state, State::Pending) {
            trace!(state = inner.state.name(), "ignoring settle of an already settled promise");
            return false;
        }
        inner.state = next;
        let waker = inner.waker.take();
        drop(inner);
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

impl<V, E> Clone for Downstream<V, E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<V, E> Debug for Downstream<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downstream")
            .field("state", &lock(&self.shared.inner).state.name())
            .finish()
    }
}

impl<V, E> Drop for Producer<V, E> {
    /// If this is an unresolved producer, wake with error.
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if !matches!(inner.state, State::Pending) {
            return;
        }
        inner.state = State::Abandoned;
        let waker = inner.waker.take();
        drop(inner);
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<V, E> Promise<V, E> {
    /// Creates an unsettled promise together with its sink.
    pub fn pending() -> (Downstream<V, E>, Self) {
        let inner = Arc::new(Mutex::new(Inner {
            state: State::Pending,
            waker: None,
        }));
        let sink = Downstream {
            shared: Arc::new(Producer {
                inner: inner.clone(),
            }),
        };
        (sink, Promise { inner, driver: None })
    }

    /// A promise that is already resolved with `value`.
    pub fn resolved(value: V) -> Self {
        Self::settled(Ok(value))
    }

    /// A promise that has already failed with `err`.
    pub fn failed(err: E) -> Self {
        Self::settled(Err(err))
    }

    fn settled(result: Result<V, E>) -> Self {
        Promise {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Settled(result),
                waker: None,
            })),
            driver: None,
        }
    }

    /// Whether polling would complete right away.
    pub fn is_settled(&self) -> bool {
        self.driver.is_none() && !matches!(lock(&self.inner).state, State::Pending)
    }

    /// Blocks the current thread until the promise completes.
    ///
    /// Do not call this from inside an async executor, and not for promises
    /// whose deferred handle needs that same executor to make progress.
    pub fn wait(self) -> Result<V, E>
    where
        E: From<Error>,
    {
        futures::executor::block_on(self)
    }
}

impl<V, E> Promise<V, E>
where
    V: Send + 'static,
    E: From<Error> + Send + 'static,
{
    /// A promise driven by `future`. A panic while polling it fails the
    /// promise with [`Error::Panicked`].
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        Promise {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Driving,
                waker: None,
            })),
            driver: Some(catch_panics(future)),
        }
    }

    /// Runs `continuation` on the resolved value. A failure skips the
    /// continuation and fails the returned promise with the same error.
    pub fn then<U, F>(self, continuation: F) -> Promise<U, E>
    where
        U: Send + 'static,
        F: FnOnce(V) -> U + Send + 'static,
    {
        Promise::from_future(async move { self.await.map(continuation) })
    }

    /// Like [`then`](Promise::then), but the continuation may produce any
    /// [`Resolution`], including another in-flight handle.
    pub fn and_then<U, R, F>(self, continuation: F) -> Promise<U, E>
    where
        U: Send + 'static,
        R: Resolution<U, E>,
        F: FnOnce(V) -> R + Send + 'static,
    {
        Promise::from_future(async move {
            let value = self.await?;
            let (sink, next) = Promise::pending();
            sink.accept(continuation(value));
            drop(sink);
            next.await
        })
    }

    /// Converts the failure of this promise.
    pub fn map_err<E2, F>(self, f: F) -> Promise<V, E2>
    where
        E2: From<Error> + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        Promise::from_future(async move { self.await.map_err(f) })
    }

    /// A clonable handle for many independent consumers.
    pub fn shared(self) -> Shared<Self>
    where
        V: Clone,
        E: Clone,
    {
        FutureExt::shared(self)
    }
}

pub(crate) fn catch_panics<V, E, F>(future: F) -> BoxFuture<'static, Result<V, E>>
where
    F: Future<Output = Result<V, E>> + Send + 'static,
    E: From<Error>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .map(|outcome| match outcome {
            Ok(result) => result,
            Err(payload) => Err(Error::Panicked(panic_message(&*payload)).into()),
        })
        .boxed()
}

impl<V, E> Future for Promise<V, E>
where
    E: From<Error>,
{
    type Output = Result<V, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        loop {
            if let Some(driver) = this.driver.as_mut() {
                let output = futures::ready!(driver.as_mut().poll(cx));
                this.driver = None;
                lock(&this.inner).state = State::Taken;
                return Poll::Ready(output);
            }

            let mut inner = lock(&this.inner);
            match std::mem::replace(&mut inner.state, State::Taken) {
                State::Settled(result) => return Poll::Ready(result),
                State::Deferred(handle) => {
                    inner.state = State::Driving;
                    drop(inner);
                    this.driver = Some(handle);
                }
                State::Pending => {
                    inner.state = State::Pending;
                    inner.waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                State::Abandoned => return Poll::Ready(Err(Error::ProducerDropped.into())),
                State::Driving | State::Taken => return Poll::Ready(Err(Error::Consumed.into())),
            }
        }
    }
}

impl<V, E> Debug for Promise<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &lock(&self.inner).state.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
use futures::executor::block_on;
use std::sync::{Arc, Barrier};
use std::thread;
use super::Promise;
use crate::Error;

#[test]
fn test_promise_resolve() {
    let (op, op_a) = Promise::<String>::pending();
    let task1 = thread::spawn(move || block_on(op_a));
    let task2 = thread::spawn(move || op.succeed(String::from("🍓")));
    assert!(task2.join().expect("The task2 thread has panicked"));
    assert_eq!(task1.join().expect("The task1 thread has panicked"), Ok("🍓".to_string()));
}

#[test]
fn test_promise_fail() {
    let (a, b) = Promise::<String>::pending();
    let task1 = thread::spawn(|| block_on(b));
    let task2 = thread::spawn(move || a.fail(Error::Rejected("reject!!".into())));
    task2.join().expect("The task2 thread has panicked");
    assert_eq!(
        task1.join().expect("The task1 thread has panicked"),
        Err(Error::Rejected("reject!!".into()))
    );
}

#[test]
fn test_promise_producer_dropped() {
    let (op, op_a) = Promise::<String>::pending();
    let task1 = thread::spawn(move || block_on(op_a));
    let task2 = thread::spawn(move || {
        // Move the producer into this thread but never settle it.
        std::mem::drop(op);
    });
    task2.join().expect("The task2 thread has panicked");
    assert_eq!(task1.join().expect("The task1 thread has panicked"), Err(Error::ProducerDropped));
}

#[test]
fn test_promise_dropped_clone_keeps_pending() {
    let (op, op_a) = Promise::<u8>::pending();
    drop(op.clone());
    assert!(!op_a.is_settled());
    op.succeed(1);
    assert_eq!(op_a.wait(), Ok(1));
}

#[test]
fn test_promise_no_consumer() {
    let (op, op_a) = Promise::<String>::pending();
    drop(op_a);
    assert!(op.succeed(String::from("🍓")));
}

#[test]
fn test_first_settle_wins() {
    let (sink, promise) = Promise::<u32>::pending();
    assert!(sink.succeed(1));
    assert!(!sink.fail(Error::Rejected("late".into())));
    assert!(!sink.succeed(2));
    assert!(sink.is_settled());
    assert_eq!(promise.wait(), Ok(1));
}

#[test]
fn test_concurrent_settle_single_winner() {
    let (sink, promise) = Promise::<usize>::pending();
    let barrier = Arc::new(Barrier::new(8));
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let sink = sink.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let won = if i % 2 == 0 {
                    sink.succeed(i)
                } else {
                    sink.fail(Error::Rejected(i.to_string()))
                };
                won.then_some(i)
            })
        })
        .collect();
    drop(sink);

    let winners: Vec<usize> = tasks
        .into_iter()
        .filter_map(|task| task.join().expect("settle thread panicked"))
        .collect();
    assert_eq!(winners.len(), 1);
    let winner = winners[0];
    let expected = if winner % 2 == 0 {
        Ok(winner)
    } else {
        Err(Error::Rejected(winner.to_string()))
    };
    assert_eq!(promise.wait(), expected);
}

#[test]
fn test_polled_after_completion() {
    let mut promise = Promise::<u8>::resolved(3);
    assert_eq!(block_on(&mut promise), Ok(3));
    assert_eq!(block_on(&mut promise), Err(Error::Consumed));
}

#[test]
fn test_then_chain() {
    let (sink, promise) = Promise::<u32>::pending();
    let chained = promise.then(|v| v * 2).then(|v| v.to_string());
    thread::spawn(move || sink.succeed(21));
    assert_eq!(chained.wait(), Ok("42".to_string()));
}

#[test]
fn test_then_skips_on_failure() {
    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = ran.clone();
    let chained = Promise::<u32>::failed(Error::Rejected("nope".into()))
        .then(move |v| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            v
        });
    assert_eq!(chained.wait(), Err(Error::Rejected("nope".into())));
    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
}

#[test]
fn test_then_continuation_panic() {
    let chained = Promise::<u32>::resolved(1).then(|_| -> u32 { panic!("continuation blew up") });
    assert_eq!(chained.wait(), Err(Error::Panicked("continuation blew up".into())));
}

#[test]
fn test_and_then_flattens() {
    let chained = Promise::<u32>::resolved(5)
        .and_then(|v| Promise::from_future(async move { Ok::<_, Error>(v + 1) }));
    assert_eq!(chained.wait(), Ok(6));
}

#[test]
fn test_map_err() {
    #[derive(Debug, PartialEq)]
    enum AppError {
        Bridge(Error),
        Wrapped(String),
    }
    impl From<Error> for AppError {
        fn from(err: Error) -> Self {
            AppError::Bridge(err)
        }
    }

    let mapped = Promise::<u8>::failed(Error::Rejected("x".into()))
        .map_err(|err| AppError::Wrapped(err.to_string()));
    assert_eq!(mapped.wait(), Err(AppError::Wrapped("x".into())));

    let (sink, promise) = Promise::<u8, AppError>::pending();
    drop(sink);
    assert_eq!(promise.wait(), Err(AppError::Bridge(Error::ProducerDropped)));
}

#[test]
fn test_two_promises_out_resolve() {
    let (op, op_a) = Promise::<String>::pending();
    let op_a = op_a.shared();
    let op_b = op_a.clone();
    let task1 = thread::spawn(move || block_on(op_a));
    let task2 = thread::spawn(move || block_on(op_b));
    let task3 = thread::spawn(move || op.succeed(String::from("🍓")));
    task3.join().expect("The task3 thread has panicked");
    assert_eq!(task1.join().expect("The task1 thread has panicked"), Ok("🍓".to_string()));
    assert_eq!(task2.join().expect("The task2 thread has panicked"), Ok("🍓".to_string()));
}
}
