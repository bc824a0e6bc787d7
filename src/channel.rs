//! Closeable channels.
//!
//! [`Channel`] is what [`splice`](crate::splice()) talks to. [`Pipe`] is a
//! bounded in-memory implementation backed by a Tokio `mpsc` queue.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// An ordered, closeable queue that is safe to use from many tasks at once.
#[async_trait]
pub trait Channel<T: Send + 'static>: Send + Sync {
    /// Waits for room and sends `item`. Returns `false` if the channel is
    /// closed or gets closed while waiting; the item is dropped.
    async fn send(&self, item: T) -> bool;

    /// Waits for the next item. `None` means the channel is closed and
    /// drained.
    async fn receive(&self) -> Option<T>;

    /// Closes the channel. Closing twice is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[async_trait]
impl<T, C> Channel<T> for Arc<C>
where
    T: Send + 'static,
    C: Channel<T> + ?Sized,
{
    async fn send(&self, item: T) -> bool {
        (**self).send(item).await
    }

    async fn receive(&self) -> Option<T> {
        (**self).receive().await
    }

    fn close(&self) {
        (**self).close()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// A bounded channel that can be closed from either end.
///
/// After [`close`](Channel::close), sends fail at once and senders blocked on
/// a full buffer give up. Items already buffered stay readable; once they are
/// drained, receivers see `None`.
///
/// # Examples
///
/// ```
/// use promise_bridge::{Channel, Pipe};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let pipe = Pipe::new(4);
/// assert!(pipe.send(1).await);
/// pipe.close();
/// assert!(!pipe.send(2).await);
/// assert_eq!(pipe.receive().await, Some(1));
/// assert_eq!(pipe.receive().await, None);
/// # });
/// ```
pub struct Pipe<T> {
    sender: Mutex<Option<Sender<T>>>,
    receiver: tokio::sync::Mutex<Receiver<T>>,
    closed: CancellationToken,
}

impl<T> Pipe<T> {
    /// A pipe buffering up to `capacity` items. Zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            closed: CancellationToken::new(),
        }
    }

    fn sender(&self) -> Option<Sender<T>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T> fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl<T: Send + 'static> Channel<T> for Pipe<T> {
    async fn send(&self, item: T) -> bool {
        let Some(sender) = self.sender() else {
            return false;
        };
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            sent = sender.send(item) => sent.is_ok(),
        }
    }

    async fn receive(&self) -> Option<T> {
        self.receiver.lock().await.recv().await
    }

    fn close(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            trace!("pipe closed");
        }
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, Pipe};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo() {
        let pipe = Pipe::new(8);
        for i in 0..5 {
            assert!(pipe.send(i).await);
        }
        for i in 0..5 {
            assert_eq!(pipe.receive().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pipe = Pipe::<u8>::new(1);
        assert!(!pipe.is_closed());
        pipe.close();
        pipe.close();
        assert!(pipe.is_closed());
        assert!(!pipe.send(1).await);
        assert_eq!(pipe.receive().await, None);
    }

    #[tokio::test]
    async fn test_close_drains_buffer() {
        let pipe = Pipe::new(4);
        assert!(pipe.send("a").await);
        assert!(pipe.send("b").await);
        pipe.close();
        assert_eq!(pipe.receive().await, Some("a"));
        assert_eq!(pipe.receive().await, Some("b"));
        assert_eq!(pipe.receive().await, None);
    }

    #[tokio::test]
    async fn test_close_releases_blocked_sender() {
        let pipe = Arc::new(Pipe::new(1));
        assert!(pipe.send(1).await);

        let blocked = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.send(2).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        pipe.close();
        assert!(!blocked.await.expect("sender task panicked"));
        assert_eq!(pipe.receive().await, Some(1));
        assert_eq!(pipe.receive().await, None);
    }

    #[tokio::test]
    async fn test_close_releases_blocked_receiver() {
        let pipe = Arc::new(Pipe::<u8>::new(1));
        let waiting = {
            let pipe = pipe.clone();
            tokio::spawn(async move { pipe.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pipe.close();
        assert_eq!(waiting.await.expect("receiver task panicked"), None);
    }

    #[tokio::test]
    async fn test_zero_capacity() {
        let pipe = Pipe::new(0);
        assert!(pipe.send(1).await);
        assert_eq!(pipe.receive().await, Some(1));
    }
}
