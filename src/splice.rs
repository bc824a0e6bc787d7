//! Forwarding between two channels with close propagated both ways.
//!
//! Plain piping leaves a producer stuck writing into a channel nobody reads,
//! or a consumer waiting on a channel whose producer went away. A splice ends
//! in exactly one of two ways and closes the other side in both:
//!
//! - the source runs dry, so the destination is closed
//!   ([`SpliceOutcome::SourceClosed`]);
//! - the destination stops accepting, so the source is closed
//!   ([`SpliceOutcome::SinkClosed`]).

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::channel::Channel;

/// How a splice ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpliceOutcome {
    /// The source reported end-of-stream; the destination was closed.
    SourceClosed,
    /// The destination refused an item; the source was closed.
    SinkClosed,
}

/// Moves items from `from` to `to` until one side closes, then closes the
/// other.
///
/// Order is preserved. The loop waits inside `receive` and `send` and never
/// spins. An item that the destination refuses is dropped.
pub async fn forward<T, F, G>(from: &F, to: &G) -> SpliceOutcome
where
    T: Send + 'static,
    F: Channel<T> + ?Sized,
    G: Channel<T> + ?Sized,
{
    let mut forwarded: u64 = 0;
    loop {
        let Some(item) = from.receive().await else {
            to.close();
            debug!(forwarded, "splice source closed, closing destination");
            return SpliceOutcome::SourceClosed;
        };
        if !to.send(item).await {
            from.close();
            debug!(forwarded, "splice destination closed, closing source");
            return SpliceOutcome::SinkClosed;
        }
        forwarded += 1;
    }
}

/// Runs [`forward`] as its own Tokio task.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub fn spawn_splice<T, F, G>(from: Arc<F>, to: Arc<G>) -> JoinHandle<SpliceOutcome>
where
    T: Send + 'static,
    F: Channel<T> + ?Sized + 'static,
    G: Channel<T> + ?Sized + 'static,
{
    tokio::spawn(async move { forward(&*from, &*to).await })
}

/// Splices `from` into `to` in the background and returns `to` for chaining.
///
/// The outcome is observable only through the channels themselves; use
/// [`spawn_splice`] to await it.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
///
/// # Examples
///
/// ```
/// use promise_bridge::{splice, Channel, Pipe};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let from = Arc::new(Pipe::new(4));
/// let to = splice(from.clone(), Arc::new(Pipe::new(4)));
/// from.send("🍓").await;
/// from.close();
/// assert_eq!(to.receive().await, Some("🍓"));
/// assert_eq!(to.receive().await, None);
/// # }
/// ```
pub fn splice<T, F, G>(from: Arc<F>, to: Arc<G>) -> Arc<G>
where
    T: Send + 'static,
    F: Channel<T> + ?Sized + 'static,
    G: Channel<T> + ?Sized + 'static,
{
    drop(spawn_splice(from, to.clone()));
    to
}
