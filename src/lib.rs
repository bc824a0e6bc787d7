//! Promise bridge and channel splice.
//!
//! Two small pieces for stitching concurrent code together:
//!
//! - [`new_promise`] turns a producer callback into a [`Promise`]. The producer
//!   gets a [`Downstream`] and settles it with a value, an error, or an
//!   in-flight async handle that the promise flattens transparently.
//!   [`BlockingTask`] builds on it to run blocking work on an executor.
//! - [`splice`] links two [`Channel`]s so items flow from one to the other and
//!   closing either side closes the other.
//!
//! # Examples
//!
//! ```
//! use promise_bridge::{new_promise, Error, Promise};
//! use std::thread;
//!
//! let promise: Promise<String> = new_promise(|sink| {
//!     thread::spawn(move || sink.succeed("🍓".to_string()));
//!     Ok(())
//! });
//! assert_eq!(promise.then(|s| s.len()).wait(), Ok(4));
//!
//! let failed: Promise<i32> = new_promise(|_sink| Err(Error::Rejected("💥".into())));
//! assert_eq!(failed.wait(), Err(Error::Rejected("💥".into())));
//! ```

use std::any::Any;

pub mod blocking;
mod bridge;
pub mod channel;
mod pair;
pub mod resolution;
pub mod splice;

pub use blocking::{run_blocking, BlockingExecutor, BlockingTask, ThreadConfig, ThreadExecutor, TokioExecutor};
pub use bridge::new_promise;
pub use channel::{Channel, Pipe};
pub use pair::{Downstream, Promise};
pub use resolution::{Failure, InFlight, Resolution, Value};
pub use splice::{forward, spawn_splice, splice, SpliceOutcome};

/// Faults reported by the bridge itself.
///
/// Every promise failure type must implement `From<Error>` so these can be
/// delivered through the promise like any other failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("producer dropped before settling the promise")]
    ProducerDropped,
    #[error("producer panicked: {0}")]
    Panicked(String),
    #[error("blocking executor rejected the task: {0}")]
    Executor(String),
    #[error("task was cancelled before it completed")]
    Cancelled,
    #[error("promise polled after it already completed")]
    Consumed,
    #[error("{0}")]
    Rejected(String),
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
