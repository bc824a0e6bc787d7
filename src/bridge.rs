use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::pair::{Downstream, Promise};
use crate::{panic_message, Error};

/// Runs `producer` once, right away on the calling thread, and returns the
/// promise it settles.
///
/// The producer may settle the sink before returning, or move it elsewhere and
/// settle it later. Returning `Err` fails the promise, as does panicking; in
/// neither case does the fault escape `new_promise`. Both are ignored if the
/// sink was already settled.
///
/// # Examples
///
/// ```
/// use promise_bridge::{new_promise, Error, InFlight, Promise};
/// use futures::executor::block_on;
///
/// let ready: Promise<u32> = new_promise(|sink| {
///     sink.succeed(42);
///     Ok(())
/// });
/// assert_eq!(block_on(ready), Ok(42));
///
/// let flattened: Promise<u32> = new_promise(|sink| {
///     sink.accept(InFlight(async { Ok::<_, Error>(7) }));
///     Ok(())
/// });
/// assert_eq!(block_on(flattened), Ok(7));
/// ```
pub fn new_promise<V, E, P>(producer: P) -> Promise<V, E>
where
    P: FnOnce(Downstream<V, E>) -> Result<(), E>,
    E: From<Error>,
{
    let (sink, promise) = Promise::pending();
    let guard = sink.clone();
    match panic::catch_unwind(AssertUnwindSafe(move || producer(sink))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            if !guard.fail(err) {
                debug!("producer returned an error after settling its promise");
            }
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!(%message, "producer panicked");
            guard.fail(Error::Panicked(message).into());
        }
    }
    promise
}

#[cfg(test)]
mod tests {
    use super::new_promise;
    use crate::{Error, Promise};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_producer_settles_later() {
        let (tx, rx) = mpsc::channel();
        let promise: Promise<String> = new_promise(|sink| {
            thread::spawn(move || {
                rx.recv().ok();
                sink.succeed("🍓".into());
            });
            Ok(())
        });
        assert!(!promise.is_settled());
        tx.send(()).expect("producer thread is gone");
        assert_eq!(promise.wait(), Ok("🍓".to_string()));
    }

    #[test]
    fn test_producer_error_fails_promise() {
        let promise: Promise<u8> = new_promise(|_sink| Err(Error::Rejected("💥".into())));
        assert_eq!(promise.wait(), Err(Error::Rejected("💥".into())));
    }

    #[test]
    fn test_producer_error_after_settle_is_ignored() {
        let promise: Promise<u8> = new_promise(|sink| {
            sink.succeed(1);
            Err(Error::Rejected("too late".into()))
        });
        assert_eq!(promise.wait(), Ok(1));
    }

    #[test]
    fn test_producer_panic_is_captured() {
        let promise: Promise<u8> = new_promise(|_sink| panic!("producer exploded"));
        assert_eq!(promise.wait(), Err(Error::Panicked("producer exploded".into())));
    }

    #[test]
    fn test_producer_drops_sink() {
        let promise: Promise<u8> = new_promise(|sink| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                drop(sink);
            });
            Ok(())
        });
        assert_eq!(promise.wait(), Err(Error::ProducerDropped));
    }
}
