#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in the `deferred` workspace.

use std::sync::mpsc;
use std::time::Duration;
use std::{env, panic, thread};

mod journal;

pub use journal::*;

const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `test_fn` on a fresh thread and fails the test if it does not finish within 10 seconds.
///
/// A deferred that never settles makes a runtime wait forever on a timer or spin through turns,
/// so every test that drives a runtime should be wrapped in this. The fresh thread also gives the
/// test its own thread-local scheduler, independent of whatever other tests did on the test
/// harness thread.
///
/// Setting the `MUTATION_TESTING` environment variable to `1` disables the timeout and runs
/// `test_fn` directly, so mutation testing can detect hangs by itself.
///
/// # Panics
///
/// Panics if the test exceeds the timeout. Panics from `test_fn` are propagated.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_thread = thread::spawn(move || {
        // If this fails, the watchdog already gave up on us.
        drop(tx.send(test_fn()));
    });

    match rx.recv_timeout(WATCHDOG_TIMEOUT) {
        Ok(result) => {
            test_thread.join().expect("test thread completed, so cannot have panicked");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test did not complete within {WATCHDOG_TIMEOUT:?}, assuming it hangs");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_thread.join() {
            Ok(()) => panic!("test thread exited without reporting a result"),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}
