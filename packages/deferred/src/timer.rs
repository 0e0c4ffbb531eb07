use std::fmt::Debug;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::{Deferred, Scheduler, race};

/// Queues `task` to run in its own scheduling turn, after every task queued before it.
///
/// Microtasks queued by `task`, such as continuations of deferreds it settles, all run before
/// the next task.
pub fn queue_task(task: impl FnOnce() + 'static) {
    Scheduler::current().queue_task(Box::new(task));
}

/// Queues `task` to run in its own scheduling turn once `delay` has elapsed, according to the
/// clock of the thread's [`Runtime`][crate::Runtime].
///
/// Timers with the same deadline run in the order they were queued. A delay too large to be
/// represented by the clock means the task never runs.
pub fn queue_task_after(delay: Duration, task: impl FnOnce() + 'static) {
    let scheduler = Scheduler::current();

    let Some(deadline) = scheduler.now().checked_add(delay) else {
        trace!(?delay, "delay is beyond the range of the clock, the task will never run");
        return;
    };

    scheduler.queue_timer(deadline, Box::new(task));
}

/// Queues `task` to run in its own scheduling turn once `deadline` has been reached, according
/// to the clock of the thread's [`Runtime`][crate::Runtime].
///
/// A deadline in the past makes the task run as soon as the runtime checks its timers.
pub fn queue_task_at(deadline: Instant, task: impl FnOnce() + 'static) {
    Scheduler::current().queue_timer(deadline, Box::new(task));
}

/// The current time according to the clock of the thread's [`Runtime`][crate::Runtime].
#[must_use]
pub fn now() -> Instant {
    Scheduler::current().now()
}

/// Creates a deferred that fulfills once `delay` has elapsed.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use deferred::{Clock, Runtime, wait};
///
/// let runtime = Runtime::builder().clock(Clock::Virtual).build();
/// let start = runtime.now();
///
/// runtime.block_on(wait::<()>(Duration::from_secs(10))).unwrap().unwrap();
///
/// assert_eq!(runtime.now() - start, Duration::from_secs(10));
/// ```
#[must_use]
pub fn wait<E>(delay: Duration) -> Deferred<(), E>
where
    E: Clone + Debug + 'static,
{
    Deferred::new(|settler| queue_task_after(delay, move || settler.settle_ok(())))
}

/// Creates a deferred that settles like `deferred`, unless `delay` elapses first. In that case
/// it rejects with the error returned by `make_error`.
///
/// The original deferred keeps running; its eventual outcome is simply ignored.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use deferred::{Clock, Deferred, Runtime, with_timeout};
///
/// let runtime = Runtime::builder().clock(Clock::Virtual).build();
///
/// let (never, _settler) = Deferred::<i32, String>::create();
/// let bounded = with_timeout(never, Duration::from_secs(1), || "timed out".to_string());
///
/// assert_eq!(runtime.block_on(bounded).unwrap(), Err("timed out".to_string()));
/// ```
#[must_use]
pub fn with_timeout<T, E>(
    deferred: Deferred<T, E>,
    delay: Duration,
    make_error: impl FnOnce() -> E + 'static,
) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    let timeout = Deferred::new(|settler| {
        queue_task_after(delay, move || settler.settle_err(make_error()));
    });

    race([deferred, timeout])
}

#[cfg(test)]
mod tests {
    use testing::{Journal, with_watchdog};

    use super::*;
    use crate::{Clock, Runtime};

    fn virtual_runtime() -> Runtime {
        Runtime::builder().clock(Clock::Virtual).build()
    }

    #[test]
    fn tasks_run_in_queue_order_one_per_turn() {
        with_watchdog(|| {
            let runtime = Runtime::new();
            let journal = Journal::new();

            for name in ["first", "second"] {
                let entries = journal.clone();
                queue_task(move || entries.record(name));
            }

            assert!(runtime.turn());
            assert_eq!(journal.entries(), ["first"]);

            assert!(runtime.turn());
            assert_eq!(journal.entries(), ["first", "second"]);

            assert!(!runtime.turn());
        });
    }

    #[test]
    fn timers_fire_by_deadline() {
        with_watchdog(|| {
            let runtime = virtual_runtime();
            let journal = Journal::new();

            for (name, millis) in [("late", 200), ("early", 100), ("also early", 100)] {
                let entries = journal.clone();
                queue_task_after(Duration::from_millis(millis), move || entries.record(name));
            }

            runtime.run_until_idle();

            assert_eq!(journal.entries(), ["early", "also early", "late"]);
        });
    }

    #[test]
    fn unrepresentable_delay_never_fires() {
        with_watchdog(|| {
            let runtime = virtual_runtime();
            let journal = Journal::new();

            let entries = journal.clone();
            queue_task_after(Duration::MAX, move || entries.record("fired"));

            assert!(!runtime.turn());
            assert!(journal.entries().is_empty());
        });
    }

    #[test]
    fn timer_at_past_deadline_fires() {
        with_watchdog(|| {
            let runtime = virtual_runtime();
            let journal = Journal::new();

            let entries = journal.clone();
            queue_task_at(runtime.now(), move || entries.record("fired"));

            runtime.run_until_idle();

            assert_eq!(journal.entries(), ["fired"]);
        });
    }

    #[test]
    fn wait_advances_virtual_clock() {
        with_watchdog(|| {
            let runtime = virtual_runtime();
            let start = now();

            runtime
                .block_on(wait::<()>(Duration::from_secs(3)))
                .unwrap()
                .unwrap();

            assert_eq!(now().duration_since(start), Duration::from_secs(3));
        });
    }

    #[test]
    fn wait_with_system_clock() {
        with_watchdog(|| {
            let runtime = Runtime::new();
            let start = Instant::now();

            runtime
                .block_on(wait::<()>(Duration::from_millis(10)))
                .unwrap()
                .unwrap();

            assert!(start.elapsed() >= Duration::from_millis(10));
        });
    }

    #[test]
    fn with_timeout_passes_through_fast_result() {
        with_watchdog(|| {
            let runtime = virtual_runtime();

            let fast = wait::<String>(Duration::from_secs(1)).then(|()| Ok(5));
            let bounded = with_timeout(fast, Duration::from_secs(2), || "too slow".to_string());

            assert_eq!(runtime.block_on(bounded).unwrap(), Ok(5));
        });
    }

    #[test]
    fn with_timeout_rejects_slow_result() {
        with_watchdog(|| {
            let runtime = virtual_runtime();

            let slow = wait::<String>(Duration::from_secs(3)).then(|()| Ok(5));
            let bounded = with_timeout(slow, Duration::from_secs(2), || "too slow".to_string());

            assert_eq!(
                runtime.block_on(bounded).unwrap(),
                Err("too slow".to_string())
            );
        });
    }
}
