use std::cell::Cell;
use std::fmt::Debug;
use std::thread;
use std::time::Instant;

/// Selects how a [`Runtime`][crate::Runtime] measures time for timers.
///
/// The choice only matters for work scheduled via [`queue_task_after()`][crate::queue_task_after]
/// and the helpers built on top of it, such as [`wait()`][crate::wait].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum Clock {
    /// Timers fire according to the monotonic system clock. When the runtime has nothing to do
    /// but wait for a timer, the thread sleeps until the timer is due.
    #[default]
    System,

    /// Timers fire according to a virtual clock that starts at the moment the runtime is built
    /// and only moves forward when the runtime has nothing to do but wait for a timer. At that
    /// point, the virtual clock jumps straight to the deadline of the earliest timer.
    ///
    /// This makes timer-driven code deterministic and fast, which is mostly useful in tests.
    Virtual,
}

impl Clock {
    pub(crate) fn into_time_source(self) -> Box<dyn TimeSource> {
        match self {
            Self::System => Box::new(SystemTime),
            Self::Virtual => Box::new(VirtualTime::new(Instant::now())),
        }
    }
}

/// Where the scheduler gets the current time from and how it waits for a deadline.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait TimeSource: Debug {
    fn now(&self) -> Instant;

    /// Returns once `deadline` has been reached according to this time source.
    fn wait_until(&self, deadline: Instant);
}

#[derive(Debug)]
pub(crate) struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[cfg_attr(test, mutants::skip)] // Sleeping less only causes an extra loop iteration.
    fn wait_until(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());

        if !remaining.is_zero() {
            thread::sleep(remaining);
        }
    }
}

#[derive(Debug)]
pub(crate) struct VirtualTime {
    now: Cell<Instant>,
}

impl VirtualTime {
    pub(crate) fn new(start: Instant) -> Self {
        Self {
            now: Cell::new(start),
        }
    }
}

impl TimeSource for VirtualTime {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn wait_until(&self, deadline: Instant) {
        // Virtual time never runs backwards, even if asked to wait for a deadline in the past.
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}
