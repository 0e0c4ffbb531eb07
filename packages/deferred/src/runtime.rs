use std::fmt::{self, Debug};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use tracing::debug;

use crate::clock::TimeSource;
use crate::rejection::{RejectionSink, default_sink};
use crate::{Clock, Deferred, Scheduler, Stalled, UnhandledRejection};

/// Drives the deferreds, tasks and timers of the current thread.
///
/// Nothing scheduled through this crate makes progress unless a runtime is being driven, via
/// [`turn()`][Self::turn], [`run_until_idle()`][Self::run_until_idle] or
/// [`block_on()`][Self::block_on]. Each call to `turn()` executes one scheduling turn: one task
/// (queued via [`queue_task()`][crate::queue_task] or a due timer) followed by every microtask
/// that becomes ready, which includes all continuations of settled deferreds and resumptions of
/// suspended functions.
///
/// At most one runtime can be active on a thread at any given time. Dropping the runtime
/// discards all work that is still queued on the thread.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use deferred::{Clock, Runtime, spawn, wait};
///
/// let runtime = Runtime::builder().clock(Clock::Virtual).build();
///
/// let greeting = spawn(async {
///     wait::<String>(Duration::from_secs(60)).await?;
///     Ok::<_, String>("one minute later")
/// });
///
/// assert_eq!(runtime.block_on(greeting).unwrap(), Ok("one minute later"));
/// ```
pub struct Runtime {
    scheduler: Rc<Scheduler>,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if another runtime is already active on the current thread.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a runtime with a custom configuration.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Executes one scheduling turn.
    ///
    /// Returns `false` if there was nothing to do. If the only remaining work is timers that
    /// are not yet due, waits for the earliest of them.
    ///
    /// # Panics
    ///
    /// Panics if called from inside work that the runtime is executing.
    #[expect(
        clippy::must_use_candidate,
        reason = "callers often drive turns for their side effects only"
    )]
    pub fn turn(&self) -> bool {
        self.scheduler.turn()
    }

    /// Executes scheduling turns until there is nothing left to do.
    ///
    /// This includes waiting for all timers, so with [`Clock::System`] this may block the thread
    /// for as long as the latest timer is in the future.
    pub fn run_until_idle(&self) {
        while self.turn() {}

        debug!("runtime idle");
    }

    /// Executes scheduling turns until `deferred` settles, returning its outcome.
    ///
    /// Blocking on a deferred counts as handling its rejection.
    ///
    /// # Errors
    ///
    /// Returns [`Stalled`] if the runtime runs out of work while the deferred is still pending,
    /// which means the deferred will never settle.
    ///
    /// # Panics
    ///
    /// Panics if called from inside work that the runtime is executing.
    pub fn block_on<T, E>(&self, deferred: Deferred<T, E>) -> Result<Result<T, E>, Stalled>
    where
        T: Clone + 'static,
        E: Clone + Debug + 'static,
    {
        let id = deferred.id();

        // The runtime drives the deferred to completion by itself, so nobody needs waking.
        let mut awaiting = deferred.into_future();
        let mut cx = Context::from_waker(Waker::noop());

        loop {
            if let Poll::Ready(result) = Pin::new(&mut awaiting).poll(&mut cx) {
                return Ok(result);
            }

            if !self.turn() {
                debug!(deferred = %id, "runtime stalled");
                return Err(Stalled { deferred: id });
            }
        }
    }

    /// The current time according to the runtime's [`Clock`].
    #[must_use]
    pub fn now(&self) -> Instant {
        self.scheduler.now()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.scheduler.deactivate();
    }
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Configures and creates a [`Runtime`].
#[must_use]
pub struct RuntimeBuilder {
    rejection_sink: RejectionSink,
    time: Box<dyn TimeSource>,
}

impl RuntimeBuilder {
    fn new() -> Self {
        Self {
            rejection_sink: default_sink(),
            time: Clock::default().into_time_source(),
        }
    }

    /// Sets the handler that receives reports of unhandled rejections.
    ///
    /// A rejection is unhandled if nobody registered interest in the rejected deferred by the
    /// end of the microtask checkpoint in which it was rejected. Each such deferred is reported
    /// exactly once.
    ///
    /// By default, unhandled rejections are logged via `tracing::error!`.
    pub fn on_unhandled_rejection(mut self, handler: impl Fn(&UnhandledRejection) + 'static) -> Self {
        self.rejection_sink = Rc::new(handler);
        self
    }

    /// Sets the clock that timers are measured against.
    ///
    /// Defaults to [`Clock::System`].
    pub fn clock(mut self, clock: Clock) -> Self {
        self.time = clock.into_time_source();
        self
    }

    #[cfg(test)]
    pub(crate) fn time_source(mut self, time: Box<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Creates the runtime and makes it the active runtime of the current thread.
    ///
    /// # Panics
    ///
    /// Panics if another runtime is already active on the current thread.
    #[must_use]
    pub fn build(self) -> Runtime {
        let scheduler = Scheduler::current();
        scheduler.activate(self.time, self.rejection_sink);

        Runtime { scheduler }
    }
}

impl Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}
