use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Display};
use std::mem;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::{IntoResolution, RejectionCandidate, Resolution, Scheduler, UnhandledRejection};

/// Identifies a [`Deferred`] in diagnostics, such as unhandled rejection reports.
///
/// Identifiers are unique per thread for the lifetime of the thread.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DeferredId(u64);

impl DeferredId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

impl Display for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The settlement state of a [`Deferred`], without the payload.
#[expect(
    clippy::exhaustive_enums,
    reason = "a deferred has exactly three states and that is the whole point of it"
)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    /// Not yet settled. The deferred may or may not already be locked onto another deferred.
    Pending,

    /// Settled with a value.
    Fulfilled,

    /// Settled with an error.
    Rejected,
}

type Continuation<T, E> = Box<dyn FnOnce(Result<T, E>)>;

enum State<T, E> {
    // Most deferreds only ever get one or two continuations, typically a single `then()` or an
    // awaiting suspended function.
    Pending(SmallVec<[Continuation<T, E>; 2]>),
    Fulfilled(T),
    Rejected(E),
}

struct Shared<T, E> {
    id: DeferredId,

    state: RefCell<State<T, E>>,

    // Set once the settler has been used, whether to settle directly or to lock onto another
    // deferred. Further use of the settler is ignored.
    locked: Cell<bool>,

    // Set once anyone has shown interest in the outcome: a continuation, an awaiter or a runtime
    // blocking on it. A rejection nobody was interested in is reported as unhandled.
    handled: Cell<bool>,
}

impl<T, E> Shared<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    /// Moves the deferred out of the pending state, if it is still there, and dispatches
    /// every registered continuation in its own microtask.
    fn settle(self: &Rc<Self>, result: Result<T, E>) {
        let mut state = self.state.borrow_mut();

        let State::Pending(continuations) = &mut *state else {
            // Settle-once: the first settlement wins, everything after is ignored.
            return;
        };

        let scheduler = Scheduler::current();

        // Queueing only touches the scheduler, never this deferred, so the state can stay
        // borrowed until the payload moves into it.
        for continuation in mem::take(continuations) {
            let result = result.clone();
            scheduler.queue_microtask(Box::new(move || continuation(result)));
        }

        let rejected = result.is_err();

        *state = match result {
            Ok(value) => State::Fulfilled(value),
            Err(error) => State::Rejected(error),
        };

        drop(state);

        if rejected && !self.handled.get() {
            scheduler.track_rejection(Box::new(Tracked(Rc::clone(self))));
        }
    }

    fn subscribe(&self, continuation: Continuation<T, E>) {
        self.handled.set(true);

        let mut state = self.state.borrow_mut();

        let result = match &mut *state {
            State::Pending(continuations) => {
                continuations.push(continuation);
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(error) => Err(error.clone()),
        };

        drop(state);

        // Already settled - the continuation still only runs in a later microtask.
        Scheduler::current().queue_microtask(Box::new(move || continuation(result)));
    }
}

/// Checks at the end of a microtask checkpoint whether a rejection found a handler in time.
struct Tracked<T, E>(Rc<Shared<T, E>>);

impl<T, E> RejectionCandidate for Tracked<T, E>
where
    E: Debug,
{
    fn is_handled(&self) -> bool {
        self.0.handled.get()
    }

    fn report(&self) -> UnhandledRejection {
        let reason = match &*self.0.state.borrow() {
            State::Rejected(error) => format!("{error:?}"),
            _ => unreachable!("only rejected deferreds are tracked as rejection candidates"),
        };

        UnhandledRejection::new(self.0.id, reason)
    }
}

/// A value of type `T` or an error of type `E` that becomes available at some point in the
/// future, on the current thread.
///
/// A deferred starts out pending and settles exactly once, either fulfilled with a value or
/// rejected with an error. Whoever holds the [`Settler`] decides the outcome, either directly or
/// by locking the deferred onto another deferred whose outcome it will then mirror.
///
/// `Deferred` is a cheap handle - clones refer to the same underlying deferred and all observe
/// the same outcome. Every observer receives its own clone of the value or error.
///
/// Continuations never run synchronously. Whether registered before or after settlement, they
/// are dispatched by the thread's [`Runtime`][crate::Runtime] in a later microtask, in the order
/// they were registered.
///
/// # Example
///
/// ```rust
/// use deferred::{Deferred, Runtime};
///
/// let runtime = Runtime::new();
///
/// let (deferred, settler) = Deferred::<i32, String>::create();
/// let doubled = deferred.then(|value| Ok(value * 2));
///
/// settler.settle_ok(21);
///
/// assert_eq!(runtime.block_on(doubled).unwrap(), Ok(42));
/// ```
pub struct Deferred<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    /// Creates a pending deferred and the settler that decides its outcome.
    #[must_use]
    pub fn create() -> (Self, Settler<T, E>) {
        let shared = Rc::new(Shared {
            id: Scheduler::current().next_deferred_id(),
            state: RefCell::new(State::Pending(SmallVec::new())),
            locked: Cell::new(false),
            handled: Cell::new(false),
        });

        (
            Self {
                shared: Rc::clone(&shared),
            },
            Settler { shared },
        )
    }

    /// Creates a pending deferred and synchronously hands its settler to `executor`, which is
    /// expected to start some operation that eventually settles the deferred.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    ///
    /// use deferred::{Deferred, Runtime, queue_task_after};
    ///
    /// let runtime = Runtime::new();
    ///
    /// let ready = Deferred::<&str, String>::new(|settler| {
    ///     queue_task_after(Duration::from_millis(10), move || settler.settle_ok("ready"));
    /// });
    ///
    /// assert_eq!(runtime.block_on(ready).unwrap(), Ok("ready"));
    /// ```
    #[must_use]
    pub fn new(executor: impl FnOnce(Settler<T, E>)) -> Self {
        let (deferred, settler) = Self::create();
        executor(settler);
        deferred
    }

    /// Creates a deferred that is already settled with `result`.
    ///
    /// Continuations registered on it still only run in a later microtask.
    pub(crate) fn settled(result: Result<T, E>) -> Self {
        let (deferred, settler) = Self::create();

        settler.shared.locked.set(true);
        settler.shared.settle(result);

        deferred
    }

    /// Registers a pair of continuations and returns a new deferred that settles with the
    /// outcome of whichever continuation runs.
    ///
    /// `on_fulfilled` runs if this deferred is fulfilled, `on_rejected` if it is rejected. The
    /// continuation may return a `Result` (fulfill or reject the new deferred) or another
    /// [`Deferred`] (the new deferred adopts its eventual outcome, however deeply nested).
    ///
    /// To register only one of the two, use [`then()`][Self::then] or
    /// [`recover()`][Self::recover]; the outcome for the missing side passes through unchanged.
    pub fn register<U, F, R, FR, RR>(&self, on_fulfilled: F, on_rejected: R) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> FR + 'static,
        FR: IntoResolution<U, E>,
        R: FnOnce(E) -> RR + 'static,
        RR: IntoResolution<U, E>,
    {
        let (derived, settler) = Deferred::create();

        self.subscribe(move |result| {
            let resolution = match result {
                Ok(value) => on_fulfilled(value).into_resolution(),
                Err(error) => on_rejected(error).into_resolution(),
            };

            settler.resolve(resolution);
        });

        derived
    }

    /// Registers a continuation for the fulfilled case. Rejections pass through to the returned
    /// deferred unchanged.
    pub fn then<U, F, FR>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> FR + 'static,
        FR: IntoResolution<U, E>,
    {
        self.register(on_fulfilled, Err::<U, E>)
    }

    /// Registers a continuation for the rejected case. Fulfillments pass through to the returned
    /// deferred unchanged.
    ///
    /// If `on_rejected` returns `Ok`, the chain continues on the fulfilled track.
    #[must_use]
    pub fn recover<R, RR>(&self, on_rejected: R) -> Self
    where
        R: FnOnce(E) -> RR + 'static,
        RR: IntoResolution<T, E>,
    {
        self.register(Ok::<T, E>, on_rejected)
    }

    /// Registers a continuation that runs on either outcome, without access to it.
    ///
    /// The returned deferred mirrors this deferred's outcome, unless `on_settled` fails, in
    /// which case it is rejected with that error. If `on_settled` returns a deferred, the
    /// mirroring waits until that deferred settles.
    #[must_use]
    pub fn finally<F, FR>(&self, on_settled: F) -> Self
    where
        F: FnOnce() -> FR + 'static,
        FR: IntoResolution<(), E>,
    {
        let (derived, settler) = Self::create();

        self.subscribe(move |result| {
            let resolution = match on_settled().into_resolution() {
                Resolution::Fulfill(()) => Resolution::from(result),
                Resolution::Reject(error) => Resolution::Reject(error),
                Resolution::Adopt(cleanup) => Resolution::Adopt(cleanup.then(move |()| result)),
            };

            settler.resolve(resolution);
        });

        derived
    }

    /// The current settlement state.
    #[must_use]
    pub fn status(&self) -> Status {
        match &*self.shared.state.borrow() {
            State::Pending(_) => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    /// Whether the deferred has not yet settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Whether the outcome of the deferred has been decided: it has either settled or been
    /// locked onto another deferred.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.shared.locked.get()
    }

    /// Returns a clone of the outcome if the deferred has settled.
    ///
    /// Peeking does not count as handling a rejection.
    #[must_use]
    pub fn peek(&self) -> Option<Result<T, E>> {
        match &*self.shared.state.borrow() {
            State::Pending(_) => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
        }
    }

    /// The diagnostic identifier of this deferred.
    #[must_use]
    pub fn id(&self) -> DeferredId {
        self.shared.id
    }

    /// Registers a raw continuation without creating a derived deferred.
    ///
    /// Counts as handling a rejection.
    pub(crate) fn subscribe(&self, continuation: impl FnOnce(Result<T, E>) + 'static) {
        self.shared.subscribe(Box::new(continuation));
    }
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T, E> Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.shared.state.borrow() {
            State::Pending(continuations) => format!("pending ({} continuations)", continuations.len()),
            State::Fulfilled(_) => "fulfilled".to_string(),
            State::Rejected(_) => "rejected".to_string(),
        };

        f.debug_struct(type_name::<Self>())
            .field("id", &self.shared.id)
            .field("status", &status)
            .field("locked", &self.shared.locked.get())
            .finish_non_exhaustive()
    }
}

/// Decides the outcome of the [`Deferred`] it was created with.
///
/// The first effective call to [`settle_ok()`][Self::settle_ok],
/// [`settle_err()`][Self::settle_err] or [`resolve()`][Self::resolve] wins; all later calls, on
/// this settler or any of its clones, are silently ignored.
///
/// Dropping every settler without using it leaves the deferred pending forever.
pub struct Settler<T, E> {
    shared: Rc<Shared<T, E>>,
}

impl<T, E> Settler<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    /// Fulfills the deferred with `value`.
    pub fn settle_ok(&self, value: T) {
        if !self.shared.locked.replace(true) {
            self.shared.settle(Ok(value));
        }
    }

    /// Rejects the deferred with `error`.
    pub fn settle_err(&self, error: E) {
        if !self.shared.locked.replace(true) {
            self.shared.settle(Err(error));
        }
    }

    /// Resolves the deferred: fulfills it, rejects it or locks it onto another deferred, whose
    /// eventual outcome it will then mirror.
    ///
    /// # Panics
    ///
    /// Panics if asked to lock the deferred onto itself, which would leave it pending forever.
    pub fn resolve(&self, resolution: impl IntoResolution<T, E>) {
        if self.shared.locked.replace(true) {
            return;
        }

        match resolution.into_resolution() {
            Resolution::Fulfill(value) => self.shared.settle(Ok(value)),
            Resolution::Reject(error) => self.shared.settle(Err(error)),
            Resolution::Adopt(inner) => {
                assert!(
                    !Rc::ptr_eq(&inner.shared, &self.shared),
                    "deferred {} cannot be resolved with itself",
                    self.shared.id
                );

                let outer = Rc::clone(&self.shared);
                inner.subscribe(move |result| outer.settle(result));
            }
        }
    }

    /// Decides the outcome now but only settles the deferred in a later microtask.
    pub(crate) fn settle_later(self, result: Result<T, E>) {
        if self.shared.locked.replace(true) {
            return;
        }

        Scheduler::current().queue_microtask(Box::new(move || self.shared.settle(result)));
    }

    /// Whether this settler (or a clone of it) has already been used.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.shared.locked.get()
    }
}

impl<T, E> Clone for Settler<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T, E> Debug for Settler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("deferred", &self.shared.id)
            .field("used", &self.shared.locked.get())
            .finish()
    }
}
