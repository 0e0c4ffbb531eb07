use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::mem;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::{Deferred, QueueClosed, Settler};

/// What a pull from an [`EventQueue`] produces.
#[expect(
    clippy::exhaustive_enums,
    reason = "a pull either gets a value or learns that there will be no more"
)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Pulled<T> {
    /// The next value pushed onto the queue.
    Item(T),

    /// The queue has been closed and every value pushed before closing has been pulled.
    End,
}

impl<T> Pulled<T> {
    /// Converts into `Some(value)` for an item and `None` for the end marker.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Item(value) => Some(value),
            Self::End => None,
        }
    }
}

/// Something that delivers zero or more discrete events over time to registered listeners.
///
/// Implement this for whatever produces the events (an I/O driver, a UI toolkit, a test double)
/// to turn it into an [`AsyncSequence`][crate::AsyncSequence] via
/// [`event_stream()`][crate::event_stream].
pub trait EventSource<T> {
    /// Registers a listener that is called once for every event from now on.
    fn add_listener(&mut self, listener: Box<dyn FnMut(T)>);
}

struct QueueState<T> {
    // Values pushed while nobody was waiting.
    values: VecDeque<T>,

    // Pulls made while no value was buffered.
    waiters: VecDeque<Settler<Pulled<T>, Infallible>>,

    closed: bool,
}

/// An unbounded FIFO queue that turns values pushed at arbitrary times into deferreds pulled one
/// at a time.
///
/// Pushes and pulls may happen in any order: a push when nobody is waiting buffers the value and
/// a pull when nothing is buffered waits for the next push. At no point are there both buffered
/// values and waiting pulls.
///
/// Once closed, the queue refuses further pushes. Values buffered before closing can still be
/// pulled; after that (and for every pull that was waiting at the time of closing), pulls produce
/// [`Pulled::End`].
///
/// `EventQueue` is a cheap handle - clones refer to the same queue.
///
/// # Example
///
/// ```rust
/// use deferred::{EventQueue, Pulled, Runtime};
///
/// let runtime = Runtime::new();
/// let queue = EventQueue::new();
///
/// let first = queue.pull();
/// queue.push("hello").unwrap();
/// queue.close();
///
/// assert_eq!(runtime.block_on(first).unwrap(), Ok(Pulled::Item("hello")));
/// assert_eq!(runtime.block_on(queue.pull()).unwrap(), Ok(Pulled::End));
/// ```
pub struct EventQueue<T> {
    state: Rc<RefCell<QueueState<T>>>,
}

impl<T> EventQueue<T>
where
    T: Clone + 'static,
{
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(QueueState {
                values: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Delivers `value` to the oldest waiting pull or, if nobody is waiting, buffers it.
    ///
    /// A waiting pull observes the value in a later microtask, like any settlement.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] holding the value if the queue has been closed.
    pub fn push(&self, value: T) -> Result<(), QueueClosed<T>> {
        let mut state = self.state.borrow_mut();

        if state.closed {
            return Err(QueueClosed::new(value));
        }

        if let Some(waiter) = state.waiters.pop_front() {
            drop(state);
            waiter.settle_ok(Pulled::Item(value));
            return Ok(());
        }

        state.values.push_back(value);
        debug_assert_no_values_and_waiters(&state);

        Ok(())
    }

    /// Requests the next value.
    ///
    /// The returned deferred is already settled if a value is buffered or the queue has been
    /// closed and drained. Otherwise it waits for the next push or for the queue to close.
    #[must_use]
    pub fn pull(&self) -> Deferred<Pulled<T>, Infallible> {
        let mut state = self.state.borrow_mut();

        if let Some(value) = state.values.pop_front() {
            return Deferred::settled(Ok(Pulled::Item(value)));
        }

        if state.closed {
            return Deferred::settled(Ok(Pulled::End));
        }

        let (deferred, settler) = Deferred::create();
        state.waiters.push_back(settler);
        debug_assert_no_values_and_waiters(&state);

        deferred
    }

    /// Closes the queue. Every waiting pull receives [`Pulled::End`].
    ///
    /// Closing an already closed queue has no effect.
    pub fn close(&self) {
        let waiters = {
            let mut state = self.state.borrow_mut();

            if state.closed {
                return;
            }

            state.closed = true;
            mem::take(&mut state.waiters)
        };

        debug!(
            waiters = waiters.len(),
            buffered = self.len(),
            "event queue closed"
        );

        for waiter in waiters {
            waiter.settle_ok(Pulled::End);
        }
    }

    /// Whether the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// The number of values buffered because nobody was waiting for them yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().values.len()
    }

    /// Whether no values are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().values.is_empty()
    }

    /// The number of pulls waiting for a value.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.borrow().waiters.len()
    }

    /// Returns a callback that pushes every value it is called with onto this queue, suitable
    /// for registering with an external event source.
    ///
    /// Values arriving after the queue has been closed are dropped with a warning.
    pub fn listener(&self) -> impl FnMut(T) + 'static {
        let queue = self.clone();

        move |value| {
            if queue.push(value).is_err() {
                warn!("event arrived after its queue was closed, dropping it");
            }
        }
    }
}

fn debug_assert_no_values_and_waiters<T>(state: &QueueState<T>) {
    debug_assert!(
        state.values.is_empty() || state.waiters.is_empty(),
        "event queue has both buffered values and waiting pulls"
    );
}

impl<T> Clone for EventQueue<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T> Default for EventQueue<T>
where
    T: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for EventQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();

        f.debug_struct("EventQueue")
            .field("buffered", &state.values.len())
            .field("waiting", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}
