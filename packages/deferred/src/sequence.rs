use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt::{self, Debug};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;

use crate::{Awaiting, Deferred, EventQueue, EventSource, IntoResolution, queue_task_at, spawn};

type PullFn<T> = Box<dyn FnMut() -> Deferred<Option<T>, Infallible>>;

enum Source<T> {
    Queue(EventQueue<T>),
    Pull(RefCell<PullFn<T>>),
}

/// A single-pass sequence of values that become available over time, consumed one at a time by
/// calling [`next()`][Self::next] until it produces `None`.
///
/// Sequences are typically backed by an [`EventQueue`] that some producer pushes values onto
/// (see [`event_stream()`]), but any function that produces a deferred item on demand will do
/// (see [`from_fn()`][Self::from_fn] and [`ticks()`][Self::ticks]).
///
/// Besides `next()`, a sequence can be drained with [`for_each()`][Self::for_each] or consumed
/// as a [`futures::Stream`] from inside a function started with [`spawn()`].
///
/// # Example
///
/// ```rust
/// use deferred::{AsyncSequence, EventQueue, Runtime};
///
/// let runtime = Runtime::new();
///
/// let queue = EventQueue::new();
/// let sequence = AsyncSequence::from(queue.clone());
///
/// queue.push(1).unwrap();
/// queue.push(2).unwrap();
/// queue.close();
///
/// assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(Some(1)));
/// assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(Some(2)));
/// assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(None));
/// ```
pub struct AsyncSequence<T> {
    source: Source<T>,

    // Set once the source has produced the end marker. The source is not consulted after that.
    finished: Rc<Cell<bool>>,

    // The item being waited for when consumed as a `Stream`.
    in_flight: Option<Awaiting<Option<T>, Infallible>>,
}

impl<T> AsyncSequence<T>
where
    T: Clone + 'static,
{
    fn with_source(source: Source<T>) -> Self {
        Self {
            source,
            finished: Rc::new(Cell::new(false)),
            in_flight: None,
        }
    }

    /// Creates a sequence that calls `pull` whenever the next item is requested.
    ///
    /// The sequence ends the first time the deferred returned by `pull` fulfills with `None`;
    /// `pull` is not called again after that.
    #[must_use]
    pub fn from_fn(pull: impl FnMut() -> Deferred<Option<T>, Infallible> + 'static) -> Self {
        Self::with_source(Source::Pull(RefCell::new(Box::new(pull))))
    }

    /// Requests the next item. Fulfills with `None` once the sequence has ended.
    ///
    /// # Panics
    ///
    /// Panics if called reentrantly from inside the pull function of a sequence created with
    /// [`from_fn()`][Self::from_fn].
    #[must_use]
    pub fn next(&self) -> Deferred<Option<T>, Infallible> {
        if self.finished.get() {
            return Deferred::settled(Ok(None));
        }

        let item = match &self.source {
            Source::Queue(queue) => queue.pull().then(|pulled| Ok(pulled.into_option())),
            Source::Pull(pull) => (*pull.borrow_mut())(),
        };

        let finished = Rc::clone(&self.finished);

        item.then(move |item| {
            if item.is_none() {
                finished.set(true);
            }

            Ok(item)
        })
    }

    /// Processes every item with `body`, one at a time: the next item is only requested once the
    /// outcome of `body` for the previous item has fulfilled.
    ///
    /// Fulfills once the sequence has ended. If `body` fails for any item, the returned deferred
    /// rejects with that error and no further items are requested.
    pub fn for_each<E, F, R>(self, mut body: F) -> Deferred<(), E>
    where
        E: Clone + Debug + 'static,
        F: FnMut(T) -> R + 'static,
        R: IntoResolution<(), E>,
    {
        spawn(async move {
            loop {
                let Ok(item) = self.next().await;

                let Some(item) = item else {
                    return Ok(());
                };

                body(item).into_resolution().into_deferred().await?;
            }
        })
    }
}

impl AsyncSequence<u32> {
    /// Creates a sequence that produces `1`, `2`, `3` and so on, each at the next multiple of
    /// `interval` after the moment the sequence was created.
    ///
    /// Ticks target absolute times measured from the start, so delays in consuming one tick do
    /// not push back the ones after it. A tick whose time has already passed is produced as soon
    /// as it is requested. With `max`, the sequence ends after that many ticks.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    ///
    /// use deferred::{AsyncSequence, Clock, Runtime};
    ///
    /// let runtime = Runtime::builder().clock(Clock::Virtual).build();
    /// let start = runtime.now();
    ///
    /// let ticks = AsyncSequence::ticks(Duration::from_secs(1), Some(2));
    ///
    /// assert_eq!(runtime.block_on(ticks.next()).unwrap(), Ok(Some(1)));
    /// assert_eq!(runtime.block_on(ticks.next()).unwrap(), Ok(Some(2)));
    /// assert_eq!(runtime.block_on(ticks.next()).unwrap(), Ok(None));
    ///
    /// assert_eq!(runtime.now() - start, Duration::from_secs(2));
    /// ```
    #[must_use]
    pub fn ticks(interval: Duration, max: Option<u32>) -> Self {
        let start = crate::now();
        let mut produced: u32 = 0;

        Self::from_fn(move || {
            if max.is_some_and(|max| produced >= max) {
                return Deferred::settled(Ok(None));
            }

            // Running out of representable ticks or time ends the sequence.
            let Some(tick) = produced.checked_add(1) else {
                return Deferred::settled(Ok(None));
            };

            let Some(deadline) = interval
                .checked_mul(tick)
                .and_then(|offset| start.checked_add(offset))
            else {
                return Deferred::settled(Ok(None));
            };

            produced = tick;

            Deferred::new(|settler| {
                queue_task_at(deadline, move || settler.settle_ok(Some(tick)));
            })
        })
    }
}

impl<T> From<EventQueue<T>> for AsyncSequence<T>
where
    T: Clone + 'static,
{
    fn from(queue: EventQueue<T>) -> Self {
        Self::with_source(Source::Queue(queue))
    }
}

/// Creates a sequence of the events delivered by `source`, from now on.
///
/// Events are buffered in an [`EventQueue`] until requested, so none are lost while the consumer
/// is busy with an earlier one. The sequence never ends by itself; to be able to end it, create
/// the queue directly, register its [`listener()`][EventQueue::listener] and close the queue when
/// done.
#[must_use]
pub fn event_stream<T, S>(source: &mut S) -> AsyncSequence<T>
where
    T: Clone + 'static,
    S: EventSource<T> + ?Sized,
{
    let queue = EventQueue::new();
    source.add_listener(Box::new(queue.listener()));

    AsyncSequence::from(queue)
}

impl<T> Stream for AsyncSequence<T>
where
    T: Clone + 'static,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let mut awaiting = this
            .in_flight
            .take()
            .unwrap_or_else(|| this.next().into_future());

        match Pin::new(&mut awaiting).poll(cx) {
            Poll::Ready(Ok(item)) => Poll::Ready(item),
            Poll::Pending => {
                this.in_flight = Some(awaiting);
                Poll::Pending
            }
        }
    }
}

impl<T> Debug for AsyncSequence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Queue(queue) => format!("{queue:?}"),
            Source::Pull(_) => "pull function".to_string(),
        };

        f.debug_struct("AsyncSequence")
            .field("source", &source)
            .field("finished", &self.finished.get())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use static_assertions::assert_not_impl_any;
    use testing::{Journal, with_watchdog};

    use super::*;
    use crate::{Clock, Runtime, resolved, wait};

    assert_not_impl_any!(AsyncSequence<i32>: Send, Sync);

    struct FakeSource {
        listeners: Vec<Box<dyn FnMut(i32)>>,
    }

    impl FakeSource {
        fn emit(&mut self, event: i32) {
            for listener in &mut self.listeners {
                listener(event);
            }
        }
    }

    impl EventSource<i32> for FakeSource {
        fn add_listener(&mut self, listener: Box<dyn FnMut(i32)>) {
            self.listeners.push(listener);
        }
    }

    #[test]
    fn next_after_end_keeps_ending() {
        with_watchdog(|| {
            let runtime = Runtime::new();
            let queue = EventQueue::<i32>::new();
            let sequence = AsyncSequence::from(queue.clone());

            queue.close();

            assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(None));
            assert_eq!(sequence.next().peek(), Some(Ok(None)));
        });
    }

    #[test]
    fn from_fn_is_not_called_after_end() {
        with_watchdog(|| {
            let runtime = Runtime::new();
            let calls = Rc::new(Cell::new(0));

            let counter = Rc::clone(&calls);
            let sequence = AsyncSequence::<i32>::from_fn(move || {
                counter.set(counter.get() + 1);
                resolved(None)
            });

            assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(None));
            assert_eq!(runtime.block_on(sequence.next()).unwrap(), Ok(None));
            assert_eq!(calls.get(), 1);
        });
    }

    #[test]
    fn for_each_processes_items_one_at_a_time() {
        with_watchdog(|| {
            let runtime = Runtime::builder().clock(Clock::Virtual).build();
            let journal = Journal::new();

            let queue = EventQueue::new();
            for item in 1..=3 {
                queue.push(item).unwrap();
            }
            queue.close();

            let entries = journal.clone();
            let done = AsyncSequence::from(queue).for_each(move |item: i32| {
                entries.record(format!("start {item}"));

                let entries = entries.clone();
                wait::<String>(Duration::from_secs(1)).then(move |()| {
                    entries.record(format!("end {item}"));
                    Ok(())
                })
            });

            assert_eq!(runtime.block_on(done).unwrap(), Ok(()));
            assert_eq!(
                journal.entries(),
                ["start 1", "end 1", "start 2", "end 2", "start 3", "end 3"]
            );
        });
    }

    #[test]
    fn for_each_stops_at_first_failure() {
        with_watchdog(|| {
            let runtime = Runtime::new();
            let journal = Journal::new();

            let queue = EventQueue::new();
            for item in 1..=3 {
                queue.push(item).unwrap();
            }

            let entries = journal.clone();
            let done = AsyncSequence::from(queue.clone()).for_each(move |item: i32| {
                entries.record(format!("item {item}"));

                if item == 2 {
                    Err(format!("item {item} failed"))
                } else {
                    Ok(())
                }
            });

            assert_eq!(
                runtime.block_on(done).unwrap(),
                Err("item 2 failed".to_string())
            );
            assert_eq!(journal.entries(), ["item 1", "item 2"]);
            assert_eq!(queue.len(), 1);
        });
    }

    #[test]
    fn ticks_target_absolute_times() {
        with_watchdog(|| {
            let runtime = Runtime::builder().clock(Clock::Virtual).build();
            let start = runtime.now();

            let ticks = AsyncSequence::ticks(Duration::from_secs(10), None);

            assert_eq!(runtime.block_on(ticks.next()).unwrap(), Ok(Some(1)));
            assert_eq!(runtime.now().duration_since(start), Duration::from_secs(10));

            // Time passes while the consumer is busy with something else.
            runtime
                .block_on(wait::<()>(Duration::from_secs(15)))
                .unwrap()
                .unwrap();

            // Tick 2 was due at 20 seconds, which has already passed.
            assert_eq!(runtime.block_on(ticks.next()).unwrap(), Ok(Some(2)));
            assert_eq!(runtime.now().duration_since(start), Duration::from_secs(25));

            assert_eq!(runtime.block_on(ticks.next()).unwrap(), Ok(Some(3)));
            assert_eq!(runtime.now().duration_since(start), Duration::from_secs(30));
        });
    }

    #[test]
    fn event_stream_delivers_source_events() {
        with_watchdog(|| {
            let runtime = Runtime::new();
            let mut source = FakeSource {
                listeners: Vec::new(),
            };

            let events = event_stream(&mut source);

            source.emit(1);
            source.emit(2);

            assert_eq!(runtime.block_on(events.next()).unwrap(), Ok(Some(1)));
            assert_eq!(runtime.block_on(events.next()).unwrap(), Ok(Some(2)));

            let third = events.next();
            runtime.run_until_idle();
            assert!(third.is_pending());

            source.emit(3);

            assert_eq!(runtime.block_on(third).unwrap(), Ok(Some(3)));
        });
    }

    #[test]
    fn consumed_as_stream() {
        with_watchdog(|| {
            let runtime = Runtime::new();

            let queue = EventQueue::new();
            let sequence = AsyncSequence::from(queue.clone());

            let collected = spawn(async move {
                let items: Vec<i32> = sequence.collect().await;
                Ok::<_, String>(items)
            });

            queue.push(1).unwrap();
            runtime.run_until_idle();
            queue.push(2).unwrap();
            queue.close();

            assert_eq!(runtime.block_on(collected).unwrap(), Ok(vec![1, 2]));
        });
    }
}
