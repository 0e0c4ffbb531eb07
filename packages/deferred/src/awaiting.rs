use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::Deferred;

struct Slot<T, E> {
    result: Option<Result<T, E>>,
    waker: Option<Waker>,
}

enum AwaitingState<T, E> {
    NotPolled(Deferred<T, E>),
    Subscribed(Rc<RefCell<Slot<T, E>>>),
    Completed,
}

/// The suspension point of a [`Deferred`], obtained by awaiting it.
///
/// Resolves to `Ok(value)` or `Err(error)` once the deferred settles. Awaiting always suspends
/// at least until the next microtask, even if the deferred has already settled, so code after an
/// `.await` never runs in the same microtask as the code before it.
///
/// # Panics
///
/// Panics if polled again after it has returned `Poll::Ready`.
pub struct Awaiting<T, E> {
    state: AwaitingState<T, E>,
}

impl<T, E> Future for Awaiting<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // We never project a pinned reference into our fields, so moving them around is fine.
        let this = &mut *self;

        match &this.state {
            AwaitingState::NotPolled(deferred) => {
                let slot = Rc::new(RefCell::new(Slot {
                    result: None,
                    waker: Some(cx.waker().clone()),
                }));

                let continuation_slot = Rc::clone(&slot);
                deferred.subscribe(move |result| {
                    let waker = {
                        let mut slot = continuation_slot.borrow_mut();
                        slot.result = Some(result);
                        slot.waker.take()
                    };

                    if let Some(waker) = waker {
                        waker.wake();
                    }
                });

                this.state = AwaitingState::Subscribed(slot);
                Poll::Pending
            }
            AwaitingState::Subscribed(slot) => {
                let mut slot_contents = slot.borrow_mut();

                if let Some(result) = slot_contents.result.take() {
                    drop(slot_contents);
                    this.state = AwaitingState::Completed;
                    return Poll::Ready(result);
                }

                slot_contents.waker = Some(cx.waker().clone());
                Poll::Pending
            }
            AwaitingState::Completed => {
                panic!("awaited deferred polled again after it already completed")
            }
        }
    }
}

impl<T, E> IntoFuture for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Awaiting<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Awaiting {
            state: AwaitingState::NotPolled(self),
        }
    }
}

impl<T, E> Debug for Awaiting<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            AwaitingState::NotPolled(_) => "not polled",
            AwaitingState::Subscribed(slot) => {
                if slot.borrow().result.is_some() {
                    "ready"
                } else {
                    "waiting"
                }
            }
            AwaitingState::Completed => "completed",
        };

        f.debug_struct("Awaiting").field("state", &state).finish()
    }
}
