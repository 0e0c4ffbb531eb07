use thiserror::Error;

use crate::DeferredId;

/// Returned by [`EventQueue::push()`][crate::EventQueue::push] after the queue has been closed.
///
/// The rejected value is handed back to the caller, who may still want it.
#[derive(Debug, Error)]
#[error("cannot push onto a closed event queue")]
pub struct QueueClosed<T> {
    value: T,
}

impl<T> QueueClosed<T> {
    pub(crate) fn new(value: T) -> Self {
        Self { value }
    }

    /// Returns the value that could not be pushed.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Returned by [`Runtime::block_on()`][crate::Runtime::block_on] when the runtime ran out of work
/// while the awaited deferred was still pending.
///
/// This means nothing that is still alive will ever settle the deferred: no task, timer or
/// microtask remains that could make further progress.
#[derive(Debug, Error)]
#[error("runtime became idle while deferred {deferred} was still pending")]
#[non_exhaustive]
pub struct Stalled {
    /// The deferred that was being waited for.
    pub deferred: DeferredId,
}

/// The rejection reason of [`any()`][crate::any] when every input was rejected.
///
/// Contains one rejection reason per input, in input order.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("all {} inputs were rejected", .errors.len())]
pub struct AggregateError<E> {
    errors: Vec<E>,
}

impl<E> AggregateError<E> {
    pub(crate) fn new(errors: Vec<E>) -> Self {
        Self { errors }
    }

    /// The rejection reasons, in input order.
    #[must_use]
    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    /// Consumes the error, returning the rejection reasons in input order.
    #[must_use]
    pub fn into_errors(self) -> Vec<E> {
        self.errors
    }
}
