use std::fmt::Debug;

use crate::{Deferred, resolved};

/// What a continuation wants to happen to the deferred it feeds.
///
/// Continuations registered via [`Deferred::register()`], [`Deferred::then()`] and friends may
/// return anything that implements [`IntoResolution`]: a `Result` (fulfill on `Ok`, reject on
/// `Err`), another [`Deferred`] (adopt its eventual outcome) or a `Resolution` directly.
#[expect(
    clippy::exhaustive_enums,
    reason = "the three ways a deferred can be resolved are fundamental and will not grow"
)]
#[derive(Debug)]
pub enum Resolution<T, E> {
    /// Fulfill with this value.
    Fulfill(T),

    /// Reject with this error.
    Reject(E),

    /// Lock onto another deferred and mirror whatever it eventually settles with.
    Adopt(Deferred<T, E>),
}

impl<T, E> Resolution<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    /// Turns the resolution into a deferred that settles accordingly.
    ///
    /// Values and errors settle in a later scheduling turn, same as with [`resolved()`].
    #[must_use]
    pub fn into_deferred(self) -> Deferred<T, E> {
        match self {
            Self::Fulfill(value) => resolved(value),
            Self::Reject(error) => crate::rejected(error),
            Self::Adopt(deferred) => deferred,
        }
    }
}

impl<T, E> From<Result<T, E>> for Resolution<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Fulfill(value),
            Err(error) => Self::Reject(error),
        }
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Self::Adopt(deferred)
    }
}

/// Conversion into a [`Resolution`], implemented for everything a continuation may return.
pub trait IntoResolution<T, E> {
    /// Converts `self` into a resolution.
    fn into_resolution(self) -> Resolution<T, E>;
}

impl<T, E> IntoResolution<T, E> for Resolution<T, E> {
    fn into_resolution(self) -> Resolution<T, E> {
        self
    }
}

impl<T, E> IntoResolution<T, E> for Result<T, E> {
    fn into_resolution(self) -> Resolution<T, E> {
        self.into()
    }
}

impl<T, E> IntoResolution<T, E> for Deferred<T, E> {
    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Adopt(self)
    }
}
