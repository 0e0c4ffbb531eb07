//! Functions that combine many deferreds into one.

use std::cell::RefCell;
use std::fmt::Debug;
use std::iter;
use std::mem;
use std::rc::Rc;

use crate::{AggregateError, Deferred, IntoResolution};

/// An input to a combinator: either a plain value or a deferred.
///
/// Plain values are treated as deferreds that are already fulfilled with that value.
#[expect(
    clippy::exhaustive_enums,
    reason = "an input is either available now or later, there is no third option"
)]
#[derive(Debug)]
pub enum Entry<T, E> {
    /// A value that is available immediately.
    Value(T),

    /// A value or error that becomes available when the deferred settles.
    Deferred(Deferred<T, E>),
}

impl<T, E> Entry<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    fn into_deferred(self) -> Deferred<T, E> {
        match self {
            Self::Value(value) => resolved(value),
            Self::Deferred(deferred) => deferred,
        }
    }
}

impl<T, E> From<Deferred<T, E>> for Entry<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Self::Deferred(deferred)
    }
}

/// The settlement of one input of [`all_settled()`].
#[expect(
    clippy::exhaustive_enums,
    reason = "a settled deferred is either fulfilled or rejected, there is no third option"
)]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Outcome<T, E> {
    /// The input was fulfilled with this value.
    Fulfilled(T),

    /// The input was rejected with this error.
    Rejected(E),
}

impl<T, E> Outcome<T, E> {
    /// Whether the input was fulfilled.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    /// Converts the outcome into the `Result` the input settled with.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason if the input was rejected.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Fulfilled(value) => Ok(value),
            Self::Rejected(error) => Err(error),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Fulfilled(value),
            Err(error) => Self::Rejected(error),
        }
    }
}

/// Creates a deferred that fulfills with `value` in a later microtask.
///
/// The outcome is decided immediately, so [`Deferred::is_resolved()`] is `true` right away, but
/// the deferred is only settled once the runtime gets to run the settlement microtask.
#[must_use]
pub fn resolved<T, E>(value: T) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    let (deferred, settler) = Deferred::create();
    settler.settle_later(Ok(value));
    deferred
}

/// Creates a deferred that rejects with `error` in a later microtask.
///
/// Like any rejection, this is reported as unhandled if nobody registers interest in the
/// deferred by the end of the microtask checkpoint in which it is rejected.
#[must_use]
pub fn rejected<T, E>(error: E) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
{
    let (deferred, settler) = Deferred::create();
    settler.settle_later(Err(error));
    deferred
}

fn collect_inputs<T, E, I>(inputs: I) -> Vec<Deferred<T, E>>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Entry<T, E>>,
{
    inputs
        .into_iter()
        .map(|input| input.into().into_deferred())
        .collect()
}

/// Slots filled in by input index as inputs settle, plus the count of slots still empty.
struct Slots<V> {
    values: Vec<Option<V>>,
    remaining: usize,
}

impl<V> Slots<V> {
    fn shared(len: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            values: iter::repeat_with(|| None).take(len).collect(),
            remaining: len,
        }))
    }

    /// Fills the slot at `index` and returns all values in index order if it was the last one.
    fn fill(&mut self, index: usize, value: V) -> Option<Vec<V>> {
        let slot = self.values.get_mut(index)?;

        if slot.replace(value).is_none() {
            self.remaining = self.remaining.saturating_sub(1);
        }

        if self.remaining > 0 {
            return None;
        }

        Some(mem::take(&mut self.values).into_iter().flatten().collect())
    }
}

/// Creates a deferred that fulfills with the values of all inputs, in input order, once every
/// input is fulfilled.
///
/// Rejects with the first rejection among the inputs, in settlement order. Inputs that settle
/// after that are ignored. Rejections of inputs after the first do not count as unhandled.
///
/// An empty input fulfills with an empty vector.
///
/// # Example
///
/// ```rust
/// use deferred::{Deferred, Entry, Runtime, all};
///
/// let runtime = Runtime::new();
///
/// let (later, settler) = Deferred::<i32, String>::create();
/// let combined = all([Entry::Value(1), later.into(), Entry::Value(3)]);
///
/// settler.settle_ok(2);
///
/// assert_eq!(runtime.block_on(combined).unwrap(), Ok(vec![1, 2, 3]));
/// ```
#[must_use]
pub fn all<T, E, I>(inputs: I) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Entry<T, E>>,
{
    let inputs = collect_inputs(inputs);

    if inputs.is_empty() {
        return resolved(Vec::new());
    }

    let (combined, settler) = Deferred::create();
    let slots = Slots::shared(inputs.len());

    for (index, input) in inputs.into_iter().enumerate() {
        let slots = Rc::clone(&slots);
        let settler = settler.clone();

        input.subscribe(move |result| match result {
            Ok(value) => {
                let values = slots.borrow_mut().fill(index, value);

                if let Some(values) = values {
                    settler.settle_ok(values);
                }
            }
            Err(error) => settler.settle_err(error),
        });
    }

    combined
}

/// Creates a deferred that fulfills with the [`Outcome`] of every input, in input order, once
/// every input has settled. Never rejects.
///
/// An empty input fulfills with an empty vector.
#[must_use]
pub fn all_settled<T, E, I>(inputs: I) -> Deferred<Vec<Outcome<T, E>>, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Entry<T, E>>,
{
    let inputs = collect_inputs(inputs);

    if inputs.is_empty() {
        return resolved(Vec::new());
    }

    let (combined, settler) = Deferred::create();
    let slots = Slots::shared(inputs.len());

    for (index, input) in inputs.into_iter().enumerate() {
        let slots = Rc::clone(&slots);
        let settler = settler.clone();

        input.subscribe(move |result| {
            let outcomes = slots.borrow_mut().fill(index, Outcome::from(result));

            if let Some(outcomes) = outcomes {
                settler.settle_ok(outcomes);
            }
        });
    }

    combined
}

/// Creates a deferred that settles the same way as whichever input settles first.
///
/// Later settlements are ignored. An empty input never settles, and neither does the result if
/// no input ever settles; combine with [`with_timeout()`][crate::with_timeout] to bound the wait.
#[must_use]
pub fn race<T, E, I>(inputs: I) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Entry<T, E>>,
{
    let (winner, settler) = Deferred::create();

    for input in collect_inputs(inputs) {
        let settler = settler.clone();
        input.subscribe(move |result| settler.resolve(result));
    }

    winner
}

/// Creates a deferred that fulfills with the first fulfillment among the inputs.
///
/// Rejects with an [`AggregateError`] holding every rejection reason, in input order, if all
/// inputs are rejected. An empty input rejects with an empty aggregate.
#[must_use]
pub fn any<T, E, I>(inputs: I) -> Deferred<T, AggregateError<E>>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Entry<T, E>>,
{
    let inputs = collect_inputs(inputs);

    if inputs.is_empty() {
        return rejected(AggregateError::new(Vec::new()));
    }

    let (first, settler) = Deferred::create();
    let slots = Slots::shared(inputs.len());

    for (index, input) in inputs.into_iter().enumerate() {
        let slots = Rc::clone(&slots);
        let settler = settler.clone();

        input.subscribe(move |result| match result {
            Ok(value) => settler.settle_ok(value),
            Err(error) => {
                let errors = slots.borrow_mut().fill(index, error);

                if let Some(errors) = errors {
                    settler.settle_err(AggregateError::new(errors));
                }
            }
        });
    }

    first
}

/// Runs `maker` for each input strictly one at a time, each only after the deferred created for
/// the previous input has fulfilled. Fulfills with every output in input order.
///
/// The first rejection stops the sequence: `maker` is not called for the remaining inputs and the
/// returned deferred rejects with that error. `maker` is first called in a later microtask, never
/// synchronously.
///
/// # Example
///
/// ```rust
/// use deferred::{Runtime, resolved, sequence};
///
/// let runtime = Runtime::new();
///
/// let lengths = sequence(["a", "bb", "ccc"], |text| resolved::<usize, String>(text.len()));
///
/// assert_eq!(runtime.block_on(lengths).unwrap(), Ok(vec![1, 2, 3]));
/// ```
#[must_use]
pub fn sequence<U, T, E, I, F, R>(inputs: I, maker: F) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    I: IntoIterator<Item = U>,
    I::IntoIter: 'static,
    F: FnMut(U) -> R + 'static,
    R: IntoResolution<T, E>,
{
    let remaining = inputs.into_iter();

    resolved(Vec::new()).then(move |outputs| sequence_step(remaining, maker, outputs))
}

fn sequence_step<U, T, E, It, F, R>(
    mut remaining: It,
    mut maker: F,
    mut outputs: Vec<T>,
) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    It: Iterator<Item = U> + 'static,
    F: FnMut(U) -> R + 'static,
    R: IntoResolution<T, E>,
{
    let Some(input) = remaining.next() else {
        return resolved(outputs);
    };

    maker(input)
        .into_resolution()
        .into_deferred()
        .then(move |output| {
            outputs.push(output);
            sequence_step(remaining, maker, outputs)
        })
}
