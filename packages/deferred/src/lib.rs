#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Single-threaded deferred values with strict settlement rules, combinators that run many of
//! them concurrently or one after another, and a queue that turns events pushed at arbitrary
//! times into a sequence consumed one item at a time.
//!
//! The central type is [`Deferred<T, E>`]: a value of type `T` or an error of type `E` that
//! becomes available later. A deferred settles exactly once, either directly through its
//! [`Settler`] or by adopting the outcome of another deferred. Continuations registered via
//! [`then()`][Deferred::then], [`recover()`][Deferred::recover] and friends run in registration
//! order, always in a later microtask, never synchronously.
//!
//! Sequential-style code is written as an `async` block started with [`spawn()`]. Awaiting a
//! deferred suspends the block until the deferred settles and `?` hands a rejection to the
//! nearest enclosing handler.
//!
//! Everything runs on the current thread, driven by its [`Runtime`]:
//!
//! * Tasks, queued via [`queue_task()`] and its timed variants, run one per scheduling turn.
//! * Microtasks (continuations and resumptions of suspended functions) all run at the end of
//!   the turn that queued them.
//! * Rejections that nobody handled by the end of a turn are reported, once each, to the sink
//!   configured via [`RuntimeBuilder::on_unhandled_rejection()`], by default via
//!   `tracing::error!`.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use deferred::{Clock, Entry, EventQueue, Pulled, Runtime, all, spawn, wait};
//!
//! let runtime = Runtime::builder().clock(Clock::Virtual).build();
//!
//! let clicks = EventQueue::new();
//! let mut on_click = clicks.listener();
//!
//! let handler = spawn({
//!     let clicks = clicks.clone();
//!
//!     async move {
//!         let mut total = 0;
//!
//!         while let Ok(Pulled::Item(x)) = clicks.pull().await {
//!             wait::<String>(Duration::from_millis(100)).await?;
//!             total += x;
//!         }
//!
//!         Ok::<_, String>(total)
//!     }
//! });
//!
//! on_click(1);
//! on_click(2);
//! clicks.close();
//!
//! let both = all([handler.into(), Entry::Value(10)]);
//!
//! assert_eq!(runtime.block_on(both).unwrap(), Ok(vec![3, 10]));
//! ```

mod awaiting;
mod clock;
mod combinators;
mod constants;
mod deferred;
mod error;
mod event_queue;
mod rejection;
mod resolution;
mod runtime;
mod scheduler;
mod sequence;
mod task;
mod timer;

pub use awaiting::*;
pub use clock::Clock;
pub use combinators::*;
pub use deferred::*;
pub use error::*;
pub use event_queue::*;
pub use rejection::UnhandledRejection;
pub use resolution::*;
pub use runtime::*;
pub(crate) use scheduler::*;
pub use sequence::*;
pub use task::spawn;
pub use timer::*;

pub(crate) use rejection::RejectionCandidate;
