use std::fmt::{self, Display};
use std::rc::Rc;

use crate::DeferredId;

/// A rejection that nobody had registered interest in by the end of the microtask checkpoint in
/// which it happened.
///
/// Delivered to the sink configured via
/// [`RuntimeBuilder::on_unhandled_rejection()`][crate::RuntimeBuilder::on_unhandled_rejection].
/// Each rejected deferred is reported at most once.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnhandledRejection {
    deferred: DeferredId,
    reason: String,
}

impl UnhandledRejection {
    pub(crate) fn new(deferred: DeferredId, reason: String) -> Self {
        Self { deferred, reason }
    }

    /// The deferred that was rejected.
    #[must_use]
    pub fn deferred(&self) -> DeferredId {
        self.deferred
    }

    /// The `Debug` rendering of the rejection reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl Display for UnhandledRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deferred {} was rejected with no handler: {}",
            self.deferred, self.reason
        )
    }
}

/// A rejected deferred that may or may not get a handler before the checkpoint ends.
///
/// Type-erased so the scheduler can track deferreds of any payload type.
pub(crate) trait RejectionCandidate {
    fn is_handled(&self) -> bool;

    fn report(&self) -> UnhandledRejection;
}

pub(crate) type RejectionSink = Rc<dyn Fn(&UnhandledRejection)>;

pub(crate) fn default_sink() -> RejectionSink {
    Rc::new(log_unhandled_rejection)
}

fn log_unhandled_rejection(rejection: &UnhandledRejection) {
    tracing::error!(
        deferred = %rejection.deferred(),
        reason = rejection.reason(),
        "unhandled rejection"
    );
}
