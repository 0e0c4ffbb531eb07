use std::cell::RefCell;
use std::rc::Rc;

/// Records entries in the order they happen, for asserting the order in which scheduled work ran.
///
/// Clones share the same list of entries, so a clone can be moved into each callback under test.
///
/// # Example
///
/// ```rust
/// use testing::Journal;
///
/// let journal = Journal::new();
///
/// let callback = {
///     let journal = journal.clone();
///     move || journal.record("callback")
/// };
///
/// journal.record("before");
/// callback();
///
/// assert_eq!(journal.entries(), ["before", "callback"]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Journal {
    entries: Rc<RefCell<Vec<String>>>,
}

impl Journal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    /// Returns a copy of all entries recorded so far, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}
