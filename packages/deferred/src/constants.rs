// A poisoned lock means a waker panicked while holding the lock. We cannot know which tasks were
// meant to be woken, so continuing would silently lose wake-ups.
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned wake list lock - continued \
    execution is not safe because suspended functions may never be resumed";
