use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Wake, Waker};

use crate::constants::ERR_POISONED_LOCK;
use crate::{Deferred, Scheduler};

/// Runs `future` as a suspension-capable function, returning a deferred that settles with the
/// future's output.
///
/// The body runs synchronously up to its first suspension point, before `spawn()` returns.
/// Awaiting a [`Deferred`] suspends the body until that deferred settles; the body then resumes
/// in a later microtask with `Ok(value)` or `Err(error)`, so `?` delivers a rejection to the
/// nearest enclosing handler. Returning `Err` from the body rejects the returned deferred.
///
/// The body only makes progress while the thread's [`Runtime`][crate::Runtime] is being driven.
///
/// # Example
///
/// ```rust
/// use deferred::{Runtime, resolved, spawn};
///
/// let runtime = Runtime::new();
///
/// let total = spawn(async {
///     let a = resolved::<i32, String>(2).await?;
///     let b = resolved::<i32, String>(3).await?;
///     Ok::<_, String>(a + b)
/// });
///
/// assert_eq!(runtime.block_on(total).unwrap(), Ok(5));
/// ```
pub fn spawn<T, E, F>(future: F) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + Debug + 'static,
    F: Future<Output = Result<T, E>> + 'static,
{
    let (deferred, settler) = Deferred::create();

    Scheduler::current().spawn(Box::pin(async move {
        settler.resolve(future.await);
    }));

    deferred
}

/// Identifies a spawned suspension-capable function while it is suspended.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub(crate) fn value(self) -> u64 {
        self.0
    }
}

/// A spawned future, owned by the scheduler until it completes.
pub(crate) struct SuspendedTask {
    // `None` once the future has completed. A late wake-up then finds nothing to poll.
    future: RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>,

    waker: Waker,
}

impl SuspendedTask {
    pub(crate) fn new(future: Pin<Box<dyn Future<Output = ()>>>, waker: Waker) -> Self {
        Self {
            future: RefCell::new(Some(future)),
            waker,
        }
    }

    /// Polls the future once. Returns `Poll::Ready` once the future has completed, including
    /// when it had already completed before this call.
    pub(crate) fn poll(&self) -> Poll<()> {
        let mut future = self.future.borrow_mut();

        let Some(inner) = future.as_mut() else {
            return Poll::Ready(());
        };

        let mut cx = Context::from_waker(&self.waker);

        if inner.as_mut().poll(&mut cx).is_ready() {
            *future = None;
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Debug for SuspendedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspendedTask")
            .field("completed", &self.future.borrow().is_none())
            .field("waker", &self.waker)
            .finish()
    }
}

/// Records a wake-up of a suspended task for the scheduler to pick up in its next microtask
/// checkpoint.
///
/// Wakers must be `Send + Sync`, so this only carries the task ID and a shared list of woken IDs,
/// never the task itself. A wake-up from another thread is recorded but does not on its own make
/// an idle runtime do anything.
#[derive(Debug)]
pub(crate) struct TaskWaker {
    task: TaskId,
    woken: Arc<Mutex<Vec<TaskId>>>,
}

impl TaskWaker {
    pub(crate) fn new(task: TaskId, woken: Arc<Mutex<Vec<TaskId>>>) -> Self {
        Self { task, woken }
    }
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.woken.lock().expect(ERR_POISONED_LOCK).push(self.task);
    }
}
