use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::{self, Debug};
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::Waker;
use std::time::Instant;

use foldhash::HashMap;
use tracing::{debug, trace};

use crate::DeferredId;
use crate::clock::{SystemTime, TimeSource};
use crate::constants::ERR_POISONED_LOCK;
use crate::rejection::{RejectionCandidate, RejectionSink, default_sink};
use crate::task::{SuspendedTask, TaskId, TaskWaker};

pub(crate) type Job = Box<dyn FnOnce()>;

enum Microtask {
    Run(Job),
    Resume(TaskId),
}

thread_local! {
    static CURRENT: Rc<Scheduler> = Rc::new(Scheduler::new());
}

/// The per-thread queues of pending work, driven by the thread's [`Runtime`][crate::Runtime].
///
/// One scheduling turn runs one task, followed by a microtask checkpoint that runs every queued
/// microtask, including the ones queued by the microtasks themselves. Timers become tasks once
/// they are due. Continuations of deferreds and resumptions of suspended functions are
/// microtasks, so they always run before the next task.
///
/// Work may be queued while no runtime is active. It is only executed once a runtime is built
/// and driven on the thread.
pub(crate) struct Scheduler {
    microtasks: RefCell<VecDeque<Microtask>>,
    tasks: RefCell<VecDeque<Job>>,

    // Ordered by deadline, ties broken by the order in which the timers were queued.
    timers: RefCell<BTreeMap<(Instant, u64), Job>>,
    next_timer_sequence: Cell<u64>,

    suspended: RefCell<HashMap<TaskId, Rc<SuspendedTask>>>,
    next_task_id: Cell<u64>,

    // Filled by wakers, which may be called from any thread.
    woken: Arc<Mutex<Vec<TaskId>>>,

    rejections: RefCell<Vec<Box<dyn RejectionCandidate>>>,
    rejection_sink: RefCell<RejectionSink>,

    time: RefCell<Box<dyn TimeSource>>,

    next_deferred_id: Cell<u64>,

    active: Cell<bool>,
    in_turn: Cell<bool>,
}

impl Scheduler {
    fn new() -> Self {
        Self {
            microtasks: RefCell::new(VecDeque::new()),
            tasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(BTreeMap::new()),
            next_timer_sequence: Cell::new(0),
            suspended: RefCell::new(HashMap::default()),
            next_task_id: Cell::new(0),
            woken: Arc::new(Mutex::new(Vec::new())),
            rejections: RefCell::new(Vec::new()),
            rejection_sink: RefCell::new(default_sink()),
            time: RefCell::new(Box::new(SystemTime)),
            next_deferred_id: Cell::new(0),
            active: Cell::new(false),
            in_turn: Cell::new(false),
        }
    }

    /// The scheduler of the current thread.
    pub(crate) fn current() -> Rc<Self> {
        CURRENT.with(Rc::clone)
    }

    pub(crate) fn next_deferred_id(&self) -> DeferredId {
        let value = self.next_deferred_id.get();
        self.next_deferred_id.set(value.wrapping_add(1));
        DeferredId::new(value)
    }

    pub(crate) fn queue_microtask(&self, job: Job) {
        self.microtasks.borrow_mut().push_back(Microtask::Run(job));
    }

    pub(crate) fn queue_task(&self, job: Job) {
        self.tasks.borrow_mut().push_back(job);
    }

    pub(crate) fn queue_timer(&self, deadline: Instant, job: Job) {
        let sequence = self.next_timer_sequence.get();
        self.next_timer_sequence.set(sequence.wrapping_add(1));

        trace!(?deadline, sequence, "timer queued");

        self.timers.borrow_mut().insert((deadline, sequence), job);
    }

    pub(crate) fn now(&self) -> Instant {
        self.time.borrow().now()
    }

    pub(crate) fn track_rejection(&self, candidate: Box<dyn RejectionCandidate>) {
        self.rejections.borrow_mut().push(candidate);
    }

    /// Takes ownership of a suspension-capable function and polls it for the first time.
    pub(crate) fn spawn(&self, future: Pin<Box<dyn Future<Output = ()>>>) {
        let id = TaskId::new(self.next_task_id.get());
        self.next_task_id.set(id.value().wrapping_add(1));

        let waker = Waker::from(Arc::new(TaskWaker::new(id, Arc::clone(&self.woken))));

        self.suspended
            .borrow_mut()
            .insert(id, Rc::new(SuspendedTask::new(future, waker)));

        trace!(task = id.value(), "task spawned");

        self.resume(id);
    }

    fn resume(&self, id: TaskId) {
        // The task may spawn other tasks while being polled, so it must not be borrowed from
        // the table during the poll.
        let task = self.suspended.borrow().get(&id).map(Rc::clone);

        // Completed tasks may still receive late wake-ups.
        let Some(task) = task else {
            return;
        };

        if task.poll().is_ready() {
            self.suspended.borrow_mut().remove(&id);
            trace!(task = id.value(), "task completed");
        }
    }

    pub(crate) fn activate(&self, time: Box<dyn TimeSource>, rejection_sink: RejectionSink) {
        assert!(
            !self.active.replace(true),
            "only one Runtime can be active on a thread at a time"
        );

        *self.time.borrow_mut() = time;
        *self.rejection_sink.borrow_mut() = rejection_sink;
    }

    /// Discards all queued work and restores the defaults.
    ///
    /// Rejections nobody had a chance to handle yet are still reported before the sink is reset.
    pub(crate) fn deactivate(&self) {
        self.report_unhandled_rejections();

        // Dropping jobs and tasks may drop deferreds and settlers, which may in turn touch the
        // scheduler, so nothing may remain borrowed while the queued work is dropped.
        let microtasks = mem::take(&mut *self.microtasks.borrow_mut());
        let tasks = mem::take(&mut *self.tasks.borrow_mut());
        let timers = mem::take(&mut *self.timers.borrow_mut());
        let suspended = mem::take(&mut *self.suspended.borrow_mut());
        let rejections = mem::take(&mut *self.rejections.borrow_mut());
        self.woken.lock().expect(ERR_POISONED_LOCK).clear();

        debug!(
            microtasks = microtasks.len(),
            tasks = tasks.len(),
            timers = timers.len(),
            suspended = suspended.len(),
            "runtime deactivated, discarding queued work"
        );

        drop(microtasks);
        drop(tasks);
        drop(timers);
        drop(suspended);
        drop(rejections);

        *self.rejection_sink.borrow_mut() = default_sink();
        *self.time.borrow_mut() = Box::new(SystemTime);
        self.active.set(false);
    }

    /// Executes one scheduling turn. Returns `false` if there was nothing to do.
    ///
    /// If the only remaining work is timers that are not yet due, waits for the earliest of them
    /// according to the active time source.
    pub(crate) fn turn(&self) -> bool {
        assert!(
            !self.in_turn.replace(true),
            "the runtime cannot be driven from inside work it is executing"
        );

        let _in_turn = scopeguard::guard((), |()| self.in_turn.set(false));

        let ran_microtasks = self.checkpoint();

        self.promote_due_timers();

        let task = self.tasks.borrow_mut().pop_front();

        if let Some(task) = task {
            trace!("running task");
            task();
            self.checkpoint();
            return true;
        }

        if ran_microtasks {
            return true;
        }

        let next_deadline = self.timers.borrow().keys().next().map(|(deadline, _)| *deadline);

        let Some(deadline) = next_deadline else {
            return false;
        };

        trace!(?deadline, "waiting for next timer");
        self.time.borrow().wait_until(deadline);
        self.promote_due_timers();

        true
    }

    /// Runs microtasks until none remain, then reports rejections that are still unhandled.
    ///
    /// Returns whether any microtask ran.
    fn checkpoint(&self) -> bool {
        let mut ran_any = false;

        loop {
            self.collect_wakes();

            let microtask = self.microtasks.borrow_mut().pop_front();

            let Some(microtask) = microtask else {
                break;
            };

            ran_any = true;

            match microtask {
                Microtask::Run(job) => job(),
                Microtask::Resume(id) => self.resume(id),
            }
        }

        self.report_unhandled_rejections();

        ran_any
    }

    fn collect_wakes(&self) {
        let woken = mem::take(&mut *self.woken.lock().expect(ERR_POISONED_LOCK));

        if woken.is_empty() {
            return;
        }

        self.microtasks
            .borrow_mut()
            .extend(woken.into_iter().map(Microtask::Resume));
    }

    fn promote_due_timers(&self) {
        let now = self.now();

        let due = {
            let mut timers = self.timers.borrow_mut();

            // Sequence numbers never reach the maximum, so this splits off every timer whose
            // deadline is strictly after `now`.
            let not_due = timers.split_off(&(now, u64::MAX));
            mem::replace(&mut *timers, not_due)
        };

        if due.is_empty() {
            return;
        }

        trace!(count = due.len(), "timers due");

        self.tasks.borrow_mut().extend(due.into_values());
    }

    fn report_unhandled_rejections(&self) {
        let candidates = mem::take(&mut *self.rejections.borrow_mut());

        if candidates.is_empty() {
            return;
        }

        let sink = Rc::clone(&self.rejection_sink.borrow());

        for candidate in candidates {
            if !candidate.is_handled() {
                sink(&candidate.report());
            }
        }
    }

    /// Whether there is no queued work of any kind.
    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.microtasks.borrow().is_empty()
            && self.tasks.borrow().is_empty()
            && self.timers.borrow().is_empty()
            && self.woken.lock().expect(ERR_POISONED_LOCK).is_empty()
    }
}

impl Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("microtasks", &self.microtasks.borrow().len())
            .field("tasks", &self.tasks.borrow().len())
            .field("timers", &self.timers.borrow().len())
            .field("suspended", &self.suspended.borrow().len())
            .field("rejections", &self.rejections.borrow().len())
            .field("time", &self.time.borrow())
            .field("active", &self.active.get())
            .field("in_turn", &self.in_turn.get())
            .finish_non_exhaustive()
    }
}
