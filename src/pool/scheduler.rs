//! Deferred task scheduling.
//!
//! The pool never sleeps or spawns. It hands single-shot tasks to a
//! [`Scheduler`] keyed by `(target, method)`, and the host's event loop runs
//! them. [`ManualScheduler`] is a deterministic implementation driven by a
//! virtual clock.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

/// Identifies a pending task. At most one task per key is pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub target: String,
    pub method: &'static str,
}

impl TaskKey {
    pub fn new(target: impl Into<String>, method: &'static str) -> Self {
        Self {
            target: target.into(),
            method,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.method)
    }
}

pub type Task = Box<dyn FnOnce()>;

/// Single-shot delayed task runner.
pub trait Scheduler {
    /// Run `task` after `delay`. Returns `false` and drops the task if one is
    /// already pending under `key`.
    fn schedule(&self, key: TaskKey, delay: Duration, task: Task) -> bool;

    fn is_scheduled(&self, key: &TaskKey) -> bool;

    /// True while the task for `key` is executing.
    fn is_running(&self, key: &TaskKey) -> bool;

    /// Drop the pending task for `key`. Returns `true` if one was pending.
    fn unschedule(&self, key: &TaskKey) -> bool;
}

/// Scheduler on a virtual clock, advanced explicitly.
///
/// Clone this to keep a driving handle while the pool holds another - it
/// uses Rc internally.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    seq: u64,
    queue: BTreeMap<(Duration, u64), (TaskKey, Task)>,
    index: HashMap<TaskKey, (Duration, u64)>,
    running: HashSet<TaskKey>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Run every task due at the current time, including tasks that become
    /// due while running. Returns the number of tasks run.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        while let Some((key, task)) = self.pop_due() {
            trace!(task = %key, "running scheduled task");
            self.state.borrow_mut().running.insert(key.clone());
            task();
            self.state.borrow_mut().running.remove(&key);
            ran += 1;
        }
        ran
    }

    /// Move the clock forward and run what became due.
    pub fn advance(&self, by: Duration) -> usize {
        self.state.borrow_mut().now += by;
        self.run_due()
    }

    /// Run tasks, jumping the clock to each due time, until none are pending.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let next_due = {
                let state = self.state.borrow();
                match state.queue.keys().next() {
                    Some((due, _)) => *due,
                    None => break,
                }
            };
            {
                let mut state = self.state.borrow_mut();
                if next_due > state.now {
                    state.now = next_due;
                }
            }
            ran += self.run_due();
        }
        ran
    }

    fn pop_due(&self) -> Option<(TaskKey, Task)> {
        let mut state = self.state.borrow_mut();
        let slot = *state.queue.keys().next()?;
        if slot.0 > state.now {
            return None;
        }
        let (key, task) = state.queue.remove(&slot)?;
        state.index.remove(&key);
        Some((key, task))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, key: TaskKey, delay: Duration, task: Task) -> bool {
        let mut state = self.state.borrow_mut();
        if state.index.contains_key(&key) {
            return false;
        }
        let slot = (state.now + delay, state.seq);
        state.seq += 1;
        trace!(task = %key, delay_ms = delay.as_millis() as u64, "scheduled task");
        state.index.insert(key.clone(), slot);
        state.queue.insert(slot, (key, task));
        true
    }

    fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.state.borrow().index.contains_key(key)
    }

    fn is_running(&self, key: &TaskKey) -> bool {
        self.state.borrow().running.contains(key)
    }

    fn unschedule(&self, key: &TaskKey) -> bool {
        let mut state = self.state.borrow_mut();
        match state.index.remove(key) {
            Some(slot) => {
                state.queue.remove(&slot);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}
