//! Mutation notification channel.
//!
//! Tracked objects announce slot changes by pid; observers (the pool) are
//! called synchronously in subscription order. The observer list is copied
//! before dispatch, so an observer may unsubscribe itself while notified.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

use crate::storage::Pid;

/// Receiver of mutation notifications.
pub trait MutationObserver {
    fn on_did_mutate(&self, pid: &Pid);
}

/// Cheaply cloneable handle to a shared subscription table.
#[derive(Clone, Default)]
pub struct MutationChannel {
    observers: Rc<RefCell<HashMap<Pid, Vec<Rc<dyn MutationObserver>>>>>,
}

impl MutationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `observer` to mutations of `pid`. Subscribing twice is a no-op.
    pub fn add_mutation_observer(&self, pid: &Pid, observer: Rc<dyn MutationObserver>) {
        let mut observers = self.observers.borrow_mut();
        let list = observers.entry(pid.clone()).or_default();
        if !list.iter().any(|o| same_observer(o, &observer)) {
            list.push(observer);
        }
    }

    /// Unsubscribe `observer` from `pid`. Returns `true` if it was subscribed.
    pub fn remove_mutation_observer(&self, pid: &Pid, observer: &Rc<dyn MutationObserver>) -> bool {
        let mut observers = self.observers.borrow_mut();
        let Some(list) = observers.get_mut(pid) else {
            return false;
        };
        let before = list.len();
        list.retain(|o| !same_observer(o, observer));
        let removed = list.len() != before;
        if list.is_empty() {
            observers.remove(pid);
        }
        removed
    }

    /// Call every observer of `pid`.
    pub fn notify_mutation(&self, pid: &Pid) {
        let snapshot: Vec<Rc<dyn MutationObserver>> = match self.observers.borrow().get(pid) {
            Some(list) => list.clone(),
            None => return,
        };
        trace!(pid = %pid, observers = snapshot.len(), "notify mutation");
        for observer in snapshot {
            observer.on_did_mutate(pid);
        }
    }

    pub fn observer_count(&self, pid: &Pid) -> usize {
        self.observers.borrow().get(pid).map_or(0, Vec::len)
    }

    /// Number of pids with at least one observer.
    pub fn subscribed_pid_count(&self) -> usize {
        self.observers.borrow().len()
    }
}

fn same_observer(a: &Rc<dyn MutationObserver>, b: &Rc<dyn MutationObserver>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

impl std::fmt::Debug for MutationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationChannel")
            .field("subscribed", &self.subscribed_pid_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Counter {
        seen: Cell<usize>,
    }

    impl MutationObserver for Counter {
        fn on_did_mutate(&self, _pid: &Pid) {
            self.seen.set(self.seen.get() + 1);
        }
    }

    struct SelfRemoving {
        channel: MutationChannel,
        me: RefCell<Option<Rc<dyn MutationObserver>>>,
        seen: Cell<usize>,
    }

    impl MutationObserver for SelfRemoving {
        fn on_did_mutate(&self, pid: &Pid) {
            self.seen.set(self.seen.get() + 1);
            if let Some(me) = self.me.borrow().as_ref() {
                self.channel.remove_mutation_observer(pid, me);
            }
        }
    }

    #[test]
    fn test_notify_subscribed_only() {
        let channel = MutationChannel::new();
        let a = Pid::new("a").unwrap();
        let b = Pid::new("b").unwrap();
        let counter = Rc::new(Counter::default());
        channel.add_mutation_observer(&a, counter.clone());
        channel.add_mutation_observer(&a, counter.clone());

        channel.notify_mutation(&a);
        channel.notify_mutation(&b);
        assert_eq!(counter.seen.get(), 1);
        assert_eq!(channel.observer_count(&a), 1);
    }

    #[test]
    fn test_remove_observer() {
        let channel = MutationChannel::new();
        let pid = Pid::new("a").unwrap();
        let counter = Rc::new(Counter::default());
        let observer: Rc<dyn MutationObserver> = counter.clone();
        channel.add_mutation_observer(&pid, observer.clone());

        assert!(channel.remove_mutation_observer(&pid, &observer));
        assert!(!channel.remove_mutation_observer(&pid, &observer));
        channel.notify_mutation(&pid);
        assert_eq!(counter.seen.get(), 0);
        assert_eq!(channel.subscribed_pid_count(), 0);
    }

    #[test]
    fn test_unsubscribe_during_dispatch() {
        let channel = MutationChannel::new();
        let pid = Pid::new("a").unwrap();
        let observer = Rc::new(SelfRemoving {
            channel: channel.clone(),
            me: RefCell::new(None),
            seen: Cell::new(0),
        });
        let as_dyn: Rc<dyn MutationObserver> = observer.clone();
        *observer.me.borrow_mut() = Some(as_dyn.clone());
        channel.add_mutation_observer(&pid, as_dyn);

        channel.notify_mutation(&pid);
        channel.notify_mutation(&pid);
        assert_eq!(observer.seen.get(), 1);
        observer.me.borrow_mut().take();
    }
}
