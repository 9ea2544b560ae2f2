//! One-to-many listener registry.
//!
//! The registry only keeps [`Weak`] handles: registering never extends a
//! listener's lifetime, and listeners that have been dropped are pruned the
//! next time the registry is touched. Dispatch works on a snapshot of the
//! live listeners, so a listener may register or unregister (itself or
//! others) from inside a callback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ListenerRegistry<L: ?Sized> {
    listeners: Mutex<Vec<Weak<L>>>,
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener. Registering the same listener twice is a no-op.
    pub fn register(&self, listener: Weak<L>) {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|l| l.strong_count() > 0);
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Removes a listener. Unknown listeners are ignored.
    pub fn unregister(&self, listener: &Weak<L>) {
        lock(&self.listeners).retain(|l| l.strong_count() > 0 && !same_listener(l, listener));
    }

    pub fn contains(&self, listener: &Weak<L>) -> bool {
        lock(&self.listeners).iter().any(|l| same_listener(l, listener))
    }

    pub fn len(&self) -> usize {
        lock(&self.listeners).iter().filter(|l| l.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes `f` on every live listener.
    pub fn notify<F>(&self, mut f: F)
    where
        F: FnMut(&L),
    {
        for listener in self.snapshot() {
            f(&listener);
        }
    }

    fn snapshot(&self) -> Vec<Arc<L>> {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

fn same_listener<L: ?Sized>(a: &Weak<L>, b: &Weak<L>) -> bool {
    std::ptr::addr_eq(a.as_ptr(), b.as_ptr())
}
