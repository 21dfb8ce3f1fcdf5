// Listener registry - copy-on-write list of weakly held listeners

use crate::port::JobManagerListener;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Registered listeners, replaced wholesale on every (un)registration.
///
/// Dispatch iterates an upgraded snapshot, so registering or unregistering
/// from inside a callback never touches the list being iterated.
#[derive(Default)]
pub(super) struct ListenerRegistry {
    entries: RwLock<Arc<Vec<Weak<dyn JobManagerListener>>>>,
}

fn address(listener: &Weak<dyn JobManagerListener>) -> *const () {
    listener.as_ptr() as *const ()
}

impl ListenerRegistry {
    /// Returns false when the listener was already registered
    pub(super) fn add(&self, listener: Weak<dyn JobManagerListener>) -> bool {
        let mut entries = self.entries.write();
        let target = address(&listener);
        if entries.iter().any(|entry| address(entry) == target) {
            return false;
        }
        let mut next: Vec<_> = entries
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .cloned()
            .collect();
        next.push(listener);
        *entries = Arc::new(next);
        true
    }

    /// Returns false when no listener lives at `target`
    pub(super) fn remove(&self, target: *const ()) -> bool {
        let mut entries = self.entries.write();
        let removed = entries
            .iter()
            .any(|entry| address(entry) == target && entry.strong_count() > 0);
        let next: Vec<_> = entries
            .iter()
            .filter(|entry| address(entry) != target && entry.strong_count() > 0)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        removed
    }

    /// Live listeners at this instant; dropped ones are skipped
    pub(super) fn snapshot(&self) -> Vec<Arc<dyn JobManagerListener>> {
        let entries = Arc::clone(&self.entries.read());
        entries.iter().filter_map(Weak::upgrade).collect()
    }

    pub(super) fn len(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }
}
