//! Thread-safe listener registration with snapshot iteration.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::decode::PlayerEvent;

/// An application-supplied handler for decoded player events.
///
/// `notify` is only ever invoked on the dispatch pump thread, strictly
/// serialized: no two invocations for the same bridge overlap. A listener may
/// therefore query player state from inside the callback and get a consistent
/// answer. Panics are caught, logged and skipped by the pump.
pub trait PlayerEventListener: Send + Sync {
    /// React to one decoded event.
    fn notify(&self, event: &PlayerEvent);
}

/// Token identifying one registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    listener: Arc<dyn PlayerEventListener>,
}

/// Thread-safe add/remove of listeners with atomic snapshot iteration.
///
/// Snapshots preserve registration order. Removing a listener affects future
/// snapshots only; an in-flight delivery using an older snapshot is not
/// interrupted.
pub struct ListenerRegistry {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener, returning its removal token.
    pub fn add(&self, listener: Arc<dyn PlayerEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Entry { id, listener });
        id
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Take an ordered snapshot of the current listener set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn PlayerEventListener>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|e| Arc::clone(&e.listener))
            .collect()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Whether no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl PlayerEventListener for Recorder {
        fn notify(&self, _event: &PlayerEvent) {
            self.seen.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            registry.add(Arc::new(Recorder {
                tag,
                seen: Arc::clone(&seen),
            }));
        }

        for listener in registry.snapshot() {
            listener.notify(&PlayerEvent::Playing);
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_affects_future_snapshots_only() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let id = registry.add(Arc::new(Recorder {
            tag: "a",
            seen: Arc::clone(&seen),
        }));

        let old = registry.snapshot();
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());

        // The older snapshot still holds the listener.
        assert_eq!(old.len(), 1);
    }
}
