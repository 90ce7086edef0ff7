//! Registry of non-owning subscribers.
//!
//! Subscribers are held as [`Weak`] references: registering never extends a
//! subscriber's lifetime, and entries whose subscriber has been dropped are
//! pruned on the next notification. The owner is still expected to call
//! [`ObserverRegistry::unregister`] on teardown.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

/// Handle returned by [`ObserverRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

struct Entry<T: ?Sized> {
    id: ObserverId,
    observer: Weak<T>,
}

struct RegistryInner<T: ?Sized> {
    next_id: u64,
    // Bumped on every unregister so delivery can tell when to re-read the ids
    removals: u64,
    entries: Vec<Entry<T>>,
}

/// Ordered set of weakly-held observers.
///
/// The lock is never held while an observer runs, so observers may register
/// or unregister (themselves or others) from inside a callback.
pub struct ObserverRegistry<T: ?Sized> {
    inner: Mutex<RegistryInner<T>>,
}

impl<T: ?Sized> ObserverRegistry<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 0,
                removals: 0,
                entries: Vec::new(),
            }),
        }
    }

    // A panicking observer never runs under the lock, so the data behind a
    // poisoned mutex is still consistent.
    fn lock(&self) -> MutexGuard<'_, RegistryInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an observer. Delivery order is registration order.
    pub fn register(&self, observer: Weak<T>) -> ObserverId {
        let mut inner = self.lock();
        let id = ObserverId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push(Entry { id, observer });
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        let removed = inner.entries.len() != before;
        if removed {
            inner.removals += 1;
        }
        removed
    }

    #[must_use]
    pub fn is_registered(&self, id: ObserverId) -> bool {
        self.lock().entries.iter().any(|e| e.id == id)
    }

    /// Number of registered observers that are still alive
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.observer.strong_count() > 0)
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to every observer registered when the call starts.
    ///
    /// Observers registered during delivery miss this event; observers
    /// unregistered during delivery are skipped if not yet reached.
    /// Returns the number of observers the event was delivered to.
    pub fn notify_all(&self, mut deliver: impl FnMut(&T)) -> usize {
        let (snapshot, mut seen_removals) = {
            let inner = self.lock();
            let snapshot: Vec<(ObserverId, Weak<T>)> = inner
                .entries
                .iter()
                .map(|e| (e.id, e.observer.clone()))
                .collect();
            (snapshot, inner.removals)
        };

        let mut delivered = 0;
        let mut dropped = Vec::new();
        // Ids still registered, refreshed only after a callback unregistered someone
        let mut live: Option<HashSet<ObserverId>> = None;

        for (id, weak) in snapshot {
            {
                let inner = self.lock();
                if inner.removals != seen_removals {
                    seen_removals = inner.removals;
                    live = Some(inner.entries.iter().map(|e| e.id).collect());
                }
            }
            if live.as_ref().is_some_and(|live| !live.contains(&id)) {
                continue;
            }
            match weak.upgrade() {
                Some(observer) => {
                    deliver(&observer);
                    delivered += 1;
                }
                None => dropped.push(id),
            }
        }

        if !dropped.is_empty() {
            self.lock().entries.retain(|e| !dropped.contains(&e.id));
        }

        delivered
    }
}

impl<T: ?Sized> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for ObserverRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("len", &self.len())
            .finish()
    }
}
