//! Cache invalidation channel
//!
//! Authentication methods such as `caching_sha2_password` keep a secret
//! derived from the user's password on the server side. When a credential
//! changes in a store the server does not control, that derived secret is
//! stale: the server would keep accepting the old password (stale-accept)
//! or reject the new one (stale-reject) until the entry happens to expire.
//!
//! Providers whose data can change outside the server expose an
//! [`InvalidationRegistry`] through
//! [`CredentialProvider::invalidation_source`](crate::CredentialProvider::invalidation_source).
//! The server registers its cache as a [`CacheInvalidator`] and the
//! provider calls [`InvalidationRegistry::notify`] for every username whose
//! credential changed, before the mutating call returns.
//!
//! Granularity is per username: `notify` purges every derived entry for the
//! user. [`CacheInvalidator::invalidate_key`] exists for callers that know
//! the exact cache key (e.g. the client host) and want a targeted purge.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The server-side invalidation entry point
pub trait CacheInvalidator: Send + Sync {
    /// Drop every derived entry cached for `username`
    fn invalidate(&self, username: &str);

    /// Drop the single entry cached for `username` under `cache_key`.
    ///
    /// Caches that do not partition by key fall back to whole-user
    /// invalidation.
    fn invalidate_key(&self, username: &str, cache_key: &str) {
        let _ = cache_key;
        self.invalidate(username);
    }
}

/// Handle returned by [`InvalidationRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

/// Fan-out list of invalidators interested in one provider's changes.
///
/// The registry is itself a [`CacheInvalidator`], so a decorator or chain
/// can register its own registry with an inner provider to relay
/// notifications upward.
pub struct InvalidationRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(Registration, Arc<dyn CacheInvalidator>)>>,
    notifications: AtomicU64,
}

impl Default for InvalidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
            notifications: AtomicU64::new(0),
        }
    }

    /// Subscribe an invalidator to this provider's credential changes
    pub fn register(&self, listener: Arc<dyn CacheInvalidator>) -> Registration {
        let id = Registration(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        tracing::debug!("Registered cache invalidator {:?}", id);
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unregister(&self, registration: Registration) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != registration);
        before != listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Total number of notifications sent through this registry
    pub fn notification_count(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Tell every listener that `username`'s credential changed
    pub fn notify(&self, username: &str) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        for listener in self.snapshot() {
            listener.invalidate(username);
        }
    }

    /// Tell every listener that one derived entry for `username` is stale
    pub fn notify_key(&self, username: &str, cache_key: &str) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        for listener in self.snapshot() {
            listener.invalidate_key(username, cache_key);
        }
    }

    // Listeners run outside the lock so they may re-enter the registry.
    fn snapshot(&self) -> Vec<Arc<dyn CacheInvalidator>> {
        self.listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl CacheInvalidator for InvalidationRegistry {
    fn invalidate(&self, username: &str) {
        self.notify(username);
    }

    fn invalidate_key(&self, username: &str, cache_key: &str) {
        self.notify_key(username, cache_key);
    }
}

impl std::fmt::Debug for InvalidationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationRegistry")
            .field("listeners", &self.listener_count())
            .field("notifications", &self.notification_count())
            .finish()
    }
}
