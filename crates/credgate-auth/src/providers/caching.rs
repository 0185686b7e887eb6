//! Lookup cache decorator
//!
//! Wraps a slow provider (remote directory, large file) with a TTL cache of
//! lookup answers. Positive and negative answers are cached; errors never
//! are. The decorator subscribes to the inner provider's invalidation
//! source, drops its own entry on every change and relays the notification
//! to whoever subscribed to the decorator.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::credential::Credential;
use crate::error::ProviderResult;
use crate::invalidation::{CacheInvalidator, InvalidationRegistry, Registration};
use crate::provider::{CredentialProvider, ensure_before};

/// Cached lookup answer
#[derive(Clone)]
struct CachedLookup {
    credential: Option<Credential>,
    cached_at: Instant,
}

/// Lookup cache statistics
#[derive(Debug, Default)]
pub struct LookupStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
}

struct LookupCache {
    entries: RwLock<HashMap<String, CachedLookup>>,
    /// Bumped under the entries lock on every invalidation; a lookup that
    /// started before a bump must not populate the cache.
    generation: AtomicU64,
    ttl: Duration,
    stats: LookupStats,
    relay: InvalidationRegistry,
}

impl LookupCache {
    fn get(&self, username: &str) -> Option<Option<Credential>> {
        let entries = self.entries.read();
        entries
            .get(username)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| entry.credential.clone())
    }

    fn insert(&self, username: &str, credential: Option<Credential>, generation: u64) {
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        entries.insert(
            username.to_string(),
            CachedLookup {
                credential,
                cached_at: Instant::now(),
            },
        );
    }

    fn remove(&self, username: &str) {
        let mut entries = self.entries.write();
        entries.remove(username);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
    }
}

impl CacheInvalidator for LookupCache {
    fn invalidate(&self, username: &str) {
        self.remove(username);
        self.relay.notify(username);
    }

    fn invalidate_key(&self, username: &str, cache_key: &str) {
        self.remove(username);
        self.relay.notify_key(username, cache_key);
    }
}

/// TTL lookup cache in front of another provider
pub struct CachingProvider<P: CredentialProvider> {
    inner: P,
    cache: Arc<LookupCache>,
    subscription: Option<Registration>,
}

impl<P: CredentialProvider> CachingProvider<P> {
    /// Wrap `inner`, keeping answers for at most `ttl`
    pub fn new(inner: P, ttl: Duration) -> Self {
        let cache = Arc::new(LookupCache {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl,
            stats: LookupStats::default(),
            relay: InvalidationRegistry::new(),
        });

        let subscription = inner
            .invalidation_source()
            .map(|source| source.register(cache.clone()));

        Self {
            inner,
            cache,
            subscription,
        }
    }

    /// Get a reference to the wrapped provider
    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn stats(&self) -> &LookupStats {
        &self.cache.stats
    }

    /// Number of cached answers, including expired ones not yet replaced
    pub fn len(&self) -> usize {
        self.cache.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached answer
    pub fn purge(&self) {
        let mut entries = self.cache.entries.write();
        entries.clear();
        self.cache.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn lookup(
        &self,
        username: &str,
        fetch: impl FnOnce(&P) -> ProviderResult<Option<Credential>>,
    ) -> ProviderResult<Option<Credential>> {
        if let Some(cached) = self.cache.get(username) {
            self.cache.stats.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Lookup cache hit for user {}", username);
            return Ok(cached);
        }

        self.cache.stats.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.cache.generation.load(Ordering::Acquire);
        let credential = fetch(&self.inner)?;
        self.cache.insert(username, credential.clone(), generation);
        Ok(credential)
    }
}

impl<P: CredentialProvider> Drop for CachingProvider<P> {
    fn drop(&mut self) {
        if let (Some(registration), Some(source)) =
            (self.subscription.take(), self.inner.invalidation_source())
        {
            source.unregister(registration);
        }
    }
}

impl<P: CredentialProvider> CredentialProvider for CachingProvider<P> {
    fn name(&self) -> &str {
        "caching"
    }

    fn check_username(&self, username: &str) -> ProviderResult<bool> {
        Ok(self.get_credential(username)?.is_some())
    }

    fn get_credential(&self, username: &str) -> ProviderResult<Option<Credential>> {
        self.lookup(username, |inner| inner.get_credential(username))
    }

    fn check_username_before(&self, username: &str, deadline: Instant) -> ProviderResult<bool> {
        Ok(self.get_credential_before(username, deadline)?.is_some())
    }

    fn get_credential_before(
        &self,
        username: &str,
        deadline: Instant,
    ) -> ProviderResult<Option<Credential>> {
        ensure_before(deadline)?;
        self.lookup(username, |inner| inner.get_credential_before(username, deadline))
    }

    fn invalidation_source(&self) -> Option<&InvalidationRegistry> {
        self.subscription.map(|_| &self.cache.relay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::invalidation::tests::RecordingInvalidator;
    use crate::store::InMemoryProvider;
    use std::sync::atomic::AtomicBool;

    /// Counts inner lookups and can be switched into failure mode
    struct CountingProvider {
        store: InMemoryProvider,
        calls: AtomicU64,
        failing: AtomicBool,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                store: InMemoryProvider::with_users([("alice", "pw")]),
                calls: AtomicU64::new(0),
                failing: AtomicBool::new(false),
            }
        }
    }

    impl CredentialProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn check_username(&self, username: &str) -> ProviderResult<bool> {
            Ok(self.get_credential(username)?.is_some())
        }

        fn get_credential(&self, username: &str) -> ProviderResult<Option<Credential>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(ProviderError::Unavailable("down".to_string()));
            }
            self.store.get_credential(username)
        }

        fn invalidation_source(&self) -> Option<&InvalidationRegistry> {
            self.store.invalidation_source()
        }
    }

    #[test]
    fn test_hits_after_first_lookup() {
        let provider = CachingProvider::new(CountingProvider::new(), Duration::from_secs(60));

        for _ in 0..3 {
            let cred = provider.get_credential("alice").unwrap().unwrap();
            assert_eq!(cred.expose(), "pw");
        }

        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.stats().hits.load(Ordering::Relaxed), 2);
        assert_eq!(provider.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_negative_answers_cached() {
        let provider = CachingProvider::new(CountingProvider::new(), Duration::from_secs(60));
        assert!(!provider.check_username("ghost").unwrap());
        assert!(!provider.check_username("ghost").unwrap());
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_miss_dropped_when_user_added() {
        let store = Arc::new(InMemoryProvider::new());
        let provider = CachingProvider::new(store.clone(), Duration::from_secs(60));

        assert!(!provider.check_username("bob").unwrap());
        assert_eq!(provider.len(), 1);

        store.add_user("bob", "pw");

        assert!(provider.check_username("bob").unwrap());
        let cred = provider.get_credential("bob").unwrap().unwrap();
        assert_eq!(cred.expose(), "pw");
    }

    #[test]
    fn test_cached_miss_dropped_when_file_adds_user() {
        use crate::providers::file::{FileProvider, UserRecord, write_credentials};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let record = |username: &str| UserRecord {
            username: username.to_string(),
            password: Credential::new("pw"),
        };
        write_credentials(&path, &[record("alice")]).unwrap();

        let file = Arc::new(FileProvider::open(&path).unwrap());
        let provider = CachingProvider::new(file.clone(), Duration::from_secs(60));
        assert!(provider.get_credential("dave").unwrap().is_none());

        write_credentials(&path, &[record("alice"), record("dave")]).unwrap();
        let summary = file.reload().unwrap();
        assert_eq!(summary.added, vec!["dave"]);

        assert!(provider.get_credential("dave").unwrap().is_some());
        assert!(provider.check_username("dave").unwrap());
    }

    #[test]
    fn test_errors_not_cached() {
        let provider = CachingProvider::new(CountingProvider::new(), Duration::from_secs(60));
        provider.inner().failing.store(true, Ordering::SeqCst);
        assert!(provider.get_credential("alice").is_err());
        assert!(provider.is_empty());

        provider.inner().failing.store(false, Ordering::SeqCst);
        assert!(provider.get_credential("alice").unwrap().is_some());
        assert_eq!(provider.len(), 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let provider = CachingProvider::new(CountingProvider::new(), Duration::from_millis(1));
        provider.get_credential("alice").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        provider.get_credential("alice").unwrap();
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_inner_change_purges_and_relays() {
        let provider = CachingProvider::new(CountingProvider::new(), Duration::from_secs(60));
        let listener = Arc::new(RecordingInvalidator::default());
        provider
            .invalidation_source()
            .unwrap()
            .register(listener.clone());

        assert_eq!(provider.get_credential("alice").unwrap().unwrap().expose(), "pw");

        provider.inner().store.add_user("alice", "rotated");

        assert_eq!(listener.users(), vec!["alice"]);
        let cred = provider.get_credential("alice").unwrap().unwrap();
        assert_eq!(cred.expose(), "rotated");
        assert_eq!(provider.stats().invalidations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_purge() {
        let provider = CachingProvider::new(CountingProvider::new(), Duration::from_secs(60));
        provider.get_credential("alice").unwrap();
        provider.purge();
        assert!(provider.is_empty());
        provider.get_credential("alice").unwrap();
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_deadline_checked_before_cache() {
        let provider = CachingProvider::new(CountingProvider::new(), Duration::from_secs(60));
        provider.get_credential("alice").unwrap();
        assert!(matches!(
            provider.get_credential_before("alice", Instant::now()),
            Err(ProviderError::Timeout)
        ));
    }

    #[test]
    fn test_wraps_shared_provider() {
        let shared: Arc<dyn CredentialProvider> =
            Arc::new(InMemoryProvider::with_users([("bob", "b")]));
        let provider = CachingProvider::new(shared.clone(), Duration::from_secs(60));
        assert!(provider.check_username("bob").unwrap());
        assert_eq!(shared.invalidation_source().unwrap().listener_count(), 1);
        drop(provider);
        assert_eq!(shared.invalidation_source().unwrap().listener_count(), 0);
    }
}
