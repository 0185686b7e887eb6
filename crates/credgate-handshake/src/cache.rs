//! Derived-secret cache
//!
//! Holds `SHA256(SHA256(password))` per (user, host) after a successful full
//! authentication so later connections can use fast auth. An entry moves
//! `ABSENT -> CACHED` on insert and back to `ABSENT` on invalidation, TTL
//! expiry or eviction.
//!
//! The cache is the server's [`CacheInvalidator`]: credential providers
//! call into it whenever a user's credential changes.

use credgate_auth::CacheInvalidator;
use credgate_common::CacheConfig;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::scramble::Digest32;

/// Individual cache entry
struct CachedSecret {
    stage2: Digest32,
    cached_at: Instant,
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses (including expired entries)
    pub misses: AtomicU64,
    /// Number of invalidation calls received
    pub invalidations: AtomicU64,
    /// Number of entries evicted to stay under capacity
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

#[derive(Default)]
struct Entries {
    /// username -> host -> secret
    users: HashMap<String, HashMap<String, CachedSecret>>,
    total: usize,
    /// (user, host, cached_at) in insertion order. Records whose entry was
    /// removed or overwritten are skipped when popped.
    order: VecDeque<(String, String, Instant)>,
}

impl Entries {
    fn insert(&mut self, username: &str, host: &str, secret: CachedSecret) {
        self.order
            .push_back((username.to_string(), host.to_string(), secret.cached_at));
        let previous = self
            .users
            .entry(username.to_string())
            .or_default()
            .insert(host.to_string(), secret);
        if previous.is_none() {
            self.total += 1;
        }
        if self.order.len() > self.total * 2 + 64 {
            self.compact();
        }
    }

    fn is_live(&self, username: &str, host: &str, cached_at: Instant) -> bool {
        self.users
            .get(username)
            .and_then(|hosts| hosts.get(host))
            .is_some_and(|secret| secret.cached_at == cached_at)
    }

    fn compact(&mut self) {
        let mut order = std::mem::take(&mut self.order);
        order.retain(|(user, host, cached_at)| self.is_live(user, host, *cached_at));
        self.order = order;
    }

    fn remove_user(&mut self, username: &str) -> usize {
        let removed = self.users.remove(username).map_or(0, |hosts| hosts.len());
        self.total -= removed;
        removed
    }

    fn remove_key(&mut self, username: &str, host: &str) -> bool {
        let Some(hosts) = self.users.get_mut(username) else {
            return false;
        };
        let removed = hosts.remove(host).is_some();
        if hosts.is_empty() {
            self.users.remove(username);
        }
        if removed {
            self.total -= 1;
        }
        removed
    }

    /// Evict the oldest live entry; false if the cache is empty
    fn evict_oldest(&mut self) -> bool {
        while let Some((user, host, cached_at)) = self.order.pop_front() {
            if self.is_live(&user, &host, cached_at) {
                self.remove_key(&user, &host);
                return true;
            }
        }
        false
    }

    /// Evict entries older than `ttl` from the front of the queue
    fn evict_expired(&mut self, ttl: Duration) -> usize {
        let mut evicted = 0;
        while let Some((user, host, cached_at)) = self.order.front() {
            if cached_at.elapsed() < ttl {
                break;
            }
            let (user, host, cached_at) = (user.clone(), host.clone(), *cached_at);
            self.order.pop_front();
            if self.is_live(&user, &host, cached_at) {
                self.remove_key(&user, &host);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Server-side cache of secrets derived from user credentials
pub struct DerivedSecretCache {
    entries: RwLock<Entries>,
    /// Bumped under the entries lock on every invalidation; an insert
    /// carrying an older generation is dropped.
    generation: AtomicU64,
    max_entries: usize,
    ttl: Option<Duration>,
    stats: CacheStats,
}

impl DerivedSecretCache {
    /// Create a cache bounded to `max_entries`, with optional entry TTL
    pub fn new(max_entries: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            generation: AtomicU64::new(0),
            max_entries: max_entries.max(1),
            ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl())
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Current invalidation generation; pass it to [`insert`](Self::insert)
    /// after deriving a secret from a credential read later than this call
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Look up the cached secret for `username` connecting from `host`
    pub fn get(&self, username: &str, host: &str) -> Option<Digest32> {
        let entries = self.entries.read();
        let found = entries
            .users
            .get(username)
            .and_then(|hosts| hosts.get(host))
            .filter(|secret| self.ttl.is_none_or(|ttl| secret.cached_at.elapsed() < ttl))
            .map(|secret| secret.stage2);

        if found.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Cache `stage2` for (`username`, `host`).
    ///
    /// Returns false without caching if any invalidation happened since
    /// `generation` was read, since the credential the secret was derived
    /// from may already be stale.
    pub fn insert(&self, username: &str, host: &str, stage2: Digest32, generation: u64) -> bool {
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::Acquire) != generation {
            tracing::debug!(
                "Skipping cache insert for user {}: invalidated during lookup",
                username
            );
            return false;
        }

        let is_new = !entries
            .users
            .get(username)
            .is_some_and(|hosts| hosts.contains_key(host));

        if is_new && entries.total >= self.max_entries {
            self.make_room(&mut entries);
        }

        entries.insert(
            username,
            host,
            CachedSecret {
                stage2,
                cached_at: Instant::now(),
            },
        );
        true
    }

    fn make_room(&self, entries: &mut Entries) {
        if let Some(ttl) = self.ttl {
            let expired = entries.evict_expired(ttl);
            self.stats
                .evictions
                .fetch_add(expired as u64, Ordering::Relaxed);
        }
        while entries.total >= self.max_entries && entries.evict_oldest() {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether any secret is cached for `username`
    pub fn is_cached(&self, username: &str) -> bool {
        self.entries.read().users.contains_key(username)
    }

    /// Drop every entry for `username`; returns how many were removed
    pub fn remove_user(&self, username: &str) -> usize {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.remove_user(username)
    }

    /// Drop the entry for (`username`, `host`)
    pub fn remove_key(&self, username: &str, host: &str) -> bool {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.remove_key(username, host)
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *entries = Entries::default();
    }

    /// Number of cached (user, host) entries
    pub fn len(&self) -> usize {
        self.entries.read().total
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheInvalidator for DerivedSecretCache {
    fn invalidate(&self, username: &str) {
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        let removed = self.remove_user(username);
        tracing::debug!(
            "Invalidated {} cached secrets for user {}",
            removed,
            username
        );
    }

    fn invalidate_key(&self, username: &str, cache_key: &str) {
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        if self.remove_key(username, cache_key) {
            tracing::debug!("Invalidated cached secret for {}@{}", username, cache_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scramble::stage2_digest;

    fn insert(cache: &DerivedSecretCache, user: &str, host: &str, password: &str) -> bool {
        cache.insert(user, host, stage2_digest(password.as_bytes()), cache.generation())
    }

    #[test]
    fn test_absent_then_cached() {
        let cache = DerivedSecretCache::new(16, None);
        assert!(cache.get("bob", "10.0.0.1").is_none());
        assert!(!cache.is_cached("bob"));

        assert!(insert(&cache, "bob", "10.0.0.1", "pw"));

        assert_eq!(cache.get("bob", "10.0.0.1"), Some(stage2_digest(b"pw")));
        assert!(cache.get("bob", "10.0.0.2").is_none());
        assert!(cache.is_cached("bob"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_drops_all_hosts() {
        let cache = DerivedSecretCache::new(16, None);
        insert(&cache, "bob", "10.0.0.1", "pw");
        insert(&cache, "bob", "10.0.0.2", "pw");
        insert(&cache, "alice", "10.0.0.1", "pw");

        cache.invalidate("bob");

        assert!(!cache.is_cached("bob"));
        assert!(cache.is_cached("alice"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().invalidations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_invalidate_key_drops_one_host() {
        let cache = DerivedSecretCache::new(16, None);
        insert(&cache, "bob", "10.0.0.1", "pw");
        insert(&cache, "bob", "10.0.0.2", "pw");

        cache.invalidate_key("bob", "10.0.0.1");

        assert!(cache.get("bob", "10.0.0.1").is_none());
        assert!(cache.get("bob", "10.0.0.2").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stale_generation_rejected() {
        let cache = DerivedSecretCache::new(16, None);
        let generation = cache.generation();

        // Credential changes while the handshake is still deriving
        cache.invalidate("bob");

        assert!(!cache.insert("bob", "h", stage2_digest(b"old"), generation));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = DerivedSecretCache::new(16, Some(Duration::from_millis(1)));
        insert(&cache, "bob", "h", "pw");
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get("bob", "h").is_none());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let cache = DerivedSecretCache::new(2, None);
        insert(&cache, "a", "h", "1");
        std::thread::sleep(Duration::from_millis(2));
        insert(&cache, "b", "h", "2");
        std::thread::sleep(Duration::from_millis(2));
        insert(&cache, "c", "h", "3");

        assert_eq!(cache.len(), 2);
        assert!(!cache.is_cached("a"));
        assert!(cache.is_cached("b"));
        assert!(cache.is_cached("c"));
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let cache = DerivedSecretCache::new(2, None);
        insert(&cache, "a", "h", "1");
        insert(&cache, "a", "h", "2");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a", "h"), Some(stage2_digest(b"2")));
    }

    #[test]
    fn test_overwrite_refreshes_eviction_order() {
        let cache = DerivedSecretCache::new(2, None);
        insert(&cache, "a", "h", "1");
        std::thread::sleep(Duration::from_millis(2));
        insert(&cache, "b", "h", "2");
        std::thread::sleep(Duration::from_millis(2));
        insert(&cache, "a", "h", "1");
        insert(&cache, "c", "h", "3");

        assert!(cache.is_cached("a"));
        assert!(!cache.is_cached("b"));
        assert!(cache.is_cached("c"));
    }

    #[test]
    fn test_expired_entries_evicted_first() {
        let cache = DerivedSecretCache::new(3, Some(Duration::from_millis(5)));
        insert(&cache, "a", "h", "1");
        insert(&cache, "b", "h", "2");
        std::thread::sleep(Duration::from_millis(10));
        insert(&cache, "c", "h", "3");
        insert(&cache, "d", "h", "4");

        assert_eq!(cache.len(), 2);
        assert!(cache.is_cached("c"));
        assert!(cache.is_cached("d"));
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_eviction_queue_stays_bounded() {
        let cache = DerivedSecretCache::new(8, None);
        for i in 0..1000 {
            insert(&cache, "churn", "h", &i.to_string());
            cache.invalidate("churn");
        }
        insert(&cache, "kept", "h", "pw");

        let entries = cache.entries.read();
        assert!(entries.order.len() <= entries.total * 2 + 65);
        assert_eq!(entries.total, 1);
    }

    #[test]
    fn test_hit_ratio() {
        let cache = DerivedSecretCache::new(16, None);
        assert_eq!(cache.stats().hit_ratio(), 0.0);
        insert(&cache, "a", "h", "1");
        cache.get("a", "h");
        cache.get("b", "h");
        assert!((cache.stats().hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear() {
        let cache = DerivedSecretCache::new(16, None);
        insert(&cache, "a", "h", "1");
        insert(&cache, "b", "h", "2");
        cache.clear();
        assert!(cache.is_empty());
    }
}
