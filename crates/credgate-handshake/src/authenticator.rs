//! Handshake authenticator
//!
//! Drives `caching_sha2_password`-style authentication against a
//! [`CredentialProvider`]: full authentication reads the credential and
//! populates the [`DerivedSecretCache`], fast authentication checks a
//! client proof against the cache only.
//!
//! On construction the authenticator subscribes its cache to the
//! provider's invalidation source, so a provider that can change its
//! credentials cannot be wired to a server that keeps stale secrets.

use credgate_auth::{
    CacheInvalidator, CredentialProvider, ProviderError, ProviderResult, Registration,
};
use credgate_common::Config;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::DerivedSecretCache;
use crate::scramble::{stage2_digest, verify_fast};

/// Result of one authentication attempt.
///
/// Store failures surface as `Denied`; their detail is logged, never
/// returned to the connecting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Denied,
    /// No cached secret for fast auth; the client must send its password
    FullAuthRequired,
}

/// Server-side authentication layer over a credential provider
pub struct Authenticator {
    provider: Arc<dyn CredentialProvider>,
    cache: Arc<DerivedSecretCache>,
    subscription: Option<Registration>,
    lookup_timeout: Duration,
}

impl Authenticator {
    /// Create an authenticator and subscribe `cache` to `provider`'s changes
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        cache: Arc<DerivedSecretCache>,
        lookup_timeout: Duration,
    ) -> Self {
        let subscription = provider
            .invalidation_source()
            .map(|source| source.register(cache.clone()));

        if subscription.is_none() {
            tracing::debug!(
                "Provider {} has no invalidation source; cached secrets are only dropped by TTL, eviction or invalidate_cache",
                provider.name()
            );
        }

        Self {
            provider,
            cache,
            subscription,
            lookup_timeout,
        }
    }

    /// Create an authenticator with cache and timeout settings from `config`
    pub fn from_config(provider: Arc<dyn CredentialProvider>, config: &Config) -> Self {
        let cache = Arc::new(DerivedSecretCache::from_config(&config.cache));
        Self::new(provider, cache, config.provider.lookup_timeout())
    }

    pub fn cache(&self) -> &Arc<DerivedSecretCache> {
        &self.cache
    }

    /// Whether the cache receives the provider's change notifications
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.lookup_timeout
    }

    // Outages are expected to clear on their own; anything else needs an operator
    fn log_lookup_failure(&self, username: &str, error: &ProviderError) {
        if error.is_transient() {
            tracing::warn!(
                "Credential lookup for {} via {} failed: {}",
                username,
                self.provider.name(),
                error
            );
        } else {
            tracing::error!(
                "Credential store {} is unusable (user {}): {}",
                self.provider.name(),
                username,
                error
            );
        }
    }

    /// Check whether `username` exists, bounded by the lookup timeout
    pub fn check_user(&self, username: &str) -> ProviderResult<bool> {
        self.provider
            .check_username_before(username, self.deadline())
            .inspect_err(|e| self.log_lookup_failure(username, e))
    }

    /// Authenticate with the cleartext password and cache its derived secret
    pub fn authenticate_full(&self, username: &str, host: &str, password: &str) -> AuthOutcome {
        let generation = self.cache.generation();

        let credential = match self.provider.get_credential_before(username, self.deadline()) {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                tracing::debug!("Unknown user {}@{}", username, host);
                return AuthOutcome::Denied;
            }
            Err(e) => {
                self.log_lookup_failure(username, &e);
                return AuthOutcome::Denied;
            }
        };

        if !credential.matches(password) {
            tracing::debug!("Password mismatch for {}@{}", username, host);
            return AuthOutcome::Denied;
        }

        self.cache.insert(
            username,
            host,
            stage2_digest(credential.as_bytes()),
            generation,
        );
        tracing::debug!("Full auth succeeded for {}@{}", username, host);
        AuthOutcome::Accepted
    }

    /// Authenticate with a fast-auth proof against the cached secret
    pub fn authenticate_fast(
        &self,
        username: &str,
        host: &str,
        nonce: &[u8],
        response: &[u8],
    ) -> AuthOutcome {
        let Some(stage2) = self.cache.get(username, host) else {
            return AuthOutcome::FullAuthRequired;
        };

        match verify_fast(&stage2, nonce, response) {
            Ok(true) => {
                tracing::debug!("Fast auth succeeded for {}@{}", username, host);
                AuthOutcome::Accepted
            }
            Ok(false) => {
                tracing::debug!("Fast auth proof mismatch for {}@{}", username, host);
                AuthOutcome::Denied
            }
            Err(e) => {
                tracing::warn!("Rejected fast auth for {}@{}: {}", username, host, e);
                AuthOutcome::Denied
            }
        }
    }

    /// Explicit invalidation entry point.
    ///
    /// Operators whose provider has no invalidation source must call this
    /// after changing a credential. `host = None` drops every cached secret
    /// for the user.
    pub fn invalidate_cache(&self, username: &str, host: Option<&str>) {
        match host {
            Some(host) => self.cache.invalidate_key(username, host),
            None => self.cache.invalidate(username),
        }
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        if let (Some(registration), Some(source)) =
            (self.subscription.take(), self.provider.invalidation_source())
        {
            source.unregister(registration);
        }
    }
}
