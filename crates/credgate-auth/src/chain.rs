//! Provider chains
//!
//! This module provides chaining for credential providers, allowing a
//! server to consult several stores in order (e.g. a local bootstrap store
//! in front of a shared credentials file).

use std::sync::Arc;
use std::time::Instant;

use crate::credential::Credential;
use crate::error::{ProviderError, ProviderResult};
use crate::invalidation::{InvalidationRegistry, Registration};
use crate::provider::{CredentialProvider, ensure_before};

/// Chain of credential providers (first provider that knows the user wins).
///
/// A store failure in any consulted provider fails the whole lookup; the
/// chain never falls through to a later provider after an error, since
/// that could resolve a user the failing store would have rejected.
///
/// Invalidation notifications from every member are relayed through the
/// chain's own registry.
pub struct ProviderChain {
    providers: Vec<Arc<dyn CredentialProvider>>,
    invalidation: Arc<InvalidationRegistry>,
    subscriptions: Vec<(usize, Registration)>,
}

impl ProviderChain {
    /// Create a new empty provider chain
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            invalidation: Arc::new(InvalidationRegistry::new()),
            subscriptions: Vec::new(),
        }
    }

    /// Add a provider to the chain
    pub fn add<P: CredentialProvider + 'static>(&mut self, provider: P) -> &mut Self {
        self.add_arc(Arc::new(provider))
    }

    /// Add a provider wrapped in Arc
    pub fn add_arc(&mut self, provider: Arc<dyn CredentialProvider>) -> &mut Self {
        if let Some(source) = provider.invalidation_source() {
            let registration = source.register(self.invalidation.clone());
            self.subscriptions.push((self.providers.len(), registration));
        }
        self.providers.push(provider);
        self
    }

    /// Check if chain is empty
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Get the number of providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    fn lookup<T>(
        &self,
        deadline: Option<Instant>,
        mut probe: impl FnMut(&dyn CredentialProvider) -> ProviderResult<Option<T>>,
    ) -> ProviderResult<Option<T>> {
        if self.providers.is_empty() {
            return Err(ProviderError::Config(
                "No credential providers configured".to_string(),
            ));
        }

        for provider in &self.providers {
            if let Some(deadline) = deadline {
                ensure_before(deadline)?;
            }
            match probe(provider.as_ref()) {
                Ok(Some(found)) => {
                    tracing::debug!("Resolved user via provider: {}", provider.name());
                    return Ok(Some(found));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Credential provider {} failed: {}", provider.name(), e);
                    return Err(e);
                }
            }
        }

        Ok(None)
    }
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProviderChain {
    fn drop(&mut self) {
        for (index, registration) in self.subscriptions.drain(..) {
            if let Some(source) = self.providers[index].invalidation_source() {
                source.unregister(registration);
            }
        }
    }
}

impl CredentialProvider for ProviderChain {
    fn name(&self) -> &str {
        "chain"
    }

    fn check_username(&self, username: &str) -> ProviderResult<bool> {
        self.lookup(None, |p| Ok(p.check_username(username)?.then_some(())))
            .map(|found| found.is_some())
    }

    fn get_credential(&self, username: &str) -> ProviderResult<Option<Credential>> {
        self.lookup(None, |p| p.get_credential(username))
    }

    fn check_username_before(&self, username: &str, deadline: Instant) -> ProviderResult<bool> {
        self.lookup(Some(deadline), |p| {
            Ok(p.check_username_before(username, deadline)?.then_some(()))
        })
        .map(|found| found.is_some())
    }

    fn get_credential_before(
        &self,
        username: &str,
        deadline: Instant,
    ) -> ProviderResult<Option<Credential>> {
        self.lookup(Some(deadline), |p| p.get_credential_before(username, deadline))
    }

    fn invalidation_source(&self) -> Option<&InvalidationRegistry> {
        (!self.subscriptions.is_empty()).then_some(&*self.invalidation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::tests::RecordingInvalidator;
    use crate::store::InMemoryProvider;
    use std::time::Duration;

    struct FailingProvider;

    impl CredentialProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn check_username(&self, _username: &str) -> ProviderResult<bool> {
            Err(ProviderError::Unavailable("directory unreachable".to_string()))
        }

        fn get_credential(&self, _username: &str) -> ProviderResult<Option<Credential>> {
            Err(ProviderError::Unavailable("directory unreachable".to_string()))
        }
    }

    #[test]
    fn test_first_match_wins() {
        let mut chain = ProviderChain::new();
        chain.add(InMemoryProvider::with_users([("alice", "first")]));
        chain.add(InMemoryProvider::with_users([("alice", "second"), ("bob", "b")]));

        assert_eq!(chain.len(), 2);
        let alice = chain.get_credential("alice").unwrap().unwrap();
        assert_eq!(alice.expose(), "first");
        let bob = chain.get_credential("bob").unwrap().unwrap();
        assert_eq!(bob.expose(), "b");
        assert!(chain.check_username("bob").unwrap());
        assert!(!chain.check_username("carol").unwrap());
        assert!(chain.get_credential("carol").unwrap().is_none());
    }

    #[test]
    fn test_empty_chain_is_config_error() {
        let chain = ProviderChain::new();
        assert!(chain.is_empty());
        assert!(matches!(
            chain.check_username("alice"),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn test_failure_is_not_skipped() {
        let mut chain = ProviderChain::new();
        chain.add(FailingProvider);
        chain.add(InMemoryProvider::with_users([("alice", "pw")]));

        assert!(matches!(
            chain.get_credential("alice"),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn test_failure_after_match_is_not_reached() {
        let mut chain = ProviderChain::new();
        chain.add(InMemoryProvider::with_users([("alice", "pw")]));
        chain.add(FailingProvider);

        assert!(chain.check_username("alice").unwrap());
        assert!(chain.check_username("bob").is_err());
    }

    #[test]
    fn test_deadline_passed() {
        let mut chain = ProviderChain::new();
        chain.add(InMemoryProvider::with_users([("alice", "pw")]));

        let result = chain.get_credential_before("alice", Instant::now());
        assert!(matches!(result, Err(ProviderError::Timeout)));

        let later = Instant::now() + Duration::from_secs(5);
        assert!(chain.check_username_before("alice", later).unwrap());
    }

    #[test]
    fn test_relays_invalidation() {
        let inner = Arc::new(InMemoryProvider::with_users([("bob", "old")]));
        let mut chain = ProviderChain::new();
        chain.add_arc(inner.clone());

        let listener = Arc::new(RecordingInvalidator::default());
        chain
            .invalidation_source()
            .unwrap()
            .register(listener.clone());

        inner.add_user("bob", "new");
        assert_eq!(listener.users(), vec!["bob"]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let inner = Arc::new(InMemoryProvider::new());
        {
            let mut chain = ProviderChain::new();
            chain.add_arc(inner.clone());
            assert_eq!(inner.invalidation_source().unwrap().listener_count(), 1);
        }
        assert_eq!(inner.invalidation_source().unwrap().listener_count(), 0);
    }

    #[test]
    fn test_static_members_have_no_source() {
        let mut chain = ProviderChain::new();
        chain.add(FailingProvider);
        assert!(chain.invalidation_source().is_none());
    }
}
