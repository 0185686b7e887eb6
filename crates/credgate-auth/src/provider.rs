//! Pluggable credential provider trait
//!
//! This module defines the abstraction the server's authentication layer
//! depends on to answer "does this user exist" and "what is this user's
//! credential", independent of where credentials are stored.

use std::sync::Arc;
use std::time::Instant;

use crate::credential::Credential;
use crate::error::{ProviderError, ProviderResult};
use crate::invalidation::InvalidationRegistry;

/// Trait for pluggable credential providers.
///
/// Implementations must be safe to call from many concurrent handshakes;
/// the trait itself defines no locking.
///
/// A missing user is `Ok(false)` / `Ok(None)`, including for empty or
/// malformed usernames. `Err` is reserved for store-level failures, which
/// the caller must treat as an authentication failure.
pub trait CredentialProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Check whether a credential record for `username` is resolvable
    fn check_username(&self, username: &str) -> ProviderResult<bool>;

    /// Fetch the credential for `username`
    fn get_credential(&self, username: &str) -> ProviderResult<Option<Credential>>;

    /// [`check_username`](Self::check_username) bounded by a caller deadline.
    ///
    /// The default fails with [`ProviderError::Timeout`] if the deadline has
    /// already passed. Providers that can block override this.
    fn check_username_before(&self, username: &str, deadline: Instant) -> ProviderResult<bool> {
        ensure_before(deadline)?;
        self.check_username(username)
    }

    /// [`get_credential`](Self::get_credential) bounded by a caller deadline
    fn get_credential_before(
        &self,
        username: &str,
        deadline: Instant,
    ) -> ProviderResult<Option<Credential>> {
        ensure_before(deadline)?;
        self.get_credential(username)
    }

    /// Registry the server subscribes its derived-secret cache to.
    ///
    /// Providers whose credentials can change outside the server must
    /// return `Some` and notify it on every change. `None` means the
    /// provider's answers never change for the life of the process.
    fn invalidation_source(&self) -> Option<&InvalidationRegistry> {
        None
    }
}

impl<T: CredentialProvider + ?Sized> CredentialProvider for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn check_username(&self, username: &str) -> ProviderResult<bool> {
        (**self).check_username(username)
    }

    fn get_credential(&self, username: &str) -> ProviderResult<Option<Credential>> {
        (**self).get_credential(username)
    }

    fn check_username_before(&self, username: &str, deadline: Instant) -> ProviderResult<bool> {
        (**self).check_username_before(username, deadline)
    }

    fn get_credential_before(
        &self,
        username: &str,
        deadline: Instant,
    ) -> ProviderResult<Option<Credential>> {
        (**self).get_credential_before(username, deadline)
    }

    fn invalidation_source(&self) -> Option<&InvalidationRegistry> {
        (**self).invalidation_source()
    }
}

/// Fail with [`ProviderError::Timeout`] once `deadline` has passed
pub fn ensure_before(deadline: Instant) -> ProviderResult<()> {
    if Instant::now() >= deadline {
        return Err(ProviderError::Timeout);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // Fixed provider for testing trait defaults
    struct StaticProvider;

    impl CredentialProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        fn check_username(&self, username: &str) -> ProviderResult<bool> {
            Ok(username == "root")
        }

        fn get_credential(&self, username: &str) -> ProviderResult<Option<Credential>> {
            Ok((username == "root").then(|| Credential::new("toor")))
        }
    }

    #[test]
    fn test_trait_is_object_safe() {
        let _boxed: Box<dyn CredentialProvider> = Box::new(StaticProvider);
    }

    #[test]
    fn test_default_has_no_invalidation_source() {
        assert!(StaticProvider.invalidation_source().is_none());
    }

    #[test]
    fn test_deadline_in_future() {
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(StaticProvider.check_username_before("root", deadline).unwrap());
        let cred = StaticProvider
            .get_credential_before("root", deadline)
            .unwrap()
            .unwrap();
        assert_eq!(cred.expose(), "toor");
    }

    #[test]
    fn test_deadline_passed() {
        let deadline = Instant::now();
        assert!(matches!(
            StaticProvider.check_username_before("root", deadline),
            Err(ProviderError::Timeout)
        ));
        assert!(matches!(
            StaticProvider.get_credential_before("root", deadline),
            Err(ProviderError::Timeout)
        ));
    }
}
