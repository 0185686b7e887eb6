//! In-memory credential store

use crate::credential::Credential;
use crate::error::ProviderResult;
use crate::invalidation::InvalidationRegistry;
use crate::provider::CredentialProvider;
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory username -> credential provider.
///
/// Construct one per server and share it through an `Arc`. Lookups never
/// fail. Every mutation that adds, replaces or removes a credential notifies
/// the invalidation registry before returning, so a server subscribed to
/// [`invalidation_source`](CredentialProvider::invalidation_source) never
/// keeps a secret derived from the old value or a stale "not found".
pub struct InMemoryProvider {
    users: RwLock<HashMap<String, Credential>>,
    invalidation: InvalidationRegistry,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            invalidation: InvalidationRegistry::new(),
        }
    }

    /// Create a store pre-populated with `(username, credential)` pairs
    pub fn with_users<I, U, C>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, C)>,
        U: Into<String>,
        C: Into<Credential>,
    {
        let store = Self::new();
        {
            let mut map = store.users.write();
            for (username, credential) in users {
                map.insert(username.into(), credential.into());
            }
        }
        store
    }

    /// Insert or overwrite a user's credential (last writer wins)
    pub fn add_user(&self, username: impl Into<String>, credential: impl Into<Credential>) {
        let username = username.into();
        let credential = credential.into();

        let previous = self.users.write().insert(username.clone(), credential.clone());

        match previous {
            Some(old) if old == credential => return,
            Some(_) => tracing::info!("Credential updated for user {}", username),
            None => tracing::debug!("Added user {}", username),
        }
        // New users are announced too: listeners may hold a cached "not found"
        self.invalidation.notify(&username);
    }

    /// Remove a user. Absent users are ignored.
    pub fn delete_user(&self, username: &str) {
        let removed = self.users.write().remove(username);
        if removed.is_some() {
            tracing::info!("Deleted user {}", username);
            self.invalidation.notify(username);
        }
    }

    /// Remove every user
    pub fn clear_all_users(&self) {
        let removed: Vec<String> = {
            let mut users = self.users.write();
            users.drain().map(|(username, _)| username).collect()
        };

        if !removed.is_empty() {
            tracing::info!("Cleared {} users", removed.len());
        }
        for username in &removed {
            self.invalidation.notify(username);
        }
    }

    /// Number of stored users
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

}

impl CredentialProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn check_username(&self, username: &str) -> ProviderResult<bool> {
        Ok(self.users.read().contains_key(username))
    }

    fn get_credential(&self, username: &str) -> ProviderResult<Option<Credential>> {
        Ok(self.users.read().get(username).cloned())
    }

    fn invalidation_source(&self) -> Option<&InvalidationRegistry> {
        Some(&self.invalidation)
    }
}
