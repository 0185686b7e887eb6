//! File-backed credential provider
//!
//! Serves credentials from a JSON file that operators edit outside the
//! server. Because the file changes behind the server's back, every
//! [`FileProvider::reload`] diffs the old and new contents and notifies the
//! invalidation registry for each user that appeared, changed or
//! disappeared.
//!
//! # File format
//!
//! ```json
//! {
//!   "users": [
//!     { "username": "alice", "password": "s3cr3t" },
//!     { "username": "bob", "password": "hunter2" }
//!   ]
//! }
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::credential::Credential;
use crate::error::{ProviderError, ProviderResult};
use crate::invalidation::InvalidationRegistry;
use crate::provider::CredentialProvider;

/// One entry of the credentials file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password: Credential,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// What a reload changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    /// Users present only in the new file
    pub added: Vec<String>,
    /// Users whose credential differs
    pub updated: Vec<String>,
    /// Users no longer in the file
    pub removed: Vec<String>,
}

impl ReloadSummary {
    /// True if no user was added, updated or removed
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Usernames announced to the invalidation registry.
    ///
    /// Added users are included so listeners drop a cached "not found".
    pub fn invalidated(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.updated.iter())
            .chain(self.removed.iter())
            .map(String::as_str)
    }
}

/// Credential provider backed by a JSON credentials file.
///
/// Lookups are served from memory; only [`open`](Self::open) and
/// [`reload`](Self::reload) touch the disk. A failed reload keeps the
/// previously loaded credentials.
pub struct FileProvider {
    path: PathBuf,
    users: RwLock<HashMap<String, Credential>>,
    invalidation: InvalidationRegistry,
}

impl FileProvider {
    /// Load the credentials file at `path`
    pub fn open(path: impl Into<PathBuf>) -> ProviderResult<Self> {
        let path = path.into();
        let users = read_credentials(&path)?;
        tracing::info!("Loaded {} users from {}", users.len(), path.display());

        Ok(Self {
            path,
            users: RwLock::new(users),
            invalidation: InvalidationRegistry::new(),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of loaded users
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    /// Re-read the file, swap in its contents and invalidate changed users
    pub fn reload(&self) -> ProviderResult<ReloadSummary> {
        let fresh = read_credentials(&self.path)?;

        let summary = {
            let mut users = self.users.write();
            let summary = diff(&users, &fresh);
            *users = fresh;
            summary
        };

        for username in summary.invalidated() {
            self.invalidation.notify(username);
        }

        if summary.is_unchanged() {
            tracing::debug!("Reloaded {}: no changes", self.path.display());
        } else {
            tracing::info!(
                "Reloaded {}: {} added, {} updated, {} removed",
                self.path.display(),
                summary.added.len(),
                summary.updated.len(),
                summary.removed.len()
            );
        }

        Ok(summary)
    }
}

impl CredentialProvider for FileProvider {
    fn name(&self) -> &str {
        "file"
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

/// Write `records` to `path` in the credentials file format
pub fn write_credentials(path: &Path, records: &[UserRecord]) -> ProviderResult<()> {
    let file = CredentialsFile {
        users: records.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| ProviderError::Corrupted(format!("failed to encode credentials: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

fn read_credentials(path: &Path) -> ProviderResult<HashMap<String, Credential>> {
    let contents = std::fs::read_to_string(path)?;
    let file: CredentialsFile = serde_json::from_str(&contents).map_err(|e| {
        ProviderError::Corrupted(format!("invalid credentials file {}: {e}", path.display()))
    })?;

    let mut users = HashMap::with_capacity(file.users.len());
    for record in file.users {
        if record.username.is_empty() {
            return Err(ProviderError::Corrupted(format!(
                "empty username in {}",
                path.display()
            )));
        }
        if users.contains_key(&record.username) {
            return Err(ProviderError::Corrupted(format!(
                "duplicate user {} in {}",
                record.username,
                path.display()
            )));
        }
        users.insert(record.username, record.password);
    }
    Ok(users)
}

fn diff(old: &HashMap<String, Credential>, new: &HashMap<String, Credential>) -> ReloadSummary {
    let mut summary = ReloadSummary::default();

    for (username, credential) in new {
        match old.get(username) {
            None => summary.added.push(username.clone()),
            Some(previous) if previous != credential => summary.updated.push(username.clone()),
            Some(_) => {}
        }
    }
    for username in old.keys() {
        if !new.contains_key(username) {
            summary.removed.push(username.clone());
        }
    }

    summary.added.sort();
    summary.updated.sort();
    summary.removed.sort();
    summary
}
