//! credgate Credential Providers
//!
//! This crate provides:
//! - The `CredentialProvider` trait a database server's authentication
//!   layer uses to look up users and their credentials
//! - An in-memory reference store
//! - File-backed, caching and chained providers
//! - The cache invalidation channel that keeps server-side derived secrets
//!   (e.g. `caching_sha2_password` digests) in sync with the store
//!
//! # Example
//!
//! ```rust,ignore
//! use credgate_auth::{CredentialProvider, InMemoryProvider};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryProvider::new());
//! store.add_user("alice", "s3cr3t");
//!
//! // The server subscribes its derived-secret cache once...
//! // store.invalidation_source().unwrap().register(cache.clone());
//!
//! // ...and every later add_user/delete_user purges stale entries.
//! store.add_user("alice", "n3wpass");
//! ```

// Core modules
pub mod credential;
pub mod error;
pub mod invalidation;
pub mod provider;
pub mod store;

// Composite providers
pub mod chain;
pub mod providers;

// Re-export core types
pub use credential::{Credential, constant_time_eq};
pub use error::{ProviderError, ProviderResult};
pub use invalidation::{CacheInvalidator, InvalidationRegistry, Registration};
pub use provider::{CredentialProvider, ensure_before};
pub use store::InMemoryProvider;

// Re-export composite provider types
pub use chain::ProviderChain;
pub use providers::{CachingProvider, FileProvider, LookupStats, ReloadSummary, UserRecord};
