//! Credential provider implementations
//!
//! This module contains implementations of the `CredentialProvider` trait
//! beyond the in-memory reference store:
//! - `caching`: TTL lookup cache decorator around another provider
//! - `file`: JSON credentials file, reloadable at runtime

pub mod caching;
pub mod file;

pub use caching::{CachingProvider, LookupStats};
pub use file::{FileProvider, ReloadSummary, UserRecord, write_credentials};
