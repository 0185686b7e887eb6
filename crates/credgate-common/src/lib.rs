//! credgate Common - Shared configuration
//!
//! This crate provides the configuration types and loader used by the
//! credential providers, the handshake layer and the admin CLI.

pub mod config;
pub mod error;

pub use config::{CacheConfig, Config, LoggingConfig, ProviderConfig, ProviderKind};
pub use error::{ConfigError, Result};
