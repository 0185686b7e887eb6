//! credgate CLI - Admin Command Line Interface
//!
//! Inspects a credential provider the way the server would see it:
//! existence checks, full authentication and credentials-file reloads.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use credgate_auth::{
    CachingProvider, CredentialProvider, FileProvider, InMemoryProvider, ReloadSummary,
};
use credgate_common::{Config, ProviderKind};
use credgate_handshake::{AuthOutcome, Authenticator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "credgate-cli")]
#[command(about = "credgate Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/credgate/credgate.toml")]
    config: String,

    /// Credentials file (overrides the config and selects the file provider)
    #[arg(long)]
    credentials_file: Option<PathBuf>,

    /// Bootstrap user for the memory provider, as name:password (repeatable)
    #[arg(long = "user")]
    users: Vec<String>,

    /// Log level (defaults to logging.level from the config file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a user exists
    Check {
        /// Username to look up
        username: String,
    },
    /// Run a full authentication for a user
    Verify {
        /// Username to authenticate
        username: String,
        /// Cleartext password
        #[arg(long)]
        password: String,
        /// Client host the attempt is attributed to
        #[arg(long, default_value = "localhost")]
        host: String,
    },
    /// Reload the credentials file periodically and report invalidations
    Watch {
        /// Seconds between reloads
        #[arg(long, default_value = "5")]
        interval_secs: u64,
    },
}

/// Provider stack built from configuration
struct Providers {
    /// What the authenticator consults
    lookup: Arc<dyn CredentialProvider>,
    /// Set when credentials come from a file that can be reloaded
    file: Option<Arc<FileProvider>>,
}

fn build_providers(config: &Config, users: &[String]) -> Result<Providers> {
    let (base, file): (Arc<dyn CredentialProvider>, Option<Arc<FileProvider>>) =
        match config.provider.kind {
            ProviderKind::Memory => {
                let store = InMemoryProvider::new();
                for spec in users {
                    let (name, password) = spec
                        .split_once(':')
                        .with_context(|| format!("invalid --user {spec:?}, expected name:password"))?;
                    if name.is_empty() {
                        bail!("invalid --user {spec:?}: empty name");
                    }
                    store.add_user(name, password);
                }
                info!("Using memory provider with {} users", store.len());
                let store: Arc<dyn CredentialProvider> = Arc::new(store);
                (store, None)
            }
            ProviderKind::File => {
                let path = config
                    .provider
                    .credentials_file
                    .clone()
                    .context("file provider requires a credentials file")?;
                let file = Arc::new(
                    FileProvider::open(&path)
                        .with_context(|| format!("failed to load {}", path.display()))?,
                );
                let lookup: Arc<dyn CredentialProvider> = file.clone();
                (lookup, Some(file))
            }
        };

    let lookup: Arc<dyn CredentialProvider> = match config.provider.lookup_cache_ttl() {
        Some(ttl) => {
            info!("Lookup cache enabled (ttl {:?})", ttl);
            Arc::new(CachingProvider::new(base, ttl))
        }
        None => base,
    };

    Ok(Providers { lookup, file })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("failed to load config {}", args.config))?;

    // CLI takes precedence over the config file
    if let Some(path) = args.credentials_file.clone() {
        config.provider.kind = ProviderKind::File;
        config.provider.credentials_file = Some(path);
    }
    let log_level = effective_log_level(args.log_level.as_deref(), &config);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;
    let providers = build_providers(&config, &args.users)?;
    let authenticator = Authenticator::from_config(providers.lookup.clone(), &config);

    match args.command {
        Commands::Check { username } => {
            let exists = authenticator.check_user(&username)?;
            if exists {
                println!("{username}: exists");
            } else {
                println!("{username}: not found");
            }
        }
        Commands::Verify {
            username,
            password,
            host,
        } => verify(&authenticator, &username, &host, &password)?,
        Commands::Watch { interval_secs } => {
            let Some(file) = providers.file else {
                bail!("watch requires the file provider (--credentials-file)");
            };
            watch(file, &authenticator, Duration::from_secs(interval_secs.max(1))).await;
        }
    }

    Ok(())
}

fn effective_log_level(cli: Option<&str>, config: &Config) -> String {
    cli.map_or_else(|| config.logging.level.clone(), str::to_string)
}

/// Full authentication; a denial is an error so the process exits non-zero
fn verify(
    authenticator: &Authenticator,
    username: &str,
    host: &str,
    password: &str,
) -> Result<()> {
    match authenticator.authenticate_full(username, host, password) {
        AuthOutcome::Accepted => {
            println!("{username}@{host}: accepted");
            Ok(())
        }
        outcome => {
            // Mirrors the server: no detail beyond the outcome
            tracing::debug!("Outcome: {:?}", outcome);
            bail!("{username}@{host}: denied")
        }
    }
}

async fn watch(file: Arc<FileProvider>, authenticator: &Authenticator, interval: Duration) {
    info!("Watching {} every {:?}", file.path().display(), interval);

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; the file was just loaded
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                return;
            }
        }

        reload_once(&file, authenticator).await;
    }
}

/// Reload the credentials file once and report what changed
async fn reload_once(
    file: &Arc<FileProvider>,
    authenticator: &Authenticator,
) -> Option<ReloadSummary> {
    let reload_file = Arc::clone(file);
    let result = tokio::task::spawn_blocking(move || reload_file.reload()).await;

    match result {
        Ok(Ok(summary)) if summary.is_unchanged() => Some(summary),
        Ok(Ok(summary)) => {
            for username in summary.invalidated() {
                info!("Invalidated cached secrets for user {}", username);
            }
            println!(
                "reloaded: {} added, {} updated, {} removed (cached entries: {})",
                summary.added.len(),
                summary.updated.len(),
                summary.removed.len(),
                authenticator.cache().len()
            );
            Some(summary)
        }
        Ok(Err(e)) => {
            warn!("Reload of {} failed: {}", file.path().display(), e);
            None
        }
        Err(e) => {
            error!("Reload task panicked: {}", e);
            None
        }
    }
}
