//! # Structured Logging
//!
//! Environment-aware `tracing` initialization with a reloadable filter so the
//! `set_log_level` server command can retune verbosity at runtime without a
//! restart.

use std::sync::OnceLock;

use tracing_subscriber::{
    fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::error::{Result, SliceworksError};

static RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Initialize structured logging with an environment-specific default level.
///
/// Safe to call more than once; only the first call installs the subscriber.
pub fn init() {
    if RELOAD_HANDLE.get().is_some() {
        return;
    }

    let environment = environment();
    let level = default_level(&environment);
    let (filter, handle) = reload::Layer::new(EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true),
    );

    // A global subscriber may already be installed (e.g. by a test harness);
    // that is not an error.
    if subscriber.try_init().is_ok() {
        let _ = RELOAD_HANDLE.set(handle);
        tracing::info!(environment = %environment, "logging initialized");
    }
}

/// Replace the active log filter, e.g. from a `SetLogLevel` command.
pub fn set_level(directive: &str) -> Result<()> {
    let handle = RELOAD_HANDLE
        .get()
        .ok_or_else(|| SliceworksError::Configuration("logging not initialized".into()))?;

    let filter = EnvFilter::try_new(directive)
        .map_err(|e| SliceworksError::Configuration(format!("invalid log directive: {e}")))?;

    handle
        .reload(filter)
        .map_err(|e| SliceworksError::Infrastructure(format!("log filter reload failed: {e}")))?;

    tracing::info!(directive = %directive, "log level updated");
    Ok(())
}

fn environment() -> String {
    std::env::var("SLICEWORKS_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}
