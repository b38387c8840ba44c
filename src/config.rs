//! # Configuration
//!
//! Explicit, validated configuration for the engine. All tunables come from
//! one [`SliceworksConfig`] built from defaults, an optional `sliceworks`
//! config file, and `SLICEWORKS_`-prefixed environment overrides. There are
//! no hardcoded fallbacks sprinkled through the runtime.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SliceworksError};

/// Root configuration for a sliceworks process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SliceworksConfig {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub slices: SliceConfig,
    pub retry: RetryConfig,
    pub crypto: CryptoConfig,
}

/// Server management loop and supervision settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Target number of concurrently running workers.
    pub max_workers: usize,
    /// Interval between heartbeat writes, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeats a server may miss before it is classified a zombie.
    pub missed_heartbeat_threshold: u32,
    /// Spread worker first-polls across the heartbeat interval to avoid a
    /// thundering herd against the store.
    pub stagger_first_poll: bool,
    /// Interval between zombie-server scans, in seconds.
    pub zombie_scan_interval_secs: u64,
}

/// Worker polling and drain behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between empty polls, in seconds.
    pub poll_interval_secs: u64,
    /// How long the server waits for a worker to finish its in-flight unit
    /// during shutdown before logging it as stuck, in seconds.
    pub drain_timeout_secs: u64,
}

/// Slice construction defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SliceConfig {
    /// Records per slice when a category does not override it.
    pub default_slice_size: usize,
}

/// Retry policy defaults applied when a job does not override them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default_retry_limit: u32,
    /// Interval between throttle predicate re-checks, in seconds.
    pub throttle_check_interval_secs: u64,
}

/// Keyed cipher material for the encrypted slice codecs.
///
/// Keys are 32-byte values hex-encoded, registered per numeric version so
/// old slices remain readable after a key rotation. `primary_version`
/// selects the key used for new writes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub primary_version: u8,
    /// Map of version (as string, for config-file friendliness) to hex key.
    pub keys: HashMap<String, String>,
}

impl Default for SliceworksConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            worker: WorkerConfig::default(),
            slices: SliceConfig::default(),
            retry: RetryConfig::default(),
            crypto: CryptoConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            heartbeat_interval_secs: 15,
            missed_heartbeat_threshold: 4,
            stagger_first_poll: true,
            zombie_scan_interval_secs: 60,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            drain_timeout_secs: 30,
        }
    }
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self {
            default_slice_size: 100,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_retry_limit: 25,
            throttle_check_interval_secs: 10,
        }
    }
}

impl SliceworksConfig {
    /// Load configuration from defaults, an optional `sliceworks.{toml,yaml}`
    /// file, and `SLICEWORKS_`-prefixed environment variables
    /// (`SLICEWORKS_SERVER__MAX_WORKERS=4`).
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("sliceworks").required(false))
            .add_source(config::Environment::with_prefix("SLICEWORKS").separator("__"))
            .build()
            .map_err(|e| SliceworksError::Configuration(e.to_string()))?;

        let loaded: Self = settings
            .try_deserialize()
            .map_err(|e| SliceworksError::Configuration(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations the runtime cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SliceworksError::Configuration(
                "server.heartbeat_interval_secs must be positive".into(),
            ));
        }
        if self.server.missed_heartbeat_threshold == 0 {
            return Err(SliceworksError::Configuration(
                "server.missed_heartbeat_threshold must be positive".into(),
            ));
        }
        if self.slices.default_slice_size == 0 {
            return Err(SliceworksError::Configuration(
                "slices.default_slice_size must be positive".into(),
            ));
        }
        for (version, key) in &self.crypto.keys {
            version.parse::<u8>().map_err(|_| {
                SliceworksError::Configuration(format!(
                    "crypto.keys version '{version}' is not a number in 0..=255"
                ))
            })?;
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(SliceworksError::Configuration(format!(
                    "crypto key for version '{version}' must be 64 hex characters"
                )));
            }
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.server.heartbeat_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker.poll_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.drain_timeout_secs)
    }

    /// Age beyond which a server's heartbeat marks it as a zombie.
    pub fn zombie_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            (self.server.heartbeat_interval_secs * u64::from(self.server.missed_heartbeat_threshold))
                as i64,
        )
    }
}
