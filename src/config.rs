//! Bridge configuration using Figment.
//!
//! Configuration is loaded from a TOML file merged with environment
//! variables prefixed `REGSYNC_` (double underscore for nesting), so a
//! deployment can override any field without editing the file:
//!
//! ```text
//! REGSYNC_ADDRESS=10.5.1.20
//! REGSYNC_ATTRIBUTES__PERIOD_MS=500
//! ```
//!
//! All timing fields default to the cadences the device daemons are tuned
//! for: attributes are low-rate (2 s), worker threads idle-poll at 100 ms,
//! and unread on-demand blocks back off 100 ms between checks.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address of the registry daemon.
    #[serde(default = "default_address")]
    pub address: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Attribute polling cadence.
    #[serde(default)]
    pub attributes: AttributePoll,
    /// Defaults applied to newly created signal bindings.
    #[serde(default)]
    pub signals: SignalDefaults,
}

/// Attribute polling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributePoll {
    /// Pause between polling passes while connected, in milliseconds.
    #[serde(default = "default_attr_period")]
    pub period_ms: u64,
    /// Pause between checks while disconnected, in milliseconds.
    #[serde(default = "default_idle_period")]
    pub idle_period_ms: u64,
}

/// Per-signal timing defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDefaults {
    /// Pause after each immediate-mode read, in milliseconds.
    #[serde(default = "default_signal_period")]
    pub period_ms: u64,
    /// Pause between checks while disabled or disconnected, in
    /// milliseconds.
    #[serde(default = "default_idle_period")]
    pub idle_period_ms: u64,
    /// Pause while an on-demand block stays unread, in milliseconds.
    #[serde(default = "default_unread_backoff")]
    pub unread_backoff_ms: u64,
    /// Whether immediate mode also applies the unread backoff. Off by
    /// default: an immediate read is cheap and the period sleep already
    /// paces the loop.
    #[serde(default)]
    pub throttle_immediate: bool,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_attr_period() -> u64 {
    2000
}

fn default_signal_period() -> u64 {
    2000
}

fn default_idle_period() -> u64 {
    100
}

fn default_unread_backoff() -> u64 {
    100
}

impl Default for AttributePoll {
    fn default() -> Self {
        Self {
            period_ms: default_attr_period(),
            idle_period_ms: default_idle_period(),
        }
    }
}

impl Default for SignalDefaults {
    fn default() -> Self {
        Self {
            period_ms: default_signal_period(),
            idle_period_ms: default_idle_period(),
            unread_backoff_ms: default_unread_backoff(),
            throttle_immediate: false,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            log_level: default_log_level(),
            attributes: AttributePoll::default(),
            signals: SignalDefaults::default(),
        }
    }
}

impl BridgeConfig {
    /// Load from `regsync.toml` in the working directory, with `REGSYNC_`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from("regsync.toml")
    }

    /// Load from a specific file path, with environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: BridgeConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("REGSYNC_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate semantic constraints after loading.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.address.trim().is_empty() {
            return Err("Registry address must not be empty".to_string());
        }

        for (name, value) in [
            ("attributes.period_ms", self.attributes.period_ms),
            ("attributes.idle_period_ms", self.attributes.idle_period_ms),
            ("signals.period_ms", self.signals.period_ms),
            ("signals.idle_period_ms", self.signals.idle_period_ms),
        ] {
            if value == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }

        Ok(())
    }
}
