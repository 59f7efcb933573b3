//! Tracing bootstrap for hosting processes.
//!
//! The crate itself only emits `tracing` events; initializing a subscriber
//! is the host's job. These helpers cover the common case: an `EnvFilter`
//! seeded from configuration (overridable via `RUST_LOG`) and a fmt layer
//! in one of three output formats.

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::BridgeConfig;

/// Output format for the fmt layer.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Pretty-printed with colors, for development.
    Pretty,
    /// Compact single-line output, for production.
    Compact,
    /// JSON, for log aggregation.
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default log level when `RUST_LOG` is unset.
    pub level: Level,
    /// Output format.
    pub format: OutputFormat,
    /// Include thread names (the bridge names its worker threads).
    pub with_thread_names: bool,
    /// Enable ANSI colors.
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Options with a custom default level.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Derive the level from bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, String> {
        let level = parse_log_level(&config.log_level)?;
        Ok(Self::new(level))
    }

    /// Select the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install a global subscriber with the given options.
///
/// Returns an error string if a global subscriber is already set.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string().to_lowercase()));

    let builder = fmt()
        .with_env_filter(filter)
        .with_thread_names(config.with_thread_names);

    let result = match config.format {
        OutputFormat::Pretty => builder.with_ansi(config.with_ansi).pretty().try_init(),
        OutputFormat::Compact => builder.with_ansi(config.with_ansi).compact().try_init(),
        OutputFormat::Json => builder.json().try_init(),
    };
    result.map_err(|err| err.to_string())
}

/// Install a global subscriber from bridge configuration.
pub fn init_from_config(config: &BridgeConfig) -> Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(format!("Invalid log level: {other}")),
    }
}
