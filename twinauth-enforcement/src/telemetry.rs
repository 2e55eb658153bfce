//! Logging setup
//!
//! The enforcement core only emits `tracing` events and `metrics` values; the
//! embedding process decides where they go. [`init_logging`] is a convenience
//! for processes that want the usual env-driven fmt subscriber.

use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Telemetry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Primary log filter (RUST_LOG env var)
    pub log_filter: String,
    /// Fallback log level if RUST_LOG not set
    pub default_level: String,
    /// Log format ("human" or "json")
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_vars(
            env::var("RUST_LOG").ok(),
            env::var("LOG_LEVEL").ok(),
            env::var("LOG_FORMAT").ok(),
        )
    }
}

impl TelemetryConfig {
    /// Build from the values of `RUST_LOG`, `LOG_LEVEL` and `LOG_FORMAT`.
    pub fn from_vars(
        rust_log: Option<String>,
        log_level: Option<String>,
        log_format: Option<String>,
    ) -> Self {
        Self {
            log_filter: rust_log.unwrap_or_default(),
            default_level: log_level
                .filter(|level| !level.is_empty())
                .unwrap_or_else(|| "info".to_string()),
            log_format: match log_format.unwrap_or_default().to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Human,
            },
        }
    }

    fn filter(&self) -> EnvFilter {
        if self.log_filter.is_empty() {
            EnvFilter::new(&self.default_level)
        } else {
            EnvFilter::new(&self.log_filter)
        }
    }
}

/// Initialize logging
///
/// Safe to call multiple times - will only initialize once.
pub fn init_logging(config: &TelemetryConfig) {
    // Check if a global subscriber is already set (e.g., from tests)
    if tracing::dispatcher::has_been_set() {
        tracing::debug!("tracing subscriber already initialized, skipping");
        return;
    }

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Human => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    // try_init: another thread may have won the race since has_been_set()
    let _ = tracing_subscriber::registry()
        .with(config.filter())
        .with(fmt_layer)
        .try_init();
}
