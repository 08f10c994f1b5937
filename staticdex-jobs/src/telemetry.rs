//! Tracing subscriber setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a single
//! `fmt` layer, json for aggregated logs or pretty for local runs. `RUST_LOG`
//! takes precedence over the configured default filter.

use staticdex_core::{ConfigError, IndexResult, StaticIndexError};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_SERVICE_NAME: &str = "staticdex";
const DEFAULT_FILTER: &str = "staticdex_jobs=info,staticdex_loaders=info,staticdex_storage=warn,info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::InvalidValue {
                field: "log_format".to_string(),
                value: other.to_string(),
                reason: "expected `json` or `pretty`".to_string(),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Pretty => f.write_str("pretty"),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Output format of the fmt layer
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset or invalid
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }
}

impl TelemetryConfig {
    /// Read `STATICDEX_SERVICE_NAME` and `STATICDEX_LOG_FORMAT` through
    /// `lookup`. An unrecognised format falls back to json.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            service_name: lookup("STATICDEX_SERVICE_NAME")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            log_format: lookup("STATICDEX_LOG_FORMAT")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once at startup, before the first rebuild. A second call fails with
/// [`StaticIndexError::Telemetry`] because a global subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> IndexResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };
    installed.map_err(|e| StaticIndexError::Telemetry {
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(
        service_name = %config.service_name,
        log_format = %config.log_format,
        "Telemetry initialized"
    );

    Ok(())
}
