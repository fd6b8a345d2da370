//! Shared tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and one of the supported
//! output formats.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    #[default]
    Full,
    /// Shorter human-readable lines, handy when tailing engine chatter.
    Compact,
    /// One JSON object per line, for structured log aggregation.
    Json,
}

/// Initialise the global tracing subscriber.
///
/// `default_filter` is used when `RUST_LOG` is unset (e.g.
/// `"enginehub_daemon=info"`). Returns an error if a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> crate::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        LogFormat::Full => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    result.map_err(|e| crate::Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
