//! Logging bootstrap.
//!
//! The crate logs through `tracing`. Applications that already install a
//! subscriber need nothing from this module; others can call [`init`] once
//! at startup (requires the `tracing-subscriber` feature).
//!
//! # Environment Variables
//!
//! - `DBMAP_DEBUG=true|1|yes` - enable debug logging
//! - `DBMAP_LOG_LEVEL=trace|debug|info|warn|error` - set the level explicitly
//! - `DBMAP_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! ```rust,no_run
//! dbmap_core::logging::init();
//! ```

use std::sync::Once;

use crate::config::{EnvSource, StdEnvSource};

static INIT: Once = Once::new();

/// Output format for [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Multi-line, human oriented.
    Pretty,
    /// Single-line, human oriented.
    Compact,
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSettings {
    /// Whether anything was requested at all.
    pub enabled: bool,
    /// Level directive.
    pub level: &'static str,
    /// Output format.
    pub format: LogFormat,
}

impl LogSettings {
    /// Resolve settings from an environment source.
    pub fn from_env_source(env: &impl EnvSource) -> Self {
        let debug = env
            .get("DBMAP_DEBUG")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        let explicit = env.get("DBMAP_LOG_LEVEL");

        let level = match explicit.as_deref().map(str::to_lowercase).as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ if debug => "debug",
            _ => "warn",
        };

        let format = match env.get("DBMAP_LOG_FORMAT").map(|f| f.to_lowercase()).as_deref() {
            Some("pretty") => LogFormat::Pretty,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Json,
        };

        Self {
            enabled: debug || explicit.is_some(),
            level,
            format,
        }
    }
}

/// Check if `DBMAP_DEBUG` is set.
pub fn is_debug_enabled() -> bool {
    StdEnvSource
        .get("DBMAP_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Install a global subscriber according to the environment.
///
/// Does nothing unless `DBMAP_DEBUG` or `DBMAP_LOG_LEVEL` is set, or when a
/// global subscriber is already installed. Subsequent calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let settings = LogSettings::from_env_source(&StdEnvSource);
        if !settings.enabled {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let filter = EnvFilter::try_new(format!(
                "dbmap={level},dbmap_core={level},dbmap_postgres={level}",
                level = settings.level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let installed = match settings.format {
                LogFormat::Json => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
                LogFormat::Compact => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                LogFormat::Pretty => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level = settings.level, format = ?settings.format, "dbmap logging initialized");
            }
        }
    });
}
