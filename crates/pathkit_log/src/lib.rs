//! `pathkit_log` v1:
//! Logging bootstrap for processes embedding `pathkit_io_fs`.
//!
//! The library crates only emit `tracing` events; this crate installs the
//! global `tracing-subscriber` that renders them.

use std::env;

use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt};

/// Level used when neither the config nor `RUST_LOG` says otherwise.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Selects [`EnumLogFormat`] in [`SpecLogConfig::from_env`].
pub const ENV_LOG_FORMAT: &str = "PATHKIT_LOG_FORMAT";

////////////////////////////////////////////////////////////////////////////////
// #region LogConfig

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumLogFormat {
    #[default]
    Pretty,
    Json,
}

impl EnumLogFormat {
    /// `json` (any case) selects JSON; everything else is pretty.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecLogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    pub level: String,
    pub format: EnumLogFormat,
}

impl Default for SpecLogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: EnumLogFormat::Pretty,
        }
    }
}

impl SpecLogConfig {
    /// Defaults, with the format taken from `PATHKIT_LOG_FORMAT` when set.
    pub fn from_env() -> Self {
        let mut spec_config = Self::default();
        if let Ok(value) = env::var(ENV_LOG_FORMAT) {
            spec_config.format = EnumLogFormat::parse(&value);
        }
        spec_config
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Init

#[derive(Debug, Error)]
pub enum LogInitError {
    /// A global subscriber is already installed.
    #[error("failed to install tracing subscriber: {reason}")]
    AlreadyInitialized { reason: String },
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `spec_config.level`. A second call fails with
/// [`LogInitError::AlreadyInitialized`] instead of panicking.
pub fn init_logging(spec_config: &SpecLogConfig) -> Result<(), LogInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(spec_config.level.as_str()));
    let builder = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true);

    let res_init = match spec_config.format {
        EnumLogFormat::Json => builder.json().try_init(),
        EnumLogFormat::Pretty => builder.pretty().try_init(),
    };
    res_init.map_err(|e| LogInitError::AlreadyInitialized {
        reason: e.to_string(),
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::{EnumLogFormat, LogInitError, SpecLogConfig, init_logging};

    #[test]
    fn format_parsing_defaults_to_pretty() {
        assert_eq!(EnumLogFormat::parse("json"), EnumLogFormat::Json);
        assert_eq!(EnumLogFormat::parse(" JSON "), EnumLogFormat::Json);
        assert_eq!(EnumLogFormat::parse("pretty"), EnumLogFormat::Pretty);
        assert_eq!(EnumLogFormat::parse("unknown"), EnumLogFormat::Pretty);
    }

    #[test]
    fn default_config_logs_at_info() {
        let spec_config = SpecLogConfig::default();
        assert_eq!(spec_config.level, "info");
        assert_eq!(spec_config.format, EnumLogFormat::Pretty);
    }

    #[test]
    fn second_init_reports_already_initialized() {
        let spec_config = SpecLogConfig {
            level: "debug".to_string(),
            format: EnumLogFormat::Json,
        };
        let _ = init_logging(&spec_config);
        let err = init_logging(&spec_config).expect_err("subscriber already set");
        assert!(matches!(err, LogInitError::AlreadyInitialized { .. }));
    }
}
