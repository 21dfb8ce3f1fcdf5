//! Configuration management.

use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::path::Path;

const ENV_PREFIX: &str = "MEDIAJOBS";

/// Main CLI configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Progress output configuration
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    /// Ticker period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

// Default value functions
fn default_log_level() -> String { "warn,mediajobs=info".to_string() }
fn default_log_format() -> LogFormat { LogFormat::Pretty }
fn default_interval_ms() -> u64 { 500 }

impl Config {
    /// Load configuration from an optional file, then `MEDIAJOBS__*` variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> anyhow::Result<Self> {
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        if cfg.progress.interval_ms == 0 {
            anyhow::bail!("progress.interval_ms must be greater than zero");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> anyhow::Result<Config> {
        Config::from_builder(
            config::Config::builder().add_source(config::File::from_str(toml, FileFormat::Toml)),
        )
    }

    #[test]
    fn test_defaults() {
        let cfg = from_toml("").unwrap();
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert_eq!(cfg.progress.interval_ms, 500);
    }

    #[test]
    fn test_file_values() {
        let cfg = from_toml(
            r#"
            [logging]
            level = "debug"
            format = "json"

            [progress]
            interval_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.progress.interval_ms, 100);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(from_toml("[progress]\ninterval_ms = 0").is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
