//! Configuration management for netsentry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::MonitorConfig;
use crate::error::{Error, Result};
use crate::probe::EndpointTarget;

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Engine configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Config(format!("Failed to create config dir: {e}")))?;
            }
        }

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let monitor = &self.monitor;

        if monitor.reconciler.consensus_threshold == 0 {
            return Err(Error::InvalidConfig(
                "consensus_threshold must be at least 1".into(),
            ));
        }

        if monitor.reconciler.max_lock_retries == 0 {
            return Err(Error::InvalidConfig(
                "max_lock_retries must be at least 1".into(),
            ));
        }

        if monitor.probe.endpoints.is_empty() {
            return Err(Error::InvalidConfig("No probe endpoints configured".into()));
        }

        for target in monitor
            .probe
            .endpoints
            .iter()
            .chain(&monitor.probe.fallback_endpoints)
        {
            validate_target(target)?;
        }

        let dns_timeout = monitor.probe.dns_timeout;
        if dns_timeout < Duration::from_secs(1) || dns_timeout > Duration::from_secs(10) {
            return Err(Error::InvalidConfig(format!(
                "dns_timeout must be between 1s and 10s, got {dns_timeout:?}"
            )));
        }

        let schedule = &monitor.schedule;
        for (name, interval) in [
            ("interface_poll", schedule.interface_poll),
            ("quick_check", schedule.quick_check),
            ("comprehensive_check", schedule.comprehensive_check),
            ("stable_quick_check", schedule.stable_quick_check),
            ("stable_comprehensive_check", schedule.stable_comprehensive_check),
        ] {
            if interval.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be non-zero")));
            }
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::InvalidConfig(format!(
                "Unknown log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "netsentry", "netsentry").map_or_else(
            || PathBuf::from("netsentry.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        let mut config = Self::default();
        config.monitor.probe.dns_hosts.push("example.com".into());
        config.logging.level = "netsentry=debug,info".into();
        config
    }
}

fn validate_target(target: &EndpointTarget) -> Result<()> {
    if target.host.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "Endpoint {} has no host",
            target.id
        )));
    }
    if !(target.weight.is_finite() && target.weight > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "Endpoint {} must have a positive weight",
            target.id
        )));
    }
    if target.timeout.is_zero() {
        return Err(Error::InvalidConfig(format!(
            "Endpoint {} has a zero timeout",
            target.id
        )));
    }
    Ok(())
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log file path. Logs go to stderr when unset.
    pub file: Option<PathBuf>,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, ansi) = match config.file {
        Some(ref path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Config(format!("Failed to open log file: {e}")))?;
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), config.color),
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(writer))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(ansi).with_writer(writer))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
