//! Node configuration using Figment
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML file (`--config <path>`, or `epoch2.toml` in the working directory if present)
//! 3. Environment variables prefixed with `EPOCH2_`, nested keys split on `__`
//! 4. Command-line flags, merged by the binary
//!
//! # Environment Variable Overrides
//!
//! ```text
//! EPOCH2_SERVER__PORT=2001
//! EPOCH2_INSTRUMENT__SIMULATE=false
//! EPOCH2_EXPERIMENT__POLL_INTERVAL=30s
//! EPOCH2_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! # Example file
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 2000
//!
//! [instrument]
//! simulate = false
//! com_port = 4
//!
//! [experiment]
//! poll_interval = "30s"
//! read_timeout = "2h"
//! export_retention = "7d"
//! ```

use crate::error::{NodeError, NodeResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "epoch2.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "EPOCH2_";

/// Longest accepted interval between read-progress polls.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Top-level node settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Logging
    pub application: ApplicationSettings,
    /// HTTP listener
    pub server: ServerSettings,
    /// Reader connection
    pub instrument: InstrumentSettings,
    /// Experiment workflow
    pub experiment: ExperimentSettings,
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-field lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Application-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub log_level: String,
    /// Subscriber output format
    pub log_format: LogFormat,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind
    pub host: String,
    /// TCP port to listen on
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2000,
        }
    }
}

impl ServerSettings {
    /// `host:port` as passed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Plate reader connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Use the in-process simulated reader instead of hardware
    pub simulate: bool,
    /// Serial COM port number of the reader
    pub com_port: u16,
    /// Vendor reader type code (22 = Epoch 2)
    pub reader_type: u16,
    /// Serial line speed
    pub baud_rate: u32,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            simulate: true,
            com_port: 4,
            reader_type: 22,
            baud_rate: 38400,
        }
    }
}

/// Experiment workflow tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    /// Interval between read-progress polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on a single plate read; unbounded when absent
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<Duration>,
    /// Directory for exported results; the system temp directory when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<PathBuf>,
    /// Age after which default-export artifacts are removed; kept forever when absent
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub export_retention: Option<Duration>,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            read_timeout: None,
            export_dir: None,
            export_retention: None,
        }
    }
}

impl Settings {
    /// Defaults, file and environment layers, ready for further merges.
    ///
    /// An explicitly requested file must exist; the default file is optional.
    pub fn figment(path: Option<&Path>) -> NodeResult<Figment> {
        let file = match path {
            Some(path) if !path.exists() => {
                return Err(NodeError::Configuration(format!(
                    "Configuration file '{}' not found",
                    path.display()
                )));
            }
            Some(path) => Toml::file(path),
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };

        Ok(Figment::from(Serialized::defaults(Settings::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extracts and validates settings from a prepared figment.
    pub fn from_figment(figment: Figment) -> NodeResult<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> NodeResult<Self> {
        Self::from_figment(Self::figment(path)?)
    }

    /// Validate settings after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Host is not empty and port is not 0
    /// - Poll interval is non-zero and at most [`MAX_POLL_INTERVAL`]
    /// - Read timeout and export retention are non-zero when set
    /// - Export directory, when set, is an existing directory
    pub fn validate(&self) -> NodeResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(NodeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.server.host.trim().is_empty() {
            return Err(NodeError::Configuration(
                "server.host cannot be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(NodeError::Configuration(
                "server.port must be non-zero".to_string(),
            ));
        }

        if self.experiment.poll_interval.is_zero() {
            return Err(NodeError::Configuration(
                "experiment.poll_interval must be non-zero".to_string(),
            ));
        }
        if self.experiment.poll_interval > MAX_POLL_INTERVAL {
            return Err(NodeError::Configuration(format!(
                "experiment.poll_interval must be at most {MAX_POLL_INTERVAL:?}"
            )));
        }
        if self.experiment.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(NodeError::Configuration(
                "experiment.read_timeout must be non-zero when set".to_string(),
            ));
        }
        if self.experiment.export_retention.is_some_and(|t| t.is_zero()) {
            return Err(NodeError::Configuration(
                "experiment.export_retention must be non-zero when set".to_string(),
            ));
        }
        if let Some(dir) = &self.experiment.export_dir {
            if !dir.is_dir() {
                return Err(NodeError::Configuration(format!(
                    "experiment.export_dir '{}' is not a directory",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}
