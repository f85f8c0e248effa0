//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file (or no file at all, via
//! [`Config::default`]) yields a usable configuration.

use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FlightClientError, Result};
use crate::telemetry::packer::PackingBound;
use crate::telemetry::variable::{default_variables, TelemetryVariable};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub trajectory: TrajectoryConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Radio link configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LinkConfig {
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Onboard controller/observer selection
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ControlConfig {
    /// Fly with the custom controller and motors enabled
    #[serde(default = "default_use_controller")]
    pub use_controller: bool,

    /// Run the custom observer
    #[serde(default)]
    pub use_observer: bool,

    #[serde(default = "default_custom_controller")]
    pub custom_controller: u8,

    #[serde(default = "default_default_controller")]
    pub default_controller: u8,
}

/// Telemetry subscription configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    #[serde(default = "default_max_variables_per_group")]
    pub max_variables_per_group: usize,

    /// When set, groups are packed by encoded width instead of count
    #[serde(default)]
    pub max_payload_bytes: Option<usize>,

    #[serde(default = "default_variables")]
    pub variables: Vec<TelemetryVariable>,
}

/// Trajectory execution configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TrajectoryConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// Telemetry export configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RecorderConfig {
    #[serde(default = "default_output_path")]
    pub output_path: String,

    /// Insert a UTC timestamp before the file extension
    #[serde(default)]
    pub timestamped: bool,
}

/// Diagnostic log configuration
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct LogConfig {
    /// Also write logs to `<dir>/flight-client.log`
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_uri() -> String { "radio://0/34/2M/E7E7E7E7E7".to_string() }
fn default_connect_timeout_ms() -> u64 { 10000 }

fn default_use_controller() -> bool { true }
fn default_custom_controller() -> u8 { 4 }
fn default_default_controller() -> u8 { 1 }

fn default_period_ms() -> u64 { 10 }
fn default_max_variables_per_group() -> usize { 5 }

fn default_tick_interval_ms() -> u64 { 100 }

fn default_output_path() -> String { "logged_data.json".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            use_controller: default_use_controller(),
            use_observer: false,
            custom_controller: default_custom_controller(),
            default_controller: default_default_controller(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            max_variables_per_group: default_max_variables_per_group(),
            max_payload_bytes: None,
            variables: default_variables(),
        }
    }
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            timestamped: false,
        }
    }
}

impl TelemetryConfig {
    /// Packing bound selected by this configuration.
    pub fn packing_bound(&self) -> PackingBound {
        match self.max_payload_bytes {
            Some(bytes) => PackingBound::MaxPayloadBytes(bytes),
            None => PackingBound::MaxVariables(self.max_variables_per_group),
        }
    }
}

impl RecorderConfig {
    /// Export path, with `stamp` inserted before the extension when
    /// `timestamped` is set (`logged_data.json` -> `logged_data_<stamp>.json`).
    pub fn resolve_path(&self, stamp: &str) -> PathBuf {
        let path = PathBuf::from(&self.output_path);
        if !self.timestamped {
            return path;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match path.extension() {
            Some(ext) => format!("{}_{}.{}", stem, stamp, ext.to_string_lossy()),
            None => format!("{}_{}", stem, stamp),
        };
        path.with_file_name(name)
    }
}

fn invalid(msg: impl Into<String>) -> FlightClientError {
    FlightClientError::InvalidConfig(msg.into())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flight_client::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.link.uri.is_empty() {
            return Err(invalid("link uri cannot be empty"));
        }

        if self.link.connect_timeout_ms == 0 || self.link.connect_timeout_ms > 120000 {
            return Err(invalid("connect_timeout_ms must be between 1 and 120000"));
        }

        if self.control.custom_controller == self.control.default_controller {
            return Err(invalid("custom_controller and default_controller must differ"));
        }

        if self.telemetry.period_ms == 0 || self.telemetry.period_ms > 1000 {
            return Err(invalid("telemetry period_ms must be between 1 and 1000"));
        }

        if self.telemetry.max_variables_per_group == 0 {
            return Err(invalid("max_variables_per_group must be greater than 0"));
        }

        if self.telemetry.max_payload_bytes == Some(0) {
            return Err(invalid("max_payload_bytes must be greater than 0"));
        }

        let mut seen = HashSet::new();
        for var in &self.telemetry.variables {
            if var.name.is_empty() {
                return Err(invalid("telemetry variable names cannot be empty"));
            }
            if !seen.insert(var.name.as_str()) {
                return Err(invalid(format!("duplicate telemetry variable '{}'", var.name)));
            }
        }

        if self.trajectory.tick_interval_ms == 0 || self.trajectory.tick_interval_ms > 1000 {
            return Err(invalid("tick_interval_ms must be between 1 and 1000"));
        }

        if self.recorder.output_path.is_empty() {
            return Err(invalid("recorder output_path cannot be empty"));
        }

        if let Some(dir) = &self.log.dir {
            if dir.is_empty() {
                return Err(invalid("log dir cannot be empty when set"));
            }
        }

        Ok(())
    }
}
