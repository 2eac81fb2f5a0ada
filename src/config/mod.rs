//! Runner configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. Environment overrides (`DEVICE_NAME`, `SKIP_SIMULATOR_SETUP`)
//! 4. CLI flags
//!
//! The merged value is deserialized once into [`RunnerConfig`]; nothing reads
//! the environment after that.

mod defaults;
mod env;
mod merge;

pub use defaults::{
    builtin_defaults, DEFAULT_CRASH_REPORT_WAIT_SECONDS, DEFAULT_LAUNCH_TIMEOUT_MINUTES,
    DEFAULT_RUN_TIMEOUT_MINUTES, DEFAULT_VERBOSITY,
};
pub use env::{EnvOverrides, DEVICE_NAME_VAR, SKIP_SIMULATOR_SETUP_VAR};
pub use merge::{deep_merge, merge_layers, toml_to_json};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::timeout::{minutes_to_duration, RunTimeouts, TimeoutValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Timeout(#[from] TimeoutValidationError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Run timeout before the multiplier is applied
    pub run_minutes: f64,
    pub multiplier: f64,
    /// Wait for the app to connect to the listener
    pub launch_minutes: f64,
    pub install_minutes: f64,
    pub uninstall_minutes: f64,
    pub crash_report_wait_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatorSettings {
    /// Reset simulator state before and after the run
    #[serde(default)]
    pub ensure_clean_state: bool,
    /// Overrides `ensure_clean_state`
    #[serde(default)]
    pub skip_setup: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Use this device verbatim instead of discovering one
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub companion_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlaunchSettings {
    pub path: PathBuf,
    #[serde(default)]
    pub xcode_root: Option<PathBuf>,
    pub verbosity: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerSettings {
    /// Address(es) the device should report to; defaults to the host's addresses
    #[serde(default)]
    pub host: Option<String>,
    /// Prefer the shared-file transport on simulators
    #[serde(default)]
    pub use_file_transport: bool,
}

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub timeouts: TimeoutSettings,
    pub simulator: SimulatorSettings,
    pub device: DeviceSettings,
    pub mlaunch: MlaunchSettings,
    #[serde(default)]
    pub listener: ListenerSettings,
    pub output_directory: PathBuf,
    /// Where simulator crash reports land; defaults to the user's DiagnosticReports
    #[serde(default)]
    pub crash_reports_directory: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        // The built-in layer always deserializes
        Self::from_value(builtin_defaults()).unwrap_or_else(|_| unreachable!())
    }
}

impl RunnerConfig {
    /// Merge all layers and validate.
    pub fn load(
        config_file: Option<&Path>,
        env: &EnvOverrides,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![builtin_defaults()];

        if let Some(path) = config_file {
            layers.push(Self::load_toml_file(path)?);
        }

        layers.push(env.to_value());

        if let Some(cli) = cli_overrides {
            layers.push(cli);
        }

        let config = Self::from_value(merge_layers(layers))?;
        config.validate()?;
        tracing::debug!(?config, "resolved runner configuration");
        Ok(config)
    }

    fn from_value(value: Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    fn load_toml_file(path: &Path) -> Result<Value, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: toml::Value = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(toml_to_json(parsed))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.run_timeouts().validate()?;
        if self.mlaunch.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("mlaunch.path must not be empty".to_string()));
        }
        if self.mlaunch.verbosity > 10 {
            return Err(ConfigError::Invalid(format!(
                "mlaunch.verbosity must be at most 10, got {}",
                self.mlaunch.verbosity
            )));
        }
        for (key, minutes) in [
            ("install_minutes", self.timeouts.install_minutes),
            ("uninstall_minutes", self.timeouts.uninstall_minutes),
        ] {
            if !(minutes.is_finite() && minutes > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{} must be positive, got {}",
                    key, minutes
                )));
            }
        }
        Ok(())
    }

    /// Launch and run timeouts derived from the timeout settings.
    pub fn run_timeouts(&self) -> RunTimeouts {
        RunTimeouts::from_minutes(
            self.timeouts.launch_minutes,
            self.timeouts.run_minutes,
            self.timeouts.multiplier,
        )
    }

    /// Whether clean-state preparation should run for simulators.
    pub fn effective_clean_simulator_state(&self) -> bool {
        self.simulator.ensure_clean_state && !self.simulator.skip_setup
    }

    /// Number of `-v` flags passed to mlaunch.
    pub fn verbosity_flags(&self) -> usize {
        self.mlaunch.verbosity as usize + 1
    }

    pub fn install_timeout(&self) -> Duration {
        minutes_to_duration(self.timeouts.install_minutes)
    }

    pub fn uninstall_timeout(&self) -> Duration {
        minutes_to_duration(self.timeouts.uninstall_minutes)
    }

    pub fn crash_report_wait(&self) -> Duration {
        Duration::from_secs(self.timeouts.crash_report_wait_seconds)
    }
}
