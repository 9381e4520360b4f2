//! Configuration loading using Figment
//!
//! Settings are merged from, in increasing priority:
//! 1. Built-in defaults
//! 2. A TOML file (`swmr-monitor.toml` unless another path is given)
//! 3. Environment variables prefixed with `SWMR_MONITOR_`, nested keys separated by `__`
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use swmr_monitor::config::MonitorSettings;
//!
//! let settings = MonitorSettings::load()?;
//! settings.validate()?;
//! println!("Watching {}", settings.dataset.path.display());
//! # Ok::<(), swmr_monitor::error::MonitorError>(())
//! ```
//!
//! Environment override: `SWMR_MONITOR_MONITOR__TIMEOUT_SECS=5`

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, MonitorResult};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "swmr-monitor.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SWMR_MONITOR_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonitorSettings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Which dataset to watch
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// Polling and timeout behaviour
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Optional override of the built-in reference pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Include source file and line in log lines
    #[serde(default)]
    pub log_file_and_line: bool,
    /// Include thread names in log lines
    #[serde(default)]
    pub log_thread_names: bool,
}

/// Dataset location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// File holding the growing dataset
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Dataset object inside the file
    #[serde(default = "default_dataset_name")]
    pub name: String,
}

/// Monitor loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds without new data before the session ends (0 or less disables)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
    /// Sleep between polls that found no new data, in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    /// Validate every committed frame instead of only the newest one
    #[serde(default)]
    pub catch_up: bool,
}

/// Reference pattern override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Samples per row
    pub width: usize,
    /// Number of rows
    pub height: usize,
    /// Row-major samples; defaults to counting up from 1
    #[serde(default)]
    pub samples: Option<Vec<u32>>,
}

// Default value functions
fn default_name() -> String {
    "swmr-monitor".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_path() -> PathBuf {
    PathBuf::from("swmr.h5")
}

fn default_dataset_name() -> String {
    crate::store::hdf5::DEFAULT_DATASET.to_string()
}

fn default_timeout_secs() -> f64 {
    2.0
}

fn default_poll_interval_secs() -> f64 {
    0.2
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            log_file_and_line: false,
            log_thread_names: false,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            name: default_dataset_name(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            catch_up: false,
        }
    }
}

impl MonitorConfig {
    /// Inactivity timeout; `None` when disabled.
    ///
    /// A value too large to represent also yields `None`; `validate` rejects it.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs > 0.0 {
            Duration::try_from_secs_f64(self.timeout_secs).ok()
        } else {
            None
        }
    }

    /// Poll interval as a duration. Unusable values fall back to the default.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}

impl MonitorSettings {
    /// Load configuration from `swmr-monitor.toml` and environment variables.
    pub fn load() -> MonitorResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MonitorResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The provider stack used by `load_from`.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(MonitorSettings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> MonitorResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MonitorError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(MonitorError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.dataset.path.as_os_str().is_empty() {
            return Err(MonitorError::Configuration(
                "dataset.path must not be empty".to_string(),
            ));
        }
        if self.dataset.name.is_empty() {
            return Err(MonitorError::Configuration(
                "dataset.name must not be empty".to_string(),
            ));
        }

        let timeout_secs = self.monitor.timeout_secs;
        if !timeout_secs.is_finite()
            || (timeout_secs > 0.0 && Duration::try_from_secs_f64(timeout_secs).is_err())
        {
            return Err(MonitorError::Configuration(format!(
                "Invalid timeout_secs {timeout_secs}. Must be a finite number of seconds \
                 representable as a duration (0 disables)"
            )));
        }
        let poll_interval_secs = self.monitor.poll_interval_secs;
        if !matches!(Duration::try_from_secs_f64(poll_interval_secs), Ok(d) if !d.is_zero()) {
            return Err(MonitorError::Configuration(format!(
                "Invalid poll_interval_secs {poll_interval_secs}. Must be greater than 0 \
                 and representable as a duration"
            )));
        }

        if let Some(reference) = &self.reference {
            if reference.width == 0 || reference.height == 0 {
                return Err(MonitorError::Configuration(format!(
                    "Invalid reference shape {}x{}. Both dimensions must be non-zero",
                    reference.width, reference.height
                )));
            }
            let Some(expected) = reference.width.checked_mul(reference.height) else {
                return Err(MonitorError::Configuration(format!(
                    "Invalid reference shape {}x{}. Sample count overflows",
                    reference.width, reference.height
                )));
            };
            if let Some(samples) = &reference.samples {
                if samples.len() != expected {
                    return Err(MonitorError::Configuration(format!(
                        "Reference has {} samples but {}x{} needs {}",
                        samples.len(),
                        reference.width,
                        reference.height,
                        expected
                    )));
                }
            }
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> MonitorResult<String> {
        toml::to_string_pretty(self).map_err(|e| MonitorError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behaviour() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.monitor.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(settings.monitor.poll_interval(), Duration::from_millis(200));
        assert!(!settings.monitor.catch_up);
        assert_eq!(settings.dataset.name, "data");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn non_positive_timeout_disables_it() {
        let mut config = MonitorConfig::default();
        config.timeout_secs = 0.0;
        assert_eq!(config.timeout(), None);
        config.timeout_secs = -1.0;
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = MonitorSettings::default();
        settings.application.log_level = "invalid".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut settings = MonitorSettings::default();
        settings.monitor.poll_interval_secs = 0.0;
        assert!(matches!(
            settings.validate(),
            Err(MonitorError::Configuration(_))
        ));
    }

    #[test]
    fn oversized_durations_are_rejected_not_panicking() {
        let mut settings = MonitorSettings::default();
        settings.monitor.timeout_secs = 1e300;
        assert!(matches!(
            settings.validate(),
            Err(MonitorError::Configuration(_))
        ));
        assert_eq!(settings.monitor.timeout(), None);

        let mut settings = MonitorSettings::default();
        settings.monitor.poll_interval_secs = 1e300;
        assert!(matches!(
            settings.validate(),
            Err(MonitorError::Configuration(_))
        ));
        assert_eq!(settings.monitor.poll_interval(), Duration::from_millis(200));
    }

    #[test]
    fn overflowing_reference_shape_is_rejected() {
        let mut settings = MonitorSettings::default();
        settings.reference = Some(ReferenceConfig {
            width: usize::MAX,
            height: 2,
            samples: None,
        });
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn reference_sample_count_is_checked() {
        let mut settings = MonitorSettings::default();
        settings.reference = Some(ReferenceConfig {
            width: 2,
            height: 2,
            samples: Some(vec![1, 2, 3]),
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut settings = MonitorSettings::default();
        settings.monitor.catch_up = true;
        let text = settings.to_toml().unwrap();
        let parsed: MonitorSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
