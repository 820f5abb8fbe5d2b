//! Stream settings loaded from YAML.
//!
//! ```yaml
//! verbose: true
//! fade-time: 1s
//! fade-frequency: 60
//! timeout: 10s
//! channel: 14
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::traits::Configuration;

/// Failure to load or interpret stream settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings from {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The settings are not valid YAML for this schema.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// A duration does not fit the driver's 32-bit millisecond fields.
    #[error("{field} of {value:?} exceeds the driver limit of {max} ms")]
    OutOfRange {
        /// Settings key.
        field: &'static str,
        /// Value given.
        value: Duration,
        /// Largest accepted value in milliseconds.
        max: u32,
    },
}

/// Settings for one streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct StreamSettings {
    /// Driver log verbosity.
    pub verbose: bool,
    /// How long a lit pixel takes to fade out.
    #[serde(with = "humantime_serde")]
    pub fade_time: Duration,
    /// How many times per second the fade is applied.
    pub fade_frequency: u32,
    /// Driver-internal event wait timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Input channel passed to `start`.
    pub channel: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            verbose: false,
            fade_time: Duration::from_secs(1),
            fade_frequency: 60,
            timeout: Duration::from_secs(10),
            channel: 14,
        }
    }
}

impl StreamSettings {
    /// Parse settings from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SettingsError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// The driver configuration these settings describe.
    pub fn configuration(&self) -> Result<Configuration, SettingsError> {
        Ok(Configuration::default()
            .with_verbose(self.verbose)
            .with_fade_time(millis("fade-time", self.fade_time)?)
            .with_fade_frequency(self.fade_frequency)
            .with_timeout(millis("timeout", self.timeout)?))
    }
}

fn millis(field: &'static str, value: Duration) -> Result<u32, SettingsError> {
    u32::try_from(value.as_millis()).map_err(|_| SettingsError::OutOfRange {
        field,
        value,
        max: u32::MAX,
    })
}
