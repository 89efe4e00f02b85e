//! Engine configuration.
//!
//! Everything that is decided once at startup lives here: the sample rate and
//! wavetable length that [`SynthContext`] derives its constants from, the size
//! of the mixer, and the capacity of the control → audio command queue.
//! Configuration can be built in code or read from TOML; missing keys fall back
//! to [`EngineConfig::default`].

use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{dsp::context::SynthContext, synth::mixer::PanLaw};

/// Errors produced while reading or validating an [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[cfg(feature = "serde")]
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A value is out of its usable range.
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Length of every wavetable (without the guard point).
    pub table_length: usize,
    /// Apply Lanczos sigma correction to band-limited tables.
    pub gibbs: bool,
    /// Number of mixer input channels.
    pub mixer_channels: usize,
    /// Number of reverb effect units on the mixer.
    pub fx_units: usize,
    /// Reverb time (seconds) for each fx unit.
    pub reverb_time: f32,
    /// Pan law used by mixer channels.
    pub pan_law: PanLaw,
    /// Capacity of the control → audio command queue.
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            table_length: 16_384,
            gibbs: true,
            mixer_channels: 16,
            fx_units: 1,
            reverb_time: 1.5,
            pan_law: PanLaw::Trig,
            command_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text.
    #[cfg(feature = "serde")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file.
    #[cfg(feature = "serde")]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8_000.0..=384_000.0).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: format!("{} Hz is outside 8000..=384000", self.sample_rate),
            });
        }
        if self.table_length < 256 || !self.table_length.is_power_of_two() {
            return Err(ConfigError::Invalid {
                field: "table_length",
                reason: format!("{} must be a power of two >= 256", self.table_length),
            });
        }
        if self.mixer_channels == 0 {
            return Err(ConfigError::Invalid {
                field: "mixer_channels",
                reason: "at least one channel is required".to_string(),
            });
        }
        Ok(())
    }

    /// Build the shared synthesis context described by this configuration.
    pub fn context(&self) -> SynthContext {
        SynthContext::with_options(self.sample_rate, self.table_length, self.gibbs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_odd_table_length() {
        let config = EngineConfig {
            table_length: 1000,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("table_length"), "got: {err}");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("sample_rate = 48000.0\nfx_units = 2\n").unwrap();
        assert_eq!(config.sample_rate, 48_000.0);
        assert_eq!(config.fx_units, 2);
        assert_eq!(config.table_length, EngineConfig::default().table_length);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn invalid_toml_reports_parse_error() {
        let err = EngineConfig::from_toml_str("sample_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn missing_file_reports_path() {
        let err = EngineConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
