//! Configuration for the FED9U decoder and emulator
//!
//! Loaded from a TOML file with three optional tables:
//! - `[decoder]`: which event checks run
//! - `[description]`: the FED device description (enabled FE units, APVs)
//! - `[emulator]`: fake event generator settings
//!
//! # Example
//! ```ignore
//! let config = Config::load("fed.toml")?;
//! let event = decode_event(&words, &config)?;
//! ```

pub mod description;

pub use description::{FeUnitDescription, FedDescription};

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::emulator::{EmulatorConfig, EmulatorError};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub decoder: DecoderOptions,
    #[serde(default)]
    pub description: FedDescription,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

/// Event checks applied after decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderOptions {
    /// Compare the trailer CRC with the calculated one
    pub verify_crc: bool,
    /// Require healthy status bits on every enabled channel
    pub check_channel_status: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            verify_crc: true,
            check_channel_status: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        use crate::decoder::types::geometry::{APVS_PER_FEUNIT, FEUNITS_PER_FED};

        if self.description.fe_units.len() > FEUNITS_PER_FED {
            return Err(ConfigError::InvalidValue {
                field: "description.fe_units".to_string(),
                reason: format!(
                    "{} entries, a FED has {}",
                    self.description.fe_units.len(),
                    FEUNITS_PER_FED
                ),
            });
        }
        for (index, fe) in self.description.fe_units.iter().enumerate() {
            if let Some(apv) = fe.disabled_apvs.iter().find(|&&a| a as usize >= APVS_PER_FEUNIT) {
                return Err(ConfigError::InvalidValue {
                    field: format!("description.fe_units[{index}].disabled_apvs"),
                    reason: format!("APV {apv} out of range 0..{APVS_PER_FEUNIT}"),
                });
            }
        }
        if let Err(EmulatorError::InvalidParameter { field, value }) =
            self.emulator.check_parameters()
        {
            return Err(ConfigError::InvalidValue {
                field: format!("emulator.{field}"),
                reason: format!("{value} out of range"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::types::{DaqMode, EventFormat};

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.decoder.verify_crc);
        assert!(!config.decoder.check_channel_status);
        assert!(config.description.fe_units.is_empty());
        assert!(config.description.is_channel_enabled(7, 11));
        assert_eq!(config.emulator.mode, DaqMode::ZeroSuppressed);
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
[decoder]
verify_crc = false
check_channel_status = true

[description]
fed_id = 50

[[description.fe_units]]
enabled = true
disabled_apvs = [0, 1]

[[description.fe_units]]
enabled = false

[emulator]
seed = 7
mode = "VirginRaw"
format = "OldVme"
channels_per_fe_unit = 4
"#;
        let config = Config::from_toml(toml).unwrap();
        assert!(!config.decoder.verify_crc);
        assert!(config.decoder.check_channel_status);
        assert_eq!(config.description.fed_id, 50);
        assert!(!config.description.is_channel_enabled(0, 0));
        assert!(config.description.is_channel_enabled(0, 1));
        assert!(!config.description.is_fe_unit_enabled(1));
        assert_eq!(config.emulator.seed, Some(7));
        assert_eq!(config.emulator.mode, DaqMode::VirginRaw);
        assert_eq!(config.emulator.format, EventFormat::OldVme);
        assert_eq!(config.emulator.channels_per_fe_unit, 4);
        assert_eq!(config.emulator.zs_threshold, 20);
    }

    #[test]
    fn test_apv_out_of_range() {
        let toml = r#"
[[description.fe_units]]
disabled_apvs = [24]
"#;
        let err = Config::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(err.to_string().contains("APV 24"));
    }

    #[test]
    fn test_negative_noise_sigma() {
        let err = Config::from_toml("[emulator]\nnoise_sigma = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert!(err.to_string().contains("emulator.noise_sigma"));

        let err = Config::from_toml("[emulator]\npedestal_spread = -0.5\n").unwrap_err();
        assert!(err.to_string().contains("emulator.pedestal_spread"));
    }

    #[test]
    fn test_hit_probability_range() {
        let err = Config::from_toml("[emulator]\nhit_probability = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("emulator.hit_probability"));
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("[decoder\nverify_crc = 1").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load("/nonexistent/fed.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
