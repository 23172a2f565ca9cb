use cv_photo::CalibrationConfig;
use cv_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Where dated calibration files are read and written.
    pub calibration_dir: PathBuf,
    /// Output frame rate when the left source does not report one.
    pub default_fps: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            calibration_dir: PathBuf::from("calibrations"),
            default_fps: 30.0,
        }
    }
}

/// Settings for a full sync, calibrate and stitch run. Every field has a
/// default, so a config file only lists what it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker threads for the parallel image kernels.
    pub threads: Option<usize>,
    pub sync: SyncConfig,
    pub calibration: CalibrationConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
