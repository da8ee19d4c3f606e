//! Engine configuration (MTG-009)
//!
//! Every tunable the pipeline consumes in one serde-loadable document:
//! capture interval, segmentation thresholds, spectral parameters, tier
//! policy, verification policy. Missing sections fall back to defaults,
//! so a deployment overrides only what it changes:
//!
//! ```yaml
//! segmenter:
//!   idle_watts: 80.0
//! tier:
//!   rules:
//!     - tier: tier_1
//!       max_cv: 0.10
//!       max_avg_power_watts: 150.0
//!       discount_percentage: 20.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::qualify::VerifyConfig;
use crate::spectral::SpectralConfig;
use crate::telemetry::{CaptureConfig, SegmenterConfig};
use crate::tier::TierPolicy;

/// Errors from configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capture session parameters
    pub capture: CaptureConfig,
    /// Phase segmentation thresholds
    pub segmenter: SegmenterConfig,
    /// Spectral analysis parameters
    pub spectral: SpectralConfig,
    /// Pricing tier rules
    pub tier: TierPolicy,
    /// Verification policy
    pub verify: VerifyConfig,
}

impl EngineConfig {
    /// Parse a YAML configuration document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&yaml)
    }
}
