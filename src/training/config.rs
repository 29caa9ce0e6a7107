//! GBDT trainer configuration with builder pattern.
//!
//! # Example
//!
//! ```ignore
//! use presort_boost::GbdtConfig;
//!
//! let config = GbdtConfig::builder()
//!     .tree_num(200)
//!     .layer_num(4)
//!     .shrinkage(0.1)
//!     .sample_instance(0.8)
//!     .build()?;
//!
//! let config = GbdtConfig::from_json_str(r#"{"tree_num": 50, "thread_num": 4}"#)?;
//! ```

use std::path::PathBuf;

use bon::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Deepest supported tree; a tree stores `2^(layer_num + 2)` node slots.
pub const MAX_LAYER_NUM: u32 = 24;

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("tree_num must be at least 1")]
    InvalidTreeNum,

    #[error("layer_num must be at most {max}, got {value}")]
    InvalidLayerNum { value: u32, max: u32 },

    #[error("thread_num must be at least 1")]
    InvalidThreadNum,

    #[error("shrinkage must be positive and finite, got {0}")]
    InvalidShrinkage(f32),

    #[error("{field} must be in [0, 1], got {value}")]
    InvalidSamplingRatio { field: &'static str, value: f32 },

    #[error("save_model_epoch must be at least 1")]
    InvalidSaveModelEpoch,

    #[error("feature_mask entry {0} is not a valid feature index")]
    InvalidFeatureMask(usize),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// GbdtConfig
// =============================================================================

/// Configuration of one GBDT training run.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
#[serde(default)]
pub struct GbdtConfig {
    // === Boosting ===
    /// Number of trees. Default: 100.
    #[builder(default = 100)]
    pub tree_num: u32,

    /// Maximum depth; every tree has `layer_num` split layers. Default: 5.
    #[builder(default = 5)]
    pub layer_num: u32,

    /// Shrinkage applied to each tree's contribution. Default: 0.3.
    #[builder(default = 0.3)]
    pub shrinkage: f32,

    // === Sampling ===
    /// Probability of searching a feature in a layer. Default: 1.0.
    #[builder(default = 1.0)]
    pub sample_feature: f32,

    /// Fraction of rows used by each tree. Default: 1.0.
    #[builder(default = 1.0)]
    pub sample_instance: f32,

    /// Dimensions never used for splits.
    #[builder(default)]
    pub feature_mask: Vec<usize>,

    /// Seed for feature sampling. Default: 42.
    #[builder(default = 42)]
    pub seed: u64,

    // === Resources ===
    /// Worker threads for split search and cache construction. Default: 8.
    #[builder(default = 8)]
    pub thread_num: usize,

    /// Directory for column cache files and checkpoints. Default: `gbdt_temp`.
    #[builder(default = PathBuf::from("gbdt_temp"), into)]
    pub temp_dir: PathBuf,

    /// Reuse column cache files from a previous run. Default: false.
    #[builder(default = false)]
    pub load_cache: bool,

    /// Memory budget for one cache construction pass, in GiB. Default: 60.
    #[builder(default = 60)]
    pub preprocess_memory_limit_gb: u32,

    // === Output ===
    /// Write a checkpoint every this many trees. `None` disables checkpoints.
    pub save_model_epoch: Option<u32>,

    /// Log accumulated feature importance after every layer. Default: false.
    #[builder(default = false)]
    pub output_feature_weight: bool,
}

/// Custom finishing function that validates the config.
impl<S: gbdt_config_builder::IsComplete> GbdtConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any parameter is invalid.
    pub fn build(self) -> Result<GbdtConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl GbdtConfig {
    /// Parse a JSON object; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: GbdtConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Node slots per stored tree: `2^(layer_num + 2)`.
    #[inline]
    pub fn tree_size(&self) -> usize {
        1usize << (self.layer_num + 2)
    }

    /// Memory budget of one cache construction pass, in bytes.
    #[inline]
    pub fn preprocess_memory_limit_bytes(&self) -> u64 {
        u64::from(self.preprocess_memory_limit_gb) << 30
    }

    /// Check every parameter; fields are public, so trainers re-check before use.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.tree_num == 0 {
            return Err(ConfigError::InvalidTreeNum);
        }
        if self.layer_num > MAX_LAYER_NUM {
            return Err(ConfigError::InvalidLayerNum {
                value: self.layer_num,
                max: MAX_LAYER_NUM,
            });
        }
        if self.thread_num == 0 {
            return Err(ConfigError::InvalidThreadNum);
        }
        if !(self.shrinkage > 0.0 && self.shrinkage.is_finite()) {
            return Err(ConfigError::InvalidShrinkage(self.shrinkage));
        }
        for (field, value) in [
            ("sample_feature", self.sample_feature),
            ("sample_instance", self.sample_instance),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidSamplingRatio { field, value });
            }
        }
        if self.save_model_epoch == Some(0) {
            return Err(ConfigError::InvalidSaveModelEpoch);
        }
        if let Some(&d) = self.feature_mask.iter().find(|&&d| d > i32::MAX as usize) {
            return Err(ConfigError::InvalidFeatureMask(d));
        }
        Ok(())
    }
}

impl Default for GbdtConfig {
    fn default() -> Self {
        Self::builder().__build_internal()
    }
}
