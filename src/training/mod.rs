//! Training infrastructure.
//!
//! - [`GbdtConfig`]: validated trainer configuration
//! - [`GbdtTrainer`]: cache preparation, boosting loop, checkpoints
//! - [`TreeGrower`]: grows one tree layer by layer with parallel split search
//! - [`RowSampler`] / [`FeatureSampler`]: per-tree row and per-layer feature samples
//! - [`recover_thresholds`]: resolves split rows to literal thresholds
//! - [`EpochRunner`]: generic multi-threaded epoch loop for [`Updatable`] learners

mod config;
mod epoch;
mod grower;
mod recovery;
mod sampling;
mod split;
mod trainer;
pub mod tree;

pub use config::{ConfigError, GbdtConfig, MAX_LAYER_NUM};
pub use epoch::{EpochReport, EpochRunner, Updatable};
pub use grower::{GrowerParams, TreeGrower, TreeStats};
pub use recovery::recover_thresholds;
pub use sampling::{FeatureSampler, RowSampler};
pub use split::{mid_score, split_mse, RowAssignment};
pub use trainer::{checkpoint_path, GbdtTrainer, FINAL_AUTOSAVE};
pub use tree::{GrownTree, TrainingNode, LEAF};

use thiserror::Error;

use crate::data::{CacheError, DataError};
use crate::io::FormatError;

/// Errors that abort a training run.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("column cache: {0}")]
    Cache(#[from] CacheError),

    #[error("dataset: {0}")]
    Data(#[from] DataError),

    #[error("model: {0}")]
    Format(#[from] FormatError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("dataset has no rows")]
    EmptyDataset,

    #[error("dataset ended before row {row_id} needed for threshold recovery")]
    RecoveryExhausted { row_id: u32 },
}
