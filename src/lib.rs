//! presort-boost: gradient boosted decision trees over a pre-sorted column cache.
//!
//! The engine trains regression trees on large sparse datasets by pre-sorting
//! every feature column once, then growing each tree layer by layer with one
//! split-search job per feature. Jobs scan their column independently and
//! commit the best split for each node into a shared, per-node locked tree.
//!
//! # Key Types
//!
//! - [`GbdtConfig`] - Trainer configuration (builder with validation)
//! - [`GbdtTrainer`] - Builds the sorted column cache and grows the ensemble
//! - [`GbdtModel`] - Trained ensemble: prediction, leaf features, persistence
//! - [`Row`] / [`RowReader`] - Sparse labeled rows and the datasets producing them
//! - [`Pipeline`] / [`dispatch`] - Concurrency primitives shared by all trainers
//!
//! # Training
//!
//! ```ignore
//! use presort_boost::{GbdtConfig, GbdtTrainer, MemoryReader};
//!
//! let config = GbdtConfig::builder().tree_num(20).layer_num(3).build()?;
//! let mut reader = MemoryReader::new(rows);
//! let model = GbdtTrainer::new(config).train(&mut reader)?;
//! let score = model.predict(&row);
//! ```

pub mod concurrency;
pub mod data;
pub mod inference;
pub mod io;
pub mod model;
pub mod training;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use concurrency::{dispatch, stream_rows, Pipeline, PutSlot};
pub use data::{BinaryFileReader, DataError, Feature, MemoryReader, Row, RowReader};
pub use inference::{CompactTree, GbdtModel, LeafFeatureMode};
pub use io::FormatError;
pub use model::{Model, Trainer};
pub use training::{ConfigError, GbdtConfig, GbdtTrainer, TrainError};
pub use utils::{run_with_threads, Parallelism};
