//! Prediction with trained ensembles.
//!
//! - [`GbdtModel`]: the ensemble; scores, staged scores, leaf features
//! - [`CompactTree`]: one tree in its read-optimized form
//! - [`evaluate`] / [`dump_leaf_features`]: multi-threaded passes over a
//!   dataset that keep input order

mod compact;
mod model;
mod parallel;

pub use compact::{CompactNode, CompactTree};
pub use model::{GbdtModel, LeafFeatureMode, NodeRecord};
pub use parallel::{dump_leaf_features, evaluate};
