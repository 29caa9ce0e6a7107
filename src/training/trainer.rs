//! GBDT trainer: builds the column cache and runs the boosting loop.
//!
//! # Example
//!
//! ```ignore
//! use presort_boost::{GbdtConfig, GbdtTrainer, MemoryReader};
//!
//! let config = GbdtConfig::builder().tree_num(50).layer_num(4).build()?;
//! let mut trainer = GbdtTrainer::new(config);
//! let model = trainer.train(&mut MemoryReader::new(rows))?;
//! println!("{:?}", trainer.feature_importance());
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::config::GbdtConfig;
use super::grower::{GrowerParams, TreeGrower};
use super::recovery::recover_thresholds;
use super::tree::GrownTree;
use super::TrainError;
use crate::data::{CacheOptions, ColumnCache, RowReader};
use crate::inference::GbdtModel;
use crate::io::{write_model_file, FormatError};

/// File name of the model written when training finishes.
pub const FINAL_AUTOSAVE: &str = "autosave.model";

/// Path of the checkpoint holding the first `trees` trees.
pub fn checkpoint_path(temp_dir: &Path, trees: usize) -> PathBuf {
    temp_dir.join(format!("autosave.{trees:04}.model"))
}

// =============================================================================
// GbdtTrainer
// =============================================================================

/// Trains a [`GbdtModel`] with squared loss.
///
/// Each call to [`train`](Self::train) starts from residuals equal to the
/// labels. Feature importance of the last run is kept on the trainer.
#[derive(Debug, Clone)]
pub struct GbdtTrainer {
    config: GbdtConfig,
    importance: Vec<f64>,
}

impl GbdtTrainer {
    pub fn new(config: GbdtConfig) -> Self {
        Self {
            config,
            importance: Vec::new(),
        }
    }

    pub fn config(&self) -> &GbdtConfig {
        &self.config
    }

    #[inline]
    pub fn layer_num(&self) -> usize {
        self.config.layer_num as usize
    }

    /// Leaf feature slots per tree: `2^(layer_num + 1)`.
    #[inline]
    pub fn tree_node_count(&self) -> usize {
        1usize << (self.config.layer_num + 1)
    }

    /// Sum of committed split scores per dimension, from the last run.
    pub fn feature_importance(&self) -> &[f64] {
        &self.importance
    }

    fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            temp_dir: self.config.temp_dir.clone(),
            reuse: self.config.load_cache,
            memory_limit_bytes: self.config.preprocess_memory_limit_bytes(),
            masked: self.config.feature_mask.clone(),
            n_threads: self.config.thread_num,
        }
    }

    fn grower_params(&self) -> GrowerParams {
        GrowerParams {
            layer_num: self.layer_num(),
            shrinkage: self.config.shrinkage,
            sample_instance: self.config.sample_instance,
            sample_feature: self.config.sample_feature,
            feature_mask: self.config.feature_mask.clone(),
            seed: self.config.seed,
            thread_num: self.config.thread_num,
            output_feature_weight: self.config.output_feature_weight,
        }
    }

    /// Prepare the column cache under `temp_dir`, then train.
    ///
    /// # Errors
    ///
    /// [`TrainError::Config`] when the configuration is invalid;
    /// [`TrainError::EmptyDataset`] when `reader` has no rows; cache, data and
    /// recovery errors otherwise. A failed checkpoint write is only logged.
    pub fn train<R: RowReader + ?Sized>(&mut self, reader: &mut R) -> Result<GbdtModel, TrainError> {
        self.config.validate()?;
        if reader.is_empty() {
            return Err(TrainError::EmptyDataset);
        }
        let cache = ColumnCache::prepare(reader, &self.cache_options())?;
        self.train_with_cache(&cache, reader)
    }

    /// Train on an already prepared cache. `reader` must yield the rows the
    /// cache was built from, in the same order.
    pub fn train_with_cache<R: RowReader + ?Sized>(
        &mut self,
        cache: &ColumnCache,
        reader: &mut R,
    ) -> Result<GbdtModel, TrainError> {
        self.config.validate()?;
        if cache.n_rows() == 0 {
            return Err(TrainError::EmptyDataset);
        }
        let tree_num = self.config.tree_num as usize;
        let shrinkage = self.config.shrinkage;
        let layer_num = self.layer_num();
        let checkpoint_every = self.config.save_model_epoch.map(|e| e as usize);

        let start = Instant::now();
        let mut grower = TreeGrower::new(cache, self.grower_params());
        let mut trees: Vec<GrownTree> = Vec::with_capacity(tree_num);
        // Trees before this index have literal thresholds.
        let mut recovered = 0;

        for t in 0..tree_num {
            let tree_start = Instant::now();
            let (tree, stats) = grower.grow(t);
            trees.push(tree);
            log::info!(
                "tree {t}: {} sampled rows, root mse {:.6}, {} splits, loss {:.6} in {:.2?}",
                stats.sampled,
                stats.root_mse,
                stats.splits,
                grower.loss(),
                tree_start.elapsed()
            );

            let done = t + 1;
            if let Some(every) = checkpoint_every {
                if done % every == 0 {
                    recover_thresholds(&mut trees[recovered..], reader)?;
                    recovered = done;
                    let path = checkpoint_path(&self.config.temp_dir, done);
                    self.save_checkpoint(&trees, &path);
                }
            }
        }

        recover_thresholds(&mut trees[recovered..], reader)?;
        let model = GbdtModel::from_grown(&trees, shrinkage, layer_num)?;
        log::info!("trained {} trees in {:.2?}", model.n_trees(), start.elapsed());

        let path = self.config.temp_dir.join(FINAL_AUTOSAVE);
        match write_checkpoint(&model, &path) {
            Ok(()) => log::info!("model written to {}", path.display()),
            Err(e) => log::warn!("failed to write {}: {e}", path.display()),
        }

        self.importance = grower.into_importance();
        Ok(model)
    }

    fn save_checkpoint(&self, trees: &[GrownTree], path: &Path) {
        let result = GbdtModel::from_grown(trees, self.config.shrinkage, self.layer_num())
            .and_then(|model| write_checkpoint(&model, path));
        match result {
            Ok(()) => log::info!("checkpoint with {} trees written to {}", trees.len(), path.display()),
            Err(e) => log::warn!("failed to write checkpoint {}: {e}", path.display()),
        }
    }
}

fn write_checkpoint(model: &GbdtModel, path: &Path) -> Result<(), FormatError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    write_model_file(model, path)
}
