//! Layer-by-layer tree growth.
//!
//! For every layer the grower dispatches one [`scan_feature`] job per sampled
//! feature. Only after every job has scanned and committed does it consume
//! the branch tags and move each row to its child node.

use std::time::Instant;

use parking_lot::Mutex;

use super::sampling::{FeatureSampler, RowSampler};
use super::split::{scan_feature, LayerContext, RowAssignment, ScanStats, BRANCH_LEFT, BRANCH_RIGHT};
use super::tree::{layer_range, left, right, tree_size, GrownTree, MasterTree, TrainingNode};
use crate::concurrency::dispatch;
use crate::data::ColumnCache;

// =============================================================================
// GrowerParams
// =============================================================================

/// Tree growth parameters, derived from [`GbdtConfig`](super::GbdtConfig).
#[derive(Debug, Clone)]
pub struct GrowerParams {
    pub layer_num: usize,
    pub shrinkage: f32,
    pub sample_instance: f32,
    pub sample_feature: f32,
    pub feature_mask: Vec<usize>,
    pub seed: u64,
    pub thread_num: usize,
    pub output_feature_weight: bool,
}

impl Default for GrowerParams {
    fn default() -> Self {
        Self {
            layer_num: 5,
            shrinkage: 0.3,
            sample_instance: 1.0,
            sample_feature: 1.0,
            feature_mask: Vec::new(),
            seed: 42,
            thread_num: 8,
            output_feature_weight: false,
        }
    }
}

/// What one call to [`TreeGrower::grow`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TreeStats {
    /// Rows in this tree's sample.
    pub sampled: usize,
    /// Residual variance over the sample before the tree.
    pub root_mse: f64,
    pub splits: usize,
    pub tries: usize,
    pub commits: usize,
}

// =============================================================================
// TreeGrower
// =============================================================================

/// Grows the trees of one training run over a column cache.
pub struct TreeGrower<'a> {
    cache: &'a ColumnCache,
    params: GrowerParams,
    rows: Vec<RowAssignment>,
    /// Dimensions with a loaded column and not masked.
    candidates: Vec<usize>,
    feature_sampler: FeatureSampler,
    importance: Vec<f64>,
    scratch: Mutex<Vec<Vec<u32>>>,
}

impl<'a> TreeGrower<'a> {
    /// Start from residuals equal to the labels.
    pub fn new(cache: &'a ColumnCache, params: GrowerParams) -> Self {
        let rows = cache.labels().iter().map(|&l| RowAssignment::new(l)).collect();
        let candidates = (0..cache.dim())
            .filter(|d| !params.feature_mask.contains(d))
            .filter(|&d| cache.column(d).is_some())
            .collect();
        Self {
            feature_sampler: FeatureSampler::new(params.sample_feature, params.seed),
            importance: vec![0.0; cache.dim()],
            rows,
            candidates,
            cache,
            params,
            scratch: Mutex::new(Vec::new()),
        }
    }

    pub fn params(&self) -> &GrowerParams {
        &self.params
    }

    pub fn rows(&self) -> &[RowAssignment] {
        &self.rows
    }

    /// Node of the last grown tree owning each row.
    pub fn row_nodes(&self) -> Vec<u32> {
        self.rows.iter().map(|r| r.node).collect()
    }

    pub fn residuals(&self) -> Vec<f32> {
        self.rows.iter().map(|r| r.residual).collect()
    }

    /// Sum of committed split scores per feature.
    pub fn importance(&self) -> &[f64] {
        &self.importance
    }

    pub fn into_importance(self) -> Vec<f64> {
        self.importance
    }

    /// Mean squared residual over all rows.
    pub fn loss(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let sq: f64 = self
            .rows
            .iter()
            .map(|r| f64::from(r.residual) * f64::from(r.residual))
            .sum();
        sq / self.rows.len() as f64
    }

    /// Grow tree `tree_index`, finalize its leaf means and update the
    /// residuals of its sampled rows.
    pub fn grow(&mut self, tree_index: usize) -> (GrownTree, TreeStats) {
        let sampler = RowSampler::new(tree_index, self.params.sample_instance);
        let mut master = MasterTree::new(tree_size(self.params.layer_num));
        let mut stats = self.init_root(&mut master, sampler);

        for depth in 0..self.params.layer_num {
            let start = Instant::now();
            let features = self
                .feature_sampler
                .sample(&self.candidates, tree_index, depth);
            let jobs = self.grow_layer(&master, sampler, depth, stats.sampled, &features);
            for job in &jobs {
                stats.tries += job.tries;
                stats.commits += job.commits;
                log::debug!(
                    "tree {tree_index} layer {depth} feature {}: {} tries, {} commits",
                    job.feature,
                    job.tries,
                    job.commits
                );
            }
            self.advance_rows();
            self.accumulate_importance(&master, depth);
            log::debug!(
                "tree {tree_index} layer {depth}: {} features in {:.2?}",
                features.len(),
                start.elapsed()
            );
            if self.params.output_feature_weight {
                self.log_importance(tree_index, depth);
            }
        }

        let grown = finalize(master);
        stats.splits = grown.split_count();
        self.update_residuals(&grown, sampler);
        (grown, stats)
    }

    fn init_root(&mut self, master: &mut MasterTree, sampler: RowSampler) -> TreeStats {
        let mut count = 0;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for (row, assignment) in self.rows.iter_mut().enumerate() {
            assignment.node = 0;
            assignment.take_branch();
            if sampler.is_sampled(row as u32) {
                let r = f64::from(assignment.residual);
                count += 1;
                sum += r;
                sum_sq += r * r;
            }
        }
        *master.get_mut(0) = TrainingNode::with_range(0, count, sum, sum_sq);
        let root_mse = if count > 0 {
            (sum_sq - sum * sum / count as f64) / count as f64
        } else {
            0.0
        };
        TreeStats {
            sampled: count,
            root_mse,
            ..TreeStats::default()
        }
    }

    fn grow_layer(
        &self,
        master: &MasterTree,
        sampler: RowSampler,
        depth: usize,
        sampled: usize,
        features: &[usize],
    ) -> Vec<ScanStats> {
        let ctx = LayerContext {
            tree: master,
            rows: &self.rows,
            sampler,
            depth,
            sampled,
        };
        let ctx = &ctx;
        let scratch = &self.scratch;
        let jobs: Vec<_> = features
            .iter()
            .filter_map(|&d| self.cache.column(d).map(|column| (d, column)))
            .map(|(d, column)| {
                move || {
                    let mut order = scratch.lock().pop().unwrap_or_default();
                    let stats = scan_feature(ctx, d, column, &mut order);
                    scratch.lock().push(order);
                    stats
                }
            })
            .collect();
        dispatch(jobs, self.params.thread_num)
    }

    /// Move every tagged row to the child its node's winning split chose.
    fn advance_rows(&mut self) {
        for row in &mut self.rows {
            match row.take_branch() {
                BRANCH_LEFT => row.node = left(row.node as usize) as u32,
                BRANCH_RIGHT => row.node = right(row.node as usize) as u32,
                _ => {}
            }
        }
    }

    fn accumulate_importance(&mut self, master: &MasterTree, depth: usize) {
        let (first, last) = layer_range(depth);
        for n in first..last {
            let node = master.snapshot(n);
            if !node.is_leaf() {
                self.importance[node.feature as usize] += node.score;
            }
        }
    }

    fn log_importance(&self, tree_index: usize, depth: usize) {
        let weights: Vec<String> = self
            .importance
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0.0)
            .map(|(d, w)| format!("{d}:{w:.6}"))
            .collect();
        log::info!(
            "feature importance after tree {tree_index} layer {depth}: {}",
            weights.join(" ")
        );
    }

    fn update_residuals(&mut self, grown: &GrownTree, sampler: RowSampler) {
        let shrinkage = f64::from(self.params.shrinkage);
        for (row, assignment) in self.rows.iter_mut().enumerate() {
            if sampler.is_sampled(row as u32) {
                let mean = grown.nodes[assignment.node as usize].mean;
                assignment.residual = (f64::from(assignment.residual) - shrinkage * mean) as f32;
            }
        }
    }
}

/// Compute leaf means and release the node locks.
fn finalize(mut master: MasterTree) -> GrownTree {
    for n in 0..master.len() {
        let node = master.get_mut(n);
        if node.count() > 0 {
            node.mean = node.sum / node.count() as f64;
        }
    }
    master.into_grown()
}
