//! Per-feature split search over a sorted column.
//!
//! One [`scan_feature`] call handles one feature for every node of the current
//! layer. It walks the feature's sorted column once. Each sampled row owned
//! by a layer node is appended to that node's slice of a job-local position
//! buffer, so after the walk every node's rows are laid out in value order
//! for this feature and the best cut is just a position. Candidates are
//! scored with the mid-score `la²/lc + ra²/rc` (larger is better).
//!
//! After the walk each node's best candidate is committed into the shared
//! [`MasterTree`] under that node's lock. A commit overwrites the node's
//! split, initializes both children, and tags every row of the node with the
//! branch it takes. The winner per node is the lowest weighted MSE, ties going
//! to the lowest feature index, so the grown tree does not depend on the order
//! in which jobs commit.

use std::sync::atomic::{AtomicU8, Ordering};

use super::sampling::RowSampler;
use super::tree::{layer_range, left, right, MasterTree, TrainingNode};
use crate::data::SortedColumn;

pub const BRANCH_NONE: u8 = 0;
pub const BRANCH_LEFT: u8 = 1;
pub const BRANCH_RIGHT: u8 = 2;

// =============================================================================
// RowAssignment
// =============================================================================

/// Per-row boosting state.
#[derive(Debug, Default)]
pub struct RowAssignment {
    /// Label minus the shrunk predictions of all previous trees.
    pub residual: f32,
    /// Node of the current tree that owns this row.
    pub node: u32,
    /// Branch tag written by the commit that won the row's node this layer.
    branch: AtomicU8,
}

impl RowAssignment {
    pub fn new(residual: f32) -> Self {
        Self {
            residual,
            node: 0,
            branch: AtomicU8::new(BRANCH_NONE),
        }
    }

    #[inline]
    pub fn branch(&self) -> u8 {
        self.branch.load(Ordering::Relaxed)
    }

    /// Only the job holding the lock of the row's node writes the tag.
    #[inline]
    fn set_branch(&self, tag: u8) {
        self.branch.store(tag, Ordering::Relaxed);
    }

    /// Read and clear the tag.
    #[inline]
    pub fn take_branch(&mut self) -> u8 {
        std::mem::take(self.branch.get_mut())
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// Mid-score of a cut: `la²/lc + ra²/rc`, skipping empty sides.
#[inline]
pub fn mid_score(left_sum: f64, left_count: usize, right_sum: f64, right_count: usize) -> f64 {
    let mut score = 0.0;
    if left_count > 0 {
        score += left_sum / left_count as f64 * left_sum;
    }
    if right_count > 0 {
        score += right_sum / right_count as f64 * right_sum;
    }
    score
}

/// Weighted MSE of a node split with the given mid-score.
#[inline]
pub fn split_mse(sum_sq: f64, mid: f64, count: usize) -> f64 {
    (sum_sq - mid) / count as f64
}

/// Whether `(score, feature)` beats the committed `(master_score, master_feature)`.
#[inline]
fn beats(score: f64, feature: i32, master_score: f64, master_feature: i32) -> bool {
    score < master_score || (score == master_score && feature < master_feature)
}

// =============================================================================
// Scan
// =============================================================================

/// Shared inputs of one layer's scan jobs.
pub struct LayerContext<'a> {
    pub tree: &'a MasterTree,
    pub rows: &'a [RowAssignment],
    pub sampler: RowSampler,
    pub depth: usize,
    /// Number of sampled rows; the length of the position buffer.
    pub sampled: usize,
}

/// Counters of one scan job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub feature: usize,
    /// Cut points evaluated.
    pub tries: usize,
    /// Nodes whose master split this job replaced.
    pub commits: usize,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    split: usize,
    row: u32,
    left_sum: f64,
    left_sum_sq: f64,
}

/// Job-local view of one layer node.
struct NodeScan {
    master: TrainingNode,
    grow: usize,
    run_key: usize,
    left_sum: f64,
    left_sum_sq: f64,
    best_mid: f64,
    best: Option<Candidate>,
}

impl NodeScan {
    fn new(master: TrainingNode) -> Self {
        Self {
            grow: master.begin,
            run_key: usize::MAX,
            left_sum: 0.0,
            left_sum_sq: 0.0,
            best_mid: mid_score(0.0, 0, master.sum, master.count()),
            best: None,
            master,
        }
    }

    /// Score the cut in front of `row`, the next row of this node.
    #[inline]
    fn evaluate(&mut self, row: u32) {
        let left_count = self.grow - self.master.begin;
        let right_count = self.master.end - self.grow;
        let mid = mid_score(
            self.left_sum,
            left_count,
            self.master.sum - self.left_sum,
            right_count,
        );
        if mid > self.best_mid {
            self.best_mid = mid;
            self.best = Some(Candidate {
                split: self.grow,
                row,
                left_sum: self.left_sum,
                left_sum_sq: self.left_sum_sq,
            });
        }
    }
}

/// Search `feature` for every node of the layer and commit improvements.
///
/// `order` is scratch space; it is resized to `ctx.sampled`.
///
/// # Panics
///
/// Panics if a node receives more rows than its range holds, which means the
/// row assignments and the master tree disagree.
pub fn scan_feature(
    ctx: &LayerContext<'_>,
    feature: usize,
    column: &SortedColumn,
    order: &mut Vec<u32>,
) -> ScanStats {
    assert_eq!(
        column.len(),
        ctx.rows.len(),
        "column of feature {feature} does not cover every row"
    );
    let (first, last) = layer_range(ctx.depth);
    let mut nodes: Vec<NodeScan> = (first..last)
        .map(|n| NodeScan::new(ctx.tree.snapshot(n)))
        .collect();
    order.clear();
    order.resize(ctx.sampled, 0);

    let mut stats = ScanStats {
        feature,
        ..ScanStats::default()
    };
    let every_row = ctx.sampler.is_full();
    let mut run_key = 0;
    for (i, entry) in column.entries().iter().enumerate() {
        let same = entry.same_as_previous();
        if !same {
            run_key = i;
        }
        let row = entry.row();
        if !every_row && !ctx.sampler.is_sampled(row) {
            continue;
        }
        let assignment = &ctx.rows[row as usize];
        let node = assignment.node as usize;
        if !(first..last).contains(&node) {
            continue;
        }

        let scan = &mut nodes[node - first];
        if !same || scan.run_key != run_key {
            stats.tries += 1;
            scan.evaluate(row);
        }
        assert!(
            scan.grow < scan.master.end,
            "growth cursor of node {node} passed its range end {}",
            scan.master.end
        );
        let residual = f64::from(assignment.residual);
        scan.left_sum += residual;
        scan.left_sum_sq += residual * residual;
        order[scan.grow] = row;
        scan.grow += 1;
        scan.run_key = run_key;
    }

    for (offset, scan) in nodes.iter().enumerate() {
        let Some(candidate) = scan.best else {
            continue;
        };
        debug_assert_eq!(scan.grow, scan.master.end);
        let score = split_mse(scan.master.sum_sq, scan.best_mid, scan.master.count());
        if commit(ctx, first + offset, feature as i32, score, candidate, order) {
            stats.commits += 1;
        }
    }
    stats
}

/// Replace the master split of `node` if `score` beats it.
fn commit(
    ctx: &LayerContext<'_>,
    node: usize,
    feature: i32,
    score: f64,
    candidate: Candidate,
    order: &[u32],
) -> bool {
    let mut master = ctx.tree.lock(node);
    if !beats(score, feature, master.score, master.feature) {
        return false;
    }

    master.feature = feature;
    master.score = score;
    master.split = candidate.split;
    master.split_row = candidate.row;
    master.split_sum = candidate.left_sum;
    master.split_sum_sq = candidate.left_sum_sq;

    let (begin, split, end) = (master.begin, candidate.split, master.end);
    *ctx.tree.lock(left(node)) =
        TrainingNode::with_range(begin, split, candidate.left_sum, candidate.left_sum_sq);
    *ctx.tree.lock(right(node)) = TrainingNode::with_range(
        split,
        end,
        master.sum - candidate.left_sum,
        master.sum_sq - candidate.left_sum_sq,
    );

    for &row in &order[begin..split] {
        ctx.rows[row as usize].set_branch(BRANCH_LEFT);
    }
    for &row in &order[split..end] {
        ctx.rows[row as usize].set_branch(BRANCH_RIGHT);
    }
    true
}
