//! Training-time tree representation.
//!
//! A tree is a fixed array of `2^(layer_num + 2)` node slots in complete
//! binary tree order (`left(i) = 2i + 1`, `right(i) = 2i + 2`). Layer `d`
//! occupies slots `[2^d - 1, 2^(d+1) - 1)`. While a tree is grown every slot
//! sits behind its own lock ([`MasterTree`]); once grown the slots are moved
//! out into a plain [`GrownTree`].

use parking_lot::{Mutex, MutexGuard};

/// Sentinel feature index of a leaf.
pub const LEAF: i32 = -1;

#[inline]
pub const fn left(node: usize) -> usize {
    2 * node + 1
}

#[inline]
pub const fn right(node: usize) -> usize {
    2 * node + 2
}

/// First slot of layer `depth` and one past its last slot.
#[inline]
pub const fn layer_range(depth: usize) -> (usize, usize) {
    ((1 << depth) - 1, (1 << (depth + 1)) - 1)
}

/// Node slots of a tree with `layer_num` split layers.
#[inline]
pub const fn tree_size(layer_num: usize) -> usize {
    1 << (layer_num + 2)
}

// =============================================================================
// TrainingNode
// =============================================================================

/// One node slot of a tree being grown.
///
/// `begin..end` is the node's range of positions in the sampled row order;
/// the children of a split node partition it at `split`. Sums are over the
/// residuals of the node's rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingNode {
    /// Split feature, or [`LEAF`].
    pub feature: i32,
    /// Literal split threshold; filled in by threshold recovery.
    pub threshold: f64,
    /// Mean residual of the node's rows; filled in at finalization.
    pub mean: f64,
    /// Weighted MSE of the committed split (lower is better).
    pub score: f64,
    pub begin: usize,
    pub end: usize,
    /// Position of the first right-child row.
    pub split: usize,
    /// Row whose value is the split threshold: the first right-child row.
    pub split_row: u32,
    pub sum: f64,
    pub sum_sq: f64,
    /// Left-child residual sum of the committed split.
    pub split_sum: f64,
    pub split_sum_sq: f64,
}

impl Default for TrainingNode {
    fn default() -> Self {
        Self {
            feature: LEAF,
            threshold: 0.0,
            mean: 0.0,
            score: f64::INFINITY,
            begin: 0,
            end: 0,
            split: 0,
            split_row: 0,
            sum: 0.0,
            sum_sq: 0.0,
            split_sum: 0.0,
            split_sum_sq: 0.0,
        }
    }
}

impl TrainingNode {
    /// Node owning positions `begin..end` with the given residual sums.
    pub fn with_range(begin: usize, end: usize, sum: f64, sum_sq: f64) -> Self {
        Self {
            begin,
            end,
            sum,
            sum_sq,
            ..Self::default()
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.feature == LEAF
    }
}

// =============================================================================
// MasterTree
// =============================================================================

/// The shared tree of the current boosting round, one lock per node slot.
pub struct MasterTree {
    nodes: Vec<Mutex<TrainingNode>>,
}

impl MasterTree {
    pub fn new(size: usize) -> Self {
        Self {
            nodes: (0..size).map(|_| Mutex::new(TrainingNode::default())).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn lock(&self, node: usize) -> MutexGuard<'_, TrainingNode> {
        self.nodes[node].lock()
    }

    /// Copy of a node without holding its lock afterwards.
    #[inline]
    pub fn snapshot(&self, node: usize) -> TrainingNode {
        *self.nodes[node].lock()
    }

    /// Exclusive access; no locking needed.
    #[inline]
    pub fn get_mut(&mut self, node: usize) -> &mut TrainingNode {
        self.nodes[node].get_mut()
    }

    pub fn into_grown(self) -> GrownTree {
        GrownTree {
            nodes: self.nodes.into_iter().map(Mutex::into_inner).collect(),
        }
    }
}

// =============================================================================
// GrownTree
// =============================================================================

/// A finished tree with its full training-time records.
#[derive(Debug, Clone, PartialEq)]
pub struct GrownTree {
    pub nodes: Vec<TrainingNode>,
}

impl GrownTree {
    /// Leaf reached from the root by routing on `value_of(feature)`.
    pub fn leaf_for(&self, value_of: impl Fn(i32) -> f64) -> usize {
        let mut node = 0;
        while let Some(n) = self.nodes.get(node) {
            if n.is_leaf() {
                break;
            }
            node = if value_of(n.feature) >= n.threshold {
                right(node)
            } else {
                left(node)
            };
        }
        node
    }

    pub fn split_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_leaf()).count()
    }
}
