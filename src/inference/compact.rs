//! Read-optimized trees for prediction.

use super::NodeRecord;
use crate::io::FormatError;
use crate::training::tree::{left, right};

/// Split of one compact node; `feature < 0` marks a leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactNode {
    pub feature: i16,
    pub threshold: f32,
}

/// One tree in complete binary tree order: split nodes plus the shrunk leaf
/// value (`mean * shrinkage`) of every slot.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactTree {
    nodes: Vec<CompactNode>,
    values: Vec<f32>,
}

impl CompactTree {
    /// Build from the training records of tree `tree`.
    pub fn from_records(
        tree: usize,
        records: &[NodeRecord],
        shrinkage: f32,
    ) -> Result<Self, FormatError> {
        let mut nodes = Vec::with_capacity(records.len());
        let mut values = Vec::with_capacity(records.len());
        for (node, record) in records.iter().enumerate() {
            let feature = if record.feature < 0 {
                -1
            } else {
                if right(node) >= records.len() {
                    return Err(FormatError::DanglingSplit { tree, node });
                }
                i16::try_from(record.feature).map_err(|_| FormatError::InvalidFeature {
                    tree,
                    node,
                    feature: record.feature,
                })?
            };
            nodes.push(CompactNode {
                feature,
                threshold: record.threshold as f32,
            });
            values.push((record.mean * f64::from(shrinkage)) as f32);
        }
        Ok(Self { nodes, values })
    }

    #[inline]
    pub fn nodes(&self) -> &[CompactNode] {
        &self.nodes
    }

    #[inline]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Largest split feature index, if the tree has a split.
    pub fn max_feature(&self) -> Option<usize> {
        self.nodes
            .iter()
            .filter(|n| n.feature >= 0)
            .map(|n| n.feature as usize)
            .max()
    }

    /// Leaf reached by a dense feature vector (missing entries read as 0).
    #[inline]
    pub fn leaf(&self, dense: &[f32]) -> usize {
        self.walk(dense, |_| {})
    }

    /// Walk to the leaf, calling `visit` for every split node on the way.
    #[inline]
    pub fn walk(&self, dense: &[f32], mut visit: impl FnMut(usize)) -> usize {
        let mut node = 0;
        loop {
            let n = self.nodes[node];
            if n.feature < 0 {
                return node;
            }
            visit(node);
            let value = dense.get(n.feature as usize).copied().unwrap_or(0.0);
            node = if value >= n.threshold {
                right(node)
            } else {
                left(node)
            };
        }
    }

    #[inline]
    pub fn predict(&self, dense: &[f32]) -> f32 {
        self.values[self.leaf(dense)]
    }
}
