//! The trained GBDT ensemble.

use std::io::{Read, Write};

use super::compact::CompactTree;
use crate::data::{Feature, Row};
use crate::io::{self, FormatError};
use crate::training::tree::{tree_size, GrownTree};

/// Persisted training representation of one node slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRecord {
    /// Split feature, or -1 for a leaf.
    pub feature: i32,
    pub threshold: f64,
    pub mean: f64,
}

impl From<&crate::training::tree::TrainingNode> for NodeRecord {
    fn from(node: &crate::training::tree::TrainingNode) -> Self {
        Self {
            feature: node.feature,
            threshold: node.threshold,
            mean: node.mean,
        }
    }
}

/// Synthetic features emitted per tree by [`GbdtModel::leaf_features`].
///
/// - default: one-hot pair for the reached leaf
/// - `emit_path`: one-hot pairs for every split node on the root-to-leaf
///   path, before the leaf pair (ignored with `emit_mean`)
/// - `emit_mean`: the leaf pair carries the leaf value instead of 1
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafFeatureMode {
    pub emit_mean: bool,
    pub emit_path: bool,
}

/// A trained ensemble.
///
/// Keeps both the node records it was built from (for persistence) and the
/// compact trees used for prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct GbdtModel {
    layer_num: usize,
    shrinkage: f32,
    records: Vec<Vec<NodeRecord>>,
    trees: Vec<CompactTree>,
    dim: usize,
    tree_limit: Option<usize>,
}

impl GbdtModel {
    /// Build from node records; every tree must have `2^(layer_num + 2)` slots.
    pub fn from_records(
        records: Vec<Vec<NodeRecord>>,
        shrinkage: f32,
        layer_num: usize,
    ) -> Result<Self, FormatError> {
        let expected = tree_size(layer_num);
        let mut trees = Vec::with_capacity(records.len());
        for (t, tree) in records.iter().enumerate() {
            if tree.len() != expected {
                return Err(FormatError::TreeSizeMismatch {
                    tree: t,
                    expected,
                    actual: tree.len(),
                });
            }
            trees.push(CompactTree::from_records(t, tree, shrinkage)?);
        }
        let dim = trees
            .iter()
            .filter_map(CompactTree::max_feature)
            .max()
            .map_or(0, |f| f + 1);
        Ok(Self {
            layer_num,
            shrinkage,
            records,
            trees,
            dim,
            tree_limit: None,
        })
    }

    /// Build from grown trees whose thresholds have been recovered.
    pub fn from_grown(trees: &[GrownTree], shrinkage: f32, layer_num: usize) -> Result<Self, FormatError> {
        let records = trees
            .iter()
            .map(|t| t.nodes.iter().map(NodeRecord::from).collect())
            .collect();
        Self::from_records(records, shrinkage, layer_num)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[inline]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    #[inline]
    pub fn layer_num(&self) -> usize {
        self.layer_num
    }

    /// Node slots per stored tree.
    #[inline]
    pub fn tree_size(&self) -> usize {
        tree_size(self.layer_num)
    }

    /// Index stride per tree of the synthetic leaf features: `2^(layer_num + 1)`.
    #[inline]
    pub fn tree_node_count(&self) -> usize {
        1 << (self.layer_num + 1)
    }

    #[inline]
    pub fn shrinkage(&self) -> f32 {
        self.shrinkage
    }

    /// Largest split feature index plus one.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn records(&self) -> &[Vec<NodeRecord>] {
        &self.records
    }

    pub fn trees(&self) -> &[CompactTree] {
        &self.trees
    }

    /// Only use the first `limit` trees (`None` = all).
    pub fn set_tree_limit(&mut self, limit: Option<usize>) {
        self.tree_limit = limit;
    }

    pub fn tree_limit(&self) -> Option<usize> {
        self.tree_limit
    }

    /// Trees used for prediction.
    pub fn active_trees(&self) -> &[CompactTree] {
        let n = self.tree_limit.map_or(self.trees.len(), |c| c.min(self.trees.len()));
        &self.trees[..n]
    }

    // -------------------------------------------------------------------------
    // Prediction
    // -------------------------------------------------------------------------

    /// Dense copy of `row` over the model's dimensions. The first pair of a
    /// repeated index wins; absent dimensions and NaN values are 0.
    pub fn densify(&self, row: &Row) -> Vec<f32> {
        let mut dense = vec![0.0; self.dim];
        for f in row.features.iter().rev() {
            if f.index >= 0 {
                if let Some(slot) = dense.get_mut(f.index as usize) {
                    *slot = f.split_value();
                }
            }
        }
        dense
    }

    pub fn predict(&self, row: &Row) -> f32 {
        self.predict_dense(&self.densify(row))
    }

    pub fn predict_dense(&self, dense: &[f32]) -> f32 {
        self.active_trees().iter().map(|t| t.predict(dense)).sum()
    }

    /// Staged predictions using the first `k`, `2k`, ... trees (at most all).
    ///
    /// Returns `(tree_count, score)` pairs. `k == 0` yields nothing.
    pub fn interval_scores(&self, row: &Row, k: usize) -> Vec<(usize, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let dense = self.densify(row);
        let trees = self.active_trees();
        let mut out = Vec::with_capacity(trees.len() / k);
        let mut score = 0.0;
        for (t, tree) in trees.iter().enumerate() {
            score += tree.predict(&dense);
            if (t + 1) % k == 0 {
                out.push((t + 1, score));
            }
        }
        out
    }

    /// Reached leaf of every active tree.
    pub fn leaves(&self, row: &Row) -> Vec<usize> {
        let dense = self.densify(row);
        self.active_trees().iter().map(|t| t.leaf(&dense)).collect()
    }

    /// Score plus the synthetic leaf features of `row`.
    ///
    /// Indices are `base_dim + tree * tree_node_count() + node`.
    pub fn predict_with_leaves(
        &self,
        row: &Row,
        mode: LeafFeatureMode,
        base_dim: usize,
    ) -> (f32, Vec<Feature>) {
        let dense = self.densify(row);
        let stride = self.tree_node_count();
        let mut features = Vec::new();
        let mut score = 0.0;
        for (t, tree) in self.active_trees().iter().enumerate() {
            let offset = base_dim + t * stride;
            let leaf = if mode.emit_path && !mode.emit_mean {
                tree.walk(&dense, |n| features.push(Feature::new((offset + n) as i32, 1.0)))
            } else {
                tree.leaf(&dense)
            };
            let value = tree.values()[leaf];
            score += value;
            let emitted = if mode.emit_mean { value } else { 1.0 };
            features.push(Feature::new((offset + leaf) as i32, emitted));
        }
        (score, features)
    }

    pub fn leaf_features(&self, row: &Row, mode: LeafFeatureMode, base_dim: usize) -> Vec<Feature> {
        self.predict_with_leaves(row, mode, base_dim).1
    }

    /// Append the synthetic leaf features to `row` in place; returns the score.
    pub fn augment_row(&self, row: &mut Row, mode: LeafFeatureMode, base_dim: usize) -> f32 {
        let (score, features) = self.predict_with_leaves(row, mode, base_dim);
        row.features.extend(features);
        score
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), FormatError> {
        io::write_model(self, writer)
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, FormatError> {
        io::read_model(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LEAF: NodeRecord = NodeRecord {
        feature: -1,
        threshold: 0.0,
        mean: 0.0,
    };

    /// Two one-layer stumps: tree 0 splits feature 0 at 1, tree 1 feature 3 at 0.
    fn model() -> GbdtModel {
        let mut a = vec![LEAF; 8];
        a[0] = NodeRecord { feature: 0, threshold: 1.0, mean: 0.0 };
        a[1].mean = -1.0;
        a[2].mean = 1.0;
        let mut b = vec![LEAF; 8];
        b[0] = NodeRecord { feature: 3, threshold: 0.0, mean: 0.0 };
        b[1].mean = 10.0;
        b[2].mean = 20.0;
        GbdtModel::from_records(vec![a, b], 0.5, 1).unwrap()
    }

    #[test]
    fn test_shape() {
        let m = model();
        assert_eq!(m.n_trees(), 2);
        assert_eq!(m.dim(), 4);
        assert_eq!(m.tree_size(), 8);
        assert_eq!(m.tree_node_count(), 4);
    }

    #[test]
    fn test_predict_sums_shrunk_leaves() {
        let m = model();
        // Feature 3 absent = 0 >= 0 goes right in tree 1.
        assert_relative_eq!(m.predict(&Row::from_pairs(0.0, &[(0, 2.0)])), 0.5 + 10.0);
        assert_relative_eq!(m.predict(&Row::from_pairs(0.0, &[(3, -1.0)])), -0.5 + 5.0);
        assert_eq!(m.leaves(&Row::new(0.0)), vec![1, 2]);
    }

    #[test]
    fn test_first_duplicate_index_wins() {
        let m = model();
        let row = Row::from_pairs(0.0, &[(0, 5.0), (0, -5.0), (9, 1.0)]);
        assert_eq!(m.densify(&row), vec![5.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_tree_limit_and_intervals() {
        let mut m = model();
        let row = Row::new(0.0);
        assert_eq!(m.interval_scores(&row, 1), vec![(1, -0.5), (2, 9.5)]);
        assert_eq!(m.interval_scores(&row, 3), vec![]);

        m.set_tree_limit(Some(1));
        assert_relative_eq!(m.predict(&row), -0.5);
        m.set_tree_limit(Some(10));
        assert_relative_eq!(m.predict(&row), 9.5);
    }

    #[test]
    fn test_leaf_feature_modes() {
        let m = model();
        let row = Row::from_pairs(1.0, &[(0, 3.0), (3, -2.0)]);
        let base = 10;

        let one_hot = m.leaf_features(&row, LeafFeatureMode::default(), base);
        assert_eq!(one_hot, vec![Feature::new(12, 1.0), Feature::new(15, 1.0)]);

        let path = LeafFeatureMode { emit_path: true, ..Default::default() };
        assert_eq!(m.leaf_features(&row, path, base), vec![
            Feature::new(10, 1.0),
            Feature::new(12, 1.0),
            Feature::new(14, 1.0),
            Feature::new(15, 1.0),
        ]);

        let mean = LeafFeatureMode { emit_mean: true, emit_path: true };
        assert_eq!(m.leaf_features(&row, mean, base), vec![
            Feature::new(12, 0.5),
            Feature::new(15, 5.0),
        ]);

        let mut augmented = row.clone();
        let score = m.augment_row(&mut augmented, LeafFeatureMode::default(), base);
        assert_relative_eq!(score, m.predict(&row));
        assert_eq!(augmented.features.len(), 4);
        assert_eq!(augmented.features[2], Feature::new(12, 1.0));
    }

    #[test]
    fn test_rejects_wrong_tree_size() {
        let err = GbdtModel::from_records(vec![vec![LEAF; 4]], 1.0, 1).unwrap_err();
        assert!(matches!(err, FormatError::TreeSizeMismatch { expected: 8, actual: 4, .. }));
    }
}
