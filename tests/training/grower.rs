//! Tree growth invariants: split optimality, row partitioning, loss.

use approx::assert_relative_eq;
use presort_boost::data::{ColumnCache, MemoryReader};
use presort_boost::training::{recover_thresholds, GrownTree, GrowerParams, TreeGrower};
use presort_boost::Row;

use crate::common::{regression_rows, sse};

fn params(layer_num: usize, thread_num: usize) -> GrowerParams {
    GrowerParams {
        layer_num,
        shrinkage: 1.0,
        thread_num,
        ..GrowerParams::default()
    }
}

/// Smallest total squared error over every cut of every feature.
fn best_cut(rows: &[Row], dim: usize) -> f64 {
    let mut best = f64::INFINITY;
    for d in 0..dim as i32 {
        let mut values: Vec<f32> = rows.iter().map(|r| r.value_of(d)).collect();
        values.sort_by(f32::total_cmp);
        values.dedup();
        for &threshold in &values[1..] {
            let (left, right): (Vec<&Row>, Vec<&Row>) =
                rows.iter().partition(|r| r.value_of(d) < threshold);
            let labels = |side: &[&Row]| side.iter().map(|r| f64::from(r.label)).collect::<Vec<_>>();
            best = best.min(sse(&labels(&left)) + sse(&labels(&right)));
        }
    }
    best
}

#[test]
fn stump_finds_the_optimal_cut() {
    for seed in 0..5 {
        let rows = regression_rows(8, 3, seed);
        let cache = ColumnCache::in_memory(&mut MemoryReader::new(rows.clone()), 1).unwrap();
        let mut grower = TreeGrower::new(&cache, params(1, 3));
        let (tree, _) = grower.grow(0);
        let mut trees = vec![tree];
        recover_thresholds(&mut trees, &mut MemoryReader::new(rows.clone())).unwrap();

        let root = trees[0].nodes[0];
        assert!(!root.is_leaf());
        let (left, right): (Vec<&Row>, Vec<&Row>) = rows
            .iter()
            .partition(|r| f64::from(r.value_of(root.feature)) < root.threshold);
        let labels = |side: &[&Row]| side.iter().map(|r| f64::from(r.label)).collect::<Vec<_>>();
        let achieved = sse(&labels(&left)) + sse(&labels(&right));

        assert_relative_eq!(achieved, best_cut(&rows, 3), max_relative = 1e-4);
        assert_eq!(left.len(), trees[0].nodes[1].count());
        assert_eq!(right.len(), trees[0].nodes[2].count());
    }
}

/// Rows whose root-to-leaf path passes through `node`.
fn rows_at(tree: &GrownTree, node: usize, rows: &[Row]) -> Vec<Row> {
    rows.iter()
        .filter(|row| {
            let mut n = 0;
            while n != node && n < tree.nodes.len() && !tree.nodes[n].is_leaf() {
                let split = &tree.nodes[n];
                n = if f64::from(row.value_of(split.feature)) >= split.threshold {
                    2 * n + 2
                } else {
                    2 * n + 1
                };
            }
            n == node
        })
        .cloned()
        .collect()
}

#[test]
fn every_internal_node_finds_its_optimal_cut() {
    for seed in 0..5 {
        let rows = regression_rows(60, 3, 100 + seed);
        let cache = ColumnCache::in_memory(&mut MemoryReader::new(rows.clone()), 1).unwrap();
        let mut grower = TreeGrower::new(&cache, params(3, 3));
        let (tree, _) = grower.grow(0);
        let mut trees = vec![tree];
        recover_thresholds(&mut trees, &mut MemoryReader::new(rows.clone())).unwrap();
        let tree = &trees[0];

        let mut checked = 0;
        for (n, node) in tree.nodes.iter().enumerate() {
            if node.is_leaf() {
                continue;
            }
            let at_node = rows_at(tree, n, &rows);
            assert_eq!(at_node.len(), node.count(), "seed {seed} node {n}");

            let (left, right): (Vec<&Row>, Vec<&Row>) = at_node
                .iter()
                .partition(|r| f64::from(r.value_of(node.feature)) < node.threshold);
            let labels = |side: &[&Row]| side.iter().map(|r| f64::from(r.label)).collect::<Vec<_>>();
            let achieved = sse(&labels(&left)) + sse(&labels(&right));

            assert_relative_eq!(
                achieved,
                best_cut(&at_node, 3),
                epsilon = 1e-6,
                max_relative = 1e-4
            );
            checked += 1;
        }
        assert!(checked > 1, "seed {seed}: only {checked} splits");
    }
}

#[test]
fn rows_end_in_the_leaf_their_thresholds_route_to() {
    let rows = regression_rows(300, 5, 7);
    let cache = ColumnCache::in_memory(&mut MemoryReader::new(rows.clone()), 2).unwrap();
    let mut grower = TreeGrower::new(&cache, params(4, 4));
    let (tree, stats) = grower.grow(0);
    let row_nodes = grower.row_nodes();
    let mut trees = vec![tree];
    recover_thresholds(&mut trees, &mut MemoryReader::new(rows.clone())).unwrap();
    let tree = &trees[0];

    assert_eq!(stats.sampled, 300);
    for (row, &node) in rows.iter().zip(&row_nodes) {
        assert!(tree.nodes[node as usize].is_leaf());
        let routed = tree.leaf_for(|d| f64::from(row.value_of(d)));
        assert_eq!(routed, node as usize);
    }

    // Children partition their parent's rows.
    for (n, node) in tree.nodes.iter().enumerate() {
        if !node.is_leaf() {
            let (l, r) = (&tree.nodes[2 * n + 1], &tree.nodes[2 * n + 2]);
            assert_eq!(l.count() + r.count(), node.count());
            assert_eq!((l.begin, l.end, r.begin, r.end), (node.begin, node.split, node.split, node.end));
        }
    }
    let leaf_rows: usize = tree.nodes.iter().filter(|n| n.is_leaf()).map(|n| n.count()).sum();
    assert_eq!(leaf_rows, 300);
}

#[test]
fn training_loss_never_increases() {
    let rows = regression_rows(500, 6, 11);
    let cache = ColumnCache::in_memory(&mut MemoryReader::new(rows), 2).unwrap();
    let mut grower = TreeGrower::new(
        &cache,
        GrowerParams {
            layer_num: 3,
            shrinkage: 0.3,
            thread_num: 4,
            ..GrowerParams::default()
        },
    );

    let mut previous = grower.loss();
    for t in 0..15 {
        grower.grow(t);
        let loss = grower.loss();
        assert!(loss <= previous * (1.0 + 1e-6), "tree {t}: {loss} > {previous}");
        previous = loss;
    }
}

#[test]
fn row_sampling_leaves_unsampled_residuals_untouched() {
    let rows = regression_rows(400, 3, 3);
    let cache = ColumnCache::in_memory(&mut MemoryReader::new(rows), 1).unwrap();
    let mut grower = TreeGrower::new(
        &cache,
        GrowerParams {
            layer_num: 2,
            shrinkage: 0.5,
            sample_instance: 0.5,
            thread_num: 2,
            ..GrowerParams::default()
        },
    );
    let before = grower.residuals();
    let (_, stats) = grower.grow(1);
    let after = grower.residuals();

    assert!(stats.sampled > 0 && stats.sampled < 400);
    let changed = before.iter().zip(&after).filter(|(b, a)| b != a).count();
    assert!(changed <= stats.sampled);
}
