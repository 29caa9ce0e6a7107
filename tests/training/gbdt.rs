//! GBDT training integration tests.
//!
//! End-to-end runs through the trainer: quality, determinism, persistence.

use std::fs::File;
use std::io::BufWriter;

use presort_boost::data::write_binary_rows;
use presort_boost::inference::{evaluate, LeafFeatureMode};
use presort_boost::io::{read_model_file, write_model};
use presort_boost::{BinaryFileReader, GbdtConfig, GbdtModel, GbdtTrainer, MemoryReader, RowReader};
use rstest::rstest;

use crate::common::{auc, classification_rows};

fn config(threads: usize, temp_dir: &std::path::Path) -> GbdtConfig {
    GbdtConfig::builder()
        .tree_num(20)
        .layer_num(3)
        .shrinkage(0.3)
        .thread_num(threads)
        .temp_dir(temp_dir)
        .build()
        .unwrap()
}

fn model_bytes(model: &GbdtModel) -> Vec<u8> {
    let mut bytes = Vec::new();
    write_model(model, &mut bytes).unwrap();
    bytes
}

#[test]
fn end_to_end_binary_file_training() {
    let dir = tempfile::tempdir().unwrap();
    let train_path = dir.path().join("train.bin");
    let rows = classification_rows(1000, 10, 1);
    {
        let mut writer = BufWriter::new(File::create(&train_path).unwrap());
        assert_eq!(write_binary_rows(&mut writer, &rows).unwrap(), 1000);
    }

    let mut reader = BinaryFileReader::open(&train_path).unwrap();
    assert_eq!(reader.len(), 1000);
    assert_eq!(reader.dim(), 10);

    let mut trainer = GbdtTrainer::new(config(4, &dir.path().join("cache")));
    let model = trainer.train(&mut reader).unwrap();
    assert_eq!(model.n_trees(), 20);

    let scored = evaluate(&model, &mut reader, 4).unwrap();
    assert_eq!(scored.len(), 1000);
    for (row, &(label, score)) in rows.iter().zip(&scored) {
        assert_eq!(label, row.label);
        assert_eq!(score, model.predict(row));
    }
    let train_auc = auc(&scored);
    assert!(train_auc > 0.6, "train AUC {train_auc}");

    let holdout = classification_rows(500, 10, 2);
    let holdout_scored: Vec<(f32, f32)> = holdout.iter().map(|r| (r.label, model.predict(r))).collect();
    assert!(auc(&holdout_scored) > 0.6);

    let importance = trainer.feature_importance();
    assert_eq!(importance.len(), 10);
    assert!(importance.iter().all(|&w| w >= 0.0));

    let model_path = dir.path().join("model.bin");
    presort_boost::io::write_model_file(&model, &model_path).unwrap();
    let loaded = read_model_file(&model_path).unwrap();
    assert_eq!(loaded.n_trees(), 20);
    for row in rows.iter().take(100) {
        assert_eq!(loaded.predict(row), model.predict(row));
    }
}

#[rstest]
#[case(2)]
#[case(4)]
#[case(8)]
fn models_are_identical_across_thread_counts(#[case] threads: usize) {
    let rows = classification_rows(400, 8, 5);
    let train = |threads: usize| {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(threads, dir.path());
        cfg.sample_instance = 0.8;
        cfg.sample_feature = 0.7;
        let model = GbdtTrainer::new(cfg)
            .train(&mut MemoryReader::new(rows.clone()))
            .unwrap();
        model_bytes(&model)
    };
    assert_eq!(train(1), train(threads));
}

#[test]
fn staged_scores_match_truncated_models() {
    let dir = tempfile::tempdir().unwrap();
    let rows = classification_rows(300, 6, 9);
    let mut model = GbdtTrainer::new(config(2, dir.path()))
        .train(&mut MemoryReader::new(rows.clone()))
        .unwrap();

    let row = &rows[17];
    let staged = model.interval_scores(row, 5);
    assert_eq!(staged.iter().map(|s| s.0).collect::<Vec<_>>(), vec![5, 10, 15, 20]);
    for &(count, score) in &staged {
        model.set_tree_limit(Some(count));
        assert_eq!(model.predict(row), score);
    }
    model.set_tree_limit(None);
    assert_eq!(model.predict(row), staged[3].1);
}

#[test]
fn leaf_features_use_disjoint_index_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let rows = classification_rows(200, 4, 4);
    let mut trainer = GbdtTrainer::new(config(2, dir.path()));
    let model = trainer.train(&mut MemoryReader::new(rows.clone())).unwrap();
    let slots = trainer.tree_node_count();

    let mode = LeafFeatureMode {
        emit_mean: false,
        emit_path: false,
    };
    for row in rows.iter().take(20) {
        let features = model.leaf_features(row, mode, 4);
        assert_eq!(features.len(), 20);
        for (t, f) in features.iter().enumerate() {
            let offset = (4 + t * slots) as i32;
            assert!(f.index >= offset && f.index < offset + slots as i32);
            assert_eq!(f.value, 1.0);
        }
    }
}

#[test]
fn masked_features_are_never_split_on() {
    let dir = tempfile::tempdir().unwrap();
    let rows = classification_rows(300, 5, 3);
    let mut cfg = config(3, dir.path());
    cfg.feature_mask = vec![0, 1];
    let mut trainer = GbdtTrainer::new(cfg);
    let model = trainer.train(&mut MemoryReader::new(rows)).unwrap();

    for tree in model.records() {
        assert!(tree.iter().all(|n| n.feature != 0 && n.feature != 1));
    }
    assert_eq!(trainer.feature_importance()[0], 0.0);
    assert_eq!(trainer.feature_importance()[1], 0.0);
}
