//! Text dataset -> binary -> train -> leaf feature dump.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor};

use presort_boost::data::{convert_text_to_binary, BinaryReader};
use presort_boost::inference::{dump_leaf_features, LeafFeatureMode};
use presort_boost::{BinaryFileReader, GbdtConfig, GbdtTrainer, Row, RowReader};

use crate::common::classification_rows;

#[test]
fn text_dataset_round_trips_through_training_and_dump() {
    let dir = tempfile::tempdir().unwrap();
    let rows = classification_rows(250, 5, 21);
    let text: String = rows.iter().map(|r| r.to_text() + "\n").collect();

    let bin_path = dir.path().join("train.bin");
    {
        let mut writer = BufWriter::new(File::create(&bin_path).unwrap());
        let n = convert_text_to_binary(BufReader::new(Cursor::new(text)), &mut writer).unwrap();
        assert_eq!(n, 250);
    }

    let mut reader = BinaryFileReader::open(&bin_path).unwrap();
    let config = GbdtConfig::builder()
        .tree_num(4)
        .layer_num(2)
        .thread_num(3)
        .temp_dir(dir.path().join("cache"))
        .build()
        .unwrap();
    let mut trainer = GbdtTrainer::new(config);
    let model = trainer.train(&mut reader).unwrap();

    let mode = LeafFeatureMode {
        emit_mean: false,
        emit_path: true,
    };
    let dim = reader.dim();
    let mut dumped = Vec::new();
    let n = dump_leaf_features(&model, &mut reader, &mut dumped, mode, dim, 3).unwrap();
    assert_eq!(n, 250);

    let mut dumped = BinaryReader::new(Cursor::new(dumped)).unwrap();
    assert_eq!(dumped.len(), 250);
    let mut row = Row::default();
    for original in &rows {
        assert!(dumped.read(&mut row).unwrap());
        assert_eq!(row.label, original.label);
        let (base, extra) = row.features.split_at(original.features.len());
        assert_eq!(base, &original.features[..]);
        assert_eq!(extra, &model.leaf_features(original, mode, dim)[..]);
        // Every tree contributes at least its leaf.
        assert!(extra.len() >= 4);
    }
    assert!(!dumped.read(&mut row).unwrap());
}
