//! Multi-threaded evaluation and leaf feature dumping.
//!
//! Both functions stream the dataset through [`stream_rows`] and restore
//! input order afterwards by sorting on each row's `order_id`.

use std::io::Write;

use super::model::{GbdtModel, LeafFeatureMode};
use crate::concurrency::stream_rows;
use crate::data::{DataError, Row, RowReader};

/// `(label, score)` of every row of `reader`, in input order.
pub fn evaluate<R: RowReader + Send + ?Sized>(
    model: &GbdtModel,
    reader: &mut R,
    workers: usize,
) -> Result<Vec<(f32, f32)>, DataError> {
    let per_worker = stream_rows(reader, vec![(); workers.max(1)], |_, pipeline| {
        let mut scored = Vec::new();
        let mut row = Row::default();
        while let Some(order_id) = pipeline.get_into(&mut row) {
            scored.push((order_id, (row.label, model.predict(&row))));
        }
        scored
    })?;

    let mut scored: Vec<(u64, (f32, f32))> = per_worker.into_iter().flatten().collect();
    scored.sort_unstable_by_key(|&(order_id, _)| order_id);
    Ok(scored.into_iter().map(|(_, pair)| pair).collect())
}

/// Write every row of `reader`, augmented with its leaf features, as binary
/// records in input order. Returns the number of rows written.
///
/// Leaf feature indices start at `base_dim`; pass the dataset dimension to
/// keep them clear of the original features.
pub fn dump_leaf_features<R, W>(
    model: &GbdtModel,
    reader: &mut R,
    writer: &mut W,
    mode: LeafFeatureMode,
    base_dim: usize,
    workers: usize,
) -> Result<usize, DataError>
where
    R: RowReader + Send + ?Sized,
    W: Write + ?Sized,
{
    let per_worker = stream_rows(reader, vec![(); workers.max(1)], |_, pipeline| {
        let mut augmented = Vec::new();
        while let Some((mut row, order_id)) = pipeline.get() {
            model.augment_row(&mut row, mode, base_dim);
            augmented.push((order_id, row));
        }
        augmented
    })?;

    let mut augmented: Vec<(u64, Row)> = per_worker.into_iter().flatten().collect();
    augmented.sort_unstable_by_key(|(order_id, _)| *order_id);
    for (_, row) in &augmented {
        row.write_binary(writer)?;
    }
    writer.flush()?;
    Ok(augmented.len())
}
