//! Threshold recovery.
//!
//! Split search records only the row whose value starts the right-hand side
//! of every split. This pass resolves those rows to literal thresholds with
//! one sequential read of the dataset: all `(row, tree, node)` requests are
//! sorted by row and merged against the row stream.

use super::tree::GrownTree;
use super::TrainError;
use crate::data::{Row, RowReader};

/// Fill in `threshold` of every split node of `trees`.
///
/// The reader must yield rows in the same order as when the trees were grown.
pub fn recover_thresholds<R: RowReader + ?Sized>(
    trees: &mut [GrownTree],
    reader: &mut R,
) -> Result<(), TrainError> {
    let mut requests: Vec<(u32, usize, usize)> = trees
        .iter()
        .enumerate()
        .flat_map(|(t, tree)| {
            tree.nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| !node.is_leaf())
                .map(move |(n, node)| (node.split_row, t, n))
        })
        .collect();
    if requests.is_empty() {
        return Ok(());
    }
    requests.sort_unstable();

    reader.reset()?;
    let mut row = Row::default();
    let mut row_id: u32 = 0;
    let mut have_row = reader.read(&mut row)?;
    for &(wanted, t, n) in &requests {
        while have_row && row_id < wanted {
            have_row = reader.read(&mut row)?;
            row_id += 1;
        }
        if !have_row {
            return Err(TrainError::RecoveryExhausted { row_id: wanted });
        }
        let node = &mut trees[t].nodes[n];
        node.threshold = f64::from(row.value_of(node.feature));
    }

    log::debug!("recovered {} thresholds", requests.len());
    Ok(())
}
