//! Binary GBDT model file.
//!
//! The file stores the full training representation of every node, so
//! a loaded model rebuilds exactly the same compact trees.
//!
//! # Layout
//!
//! ```text
//! Offset  Size                    Field
//! ------  ----------------------  -----
//! 0       4                       tree_count (i32)
//! 4       4                       tree_size (i32) = 2^(layer_num + 2)
//! 8       4                       shrinkage (f32)
//! 12      20 * count * size       node records, tree by tree, in slot order:
//!                                   feature (i32, -1 = leaf)
//!                                   threshold (f64)
//!                                   mean (f64)
//! ```
//!
//! All scalars are little-endian. `layer_num` is recovered from `tree_size`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::inference::{GbdtModel, NodeRecord};
use crate::training::MAX_LAYER_NUM;

// ============================================================================
// Constants
// ============================================================================

/// Size of the file header in bytes.
pub const HEADER_SIZE: usize = 12;

/// Size of one serialized node record in bytes.
pub const RECORD_SIZE: usize = 20;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while reading or writing a model file.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("model file truncated")]
    Truncated,

    #[error("invalid tree count {0}")]
    InvalidTreeCount(i32),

    /// Tree size must be a power of two of at least 4 slots.
    #[error("invalid tree size {0}")]
    InvalidTreeSize(i64),

    #[error("tree {tree} has {actual} node slots, expected {expected}")]
    TreeSizeMismatch {
        tree: usize,
        expected: usize,
        actual: usize,
    },

    #[error("split feature {feature} in tree {tree} node {node} is out of range")]
    InvalidFeature { tree: usize, node: usize, feature: i32 },

    #[error("split node {node} of tree {tree} has no child slots")]
    DanglingSplit { tree: usize, node: usize },

    #[error("cannot allocate {0} node records")]
    Allocation(usize),
}

// ============================================================================
// Write
// ============================================================================

/// Serialize `model` to `writer`.
pub fn write_model<W: Write + ?Sized>(model: &GbdtModel, writer: &mut W) -> Result<(), FormatError> {
    let tree_count = i32::try_from(model.n_trees())
        .map_err(|_| FormatError::InvalidTreeCount(i32::MAX))?;
    let tree_size = i32::try_from(model.tree_size())
        .map_err(|_| FormatError::InvalidTreeSize(model.tree_size() as i64))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&tree_count.to_le_bytes());
    header[4..8].copy_from_slice(&tree_size.to_le_bytes());
    header[8..12].copy_from_slice(&model.shrinkage().to_le_bytes());
    writer.write_all(&header)?;

    let mut buf = Vec::with_capacity(model.tree_size() * RECORD_SIZE);
    for tree in model.records() {
        buf.clear();
        for record in tree {
            buf.extend_from_slice(&record.feature.to_le_bytes());
            buf.extend_from_slice(&record.threshold.to_le_bytes());
            buf.extend_from_slice(&record.mean.to_le_bytes());
        }
        writer.write_all(&buf)?;
    }
    writer.flush()?;
    Ok(())
}

/// Serialize `model` to a file at `path`, replacing it.
pub fn write_model_file(model: &GbdtModel, path: impl AsRef<Path>) -> Result<(), FormatError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_model(model, &mut writer)
}

// ============================================================================
// Read
// ============================================================================

/// Deserialize a model from `reader`.
pub fn read_model<R: Read + ?Sized>(reader: &mut R) -> Result<GbdtModel, FormatError> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact(reader, &mut header)?;
    let tree_count = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let tree_size = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let shrinkage = f32::from_le_bytes([header[8], header[9], header[10], header[11]]);

    if tree_count < 0 {
        return Err(FormatError::InvalidTreeCount(tree_count));
    }
    let layer_num = layer_num_of(tree_size)?;
    let tree_size = tree_size as usize;

    let mut records = Vec::new();
    records
        .try_reserve(tree_count as usize)
        .map_err(|_| FormatError::Allocation(tree_count as usize))?;
    let mut buf = vec![0u8; tree_size * RECORD_SIZE];
    for _ in 0..tree_count {
        read_exact(reader, &mut buf)?;
        let tree: Vec<NodeRecord> = buf
            .chunks_exact(RECORD_SIZE)
            .map(|r| NodeRecord {
                feature: i32::from_le_bytes([r[0], r[1], r[2], r[3]]),
                threshold: f64::from_le_bytes([r[4], r[5], r[6], r[7], r[8], r[9], r[10], r[11]]),
                mean: f64::from_le_bytes([r[12], r[13], r[14], r[15], r[16], r[17], r[18], r[19]]),
            })
            .collect();
        records.push(tree);
    }

    let model = GbdtModel::from_records(records, shrinkage, layer_num)?;
    log::info!(
        "loaded model: {} trees, {} layers, shrinkage {}, dim {}",
        model.n_trees(),
        model.layer_num(),
        model.shrinkage(),
        model.dim()
    );
    Ok(model)
}

/// Deserialize a model from the file at `path`.
pub fn read_model_file(path: impl AsRef<Path>) -> Result<GbdtModel, FormatError> {
    let mut reader = BufReader::new(File::open(path)?);
    read_model(&mut reader)
}

/// Solve `tree_size = 2^(layer_num + 2)` by repeated halving.
fn layer_num_of(tree_size: i32) -> Result<usize, FormatError> {
    if tree_size < 4 || tree_size.count_ones() != 1 {
        return Err(FormatError::InvalidTreeSize(i64::from(tree_size)));
    }
    let mut size = tree_size;
    let mut layer_num = 0;
    while size > 4 {
        size >>= 1;
        layer_num += 1;
    }
    if layer_num > MAX_LAYER_NUM as usize {
        return Err(FormatError::InvalidTreeSize(i64::from(tree_size)));
    }
    Ok(layer_num)
}

fn read_exact<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<(), FormatError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FormatError::Truncated,
        _ => FormatError::Io(e),
    })
}
