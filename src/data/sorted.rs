//! Pre-sorted feature columns.
//!
//! Every feature dimension is sorted once by value. A column stores, for every
//! row, the row id and whether the row's value equals the previous entry's
//! value. Split search then walks a column in value order without touching
//! feature values at all.
//!
//! # Cache Files
//!
//! Column `d` is persisted as `<temp_dir>/feature.<d>`: `row_count`
//! little-endian `u32` words in ascending value order. Bit 0 of a word is the
//! same-as-previous flag, bits 1..32 hold the row id.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;

use super::reader::RowReader;
use super::row::{DataError, Row};
use crate::utils::run_with_threads;

/// Largest row count addressable by a 31-bit row id.
pub const MAX_ROWS: usize = (1 << 31) - 1;

/// Bytes reserved per row for the row assignment state during cache sizing.
const RESERVED_BYTES_PER_ROW: u64 = 2 * 4;
/// Bytes per row of one `(value, row)` pair while sorting.
const PAIR_BYTES_PER_ROW: u64 = 8;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("cache file {} has {actual} bytes, expected {expected}", path.display())]
    Length {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },

    #[error("cache file {} references row {row_id} of {rows}", path.display())]
    RowOutOfRange {
        path: PathBuf,
        row_id: u32,
        rows: usize,
    },

    #[error("dataset has {rows} rows; at most 2147483647 are supported")]
    TooManyRows { rows: usize },

    #[error("dataset yielded {actual} rows, expected {expected}")]
    RowCountChanged { expected: usize, actual: usize },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// =============================================================================
// SortedEntry / SortedColumn
// =============================================================================

/// One packed column entry: row id plus same-as-previous flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SortedEntry(u32);

impl SortedEntry {
    #[inline]
    pub fn new(row: u32, same_as_previous: bool) -> Self {
        debug_assert!(row as usize <= MAX_ROWS);
        Self((row << 1) | same_as_previous as u32)
    }

    #[inline]
    pub fn row(self) -> u32 {
        self.0 >> 1
    }

    #[inline]
    pub fn same_as_previous(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub fn to_bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }
}

/// Row ids of one feature dimension in ascending value order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedColumn {
    entries: Vec<SortedEntry>,
}

impl SortedColumn {
    /// Sort `(value, row)` pairs and mark runs of equal values.
    ///
    /// Ties are ordered by row id. Dataset columns never hold NaN (it reads
    /// as 0, see [`Feature::split_value`](crate::data::Feature::split_value)); here a NaN still gets a total
    /// order position and never joins a run.
    pub fn from_pairs(mut pairs: Vec<(f32, u32)>) -> Self {
        pairs.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let entries = pairs
            .iter()
            .enumerate()
            .map(|(i, &(value, row))| {
                let same = i > 0 && pairs[i - 1].0 == value;
                SortedEntry::new(row, same)
            })
            .collect();
        Self { entries }
    }

    /// Column over dense values, one per row.
    pub fn from_values(values: &[f32]) -> Self {
        Self::from_pairs(
            values
                .iter()
                .enumerate()
                .map(|(row, &v)| (v, row as u32))
                .collect(),
        )
    }

    #[inline]
    pub fn entries(&self) -> &[SortedEntry] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct values in the column.
    pub fn distinct_values(&self) -> usize {
        self.entries.iter().filter(|e| !e.same_as_previous()).count()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.entries.len() * 4);
        for entry in &self.entries {
            buf.extend_from_slice(&entry.to_bits().to_le_bytes());
        }
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let entries = bytes
            .chunks_exact(4)
            .map(|w| SortedEntry::from_bits(u32::from_le_bytes([w[0], w[1], w[2], w[3]])))
            .collect();
        Self { entries }
    }
}

// =============================================================================
// ColumnCache
// =============================================================================

/// Where and how the column cache is built.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub temp_dir: PathBuf,
    /// Reuse existing cache files instead of rebuilding them.
    pub reuse: bool,
    /// Memory budget for one construction pass, in bytes.
    pub memory_limit_bytes: u64,
    /// Dimensions that are never loaded.
    pub masked: Vec<usize>,
    pub n_threads: usize,
}

impl CacheOptions {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            reuse: false,
            memory_limit_bytes: 60 << 30,
            masked: Vec::new(),
            n_threads: 1,
        }
    }
}

/// Labels plus one sorted column per unmasked dimension.
#[derive(Debug, Clone)]
pub struct ColumnCache {
    labels: Vec<f32>,
    columns: Vec<Option<SortedColumn>>,
}

impl ColumnCache {
    /// Build cache files (or reuse them) and load every unmasked column.
    pub fn prepare<R: RowReader + ?Sized>(
        reader: &mut R,
        options: &CacheOptions,
    ) -> Result<Self, CacheError> {
        let rows = reader.len();
        if rows > MAX_ROWS {
            return Err(CacheError::TooManyRows { rows });
        }
        let start = Instant::now();
        let cache = if options.reuse {
            Self::load(reader, options)?
        } else {
            Self::build(reader, options)?
        };
        log::info!(
            "column cache ready: {} rows, {} of {} dimensions loaded in {:.2?}",
            cache.n_rows(),
            cache.columns.iter().filter(|c| c.is_some()).count(),
            cache.dim(),
            start.elapsed()
        );
        Ok(cache)
    }

    /// Sort every dimension in memory without writing cache files.
    pub fn in_memory<R: RowReader + ?Sized>(
        reader: &mut R,
        n_threads: usize,
    ) -> Result<Self, CacheError> {
        let rows = reader.len();
        if rows > MAX_ROWS {
            return Err(CacheError::TooManyRows { rows });
        }
        let dim = reader.dim();
        let (labels, batch) = read_pass(reader, 0, dim)?;
        let columns = sort_batch(batch, n_threads).into_iter().map(Some).collect();
        Ok(Self { labels, columns })
    }

    fn build<R: RowReader + ?Sized>(
        reader: &mut R,
        options: &CacheOptions,
    ) -> Result<Self, CacheError> {
        let rows = reader.len();
        let dim = reader.dim();
        fs::create_dir_all(&options.temp_dir).map_err(io_error(&options.temp_dir))?;

        let masked = mask_flags(dim, &options.masked);
        let per_pass = dims_per_pass(options.memory_limit_bytes, rows, dim);
        log::info!(
            "building column cache in {}: {} rows, {} dimensions, {} per pass",
            options.temp_dir.display(),
            rows,
            dim,
            per_pass
        );

        let mut labels = if dim == 0 { read_labels(reader)? } else { Vec::new() };
        let mut columns = vec![None; dim];

        for begin in (0..dim).step_by(per_pass) {
            let end = (begin + per_pass).min(dim);
            let (pass_labels, batch) = read_pass(reader, begin, end)?;
            if begin == 0 {
                labels = pass_labels;
            }

            for (offset, column) in sort_batch(batch, options.n_threads).into_iter().enumerate() {
                let d = begin + offset;
                let path = column_path(&options.temp_dir, d);
                fs::write(&path, column.to_bytes()).map_err(io_error(&path))?;
                log::debug!("feature {d}: {} distinct values", column.distinct_values());
                if !masked[d] {
                    columns[d] = Some(column);
                }
            }
        }

        Ok(Self { labels, columns })
    }

    fn load<R: RowReader + ?Sized>(
        reader: &mut R,
        options: &CacheOptions,
    ) -> Result<Self, CacheError> {
        let labels = read_labels(reader)?;
        let rows = labels.len();
        let dim = reader.dim();
        let masked = mask_flags(dim, &options.masked);

        let mut columns = Vec::with_capacity(dim);
        for (d, &skip) in masked.iter().enumerate() {
            if skip {
                columns.push(None);
                continue;
            }
            let path = column_path(&options.temp_dir, d);
            let bytes = fs::read(&path).map_err(io_error(&path))?;
            if bytes.len() != rows * 4 {
                return Err(CacheError::Length {
                    path,
                    expected: rows * 4,
                    actual: bytes.len(),
                });
            }
            let column = SortedColumn::from_bytes(&bytes);
            if let Some(bad) = column.entries().iter().find(|e| e.row() as usize >= rows) {
                return Err(CacheError::RowOutOfRange {
                    path,
                    row_id: bad.row(),
                    rows,
                });
            }
            log::debug!("feature {d}: {} distinct values", column.distinct_values());
            columns.push(Some(column));
        }

        Ok(Self { labels, columns })
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// Sorted column of dimension `d`, `None` when masked or out of range.
    #[inline]
    pub fn column(&self, d: usize) -> Option<&SortedColumn> {
        self.columns.get(d).and_then(Option::as_ref)
    }
}

fn column_path(temp_dir: &Path, d: usize) -> PathBuf {
    temp_dir.join(format!("feature.{d}"))
}

fn mask_flags(dim: usize, masked: &[usize]) -> Vec<bool> {
    let mut flags = vec![false; dim];
    for &d in masked {
        if let Some(flag) = flags.get_mut(d) {
            *flag = true;
        }
    }
    flags
}

/// Number of dimensions whose `(value, row)` pairs fit the memory budget.
fn dims_per_pass(limit_bytes: u64, rows: usize, dim: usize) -> usize {
    let dim = dim.max(1);
    if rows == 0 {
        return dim;
    }
    let rows = rows as u64;
    let available = limit_bytes.saturating_sub(RESERVED_BYTES_PER_ROW * rows);
    let per_pass = available / (PAIR_BYTES_PER_ROW * rows);
    (per_pass as usize).clamp(1, dim)
}

fn read_labels<R: RowReader + ?Sized>(reader: &mut R) -> Result<Vec<f32>, CacheError> {
    let expected = reader.len();
    let mut labels = Vec::with_capacity(expected);
    let mut row = Row::default();
    reader.reset()?;
    while reader.read(&mut row)? {
        labels.push(row.label);
    }
    if labels.len() != expected {
        return Err(CacheError::RowCountChanged {
            expected,
            actual: labels.len(),
        });
    }
    Ok(labels)
}

/// Stream the dataset once, collecting labels and the `(value, row)` pairs of
/// dimensions `[begin, end)`. Absent features count as 0.
fn read_pass<R: RowReader + ?Sized>(
    reader: &mut R,
    begin: usize,
    end: usize,
) -> Result<(Vec<f32>, Vec<Vec<(f32, u32)>>), CacheError> {
    let expected = reader.len();
    let mut labels = Vec::with_capacity(expected);
    let mut batch: Vec<Vec<(f32, u32)>> = (begin..end).map(|_| Vec::with_capacity(expected)).collect();

    let mut row = Row::default();
    reader.reset()?;
    while reader.read(&mut row)? {
        let row_id = labels.len();
        if row_id >= expected {
            return Err(CacheError::RowCountChanged {
                expected,
                actual: row_id + 1,
            });
        }
        labels.push(row.label);
        for column in batch.iter_mut() {
            column.push((0.0, row_id as u32));
        }
        // Reverse so the first pair of a repeated index wins.
        for f in row.features.iter().rev() {
            if f.index < 0 {
                continue;
            }
            let d = f.index as usize;
            if (begin..end).contains(&d) {
                batch[d - begin][row_id].0 = f.split_value();
            }
        }
    }
    if labels.len() != expected {
        return Err(CacheError::RowCountChanged {
            expected,
            actual: labels.len(),
        });
    }
    Ok((labels, batch))
}

fn sort_batch(batch: Vec<Vec<(f32, u32)>>, n_threads: usize) -> Vec<SortedColumn> {
    run_with_threads(n_threads, |parallelism| {
        parallelism.maybe_par_map(batch, SortedColumn::from_pairs)
    })
}
