//! Restartable row streams.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::row::{DataError, Row};

// =============================================================================
// RowReader
// =============================================================================

/// A dataset that can be streamed from the start any number of times.
///
/// Training streams the dataset several times (cache construction, sizing,
/// threshold recovery), always from a fresh [`reset`](RowReader::reset).
pub trait RowReader {
    /// Rewind to the first row.
    fn reset(&mut self) -> Result<(), DataError>;

    /// Read the next row into `row`. Returns `Ok(false)` at the end.
    fn read(&mut self, row: &mut Row) -> Result<bool, DataError>;

    /// Number of rows.
    fn len(&self) -> usize;

    /// Largest feature index seen plus one.
    fn dim(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: RowReader + ?Sized> RowReader for &mut R {
    fn reset(&mut self) -> Result<(), DataError> {
        (**self).reset()
    }

    fn read(&mut self, row: &mut Row) -> Result<bool, DataError> {
        (**self).read(row)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn dim(&self) -> usize {
        (**self).dim()
    }
}

// =============================================================================
// MemoryReader
// =============================================================================

/// Rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    rows: Vec<Row>,
    dim: usize,
    cursor: usize,
}

impl MemoryReader {
    pub fn new(rows: Vec<Row>) -> Self {
        let dim = rows.iter().map(Row::dim).max().unwrap_or(0);
        Self { rows, dim, cursor: 0 }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl RowReader for MemoryReader {
    fn reset(&mut self) -> Result<(), DataError> {
        self.cursor = 0;
        Ok(())
    }

    fn read(&mut self, row: &mut Row) -> Result<bool, DataError> {
        let Some(next) = self.rows.get(self.cursor) else {
            return Ok(false);
        };
        row.label = next.label;
        row.features.clear();
        row.features.extend_from_slice(&next.features);
        self.cursor += 1;
        Ok(true)
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

// =============================================================================
// BinaryReader
// =============================================================================

/// Binary records read from a seekable stream.
///
/// The stream is scanned once on construction to count rows and find the
/// dimension.
#[derive(Debug)]
pub struct BinaryReader<S> {
    inner: S,
    len: usize,
    dim: usize,
}

/// Binary records read from a file on disk.
pub type BinaryFileReader = BinaryReader<BufReader<File>>;

impl<S: Read + Seek> BinaryReader<S> {
    pub fn new(mut inner: S) -> Result<Self, DataError> {
        inner.seek(SeekFrom::Start(0))?;
        let mut row = Row::default();
        let mut len = 0;
        let mut dim = 0;
        while row.read_binary(&mut inner)? {
            len += 1;
            dim = dim.max(row.dim());
        }
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, len, dim })
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl BinaryReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let reader = Self::new(BufReader::new(File::open(&path)?))?;
        log::info!(
            "opened {}: {} rows, dim {}",
            path.display(),
            reader.len,
            reader.dim
        );
        Ok(reader)
    }
}

impl<S: Read + Seek> RowReader for BinaryReader<S> {
    fn reset(&mut self) -> Result<(), DataError> {
        self.inner.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    fn read(&mut self, row: &mut Row) -> Result<bool, DataError> {
        row.read_binary(&mut self.inner)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

// =============================================================================
// Conversion
// =============================================================================

/// Rewrite a text dataset (one `label idx:value ...` row per line) as binary
/// records. Blank lines are skipped. Returns the number of rows written.
pub fn convert_text_to_binary<B, W>(input: B, output: &mut W) -> Result<usize, DataError>
where
    B: BufRead,
    W: Write + ?Sized,
{
    let mut row = Row::default();
    let mut count = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        row.parse_text_into(&line)?;
        row.write_binary(output)?;
        count += 1;
    }
    output.flush()?;
    Ok(count)
}
