//! Sparse labeled rows and their binary record layout.
//!
//! # Binary Layout
//!
//! ```text
//! Offset  Size   Field
//! ------  -----  -----
//! 0       4      label (f32, little-endian)
//! 4       8      pair count n (u64, little-endian)
//! 12      8 * n  n pairs of (index: i32, value: f32), little-endian
//! ```
//!
//! Records are concatenated back to back; a stream ends cleanly only at a
//! record boundary.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Bytes per serialized `(index, value)` pair.
const PAIR_SIZE: usize = 8;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while reading, parsing, or writing rows.
#[derive(Debug, Error)]
pub enum DataError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended in the middle of a record.
    #[error("record truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The feature list of a record could not be allocated.
    #[error("cannot allocate {pairs} feature pairs")]
    Allocation { pairs: u64 },

    /// A text line could not be parsed.
    #[error("cannot parse {field} from {fragment:?}")]
    Parse { field: &'static str, fragment: String },
}

// =============================================================================
// Row
// =============================================================================

/// One `(index, value)` pair of a sparse row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub index: i32,
    pub value: f32,
}

impl Feature {
    #[inline]
    pub fn new(index: i32, value: f32) -> Self {
        Self { index, value }
    }

    /// Value used for splitting and routing: NaN reads as 0, like an
    /// absent feature.
    #[inline]
    pub fn split_value(&self) -> f32 {
        if self.value.is_nan() {
            0.0
        } else {
            self.value
        }
    }
}

/// One labeled sparse training example.
///
/// Features keep their parse order; indices are neither sorted nor checked
/// for uniqueness. Lookups return the first matching pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub label: f32,
    pub features: Vec<Feature>,
}

impl Row {
    pub fn new(label: f32) -> Self {
        Self { label, features: Vec::new() }
    }

    /// Build a row from `(index, value)` pairs.
    pub fn from_pairs(label: f32, pairs: &[(i32, f32)]) -> Self {
        Self {
            label,
            features: pairs.iter().map(|&(i, v)| Feature::new(i, v)).collect(),
        }
    }

    #[inline]
    pub fn push(&mut self, index: i32, value: f32) {
        self.features.push(Feature::new(index, value));
    }

    /// Value of the first pair with `index`, or 0 when absent or NaN.
    pub fn value_of(&self, index: i32) -> f32 {
        self.features
            .iter()
            .find(|f| f.index == index)
            .map_or(0.0, Feature::split_value)
    }

    /// Largest feature index plus one (0 for a row without features).
    pub fn dim(&self) -> usize {
        self.features
            .iter()
            .filter(|f| f.index >= 0)
            .map(|f| f.index as usize + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.label = 0.0;
        self.features.clear();
    }

    // -------------------------------------------------------------------------
    // Binary codec
    // -------------------------------------------------------------------------

    /// Append this row as one binary record.
    pub fn write_binary<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), DataError> {
        let mut buf = Vec::with_capacity(12 + self.features.len() * PAIR_SIZE);
        buf.extend_from_slice(&self.label.to_le_bytes());
        buf.extend_from_slice(&(self.features.len() as u64).to_le_bytes());
        for f in &self.features {
            buf.extend_from_slice(&f.index.to_le_bytes());
            buf.extend_from_slice(&f.value.to_le_bytes());
        }
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Read the next binary record into `self`, reusing its feature buffer.
    ///
    /// Returns `Ok(false)` when the stream is exhausted at a record boundary.
    pub fn read_binary<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<bool, DataError> {
        let mut label = [0u8; 4];
        match read_full(reader, &mut label)? {
            0 => return Ok(false),
            4 => {}
            n => return Err(DataError::Truncated { expected: 4, actual: n }),
        }

        let mut len = [0u8; 8];
        let n = read_full(reader, &mut len)?;
        if n != len.len() {
            return Err(DataError::Truncated { expected: 12, actual: 4 + n });
        }
        let pairs = u64::from_le_bytes(len);
        let count = usize::try_from(pairs).map_err(|_| DataError::Allocation { pairs })?;
        let bytes = count
            .checked_mul(PAIR_SIZE)
            .ok_or(DataError::Allocation { pairs })?;

        self.label = f32::from_le_bytes(label);
        self.features.clear();
        self.features
            .try_reserve(count)
            .map_err(|_| DataError::Allocation { pairs })?;

        let mut payload = Vec::new();
        payload
            .try_reserve_exact(bytes)
            .map_err(|_| DataError::Allocation { pairs })?;
        payload.resize(bytes, 0);
        let n = read_full(reader, &mut payload)?;
        if n != bytes {
            return Err(DataError::Truncated { expected: 12 + bytes, actual: 12 + n });
        }

        for pair in payload.chunks_exact(PAIR_SIZE) {
            let index = i32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
            let value = f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
            self.features.push(Feature::new(index, value));
        }
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Text codec
    // -------------------------------------------------------------------------

    /// Parse a `label index:value index:value ...` line.
    ///
    /// Tokens are separated by spaces or tabs. Tokens without a `:` are
    /// ignored.
    pub fn parse_text(line: &str) -> Result<Self, DataError> {
        let mut row = Row::default();
        row.parse_text_into(line)?;
        Ok(row)
    }

    /// Parse a text line into `self`, reusing its feature buffer.
    pub fn parse_text_into(&mut self, line: &str) -> Result<(), DataError> {
        let mut tokens = line.split([' ', '\t', '\r', '\n']).filter(|t| !t.is_empty());

        let label = tokens.next().unwrap_or("");
        self.label = label.parse().map_err(|_| DataError::Parse {
            field: "label",
            fragment: label.to_string(),
        })?;
        self.features.clear();

        for token in tokens {
            let Some((index, value)) = token.split_once(':') else {
                continue;
            };
            let index = index.parse().map_err(|_| DataError::Parse {
                field: "index",
                fragment: token.to_string(),
            })?;
            let value = value.parse().map_err(|_| DataError::Parse {
                field: "value",
                fragment: token.to_string(),
            })?;
            self.features.push(Feature::new(index, value));
        }
        Ok(())
    }

    /// Format as a text line (without trailing newline).
    pub fn to_text(&self) -> String {
        let mut out = format!("{}", self.label);
        for f in &self.features {
            out.push_str(&format!(" {}:{}", f.index, f.value));
        }
        out
    }
}

/// Write every row as a binary record.
pub fn write_binary_rows<'a, W, I>(writer: &mut W, rows: I) -> Result<usize, DataError>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = &'a Row>,
{
    let mut count = 0;
    for row in rows {
        row.write_binary(writer)?;
        count += 1;
    }
    Ok(count)
}

/// Fill `buf` as far as the stream allows; returns the number of bytes read.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
