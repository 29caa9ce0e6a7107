//! Dataset records and the sorted column cache.
//!
//! - [`Row`]: one labeled sparse example, with its binary record codec
//! - [`RowReader`]: restartable stream of rows ([`MemoryReader`], [`BinaryReader`])
//! - [`ColumnCache`]: one value-sorted index array per feature dimension

mod reader;
mod row;
mod sorted;

pub use reader::{convert_text_to_binary, BinaryFileReader, BinaryReader, MemoryReader, RowReader};
pub use row::{write_binary_rows, DataError, Feature, Row};
pub use sorted::{CacheError, CacheOptions, ColumnCache, SortedColumn, SortedEntry, MAX_ROWS};
