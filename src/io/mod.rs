//! Model persistence.
//!
//! See [`model_file`] for the binary layout.

pub mod model_file;

pub use model_file::{read_model, read_model_file, write_model, write_model_file, FormatError};
