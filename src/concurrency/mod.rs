//! Thread-level work distribution.
//!
//! - [`Pipeline`]: bounded ring of rows, one producer and many consumers,
//!   with every consumed row tagged by a contiguous `order_id`
//! - [`dispatch`]: run a list of jobs on at most `W` worker threads and
//!   collect their results in job order
//! - [`stream_rows`]: one reader thread feeding `W` consumers through a
//!   pipeline

mod dispatcher;
mod pipeline;
mod stream;

pub use dispatcher::dispatch;
pub use pipeline::{Pipeline, PutSlot};
pub use stream::stream_rows;
