//! One reader thread feeding many worker threads through a [`Pipeline`].

use super::dispatcher::dispatch;
use super::pipeline::Pipeline;
use crate::data::{DataError, RowReader};

/// Ring slots per worker.
const SLOTS_PER_WORKER: usize = 64;

/// Marks the pipeline done when the producer returns or unwinds.
struct DoneOnDrop<'a>(&'a Pipeline);

impl Drop for DoneOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set_producing_done();
    }
}

enum Output<T> {
    Produced(Result<u64, DataError>),
    Consumed(T),
}

/// Stream every row of `reader` (from its start) to one consumer per entry of
/// `states`.
///
/// Runs one producer and `states.len()` consumers concurrently. Each consumer
/// receives its state and the pipeline, drains rows with [`Pipeline::get`]
/// until it returns `None`, and returns a value; the values come back in
/// `states` order.
pub fn stream_rows<R, S, T, F>(reader: &mut R, states: Vec<S>, consume: F) -> Result<Vec<T>, DataError>
where
    R: RowReader + Send + ?Sized,
    S: Send,
    T: Send,
    F: Fn(S, &Pipeline) -> T + Sync,
{
    reader.reset()?;
    let workers = states.len().max(1);
    let pipeline = Pipeline::new(workers * SLOTS_PER_WORKER);
    let pipeline = &pipeline;
    let consume = &consume;

    let mut jobs: Vec<Box<dyn FnOnce() -> Output<T> + Send + '_>> = Vec::with_capacity(workers + 1);
    jobs.push(Box::new(move || Output::Produced(produce(pipeline, reader))));
    for state in states {
        jobs.push(Box::new(move || Output::Consumed(consume(state, pipeline))));
    }
    let n_jobs = jobs.len();

    let mut results = Vec::with_capacity(n_jobs - 1);
    for output in dispatch(jobs, n_jobs) {
        match output {
            Output::Produced(produced) => {
                let rows = produced?;
                log::debug!("streamed {rows} rows to {} workers", n_jobs - 1);
            }
            Output::Consumed(value) => results.push(value),
        }
    }
    Ok(results)
}

fn produce<R: RowReader + ?Sized>(pipeline: &Pipeline, reader: &mut R) -> Result<u64, DataError> {
    let _done = DoneOnDrop(pipeline);
    loop {
        let mut slot = pipeline.begin_put();
        match reader.read(slot.row()) {
            Ok(true) => slot.end_put(true),
            Ok(false) => {
                slot.end_put(false);
                return Ok(pipeline.num_put());
            }
            Err(e) => {
                slot.end_put(false);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemoryReader, Row};

    #[test]
    fn test_every_row_reaches_exactly_one_worker() {
        let rows: Vec<Row> = (0..500).map(|i| Row::new(i as f32)).collect();
        let mut reader = MemoryReader::new(rows);

        let per_worker = stream_rows(&mut reader, vec![(); 3], |_, pipeline| {
            let mut seen = Vec::new();
            while let Some((row, order_id)) = pipeline.get() {
                seen.push((order_id, row.label as u64));
            }
            seen
        })
        .unwrap();

        assert_eq!(per_worker.len(), 3);
        let mut all: Vec<(u64, u64)> = per_worker.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..500).map(|i| (i, i)).collect::<Vec<_>>());
    }

    #[test]
    fn test_states_are_handed_back_in_order() {
        let mut reader = MemoryReader::new(vec![Row::new(1.0); 10]);
        let out = stream_rows(&mut reader, vec![10, 20], |base, pipeline| {
            let mut n = 0;
            while pipeline.get().is_some() {
                n += 1;
            }
            (base, n)
        })
        .unwrap();
        assert_eq!(out[0].0, 10);
        assert_eq!(out[1].0, 20);
        assert_eq!(out[0].1 + out[1].1, 10);
    }

    struct FailingReader;

    impl RowReader for FailingReader {
        fn reset(&mut self) -> Result<(), DataError> {
            Ok(())
        }

        fn read(&mut self, _row: &mut Row) -> Result<bool, DataError> {
            Err(DataError::Truncated { expected: 4, actual: 1 })
        }

        fn len(&self) -> usize {
            1
        }

        fn dim(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_reader_error_stops_workers_and_propagates() {
        let result = stream_rows(&mut FailingReader, vec![(); 2], |_, pipeline| {
            while pipeline.get().is_some() {}
        });
        assert!(matches!(result, Err(DataError::Truncated { .. })));
    }
}
