//! Generic multi-threaded epoch loop for row-at-a-time learners.
//!
//! Each epoch streams the dataset once: one producer thread reads rows and
//! every worker thread feeds them to its own [`Updatable`]. After the epoch
//! the workers' learners are handed to a `join` callback, typically to
//! average their parameters.

use std::time::Instant;

use crate::concurrency::stream_rows;
use crate::data::{DataError, Row, RowReader};

/// A learner updated one row at a time.
pub trait Updatable: Send {
    /// Learn from `row`; returns the row's loss before the update.
    fn update(&mut self, row: &Row) -> f64;
}

/// Loss history of one [`EpochRunner::run`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochReport {
    /// Mean loss per completed epoch.
    pub losses: Vec<f64>,
    /// Whether the run stopped because the loss fell below `min_loss`.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRunner {
    pub epochs: usize,
    pub min_loss: f64,
}

impl EpochRunner {
    pub fn new(epochs: usize, min_loss: f64) -> Self {
        Self { epochs, min_loss }
    }

    /// Run up to `epochs` epochs with one worker per learner.
    ///
    /// The epoch loss is the summed row loss divided by the reader length.
    pub fn run<R, U, J>(
        &self,
        reader: &mut R,
        learners: &mut Vec<U>,
        mut join: J,
    ) -> Result<EpochReport, DataError>
    where
        R: RowReader + Send + ?Sized,
        U: Updatable,
        J: FnMut(usize, &mut [U]),
    {
        let mut report = EpochReport::default();
        let len = reader.len().max(1) as f64;
        for epoch in 0..self.epochs {
            let start = Instant::now();
            let states = std::mem::take(learners);
            let outputs = stream_rows(reader, states, |mut learner, pipeline| {
                let mut loss = 0.0;
                let mut row = Row::default();
                while pipeline.get_into(&mut row).is_some() {
                    loss += learner.update(&row);
                }
                (learner, loss)
            })?;

            let mut total = 0.0;
            for (learner, loss) in outputs {
                learners.push(learner);
                total += loss;
            }
            let loss = total / len;
            log::info!("epoch {epoch}: loss {loss:.6} in {:.2?}", start.elapsed());
            join(epoch, learners);
            report.losses.push(loss);

            if loss < self.min_loss {
                report.converged = true;
                break;
            }
        }
        Ok(report)
    }
}
