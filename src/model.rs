//! The contract shared by trained models and their trainers.
//!
//! Code that only scores rows or persists models can stay generic over
//! [`Model`]; [`GbdtModel`] and [`GbdtTrainer`] are the implementations
//! this crate ships.

use std::io::{Read, Write};

use crate::data::{Row, RowReader};
use crate::inference::GbdtModel;
use crate::io::{read_model, write_model, FormatError};
use crate::training::{GbdtTrainer, TrainError};

/// A trained model.
pub trait Model: Sized {
    fn predict(&self, row: &Row) -> f32;

    fn write_model(&self, writer: &mut dyn Write) -> Result<(), FormatError>;

    fn read_model(reader: &mut dyn Read) -> Result<Self, FormatError>;
}

/// Produces a [`Model`] from a dataset.
pub trait Trainer {
    type Output: Model;

    fn train(&mut self, reader: &mut dyn RowReader) -> Result<Self::Output, TrainError>;
}

impl Model for GbdtModel {
    fn predict(&self, row: &Row) -> f32 {
        GbdtModel::predict(self, row)
    }

    fn write_model(&self, writer: &mut dyn Write) -> Result<(), FormatError> {
        write_model(self, writer)
    }

    fn read_model(reader: &mut dyn Read) -> Result<Self, FormatError> {
        read_model(reader)
    }
}

impl Trainer for GbdtTrainer {
    type Output = GbdtModel;

    fn train(&mut self, reader: &mut dyn RowReader) -> Result<GbdtModel, TrainError> {
        GbdtTrainer::train(self, reader)
    }
}
