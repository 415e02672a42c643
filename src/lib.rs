//! Character level recurrent language model.
//!
//! Text is encoded one character at a time ([`Tokenizer`]), chopped into fixed size windows
//! ([`WindowedDataset`]) and used to train a recurrent [`Model`] to predict the character
//! `shift_length` positions ahead. The trained model extends a seed text by feeding its own
//! predictions back in ([`generate`]).

pub mod cell;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod generate;
pub mod metrics;
pub mod model;
pub mod tokenizer;
pub mod train;

pub use self::{
    cell::CellVariant,
    checkpoint::WeightStore,
    config::{CorpusConfig, ModelConfig, TrainingConfig},
    data::WindowedDataset,
    device::choose_device,
    error::{Error, Result},
    generate::{generate, generate_with},
    model::Model,
    tokenizer::Tokenizer,
    train::{LossHistory, LossKind, OptimizerKind, train},
};
