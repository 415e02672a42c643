//! Hyperparameters of model, training and corpus preparation.

use crate::{
    cell::CellVariant,
    data::limit_corpus,
    train::{LossKind, OptimizerKind},
};

/// Shape of the model. The vocabulary size is not part of it, since it is dictated by the corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Width of the hidden state of the recurrent cell
    pub hidden_dim: usize,
    pub cell: CellVariant,
    /// Probability of zeroing an output of the recurrent cell during training. `None` disables
    /// dropout.
    pub dropout: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 500,
            cell: CellVariant::Gru,
            dropout: None,
        }
    }
}

impl ModelConfig {
    /// Translates a plain probability into the optional dropout of the model. Only exactly zero
    /// disables dropout, anything else is left for [`crate::Model::new`] to validate.
    pub fn dropout_from_probability(probability: f32) -> Option<f32> {
        (probability != 0.).then_some(probability)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Number of windows per mini-batch. The last batch of an epoch may be smaller.
    pub batch_size: usize,
    /// Length of each window the corpus is chopped into
    pub seq_length: usize,
    /// Offset between input and target within a window
    pub shift_length: usize,
    pub loss: LossKind,
    pub optimizer: OptimizerKind,
    /// Seed for shuffling the windows of each epoch
    pub seed: u64,
    /// Report progress every this many epochs
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 600,
            learning_rate: 0.005,
            batch_size: 256,
            seq_length: 100,
            shift_length: 1,
            loss: LossKind::CrossEntropy,
            optimizer: OptimizerKind::Adam,
            seed: 42,
            log_every: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorpusConfig {
    /// Only this many characters from the start of the corpus are used
    pub limited_data: usize,
}

impl CorpusConfig {
    pub fn apply<'a>(&self, text: &'a str) -> &'a str {
        limit_corpus(text, self.limited_data)
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            limited_data: 50_000,
        }
    }
}
