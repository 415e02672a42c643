//! Autoregressive text generation.
//!
//! The model scores the entire text generated so far. Only the last `shift_length` predictions
//! are new, these get appended and the extended text is fed back in. Each step therefore costs a
//! forward pass over an ever growing sequence, which makes generating `n` characters with a shift
//! length of one quadratic in `n`. Larger shift lengths trade quality for fewer passes.

use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use tracing::debug;

use crate::{
    error::{Error, Result},
    model::PredictLogits,
    tokenizer::{Tokenizer, one_hot, one_hot_decode},
};

/// Extends `seed` to exactly `target_length` characters by repeatedly appending the most likely
/// continuation. `shift_length` must match the one the model has been trained with.
///
/// If `shift_length` does not divide the number of missing characters, the last chunk is cut
/// short. A seed longer than `target_length` is truncated.
pub fn generate<M>(
    model: &M,
    tokenizer: &Tokenizer,
    seed: &str,
    shift_length: usize,
    target_length: usize,
) -> Result<String>
where
    M: PredictLogits,
{
    generate_with(model, tokenizer, Greedy, seed, shift_length, target_length)
}

/// Same as [`generate`], but the new characters are picked by `sampler`.
pub fn generate_with<M, S>(
    model: &M,
    tokenizer: &Tokenizer,
    sampler: S,
    seed: &str,
    shift_length: usize,
    target_length: usize,
) -> Result<String>
where
    M: PredictLogits,
    S: Sampler,
{
    if seed.is_empty() {
        return Err(Error::EmptySeed);
    }
    if shift_length == 0 {
        return Err(Error::InvalidShift);
    }
    let input_ids = tokenizer.encode(seed)?;
    let mut steps = GenerateIter::new(model, sampler, input_ids, shift_length);
    while steps.tokens().len() < target_length {
        steps.step()?;
    }
    let mut tokens = steps.into_tokens();
    tokens.truncate(target_length);
    debug!(target_length, shift_length, "Generated text");
    tokenizer.decode(&tokens)
}

/// Yields the newly predicted tokens of each forward pass, after appending them to the tokens
/// seen so far.
pub struct GenerateIter<'a, M, S> {
    model: &'a M,
    input_ids: Vec<u32>,
    sampler: S,
    shift_length: usize,
    device: Device,
}

impl<'a, M: PredictLogits, S: Sampler> GenerateIter<'a, M, S> {
    pub fn new(model: &'a M, sampler: S, input_ids: Vec<u32>, shift_length: usize) -> Self {
        Self {
            model,
            input_ids,
            sampler,
            shift_length,
            device: model.device(),
        }
    }

    /// Seed and everything generated so far
    pub fn tokens(&self) -> &[u32] {
        &self.input_ids
    }

    pub fn into_tokens(self) -> Vec<u32> {
        self.input_ids
    }

    /// Runs one forward pass over all tokens and appends the last `shift_length` predictions.
    pub fn step(&mut self) -> Result<Vec<u32>> {
        let xs = one_hot(&self.input_ids, self.model.vocab_size(), &self.device)?;
        let logits = self.model.predict_logits(&xs)?;
        let time = logits.dim(0)?;
        // Only the tail of the prediction extends beyond the input
        let fresh = self.shift_length.min(time);
        let logits = logits.narrow(0, time - fresh, fresh)?;
        let next = self.sampler.sample_sequence(&logits)?;
        self.input_ids.extend_from_slice(&next);
        Ok(next)
    }
}

impl<M, S> Iterator for GenerateIter<'_, M, S>
where
    M: PredictLogits,
    S: Sampler,
{
    type Item = Result<Vec<u32>>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.step())
    }
}

pub trait Sampler {
    /// Samples one token for each row of a logits tensor with shape (time, vocab_size)
    fn sample_sequence(&mut self, logits: &Tensor) -> Result<Vec<u32>>;
}

/// Always picks the highest scoring token
#[derive(Debug, Clone, Copy, Default)]
pub struct Greedy;

impl Sampler for Greedy {
    fn sample_sequence(&mut self, logits: &Tensor) -> Result<Vec<u32>> {
        one_hot_decode(logits)
    }
}

impl Sampler for LogitsProcessor {
    fn sample_sequence(&mut self, logits: &Tensor) -> Result<Vec<u32>> {
        let (time, _vocab_size) = logits.dims2()?;
        (0..time)
            .map(|row| -> Result<u32> { Ok(self.sample(&logits.get(row)?)?) })
            .collect()
    }
}
