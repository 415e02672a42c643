use std::collections::{HashMap, HashSet};

use candle_core::{D, Device, Tensor};
use tracing::info;

use crate::error::{Error, Result};

/// The tokenizer is responsible for converting text into a sequence of numbers and back.
///
/// This implementation uses a simple character-level tokenization approach, where each unique
/// character in the input text is assigned an integer. Characters are ordered by code point, so
/// the same corpus always yields the same mapping. A trained model is only meaningful together
/// with the tokenizer of the corpus it has been trained on, since the width of its embedding and
/// output layers equals the vocabulary size.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    /// Sparse lookup from character to integer.
    char_to_int: HashMap<char, u32>,
    /// Lookup from integer to character. We use a vector, because we know our token_ids to be
    /// contiguous.
    int_to_char: Vec<char>,
}

impl Tokenizer {
    /// Creates a tokenizer from the given text.
    pub fn from_text(text: &str) -> Self {
        let set: HashSet<_> = text.chars().collect();
        let mut chars = Vec::from_iter(set);
        chars.sort_unstable();
        let char_to_int = chars
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect::<HashMap<_, _>>();
        let int_to_char = chars;
        info!(vocab_size = int_to_char.len(), "Built vocabulary");
        Tokenizer {
            char_to_int,
            int_to_char,
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        text.chars()
            .map(|c| {
                self.char_to_int
                    .get(&c)
                    .copied()
                    .ok_or(Error::UnknownSymbol(c))
            })
            .collect()
    }

    pub fn decode(&self, tokens: &[u32]) -> Result<String> {
        tokens.iter().map(|&i| self.decode_single(i)).collect()
    }

    pub fn decode_single(&self, token: u32) -> Result<char> {
        self.int_to_char
            .get(token as usize)
            .copied()
            .ok_or(Error::UnknownToken(token))
    }

    pub fn vocab_size(&self) -> usize {
        self.int_to_char.len()
    }
}

/// Expands token ids into a tensor of shape (tokens.len(), vocab_size). Each row is zero, except
/// for a single one at the position of the token id.
pub fn one_hot(tokens: &[u32], vocab_size: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; tokens.len() * vocab_size];
    for (row, &token) in tokens.iter().enumerate() {
        if token as usize >= vocab_size {
            return Err(Error::UnknownToken(token));
        }
        data[row * vocab_size + token as usize] = 1.;
    }
    Ok(Tensor::from_vec(data, (tokens.len(), vocab_size), device)?)
}

/// Picks the highest scoring index along the last dimension of `scores`. Works for one-hot
/// vectors as well as raw logits. Ties resolve to the lowest index.
///
/// Leading dimensions are flattened, i.e. (batch, time, vocab_size) yields batch * time ids.
pub fn one_hot_decode(scores: &Tensor) -> Result<Vec<u32>> {
    let ids = scores.argmax(D::Minus1)?.flatten_all()?.to_vec1::<u32>()?;
    Ok(ids)
}
