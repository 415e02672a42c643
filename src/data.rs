use candle_core::{Device, Tensor};
use rand::{Rng, seq::SliceRandom};
use tracing::info;

use crate::{
    error::{Error, Result},
    tokenizer::one_hot,
};

/// Keeps only the first `limit` characters of the corpus. Training time grows linearly with the
/// corpus, so this is how we keep it manageable.
pub fn limit_corpus(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_offset, _)) => &text[..byte_offset],
        None => text,
    }
}

/// Chops a tokenized corpus into consecutive, non-overlapping windows of `seq_length` tokens.
///
/// Each window yields one training example. The input is the window without its last
/// `shift_length` tokens, the target is the window without its first `shift_length` tokens.
/// Tokens which do not fill up a complete window at the end of the corpus are never used.
///
/// ```text
/// tokens:       a b c a b c a
/// seq_length:   3, shift_length: 1
/// window 0:     input [a b]  target [b c]
/// window 1:     input [a b]  target [b c]
/// ```
#[derive(Debug, Clone)]
pub struct WindowedDataset {
    tokens: Vec<u32>,
    seq_length: usize,
    shift_length: usize,
}

impl WindowedDataset {
    pub fn new(tokens: Vec<u32>, seq_length: usize, shift_length: usize) -> Result<Self> {
        if shift_length == 0 || shift_length >= seq_length {
            return Err(Error::InvalidWindow {
                seq_length,
                shift_length,
            });
        }
        let dataset = WindowedDataset {
            tokens,
            seq_length,
            shift_length,
        };
        info!(
            num_tokens = dataset.tokens.len(),
            num_windows = dataset.len(),
            seq_length,
            shift_length,
            "Prepared windowed dataset"
        );
        Ok(dataset)
    }

    /// Number of complete windows.
    pub fn len(&self) -> usize {
        self.tokens.len() / self.seq_length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of both input and target of each example.
    pub fn example_length(&self) -> usize {
        self.seq_length - self.shift_length
    }

    /// Input and target of the window with the given index.
    pub fn get(&self, index: usize) -> Result<(&[u32], &[u32])> {
        if index >= self.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        let start = index * self.seq_length;
        let window = &self.tokens[start..start + self.seq_length];
        let input = &window[..self.seq_length - self.shift_length];
        let target = &window[self.shift_length..];
        Ok((input, target))
    }

    /// Stacks the examples at `indices` into a single batch.
    pub fn batch(&self, indices: &[usize], vocab_size: usize, device: &Device) -> Result<Batch> {
        let time = self.example_length();
        let mut inputs = Vec::with_capacity(indices.len() * time);
        let mut targets = Vec::with_capacity(indices.len() * time);
        for &index in indices {
            let (input, target) = self.get(index)?;
            inputs.extend_from_slice(input);
            targets.extend_from_slice(target);
        }
        let input = one_hot(&inputs, vocab_size, device)?.reshape((
            indices.len(),
            time,
            vocab_size,
        ))?;
        let target = Tensor::from_vec(targets, (indices.len(), time), device)?;
        Ok(Batch { input, target })
    }
}

/// A batch of examples ready to be fed into the model
pub struct Batch {
    /// A tensor of shape [batch_size, time, vocab_size]. One-hot encoded input tokens.
    pub input: Tensor,
    /// A tensor of shape [batch_size, time] holding the target token ids. Each target is the
    /// token `shift_length` positions after the input token at the same position.
    pub target: Tensor,
}

/// Provides the order in which the windows of a dataset are visited during one epoch. This trait
/// is auto implemented for any `Rng`, as we intend to shuffle the windows randomly in training.
pub trait EpochOrder {
    /// A permutation of `0..len`.
    fn epoch_order(&mut self, len: usize) -> Vec<usize>;
}

impl<T> EpochOrder for T
where
    T: Rng,
{
    fn epoch_order(&mut self, len: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(self);
        indices
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn windows_of_repeated_block() {
        // Vocabulary {a, b, c} maps to {0, 1, 2}, text is "abcabc"
        let dataset = WindowedDataset::new(vec![0, 1, 2, 0, 1, 2], 3, 1).unwrap();

        assert_eq!(2, dataset.len());
        assert_eq!((&[0u32, 1][..], &[1u32, 2][..]), dataset.get(0).unwrap());
        assert_eq!((&[0u32, 1][..], &[1u32, 2][..]), dataset.get(1).unwrap());
    }

    #[test]
    fn trailing_partial_window_is_dropped() {
        let dataset = WindowedDataset::new((0..11).collect(), 4, 1).unwrap();

        assert_eq!(2, dataset.len());
        assert!(matches!(
            dataset.get(2),
            Err(Error::IndexOutOfBounds { index: 2, len: 2 })
        ));
    }

    #[test]
    fn target_is_input_advanced_by_shift_length() {
        let tokens: Vec<u32> = (0..50).collect();
        let shift_length = 3;
        let dataset = WindowedDataset::new(tokens, 10, shift_length).unwrap();

        for index in 0..dataset.len() {
            let (input, target) = dataset.get(index).unwrap();
            assert_eq!(7, input.len());
            assert_eq!(7, target.len());
            assert_eq!(index as u32 * 10, input[0]);
            for k in 0..input.len() - shift_length {
                assert_eq!(target[k], input[k + shift_length]);
            }
        }
    }

    #[test]
    fn shift_length_must_fit_into_window() {
        assert!(matches!(
            WindowedDataset::new(vec![0; 10], 3, 3),
            Err(Error::InvalidWindow {
                seq_length: 3,
                shift_length: 3
            })
        ));
        assert!(matches!(
            WindowedDataset::new(vec![0; 10], 3, 0),
            Err(Error::InvalidWindow { .. })
        ));
    }

    #[test]
    fn short_corpus_yields_empty_dataset() {
        let dataset = WindowedDataset::new(vec![0, 1], 3, 1).unwrap();

        assert!(dataset.is_empty());
    }

    #[test]
    fn batch_has_dim_batch_time_vocab_size() {
        let device = Device::Cpu;
        let dataset = WindowedDataset::new(vec![0, 1, 2, 2, 1, 0], 3, 1).unwrap();

        let batch = dataset.batch(&[1, 0], 3, &device).unwrap();

        assert_eq!(batch.input.dims(), &[2, 2, 3]);
        assert_eq!(
            vec![
                vec![vec![0f32, 0., 1.], vec![0., 1., 0.]],
                vec![vec![1., 0., 0.], vec![0., 1., 0.]]
            ],
            batch.input.to_vec3::<f32>().unwrap()
        );
        assert_eq!(
            vec![vec![1u32, 0], vec![1, 2]],
            batch.target.to_vec2::<u32>().unwrap()
        );
    }

    #[test]
    fn shuffled_order_is_permutation() {
        let mut rng = StdRng::seed_from_u64(42);

        let mut order = rng.epoch_order(100);
        order.sort_unstable();

        assert_eq!((0..100).collect::<Vec<_>>(), order);
    }

    #[test]
    fn limit_corpus_counts_characters() {
        assert_eq!("äbc", limit_corpus("äbcdef", 3));
        assert_eq!("abc", limit_corpus("abc", 50_000));
    }
}
