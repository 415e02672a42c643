use candle_core::{D, DType, Device, Tensor, Var};
use candle_nn::{Dropout, Embedding, Linear, ModuleT, VarBuilder, VarMap};
use tracing::debug;

use crate::{
    cell::{CellVariant, Recurrence, recurrence},
    config::ModelConfig,
    error::{Error, Result},
    tokenizer::{Tokenizer, one_hot, one_hot_decode},
    train::Trainable,
};

/// Character level recurrent language model.
///
/// Consumes one-hot encoded characters and predicts unnormalized scores (logits) for the
/// character following each position.
pub struct Model {
    /// Maps token ids to embedding vectors. Embedding dimension equals the vocabulary size.
    embedding: Embedding,
    /// Propagates the hidden state along the time dimension
    recurrent_module: Box<dyn Recurrence>,
    /// Only applied to the output of the recurrent module, and only during training
    dropout: Option<Dropout>,
    /// Maps hidden states back to vocab size
    fc: Linear,
    var_map: VarMap,
    variant: CellVariant,
    vocab_size: usize,
}

impl Model {
    pub fn new(device: Device, vocab_size: usize, config: &ModelConfig) -> Result<Self> {
        // Validate before allocating any parameters
        let dropout = config
            .dropout
            .map(|p| {
                if (0. ..1.).contains(&p) {
                    Ok(Dropout::new(p))
                } else {
                    Err(Error::InvalidDropout(p))
                }
            })
            .transpose()?;

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let embedding = candle_nn::embedding(vocab_size, vocab_size, vb.pp("embedding"))?;
        let recurrent_module = recurrence(
            config.cell,
            vocab_size,
            config.hidden_dim,
            vb.pp("recurrent_module"),
        )?;
        let fc = candle_nn::linear(config.hidden_dim, vocab_size, vb.pp("fc"))?;
        let model = Self {
            embedding,
            recurrent_module,
            dropout,
            fc,
            var_map,
            variant: config.cell,
            vocab_size,
        };
        debug!(
            cell = %model.variant,
            hidden_dim = config.hidden_dim,
            parameters = model.number_of_parameters(),
            "Created model"
        );
        Ok(model)
    }

    pub fn number_of_parameters(&self) -> usize {
        self.var_map
            .all_vars()
            .iter()
            .map(|var| var.elem_count())
            .sum::<usize>()
    }

    pub fn variant(&self) -> CellVariant {
        self.variant
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    pub fn var_map_mut(&mut self) -> &mut VarMap {
        &mut self.var_map
    }

    /// Forward pass for a single sequence of shape (time, vocab_size) in evaluation mode. Returns
    /// logits of shape (time, vocab_size).
    pub fn forward_single(&self, xs: &Tensor) -> Result<Tensor> {
        // Add a batch dimension of one, and remove it again afterwards
        let logits = self.forward_t(&xs.unsqueeze(0)?, false)?.squeeze(0)?;
        Ok(logits)
    }

    /// Predicts the most likely successor for each character of `text`. The result has as many
    /// characters as `text`.
    pub fn forward_string(&self, tokenizer: &Tokenizer, text: &str) -> Result<String> {
        let tokens = tokenizer.encode(text)?;
        let xs = one_hot(&tokens, self.vocab_size, &self.device())?;
        let logits = self.forward_single(&xs)?;
        tokenizer.decode(&one_hot_decode(&logits)?)
    }
}

impl ModuleT for Model {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        // xs in batch, time, vocab size. One-hot encoded, so we recover the token ids first.
        let ids = xs.argmax(D::Minus1)?;
        // batch, time, vocab size
        let x = self.embedding.forward_t(&ids, train)?;
        // batch, time, hidden dimension
        let mut out = self.recurrent_module.hidden_states(&x)?;
        if let Some(dropout) = &self.dropout {
            out = dropout.forward_t(&out, train)?;
        }
        // Batch, Time, Hidden dimension -> Batch, Time, Vocab Size
        self.fc.forward_t(&out, train)
    }
}

/// Models are loaded to a device (likely either Cuda or CPU). This trait allows us to learn the
/// device and declare appropriate tensors.
pub trait DeviceAffine {
    fn device(&self) -> Device;
}

impl DeviceAffine for Model {
    fn device(&self) -> Device {
        self.embedding.embeddings().device().clone()
    }
}

/// Scores every position of a single one-hot encoded sequence, without tracking gradients or
/// applying dropout.
pub trait PredictLogits: DeviceAffine {
    /// Maps (time, vocab_size) to logits of shape (time, vocab_size).
    fn predict_logits(&self, xs: &Tensor) -> Result<Tensor>;

    fn vocab_size(&self) -> usize;
}

impl PredictLogits for Model {
    fn predict_logits(&self, xs: &Tensor) -> Result<Tensor> {
        // Inference must not leak into the graph of parameters which are trained later on
        Ok(self.forward_single(xs)?.detach())
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

impl Trainable for Model {
    fn all_vars(&self) -> Vec<Var> {
        self.var_map.all_vars()
    }
}
