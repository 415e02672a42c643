use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
    str::FromStr,
};

use candle_core::{Tensor, Var, backprop::GradStore};
use candle_nn::{
    AdamW, ModuleT, Optimizer, ParamsAdamW, SGD,
    loss::{cross_entropy, mse},
};
use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::{
    config::TrainingConfig,
    data::{EpochOrder, WindowedDataset},
    error::{Error, Result},
    metrics::AverageMeter,
    model::PredictLogits,
    tokenizer::one_hot,
};

/// Anything exposing its parameters to an optimizer
pub trait Trainable {
    fn all_vars(&self) -> Vec<Var>;
}

/// How the logits of a batch are scored against its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Targets are treated as class indices
    CrossEntropy,
    /// Raw logits are compared against one-hot encoded targets
    MeanSquaredError,
}

impl LossKind {
    pub const ALL: [LossKind; 2] = [LossKind::CrossEntropy, LossKind::MeanSquaredError];

    pub fn name(self) -> &'static str {
        match self {
            LossKind::CrossEntropy => "cross_entropy",
            LossKind::MeanSquaredError => "mse",
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        LossKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnsupportedVariant {
                kind: "loss function",
                value: s.to_owned(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    /// Adaptive moment estimation, without weight decay
    Adam,
    /// Plain stochastic gradient descent
    Sgd,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 2] = [OptimizerKind::Adam, OptimizerKind::Sgd];

    pub fn name(self) -> &'static str {
        match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::Sgd => "sgd",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OptimizerKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnsupportedVariant {
                kind: "optimizer",
                value: s.to_owned(),
            })
    }
}

/// `Optimizer` is not object safe, so we dispatch over the supported ones by hand.
enum ParameterUpdate {
    Adam(AdamW),
    Sgd(SGD),
}

impl ParameterUpdate {
    fn new(kind: OptimizerKind, vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let update = match kind {
            OptimizerKind::Adam => {
                let params = ParamsAdamW {
                    lr: learning_rate,
                    weight_decay: 0.,
                    ..Default::default()
                };
                ParameterUpdate::Adam(AdamW::new(vars, params)?)
            }
            OptimizerKind::Sgd => ParameterUpdate::Sgd(SGD::new(vars, learning_rate)?),
        };
        Ok(update)
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            ParameterUpdate::Adam(optimizer) => optimizer.step(grads)?,
            ParameterUpdate::Sgd(optimizer) => optimizer.step(grads)?,
        }
        Ok(())
    }
}

/// Scores logits of shape (batch, time, vocab_size) against target token ids of shape
/// (batch, time). Yields a scalar tensor.
pub fn calculate_loss(logits: &Tensor, targets: &Tensor, kind: LossKind) -> Result<Tensor> {
    // B, T, C => B * T, C
    let (b, t, c) = logits.dims3()?;
    let logits = logits.reshape((b * t, c))?;
    let targets = targets.reshape((b * t,))?;
    let loss = match kind {
        LossKind::CrossEntropy => cross_entropy(&logits, &targets)?,
        LossKind::MeanSquaredError => {
            let targets = one_hot(&targets.to_vec1::<u32>()?, c, logits.device())?;
            mse(&logits, &targets)?
        }
    };
    Ok(loss)
}

/// Average loss of each epoch, in chronological order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossHistory(Vec<f32>);

impl LossHistory {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn last(&self) -> Option<f32> {
        self.0.last().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, loss: f32) {
        self.0.push(loss)
    }

    /// Writes one loss per line, so it can be picked up by an external plotting tool.
    pub fn write_lines(&self, path: &Path) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for loss in &self.0 {
            writeln!(out, "{loss}")?;
        }
        out.flush()
    }
}

/// Chops `tokens` into windows as configured and trains `model` on them. Windows are shuffled
/// with a random number generator seeded from the configuration.
pub fn train<M>(model: &M, tokens: Vec<u32>, config: &TrainingConfig) -> Result<LossHistory>
where
    M: ModuleT + Trainable + PredictLogits,
{
    let dataset = WindowedDataset::new(tokens, config.seq_length, config.shift_length)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    train_on(model, &dataset, config, &mut rng)
}

/// Runs `config.epochs` epochs of mini-batch gradient descent over `dataset`, updating the
/// parameters of `model` in place.
///
/// Each batch completes forward pass, backward pass and optimizer step before the next one
/// starts. Gradients are not accumulated across batches.
pub fn train_on<M, O>(
    model: &M,
    dataset: &WindowedDataset,
    config: &TrainingConfig,
    order: &mut O,
) -> Result<LossHistory>
where
    M: ModuleT + Trainable + PredictLogits,
    O: EpochOrder,
{
    if dataset.is_empty() {
        return Err(Error::EmptyDataset);
    }
    if config.batch_size == 0 {
        return Err(Error::InvalidBatchSize);
    }
    let device = model.device();
    let vocab_size = model.vocab_size();
    let mut optimizer =
        ParameterUpdate::new(config.optimizer, model.all_vars(), config.learning_rate)?;
    info!(
        epochs = config.epochs,
        batch_size = config.batch_size,
        learning_rate = config.learning_rate,
        loss = %config.loss,
        optimizer = %config.optimizer,
        "Start training"
    );

    let mut loss_history = LossHistory(Vec::with_capacity(config.epochs));
    for epoch in 1..=config.epochs {
        let mut loss_average = AverageMeter::new();
        let order = order.epoch_order(dataset.len());
        for indices in order.chunks(config.batch_size) {
            let batch = dataset.batch(indices, vocab_size, &device)?;
            let logits = model.forward_t(&batch.input, true)?;
            let loss = calculate_loss(&logits, &batch.target, config.loss)?;
            // A fresh gradient store per batch, dropped once the step has been taken
            let grads = loss.backward()?;
            optimizer.step(&grads)?;
            loss_average.update(loss.to_scalar::<f32>()?);
        }
        let epoch_loss = loss_average.mean().ok_or(Error::EmptyDataset)?;
        loss_history.push(epoch_loss);
        debug!(epoch, loss = epoch_loss, batches = loss_average.count(), "Finished epoch");
        if config.log_every != 0 && epoch % config.log_every == 0 {
            info!("Epoch: {epoch}/{} ........ Loss: {epoch_loss:.4}", config.epochs);
        }
    }
    Ok(loss_history)
}

#[cfg(test)]
mod tests {
    use candle_core::Tensor;

    use crate::{
        cell::CellVariant,
        config::{ModelConfig, TrainingConfig},
        data::{EpochOrder, WindowedDataset},
        device::choose_device,
        error::Error,
        model::Model,
        tokenizer::Tokenizer,
    };

    use super::*;

    fn tiny_model(vocab_size: usize, cell: CellVariant) -> Model {
        let config = ModelConfig {
            hidden_dim: 16,
            cell,
            dropout: None,
        };
        Model::new(choose_device(true), vocab_size, &config).unwrap()
    }

    fn tiny_config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            learning_rate: 0.01,
            batch_size: 4,
            seq_length: 10,
            shift_length: 1,
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn cross_entropy_of_confident_correct_prediction_is_small() {
        let device = choose_device(true);
        // One batch, two time steps, three classes
        let logits = Tensor::new(&[[[10f32, -10., -10.], [-10., -10., 10.]]], &device).unwrap();
        let targets = Tensor::new(&[[0u32, 2]], &device).unwrap();

        let loss = calculate_loss(&logits, &targets, LossKind::CrossEntropy)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        assert!(loss < 1e-3, "{loss}");
    }

    #[test]
    fn mean_squared_error_compares_against_one_hot_targets() {
        let device = choose_device(true);
        let logits = Tensor::new(&[[[1f32, 0., 0.], [0., 0., 1.]]], &device).unwrap();
        let targets = Tensor::new(&[[0u32, 1]], &device).unwrap();

        let loss = calculate_loss(&logits, &targets, LossKind::MeanSquaredError)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        // Second position misses twice by one, out of six entries
        assert!((loss - 2. / 6.).abs() < 1e-6, "{loss}");
    }

    #[test]
    fn empty_dataset_fails_before_training() {
        let model = tiny_model(3, CellVariant::Rnn);

        let result = train(&model, vec![0, 1, 2], &tiny_config(1));

        assert!(matches!(result, Err(Error::EmptyDataset)));
    }

    #[test]
    fn one_loss_per_epoch() {
        let tokens: Vec<u32> = (0..60).map(|i| i % 3).collect();

        for loss in LossKind::ALL {
            for optimizer in OptimizerKind::ALL {
                let model = tiny_model(3, CellVariant::Gru);
                let config = TrainingConfig {
                    loss,
                    optimizer,
                    ..tiny_config(3)
                };

                let history = train(&model, tokens.clone(), &config).unwrap();

                assert_eq!(3, history.len());
                assert!(history.as_slice().iter().all(|loss| loss.is_finite()));
            }
        }
    }

    #[test]
    fn loss_decreases_on_repetitive_corpus() {
        let text = "abcd".repeat(50);
        let tokenizer = Tokenizer::from_text(&text);
        let tokens = tokenizer.encode(&text).unwrap();
        let model = tiny_model(tokenizer.vocab_size(), CellVariant::Gru);

        let history = train(&model, tokens, &tiny_config(40)).unwrap();

        let losses = history.as_slice();
        let first = losses[..5].iter().sum::<f32>() / 5.;
        let last = losses[losses.len() - 5..].iter().sum::<f32>() / 5.;
        assert!(last < first, "first: {first}, last: {last}");
    }

    #[test]
    fn training_updates_parameters_in_place() {
        let tokens: Vec<u32> = (0..40).map(|i| i % 4).collect();
        let model = tiny_model(4, CellVariant::Lstm);
        let before = model.all_vars()[0].as_tensor().copy().unwrap();

        train(&model, tokens, &tiny_config(2)).unwrap();

        let after = model.all_vars()[0].as_tensor().copy().unwrap();
        let change = (after - before)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(change > 0.);
    }

    #[test]
    fn loss_stays_put_without_learning_rate() {
        let tokens: Vec<u32> = (0..40).map(|i| i % 4).collect();
        let dataset = WindowedDataset::new(tokens, 10, 1).unwrap();
        let model = tiny_model(4, CellVariant::Rnn);
        let config = TrainingConfig {
            learning_rate: 0.,
            optimizer: OptimizerKind::Sgd,
            ..tiny_config(3)
        };

        let history = train_on(&model, &dataset, &config, &mut InOrder).unwrap();

        let losses = history.as_slice();
        assert!(losses.iter().all(|&loss| (loss - losses[0]).abs() < 1e-6));
    }

    #[test]
    fn write_loss_history_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loss.txt");
        let history = LossHistory(vec![2.5, 1.25]);

        history.write_lines(&path).unwrap();

        assert_eq!("2.5\n1.25\n", std::fs::read_to_string(&path).unwrap());
    }

    #[test]
    fn parse_selectors() {
        assert_eq!(LossKind::CrossEntropy, "cross_entropy".parse().unwrap());
        assert_eq!(LossKind::MeanSquaredError, "mse".parse().unwrap());
        assert_eq!(OptimizerKind::Adam, "adam".parse().unwrap());
        assert_eq!(OptimizerKind::Sgd, "sgd".parse().unwrap());
        assert!(matches!(
            "rmsprop".parse::<OptimizerKind>(),
            Err(Error::UnsupportedVariant { kind: "optimizer", .. })
        ));
        assert!(matches!(
            "hinge".parse::<LossKind>(),
            Err(Error::UnsupportedVariant { kind: "loss function", .. })
        ));
    }

    /// Visits the windows in their natural order. Makes epochs reproducible in tests.
    struct InOrder;

    impl EpochOrder for InOrder {
        fn epoch_order(&mut self, len: usize) -> Vec<usize> {
            (0..len).collect()
        }
    }
}
