use std::{fs, path::PathBuf, time::Instant};

use anyhow::Context;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use char_rnn::{
    CellVariant, CorpusConfig, LossKind, Model, ModelConfig, OptimizerKind, Tokenizer,
    TrainingConfig, WeightStore, choose_device, generate, generate_with, train,
};

/// Generates Shakespeare-style text from a piece of starting text. Unless `--use-pretrained` is
/// `none`, previously trained weights are used. Otherwise a new model is trained first.
#[derive(Parser, Debug)]
#[command(name = "char-rnn", version)]
struct Args {
    /// Text corpus the vocabulary is built from and the model is trained on
    #[arg(long, default_value = "shakespeare.txt")]
    corpus: PathBuf,

    /// Only this many characters from the start of the corpus are used
    #[arg(long, default_value_t = 50_000)]
    limited_data: usize,

    /// Piece of text used as starting point for generation
    #[arg(short, long, default_value = "MENENIUS")]
    starting_text: String,

    /// Length of text to generate (in characters)
    #[arg(short, long, default_value_t = 500)]
    output_size: usize,

    /// Which pretrained model to use. `none` trains a new one.
    #[arg(long, default_value = "gru", value_parser = ["none", "rnn", "gru", "lstm"])]
    use_pretrained: String,

    /// Type of recurrent module used for training
    #[arg(short, long, default_value = "gru")]
    recurrent_module: CellVariant,

    /// How much dropout to use for training (between 0 and 1). Zero disables dropout.
    #[arg(short, long, default_value_t = 0.)]
    dropout: f32,

    /// Directory holding `<variant>.safetensors` weight files
    #[arg(long, default_value = ".")]
    weights_dir: PathBuf,

    #[arg(long, default_value_t = 500)]
    hidden_dim: usize,

    #[arg(long, default_value_t = 600)]
    epochs: usize,

    #[arg(long, default_value_t = 0.005)]
    learning_rate: f64,

    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    #[arg(long, default_value_t = 100)]
    seq_length: usize,

    /// Offset between input and target during training, also the number of characters appended
    /// per forward pass during generation
    #[arg(long, default_value_t = 1)]
    shift_length: usize,

    /// `cross_entropy` or `mse`
    #[arg(long, default_value = "cross_entropy")]
    loss: LossKind,

    /// `adam` or `sgd`
    #[arg(long, default_value = "adam")]
    optimizer: OptimizerKind,

    /// Seed for shuffling during training and for sampling during generation
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Save the weights after training
    #[arg(long)]
    save: bool,

    /// Write the loss of each epoch to this file, one per line
    #[arg(long)]
    loss_history: Option<PathBuf>,

    /// Sampling temperature. Zero always picks the most likely character.
    #[arg(long, default_value_t = 0.)]
    temperature: f64,

    /// Do not use an accelerator, even if one is available
    #[arg(long)]
    cpu: bool,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let device = choose_device(args.cpu);

    let text = fs::read_to_string(&args.corpus).context("Error opening input text.")?;
    let corpus = CorpusConfig {
        limited_data: args.limited_data,
    };
    let text = corpus.apply(&text);
    let tokenizer = Tokenizer::from_text(text);
    let store = WeightStore::new(&args.weights_dir);
    let dropout = ModelConfig::dropout_from_probability(args.dropout);

    let model = if args.use_pretrained == "none" {
        let model_config = ModelConfig {
            hidden_dim: args.hidden_dim,
            cell: args.recurrent_module,
            dropout,
        };
        let model = Model::new(device, tokenizer.vocab_size(), &model_config)?;
        info!(
            cell = %model.variant(),
            parameters = model.number_of_parameters(),
            "Training model from scratch"
        );

        let training_config = TrainingConfig {
            epochs: args.epochs,
            learning_rate: args.learning_rate,
            batch_size: args.batch_size,
            seq_length: args.seq_length,
            shift_length: args.shift_length,
            loss: args.loss,
            optimizer: args.optimizer,
            seed: args.seed,
            ..TrainingConfig::default()
        };
        let start = Instant::now();
        let history = train(&model, tokenizer.encode(text)?, &training_config)?;
        info!(
            "Training finished in {:.1} seconds, final loss: {:.3}",
            start.elapsed().as_secs_f64(),
            history.last().unwrap_or(f32::NAN)
        );
        if let Some(path) = &args.loss_history {
            history
                .write_lines(path)
                .with_context(|| format!("Error writing loss history to {}", path.display()))?;
        }
        if args.save {
            store.save(&model)?;
        }
        model
    } else {
        let model_config = ModelConfig {
            hidden_dim: args.hidden_dim,
            cell: args.use_pretrained.parse()?,
            dropout,
        };
        let mut model = Model::new(device, tokenizer.vocab_size(), &model_config)?;
        store.load(&mut model)?;
        model
    };

    let generated = if args.temperature > 0. {
        let sampling = Sampling::All {
            temperature: args.temperature,
        };
        let sampler = LogitsProcessor::from_sampling(args.seed, sampling);
        generate_with(
            &model,
            &tokenizer,
            sampler,
            &args.starting_text,
            args.shift_length,
            args.output_size,
        )?
    } else {
        generate(
            &model,
            &tokenizer,
            &args.starting_text,
            args.shift_length,
            args.output_size,
        )?
    };
    println!("generated text:");
    println!("{generated}");
    Ok(())
}
