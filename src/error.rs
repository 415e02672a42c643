use std::path::PathBuf;

/// Everything that can go wrong while encoding text, building datasets, training or generating.
///
/// None of these are transient. They point to a defect in the input or the configuration, so
/// callers are expected to surface them rather than retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A character of the input is not part of the vocabulary the model has been built for.
    #[error("Character {0:?} is not part of the vocabulary")]
    UnknownSymbol(char),
    /// A token id does not map to any character of the vocabulary.
    #[error("Token id {0} is outside of the vocabulary")]
    UnknownToken(u32),
    #[error("Index {index} is out of bounds for a dataset with {len} windows")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("Generation requires a non-empty seed text")]
    EmptySeed,
    #[error("The corpus is too short to yield a single training window")]
    EmptyDataset,
    /// A selector string (cell, loss or optimizer) names nothing we know.
    #[error("Unsupported {kind}: '{value}'")]
    UnsupportedVariant { kind: &'static str, value: String },
    #[error(
        "Shift length {shift_length} must be at least 1 and smaller than the sequence length \
        {seq_length}"
    )]
    InvalidWindow {
        seq_length: usize,
        shift_length: usize,
    },
    #[error("Generation requires a shift length of at least 1")]
    InvalidShift,
    #[error("Dropout probability must be within [0, 1), got {0}")]
    InvalidDropout(f32),
    #[error("Batch size must be at least 1")]
    InvalidBatchSize,
    /// Weights could not be read from or written to disk.
    #[error("Failed to persist weights at '{}'", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
