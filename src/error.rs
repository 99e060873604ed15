//! Error types for neuralfp.

use crate::params::ParamKey;
use thiserror::Error;

/// Neuralfp error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// A parameter key was allocated twice in the same store.
    #[error("duplicate parameter: {key}")]
    DuplicateParam { key: ParamKey },

    /// A parameter the forward pass needs was never allocated.
    ///
    /// Typically a batch contains an atom degree with no corresponding
    /// neighbor filter; a configuration error, not recoverable here.
    #[error("missing parameter: {key}")]
    MissingParam { key: ParamKey },

    /// Invalid model or training configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A graph batch failed construction-time validation.
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// The label batch has zero variance, so predictions cannot be
    /// de-normalized.
    #[error("degenerate label batch: zero variance")]
    DegenerateLabels,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
