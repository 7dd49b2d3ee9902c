use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building, loading or training the networks.
#[derive(Error, Debug)]
pub enum DlpGanError {
    /// A batch does not have the shape the networks were built for.
    #[error("shape mismatch for {what}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: Vec<i64>,
    },

    /// A pretrained weight file or checkpoint does not exist.
    #[error("weights file not found: {}", path.display())]
    MissingWeights { path: PathBuf },

    /// A checkpoint exists but lacks a parameter of the network, or stores it
    /// with a different shape.
    #[error("checkpoint {} has no usable entry for `{name}`", path.display())]
    MissingParameter { path: PathBuf, name: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("dataset error: {message}")]
    Dataset { message: String },

    #[error(transparent)]
    Tch(#[from] tch::TchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DlpGanError>;
