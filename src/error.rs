//! Error taxonomy for the Strata backend.
//!
//! Per-node capture failures and stream overflow are deliberately absent
//! here: both are recovered locally with a warning and never surface to the
//! caller of a run.

/// Error type for Strata library operations.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// A referenced node id or model file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// User-supplied input that cannot be converted into a usable tensor.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// File extension or model-kind tag that Strata does not recognize.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The underlying forward pass itself failed. Fatal for the run; the
    /// cache is left partially populated.
    #[error("inference execution failed: {0}")]
    Execution(String),

    /// Tensor construction or conversion error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Filesystem error (model files, exports).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StrataError>;
