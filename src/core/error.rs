//! Error types shared by the SVM and t-SNE engines

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DalError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Empty dataset")]
    EmptyDataset,

    #[error("Invalid label: {0}")]
    InvalidLabel(f64),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Memory allocation failed: {0}")]
    MemoryAllocation(String),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Model not trained")]
    ModelNotTrained,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DalError>;

/// Allocate a zero-filled buffer, reporting allocation failure instead of aborting.
pub fn try_zeroed<T: Clone + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    try_filled(len, T::default(), what)
}

/// Allocate a buffer filled with `value`, reporting allocation failure instead of aborting.
pub fn try_filled<T: Clone>(len: usize, value: T, what: &str) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| DalError::MemoryAllocation(format!("{what} ({len} elements): {e}")))?;
    buffer.resize(len, value);
    Ok(buffer)
}
