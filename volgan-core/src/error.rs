//! Error types for volgan

use thiserror::Error;

/// Main error type for volgan operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

/// Result type alias for volgan operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a shape mismatch error naming the operation and both shapes
    pub fn shape_mismatch(op: &str, expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        Error::ShapeMismatch(format!("{}: expected {:?}, got {:?}", op, expected, actual))
    }
}
