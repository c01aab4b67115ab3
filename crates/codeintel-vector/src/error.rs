use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorError>;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector has dimension {got}, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("corrupt vector index file: {0}")]
    Corrupt(String),
}
