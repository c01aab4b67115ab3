use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChunkerError>;

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("{0} has no tree-sitter grammar wired in")]
    UnsupportedLanguage(String),

    #[error("tree-sitter failed to parse the file (language grammar mismatch or invalid source)")]
    ParseFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChunkerError {
    #[must_use]
    pub fn unsupported_language(name: &str) -> Self {
        Self::UnsupportedLanguage(name.to_string())
    }
}
