use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Spec §7's propagation policy for this side of the boundary: "workers
/// swallow and classify" — every worker loop catches this at the top of
/// each cycle, logs it, and backs off rather than letting it end the loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("driver client error: {0}")]
    Client(#[from] codeintel_client::ClientError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunker/embedder unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("{0}")]
    Other(String),
}
