use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("path is not inside any configured watch dir")]
    OutsideWatched,

    #[error("no projectid marker found at depth 0 or 1 between the file and its watch dir")]
    NoProjectMarker,

    #[error("projectid marker at {0} is not valid JSON with a uuid4 `id` field")]
    InvalidMarker(String),

    #[error("I/O error reading projectid marker: {0}")]
    Io(#[from] std::io::Error),
}
