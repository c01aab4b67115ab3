//! File Watcher, Indexing Worker, and Vectorization Worker: the three
//! background processes that turn files on disk into searchable, embedded
//! code chunks, talking to the driver exclusively through the RPC client.

pub mod circuit_breaker;
mod error;
pub mod indexing;
pub mod vectorize;
pub mod watcher;

pub use error::{Result, WorkerError};
