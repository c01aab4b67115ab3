pub mod error;
pub mod index;

pub use error::{Result, VectorError};
pub use index::{index_path, VectorIndex};
