//! Catalogue/schema (C1), the single-writer embedded SQL store (C2), and
//! the append-only query journal (C3). Owned exclusively by the Driver
//! Server — no other process ever opens the database file directly.

pub mod engine;
pub mod error;
pub mod journal;
pub mod model;
pub mod schema;

pub use engine::{NewChunk, NewEntity, ParsedFileData, SqlEngine};
pub use error::{Result, StoreError};
pub use journal::{JournalConfig, JournalEntry, QueryJournal};
pub use model::{Chunk, ChunkSourceType, Entity, EntityKind, FileRow, Project, WatchDir, WorkerStat};
