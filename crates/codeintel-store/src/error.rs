use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Error kinds owned by the storage engine, matching spec §7's
/// `SqlError` / `TxBusy` / `UnknownTx` / `MigrationErr` / `CorruptDb`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("a transaction is already open on this connection")]
    TxBusy,

    #[error("unknown transaction id {0}")]
    UnknownTx(u64),

    #[error("schema migration aborted: {0}")]
    Migration(String),

    #[error("database failed integrity check and refuses to serve: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Other(String),
}
