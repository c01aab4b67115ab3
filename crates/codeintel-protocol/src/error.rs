use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Behavioural error kinds from spec §7, shared verbatim between the driver
/// and the client so a caller can match on `kind` without string parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    IoErr,
    SqlError,
    TxBusy,
    UnknownTx,
    MigrationErr,
    FsErr,
    ParseErr,
    ExternalUnavailable,
    CorruptDb,
    ConfigErr,
    NotFound,
    Conflict,
}

/// `{kind, message, details?}` as specified in spec §6's error shape.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RpcError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
