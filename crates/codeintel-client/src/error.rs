use codeintel_protocol::RpcError;
use thiserror::Error;

/// Matches spec §7's propagation policy for this side of the RPC boundary:
/// "client rethrows" — a typed `RpcError` from the driver is returned as-is,
/// distinct from a connection-level failure that never reached the driver.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Connection(#[from] anyhow::Error),
    #[error("decoding response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
