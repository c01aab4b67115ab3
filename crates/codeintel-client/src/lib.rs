//! Driver Client Library (C5): a `UnixStream` connection that reconnects
//! with bounded backoff and multiplexes many in-flight requests over one
//! socket, generalizing `daemon::ensure_daemon`'s fixed `50ms * 20` retry
//! loop and its single blocking ping RPC into a full request-id-keyed
//! client for the typed op table.

mod error;
mod wire;

pub use error::{ClientError, Result};
pub use codeintel_protocol::{
    AstEdit, AstNode, AstQueryArgs, ExecuteArgs, IndexFileArgs, ModifyArgs, Op, RawRow, RawValue,
};

use codeintel_protocol::{
    BeginResult, ErrorKind, ExecuteResult, IndexFileResult, ModifyResult, NodeListResult, Request,
    Response, RpcError, SelectArgs, SelectResult, SyncSchemaResult, TxArgs,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use uuid::Uuid;

/// Bounded exponential backoff with a configurable cap and attempt limit.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            max_attempts: 20,
        }
    }
}

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Response>>>>;

struct Shared {
    socket_path: PathBuf,
    reconnect: ReconnectConfig,
    next_id: AtomicU64,
    pending: PendingMap,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
}

#[derive(Clone)]
pub struct Client(Arc<Shared>);

/// Removes a request's pending waiter on drop unless `disarm()` was called,
/// so a cancelled `call()` (its future dropped before the response arrives)
/// never leaves a dangling entry for a response the reader task will still
/// try to route — the stream itself is untouched either way, only the
/// bookkeeping on this side is cleaned up.
struct PendingGuard {
    id: u64,
    pending: PendingMap,
    disarmed: bool,
}

impl PendingGuard {
    fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.disarmed {
            self.pending.lock().unwrap().remove(&self.id);
        }
    }
}

impl Client {
    pub async fn connect(socket_path: impl Into<PathBuf>, reconnect: ReconnectConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            socket_path: socket_path.into(),
            reconnect,
            next_id: AtomicU64::new(1),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            writer: AsyncMutex::new(None),
        });
        let client = Self(shared);
        client.ensure_connected().await?;
        Ok(client)
    }

    async fn ensure_connected(&self) -> Result<()> {
        let mut guard = self.0.writer.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let stream = self.dial().await?;
        let (read_half, write_half) = stream.into_split();
        *guard = Some(write_half);
        tokio::spawn(reader_loop(read_half, Arc::clone(&self.0.pending), Arc::clone(&self.0)));
        Ok(())
    }

    async fn dial(&self) -> Result<UnixStream> {
        let mut delay = self.0.reconnect.initial_delay;
        let mut attempt = 0u32;
        loop {
            match UnixStream::connect(&self.0.socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.0.reconnect.max_attempts {
                        return Err(anyhow::Error::new(e)
                            .context(format!(
                                "connecting to driver at {} after {attempt} attempts",
                                self.0.socket_path.display()
                            ))
                            .into());
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.0.reconnect.max_delay);
                }
            }
        }
    }

    /// Sends one op and awaits its matched response. Reconnects first if the
    /// connection was previously lost.
    pub async fn call(&self, op: Op) -> Result<serde_json::Value> {
        self.ensure_connected().await?;
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.0.pending.lock().unwrap().insert(id, tx);
        let mut guard = PendingGuard {
            id,
            pending: Arc::clone(&self.0.pending),
            disarmed: false,
        };

        let request = Request { id, op };
        {
            let mut writer_slot = self.0.writer.lock().await;
            let writer = match writer_slot.as_mut() {
                Some(w) => w,
                None => {
                    return Err(anyhow::anyhow!("driver connection is not established").into());
                }
            };
            if let Err(e) = wire::write_request(writer, &request).await {
                *writer_slot = None;
                return Err(e.context("writing request to driver").into());
            }
        }

        let response = rx
            .await
            .map_err(|_| anyhow::anyhow!("driver connection closed while awaiting response"))?;
        guard.disarm();

        if response.ok {
            Ok(response.value.unwrap_or(serde_json::Value::Null))
        } else {
            let err = response
                .error
                .unwrap_or_else(|| RpcError::new(ErrorKind::ExternalUnavailable, "driver returned no error detail"));
            Err(err.into())
        }
    }

    async fn call_typed<T: serde::de::DeserializeOwned>(&self, op: Op) -> Result<T> {
        let value = self.call(op).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn execute(&self, sql: impl Into<String>, params: Vec<RawValue>, tx: Option<u64>) -> Result<ExecuteResult> {
        self.call_typed(Op::Execute(ExecuteArgs { sql: sql.into(), params, tx })).await
    }

    /// `last_modified` and other REAL columns stay `RawValue::Real(f64)`
    /// across this call — no coercion to an integer mtime happens here or
    /// anywhere downstream of the driver's own column typing.
    pub async fn select(&self, sql: impl Into<String>, params: Vec<RawValue>) -> Result<Vec<RawRow>> {
        let result: SelectResult = self.call_typed(Op::Select(SelectArgs { sql: sql.into(), params })).await?;
        Ok(result.rows)
    }

    pub async fn begin(&self) -> Result<u64> {
        let result: BeginResult = self.call_typed(Op::Begin).await?;
        Ok(result.tx_id)
    }

    pub async fn commit(&self, tx_id: u64) -> Result<()> {
        self.call(Op::Commit(TxArgs { tx_id })).await?;
        Ok(())
    }

    pub async fn rollback(&self, tx_id: u64) -> Result<()> {
        self.call(Op::Rollback(TxArgs { tx_id })).await?;
        Ok(())
    }

    pub async fn index_file(&self, abs_path: impl Into<String>, project_id: Uuid, inline_chunking: bool) -> Result<IndexFileResult> {
        self.call_typed(Op::IndexFile(IndexFileArgs { abs_path: abs_path.into(), project_id, inline_chunking })).await
    }

    pub async fn query_ast(&self, project_id: Uuid, xpath_filter: impl Into<String>) -> Result<Vec<AstNode>> {
        let result: NodeListResult = self.call_typed(Op::QueryAst(AstQueryArgs { project_id, xpath_filter: xpath_filter.into() })).await?;
        Ok(result.nodes)
    }

    pub async fn query_cst(&self, project_id: Uuid, xpath_filter: impl Into<String>) -> Result<Vec<AstNode>> {
        let result: NodeListResult = self.call_typed(Op::QueryCst(AstQueryArgs { project_id, xpath_filter: xpath_filter.into() })).await?;
        Ok(result.nodes)
    }

    pub async fn modify_ast(&self, xpath_filter: impl Into<String>, edits: Vec<AstEdit>) -> Result<Vec<Uuid>> {
        let result: ModifyResult = self.call_typed(Op::ModifyAst(ModifyArgs { xpath_filter: xpath_filter.into(), edits })).await?;
        Ok(result.affected_ids)
    }

    pub async fn modify_cst(&self, xpath_filter: impl Into<String>, edits: Vec<AstEdit>) -> Result<Vec<Uuid>> {
        let result: ModifyResult = self.call_typed(Op::ModifyCst(ModifyArgs { xpath_filter: xpath_filter.into(), edits })).await?;
        Ok(result.affected_ids)
    }

    pub async fn sync_schema(&self) -> Result<SyncSchemaResult> {
        self.call_typed(Op::SyncSchema).await
    }
}

async fn reader_loop(mut reader: OwnedReadHalf, pending: PendingMap, shared: Arc<Shared>) {
    loop {
        match wire::read_response(&mut reader).await {
            Ok(Some(response)) => {
                if let Some(tx) = pending.lock().unwrap().remove(&response.id) {
                    let _ = tx.send(response);
                }
                // An id with no waiter means the caller already cancelled
                // locally (`PendingGuard` removed it) — drop it silently.
            }
            Ok(None) | Err(_) => {
                let mut failed = HashMap::new();
                std::mem::swap(&mut failed, &mut *pending.lock().unwrap());
                for (id, tx) in failed {
                    let _ = tx.send(Response::err(
                        id,
                        RpcError::new(ErrorKind::ExternalUnavailable, "driver connection lost"),
                    ));
                }
                *shared.writer.lock().await = None;
                return;
            }
        }
    }
}
