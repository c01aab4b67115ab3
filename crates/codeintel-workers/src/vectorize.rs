//! Vectorization Worker (C9): embeds chunks that have no `vector_id` yet by
//! calling an external chunker/embedder over HTTP, behind the circuit
//! breaker (§4.9). The on-disk [`VectorIndex`] is a cache; the chunks table
//! stays the source of truth, so a crash between `add_vector` and the DB
//! write just means the vector gets recomputed on the next cycle.

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{Result, WorkerError};
use codeintel_client::{Client, RawValue};
use codeintel_config::{CircuitBreakerConfig, DEFAULT_DATASET};
use codeintel_vector::{index_path, VectorIndex};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Dimension of the vectors this worker stores. Fixed because the index's
/// on-disk format has no per-vector dimension tag — every vector in a given
/// `(project_id, dataset_id)` index must agree (Open Question, decided in
/// the accompanying design notes: 384, a common small sentence-embedding
/// width).
pub const EMBEDDING_DIM: usize = 384;

const EMBEDDING_MODEL: &str = "external-embedder-v1";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub vectorized: u32,
    pub failed: u32,
    pub outbound_calls: u32,
}

struct PendingChunk {
    id: Uuid,
    text: String,
    project_id: Uuid,
    dataset_id: String,
}

pub struct Embedder {
    http: reqwest::Client,
    endpoint: String,
}

impl Embedder {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder().timeout(timeout).build().unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            text: &'a str,
        }
        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            embedding: Vec<f32>,
        }

        let response = self
            .http
            .post(&self.endpoint)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| WorkerError::ExternalUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WorkerError::ExternalUnavailable(format!("embedder returned {}", response.status())));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| WorkerError::ExternalUnavailable(e.to_string()))?;
        Ok(parsed.embedding)
    }
}

pub struct VectorizeWorker {
    client: Client,
    embedder: Embedder,
    breaker: CircuitBreaker,
    faiss_dir: PathBuf,
    indices: HashMap<(Uuid, String), VectorIndex>,
}

impl VectorizeWorker {
    #[must_use]
    pub fn new(client: Client, embedder: Embedder, breaker_config: CircuitBreakerConfig, faiss_dir: PathBuf) -> Self {
        Self {
            client,
            embedder,
            breaker: CircuitBreaker::new(breaker_config),
            faiss_dir,
            indices: HashMap::new(),
        }
    }

    fn index_for(&mut self, project_id: Uuid, dataset_id: &str) -> &mut VectorIndex {
        self.indices
            .entry((project_id, dataset_id.to_string()))
            .or_insert_with(|| {
                let path = index_path(&self.faiss_dir, project_id, dataset_id);
                VectorIndex::load(&path).unwrap_or_else(|_| VectorIndex::new(EMBEDDING_DIM))
            })
    }

    /// One poll-embed-write cycle. Under an open circuit this makes zero
    /// outbound HTTP calls (invariant 7) and returns immediately.
    pub async fn run_cycle(&mut self, batch_size: usize) -> Result<CycleStats> {
        let mut stats = CycleStats::default();
        if !self.breaker.allow_request() {
            return Ok(stats);
        }

        let pending = self.fetch_pending(batch_size).await?;
        let mut touched: Vec<(Uuid, String)> = Vec::new();

        for chunk in pending {
            if self.breaker.state() == crate::circuit_breaker::State::Open {
                break;
            }
            match self.embedder.embed(&chunk.text).await {
                Ok(vector) => {
                    self.breaker.on_success();
                    stats.outbound_calls += 1;
                    let key = (chunk.project_id, chunk.dataset_id.clone());
                    let vector_id = {
                        let index = self.index_for(chunk.project_id, &chunk.dataset_id);
                        index.add_vector(vector.clone()).map_err(|e| WorkerError::Other(e.to_string()))?
                    };
                    self.write_vector(chunk.id, &vector, vector_id).await?;
                    if !touched.contains(&key) {
                        touched.push(key);
                    }
                    stats.vectorized += 1;
                }
                Err(_) => {
                    self.breaker.on_failure();
                    stats.outbound_calls += 1;
                    stats.failed += 1;
                }
            }
        }

        for (project_id, dataset_id) in touched {
            if let Some(index) = self.indices.get(&(project_id, dataset_id.clone())) {
                let path = index_path(&self.faiss_dir, project_id, &dataset_id);
                let _ = index.save(&path);
            }
        }

        Ok(stats)
    }

    async fn fetch_pending(&self, batch_size: usize) -> Result<Vec<PendingChunk>> {
        let rows = self
            .client
            .select(
                "SELECT cc.id AS id, cc.text AS text, cc.dataset_id AS dataset_id, f.project_id AS project_id
                 FROM code_chunks cc JOIN files f ON f.id = cc.file_id
                 WHERE cc.vector_id IS NULL
                 LIMIT ?1",
                vec![RawValue::Integer(batch_size as i64)],
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row["id"].as_str().and_then(|s| Uuid::parse_str(s).ok())?;
                let project_id = row["project_id"].as_str().and_then(|s| Uuid::parse_str(s).ok())?;
                let text = row["text"].as_str()?.to_string();
                let dataset_id = row["dataset_id"].as_str().unwrap_or(DEFAULT_DATASET).to_string();
                Some(PendingChunk { id, text, project_id, dataset_id })
            })
            .collect())
    }

    async fn write_vector(&self, chunk_id: Uuid, vector: &[f32], vector_id: i64) -> Result<()> {
        let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
        self.client
            .execute(
                "UPDATE code_chunks SET embedding = ?2, embedding_model = ?3, vector_id = ?4 WHERE id = ?1",
                vec![
                    RawValue::Text(chunk_id.to_string()),
                    RawValue::Blob(bytes),
                    RawValue::Text(EMBEDDING_MODEL.to_string()),
                    RawValue::Integer(vector_id),
                ],
                None,
            )
            .await?;
        Ok(())
    }
}

/// Entry point for the `codeintel-server` `vectorization-worker` binary.
pub async fn run(mut worker: VectorizeWorker, poll_interval: Duration, batch_size: usize) -> ! {
    loop {
        let effective_interval = worker.breaker.effective_poll_interval(poll_interval);
        match worker.run_cycle(batch_size).await {
            Ok(stats) => {
                log::info!(
                    "vectorization cycle: vectorized={} failed={} calls={}",
                    stats.vectorized,
                    stats.failed,
                    stats.outbound_calls
                );
            }
            Err(e) => log::error!("vectorization cycle failed: {e}"),
        }
        tokio::time::sleep(effective_interval).await;
    }
}
