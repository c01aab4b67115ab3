//! Indexing Worker (C8): turns `needs_chunking=1` file rows into parsed
//! entities/chunks by calling the driver's `IndexFile` op. Pure RPC client —
//! it never touches SQLite directly, unlike the File Watcher's batched
//! writes, because `index_file` is the one multi-table write the driver
//! keeps atomic server-side.

use crate::error::Result;
use codeintel_client::{Client, RawValue};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub indexed: u32,
    pub failed: u32,
}

struct PendingFile {
    project_id: Uuid,
    abs_path: String,
}

/// One poll-batch-index cycle. `inline_chunking` mirrors the driver's
/// `IndexFilePolicy` — whether the locally computed chunk rows survive or
/// get discarded pending the Vectorization Worker's own chunking pass.
pub async fn run_cycle(client: &Client, batch_size: usize, inline_chunking: bool) -> Result<CycleStats> {
    let rows = client
        .select(
            "SELECT project_id, path FROM files
             WHERE deleted = 0 AND needs_chunking = 1
             ORDER BY project_id, updated_at ASC",
            vec![],
        )
        .await?;

    let mut by_project: std::collections::HashMap<Uuid, Vec<PendingFile>> = std::collections::HashMap::new();
    for row in rows {
        let Some(project_id) = row["project_id"].as_str().and_then(|s| Uuid::parse_str(s).ok()) else {
            continue;
        };
        let Some(abs_path) = row["path"].as_str() else {
            continue;
        };
        by_project.entry(project_id).or_default().push(PendingFile {
            project_id,
            abs_path: abs_path.to_string(),
        });
    }

    let mut stats = CycleStats::default();
    for files in by_project.into_values() {
        for file in files.into_iter().take(batch_size) {
            match client.index_file(file.abs_path.clone(), file.project_id, inline_chunking).await {
                Ok(_) => stats.indexed += 1,
                Err(e) => {
                    log::warn!("indexing failed for {}: {e}", file.abs_path);
                    stats.failed += 1;
                }
            }
        }
    }

    Ok(stats)
}

async fn pending_count(client: &Client) -> Result<i64> {
    let rows = client
        .select(
            "SELECT COUNT(*) AS n FROM files WHERE deleted = 0 AND needs_chunking = 1",
            vec![],
        )
        .await?;
    Ok(rows.first().and_then(|r| r["n"].as_i64()).unwrap_or(0))
}

/// Entry point for the `codeintel-server` `indexing-worker` binary. A crash
/// inside a cycle is allowed to unwind past this function — the Worker
/// Manager (C10) owns restarting this process, not a self-healing loop in
/// here.
pub async fn run(client: Client, poll_interval: Duration, batch_size: usize, inline_chunking: bool) -> ! {
    let mut backoff = Duration::from_secs(1);
    const MAX_BACKOFF: Duration = Duration::from_secs(60);

    loop {
        match pending_count(&client).await {
            Ok(0) => {
                backoff = Duration::from_secs(1);
                tokio::time::sleep(poll_interval).await;
            }
            Ok(_) => match run_cycle(&client, batch_size, inline_chunking).await {
                Ok(stats) => {
                    log::info!("indexing cycle: indexed={} failed={}", stats.indexed, stats.failed);
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    log::error!("indexing cycle failed: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            },
            Err(e) => {
                log::error!("indexing worker could not reach driver: {e}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeintel_client::ReconnectConfig;
    use std::path::Path;
    use uuid::Uuid;

    async fn test_client(dir: &Path) -> Client {
        let db_path = dir.join("catalog.db");
        let socket_path = codeintel_driver::socket_path_for_db(&db_path);
        let spawned = db_path.clone();
        tokio::spawn(async move {
            let _ = codeintel_driver::run_driver(&spawned, None).await;
        });
        Client::connect(
            socket_path,
            ReconnectConfig { initial_delay: Duration::from_millis(10), max_delay: Duration::from_millis(200), max_attempts: 50 },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn empty_queue_indexes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let client = test_client(tmp.path()).await;
        let stats = run_cycle(&client, 5, false).await.unwrap();
        assert_eq!(stats, CycleStats::default());
    }

    #[tokio::test]
    async fn pending_file_gets_indexed_and_clears_the_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let client = test_client(tmp.path()).await;

        let watch_dir_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let project_root = tmp.path().join("proj");
        std::fs::create_dir_all(&project_root).unwrap();
        let file_path = project_root.join("m.py");
        std::fs::write(&file_path, "def f():\n    pass\n").unwrap();

        client
            .execute(
                "INSERT INTO watch_dirs (id, absolute_path) VALUES (?1, ?2)",
                vec![RawValue::Text(watch_dir_id.to_string()), RawValue::Text(project_root.to_string_lossy().into_owned())],
                None,
            )
            .await
            .unwrap();
        client
            .execute(
                "INSERT INTO projects (id, root_path, watch_dir_id) VALUES (?1, ?2, ?3)",
                vec![
                    RawValue::Text(project_id.to_string()),
                    RawValue::Text(project_root.to_string_lossy().into_owned()),
                    RawValue::Text(watch_dir_id.to_string()),
                ],
                None,
            )
            .await
            .unwrap();
        client
            .execute(
                "INSERT INTO files (id, project_id, watch_dir_id, relative_path, path, last_modified, needs_chunking, updated_at)
                 VALUES (?1, ?2, ?3, 'm.py', ?4, 0, 1, 0)",
                vec![
                    RawValue::Text(Uuid::new_v4().to_string()),
                    RawValue::Text(project_id.to_string()),
                    RawValue::Text(watch_dir_id.to_string()),
                    RawValue::Text(file_path.to_string_lossy().into_owned()),
                ],
                None,
            )
            .await
            .unwrap();

        let stats = run_cycle(&client, 5, false).await.unwrap();
        assert_eq!(stats, CycleStats { indexed: 1, failed: 0 });

        let remaining = pending_count(&client).await.unwrap();
        assert_eq!(remaining, 0);
    }
}
