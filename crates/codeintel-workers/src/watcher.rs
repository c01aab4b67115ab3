//! File Watcher (C7): periodic scan -> delta -> queue. Never talks to the
//! database directly — every read and write crosses the raw-row client API
//! (C5) so `last_modified` comparisons stay exact Unix-float comparisons,
//! the fix for the Julian/Unix scale bug spec §9 calls out.

use crate::error::Result;
use codeintel_client::{Client, RawValue};
use codeintel_chunker::Language;
use codeintel_config::WatchDirSpec;
use codeintel_resolver::{resolve, ResolverError, WatchDirInput};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const MTIME_EPSILON_SECS: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub new: u32,
    pub changed: u32,
    pub deleted: u32,
}

impl ScanOutcome {
    fn wrote_anything(self) -> bool {
        self.new > 0 || self.changed > 0 || self.deleted > 0
    }
}

struct DiskFile {
    abs_path: PathBuf,
    mtime: f64,
}

/// One full pass over every configured watch dir. Returns one outcome per
/// project actually touched, in the order discovered, so callers (tests,
/// the scheduling loop) can both log per-project and decide the next sleep.
pub async fn scan_once(
    client: &Client,
    watch_dirs: &[WatchDirSpec],
    locks_dir: &Path,
) -> Result<Vec<(Uuid, ScanOutcome)>> {
    let mut outcomes = Vec::new();

    for wd in watch_dirs {
        let canonical_root = std::fs::canonicalize(&wd.path)?;
        upsert_watch_dir(client, wd.id, &canonical_root).await?;

        let mut by_project: HashMap<Uuid, (PathBuf, Option<String>, Uuid, HashMap<String, DiskFile>)> = HashMap::new();

        for entry in ignore::WalkBuilder::new(&canonical_root).hidden(false).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let abs_path = match std::fs::canonicalize(entry.path()) {
                Ok(p) => p,
                Err(_) => continue, // FsErr: disappeared between scan and stat — skip silently
            };
            if Language::from_path(&abs_path) == Language::Unknown {
                continue;
            }

            let resolved = match resolve(&abs_path, &[WatchDirInput { id: wd.id, path: canonical_root.clone() }]) {
                Ok(r) => r,
                Err(ResolverError::NoProjectMarker | ResolverError::InvalidMarker(_)) => continue,
                Err(ResolverError::OutsideWatched) => continue,
                Err(ResolverError::Io(_)) => continue,
            };

            let mtime = match std::fs::metadata(&abs_path).and_then(|m| m.modified()) {
                Ok(t) => unix_seconds(t),
                Err(_) => continue,
            };

            let project_entry = by_project.entry(resolved.project_id).or_insert_with(|| {
                (resolved.project_root.clone(), resolved.project_name.clone(), resolved.watch_dir_id, HashMap::new())
            });
            project_entry.3.insert(resolved.relative_path, DiskFile { abs_path, mtime });
        }

        for (project_id, (project_root, project_name, watch_dir_id, disk_files)) in by_project {
            upsert_project(client, project_id, project_name.as_deref(), &project_root, watch_dir_id).await?;

            let Some(_lock) = AdvisoryLock::acquire(locks_dir, project_id, watch_dir_id) else {
                log::warn!("skipping scan write for project {project_id}: advisory lock held");
                continue;
            };

            let outcome = reconcile_project(client, project_id, &disk_files).await?;
            log::info!(
                "[SCAN END] per_project: {project_id} new={} changed={} deleted={}",
                outcome.new,
                outcome.changed,
                outcome.deleted
            );
            outcomes.push((project_id, outcome));
        }
    }

    Ok(outcomes)
}

async fn reconcile_project(
    client: &Client,
    project_id: Uuid,
    disk_files: &HashMap<String, DiskFile>,
) -> Result<ScanOutcome> {
    let existing_rows = client
        .select(
            "SELECT id, relative_path, last_modified, deleted FROM files WHERE project_id = ?1",
            vec![RawValue::Text(project_id.to_string())],
        )
        .await?;

    let mut existing: HashMap<String, (Uuid, f64, bool)> = HashMap::new();
    for row in &existing_rows {
        let relative_path = row["relative_path"].as_str().unwrap_or_default().to_string();
        let id = row["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()).unwrap_or_default();
        let last_modified = row["last_modified"].as_f64().unwrap_or_default();
        let deleted = row["deleted"].as_i64().unwrap_or(0) != 0;
        existing.insert(relative_path, (id, last_modified, deleted));
    }

    let now = unix_seconds(SystemTime::now());
    let tx_id = client.begin().await?;
    let mut outcome = ScanOutcome::default();

    for (relative_path, disk) in disk_files {
        match existing.get(relative_path) {
            None => {
                let file_id = Uuid::new_v4();
                client
                    .execute(
                        "INSERT INTO files (id, project_id, watch_dir_id, relative_path, path,
                                             last_modified, deleted, needs_chunking, updated_at)
                         SELECT ?1, ?2, watch_dir_id, ?3, ?4, ?5, 0, 1, ?5 FROM projects WHERE id = ?2",
                        vec![
                            RawValue::Text(file_id.to_string()),
                            RawValue::Text(project_id.to_string()),
                            RawValue::Text(relative_path.clone()),
                            RawValue::Text(disk.abs_path.to_string_lossy().into_owned()),
                            RawValue::Real(disk.mtime),
                        ],
                        Some(tx_id),
                    )
                    .await?;
                outcome.new += 1;
            }
            Some((id, db_mtime, deleted)) => {
                let changed = *deleted || (disk.mtime - db_mtime).abs() > MTIME_EPSILON_SECS;
                if changed {
                    client
                        .execute(
                            "UPDATE files SET last_modified = ?2, deleted = 0, needs_chunking = 1, updated_at = ?3 WHERE id = ?1",
                            vec![RawValue::Text(id.to_string()), RawValue::Real(disk.mtime), RawValue::Real(now)],
                            Some(tx_id),
                        )
                        .await?;
                    outcome.changed += 1;
                }
            }
        }
    }

    for (relative_path, (id, _mtime, deleted)) in &existing {
        if *deleted || disk_files.contains_key(relative_path) {
            continue;
        }
        client
            .execute(
                "UPDATE files SET deleted = 1, updated_at = ?2 WHERE id = ?1",
                vec![RawValue::Text(id.to_string()), RawValue::Real(now)],
                Some(tx_id),
            )
            .await?;
        outcome.deleted += 1;
    }

    if outcome.wrote_anything() {
        client.commit(tx_id).await?;
    } else {
        client.rollback(tx_id).await?;
    }
    Ok(outcome)
}

async fn upsert_watch_dir(client: &Client, id: Uuid, absolute_path: &Path) -> Result<()> {
    client
        .execute(
            "INSERT INTO watch_dirs (id, name, absolute_path) VALUES (?1, NULL, ?2)
             ON CONFLICT(id) DO UPDATE SET absolute_path = excluded.absolute_path",
            vec![RawValue::Text(id.to_string()), RawValue::Text(absolute_path.to_string_lossy().into_owned())],
            None,
        )
        .await?;
    Ok(())
}

async fn upsert_project(client: &Client, id: Uuid, name: Option<&str>, root_path: &Path, watch_dir_id: Uuid) -> Result<()> {
    client
        .execute(
            "INSERT INTO projects (id, name, root_path, watch_dir_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET root_path = excluded.root_path, watch_dir_id = excluded.watch_dir_id",
            vec![
                RawValue::Text(id.to_string()),
                name.map_or(RawValue::Null, |n| RawValue::Text(n.to_string())),
                RawValue::Text(root_path.to_string_lossy().into_owned()),
                RawValue::Text(watch_dir_id.to_string()),
            ],
            None,
        )
        .await?;
    Ok(())
}

fn unix_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

/// Per-`(project_id, watch_dir_id)` advisory lock file outside any watched
/// tree (spec §4.7's cross-directory write serialisation, §5's "lock files
/// live outside watched trees to avoid self-triggering scans"). Best-effort:
/// an exclusive-create file, not a kernel `flock`, matching the level of
/// serialisation a single-scanner-at-a-time deployment actually needs.
struct AdvisoryLock {
    path: PathBuf,
}

impl AdvisoryLock {
    fn acquire(locks_dir: &Path, project_id: Uuid, watch_dir_id: Uuid) -> Option<Self> {
        let dir = locks_dir.join(project_id.to_string());
        std::fs::create_dir_all(&dir).ok()?;
        let path = dir.join(format!("{watch_dir_id}.lock"));
        std::fs::OpenOptions::new().write(true).create_new(true).open(&path).ok()?;
        Some(Self { path })
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Cycle-scheduling wrapper around [`scan_once`]: a cycle that wrote
/// anything sleeps briefly so backed-up changes drain quickly; an empty
/// cycle sleeps the full `scan_interval`.
pub async fn run(client: Client, watch_dirs: Vec<WatchDirSpec>, locks_dir: PathBuf, scan_interval: Duration) -> ! {
    const WORK_PENDING_SLEEP: Duration = Duration::from_secs(2);
    loop {
        let wrote = match scan_once(&client, &watch_dirs, &locks_dir).await {
            Ok(outcomes) => outcomes.iter().any(|(_, o)| o.wrote_anything()),
            Err(e) => {
                log::error!("file watcher cycle failed: {e}");
                false
            }
        };
        tokio::time::sleep(if wrote { WORK_PENDING_SLEEP } else { scan_interval }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeintel_client::ReconnectConfig;
    use std::fs;

    async fn test_client(dir: &Path) -> (Client, PathBuf) {
        let db_path = dir.join("catalog.db");
        let socket_path = codeintel_driver::socket_path_for_db(&db_path);
        let spawned_db_path = db_path.clone();
        tokio::spawn(async move {
            let _ = codeintel_driver::run_driver(&spawned_db_path, None).await;
        });
        let client = Client::connect(
            socket_path,
            ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(200),
                max_attempts: 50,
            },
        )
        .await
        .unwrap();
        (client, db_path)
    }

    fn write_marker(dir: &Path, id: Uuid) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("projectid"), format!(r#"{{"id":"{id}"}}"#)).unwrap();
    }

    #[tokio::test]
    async fn new_file_is_inserted_and_flagged_for_chunking() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, _db_path) = test_client(tmp.path()).await;

        let watch_root = tmp.path().join("w");
        let project_id = Uuid::new_v4();
        write_marker(&watch_root.join("projA"), project_id);
        fs::write(watch_root.join("projA").join("m.py"), "x = 1\n").unwrap();

        let watch_dir_id = Uuid::new_v4();
        let watch_dirs = vec![WatchDirSpec { id: watch_dir_id, path: watch_root }];
        let locks_dir = tmp.path().join("locks");

        let outcomes = scan_once(&client, &watch_dirs, &locks_dir).await.unwrap();
        assert_eq!(outcomes, vec![(project_id, ScanOutcome { new: 1, changed: 0, deleted: 0 })]);

        let rows = client
            .select(
                "SELECT relative_path, needs_chunking, deleted FROM files WHERE project_id = ?1",
                vec![RawValue::Text(project_id.to_string())],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["relative_path"].as_str(), Some("m.py"));
        assert_eq!(rows[0]["needs_chunking"].as_i64(), Some(1));
    }

    #[tokio::test]
    async fn rescanning_untouched_files_reports_zero_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, _db_path) = test_client(tmp.path()).await;

        let watch_root = tmp.path().join("w");
        let project_id = Uuid::new_v4();
        write_marker(&watch_root.join("projA"), project_id);
        fs::write(watch_root.join("projA").join("m.py"), "x = 1\n").unwrap();

        let watch_dir_id = Uuid::new_v4();
        let watch_dirs = vec![WatchDirSpec { id: watch_dir_id, path: watch_root }];
        let locks_dir = tmp.path().join("locks");

        scan_once(&client, &watch_dirs, &locks_dir).await.unwrap();
        let outcomes = scan_once(&client, &watch_dirs, &locks_dir).await.unwrap();
        assert_eq!(outcomes, vec![(project_id, ScanOutcome::default())]);
    }
}
