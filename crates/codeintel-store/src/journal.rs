//! Query Journal (C3): append-only JSONL record of every executed
//! mutation, rotated by size, replayable into an empty database.

use crate::error::Result;
use codeintel_protocol::RawValue;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts: String,
    pub sql: String,
    pub params: Vec<RawValue>,
    pub success: bool,
    pub transaction_id: Option<u64>,
    pub error: Option<String>,
}

impl JournalEntry {
    pub fn new(sql: impl Into<String>, params: Vec<RawValue>, success: bool) -> Self {
        Self {
            ts: now_iso8601_utc(),
            sql: sql.into(),
            params,
            success,
            transaction_id: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_transaction(mut self, tx_id: u64) -> Self {
        self.transaction_id = Some(tx_id);
        self
    }

    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}

fn now_iso8601_utc() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let datetime = chrono_like_format(secs);
    datetime
}

/// Minimal UTC calendar conversion, avoiding a `chrono` dependency this
/// crate otherwise has no use for.
fn chrono_like_format(unix_secs: u64) -> String {
    const SECS_PER_DAY: u64 = 86_400;
    let days = unix_secs / SECS_PER_DAY;
    let rem = unix_secs % SECS_PER_DAY;
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let mut z = days as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    z -= era * 146_097;
    let doe = z;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m_num = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m_num <= 2 { y + 1 } else { y };

    format!("{y:04}-{m_num:02}-{d:02}T{h:02}:{m:02}:{s:02}Z")
}

pub struct JournalConfig {
    pub max_bytes: u64,
    pub backup_count: u32,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            max_bytes: 104_857_600,
            backup_count: 5,
        }
    }
}

pub struct QueryJournal {
    path: PathBuf,
    config: JournalConfig,
    file: Mutex<File>,
}

impl QueryJournal {
    pub fn open(path: impl Into<PathBuf>, config: JournalConfig) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            config,
            file: Mutex::new(file),
        })
    }

    /// Appends one entry. Journal failures must never propagate to the
    /// caller (spec §7): any I/O error here is logged and swallowed.
    pub fn append(&self, entry: &JournalEntry) {
        if let Err(e) = self.try_append(entry) {
            log::error!("query journal append failed, continuing without it: {e}");
        }
    }

    fn try_append(&self, entry: &JournalEntry) -> Result<()> {
        self.maybe_rotate()?;
        let mut file = self.file.lock().unwrap();
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn maybe_rotate(&self) -> Result<()> {
        let len = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if len < self.config.max_bytes {
            return Ok(());
        }
        let mut guard = self.file.lock().unwrap();
        // Oldest backup first so the rename chain doesn't clobber a file
        // before it has been shifted.
        for i in (1..self.config.backup_count).rev() {
            let from = self.backup_path(i);
            let to = self.backup_path(i + 1);
            if from.exists() {
                std::fs::rename(&from, &to)?;
            }
        }
        if self.config.backup_count > 0 {
            std::fs::rename(&self.path, self.backup_path(1))?;
        } else {
            std::fs::remove_file(&self.path)?;
        }
        *guard = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut s = self.path.clone().into_os_string();
        s.push(format!(".{n}"));
        PathBuf::from(s)
    }

    /// Reads every rotated backup oldest-first, then the live file, and
    /// replays `success = true` entries into `apply` in order.
    pub fn replay(&self, mut apply: impl FnMut(&JournalEntry) -> Result<()>) -> Result<u64> {
        let mut applied = 0u64;
        let mut files: Vec<PathBuf> = Vec::new();
        for i in (1..=self.config.backup_count).rev() {
            let p = self.backup_path(i);
            if p.exists() {
                files.push(p);
            }
        }
        files.push(self.path.clone());

        for path in files {
            for line in read_lines(&path)? {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: JournalEntry = serde_json::from_str(&line)?;
                if entry.success {
                    apply(&entry)?;
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }
}

fn read_lines(path: &Path) -> Result<impl Iterator<Item = std::io::Result<String>>> {
    let file = File::open(path)?;
    Ok(BufReader::new(file).lines())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqlEngine;
    use pretty_assertions::assert_eq;

    #[test]
    fn replay_reconstructs_equivalent_state() {
        let dir = tempfile::tempdir().unwrap();
        let journal = QueryJournal::open(dir.path().join("journal.jsonl"), JournalConfig::default()).unwrap();

        journal.append(&JournalEntry::new(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)",
            vec![],
            true,
        ));
        journal.append(&JournalEntry::new(
            "INSERT INTO t (id, name) VALUES (?1, ?2)",
            vec![RawValue::Integer(1), RawValue::Text("alpha".into())],
            true,
        ));
        journal.append(&JournalEntry::new(
            "INSERT INTO t (id, name) VALUES (?1, ?2)",
            vec![RawValue::Integer(2), RawValue::Text("beta".into())],
            false,
        ));

        let target = SqlEngine::open_in_memory().unwrap();
        let applied = journal
            .replay(|entry| {
                target.execute(&entry.sql, &entry.params, None).map(|_| ())
            })
            .unwrap();

        assert_eq!(applied, 2);
        let rows = target.select("SELECT COUNT(*) as n FROM t", &[]).unwrap();
        assert_eq!(rows[0]["n"], RawValue::Integer(1));
    }

    #[test]
    fn rotates_when_max_bytes_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let journal = QueryJournal::open(
            dir.path().join("journal.jsonl"),
            JournalConfig { max_bytes: 200, backup_count: 2 },
        )
        .unwrap();

        for i in 0..50 {
            journal.append(&JournalEntry::new(
                "INSERT INTO t (id) VALUES (?1)",
                vec![RawValue::Integer(i)],
                true,
            ));
        }

        assert!(dir.path().join("journal.jsonl.1").exists());
    }

    #[test]
    fn append_failure_never_panics() {
        // Pointing the journal at a directory path makes every write fail;
        // append() must swallow the error rather than propagate it.
        let dir = tempfile::tempdir().unwrap();
        let bogus_dir = dir.path().join("journal.jsonl");
        std::fs::create_dir(&bogus_dir).unwrap();
        let journal = QueryJournal {
            path: bogus_dir,
            config: JournalConfig::default(),
            file: Mutex::new(tempfile::tempfile().unwrap()),
        };
        journal.append(&JournalEntry::new("SELECT 1", vec![], true));
    }
}
