//! Embedded SQL Store (C2): exactly one writer connection per database
//! file, serialising every statement through a single executor.

use crate::error::{Result, StoreError};
use crate::journal::{JournalEntry, QueryJournal};
use codeintel_protocol::{RawRow, RawValue};
use rusqlite::{types::ValueRef, Connection, ToSql};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One open explicit transaction. While this is `Some`, every
/// `execute`/`select` call that doesn't carry this `id` is rejected with
/// `TxBusy` — a single-open-transaction rule enforced without ever
/// holding `conn` locked across a suspension point.
///
/// Statements issued inside the transaction are buffered here rather than
/// journaled immediately: a rolled-back statement never happened as far as
/// the database's final state is concerned, so it must not replay as one.
struct OpenTx {
    id: u64,
    pending: Vec<JournalEntry>,
}

pub struct SqlEngine {
    conn: Mutex<Connection>,
    open_tx: Mutex<Option<OpenTx>>,
    next_tx_id: AtomicU64,
    journal: Option<Arc<QueryJournal>>,
}

/// Data the caller (the Driver Server, after invoking the chunker) has
/// already computed for one file. `index_file` writes all of it atomically.
#[derive(Debug, Clone)]
pub struct ParsedFileData {
    pub ast_content: Vec<u8>,
    pub ast_hash: String,
    pub cst_content: Vec<u8>,
    pub cst_hash: String,
    pub code_content: String,
    pub entities: Vec<NewEntity>,
    pub chunks: Vec<NewChunk>,
}

#[derive(Debug, Clone)]
pub struct NewEntity {
    pub kind: crate::model::EntityKind,
    pub name: String,
    pub qualname: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub docstring: Option<String>,
    /// Index into `ParsedFileData::entities` of this entity's parent, if any.
    pub parent_index: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub entity_index: Option<usize>,
    pub source_type: crate::model::ChunkSourceType,
    pub text: String,
}

impl SqlEngine {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        crate::schema::run_startup_integrity_and_migration(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            open_tx: Mutex::new(None),
            next_tx_id: AtomicU64::new(1),
            journal: None,
        })
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Arc<QueryJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        crate::schema::run_startup_integrity_and_migration(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            open_tx: Mutex::new(None),
            next_tx_id: AtomicU64::new(1),
            journal: None,
        })
    }

    fn check_tx_allowed(&self, tx: Option<u64>) -> Result<()> {
        let guard = self.open_tx.lock().unwrap();
        match (&*guard, tx) {
            (None, None) => Ok(()),
            (None, Some(requested)) => Err(StoreError::UnknownTx(requested)),
            (Some(open), Some(requested)) if open.id == requested => Ok(()),
            (Some(_), _) => Err(StoreError::TxBusy),
        }
    }

    pub fn begin(&self) -> Result<u64> {
        let mut guard = self.open_tx.lock().unwrap();
        if guard.is_some() {
            return Err(StoreError::TxBusy);
        }
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("BEGIN")?;
        let id = self.next_tx_id.fetch_add(1, Ordering::SeqCst);
        *guard = Some(OpenTx { id, pending: Vec::new() });
        Ok(id)
    }

    pub fn commit(&self, tx_id: u64) -> Result<()> {
        let mut guard = self.open_tx.lock().unwrap();
        match &*guard {
            Some(open) if open.id == tx_id => {
                let conn = self.conn.lock().unwrap();
                conn.execute_batch("COMMIT")?;
                let open = guard.take().unwrap();
                if let Some(journal) = &self.journal {
                    for entry in &open.pending {
                        journal.append(entry);
                    }
                }
                Ok(())
            }
            _ => Err(StoreError::UnknownTx(tx_id)),
        }
    }

    pub fn rollback(&self, tx_id: u64) -> Result<()> {
        let mut guard = self.open_tx.lock().unwrap();
        match &*guard {
            Some(open) if open.id == tx_id => {
                let conn = self.conn.lock().unwrap();
                conn.execute_batch("ROLLBACK")?;
                let open = guard.take().unwrap();
                if let Some(journal) = &self.journal {
                    for mut entry in open.pending {
                        entry.success = false;
                        journal.append(&entry);
                    }
                }
                Ok(())
            }
            _ => Err(StoreError::UnknownTx(tx_id)),
        }
    }

    pub fn execute(
        &self,
        sql: &str,
        params: &[RawValue],
        tx: Option<u64>,
    ) -> Result<(u64, Option<i64>)> {
        self.check_tx_allowed(tx)?;
        let conn = self.conn.lock().unwrap();
        let bound: Vec<&dyn ToSql> = params.iter().map(raw_to_sql).collect();
        let outcome = conn.execute(sql, bound.as_slice());

        match tx {
            Some(tx_id) => {
                let mut guard = self.open_tx.lock().unwrap();
                if let Some(open) = guard.as_mut() {
                    let mut entry = JournalEntry::new(sql, params.to_vec(), outcome.is_ok())
                        .with_transaction(tx_id);
                    if let Err(e) = &outcome {
                        entry = entry.with_error(e.to_string());
                    }
                    open.pending.push(entry);
                }
            }
            None => {
                if let Some(journal) = &self.journal {
                    let mut entry = JournalEntry::new(sql, params.to_vec(), outcome.is_ok());
                    if let Err(e) = &outcome {
                        entry = entry.with_error(e.to_string());
                    }
                    journal.append(&entry);
                }
            }
        }

        let affected = outcome?;
        let last_insert_id = if affected > 0 {
            Some(conn.last_insert_rowid())
        } else {
            None
        };
        Ok((affected as u64, last_insert_id))
    }

    // `select()` carries no `tx_id` in the wire protocol (spec §4.4), so
    // reads are always allowed through — including while a transaction is
    // open, since they run on the same connection and see its writes.
    pub fn select(&self, sql: &str, params: &[RawValue]) -> Result<Vec<RawRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let bound: Vec<&dyn ToSql> = params.iter().map(raw_to_sql).collect();
        let rows = stmt.query_map(bound.as_slice(), |row| {
            let mut raw = RawRow::new();
            for (idx, name) in column_names.iter().enumerate() {
                raw.insert(name.clone(), value_ref_to_raw(row.get_ref(idx)?));
            }
            Ok(raw)
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// High-level `index_file` (spec §4.2): resolves the file row, clears
    /// derived state, repopulates it, and clears `needs_chunking` — all in
    /// one transaction. On any failure the whole transaction rolls back, so
    /// `needs_chunking` and the rest of the row are left exactly as they
    /// were before the call (spec invariant 4).
    pub fn index_file(
        &self,
        project_id: Uuid,
        watch_dir_id: Uuid,
        relative_path: &str,
        abs_path: &str,
        last_modified: f64,
        parsed: &ParsedFileData,
    ) -> Result<(Uuid, bool)> {
        // `index_file` opens its own internal transaction below, so it must
        // be refused like any other write while a client transaction is open
        // (`begin()`'d but not yet committed/rolled back) — otherwise it
        // would nest a second `BEGIN` on the same connection and rusqlite
        // would reject it as a raw SQLite error instead of `TxBusy`.
        self.check_tx_allowed(None)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM files WHERE project_id = ?1 AND relative_path = ?2",
                rusqlite::params![project_id.to_string(), relative_path],
                |r| r.get(0),
            )
            .ok();

        let (file_id, created) = match existing {
            Some(id) => (Uuid::parse_str(&id).map_err(|e| StoreError::Other(e.to_string()))?, false),
            None => {
                let id = Uuid::new_v4();
                tx.execute(
                    "INSERT INTO files (id, project_id, watch_dir_id, relative_path, path,
                                         last_modified, deleted, needs_chunking, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 1, ?6)",
                    rusqlite::params![
                        id.to_string(),
                        project_id.to_string(),
                        watch_dir_id.to_string(),
                        relative_path,
                        abs_path,
                        last_modified
                    ],
                )?;
                (id, true)
            }
        };

        clear_file_data_tx(&tx, file_id)?;

        tx.execute(
            "INSERT INTO ast_trees (file_id, content, hash, file_mtime) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![file_id.to_string(), parsed.ast_content, parsed.ast_hash, last_modified],
        )?;
        tx.execute(
            "INSERT INTO cst_trees (file_id, content, hash, file_mtime) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![file_id.to_string(), parsed.cst_content, parsed.cst_hash, last_modified],
        )?;
        tx.execute(
            "INSERT INTO code_content (file_id, content) VALUES (?1, ?2)",
            rusqlite::params![file_id.to_string(), parsed.code_content],
        )?;
        tx.execute(
            "INSERT INTO code_content_fts (file_id, content) VALUES (?1, ?2)",
            rusqlite::params![file_id.to_string(), parsed.code_content],
        )?;

        let mut entity_ids: Vec<Uuid> = Vec::with_capacity(parsed.entities.len());
        for e in &parsed.entities {
            let id = Uuid::new_v4();
            entity_ids.push(id);
            let parent = e.parent_index.map(|i| entity_ids_or_pending(&entity_ids, i));
            tx.execute(
                "INSERT INTO entities (id, file_id, kind, name, qualname, start_line, end_line,
                                        docstring, parent_entity_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    id.to_string(),
                    file_id.to_string(),
                    e.kind.as_str(),
                    e.name,
                    e.qualname,
                    e.start_line,
                    e.end_line,
                    e.docstring,
                    parent.map(|p| p.to_string()),
                ],
            )?;
        }

        for c in &parsed.chunks {
            let id = Uuid::new_v4();
            let entity_ref = c.entity_index.and_then(|i| entity_ids.get(i)).copied();
            tx.execute(
                "INSERT INTO code_chunks (id, file_id, entity_ref, source_type, text, dataset_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'default')",
                rusqlite::params![
                    id.to_string(),
                    file_id.to_string(),
                    entity_ref.map(|e| e.to_string()),
                    c.source_type.as_str(),
                    c.text,
                ],
            )?;
        }

        tx.execute(
            "UPDATE files SET needs_chunking = 0, last_modified = ?2, updated_at = ?2 WHERE id = ?1",
            rusqlite::params![file_id.to_string(), last_modified],
        )?;

        tx.commit()?;
        Ok((file_id, created))
    }

    /// Removes all derived state for `file_id` (spec invariant 3).
    pub fn clear_file_data(&self, file_id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        clear_file_data_tx(&conn, file_id)
    }

    /// Re-runs the additive migration pass on demand (the `sync_schema` op).
    pub fn sync_schema(&self) -> Result<Vec<codeintel_protocol::SchemaDiff>> {
        let conn = self.conn.lock().unwrap();
        crate::schema::sync_schema(&conn)
    }
}

fn entity_ids_or_pending(ids: &[Uuid], index: usize) -> Uuid {
    // Entities are inserted in declaration order, so a parent must already
    // have been assigned an id by the time a child references it by index.
    ids[index]
}

fn clear_file_data_tx(conn: &rusqlite::Connection, file_id: Uuid) -> Result<()> {
    let fid = file_id.to_string();
    conn.execute("DELETE FROM ast_trees WHERE file_id = ?1", [&fid])?;
    conn.execute("DELETE FROM cst_trees WHERE file_id = ?1", [&fid])?;
    conn.execute("DELETE FROM entities WHERE file_id = ?1", [&fid])?;
    conn.execute("DELETE FROM code_content WHERE file_id = ?1", [&fid])?;
    conn.execute("DELETE FROM code_content_fts WHERE file_id = ?1", [&fid])?;
    conn.execute("DELETE FROM code_chunks WHERE file_id = ?1", [&fid])?;
    Ok(())
}

fn raw_to_sql(value: &RawValue) -> &dyn ToSql {
    match value {
        RawValue::Null => &rusqlite::types::Null,
        RawValue::Integer(v) => v,
        RawValue::Real(v) => v,
        RawValue::Text(v) => v,
        RawValue::Blob(v) => v,
    }
}

fn value_ref_to_raw(v: ValueRef<'_>) -> RawValue {
    match v {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(i) => RawValue::Integer(i),
        ValueRef::Real(f) => RawValue::Real(f),
        ValueRef::Text(t) => RawValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => RawValue::Blob(b.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkSourceType, EntityKind};
    use pretty_assertions::assert_eq;

    fn seed_project(engine: &SqlEngine) -> Uuid {
        let watch_dir_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        engine
            .execute(
                "INSERT INTO watch_dirs (id, name, absolute_path) VALUES (?1, 'w', '/w')",
                &[RawValue::Text(watch_dir_id.to_string())],
                None,
            )
            .unwrap();
        engine
            .execute(
                "INSERT INTO projects (id, name, root_path, watch_dir_id, description)
                 VALUES (?1, 'p', '/w/projA', ?2, NULL)",
                &[
                    RawValue::Text(project_id.to_string()),
                    RawValue::Text(watch_dir_id.to_string()),
                ],
                None,
            )
            .unwrap();
        project_id
    }

    #[test]
    fn index_file_clears_needs_chunking_and_populates_derived_state() {
        let engine = SqlEngine::open_in_memory().unwrap();
        let project_id = seed_project(&engine);
        let watch_dir_id = Uuid::new_v4();

        let parsed = ParsedFileData {
            ast_content: b"ast".to_vec(),
            ast_hash: "h1".into(),
            cst_content: b"cst".to_vec(),
            cst_hash: "h2".into(),
            code_content: "def f(): pass".into(),
            entities: vec![NewEntity {
                kind: EntityKind::Function,
                name: "f".into(),
                qualname: Some("m.f".into()),
                start_line: 1,
                end_line: 1,
                docstring: None,
                parent_index: None,
            }],
            chunks: vec![NewChunk {
                entity_index: Some(0),
                source_type: ChunkSourceType::Code,
                text: "def f(): pass".into(),
            }],
        };

        let (file_id, created) = engine
            .index_file(project_id, watch_dir_id, "m.py", "/w/projA/m.py", 1_000_000.0, &parsed)
            .unwrap();
        assert!(created);

        let rows = engine
            .select(
                "SELECT needs_chunking FROM files WHERE id = ?1",
                &[RawValue::Text(file_id.to_string())],
            )
            .unwrap();
        assert_eq!(rows[0]["needs_chunking"], RawValue::Integer(0));

        let entities = engine
            .select(
                "SELECT COUNT(*) as n FROM entities WHERE file_id = ?1",
                &[RawValue::Text(file_id.to_string())],
            )
            .unwrap();
        assert_eq!(entities[0]["n"], RawValue::Integer(1));
    }

    #[test]
    fn clear_file_data_removes_every_derived_row() {
        let engine = SqlEngine::open_in_memory().unwrap();
        let project_id = seed_project(&engine);
        let watch_dir_id = Uuid::new_v4();
        let parsed = ParsedFileData {
            ast_content: vec![1],
            ast_hash: "h".into(),
            cst_content: vec![2],
            cst_hash: "h".into(),
            code_content: "x".into(),
            entities: vec![],
            chunks: vec![NewChunk {
                entity_index: None,
                source_type: ChunkSourceType::FileDocstring,
                text: "doc".into(),
            }],
        };
        let (file_id, _) = engine
            .index_file(project_id, watch_dir_id, "a.py", "/w/projA/a.py", 1.0, &parsed)
            .unwrap();

        engine.clear_file_data(file_id).unwrap();

        for table in ["ast_trees", "cst_trees", "entities", "code_content", "code_chunks"] {
            let rows = engine
                .select(
                    &format!("SELECT COUNT(*) as n FROM {table} WHERE file_id = ?1"),
                    &[RawValue::Text(file_id.to_string())],
                )
                .unwrap();
            assert_eq!(rows[0]["n"], RawValue::Integer(0), "table {table} not cleared");
        }
    }

    #[test]
    fn nested_begin_returns_tx_busy() {
        let engine = SqlEngine::open_in_memory().unwrap();
        let tx1 = engine.begin().unwrap();
        let err = engine.begin().unwrap_err();
        assert!(matches!(err, StoreError::TxBusy));
        engine.commit(tx1).unwrap();
    }

    #[test]
    fn commit_unknown_tx_is_rejected() {
        let engine = SqlEngine::open_in_memory().unwrap();
        let err = engine.commit(999).unwrap_err();
        assert!(matches!(err, StoreError::UnknownTx(999)));
    }
}
