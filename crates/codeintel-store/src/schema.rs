//! Declarative DDL (C1). `sync_schema` compares live DDL against this
//! declaration and emits/executes migration statements; the migration
//! policy is additive-first, with a rename-and-copy fallback (spec §4.1)
//! for the one column whose *type* must change across schema versions.

use crate::error::{Result, StoreError};
use codeintel_protocol::SchemaDiff;
use rusqlite::Connection;

/// Schema version 1 stored `files.last_modified` as an `INTEGER` (whole
/// seconds). Version 2 widens it to `REAL` so the sub-second mtime
/// comparison the File Watcher performs (`|disk - db| > 0.1s`) is exact
/// rather than truncated — the fix for the Julian/Unix scale bug noted in
/// spec §9.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

const DECLARED_TABLES: &[(&str, &str)] = &[
    (
        "watch_dirs",
        "CREATE TABLE IF NOT EXISTS watch_dirs (
            id TEXT PRIMARY KEY,
            name TEXT,
            absolute_path TEXT UNIQUE
        )",
    ),
    (
        "projects",
        "CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT,
            root_path TEXT NOT NULL UNIQUE,
            watch_dir_id TEXT NOT NULL REFERENCES watch_dirs(id),
            description TEXT
        )",
    ),
    (
        "files",
        "CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            watch_dir_id TEXT NOT NULL REFERENCES watch_dirs(id),
            relative_path TEXT NOT NULL,
            path TEXT NOT NULL,
            last_modified REAL NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            needs_chunking INTEGER NOT NULL DEFAULT 0,
            updated_at REAL NOT NULL DEFAULT 0,
            UNIQUE(project_id, relative_path)
        )",
    ),
    (
        "ast_trees",
        "CREATE TABLE IF NOT EXISTS ast_trees (
            file_id TEXT PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
            content BLOB NOT NULL,
            hash TEXT NOT NULL,
            file_mtime REAL NOT NULL
        )",
    ),
    (
        "cst_trees",
        "CREATE TABLE IF NOT EXISTS cst_trees (
            file_id TEXT PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
            content BLOB NOT NULL,
            hash TEXT NOT NULL,
            file_mtime REAL NOT NULL
        )",
    ),
    (
        "entities",
        "CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            qualname TEXT,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            docstring TEXT,
            parent_entity_id TEXT REFERENCES entities(id) ON DELETE CASCADE
        )",
    ),
    (
        "code_content",
        "CREATE TABLE IF NOT EXISTS code_content (
            file_id TEXT PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
            content TEXT NOT NULL
        )",
    ),
    (
        "code_content_fts",
        "CREATE VIRTUAL TABLE IF NOT EXISTS code_content_fts USING fts5(
            file_id UNINDEXED, content
        )",
    ),
    (
        "code_chunks",
        "CREATE TABLE IF NOT EXISTS code_chunks (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            entity_ref TEXT REFERENCES entities(id) ON DELETE SET NULL,
            source_type TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB,
            embedding_model TEXT,
            vector_id INTEGER,
            dataset_id TEXT NOT NULL DEFAULT 'default'
        )",
    ),
    (
        "worker_stats",
        "CREATE TABLE IF NOT EXISTS worker_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            worker TEXT NOT NULL,
            cycle_started_at REAL NOT NULL,
            cycle_ended_at REAL NOT NULL,
            processed INTEGER NOT NULL,
            errors INTEGER NOT NULL,
            detail TEXT
        )",
    ),
    (
        "indexing_errors",
        "CREATE TABLE IF NOT EXISTS indexing_errors (
            file_id TEXT PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
            message TEXT NOT NULL,
            occurred_at REAL NOT NULL
        )",
    ),
];

const DECLARED_INDICES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_files_needs_chunking ON files(deleted, needs_chunking)",
    "CREATE INDEX IF NOT EXISTS idx_files_project ON files(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_entities_file ON entities(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_file ON code_chunks(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_needs_vector ON code_chunks(vector_id)",
];

/// Runs once at driver startup, before any traffic is served (spec §4.1/§4.4).
pub fn run_startup_integrity_and_migration(conn: &Connection) -> Result<Vec<SchemaDiff>> {
    integrity_check(conn)?;
    recover_aborted_migration(conn)?;
    sync_schema(conn)
}

fn integrity_check(conn: &Connection) -> Result<()> {
    let outcome: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    if outcome != "ok" {
        return Err(StoreError::Corrupt(outcome));
    }
    Ok(())
}

/// Crash recovery (spec §4.1 / scenario S3): if `temp_files` exists and
/// `files` does not, a migration was interrupted after the rename but
/// before the copy completed. Rename back so the schema sync can retry
/// from a consistent `version = 1` state.
fn recover_aborted_migration(conn: &Connection) -> Result<()> {
    let temp_exists = table_exists(conn, "temp_files")?;
    let files_exists = table_exists(conn, "files")?;
    if temp_exists && !files_exists {
        log::warn!("recovering aborted schema migration: renaming temp_files back to files");
        conn.execute_batch("ALTER TABLE temp_files RENAME TO files")?;
    }
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table','view') AND name = ?1",
        [name],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Additive-first migration policy (spec §4.1). New tables/columns/indices
/// are created if missing; a declared schema-version bump beyond what the
/// database reports triggers the rename-and-copy path for the one known
/// breaking change (`files.last_modified` integer → real).
pub fn sync_schema(conn: &Connection) -> Result<Vec<SchemaDiff>> {
    let mut diff = Vec::new();
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    if version == 0 {
        create_all_declared(conn, &mut diff)?;
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
        return Ok(diff);
    }

    if version < 2 {
        migrate_files_last_modified_to_real(conn)?;
        diff.push(SchemaDiff {
            statement: "RENAME files -> temp_files; CREATE files (last_modified REAL); \
                        INSERT INTO files SELECT ... FROM temp_files; DROP TABLE temp_files"
                .into(),
        });
        conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    }

    // Additive pass: ensure every declared table/index exists even on an
    // up-to-date database (covers tables added in a later release).
    create_all_declared(conn, &mut diff)?;
    Ok(diff)
}

fn create_all_declared(conn: &Connection, diff: &mut Vec<SchemaDiff>) -> Result<()> {
    for (name, ddl) in DECLARED_TABLES {
        if !table_exists(conn, name)? {
            conn.execute_batch(ddl)?;
            diff.push(SchemaDiff {
                statement: format!("CREATE TABLE {name}"),
            });
        }
    }
    for ddl in DECLARED_INDICES {
        conn.execute_batch(ddl)?;
    }
    Ok(())
}

/// The one rename-and-copy migration this schema carries today: widening
/// `files.last_modified` from `INTEGER` to `REAL`, entirely inside one
/// transaction (spec §4.1).
fn migrate_files_last_modified_to_real(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "files")? {
        // Nothing to migrate yet (fresh db observed with a stale version
        // pragma); create_all_declared will lay down the current shape.
        return Ok(());
    }
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch("ALTER TABLE files RENAME TO temp_files")?;
    tx.execute_batch(
        "CREATE TABLE files (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            watch_dir_id TEXT NOT NULL REFERENCES watch_dirs(id),
            relative_path TEXT NOT NULL,
            path TEXT NOT NULL,
            last_modified REAL NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            needs_chunking INTEGER NOT NULL DEFAULT 0,
            updated_at REAL NOT NULL DEFAULT 0,
            UNIQUE(project_id, relative_path)
        )",
    )?;
    tx.execute_batch(
        "INSERT INTO files (id, project_id, watch_dir_id, relative_path, path,
                             last_modified, deleted, needs_chunking, updated_at)
         SELECT id, project_id, watch_dir_id, relative_path, path,
                CAST(last_modified AS REAL), deleted, needs_chunking,
                COALESCE(updated_at, 0)
         FROM temp_files",
    )?;
    tx.execute_batch("DROP TABLE temp_files")?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_database_creates_every_declared_table() {
        let conn = Connection::open_in_memory().unwrap();
        let diff = run_startup_integrity_and_migration(&conn).unwrap();
        assert!(!diff.is_empty());
        for (name, _) in DECLARED_TABLES {
            assert!(table_exists(&conn, name).unwrap(), "missing table {name}");
        }
        let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn recovers_from_migration_crashed_after_rename() {
        let conn = Connection::open_in_memory().unwrap();
        // Simulate a v1 database.
        conn.execute_batch(
            "CREATE TABLE files (
                id TEXT PRIMARY KEY, project_id TEXT NOT NULL, watch_dir_id TEXT NOT NULL,
                relative_path TEXT NOT NULL, path TEXT NOT NULL,
                last_modified INTEGER NOT NULL, deleted INTEGER NOT NULL DEFAULT 0,
                needs_chunking INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE projects (id TEXT PRIMARY KEY, name TEXT, root_path TEXT NOT NULL UNIQUE, watch_dir_id TEXT, description TEXT);
            CREATE TABLE watch_dirs (id TEXT PRIMARY KEY, name TEXT, absolute_path TEXT);
            INSERT INTO files VALUES ('f1','p1','w1','m.py','/w/p1/m.py', 1000000, 0, 1);",
        )
        .unwrap();
        conn.pragma_update(None, "user_version", 1i64).unwrap();

        // Simulate the crash point: rename happened, copy did not.
        conn.execute_batch("ALTER TABLE files RENAME TO temp_files").unwrap();
        assert!(table_exists(&conn, "temp_files").unwrap());
        assert!(!table_exists(&conn, "files").unwrap());

        run_startup_integrity_and_migration(&conn).unwrap();

        assert!(table_exists(&conn, "files").unwrap());
        assert!(!table_exists(&conn, "temp_files").unwrap());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
        let lm: f64 = conn
            .query_row("SELECT last_modified FROM files WHERE id='f1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(lm, 1_000_000.0);
    }

    #[test]
    fn corrupt_database_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.db");
        std::fs::write(&path, b"not a sqlite file at all, but long enough to parse header bytes")
            .unwrap();
        let conn = Connection::open(&path).unwrap();
        let err = run_startup_integrity_and_migration(&conn).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_) | StoreError::Sql(_)));
    }
}
