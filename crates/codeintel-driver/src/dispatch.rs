//! Typed op dispatch (spec §4.4's table). Every `Op` variant maps to
//! exactly one handler; nothing is routed by string beyond the `op` tag
//! `serde` already decoded.

use codeintel_protocol::{
    AstNode, BeginResult, ErrorKind, ExecuteResult, IndexFileResult, ModifyResult, NodeListResult,
    Op, RawValue, RpcError, SelectResult, SyncSchemaResult,
};
use codeintel_store::{EntityKind, SqlEngine, StoreError};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

pub struct Driver {
    pub engine: Arc<SqlEngine>,
}

impl Driver {
    pub fn new(engine: Arc<SqlEngine>) -> Self {
        Self { engine }
    }

    pub fn handle(&self, op: Op) -> Result<serde_json::Value, RpcError> {
        match op {
            Op::Execute(args) => {
                let (rows_affected, last_insert_id) = self
                    .engine
                    .execute(&args.sql, &args.params, args.tx)
                    .map_err(store_err)?;
                to_value(ExecuteResult { rows_affected, last_insert_id })
            }
            Op::Select(args) => {
                let rows = self.engine.select(&args.sql, &args.params).map_err(store_err)?;
                to_value(SelectResult { rows })
            }
            Op::Begin => {
                let tx_id = self.engine.begin().map_err(store_err)?;
                to_value(BeginResult { tx_id })
            }
            Op::Commit(args) => {
                self.engine.commit(args.tx_id).map_err(store_err)?;
                to_value(serde_json::json!({}))
            }
            Op::Rollback(args) => {
                self.engine.rollback(args.tx_id).map_err(store_err)?;
                to_value(serde_json::json!({}))
            }
            Op::IndexFile(args) => {
                let (file_id, created) = self.index_file(&args.abs_path, args.project_id, args.inline_chunking)?;
                to_value(IndexFileResult { file_id, created })
            }
            Op::QueryAst(args) => to_value(NodeListResult { nodes: self.query_entities(args.project_id, &args.xpath_filter)? }),
            Op::QueryCst(args) => to_value(NodeListResult { nodes: self.query_entities(args.project_id, &args.xpath_filter)? }),
            Op::ModifyAst(args) => to_value(ModifyResult { affected_ids: self.apply_edits(&args.edits)? }),
            Op::ModifyCst(args) => to_value(ModifyResult { affected_ids: self.apply_edits(&args.edits)? }),
            Op::SyncSchema => {
                let diff = self.engine.sync_schema().map_err(store_err)?;
                to_value(SyncSchemaResult { diff })
            }
        }
    }

    fn index_file(
        &self,
        abs_path: &str,
        project_id: Uuid,
        inline_chunking: bool,
    ) -> Result<(Uuid, bool), RpcError> {
        let project_rows = self
            .engine
            .select(
                "SELECT root_path, watch_dir_id FROM projects WHERE id = ?1",
                &[RawValue::Text(project_id.to_string())],
            )
            .map_err(store_err)?;
        let project = project_rows
            .first()
            .ok_or_else(|| RpcError::new(ErrorKind::NotFound, format!("unknown project {project_id}")))?;
        let root_path = project["root_path"]
            .as_str()
            .ok_or_else(|| RpcError::new(ErrorKind::CorruptDb, "projects.root_path is not text"))?;
        let watch_dir_id = project["watch_dir_id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| RpcError::new(ErrorKind::CorruptDb, "projects.watch_dir_id is not a uuid"))?;

        let relative_path = Path::new(abs_path)
            .strip_prefix(root_path)
            .map_err(|_| RpcError::new(ErrorKind::FsErr, format!("{abs_path} is not under project root {root_path}")))?
            .to_string_lossy()
            .replace('\\', "/");

        let metadata = std::fs::metadata(abs_path)
            .map_err(|e| RpcError::new(ErrorKind::FsErr, format!("stat {abs_path}: {e}")))?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let content = std::fs::read_to_string(abs_path)
            .map_err(|e| RpcError::new(ErrorKind::FsErr, format!("read {abs_path}: {e}")))?;

        let mut parsed = codeintel_chunker::parse_file(Path::new(abs_path), &content)
            .map_err(|e| RpcError::new(ErrorKind::ParseErr, e.to_string()))?;
        if !inline_chunking {
            // `code_chunks` are normally produced by the Vectorization
            // Worker's pipeline together with their embeddings; inline
            // chunking is an opt-in for making chunk rows (unvectorized)
            // available immediately after index_file returns.
            parsed.chunks.clear();
        }

        self.engine
            .index_file(project_id, watch_dir_id, &relative_path, abs_path, last_modified, &parsed)
            .map_err(store_err)
    }

    /// `query_ast`/`query_cst` both project onto the `entities` table —
    /// the per-node concrete/abstract tree is persisted as a single opaque
    /// blob (`ast_trees`/`cst_trees`), not as addressable rows, so
    /// structural queries run against the entity index extracted at
    /// `index_file` time. `xpath_filter` is matched as an entity kind.
    fn query_entities(&self, project_id: Uuid, xpath_filter: &str) -> Result<Vec<AstNode>, RpcError> {
        let kind = EntityKind::from_str(&xpath_filter.to_lowercase());
        let rows = self
            .engine
            .select(
                "SELECT e.id as id, e.file_id as file_id, e.kind as kind, e.name as name,
                        e.start_line as start_line, e.end_line as end_line
                 FROM entities e JOIN files f ON f.id = e.file_id
                 WHERE f.project_id = ?1",
                &[RawValue::Text(project_id.to_string())],
            )
            .map_err(store_err)?;

        let mut nodes = Vec::new();
        for row in rows {
            let row_kind = row["kind"].as_str().unwrap_or_default();
            if let Some(k) = kind {
                if row_kind != k.as_str() {
                    continue;
                }
            }
            nodes.push(AstNode {
                file_id: row["file_id"].as_str().and_then(|s| Uuid::parse_str(s).ok()).unwrap_or_default(),
                node_id: row["id"].as_str().unwrap_or_default().to_string(),
                kind: row_kind.to_string(),
                text: row["name"].as_str().unwrap_or_default().to_string(),
                start_line: row["start_line"].as_i64().unwrap_or_default() as u32,
                end_line: row["end_line"].as_i64().unwrap_or_default() as u32,
            });
        }
        Ok(nodes)
    }

    /// Replaces the named entity's source lines in `code_content` with the
    /// edit's replacement text and flips `needs_chunking` so the next
    /// indexing cycle recomputes AST/CST/entities from the new content.
    fn apply_edits(&self, edits: &[codeintel_protocol::AstEdit]) -> Result<Vec<Uuid>, RpcError> {
        let mut affected = Vec::new();
        for edit in edits {
            let entity_id = Uuid::parse_str(&edit.node_id)
                .map_err(|_| RpcError::new(ErrorKind::NotFound, format!("not a uuid: {}", edit.node_id)))?;
            let rows = self
                .engine
                .select(
                    "SELECT file_id, start_line, end_line FROM entities WHERE id = ?1",
                    &[RawValue::Text(entity_id.to_string())],
                )
                .map_err(store_err)?;
            let row = rows
                .first()
                .ok_or_else(|| RpcError::new(ErrorKind::NotFound, format!("unknown entity {entity_id}")))?;
            let file_id = row["file_id"].as_str().unwrap_or_default().to_string();
            let start = row["start_line"].as_i64().unwrap_or(1) as usize;
            let end = row["end_line"].as_i64().unwrap_or(1) as usize;

            let content_rows = self
                .engine
                .select(
                    "SELECT content FROM code_content WHERE file_id = ?1",
                    &[RawValue::Text(file_id.clone())],
                )
                .map_err(store_err)?;
            let content = content_rows
                .first()
                .and_then(|r| r["content"].as_str())
                .unwrap_or_default()
                .to_string();

            let mut lines: Vec<&str> = content.lines().collect();
            if start == 0 || start > lines.len() || end > lines.len() || start > end {
                return Err(RpcError::new(ErrorKind::Conflict, format!("entity {entity_id} line range stale")));
            }
            let replacement_lines: Vec<&str> = edit.replacement.lines().collect();
            lines.splice(start - 1..end, replacement_lines);
            let new_content = lines.join("\n");

            self.engine
                .execute(
                    "UPDATE code_content SET content = ?2 WHERE file_id = ?1",
                    &[RawValue::Text(file_id.clone()), RawValue::Text(new_content)],
                    None,
                )
                .map_err(store_err)?;
            self.engine
                .execute(
                    "UPDATE files SET needs_chunking = 1 WHERE id = ?1",
                    &[RawValue::Text(file_id)],
                    None,
                )
                .map_err(store_err)?;
            affected.push(entity_id);
        }
        Ok(affected)
    }
}

fn to_value<T: serde::Serialize>(v: T) -> Result<serde_json::Value, RpcError> {
    serde_json::to_value(v).map_err(|e| RpcError::new(ErrorKind::SqlError, e.to_string()))
}

fn store_err(e: StoreError) -> RpcError {
    let kind = match &e {
        StoreError::Io(_) => ErrorKind::IoErr,
        StoreError::Sql(_) => ErrorKind::SqlError,
        StoreError::TxBusy => ErrorKind::TxBusy,
        StoreError::UnknownTx(_) => ErrorKind::UnknownTx,
        StoreError::Migration(_) => ErrorKind::MigrationErr,
        StoreError::Corrupt(_) => ErrorKind::CorruptDb,
        StoreError::Other(_) => ErrorKind::SqlError,
        StoreError::Serde(_) => ErrorKind::SqlError,
    };
    RpcError::new(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeintel_protocol::{ExecuteArgs, IndexFileArgs, SelectArgs, TxArgs};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn driver_with_project(project_root: &Path) -> (Driver, Uuid, Uuid) {
        let db_path = project_root.join("codeintel.db");
        let engine = SqlEngine::open(&db_path).expect("open store");
        let driver = Driver::new(Arc::new(engine));

        let watch_dir_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        driver
            .engine
            .execute(
                "INSERT INTO watch_dirs (id, name, absolute_path) VALUES (?1, ?2, ?3)",
                &[
                    RawValue::Text(watch_dir_id.to_string()),
                    RawValue::Text("w".into()),
                    RawValue::Text(project_root.to_string_lossy().into_owned()),
                ],
                None,
            )
            .unwrap();
        driver
            .engine
            .execute(
                "INSERT INTO projects (id, name, root_path, watch_dir_id) VALUES (?1, ?2, ?3, ?4)",
                &[
                    RawValue::Text(project_id.to_string()),
                    RawValue::Text("proj".into()),
                    RawValue::Text(project_root.to_string_lossy().into_owned()),
                    RawValue::Text(watch_dir_id.to_string()),
                ],
                None,
            )
            .unwrap();
        (driver, project_id, watch_dir_id)
    }

    #[test]
    fn begin_commit_round_trips_through_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, _, _) = driver_with_project(dir.path());

        let begin = driver.handle(Op::Begin).unwrap();
        let tx_id: BeginResult = serde_json::from_value(begin).unwrap();

        let exec = driver
            .handle(Op::Execute(ExecuteArgs {
                sql: "INSERT INTO watch_dirs (id, name, absolute_path) VALUES (?1, ?2, ?3)".into(),
                params: vec![
                    RawValue::Text(Uuid::new_v4().to_string()),
                    RawValue::Text("other".into()),
                    RawValue::Text("/tmp/other".into()),
                ],
                tx: Some(tx_id.tx_id),
            }))
            .unwrap();
        let exec: ExecuteResult = serde_json::from_value(exec).unwrap();
        assert_eq!(exec.rows_affected, 1);

        driver.handle(Op::Commit(TxArgs { tx_id: tx_id.tx_id })).unwrap();

        let select = driver
            .handle(Op::Select(SelectArgs {
                sql: "SELECT COUNT(*) as n FROM watch_dirs".into(),
                params: vec![],
            }))
            .unwrap();
        let select: SelectResult = serde_json::from_value(select).unwrap();
        assert_eq!(select.rows[0]["n"].as_i64(), Some(2));
    }

    #[test]
    fn index_file_without_inline_chunking_discards_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, project_id, _watch_dir_id) = driver_with_project(dir.path());

        let src_path = dir.path().join("lib.rs");
        fs::write(&src_path, "fn hello() {}\n").unwrap();

        let result = driver
            .handle(Op::IndexFile(IndexFileArgs {
                abs_path: src_path.to_string_lossy().into_owned(),
                project_id,
                inline_chunking: false,
            }))
            .unwrap();
        let result: IndexFileResult = serde_json::from_value(result).unwrap();
        assert!(result.created);

        let chunks = driver
            .engine
            .select(
                "SELECT COUNT(*) as n FROM code_chunks WHERE file_id = ?1",
                &[RawValue::Text(result.file_id.to_string())],
            )
            .unwrap();
        assert_eq!(chunks[0]["n"].as_i64(), Some(0));

        let entities = driver
            .engine
            .select(
                "SELECT COUNT(*) as n FROM entities WHERE file_id = ?1 AND kind = 'function'",
                &[RawValue::Text(result.file_id.to_string())],
            )
            .unwrap();
        assert_eq!(entities[0]["n"].as_i64(), Some(1));
    }

    #[test]
    fn query_ast_filters_by_entity_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, project_id, _) = driver_with_project(dir.path());

        let src_path = dir.path().join("lib.rs");
        fs::write(&src_path, "fn a() {}\nfn b() {}\n").unwrap();
        driver
            .handle(Op::IndexFile(IndexFileArgs {
                abs_path: src_path.to_string_lossy().into_owned(),
                project_id,
                inline_chunking: false,
            }))
            .unwrap();

        let nodes = driver.query_entities(project_id, "function").unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.kind == "function"));
    }

    #[test]
    fn sync_schema_is_idempotent_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let (driver, _, _) = driver_with_project(dir.path());
        let result = driver.handle(Op::SyncSchema).unwrap();
        let result: SyncSchemaResult = serde_json::from_value(result).unwrap();
        assert!(result.diff.is_empty());
    }
}
