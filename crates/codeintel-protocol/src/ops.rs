use crate::raw::{RawRow, RawValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One named operation per row of the driver op table in spec §4.4.
///
/// `#[serde(tag = "op", content = "args")]` keeps the wire shape an explicit
/// `{"op": "...", "args": {...}}` object rather than a bare enum discriminant,
/// matching the `{id, op, args}` framing spec's §6 prescribes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum Op {
    Execute(ExecuteArgs),
    Select(SelectArgs),
    Begin,
    Commit(TxArgs),
    Rollback(TxArgs),
    IndexFile(IndexFileArgs),
    QueryAst(AstQueryArgs),
    QueryCst(AstQueryArgs),
    ModifyAst(ModifyArgs),
    ModifyCst(ModifyArgs),
    SyncSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteArgs {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<RawValue>,
    #[serde(default)]
    pub tx: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectArgs {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<RawValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectResult {
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxArgs {
    pub tx_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginResult {
    pub tx_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFileArgs {
    pub abs_path: String,
    pub project_id: Uuid,
    #[serde(default)]
    pub inline_chunking: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFileResult {
    pub file_id: Uuid,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstQueryArgs {
    pub project_id: Uuid,
    pub xpath_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstNode {
    pub file_id: Uuid,
    pub node_id: String,
    pub kind: String,
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeListResult {
    pub nodes: Vec<AstNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstEdit {
    pub node_id: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyArgs {
    pub xpath_filter: String,
    pub edits: Vec<AstEdit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyResult {
    pub affected_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub statement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSchemaResult {
    pub diff: Vec<SchemaDiff>,
}
