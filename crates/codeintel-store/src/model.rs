use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchDir {
    pub id: Uuid,
    pub name: Option<String>,
    pub absolute_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: Option<String>,
    pub root_path: String,
    pub watch_dir_id: Uuid,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub watch_dir_id: Uuid,
    pub relative_path: String,
    pub path: String,
    pub last_modified: f64,
    pub deleted: bool,
    pub needs_chunking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Class,
    Function,
    Method,
    Import,
}

impl EntityKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
            Self::Import => "import",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "class" => Some(Self::Class),
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "import" => Some(Self::Import),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub file_id: Uuid,
    pub kind: EntityKind,
    pub name: String,
    pub qualname: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub docstring: Option<String>,
    pub parent_entity_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSourceType {
    Docstring,
    FileDocstring,
    Comment,
    Code,
}

impl ChunkSourceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Docstring => "docstring",
            Self::FileDocstring => "file_docstring",
            Self::Comment => "comment",
            Self::Code => "code",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "docstring" => Some(Self::Docstring),
            "file_docstring" => Some(Self::FileDocstring),
            "comment" => Some(Self::Comment),
            "code" => Some(Self::Code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub file_id: Uuid,
    pub entity_ref: Option<Uuid>,
    pub source_type: ChunkSourceType,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub vector_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStat {
    pub worker: String,
    pub cycle_started_at: f64,
    pub cycle_ended_at: f64,
    pub processed: u64,
    pub errors: u64,
    pub detail: Option<String>,
}
