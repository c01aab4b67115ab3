use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single SQL-typed value, round-tripped without interpretation.
///
/// `Real` is how `last_modified` crosses the wire: the driver never converts
/// it to an integer or to a calendar type, so the watcher's mtime comparison
/// (spec §4.7: `|mtime_disk - mtime_db| > 0.1s`) stays exact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl RawValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A column-keyed raw record, as returned by `select()`. Column order is not
/// preserved (spec invariant 6 allows replay equality "up to column order").
pub type RawRow = BTreeMap<String, RawValue>;
