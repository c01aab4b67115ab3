//! FAISS-like Vector Index (C6): a flat, brute-force index over
//! L2-normalized `f32` vectors, scored by cosine similarity (Open Question
//! 1 — recorded in DESIGN.md). One index per `(project_id, dataset_id)`.

use crate::error::{Result, VectorError};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

const MAGIC: u32 = 0xC0DE_1DEC;
const FORMAT_VERSION: u16 = 1;

/// A flat cosine index. `vector_id` is assigned monotonically by
/// `add_vector` and is stable across saves/loads/rebuilds — it is *not*
/// repacked to a dense range, because the chunks table keeps referring to
/// whatever id it was given (spec §4.6 invariant: `vector_id` written back
/// to the chunk row in the same logical step as `add_vector`).
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dim: usize,
    next_id: i64,
    vectors: BTreeMap<i64, Vec<f32>>,
}

impl VectorIndex {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim, next_id: 0, vectors: BTreeMap::new() }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn add_vector(&mut self, vector: Vec<f32>) -> Result<i64> {
        if vector.len() != self.dim {
            return Err(VectorError::DimensionMismatch { expected: self.dim, got: vector.len() });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.vectors.insert(id, vector);
        Ok(id)
    }

    pub fn remove_vector(&mut self, vector_id: i64) {
        self.vectors.remove(&vector_id);
    }

    /// Cosine similarity search, assuming inputs are already L2-normalized
    /// so similarity reduces to a dot product. Returns up to `limit`
    /// results sorted by descending score.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(i64, f32)>> {
        if query.len() != self.dim {
            return Err(VectorError::DimensionMismatch { expected: self.dim, got: query.len() });
        }
        let mut scored: Vec<(i64, f32)> = self
            .vectors
            .iter()
            .map(|(id, v)| (*id, dot(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Rebuilds the index from an authoritative source (the chunks table).
    /// The DB is the source of truth (spec §4.6): the on-disk index is
    /// only ever a cache of it.
    #[must_use]
    pub fn rebuild_from_db(dim: usize, rows: impl IntoIterator<Item = (i64, Vec<f32>)>) -> Self {
        let mut vectors = BTreeMap::new();
        let mut max_id = -1i64;
        for (id, vector) in rows {
            max_id = max_id.max(id);
            vectors.insert(id, vector);
        }
        Self { dim, next_id: max_id + 1, vectors }
    }

    /// Returns `true` iff the index's vector-id set is exactly `ids` (spec
    /// invariant: rebuild must match the chunk table's non-null
    /// `vector_id`s one-to-one).
    #[must_use]
    pub fn matches_id_set(&self, ids: &std::collections::HashSet<i64>) -> bool {
        self.vectors.len() == ids.len() && self.vectors.keys().all(|id| ids.contains(id))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut buf = Vec::with_capacity(16 + self.vectors.len() * (8 + self.dim * 4));
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.dim as u32).to_le_bytes());
        buf.extend_from_slice(&self.next_id.to_le_bytes());
        buf.extend_from_slice(&(self.vectors.len() as u64).to_le_bytes());
        for (id, vector) in &self.vectors {
            buf.extend_from_slice(&id.to_le_bytes());
            for f in vector {
                buf.extend_from_slice(&f.to_le_bytes());
            }
        }
        let tmp_path = path.with_extension("bin.tmp");
        std::fs::write(&tmp_path, &buf)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        Self::from_bytes(&raw)
    }

    fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < 26 {
            return Err(VectorError::Corrupt("file shorter than header".into()));
        }
        let magic = u32::from_le_bytes(raw[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(VectorError::Corrupt(format!("bad magic {magic:#x}")));
        }
        let version = u16::from_le_bytes(raw[4..6].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(VectorError::Corrupt(format!("unsupported format version {version}")));
        }
        let dim = u32::from_le_bytes(raw[6..10].try_into().unwrap()) as usize;
        let next_id = i64::from_le_bytes(raw[10..18].try_into().unwrap());
        let count = u64::from_le_bytes(raw[18..26].try_into().unwrap()) as usize;

        let mut vectors = BTreeMap::new();
        let mut offset = 26;
        let record_len = 8 + dim * 4;
        for _ in 0..count {
            if raw.len() < offset + record_len {
                return Err(VectorError::Corrupt("truncated vector record".into()));
            }
            let id = i64::from_le_bytes(raw[offset..offset + 8].try_into().unwrap());
            offset += 8;
            let mut vector = Vec::with_capacity(dim);
            for i in 0..dim {
                let start = offset + i * 4;
                vector.push(f32::from_le_bytes(raw[start..start + 4].try_into().unwrap()));
            }
            offset += dim * 4;
            vectors.insert(id, vector);
        }
        Ok(Self { dim, next_id, vectors })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    ndarray::ArrayView1::from(a).dot(&ndarray::ArrayView1::from(b))
}

/// `{faiss_dir}/{project_id}/{dataset_id}.bin` (spec §6).
#[must_use]
pub fn index_path(faiss_dir: &Path, project_id: uuid::Uuid, dataset_id: &str) -> std::path::PathBuf {
    faiss_dir.join(project_id.to_string()).join(format!("{dataset_id}.bin"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn normalize(v: Vec<f32>) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / norm).collect()
    }

    #[test]
    fn search_ranks_closest_vector_first() {
        let mut idx = VectorIndex::new(3);
        let id_a = idx.add_vector(normalize(vec![1.0, 0.0, 0.0])).unwrap();
        let id_b = idx.add_vector(normalize(vec![0.0, 1.0, 0.0])).unwrap();
        let id_c = idx.add_vector(normalize(vec![0.9, 0.1, 0.0])).unwrap();

        let results = idx.search(&normalize(vec![1.0, 0.0, 0.0]), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, id_a);
        assert_eq!(results[1].0, id_c);
        assert_ne!(results[1].0, id_b);
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p").join("default.bin");
        let mut idx = VectorIndex::new(2);
        idx.add_vector(vec![1.0, 0.0]).unwrap();
        idx.add_vector(vec![0.0, 1.0]).unwrap();
        idx.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.dim(), 2);
        assert_eq!(loaded.len(), 2);
        let results = loaded.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, 0);
    }

    #[test]
    fn rebuild_from_db_preserves_given_ids() {
        let rows = vec![(5i64, vec![1.0, 0.0]), (9i64, vec![0.0, 1.0])];
        let idx = VectorIndex::rebuild_from_db(2, rows);
        assert_eq!(idx.len(), 2);
        let ids: std::collections::HashSet<i64> = [5, 9].into_iter().collect();
        assert!(idx.matches_id_set(&ids));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut idx = VectorIndex::new(3);
        let err = idx.add_vector(vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { expected: 3, got: 2 }));
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"not an index").unwrap();
        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, VectorError::Corrupt(_)));
    }

    #[test]
    fn header_truncated_just_before_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short_header.bin");
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&1i64.to_le_bytes());
        assert_eq!(buf.len(), 18);
        std::fs::write(&path, &buf).unwrap();
        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, VectorError::Corrupt(_)));
    }
}
