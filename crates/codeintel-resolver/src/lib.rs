//! Project / Watch-Dir Resolver (C11): a pure function (the only I/O is
//! reading a candidate `projectid` marker file) mapping an absolute path
//! to `(watch_dir_id, project_id, relative_path)`.

mod error;

pub use error::ResolverError;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, ResolverError>;

#[derive(Debug, Clone)]
pub struct WatchDirInput {
    pub id: Uuid,
    /// Must already be canonicalized — the File Watcher canonicalises
    /// symlinks once, at scan time (spec §4.11 rule 5); this module never
    /// does it itself.
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub watch_dir_id: Uuid,
    pub project_id: Uuid,
    pub project_name: Option<String>,
    pub project_root: PathBuf,
    pub relative_path: String,
}

#[derive(Debug, Deserialize)]
struct MarkerFile {
    id: Uuid,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    description: Option<String>,
}

/// Resolves `abs_path` against the configured watch dirs. `abs_path` must
/// already be absolute and canonical.
pub fn resolve(abs_path: &Path, watch_dirs: &[WatchDirInput]) -> Result<Resolved> {
    let watch_dir = watch_dirs
        .iter()
        .find(|w| abs_path.starts_with(&w.path))
        .ok_or(ResolverError::OutsideWatched)?;

    let file_dir = abs_path.parent().unwrap_or(&watch_dir.path);
    let (project_root, marker) = find_project_marker(file_dir, &watch_dir.path)?
        .ok_or(ResolverError::NoProjectMarker)?;

    let relative_path = abs_path
        .strip_prefix(&project_root)
        .expect("project_root is always an ancestor of abs_path")
        .to_string_lossy()
        .replace('\\', "/");

    Ok(Resolved {
        watch_dir_id: watch_dir.id,
        project_id: marker.id,
        project_name: marker.name,
        project_root,
        relative_path,
    })
}

/// Looks for `projectid` at depth 1 (the watch-dir-root's immediate child
/// directory that is an ancestor of `file_dir`) first, then depth 0 (the
/// watch-dir root itself). A marker at any deeper directory is never
/// considered (spec invariant 10 / scenario S6).
fn find_project_marker(file_dir: &Path, watch_dir_root: &Path) -> Result<Option<(PathBuf, MarkerFile)>> {
    let rel = file_dir
        .strip_prefix(watch_dir_root)
        .expect("file_dir is inside watch_dir_root");

    if let Some(first) = rel.components().next() {
        let depth1_dir = watch_dir_root.join(first.as_os_str());
        if let Some(marker) = read_marker(&depth1_dir)? {
            return Ok(Some((depth1_dir, marker)));
        }
    }

    if let Some(marker) = read_marker(watch_dir_root)? {
        return Ok(Some((watch_dir_root.to_path_buf(), marker)));
    }

    Ok(None)
}

fn read_marker(dir: &Path) -> Result<Option<MarkerFile>> {
    let marker_path = dir.join("projectid");
    if !marker_path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&marker_path)?;
    let marker: MarkerFile = serde_json::from_str(&content)
        .map_err(|_| ResolverError::InvalidMarker(marker_path.display().to_string()))?;
    if marker.id.get_version_num() != 4 {
        return Err(ResolverError::InvalidMarker(marker_path.display().to_string()));
    }
    Ok(Some(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write_marker(dir: &Path, id: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("projectid"), format!(r#"{{"id":"{id}"}}"#)).unwrap();
    }

    #[test]
    fn resolves_file_under_depth_one_project() {
        let tmp = tempfile::tempdir().unwrap();
        let watch_root = tmp.path().join("w");
        fs::create_dir_all(watch_root.join("projA")).unwrap();
        let project_id = Uuid::new_v4();
        write_marker(&watch_root.join("projA"), &project_id.to_string());
        fs::write(watch_root.join("projA").join("m.py"), "x").unwrap();

        let watch_dir_id = Uuid::new_v4();
        let watch_dirs = vec![WatchDirInput { id: watch_dir_id, path: watch_root.clone() }];
        let resolved = resolve(&watch_root.join("projA").join("m.py"), &watch_dirs).unwrap();

        assert_eq!(resolved.watch_dir_id, watch_dir_id);
        assert_eq!(resolved.project_id, project_id);
        assert_eq!(resolved.relative_path, "m.py");
        assert_eq!(resolved.project_root, watch_root.join("projA"));
    }

    #[test]
    fn deep_marker_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let watch_root = tmp.path().join("w");
        fs::create_dir_all(watch_root.join("a").join("b")).unwrap();
        write_marker(&watch_root.join("a").join("b"), &Uuid::new_v4().to_string());
        fs::write(watch_root.join("a").join("b").join("m.py"), "x").unwrap();

        let watch_dirs = vec![WatchDirInput { id: Uuid::new_v4(), path: watch_root.clone() }];
        let err = resolve(&watch_root.join("a").join("b").join("m.py"), &watch_dirs).unwrap_err();
        assert!(matches!(err, ResolverError::NoProjectMarker));
    }

    #[test]
    fn file_outside_every_watch_dir_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let watch_root = tmp.path().join("w");
        fs::create_dir_all(&watch_root).unwrap();
        let watch_dirs = vec![WatchDirInput { id: Uuid::new_v4(), path: watch_root }];

        let err = resolve(&tmp.path().join("elsewhere").join("m.py"), &watch_dirs).unwrap_err();
        assert!(matches!(err, ResolverError::OutsideWatched));
    }

    #[test]
    fn plain_uuid_marker_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let watch_root = tmp.path().join("w");
        fs::create_dir_all(watch_root.join("projA")).unwrap();
        fs::write(watch_root.join("projA").join("projectid"), Uuid::new_v4().to_string()).unwrap();
        fs::write(watch_root.join("projA").join("m.py"), "x").unwrap();

        let watch_dirs = vec![WatchDirInput { id: Uuid::new_v4(), path: watch_root.clone() }];
        let err = resolve(&watch_root.join("projA").join("m.py"), &watch_dirs).unwrap_err();
        assert!(matches!(err, ResolverError::InvalidMarker(_)));
    }

    #[test]
    fn depth_zero_marker_covers_files_directly_in_watch_root() {
        let tmp = tempfile::tempdir().unwrap();
        let watch_root = tmp.path().join("w");
        let project_id = Uuid::new_v4();
        write_marker(&watch_root, &project_id.to_string());
        fs::write(watch_root.join("m.py"), "x").unwrap();

        let watch_dirs = vec![WatchDirInput { id: Uuid::new_v4(), path: watch_root.clone() }];
        let resolved = resolve(&watch_root.join("m.py"), &watch_dirs).unwrap();
        assert_eq!(resolved.project_id, project_id);
        assert_eq!(resolved.relative_path, "m.py");
    }
}
