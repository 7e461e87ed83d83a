//! Path and stat helpers shared by the pipeline. Canonicalization prefers
//! the filesystem's answer and falls back to a lexical cleanup for paths
//! that do not (or no longer) exist, so locations for deleted files still
//! compare equal to the keys they were stored under.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Canonical absolute form of `path` as a UTF-8 string.
pub fn canonical(path: &Path) -> String {
    if let Ok(real) = std::fs::canonicalize(path) {
        return real.to_string_lossy().into_owned();
    }
    lexical_clean(path).to_string_lossy().into_owned()
}

pub fn canonical_str(path: &str) -> String {
    canonical(Path::new(path))
}

fn lexical_clean(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Final path segment, or the whole path when there is none.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent directory with a trailing slash, matching the granularity the
/// watch registry keys on.
pub fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => format!("{}/", &path[..idx]),
        None => "./".to_string(),
    }
}

/// Modification time in milliseconds since the epoch, `None` when the file
/// is missing or unreadable.
pub fn mtime_millis(path: &str) -> Option<u64> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    let since = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since.as_millis() as u64)
}

pub fn exists(path: &str) -> bool {
    Path::new(path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_resolves_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.cpp");
        std::fs::write(&file, "int x;").unwrap();
        let canon = canonical(&file);
        assert!(canon.ends_with("a.cpp"));
        assert!(Path::new(&canon).is_absolute());
    }

    #[test]
    fn canonical_cleans_missing_paths() {
        assert_eq!(canonical_str("/no/such/./dir/../file.h"), "/no/such/file.h");
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent_dir("/home/u/a.cpp"), "/home/u/");
        assert_eq!(parent_dir("/a.cpp"), "/");
        assert_eq!(file_name("/home/u/a.cpp"), "a.cpp");
    }

    #[test]
    fn mtime_changes_with_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("m.cpp");
        std::fs::write(&file, "1").unwrap();
        let path = file.to_string_lossy().into_owned();
        assert!(mtime_millis(&path).is_some());
        assert_eq!(mtime_millis("/definitely/not/here"), None);
    }
}
