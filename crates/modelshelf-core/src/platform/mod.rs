use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Absolute form of `path` with `.`, `..` and symlinks resolved. Every
/// spelling of the same directory yields the same result.
pub fn canonical_path(path: &Path) -> io::Result<PathBuf> {
    fs::canonicalize(path).map(strip_verbatim_prefix)
}

/// Stored key for a root: canonical when the path still exists, otherwise
/// the path as given.
pub fn root_key(path: &Path) -> String {
    match canonical_path(path) {
        Ok(canonical) => normalize_path(&canonical),
        Err(_) => normalize_path(path),
    }
}

#[cfg(target_os = "windows")]
fn strip_verbatim_prefix(path: PathBuf) -> PathBuf {
    let stripped = path
        .to_str()
        .and_then(|s| s.strip_prefix(r"\\?\"))
        .filter(|rest| !rest.starts_with(r"UNC\"))
        .map(PathBuf::from);
    stripped.unwrap_or(path)
}

#[cfg(not(target_os = "windows"))]
fn strip_verbatim_prefix(path: PathBuf) -> PathBuf {
    path
}

/// Stored form of a path: lossy UTF-8 with `/` separators.
pub fn normalize_path(path: &Path) -> String {
    normalize_str(&path.to_string_lossy())
}

pub fn normalize_str(path: &str) -> String {
    path.replace('\\', "/")
}

/// True when `path` is `root` itself or lies below it. Matching is on whole
/// path components, so `/lib/ab` is not under `/lib/a`.
pub fn is_under_root(path: &str, root: &str) -> bool {
    let path = normalize_str(path);
    let root = normalize_str(root);
    let root = root.trim_end_matches('/');

    if root.is_empty() {
        // Filesystem root: everything absolute is below it.
        return path.starts_with('/');
    }

    let (path, root) = case_fold(&path, root);
    path == root || path.strip_prefix(root.as_str()).is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(target_os = "windows")]
fn case_fold(path: &str, root: &str) -> (String, String) {
    (path.to_lowercase(), root.to_lowercase())
}

#[cfg(not(target_os = "windows"))]
fn case_fold(path: &str, root: &str) -> (String, String) {
    (path.to_string(), root.to_string())
}
