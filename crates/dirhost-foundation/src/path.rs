//! Path normalization for cache keys
//!
//! Every key the host stores (instance records, module table entries,
//! dependency edges, watched directories) goes through [`normalize_path`]
//! so that `/site/blog/`, `/site/./blog` and `\site\blog` all meet at the
//! same entry. Normalization is purely lexical and never touches the
//! filesystem.

use path_clean::PathClean;
use std::path::{Path, PathBuf};

/// Normalize a path into its canonical forward-slash form
///
/// `.` segments are dropped, `..` segments fold into their parent, and a
/// trailing separator is removed (except for the root itself).
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    let raw = path.as_ref().to_string_lossy().replace('\\', "/");
    PathBuf::from(raw)
        .clean()
        .to_string_lossy()
        .replace('\\', "/")
}

/// Whether `path` is `base` itself or lies below it
///
/// Both sides are compared as normalized keys, segment by segment, so
/// `/srv/app-lib` is not under `/srv/app`.
pub fn is_within(path: &str, base: &str) -> bool {
    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || base.ends_with('/'),
        None => false,
    }
}

/// Resolve a candidate path against a root directory and normalize it
///
/// Absolute candidates are normalized as they are; relative candidates are
/// joined onto `root` first.
pub fn resolve_against(root: impl AsRef<Path>, candidate: impl AsRef<Path>) -> String {
    let candidate = candidate.as_ref();
    let as_text = candidate.to_string_lossy();
    if candidate.is_absolute() || as_text.starts_with('/') || as_text.starts_with('\\') {
        normalize_path(candidate)
    } else {
        normalize_path(root.as_ref().join(candidate))
    }
}

/// Normalized directory that contains `path`
pub fn containing_directory(path: impl AsRef<Path>) -> String {
    let normalized = normalize_path(path);
    match normalized.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
        None => ".".to_string(),
    }
}
