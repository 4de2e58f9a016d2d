use std::path::{Component, Path, PathBuf};

/// Canonical cache key for `path`.
///
/// Relative paths are resolved against `base`. The deepest part of the path
/// that exists goes through `fs::canonicalize` and the missing remainder is
/// appended and normalized lexically, so a request for a file that does not
/// exist yet gets the same key it will have once the file appears.
pub fn canonical_key(path: &Path, base: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut existing = joined.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = std::fs::canonicalize(existing) {
            let key = missing
                .iter()
                .rev()
                .fold(real, |key: PathBuf, name| key.join(name));
            return normalize(&key);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalize(&joined),
        }
    }
}

/// Remove `.` components and fold `..` into the preceding component.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root.
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
