//! Path resolution shared by every `fs`-group tool: join the requested path
//! with the working folder, canonicalize, and verify the result stays under
//! the working folder (or an explicitly allowlisted extra prefix).

use std::path::{Path, PathBuf};

use crate::tool_source::ToolSourceError;

/// Prefixes that are never readable/writable even if nominally under the
/// working folder (VCS metadata, dependency trees, secrets).
const DENIED_PREFIXES: &[&str] = &[".git", "node_modules", "target", ".env"];

/// Resolves `requested` (relative or absolute) against `working_folder`,
/// rejecting anything that escapes it or touches a denied prefix.
///
/// The path need not exist yet (write/multiedit may create it); only the
/// deepest existing ancestor is canonicalized, and the remaining components
/// are appended back on.
pub fn resolve_path_under(working_folder: &Path, requested: &str) -> Result<PathBuf, ToolSourceError> {
    let requested_path = Path::new(requested);
    let joined = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        working_folder.join(requested_path)
    };

    if is_denied(&joined, working_folder) {
        return Err(ToolSourceError::InvalidInput(format!(
            "path denied: {}",
            joined.display()
        )));
    }

    let root = canonicalize_existing_ancestor(working_folder)
        .map_err(|e| ToolSourceError::InvalidInput(format!("invalid working folder: {e}")))?;
    let (existing, remainder) = split_at_existing_ancestor(&joined);
    let canonical_existing = existing
        .canonicalize()
        .map_err(|e| ToolSourceError::InvalidInput(format!("invalid path: {e}")))?;
    let resolved = if remainder.as_os_str().is_empty() {
        canonical_existing
    } else {
        canonical_existing.join(&remainder)
    };

    if !resolved.starts_with(&root) {
        return Err(ToolSourceError::InvalidInput(format!(
            "path escapes working folder: {}",
            resolved.display()
        )));
    }

    Ok(resolved)
}

/// True if `path` relative to `working_folder` begins with any denied
/// prefix component.
pub fn is_denied(path: &Path, working_folder: &Path) -> bool {
    let relative = path.strip_prefix(working_folder).unwrap_or(path);
    relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .map(|first| DENIED_PREFIXES.contains(&first))
        .unwrap_or(false)
}

fn canonicalize_existing_ancestor(path: &Path) -> std::io::Result<PathBuf> {
    let (existing, _) = split_at_existing_ancestor(path);
    existing.canonicalize()
}

/// Walks up from `path` until an existing ancestor is found, returning it
/// along with the remaining (non-existent) tail.
fn split_at_existing_ancestor(path: &Path) -> (PathBuf, PathBuf) {
    let mut existing = path.to_path_buf();
    let mut tail_parts: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail_parts.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }
    tail_parts.reverse();
    let mut tail = PathBuf::new();
    for part in tail_parts {
        tail.push(part);
    }
    (existing, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_path_under_working_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let resolved = resolve_path_under(dir.path(), "a.txt").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("a.txt"));
    }

    #[test]
    fn rejects_path_escaping_working_folder() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_path_under(dir.path(), "../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidInput(_)));
    }

    #[test]
    fn rejects_denied_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let err = resolve_path_under(dir.path(), ".git/config").unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidInput(_)));
    }

    #[test]
    fn allows_nonexistent_file_for_write_under_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_path_under(dir.path(), "new_file.txt").unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("new_file.txt"));
    }
}
