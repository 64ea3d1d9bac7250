//! Filesystem collaborator.
//!
//! Everything that touches the disk during composition goes through
//! [`FileSystem`], so scenario resolution and fragment merging can be driven
//! against any backing store.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, TesterError};

/// File access used by the loader, the policy bundle and diagnostics.
pub trait FileSystem {
    /// Read the whole file.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Expand `pattern` relative to `base` into deduplicated, sorted,
    /// absolute file paths.
    ///
    /// A pattern that matches nothing, or that is not a valid pattern at all,
    /// resolves to its literal path when that path exists; otherwise the
    /// result is [`TesterError::SourceNotFound`].
    fn glob(&self, pattern: &str, base: &Path) -> Result<Vec<PathBuf>>;

    /// Resolve `path` against `base` into an absolute path.
    fn absolute(&self, path: &Path, base: &Path) -> PathBuf;

    /// Read the file as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| {
            TesterError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }
}

/// [`FileSystem`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| TesterError::io(path, e))
    }

    fn glob(&self, pattern: &str, base: &Path) -> Result<Vec<PathBuf>> {
        let literal = base.join(pattern);
        // Only `pattern` carries glob syntax; the base directory matches verbatim.
        let escaped_base = glob::Pattern::escape(&base.to_string_lossy());
        let pattern_text = Path::new(&escaped_base).join(pattern);

        let entries = match glob::glob(&pattern_text.to_string_lossy()) {
            Ok(entries) => entries,
            Err(_) if literal.is_file() => return Ok(vec![self.absolute(&literal, base)]),
            Err(e) => {
                return Err(TesterError::configuration(
                    base,
                    format!("invalid path pattern '{}': {}", pattern, e),
                ))
            }
        };

        let mut found = BTreeSet::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    found.insert(self.absolute(&path, base));
                }
                Ok(_) => {}
                Err(e) => log::warn!("Skipping unreadable match for '{}': {}", pattern, e),
            }
        }

        if found.is_empty() {
            if literal.is_file() {
                found.insert(self.absolute(&literal, base));
            } else {
                return Err(TesterError::SourceNotFound { path: literal });
            }
        }

        log::debug!("Pattern '{}' expanded to {} file(s)", pattern, found.len());
        Ok(found.into_iter().collect())
    }

    fn absolute(&self, path: &Path, base: &Path) -> PathBuf {
        let joined = base.join(path);
        std::fs::canonicalize(&joined).unwrap_or_else(|_| {
            normalize_path(&std::path::absolute(&joined).unwrap_or(joined))
        })
    }
}

/// Drop `.` and fold `..` lexically, for paths that do not exist (yet).
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_sorted_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("scp")).unwrap();
        std::fs::write(dir.path().join("scp/b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("scp/a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("scp/notes.txt"), "").unwrap();

        let fs = LocalFileSystem::new();
        let found = fs.glob("scp/*.json", dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.is_absolute()));
        assert!(found[0].ends_with("scp/a.json"));
        assert!(found[1].ends_with("scp/b.json"));
    }

    #[test]
    fn test_glob_falls_back_to_literal_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("[prod].json"), "{}").unwrap();

        let found = LocalFileSystem::new().glob("[prod].json", dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("[prod].json"));
    }

    #[test]
    fn test_unparsable_pattern_falls_back_to_literal_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a[1.json"), "{}").unwrap();
        let fs = LocalFileSystem::new();

        let found = fs.glob("a[1.json", dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("a[1.json"));

        let err = fs.glob("b[1.json", dir.path()).unwrap_err();
        assert!(matches!(err, TesterError::Configuration { .. }));
    }

    #[test]
    fn test_glob_base_directory_is_matched_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("team[a]");
        std::fs::create_dir(&base).unwrap();
        std::fs::write(base.join("y.json"), "{}").unwrap();
        std::fs::write(base.join("x.json"), "{}").unwrap();

        let found = LocalFileSystem::new().glob("*.json", &base).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("team[a]/x.json"));
        assert!(found[1].ends_with("team[a]/y.json"));
    }

    #[test]
    fn test_glob_without_match_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalFileSystem::new().glob("missing/*.json", dir.path()).unwrap_err();
        assert!(matches!(err, TesterError::SourceNotFound { .. }));
    }

    #[test]
    fn test_absolute_folds_parent_components_of_missing_paths() {
        let resolved = LocalFileSystem::new()
            .absolute(Path::new("../vars.yml"), Path::new("/no-such-root/base"));
        assert_eq!(resolved, PathBuf::from("/no-such-root/vars.yml"));
    }

    #[test]
    fn test_read_missing_file_is_source_not_found() {
        let err = LocalFileSystem::new()
            .read(Path::new("/definitely/not/here.json"))
            .unwrap_err();
        assert!(matches!(err, TesterError::SourceNotFound { .. }));
    }
}
