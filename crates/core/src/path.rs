//! Canonical path identity
//!
//! Watched files and directories are keyed by their absolute, normalized
//! path rather than by how the caller happened to spell it. Keys compare
//! by value, hash consistently with that comparison, and are cheap to clone
//! (one shared allocation per key).

use crate::error::WatchError;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Absolute, normalized path used as an identity key
///
/// Equality and hashing ignore case on Windows, where the filesystem does.
#[derive(Clone)]
pub struct PathKey {
    path: Arc<Path>,
}

impl PathKey {
    /// Resolve a caller-supplied path
    ///
    /// Relative paths are anchored at the current directory. The parent
    /// directory is canonicalized (symlinks resolved) and must exist; the file
    /// itself need not exist yet.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        let original = path.as_ref();
        let absolute = absolutize(original)?;

        let (parent, name) = match (absolute.parent(), absolute.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => return Err(WatchError::NoParent(original.to_path_buf())),
        };

        let parent = std::fs::canonicalize(parent).map_err(|e| WatchError::io(parent, e))?;
        Ok(Self::from_normalized(parent.join(name)))
    }

    /// Resolve a path whose directory may already be gone
    ///
    /// Falls back to canonicalizing the deepest ancestor that still exists,
    /// following dangling symlinks along the way, so a file keyed by
    /// `resolve` while its directory existed maps to the same key afterwards.
    pub fn locate(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        let path = path.as_ref();
        if let Ok(key) = Self::resolve(path) {
            return Ok(key);
        }
        let absolute = absolutize(path)?;
        Ok(Self::from_normalized(canonical_prefix(&absolute, MAX_LINK_HOPS)))
    }

    /// Wrap a path reported by the native layer
    ///
    /// Native events carry the directory exactly as it was subscribed, so only
    /// lexical cleanup is applied.
    pub fn from_event(path: impl AsRef<Path>) -> Self {
        Self::from_normalized(normalize(path.as_ref()))
    }

    fn from_normalized(path: PathBuf) -> Self {
        Self {
            path: Arc::from(path),
        }
    }

    /// Key of the containing directory
    pub fn parent(&self) -> Option<PathKey> {
        self.path.parent().map(|p| Self {
            path: Arc::from(p),
        })
    }

    /// Borrow the underlying path
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// Copy out an owned path
    pub fn to_path_buf(&self) -> PathBuf {
        self.path.to_path_buf()
    }

    /// Form used for equality, ordering and hashing
    #[cfg(windows)]
    fn identity(&self) -> Cow<'_, OsStr> {
        let folded = self.path.as_os_str().to_string_lossy().to_lowercase();
        Cow::Owned(folded.into())
    }

    /// Form used for equality, ordering and hashing
    #[cfg(not(windows))]
    fn identity(&self) -> Cow<'_, OsStr> {
        Cow::Borrowed(self.path.as_os_str())
    }
}

impl PartialEq for PathKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.path, &other.path) || self.identity() == other.identity()
    }
}

impl Eq for PathKey {}

impl Hash for PathKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for PathKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PathKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl fmt::Debug for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathKey({})", self.path.display())
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for PathKey {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl From<PathKey> for PathBuf {
    fn from(key: PathKey) -> Self {
        key.path.to_path_buf()
    }
}

/// Symlink chains longer than this are left unresolved
const MAX_LINK_HOPS: usize = 16;

/// Canonicalize the longest existing prefix of `path` and re-append the rest
///
/// A prefix that is a dangling symlink is replaced by its target.
fn canonical_prefix(path: &Path, hops: usize) -> PathBuf {
    for ancestor in path.ancestors() {
        let Ok(metadata) = std::fs::symlink_metadata(ancestor) else {
            continue;
        };
        let Ok(rest) = path.strip_prefix(ancestor) else {
            break;
        };

        let base = match std::fs::canonicalize(ancestor) {
            Ok(canonical) => canonical,
            Err(_) if metadata.file_type().is_symlink() && hops > 0 => {
                match std::fs::read_link(ancestor) {
                    // Relative targets are relative to the link's directory
                    Ok(target) => {
                        let target = match ancestor.parent() {
                            Some(dir) => dir.join(target),
                            None => target,
                        };
                        canonical_prefix(&normalize(&target), hops - 1)
                    }
                    Err(_) => ancestor.to_path_buf(),
                }
            }
            Err(_) => ancestor.to_path_buf(),
        };
        return normalize(&base.join(rest));
    }
    path.to_path_buf()
}

/// Anchor a relative path at the current directory and normalize it
fn absolutize(path: &Path) -> Result<PathBuf, WatchError> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }

    let cwd = std::env::current_dir().map_err(|e| WatchError::io(path, e))?;
    Ok(normalize(&cwd.join(path)))
}

/// Remove `.` components and fold `..` into its parent
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the root stays at the root
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::collections::HashSet;

    #[test]
    fn test_equal_paths_are_equal() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let a = PathKey::resolve(temp_dir.path().join("test.txt"))?;
        let b = PathKey::resolve(temp_dir.path().join("test.txt"))?;

        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_different_paths_are_not_equal() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let a = PathKey::resolve(temp_dir.path().join("a.txt"))?;
        let b = PathKey::resolve(temp_dir.path().join("b.txt"))?;

        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn test_spelling_does_not_change_identity() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::create_dir(temp_dir.path().join("sub"))?;

        let direct = PathKey::resolve(temp_dir.path().join("a.txt"))?;
        let detour = PathKey::resolve(temp_dir.path().join("sub/../././a.txt"))?;

        assert_eq!(direct, detour);

        let mut set = HashSet::new();
        set.insert(direct);
        assert!(!set.insert(detour), "hash must agree with equality");
        Ok(())
    }

    #[test]
    fn test_resolve_canonicalizes_parent() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let key = PathKey::resolve(temp_dir.path().join("file.txt"))?;
        let canonical_dir = std::fs::canonicalize(temp_dir.path())?;

        assert_eq!(key.as_path(), canonical_dir.join("file.txt"));
        assert_eq!(key.parent().map(PathBuf::from), Some(canonical_dir));
        Ok(())
    }

    #[test]
    fn test_resolve_missing_parent_fails() {
        let result = PathKey::resolve("/definitely/not/a/real/dir/file.txt");
        assert!(matches!(result, Err(WatchError::Io { .. })));
    }

    #[test]
    fn test_resolve_root_has_no_parent() {
        let result = PathKey::resolve("/");
        assert!(matches!(result, Err(WatchError::NoParent(_))));
    }

    #[test]
    fn test_relative_paths_anchor_at_cwd() -> Result<()> {
        let key = PathKey::locate("no-such-dir-here/relative.txt")?;
        assert!(key.as_path().is_absolute());
        assert!(key.as_path().ends_with("no-such-dir-here/relative.txt"));
        Ok(())
    }

    #[test]
    fn test_locate_matches_resolve_after_directory_is_gone() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let sub = temp_dir.path().join("sub");
        std::fs::create_dir(&sub)?;

        let resolved = PathKey::resolve(sub.join("a.txt"))?;
        std::fs::remove_dir(&sub)?;

        assert_eq!(PathKey::locate(sub.join("a.txt"))?, resolved);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_follows_dangling_symlink() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let real = temp_dir.path().join("real");
        let link = temp_dir.path().join("link");
        std::fs::create_dir(&real)?;
        std::os::unix::fs::symlink(&real, &link)?;

        let resolved = PathKey::resolve(link.join("a.txt"))?;
        assert!(resolved.as_path().starts_with(std::fs::canonicalize(&real)?));

        std::fs::remove_dir(&real)?;
        assert!(PathKey::resolve(link.join("a.txt")).is_err());
        assert_eq!(PathKey::locate(link.join("a.txt"))?, resolved);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_follows_relative_symlink() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::create_dir(temp_dir.path().join("real"))?;
        let link = temp_dir.path().join("link");
        std::os::unix::fs::symlink("real", &link)?;

        let resolved = PathKey::resolve(link.join("a.txt"))?;
        std::fs::remove_dir(temp_dir.path().join("real"))?;

        assert_eq!(PathKey::locate(link.join("a.txt"))?, resolved);
        Ok(())
    }

    #[test]
    fn test_from_event_matches_resolved_key() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let resolved = PathKey::resolve(temp_dir.path().join("evt.txt"))?;

        // The native layer reports paths under the canonical directory
        let reported = PathKey::from_event(resolved.to_path_buf());
        assert_eq!(resolved, reported);
        Ok(())
    }

    #[test]
    fn test_normalize_folds_parent_components() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
    }

    #[cfg(windows)]
    #[test]
    fn test_identity_ignores_case_on_windows() {
        let a = PathKey::from_event(r"C:\Temp\File.TXT");
        let b = PathKey::from_event(r"c:\temp\file.txt");
        assert_eq!(a, b);
    }
}
