/*!
 * Lexical path helpers for tree keys and manifest records
 *
 * Keys throughout the core are leaf-relative: a path rendered relative to the
 * parent of its declared root, so the root's own basename stays as the first
 * segment. `root.join(key)` must reconstruct the original absolute path.
 */

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: collapse `.` segments, resolve `..` against
/// preceding segments, unify separators. Never touches the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {
                    // `..` directly under the root stays at the root
                }
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    let mut normalized = PathBuf::new();
    for part in parts {
        normalized.push(part.as_os_str());
    }

    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// Leaf-relative key of a declared root: the path relative to its own parent,
/// which is the basename for any non-degenerate path.
pub fn leaf_key(path: &Path) -> PathBuf {
    let normalized = normalize(path);
    match normalized.file_name() {
        Some(name) => PathBuf::from(name),
        None => normalized,
    }
}

/// Normalized path split into plain segments (used by the deletion policy)
pub fn split_parts(path: &Path) -> Vec<OsString> {
    normalize(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_os_string()),
            _ => None,
        })
        .collect()
}

/// True when `inner` is lexically inside `outer` (or equal to it)
pub fn is_ancestor(outer: &Path, inner: &Path) -> bool {
    normalize(inner).starts_with(normalize(outer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_dots() {
        assert_eq!(normalize(Path::new("/a/./b//c")), PathBuf::from("/a/b/c"));
        assert_eq!(normalize(Path::new("a/b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("./a")), PathBuf::from("a"));
        assert_eq!(normalize(Path::new(".")), PathBuf::from("."));
    }

    #[test]
    fn test_normalize_keeps_leading_parent_dirs() {
        assert_eq!(normalize(Path::new("../a")), PathBuf::from("../a"));
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_normalize_parent_at_root() {
        assert_eq!(normalize(Path::new("/../a")), PathBuf::from("/a"));
    }

    #[test]
    fn test_leaf_key_is_basename() {
        assert_eq!(leaf_key(Path::new("/data/docs")), PathBuf::from("docs"));
        assert_eq!(leaf_key(Path::new("/data/docs/")), PathBuf::from("docs"));
        assert_eq!(leaf_key(Path::new("file.txt")), PathBuf::from("file.txt"));
    }

    #[test]
    fn test_leaf_key_round_trip() {
        // join(parent(root), key) reconstructs the original path
        let root = Path::new("/data/docs");
        let key = leaf_key(root);
        assert_eq!(root.parent().unwrap().join(&key), root);
    }

    #[test]
    fn test_split_parts() {
        assert_eq!(
            split_parts(Path::new("/a/b/c.txt")),
            vec![
                OsString::from("a"),
                OsString::from("b"),
                OsString::from("c.txt")
            ]
        );
        assert_eq!(
            split_parts(Path::new("b/./c")),
            vec![OsString::from("b"), OsString::from("c")]
        );
    }

    #[test]
    fn test_is_ancestor() {
        assert!(is_ancestor(Path::new("/a/b"), Path::new("/a/b/c")));
        assert!(is_ancestor(Path::new("/a/b"), Path::new("/a/b")));
        assert!(!is_ancestor(Path::new("/a/b"), Path::new("/a/bc")));
        assert!(!is_ancestor(Path::new("/a/b/c"), Path::new("/a/b")));
    }
}
