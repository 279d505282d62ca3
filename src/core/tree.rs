/*!
 * Filesystem tree model and the parallel tree walker
 *
 * Trees are partitioned by classification and keyed by leaf-relative path;
 * `root.join(key)` reconstructs the absolute path of every entry.
 */

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::core::control::{ControlBus, WorkerSignal};
use crate::core::paths;
use crate::stats::BackupStats;

/// Idle timeout after which a walker terminates
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Recursion bound; guards against symlink cycles under follow_symlinks
pub const MAX_DEPTH: usize = 256;

/// Filesystem classification. Symlinks stay distinct from files because copy
/// semantics differ in preserve mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Unknown,
}

/// Value for file, symlink and unknown partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Absolute root directory the key is relative to
    pub root: PathBuf,
}

/// Value for the directory partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirNode {
    pub root: PathBuf,
    /// True iff enumeration at discovery time yielded zero children
    pub empty: bool,
    /// Unix permission bits, where available
    pub mode: Option<u32>,
}

/// One emission from a walker
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub rel: PathBuf,
    pub root: PathBuf,
    pub kind: EntryKind,
    pub empty: bool,
    pub mode: Option<u32>,
}

/// Pending enumeration: (relative dir under root, absolute root, depth)
pub type WalkItem = (PathBuf, PathBuf, usize);

/// In-memory classification of one side of the backup
#[derive(Debug, Clone, Default)]
pub struct Tree {
    pub files: BTreeMap<PathBuf, FileNode>,
    pub dirs: BTreeMap<PathBuf, DirNode>,
    pub symlinks: BTreeMap<PathBuf, FileNode>,
    pub unknown: BTreeMap<PathBuf, FileNode>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len() + self.symlinks.len() + self.unknown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fold a walker emission into the matching partition
    pub fn insert(&mut self, entry: ParsedEntry) {
        match entry.kind {
            EntryKind::File => {
                self.files.insert(entry.rel, FileNode { root: entry.root });
            }
            EntryKind::Dir => {
                self.dirs.insert(
                    entry.rel,
                    DirNode {
                        root: entry.root,
                        empty: entry.empty,
                        mode: entry.mode,
                    },
                );
            }
            EntryKind::Symlink => {
                self.symlinks.insert(entry.rel, FileNode { root: entry.root });
            }
            EntryKind::Unknown => {
                self.unknown.insert(entry.rel, FileNode { root: entry.root });
            }
        }
    }

    /// Membership test in the partition matching `kind`
    pub fn contains(&self, kind: EntryKind, rel: &Path) -> bool {
        match kind {
            EntryKind::File => self.files.contains_key(rel),
            EntryKind::Dir => self.dirs.contains_key(rel),
            EntryKind::Symlink => self.symlinks.contains_key(rel),
            EntryKind::Unknown => self.unknown.contains_key(rel),
        }
    }
}

/// Classify a declared root the way the walker classifies children, following
/// symlinks so a link root mirrors its target's kind
pub fn classify_root(path: &Path) -> EntryKind {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => EntryKind::File,
        Ok(meta) if meta.is_dir() => EntryKind::Dir,
        _ => EntryKind::Unknown,
    }
}

/// Probe a directory once for emptiness; failures read as non-empty
pub fn probe_dir_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut iter) => iter.next().is_none(),
        Err(_) => false,
    }
}

/// Unix permission bits of a directory, where the platform exposes them
pub fn dir_mode(path: &Path) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).ok().map(|m| m.permissions().mode())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        None
    }
}

/// Tree walker worker body
///
/// Dequeues pending directories, classifies every child, emits it on
/// `parsed_tx` and requeues non-empty subdirectories on `work_tx`. Exits on
/// queue idle timeout or when the bus reads EXIT. Enumeration failures are
/// logged and skip the single directory, never the worker.
pub fn tree_walker(
    work_rx: Receiver<WalkItem>,
    work_tx: Sender<WalkItem>,
    parsed_tx: Sender<ParsedEntry>,
    ignore: Arc<HashSet<PathBuf>>,
    follow_symlinks: bool,
    stats: Arc<BackupStats>,
    bus: Arc<ControlBus>,
) {
    use std::sync::atomic::Ordering;

    loop {
        if bus.checkpoint() == WorkerSignal::Exit {
            debug!("tree walker exited upon request");
            return;
        }

        let (parent_rel, root, depth) = match work_rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(item) => item,
            Err(_) => {
                debug!("no more directories to parse, walker exited");
                return;
            }
        };

        let parent_abs = root.join(&parent_rel);
        let reader = match fs::read_dir(&parent_abs) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Error parsing {} tree: {}", parent_abs.display(), e);
                continue;
            }
        };

        for child in reader {
            let child = match child {
                Ok(child) => child,
                Err(e) => {
                    error!("Error iterating next path: {}", e);
                    continue;
                }
            };

            let child_abs = child.path();
            if ignore.contains(&paths::normalize(&child_abs)) {
                continue;
            }

            let child_rel = if parent_rel.as_os_str().is_empty() {
                PathBuf::from(child.file_name())
            } else {
                parent_rel.join(child.file_name())
            };

            let file_type = match child.file_type() {
                Ok(file_type) => file_type,
                Err(e) => {
                    error!("Error parsing {} path: {}", child_abs.display(), e);
                    continue;
                }
            };

            if file_type.is_symlink() && !follow_symlinks {
                emit(&parsed_tx, child_rel, &root, EntryKind::Symlink, false, None);
                stats.tree_symlinks.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            // From here on symlinks read as their targets
            let kind = if file_type.is_symlink() {
                match fs::metadata(&child_abs) {
                    Ok(meta) if meta.is_file() => EntryKind::File,
                    Ok(meta) if meta.is_dir() => EntryKind::Dir,
                    _ => EntryKind::Unknown,
                }
            } else if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::Unknown
            };

            match kind {
                EntryKind::File => {
                    emit(&parsed_tx, child_rel, &root, EntryKind::File, false, None);
                    stats.tree_files.fetch_add(1, Ordering::Relaxed);
                }
                EntryKind::Dir => {
                    let empty = probe_dir_empty(&child_abs);
                    let mode = dir_mode(&child_abs);
                    emit(&parsed_tx, child_rel.clone(), &root, EntryKind::Dir, empty, mode);
                    stats.tree_dirs.fetch_add(1, Ordering::Relaxed);

                    if !empty {
                        if depth + 1 >= MAX_DEPTH {
                            error!(
                                "Maximum traversal depth reached at {}, not descending",
                                child_abs.display()
                            );
                        } else {
                            let _ = work_tx.send((child_rel, root.clone(), depth + 1));
                        }
                    }
                }
                _ => {
                    emit(&parsed_tx, child_rel, &root, EntryKind::Unknown, false, None);
                    // Unknown paths count as files viewed
                    stats.tree_files.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn emit(
    parsed_tx: &Sender<ParsedEntry>,
    rel: PathBuf,
    root: &Path,
    kind: EntryKind,
    empty: bool,
    mode: Option<u32>,
) {
    let _ = parsed_tx.send(ParsedEntry {
        rel,
        root: root.to_path_buf(),
        kind,
        empty,
        mode,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread;
    use tempfile::tempdir;

    fn run_walkers(
        seeds: Vec<WalkItem>,
        ignore: HashSet<PathBuf>,
        follow_symlinks: bool,
        workers: usize,
    ) -> (Tree, Arc<BackupStats>) {
        let (work_tx, work_rx) = unbounded();
        let (parsed_tx, parsed_rx) = unbounded();
        let stats = Arc::new(BackupStats::new());
        let bus = Arc::new(ControlBus::new());
        let ignore = Arc::new(ignore);

        for seed in seeds {
            work_tx.send(seed).unwrap();
        }

        let mut handles = vec![];
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let work_tx = work_tx.clone();
            let parsed_tx = parsed_tx.clone();
            let ignore = ignore.clone();
            let stats = stats.clone();
            let bus = bus.clone();
            handles.push(thread::spawn(move || {
                tree_walker(work_rx, work_tx, parsed_tx, ignore, follow_symlinks, stats, bus)
            }));
        }
        drop(work_tx);
        drop(parsed_tx);

        let mut tree = Tree::new();
        for entry in parsed_rx {
            tree.insert(entry);
        }
        for handle in handles {
            handle.join().unwrap();
        }
        (tree, stats)
    }

    #[test]
    fn test_walker_classifies_and_recurses() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub/inner")).unwrap();
        fs::create_dir(root.join("hollow")).unwrap();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("sub/b.txt"), b"b").unwrap();
        fs::write(root.join("sub/inner/c.txt"), b"c").unwrap();

        let (tree, stats) = run_walkers(
            vec![(PathBuf::new(), root.to_path_buf(), 0)],
            HashSet::new(),
            false,
            2,
        );

        assert!(tree.files.contains_key(Path::new("a.txt")));
        assert!(tree.files.contains_key(Path::new("sub/b.txt")));
        assert!(tree.files.contains_key(Path::new("sub/inner/c.txt")));
        assert!(!tree.dirs[Path::new("sub")].empty);
        assert!(!tree.dirs[Path::new("sub/inner")].empty);
        assert!(tree.dirs[Path::new("hollow")].empty);

        assert_eq!(stats.tree_files.load(std::sync::atomic::Ordering::Relaxed), 3);
        assert_eq!(stats.tree_dirs.load(std::sync::atomic::Ordering::Relaxed), 3);

        // Round-trip invariant: join(root, key) resolves to an existing path
        for (key, node) in &tree.files {
            assert!(node.root.join(key).exists());
        }
    }

    #[test]
    fn test_walker_ignores_listed_paths() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("keep.txt"), b"k").unwrap();
        fs::write(root.join("drop.txt"), b"d").unwrap();

        let mut ignore = HashSet::new();
        ignore.insert(paths::normalize(&root.join("drop.txt")));

        let (tree, _) = run_walkers(
            vec![(PathBuf::new(), root.to_path_buf(), 0)],
            ignore,
            false,
            1,
        );

        assert!(tree.files.contains_key(Path::new("keep.txt")));
        assert!(!tree.files.contains_key(Path::new("drop.txt")));
    }

    #[cfg(unix)]
    #[test]
    fn test_walker_preserve_mode_emits_symlinks() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("target.txt"), b"t").unwrap();
        std::os::unix::fs::symlink(root.join("target.txt"), root.join("link.txt")).unwrap();

        let (tree, stats) = run_walkers(
            vec![(PathBuf::new(), root.to_path_buf(), 0)],
            HashSet::new(),
            false,
            1,
        );

        assert!(tree.files.contains_key(Path::new("target.txt")));
        assert!(tree.symlinks.contains_key(Path::new("link.txt")));
        assert_eq!(
            stats.tree_symlinks.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_walker_follow_mode_resolves_symlinks() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("target.txt"), b"t").unwrap();
        std::os::unix::fs::symlink(root.join("target.txt"), root.join("link.txt")).unwrap();

        let (tree, _) = run_walkers(
            vec![(PathBuf::new(), root.to_path_buf(), 0)],
            HashSet::new(),
            true,
            1,
        );

        assert!(tree.files.contains_key(Path::new("link.txt")));
        assert!(tree.symlinks.is_empty());
    }

    #[test]
    fn test_walker_root_relative_to_parent_keys() {
        // Input-side seeding: root is the parent of the declared entry, so
        // the entry's basename is the first segment of every key
        let dir = tempdir().unwrap();
        let declared = dir.path().join("docs");
        fs::create_dir(&declared).unwrap();
        fs::write(declared.join("a.txt"), b"a").unwrap();

        let (tree, _) = run_walkers(
            vec![(PathBuf::from("docs"), dir.path().to_path_buf(), 0)],
            HashSet::new(),
            false,
            1,
        );

        assert!(tree.files.contains_key(Path::new("docs/a.txt")));
    }

    #[test]
    fn test_tree_contains_by_kind() {
        let mut tree = Tree::new();
        tree.insert(ParsedEntry {
            rel: PathBuf::from("a"),
            root: PathBuf::from("/r"),
            kind: EntryKind::File,
            empty: false,
            mode: None,
        });

        assert!(tree.contains(EntryKind::File, Path::new("a")));
        assert!(!tree.contains(EntryKind::Dir, Path::new("a")));
        assert!(!tree.contains(EntryKind::Symlink, Path::new("a")));
    }

    #[test]
    fn test_classify_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("f"), b"x").unwrap();
        assert_eq!(classify_root(&dir.path().join("f")), EntryKind::File);
        assert_eq!(classify_root(dir.path()), EntryKind::Dir);
        assert_eq!(classify_root(&dir.path().join("nope")), EntryKind::Unknown);
    }
}
