/*!
 * Deletion pool: removes mirror entries the inputs no longer track
 */

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, error};

use crate::core::control::{ControlBus, WorkerSignal};
use crate::core::paths;
use crate::core::tree::{EntryKind, Tree};
use crate::stats::BackupStats;

/// Idle timeout after which a deletion worker terminates
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// One mirror-side entry to reconcile
#[derive(Debug, Clone)]
pub struct DeleteItem {
    pub kind: EntryKind,
    pub rel: PathBuf,
    pub root: PathBuf,
    pub empty: bool,
}

/// True when `child`, walked as a suffix continuation of `parent`, begins at
/// `parent`'s terminal segment.
///
/// Walking `parent` while greedily advancing through `child`, the final
/// parent segment must align with some consumed child segment. Used to decide
/// whether a mirror-relative path lies under a skipped absolute input path.
pub fn is_suffix_continuation(parent: &[OsString], child: &[OsString]) -> bool {
    if parent.is_empty() || child.is_empty() {
        return false;
    }

    let mut child_idx = 0usize;
    let mut last_match: Option<usize> = None;

    for (i, parent_part) in parent.iter().enumerate() {
        if parent_part == &child[child_idx] {
            child_idx += 1;
            last_match = Some(i);
            if child_idx >= child.len() {
                break;
            }
        } else {
            child_idx = 0;
            last_match = None;
        }
    }

    last_match == Some(parent.len() - 1)
}

/// Deletion pool worker body
///
/// Consumes mirror tree entries and removes those absent from the input tree,
/// honoring the skip / delete_skipped policy. Deletions are idempotent with
/// respect to filesystem observation: entries that vanish under a concurrent
/// worker are skipped, not counted as errors.
pub fn delete_worker(
    queue_rx: Receiver<DeleteItem>,
    input_tree: Arc<Tree>,
    skipped_parts: Arc<Vec<Vec<OsString>>>,
    delete_skipped: bool,
    stats: Arc<BackupStats>,
    bus: Arc<ControlBus>,
) {
    use std::sync::atomic::Ordering;

    loop {
        if bus.checkpoint() == WorkerSignal::Exit {
            debug!("delete worker exited upon request");
            return;
        }

        let item = match queue_rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(item) => item,
            Err(_) => {
                debug!("no more entries to reconcile, delete worker exited");
                return;
            }
        };

        let abs = item.root.join(&item.rel);

        // Already gone (possibly to a sibling worker)
        if fs::symlink_metadata(&abs).is_err() {
            continue;
        }

        let rel_parts = paths::split_parts(&item.rel);
        let in_skipped = skipped_parts
            .iter()
            .any(|skipped| is_suffix_continuation(skipped, &rel_parts));

        let mut delete_flag = true;
        if in_skipped || input_tree.contains(item.kind, &item.rel) {
            if !in_skipped || !delete_skipped {
                delete_flag = false;
            }
        }

        if !delete_flag {
            continue;
        }

        match remove_entry(&abs, item.kind, item.empty) {
            Ok(true) => {
                stats.deleted_ok.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                // Vanished mid-removal; nothing to count
            }
            Err(e) => {
                error!("Error deleting {}: {}", item.rel.display(), e);
                stats.deleted_err.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Remove a single mirror entry. `Ok(false)` means it disappeared before the
/// removal landed.
fn remove_entry(abs: &Path, kind: EntryKind, empty: bool) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(abs) {
        Ok(meta) => meta,
        Err(_) => return Ok(false),
    };

    // Remove only the link itself, never what it points at
    if meta.file_type().is_symlink() {
        return swallow_missing(fs::remove_file(abs));
    }

    match kind {
        EntryKind::File | EntryKind::Symlink => swallow_missing(fs::remove_file(abs)),
        EntryKind::Dir => {
            if empty {
                swallow_missing(fs::remove_dir(abs))
            } else {
                // Best-effort subtree removal, then the directory itself
                let _ = fs::remove_dir_all(abs);
                if fs::symlink_metadata(abs).is_ok() {
                    swallow_missing(fs::remove_dir(abs))
                } else {
                    Ok(true)
                }
            }
        }
        EntryKind::Unknown => {
            if fs::remove_file(abs).is_ok() {
                return Ok(true);
            }
            let _ = fs::remove_dir_all(abs);
            if fs::symlink_metadata(abs).is_ok() {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    "cannot be deleted either as a file or as a directory",
                ))
            } else {
                Ok(true)
            }
        }
    }
}

fn swallow_missing(result: io::Result<()>) -> io::Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
