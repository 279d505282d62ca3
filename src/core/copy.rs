/*!
 * Copy pool: materializes the mirror from the input tree
 *
 * Files whose input and output digests already match are skipped; everything
 * else is copied, with parent directory chains created on demand carrying the
 * input-side permission modes.
 */

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, error, warn};

use crate::core::control::{ControlBus, WorkerSignal};
use crate::core::manifest::DigestMap;
use crate::core::tree::DirNode;
use crate::error::Result;
use crate::stats::BackupStats;

/// Idle timeout after which a copy worker terminates
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Copy pool worker body
///
/// Pulls `(relative_path, root)` items over the input FILE and SYMLINK
/// partitions. Regular files require a pre-computed input digest; symlinks
/// (preserve mode) are recreated instead of copied. Per-entry failures are
/// logged and counted, never fatal for the pool.
#[allow(clippy::too_many_arguments)]
pub fn copy_worker(
    queue_rx: Receiver<(PathBuf, PathBuf)>,
    digests_in: Arc<DigestMap>,
    digests_out: Arc<DigestMap>,
    input_dirs: Arc<BTreeMap<PathBuf, DirNode>>,
    dest_root: PathBuf,
    follow_symlinks: bool,
    stats: Arc<BackupStats>,
    bus: Arc<ControlBus>,
) {
    use std::sync::atomic::Ordering;

    loop {
        if bus.checkpoint() == WorkerSignal::Exit {
            debug!("copy worker exited upon request");
            return;
        }

        let (rel, root) = match queue_rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(item) => item,
            Err(_) => {
                debug!("no more files to copy, copy worker exited");
                return;
            }
        };

        match copy_entry(
            &rel,
            &root,
            &digests_in,
            &digests_out,
            &input_dirs,
            &dest_root,
            follow_symlinks,
            &stats,
        ) {
            Ok(CopyOutcome::Copied) => {
                stats.copied_ok.fetch_add(1, Ordering::Relaxed);
            }
            Ok(CopyOutcome::LinkCreated) => {
                stats.symlinks_created.fetch_add(1, Ordering::Relaxed);
            }
            Ok(CopyOutcome::Skipped) => {}
            Err(e) => {
                error!("Error copying {}: {}", root.join(&rel).display(), e);
                stats.copied_err.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

enum CopyOutcome {
    Copied,
    LinkCreated,
    Skipped,
}

#[allow(clippy::too_many_arguments)]
fn copy_entry(
    rel: &Path,
    root: &Path,
    digests_in: &DigestMap,
    digests_out: &DigestMap,
    input_dirs: &BTreeMap<PathBuf, DirNode>,
    dest_root: &Path,
    follow_symlinks: bool,
    stats: &BackupStats,
) -> Result<CopyOutcome> {
    let input_abs = root.join(rel);

    // Vanished between walk and copy
    let input_meta = match fs::symlink_metadata(&input_abs) {
        Ok(meta) => meta,
        Err(_) => return Ok(CopyOutcome::Skipped),
    };

    let output_abs = dest_root.join(rel);
    let link_mode = !follow_symlinks && input_meta.file_type().is_symlink();

    if !link_mode {
        let digest_in = match digests_in.get(rel) {
            Some(record) => &record.digest,
            None => {
                // The pool runs strictly after the digest stage, so every
                // regular file must have a digest by now
                error!(
                    "No pre-computed digest for {}, refusing to copy",
                    input_abs.display()
                );
                use std::sync::atomic::Ordering;
                stats.copied_err.fetch_add(1, Ordering::Relaxed);
                return Ok(CopyOutcome::Skipped);
            }
        };

        // Incremental shortcut
        if output_abs.exists() {
            if let Some(record) = digests_out.get(rel) {
                if &record.digest == digest_in {
                    return Ok(CopyOutcome::Skipped);
                }
            }
        }
    }

    if let Some(parent) = output_abs.parent() {
        if !parent.exists() {
            if let Ok(parent_rel) = parent.strip_prefix(dest_root) {
                if !make_dirs(input_dirs, dest_root, parent_rel, stats) {
                    return Ok(CopyOutcome::Skipped);
                }
            }
        }
    }

    if link_mode {
        let target = fs::read_link(&input_abs)?;

        // An equivalent link is already in place
        if fs::symlink_metadata(&output_abs)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
            && fs::read_link(&output_abs).map(|t| t == target).unwrap_or(false)
        {
            return Ok(CopyOutcome::Skipped);
        }

        create_symlink(&target, &output_abs)?;
        return Ok(CopyOutcome::LinkCreated);
    }

    fs::copy(&input_abs, &output_abs)?;
    Ok(CopyOutcome::Copied)
}

/// Materialize the directory chain for `target_rel` under `dest_root`,
/// copying each segment's permission mode from the input directory sub-tree
/// when known. The process umask is neutralized around the creations so the
/// requested modes land verbatim, then restored.
pub fn make_dirs(
    input_dirs: &BTreeMap<PathBuf, DirNode>,
    dest_root: &Path,
    target_rel: &Path,
    stats: &BackupStats,
) -> bool {
    use std::sync::atomic::Ordering;

    let target_abs = dest_root.join(target_rel);
    if target_abs.is_dir() {
        return true;
    }

    let original_umask = neutralize_umask();

    let mut partial = PathBuf::new();
    for component in target_rel.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        partial.push(part);
        let dir_abs = dest_root.join(&partial);

        if dir_abs.is_dir() {
            continue;
        }

        let mode = input_dirs.get(&partial).and_then(|node| node.mode);
        if mode.is_none() {
            warn!(
                "Couldn't find {} directory inside parsed input tree",
                partial.display()
            );
        }

        match create_dir_with_mode(&dir_abs, mode) {
            Ok(()) => {
                stats.dirs_created_ok.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                // A sibling worker may have landed the same segment first
                if dir_abs.is_dir() {
                    continue;
                }
                error!("Error making {} directory: {}", dir_abs.display(), e);
                stats.dirs_created_err.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    restore_umask(original_umask);

    target_abs.is_dir()
}

fn create_dir_with_mode(path: &Path, mode: Option<u32>) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        let mut builder = fs::DirBuilder::new();
        if let Some(mode) = mode {
            builder.mode(mode);
        }
        builder.create(path)
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
        fs::create_dir(path)
    }
}

fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)?;
    }
    #[cfg(windows)]
    {
        if target.is_dir() {
            std::os::windows::fs::symlink_dir(target, link)?;
        } else {
            std::os::windows::fs::symlink_file(target, link)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn neutralize_umask() -> libc::mode_t {
    unsafe { libc::umask(0) }
}

#[cfg(unix)]
fn restore_umask(previous: libc::mode_t) {
    unsafe {
        libc::umask(previous);
    }
}

#[cfg(not(unix))]
fn neutralize_umask() {}

#[cfg(not(unix))]
fn restore_umask(_previous: ()) {}
