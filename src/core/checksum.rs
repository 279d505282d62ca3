/*!
 * Streaming digest calculation and the digest pool worker
 */

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use tracing::{debug, error};

use crate::config::ChecksumAlg;
use crate::core::control::{ControlBus, WorkerSignal};
use crate::error::Result;
use crate::stats::BackupStats;

/// Block size (in bytes) for streaming digest computation
pub const BLOCK_SIZE: usize = 4096;

/// Idle timeout after which a digest worker terminates
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Streaming hasher that computes a digest incrementally
pub enum StreamingHasher {
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl StreamingHasher {
    pub fn new(alg: ChecksumAlg) -> Self {
        match alg {
            ChecksumAlg::Md5 => Self::Md5(Md5::new()),
            ChecksumAlg::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlg::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hexadecimal digest
    pub fn finalize(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Digest a whole file in [`BLOCK_SIZE`] blocks
pub fn digest_file(path: &Path, alg: ChecksumAlg) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = StreamingHasher::new(alg);
    let mut buffer = [0u8; BLOCK_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Digest a file with a control poll between blocks. Returns `Ok(None)` when
/// EXIT was observed mid-stream and the file was abandoned.
fn digest_file_controlled(
    path: &Path,
    alg: ChecksumAlg,
    bus: &ControlBus,
) -> Result<Option<String>> {
    let mut file = File::open(path)?;
    let mut hasher = StreamingHasher::new(alg);
    let mut buffer = [0u8; BLOCK_SIZE];

    loop {
        if bus.checkpoint() == WorkerSignal::Exit {
            return Ok(None);
        }
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(Some(hasher.finalize()))
}

/// One computed digest, keyed like the tree it came from
#[derive(Debug, Clone)]
pub struct DigestOutput {
    pub rel: PathBuf,
    pub root: PathBuf,
    pub digest: String,
}

/// Append-mode manifest target shared by the pool's workers
#[derive(Clone)]
pub struct ManifestSink {
    pub path: PathBuf,
    pub lock: Arc<Mutex<()>>,
    /// Record absolute paths instead of tree-relative keys
    pub as_absolute: bool,
}

/// Where a digest worker delivers results. Both sinks may be active at once.
#[derive(Clone)]
pub struct DigestSink {
    pub channel: Option<Sender<DigestOutput>>,
    pub manifest: Option<ManifestSink>,
}

impl DigestSink {
    pub fn channel(tx: Sender<DigestOutput>) -> Self {
        Self {
            channel: Some(tx),
            manifest: None,
        }
    }

    pub fn manifest(path: PathBuf, lock: Arc<Mutex<()>>, as_absolute: bool) -> Self {
        Self {
            channel: None,
            manifest: Some(ManifestSink {
                path,
                lock,
                as_absolute,
            }),
        }
    }
}

/// Digest pool worker body
///
/// Pulls `(relative_path, root)` items, streams each file into the selected
/// algorithm and delivers the digest through the sink. Exits on queue idle
/// timeout or when the bus reads EXIT.
pub fn digest_worker(
    input: Receiver<(PathBuf, PathBuf)>,
    sink: DigestSink,
    alg: ChecksumAlg,
    stats: Arc<BackupStats>,
    bus: Arc<ControlBus>,
) {
    use std::sync::atomic::Ordering;

    loop {
        if bus.checkpoint() == WorkerSignal::Exit {
            debug!("digest worker exited upon request");
            return;
        }

        let (rel, root) = match input.recv_timeout(QUEUE_TIMEOUT) {
            Ok(item) => item,
            Err(_) => {
                debug!("no more files to digest, worker exited");
                return;
            }
        };

        let abs = root.join(&rel);

        // Vanished between walk and digest
        if !abs.exists() {
            continue;
        }

        match digest_file_controlled(&abs, alg, &bus) {
            Ok(Some(digest)) => {
                if let Some(ref manifest) = sink.manifest {
                    let recorded = if manifest.as_absolute { abs.clone() } else { rel.clone() };
                    if let Err(e) = append_manifest_line(manifest, &digest, &recorded) {
                        error!("Error writing checksum for {}: {}", abs.display(), e);
                        stats.digest_err.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                }
                if let Some(ref tx) = sink.channel {
                    let _ = tx.send(DigestOutput { rel, root, digest });
                }
                stats.digest_ok.fetch_add(1, Ordering::Relaxed);
            }
            Ok(None) => {
                debug!("digest worker exited mid-stream upon request");
                return;
            }
            Err(e) => {
                error!("Error calculating checksum for {}: {}", abs.display(), e);
                stats.digest_err.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn append_manifest_line(sink: &ManifestSink, digest: &str, path: &Path) -> Result<()> {
    let _guard = sink.lock.lock().unwrap();
    let mut file = OpenOptions::new().create(true).append(true).open(&sink.path)?;
    writeln!(file, "{} *{}", digest, path.display())?;
    Ok(())
}
