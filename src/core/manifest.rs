/*!
 * Digest manifest codec
 *
 * The manifest is a UTF-8 sidecar at the destination root, one record per
 * line: `<digest_hex> *<path>`. Malformed lines are skipped on read; a
 * complete read failure yields an empty record set.
 */

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::ChecksumAlg;
use crate::core::paths;
use crate::error::Result;

/// One digest record: the root the key is relative to, plus the digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestRecord {
    pub root: PathBuf,
    pub digest: String,
}

/// Digest records keyed by leaf-relative path. Ordered so manifest writes are
/// deterministic.
pub type DigestMap = BTreeMap<PathBuf, DigestRecord>;

/// Parse digest records from a manifest file
///
/// `root` is recorded on every parsed entry; paths inside the file must be
/// relative to it. Duplicate keys: last one wins.
pub fn parse(manifest_path: &Path, root: &Path, alg: ChecksumAlg) -> DigestMap {
    if !manifest_path.exists() {
        return DigestMap::new();
    }

    let file = match File::open(manifest_path) {
        Ok(file) => file,
        Err(e) => {
            error!("Error opening manifest {}: {}", manifest_path.display(), e);
            return DigestMap::new();
        }
    };

    info!("Parsing checksums from {}", manifest_path.display());

    let mut records = DigestMap::new();
    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Error reading manifest {}: {}", manifest_path.display(), e);
                return DigestMap::new();
            }
        };

        if let Some((key, record)) = parse_line(&line, root, alg) {
            records.insert(key, record);
        }
    }

    info!("Found {} checksums", records.len());
    records
}

/// Parse a single manifest line; `None` for anything malformed
fn parse_line(line: &str, root: &Path, alg: ChecksumAlg) -> Option<(PathBuf, DigestRecord)> {
    let line = line.trim_matches(&['\n', '\r'][..]).trim();
    if line.is_empty() {
        return None;
    }

    // Records always start with a hex digit; anything else is a comment or
    // corruption
    if !line.chars().next()?.is_ascii_hexdigit() {
        return None;
    }

    let mut fragments = line.splitn(2, '*');
    let digest = fragments.next()?.trim();
    // The filename keeps any '*' it contains
    let filepath = fragments.next()?;

    if digest.len() != alg.hex_len() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    if filepath.is_empty() {
        return None;
    }

    let key = paths::normalize(Path::new(filepath));
    let record = DigestRecord {
        root: root.to_path_buf(),
        digest: digest.to_ascii_lowercase(),
    };

    Some((key, record))
}

/// Write records to `manifest_path`, truncating it first
///
/// One line per record in iteration order: `digest SP '*' relative_path LF`.
pub fn write(manifest_path: &Path, records: &DigestMap) -> Result<()> {
    let file = File::create(manifest_path)?;
    let mut writer = BufWriter::new(file);

    for (key, record) in records {
        writeln!(writer, "{} *{}", record.digest, key.display())?;
    }

    writer.flush()?;
    Ok(())
}
