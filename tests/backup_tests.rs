/*!
 * Integration tests for the backup pipeline
 *
 * Covers the mirror reconciliation semantics end to end: fresh backups,
 * incremental re-runs, deletion policy, skip handling and manifest output.
 */

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::tempdir;
use walkdir::WalkDir;

use umbra::config::{BackupConfig, ChecksumAlg, InputEntry, WorkloadProfile};
use umbra::core::checksum::digest_file;
use umbra::core::{manifest, Backupper, ExitCode};

/// MD5 of the bytes "hello"
const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

fn base_config(inputs: Vec<InputEntry>, save_to: &Path) -> BackupConfig {
    BackupConfig {
        input_paths: inputs,
        save_to: save_to.to_path_buf(),
        checksum_alg: ChecksumAlg::Md5,
        workload_profile: WorkloadProfile::Normal,
        ..Default::default()
    }
}

fn run_backup(config: BackupConfig) -> (ExitCode, std::sync::Arc<umbra::BackupStats>) {
    let mut backupper = Backupper::new(config);
    let stats = backupper.stats();
    let code = backupper.run_backup();
    (code, stats)
}

fn counter(value: &std::sync::atomic::AtomicU64) -> u64 {
    value.load(std::sync::atomic::Ordering::Relaxed)
}

#[test]
fn test_single_file_backup() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a.txt"), b"hello").unwrap();

    let (code, stats) = run_backup(base_config(
        vec![InputEntry::new(src.join("a.txt"), false)],
        &dst,
    ));

    assert_eq!(code, ExitCode::Success);
    assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"hello");
    assert_eq!(counter(&stats.copied_ok), 1);

    let manifest_content = fs::read_to_string(dst.join("checksums.md5")).unwrap();
    assert_eq!(manifest_content, format!("{} *a.txt\n", HELLO_MD5));
}

#[test]
fn test_incremental_rerun_copies_nothing() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a.txt"), b"hello").unwrap();

    let config = base_config(vec![InputEntry::new(src.join("a.txt"), false)], &dst);

    let (code, _) = run_backup(config.clone());
    assert_eq!(code, ExitCode::Success);
    let manifest_before = fs::read(dst.join("checksums.md5")).unwrap();

    let (code, stats) = run_backup(config);
    assert_eq!(code, ExitCode::Success);
    assert_eq!(counter(&stats.copied_ok), 0);
    assert_eq!(counter(&stats.deleted_ok), 0);
    assert_eq!(counter(&stats.dirs_created_ok), 0);

    let manifest_after = fs::read(dst.join("checksums.md5")).unwrap();
    assert_eq!(manifest_before, manifest_after);
}

#[test]
fn test_directory_backup_keeps_basename_as_first_segment() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir_all(src.join("docs/sub")).unwrap();
    fs::write(src.join("docs/a.txt"), b"alpha").unwrap();
    fs::write(src.join("docs/sub/b.txt"), b"beta").unwrap();

    let (code, _) = run_backup(base_config(
        vec![InputEntry::new(src.join("docs"), false)],
        &dst,
    ));

    assert_eq!(code, ExitCode::Success);
    // The declared root's basename is the first mirror segment
    assert_eq!(fs::read(dst.join("docs/a.txt")).unwrap(), b"alpha");
    assert_eq!(fs::read(dst.join("docs/sub/b.txt")).unwrap(), b"beta");
}

#[test]
fn test_mirror_completeness_digests_match() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir_all(src.join("data/nested")).unwrap();
    fs::write(src.join("data/one.bin"), vec![1u8; 10_000]).unwrap();
    fs::write(src.join("data/nested/two.bin"), vec![2u8; 5_000]).unwrap();
    fs::write(src.join("data/nested/three.txt"), b"three").unwrap();

    let (code, _) = run_backup(base_config(
        vec![InputEntry::new(src.join("data"), false)],
        &dst,
    ));
    assert_eq!(code, ExitCode::Success);

    // Independent traversal: every input file's digest matches its mirror
    for entry in WalkDir::new(src.join("data")) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(&src).unwrap();
        let mirrored = dst.join(rel);
        assert!(mirrored.exists(), "missing mirror entry for {:?}", rel);
        assert_eq!(
            digest_file(entry.path(), ChecksumAlg::Md5).unwrap(),
            digest_file(&mirrored, ChecksumAlg::Md5).unwrap()
        );
    }
}

#[test]
fn test_manifest_faithfulness() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir_all(src.join("docs")).unwrap();
    fs::write(src.join("docs/a.txt"), b"aaa").unwrap();
    fs::write(src.join("docs/b.txt"), b"bbb").unwrap();

    let (code, _) = run_backup(base_config(
        vec![InputEntry::new(src.join("docs"), false)],
        &dst,
    ));
    assert_eq!(code, ExitCode::Success);

    let records = manifest::parse(&dst.join("checksums.md5"), &dst, ChecksumAlg::Md5);
    assert!(!records.is_empty());
    for (rel, record) in &records {
        let resolved = dst.join(rel);
        assert_eq!(
            digest_file(&resolved, ChecksumAlg::Md5).unwrap(),
            record.digest,
            "stale manifest record for {:?}",
            rel
        );
    }
}

#[test]
fn test_deletion_policy_removes_untracked() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a"), b"keep me").unwrap();
    fs::write(src.join("b"), b"drop me").unwrap();

    // Initial mirror of both files
    let (code, _) = run_backup(base_config(
        vec![
            InputEntry::new(src.join("a"), false),
            InputEntry::new(src.join("b"), false),
        ],
        &dst,
    ));
    assert_eq!(code, ExitCode::Success);
    assert!(dst.join("b").exists());

    // Input reduced to `a` only, deletion enabled
    let mut config = base_config(vec![InputEntry::new(src.join("a"), false)], &dst);
    config.delete_data = true;
    let (code, stats) = run_backup(config);

    assert_eq!(code, ExitCode::Success);
    assert!(!dst.join("b").exists());
    assert_eq!(fs::read(dst.join("a")).unwrap(), b"keep me");
    assert_eq!(counter(&stats.deleted_ok), 1);

    // No stale record for the deleted entry survives into the manifest
    let records = manifest::parse(&dst.join("checksums.md5"), &dst, ChecksumAlg::Md5);
    assert!(records.contains_key(Path::new("a")));
    assert!(!records.contains_key(Path::new("b")));
}

#[test]
fn test_skipped_entry_never_copied_and_preserved() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a"), b"active").unwrap();
    fs::write(src.join("b"), b"skipped input").unwrap();

    // Pre-existing mirror entry under the skipped input
    fs::create_dir(&dst).unwrap();
    fs::write(dst.join("b"), b"previous backup of b").unwrap();

    let mut config = base_config(
        vec![
            InputEntry::new(src.join("a"), false),
            InputEntry::new(src.join("b"), true),
        ],
        &dst,
    );
    config.delete_data = true;
    config.delete_skipped = false;

    let (code, _) = run_backup(config);

    assert_eq!(code, ExitCode::Success);
    assert_eq!(fs::read(dst.join("a")).unwrap(), b"active");
    // Preserved, not refreshed from the input side
    assert_eq!(fs::read(dst.join("b")).unwrap(), b"previous backup of b");
}

#[test]
fn test_delete_skipped_removes_prior_mirror() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a"), b"active").unwrap();
    fs::write(src.join("b"), b"skipped input").unwrap();

    fs::create_dir(&dst).unwrap();
    fs::write(dst.join("b"), b"previous backup of b").unwrap();

    let mut config = base_config(
        vec![
            InputEntry::new(src.join("a"), false),
            InputEntry::new(src.join("b"), true),
        ],
        &dst,
    );
    config.delete_data = true;
    config.delete_skipped = true;

    let (code, _) = run_backup(config);

    assert_eq!(code, ExitCode::Success);
    assert!(!dst.join("b").exists());
}

#[test]
fn test_duplicate_inputs_fail_before_any_work() {
    let dir = tempdir().unwrap();
    let dst = dir.path().join("dst");
    fs::create_dir_all(dir.path().join("one/docs")).unwrap();
    fs::create_dir_all(dir.path().join("two/docs")).unwrap();

    let (code, stats) = run_backup(base_config(
        vec![
            InputEntry::new(dir.path().join("one/docs"), false),
            InputEntry::new(dir.path().join("two/docs"), false),
        ],
        &dst,
    ));

    assert_eq!(code, ExitCode::Error);
    assert!(!dst.exists());
    assert_eq!(counter(&stats.tree_files), 0);
    assert_eq!(counter(&stats.tree_dirs), 0);
}

#[test]
fn test_create_empty_dirs_stage() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir_all(src.join("docs/hollow")).unwrap();
    fs::write(src.join("docs/a.txt"), b"a").unwrap();

    let mut config = base_config(vec![InputEntry::new(src.join("docs"), false)], &dst);
    config.create_empty_dirs = true;

    let (code, stats) = run_backup(config.clone());
    assert_eq!(code, ExitCode::Success);
    assert!(dst.join("docs/hollow").is_dir());
    assert!(counter(&stats.dirs_created_ok) >= 1);

    // Idempotence: the second run creates nothing
    let (code, stats) = run_backup(config);
    assert_eq!(code, ExitCode::Success);
    assert_eq!(counter(&stats.dirs_created_ok), 0);
}

#[test]
fn test_changed_file_is_recopied() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a.txt"), b"version one").unwrap();

    let config = base_config(vec![InputEntry::new(src.join("a.txt"), false)], &dst);
    let (code, _) = run_backup(config.clone());
    assert_eq!(code, ExitCode::Success);

    fs::write(src.join("a.txt"), b"version two").unwrap();
    let (code, stats) = run_backup(config);

    assert_eq!(code, ExitCode::Success);
    assert_eq!(counter(&stats.copied_ok), 1);
    assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"version two");
}

#[cfg(unix)]
#[test]
fn test_symlinks_preserved_in_mirror() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir_all(src.join("docs")).unwrap();
    fs::write(src.join("docs/target.txt"), b"t").unwrap();
    std::os::unix::fs::symlink("target.txt", src.join("docs/link.txt")).unwrap();

    let (code, stats) = run_backup(base_config(
        vec![InputEntry::new(src.join("docs"), false)],
        &dst,
    ));

    assert_eq!(code, ExitCode::Success);
    let link = dst.join("docs/link.txt");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("target.txt"));
    assert_eq!(counter(&stats.symlinks_created), 1);

    // The symlink never lands in the manifest; the target does
    let records = manifest::parse(&dst.join("checksums.md5"), &dst, ChecksumAlg::Md5);
    assert!(records.contains_key(Path::new("docs/target.txt")));
    assert!(!records.contains_key(Path::new("docs/link.txt")));
}

#[test]
fn test_tree_sidecar_generated() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir_all(src.join("docs")).unwrap();
    fs::write(src.join("docs/a.txt"), b"a").unwrap();

    let mut config = base_config(vec![InputEntry::new(src.join("docs"), false)], &dst);
    config.generate_tree = true;

    let (code, _) = run_backup(config);
    assert_eq!(code, ExitCode::Success);

    let sidecar = fs::read_to_string(dst.join("tree.txt")).unwrap();
    assert!(sidecar.lines().count() >= 2);
    assert!(sidecar.contains("a.txt"));
}

#[test]
fn test_sha256_manifest_extension_and_digest_length() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a.txt"), b"hello").unwrap();

    let mut config = base_config(vec![InputEntry::new(src.join("a.txt"), false)], &dst);
    config.checksum_alg = ChecksumAlg::Sha256;

    let (code, _) = run_backup(config);
    assert_eq!(code, ExitCode::Success);

    let records = manifest::parse(&dst.join("checksums.sha256"), &dst, ChecksumAlg::Sha256);
    let record = &records[Path::new("a.txt")];
    assert_eq!(record.digest.len(), 64);
    assert!(record.digest.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_recalculate_checksum_rebuilds_manifest() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir(&src).unwrap();
    fs::write(src.join("a.txt"), b"hello").unwrap();

    let mut config = base_config(vec![InputEntry::new(src.join("a.txt"), false)], &dst);
    config.recalculate_checksum = true;

    let (code, _) = run_backup(config.clone());
    assert_eq!(code, ExitCode::Success);

    // Poison the manifest, then re-run: recalculation must overwrite it
    fs::write(
        dst.join("checksums.md5"),
        "00000000000000000000000000000000 *a.txt\n",
    )
    .unwrap();

    let (code, _) = run_backup(config);
    assert_eq!(code, ExitCode::Success);
    let manifest_content = fs::read_to_string(dst.join("checksums.md5")).unwrap();
    assert_eq!(manifest_content, format!("{} *a.txt\n", HELLO_MD5));
}
