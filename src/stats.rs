/*!
 * Run statistics shared across worker pools
 *
 * Every counter is an independent atomic; status renders are non-atomic
 * snapshots and need not be mutually consistent across counters.
 */

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters for a single backup or validation run
#[derive(Debug, Default)]
pub struct BackupStats {
    /// Files observed by the tree walkers (unknown paths count here too)
    pub tree_files: AtomicU64,
    /// Directories observed by the tree walkers
    pub tree_dirs: AtomicU64,
    /// Symlinks observed by the tree walkers (preserve mode only)
    pub tree_symlinks: AtomicU64,

    /// Successful digest computations
    pub digest_ok: AtomicU64,
    /// Failed digest computations
    pub digest_err: AtomicU64,

    /// Files copied into the mirror
    pub copied_ok: AtomicU64,
    /// Per-entry copy failures
    pub copied_err: AtomicU64,
    /// Symlinks recreated inside the mirror
    pub symlinks_created: AtomicU64,

    /// Directories materialized inside the mirror
    pub dirs_created_ok: AtomicU64,
    /// Per-segment directory creation failures
    pub dirs_created_err: AtomicU64,

    /// Mirror entries deleted
    pub deleted_ok: AtomicU64,
    /// Per-entry deletion failures
    pub deleted_err: AtomicU64,

    /// Validation: recomputed digest equals the manifest record
    pub validate_match: AtomicU64,
    /// Validation: digests differ
    pub validate_mismatch: AtomicU64,
    /// Validation: no manifest record for the file
    pub validate_missing: AtomicU64,
}

impl BackupStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every counter to zero (orchestrator, at run start only)
    pub fn reset(&self) {
        self.tree_files.store(0, Ordering::Relaxed);
        self.tree_dirs.store(0, Ordering::Relaxed);
        self.tree_symlinks.store(0, Ordering::Relaxed);
        self.digest_ok.store(0, Ordering::Relaxed);
        self.digest_err.store(0, Ordering::Relaxed);
        self.copied_ok.store(0, Ordering::Relaxed);
        self.copied_err.store(0, Ordering::Relaxed);
        self.symlinks_created.store(0, Ordering::Relaxed);
        self.dirs_created_ok.store(0, Ordering::Relaxed);
        self.dirs_created_err.store(0, Ordering::Relaxed);
        self.deleted_ok.store(0, Ordering::Relaxed);
        self.deleted_err.store(0, Ordering::Relaxed);
        self.validate_match.store(0, Ordering::Relaxed);
        self.validate_mismatch.store(0, Ordering::Relaxed);
        self.validate_missing.store(0, Ordering::Relaxed);
    }

    /// Compact single-line summary for the status sink
    pub fn to_status_line(&self, stage_current: usize, stages_total: usize) -> String {
        format!(
            "stage {}/{} | seen {}f {}d {}l | digests {} ({} err) | \
             copied {} ({} err) | deleted {} ({} err) | dirs {} ({} err) | \
             validated {}/{}/{}",
            stage_current,
            stages_total,
            self.tree_files.load(Ordering::Relaxed),
            self.tree_dirs.load(Ordering::Relaxed),
            self.tree_symlinks.load(Ordering::Relaxed),
            self.digest_ok.load(Ordering::Relaxed),
            self.digest_err.load(Ordering::Relaxed),
            self.copied_ok.load(Ordering::Relaxed),
            self.copied_err.load(Ordering::Relaxed),
            self.deleted_ok.load(Ordering::Relaxed),
            self.deleted_err.load(Ordering::Relaxed),
            self.dirs_created_ok.load(Ordering::Relaxed),
            self.dirs_created_err.load(Ordering::Relaxed),
            self.validate_match.load(Ordering::Relaxed),
            self.validate_mismatch.load(Ordering::Relaxed),
            self.validate_missing.load(Ordering::Relaxed),
        )
    }

    /// Multi-line post-backup report
    pub fn to_report(&self) -> String {
        let mut report = format!(
            "Files copied: {}, errors: {}\n",
            self.copied_ok.load(Ordering::Relaxed),
            self.copied_err.load(Ordering::Relaxed)
        );
        report += &format!(
            "Symlinks created: {}\n",
            self.symlinks_created.load(Ordering::Relaxed)
        );
        report += &format!(
            "Files and directories deleted: {}, errors: {}\n",
            self.deleted_ok.load(Ordering::Relaxed),
            self.deleted_err.load(Ordering::Relaxed)
        );
        report += &format!(
            "Directories created: {}, errors: {}\n\n",
            self.dirs_created_ok.load(Ordering::Relaxed),
            self.dirs_created_err.load(Ordering::Relaxed)
        );
        report += &format!(
            "(Files viewed: {}, directories viewed: {}, symlinks viewed: {})\n",
            self.tree_files.load(Ordering::Relaxed),
            self.tree_dirs.load(Ordering::Relaxed),
            self.tree_symlinks.load(Ordering::Relaxed)
        );
        report += &format!(
            "(Checksums calculated: {}, errors: {})\n\n",
            self.digest_ok.load(Ordering::Relaxed),
            self.digest_err.load(Ordering::Relaxed)
        );
        report += "See logs for details";
        report
    }

    /// Multi-line post-validation report
    pub fn to_validation_report(&self) -> String {
        let matches = self.validate_match.load(Ordering::Relaxed);
        let mismatches = self.validate_mismatch.load(Ordering::Relaxed);

        let mut report = String::new();
        if matches + mismatches != 0 {
            let invalid_rate = mismatches as f64 / (matches + mismatches) as f64 * 100.0;
            report += &format!("Error rate: {:.2}%\n", invalid_rate);
        }
        report += &format!("Matches: {}\n", matches);
        report += &format!("Mismatches: {}\n", mismatches);
        report += &format!(
            "Checksums not found: {}\n\n",
            self.validate_missing.load(Ordering::Relaxed)
        );
        report += &format!(
            "(Files viewed: {}, directories viewed: {})\n",
            self.tree_files.load(Ordering::Relaxed),
            self.tree_dirs.load(Ordering::Relaxed)
        );
        report += &format!(
            "(Checksums calculated: {}, errors: {})\n\n",
            self.digest_ok.load(Ordering::Relaxed),
            self.digest_err.load(Ordering::Relaxed)
        );
        report += "See logs for details";
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = BackupStats::new();
        assert_eq!(stats.copied_ok.load(Ordering::Relaxed), 0);
        assert_eq!(stats.validate_missing.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let stats = BackupStats::new();
        stats.tree_files.fetch_add(10, Ordering::Relaxed);
        stats.digest_err.fetch_add(3, Ordering::Relaxed);
        stats.validate_mismatch.fetch_add(1, Ordering::Relaxed);

        stats.reset();

        assert_eq!(stats.tree_files.load(Ordering::Relaxed), 0);
        assert_eq!(stats.digest_err.load(Ordering::Relaxed), 0);
        assert_eq!(stats.validate_mismatch.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_status_line_contains_every_counter_group() {
        let stats = BackupStats::new();
        stats.tree_files.fetch_add(12, Ordering::Relaxed);
        stats.copied_ok.fetch_add(7, Ordering::Relaxed);

        let line = stats.to_status_line(2, 7);
        assert!(line.starts_with("stage 2/7"));
        assert!(line.contains("seen 12f"));
        assert!(line.contains("copied 7 (0 err)"));
        assert!(line.contains("validated 0/0/0"));
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_validation_report_error_rate() {
        let stats = BackupStats::new();
        stats.validate_match.fetch_add(3, Ordering::Relaxed);
        stats.validate_mismatch.fetch_add(1, Ordering::Relaxed);

        let report = stats.to_validation_report();
        assert!(report.contains("Error rate: 25.00%"));
        assert!(report.contains("Matches: 3"));
        assert!(report.contains("Mismatches: 1"));
    }

    #[test]
    fn test_validation_report_no_rate_when_empty() {
        let stats = BackupStats::new();
        let report = stats.to_validation_report();
        assert!(!report.contains("Error rate"));
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(BackupStats::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let stats = stats.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    stats.digest_ok.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.digest_ok.load(Ordering::Relaxed), 8000);
    }
}
