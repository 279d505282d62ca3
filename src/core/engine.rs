/*!
 * Backup and validation orchestrator
 *
 * Drives the staged pipeline: tree walking, digest computation, mirror
 * reconciliation and manifest finalization. Owns progress accounting and the
 * pause/cancel control plane shared with every worker pool.
 */

use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError};
use tracing::{debug, error, info, warn};

use crate::config::BackupConfig;
use crate::core::checksum::{digest_worker, DigestSink};
use crate::core::control::{ControlBus, ControlState, POLL_INTERVAL};
use crate::core::copy::copy_worker;
use crate::core::delete::{delete_worker, DeleteItem};
use crate::core::events::{EventPublisher, ExitCode};
use crate::core::manifest::{self, DigestMap, DigestRecord};
use crate::core::paths;
use crate::core::tree::{
    classify_root, dir_mode, probe_dir_empty, tree_walker, EntryKind, FileNode, ParsedEntry,
    Tree, WalkItem,
};
use crate::core::workload::{max_workers, pool_workers};
use crate::error::{Result, UmbraError};
use crate::stats::BackupStats;

/// Grace period for draining worker output after a cancel request
const GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Input queue capacity per worker (feeder backpressure)
const QUEUE_DEPTH_PER_WORKER: usize = 10;

/// Whether tree keys are computed relative to the entry itself or its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootMode {
    /// Mirror side: the entry is its own root
    EntryItself,
    /// Input side: the entry's parent is the root, so its basename stays as
    /// the first key segment
    ParentOfEntry,
}

/// The backup engine. One instance drives one run at a time; the control bus
/// handle may be shared with a front-end thread for pause/resume/cancel.
pub struct Backupper {
    config: BackupConfig,
    stats: Arc<BackupStats>,
    bus: Arc<ControlBus>,
    events: EventPublisher,
    stage_current: usize,
    stages_total: usize,
    last_emit: Instant,
}

impl Backupper {
    pub fn new(config: BackupConfig) -> Self {
        Self {
            config,
            stats: Arc::new(BackupStats::new()),
            bus: Arc::new(ControlBus::new()),
            events: EventPublisher::noop(),
            stage_current: 0,
            stages_total: 0,
            last_emit: Instant::now(),
        }
    }

    /// Replace the event sink (defaults to no-op)
    pub fn set_event_publisher(&mut self, events: EventPublisher) {
        self.events = events;
    }

    /// Control handle for pause/resume/cancel from another thread
    pub fn control(&self) -> Arc<ControlBus> {
        self.bus.clone()
    }

    /// Statistics registry of the current/last run
    pub fn stats(&self) -> Arc<BackupStats> {
        self.stats.clone()
    }

    /// Run a full backup (blocking). Returns the terminal exit code.
    pub fn run_backup(&mut self) -> ExitCode {
        self.bus.reset();
        self.stats.reset();

        let status = match self.backup_stages() {
            Ok(()) => {
                info!("Backup finished");
                ExitCode::Success
            }
            Err(UmbraError::Cancelled) => {
                warn!("Backup cancelled");
                ExitCode::Canceled
            }
            Err(e) => {
                error!("Error backing up data: {}", e);
                ExitCode::Error
            }
        };

        self.finish(status);
        status
    }

    /// Validate an existing mirror against its manifest (blocking)
    pub fn run_validation(&mut self) -> ExitCode {
        self.bus.reset();
        self.stats.reset();

        let status = match self.validation_stages() {
            Ok(()) => {
                info!("Validation finished");
                ExitCode::Success
            }
            Err(UmbraError::Cancelled) => {
                warn!("Validation cancelled");
                ExitCode::Canceled
            }
            Err(e) => {
                error!("Error validating data: {}", e);
                ExitCode::Error
            }
        };

        self.finish(status);
        status
    }

    /// Checks and parses input entries from configuration
    ///
    /// Produces the ordered `(normalized path, skip)` list. Two non-skipped
    /// entries sharing a leaf-relative key are a fatal configuration error,
    /// as is a non-skipped entry that does not exist.
    pub fn parse_input_entries(&self) -> Result<Vec<(PathBuf, bool)>> {
        let mut entries: Vec<(PathBuf, bool)> = Vec::new();

        for input in &self.config.input_paths {
            let raw = input.path.to_string_lossy();
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                warn!("Empty input path, skipping");
                continue;
            }

            let path = paths::normalize(Path::new(trimmed));
            let key = paths::leaf_key(&path);

            for (existing, existing_skip) in &entries {
                if paths::leaf_key(existing) == key && !*existing_skip && !input.skip {
                    return Err(UmbraError::DuplicateInput(path));
                }
            }

            if !input.skip && !path.exists() {
                return Err(UmbraError::SourceNotFound(path));
            }

            if let Some(slot) = entries.iter_mut().find(|(p, _)| *p == path) {
                slot.1 = input.skip;
            } else {
                entries.push((path, input.skip));
            }
        }

        info!("{} entries parsed", entries.len());
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Backup pipeline
    // ------------------------------------------------------------------

    fn backup_stages(&mut self) -> Result<()> {
        let entries = self.parse_input_entries()?;
        if entries.is_empty() {
            return Err(UmbraError::Config("Input entry list is empty".to_string()));
        }
        if self.config.save_to.as_os_str().is_empty() {
            return Err(UmbraError::Config("Destination directory not set".to_string()));
        }

        let dest = paths::normalize(&self.config.save_to);
        for (path, skip) in &entries {
            if !*skip && (paths::is_ancestor(path, &dest) || paths::is_ancestor(&dest, path)) {
                return Err(UmbraError::Config(format!(
                    "Input path {} overlaps the destination {}",
                    path.display(),
                    dest.display()
                )));
            }
        }

        self.stages_total = 5
            + usize::from(self.config.delete_data)
            + usize::from(self.config.create_empty_dirs)
            + usize::from(self.config.generate_tree);
        self.stage_current = 0;

        let manifest_path = self.config.manifest_path();

        // STAGE 1: Prepare and parse files
        self.stage_advance("Preparing and parsing files");
        self.events.progress(0);

        if !dest.exists() {
            info!("Creating {} directory", dest.display());
            fs::create_dir_all(&dest)?;
        }
        self.step_progress(10, 100);

        info!("Generating input entries tree");
        let (input_tree, skipped_entries) =
            self.generate_tree(&entries, RootMode::ParentOfEntry, HashSet::new())?;
        info!(
            "Files: {}, dirs: {}, symlinks: {}, unknown paths: {}",
            input_tree.files.len(),
            input_tree.dirs.len(),
            input_tree.symlinks.len(),
            input_tree.unknown.len()
        );
        self.step_progress(50, 100);

        info!("Generating output (existing files) tree");
        let mirror_ignore: HashSet<PathBuf> =
            [dest.clone(), paths::normalize(&manifest_path)].into_iter().collect();
        let (mirror_tree, _) = self.generate_tree(
            &[(dest.clone(), false)],
            RootMode::EntryItself,
            mirror_ignore.clone(),
        )?;
        info!(
            "Files: {}, dirs: {}, symlinks: {}, unknown paths: {}",
            mirror_tree.files.len(),
            mirror_tree.dirs.len(),
            mirror_tree.symlinks.len(),
            mirror_tree.unknown.len()
        );
        self.step_progress(100, 100);

        // STAGE 2: Input digests
        self.stage_advance("Calculating checksums for input files");
        let digests_in = Arc::new(self.calculate_digests(&input_tree.files, None)?);

        // STAGE 3: Output digests
        self.stage_advance("Calculating checksums of existing files inside the backup");
        let parsed = if self.config.recalculate_checksum {
            DigestMap::new()
        } else {
            manifest::parse(&manifest_path, &dest, self.config.checksum_alg)
        };
        let computed = self.calculate_digests(&mirror_tree.files, Some(&parsed))?;
        info!(
            "Merging {} calculated checksums with {} parsed",
            computed.len(),
            parsed.len()
        );
        let mut digests_out = parsed;
        digests_out.extend(computed);
        let digests_out = Arc::new(digests_out);

        // STAGE 4 (optional): Delete stray entries
        if self.config.delete_data {
            self.stage_advance("Deleting files from the backup according to input");
            self.delete_stage(&input_tree, &mirror_tree, &skipped_entries)?;
        }

        // STAGE 5 (optional): Create empty directories
        if self.config.create_empty_dirs {
            self.stage_advance("Creating empty directories");
            self.create_empty_dirs_stage(&input_tree, &dest)?;
        }

        // STAGE 6: Copy files
        self.stage_advance("Copying files");
        self.copy_stage(&input_tree, digests_in.clone(), digests_out.clone(), &dest)?;

        // STAGE 7: Finalize manifest
        self.stage_advance("Calculating final checksums");
        if manifest_path.exists() {
            info!("Deleting {}", manifest_path.display());
            fs::remove_file(&manifest_path)?;
        }

        let final_digests = if self.config.recalculate_checksum {
            info!("Generating output (existing files) tree again");
            let (fresh_mirror, _) = self.generate_tree(
                &[(dest.clone(), false)],
                RootMode::EntryItself,
                mirror_ignore,
            )?;
            self.calculate_digests(&fresh_mirror.files, None)?
        } else {
            let mut merged = (*digests_out).clone();
            merged.extend(
                digests_in
                    .iter()
                    .map(|(rel, record)| (rel.clone(), record.clone())),
            );
            // Records for entries the delete stage removed (or copies that
            // never landed) must not survive into the manifest
            merged.retain(|rel, _| dest.join(rel).exists());
            merged
        };

        info!("Writing checksums to {}", manifest_path.display());
        manifest::write(&manifest_path, &final_digests)?;

        // STAGE 8 (optional): Render tree.txt sidecar
        if self.config.generate_tree {
            self.stage_advance("Creating backup tree");
            self.tree_sidecar_stage(&dest)?;
        }

        self.emit_status(true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation pipeline
    // ------------------------------------------------------------------

    fn validation_stages(&mut self) -> Result<()> {
        self.stages_total = 4;
        self.stage_current = 0;

        let dest = paths::normalize(&self.config.save_to);
        let manifest_path = self.config.manifest_path();

        // STAGE 1: Parse the manifest
        self.stage_advance("Parsing checksums file");
        if !manifest_path.exists() {
            return Err(UmbraError::ManifestMissing(manifest_path));
        }
        let parsed = manifest::parse(&manifest_path, &dest, self.config.checksum_alg);

        // STAGE 2: Enumerate the mirror
        self.stage_advance("Parsing backup files and directories");
        let ignore: HashSet<PathBuf> = [dest.clone()].into_iter().collect();
        let (mirror_tree, _) =
            self.generate_tree(&[(dest.clone(), false)], RootMode::EntryItself, ignore)?;
        info!(
            "Files: {}, dirs: {}, unknown paths: {}",
            mirror_tree.files.len(),
            mirror_tree.dirs.len(),
            mirror_tree.unknown.len()
        );

        // STAGE 3: Recompute digests for every mirror file
        self.stage_advance("Calculating checksums");
        let computed = self.calculate_digests(&mirror_tree.files, None)?;

        // STAGE 4: Compare against the parsed records
        self.stage_advance("Comparing checksums");
        let total = computed.len();
        for (step, (rel, record)) in computed.iter().enumerate() {
            self.pool_tick()?;

            let abs = dest.join(rel);
            // The manifest itself is excluded by identity, not by name
            if same_file(&abs, &manifest_path) {
                continue;
            }

            match parsed.get(rel) {
                None => {
                    self.stats.validate_missing.fetch_add(1, Ordering::Relaxed);
                }
                Some(old) if old.digest == record.digest => {
                    self.stats.validate_match.fetch_add(1, Ordering::Relaxed);
                }
                Some(old) => {
                    warn!(
                        "Actual checksum {} of file {} does not match recorded checksum {}",
                        record.digest,
                        rel.display(),
                        old.digest
                    );
                    self.stats.validate_mismatch.fetch_add(1, Ordering::Relaxed);
                }
            }

            self.step_progress(step + 1, total);
        }

        self.emit_status(true);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stage workers
    // ------------------------------------------------------------------

    /// Parallel tree generation over the given entries
    ///
    /// Returns the partitioned tree plus the absolute paths of skipped
    /// entries. Cancellation aborts with [`UmbraError::Cancelled`].
    fn generate_tree(
        &mut self,
        entries: &[(PathBuf, bool)],
        root_mode: RootMode,
        ignore: HashSet<PathBuf>,
    ) -> Result<(Tree, Vec<PathBuf>)> {
        info!("Generating tree for {} entries", entries.len());

        let (work_tx, work_rx) = unbounded::<WalkItem>();
        let (parsed_tx, parsed_rx) = unbounded::<ParsedEntry>();
        let ignore = Arc::new(ignore);

        let mut tree = Tree::new();
        let mut skipped = Vec::new();
        let mut dirs_seeded = 0usize;

        for (path, skip) in entries {
            if *skip {
                skipped.push(path.clone());
                continue;
            }

            let root = match root_mode {
                RootMode::ParentOfEntry => path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| path.clone()),
                RootMode::EntryItself => path.clone(),
            };
            let rel = match root_mode {
                RootMode::ParentOfEntry => paths::leaf_key(path),
                RootMode::EntryItself => PathBuf::new(),
            };

            let kind = classify_root(path);

            if !ignore.contains(&paths::normalize(path)) {
                let entry = match kind {
                    EntryKind::Dir => ParsedEntry {
                        rel: rel.clone(),
                        root: root.clone(),
                        kind,
                        empty: probe_dir_empty(path),
                        mode: dir_mode(path),
                    },
                    _ => ParsedEntry {
                        rel: rel.clone(),
                        root: root.clone(),
                        kind,
                        empty: false,
                        mode: None,
                    },
                };
                tree.insert(entry);
            }

            if kind == EntryKind::Dir {
                let _ = work_tx.send((rel, root, 0));
                dirs_seeded += 1;
            }
        }

        let workers = if dirs_seeded == 0 {
            0
        } else {
            max_workers(self.config.workload_profile)
        };

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            debug!("Starting walker {} / {}", i + 1, workers);
            let work_rx = work_rx.clone();
            let work_tx = work_tx.clone();
            let parsed_tx = parsed_tx.clone();
            let ignore = ignore.clone();
            let follow_symlinks = self.config.follow_symlinks;
            let stats = self.stats.clone();
            let bus = self.bus.clone();
            handles.push(thread::spawn(move || {
                tree_walker(work_rx, work_tx, parsed_tx, ignore, follow_symlinks, stats, bus)
            }));
        }
        drop(work_tx);
        drop(parsed_tx);

        loop {
            match parsed_rx.recv_timeout(POLL_INTERVAL) {
                Ok(entry) => {
                    let abs = paths::normalize(&entry.root.join(&entry.rel));
                    if !ignore.contains(&abs) {
                        tree.insert(entry);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = self.pool_tick() {
                        shutdown_pool(handles, Some(&parsed_rx));
                        return Err(e);
                    }
                    self.emit_status(false);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        info!("Tree generation finished");
        Ok((tree, skipped))
    }

    /// Parallel digest computation over a file partition
    ///
    /// Entries whose key appears in `exclude` are never opened; the caller
    /// merges the external records afterwards.
    fn calculate_digests(
        &mut self,
        files: &BTreeMap<PathBuf, FileNode>,
        exclude: Option<&DigestMap>,
    ) -> Result<DigestMap> {
        let mut items: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(files.len());
        let mut excluded = 0usize;
        for (rel, node) in files {
            if exclude.map(|map| map.contains_key(rel)).unwrap_or(false) {
                excluded += 1;
                continue;
            }
            items.push((rel.clone(), node.root.clone()));
        }

        info!(
            "Calculating checksums for {} files ({} skipped)",
            items.len(),
            excluded
        );
        if items.is_empty() {
            return Ok(DigestMap::new());
        }

        let total = items.len();
        let workers = pool_workers(self.config.workload_profile, total);
        let (in_tx, in_rx) = bounded(workers * QUEUE_DEPTH_PER_WORKER);
        let (out_tx, out_rx) = unbounded();

        let feeder_exit = Arc::new(AtomicBool::new(false));
        let feeder = spawn_feeder(items, in_tx, feeder_exit.clone());

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            debug!("Starting digest worker {} / {}", i + 1, workers);
            let in_rx = in_rx.clone();
            let sink = DigestSink::channel(out_tx.clone());
            let alg = self.config.checksum_alg;
            let stats = self.stats.clone();
            let bus = self.bus.clone();
            handles.push(thread::spawn(move || {
                digest_worker(in_rx, sink, alg, stats, bus)
            }));
        }
        drop(in_rx);
        drop(out_tx);

        let mut digests = DigestMap::new();
        let mut completed = 0usize;
        loop {
            if let Err(e) = self.pool_tick() {
                feeder_exit.store(true, Ordering::Release);
                shutdown_pool(handles, Some(&out_rx));
                let _ = feeder.join();
                return Err(e);
            }

            match out_rx.recv_timeout(POLL_INTERVAL) {
                Ok(output) => {
                    digests.insert(
                        output.rel,
                        DigestRecord {
                            root: output.root,
                            digest: output.digest,
                        },
                    );
                    completed += 1;
                    self.step_progress(completed, total);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.emit_status(false);
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        feeder_exit.store(true, Ordering::Release);
        let _ = feeder.join();
        for handle in handles {
            let _ = handle.join();
        }

        info!("Checksum calculation finished");
        Ok(digests)
    }

    /// Stage 4: remove mirror entries the inputs no longer track
    fn delete_stage(
        &mut self,
        input_tree: &Tree,
        mirror_tree: &Tree,
        skipped_entries: &[PathBuf],
    ) -> Result<()> {
        let mut items: Vec<DeleteItem> = Vec::with_capacity(mirror_tree.len());
        for (rel, node) in &mirror_tree.files {
            items.push(DeleteItem {
                kind: EntryKind::File,
                rel: rel.clone(),
                root: node.root.clone(),
                empty: false,
            });
        }
        for (rel, node) in &mirror_tree.symlinks {
            items.push(DeleteItem {
                kind: EntryKind::Symlink,
                rel: rel.clone(),
                root: node.root.clone(),
                empty: false,
            });
        }
        for (rel, node) in &mirror_tree.dirs {
            items.push(DeleteItem {
                kind: EntryKind::Dir,
                rel: rel.clone(),
                root: node.root.clone(),
                empty: node.empty,
            });
        }
        for (rel, node) in &mirror_tree.unknown {
            items.push(DeleteItem {
                kind: EntryKind::Unknown,
                rel: rel.clone(),
                root: node.root.clone(),
                empty: false,
            });
        }

        if items.is_empty() {
            return Ok(());
        }

        let skipped_parts: Arc<Vec<Vec<OsString>>> = Arc::new(
            skipped_entries
                .iter()
                .map(|path| paths::split_parts(path))
                .collect(),
        );

        let workers = pool_workers(self.config.workload_profile, items.len());
        let (in_tx, in_rx) = bounded(workers * QUEUE_DEPTH_PER_WORKER);

        let feeder_exit = Arc::new(AtomicBool::new(false));
        let feeder = spawn_feeder(items, in_tx, feeder_exit.clone());

        let input_tree = Arc::new(input_tree.clone());
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            debug!("Starting delete worker {} / {}", i + 1, workers);
            let in_rx = in_rx.clone();
            let input_tree = input_tree.clone();
            let skipped_parts = skipped_parts.clone();
            let delete_skipped = self.config.delete_skipped;
            let stats = self.stats.clone();
            let bus = self.bus.clone();
            handles.push(thread::spawn(move || {
                delete_worker(in_rx, input_tree, skipped_parts, delete_skipped, stats, bus)
            }));
        }
        drop(in_rx);

        let outcome = self.wait_for_pool(&handles, feeder_exit.clone());
        let _ = feeder.join();
        match outcome {
            Ok(()) => {
                for handle in handles {
                    let _ = handle.join();
                }
                info!("File deletion finished");
                Ok(())
            }
            Err(e) => {
                shutdown_pool(handles, None::<&Receiver<()>>);
                Err(e)
            }
        }
    }

    /// Stage 5: single-threaded creation of empty input directories
    fn create_empty_dirs_stage(&mut self, input_tree: &Tree, dest: &Path) -> Result<()> {
        let total = input_tree.dirs.len();
        let mut created = 0usize;

        for (step, (rel, node)) in input_tree.dirs.iter().enumerate() {
            self.pool_tick()?;

            if !node.empty {
                continue;
            }

            let out_abs = dest.join(rel);
            if !out_abs.exists() {
                match fs::create_dir_all(&out_abs) {
                    Ok(()) => {
                        self.stats.dirs_created_ok.fetch_add(1, Ordering::Relaxed);
                        created += 1;
                    }
                    Err(e) => {
                        error!("Error creating directory {}: {}", rel.display(), e);
                        self.stats.dirs_created_err.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            self.step_progress(step + 1, total);
        }

        info!("Created {} empty directories", created);
        Ok(())
    }

    /// Stage 6: parallel copy of the input FILE and SYMLINK partitions
    fn copy_stage(
        &mut self,
        input_tree: &Tree,
        digests_in: Arc<DigestMap>,
        digests_out: Arc<DigestMap>,
        dest: &Path,
    ) -> Result<()> {
        let mut items: Vec<(PathBuf, PathBuf)> =
            Vec::with_capacity(input_tree.files.len() + input_tree.symlinks.len());
        for (rel, node) in &input_tree.files {
            items.push((rel.clone(), node.root.clone()));
        }
        for (rel, node) in &input_tree.symlinks {
            items.push((rel.clone(), node.root.clone()));
        }

        if items.is_empty() {
            return Ok(());
        }

        let workers = pool_workers(self.config.workload_profile, items.len());
        let (in_tx, in_rx) = bounded(workers * QUEUE_DEPTH_PER_WORKER);

        let feeder_exit = Arc::new(AtomicBool::new(false));
        let feeder = spawn_feeder(items, in_tx, feeder_exit.clone());

        let input_dirs = Arc::new(input_tree.dirs.clone());
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            debug!("Starting copy worker {} / {}", i + 1, workers);
            let in_rx = in_rx.clone();
            let digests_in = digests_in.clone();
            let digests_out = digests_out.clone();
            let input_dirs = input_dirs.clone();
            let dest = dest.to_path_buf();
            let follow_symlinks = self.config.follow_symlinks;
            let stats = self.stats.clone();
            let bus = self.bus.clone();
            handles.push(thread::spawn(move || {
                copy_worker(
                    in_rx,
                    digests_in,
                    digests_out,
                    input_dirs,
                    dest,
                    follow_symlinks,
                    stats,
                    bus,
                )
            }));
        }
        drop(in_rx);

        let outcome = self.wait_for_pool(&handles, feeder_exit.clone());
        let _ = feeder.join();
        match outcome {
            Ok(()) => {
                for handle in handles {
                    let _ = handle.join();
                }
                info!("File copying finished");
                Ok(())
            }
            Err(e) => {
                shutdown_pool(handles, None::<&Receiver<()>>);
                Err(e)
            }
        }
    }

    /// Stage 8: render the tree.txt sidecar
    fn tree_sidecar_stage(&mut self, dest: &Path) -> Result<()> {
        let tree_file = dest.join("tree.txt");
        if tree_file.exists() {
            info!("Deleting {}", tree_file.display());
            fs::remove_file(&tree_file)?;
        }

        let lines = crate::core::treefile::tree_lines(dest, self.config.follow_symlinks);
        let total = lines.len();

        let mut writer = std::io::BufWriter::new(fs::File::create(&tree_file)?);
        for (step, line) in lines.iter().enumerate() {
            self.pool_tick()?;
            writeln!(writer, "{}", line)?;
            self.step_progress(step + 1, total);
        }
        writer.flush()?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Control plane
    // ------------------------------------------------------------------

    /// Handle pause and cancel requests between units of work
    ///
    /// Under PAUSE this blocks, emitting the pause-state events, until the
    /// bus returns to WORK or moves to EXIT.
    fn pool_tick(&mut self) -> Result<()> {
        match self.bus.read() {
            ControlState::Work => Ok(()),
            ControlState::Exit => {
                warn!("Received cancel request");
                Err(UmbraError::Cancelled)
            }
            ControlState::Pause => {
                info!("Paused. Waiting for resume or cancel request");
                self.events.pause_changed(true);
                loop {
                    thread::sleep(POLL_INTERVAL);
                    match self.bus.read() {
                        ControlState::Work => {
                            info!("Resumed");
                            self.events.pause_changed(false);
                            return Ok(());
                        }
                        ControlState::Exit => {
                            warn!("Cancel requested during pause");
                            return Err(UmbraError::Cancelled);
                        }
                        ControlState::Pause => {}
                    }
                }
            }
        }
    }

    /// Wait for every worker of a pool to finish, servicing control requests
    fn wait_for_pool(
        &mut self,
        handles: &[JoinHandle<()>],
        feeder_exit: Arc<AtomicBool>,
    ) -> Result<()> {
        loop {
            if handles.iter().all(|handle| handle.is_finished()) {
                feeder_exit.store(true, Ordering::Release);
                return Ok(());
            }

            if let Err(e) = self.pool_tick() {
                feeder_exit.store(true, Ordering::Release);
                return Err(e);
            }

            self.emit_status(false);
            thread::sleep(POLL_INTERVAL);
        }
    }

    // ------------------------------------------------------------------
    // Progress accounting
    // ------------------------------------------------------------------

    fn stage_advance(&mut self, title: &str) {
        self.stage_current += 1;
        info!("STAGE {} / {}: {}", self.stage_current, self.stages_total, title);
    }

    /// Interpolated overall progress: completed stages plus the in-stage
    /// fraction scaled to one stage's share. Rate-limited to the poll
    /// interval.
    fn step_progress(&mut self, stage_step: usize, stage_steps: usize) {
        if self.stages_total == 0 || stage_steps == 0 {
            return;
        }
        if self.last_emit.elapsed() < POLL_INTERVAL {
            return;
        }
        self.last_emit = Instant::now();

        let steps_progress = (stage_step as f64 / stage_steps as f64).clamp(0.0, 1.0);
        let stage_prev = (self.stage_current.saturating_sub(1)) as f64 / self.stages_total as f64;
        let stage_curr = self.stage_current as f64 / self.stages_total as f64;
        let progress_total = steps_progress * (stage_curr - stage_prev) + stage_prev;

        self.events.progress((progress_total * 100.0) as u8);
        self.events
            .status(self.stats.to_status_line(self.stage_current, self.stages_total));
    }

    fn emit_status(&mut self, force: bool) {
        if !force && self.last_emit.elapsed() < POLL_INTERVAL {
            return;
        }
        self.last_emit = Instant::now();
        self.events
            .status(self.stats.to_status_line(self.stage_current, self.stages_total));
    }

    fn finish(&mut self, status: ExitCode) {
        self.events.finished(status);
        self.events.progress(100);
    }
}

/// Spawn the feeder thread populating a bounded pool queue
///
/// The send loop re-checks the exit flag on every timeout so a cancelled run
/// never deadlocks against a full queue.
fn spawn_feeder<T: Send + 'static>(
    items: Vec<T>,
    tx: crossbeam_channel::Sender<T>,
    exit_flag: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        debug!("Feeder thread started");
        'outer: for item in items {
            let mut pending = item;
            loop {
                if exit_flag.load(Ordering::Acquire) {
                    break 'outer;
                }
                match tx.send_timeout(pending, POLL_INTERVAL) {
                    Ok(()) => break,
                    Err(SendTimeoutError::Timeout(back)) => pending = back,
                    Err(SendTimeoutError::Disconnected(_)) => break 'outer,
                }
            }
        }
        debug!("Feeder thread finished");
    })
}

/// Cancel-path pool shutdown: drain the output channel for the grace period
/// so no worker blocks on its last send, then detach whatever is still alive.
/// Workers self-terminate at their next control poll or queue timeout.
fn shutdown_pool<T>(handles: Vec<JoinHandle<()>>, drain: Option<&Receiver<T>>) {
    let deadline = Instant::now() + GRACE_PERIOD;
    loop {
        if let Some(rx) = drain {
            while rx.try_recv().is_ok() {}
        }
        if handles.iter().all(|handle| handle.is_finished()) {
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    for handle in handles {
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!("Worker did not stop within the grace period, detaching");
            drop(handle);
        }
    }
}

/// Device/inode identity (Unix); falls back to canonical path equality
fn same_file(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (fs::metadata(a), fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        match (fs::canonicalize(a), fs::canonicalize(b)) {
            (Ok(ca), Ok(cb)) => ca == cb,
            _ => false,
        }
    }
}
