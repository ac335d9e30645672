//! Session driver
//!
//! Handles the core loop of:
//! - Scanning the source tree
//! - Extracting dates
//! - Resolving destinations and duplicates
//! - Moving files and checkpointing each outcome
//!
//! Dry runs go through the same loop with a shadow destination view and an
//! in-memory ledger, so no file and no checkpoint is touched.

use crate::checkpoint::{CheckpointRecord, CheckpointStore, Counters, DuplicateRecord, run_identifier};
use crate::config::{CHECKPOINT_DIR_NAME, Config};
use crate::error::{Error, Result};
use crate::resolve::{
    DestinationView, Disposition, LiveView, ShadowView, destination_for, is_duplicate_marked,
    resolve_disposition,
};
use crate::signal::CancellationToken;
use crate::time::{DateExtractor, DateVerdict, ExifMetadata, MetadataSource, NoMetadata};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, span, trace, warn};
use walkdir::WalkDir;

/// A candidate file found by the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute source path
    pub path: PathBuf,
    pub file_name: String,
    /// Lowercased extension
    pub extension: Option<String>,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Every file was visited without errors
    Completed,
    /// Every file was visited, some failed
    CompletedWithErrors,
    /// Stopped by a termination signal; checkpoint kept
    Interrupted,
    /// Stopped by a fatal error; checkpoint kept where it could be written
    Aborted,
}

impl SessionStatus {
    /// Process exit status for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionStatus::Completed => 0,
            SessionStatus::CompletedWithErrors => 1,
            SessionStatus::Interrupted => 130,
            SessionStatus::Aborted => 2,
        }
    }
}

/// Summary handed back to the caller
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub status: SessionStatus,
    pub counters: Counters,
    pub duplicates: Vec<DuplicateRecord>,
    pub dry_run: bool,
    /// A previous checkpoint was picked up
    pub resumed: bool,
    pub files_found: usize,
    /// Files skipped because an earlier session finalized them
    pub already_done: usize,
    pub elapsed: Duration,
    /// Snapshot left behind for a later resume
    pub checkpoint: Option<PathBuf>,
}

/// Result of one file's trip through the pipeline
#[derive(Debug)]
enum FileOutcome {
    Moved,
    Skipped,
    Duplicate(DuplicateRecord),
    Failed,
}

/// Where counters and processed paths go
enum Ledger {
    /// Checkpointed after every file
    Durable {
        store: CheckpointStore,
        record: CheckpointRecord,
    },
    /// Dry run: counters live in memory only
    Ephemeral { record: CheckpointRecord },
}

impl Ledger {
    fn record(&self) -> &CheckpointRecord {
        match self {
            Ledger::Durable { record, .. } | Ledger::Ephemeral { record } => record,
        }
    }

    fn into_record(self) -> CheckpointRecord {
        match self {
            Ledger::Durable { record, .. } | Ledger::Ephemeral { record } => record,
        }
    }

    fn is_processed(&self, path: &Path) -> bool {
        match self {
            Ledger::Durable { store, .. } => store.is_processed(path),
            Ledger::Ephemeral { .. } => false,
        }
    }

    /// Count the outcome, then mark the path processed and save the snapshot
    fn commit(&mut self, path: &Path, outcome: FileOutcome) -> Result<()> {
        let record = match self {
            Ledger::Durable { record, .. } | Ledger::Ephemeral { record } => record,
        };

        match outcome {
            FileOutcome::Moved => record.counters.moved += 1,
            FileOutcome::Skipped => record.counters.skipped += 1,
            FileOutcome::Duplicate(dup) => {
                record.counters.duplicates_found += 1;
                record.duplicates.push(dup);
            }
            FileOutcome::Failed => record.counters.errors += 1,
        }

        if let Ledger::Durable { store, record } = self {
            store.mark_processed(path)?;
            store.save(record)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            Ledger::Durable { store, record } => store.save(record),
            Ledger::Ephemeral { .. } => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self {
            Ledger::Durable { store, .. } => store.clear(),
            Ledger::Ephemeral { .. } => Ok(()),
        }
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        match self {
            Ledger::Durable { store, .. } => Some(store.snapshot_path().to_path_buf()),
            Ledger::Ephemeral { .. } => None,
        }
    }
}

/// One organizing run over a source/destination pair
pub struct Session {
    config: Config,
    extractor: DateExtractor,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(config: Config, extractor: DateExtractor, cancel: CancellationToken) -> Self {
        Self {
            config,
            extractor,
            cancel,
        }
    }

    /// Session with the metadata source chosen by the configuration
    pub fn from_config(config: Config, cancel: CancellationToken) -> Self {
        let metadata: Box<dyn MetadataSource> = if config.use_exif {
            Box::new(ExifMetadata)
        } else {
            Box::new(NoMetadata)
        };
        let extractor = DateExtractor::new(metadata, config.min_year);
        Self::new(config, extractor, cancel)
    }

    /// Run the session to completion, interruption, or a fatal error
    ///
    /// Per-file failures are counted and never end the run. The checkpoint
    /// is flushed on every exit path and removed only when all files were
    /// visited. A fatal error after the scan comes back as
    /// [`Error::Aborted`] holding the report reached so far.
    pub fn run(&self) -> Result<SessionReport> {
        let _span = span!(Level::INFO, "session", dry_run = self.config.dry_run).entered();
        let started = Instant::now();

        let source_root = open_source_root(&self.config.source_dir)?;
        let dest_root = if self.config.dry_run {
            absolute_root(&self.config.dest_dir)?
        } else {
            fs::create_dir_all(&self.config.dest_dir)?;
            fs::canonicalize(&self.config.dest_dir)?
        };
        let checkpoint_dir = match &self.config.checkpoint_dir {
            Some(dir) => absolute_root(dir)?,
            None => dest_root.join(CHECKPOINT_DIR_NAME),
        };

        let run_id = run_identifier(&source_root, &dest_root);
        info!(
            source = %source_root.display(),
            destination = %dest_root.display(),
            run_id = %run_id,
            "Starting session"
        );

        let mut resumed = false;
        let mut ledger = if self.config.dry_run {
            info!("Dry run: checkpoint is neither read nor written");
            Ledger::Ephemeral {
                record: CheckpointRecord::new(&run_id, &source_root, &dest_root),
            }
        } else {
            let mut store = CheckpointStore::new(&checkpoint_dir, &run_id);
            if self.config.checkpoint_dir.is_none() {
                store = store.owning_dir();
            }
            if self.config.fresh && store.exists() {
                warn!(
                    checkpoint = %store.snapshot_path().display(),
                    "Discarding existing checkpoint"
                );
                store.clear()?;
            }
            let record = match store.load()? {
                Some(record) => {
                    resumed = true;
                    info!(counters = %record.counters.summary(), "Resuming previous session");
                    record
                }
                None => {
                    resumed = store.processed_count() > 0;
                    CheckpointRecord::new(&run_id, &source_root, &dest_root)
                }
            };
            Ledger::Durable { store, record }
        };

        info!("Scanning source directory...");
        let files = self.collect_files(&source_root, &checkpoint_dir);
        info!(count = files.len(), "Found candidate files");

        let already_done = files.iter().filter(|f| ledger.is_processed(&f.path)).count();
        if already_done > 0 {
            info!(already_done, "Skipping files finalized by an earlier session");
        }

        let (status, mut failure) = match self.drive(&files, &dest_root, &mut ledger) {
            Ok(status) => (status, None),
            Err(e) => {
                error!(error = %e, fatal = e.is_fatal(), "Session aborted");
                (SessionStatus::Aborted, Some(e))
            }
        };

        let settled = match status {
            SessionStatus::Interrupted | SessionStatus::Aborted => ledger.flush(),
            SessionStatus::Completed | SessionStatus::CompletedWithErrors => ledger.finish(),
        };
        if let Err(e) = settled {
            error!(error = %e, "Failed to settle checkpoint");
            if failure.is_none() {
                failure = Some(e);
            }
        }

        let status = if failure.is_some() {
            SessionStatus::Aborted
        } else {
            status
        };
        let checkpoint = match status {
            SessionStatus::Interrupted | SessionStatus::Aborted => {
                ledger.snapshot_path().filter(|p| p.exists())
            }
            SessionStatus::Completed | SessionStatus::CompletedWithErrors => None,
        };

        let record = ledger.into_record();
        info!(status = ?status, "{}", record.counters.summary());

        let report = SessionReport {
            status,
            counters: record.counters,
            duplicates: record.duplicates,
            dry_run: self.config.dry_run,
            resumed,
            files_found: files.len(),
            already_done,
            elapsed: started.elapsed(),
            checkpoint,
        };

        match failure {
            Some(source) => Err(Error::Aborted {
                source: Box::new(source),
                report: Box::new(report),
            }),
            None => Ok(report),
        }
    }

    /// The per-file loop; returns early on cancellation or a fatal error
    fn drive(
        &self,
        files: &[FileEntry],
        dest_root: &Path,
        ledger: &mut Ledger,
    ) -> Result<SessionStatus> {
        let mut view: Box<dyn DestinationView> = if self.config.dry_run {
            Box::new(ShadowView::new())
        } else {
            Box::new(LiveView)
        };
        let mut handled = 0usize;

        for entry in files {
            if self.cancel.is_cancelled() {
                warn!(handled, "Session interrupted");
                return Ok(SessionStatus::Interrupted);
            }

            if ledger.is_processed(&entry.path) {
                trace!(path = ?entry.path, "Already processed");
                continue;
            }

            let _file_span = span!(Level::DEBUG, "file", path = ?entry.path).entered();
            let outcome = self.process_file(entry, dest_root, view.as_mut());
            ledger.commit(&entry.path, outcome)?;

            handled += 1;
            if self.config.progress_interval > 0 && handled % self.config.progress_interval == 0 {
                info!(
                    handled,
                    total = files.len(),
                    counters = %ledger.record().counters.summary(),
                    "Progress"
                );
            }
        }

        if ledger.record().counters.errors > 0 {
            Ok(SessionStatus::CompletedWithErrors)
        } else {
            Ok(SessionStatus::Completed)
        }
    }

    /// Extract, resolve and apply for one file, logging the decision
    fn process_file(
        &self,
        entry: &FileEntry,
        dest_root: &Path,
        view: &mut dyn DestinationView,
    ) -> FileOutcome {
        let (disposition, candidate) = match self.decide(entry, dest_root, view) {
            Ok(decision) => decision,
            Err(e) => {
                error!(path = ?entry.path, error = %e, "Failed to evaluate file");
                return FileOutcome::Failed;
            }
        };

        if !self.config.dry_run
            && let Err(e) = apply(&entry.path, &disposition)
        {
            error!(path = ?entry.path, error = %e, "Failed to apply disposition");
            return FileOutcome::Failed;
        }
        view.record(&entry.path, &disposition);

        let verb = if self.config.dry_run { "Would move" } else { "Moved" };
        match disposition {
            Disposition::Move(dest) => {
                info!(source = ?entry.path, destination = ?dest, "{} file", verb);
                FileOutcome::Moved
            }
            Disposition::MoveWithSuffix { dest, counter } => {
                info!(
                    source = ?entry.path,
                    destination = ?dest,
                    counter,
                    "{} file under a numbered name (different file with same name exists)",
                    verb
                );
                FileOutcome::Moved
            }
            Disposition::AlreadyInPlace => {
                info!(path = ?entry.path, "Skipped: already in place");
                FileOutcome::Skipped
            }
            Disposition::SkipInvalidDate => FileOutcome::Skipped,
            Disposition::RenameAsDuplicate(renamed) => {
                let existing = candidate.unwrap_or_default();
                warn!(
                    source = ?entry.path,
                    renamed_to = ?renamed,
                    existing = ?existing,
                    "Duplicate content: source {}",
                    if self.config.dry_run { "would be renamed" } else { "renamed" }
                );
                FileOutcome::Duplicate(DuplicateRecord {
                    original: entry.path.clone(),
                    renamed_to: renamed,
                    existing,
                })
            }
        }
    }

    /// Compute the disposition and the candidate destination it was based on
    fn decide(
        &self,
        entry: &FileEntry,
        dest_root: &Path,
        view: &dyn DestinationView,
    ) -> Result<(Disposition, Option<PathBuf>)> {
        let date = match self.extractor.extract(&entry.path)? {
            DateVerdict::Valid(date) => date,
            DateVerdict::OutOfRange(date) => {
                let reason = Error::InvalidDate {
                    path: entry.path.clone(),
                    year: date.year,
                    month: date.month,
                };
                warn!(source = %date.source, reason = %reason, "Skipped: invalid date");
                return Ok((Disposition::SkipInvalidDate, None));
            }
        };

        let candidate = destination_for(dest_root, &date, &entry.file_name);
        debug!(
            year = date.year,
            month = date.month,
            source = %date.source,
            candidate = ?candidate,
            "Resolved destination"
        );

        let disposition = resolve_disposition(&entry.path, candidate.clone(), view)?;
        Ok((disposition, Some(candidate)))
    }

    /// Recursively collect candidate files under `source_root`
    ///
    /// Skips duplicate-marked names, the checkpoint directory, excluded
    /// directories and extensions outside the allow-list. Order is whatever
    /// the directory walk yields.
    fn collect_files(&self, source_root: &Path, checkpoint_dir: &Path) -> Vec<FileEntry> {
        let mut files = Vec::new();

        for entry in WalkDir::new(source_root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| {
                !e.path().starts_with(checkpoint_dir) && !self.is_excluded_dir(e.path())
            })
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if is_duplicate_marked(path) {
                debug!(?path, "Skipping duplicate-marked file");
                continue;
            }

            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase());
            if !self.config.is_supported(extension.as_deref()) {
                continue;
            }

            // The processed log stores one UTF-8 path per line
            if !is_loggable(path) {
                warn!(?path, "Skipping path that is not UTF-8 or contains a newline");
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            files.push(FileEntry {
                path: path.to_path_buf(),
                file_name: file_name.to_string(),
                extension,
            });
        }

        files
    }

    /// Check if a path should be excluded based on exclude_dirs configuration
    fn is_excluded_dir(&self, path: &Path) -> bool {
        for exclude in &self.config.exclude_dirs {
            if exclude.is_absolute() {
                if path.starts_with(exclude) {
                    debug!(?path, ?exclude, "Excluding directory (absolute path match)");
                    return true;
                }
            } else if let Some(exclude_name) = exclude.file_name()
                && path.components().any(|c| {
                    matches!(c, std::path::Component::Normal(name) if name == exclude_name)
                })
            {
                debug!(?path, ?exclude, "Excluding directory (folder name match)");
                return true;
            }
        }

        false
    }
}

/// Whether `path` survives a round trip through the processed log
fn is_loggable(path: &Path) -> bool {
    path.to_str().is_some_and(|p| !p.contains(['\n', '\r']))
}

/// Canonical source root, or the fatal error that prevents any work
fn open_source_root(source: &Path) -> Result<PathBuf> {
    let unreadable = |e: io::Error| Error::SourceRootUnreadable {
        path: source.to_path_buf(),
        source: e,
    };
    let root = fs::canonicalize(source).map_err(unreadable)?;
    fs::read_dir(&root).map_err(unreadable)?;
    Ok(root)
}

/// Canonical form of a path that may not exist yet
///
/// The deepest existing ancestor is canonicalized and the missing tail is
/// appended unchanged.
fn absolute_root(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut missing = Vec::new();
    let mut current = absolute.as_path();

    loop {
        if let Ok(mut resolved) = fs::canonicalize(current) {
            resolved.extend(missing.iter().rev());
            return Ok(resolved);
        }
        match (current.file_name(), current.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                current = parent;
            }
            _ => return Ok(absolute),
        }
    }
}

/// Carry out a disposition on the filesystem
fn apply(source: &Path, disposition: &Disposition) -> Result<()> {
    match disposition {
        Disposition::Move(dest) | Disposition::MoveWithSuffix { dest, .. } => {
            move_file(source, dest)
        }
        Disposition::RenameAsDuplicate(renamed) => {
            if fs::symlink_metadata(renamed).is_ok() {
                return Err(Error::MoveFailure {
                    from: source.to_path_buf(),
                    to: renamed.clone(),
                    source: io::Error::from(io::ErrorKind::AlreadyExists),
                });
            }
            fs::rename(source, renamed).map_err(|e| Error::MoveFailure {
                from: source.to_path_buf(),
                to: renamed.clone(),
                source: e,
            })
        }
        Disposition::AlreadyInPlace | Disposition::SkipInvalidDate => Ok(()),
    }
}

/// Move a file, falling back to copy + delete across filesystems
///
/// Never overwrites `dest`. A failed fallback leaves the source untouched
/// and removes the partial copy.
fn move_file(source: &Path, dest: &Path) -> Result<()> {
    let failure = |e: io::Error| Error::MoveFailure {
        from: source.to_path_buf(),
        to: dest.to_path_buf(),
        source: e,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(failure)?;
    }
    if fs::symlink_metadata(dest).is_ok() {
        return Err(failure(io::Error::from(io::ErrorKind::AlreadyExists)));
    }

    if let Err(e) = fs::rename(source, dest) {
        debug!(?source, ?dest, error = %e, "Rename failed, copying instead");
        copy_file(source, dest).map_err(failure)?;

        if let Ok(mtime) = fs::metadata(source).and_then(|m| m.modified()) {
            let _ = filetime::set_file_mtime(dest, filetime::FileTime::from_system_time(mtime));
        }

        if let Err(e) = fs::remove_file(source) {
            let _ = fs::remove_file(dest);
            return Err(failure(e));
        }
    }

    Ok(())
}

/// Copy into a new file with buffered I/O, removing it again on failure
fn copy_file(source: &Path, dest: &Path) -> io::Result<()> {
    let src_file = File::open(source)?;
    let dest_file = OpenOptions::new().write(true).create_new(true).open(dest)?;

    let result = (|| {
        let mut reader = BufReader::with_capacity(256 * 1024, src_file);
        let mut writer = BufWriter::with_capacity(256 * 1024, dest_file);

        let mut buffer = vec![0u8; 256 * 1024];
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            writer.write_all(&buffer[..bytes_read])?;
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    })();

    if result.is_err() {
        let _ = fs::remove_file(dest);
    }
    result
}
