//! Checkpoint persistence for resumable sessions
//!
//! Two independent files per run:
//! 1. Snapshot (JSON) - counters and the duplicate log, overwritten atomically
//! 2. Processed log - one finalized source path per line, append-only
//!
//! Both are named after the run identifier, a hash of the source and
//! destination roots, so a restarted process finds its predecessor's files.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Running totals for a session, cumulative across resumes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub moved: u64,
    pub skipped: u64,
    pub duplicates_found: u64,
    pub errors: u64,
}

impl Counters {
    pub fn total(&self) -> u64 {
        self.moved + self.skipped + self.duplicates_found + self.errors
    }

    pub fn summary(&self) -> String {
        format!(
            "Moved: {}, Skipped: {}, Duplicates: {}, Errors: {}",
            self.moved, self.skipped, self.duplicates_found, self.errors
        )
    }
}

/// A source renamed because identical content was already organized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    /// Where the source was found
    pub original: PathBuf,
    /// What it was renamed to
    pub renamed_to: PathBuf,
    /// The organized file it duplicates
    pub existing: PathBuf,
}

/// Snapshot of one session's progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Version for snapshot format compatibility
    version: u32,

    pub run_id: String,
    pub source_root: PathBuf,
    pub dest_root: PathBuf,

    /// Process that last wrote the snapshot
    pub pid: u32,

    pub updated_at: chrono::DateTime<chrono::Utc>,

    pub counters: Counters,

    /// Append-only
    pub duplicates: Vec<DuplicateRecord>,
}

impl CheckpointRecord {
    /// Current snapshot format version
    const VERSION: u32 = 1;

    pub fn new(run_id: &str, source_root: &Path, dest_root: &Path) -> Self {
        Self {
            version: Self::VERSION,
            run_id: run_id.to_string(),
            source_root: source_root.to_path_buf(),
            dest_root: dest_root.to_path_buf(),
            pid: std::process::id(),
            updated_at: chrono::Utc::now(),
            counters: Counters::default(),
            duplicates: Vec::new(),
        }
    }
}

/// Stable identifier for a source/destination pair
pub fn run_identifier(source_root: &Path, dest_root: &Path) -> String {
    let key = format!("{}\0{}", source_root.display(), dest_root.display());
    format!("{:016x}", xxh3_64(key.as_bytes()))
}

/// Reads and writes the snapshot and processed log of one run
#[derive(Debug)]
pub struct CheckpointStore {
    snapshot_path: PathBuf,
    log_path: PathBuf,
    processed: HashSet<PathBuf>,
    log: Option<File>,
    /// Remove the directory itself on `clear` once it is empty
    owns_dir: bool,
}

impl CheckpointStore {
    /// Store for `run_id` inside `dir`; nothing is touched until first use
    pub fn new(dir: &Path, run_id: &str) -> Self {
        Self {
            snapshot_path: dir.join(format!("{}.json", run_id)),
            log_path: dir.join(format!("{}.processed", run_id)),
            processed: HashSet::new(),
            log: None,
            owns_dir: false,
        }
    }

    /// Treat the directory as created for checkpoints, so `clear` may remove it
    pub fn owning_dir(mut self) -> Self {
        self.owns_dir = true;
        self
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Whether a previous session left anything behind
    pub fn exists(&self) -> bool {
        self.snapshot_path.exists() || self.log_path.exists()
    }

    /// Load the snapshot and the processed log
    ///
    /// Returns `None` when neither file exists. A processed log without a
    /// snapshot still counts: its paths are honored, counters start at zero.
    pub fn load(&mut self) -> Result<Option<CheckpointRecord>> {
        self.processed = self.read_log()?;

        let record = if self.snapshot_path.exists() {
            let file = File::open(&self.snapshot_path).map_err(|e| {
                Error::Checkpoint(format!("Failed to open checkpoint snapshot: {}", e))
            })?;
            let record: CheckpointRecord = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| {
                    Error::Checkpoint(format!("Failed to parse checkpoint snapshot: {}", e))
                })?;

            if record.version != CheckpointRecord::VERSION {
                warn!(
                    snapshot_version = record.version,
                    current_version = CheckpointRecord::VERSION,
                    "Checkpoint version mismatch, ignoring snapshot"
                );
                None
            } else {
                Some(record)
            }
        } else {
            None
        };

        if record.is_none() && !self.processed.is_empty() {
            warn!(
                log = %self.log_path.display(),
                paths = self.processed.len(),
                "Processed log found without a usable snapshot"
            );
        }

        if let Some(ref record) = record {
            info!(
                run_id = %record.run_id,
                previous_pid = record.pid,
                files_done = self.processed.len(),
                "Loaded checkpoint"
            );
        }

        Ok(record)
    }

    fn read_log(&self) -> Result<HashSet<PathBuf>> {
        let mut processed = HashSet::new();
        if !self.log_path.exists() {
            return Ok(processed);
        }

        let file = File::open(&self.log_path)
            .map_err(|e| Error::Checkpoint(format!("Failed to open processed log: {}", e)))?;
        for line in BufReader::new(file).lines() {
            let line = line
                .map_err(|e| Error::Checkpoint(format!("Failed to read processed log: {}", e)))?;
            if !line.is_empty() {
                processed.insert(PathBuf::from(line));
            }
        }

        debug!(count = processed.len(), "Read processed log");
        Ok(processed)
    }

    /// Overwrite the snapshot with `record`
    pub fn save(&self, record: &mut CheckpointRecord) -> Result<()> {
        record.updated_at = chrono::Utc::now();
        record.pid = std::process::id();

        let write_err = |message: String| Error::CheckpointWrite {
            path: self.snapshot_path.clone(),
            message,
        };

        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| write_err(format!("Failed to create checkpoint dir: {}", e)))?;
        }

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.snapshot_path.with_extension("tmp");

        let file = File::create(&temp_path)
            .map_err(|e| write_err(format!("Failed to create temp snapshot: {}", e)))?;
        let mut writer = BufWriter::new(file);

        serde_json::to_writer_pretty(&mut writer, record)
            .map_err(|e| write_err(format!("Failed to write snapshot: {}", e)))?;

        let file = writer
            .into_inner()
            .map_err(|e| write_err(format!("Failed to flush snapshot: {}", e)))?;
        file.sync_all()
            .map_err(|e| write_err(format!("Failed to sync snapshot: {}", e)))?;

        fs::rename(&temp_path, &self.snapshot_path)
            .map_err(|e| write_err(format!("Failed to rename temp snapshot: {}", e)))?;

        debug!(counters = %record.counters.summary(), "Saved checkpoint");
        Ok(())
    }

    /// Append `path` to the processed log
    pub fn mark_processed(&mut self, path: &Path) -> Result<()> {
        let log_path = self.log_path.clone();
        let write_err = |message: String| Error::CheckpointWrite {
            path: log_path.clone(),
            message,
        };

        if self.log.is_none() {
            self.log = Some(self.open_log().map_err(|e| write_err(e.to_string()))?);
        }
        let Some(log) = self.log.as_mut() else {
            return Err(write_err("processed log unavailable".into()));
        };

        writeln!(log, "{}", path.to_string_lossy())
            .and_then(|_| log.sync_data())
            .map_err(|e| write_err(format!("Failed to append processed log: {}", e)))?;

        self.processed.insert(path.to_path_buf());
        Ok(())
    }

    /// Open the log for appending, repairing a line torn by a crash
    fn open_log(&self) -> std::io::Result<File> {
        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.log_path)?;

        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                file.write_all(b"\n")?;
            }
        }

        Ok(file)
    }

    pub fn is_processed(&self, path: &Path) -> bool {
        self.processed.contains(path)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Delete both files; the run is over
    pub fn clear(&mut self) -> Result<()> {
        self.log = None;
        self.processed.clear();

        for path in [&self.snapshot_path, &self.log_path] {
            match fs::remove_file(path) {
                Ok(()) => debug!(?path, "Removed checkpoint file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::CheckpointWrite {
                        path: path.clone(),
                        message: format!("Failed to remove: {}", e),
                    });
                }
            }
        }

        // remove_dir leaves the directory if other runs still use it
        if self.owns_dir
            && let Some(parent) = self.snapshot_path.parent()
        {
            let _ = fs::remove_dir(parent);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_identifier_is_stable() {
        let a = run_identifier(Path::new("/src"), Path::new("/dst"));
        let b = run_identifier(Path::new("/src"), Path::new("/dst"));
        let c = run_identifier(Path::new("/src"), Path::new("/other"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_load_absent() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path(), "abc");
        assert!(!store.exists());
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.processed_count(), 0);
    }

    #[test]
    fn test_save_mark_and_reload() {
        let dir = tempdir().unwrap();
        let ckpt_dir = dir.path().join("ckpt");
        let mut store = CheckpointStore::new(&ckpt_dir, "run1");

        let mut record = CheckpointRecord::new("run1", Path::new("/src"), Path::new("/dst"));
        record.counters.moved = 3;
        record.counters.errors = 1;
        record.duplicates.push(DuplicateRecord {
            original: PathBuf::from("/src/a.jpg"),
            renamed_to: PathBuf::from("/src/a_DUP.jpg"),
            existing: PathBuf::from("/dst/2024/01/a.jpg"),
        });

        store.mark_processed(Path::new("/src/a.jpg")).unwrap();
        store.mark_processed(Path::new("/src/b.jpg")).unwrap();
        store.save(&mut record).unwrap();
        assert!(store.is_processed(Path::new("/src/a.jpg")));

        let mut reopened = CheckpointStore::new(&ckpt_dir, "run1");
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded.counters, record.counters);
        assert_eq!(loaded.duplicates, record.duplicates);
        assert_eq!(loaded.pid, std::process::id());
        assert!(reopened.is_processed(Path::new("/src/a.jpg")));
        assert!(reopened.is_processed(Path::new("/src/b.jpg")));
        assert!(!reopened.is_processed(Path::new("/src/c.jpg")));
    }

    #[test]
    fn test_save_overwrites() {
        let dir = tempdir().unwrap();
        let mut store = CheckpointStore::new(dir.path(), "run");
        let mut record = CheckpointRecord::new("run", Path::new("/s"), Path::new("/d"));

        record.counters.moved = 1;
        store.save(&mut record).unwrap();
        record.counters.moved = 2;
        store.save(&mut record).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.counters.moved, 2);
        assert!(!dir.path().join("run.tmp").exists());
    }

    #[test]
    fn test_torn_log_line_is_repaired() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("run.processed"), "/src/a.jpg\n/src/b.j").unwrap();

        let mut store = CheckpointStore::new(dir.path(), "run");
        assert!(store.load().unwrap().is_none());
        assert!(store.is_processed(Path::new("/src/a.jpg")));

        store.mark_processed(Path::new("/src/c.jpg")).unwrap();

        let mut reopened = CheckpointStore::new(dir.path(), "run");
        reopened.load().unwrap();
        assert!(reopened.is_processed(Path::new("/src/a.jpg")));
        assert!(reopened.is_processed(Path::new("/src/c.jpg")));
        assert!(!reopened.is_processed(Path::new("/src/b.j/src/c.jpg")));
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("run.json"), "{ not json").unwrap();

        let mut store = CheckpointStore::new(dir.path(), "run");
        assert!(matches!(store.load(), Err(Error::Checkpoint(_))));
    }

    #[test]
    fn test_clear_removes_files() {
        let dir = tempdir().unwrap();
        let ckpt_dir = dir.path().join("ckpt");
        let mut store = CheckpointStore::new(&ckpt_dir, "run").owning_dir();
        let mut record = CheckpointRecord::new("run", Path::new("/s"), Path::new("/d"));

        store.mark_processed(Path::new("/s/x.jpg")).unwrap();
        store.save(&mut record).unwrap();
        assert!(store.exists());

        store.clear().unwrap();
        assert!(!store.exists());
        assert!(!store.is_processed(Path::new("/s/x.jpg")));
        assert!(!ckpt_dir.exists());
    }

    #[test]
    fn test_clear_keeps_borrowed_dir() {
        let dir = tempdir().unwrap();
        let ckpt_dir = dir.path().join("state");
        fs::create_dir_all(&ckpt_dir).unwrap();
        let mut store = CheckpointStore::new(&ckpt_dir, "run");
        let mut record = CheckpointRecord::new("run", Path::new("/s"), Path::new("/d"));

        store.save(&mut record).unwrap();
        store.clear().unwrap();

        assert!(!store.exists());
        assert!(ckpt_dir.is_dir());
    }
}
