//! Media Sorter - resumable organizer for photo and video folders
//!
//! Moves media files from a source tree into `<dest>/YYYY/MM/` with:
//! - Date extraction from filenames, EXIF metadata and modification time
//! - Content-aware duplicate handling that never deletes anything
//! - A per-file checkpoint so interrupted sessions resume safely
//! - A dry-run mode that simulates the whole session

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod process;
pub mod resolve;
pub mod signal;
pub mod time;

pub use checkpoint::{CheckpointRecord, CheckpointStore, Counters, DuplicateRecord};
pub use cli::Cli;
pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use process::{Session, SessionReport, SessionStatus};
pub use resolve::Disposition;
pub use signal::{CancellationToken, install_interrupt_handler};
pub use time::{DateExtractor, DateSource, ExtractedDate};
