//! CLI argument parsing with clap

use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;

/// Media Sorter - move photos, videos and audio into a YYYY/MM tree
///
/// Dates come from the filename, then EXIF, then the modification time.
/// Progress is checkpointed after every file so an interrupted run resumes
/// where it stopped.
#[derive(Parser, Debug)]
#[command(name = "media-sorter")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file (TOML format)
    ///
    /// When specified, settings from the config file are used as defaults.
    /// CLI arguments will override config file settings.
    #[arg(short = 'C', long)]
    pub config: Option<PathBuf>,

    /// Directory to scan for media files
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Root of the organized tree (may equal the source)
    #[arg(short, long)]
    pub dest: Option<PathBuf>,

    /// Extension to organize; repeat to build the allow-list
    #[arg(short, long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Directories to skip (absolute paths or folder names)
    #[arg(long, num_args = 1..)]
    pub exclude: Option<Vec<PathBuf>>,

    /// Checkpoint directory [default: <dest>/.media-sorter]
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Discard an unfinished session's checkpoint and start over
    #[arg(long)]
    pub fresh: bool,

    /// Do not read EXIF capture dates
    #[arg(long)]
    pub no_exif: bool,

    /// Oldest year accepted as a valid date
    #[arg(long)]
    pub min_year: Option<i32>,

    /// Log a progress line every N files (0 disables)
    #[arg(long)]
    pub progress_interval: Option<usize>,

    /// Dry run mode - show what would be done without doing it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Output log format as JSON
    #[arg(long)]
    pub json_log: bool,

    /// Directory for log files [default: Log/ next to the executable]
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Print an annotated sample configuration and exit
    #[arg(long)]
    pub sample_config: bool,

    /// Save the effective configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    pub write_config: Option<PathBuf>,
}

impl Cli {
    /// Get config file name (without extension) for log naming
    pub fn config_name(&self) -> Option<String> {
        self.config.as_ref().and_then(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
        })
    }

    /// Merge CLI arguments with config from file
    /// CLI arguments take precedence over config file settings
    pub fn merge_with_config(&self, mut config: Config) -> Config {
        if let Some(ref source) = self.source {
            config.source_dir = source.clone();
        }
        if let Some(ref dest) = self.dest {
            config.dest_dir = dest.clone();
        }
        if !self.extensions.is_empty() {
            config.extensions = normalize_extensions(&self.extensions);
        }
        if let Some(ref exclude) = self.exclude {
            config.exclude_dirs = exclude.clone();
        }
        if let Some(ref dir) = self.checkpoint_dir {
            config.checkpoint_dir = Some(dir.clone());
        }
        if let Some(min_year) = self.min_year {
            config.min_year = min_year;
        }
        if let Some(interval) = self.progress_interval {
            config.progress_interval = interval;
        }
        if self.no_exif {
            config.use_exif = false;
        }
        // Boolean flags only enable, never disable
        config.fresh = config.fresh || self.fresh;
        config.dry_run = config.dry_run || self.dry_run;
        config.verbose = config.verbose || self.verbose;

        config
    }

    /// Create config from CLI arguments only (no config file)
    pub fn to_config(&self) -> Config {
        self.merge_with_config(Config::default())
    }
}

/// Lowercase and strip leading dots
fn normalize_extensions(exts: &[String]) -> Vec<String> {
    exts.iter()
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
