//! Configuration types for the media sorter

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the hidden directory that holds checkpoints by default
pub const CHECKPOINT_DIR_NAME: &str = ".media-sorter";

/// Configuration for one organizing session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory scanned recursively for media files
    pub source_dir: PathBuf,

    /// Root of the year/month tree
    pub dest_dir: PathBuf,

    /// Extension allow-list (lowercase, without dot). Empty accepts every file.
    pub extensions: Vec<String>,

    /// Directories to exclude from scanning (absolute paths or folder names)
    pub exclude_dirs: Vec<PathBuf>,

    /// Where checkpoints live; defaults to `<dest_dir>/.media-sorter`
    pub checkpoint_dir: Option<PathBuf>,

    /// Discard an existing checkpoint instead of resuming it
    pub fresh: bool,

    /// Consult EXIF capture dates when the filename carries no date
    pub use_exif: bool,

    /// Oldest accepted year
    pub min_year: i32,

    /// Log a progress line every N processed files
    pub progress_interval: usize,

    /// Dry run mode - decide everything, touch nothing
    pub dry_run: bool,

    /// Verbose output
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::new(),
            dest_dir: PathBuf::new(),
            extensions: default_extensions(),
            exclude_dirs: vec![],
            checkpoint_dir: None,
            fresh: false,
            use_exif: true,
            min_year: 1990,
            progress_interval: 50,
            dry_run: false,
            verbose: false,
        }
    }
}

/// Media extensions accepted when no allow-list is configured
pub fn default_extensions() -> Vec<String> {
    [
        // images
        "jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp", "heic",
        // video
        "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm",
        // audio
        "mp3", "wav", "flac", "aac", "ogg", "wma",
    ]
    .iter()
    .map(|e| e.to_string())
    .collect()
}

impl Config {
    /// Check if a file extension passes the allow-list
    pub fn is_supported(&self, ext: Option<&str>) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        match ext {
            Some(ext) => {
                let ext_lower = ext.to_lowercase();
                self.extensions
                    .iter()
                    .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext_lower))
            }
            None => false,
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(path, content).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# Media Sorter Configuration File
# This file uses TOML format (https://toml.io)

# Directory scanned recursively for media files
source_dir = "/home/pi/photos"

# Root of the organized tree: <dest_dir>/YYYY/MM/<file>
# May be the same as source_dir to organize in place
dest_dir = "/srv/media/Photos"

# Extensions to organize (case-insensitive). An empty list accepts every file.
extensions = ["jpg", "jpeg", "png", "heic", "mp4", "mov"]

# Directories to skip while scanning (absolute paths or folder names)
exclude_dirs = ["@eaDir", ".thumbnails"]

# Checkpoint directory (default: <dest_dir>/.media-sorter)
# checkpoint_dir = "/var/lib/media-sorter"

# Look at EXIF capture dates when the filename has no date
use_exif = true

# Files dated before this year are skipped
min_year = 1990

# Log a progress line every N files
progress_interval = 50

# Dry run mode - show what would be done without doing it
dry_run = false
"#
        .to_string()
    }
}

/// Errors that can occur when loading or saving configuration
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read configuration file
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse configuration file
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to write configuration file
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to serialize configuration
    SerializeError { source: toml::ser::Error },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError { path, source } => {
                write!(f, "Failed to read config file '{}': {}", path.display(), source)
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), source)
            }
            ConfigError::WriteError { path, source } => {
                write!(f, "Failed to write config file '{}': {}", path.display(), source)
            }
            ConfigError::SerializeError { source } => {
                write!(f, "Failed to serialize config: {}", source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::WriteError { source, .. } => Some(source),
            ConfigError::SerializeError { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_extension_filter() {
        let config = Config::default();
        assert!(config.is_supported(Some("jpg")));
        assert!(config.is_supported(Some("JPG")));
        assert!(config.is_supported(Some("Mov")));
        assert!(!config.is_supported(Some("json")));
        assert!(!config.is_supported(None));

        let config = Config {
            extensions: vec![".PNG".into()],
            ..Config::default()
        };
        assert!(config.is_supported(Some("png")));
        assert!(!config.is_supported(Some("jpg")));

        let config = Config {
            extensions: vec![],
            ..Config::default()
        };
        assert!(config.is_supported(Some("anything")));
        assert!(config.is_supported(None));
    }

    #[test]
    fn test_sample_config_parses() {
        let config: Config = toml::from_str(&Config::sample_config()).unwrap();
        assert_eq!(config.dest_dir, PathBuf::from("/srv/media/Photos"));
        assert_eq!(config.progress_interval, 50);
        assert!(config.checkpoint_dir.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("sorter.toml");

        let config = Config {
            source_dir: PathBuf::from("/in"),
            dest_dir: PathBuf::from("/out"),
            min_year: 2000,
            ..Config::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.source_dir, PathBuf::from("/in"));
        assert_eq!(loaded.min_year, 2000);
        assert_eq!(loaded.extensions, default_extensions());
    }
}
