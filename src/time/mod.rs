//! Date extraction module
//!
//! Derives the year and month a media file belongs to from:
//! - Filename patterns
//! - An optional metadata source (EXIF capture date)
//! - File system modification time

pub mod exif;
pub mod filename;

use crate::error::Result;
use chrono::{DateTime, Datelike, Local};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;

pub use exif::ExifMetadata;

/// Source of the extracted date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSource {
    /// Parsed from the filename by the named rule
    Filename(&'static str),
    /// Read from embedded metadata
    Metadata,
    /// From file system modification time
    FileSystem,
}

impl fmt::Display for DateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateSource::Filename(rule) => write!(f, "filename:{}", rule),
            DateSource::Metadata => f.write_str("metadata"),
            DateSource::FileSystem => f.write_str("mtime"),
        }
    }
}

/// A year and month derived for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedDate {
    pub year: i32,
    pub month: u32,
    pub source: DateSource,
}

impl ExtractedDate {
    /// Two-digit month directory name
    pub fn month_dir(&self) -> String {
        format!("{:02}", self.month)
    }
}

/// External provider of a capture date, e.g. EXIF
pub trait MetadataSource: Send + Sync {
    /// Year and month the file was captured, or `None` when unavailable
    fn capture_date(&self, path: &Path) -> Option<(i32, u32)>;
}

/// Metadata source that never knows anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetadata;

impl MetadataSource for NoMetadata {
    fn capture_date(&self, _path: &Path) -> Option<(i32, u32)> {
        None
    }
}

/// Outcome of running the cascade on one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateVerdict {
    /// Date passed the validity gate
    Valid(ExtractedDate),
    /// A date was found but lies outside the accepted range
    OutOfRange(ExtractedDate),
}

/// Runs the filename cascade, then metadata, then mtime, and gates the result
pub struct DateExtractor {
    metadata: Box<dyn MetadataSource>,
    min_year: i32,
    max_year: i32,
}

impl DateExtractor {
    /// Extractor accepting years from `min_year` up to the current year
    pub fn new(metadata: Box<dyn MetadataSource>, min_year: i32) -> Self {
        Self {
            metadata,
            min_year,
            max_year: Local::now().year(),
        }
    }

    /// Override the upper bound of the accepted range
    pub fn with_max_year(mut self, max_year: i32) -> Self {
        self.max_year = max_year;
        self
    }

    /// Whether a year/month pair passes the gate
    pub fn is_valid(&self, year: i32, month: u32) -> bool {
        (self.min_year..=self.max_year).contains(&year) && (1..=12).contains(&month)
    }

    /// Extract a date for the file at `path`
    ///
    /// Fails only if the filename has no date, metadata has none, and the
    /// file's modification time cannot be read.
    pub fn extract(&self, path: &Path) -> Result<DateVerdict> {
        let date = self.find_date(path)?;
        if self.is_valid(date.year, date.month) {
            Ok(DateVerdict::Valid(date))
        } else {
            Ok(DateVerdict::OutOfRange(date))
        }
    }

    fn find_date(&self, path: &Path) -> Result<ExtractedDate> {
        if let Some(filename) = path.file_name().and_then(|f| f.to_str())
            && let Some((year, month, rule)) = filename::parse_filename_date(filename)
        {
            debug!(?path, rule, "Extracted date from filename");
            return Ok(ExtractedDate {
                year,
                month,
                source: DateSource::Filename(rule),
            });
        }

        if let Some((year, month)) = self.metadata.capture_date(path) {
            debug!(?path, "Extracted date from metadata");
            return Ok(ExtractedDate {
                year,
                month,
                source: DateSource::Metadata,
            });
        }

        let modified = fs::metadata(path)?.modified()?;
        let datetime: DateTime<Local> = modified.into();
        debug!(?path, "Using file system modification time as fallback");

        Ok(ExtractedDate {
            year: datetime.year(),
            month: datetime.month(),
            source: DateSource::FileSystem,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    struct FixedMetadata(i32, u32);

    impl MetadataSource for FixedMetadata {
        fn capture_date(&self, _path: &Path) -> Option<(i32, u32)> {
            Some((self.0, self.1))
        }
    }

    #[test]
    fn test_filename_wins_over_metadata() {
        let extractor = DateExtractor::new(Box::new(FixedMetadata(2001, 2)), 1990);
        let verdict = extractor
            .extract(&PathBuf::from("/nowhere/IMG_20240908.jpg"))
            .unwrap();
        assert_eq!(
            verdict,
            DateVerdict::Valid(ExtractedDate {
                year: 2024,
                month: 9,
                source: DateSource::Filename("ymd"),
            })
        );
    }

    #[test]
    fn test_metadata_fallback() {
        let extractor = DateExtractor::new(Box::new(FixedMetadata(2001, 2)), 1990);
        let verdict = extractor.extract(&PathBuf::from("/nowhere/photo.jpg")).unwrap();
        match verdict {
            DateVerdict::Valid(date) => {
                assert_eq!((date.year, date.month), (2001, 2));
                assert_eq!(date.source, DateSource::Metadata);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_mtime_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("untitled.jpg");
        File::create(&path).unwrap();

        let extractor = DateExtractor::new(Box::new(NoMetadata), 1990);
        match extractor.extract(&path).unwrap() {
            DateVerdict::Valid(date) => {
                let now = Local::now();
                assert_eq!(date.source, DateSource::FileSystem);
                assert_eq!(date.year, now.year());
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn test_mtime_out_of_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.jpg");
        File::create(&path).unwrap();
        // 1980-01-01
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(315_532_800 + 86_400);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old)).unwrap();

        let extractor = DateExtractor::new(Box::new(NoMetadata), 1990);
        assert!(matches!(
            extractor.extract(&path).unwrap(),
            DateVerdict::OutOfRange(ExtractedDate { year: 1980, .. })
        ));
    }

    #[test]
    fn test_gate_bounds() {
        let extractor = DateExtractor::new(Box::new(NoMetadata), 1990).with_max_year(2024);
        assert!(extractor.is_valid(1990, 1));
        assert!(extractor.is_valid(2024, 12));
        assert!(!extractor.is_valid(1989, 6));
        assert!(!extractor.is_valid(2025, 1));
        assert!(!extractor.is_valid(2020, 0));

        let verdict = extractor
            .extract(&PathBuf::from("/nowhere/2031-05-01.jpg"))
            .unwrap();
        assert!(matches!(verdict, DateVerdict::OutOfRange(_)));
    }

    #[test]
    fn test_missing_file_without_date_fails() {
        let extractor = DateExtractor::new(Box::new(NoMetadata), 1990);
        assert!(extractor.extract(&PathBuf::from("/nowhere/photo.jpg")).is_err());
    }

    #[test]
    fn test_month_dir_padding() {
        let date = ExtractedDate {
            year: 2024,
            month: 9,
            source: DateSource::FileSystem,
        };
        assert_eq!(date.month_dir(), "09");
    }
}
