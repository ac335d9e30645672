//! EXIF capture date lookup for images

use crate::error::{Error, Result};
use crate::time::MetadataSource;
use chrono::{Datelike, NaiveDateTime};
use exif::{In, Reader, Tag};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, trace};

/// EXIF tags to try for date extraction, in priority order
const DATE_TAGS: &[Tag] = &[
    Tag::DateTimeOriginal,  // When the original image was taken
    Tag::DateTimeDigitized, // When the image was digitized
    Tag::DateTime,          // File modification date/time
];

/// Extensions whose containers kamadak-exif understands
const EXIF_EXTENSIONS: &[&str] = &["jpg", "jpeg", "tif", "tiff", "heic", "heif", "png", "webp"];

/// Metadata source backed by embedded EXIF tags
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifMetadata;

impl MetadataSource for ExifMetadata {
    fn capture_date(&self, path: &Path) -> Option<(i32, u32)> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())?;
        if !EXIF_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }

        match extract_exif_time(path) {
            Ok(dt) => Some((dt.year(), dt.month())),
            Err(e) => {
                debug!(?path, error = %e, "EXIF date unavailable");
                None
            }
        }
    }
}

/// Extract creation time from EXIF metadata
pub fn extract_exif_time(path: &Path) -> Result<NaiveDateTime> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let exif = Reader::new()
        .read_from_container(&mut reader)
        .map_err(|e| Error::ExifRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    for tag in DATE_TAGS {
        if let Some(field) = exif.get_field(*tag, In::PRIMARY)
            && let Some(datetime) = parse_exif_datetime(&field.display_value().to_string())
        {
            trace!(?path, ?tag, "Found EXIF date");
            return Ok(datetime);
        }
    }

    Err(Error::ExifRead {
        path: path.to_path_buf(),
        message: "No valid date tag found in EXIF data".to_string(),
    })
}

/// Parse EXIF datetime string format: "YYYY:MM:DD HH:MM:SS"
fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_matches('"');

    let formats = [
        "%Y:%m:%d %H:%M:%S",
        "%Y:%m:%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];

    formats
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_parse_exif_datetime() {
        let dt = parse_exif_datetime("2024:01:15 14:30:00").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 1, 15));

        let dt = parse_exif_datetime("\"2023:08:02 09:00:00\"").unwrap();
        assert_eq!(dt.month(), 8);

        let dt = parse_exif_datetime("2024-01-15 14:30:00").unwrap();
        assert_eq!(dt.year(), 2024);

        assert!(parse_exif_datetime("invalid").is_none());
        assert!(parse_exif_datetime("0000:00:00 00:00:00").is_none());
    }

    #[test]
    fn test_not_an_image_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.jpg");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"definitely not a jpeg").unwrap();

        assert_eq!(ExifMetadata.capture_date(&path), None);
        assert_eq!(ExifMetadata.capture_date(&dir.path().join("song.mp3")), None);
    }
}
