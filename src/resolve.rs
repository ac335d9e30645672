//! Destination and duplicate resolution
//!
//! Maps a dated file to `dest/YYYY/MM/name` and decides what to do when that
//! path is already taken. Occupancy is answered by a [`DestinationView`], so
//! the same decisions run against the live filesystem or a dry-run shadow.

use crate::error::{Error, Result};
use crate::time::ExtractedDate;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, trace};

/// Reserved marker appended to sources that duplicate an organized file
pub const DUPLICATE_MARKER: &str = "_DUP";

/// Upper bound for numeric tie-breakers
const MAX_COUNTER: u32 = 10_000;

/// Chunk size for content comparison
const COMPARE_CHUNK: usize = 64 * 1024;

/// Decided outcome for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Move to the candidate path
    Move(PathBuf),
    /// Source already sits at its destination
    AlreadyInPlace,
    /// Identical content already organized; rename the source in place
    RenameAsDuplicate(PathBuf),
    /// Different file with the same name; move under a counter-suffixed name
    MoveWithSuffix { dest: PathBuf, counter: u32 },
    /// No usable date
    SkipInvalidDate,
}

impl Disposition {
    /// Path the source ends up at, if it moves or is renamed
    pub fn target(&self) -> Option<&Path> {
        match self {
            Disposition::Move(dest) | Disposition::RenameAsDuplicate(dest) => Some(dest.as_path()),
            Disposition::MoveWithSuffix { dest, .. } => Some(dest.as_path()),
            Disposition::AlreadyInPlace | Disposition::SkipInvalidDate => None,
        }
    }
}

static DUP_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Whether a filename carries the reserved duplicate marker (`_DUP`, `_DUP2`, ...)
pub fn is_duplicate_marked(path: &Path) -> bool {
    let pattern = DUP_PATTERN.get_or_init(|| Regex::new(r"_DUP\d*$").unwrap());
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| pattern.is_match(stem))
        .unwrap_or(false)
}

/// Build `dest_root/YYYY/MM/file_name`
pub fn destination_for(dest_root: &Path, date: &ExtractedDate, file_name: &str) -> PathBuf {
    let mut dest = dest_root.to_path_buf();
    dest.push(format!("{}", date.year));
    dest.push(date.month_dir());
    dest.push(file_name);
    dest
}

/// Answers "what sits at this path" for the resolver
pub trait DestinationView {
    /// The file whose content occupies `path`, if any
    fn occupant(&self, path: &Path) -> Option<PathBuf>;

    /// Note a decided disposition so later decisions see its effect
    fn record(&mut self, _source: &Path, _disposition: &Disposition) {}

    fn is_free(&self, path: &Path) -> bool {
        self.occupant(path).is_none()
    }
}

/// The real filesystem; decisions are applied for real, so nothing to record
#[derive(Debug, Default)]
pub struct LiveView;

impl DestinationView for LiveView {
    fn occupant(&self, path: &Path) -> Option<PathBuf> {
        fs::symlink_metadata(path).ok().map(|_| path.to_path_buf())
    }
}

/// Dry-run overlay: the real filesystem plus the moves simulated so far
///
/// A planned target is occupied by the source planned to land there, so a
/// later collision compares against real bytes instead of guessing.
#[derive(Debug, Default)]
pub struct ShadowView {
    planned: HashMap<PathBuf, PathBuf>,
    vacated: HashSet<PathBuf>,
}

impl ShadowView {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DestinationView for ShadowView {
    fn occupant(&self, path: &Path) -> Option<PathBuf> {
        if let Some(source) = self.planned.get(path) {
            return Some(source.clone());
        }
        if self.vacated.contains(path) {
            return None;
        }
        fs::symlink_metadata(path).ok().map(|_| path.to_path_buf())
    }

    fn record(&mut self, source: &Path, disposition: &Disposition) {
        if let Some(target) = disposition.target() {
            self.planned.insert(target.to_path_buf(), source.to_path_buf());
            self.planned.remove(source);
            self.vacated.insert(source.to_path_buf());
        }
    }
}

/// Decide the disposition of `source` given its candidate destination
pub fn resolve_disposition(
    source: &Path,
    candidate: PathBuf,
    view: &dyn DestinationView,
) -> Result<Disposition> {
    if is_same_file(source, &candidate) {
        return Ok(Disposition::AlreadyInPlace);
    }

    let Some(occupant) = view.occupant(&candidate) else {
        return Ok(Disposition::Move(candidate));
    };

    if files_identical(source, &occupant)? {
        debug!(?source, ?occupant, "Identical content already at destination");
        let renamed = duplicate_name(source, view)?;
        Ok(Disposition::RenameAsDuplicate(renamed))
    } else {
        let (dest, counter) = suffixed_name(&candidate, view)?;
        debug!(?source, ?dest, counter, "Name taken by different content");
        Ok(Disposition::MoveWithSuffix { dest, counter })
    }
}

/// Both paths resolve to the same file after following symlinks
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Byte-for-byte comparison, short-circuiting on size
pub fn files_identical(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }

    let mut left = BufReader::with_capacity(COMPARE_CHUNK, File::open(a)?);
    let mut right = BufReader::with_capacity(COMPARE_CHUNK, File::open(b)?);
    let mut buf_left = vec![0u8; COMPARE_CHUNK];
    let mut buf_right = vec![0u8; COMPARE_CHUNK];

    loop {
        let n = read_full(&mut left, &mut buf_left)?;
        let m = read_full(&mut right, &mut buf_right)?;
        if n != m || buf_left[..n] != buf_right[..m] {
            return Ok(false);
        }
        if n == 0 {
            trace!(?a, ?b, "Contents identical");
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Split a path into parent, stem and ".ext"
fn split_name(path: &Path) -> Result<(PathBuf, String, String)> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::NameExhausted {
            path: path.to_path_buf(),
        })?
        .to_string();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let parent = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    Ok((parent, stem, extension))
}

/// First free `stem_DUP.ext`, `stem_DUP2.ext`, ... next to the source
fn duplicate_name(source: &Path, view: &dyn DestinationView) -> Result<PathBuf> {
    let (parent, stem, extension) = split_name(source)?;

    for i in 1..MAX_COUNTER {
        let tag = if i > 1 { i.to_string() } else { String::new() };
        let path = parent.join(format!("{}{}{}{}", stem, DUPLICATE_MARKER, tag, extension));
        if view.is_free(&path) {
            return Ok(path);
        }
    }

    Err(Error::NameExhausted {
        path: source.to_path_buf(),
    })
}

/// First free `stem_N.ext` next to the candidate
fn suffixed_name(candidate: &Path, view: &dyn DestinationView) -> Result<(PathBuf, u32)> {
    let (parent, stem, extension) = split_name(candidate)?;

    for i in 1..MAX_COUNTER {
        let path = parent.join(format!("{}_{}{}", stem, i, extension));
        if view.is_free(&path) {
            return Ok((path, i));
        }
    }

    Err(Error::NameExhausted {
        path: candidate.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::DateSource;
    use tempfile::tempdir;

    fn date(year: i32, month: u32) -> ExtractedDate {
        ExtractedDate {
            year,
            month,
            source: DateSource::FileSystem,
        }
    }

    #[test]
    fn test_destination_zero_pads_month() {
        let dest = destination_for(Path::new("/out"), &date(2024, 9), "IMG_20240908.jpg");
        assert_eq!(dest, PathBuf::from("/out/2024/09/IMG_20240908.jpg"));

        let dest = destination_for(Path::new("/out"), &date(2023, 12), "a.png");
        assert_eq!(dest, PathBuf::from("/out/2023/12/a.png"));
    }

    #[test]
    fn test_duplicate_marker_detection() {
        assert!(is_duplicate_marked(Path::new("photo_DUP.jpg")));
        assert!(is_duplicate_marked(Path::new("/a/b/photo_DUP2.jpg")));
        assert!(is_duplicate_marked(Path::new("photo_DUP17")));
        assert!(!is_duplicate_marked(Path::new("photo.jpg")));
        assert!(!is_duplicate_marked(Path::new("photo_DUPLEX.jpg")));
        assert!(!is_duplicate_marked(Path::new("photo_dup.jpg")));
    }

    #[test]
    fn test_move_when_free() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"a").unwrap();
        let candidate = dir.path().join("out/2024/01/a.jpg");

        let disposition = resolve_disposition(&source, candidate.clone(), &LiveView).unwrap();
        assert_eq!(disposition, Disposition::Move(candidate));
    }

    #[test]
    fn test_already_in_place() {
        let dir = tempdir().unwrap();
        let placed = dir.path().join("2024/01/a.jpg");
        fs::create_dir_all(placed.parent().unwrap()).unwrap();
        fs::write(&placed, b"a").unwrap();

        let candidate = dir.path().join("2024").join("01").join("a.jpg");
        let disposition = resolve_disposition(&placed, candidate, &LiveView).unwrap();
        assert_eq!(disposition, Disposition::AlreadyInPlace);
    }

    #[test]
    fn test_identical_content_renames_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in/a.jpg");
        let existing = dir.path().join("out/a.jpg");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&source, b"same bytes").unwrap();
        fs::write(&existing, b"same bytes").unwrap();

        let disposition = resolve_disposition(&source, existing.clone(), &LiveView).unwrap();
        assert_eq!(
            disposition,
            Disposition::RenameAsDuplicate(dir.path().join("in/a_DUP.jpg"))
        );

        // _DUP taken, next is _DUP2
        fs::write(dir.path().join("in/a_DUP.jpg"), b"older").unwrap();
        let disposition = resolve_disposition(&source, existing, &LiveView).unwrap();
        assert_eq!(
            disposition,
            Disposition::RenameAsDuplicate(dir.path().join("in/a_DUP2.jpg"))
        );
    }

    #[test]
    fn test_different_content_gets_counter() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("in/a.jpg");
        let existing = dir.path().join("out/a.jpg");
        fs::create_dir_all(source.parent().unwrap()).unwrap();
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&source, b"new").unwrap();
        fs::write(&existing, b"old").unwrap();
        fs::write(dir.path().join("out/a_1.jpg"), b"older").unwrap();

        let disposition = resolve_disposition(&source, existing, &LiveView).unwrap();
        assert_eq!(
            disposition,
            Disposition::MoveWithSuffix {
                dest: dir.path().join("out/a_2.jpg"),
                counter: 2,
            }
        );
    }

    #[test]
    fn test_files_identical() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let c = dir.path().join("c");
        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut other = big.clone();
        *other.last_mut().unwrap() ^= 0xff;
        fs::write(&a, &big).unwrap();
        fs::write(&b, &big).unwrap();
        fs::write(&c, &other).unwrap();

        assert!(files_identical(&a, &b).unwrap());
        assert!(!files_identical(&a, &c).unwrap());
        assert!(files_identical(&a, &dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_shadow_sees_planned_moves() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("in/one/a.jpg");
        let second = dir.path().join("in/two/a.jpg");
        let third = dir.path().join("in/three/a.jpg");
        for (path, bytes) in [(&first, &b"x"[..]), (&second, b"x"), (&third, b"y")] {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, bytes).unwrap();
        }
        let candidate = dir.path().join("out/2024/01/a.jpg");

        let mut shadow = ShadowView::new();
        let d1 = resolve_disposition(&first, candidate.clone(), &shadow).unwrap();
        assert_eq!(d1, Disposition::Move(candidate.clone()));
        shadow.record(&first, &d1);

        // Same bytes as the planned occupant
        let d2 = resolve_disposition(&second, candidate.clone(), &shadow).unwrap();
        assert_eq!(
            d2,
            Disposition::RenameAsDuplicate(dir.path().join("in/two/a_DUP.jpg"))
        );
        shadow.record(&second, &d2);

        // Different bytes
        let d3 = resolve_disposition(&third, candidate, &shadow).unwrap();
        assert_eq!(
            d3,
            Disposition::MoveWithSuffix {
                dest: dir.path().join("out/2024/01/a_1.jpg"),
                counter: 1,
            }
        );

        // Nothing was touched
        assert!(!dir.path().join("out").exists());
        assert!(first.exists());
        assert!(!dir.path().join("in/two/a_DUP.jpg").exists());
    }

    #[test]
    fn test_shadow_vacated_source_is_free() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"a").unwrap();

        let mut shadow = ShadowView::new();
        assert!(!shadow.is_free(&source));
        shadow.record(&source, &Disposition::Move(dir.path().join("2024/01/a.jpg")));
        assert!(shadow.is_free(&source));
        assert!(!shadow.is_free(&dir.path().join("2024/01/a.jpg")));
    }
}
