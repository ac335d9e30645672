//! Filename date parsing
//!
//! Rules are tried in order. A rule that matches but carries a month outside
//! 1-12 does not stop the cascade; the next rule gets its turn.

use regex::Regex;
use std::sync::OnceLock;
use tracing::trace;

/// A single filename rule able to pull a year and month out of a stem
pub trait DatePattern: Send + Sync {
    /// Short name used in logs and as the date source label
    fn name(&self) -> &'static str;

    /// Return the first `(year, month)` this rule finds with a calendar-valid month
    fn try_extract(&self, stem: &str) -> Option<(i32, u32)>;
}

/// Regex-backed rule with fixed capture groups for year and month
struct RegexPattern {
    name: &'static str,
    regex: Regex,
    year_group: usize,
    month_group: usize,
}

impl DatePattern for RegexPattern {
    fn name(&self) -> &'static str {
        self.name
    }

    fn try_extract(&self, stem: &str) -> Option<(i32, u32)> {
        // Boundary groups consume a character, so resume one character past
        // each match start rather than after the whole match
        let mut start = 0;
        while let Some(caps) = self.regex.captures_at(stem, start) {
            let matched = caps.get(0)?;
            start = matched.start()
                + stem[matched.start()..]
                    .chars()
                    .next()
                    .map_or(1, char::len_utf8);

            let (Some(year), Some(month)) = (caps.get(self.year_group), caps.get(self.month_group))
            else {
                continue;
            };
            let Ok(year) = year.as_str().parse::<i32>() else {
                continue;
            };
            match parse_month(month.as_str()) {
                Some(month) => return Some((year, month)),
                None => {
                    trace!(rule = self.name, month = month.as_str(), "Month out of range");
                }
            }
            if start > stem.len() {
                break;
            }
        }
        None
    }
}

/// Parse a month field as base 10, so "08" and "09" are August and September
pub fn parse_month(s: &str) -> Option<u32> {
    let digits = s.trim_start_matches('0');
    if digits.is_empty() {
        return None;
    }
    let month = u32::from_str_radix(digits, 10).ok()?;
    (1..=12).contains(&month).then_some(month)
}

static PATTERNS: OnceLock<Vec<RegexPattern>> = OnceLock::new();

/// The ordered rule list
fn get_patterns() -> &'static [RegexPattern] {
    PATTERNS.get_or_init(|| {
        vec![
            // vacanza_2024-03-15_tramonto, 2024_03_15, IMG_20240908
            RegexPattern {
                name: "ymd",
                regex: Regex::new(r"^\D*(\d{4})[-_]?(\d{2})[-_]?(\d{2})(?:\D|$)").unwrap(),
                year_group: 1,
                month_group: 2,
            },
            // 15-03-2024
            RegexPattern {
                name: "dmy",
                regex: Regex::new(r"(?:^|\D)(\d{2})[-_.](\d{2})[-_.](\d{4})(?:\D|$)").unwrap(),
                year_group: 3,
                month_group: 2,
            },
            // 03-15-2024, reached only when the day-first reading has no valid month
            RegexPattern {
                name: "mdy",
                regex: Regex::new(r"(?:^|\D)(\d{2})[-_.](\d{2})[-_.](\d{4})(?:\D|$)").unwrap(),
                year_group: 3,
                month_group: 1,
            },
            // cam1_20230714_123456, PXL20230714123456
            RegexPattern {
                name: "ymd-timestamp",
                regex: Regex::new(r"(\d{4})(\d{2})(\d{2})[-_T]?\d{6}").unwrap(),
                year_group: 1,
                month_group: 2,
            },
            // Foto 2019 - 07 estate
            RegexPattern {
                name: "year-month-loose",
                regex: Regex::new(r"(?:^|\D)(\d{4})\D+(\d{2})(?:\D|$)").unwrap(),
                year_group: 1,
                month_group: 2,
            },
        ]
    })
}

/// Strip the last extension, keeping dotted names like "a.b.jpg" -> "a.b"
fn file_stem(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        _ => filename,
    }
}

/// Parse `(year, month)` from a filename, returning the matching rule name too
pub fn parse_filename_date(filename: &str) -> Option<(i32, u32, &'static str)> {
    let stem = file_stem(filename);

    for pattern in get_patterns() {
        if let Some((year, month)) = pattern.try_extract(stem) {
            trace!(filename, rule = pattern.name(), year, month, "Matched filename rule");
            return Some((year, month, pattern.name()));
        }
    }

    None
}
