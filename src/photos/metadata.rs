//! Capture-date extraction from image metadata.
//!
//! Never fails: the result is always a best-effort timestamp plus a
//! confidence flag. The chain is EXIF `DateTimeOriginal`, then the file's
//! own modification time, then the wall clock at ingestion. Only the EXIF
//! source (and a later manual override) counts as authoritative; callers
//! should offer low-confidence dates for correction.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Seek};
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use crate::db::records::DateConfidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedDate {
    pub taken_at: NaiveDateTime,
    pub confidence: DateConfidence,
}

impl ExtractedDate {
    pub fn is_low_confidence(&self) -> bool {
        self.confidence.is_low_confidence()
    }
}

/// Extract a capture date from an image file on disk.
pub fn extract_from_path(path: &Path) -> ExtractedDate {
    if let Ok(file) = File::open(path) {
        let mut reader = BufReader::new(file);
        if let Some(taken_at) = exif_capture_date(&mut reader) {
            return ExtractedDate {
                taken_at,
                confidence: DateConfidence::Exif,
            };
        }
    }

    if let Some(taken_at) = file_mtime(path) {
        return ExtractedDate {
            taken_at,
            confidence: DateConfidence::FileMtime,
        };
    }

    ExtractedDate {
        taken_at: truncate_to_seconds(Utc::now().naive_utc()),
        confidence: DateConfidence::WallClock,
    }
}

/// Extract a capture date from raw image bytes that have not been written
/// to disk yet. There is no mtime to fall back on, so the chain is EXIF
/// then wall clock.
pub fn extract_from_bytes(bytes: &[u8]) -> ExtractedDate {
    let mut cursor = Cursor::new(bytes);
    if let Some(taken_at) = exif_capture_date(&mut cursor) {
        return ExtractedDate {
            taken_at,
            confidence: DateConfidence::Exif,
        };
    }

    ExtractedDate {
        taken_at: truncate_to_seconds(Utc::now().naive_utc()),
        confidence: DateConfidence::WallClock,
    }
}

fn exif_capture_date<R: BufRead + Seek>(reader: &mut R) -> Option<NaiveDateTime> {
    let exif = exif::Reader::new().read_from_container(reader).ok()?;
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let raw = field
        .display_value()
        .to_string()
        .trim_matches('"')
        .to_string();
    parse_exif_datetime(&raw)
}

/// EXIF datetime is `YYYY:MM:DD HH:MM:SS`; some writers use dashes.
fn parse_exif_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

fn file_mtime(path: &Path) -> Option<NaiveDateTime> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(truncate_to_seconds(DateTime::<Utc>::from(modified).naive_utc()))
}

/// The store keeps seconds-precision timestamps; extracted dates match it
/// so a photo row reads back exactly as it was returned.
fn truncate_to_seconds(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_parse_exif_datetime_formats() {
        let expected = chrono::NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(parse_exif_datetime("2023:06:01 10:30:00"), Some(expected));
        assert_eq!(parse_exif_datetime("2023-06-01 10:30:00"), Some(expected));
        assert_eq!(parse_exif_datetime("yesterday"), None);
    }

    #[test]
    fn test_no_exif_falls_back_to_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.jpg");
        let mut file = std::fs::File::create(&path).unwrap();
        // Not a valid image container at all; extraction must still succeed
        file.write_all(b"not an image").unwrap();
        drop(file);

        let extracted = extract_from_path(&path);
        assert_eq!(extracted.confidence, DateConfidence::FileMtime);
        assert!(extracted.is_low_confidence());

        let mtime = file_mtime(&path).unwrap();
        assert_eq!(extracted.taken_at, mtime);
    }

    #[test]
    fn test_missing_file_falls_back_to_wall_clock() {
        let before = truncate_to_seconds(Utc::now().naive_utc());
        let extracted = extract_from_path(Path::new("/nonexistent/photo.jpg"));
        let after = Utc::now().naive_utc();

        assert_eq!(extracted.confidence, DateConfidence::WallClock);
        assert_eq!(extracted.taken_at.nanosecond(), 0);
        assert!(extracted.taken_at >= before && extracted.taken_at <= after);
    }

    #[test]
    fn test_bytes_without_exif_use_wall_clock() {
        let extracted = extract_from_bytes(b"garbage");
        assert_eq!(extracted.confidence, DateConfidence::WallClock);
    }
}
