//! Photo file naming shared by the capture pipeline, writer, and codec.

use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Timestamp-derived photo file name, e.g. `IMG_20261019_075601_042.JPG`.
pub fn photo_file_name<Tz: TimeZone>(taken_at: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("IMG_{}.JPG", taken_at.format("%Y%m%d_%H%M%S_%3f"))
}

/// Pick a photo path in `dir` that does not exist yet.
///
/// Two captures within the same millisecond get `_1`, `_2`, ... suffixes.
/// Returns the bare file name alongside the full path.
pub fn unique_photo_path<Tz: TimeZone>(dir: &Path, taken_at: &DateTime<Tz>) -> (String, PathBuf)
where
    Tz::Offset: Display,
{
    let base = photo_file_name(taken_at);
    let path = dir.join(&base);
    if !path.exists() {
        return (base, path);
    }

    let stem = base.trim_end_matches(".JPG");
    let mut n = 1u32;
    loop {
        let name = format!("{stem}_{n}.JPG");
        let path = dir.join(&name);
        if !path.exists() {
            return (name, path);
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 7, 56, 1).unwrap()
            + chrono::Duration::milliseconds(42)
    }

    #[test]
    fn test_photo_file_name_format() {
        assert_eq!(photo_file_name(&fixed_time()), "IMG_20261019_075601_042.JPG");
    }

    #[test]
    fn test_unique_photo_path_free() {
        let dir = tempfile::tempdir().unwrap();
        let (name, path) = unique_photo_path(dir.path(), &fixed_time());
        assert_eq!(name, "IMG_20261019_075601_042.JPG");
        assert_eq!(path, dir.path().join(&name));
    }

    #[test]
    fn test_unique_photo_path_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IMG_20261019_075601_042.JPG"), b"x").unwrap();
        std::fs::write(dir.path().join("IMG_20261019_075601_042_1.JPG"), b"x").unwrap();

        let (name, _) = unique_photo_path(dir.path(), &fixed_time());
        assert_eq!(name, "IMG_20261019_075601_042_2.JPG");
    }
}
