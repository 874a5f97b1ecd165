//! Annotated-image persistence: JPEG encode plus atomic replace.
//!
//! The bitmap is encoded in memory, written to a hidden sibling temp file,
//! fsynced, and renamed over the target. Readers see either the previous
//! file or the complete new one, never a truncated write.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage, RgbaImage};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default JPEG quality for persisted photos.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("target has no file name: {0}")]
    InvalidTarget(PathBuf),
}

/// Metadata of a successfully persisted image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedImage {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

/// Writes annotated bitmaps to photo files.
#[derive(Debug, Clone, Copy)]
pub struct AnnotatedImageWriter {
    quality: u8,
}

impl AnnotatedImageWriter {
    pub fn new() -> Self {
        Self::with_quality(DEFAULT_JPEG_QUALITY)
    }

    /// Quality is clamped to 1..=100.
    pub fn with_quality(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode `bitmap` and atomically replace `target` with it.
    ///
    /// Transparent pixels are flattened onto black. On any failure the
    /// target is left as it was.
    pub fn persist(&self, bitmap: &RgbaImage, target: &Path) -> Result<PersistedImage, WriteError> {
        let jpeg = self.encode(bitmap)?;

        let file_name = target
            .file_name()
            .ok_or_else(|| WriteError::InvalidTarget(target.to_path_buf()))?;
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|source| WriteError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let temp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
        if let Err(e) = write_synced(&temp_path, &jpeg) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(source) = fs::rename(&temp_path, target) {
            let _ = fs::remove_file(&temp_path);
            return Err(WriteError::Io {
                path: target.to_path_buf(),
                source,
            });
        }

        tracing::debug!(
            path = %target.display(),
            width = bitmap.width(),
            height = bitmap.height(),
            bytes = jpeg.len(),
            quality = self.quality,
            "persisted photo"
        );

        Ok(PersistedImage {
            path: target.to_path_buf(),
            width: bitmap.width(),
            height: bitmap.height(),
            bytes: jpeg.len() as u64,
        })
    }

    fn encode(&self, bitmap: &RgbaImage) -> Result<Vec<u8>, WriteError> {
        let rgb = flatten_on_black(bitmap);
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&rgb)?;
        Ok(jpeg)
    }
}

impl Default for AnnotatedImageWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Composite RGBA over an opaque black background.
fn flatten_on_black(bitmap: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(bitmap.width(), bitmap.height(), |x, y| {
        let p = bitmap.get_pixel(x, y);
        let a = p[3] as u16;
        let blend = |c: u8| ((c as u16 * a + 127) / 255) as u8;
        Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let io_err = |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn make_bitmap(w: u32, h: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(color))
    }

    #[test]
    fn test_persist_creates_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("IMG_1.JPG");
        let writer = AnnotatedImageWriter::new();

        let persisted = writer
            .persist(&make_bitmap(40, 30, [50, 100, 200, 255]), &target)
            .unwrap();

        assert_eq!(persisted.path, target);
        assert_eq!((persisted.width, persisted.height), (40, 30));
        assert_eq!(persisted.bytes, std::fs::metadata(&target).unwrap().len());

        let img = image::open(&target).unwrap();
        assert_eq!(img.width(), 40);
        assert_eq!(img.height(), 30);
        assert_eq!(
            image::ImageFormat::from_path(&target).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_persist_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("IMG_2.JPG");
        AnnotatedImageWriter::new()
            .persist(&make_bitmap(8, 8, [0, 0, 0, 255]), &target)
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("IMG_2.JPG")]);
    }

    #[test]
    fn test_persist_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("IMG_3.JPG");
        let writer = AnnotatedImageWriter::new();
        let bitmap = RgbaImage::from_fn(64, 48, |x, y| Rgba([(x * 4) as u8, (y * 5) as u8, 90, 255]));

        writer.persist(&bitmap, &target).unwrap();
        let first = std::fs::read(&target).unwrap();
        writer.persist(&bitmap, &target).unwrap();
        let second = std::fs::read(&target).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_persist_overwrites_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("IMG_4.JPG");
        std::fs::write(&target, b"stale").unwrap();

        AnnotatedImageWriter::new()
            .persist(&make_bitmap(16, 16, [255, 255, 255, 255]), &target)
            .unwrap();

        let pixel = image::open(&target).unwrap().to_rgb8().get_pixel(8, 8).0;
        assert!(pixel.iter().all(|&c| c > 240), "expected white, got {pixel:?}");
    }

    #[test]
    fn test_persist_flattens_transparency_to_black() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("IMG_5.JPG");

        AnnotatedImageWriter::new()
            .persist(&make_bitmap(16, 16, [255, 0, 255, 0]), &target)
            .unwrap();

        let pixel = image::open(&target).unwrap().to_rgb8().get_pixel(8, 8).0;
        assert!(pixel.iter().all(|&c| c < 16), "expected black, got {pixel:?}");
    }

    #[test]
    fn test_persist_failure_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a dir").unwrap();
        let target = blocker.join("IMG_6.JPG");

        let err = AnnotatedImageWriter::new()
            .persist(&make_bitmap(4, 4, [0, 0, 0, 255]), &target)
            .unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
        assert_eq!(std::fs::read(&blocker).unwrap(), b"not a dir");
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(AnnotatedImageWriter::with_quality(0).quality(), 1);
        assert_eq!(AnnotatedImageWriter::with_quality(200).quality(), 100);
        assert_eq!(AnnotatedImageWriter::default().quality(), 90);
    }

    #[test]
    fn test_flatten_on_black() {
        let mut img = make_bitmap(2, 1, [200, 100, 50, 255]);
        img.put_pixel(1, 0, Rgba([200, 100, 50, 0]));
        let flat = flatten_on_black(&img);
        assert_eq!(flat.get_pixel(0, 0).0, [200, 100, 50]);
        assert_eq!(flat.get_pixel(1, 0).0, [0, 0, 0]);
    }
}
