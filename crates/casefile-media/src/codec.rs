//! Photo decoding: EXIF orientation correction and display scaling.

use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Clockwise rotation needed to display a photo upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Rotation {
    /// Map an EXIF orientation tag to a rotation.
    ///
    /// Only the pure rotations (6, 3, 8) are honoured; mirrored variants and
    /// unknown values display as stored.
    pub fn from_exif(orientation: u32) -> Self {
        match orientation {
            6 => Rotation::Cw90,
            3 => Rotation::Cw180,
            8 => Rotation::Cw270,
            _ => Rotation::None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Rotation::None => img,
            Rotation::Cw90 => img.rotate90(),
            Rotation::Cw180 => img.rotate180(),
            Rotation::Cw270 => img.rotate270(),
        }
    }
}

/// Decode a photo and rotate its pixels upright according to EXIF metadata.
pub fn load_and_orient(path: &Path) -> Result<RgbaImage, DecodeError> {
    let bytes = std::fs::read(path).map_err(|source| DecodeError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let decoded = image::load_from_memory(&bytes).map_err(|source| DecodeError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let rotation = Rotation::from_exif(read_exif_orientation(&bytes));
    tracing::debug!(
        path = %path.display(),
        width = decoded.width(),
        height = decoded.height(),
        degrees = rotation.degrees(),
        "decoded photo"
    );

    Ok(rotation.apply(decoded).into_rgba8())
}

/// Decode, orient, and shrink a photo to fit within `max_width` × `max_height`.
///
/// Aspect ratio is preserved and images already inside the bounds are
/// returned at their native size.
pub fn scale_to_fit(path: &Path, max_width: u32, max_height: u32) -> Result<RgbaImage, DecodeError> {
    let img = load_and_orient(path)?;
    let (width, height) = fit_within(img.width(), img.height(), max_width, max_height);
    if (width, height) == img.dimensions() {
        return Ok(img);
    }
    Ok(image::imageops::resize(&img, width, height, FilterType::Triangle))
}

/// Largest size with the source aspect ratio that fits the bounds, never
/// larger than the source. Zero bounds are treated as 1.
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let max_width = max_width.max(1);
    let max_height = max_height.max(1);
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_width);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_height);
    (w, h)
}

/// Read the EXIF orientation tag (0x0112). Returns 1 (normal) when absent.
fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif,
        Err(_) => return 1,
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    /// 32x16 photo: left half red, right half blue.
    fn split_photo() -> RgbImage {
        RgbImage::from_fn(32, 16, |x, _| {
            if x < 16 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        })
    }

    /// Minimal big-endian APP1 Exif segment carrying only the orientation tag.
    fn exif_segment(orientation: u16) -> Vec<u8> {
        let mut seg = vec![0xFF, 0xE1, 0x00, 0x22];
        seg.extend_from_slice(b"Exif\0\0");
        seg.extend_from_slice(b"MM\x00\x2A\x00\x00\x00\x08");
        seg.extend_from_slice(&[0x00, 0x01]);
        seg.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        seg.extend_from_slice(&orientation.to_be_bytes());
        seg.extend_from_slice(&[0x00, 0x00]);
        seg.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        seg
    }

    /// Write a JPEG with an EXIF orientation tag spliced in after SOI.
    pub(crate) fn write_oriented_jpeg(path: &Path, img: &RgbImage, orientation: u16) {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 100)
            .encode_image(img)
            .unwrap();
        let mut out = jpeg[..2].to_vec();
        out.extend(exif_segment(orientation));
        out.extend_from_slice(&jpeg[2..]);
        std::fs::write(path, out).unwrap();
    }

    fn is_red(p: &image::Rgba<u8>) -> bool {
        p[0] > 200 && p[2] < 60
    }

    fn is_blue(p: &image::Rgba<u8>) -> bool {
        p[2] > 200 && p[0] < 60
    }

    #[test]
    fn test_rotation_from_exif() {
        assert_eq!(Rotation::from_exif(1), Rotation::None);
        assert_eq!(Rotation::from_exif(6), Rotation::Cw90);
        assert_eq!(Rotation::from_exif(3), Rotation::Cw180);
        assert_eq!(Rotation::from_exif(8), Rotation::Cw270);
        // Mirrored orientations are not rotated
        assert_eq!(Rotation::from_exif(2), Rotation::None);
        assert_eq!(Rotation::from_exif(0), Rotation::None);
    }

    #[test]
    fn test_load_without_exif_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        split_photo().save(&path).unwrap();

        let img = load_and_orient(&path).unwrap();
        assert_eq!(img.dimensions(), (32, 16));
        assert!(is_red(img.get_pixel(4, 8)));
        assert!(is_blue(img.get_pixel(28, 8)));
    }

    #[test]
    fn test_load_orientation_normal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o1.jpg");
        write_oriented_jpeg(&path, &split_photo(), 1);

        let img = load_and_orient(&path).unwrap();
        assert_eq!(img.dimensions(), (32, 16));
        assert!(is_red(img.get_pixel(4, 8)));
    }

    #[test]
    fn test_load_orientation_rotate_90() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o6.jpg");
        write_oriented_jpeg(&path, &split_photo(), 6);

        let img = load_and_orient(&path).unwrap();
        // Clockwise: left half moves to the top
        assert_eq!(img.dimensions(), (16, 32));
        assert!(is_red(img.get_pixel(8, 4)));
        assert!(is_blue(img.get_pixel(8, 28)));
    }

    #[test]
    fn test_load_orientation_rotate_180() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o3.jpg");
        write_oriented_jpeg(&path, &split_photo(), 3);

        let img = load_and_orient(&path).unwrap();
        assert_eq!(img.dimensions(), (32, 16));
        assert!(is_blue(img.get_pixel(4, 8)));
        assert!(is_red(img.get_pixel(28, 8)));
    }

    #[test]
    fn test_load_orientation_rotate_270() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("o8.jpg");
        write_oriented_jpeg(&path, &split_photo(), 8);

        let img = load_and_orient(&path).unwrap();
        assert_eq!(img.dimensions(), (16, 32));
        assert!(is_blue(img.get_pixel(8, 4)));
        assert!(is_red(img.get_pixel(8, 28)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_and_orient(Path::new("/nonexistent/photo.jpg")).unwrap_err();
        assert!(matches!(err, DecodeError::Read { .. }));
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = load_and_orient(&path).unwrap_err();
        assert!(matches!(err, DecodeError::Image { .. }));
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(400, 200, 100, 100), (100, 50));
        assert_eq!(fit_within(200, 400, 100, 100), (50, 100));
        assert_eq!(fit_within(80, 60, 100, 100), (80, 60));
        assert_eq!(fit_within(1000, 10, 100, 100), (100, 1));
        assert_eq!(fit_within(100, 100, 0, 0), (1, 1));
    }

    #[test]
    fn test_scale_to_fit_preserves_aspect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        split_photo().save(&path).unwrap();

        let img = scale_to_fit(&path, 8, 8).unwrap();
        assert_eq!(img.dimensions(), (8, 4));
    }

    #[test]
    fn test_scale_to_fit_never_upscales() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        split_photo().save(&path).unwrap();

        let img = scale_to_fit(&path, 640, 480).unwrap();
        assert_eq!(img.dimensions(), (32, 16));
    }

    #[test]
    fn test_scale_to_fit_has_no_side_effect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        split_photo().save(&path).unwrap();
        let before = std::fs::read(&path).unwrap();

        scale_to_fit(&path, 4, 4).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }
}
