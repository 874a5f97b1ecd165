//! Selfie segmentation: cut the person out of the background.

use crate::backend::{BackendError, SegmentationBackend};
use crate::types::{SegmentationMask, SegmenterMode};
use image::{Rgba, RgbaImage};
use std::sync::Arc;

/// A pixel is background when `1 - foreground` exceeds this.
pub const BACKGROUND_THRESHOLD: f32 = 0.20;

/// Results with more than 19/20 (95%) of mask pixels in the background are
/// rejected.
const MAX_BACKGROUND_NUMERATOR: u64 = 19;
const MAX_BACKGROUND_DENOMINATOR: u64 = 20;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, Clone, PartialEq)]
pub enum SelfieSegmentation {
    /// Source with background pixels made transparent.
    Foreground(RgbaImage),
    /// Almost everything was background; nothing worth keeping.
    NonMatch { background_ratio: f32 },
}

pub async fn segment_selfie(
    backend: &dyn SegmentationBackend,
    source: Arc<RgbaImage>,
) -> Result<SelfieSegmentation, BackendError> {
    let mask = backend.segment(source.clone(), SegmenterMode::Stream).await?;
    if mask.is_empty() {
        return Err(BackendError::NoResult);
    }
    if (mask.width(), mask.height()) != source.dimensions() {
        tracing::debug!(
            mask_width = mask.width(),
            mask_height = mask.height(),
            image_width = source.width(),
            image_height = source.height(),
            "segmentation mask size differs from image"
        );
    }

    Ok(cut_out_background(&source, &mask))
}

pub fn is_background(foreground: f32) -> bool {
    1.0 - foreground > BACKGROUND_THRESHOLD
}

/// Number of mask pixels tagged as background.
pub fn background_count(mask: &SegmentationMask) -> usize {
    mask.values().iter().filter(|&&fg| is_background(fg)).count()
}

/// Whether `background` of `total` pixels is strictly more than 95%.
///
/// Compared in integers so large masks are exact at the boundary.
pub fn is_mostly_background(background: usize, total: usize) -> bool {
    background as u64 * MAX_BACKGROUND_DENOMINATOR > total as u64 * MAX_BACKGROUND_NUMERATOR
}

/// Apply `mask` to `source`, aligned at the top-left corner.
pub fn cut_out_background(source: &RgbaImage, mask: &SegmentationMask) -> SelfieSegmentation {
    let background = background_count(mask);
    if is_mostly_background(background, mask.len()) {
        let background_ratio = background as f32 / mask.len() as f32;
        tracing::info!(background, total = mask.len(), "segmentation rejected: mostly background");
        return SelfieSegmentation::NonMatch { background_ratio };
    }

    let mut out = source.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.foreground_at(x, y).is_some_and(is_background) {
            *pixel = TRANSPARENT;
        }
    }
    SelfieSegmentation::Foreground(out)
}
