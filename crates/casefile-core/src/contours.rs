//! Contour tracing: closed red outlines around facial features.

use crate::backend::{BackendError, ContourBackend};
use crate::overlay::{stroke_line, RED};
use crate::types::Face;
use image::RgbaImage;
use std::sync::Arc;

pub const CONTOUR_STROKE: f32 = 10.0;

/// Detect faces in contour mode and outline every contour.
pub async fn trace_contours(
    backend: &dyn ContourBackend,
    source: Arc<RgbaImage>,
) -> Result<RgbaImage, BackendError> {
    let faces = backend.detect_contours(source.clone()).await?;
    let contours: usize = faces.iter().map(|f| f.contours.len()).sum();
    tracing::debug!(faces = faces.len(), contours, "contour detection complete");

    Ok(draw_contours(&source, &faces))
}

pub fn draw_contours(source: &RgbaImage, faces: &[Face]) -> RgbaImage {
    let mut canvas = source.clone();
    for contour in faces.iter().flat_map(|f| &f.contours) {
        let points = &contour.points;
        let Some(&first) = points.first() else {
            continue;
        };

        for pair in points.windows(2) {
            stroke_line(&mut canvas, pair[0], pair[1], CONTOUR_STROKE, RED);
        }
        // close the loop; a single point becomes a dot
        let last = points[points.len() - 1];
        stroke_line(&mut canvas, last, first, CONTOUR_STROKE, RED);
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Contour, ContourKind, Point};
    use async_trait::async_trait;
    use image::Rgba;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    struct StubContours(Result<Vec<Face>, BackendError>);

    #[async_trait]
    impl ContourBackend for StubContours {
        async fn detect_contours(&self, _image: Arc<RgbaImage>) -> Result<Vec<Face>, BackendError> {
            self.0.clone()
        }
    }

    fn face_with(contours: Vec<Contour>) -> Face {
        let mut face = Face::from_bounds(BoundingBox::new(0.0, 0.0, 200.0, 200.0));
        face.contours = contours;
        face
    }

    fn triangle() -> Contour {
        Contour {
            kind: ContourKind::Face,
            points: vec![
                Point::new(20.0, 20.0),
                Point::new(180.0, 20.0),
                Point::new(100.0, 180.0),
            ],
        }
    }

    #[tokio::test]
    async fn test_contour_is_closed() {
        let backend = StubContours(Ok(vec![face_with(vec![triangle()])]));
        let source = Arc::new(RgbaImage::from_pixel(200, 200, WHITE));

        let out = trace_contours(&backend, source).await.unwrap();

        // open segments
        assert_eq!(*out.get_pixel(100, 20), RED);
        assert_eq!(*out.get_pixel(140, 100), RED);
        // closing segment from (100,180) back to (20,20)
        assert_eq!(*out.get_pixel(60, 100), RED);
        // interior untouched
        assert_eq!(*out.get_pixel(100, 80), WHITE);
    }

    #[test]
    fn test_empty_contour_skipped() {
        let empty = Contour {
            kind: ContourKind::NoseBridge,
            points: Vec::new(),
        };
        let source = RgbaImage::from_pixel(50, 50, WHITE);

        let out = draw_contours(&source, &[face_with(vec![empty])]);
        assert!(out.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn test_no_faces_returns_copy() {
        let source = RgbaImage::from_pixel(10, 10, WHITE);
        assert_eq!(draw_contours(&source, &[]), source);
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let backend = StubContours(Err(BackendError::NoResult));
        let source = Arc::new(RgbaImage::new(4, 4));
        assert_eq!(
            trace_contours(&backend, source).await.unwrap_err(),
            BackendError::NoResult
        );
    }
}
