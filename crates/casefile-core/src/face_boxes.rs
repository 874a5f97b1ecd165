//! Face detection overlay: a red box around every detected face.

use crate::backend::{BackendError, FaceBackend};
use crate::overlay::{stroke_rect, RED};
use crate::types::{Face, FaceDetectorOptions};
use image::RgbaImage;
use std::sync::Arc;

/// Stroke width of the face rectangle, in pixels.
pub const FACE_BOX_STROKE: f32 = 36.0;

/// Annotated photo plus the number of faces found.
#[derive(Debug, Clone)]
pub struct FaceBoxes {
    pub image: RgbaImage,
    pub face_count: usize,
}

impl FaceBoxes {
    /// Text stored as the record's detection summary.
    pub fn summary(&self) -> String {
        face_summary(self.face_count)
    }
}

pub fn face_summary(face_count: usize) -> String {
    format!("{face_count} face(s) detected")
}

/// Run accurate face detection and box every face on a copy of `source`.
pub async fn detect_face_boxes(
    backend: &dyn FaceBackend,
    source: Arc<RgbaImage>,
) -> Result<FaceBoxes, BackendError> {
    let faces = backend
        .detect_faces(source.clone(), FaceDetectorOptions::accurate())
        .await?;
    tracing::debug!(faces = faces.len(), "face detection complete");

    Ok(FaceBoxes {
        image: draw_face_boxes(&source, &faces),
        face_count: faces.len(),
    })
}

pub fn draw_face_boxes(source: &RgbaImage, faces: &[Face]) -> RgbaImage {
    let mut canvas = source.clone();
    for face in faces {
        stroke_rect(&mut canvas, &face.bounds, FACE_BOX_STROKE, RED);
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use async_trait::async_trait;
    use image::Rgba;
    use std::sync::Mutex;

    const GREY: Rgba<u8> = Rgba([128, 128, 128, 255]);

    struct StubFaces {
        faces: Vec<Face>,
        seen_options: Mutex<Vec<FaceDetectorOptions>>,
    }

    #[async_trait]
    impl FaceBackend for StubFaces {
        async fn detect_faces(
            &self,
            _image: Arc<RgbaImage>,
            options: FaceDetectorOptions,
        ) -> Result<Vec<Face>, BackendError> {
            self.seen_options.lock().unwrap().push(options);
            Ok(self.faces.clone())
        }
    }

    struct FailingFaces;

    #[async_trait]
    impl FaceBackend for FailingFaces {
        async fn detect_faces(
            &self,
            _image: Arc<RgbaImage>,
            _options: FaceDetectorOptions,
        ) -> Result<Vec<Face>, BackendError> {
            Err(BackendError::Failed("model crashed".into()))
        }
    }

    fn photo() -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(400, 300, GREY))
    }

    #[test]
    fn test_summary_text() {
        assert_eq!(face_summary(0), "0 face(s) detected");
        assert_eq!(face_summary(2), "2 face(s) detected");
    }

    #[tokio::test]
    async fn test_boxes_every_face() {
        let backend = StubFaces {
            faces: vec![
                Face::from_bounds(BoundingBox::new(40.0, 40.0, 140.0, 160.0)),
                Face::from_bounds(BoundingBox::new(220.0, 60.0, 340.0, 200.0)),
            ],
            seen_options: Mutex::new(Vec::new()),
        };

        let result = detect_face_boxes(&backend, photo()).await.unwrap();

        assert_eq!(result.face_count, 2);
        assert_eq!(result.summary(), "2 face(s) detected");
        assert_eq!(*result.image.get_pixel(90, 40), RED);
        assert_eq!(*result.image.get_pixel(220, 130), RED);
        assert_eq!(*result.image.get_pixel(90, 100), GREY);
        assert_eq!(*result.image.get_pixel(380, 280), GREY);
    }

    #[tokio::test]
    async fn test_requests_accurate_mode_with_landmarks() {
        let backend = StubFaces {
            faces: Vec::new(),
            seen_options: Mutex::new(Vec::new()),
        };

        detect_face_boxes(&backend, photo()).await.unwrap();

        let seen = backend.seen_options.lock().unwrap();
        assert_eq!(seen.as_slice(), &[FaceDetectorOptions::accurate()]);
    }

    #[tokio::test]
    async fn test_source_is_not_modified() {
        let backend = StubFaces {
            faces: vec![Face::from_bounds(BoundingBox::new(0.0, 0.0, 100.0, 100.0))],
            seen_options: Mutex::new(Vec::new()),
        };
        let source = photo();

        detect_face_boxes(&backend, source.clone()).await.unwrap();
        assert!(source.pixels().all(|p| *p == GREY));
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let err = detect_face_boxes(&FailingFaces, photo()).await.unwrap_err();
        assert!(matches!(err, BackendError::Failed(_)));
    }
}
