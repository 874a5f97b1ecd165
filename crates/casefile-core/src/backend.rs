//! Vision backend capabilities.
//!
//! Each capability is one async request. Implementations may run inference
//! on a blocking pool, a dedicated thread, or another process; callers only
//! await the result. A device that lacks a capability simply leaves it out
//! of [`VisionBackends`].

use crate::types::{Face, FaceDetectorOptions, FaceMesh, SegmentationMask, SegmenterMode};
use async_trait::async_trait;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("{0} backend not available")]
    Unavailable(&'static str),
    #[error("inference failed: {0}")]
    Failed(String),
    #[error("backend returned no result")]
    NoResult,
    #[error("backend timed out after {0:?}")]
    Timeout(Duration),
}

/// Bounding-box face detection with optional landmarks and classification.
#[async_trait]
pub trait FaceBackend: Send + Sync {
    async fn detect_faces(
        &self,
        image: Arc<RgbaImage>,
        options: FaceDetectorOptions,
    ) -> Result<Vec<Face>, BackendError>;
}

/// Face detection that fills [`Face::contours`].
#[async_trait]
pub trait ContourBackend: Send + Sync {
    async fn detect_contours(&self, image: Arc<RgbaImage>) -> Result<Vec<Face>, BackendError>;
}

/// Dense face-mesh detection.
#[async_trait]
pub trait MeshBackend: Send + Sync {
    async fn detect_meshes(&self, image: Arc<RgbaImage>) -> Result<Vec<FaceMesh>, BackendError>;
}

/// Foreground/background segmentation of a person.
#[async_trait]
pub trait SegmentationBackend: Send + Sync {
    async fn segment(
        &self,
        image: Arc<RgbaImage>,
        mode: SegmenterMode,
    ) -> Result<SegmentationMask, BackendError>;
}

/// The capabilities available on this device.
#[derive(Clone, Default)]
pub struct VisionBackends {
    pub face: Option<Arc<dyn FaceBackend>>,
    pub contour: Option<Arc<dyn ContourBackend>>,
    pub mesh: Option<Arc<dyn MeshBackend>>,
    pub segmentation: Option<Arc<dyn SegmentationBackend>>,
}

impl VisionBackends {
    pub fn face(&self) -> Result<&dyn FaceBackend, BackendError> {
        self.face.as_deref().ok_or(BackendError::Unavailable("face"))
    }

    pub fn contour(&self) -> Result<&dyn ContourBackend, BackendError> {
        self.contour
            .as_deref()
            .ok_or(BackendError::Unavailable("contour"))
    }

    pub fn mesh(&self) -> Result<&dyn MeshBackend, BackendError> {
        self.mesh.as_deref().ok_or(BackendError::Unavailable("mesh"))
    }

    pub fn segmentation(&self) -> Result<&dyn SegmentationBackend, BackendError> {
        self.segmentation
            .as_deref()
            .ok_or(BackendError::Unavailable("segmentation"))
    }

    fn capabilities(&self) -> [(&'static str, bool); 4] {
        [
            ("face", self.face.is_some()),
            ("contour", self.contour.is_some()),
            ("mesh", self.mesh.is_some()),
            ("segmentation", self.segmentation.is_some()),
        ]
    }

    /// Names of the capabilities present, for status reporting.
    pub fn available(&self) -> Vec<&'static str> {
        self.capabilities()
            .into_iter()
            .filter_map(|(name, present)| present.then_some(name))
            .collect()
    }

    /// Names of the capabilities no backend provides.
    pub fn missing(&self) -> Vec<&'static str> {
        self.capabilities()
            .into_iter()
            .filter_map(|(name, present)| (!present).then_some(name))
            .collect()
    }
}
