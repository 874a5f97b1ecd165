//! casefile-core: case records and the vision operations run on their photos.
//!
//! Vision work goes through async backend capabilities ([`backend`]); the
//! SCRFD detector in [`detector`] provides face detection over ONNX Runtime.

pub mod backend;
pub mod contours;
pub mod detector;
pub mod face_boxes;
pub mod mesh;
pub mod overlay;
pub mod record;
pub mod segmentation;
pub mod types;

pub use backend::{
    BackendError, ContourBackend, FaceBackend, MeshBackend, SegmentationBackend, VisionBackends,
};
pub use detector::{DetectorError, OnnxFaceBackend};
pub use face_boxes::FaceBoxes;
pub use record::{AnalysisMode, CaseRecord, PhotoSlots, SlotIndex, PHOTO_SLOT_COUNT};
pub use segmentation::SelfieSegmentation;
pub use types::{BoundingBox, Face, FaceDetectorOptions, FaceMesh, SegmentationMask};
