use serde::{Deserialize, Serialize};

/// A 2-D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in image pixel coordinates (right/bottom exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let inter_h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Facial landmark positions a face backend may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    NoseBase,
    MouthLeft,
    MouthRight,
    MouthBottom,
    LeftEar,
    RightEar,
    LeftCheek,
    RightCheek,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub kind: LandmarkKind,
    pub position: Point,
}

/// Facial feature outlines traced by contour detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContourKind {
    Face,
    LeftEyebrowTop,
    LeftEyebrowBottom,
    RightEyebrowTop,
    RightEyebrowBottom,
    LeftEye,
    RightEye,
    UpperLipTop,
    UpperLipBottom,
    LowerLipTop,
    LowerLipBottom,
    NoseBridge,
    NoseBottom,
    LeftCheek,
    RightCheek,
}

/// An ordered run of points outlining one facial feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub kind: ContourKind,
    pub points: Vec<Point>,
}

/// A detected face with whatever detail the backend was asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub bounds: BoundingBox,
    /// Detector score, when the backend exposes one.
    pub confidence: Option<f32>,
    pub landmarks: Vec<Landmark>,
    pub contours: Vec<Contour>,
    pub smiling_probability: Option<f32>,
    pub left_eye_open_probability: Option<f32>,
    pub right_eye_open_probability: Option<f32>,
}

impl Face {
    /// A face with only a bounding box.
    pub fn from_bounds(bounds: BoundingBox) -> Self {
        Self {
            bounds,
            confidence: None,
            landmarks: Vec::new(),
            contours: Vec::new(),
            smiling_probability: None,
            left_eye_open_probability: None,
            right_eye_open_probability: None,
        }
    }
}

/// One vertex of a face mesh. `z` is depth relative to the face centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshPoint {
    pub index: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl MeshPoint {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A dense 3-D face mesh: vertices plus triangle connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMesh {
    pub bounds: BoundingBox,
    pub points: Vec<MeshPoint>,
    pub triangles: Vec<[MeshPoint; 3]>,
}

/// Per-pixel foreground probability in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    foreground: Vec<f32>,
}

impl SegmentationMask {
    /// Returns `None` when `foreground.len() != width * height`.
    pub fn new(width: u32, height: u32, foreground: Vec<f32>) -> Option<Self> {
        if foreground.len() != (width as usize) * (height as usize) {
            return None;
        }
        Some(Self {
            width,
            height,
            foreground,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.foreground.len()
    }

    pub fn is_empty(&self) -> bool {
        self.foreground.is_empty()
    }

    /// Foreground probability at (x, y), or `None` outside the mask.
    pub fn foreground_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.foreground
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn values(&self) -> &[f32] {
        &self.foreground
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceMode {
    Fast,
    Accurate,
}

/// Request options for a face backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDetectorOptions {
    pub performance: PerformanceMode,
    pub landmarks: bool,
    pub classification: bool,
    pub contours: bool,
    /// Smallest face to report, as a fraction of the image width.
    pub min_face_size: f32,
}

impl FaceDetectorOptions {
    /// Accurate mode with all landmarks and classifications.
    pub fn accurate() -> Self {
        Self {
            performance: PerformanceMode::Accurate,
            landmarks: true,
            classification: true,
            contours: false,
            min_face_size: 0.1,
        }
    }

    /// Fast mode with all contours.
    pub fn contours() -> Self {
        Self {
            performance: PerformanceMode::Fast,
            landmarks: false,
            classification: false,
            contours: true,
            min_face_size: 0.1,
        }
    }
}

/// Segmenter input mode. Stream mode smooths masks across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmenterMode {
    SingleImage,
    Stream,
}
