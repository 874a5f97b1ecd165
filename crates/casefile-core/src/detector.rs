//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor-free decoding and NMS post-processing.
//! [`OnnxFaceBackend`] exposes it as a [`FaceBackend`] for the capture pipeline.

use crate::backend::{BackendError, FaceBackend};
use crate::types::{BoundingBox, Face, FaceDetectorOptions, Landmark, LandmarkKind, Point};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::RgbaImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// SCRFD keypoint order.
const SCRFD_LANDMARKS: [LandmarkKind; 5] = [
    LandmarkKind::LeftEye,
    LandmarkKind::RightEye,
    LandmarkKind::NoseBase,
    LandmarkKind::MouthLeft,
    LandmarkKind::MouthRight,
];

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface into the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image is empty")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<DetectorError> for BackendError {
    fn from(e: DetectorError) -> Self {
        BackendError::Failed(e.to_string())
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl LetterboxInfo {
    fn to_source(&self, x: f32, y: f32) -> Point {
        Point::new((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// One raw detection before NMS.
#[derive(Debug, Clone)]
struct Detection {
    bounds: BoundingBox,
    confidence: f32,
    landmarks: Option<[Point; 5]>,
}

impl Detection {
    fn into_face(self, with_landmarks: bool) -> Face {
        let mut face = Face::from_bounds(self.bounds);
        face.confidence = Some(self.confidence);
        if let (true, Some(points)) = (with_landmarks, self.landmarks) {
            face.landmarks = SCRFD_LANDMARKS
                .iter()
                .zip(points)
                .map(|(&kind, position)| Landmark { kind, position })
                .collect();
        }
        face
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    input_height: usize,
    input_width: usize,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if num_outputs < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides × score/bbox/kps), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            stride_indices,
        })
    }

    /// Detect faces in a photo, sorted by confidence.
    ///
    /// Faces narrower than `options.min_face_size` × image width are dropped.
    pub fn detect(
        &mut self,
        image: &RgbaImage,
        options: &FaceDetectorOptions,
    ) -> Result<Vec<Face>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }
        let (input, letterbox) = self.preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            let grid = StrideGrid {
                stride,
                width: self.input_width / stride,
                height: self.input_height / stride,
            };
            all_detections.extend(decode_stride(
                scores,
                bboxes,
                kps,
                &grid,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        let min_width = options.min_face_size * image.width() as f32;
        let faces: Vec<Face> = nms(all_detections, SCRFD_NMS_THRESHOLD)
            .into_iter()
            .filter(|d| d.bounds.width() >= min_width)
            .map(|d| d.into_face(options.landmarks))
            .collect();

        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }

    /// Letterbox an RGBA photo into a normalized NCHW RGB tensor.
    fn preprocess(&self, image: &RgbaImage) -> (Array4<f32>, LetterboxInfo) {
        let (width, height) = image.dimensions();
        let scale_w = self.input_width as f32 / width as f32;
        let scale_h = self.input_height as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = ((width as f32 * scale).round() as usize).clamp(1, self.input_width);
        let new_h = ((height as f32 * scale).round() as usize).clamp(1, self.input_height);
        let pad_x = (self.input_width - new_w) as f32 / 2.0;
        let pad_y = (self.input_height - new_h) as f32 / 2.0;

        let letterbox = LetterboxInfo { scale, pad_x, pad_y };
        let resized = imageops::resize(image, new_w as u32, new_h as u32, FilterType::Triangle);

        // padding normalizes to 0.0, which is what zeros() already holds
        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, self.input_height, self.input_width));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (tx, ty) = (pad_x_start + x as usize, pad_y_start + y as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
            }
        }

        (tensor, letterbox)
    }
}

/// Discover output tensor ordering by name.
///
/// SCRFD models may export tensors with named outputs ("score_8", "bbox_16", ...) or
/// generic numeric names. If named pattern is detected, maps them to stride slots.
/// Otherwise falls back to the standard positional ordering:
///   [0-2] = scores (strides 8, 16, 32)
///   [3-5] = bboxes (strides 8, 16, 32)
///   [6-8] = kps    (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut named = [(0, 0, 0); 3];
    for (slot, &stride) in named.iter_mut().zip(SCRFD_STRIDES.iter()) {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(score), Some(bbox), Some(kps)) => *slot = (score, bbox, kps),
            _ => {
                tracing::info!(
                    ?names,
                    "SCRFD: output names not recognized, using positional mapping"
                );
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    named
}

/// Anchor grid geometry for one stride level.
struct StrideGrid {
    stride: usize,
    width: usize,
    height: usize,
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    grid: &StrideGrid,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Detection> {
    let num_anchors = grid.height * grid.width * SCRFD_ANCHORS_PER_CELL;
    let stride = grid.stride as f32;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid.width) as f32 * stride;
        let anchor_cy = (anchor_idx / grid.width) as f32 * stride;

        // [x1_offset, y1_offset, x2_offset, y2_offset] * stride
        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };
        let top_left = letterbox.to_source(
            anchor_cx - offsets[0] * stride,
            anchor_cy - offsets[1] * stride,
        );
        let bottom_right = letterbox.to_source(
            anchor_cx + offsets[2] * stride,
            anchor_cy + offsets[3] * stride,
        );

        let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
            std::array::from_fn(|i| {
                letterbox.to_source(anchor_cx + k[i * 2] * stride, anchor_cy + k[i * 2 + 1] * stride)
            })
        });

        detections.push(Detection {
            bounds: BoundingBox::new(top_left.x, top_left.y, bottom_right.x, bottom_right.y),
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.bounds.iou(&det.bounds) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// [`FaceBackend`] running the SCRFD detector on the blocking pool.
///
/// Classification and contours are not produced by this model; only bounding
/// boxes, confidences, and the five SCRFD landmarks.
#[derive(Clone)]
pub struct OnnxFaceBackend {
    detector: Arc<Mutex<ScrfdDetector>>,
}

impl OnnxFaceBackend {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        Ok(Self {
            detector: Arc::new(Mutex::new(ScrfdDetector::load(model_path)?)),
        })
    }
}

#[async_trait]
impl FaceBackend for OnnxFaceBackend {
    async fn detect_faces(
        &self,
        image: Arc<RgbaImage>,
        options: FaceDetectorOptions,
    ) -> Result<Vec<Face>, BackendError> {
        let detector = Arc::clone(&self.detector);
        tokio::task::spawn_blocking(move || {
            let mut detector = detector
                .lock()
                .map_err(|_| BackendError::Failed("detector lock poisoned".into()))?;
            detector.detect(&image, &options).map_err(BackendError::from)
        })
        .await
        .map_err(|e| BackendError::Failed(format!("detector task: {e}")))?
    }
}
