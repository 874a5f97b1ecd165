//! Face mesh overlay.
//!
//! Vertices are drawn as red dots and triangle edges as blue lines, in the
//! source image's own pixel coordinates.

use crate::backend::{BackendError, MeshBackend};
use crate::overlay::{fill_dot, stroke_line, BLUE, RED};
use crate::types::FaceMesh;
use image::RgbaImage;
use std::sync::Arc;

pub const MESH_DOT_RADIUS: f32 = 5.0;
pub const MESH_EDGE_STROKE: f32 = 2.0;

pub async fn draw_face_mesh(
    backend: &dyn MeshBackend,
    source: Arc<RgbaImage>,
) -> Result<RgbaImage, BackendError> {
    let meshes = backend.detect_meshes(source.clone()).await?;
    tracing::debug!(meshes = meshes.len(), "mesh detection complete");

    Ok(draw_meshes(&source, &meshes))
}

pub fn draw_meshes(source: &RgbaImage, meshes: &[FaceMesh]) -> RgbaImage {
    let mut canvas = source.clone();
    for mesh in meshes {
        for point in &mesh.points {
            fill_dot(&mut canvas, point.position(), MESH_DOT_RADIUS, RED);
        }
        for [a, b, c] in &mesh.triangles {
            let (a, b, c) = (a.position(), b.position(), c.position());
            stroke_line(&mut canvas, a, b, MESH_EDGE_STROKE, BLUE);
            stroke_line(&mut canvas, b, c, MESH_EDGE_STROKE, BLUE);
            stroke_line(&mut canvas, c, a, MESH_EDGE_STROKE, BLUE);
        }
    }
    canvas
}
