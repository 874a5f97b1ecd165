//! Stroke and fill primitives for drawing analysis results onto photos.

use crate::types::{BoundingBox, Point};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

/// Outline `bounds` with a stroke of `width` pixels centred on its edges.
pub fn stroke_rect(img: &mut RgbaImage, bounds: &BoundingBox, width: f32, color: Rgba<u8>) {
    let half = (width / 2.0).max(0.5);
    let (l, t, r, b) = (bounds.left, bounds.top, bounds.right, bounds.bottom);

    // top, bottom, left, right bands
    fill_span(img, l - half, t - half, r + half, t + half, color);
    fill_span(img, l - half, b - half, r + half, b + half, color);
    fill_span(img, l - half, t - half, l + half, b + half, color);
    fill_span(img, r - half, t - half, r + half, b + half, color);
}

/// Draw a line of `width` pixels from `from` to `to`.
///
/// Widths above one pixel are rendered by stamping round brushes along the
/// segment, which also gives round caps and joins.
pub fn stroke_line(img: &mut RgbaImage, from: Point, to: Point, width: f32, color: Rgba<u8>) {
    if width <= 1.0 {
        draw_line_segment_mut(img, (from.x, from.y), (to.x, to.y), color);
        return;
    }

    let radius = (width / 2.0).round().max(1.0) as i32;
    let (dx, dy) = (to.x - from.x, to.y - from.y);
    let steps = dx.hypot(dy).ceil().max(1.0) as u32;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let x = from.x + dx * t;
        let y = from.y + dy * t;
        draw_filled_circle_mut(img, (x.round() as i32, y.round() as i32), radius, color);
    }
}

/// Draw a filled dot of `radius` pixels centred on `center`.
pub fn fill_dot(img: &mut RgbaImage, center: Point, radius: f32, color: Rgba<u8>) {
    let radius = radius.round().max(0.0) as i32;
    draw_filled_circle_mut(
        img,
        (center.x.round() as i32, center.y.round() as i32),
        radius,
        color,
    );
}

/// Fill the axis-aligned span [x0, x1) × [y0, y1), clipped to the image.
fn fill_span(img: &mut RgbaImage, x0: f32, y0: f32, x1: f32, y1: f32, color: Rgba<u8>) {
    let left = x0.round() as i32;
    let top = y0.round() as i32;
    let right = x1.round() as i32;
    let bottom = y1.round() as i32;
    if right <= left || bottom <= top {
        return;
    }
    let rect = Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32);
    draw_filled_rect_mut(img, rect, color);
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn canvas(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, WHITE)
    }

    #[test]
    fn test_stroke_rect_draws_edges_not_interior() {
        let mut img = canvas(100, 100);
        stroke_rect(&mut img, &BoundingBox::new(20.0, 20.0, 80.0, 80.0), 4.0, RED);

        assert_eq!(*img.get_pixel(50, 20), RED); // top edge
        assert_eq!(*img.get_pixel(50, 79), RED); // bottom edge
        assert_eq!(*img.get_pixel(20, 50), RED); // left edge
        assert_eq!(*img.get_pixel(79, 50), RED); // right edge
        assert_eq!(*img.get_pixel(50, 50), WHITE); // interior
        assert_eq!(*img.get_pixel(5, 5), WHITE); // outside
    }

    #[test]
    fn test_stroke_rect_clips_at_image_border() {
        let mut img = canvas(40, 40);
        stroke_rect(&mut img, &BoundingBox::new(-10.0, -10.0, 60.0, 60.0), 36.0, RED);
        assert_eq!(*img.get_pixel(0, 0), RED);
        assert_eq!(*img.get_pixel(20, 20), WHITE);
    }

    #[test]
    fn test_stroke_line_thin() {
        let mut img = canvas(20, 20);
        stroke_line(&mut img, Point::new(0.0, 10.0), Point::new(19.0, 10.0), 1.0, BLUE);
        assert_eq!(*img.get_pixel(0, 10), BLUE);
        assert_eq!(*img.get_pixel(18, 10), BLUE);
        assert_eq!(*img.get_pixel(10, 9), WHITE);
    }

    #[test]
    fn test_stroke_line_thick_covers_width() {
        let mut img = canvas(50, 50);
        stroke_line(&mut img, Point::new(5.0, 25.0), Point::new(45.0, 25.0), 10.0, RED);
        assert_eq!(*img.get_pixel(25, 25), RED);
        assert_eq!(*img.get_pixel(25, 21), RED);
        assert_eq!(*img.get_pixel(25, 29), RED);
        assert_eq!(*img.get_pixel(25, 35), WHITE);
    }

    #[test]
    fn test_stroke_line_degenerate_is_a_dot() {
        let mut img = canvas(20, 20);
        let p = Point::new(10.0, 10.0);
        stroke_line(&mut img, p, p, 4.0, RED);
        assert_eq!(*img.get_pixel(10, 10), RED);
    }

    #[test]
    fn test_fill_dot() {
        let mut img = canvas(20, 20);
        fill_dot(&mut img, Point::new(10.0, 10.0), 5.0, RED);
        assert_eq!(*img.get_pixel(10, 10), RED);
        assert_eq!(*img.get_pixel(13, 10), RED);
        assert_eq!(*img.get_pixel(0, 0), WHITE);
    }
}
