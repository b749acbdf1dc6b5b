use kurbo::{Affine, Point, Rect, Vec2};

use crate::geometry::{CanvasSize, PixelPoint, PixelRect};
use crate::raster::RasterBuffer;

const EDGE_EPSILON: f64 = 1e-6;

/// Maps raster pixels to display coordinates: `display = raster * zoom + pan`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMapping {
    pub zoom: f64,
    pub pan: Vec2,
}

impl Default for DisplayMapping {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
        }
    }
}

impl DisplayMapping {
    pub fn new(zoom: f64, pan: Vec2) -> Self {
        Self {
            zoom: if zoom > 0.0 { zoom } else { 1.0 },
            pan,
        }
    }

    pub fn raster_to_display(&self) -> Affine {
        Affine::translate(self.pan) * Affine::scale(self.zoom)
    }

    pub fn to_raster(&self, point: Point) -> Point {
        self.raster_to_display().inverse() * point
    }

    pub fn to_display(&self, point: Point) -> Point {
        self.raster_to_display() * point
    }

    pub fn rect_to_display(&self, rect: Rect) -> Rect {
        self.raster_to_display().transform_rect_bbox(rect)
    }
}

/// Rotation in degrees, uniform scale and translation of a captured region.
///
/// The affine is always rebuilt from these three values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionTransform {
    pub rotation: f64,
    pub scale: f64,
    pub offset: Vec2,
}

impl Default for SelectionTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SelectionTransform {
    pub const IDENTITY: Self = Self {
        rotation: 0.0,
        scale: 1.0,
        offset: Vec2::ZERO,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn affine(&self, center: Point) -> Affine {
        Affine::translate(self.offset + center.to_vec2())
            * Affine::rotate(self.rotation.to_radians())
            * Affine::scale(self.scale)
            * Affine::translate(-center.to_vec2())
    }
}

pub fn pixel_rect_to_kurbo(rect: PixelRect) -> Rect {
    Rect::new(
        f64::from(rect.x),
        f64::from(rect.y),
        rect.right() as f64,
        rect.bottom() as f64,
    )
}

/// Smallest pixel rectangle covering `bbox`, tolerant of floating point noise at the edges.
///
/// Edges beyond the `i32` range saturate.
pub fn covering_pixel_rect(bbox: Rect) -> PixelRect {
    let min_x = saturate_edge((bbox.x0 + EDGE_EPSILON).floor());
    let min_y = saturate_edge((bbox.y0 + EDGE_EPSILON).floor());
    let max_x = saturate_edge((bbox.x1 - EDGE_EPSILON).ceil()).max(min_x);
    let max_y = saturate_edge((bbox.y1 - EDGE_EPSILON).ceil()).max(min_y);
    PixelRect::new(
        min_x as i32,
        min_y as i32,
        u32::try_from(max_x - min_x).unwrap_or(u32::MAX),
        u32::try_from(max_y - min_y).unwrap_or(u32::MAX),
    )
}

fn saturate_edge(value: f64) -> i64 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i64
}

/// Output of [`render_transformed`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedPixels {
    /// Pixels covering `placed`.
    pub buffer: RasterBuffer,
    /// Full extent of the transformed region in raster space.
    pub bounds: PixelRect,
    /// Part of `bounds` inside the canvas; empty when the region left the canvas.
    pub placed: PixelRect,
}

/// Nearest-neighbour resample of `source`, placed at `origin`, through `transform`.
///
/// Only the part landing inside `canvas` is rendered.
pub fn render_transformed(
    source: &RasterBuffer,
    origin: PixelPoint,
    transform: &SelectionTransform,
    canvas: CanvasSize,
) -> TransformedPixels {
    let source_bounds = PixelRect::new(origin.x, origin.y, source.width(), source.height());
    if transform.is_identity() && source_bounds.clamped_to(canvas) == Some(source_bounds) {
        return TransformedPixels {
            buffer: source.clone(),
            bounds: source_bounds,
            placed: source_bounds,
        };
    }

    let source_rect = pixel_rect_to_kurbo(source_bounds);
    let affine = transform.affine(source_rect.center());
    let bounds = covering_pixel_rect(affine.transform_rect_bbox(source_rect));
    let Some(placed) = bounds.clamped_to(canvas) else {
        return TransformedPixels {
            buffer: RasterBuffer::new(CanvasSize::new(0, 0)),
            bounds,
            placed: PixelRect::new(bounds.x, bounds.y, 0, 0),
        };
    };
    let inverse = affine.inverse();

    let mut buffer = RasterBuffer::new(CanvasSize::new(placed.width, placed.height));
    for ty in 0..placed.height as i32 {
        for tx in 0..placed.width as i32 {
            let center = Point::new(
                f64::from(placed.x + tx) + 0.5,
                f64::from(placed.y + ty) + 0.5,
            );
            let sampled = inverse * center;
            let sx = (sampled.x - f64::from(origin.x)).floor() as i32;
            let sy = (sampled.y - f64::from(origin.y)).floor() as i32;
            if let Some(color) = source.pixel(sx, sy) {
                buffer.put_pixel(tx, ty, color);
            }
        }
    }
    TransformedPixels {
        buffer,
        bounds,
        placed,
    }
}
