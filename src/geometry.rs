use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub const fn rect(self) -> PixelRect {
        PixelRect::new(0, 0, self.width, self.height)
    }
}

/// Axis-aligned pixel rectangle; `x..x+width` is half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a rectangle covering both inclusive corner pixels.
    pub fn from_inclusive(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        let left = min_x.min(max_x);
        let top = min_y.min(max_y);
        let right = min_x.max(max_x);
        let bottom = min_y.max(max_y);
        Self::new(
            left,
            top,
            u32::try_from(i64::from(right) - i64::from(left) + 1).unwrap_or(u32::MAX),
            u32::try_from(i64::from(bottom) - i64::from(top) + 1).unwrap_or(u32::MAX),
        )
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    pub fn contains(&self, point: PixelPoint) -> bool {
        let (px, py) = (i64::from(point.x), i64::from(point.y));
        px >= i64::from(self.x) && py >= i64::from(self.y) && px < self.right() && py < self.bottom()
    }

    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.intersection(other).is_some()
    }

    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let left = i64::from(self.x).max(i64::from(other.x));
        let top = i64::from(self.y).max(i64::from(other.y));
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(PixelRect::new(
            i32::try_from(left).ok()?,
            i32::try_from(top).ok()?,
            u32::try_from(right - left).ok()?,
            u32::try_from(bottom - top).ok()?,
        ))
    }

    pub fn union(&self, other: &PixelRect) -> PixelRect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        PixelRect::new(
            left,
            top,
            u32::try_from(right - i64::from(left)).unwrap_or(u32::MAX),
            u32::try_from(bottom - i64::from(top)).unwrap_or(u32::MAX),
        )
    }

    pub fn translated(&self, dx: i32, dy: i32) -> PixelRect {
        PixelRect::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    pub fn clamped_to(&self, size: CanvasSize) -> Option<PixelRect> {
        self.intersection(&size.rect())
    }
}

/// Straight-alpha RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    pub const fn channels(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub const fn from_channels(channels: [u8; 4]) -> Self {
        Self::rgba(channels[0], channels[1], channels[2], channels[3])
    }

    pub const fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba(self.channels())
    }

    pub const fn from_rgba(pixel: image::Rgba<u8>) -> Self {
        Self::from_channels(pixel.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_inclusive_covers_both_corner_pixels() {
        let rect = PixelRect::from_inclusive(9, 9, 0, 0);
        assert_eq!(rect, PixelRect::new(0, 0, 10, 10));
    }

    #[test]
    fn intersection_rejects_touching_edges() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(10, 0, 5, 5);
        assert!(a.intersection(&b).is_none());
        assert!(!a.intersects(&b));

        let c = PixelRect::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&c), Some(PixelRect::new(5, 5, 5, 5)));
    }

    #[test]
    fn union_ignores_empty_rectangles() {
        let a = PixelRect::new(2, 3, 4, 5);
        assert_eq!(a.union(&PixelRect::default()), a);
        assert_eq!(
            a.union(&PixelRect::new(-2, 0, 2, 2)),
            PixelRect::new(-2, 0, 8, 8)
        );
    }

    #[test]
    fn clamped_to_canvas_trims_negative_origin() {
        let rect = PixelRect::new(-5, -5, 10, 10);
        assert_eq!(
            rect.clamped_to(CanvasSize::new(100, 100)),
            Some(PixelRect::new(0, 0, 5, 5))
        );
        assert_eq!(
            PixelRect::new(200, 200, 4, 4).clamped_to(CanvasSize::new(100, 100)),
            None
        );
    }
}
