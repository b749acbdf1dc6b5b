use std::fmt;

use image::RgbaImage;

use crate::geometry::{CanvasSize, Color, PixelRect};

const CHANNELS: usize = 4;

/// How source pixels combine with the destination in [`RasterBuffer::draw_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Straight-alpha source-over.
    #[default]
    Normal,
    /// Overwrites destination pixels, with opacity scaling the written alpha.
    Replace,
    /// Removes destination alpha proportionally to source alpha.
    Erase,
}

/// Width x height straight-alpha RGBA8 buffer. `Clone` is a deep copy.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    image: RgbaImage,
}

impl fmt::Debug for RasterBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterBuffer")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

impl RasterBuffer {
    /// Allocates a fully transparent buffer.
    pub fn new(size: CanvasSize) -> Self {
        Self {
            image: RgbaImage::new(size.width, size.height),
        }
    }

    pub fn filled(size: CanvasSize, color: Color) -> Self {
        Self {
            image: RgbaImage::from_pixel(size.width, size.height, color.to_rgba()),
        }
    }

    pub fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> CanvasSize {
        CanvasSize::new(self.image.width(), self.image.height())
    }

    pub fn pixel_count(&self) -> usize {
        self.image.width() as usize * self.image.height() as usize
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width() && (y as u32) < self.height()
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<Color> {
        if !self.in_bounds(x, y) {
            return None;
        }
        Some(Color::from_rgba(*self.image.get_pixel(x as u32, y as u32)))
    }

    /// Writes one pixel; returns `false` when the coordinate is outside the buffer.
    pub fn put_pixel(&mut self, x: i32, y: i32, color: Color) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        self.image.put_pixel(x as u32, y as u32, color.to_rgba());
        true
    }

    pub(crate) fn raw_pixel(&self, index: usize) -> [u8; 4] {
        let offset = index * CHANNELS;
        let raw = self.image.as_raw();
        [raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]]
    }

    pub(crate) fn set_raw_pixel(&mut self, index: usize, pixel: [u8; 4]) {
        let offset = index * CHANNELS;
        let raw: &mut [u8] = &mut self.image;
        raw[offset..offset + CHANNELS].copy_from_slice(&pixel);
    }

    /// Replaces every pixel inside `rect` (clipped to the buffer) with `color`.
    pub fn fill_rect(&mut self, rect: PixelRect, color: Color) -> Option<PixelRect> {
        let target = rect.clamped_to(self.size())?;
        let pixel = color.channels();
        let stride = self.width() as usize;
        let raw: &mut [u8] = &mut self.image;
        for row in 0..target.height as usize {
            let start = ((target.y as usize + row) * stride + target.x as usize) * CHANNELS;
            let end = start + target.width as usize * CHANNELS;
            for chunk in raw[start..end].chunks_exact_mut(CHANNELS) {
                chunk.copy_from_slice(&pixel);
            }
        }
        Some(target)
    }

    pub fn clear_rect(&mut self, rect: PixelRect) -> Option<PixelRect> {
        self.fill_rect(rect, Color::TRANSPARENT)
    }

    /// True when every pixel has zero alpha.
    pub fn is_transparent(&self) -> bool {
        self.image.pixels().all(|pixel| pixel[3] == 0)
    }

    pub fn clear(&mut self) {
        let raw: &mut [u8] = &mut self.image;
        raw.fill(0);
    }

    /// Copies `rect` into a new buffer of the same size; parts outside this buffer stay transparent.
    pub fn copy_region(&self, rect: PixelRect) -> RasterBuffer {
        let mut region = RasterBuffer::new(CanvasSize::new(rect.width, rect.height));
        if let Some(source) = rect.clamped_to(self.size()) {
            let dx = source.x - rect.x;
            let dy = source.y - rect.y;
            let src_stride = self.width() as usize;
            let dst_stride = rect.width as usize;
            let src_raw = self.image.as_raw();
            let dst_raw: &mut [u8] = &mut region.image;
            let row_len = source.width as usize * CHANNELS;
            for row in 0..source.height as usize {
                let src_start = ((source.y as usize + row) * src_stride + source.x as usize) * CHANNELS;
                let dst_start = ((dy as usize + row) * dst_stride + dx as usize) * CHANNELS;
                dst_raw[dst_start..dst_start + row_len]
                    .copy_from_slice(&src_raw[src_start..src_start + row_len]);
            }
        }
        region
    }

    /// Draws `source` with its top-left corner at `(dx, dy)`.
    ///
    /// Returns the destination area that was touched, or `None` when the placement
    /// misses this buffer entirely or the draw is a no-op.
    pub fn draw_image(
        &mut self,
        source: &RasterBuffer,
        dx: i32,
        dy: i32,
        opacity: f32,
        mode: BlendMode,
    ) -> Option<PixelRect> {
        let opacity = opacity.clamp(0.0, 1.0);
        if opacity <= 0.0 && mode != BlendMode::Replace {
            return None;
        }
        let placed = PixelRect::new(dx, dy, source.width(), source.height());
        let target = placed.clamped_to(self.size())?;

        let src_x = (i64::from(target.x) - i64::from(dx)) as usize;
        let src_y = (i64::from(target.y) - i64::from(dy)) as usize;
        let src_stride = source.width() as usize;
        let dst_stride = self.width() as usize;
        let row_len = target.width as usize * CHANNELS;
        let src_raw = source.image.as_raw();
        let dst_raw: &mut [u8] = &mut self.image;

        for row in 0..target.height as usize {
            let src_start = ((src_y + row) * src_stride + src_x) * CHANNELS;
            let dst_start = ((target.y as usize + row) * dst_stride + target.x as usize) * CHANNELS;
            let src_row = &src_raw[src_start..src_start + row_len];
            let dst_row = &mut dst_raw[dst_start..dst_start + row_len];

            if mode == BlendMode::Replace && opacity >= 1.0 {
                dst_row.copy_from_slice(src_row);
                continue;
            }

            for (src_px, dst_px) in src_row
                .chunks_exact(CHANNELS)
                .zip(dst_row.chunks_exact_mut(CHANNELS))
            {
                let src = [src_px[0], src_px[1], src_px[2], src_px[3]];
                let dst = [dst_px[0], dst_px[1], dst_px[2], dst_px[3]];
                dst_px.copy_from_slice(&blend_pixel(dst, src, opacity, mode));
            }
        }
        Some(target)
    }

    /// Copies `source` over this buffer at `(dx, dy)` without blending.
    pub fn blit(&mut self, source: &RasterBuffer, dx: i32, dy: i32) -> Option<PixelRect> {
        self.draw_image(source, dx, dy, 1.0, BlendMode::Replace)
    }
}

/// Combines one destination pixel with one source pixel.
pub fn blend_pixel(dst: [u8; 4], src: [u8; 4], opacity: f32, mode: BlendMode) -> [u8; 4] {
    match mode {
        BlendMode::Replace => [
            src[0],
            src[1],
            src[2],
            unit_to_channel(channel_to_unit(src[3]) * opacity),
        ],
        BlendMode::Erase => {
            let src_alpha = channel_to_unit(src[3]) * opacity;
            let remaining = channel_to_unit(dst[3]) * (1.0 - src_alpha);
            let alpha = unit_to_channel(remaining);
            if alpha == 0 {
                [0, 0, 0, 0]
            } else {
                [dst[0], dst[1], dst[2], alpha]
            }
        }
        BlendMode::Normal => {
            let src_alpha = channel_to_unit(src[3]) * opacity;
            if src_alpha <= 0.0 {
                return dst;
            }
            let dst_alpha = channel_to_unit(dst[3]);
            let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);
            if out_alpha <= 0.0 {
                return [0, 0, 0, 0];
            }
            let mix = |s: u8, d: u8| {
                let value =
                    (f32::from(s) * src_alpha + f32::from(d) * dst_alpha * (1.0 - src_alpha))
                        / out_alpha;
                value.round().clamp(0.0, 255.0) as u8
            };
            [
                mix(src[0], dst[0]),
                mix(src[1], dst[1]),
                mix(src[2], dst[2]),
                unit_to_channel(out_alpha),
            ]
        }
    }
}

fn channel_to_unit(value: u8) -> f32 {
    f32::from(value) / 255.0
}

fn unit_to_channel(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

impl From<RgbaImage> for RasterBuffer {
    fn from(image: RgbaImage) -> Self {
        Self::from_image(image)
    }
}
