use crate::config::FillSettings;
use crate::geometry::{Color, PixelRect};
use crate::raster::RasterBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillConfig {
    /// Per-channel absolute difference still considered a match.
    pub tolerance: u8,
    pub max_iterations: usize,
    /// Buffers with fewer pixels than this use the stack-based fill.
    pub algorithm_threshold: usize,
}

impl Default for FillConfig {
    fn default() -> Self {
        FillSettings::default().into()
    }
}

impl From<FillSettings> for FillConfig {
    fn from(settings: FillSettings) -> Self {
        Self {
            tolerance: settings.tolerance,
            max_iterations: settings.max_iterations,
            algorithm_threshold: settings.algorithm_threshold,
        }
    }
}

/// Inclusive pixel extent of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillBounds {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl FillBounds {
    fn seed(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    fn include_span(&mut self, left: u32, right: u32, y: u32) {
        self.min_x = self.min_x.min(left);
        self.max_x = self.max_x.max(right);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
    }

    pub fn to_rect(self) -> PixelRect {
        PixelRect::from_inclusive(
            self.min_x as i32,
            self.min_y as i32,
            self.max_x as i32,
            self.max_y as i32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillResult {
    pub pixels_filled: usize,
    pub success: bool,
    pub bounds: Option<FillBounds>,
}

impl FillResult {
    pub(crate) const fn rejected() -> Self {
        Self {
            pixels_filled: 0,
            success: false,
            bounds: None,
        }
    }

    pub(crate) const fn unchanged() -> Self {
        Self {
            pixels_filled: 0,
            success: true,
            bounds: None,
        }
    }

    /// Area to hand to the compositor, if anything changed.
    pub fn dirty_rect(&self) -> Option<PixelRect> {
        self.bounds.map(FillBounds::to_rect)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillAlgorithm {
    Stack,
    ScanLine,
}

/// 4-connected region fill: stack-driven below `algorithm_threshold` pixels,
/// scan-line spans above it.
#[derive(Debug, Clone, Default)]
pub struct FloodFillEngine {
    config: FillConfig,
}

impl FloodFillEngine {
    pub fn new(config: FillConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> FillConfig {
        self.config
    }

    pub fn algorithm_for(&self, buffer: &RasterBuffer) -> FillAlgorithm {
        if buffer.pixel_count() < self.config.algorithm_threshold {
            FillAlgorithm::Stack
        } else {
            FillAlgorithm::ScanLine
        }
    }

    /// Whether a fill at `(x, y)` would change any pixel.
    pub fn would_fill(&self, buffer: &RasterBuffer, x: i32, y: i32, replacement: Color) -> bool {
        buffer.pixel(x, y).is_some_and(|seed| {
            !colors_match(seed.channels(), replacement.channels(), self.config.tolerance)
        })
    }

    /// Replaces the 4-connected region around `(x, y)` whose color matches the seed.
    ///
    /// Hitting `max_iterations` leaves the partial fill in place and reports
    /// `success = false`; callers that need atomicity snapshot beforehand.
    pub fn flood_fill(
        &self,
        buffer: &mut RasterBuffer,
        x: i32,
        y: i32,
        replacement: Color,
    ) -> FillResult {
        let Some(seed) = buffer.pixel(x, y) else {
            tracing::debug!(x, y, "fill seed outside buffer");
            return FillResult::rejected();
        };
        let target = seed.channels();
        let replacement = replacement.channels();
        if colors_match(target, replacement, self.config.tolerance) {
            return FillResult::unchanged();
        }

        let algorithm = self.algorithm_for(buffer);
        let (x, y) = (x as u32, y as u32);
        let result = match algorithm {
            FillAlgorithm::Stack => self.stack_fill(buffer, x, y, target, replacement),
            FillAlgorithm::ScanLine => self.scanline_fill(buffer, x, y, target, replacement),
        };
        if result.success {
            tracing::debug!(?algorithm, pixels = result.pixels_filled, "flood fill complete");
        } else {
            tracing::warn!(
                ?algorithm,
                pixels = result.pixels_filled,
                max_iterations = self.config.max_iterations,
                "flood fill hit iteration cap; partial fill kept"
            );
        }
        result
    }

    fn stack_fill(
        &self,
        buffer: &mut RasterBuffer,
        seed_x: u32,
        seed_y: u32,
        target: [u8; 4],
        replacement: [u8; 4],
    ) -> FillResult {
        let width = buffer.width() as usize;
        let height = buffer.height() as usize;
        let tolerance = self.config.tolerance;
        let mut visited = vec![false; width * height];
        let mut stack: Vec<usize> = Vec::with_capacity(256);
        let mut bounds = FillBounds::seed(seed_x, seed_y);
        let mut filled = 0_usize;
        let mut iterations = 0_usize;

        let seed_index = seed_y as usize * width + seed_x as usize;
        visited[seed_index] = true;
        stack.push(seed_index);

        while let Some(index) = stack.pop() {
            if iterations >= self.config.max_iterations {
                return FillResult {
                    pixels_filled: filled,
                    success: false,
                    bounds: (filled > 0).then_some(bounds),
                };
            }
            iterations += 1;

            buffer.set_raw_pixel(index, replacement);
            filled += 1;
            let x = index % width;
            let y = index / width;
            bounds.include_span(x as u32, x as u32, y as u32);

            let mut visit = |neighbor: usize, stack: &mut Vec<usize>| {
                if !visited[neighbor] && colors_match(buffer.raw_pixel(neighbor), target, tolerance)
                {
                    visited[neighbor] = true;
                    stack.push(neighbor);
                }
            };
            if x > 0 {
                visit(index - 1, &mut stack);
            }
            if x + 1 < width {
                visit(index + 1, &mut stack);
            }
            if y > 0 {
                visit(index - width, &mut stack);
            }
            if y + 1 < height {
                visit(index + width, &mut stack);
            }
        }

        FillResult {
            pixels_filled: filled,
            success: true,
            bounds: Some(bounds),
        }
    }

    fn scanline_fill(
        &self,
        buffer: &mut RasterBuffer,
        seed_x: u32,
        seed_y: u32,
        target: [u8; 4],
        replacement: [u8; 4],
    ) -> FillResult {
        let width = buffer.width() as usize;
        let height = buffer.height() as usize;
        let tolerance = self.config.tolerance;
        let matches = |buffer: &RasterBuffer, x: usize, y: usize| {
            colors_match(buffer.raw_pixel(y * width + x), target, tolerance)
        };

        let mut pending: Vec<(usize, usize)> = vec![(seed_x as usize, seed_y as usize)];
        let mut bounds = FillBounds::seed(seed_x, seed_y);
        let mut filled = 0_usize;
        let mut iterations = 0_usize;

        while let Some((x, y)) = pending.pop() {
            // Filled pixels never match the target, so a stale task is simply skipped.
            if !matches(&*buffer, x, y) {
                continue;
            }
            if iterations >= self.config.max_iterations {
                return FillResult {
                    pixels_filled: filled,
                    success: false,
                    bounds: (filled > 0).then_some(bounds),
                };
            }
            iterations += 1;

            let mut left = x;
            while left > 0 && matches(&*buffer, left - 1, y) {
                left -= 1;
            }
            let mut right = x;
            while right + 1 < width && matches(&*buffer, right + 1, y) {
                right += 1;
            }

            let row_start = y * width;
            for column in left..=right {
                buffer.set_raw_pixel(row_start + column, replacement);
            }
            filled += right - left + 1;
            bounds.include_span(left as u32, right as u32, y as u32);

            for neighbor_y in [y.checked_sub(1), (y + 1 < height).then_some(y + 1)]
                .into_iter()
                .flatten()
            {
                let mut column = left;
                while column <= right {
                    if matches(&*buffer, column, neighbor_y) {
                        pending.push((column, neighbor_y));
                        while column <= right && matches(&*buffer, column, neighbor_y) {
                            column += 1;
                        }
                    } else {
                        column += 1;
                    }
                }
            }
        }

        FillResult {
            pixels_filled: filled,
            success: true,
            bounds: Some(bounds),
        }
    }
}

/// Exact equality at zero tolerance, otherwise every channel within `tolerance`.
pub fn colors_match(a: [u8; 4], b: [u8; 4], tolerance: u8) -> bool {
    if tolerance == 0 {
        return a == b;
    }
    a.iter()
        .zip(b.iter())
        .all(|(left, right)| left.abs_diff(*right) <= tolerance)
}
