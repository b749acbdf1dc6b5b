use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::geometry::{CanvasSize, PixelRect};
use crate::layer::LayerId;
use crate::raster::RasterBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub column: u32,
    pub row: u32,
}

impl TileCoord {
    pub const fn new(column: u32, row: u32) -> Self {
        Self { column, row }
    }
}

/// Partition of the canvas into square tiles; edge tiles are clipped to the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    canvas: CanvasSize,
    tile_size: u32,
    columns: u32,
    rows: u32,
}

impl TileGrid {
    pub fn new(canvas: CanvasSize, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        Self {
            canvas,
            tile_size,
            columns: canvas.width.div_ceil(tile_size),
            rows: canvas.height.div_ceil(tile_size),
        }
    }

    pub const fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    pub const fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub const fn columns(&self) -> u32 {
        self.columns
    }

    pub const fn rows(&self) -> u32 {
        self.rows
    }

    pub const fn tile_count(&self) -> usize {
        self.columns as usize * self.rows as usize
    }

    pub fn index(&self, coord: TileCoord) -> usize {
        coord.row as usize * self.columns as usize + coord.column as usize
    }

    pub fn coords(&self) -> impl Iterator<Item = TileCoord> {
        let columns = self.columns;
        (0..self.rows).flat_map(move |row| (0..columns).map(move |column| TileCoord::new(column, row)))
    }

    pub fn tile_bounds(&self, coord: TileCoord) -> PixelRect {
        let x = coord.column * self.tile_size;
        let y = coord.row * self.tile_size;
        PixelRect::new(
            x as i32,
            y as i32,
            self.tile_size.min(self.canvas.width.saturating_sub(x)),
            self.tile_size.min(self.canvas.height.saturating_sub(y)),
        )
    }

    /// Tiles overlapping `rect`, row-major.
    pub fn tiles_intersecting(&self, rect: PixelRect) -> Vec<TileCoord> {
        let Some(clipped) = rect.clamped_to(self.canvas) else {
            return Vec::new();
        };
        let first_column = clipped.x as u32 / self.tile_size;
        let first_row = clipped.y as u32 / self.tile_size;
        let last_column = (clipped.x as u32 + clipped.width - 1) / self.tile_size;
        let last_row = (clipped.y as u32 + clipped.height - 1) / self.tile_size;
        (first_row..=last_row)
            .flat_map(|row| (first_column..=last_column).map(move |column| TileCoord::new(column, row)))
            .collect()
    }
}

/// One layer's pixels for one tile. `version` increases on every write.
#[derive(Debug, Clone)]
pub struct LayerTile {
    pub layer_id: LayerId,
    pub coord: TileCoord,
    pub bounds: PixelRect,
    /// `None` while the tile is fully transparent.
    pub buffer: Option<Arc<RasterBuffer>>,
    pub dirty: bool,
    pub version: u64,
    pub last_modified: Option<Instant>,
}

impl LayerTile {
    pub(crate) fn new(layer_id: LayerId, coord: TileCoord, bounds: PixelRect) -> Self {
        Self {
            layer_id,
            coord,
            bounds,
            buffer: None,
            dirty: false,
            version: 0,
            last_modified: None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.dirty = true;
        self.last_modified = Some(Instant::now());
    }
}

/// Merged result of every rendered layer for one tile coordinate.
#[derive(Debug, Clone)]
pub struct CompositeTile {
    pub coord: TileCoord,
    pub bounds: PixelRect,
    pub buffer: Option<Arc<RasterBuffer>>,
    pub dirty: bool,
    /// Layer tile versions that went into `buffer`.
    pub layer_versions: HashMap<LayerId, u64>,
    generation: u64,
}

impl CompositeTile {
    pub(crate) fn new(coord: TileCoord, bounds: PixelRect) -> Self {
        Self {
            coord,
            bounds,
            buffer: None,
            dirty: true,
            layer_versions: HashMap::new(),
            generation: 0,
        }
    }

    /// Clean and built from exactly `expected`.
    pub fn is_current(&self, expected: &HashMap<LayerId, u64>) -> bool {
        !self.dirty && self.layer_versions == *expected
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
        self.generation = self.generation.wrapping_add(1);
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn commit(
        &mut self,
        generation: u64,
        buffer: Option<Arc<RasterBuffer>>,
        layer_versions: HashMap<LayerId, u64>,
    ) -> bool {
        if self.generation != generation {
            return false;
        }
        self.buffer = buffer;
        self.layer_versions = layer_versions;
        self.dirty = false;
        true
    }
}
