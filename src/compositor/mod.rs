mod pass;
mod tile;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::geometry::{CanvasSize, PixelRect};
use crate::layer::{Layer, LayerId};
use crate::raster::RasterBuffer;

pub use pass::{CancellationToken, PassReport};
pub use tile::{CompositeTile, LayerTile, TileCoord, TileGrid};

use pass::{CompositeStore, TileJob, TileSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorSettings {
    pub tile_size: u32,
    pub render_batch_size: usize,
    pub max_background_tiles: usize,
}

impl From<&EngineConfig> for CompositorSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tile_size: config.tile_size,
            render_batch_size: config.render_batch_size,
            max_background_tiles: config.max_background_tiles,
        }
    }
}

struct RenderPass {
    token: CancellationToken,
    worker: JoinHandle<PassReport>,
}

impl RenderPass {
    fn cancel_and_join(self) -> Option<PassReport> {
        self.token.cancel();
        self.join()
    }

    fn join(self) -> Option<PassReport> {
        match self.worker.join() {
            Ok(report) => Some(report),
            Err(_) => {
                tracing::error!("render pass thread panicked");
                None
            }
        }
    }
}

pub struct TileCompositor {
    grid: TileGrid,
    settings: CompositorSettings,
    layer_tiles: HashMap<LayerId, Vec<LayerTile>>,
    composites: Arc<Mutex<CompositeStore>>,
    pass: Mutex<Option<RenderPass>>,
    superseded: Option<PassReport>,
}

impl std::fmt::Debug for TileCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCompositor")
            .field("grid", &self.grid)
            .field("layers", &self.layer_tiles.len())
            .finish_non_exhaustive()
    }
}

impl TileCompositor {
    pub fn new(canvas: CanvasSize, settings: CompositorSettings) -> Self {
        let grid = TileGrid::new(canvas, settings.tile_size);
        tracing::debug!(
            columns = grid.columns(),
            rows = grid.rows(),
            tile_size = grid.tile_size(),
            "tile compositor created"
        );
        Self {
            grid,
            settings,
            layer_tiles: HashMap::new(),
            composites: Arc::new(Mutex::new(CompositeStore::new(grid))),
            pass: Mutex::new(None),
            superseded: None,
        }
    }

    pub const fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn has_layer(&self, id: LayerId) -> bool {
        self.layer_tiles.contains_key(&id)
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layer_tiles.keys().copied().collect()
    }

    /// Creates an empty tile grid for `id`. Existing grids are left untouched.
    pub fn initialize_layer(&mut self, id: LayerId) {
        let grid = self.grid;
        self.layer_tiles.entry(id).or_insert_with(|| {
            grid.coords()
                .map(|coord| LayerTile::new(id, coord, grid.tile_bounds(coord)))
                .collect()
        });
    }

    /// Drops `id`'s tiles and dirties every composite that was built from them.
    pub fn remove_layer(&mut self, id: LayerId) {
        if self.layer_tiles.remove(&id).is_none() {
            return;
        }
        let mut store = self.composites.lock();
        for tile in &mut store.tiles {
            if tile.layer_versions.contains_key(&id) {
                tile.mark_dirty();
            }
        }
    }

    /// Bumps the version of every `id` tile overlapping `bounds` and dirties the
    /// matching composites. Returns the number of tiles touched.
    pub fn mark_area_dirty(&mut self, id: LayerId, bounds: PixelRect) -> usize {
        let coords = self.grid.tiles_intersecting(bounds);
        let Some(tiles) = self.layer_tiles.get_mut(&id) else {
            return 0;
        };
        let mut store = self.composites.lock();
        for coord in &coords {
            tiles[self.grid.index(*coord)].touch();
            store.tile_mut(*coord).mark_dirty();
        }
        coords.len()
    }

    /// Re-extracts `id`'s tiles from the full layer buffer, limited to `bounds` when given.
    pub fn update_layer_bitmap(
        &mut self,
        id: LayerId,
        buffer: &RasterBuffer,
        bounds: Option<PixelRect>,
    ) -> usize {
        self.initialize_layer(id);
        let coords = match bounds {
            Some(bounds) => self.grid.tiles_intersecting(bounds),
            None => self.grid.coords().collect(),
        };
        let Some(tiles) = self.layer_tiles.get_mut(&id) else {
            return 0;
        };
        let mut store = self.composites.lock();
        for coord in &coords {
            let tile = &mut tiles[self.grid.index(*coord)];
            let region = buffer.copy_region(tile.bounds);
            tile.buffer = (!region.is_transparent()).then(|| Arc::new(region));
            tile.touch();
            store.tile_mut(*coord).mark_dirty();
        }
        coords.len()
    }

    pub fn invalidate_all(&mut self) {
        let mut store = self.composites.lock();
        for tile in &mut store.tiles {
            tile.mark_dirty();
        }
    }

    /// Starts a background pass over every stale composite tile.
    ///
    /// A pass that is still running is cancelled and joined first. Tiles
    /// intersecting `viewport` render first; the rest are capped at the
    /// configured background tile count. Returns the number of tiles scheduled.
    pub fn render_dirty_tiles(&mut self, layers: &[Layer], viewport: Option<PixelRect>) -> usize {
        let mut pass = self.pass.lock();
        if let Some(previous) = pass.take() {
            if let Some(report) = previous.cancel_and_join() {
                tracing::debug!(rendered = report.rendered, "previous render pass superseded");
                self.superseded = Some(report);
            }
        }

        let viewport = viewport.unwrap_or_else(|| self.grid.canvas().rect());
        let (jobs, deferred) = self.collect_jobs(layers, viewport);
        for tiles in self.layer_tiles.values_mut() {
            for tile in tiles.iter_mut() {
                tile.dirty = false;
            }
        }
        if jobs.is_empty() {
            return 0;
        }

        let scheduled = jobs.len();
        let token = CancellationToken::new();
        let worker_token = token.clone();
        let store = Arc::clone(&self.composites);
        let batch_size = self.settings.render_batch_size;
        let spawned = std::thread::Builder::new()
            .name("tilepaint-render".into())
            .spawn(move || pass::run_pass(jobs, batch_size, deferred, &store, &worker_token));
        match spawned {
            Ok(worker) => {
                *pass = Some(RenderPass { token, worker });
                scheduled
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to spawn render pass");
                0
            }
        }
    }

    fn collect_jobs(&self, layers: &[Layer], viewport: PixelRect) -> (Vec<TileJob>, usize) {
        let rendered: Vec<(&Layer, &Vec<LayerTile>)> = layers
            .iter()
            .filter(|layer| layer.is_rendered())
            .filter_map(|layer| self.layer_tiles.get(&layer.id).map(|tiles| (layer, tiles)))
            .collect();

        let store = self.composites.lock();
        let mut front = Vec::new();
        let mut back = Vec::new();
        for composite in &store.tiles {
            let index = self.grid.index(composite.coord);
            let sources: Vec<TileSource> = rendered
                .iter()
                .map(|(layer, tiles)| TileSource {
                    layer_id: layer.id,
                    version: tiles[index].version,
                    opacity: layer.opacity,
                    buffer: tiles[index].buffer.clone(),
                })
                .collect();
            let expected: HashMap<LayerId, u64> = sources
                .iter()
                .map(|source| (source.layer_id, source.version))
                .collect();
            if composite.is_current(&expected) {
                continue;
            }
            let job = TileJob {
                coord: composite.coord,
                bounds: composite.bounds,
                generation: composite.generation(),
                sources,
            };
            if composite.bounds.intersects(&viewport) {
                front.push(job);
            } else {
                back.push(job);
            }
        }

        let deferred = back.len().saturating_sub(self.settings.max_background_tiles);
        back.truncate(self.settings.max_background_tiles);
        front.extend(back);
        (front, deferred)
    }

    /// Blocks until the current pass finishes.
    pub fn wait_idle(&self) -> Option<PassReport> {
        let running = self.pass.lock().take();
        running.and_then(RenderPass::join)
    }

    /// Report of the last pass that a newer pass cancelled.
    pub fn last_superseded(&self) -> Option<PassReport> {
        self.superseded
    }

    /// Signals the current pass to stop after its in-flight batch.
    pub fn cancel_pending(&self) {
        if let Some(pass) = self.pass.lock().as_ref() {
            pass.token.cancel();
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.pass
            .lock()
            .as_ref()
            .is_some_and(|pass| !pass.worker.is_finished())
    }

    /// Copies composited tiles overlapping `viewport` into `target`, whose origin
    /// maps to the viewport's top-left corner. Empty composites clear their area.
    pub fn draw_to_canvas(&self, target: &mut RasterBuffer, viewport: PixelRect) -> usize {
        let store = self.composites.lock();
        let mut drawn = 0;
        for coord in self.grid.tiles_intersecting(viewport) {
            let tile = store.tile(coord);
            let dx = tile.bounds.x - viewport.x;
            let dy = tile.bounds.y - viewport.y;
            match &tile.buffer {
                Some(buffer) => {
                    target.blit(buffer, dx, dy);
                    drawn += 1;
                }
                None => {
                    target.clear_rect(PixelRect::new(dx, dy, tile.bounds.width, tile.bounds.height));
                }
            }
        }
        drawn
    }

    pub fn composite_tile(&self, coord: TileCoord) -> Option<CompositeTile> {
        if coord.column >= self.grid.columns() || coord.row >= self.grid.rows() {
            return None;
        }
        Some(self.composites.lock().tile(coord).clone())
    }

    pub fn layer_tile(&self, id: LayerId, coord: TileCoord) -> Option<&LayerTile> {
        if coord.column >= self.grid.columns() || coord.row >= self.grid.rows() {
            return None;
        }
        self.layer_tiles
            .get(&id)
            .map(|tiles| &tiles[self.grid.index(coord)])
    }

    pub fn dirty_tile_count(&self) -> usize {
        self.composites
            .lock()
            .tiles
            .iter()
            .filter(|tile| tile.dirty)
            .count()
    }

    /// Renders synchronously: schedules a pass and waits for it.
    pub fn render_blocking(
        &mut self,
        layers: &[Layer],
        viewport: Option<PixelRect>,
    ) -> Option<PassReport> {
        self.render_dirty_tiles(layers, viewport);
        self.wait_idle()
    }
}

impl Drop for TileCompositor {
    fn drop(&mut self) {
        if let Some(pass) = self.pass.get_mut().take() {
            pass.cancel_and_join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LayerBitmapCache;
    use crate::geometry::Color;

    const SIZE: CanvasSize = CanvasSize::new(40, 30);

    fn settings(max_background_tiles: usize) -> CompositorSettings {
        CompositorSettings {
            tile_size: 16,
            render_batch_size: 2,
            max_background_tiles,
        }
    }

    fn gradient(seed: u8) -> RasterBuffer {
        let mut buffer = RasterBuffer::new(SIZE);
        for y in 0..SIZE.height as i32 {
            for x in 0..SIZE.width as i32 {
                if (x + y + i32::from(seed)) % 3 == 0 {
                    continue;
                }
                let alpha = ((x * 7 + y * 3) as u8).wrapping_add(seed) | 0x40;
                buffer.put_pixel(
                    x,
                    y,
                    Color::rgba((x * 6) as u8, (y * 8) as u8, seed.wrapping_mul(40), alpha),
                );
            }
        }
        buffer
    }

    #[test]
    fn update_bumps_versions_and_dirties_composites() {
        let mut compositor = TileCompositor::new(SIZE, settings(64));
        let layer = Layer::new(LayerId(1), "ink");
        compositor.update_layer_bitmap(layer.id, &gradient(1), None);
        compositor.render_blocking(std::slice::from_ref(&layer), None);
        assert_eq!(compositor.dirty_tile_count(), 0);

        let touched = compositor.mark_area_dirty(layer.id, PixelRect::new(15, 0, 2, 2));
        assert_eq!(touched, 2);
        let tile = compositor
            .layer_tile(layer.id, TileCoord::new(1, 0))
            .expect("tile exists");
        assert_eq!(tile.version, 2);
        assert!(tile.dirty);
        assert!(tile.last_modified.is_some());
        assert_eq!(compositor.dirty_tile_count(), 2);
    }

    #[test]
    fn tiled_output_matches_full_composite() {
        let mut compositor = TileCompositor::new(SIZE, settings(64));
        let mut cache = LayerBitmapCache::default();
        let mut layers = Vec::new();
        for (id, opacity) in [(1u64, 1.0f32), (2, 0.6), (3, 0.35)] {
            let mut layer = Layer::new(LayerId(id), format!("layer {id}"));
            layer.opacity = opacity;
            let buffer = gradient(id as u8);
            compositor.update_layer_bitmap(layer.id, &buffer, None);
            cache.put(layer.id, buffer);
            layers.push(layer);
        }
        layers[1].visible = false;

        let report = compositor
            .render_blocking(&layers, None)
            .expect("pass completes");
        assert_eq!(report.rendered, compositor.grid().tile_count());
        assert!(!report.cancelled);

        let mut tiled = RasterBuffer::new(SIZE);
        compositor.draw_to_canvas(&mut tiled, SIZE.rect());
        let full = cache.get_combined_bitmap(&layers, SIZE);
        assert_eq!(tiled, full);
    }

    #[test]
    fn clean_tiles_are_not_rerendered() {
        let mut compositor = TileCompositor::new(SIZE, settings(64));
        let layer = Layer::new(LayerId(1), "ink");
        compositor.update_layer_bitmap(layer.id, &gradient(2), None);
        compositor.render_blocking(std::slice::from_ref(&layer), None);

        assert_eq!(compositor.render_dirty_tiles(std::slice::from_ref(&layer), None), 0);

        compositor.mark_area_dirty(layer.id, PixelRect::new(0, 0, 1, 1));
        assert_eq!(compositor.render_dirty_tiles(std::slice::from_ref(&layer), None), 1);
        compositor.wait_idle();
    }

    #[test]
    fn visibility_change_is_detected_through_versions() {
        let mut compositor = TileCompositor::new(SIZE, settings(64));
        let mut layer = Layer::new(LayerId(1), "ink");
        compositor.update_layer_bitmap(layer.id, &gradient(3), None);
        compositor.render_blocking(std::slice::from_ref(&layer), None);

        layer.visible = false;
        let scheduled = compositor.render_dirty_tiles(std::slice::from_ref(&layer), None);
        assert_eq!(scheduled, compositor.grid().tile_count());
        compositor.wait_idle();

        let mut target = RasterBuffer::filled(SIZE, Color::WHITE);
        assert_eq!(compositor.draw_to_canvas(&mut target, SIZE.rect()), 0);
        assert_eq!(target, RasterBuffer::new(SIZE));
    }

    #[test]
    fn background_tiles_beyond_cap_are_deferred() {
        let mut compositor = TileCompositor::new(SIZE, settings(1));
        let layer = Layer::new(LayerId(1), "ink");
        compositor.initialize_layer(layer.id);

        let viewport = PixelRect::new(0, 0, 8, 8);
        let scheduled = compositor.render_dirty_tiles(std::slice::from_ref(&layer), Some(viewport));
        assert_eq!(scheduled, 2);
        let report = compositor.wait_idle().expect("pass completes");
        assert_eq!(report.deferred, compositor.grid().tile_count() - 2);

        let viewport_tile = compositor
            .composite_tile(TileCoord::new(0, 0))
            .expect("tile exists");
        assert!(!viewport_tile.dirty);
    }

    #[test]
    fn remove_layer_dirties_composites_built_from_it() {
        let mut compositor = TileCompositor::new(SIZE, settings(64));
        let layer = Layer::new(LayerId(1), "ink");
        compositor.update_layer_bitmap(layer.id, &gradient(4), None);
        compositor.render_blocking(std::slice::from_ref(&layer), None);

        compositor.remove_layer(layer.id);
        assert!(!compositor.has_layer(layer.id));
        assert_eq!(compositor.dirty_tile_count(), compositor.grid().tile_count());
    }

    #[test]
    fn invalidate_all_dirties_every_tile() {
        let mut compositor = TileCompositor::new(SIZE, settings(64));
        compositor.initialize_layer(LayerId(1));
        compositor.render_blocking(&[Layer::new(LayerId(1), "ink")], None);
        assert_eq!(compositor.dirty_tile_count(), 0);

        compositor.invalidate_all();
        assert_eq!(compositor.dirty_tile_count(), compositor.grid().tile_count());
    }

    #[test]
    fn draw_to_canvas_offsets_by_viewport_origin() {
        let mut compositor = TileCompositor::new(SIZE, settings(64));
        let layer = Layer::new(LayerId(1), "ink");
        let mut buffer = RasterBuffer::new(SIZE);
        buffer.put_pixel(20, 18, Color::BLACK);
        compositor.update_layer_bitmap(layer.id, &buffer, None);
        compositor.render_blocking(std::slice::from_ref(&layer), None);

        let mut target = RasterBuffer::new(CanvasSize::new(10, 10));
        compositor.draw_to_canvas(&mut target, PixelRect::new(15, 15, 10, 10));
        assert_eq!(target.pixel(5, 3), Some(Color::BLACK));
        assert_eq!(target.pixel(0, 0), Some(Color::TRANSPARENT));
    }

    #[test]
    fn new_pass_supersedes_running_pass() {
        let canvas = CanvasSize::new(1024, 1024);
        let settings = CompositorSettings {
            tile_size: 16,
            render_batch_size: 1,
            max_background_tiles: 4096,
        };
        let mut compositor = TileCompositor::new(canvas, settings);
        let total = compositor.grid().tile_count();
        let layer = Layer::new(LayerId(1), "ink");
        compositor.update_layer_bitmap(
            layer.id,
            &RasterBuffer::filled(canvas, Color::WHITE),
            None,
        );
        assert!(compositor.last_superseded().is_none());

        let first = compositor.render_dirty_tiles(std::slice::from_ref(&layer), None);
        assert_eq!(first, total);
        let second = compositor.render_dirty_tiles(std::slice::from_ref(&layer), None);
        let superseded = compositor
            .last_superseded()
            .expect("first pass should be superseded");
        assert!(superseded.cancelled);
        assert!(superseded.rendered < total);
        // Tiles the first pass committed stay current and are not scheduled again.
        assert_eq!(superseded.rendered + second, total);

        let report = compositor.wait_idle().expect("second pass should finish");
        assert!(!report.cancelled);
        assert_eq!(report.rendered, second);

        compositor.render_blocking(std::slice::from_ref(&layer), None);
        assert_eq!(compositor.dirty_tile_count(), 0);
        assert!(!compositor.is_rendering());
    }
}
