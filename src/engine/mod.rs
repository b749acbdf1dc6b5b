//! Edit coordination.
//!
//! Every mutating action follows one protocol: capture a [`HistorySnapshot`],
//! mutate metadata and/or pixels, dirty the affected tiles, then publish the
//! new state to observers. The snapshot only lands in history once the
//! mutation succeeded and actually changed something.

use std::sync::Arc;

use kurbo::{Point, Vec2};

use crate::cache::{BitmapCacheSnapshot, LayerBitmapCache};
use crate::compositor::{CompositorSettings, PassReport, TileCompositor};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::fill::{FillConfig, FillResult, FloodFillEngine};
use crate::geometry::{CanvasSize, Color, PixelPoint, PixelRect};
use crate::history::{HistoryAction, UndoRedoManager};
use crate::layer::{DrawingState, FrameId, Layer, LayerError, LayerId, LayerLocks, LayerManager};
use crate::raster::{BlendMode, RasterBuffer};
use crate::selection::{
    DisplayMapping, HitZone, SelectionEngine, SelectionOutcome, SelectionPhase, SelectionState,
    SelectionSummary,
};
use crate::storage::{PersistTask, PersistenceWorker, ProjectStore};

/// Metadata, every layer's pixels and any floating selection at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySnapshot {
    pub drawing: DrawingState,
    pub bitmaps: BitmapCacheSnapshot,
    /// Lifted pixels that are not on any layer yet.
    pub selection: Option<SelectionState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// What observers receive after every completed action.
#[derive(Debug, Clone)]
pub struct PublishedState {
    pub drawing: DrawingState,
    pub selection: SelectionSummary,
    pub can_undo: bool,
    pub can_redo: bool,
}

type Observer = Box<dyn Fn(&PublishedState) + Send>;

enum Edit<T> {
    Applied(T),
    Skipped(T),
}

pub struct DrawEngine {
    config: EngineConfig,
    layers: LayerManager,
    cache: LayerBitmapCache,
    history: UndoRedoManager<HistorySnapshot>,
    compositor: TileCompositor,
    fill: FloodFillEngine,
    selection: SelectionEngine,
    persistence: Option<PersistenceWorker>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer_id: u64,
}

impl std::fmt::Debug for DrawEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawEngine")
            .field("canvas", &self.canvas())
            .field("layers", &self.layers.layers().len())
            .field("undo", &self.history.undo_len())
            .field("redo", &self.history.redo_len())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl DrawEngine {
    pub fn new(config: EngineConfig) -> Self {
        let config = config.sanitized();
        let canvas = config.canvas_size();
        let layers = LayerManager::new(canvas);
        let mut compositor = TileCompositor::new(canvas, CompositorSettings::from(&config));
        for layer in layers.layers() {
            compositor.initialize_layer(layer.id);
        }
        tracing::info!(
            width = canvas.width,
            height = canvas.height,
            tile_size = config.tile_size,
            "draw engine ready"
        );
        Self {
            cache: LayerBitmapCache::new(config.cache_max_entries),
            history: UndoRedoManager::new(config.history_cap),
            fill: FloodFillEngine::new(FillConfig::from(config.fill)),
            selection: SelectionEngine::new(config.selection),
            config,
            layers,
            compositor,
            persistence: None,
            observers: Vec::new(),
            next_observer_id: 1,
        }
    }

    /// Builds an engine whose structural and pixel changes are mirrored to `store`
    /// from a background worker.
    pub fn with_store(config: EngineConfig, store: Arc<dyn ProjectStore>) -> EngineResult<Self> {
        let mut engine = Self::new(config);
        let worker = PersistenceWorker::spawn(store)?;
        engine.layers.attach_persistence(worker.handle());
        engine.persistence = Some(worker);
        Ok(engine)
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn canvas(&self) -> CanvasSize {
        self.layers.canvas()
    }

    pub fn state(&self) -> &DrawingState {
        self.layers.state()
    }

    pub fn layers(&self) -> &[Layer] {
        self.layers.layers()
    }

    pub fn active_layer_id(&self) -> Option<LayerId> {
        self.layers.active_layer().map(|layer| layer.id)
    }

    /// Read-only view of a layer's pixels; `None` until something is drawn.
    pub fn layer_bitmap(&self, id: LayerId) -> Option<Arc<RasterBuffer>> {
        self.cache.get(id)
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    pub fn compositor(&self) -> &TileCompositor {
        &self.compositor
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            drawing: self.layers.state().clone(),
            bitmaps: self.cache.get_all_bitmaps(),
            selection: self.selection.state().cloned(),
        }
    }

    pub fn published_state(&self) -> PublishedState {
        PublishedState {
            drawing: self.layers.state().clone(),
            selection: self.selection.summary(),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        }
    }

    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: Fn(&PublishedState) + Send + 'static,
    {
        let id = ObserverId(self.next_observer_id);
        self.next_observer_id += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    fn publish(&self) {
        if self.observers.is_empty() {
            return;
        }
        let state = self.published_state();
        for (_, observer) in &self.observers {
            observer(&state);
        }
    }

    fn edit<T, F>(&mut self, action: &'static str, apply: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Self) -> EngineResult<Edit<T>>,
    {
        let snapshot = self.snapshot();
        match apply(self)? {
            Edit::Applied(value) => {
                self.history.save_state(snapshot);
                tracing::debug!(action, undo = self.history.undo_len(), "edit applied");
                self.publish();
                Ok(value)
            }
            Edit::Skipped(value) => {
                tracing::debug!(action, "edit left state unchanged");
                Ok(value)
            }
        }
    }

    /// Commits a floating selection before an unrelated edit touches the drawing.
    fn settle_selection(&mut self) -> EngineResult<()> {
        match self.selection.phase() {
            SelectionPhase::Transforming => {
                self.apply_selection()?;
            }
            SelectionPhase::Selecting => self.selection.reset(),
            SelectionPhase::Inactive => {}
        }
        Ok(())
    }

    /// Keeps the bitmap cache large enough that a live layer is never evicted.
    fn reserve_cache_for_live_layers(&mut self) {
        let live = self.layers.state().all_layer_ids().count();
        self.cache.reserve_entries(live);
    }

    fn sync_pixels(&mut self, id: LayerId, bounds: Option<PixelRect>) {
        match self.cache.get(id) {
            Some(buffer) => {
                self.compositor.update_layer_bitmap(id, &buffer, bounds);
                if let (Some(worker), Some(layer)) = (&self.persistence, self.layers.layer(id)) {
                    worker.submit(PersistTask::UpdateLayer {
                        layer: layer.clone(),
                        buffer: Some(buffer),
                    });
                }
            }
            None => {
                self.compositor.remove_layer(id);
                self.compositor.initialize_layer(id);
            }
        }
    }

    /// Rebuilds the compositor's layer grids for the current frame from the cache.
    fn resync_compositor(&mut self) {
        let current: Vec<LayerId> = self.layers.layers().iter().map(|layer| layer.id).collect();
        for id in self.compositor.layer_ids() {
            if !current.contains(&id) {
                self.compositor.remove_layer(id);
            }
        }
        for id in current {
            self.sync_pixels(id, None);
        }
        self.compositor.invalidate_all();
    }

    pub fn commit_stroke(
        &mut self,
        layer_id: LayerId,
        stroke: &RasterBuffer,
        origin: PixelPoint,
        mode: BlendMode,
    ) -> EngineResult<Option<PixelRect>> {
        self.settle_selection()?;
        self.layers.editable_layer(layer_id)?;
        let canvas = self.canvas();
        let placed = PixelRect::new(origin.x, origin.y, stroke.width(), stroke.height());
        if placed.clamped_to(canvas).is_none() {
            return Ok(None);
        }
        self.edit("commit stroke", |engine| {
            let layer = engine.cache.get_or_insert_mut(layer_id, canvas);
            let dirty = layer.draw_image(stroke, origin.x, origin.y, 1.0, mode);
            engine.sync_pixels(layer_id, dirty);
            Ok(Edit::Applied(dirty))
        })
    }

    /// Replaces a layer's pixels wholesale; sizes other than the canvas are cropped or padded.
    pub fn put_layer_pixels(&mut self, layer_id: LayerId, pixels: RasterBuffer) -> EngineResult<()> {
        self.settle_selection()?;
        self.layers.editable_layer(layer_id)?;
        let canvas = self.canvas();
        self.edit("put layer pixels", |engine| {
            let pixels = if pixels.size() == canvas {
                pixels
            } else {
                pixels.copy_region(canvas.rect())
            };
            engine.cache.put(layer_id, pixels);
            engine.sync_pixels(layer_id, None);
            Ok(Edit::Applied(()))
        })
    }

    pub fn add_layer(&mut self, name: Option<&str>) -> EngineResult<LayerId> {
        self.settle_selection()?;
        self.edit("add layer", |engine| {
            let id = engine.layers.add_layer(name);
            engine.reserve_cache_for_live_layers();
            engine.compositor.initialize_layer(id);
            Ok(Edit::Applied(id))
        })
    }

    pub fn delete_layer(&mut self, layer_id: LayerId) -> EngineResult<()> {
        self.settle_selection()?;
        self.edit("delete layer", |engine| {
            engine.layers.delete_layer(layer_id)?;
            engine.cache.remove(layer_id);
            engine.compositor.remove_layer(layer_id);
            engine.compositor.invalidate_all();
            Ok(Edit::Applied(()))
        })
    }

    pub fn move_layer(&mut self, layer_id: LayerId, to_index: usize) -> EngineResult<()> {
        self.settle_selection()?;
        let from = self.layers.frame().layer_index(layer_id);
        self.edit("move layer", |engine| {
            engine.layers.move_layer(layer_id, to_index)?;
            if from == Some(to_index) {
                return Ok(Edit::Skipped(()));
            }
            engine.compositor.invalidate_all();
            Ok(Edit::Applied(()))
        })
    }

    pub fn set_layer_visibility(&mut self, layer_id: LayerId, visible: bool) -> EngineResult<()> {
        self.settle_selection()?;
        self.edit("set layer visibility", |engine| {
            let unchanged = engine.layers.layer(layer_id).map(|layer| layer.visible) == Some(visible);
            engine.layers.set_visibility(layer_id, visible)?;
            if unchanged {
                return Ok(Edit::Skipped(()));
            }
            engine.compositor.invalidate_all();
            Ok(Edit::Applied(()))
        })
    }

    pub fn set_layer_opacity(&mut self, layer_id: LayerId, opacity: f32) -> EngineResult<()> {
        self.settle_selection()?;
        self.edit("set layer opacity", |engine| {
            let before = engine.layers.layer(layer_id).map(|layer| layer.opacity);
            engine.layers.set_opacity(layer_id, opacity)?;
            if engine.layers.layer(layer_id).map(|layer| layer.opacity) == before {
                return Ok(Edit::Skipped(()));
            }
            engine.compositor.invalidate_all();
            Ok(Edit::Applied(()))
        })
    }

    pub fn rename_layer(&mut self, layer_id: LayerId, name: &str) -> EngineResult<()> {
        self.edit("rename layer", |engine| {
            let unchanged = engine.layers.layer(layer_id).is_some_and(|layer| layer.name == name);
            if unchanged {
                return Ok(Edit::Skipped(()));
            }
            engine.layers.rename_layer(layer_id, name)?;
            Ok(Edit::Applied(()))
        })
    }

    pub fn set_layer_locks(&mut self, layer_id: LayerId, locks: LayerLocks) -> EngineResult<()> {
        self.edit("set layer locks", |engine| {
            let unchanged = engine.layers.layer(layer_id).is_some_and(|layer| layer.locks == locks);
            if unchanged {
                return Ok(Edit::Skipped(()));
            }
            engine.layers.set_locks(layer_id, locks)?;
            Ok(Edit::Applied(()))
        })
    }

    /// Not recorded in history.
    pub fn set_active_layer(&mut self, layer_id: LayerId) -> EngineResult<()> {
        self.layers.set_active_layer(layer_id)?;
        self.publish();
        Ok(())
    }

    pub fn add_frame(&mut self) -> EngineResult<(FrameId, LayerId)> {
        self.settle_selection()?;
        self.edit("add frame", |engine| {
            let added = engine.layers.add_frame();
            engine.reserve_cache_for_live_layers();
            engine.resync_compositor();
            Ok(Edit::Applied(added))
        })
    }

    pub fn select_frame(&mut self, index: usize) -> EngineResult<()> {
        self.settle_selection()?;
        let current = self.layers.state().current_frame;
        self.edit("select frame", |engine| {
            engine.layers.select_frame(index)?;
            if current == index {
                return Ok(Edit::Skipped(()));
            }
            engine.resync_compositor();
            Ok(Edit::Applied(()))
        })
    }

    pub fn delete_frame(&mut self, index: usize) -> EngineResult<()> {
        self.settle_selection()?;
        self.edit("delete frame", |engine| {
            let removed = engine.layers.delete_frame(index)?;
            for layer in &removed.layers {
                engine.cache.remove(layer.id);
            }
            engine.resync_compositor();
            Ok(Edit::Applied(()))
        })
    }

    /// Fills the region around `seed` on `layer_id`.
    ///
    /// Seeds outside the canvas and fills that would change nothing return
    /// without a history entry. A fill cut short by the iteration cap keeps its
    /// partial result and stays undoable.
    pub fn flood_fill(
        &mut self,
        layer_id: LayerId,
        seed: PixelPoint,
        color: Color,
    ) -> EngineResult<FillResult> {
        self.settle_selection()?;
        self.layers.editable_layer(layer_id)?;
        let canvas = self.canvas();
        {
            let current = self
                .cache
                .get(layer_id)
                .unwrap_or_else(|| Arc::new(RasterBuffer::new(canvas)));
            if current.pixel(seed.x, seed.y).is_none() {
                tracing::debug!(layer_id = %layer_id, x = seed.x, y = seed.y, "fill seed outside canvas");
                return Ok(FillResult::rejected());
            }
            if !self.fill.would_fill(&current, seed.x, seed.y, color) {
                return Ok(FillResult::unchanged());
            }
        }
        self.edit("flood fill", |engine| {
            let layer = engine.cache.get_or_insert_mut(layer_id, canvas);
            let result = engine.fill.flood_fill(layer, seed.x, seed.y, color);
            engine.sync_pixels(layer_id, result.dirty_rect());
            Ok(Edit::Applied(result))
        })
    }

    pub fn set_display_mapping(&mut self, mapping: DisplayMapping) {
        self.selection.set_display_mapping(mapping);
    }

    pub fn start_selection(&mut self, point: Point) -> EngineResult<()> {
        self.settle_selection()?;
        self.selection.start_selection(point)?;
        self.publish();
        Ok(())
    }

    pub fn update_selection(&mut self, point: Point) -> EngineResult<PixelRect> {
        let marquee = self.selection.update_selection(point)?;
        self.publish();
        Ok(marquee)
    }

    /// Cuts the marquee out of the active layer, or drops it when too small.
    pub fn end_selection(&mut self) -> EngineResult<SelectionOutcome> {
        let canvas = self.canvas();
        if self.selection.pending_capture(canvas).is_none() {
            let outcome = self.selection.cancel_selection()?;
            self.publish();
            return Ok(outcome);
        }
        let layer_id = match self.editable_active_layer() {
            Ok(id) => id,
            Err(err) => {
                self.selection.reset();
                return Err(err.into());
            }
        };
        self.edit("capture selection", |engine| {
            let layer = engine.cache.get_or_insert_mut(layer_id, canvas);
            let outcome = engine.selection.end_selection(layer_id, layer)?;
            match outcome {
                SelectionOutcome::Captured(bounds) => {
                    engine.sync_pixels(layer_id, Some(bounds));
                    Ok(Edit::Applied(outcome))
                }
                SelectionOutcome::Discarded => Ok(Edit::Skipped(outcome)),
            }
        })
    }

    fn editable_active_layer(&self) -> Result<LayerId, LayerError> {
        let id = self.active_layer_id().ok_or(LayerError::NoActiveLayer)?;
        self.layers.editable_layer(id).map(|layer| layer.id)
    }

    pub fn hit_test(&self, point: Point) -> HitZone {
        self.selection.hit_test(point)
    }

    pub fn begin_transform(&mut self, point: Point) -> EngineResult<HitZone> {
        let zone = self.selection.begin_transform(point)?;
        self.publish();
        Ok(zone)
    }

    pub fn drag_transform(&mut self, point: Point) -> EngineResult<PixelRect> {
        let bounds = self.selection.drag_transform(point)?;
        self.publish();
        Ok(bounds)
    }

    pub fn end_transform(&mut self) -> EngineResult<()> {
        self.selection.end_transform()?;
        self.publish();
        Ok(())
    }

    pub fn set_selection_rotation(&mut self, degrees: f64) -> EngineResult<PixelRect> {
        let bounds = self.selection.set_rotation(degrees)?;
        self.publish();
        Ok(bounds)
    }

    pub fn set_selection_scale(&mut self, scale: f64) -> EngineResult<PixelRect> {
        let bounds = self.selection.set_scale(scale)?;
        self.publish();
        Ok(bounds)
    }

    pub fn set_selection_offset(&mut self, offset: Vec2) -> EngineResult<PixelRect> {
        let bounds = self.selection.set_offset(offset)?;
        self.publish();
        Ok(bounds)
    }

    /// Composites the floating selection onto its layer. No-op without one.
    pub fn apply_selection(&mut self) -> EngineResult<Option<PixelRect>> {
        let Some(layer_id) = self.selection.state().map(|state| state.layer_id) else {
            return Ok(None);
        };
        if !self.selection.can_apply() {
            return Ok(None);
        }
        let canvas = self.canvas();
        self.edit("apply selection", |engine| {
            let layer = engine.cache.get_or_insert_mut(layer_id, canvas);
            let dirty = engine.selection.apply(layer)?;
            engine.sync_pixels(layer_id, dirty);
            Ok(Edit::Applied(dirty))
        })
    }

    /// Puts the cut pixels back without adding a history entry.
    pub fn discard_selection(&mut self) -> EngineResult<Option<PixelRect>> {
        let restored = self.discard_floating()?;
        self.publish();
        Ok(restored)
    }

    fn discard_floating(&mut self) -> EngineResult<Option<PixelRect>> {
        let Some(layer_id) = self.selection.state().map(|state| state.layer_id) else {
            if self.selection.phase() == SelectionPhase::Selecting {
                self.selection.reset();
            }
            return Ok(None);
        };
        let layer = self.cache.get_or_insert_mut(layer_id, self.layers.canvas());
        let restored = self.selection.discard(layer)?;
        self.sync_pixels(layer_id, restored);
        Ok(restored)
    }

    pub fn undo(&mut self) -> EngineResult<bool> {
        self.step_history(HistoryAction::Undo)
    }

    pub fn redo(&mut self) -> EngineResult<bool> {
        self.step_history(HistoryAction::Redo)
    }

    fn step_history(&mut self, action: HistoryAction) -> EngineResult<bool> {
        let current = self.snapshot();
        let restored = match action {
            HistoryAction::Undo => self.history.undo(current),
            HistoryAction::Redo => self.history.redo(current),
        };
        let Some(snapshot) = restored else {
            tracing::debug!("{}", action.empty_message());
            return Ok(false);
        };

        self.layers.restore(snapshot.drawing);
        self.reserve_cache_for_live_layers();
        self.cache.restore_from_snapshot(&snapshot.bitmaps);
        self.selection.restore(snapshot.selection)?;
        self.resync_compositor();
        if let Some(worker) = &self.persistence {
            worker.submit(PersistTask::SaveProject(Box::new(self.layers.state().clone())));
        }
        tracing::info!(
            undo = self.history.undo_len(),
            redo = self.history.redo_len(),
            "{}",
            action.applied_message()
        );
        self.publish();
        Ok(true)
    }

    /// Queues a manifest write on the persistence worker.
    pub fn save_project(&self) -> EngineResult<()> {
        if let Some(worker) = &self.persistence {
            worker.submit(PersistTask::SaveProject(Box::new(self.layers.state().clone())));
        } else {
            tracing::debug!("no project store attached; save skipped");
        }
        Ok(())
    }

    /// Blocks until every queued persistence task has run.
    pub fn flush_persistence(&self) -> EngineResult<()> {
        if let Some(worker) = &self.persistence {
            worker.flush()?;
        }
        Ok(())
    }

    /// Starts a background composite of stale tiles, `viewport` first.
    pub fn request_render(&mut self, viewport: Option<PixelRect>) -> usize {
        self.compositor
            .render_dirty_tiles(self.layers.layers(), viewport)
    }

    pub fn wait_for_render(&self) -> Option<PassReport> {
        self.compositor.wait_idle()
    }

    pub fn draw_viewport(&self, target: &mut RasterBuffer, viewport: PixelRect) -> usize {
        self.compositor.draw_to_canvas(target, viewport)
    }

    /// Direct full-canvas composite of the current frame, bypassing tiles.
    pub fn combined_bitmap(&self) -> RasterBuffer {
        self.cache
            .get_combined_bitmap(self.layers.layers(), self.canvas())
    }
}
