use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use super::tile::{CompositeTile, TileCoord, TileGrid};
use crate::geometry::{CanvasSize, PixelRect};
use crate::layer::LayerId;
use crate::raster::{BlendMode, RasterBuffer};

/// Cooperative cancellation flag checked between tile batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Tiles rendered and committed.
    pub rendered: usize,
    /// Tiles rendered but dropped because they were re-dirtied mid-pass.
    pub stale: usize,
    /// Dirty tiles left for a later pass by the background cap.
    pub deferred: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct TileSource {
    pub(crate) layer_id: LayerId,
    pub(crate) version: u64,
    pub(crate) opacity: f32,
    pub(crate) buffer: Option<Arc<RasterBuffer>>,
}

/// Read-only inputs for rebuilding one composite tile.
#[derive(Debug, Clone)]
pub(crate) struct TileJob {
    pub(crate) coord: TileCoord,
    pub(crate) bounds: PixelRect,
    pub(crate) generation: u64,
    pub(crate) sources: Vec<TileSource>,
}

impl TileJob {
    fn layer_versions(&self) -> HashMap<LayerId, u64> {
        self.sources
            .iter()
            .map(|source| (source.layer_id, source.version))
            .collect()
    }
}

#[derive(Debug)]
pub(crate) struct CompositeStore {
    pub(crate) grid: TileGrid,
    pub(crate) tiles: Vec<CompositeTile>,
}

impl CompositeStore {
    pub(crate) fn new(grid: TileGrid) -> Self {
        let tiles = grid
            .coords()
            .map(|coord| CompositeTile::new(coord, grid.tile_bounds(coord)))
            .collect();
        Self { grid, tiles }
    }

    pub(crate) fn tile(&self, coord: TileCoord) -> &CompositeTile {
        &self.tiles[self.grid.index(coord)]
    }

    pub(crate) fn tile_mut(&mut self, coord: TileCoord) -> &mut CompositeTile {
        let index = self.grid.index(coord);
        &mut self.tiles[index]
    }
}

/// Composites a job's sources bottom-to-top onto a cleared tile.
///
/// Returns `None` when nothing visible landed in the tile.
pub(crate) fn render_tile(job: &TileJob) -> Option<RasterBuffer> {
    let mut tile = RasterBuffer::new(CanvasSize::new(job.bounds.width, job.bounds.height));
    let mut painted = false;
    for source in &job.sources {
        if let Some(buffer) = &source.buffer {
            painted |= tile
                .draw_image(buffer, 0, 0, source.opacity, BlendMode::Normal)
                .is_some();
        }
    }
    painted.then_some(tile)
}

pub(crate) fn run_pass(
    jobs: Vec<TileJob>,
    batch_size: usize,
    deferred: usize,
    store: &Mutex<CompositeStore>,
    token: &CancellationToken,
) -> PassReport {
    let mut report = PassReport {
        deferred,
        ..PassReport::default()
    };
    for batch in jobs.chunks(batch_size.max(1)) {
        if token.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let rendered: Vec<Option<RasterBuffer>> = batch.par_iter().map(render_tile).collect();
        if token.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let mut store = store.lock();
        for (job, buffer) in batch.iter().zip(rendered) {
            let committed = store.tile_mut(job.coord).commit(
                job.generation,
                buffer.map(Arc::new),
                job.layer_versions(),
            );
            if committed {
                report.rendered += 1;
            } else {
                report.stale += 1;
            }
        }
    }
    tracing::debug!(
        rendered = report.rendered,
        stale = report.stale,
        deferred = report.deferred,
        cancelled = report.cancelled,
        "render pass finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Color;

    fn job(sources: Vec<TileSource>) -> TileJob {
        TileJob {
            coord: TileCoord::new(0, 0),
            bounds: PixelRect::new(0, 0, 2, 2),
            generation: 0,
            sources,
        }
    }

    fn source(id: u64, color: Color, opacity: f32) -> TileSource {
        TileSource {
            layer_id: LayerId(id),
            version: id,
            opacity,
            buffer: Some(Arc::new(RasterBuffer::filled(CanvasSize::new(2, 2), color))),
        }
    }

    #[test]
    fn render_tile_blends_sources_in_order() {
        let rendered = render_tile(&job(vec![
            source(1, Color::WHITE, 1.0),
            source(2, Color::rgb(255, 0, 0), 1.0),
        ]))
        .expect("tile has content");
        assert_eq!(rendered.pixel(1, 1), Some(Color::rgb(255, 0, 0)));
    }

    #[test]
    fn render_tile_without_content_is_empty() {
        assert!(render_tile(&job(Vec::new())).is_none());
        assert!(render_tile(&job(vec![source(1, Color::WHITE, 0.0)])).is_none());
    }

    #[test]
    fn cancelled_pass_commits_nothing() {
        let grid = TileGrid::new(CanvasSize::new(2, 2), 2);
        let store = Mutex::new(CompositeStore::new(grid));
        let token = CancellationToken::new();
        token.cancel();

        let report = run_pass(
            vec![job(vec![source(1, Color::WHITE, 1.0)])],
            4,
            0,
            &store,
            &token,
        );
        assert!(report.cancelled);
        assert_eq!(report.rendered, 0);
        let tile = store.lock().tile(TileCoord::new(0, 0)).clone();
        assert!(tile.dirty);
        assert!(tile.buffer.is_none());
    }

    #[test]
    fn pass_records_merged_versions() {
        let grid = TileGrid::new(CanvasSize::new(2, 2), 2);
        let store = Mutex::new(CompositeStore::new(grid));
        let report = run_pass(
            vec![job(vec![source(3, Color::WHITE, 1.0)])],
            4,
            0,
            &store,
            &CancellationToken::new(),
        );
        assert_eq!(report.rendered, 1);
        let store = store.lock();
        let tile = store.tile(TileCoord::new(0, 0));
        assert!(!tile.dirty);
        assert_eq!(tile.layer_versions.get(&LayerId(3)), Some(&3));
    }
}
