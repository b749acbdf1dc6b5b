pub mod cache;
pub mod compositor;
pub mod config;
pub mod engine;
pub mod error;
pub mod fill;
pub mod geometry;
pub mod history;
pub mod layer;
pub mod logging;
pub mod raster;
pub mod selection;
pub mod storage;

use std::sync::Arc;

pub use engine::{DrawEngine, HistorySnapshot, ObserverId, PublishedState};
pub use error::{EngineError, EngineResult};

/// Entrypoint used by host applications: installs logging, reads the user
/// config and persists into the default data directory.
pub fn start() -> EngineResult<DrawEngine> {
    logging::init();
    tracing::info!("starting tilepaint");

    let config = config::load_engine_config();
    let store = storage::DirectoryStore::with_default_paths()?;
    tracing::debug!(root = %store.root().display(), "project store resolved");
    let engine = DrawEngine::with_store(config, Arc::new(store))?;

    tracing::info!(canvas = ?engine.canvas(), "startup complete");
    Ok(engine)
}
