use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::config::{app_data_path, config_env_dirs, ConfigPathError};
use crate::layer::{DrawingState, Layer, LayerId};
use crate::raster::RasterBuffer;

const APP_DIR: &str = "tilepaint";
const LAYER_SUBDIR: &str = "layers";
const LAYER_FILE_PREFIX: &str = "layer-";
const PROJECT_MANIFEST_FILE: &str = "project.json";
const WORKER_THREAD_NAME: &str = "tilepaint-persist";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("missing HOME environment variable")]
    MissingHomeDirectory,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode layer {layer_id}: {source}")]
    EncodeLayer {
        layer_id: LayerId,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write project manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("persistence worker is not running")]
    WorkerStopped,
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl From<ConfigPathError> for StorageError {
    fn from(err: ConfigPathError) -> Self {
        match err {
            ConfigPathError::MissingHomeDirectory => Self::MissingHomeDirectory,
        }
    }
}

/// Side-effecting collaborator that owns the on-disk representation of a project.
///
/// Calls arrive on the persistence worker thread, never on the edit path.
pub trait ProjectStore: Send + Sync + 'static {
    fn add_layer(&self, layer: &Layer) -> StorageResult<LayerId>;
    fn delete_layer(&self, layer: &Layer) -> StorageResult<()>;
    fn update_layer(&self, layer: &Layer, buffer: Option<&RasterBuffer>) -> StorageResult<()>;
    fn save_project(&self, state: &DrawingState) -> StorageResult<()>;
}

#[derive(Debug, Clone)]
pub enum PersistTask {
    AddLayer(Layer),
    DeleteLayer(Layer),
    UpdateLayer {
        layer: Layer,
        buffer: Option<Arc<RasterBuffer>>,
    },
    SaveProject(Box<DrawingState>),
}

impl PersistTask {
    const fn label(&self) -> &'static str {
        match self {
            Self::AddLayer(_) => "add layer",
            Self::DeleteLayer(_) => "delete layer",
            Self::UpdateLayer { .. } => "update layer",
            Self::SaveProject(_) => "save project",
        }
    }
}

enum WorkerMessage {
    Task(PersistTask),
    Flush(mpsc::Sender<()>),
    Shutdown,
}

/// Cloneable fire-and-forget submitter for [`PersistTask`]s.
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<WorkerMessage>,
}

impl std::fmt::Debug for PersistenceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PersistenceHandle")
    }
}

impl PersistenceHandle {
    pub fn submit(&self, task: PersistTask) {
        let label = task.label();
        if self.tx.send(WorkerMessage::Task(task)).is_err() {
            tracing::warn!(task = label, "persistence worker stopped; dropping task");
        }
    }
}

/// Single background thread that runs store calls in submission order.
pub struct PersistenceWorker {
    handle: PersistenceHandle,
    thread: Option<JoinHandle<()>>,
}

impl PersistenceWorker {
    pub fn spawn(store: Arc<dyn ProjectStore>) -> StorageResult<Self> {
        let (tx, rx) = mpsc::channel::<WorkerMessage>();
        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(store.as_ref(), rx))?;
        tracing::debug!("persistence worker started");
        Ok(Self {
            handle: PersistenceHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> PersistenceHandle {
        self.handle.clone()
    }

    pub fn submit(&self, task: PersistTask) {
        self.handle.submit(task);
    }

    /// Blocks until every task submitted before this call has run.
    pub fn flush(&self) -> StorageResult<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.handle
            .tx
            .send(WorkerMessage::Flush(reply_tx))
            .map_err(|_| StorageError::WorkerStopped)?;
        reply_rx.recv().map_err(|_| StorageError::WorkerStopped)
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        let _ = self.handle.tx.send(WorkerMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("persistence worker panicked");
            }
        }
    }
}

fn run_worker(store: &dyn ProjectStore, rx: mpsc::Receiver<WorkerMessage>) {
    for message in rx {
        match message {
            WorkerMessage::Task(task) => {
                let label = task.label();
                if let Err(err) = run_task(store, task) {
                    tracing::warn!(task = label, %err, "background persistence failed");
                }
            }
            WorkerMessage::Flush(reply) => {
                let _ = reply.send(());
            }
            WorkerMessage::Shutdown => break,
        }
    }
    tracing::debug!("persistence worker stopped");
}

fn run_task(store: &dyn ProjectStore, task: PersistTask) -> StorageResult<()> {
    match task {
        PersistTask::AddLayer(layer) => {
            let stored_id = store.add_layer(&layer)?;
            tracing::debug!(layer_id = %layer.id, %stored_id, "layer persisted");
            Ok(())
        }
        PersistTask::DeleteLayer(layer) => store.delete_layer(&layer),
        PersistTask::UpdateLayer { layer, buffer } => store.update_layer(&layer, buffer.as_deref()),
        PersistTask::SaveProject(state) => store.save_project(&state),
    }
}

/// Store that writes each layer as a PNG next to a JSON project manifest.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn with_default_paths() -> StorageResult<Self> {
        let (xdg_data_home, home) = data_env_dirs();
        let root = app_data_path(APP_DIR, xdg_data_home.as_deref(), home.as_deref())?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layer_path(&self, layer_id: LayerId) -> PathBuf {
        let mut path = self.root.join(LAYER_SUBDIR);
        path.push(format!("{LAYER_FILE_PREFIX}{}.png", layer_id.0));
        path
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(PROJECT_MANIFEST_FILE)
    }

    fn ensure_layer_dir(&self) -> StorageResult<()> {
        fs::create_dir_all(self.root.join(LAYER_SUBDIR))?;
        Ok(())
    }
}

impl ProjectStore for DirectoryStore {
    fn add_layer(&self, layer: &Layer) -> StorageResult<LayerId> {
        self.ensure_layer_dir()?;
        Ok(layer.id)
    }

    fn delete_layer(&self, layer: &Layer) -> StorageResult<()> {
        match fs::remove_file(self.layer_path(layer.id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    fn update_layer(&self, layer: &Layer, buffer: Option<&RasterBuffer>) -> StorageResult<()> {
        let Some(buffer) = buffer else {
            return Ok(());
        };
        self.ensure_layer_dir()?;
        buffer
            .as_image()
            .save_with_format(self.layer_path(layer.id), image::ImageFormat::Png)
            .map_err(|source| StorageError::EncodeLayer {
                layer_id: layer.id,
                source,
            })
    }

    fn save_project(&self, state: &DrawingState) -> StorageResult<()> {
        fs::create_dir_all(&self.root)?;
        let manifest = serde_json::to_string_pretty(state)?;
        fs::write(self.manifest_path(), manifest)?;
        Ok(())
    }
}

fn data_env_dirs() -> (Option<PathBuf>, Option<PathBuf>) {
    let (_, home) = config_env_dirs();
    (std::env::var_os("XDG_DATA_HOME").map(PathBuf::from), home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{CanvasSize, Color};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<String>>,
    }

    impl ProjectStore for RecordingStore {
        fn add_layer(&self, layer: &Layer) -> StorageResult<LayerId> {
            self.calls.lock().push(format!("add {}", layer.id));
            Ok(layer.id)
        }

        fn delete_layer(&self, layer: &Layer) -> StorageResult<()> {
            self.calls.lock().push(format!("delete {}", layer.id));
            Ok(())
        }

        fn update_layer(&self, layer: &Layer, buffer: Option<&RasterBuffer>) -> StorageResult<()> {
            self.calls
                .lock()
                .push(format!("update {} pixels={}", layer.id, buffer.is_some()));
            Ok(())
        }

        fn save_project(&self, _state: &DrawingState) -> StorageResult<()> {
            Err(StorageError::WorkerStopped)
        }
    }

    fn temp_root(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("tilepaint-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&path);
        path
    }

    #[test]
    fn worker_runs_tasks_in_submission_order() {
        let store = Arc::new(RecordingStore::default());
        let worker = PersistenceWorker::spawn(store.clone()).expect("worker should start");
        let layer = Layer::new(LayerId(3), "Ink");

        let handle = worker.handle();
        handle.submit(PersistTask::AddLayer(layer.clone()));
        handle.submit(PersistTask::UpdateLayer {
            layer: layer.clone(),
            buffer: Some(Arc::new(RasterBuffer::new(CanvasSize::new(2, 2)))),
        });
        handle.submit(PersistTask::DeleteLayer(layer));
        worker.flush().expect("flush should complete");

        assert_eq!(
            *store.calls.lock(),
            vec![
                "add 3".to_string(),
                "update 3 pixels=true".to_string(),
                "delete 3".to_string(),
            ]
        );
    }

    #[test]
    fn worker_survives_failing_store_calls() {
        let store = Arc::new(RecordingStore::default());
        let worker = PersistenceWorker::spawn(store.clone()).expect("worker should start");
        let state = DrawingState::new(CanvasSize::new(4, 4), Layer::new(LayerId(1), "Layer 1"));

        worker.submit(PersistTask::SaveProject(Box::new(state)));
        worker.submit(PersistTask::AddLayer(Layer::new(LayerId(9), "after failure")));
        worker.flush().expect("flush should complete");

        assert_eq!(*store.calls.lock(), vec!["add 9".to_string()]);
    }

    #[test]
    fn directory_store_writes_layer_png_and_manifest() {
        let root = temp_root("directory-store");
        let store = DirectoryStore::new(&root);
        let layer = Layer::new(LayerId(5), "Paint");
        let buffer = RasterBuffer::filled(CanvasSize::new(3, 2), Color::rgb(10, 20, 30));

        store.add_layer(&layer).expect("add should succeed");
        store
            .update_layer(&layer, Some(&buffer))
            .expect("png should encode");
        let decoded = image::open(store.layer_path(layer.id))
            .expect("png should decode")
            .to_rgba8();
        assert_eq!(decoded, *buffer.as_image());

        let state = DrawingState::new(CanvasSize::new(3, 2), layer.clone());
        store.save_project(&state).expect("manifest should write");
        let manifest = fs::read_to_string(store.manifest_path()).expect("manifest readable");
        let parsed: DrawingState = serde_json::from_str(&manifest).expect("manifest parses");
        assert_eq!(parsed, state);

        store.delete_layer(&layer).expect("delete should succeed");
        assert!(!store.layer_path(layer.id).exists());
        store
            .delete_layer(&layer)
            .expect("deleting a missing file is not an error");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn layer_path_uses_layer_id_filename() {
        let store = DirectoryStore::new("/tmp/project");
        assert_eq!(
            store.layer_path(LayerId(42)),
            PathBuf::from("/tmp/project/layers/layer-42.png")
        );
    }
}
