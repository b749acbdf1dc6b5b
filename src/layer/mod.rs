use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::CanvasSize;
use crate::storage::{PersistTask, PersistenceHandle};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayerLocks {
    /// Pixel edits (strokes, fills, selections) are rejected.
    pub pixels: bool,
    /// Reordering is rejected.
    pub position: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub locks: LayerLocks,
    /// Index in the owning frame, 0 being the bottom layer.
    pub order: usize,
}

impl Layer {
    pub fn new(id: LayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            visible: true,
            opacity: 1.0,
            locks: LayerLocks::default(),
            order: 0,
        }
    }

    /// Whether the layer contributes to the composite at all.
    pub fn is_rendered(&self) -> bool {
        self.visible && self.opacity > 0.0
    }
}

/// Ordered layer stack, bottom to top.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: FrameId,
    pub layers: Vec<Layer>,
}

impl Frame {
    pub fn new(id: FrameId, layers: Vec<Layer>) -> Self {
        let mut frame = Self { id, layers };
        frame.reindex();
        frame
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id == id)
    }

    pub fn layer_index(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|layer| layer.id == id)
    }

    pub fn rendered_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|layer| layer.is_rendered())
    }

    fn reindex(&mut self) {
        for (order, layer) in self.layers.iter_mut().enumerate() {
            layer.order = order;
        }
    }
}

/// Metadata half of a history snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawingState {
    pub canvas: CanvasSize,
    pub frames: Vec<Frame>,
    pub current_frame: usize,
    pub active_layer: Option<LayerId>,
}

impl DrawingState {
    pub fn new(canvas: CanvasSize, first_layer: Layer) -> Self {
        let active = first_layer.id;
        Self {
            canvas,
            frames: vec![Frame::new(FrameId(1), vec![first_layer])],
            current_frame: 0,
            active_layer: Some(active),
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frames[self.current_frame]
    }

    pub fn layers(&self) -> &[Layer] {
        &self.frame().layers
    }

    /// Every layer id across all frames.
    pub fn all_layer_ids(&self) -> impl Iterator<Item = LayerId> + '_ {
        self.frames
            .iter()
            .flat_map(|frame| frame.layers.iter().map(|layer| layer.id))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayerError {
    #[error("layer {0} not found in the current frame")]
    NotFound(LayerId),
    #[error("layer {0} is locked")]
    Locked(LayerId),
    #[error("no active layer")]
    NoActiveLayer,
    #[error("a frame must keep at least one layer")]
    LastLayer,
    #[error("a drawing must keep at least one frame")]
    LastFrame,
    #[error("index {index} is out of range for {len} entries")]
    InvalidIndex { index: usize, len: usize },
}

pub type LayerResult<T> = std::result::Result<T, LayerError>;

/// Owns the [`DrawingState`] and applies metadata edits to its current frame.
///
/// Every structural change is forwarded to the persistence worker when one is attached.
#[derive(Debug)]
pub struct LayerManager {
    state: DrawingState,
    next_layer_id: u64,
    next_frame_id: u64,
    persistence: Option<PersistenceHandle>,
}

impl LayerManager {
    pub fn new(canvas: CanvasSize) -> Self {
        let first = Layer::new(LayerId(1), default_layer_name(1));
        Self {
            state: DrawingState::new(canvas, first),
            next_layer_id: 2,
            next_frame_id: 2,
            persistence: None,
        }
    }

    pub fn attach_persistence(&mut self, handle: PersistenceHandle) {
        for layer in self.state.frames.iter().flat_map(|frame| frame.layers.iter()) {
            handle.submit(PersistTask::AddLayer(layer.clone()));
        }
        self.persistence = Some(handle);
    }

    pub fn state(&self) -> &DrawingState {
        &self.state
    }

    pub fn canvas(&self) -> CanvasSize {
        self.state.canvas
    }

    pub fn frame(&self) -> &Frame {
        self.state.frame()
    }

    pub fn layers(&self) -> &[Layer] {
        self.state.layers()
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.frame().layer(id)
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.state.active_layer.and_then(|id| self.layer(id))
    }

    /// Looks up a layer whose pixels may be edited.
    pub fn editable_layer(&self, id: LayerId) -> LayerResult<&Layer> {
        let layer = self.layer(id).ok_or(LayerError::NotFound(id))?;
        if layer.locks.pixels {
            return Err(LayerError::Locked(id));
        }
        Ok(layer)
    }

    /// Inserts a new layer directly above the active one and makes it active.
    pub fn add_layer(&mut self, name: Option<&str>) -> LayerId {
        let id = self.allocate_layer_id();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| default_layer_name(id.0));
        let insert_at = self
            .state
            .active_layer
            .and_then(|active| self.frame().layer_index(active))
            .map(|index| index + 1)
            .unwrap_or(self.layers().len());

        let frame = self.frame_mut();
        frame.layers.insert(insert_at, Layer::new(id, name));
        frame.reindex();
        self.state.active_layer = Some(id);

        tracing::debug!(layer_id = %id, index = insert_at, "layer added");
        if let Some(layer) = self.layer(id).cloned() {
            self.persist(PersistTask::AddLayer(layer));
        }
        id
    }

    pub fn delete_layer(&mut self, id: LayerId) -> LayerResult<Layer> {
        let index = self.frame().layer_index(id).ok_or(LayerError::NotFound(id))?;
        if self.layers().len() <= 1 {
            return Err(LayerError::LastLayer);
        }

        let frame = self.frame_mut();
        let removed = frame.layers.remove(index);
        frame.reindex();
        let fallback = frame
            .layers
            .get(index.saturating_sub(1))
            .map(|layer| layer.id);
        if self.state.active_layer == Some(id) {
            self.state.active_layer = fallback;
        }

        tracing::debug!(layer_id = %id, "layer deleted");
        self.persist(PersistTask::DeleteLayer(removed.clone()));
        Ok(removed)
    }

    pub fn move_layer(&mut self, id: LayerId, to_index: usize) -> LayerResult<()> {
        let from = self.frame().layer_index(id).ok_or(LayerError::NotFound(id))?;
        let len = self.layers().len();
        if to_index >= len {
            return Err(LayerError::InvalidIndex {
                index: to_index,
                len,
            });
        }
        if self.layers()[from].locks.position {
            return Err(LayerError::Locked(id));
        }
        if from == to_index {
            return Ok(());
        }

        let frame = self.frame_mut();
        let layer = frame.layers.remove(from);
        frame.layers.insert(to_index, layer);
        frame.reindex();
        tracing::debug!(layer_id = %id, from, to = to_index, "layer moved");
        self.persist_metadata(id);
        Ok(())
    }

    pub fn set_visibility(&mut self, id: LayerId, visible: bool) -> LayerResult<()> {
        self.update_layer(id, |layer| layer.visible = visible)
    }

    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> LayerResult<()> {
        let opacity = if opacity.is_finite() {
            opacity.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.update_layer(id, |layer| layer.opacity = opacity)
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> LayerResult<()> {
        let name = name.to_string();
        self.update_layer(id, move |layer| layer.name = name)
    }

    pub fn set_locks(&mut self, id: LayerId, locks: LayerLocks) -> LayerResult<()> {
        self.update_layer(id, |layer| layer.locks = locks)
    }

    pub fn set_active_layer(&mut self, id: LayerId) -> LayerResult<()> {
        if self.layer(id).is_none() {
            return Err(LayerError::NotFound(id));
        }
        self.state.active_layer = Some(id);
        Ok(())
    }

    /// Appends a frame holding one empty layer and switches to it.
    pub fn add_frame(&mut self) -> (FrameId, LayerId) {
        let frame_id = FrameId(self.next_frame_id);
        self.next_frame_id = self.next_frame_id.saturating_add(1);
        let layer_id = self.allocate_layer_id();
        let layer = Layer::new(layer_id, default_layer_name(layer_id.0));

        self.state
            .frames
            .push(Frame::new(frame_id, vec![layer.clone()]));
        self.state.current_frame = self.state.frames.len() - 1;
        self.state.active_layer = Some(layer_id);
        tracing::debug!(frame_id = %frame_id, layer_id = %layer_id, "frame added");
        self.persist(PersistTask::AddLayer(layer));
        (frame_id, layer_id)
    }

    pub fn select_frame(&mut self, index: usize) -> LayerResult<()> {
        let len = self.state.frames.len();
        if index >= len {
            return Err(LayerError::InvalidIndex { index, len });
        }
        self.state.current_frame = index;
        self.state.active_layer = self.frame().layers.last().map(|layer| layer.id);
        Ok(())
    }

    /// Removes a frame and returns it so the caller can release its layers' pixels.
    pub fn delete_frame(&mut self, index: usize) -> LayerResult<Frame> {
        let len = self.state.frames.len();
        if index >= len {
            return Err(LayerError::InvalidIndex { index, len });
        }
        if len <= 1 {
            return Err(LayerError::LastFrame);
        }
        let removed = self.state.frames.remove(index);
        if self.state.current_frame >= self.state.frames.len() || self.state.current_frame > index
        {
            self.state.current_frame = self.state.current_frame.saturating_sub(1);
        }
        self.state.active_layer = self.frame().layers.last().map(|layer| layer.id);
        for layer in &removed.layers {
            self.persist(PersistTask::DeleteLayer(layer.clone()));
        }
        Ok(removed)
    }

    /// Swaps in a previously captured state; id counters keep moving forward.
    pub fn restore(&mut self, state: DrawingState) {
        self.state = state;
        if self.state.current_frame >= self.state.frames.len() {
            self.state.current_frame = self.state.frames.len().saturating_sub(1);
        }
    }

    fn update_layer<F>(&mut self, id: LayerId, apply: F) -> LayerResult<()>
    where
        F: FnOnce(&mut Layer),
    {
        let index = self.frame().layer_index(id).ok_or(LayerError::NotFound(id))?;
        apply(&mut self.frame_mut().layers[index]);
        self.persist_metadata(id);
        Ok(())
    }

    fn persist_metadata(&self, id: LayerId) {
        if let Some(layer) = self.layer(id) {
            self.persist(PersistTask::UpdateLayer {
                layer: layer.clone(),
                buffer: None,
            });
        }
    }

    fn persist(&self, task: PersistTask) {
        if let Some(handle) = &self.persistence {
            handle.submit(task);
        }
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let index = self.state.current_frame;
        &mut self.state.frames[index]
    }

    fn allocate_layer_id(&mut self) -> LayerId {
        let id = LayerId(self.next_layer_id);
        self.next_layer_id = self.next_layer_id.saturating_add(1);
        id
    }
}

fn default_layer_name(number: u64) -> String {
    format!("Layer {number}")
}
