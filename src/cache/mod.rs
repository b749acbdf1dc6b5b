//! Per-layer pixel storage.
//!
//! The cache is the only owner of layer pixels. Buffers are held behind `Arc` and
//! mutated through [`Arc::make_mut`], so a handed-out buffer or a history snapshot
//! never observes a later edit: the first write after sharing copies the buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::geometry::CanvasSize;
use crate::layer::{Layer, LayerId};
use crate::raster::{BlendMode, RasterBuffer};

pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Pixel half of a history snapshot: every cached buffer plus insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitmapCacheSnapshot {
    entries: HashMap<LayerId, Arc<RasterBuffer>>,
    order: Vec<LayerId>,
}

impl BitmapCacheSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: LayerId) -> Option<&RasterBuffer> {
        self.entries.get(&id).map(Arc::as_ref)
    }

    pub fn layer_ids(&self) -> &[LayerId] {
        &self.order
    }
}

#[derive(Debug, Clone)]
pub struct LayerBitmapCache {
    entries: HashMap<LayerId, Arc<RasterBuffer>>,
    insertion_order: VecDeque<LayerId>,
    max_entries: usize,
}

impl Default for LayerBitmapCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl LayerBitmapCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Read-only handle to a layer's pixels; `None` means the layer has no content yet.
    pub fn get(&self, id: LayerId) -> Option<Arc<RasterBuffer>> {
        self.entries.get(&id).cloned()
    }

    /// Stores `buffer` for `id`, evicting the oldest insertions first when full.
    pub fn put(&mut self, id: LayerId, buffer: RasterBuffer) {
        self.put_shared(id, Arc::new(buffer));
    }

    pub(crate) fn put_shared(&mut self, id: LayerId, buffer: Arc<RasterBuffer>) {
        self.admit(id);
        self.entries.insert(id, buffer);
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Raises the entry limit to at least `min_entries`. Never lowers it.
    pub fn reserve_entries(&mut self, min_entries: usize) {
        if min_entries > self.max_entries {
            tracing::debug!(
                from = self.max_entries,
                to = min_entries,
                "bitmap cache limit raised"
            );
            self.max_entries = min_entries;
        }
    }

    /// Moves `id` to the newest position, evicting the oldest entries when a new id needs room.
    fn admit(&mut self, id: LayerId) {
        if self.entries.contains_key(&id) {
            self.insertion_order.retain(|existing| *existing != id);
        } else {
            while self.entries.len() >= self.max_entries {
                let Some(oldest) = self.insertion_order.pop_front() else {
                    break;
                };
                self.entries.remove(&oldest);
                tracing::warn!(layer_id = %oldest, "layer bitmap evicted from cache");
            }
        }
        self.insertion_order.push_back(id);
    }

    /// Mutable access to a layer's pixels, copying first if the buffer is shared.
    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut RasterBuffer> {
        self.entries.get_mut(&id).map(Arc::make_mut)
    }

    /// Like [`get_mut`](Self::get_mut) but allocates a transparent buffer for a missing layer.
    pub fn get_or_insert_mut(&mut self, id: LayerId, size: CanvasSize) -> &mut RasterBuffer {
        if !self.entries.contains_key(&id) {
            self.admit(id);
        }
        let entry = self
            .entries
            .entry(id)
            .or_insert_with(|| Arc::new(RasterBuffer::new(size)));
        Arc::make_mut(entry)
    }

    pub fn remove(&mut self, id: LayerId) -> Option<Arc<RasterBuffer>> {
        self.insertion_order.retain(|existing| *existing != id);
        self.entries.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }

    pub fn get_all_bitmaps(&self) -> BitmapCacheSnapshot {
        BitmapCacheSnapshot {
            entries: self.entries.clone(),
            order: self.insertion_order.iter().copied().collect(),
        }
    }

    pub fn restore_from_snapshot(&mut self, snapshot: &BitmapCacheSnapshot) {
        self.clear();
        for id in &snapshot.order {
            if let Some(buffer) = snapshot.entries.get(id) {
                self.put_shared(*id, Arc::clone(buffer));
            }
        }
    }

    /// Paints every rendered layer bottom-to-top onto a fresh canvas-sized buffer.
    pub fn get_combined_bitmap<'a, I>(&self, layers: I, size: CanvasSize) -> RasterBuffer
    where
        I: IntoIterator<Item = &'a Layer>,
    {
        let mut combined = RasterBuffer::new(size);
        for layer in layers.into_iter().filter(|layer| layer.is_rendered()) {
            let Some(buffer) = self.entries.get(&layer.id) else {
                continue;
            };
            combined.draw_image(buffer, 0, 0, layer.opacity, BlendMode::Normal);
        }
        combined
    }
}
