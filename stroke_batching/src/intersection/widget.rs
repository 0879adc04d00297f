/// Widgets: non-stroke scene objects that take part in intersection
///
/// Widgets share the 16-bit container id space with batches. During decode a
/// container id is looked up among batches first and only then among widgets.

use rustc_hash::FxHashMap;

use crate::batch::LayerMask;
use crate::error::Result;
use crate::graphics_device::IdDraw;

/// Host-defined identity of a widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WidgetHandle(pub u64);

/// Resolves container ids to widgets and supplies their identifier draws
pub trait WidgetRegistry {
    /// Widget rendered with `container_id`, if it still exists
    fn widget(&self, container_id: u16) -> Option<WidgetHandle>;

    /// Append identifier-pass draws of widgets on a layer in `cull_mask`
    fn intersection_draws(&self, _cull_mask: LayerMask, _out: &mut Vec<IdDraw>) -> Result<()> {
        Ok(())
    }
}

struct WidgetEntry {
    handle: WidgetHandle,
    layer: LayerMask,
    draw: Option<IdDraw>,
}

/// In-memory registry
#[derive(Default)]
pub struct SimpleWidgetRegistry {
    widgets: FxHashMap<u16, WidgetEntry>,
}

impl SimpleWidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a widget under `container_id`
    ///
    /// The draw's own container id is overwritten with `container_id`.
    pub fn register(&mut self, container_id: u16, handle: WidgetHandle, layer: LayerMask, draw: Option<IdDraw>) {
        let draw = draw.map(|d| IdDraw { container_id, ..d });
        self.widgets.insert(container_id, WidgetEntry { handle, layer, draw });
    }

    pub fn unregister(&mut self, container_id: u16) -> Option<WidgetHandle> {
        self.widgets.remove(&container_id).map(|e| e.handle)
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}

impl WidgetRegistry for SimpleWidgetRegistry {
    fn widget(&self, container_id: u16) -> Option<WidgetHandle> {
        self.widgets.get(&container_id).map(|e| e.handle)
    }

    fn intersection_draws(&self, cull_mask: LayerMask, out: &mut Vec<IdDraw>) -> Result<()> {
        out.extend(
            self.widgets
                .values()
                .filter(|e| e.layer.intersects(cull_mask))
                .filter_map(|e| e.draw.clone()),
        );
        Ok(())
    }
}
