/// Batch - one GPU-uploadable geometry buffer shared by many subsets
///
/// A batch owns a `GeometryStore` (CPU arrays), a `GpuMesh` (device copy) and
/// an ordered list of subsets, each a contiguous vertex/index range of the
/// store. All subsets share the batch's material.
///
/// Edits only touch CPU arrays and raise dirty flags; the GPU copy is synced
/// at most once per frame from `flush()` or `on_will_render()`. A batch whose
/// scene node is inactive receives neither hook, so edits to it sync
/// immediately.
///
/// Subsets are appended at the tail. Removing the tail subset shrinks the
/// store back to the end of the previous subset; removing any other subset only
/// zeroes its triangles, and the space is reclaimed once every subset after it
/// has gone.

use std::ops::Range;
use glam::Mat4;
use slotmap::SlotMap;

use crate::batch::{BatchId, FrameClock, HighlightSink, MaterialId, MaterialInfo, SceneParent, Subset, SubsetKey};
use crate::config::BatchConfig;
use crate::error::Result;
use crate::geometry::{AABB, GeometryStore, GpuMesh};
use crate::graphics_device::{IdDraw, SharedDevice};

pub struct Batch {
    id: BatchId,
    material: MaterialId,
    bounds_padding: f32,
    device: SharedDevice,
    clock: FrameClock,
    soft_vertex_limit: u32,
    hard_vertex_limit: u32,

    store: GeometryStore,
    mesh: GpuMesh,

    subsets: SlotMap<SubsetKey, Subset>,
    /// Subset keys in ascending `start_vertex` order
    order: Vec<SubsetKey>,

    vertex_dirty: bool,
    topology_dirty: bool,
    last_mesh_update: i64,

    parent: SceneParent,
    node_active: bool,
    visible: bool,
}

impl Batch {
    /// Create an empty batch
    ///
    /// The GPU mesh starts with a single placeholder vertex and bounds of
    /// `config.initial_bounds_extent` around the origin.
    pub fn new(
        id: BatchId,
        material: &MaterialInfo,
        device: SharedDevice,
        clock: FrameClock,
        config: &BatchConfig,
        parent: SceneParent,
    ) -> Result<Self> {
        let initial_bounds = AABB::from_center_extents(
            glam::Vec3::ZERO,
            glam::Vec3::splat(config.initial_bounds_extent),
        );
        let mesh = GpuMesh::new(device.clone(), material.vertex_layout, initial_bounds)?;
        let last_mesh_update = clock.now();

        crate::engine_debug!(
            "batching::Batch",
            "created batch {} for '{}'",
            id, material.name
        );

        Ok(Self {
            id,
            material: material.id,
            bounds_padding: material.bounds_padding,
            device,
            clock,
            soft_vertex_limit: config.soft_vertex_limit,
            hard_vertex_limit: config.hard_vertex_limit,
            store: GeometryStore::new(),
            mesh,
            subsets: SlotMap::with_key(),
            order: Vec::new(),
            vertex_dirty: false,
            topology_dirty: false,
            last_mesh_update,
            parent,
            node_active: true,
            visible: true,
        })
    }

    // ===== ACCESSORS =====

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn material(&self) -> MaterialId {
        self.material
    }

    pub fn vertex_count(&self) -> u32 {
        self.store.vertex_count()
    }

    pub fn index_count(&self) -> u32 {
        self.store.index_count()
    }

    pub fn subset_count(&self) -> usize {
        self.order.len()
    }

    pub fn subset(&self, key: SubsetKey) -> Option<&Subset> {
        self.subsets.get(key)
    }

    /// Subsets in storage order
    pub fn subsets(&self) -> impl Iterator<Item = (SubsetKey, &Subset)> + '_ {
        self.order.iter().map(move |&k| (k, &self.subsets[k]))
    }

    pub fn mesh(&self) -> &GpuMesh {
        &self.mesh
    }

    /// CPU geometry; fails instead of reloading when it has been released
    pub fn geometry(&self) -> Result<&GeometryStore> {
        if !self.store.is_resident() {
            crate::engine_bail!(
                "batching::Batch",
                NotResident,
                "batch {} has released its CPU geometry",
                self.id
            );
        }
        Ok(&self.store)
    }

    pub fn is_resident(&self) -> bool {
        self.store.is_resident()
    }

    pub fn is_vertex_dirty(&self) -> bool {
        self.vertex_dirty
    }

    pub fn is_topology_dirty(&self) -> bool {
        self.topology_dirty
    }

    /// Clock value of the last full vertex upload
    pub fn last_mesh_update(&self) -> i64 {
        self.last_mesh_update
    }

    pub fn parent(&self) -> &SceneParent {
        &self.parent
    }

    pub fn set_parent(&mut self, parent: SceneParent) {
        self.parent = parent;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Hidden batches are neither drawn nor intersected
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_node_active(&self) -> bool {
        self.node_active
    }

    /// Mark the scene node (in)active; pending edits sync on deactivation
    pub fn set_node_active(&mut self, active: bool) -> Result<()> {
        self.node_active = active;
        if !active && (self.vertex_dirty || self.topology_dirty) {
            self.update_mesh()?;
        }
        Ok(())
    }

    // ===== CAPACITY =====

    /// Whether `vertex_count` more vertices fit under the soft ceiling
    ///
    /// Always true for an empty batch; the hard ceiling is checked when the
    /// subset is added.
    pub fn has_space_for(&self, vertex_count: u32) -> bool {
        let current = self.vertex_count();
        current == 0
            || current
                .checked_add(vertex_count)
                .is_some_and(|total| total <= self.soft_vertex_limit)
    }

    // ===== SUBSETS =====

    /// Add all of `source` as one subset
    pub fn add_subset_all(&mut self, source: &GeometryStore) -> Result<SubsetKey> {
        self.add_subset(source, 0..source.vertex_count(), 0..source.index_count(), None)
    }

    /// Copy a vertex/index range of `source` into a new tail subset
    ///
    /// Fails with `InvalidArgument` when a non-empty batch lacks space, or when
    /// an empty batch would exceed the hard vertex ceiling.
    pub fn add_subset(
        &mut self,
        source: &GeometryStore,
        vertices: Range<u32>,
        indices: Range<u32>,
        transform: Option<&Mat4>,
    ) -> Result<SubsetKey> {
        let incoming = vertices.end.saturating_sub(vertices.start);
        let current = self.vertex_count();
        if !self.has_space_for(incoming) {
            crate::engine_bail!(
                "batching::Batch",
                InvalidArgument,
                "batch {} holds {} vertices, no space for {} more",
                self.id, current, incoming
            );
        }
        if current == 0 && incoming > self.hard_vertex_limit {
            crate::engine_bail!(
                "batching::Batch",
                InvalidArgument,
                "{} vertices exceed the hard limit of {}",
                incoming, self.hard_vertex_limit
            );
        }

        self.self_check();
        if current == 0 {
            // an emptied batch takes the layout of whatever arrives next
            self.store = GeometryStore::new();
        }
        self.store.ensure_resident()?;
        let start_vertex = self.store.vertex_count();
        let start_index = self.store.index_count();
        self.store.append(source, vertices, indices, transform)?;

        let subset = Subset {
            bounds: AABB::from_points(&self.store.positions()[start_vertex as usize..]),
            start_vertex,
            vertex_count: self.store.vertex_count() - start_vertex,
            start_index,
            index_count: self.store.index_count() - start_index,
            active: true,
            index_backup: None,
        };
        let key = self.subsets.insert(subset);
        self.order.push(key);

        self.delayed_update_mesh()?;
        self.self_check();
        Ok(key)
    }

    /// Remove a subset, reclaiming storage when it is the tail
    pub fn remove_subset(&mut self, key: SubsetKey) -> Result<()> {
        let Some(position) = self.order.iter().rposition(|&k| k == key) else {
            crate::engine_bail!(
                "batching::Batch",
                InvalidResource,
                "subset is not part of batch {}",
                self.id
            );
        };

        self.self_check();
        self.disable_subset(key)?;

        let is_tail = position + 1 == self.order.len();
        let (vertex_end, index_end) = match position.checked_sub(1) {
            Some(previous) => {
                let previous = &self.subsets[self.order[previous]];
                (previous.end_vertex(), previous.end_index())
            }
            None => (0, 0),
        };
        if is_tail {
            self.store.ensure_resident()?;
            self.store.truncate(vertex_end, index_end)?;
        }
        self.order.remove(position);
        self.subsets.remove(key);

        if is_tail {
            self.delayed_update_mesh()?;
        }
        self.self_check();
        Ok(())
    }

    /// Hide a subset by zeroing its triangles; idempotent
    pub fn disable_subset(&mut self, key: SubsetKey) -> Result<()> {
        let Some(subset) = self.subsets.get(key) else {
            crate::engine_bail!("batching::Batch", InvalidResource, "unknown subset in batch {}", self.id);
        };
        if !subset.active {
            return Ok(());
        }
        self.self_check();
        self.store.ensure_resident()?;

        let range = subset.start_index as usize..subset.end_index() as usize;
        let subset = &mut self.subsets[key];
        let indices = self.store.indices_mut();
        let backup = subset.index_backup.get_or_insert_with(Vec::new);
        backup.clear();
        backup.extend_from_slice(&indices[range.clone()]);
        indices[range].fill(0);
        subset.active = false;

        self.mark_topology_dirty()?;
        self.self_check();
        Ok(())
    }

    /// Restore a disabled subset's triangles; idempotent
    pub fn enable_subset(&mut self, key: SubsetKey) -> Result<()> {
        let Some(subset) = self.subsets.get(key) else {
            crate::engine_bail!("batching::Batch", InvalidResource, "unknown subset in batch {}", self.id);
        };
        if subset.active {
            return Ok(());
        }
        self.self_check();
        self.store.ensure_resident()?;

        let range = subset.start_index as usize..subset.end_index() as usize;
        let subset = &mut self.subsets[key];
        if let Some(backup) = &subset.index_backup {
            self.store.indices_mut()[range].copy_from_slice(backup);
        }
        subset.active = true;

        self.mark_topology_dirty()?;
        self.self_check();
        Ok(())
    }

    /// Subset whose index range contains index position `index`
    pub fn subset_at_index(&self, index: u32) -> Option<(SubsetKey, &Subset)> {
        let after = self.order.partition_point(|&k| self.subsets[k].start_index <= index);
        let key = *self.order.get(after.checked_sub(1)?)?;
        let subset = &self.subsets[key];
        subset.contains_index(index).then_some((key, subset))
    }

    /// Union of subset bounds, optionally only active ones
    pub fn subset_bounds(&self, only_active: bool) -> AABB {
        self.subsets()
            .filter(|(_, s)| !only_active || s.active)
            .fold(AABB::EMPTY, |acc, (_, s)| acc.union(&s.bounds))
    }

    // ===== GPU SYNC =====

    /// Per-frame hook from the host scene graph
    pub fn flush(&mut self) -> Result<()> {
        self.update_mesh()
    }

    /// Pre-draw hook from the renderer
    pub fn on_will_render(&mut self) -> Result<()> {
        self.update_mesh()
    }

    /// Re-upload everything now, regardless of dirty flags
    pub fn force_resync(&mut self) -> Result<()> {
        self.store.ensure_resident()?;
        self.vertex_dirty = true;
        self.topology_dirty = true;
        self.update_mesh()
    }

    fn delayed_update_mesh(&mut self) -> Result<()> {
        self.vertex_dirty = true;
        self.topology_dirty = true;
        if !self.node_active {
            self.update_mesh()?;
        }
        Ok(())
    }

    fn mark_topology_dirty(&mut self) -> Result<()> {
        self.topology_dirty = true;
        if !self.node_active {
            self.update_mesh()?;
        }
        Ok(())
    }

    fn update_mesh(&mut self) -> Result<()> {
        if !self.vertex_dirty && !self.topology_dirty {
            return Ok(());
        }
        self.self_check();
        if self.vertex_dirty {
            self.mesh.upload_all(&self.store)?;
            let bounds = match AABB::from_points(self.store.positions()) {
                b if b.is_empty() => AABB::new(glam::Vec3::ZERO, glam::Vec3::ZERO),
                b => b,
            };
            self.mesh.set_bounds(bounds.expanded(self.bounds_padding * 2.0));
            self.vertex_dirty = false;
            self.topology_dirty = false;
            self.last_mesh_update = self.clock.now();
            crate::engine_trace!(
                "batching::Batch",
                "batch {} uploaded {} vertices",
                self.id, self.store.vertex_count()
            );
        } else if self.topology_dirty {
            self.mesh.upload_indices(&self.store)?;
            self.topology_dirty = false;
            self.last_mesh_update = self.clock.now();
        }
        self.self_check();
        Ok(())
    }

    // ===== RESIDENCY =====

    /// Sync the GPU copy, then release the CPU arrays; no-op when released
    pub fn clear_cached_geometry(&mut self) -> Result<()> {
        if !self.store.is_resident() {
            return Ok(());
        }
        self.self_check();
        self.update_mesh()?;
        self.store.make_non_resident(self.mesh.clone());
        self.self_check();
        crate::engine_debug!("batching::Batch", "batch {} released CPU geometry", self.id);
        Ok(())
    }

    /// Reload the CPU arrays from the GPU copy
    pub fn ensure_resident(&mut self) -> Result<()> {
        self.store.ensure_resident()
    }

    // ===== COPIES =====

    /// Standalone GPU mesh holding one subset's geometry, indices rebased to 0
    pub fn copy_subset_to_mesh(&mut self, key: SubsetKey) -> Result<GpuMesh> {
        let extracted = self.extract_subset(key)?;
        GpuMesh::from_store(self.device.clone(), &extracted)
    }

    /// CPU copy of one subset's geometry, indices rebased to 0
    pub fn extract_subset(&mut self, key: SubsetKey) -> Result<GeometryStore> {
        let Some(subset) = self.subsets.get(key) else {
            crate::engine_bail!("batching::Batch", InvalidResource, "unknown subset in batch {}", self.id);
        };
        let vertices = subset.start_vertex..subset.end_vertex();
        let mut indices = subset.start_index..subset.end_index();
        let backup = (!subset.active).then(|| subset.index_backup.clone()).flatten();

        self.store.ensure_resident()?;
        match backup {
            // disabled subsets are copied with their saved triangles
            Some(saved) => {
                let mut source = self.store.extract(vertices.clone(), 0..0)?;
                source.indices = saved.iter().map(|&i| i - vertices.start).collect();
                indices = 0..source.indices.len() as u32;
                source.extract(0..source.vertex_count(), indices)
            }
            None => self.store.extract(vertices, indices),
        }
    }

    /// Sync, then hand the GPU mesh to the highlight subsystem
    pub fn register_highlight(&mut self, sink: &mut dyn HighlightSink) -> Result<()> {
        self.update_mesh()?;
        sink.register(self.id, &self.mesh);
        Ok(())
    }

    /// Identifier-pass draw for this batch, syncing first
    pub fn intersection_draw(&mut self) -> Result<IdDraw> {
        self.update_mesh()?;
        Ok(IdDraw {
            container_id: self.id.0,
            positions: self.mesh.positions().clone(),
            indices: self.mesh.indices().clone(),
            index_count: self.mesh.index_count(),
            transform: self.parent.transform,
        })
    }

    // ===== SELF CHECK =====

    /// Broken structural invariants, empty when consistent
    pub fn invariant_violations(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();

        let mut previous_end = 0;
        for &key in &self.order {
            let s = &self.subsets[key];
            if s.start_vertex < previous_end {
                violations.push("subsets out of storage order");
            }
            if s.start_index % 3 != 0 {
                violations.push("subset start index not a multiple of 3");
            }
            previous_end = s.end_vertex();
        }

        if let Some(&tail) = self.order.last() {
            let tail = &self.subsets[tail];
            if tail.end_vertex() != self.store.vertex_count() {
                violations.push("tail subset does not end at the vertex count");
            }
            if tail.end_index() != self.store.index_count() {
                violations.push("tail subset does not end at the index count");
            }
        }

        if self.store.is_resident() && !self.vertex_dirty {
            let cpu_vertices = self.store.vertex_count();
            let gpu_vertices = self.mesh.gpu_vertex_count();
            let placeholder = cpu_vertices == 0 && gpu_vertices == 1;
            if cpu_vertices != gpu_vertices && !placeholder {
                violations.push("CPU and GPU vertex counts differ");
            }
        }
        if self.store.is_resident() && !self.topology_dirty && self.store.index_count() != self.mesh.index_count() {
            violations.push("CPU and GPU index counts differ");
        }

        violations
    }

    /// Log invariant violations in debug builds
    pub fn self_check(&self) {
        if cfg!(debug_assertions) {
            for violation in self.invariant_violations() {
                crate::engine_error!("batching::Batch", "batch {}: {}", self.id, violation);
            }
        }
    }
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
