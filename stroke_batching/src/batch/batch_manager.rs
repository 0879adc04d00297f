/// Registry of batch pools and the batches they own
///
/// One `BatchManager` per independent scene. It maps materials to pools and
/// batch ids to batches, routes new subsets to the newest batch with room,
/// and runs per-tick maintenance (trimming empty batches, releasing CPU
/// geometry of idle ones).

use std::ops::Range;
use std::sync::Arc;
use glam::Mat4;
use rustc_hash::FxHashMap;

use crate::batch::{
    Batch, BatchId, BatchIdAllocator, BatchPool, FrameClock, HighlightSink, LayerMask,
    MaterialCatalog, MaterialId, SceneParent, Subset, SubsetHandle,
};
use crate::config::BatchConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::geometry::{AABB, GeometryStore};
use crate::graphics_device::{IdDraw, SharedDevice};

/// Pools, batches and the per-tick maintenance of one scene
///
/// # Example
///
/// ```no_run
/// use std::sync::{Arc, Mutex};
/// use stroke_batching::batch::{BatchManager, MaterialId, MaterialInfo, SimpleMaterialCatalog};
/// use stroke_batching::config::BatchConfig;
/// use stroke_batching::geometry::{GeometryDesc, GeometryStore, VertexLayout};
/// use stroke_batching::graphics_device::{GraphicsDevice, MockGraphicsDevice};
/// use stroke_batching::glam::Vec3;
///
/// let device: Arc<Mutex<dyn GraphicsDevice>> = Arc::new(Mutex::new(MockGraphicsDevice::new()));
/// let catalog = SimpleMaterialCatalog::new().with(MaterialInfo {
///     id: MaterialId(1),
///     name: "ink".to_string(),
///     bounds_padding: 0.01,
///     vertex_layout: VertexLayout::POSITIONS,
/// });
/// let mut manager = BatchManager::new(device, Arc::new(catalog), BatchConfig::default());
///
/// let stroke = GeometryStore::from_desc(GeometryDesc {
///     positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
///     indices: vec![0, 1, 2],
///     ..GeometryDesc::default()
/// })?;
/// let handle = manager.create_subset_from_store(MaterialId(1), &stroke)?;
/// manager.tick()?;
/// assert!(manager.subset(handle).is_some());
/// # Ok::<(), stroke_batching::batching::Error>(())
/// ```
pub struct BatchManager {
    device: SharedDevice,
    catalog: Arc<dyn MaterialCatalog>,
    config: BatchConfig,
    ids: Arc<BatchIdAllocator>,
    clock: FrameClock,
    parent: SceneParent,
    visible: bool,

    pools: Vec<BatchPool>,
    pool_by_material: FxHashMap<MaterialId, usize>,
    batches: FxHashMap<BatchId, Batch>,
}

impl BatchManager {
    /// Create an empty manager drawing ids from the process-wide allocator
    pub fn new(device: SharedDevice, catalog: Arc<dyn MaterialCatalog>, config: BatchConfig) -> Self {
        Self {
            device,
            catalog,
            config,
            ids: Engine::batch_id_allocator(),
            clock: FrameClock::new(),
            parent: SceneParent::default(),
            visible: true,
            pools: Vec::new(),
            pool_by_material: FxHashMap::default(),
            batches: FxHashMap::default(),
        }
    }

    /// Use `ids` instead of the process-wide allocator
    pub fn with_id_allocator(mut self, ids: Arc<BatchIdAllocator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Current tick
    pub fn timestamp(&self) -> i64 {
        self.clock.now()
    }

    pub fn parent(&self) -> &SceneParent {
        &self.parent
    }

    /// Reparent every batch, present and future
    pub fn set_parent(&mut self, parent: SceneParent) {
        self.parent = parent;
        for batch in self.batches.values_mut() {
            batch.set_parent(parent);
        }
    }

    // ===== POOLS =====

    /// Index of the pool for `material`, creating it with one empty batch
    pub fn get_or_create_pool(&mut self, material: MaterialId) -> Result<usize> {
        if let Some(&index) = self.pool_by_material.get(&material) {
            return Ok(index);
        }
        let Some(info) = self.catalog.material(material) else {
            crate::engine_bail!("batching::BatchManager", InvalidResource, "unknown {}", material);
        };

        let index = self.pools.len();
        self.pools.push(BatchPool::new(material, info.name.clone()));
        self.pool_by_material.insert(material, index);
        self.create_batch(index)?;

        crate::engine_debug!("batching::BatchManager", "created pool '{}' for {}", info.name, material);
        Ok(index)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn pool(&self, index: usize) -> Option<&BatchPool> {
        self.pools.get(index)
    }

    pub fn pool_for(&self, material: MaterialId) -> Option<&BatchPool> {
        self.pool_by_material.get(&material).map(|&i| &self.pools[i])
    }

    /// Destroy every pool and batch
    ///
    /// Outstanding subset handles become stale.
    pub fn reset_pools(&mut self) {
        for pool in &mut self.pools {
            pool.destroy(&mut self.batches);
        }
        self.pools.clear();
        self.pool_by_material.clear();
        self.batches.clear();
        crate::engine_debug!("batching::BatchManager", "pools reset");
    }

    fn create_batch(&mut self, pool_index: usize) -> Result<BatchId> {
        let material = self.pools[pool_index].material();
        let Some(info) = self.catalog.material(material) else {
            crate::engine_bail!("batching::BatchManager", InvalidResource, "unknown {}", material);
        };

        let id = self.ids.allocate();
        let mut batch = Batch::new(
            id,
            &info,
            self.device.clone(),
            self.clock.clone(),
            &self.config,
            self.parent,
        )?;
        batch.set_visible(self.visible);

        if self.batches.insert(id, batch).is_some() {
            crate::engine_warn!(
                "batching::BatchManager",
                "batch id {} reused after wraparound, the older batch is no longer addressable",
                id
            );
        }
        self.pools[pool_index].push(id);
        Ok(id)
    }

    // ===== BATCHES =====

    pub fn batch(&self, id: BatchId) -> Option<&Batch> {
        self.batches.get(&id)
    }

    pub fn batch_mut(&mut self, id: BatchId) -> Option<&mut Batch> {
        self.batches.get_mut(&id)
    }

    /// Every batch, pool by pool, oldest first
    pub fn all_batches(&self) -> impl Iterator<Item = &Batch> + '_ {
        self.pools
            .iter()
            .flat_map(|pool| pool.batch_ids())
            .filter_map(|id| self.batches.get(id))
    }

    // ===== SUBSET CREATION =====

    /// Add the first `vertex_count` vertices and `triangle_count` triangles of `source`
    ///
    /// `triangle_count` counts whole triangles, so `3 * triangle_count` indices
    /// are copied. Callers holding an index count use `create_subset_in_range`.
    pub fn create_subset(
        &mut self,
        material: MaterialId,
        vertex_count: u32,
        triangle_count: u32,
        source: &GeometryStore,
    ) -> Result<SubsetHandle> {
        let Some(index_count) = triangle_count.checked_mul(3) else {
            crate::engine_bail!(
                "batching::BatchManager",
                InvalidArgument,
                "{} triangles overflow the index range",
                triangle_count
            );
        };
        self.add_to_pool(material, source, 0..vertex_count, 0..index_count, None)
    }

    /// Add all of `source`
    pub fn create_subset_from_store(&mut self, material: MaterialId, source: &GeometryStore) -> Result<SubsetHandle> {
        self.add_to_pool(material, source, 0..source.vertex_count(), 0..source.index_count(), None)
    }

    /// Add a vertex/index range of `source`, optionally transformed
    pub fn create_subset_in_range(
        &mut self,
        material: MaterialId,
        source: &GeometryStore,
        vertices: Range<u32>,
        indices: Range<u32>,
        transform: Option<&Mat4>,
    ) -> Result<SubsetHandle> {
        self.add_to_pool(material, source, vertices, indices, transform)
    }

    /// Copy a subset owned by another manager
    ///
    /// The copy uses `material`, or the source batch's material when `None`.
    pub fn create_subset_from(
        &mut self,
        source: &mut BatchManager,
        handle: SubsetHandle,
        material: Option<MaterialId>,
        transform: Option<&Mat4>,
    ) -> Result<SubsetHandle> {
        let (source_material, geometry) = source.extract_subset(handle)?;
        let material = material.unwrap_or(source_material);
        self.add_to_pool(material, &geometry, 0..geometry.vertex_count(), 0..geometry.index_count(), transform)
    }

    /// Copy a subset of this manager into the same material
    pub fn duplicate_subset(&mut self, handle: SubsetHandle, transform: Option<&Mat4>) -> Result<SubsetHandle> {
        let (material, geometry) = self.extract_subset(handle)?;
        self.add_to_pool(material, &geometry, 0..geometry.vertex_count(), 0..geometry.index_count(), transform)
    }

    fn extract_subset(&mut self, handle: SubsetHandle) -> Result<(MaterialId, GeometryStore)> {
        let batch = self.resolve_mut(handle)?;
        let geometry = batch.extract_subset(handle.key)?;
        Ok((batch.material(), geometry))
    }

    fn add_to_pool(
        &mut self,
        material: MaterialId,
        source: &GeometryStore,
        vertices: Range<u32>,
        indices: Range<u32>,
        transform: Option<&Mat4>,
    ) -> Result<SubsetHandle> {
        let pool_index = self.get_or_create_pool(material)?;
        let incoming = vertices.end.saturating_sub(vertices.start);

        let target = match self.pools[pool_index].newest() {
            Some(id) if self.batches.get(&id).is_some_and(|b| b.has_space_for(incoming)) => id,
            _ => self.create_batch(pool_index)?,
        };
        let Some(batch) = self.batches.get_mut(&target) else {
            crate::engine_bail!("batching::BatchManager", InvalidResource, "batch {} vanished", target);
        };
        let key = batch.add_subset(source, vertices, indices, transform)?;
        Ok(SubsetHandle { batch: target, key })
    }

    // ===== SUBSET ACCESS =====

    /// Resolve a handle; `None` once the subset or its batch is gone
    pub fn subset(&self, handle: SubsetHandle) -> Option<&Subset> {
        self.batches.get(&handle.batch)?.subset(handle.key)
    }

    pub fn remove_subset(&mut self, handle: SubsetHandle) -> Result<()> {
        self.resolve_mut(handle)?.remove_subset(handle.key)
    }

    pub fn disable_subset(&mut self, handle: SubsetHandle) -> Result<()> {
        self.resolve_mut(handle)?.disable_subset(handle.key)
    }

    pub fn enable_subset(&mut self, handle: SubsetHandle) -> Result<()> {
        self.resolve_mut(handle)?.enable_subset(handle.key)
    }

    fn resolve_mut(&mut self, handle: SubsetHandle) -> Result<&mut Batch> {
        match self.batches.get_mut(&handle.batch) {
            Some(batch) if batch.subset(handle.key).is_some() => Ok(batch),
            _ => Err(crate::engine_err!(
                "batching::BatchManager",
                InvalidResource,
                "stale subset handle in batch {}",
                handle.batch
            )),
        }
    }

    // ===== TICK =====

    /// Advance the clock by one tick and run maintenance
    pub fn tick(&mut self) -> Result<()> {
        let now = self.clock.advance();
        self.maintain(now)
    }

    /// Set the clock to `timestamp` and run maintenance
    ///
    /// The timestamp may move backwards; batches stamped after it are
    /// resynced rather than released.
    pub fn tick_to(&mut self, timestamp: i64) -> Result<()> {
        self.clock.set(timestamp);
        self.maintain(timestamp)
    }

    fn maintain(&mut self, now: i64) -> Result<()> {
        for pool in &mut self.pools {
            pool.trim_batches(&mut self.batches);
            if self.config.enable_memory_optimization {
                pool.apply_residency_policy(
                    &mut self.batches,
                    now,
                    self.config.mutable_batches_per_pool,
                    self.config.idle_ticks_before_eviction,
                )?;
            }
        }
        Ok(())
    }

    /// Sync every batch's pending edits now
    pub fn flush_mesh_updates(&mut self) -> Result<()> {
        for pool in &self.pools {
            pool.flush_all(&mut self.batches)?;
        }
        Ok(())
    }

    /// Show or hide every batch, present and future
    pub fn set_visibility(&mut self, visible: bool) {
        self.visible = visible;
        for batch in self.batches.values_mut() {
            batch.set_visible(visible);
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    // ===== AGGREGATES =====

    /// Union of subset bounds; empty when there are none
    ///
    /// Subset bounds are stored in batch-local space. The union is mapped
    /// through the scene parent's transform, so the result is in world space.
    /// With an identity parent the two coincide.
    pub fn bounds_of_all_strokes(&self, only_active: bool) -> AABB {
        let local = self
            .all_batches()
            .fold(AABB::EMPTY, |acc, b| acc.union(&b.subset_bounds(only_active)));
        if local.is_empty() {
            return local;
        }
        local.transformed(&self.parent.transform)
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn triangle_count(&self) -> u64 {
        self.batches.values().map(|b| (b.index_count() / 3) as u64).sum()
    }

    pub fn vertex_count(&self) -> u64 {
        self.batches.values().map(|b| b.vertex_count() as u64).sum()
    }

    // ===== COLLABORATORS =====

    /// Hand every batch mesh to the highlight subsystem
    pub fn register_highlight(&mut self, sink: &mut dyn HighlightSink) -> Result<()> {
        for pool in &self.pools {
            for id in pool.batch_ids() {
                if let Some(batch) = self.batches.get_mut(id) {
                    batch.register_highlight(sink)?;
                }
            }
        }
        Ok(())
    }

    /// Identifier-pass draws of visible batches on a layer in `cull_mask`
    pub fn intersection_draws(&mut self, cull_mask: LayerMask, out: &mut Vec<IdDraw>) -> Result<()> {
        for pool in &self.pools {
            for id in pool.batch_ids() {
                let Some(batch) = self.batches.get_mut(id) else {
                    continue;
                };
                if !batch.is_visible() || !batch.parent().layer.intersects(cull_mask) {
                    continue;
                }
                if batch.index_count() == 0 {
                    continue;
                }
                out.push(batch.intersection_draw()?);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "batch_manager_tests.rs"]
mod tests;
