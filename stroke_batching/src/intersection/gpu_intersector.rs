/// GPU intersection against batches and widgets
///
/// A request renders every intersectable draw into a small `R32_UINT` target
/// with an orthographic camera framed on the query sphere. Each pixel holds a
/// `PackedId`. The image is point-sampled down to the readback size and left
/// on the GPU. On the next `tick()` it is copied into one shared device buffer,
/// read into one shared host array, and decoded into the request's future.
///
/// Waiting a tick keeps the CPU from stalling on a GPU that is still busy with
/// the frame the request was rendered in.

use std::collections::VecDeque;
use std::sync::Arc;
use glam::{Mat4, Quat, Vec3};
use rustc_hash::FxHashSet;

use crate::batch::{BatchId, BatchManager, LayerMask, SubsetHandle};
use crate::config::IntersectionConfig;
use crate::error::Result;
use crate::graphics_device::{
    lock_device, Buffer, BufferDesc, BufferUsage, FilterMode, IdDraw, IdPassView, SharedDevice,
    Texture, TextureDesc, TextureFormat, TextureUsage,
};
use crate::intersection::{
    Decoded, IntersectionFuture, IntersectionHit, PackedId, RequestKind, TriangleHit, WidgetRegistry,
};

struct PendingReadback {
    future: IntersectionFuture,
    /// Downsampled image, returned to the pool once copied
    target: Arc<dyn Texture>,
}

pub struct GpuIntersector {
    device: SharedDevice,
    config: IntersectionConfig,
    enabled: bool,
    /// Full-size identifier target, reused by every request
    render_target: Arc<dyn Texture>,
    /// Readback-size targets not currently owned by a pending request
    free_targets: Vec<Arc<dyn Texture>>,
    readback_buffer: Arc<dyn Buffer>,
    /// Host copy of the readback buffer
    scratch: Vec<u32>,
    /// Dedup set, lent to one decode at a time
    seen_pool: Option<FxHashSet<IntersectionHit>>,
    pending: VecDeque<PendingReadback>,
    draws: Vec<IdDraw>,
    frame: u64,
    view_rotation: Quat,
}

impl GpuIntersector {
    pub fn new(device: SharedDevice, config: IntersectionConfig) -> Result<Self> {
        if config.render_size == 0 || config.readback_size == 0 {
            crate::engine_bail!(
                "batching::GpuIntersector",
                InvalidArgument,
                "render size {} and readback size {} must be non-zero",
                config.render_size, config.readback_size
            );
        }

        let samples = config.readback_samples();
        let (render_target, readback_buffer) = {
            let mut guard = lock_device(&device)?;
            let render_target = guard.create_texture(TextureDesc {
                width: config.render_size,
                height: config.render_size,
                format: TextureFormat::R32_UINT,
                usage: TextureUsage::RenderTargetAndTransferSrc,
                filter: FilterMode::Nearest,
            })?;
            let readback_buffer = guard.create_buffer(BufferDesc {
                size: (samples * std::mem::size_of::<u32>()) as u64,
                usage: BufferUsage::Storage,
            })?;
            (render_target, readback_buffer)
        };

        crate::engine_debug!(
            "batching::GpuIntersector",
            "created {0}x{0} identifier target, {1}x{1} readback",
            config.render_size, config.readback_size
        );

        Ok(Self {
            device,
            enabled: config.enabled,
            config,
            render_target,
            free_targets: Vec::new(),
            readback_buffer,
            scratch: vec![0; samples],
            seen_pool: None,
            pending: VecDeque::new(),
            draws: Vec::new(),
            frame: 0,
            view_rotation: Quat::IDENTITY,
        })
    }

    // ===== ACCESSORS =====

    pub fn config(&self) -> &IntersectionConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// While disabled, requests return `None`; pending requests still complete
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Orientation of the query camera, typically the viewer's head
    ///
    /// Geometry seen edge-on from this direction may be missed.
    pub fn set_view_rotation(&mut self, rotation: Quat) {
        self.view_rotation = rotation;
    }

    pub fn view_rotation(&self) -> Quat {
        self.view_rotation
    }

    /// Ticks seen so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ===== REQUESTS =====

    /// Whether anything intersects the sphere; `results()` is unavailable
    pub fn request_batch_intersection(
        &mut self,
        batches: &mut BatchManager,
        widgets: Option<&dyn WidgetRegistry>,
        center: Vec3,
        radius: f32,
        cull_mask: LayerMask,
    ) -> Result<Option<IntersectionFuture>> {
        self.request(RequestKind::Count, 1, batches, widgets, center, radius, cull_mask)
    }

    /// Up to `max_results` distinct subsets and widgets inside the sphere
    pub fn request_batch_intersections(
        &mut self,
        batches: &mut BatchManager,
        widgets: Option<&dyn WidgetRegistry>,
        center: Vec3,
        radius: f32,
        max_results: usize,
        cull_mask: LayerMask,
    ) -> Result<Option<IntersectionFuture>> {
        self.request(RequestKind::Batch, max_results, batches, widgets, center, radius, cull_mask)
    }

    /// Up to `max_results` distinct widgets inside the sphere
    pub fn request_model_intersections(
        &mut self,
        batches: &mut BatchManager,
        widgets: Option<&dyn WidgetRegistry>,
        center: Vec3,
        radius: f32,
        max_results: usize,
        cull_mask: LayerMask,
    ) -> Result<Option<IntersectionFuture>> {
        self.request(RequestKind::Model, max_results, batches, widgets, center, radius, cull_mask)
    }

    #[allow(clippy::too_many_arguments)]
    fn request(
        &mut self,
        kind: RequestKind,
        max_results: usize,
        batches: &mut BatchManager,
        widgets: Option<&dyn WidgetRegistry>,
        center: Vec3,
        radius: f32,
        cull_mask: LayerMask,
    ) -> Result<Option<IntersectionFuture>> {
        if !self.enabled {
            return Ok(None);
        }
        if radius.is_nan() || radius <= 0.0 || !center.is_finite() {
            crate::engine_bail!(
                "batching::GpuIntersector",
                InvalidArgument,
                "query sphere at {} with radius {} is invalid",
                center, radius
            );
        }

        self.draws.clear();
        batches.intersection_draws(cull_mask, &mut self.draws)?;
        if let Some(widgets) = widgets {
            widgets.intersection_draws(cull_mask, &mut self.draws)?;
        }

        let target = self.render(center, radius)?;
        self.draws.clear();

        let future = IntersectionFuture::new(kind, max_results, self.frame);
        self.pending.push_back(PendingReadback { future: future.clone(), target });

        crate::engine_trace!(
            "batching::GpuIntersector",
            "{:?} request at {} (r = {}) issued in frame {}",
            kind, center, radius, self.frame
        );
        Ok(Some(future))
    }

    /// Identifier pass plus downsample; returns the small target
    fn render(&mut self, center: Vec3, radius: f32) -> Result<Arc<dyn Texture>> {
        let view = Mat4::from_rotation_translation(self.view_rotation, center).inverse();
        // view-space z in [-radius, radius] maps to depth [0, 1]
        let projection = Mat4::orthographic_rh(-radius, radius, -radius, radius, -radius, radius);
        let pass = IdPassView { view_projection: projection * view };

        let mut device = lock_device(&self.device)?;
        device.render_id_pass(&self.render_target, &pass, &self.draws)?;

        let target = match self.free_targets.pop() {
            Some(target) => target,
            None => device.create_texture(TextureDesc {
                width: self.config.readback_size,
                height: self.config.readback_size,
                format: TextureFormat::R32_UINT,
                usage: TextureUsage::RenderTargetAndTransferSrc,
                filter: FilterMode::Nearest,
            })?,
        };
        device.blit(&self.render_target, &target, FilterMode::Nearest)?;
        Ok(target)
    }

    // ===== READBACK =====

    /// Advance one frame and decode every request issued before it
    ///
    /// Requests are decoded in issue order. Returns how many completed.
    pub fn tick(&mut self, batches: &BatchManager, widgets: Option<&dyn WidgetRegistry>) -> Result<usize> {
        self.frame += 1;
        let mut completed = 0;

        while let Some(entry) = self.pending.front() {
            if entry.future.issued_frame()? >= self.frame {
                break;
            }
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            self.read_back(entry, batches, widgets)?;
            completed += 1;
        }
        Ok(completed)
    }

    fn read_back(
        &mut self,
        entry: PendingReadback,
        batches: &BatchManager,
        widgets: Option<&dyn WidgetRegistry>,
    ) -> Result<()> {
        let PendingReadback { future, target } = entry;
        future.mark_pending()?;

        lock_device(&self.device)?.copy_texture_to_buffer(&target, &self.readback_buffer)?;
        self.free_targets.push(target);

        if future.is_abandoned() {
            crate::engine_trace!("batching::GpuIntersector", "skipping decode of a dropped request");
            return Ok(());
        }

        self.readback_buffer
            .read(0, bytemuck::cast_slice_mut(&mut self.scratch))?;

        let mut seen = self.seen_pool.take().unwrap_or_default();
        let decoded = decode(&self.scratch, &future, batches, widgets, &mut seen);
        seen.clear();
        self.seen_pool = Some(seen);

        future.complete(decoded?)
    }
}

/// Turn readback samples into deduplicated hits
fn decode(
    samples: &[u32],
    future: &IntersectionFuture,
    batches: &BatchManager,
    widgets: Option<&dyn WidgetRegistry>,
    seen: &mut FxHashSet<IntersectionHit>,
) -> Result<Decoded> {
    let kind = future.kind()?;
    let max_results = future.max_results()?;
    let mut out = Decoded::default();

    for &sample in samples {
        if out.count == max_results {
            break;
        }
        let Some(id) = PackedId::unpack(sample) else {
            continue;
        };
        if kind == RequestKind::Count {
            out.count += 1;
            continue;
        }

        let batch = match kind {
            RequestKind::Batch => batches.batch(BatchId(id.container_id)),
            _ => None,
        };
        let (hit, triangle) = match batch {
            Some(batch) => {
                // the subset may have been removed since the request was rendered
                let Some((key, subset)) = batch.subset_at_index(id.index_position()) else {
                    continue;
                };
                if !subset.is_active() {
                    continue;
                }
                let handle = SubsetHandle { batch: batch.id(), key };
                let triangle = TriangleHit {
                    subset: handle,
                    triangle: (id.index_position() - subset.start_index()) / 3,
                };
                (IntersectionHit::Subset(handle), Some(triangle))
            }
            None => match widgets.and_then(|w| w.widget(id.container_id)) {
                Some(widget) => (IntersectionHit::Widget(widget), None),
                None => continue,
            },
        };

        if !seen.insert(hit) {
            continue;
        }
        out.hits.push(hit);
        out.triangles.extend(triangle);
        out.count += 1;
    }
    Ok(out)
}

#[cfg(test)]
#[path = "gpu_intersector_tests.rs"]
mod tests;
