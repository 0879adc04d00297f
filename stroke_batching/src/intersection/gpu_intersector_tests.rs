/// Tests for GpuIntersector
///
/// Scene: batch #7 holds three triangles in the z = 0 plane. The first
/// subset is a quad on the left, the second a triangle in the lower right.
/// Widget #9 covers the upper right. Queries are centered on the origin with
/// radius 1, so the identifier target spans [-1, 1] in x and y.

use super::*;
use crate::batch::{BatchIdAllocator, MaterialId, MaterialInfo, SimpleMaterialCatalog};
use crate::config::{BatchConfig, IntersectionConfig};
use crate::error::Error;
use crate::geometry::{GeometryDesc, GeometryStore, VertexLayout};
use crate::graphics_device::{BufferDesc, BufferUsage, GraphicsDevice, IdDraw, MockGraphicsDevice};
use crate::intersection::{FutureState, SimpleWidgetRegistry, WidgetHandle};
use glam::{Mat4, Quat, Vec3};
use std::sync::{Arc, Mutex};

const INK: MaterialId = MaterialId(1);
const WIDGET: WidgetHandle = WidgetHandle(42);

// ============================================================================
// Helper Functions
// ============================================================================

struct Scene {
    mock: Arc<Mutex<MockGraphicsDevice>>,
    device: SharedDevice,
    manager: BatchManager,
    intersector: GpuIntersector,
    left: SubsetHandle,
    lower_right: SubsetHandle,
}

fn store(positions: Vec<Vec3>, indices: Vec<u32>) -> GeometryStore {
    GeometryStore::from_desc(GeometryDesc { positions, indices, ..GeometryDesc::default() }).unwrap()
}

fn create_scene() -> Scene {
    let mock = Arc::new(Mutex::new(MockGraphicsDevice::new()));
    let device: SharedDevice = mock.clone();
    let catalog = SimpleMaterialCatalog::new().with(MaterialInfo {
        id: INK,
        name: "ink".to_string(),
        bounds_padding: 0.0,
        vertex_layout: VertexLayout::POSITIONS,
    });
    let mut manager = BatchManager::new(device.clone(), Arc::new(catalog), BatchConfig::default())
        .with_id_allocator(Arc::new(BatchIdAllocator::starting_at(7)));

    let quad = store(
        vec![
            Vec3::new(-0.9, -0.9, 0.0),
            Vec3::new(-0.1, -0.9, 0.0),
            Vec3::new(-0.1, 0.9, 0.0),
            Vec3::new(-0.9, 0.9, 0.0),
        ],
        vec![0, 1, 2, 0, 2, 3],
    );
    let triangle = store(
        vec![Vec3::new(0.1, -0.9, 0.0), Vec3::new(0.9, -0.9, 0.0), Vec3::new(0.9, -0.1, 0.0)],
        vec![0, 1, 2],
    );
    let left = manager.create_subset_from_store(INK, &quad).unwrap();
    let lower_right = manager.create_subset_from_store(INK, &triangle).unwrap();

    let intersector = GpuIntersector::new(device.clone(), IntersectionConfig::default()).unwrap();
    Scene { mock, device, manager, intersector, left, lower_right }
}

/// Non-indexed draw of `positions` built on `device`
fn create_draw(device: &SharedDevice, positions: &[Vec3]) -> IdDraw {
    let mut guard = device.lock().unwrap();
    let vertices = guard
        .create_buffer(BufferDesc { size: (positions.len() * 12) as u64, usage: BufferUsage::Vertex })
        .unwrap();
    vertices.update(0, bytemuck::cast_slice(positions)).unwrap();
    let order: Vec<u32> = (0..positions.len() as u32).collect();
    let indices = guard
        .create_buffer(BufferDesc { size: (order.len() * 4) as u64, usage: BufferUsage::Index })
        .unwrap();
    indices.update(0, bytemuck::cast_slice(&order)).unwrap();
    IdDraw {
        container_id: 0,
        positions: vertices,
        indices,
        index_count: order.len() as u32,
        transform: Mat4::IDENTITY,
    }
}

fn create_widgets(device: &SharedDevice) -> SimpleWidgetRegistry {
    let draw = create_draw(device, &[Vec3::new(0.1, 0.1, 0.0), Vec3::new(0.9, 0.1, 0.0), Vec3::new(0.9, 0.9, 0.0)]);
    let mut widgets = SimpleWidgetRegistry::new();
    widgets.register(9, WIDGET, LayerMask::WIDGETS, Some(draw));
    widgets
}

fn query(scene: &mut Scene, widgets: Option<&dyn WidgetRegistry>, max_results: usize) -> IntersectionFuture {
    scene
        .intersector
        .request_batch_intersections(&mut scene.manager, widgets, Vec3::ZERO, 1.0, max_results, LayerMask::ALL)
        .unwrap()
        .unwrap()
}

// ============================================================================
// Round trip
// ============================================================================

#[test]
fn test_disabled_subset_is_never_hit() {
    let mut scene = create_scene();
    assert_eq!(scene.left.batch, BatchId(7));
    scene.manager.disable_subset(scene.lower_right).unwrap();

    let future = query(&mut scene, None, 8);
    assert_eq!(scene.intersector.tick(&scene.manager, None).unwrap(), 1);

    assert_eq!(future.results().unwrap(), vec![IntersectionHit::Subset(scene.left)]);
    let triangles = future.triangle_hits().unwrap();
    assert_eq!(triangles.len(), 1);
    assert!(triangles[0].triangle < 2);
}

#[test]
fn test_enabled_subsets_are_all_found() {
    let mut scene = create_scene();

    let future = query(&mut scene, None, 8);
    scene.intersector.tick(&scene.manager, None).unwrap();

    let results = future.results().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.contains(&IntersectionHit::Subset(scene.left)));
    assert!(results.contains(&IntersectionHit::Subset(scene.lower_right)));
    let lower = future
        .triangle_hits()
        .unwrap()
        .into_iter()
        .find(|t| t.subset == scene.lower_right)
        .unwrap();
    assert_eq!(lower.triangle, 0);
}

#[test]
fn test_result_arrives_one_tick_later() {
    let mut scene = create_scene();
    scene.intersector.tick(&scene.manager, None).unwrap();

    let future = query(&mut scene, None, 8);
    assert_eq!(future.state().unwrap(), FutureState::Issued);
    assert!(!future.is_ready());
    assert_eq!(future.has_any_intersections(), Err(Error::NotReady));
    assert_eq!(scene.intersector.pending_count(), 1);

    scene.intersector.tick(&scene.manager, None).unwrap();

    assert!(future.is_ready());
    assert_eq!(scene.intersector.pending_count(), 0);
    assert_eq!(scene.intersector.tick(&scene.manager, None).unwrap(), 0);
}

#[test]
fn test_requests_complete_in_issue_order() {
    let mut scene = create_scene();
    let first = query(&mut scene, None, 8);
    let second = query(&mut scene, None, 1);

    assert_eq!(scene.intersector.tick(&scene.manager, None).unwrap(), 2);

    assert_eq!(first.result_count().unwrap(), 2);
    assert_eq!(second.result_count().unwrap(), 1);
}

#[test]
fn test_count_only_request() {
    let mut scene = create_scene();
    let future = scene
        .intersector
        .request_batch_intersection(&mut scene.manager, None, Vec3::ZERO, 1.0, LayerMask::ALL)
        .unwrap()
        .unwrap();
    scene.intersector.tick(&scene.manager, None).unwrap();

    assert!(future.has_any_intersections().unwrap());
    assert_eq!(future.result_count().unwrap(), 1);
    assert!(matches!(future.results(), Err(Error::InvalidArgument(_))));
}

#[test]
fn test_query_away_from_geometry_misses() {
    let mut scene = create_scene();
    let future = scene
        .intersector
        .request_batch_intersections(&mut scene.manager, None, Vec3::new(50.0, 0.0, 0.0), 1.0, 8, LayerMask::ALL)
        .unwrap()
        .unwrap();
    scene.intersector.tick(&scene.manager, None).unwrap();

    assert!(!future.has_any_intersections().unwrap());
    assert!(future.results().unwrap().is_empty());
}

#[test]
fn test_geometry_seen_edge_on_is_missed() {
    let mut scene = create_scene();
    scene.intersector.set_view_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));

    let future = query(&mut scene, None, 8);
    scene.intersector.tick(&scene.manager, None).unwrap();

    assert!(!future.has_any_intersections().unwrap());
}

#[test]
fn test_cull_mask_filters_batches() {
    let mut scene = create_scene();
    let future = scene
        .intersector
        .request_batch_intersections(&mut scene.manager, None, Vec3::ZERO, 1.0, 8, LayerMask::WIDGETS)
        .unwrap()
        .unwrap();
    scene.intersector.tick(&scene.manager, None).unwrap();

    assert!(!future.has_any_intersections().unwrap());
}

// ============================================================================
// Stale references
// ============================================================================

#[test]
fn test_subset_removed_before_readback_is_skipped() {
    let mut scene = create_scene();
    scene.manager.disable_subset(scene.lower_right).unwrap();
    let future = query(&mut scene, None, 8);

    scene.manager.remove_subset(scene.left).unwrap();
    scene.intersector.tick(&scene.manager, None).unwrap();

    assert!(future.is_ready());
    assert!(future.results().unwrap().is_empty());
}

#[test]
fn test_batches_destroyed_before_readback_are_skipped() {
    let mut scene = create_scene();
    let future = query(&mut scene, None, 8);

    scene.manager.reset_pools();
    scene.intersector.tick(&scene.manager, None).unwrap();

    assert!(!future.has_any_intersections().unwrap());
}

// ============================================================================
// Widgets
// ============================================================================

#[test]
fn test_widgets_are_found_after_batches() {
    let mut scene = create_scene();
    let widgets = create_widgets(&scene.device);

    let future = query(&mut scene, Some(&widgets), 8);
    scene.intersector.tick(&scene.manager, Some(&widgets)).unwrap();

    let results = future.results().unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.contains(&IntersectionHit::Widget(WIDGET)));
    assert_eq!(future.triangle_hits().unwrap().len(), 2);
}

#[test]
fn test_model_request_reports_only_widgets() {
    let mut scene = create_scene();
    let widgets = create_widgets(&scene.device);

    let future = scene
        .intersector
        .request_model_intersections(&mut scene.manager, Some(&widgets), Vec3::ZERO, 1.0, 8, LayerMask::ALL)
        .unwrap()
        .unwrap();
    scene.intersector.tick(&scene.manager, Some(&widgets)).unwrap();

    assert_eq!(future.results().unwrap(), vec![IntersectionHit::Widget(WIDGET)]);
    assert!(matches!(future.triangle_hits(), Err(Error::NotImplemented(_))));
}

#[test]
fn test_widget_unregistered_before_readback_is_skipped() {
    let mut scene = create_scene();
    let mut widgets = create_widgets(&scene.device);
    scene.manager.set_visibility(false);

    let future = query(&mut scene, Some(&widgets), 8);
    widgets.unregister(9);
    scene.intersector.tick(&scene.manager, Some(&widgets)).unwrap();

    assert!(!future.has_any_intersections().unwrap());
}

#[test]
fn test_max_results_caps_collection() {
    let mut scene = create_scene();
    let widgets = create_widgets(&scene.device);

    let future = query(&mut scene, Some(&widgets), 1);
    scene.intersector.tick(&scene.manager, Some(&widgets)).unwrap();

    assert_eq!(future.results().unwrap().len(), 1);
}

// ============================================================================
// Resources & state
// ============================================================================

#[test]
fn test_disabled_intersector_returns_none() {
    let mut scene = create_scene();
    scene.intersector.set_enabled(false);

    let future = scene
        .intersector
        .request_batch_intersections(&mut scene.manager, None, Vec3::ZERO, 1.0, 8, LayerMask::ALL)
        .unwrap();

    assert!(future.is_none());
    assert_eq!(scene.intersector.pending_count(), 0);
}

#[test]
fn test_invalid_radius_is_rejected() {
    let mut scene = create_scene();
    let result = scene
        .intersector
        .request_batch_intersections(&mut scene.manager, None, Vec3::ZERO, 0.0, 8, LayerMask::ALL);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_dropped_future_returns_target_to_pool() {
    let mut scene = create_scene();
    drop(query(&mut scene, None, 8));
    assert_eq!(scene.intersector.tick(&scene.manager, None).unwrap(), 1);
    let textures = scene.mock.lock().unwrap().stats().textures_created;

    let future = query(&mut scene, None, 8);
    scene.intersector.tick(&scene.manager, None).unwrap();

    assert!(future.is_ready());
    assert_eq!(scene.mock.lock().unwrap().stats().textures_created, textures);
    assert_eq!(scene.mock.lock().unwrap().stats().id_passes, 2);
}

#[test]
fn test_request_flushes_pending_batch_edits() {
    let mut scene = create_scene();
    assert!(scene.manager.batch(BatchId(7)).unwrap().is_vertex_dirty());

    query(&mut scene, None, 8);

    assert!(!scene.manager.batch(BatchId(7)).unwrap().is_vertex_dirty());
}
