/// Tests for Batch
///
/// Subset add/remove/disable, capacity limits, deferred GPU sync,
/// residency and the structural self-check.

use super::*;
use crate::batch::{BatchId, FrameClock, HighlightSink, MaterialId, MaterialInfo, SceneParent};
use crate::config::BatchConfig;
use crate::error::Error;
use crate::geometry::{GeometryDesc, GeometryStore, GpuMesh, VertexLayout};
use crate::graphics_device::{GraphicsDevice, MockGraphicsDevice, SharedDevice};
use glam::{Mat4, Vec3, Vec4};
use std::sync::{Arc, Mutex};

// ============================================================================
// Helper Functions
// ============================================================================

fn create_mock_device() -> SharedDevice {
    let device: Arc<Mutex<dyn GraphicsDevice>> = Arc::new(Mutex::new(MockGraphicsDevice::new()));
    device
}

fn material() -> MaterialInfo {
    MaterialInfo {
        id: MaterialId(1),
        name: "ink".to_string(),
        bounds_padding: 0.25,
        vertex_layout: VertexLayout::POSITIONS,
    }
}

fn create_batch_with(config: BatchConfig) -> Batch {
    Batch::new(BatchId(5), &material(), create_mock_device(), FrameClock::new(), &config, SceneParent::default())
        .unwrap()
}

fn create_batch() -> Batch {
    create_batch_with(BatchConfig::default())
}

/// `count` separate triangles, each with its own three vertices, starting at x = `x`
fn stroke(count: usize, x: f32) -> GeometryStore {
    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut indices = Vec::new();
    for i in 0..count {
        let base = positions.len() as u32;
        let x = x + i as f32;
        positions.extend([Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 0.0, 0.0), Vec3::new(x, 1.0, 0.0)]);
        normals.extend([Vec3::Z; 3]);
        indices.extend([base, base + 1, base + 2]);
    }
    GeometryStore::from_desc(GeometryDesc {
        layout: VertexLayout { normals: true, ..VertexLayout::POSITIONS },
        positions,
        normals,
        indices,
        ..GeometryDesc::default()
    })
    .unwrap()
}

/// Positions-only geometry with `vertices` vertices and one triangle
fn bulk(vertices: u32) -> GeometryStore {
    GeometryStore::from_desc(GeometryDesc {
        layout: VertexLayout { normals: true, ..VertexLayout::POSITIONS },
        positions: vec![Vec3::ZERO; vertices as usize],
        normals: vec![Vec3::Z; vertices as usize],
        indices: vec![0, 1, 2],
        ..GeometryDesc::default()
    })
    .unwrap()
}

fn assert_consistent(batch: &Batch) {
    assert_eq!(batch.invariant_violations(), Vec::<&str>::new());
}

// ============================================================================
// Creation
// ============================================================================

#[test]
fn test_new_batch_is_empty_with_placeholder() {
    let batch = create_batch();
    assert_eq!(batch.id(), BatchId(5));
    assert_eq!(batch.material(), MaterialId(1));
    assert_eq!(batch.vertex_count(), 0);
    assert_eq!(batch.subset_count(), 0);
    assert_eq!(batch.mesh().gpu_vertex_count(), 1);
    assert!(!batch.is_vertex_dirty());
    assert_consistent(&batch);
}

// ============================================================================
// Adding subsets
// ============================================================================

#[test]
fn test_add_subsets_appends_in_order() {
    let mut batch = create_batch();
    let a = batch.add_subset_all(&stroke(2, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(3, 10.0)).unwrap();

    let sa = batch.subset(a).unwrap();
    let sb = batch.subset(b).unwrap();
    assert_eq!((sa.start_vertex(), sa.vertex_count()), (0, 6));
    assert_eq!((sb.start_vertex(), sb.vertex_count()), (6, 9));
    assert_eq!((sb.start_index(), sb.index_count()), (6, 9));
    assert_eq!(sb.bounds().min, Vec3::new(10.0, 0.0, 0.0));
    assert_eq!(batch.geometry().unwrap().indices()[6..9], [6, 7, 8]);

    let keys: Vec<_> = batch.subsets().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![a, b]);
    assert_consistent(&batch);
}

#[test]
fn test_add_subset_with_transform() {
    let mut batch = create_batch();
    let transform = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
    let source = stroke(1, 0.0);
    let key = batch.add_subset(&source, 0..3, 0..3, Some(&transform)).unwrap();

    assert_eq!(batch.subset(key).unwrap().bounds().min.z, 5.0);
}

#[test]
fn test_add_marks_dirty_and_flush_uploads() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(2, 0.0)).unwrap();
    assert!(batch.is_vertex_dirty());
    assert!(batch.is_topology_dirty());
    assert_eq!(batch.mesh().vertex_count(), 0);

    batch.flush().unwrap();

    assert!(!batch.is_vertex_dirty());
    assert!(!batch.is_topology_dirty());
    assert_eq!(batch.mesh().vertex_count(), 6);
    assert_eq!(batch.mesh().index_count(), 6);
    assert_consistent(&batch);
}

#[test]
fn test_flush_pads_bounds_twice() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    batch.on_will_render().unwrap();

    let bounds = batch.mesh().bounds();
    assert_eq!(bounds.min, Vec3::new(-0.5, -0.5, -0.5));
    assert_eq!(bounds.max, Vec3::new(1.5, 1.5, 0.5));
}

#[test]
fn test_flush_records_clock() {
    let clock = FrameClock::new();
    let mut batch = Batch::new(
        BatchId(1), &material(), create_mock_device(), clock.clone(),
        &BatchConfig::default(), SceneParent::default(),
    ).unwrap();
    clock.set(42);

    batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    batch.flush().unwrap();
    assert_eq!(batch.last_mesh_update(), 42);
}

#[test]
fn test_inactive_node_syncs_immediately() {
    let mut batch = create_batch();
    batch.set_node_active(false).unwrap();

    batch.add_subset_all(&stroke(2, 0.0)).unwrap();

    assert!(!batch.is_vertex_dirty());
    assert_eq!(batch.mesh().vertex_count(), 6);
}

#[test]
fn test_deactivating_node_flushes_pending_edits() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(2, 0.0)).unwrap();
    batch.set_node_active(false).unwrap();
    assert!(!batch.is_vertex_dirty());
    assert!(!batch.is_node_active());
}

// ============================================================================
// Capacity
// ============================================================================

#[test]
fn test_capacity_guard_on_non_empty_batch() {
    let config = BatchConfig { soft_vertex_limit: 10, hard_vertex_limit: 20, ..BatchConfig::default() };
    let mut batch = create_batch_with(config);
    batch.add_subset_all(&stroke(2, 0.0)).unwrap();

    assert!(batch.has_space_for(4));
    assert!(!batch.has_space_for(5));
    let result = batch.add_subset_all(&stroke(2, 0.0));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(batch.vertex_count(), 6);
    assert_eq!(batch.subset_count(), 1);
}

#[test]
fn test_empty_batch_accepts_up_to_hard_limit() {
    let config = BatchConfig { soft_vertex_limit: 10, hard_vertex_limit: 20, ..BatchConfig::default() };
    let mut batch = create_batch_with(config.clone());
    assert!(batch.has_space_for(15));
    batch.add_subset_all(&bulk(15)).unwrap();
    assert_eq!(batch.vertex_count(), 15);
    assert!(!batch.has_space_for(1));

    let mut other = create_batch_with(config);
    let result = other.add_subset_all(&bulk(21));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_has_space_for_never_overflows() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(1, 0.0)).unwrap();

    assert!(!batch.has_space_for(u32::MAX));
    let result = batch.add_subset(&bulk(3), 0..u32::MAX, 0..3, None);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(batch.subset_count(), 1);
}

#[test]
fn test_capacity_guard_just_below_soft_limit() {
    let config = BatchConfig::default();
    let mut batch = create_batch_with(config.clone());
    batch.add_subset_all(&bulk(config.soft_vertex_limit - 5)).unwrap();

    let result = batch.add_subset_all(&bulk(10));

    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    assert_eq!(batch.vertex_count(), config.soft_vertex_limit - 5);
    assert!(batch.has_space_for(5));
    assert_consistent(&batch);
}

// ============================================================================
// Disable / enable
// ============================================================================

#[test]
fn test_disable_enable_round_trip() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(2, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(2, 5.0)).unwrap();
    batch.flush().unwrap();
    let before = batch.geometry().unwrap().indices().to_vec();

    batch.disable_subset(b).unwrap();
    assert!(!batch.subset(b).unwrap().is_active());
    assert!(batch.geometry().unwrap().indices()[6..12].iter().all(|&i| i == 0));
    assert!(batch.is_topology_dirty());
    assert!(!batch.is_vertex_dirty());

    batch.disable_subset(b).unwrap();
    batch.enable_subset(b).unwrap();
    batch.enable_subset(b).unwrap();

    assert_eq!(batch.geometry().unwrap().indices(), &before[..]);
    batch.flush().unwrap();
    assert_eq!(batch.mesh().download().unwrap().indices(), &before[..]);
}

#[test]
fn test_disable_unknown_subset_fails() {
    let mut batch = create_batch();
    let key = batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    batch.remove_subset(key).unwrap();
    assert!(matches!(batch.disable_subset(key), Err(Error::InvalidResource(_))));
    assert!(matches!(batch.remove_subset(key), Err(Error::InvalidResource(_))));
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn test_remove_non_tail_keeps_storage() {
    let mut batch = create_batch();
    let a = batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(1, 1.0)).unwrap();
    let c = batch.add_subset_all(&stroke(1, 2.0)).unwrap();

    batch.remove_subset(b).unwrap();

    assert_eq!(batch.vertex_count(), 9);
    assert_eq!(batch.index_count(), 9);
    assert!(batch.geometry().unwrap().indices()[3..6].iter().all(|&i| i == 0));
    assert!(batch.subset(b).is_none());
    assert!(batch.subset(a).is_some());
    assert!(batch.subset(c).is_some());
    assert_consistent(&batch);
}

#[test]
fn test_remove_tail_reclaims_to_previous_subset() {
    let mut batch = create_batch();
    let a = batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(1, 1.0)).unwrap();
    let c = batch.add_subset_all(&stroke(1, 2.0)).unwrap();

    batch.remove_subset(b).unwrap();
    batch.remove_subset(c).unwrap();

    // b's space is reclaimed together with c's
    assert_eq!(batch.vertex_count(), 3);
    assert_eq!(batch.index_count(), 3);
    assert_consistent(&batch);

    batch.remove_subset(a).unwrap();
    assert_eq!(batch.vertex_count(), 0);
    assert_eq!(batch.subset_count(), 0);

    batch.flush().unwrap();
    assert_eq!(batch.mesh().gpu_vertex_count(), 1);
    assert_consistent(&batch);
}

#[test]
fn test_ordering_invariant_under_mixed_edits() {
    let mut batch = create_batch();
    let mut keys = Vec::new();
    for i in 0..8 {
        keys.push(batch.add_subset_all(&stroke(1 + i % 3, i as f32)).unwrap());
    }
    for &i in &[3usize, 7, 6, 0] {
        batch.remove_subset(keys[i]).unwrap();
        assert_consistent(&batch);
    }
    keys.push(batch.add_subset_all(&stroke(2, 20.0)).unwrap());
    batch.disable_subset(keys[2]).unwrap();
    assert_consistent(&batch);

    let starts: Vec<u32> = batch.subsets().map(|(_, s)| s.start_vertex()).collect();
    let mut sorted = starts.clone();
    sorted.sort_unstable();
    assert_eq!(starts, sorted);
    assert!(batch.subsets().all(|(_, s)| s.start_index() % 3 == 0));
}

#[test]
fn test_emptied_batch_adopts_new_layout() {
    let mut batch = create_batch();
    let key = batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    batch.remove_subset(key).unwrap();

    let plain = GeometryStore::from_desc(GeometryDesc {
        positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        indices: vec![0, 1, 2],
        ..GeometryDesc::default()
    })
    .unwrap();
    batch.add_subset_all(&plain).unwrap();
    assert_eq!(batch.geometry().unwrap().layout(), Some(VertexLayout::POSITIONS));
}

// ============================================================================
// Lookup
// ============================================================================

#[test]
fn test_subset_at_index() {
    let mut batch = create_batch();
    let a = batch.add_subset_all(&stroke(2, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(1, 5.0)).unwrap();

    assert_eq!(batch.subset_at_index(0).map(|(k, _)| k), Some(a));
    assert_eq!(batch.subset_at_index(5).map(|(k, _)| k), Some(a));
    assert_eq!(batch.subset_at_index(6).map(|(k, _)| k), Some(b));
    assert!(batch.subset_at_index(9).is_none());
}

#[test]
fn test_subset_bounds_only_active() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    let far = batch.add_subset_all(&stroke(1, 50.0)).unwrap();
    batch.disable_subset(far).unwrap();

    assert_eq!(batch.subset_bounds(false).max.x, 51.0);
    assert_eq!(batch.subset_bounds(true).max.x, 1.0);
}

// ============================================================================
// Residency
// ============================================================================

#[test]
fn test_clear_cached_geometry_round_trip() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(3, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(2, 4.0)).unwrap();
    batch.disable_subset(b).unwrap();
    let snapshot = batch.geometry().unwrap().clone();

    batch.clear_cached_geometry().unwrap();
    assert!(!batch.is_resident());
    assert!(!batch.is_vertex_dirty());
    assert_eq!(batch.vertex_count(), 15);
    assert!(matches!(batch.geometry(), Err(Error::NotResident(_))));

    batch.clear_cached_geometry().unwrap();
    assert!(!batch.is_resident());

    batch.ensure_resident().unwrap();
    let restored = batch.geometry().unwrap();
    assert_eq!(restored.positions(), snapshot.positions());
    assert_eq!(restored.normals(), snapshot.normals());
    assert_eq!(restored.indices(), snapshot.indices());
    assert_consistent(&batch);
}

#[test]
fn test_clear_cached_geometry_twice_equals_once() {
    let clock = FrameClock::new();
    let create = || {
        let mut batch = Batch::new(
            BatchId(5), &material(), create_mock_device(), clock.clone(),
            &BatchConfig::default(), SceneParent::default(),
        )
        .unwrap();
        batch.add_subset_all(&stroke(2, 0.0)).unwrap();
        batch
    };
    let mut once = create();
    let mut twice = create();
    clock.set(9);

    once.clear_cached_geometry().unwrap();
    twice.clear_cached_geometry().unwrap();
    clock.set(12);
    twice.clear_cached_geometry().unwrap();

    assert_eq!(twice.is_resident(), once.is_resident());
    assert_eq!(twice.vertex_count(), once.vertex_count());
    assert_eq!(twice.index_count(), once.index_count());
    assert_eq!(twice.last_mesh_update(), once.last_mesh_update());
    assert_eq!(twice.is_vertex_dirty(), once.is_vertex_dirty());
    assert_eq!(twice.is_topology_dirty(), once.is_topology_dirty());
    assert_eq!(twice.mesh().gpu_vertex_count(), once.mesh().gpu_vertex_count());
    assert_eq!(twice.mesh().index_count(), once.mesh().index_count());
    assert_eq!(twice.last_mesh_update(), 9);
}

#[test]
fn test_index_only_sync_records_clock() {
    let clock = FrameClock::new();
    let mut batch = Batch::new(
        BatchId(5), &material(), create_mock_device(), clock.clone(),
        &BatchConfig::default(), SceneParent::default(),
    )
    .unwrap();
    let a = batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    batch.flush().unwrap();
    assert_eq!(batch.last_mesh_update(), 0);

    clock.set(55);
    batch.disable_subset(a).unwrap();
    assert!(!batch.is_vertex_dirty());
    batch.flush().unwrap();

    assert!(!batch.is_topology_dirty());
    assert_eq!(batch.last_mesh_update(), 55);
}

#[test]
fn test_edits_reload_released_geometry() {
    let mut batch = create_batch();
    let a = batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    batch.clear_cached_geometry().unwrap();

    // already active: nothing to restore, nothing reloaded
    batch.enable_subset(a).unwrap();
    assert!(!batch.is_resident());

    let b = batch.add_subset_all(&stroke(1, 3.0)).unwrap();
    assert!(batch.is_resident());
    batch.clear_cached_geometry().unwrap();
    batch.disable_subset(b).unwrap();
    batch.remove_subset(b).unwrap();
    assert_eq!(batch.vertex_count(), 3);
    assert_consistent(&batch);
}

#[test]
fn test_remove_already_disabled_tail_while_released() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(1, 3.0)).unwrap();
    batch.disable_subset(b).unwrap();
    batch.clear_cached_geometry().unwrap();

    batch.remove_subset(b).unwrap();
    assert_eq!(batch.vertex_count(), 3);
}

// ============================================================================
// Copies & collaborators
// ============================================================================

#[test]
fn test_copy_subset_to_mesh_rebases_indices() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(2, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(1, 5.0)).unwrap();

    let mesh = batch.copy_subset_to_mesh(b).unwrap();
    let copy = mesh.download().unwrap();
    assert_eq!(copy.indices(), &[0, 1, 2]);
    assert_eq!(copy.positions()[0], Vec3::new(5.0, 0.0, 0.0));
}

#[test]
fn test_copy_of_disabled_subset_keeps_triangles() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    let b = batch.add_subset_all(&stroke(1, 5.0)).unwrap();
    batch.disable_subset(b).unwrap();

    let copy = batch.extract_subset(b).unwrap();
    assert_eq!(copy.indices(), &[0, 1, 2]);
}

struct RecordingSink {
    registered: Vec<(BatchId, u32)>,
}

impl HighlightSink for RecordingSink {
    fn register(&mut self, batch: BatchId, mesh: &GpuMesh) {
        self.registered.push((batch, mesh.vertex_count()));
    }
}

#[test]
fn test_register_highlight_syncs_first() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(2, 0.0)).unwrap();
    let mut sink = RecordingSink { registered: Vec::new() };

    batch.register_highlight(&mut sink).unwrap();

    assert_eq!(sink.registered, vec![(BatchId(5), 6)]);
    assert!(!batch.is_vertex_dirty());
}

#[test]
fn test_intersection_draw_uses_batch_id_and_parent() {
    let mut batch = create_batch();
    batch.set_parent(SceneParent { transform: Mat4::from_scale(Vec3::splat(2.0)), ..SceneParent::default() });
    batch.add_subset_all(&stroke(2, 0.0)).unwrap();

    let draw = batch.intersection_draw().unwrap();
    assert_eq!(draw.container_id, 5);
    assert_eq!(draw.index_count, 6);
    assert_eq!(draw.transform.w_axis, Vec4::W);
    assert_eq!(draw.transform.x_axis.x, 2.0);
}

#[test]
fn test_invariant_violations_detect_tail_mismatch() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    batch.store.truncate(0, 0).unwrap();

    let violations = batch.invariant_violations();
    assert!(violations.contains(&"tail subset does not end at the vertex count"));
    batch.self_check();
}

#[test]
#[serial_test::serial]
fn test_edits_log_broken_invariants() {
    use crate::batching::Engine;
    use crate::batching::log::{LogEntry, LogSeverity, Logger};

    struct Capture(Arc<Mutex<Vec<LogEntry>>>);
    impl Logger for Capture {
        fn log(&self, entry: &LogEntry) {
            self.0.lock().unwrap().push(entry.clone());
        }
    }

    let entries = Arc::new(Mutex::new(Vec::new()));
    Engine::set_logger(Capture(entries.clone()));

    let mut batch = Batch::new(
        BatchId(4321), &material(), create_mock_device(), FrameClock::new(),
        &BatchConfig::default(), SceneParent::default(),
    )
    .unwrap();
    batch.add_subset_all(&stroke(2, 0.0)).unwrap();
    batch.store.truncate(3, 3).unwrap();
    batch.add_subset_all(&stroke(1, 5.0)).unwrap();

    let logged = entries
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.severity == LogSeverity::Error && e.message.starts_with("batch #4321: "))
        .count();
    Engine::reset_logger();

    assert!(logged > 0);
}

#[test]
fn test_index_counts_checked_while_vertices_dirty() {
    let mut batch = create_batch();
    batch.add_subset_all(&stroke(1, 0.0)).unwrap();
    batch.flush().unwrap();

    // GPU holds 3 indices, CPU only 0 while vertices are marked dirty
    batch.vertex_dirty = true;
    batch.store.truncate(3, 0).unwrap();

    let violations = batch.invariant_violations();
    assert!(violations.contains(&"CPU and GPU index counts differ"));
    assert!(!violations.contains(&"CPU and GPU vertex counts differ"));
}
