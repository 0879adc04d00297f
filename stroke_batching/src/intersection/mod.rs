/// Intersection module - identifier-pass queries with one-tick-delayed readback

pub mod packed_id;
pub mod widget;
pub mod intersection_future;
pub mod gpu_intersector;

pub use packed_id::PackedId;
pub use widget::{WidgetHandle, WidgetRegistry, SimpleWidgetRegistry};
pub use intersection_future::{IntersectionFuture, IntersectionHit, TriangleHit, RequestKind, FutureState};
pub(crate) use intersection_future::Decoded;
pub use gpu_intersector::GpuIntersector;
