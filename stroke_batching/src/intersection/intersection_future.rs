/// Handle to an intersection request whose result arrives a tick later
///
/// The intersector keeps a clone while the readback is pending and fills it
/// in during `GpuIntersector::tick`. Callers poll `is_ready()`; every result
/// accessor fails with `NotReady` until then.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::batch::SubsetHandle;
use crate::error::{Error, Result};
use crate::intersection::WidgetHandle;

/// What a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Only whether anything was hit; no lookups are made
    Count,
    /// Subsets and widgets
    Batch,
    /// Widgets only
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Rendered, waiting for the next tick
    Issued,
    /// Being copied back and decoded
    ReadbackPending,
    Ready,
}

/// One deduplicated hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntersectionHit {
    Subset(SubsetHandle),
    Widget(WidgetHandle),
}

/// First triangle seen for a subset hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleHit {
    pub subset: SubsetHandle,
    /// Triangle number relative to the subset's first triangle
    pub triangle: u32,
}

/// Decoded readback
#[derive(Debug, Default)]
pub(crate) struct Decoded {
    pub count: usize,
    pub hits: Vec<IntersectionHit>,
    pub triangles: Vec<TriangleHit>,
}

#[derive(Debug)]
struct FutureInner {
    kind: RequestKind,
    max_results: usize,
    issued_frame: u64,
    state: FutureState,
    result: Decoded,
}

#[derive(Debug, Clone)]
pub struct IntersectionFuture {
    inner: Arc<Mutex<FutureInner>>,
}

impl IntersectionFuture {
    pub(crate) fn new(kind: RequestKind, max_results: usize, issued_frame: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FutureInner {
                kind,
                max_results,
                issued_frame,
                state: FutureState::Issued,
                result: Decoded::default(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, FutureInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::BackendError("Intersection future lock poisoned".to_string()))
    }

    fn ready(&self) -> Result<MutexGuard<'_, FutureInner>> {
        let inner = self.lock()?;
        if inner.state != FutureState::Ready {
            return Err(Error::NotReady);
        }
        Ok(inner)
    }

    // ===== ACCESSORS =====

    pub fn kind(&self) -> Result<RequestKind> {
        Ok(self.lock()?.kind)
    }

    pub fn max_results(&self) -> Result<usize> {
        Ok(self.lock()?.max_results)
    }

    /// Intersector frame the request was rendered in
    pub fn issued_frame(&self) -> Result<u64> {
        Ok(self.lock()?.issued_frame)
    }

    pub fn state(&self) -> Result<FutureState> {
        Ok(self.lock()?.state)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), Ok(FutureState::Ready))
    }

    // ===== RESULTS =====

    pub fn has_any_intersections(&self) -> Result<bool> {
        Ok(self.ready()?.result.count > 0)
    }

    /// Number of results collected (at most `max_results`)
    pub fn result_count(&self) -> Result<usize> {
        Ok(self.ready()?.result.count)
    }

    /// Deduplicated hits in readback scan order
    ///
    /// Count-only requests carry no hits and fail with `InvalidArgument`.
    pub fn results(&self) -> Result<Vec<IntersectionHit>> {
        let inner = self.ready()?;
        if inner.kind == RequestKind::Count {
            return Err(Error::InvalidArgument(
                "results were not included in this request".to_string(),
            ));
        }
        Ok(inner.result.hits.clone())
    }

    /// Subset hits with the first triangle seen for each
    pub fn triangle_hits(&self) -> Result<Vec<TriangleHit>> {
        let inner = self.ready()?;
        match inner.kind {
            RequestKind::Batch => Ok(inner.result.triangles.clone()),
            RequestKind::Count => Err(Error::InvalidArgument(
                "results were not included in this request".to_string(),
            )),
            RequestKind::Model => Err(Error::NotImplemented(
                "triangle lookup for model intersections".to_string(),
            )),
        }
    }

    // ===== INTERSECTOR SIDE =====

    /// Whether the intersector holds the only reference
    pub(crate) fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    pub(crate) fn mark_pending(&self) -> Result<()> {
        self.lock()?.state = FutureState::ReadbackPending;
        Ok(())
    }

    pub(crate) fn complete(&self, result: Decoded) -> Result<()> {
        let mut inner = self.lock()?;
        inner.result = result;
        inner.state = FutureState::Ready;
        Ok(())
    }
}

#[cfg(test)]
#[path = "intersection_future_tests.rs"]
mod tests;
