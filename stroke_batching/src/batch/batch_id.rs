/// Batch identifiers and the shared frame clock

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU16, Ordering};

// ===== BATCH ID =====

/// 16-bit batch identifier; 0 is reserved for "no batch"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub u16);

impl BatchId {
    pub const NONE: BatchId = BatchId(0);
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out batch ids from a wrapping 16-bit counter, skipping 0
///
/// After 65,535 allocations ids repeat. A long-lived batch can then share an
/// id with a new one; lookups return whichever was registered last.
#[derive(Debug)]
pub struct BatchIdAllocator {
    next: AtomicU16,
}

impl BatchIdAllocator {
    /// Counter starting at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Counter whose first id is `first` (0 is bumped to 1)
    pub fn starting_at(first: u16) -> Self {
        Self { next: AtomicU16::new(first.max(1)) }
    }

    pub fn allocate(&self) -> BatchId {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return BatchId(id);
            }
        }
    }
}

impl Default for BatchIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ===== FRAME CLOCK =====

/// Tick counter shared by a manager and its batches
///
/// Batches stamp their last GPU upload with it; the residency policy compares
/// those stamps against the current value.
#[derive(Debug, Clone, Default)]
pub struct FrameClock(Arc<AtomicI64>);

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Advance by one tick and return the new value
    pub fn advance(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn set(&self, timestamp: i64) {
        self.0.store(timestamp, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[path = "batch_id_tests.rs"]
mod tests;
