/// Configuration for batching and intersection

/// Batch capacity and residency settings
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Vertex count a non-empty batch may grow to
    pub soft_vertex_limit: u32,
    /// Absolute vertex ceiling (16-bit index range minus a sentinel)
    pub hard_vertex_limit: u32,
    /// Newest batches per pool that are never evicted
    pub mutable_batches_per_pool: usize,
    /// Ticks without an upload before a batch releases its CPU geometry
    pub idle_ticks_before_eviction: i64,
    /// Run the residency policy on every tick
    pub enable_memory_optimization: bool,
    /// Half-extent of the bounds given to a freshly created batch
    pub initial_bounds_extent: f32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            soft_vertex_limit: 15_999,
            hard_vertex_limit: 0xfffe,
            mutable_batches_per_pool: 1,
            idle_ticks_before_eviction: 60,
            enable_memory_optimization: true,
            initial_bounds_extent: 100.0,
        }
    }
}

/// GPU intersection settings
#[derive(Debug, Clone)]
pub struct IntersectionConfig {
    /// Edge length of the identifier render target
    pub render_size: u32,
    /// Edge length of the downsampled image that is read back
    pub readback_size: u32,
    /// Requests made while disabled return no future
    pub enabled: bool,
}

impl Default for IntersectionConfig {
    fn default() -> Self {
        Self {
            render_size: 64,
            readback_size: 16,
            enabled: true,
        }
    }
}

impl IntersectionConfig {
    /// Number of 32-bit samples in one readback
    pub fn readback_samples(&self) -> usize {
        (self.readback_size * self.readback_size) as usize
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
