use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking structural operations on a graph container.
///
/// Implementations collect statistics about node and edge lifecycle events,
/// hole reuse in adjacency lists, and replication ring growth. Every hook is
/// called on the hot path, so implementations must be cheap and thread-safe.
pub trait GraphMetrics: Send + Sync {
    /// Records the allocation of a node record.
    fn node_created(&self);

    /// Records a node becoming visible to iteration.
    fn node_published(&self);

    /// Records the logical removal of a node.
    fn node_removed(&self);

    /// Records the creation of an edge.
    fn edge_created(&self);

    /// Records the removal of an edge.
    fn edge_removed(&self);

    /// Records an edge insertion that overwrote a stale adjacency record.
    fn hole_reused(&self);

    /// Records an edge value cell returned to its factory.
    fn edge_cell_released(&self);

    /// Records a sub-graph state being spliced into a replication ring.
    fn ring_spliced(&self);
}

/// A no-op implementation of [`GraphMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl GraphMetrics for NoopMetrics {
    fn node_created(&self) {}
    fn node_published(&self) {}
    fn node_removed(&self) {}
    fn edge_created(&self) {}
    fn edge_removed(&self) {}
    fn hole_reused(&self) {}
    fn edge_cell_released(&self) {}
    fn ring_spliced(&self) {}
}

/// A thread-safe counter-based implementation of [`GraphMetrics`].
///
/// All counters are relaxed atomics and can be read at any time from any
/// thread.
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of node records allocated.
    pub nodes_created: AtomicU64,

    /// Number of nodes published with `add_node`.
    pub nodes_published: AtomicU64,

    /// Number of nodes removed.
    pub nodes_removed: AtomicU64,

    /// Number of edges created.
    pub edges_created: AtomicU64,

    /// Number of edges removed.
    pub edges_removed: AtomicU64,

    /// Number of stale adjacency records overwritten by new edges.
    pub holes_reused: AtomicU64,

    /// Number of edge value cells released to their factory.
    pub edge_cells_released: AtomicU64,

    /// Number of states spliced into replication rings.
    pub rings_spliced: AtomicU64,
}

impl CounterMetrics {
    /// Reads a counter with relaxed ordering.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl GraphMetrics for CounterMetrics {
    fn node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    fn node_published(&self) {
        self.nodes_published.fetch_add(1, Ordering::Relaxed);
    }

    fn node_removed(&self) {
        self.nodes_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_created(&self) {
        self.edges_created.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_removed(&self) {
        self.edges_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn hole_reused(&self) {
        self.holes_reused.fetch_add(1, Ordering::Relaxed);
    }

    fn edge_cell_released(&self) {
        self.edge_cells_released.fetch_add(1, Ordering::Relaxed);
    }

    fn ring_spliced(&self) {
        self.rings_spliced.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`], which has zero overhead
/// as it discards all recorded metrics.
pub fn default_metrics() -> Arc<dyn GraphMetrics> {
    Arc::new(NoopMetrics)
}
