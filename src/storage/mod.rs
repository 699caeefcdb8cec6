//! Graph container and its storage.
//!
//! Node slots live in a [`NodeStore`]: an in-process [`NodePool`] or a
//! distributed [`RingStore`]. The [`Graph`] container routes every operation
//! through a conflict gate before touching a slot.

mod edge;
mod edge_factory;
mod graph;
mod metrics;
mod node;
mod options;
mod ring;
mod store;

/// Edge handles and shared value cells.
pub use edge::{EdgeImage, EdgeRef, EdgeValue};

/// Shared edge value allocation.
pub use edge_factory::EdgeFactory;

/// Core graph container.
pub use graph::{EdgeIter, Graph, LocalGraph};

/// Metrics.
pub use metrics::{default_metrics, CounterMetrics, GraphMetrics, NoopMetrics};

/// Node slots and serialized node images.
pub use node::{NodeImage, NodeSlot};

/// Graph configuration options.
pub use options::{Direction, GraphConfig, GraphOptions, MAX_SEGMENTS};

/// Replication ring.
pub use ring::{Cluster, DistGraph, PartitionCtx, RingStore, SubGraphState};

/// Node storage backends.
pub use store::{NodePool, NodeStore};
