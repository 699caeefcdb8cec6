use std::sync::Arc;

use serde::Deserialize;

use crate::primitives::concurrency::{ConflictGate, GatePolicy, LockTable, NoGate};
use crate::types::{GraphError, Result};

use super::metrics::GraphMetrics;

/// Upper bound on storage segments of an in-process pool.
pub const MAX_SEGMENTS: usize = 1024;

/// Edge orientation of a graph, fixed at construction.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Edges are stored once, on their source.
    #[default]
    Directed,
    /// Edges are stored on both endpoints and share one value cell.
    Undirected,
    /// Directed edges with an in-edge index on the destination.
    Bidirectional,
}

impl Direction {
    /// Whether an edge record is mirrored on its destination.
    pub fn is_mirrored(self) -> bool {
        !matches!(self, Direction::Directed)
    }
}

/// Configuration options supplied when constructing a [`super::Graph`].
#[derive(Clone)]
pub struct GraphOptions {
    /// Edge orientation.
    pub direction: Direction,
    /// Number of storage segments of an in-process pool.
    pub segments: usize,
    /// Overrides whether removed edges return their value cells to the factory.
    pub reclaim_edge_values: Option<bool>,
    /// Conflict gate every operation is routed through.
    pub gate: Arc<dyn ConflictGate>,
    /// Optional metrics collection implementation
    pub metrics: Option<Arc<dyn GraphMetrics>>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphOptions {
    /// Creates a new GraphOptions with default settings.
    ///
    /// Defaults to a directed graph with one segment per available core and
    /// no conflict detection.
    pub fn new() -> Self {
        let segments = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_SEGMENTS);
        Self {
            direction: Direction::Directed,
            segments,
            reclaim_edge_values: None,
            gate: Arc::new(NoGate),
            metrics: None,
        }
    }

    /// Sets the edge orientation.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Sets the number of pool segments, clamped to `1..=MAX_SEGMENTS`.
    pub fn segments(mut self, segments: usize) -> Self {
        self.segments = segments.clamp(1, MAX_SEGMENTS);
        self
    }

    /// Forces edge value reclamation on or off.
    pub fn reclaim_edge_values(mut self, enabled: bool) -> Self {
        self.reclaim_edge_values = Some(enabled);
        self
    }

    /// Sets the conflict gate.
    pub fn gate(mut self, gate: Arc<dyn ConflictGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn GraphMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// File-level configuration, typically loaded from TOML.
///
/// ```toml
/// direction = "undirected"
/// segments = 8
/// reclaim_edge_values = true
///
/// [gate]
/// mode = "wait"
/// timeout_ms = 50
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Edge orientation.
    pub direction: Direction,
    /// Pool segment count; the core count when absent.
    pub segments: Option<usize>,
    /// Edge value reclamation override.
    pub reclaim_edge_values: Option<bool>,
    /// Installs a [`LockTable`] with this policy; no gate when absent.
    pub gate: Option<GatePolicy>,
}

impl GraphConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: GraphConfig =
            toml::from_str(text).map_err(|err| GraphError::Config(err.to_string()))?;
        if config.segments == Some(0) {
            return Err(GraphError::InvalidArgument("segments must be positive"));
        }
        Ok(config)
    }

    /// Converts the configuration into builder options.
    ///
    /// Returns the lock table too when one was configured, so callers can
    /// open units of work on it.
    pub fn into_options(self) -> (GraphOptions, Option<Arc<LockTable>>) {
        let mut options = GraphOptions::new().direction(self.direction);
        if let Some(segments) = self.segments {
            options = options.segments(segments);
        }
        if let Some(reclaim) = self.reclaim_edge_values {
            options = options.reclaim_edge_values(reclaim);
        }
        let table = self.gate.map(|policy| Arc::new(LockTable::new(policy)));
        if let Some(table) = &table {
            options = options.gate(table.clone());
        }
        (options, table)
    }
}
