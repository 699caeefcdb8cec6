//! The graph container over a pluggable node store.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::primitives::bytes::{Codec, DeserializeBuffer, SerializeBuffer};
use crate::primitives::concurrency::{ConflictGate, MethodFlag};
use crate::types::{NodeHandle, Result};

use super::metrics::{default_metrics, GraphMetrics};
use super::node::{NodeImage, NodeSlot, NIL};
use super::options::{Direction, GraphOptions};
use super::store::{NodePool, NodeStore};

mod edge_ops;
mod node_ops;

pub use edge_ops::EdgeIter;

/// Concurrency-aware graph container.
///
/// Nodes and edges are created and removed concurrently by many workers.
/// Every operation that touches a node first passes the node's identity to
/// the [`ConflictGate`] with the caller's [`MethodFlag`]; a gate error means
/// the enclosing unit of work must abort and retry, and the operation has not
/// mutated anything when it returns one.
///
/// The record latches inside each slot only keep memory access sound. They
/// are held for the duration of a single read or write and never across two
/// records.
pub struct Graph<N, E, S = NodePool<N, E>> {
    pub(crate) store: S,
    pub(crate) gate: Arc<dyn ConflictGate>,
    pub(crate) direction: Direction,
    pub(crate) metrics: Arc<dyn GraphMetrics>,
    _types: PhantomData<fn() -> (N, E)>,
}

/// In-process graph backed by a [`NodePool`].
pub type LocalGraph<N, E> = Graph<N, E, NodePool<N, E>>;

impl<N: Send + Sync, E: Send + Sync> Graph<N, E, NodePool<N, E>> {
    /// Creates an empty in-process graph.
    pub fn new(options: GraphOptions) -> Self {
        let store = NodePool::new(options.segments, options.reclaim_edge_values);
        debug!(
            direction = ?options.direction,
            segments = options.segments,
            "graph.open"
        );
        Self::from_parts(
            store,
            options.direction,
            options.gate,
            options.metrics.unwrap_or_else(default_metrics),
        )
    }
}

impl<N, E, S> Graph<N, E, S>
where
    N: Send + Sync,
    E: Send + Sync,
    S: NodeStore<N, E>,
{
    pub(crate) fn from_parts(
        store: S,
        direction: Direction,
        gate: Arc<dyn ConflictGate>,
        metrics: Arc<dyn GraphMetrics>,
    ) -> Self {
        Self {
            store,
            gate,
            direction,
            metrics,
            _types: PhantomData,
        }
    }

    /// Edge orientation chosen at construction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolves a handle to its slot.
    ///
    /// # Panics
    ///
    /// Panics when the handle does not belong to this container or names a
    /// slot that has since been reused.
    #[track_caller]
    pub(crate) fn node(&self, handle: NodeHandle) -> &NodeSlot<N, E> {
        match self.store.slot(handle) {
            Some(slot) if slot.generation() == handle.generation => slot,
            Some(_) => panic!("stale node handle {handle}"),
            None => panic!("node handle {handle} does not belong to this graph"),
        }
    }

    /// Like [`Graph::node`], but a reused slot resolves to `None`.
    #[track_caller]
    pub(crate) fn node_if_current(&self, handle: NodeHandle) -> Option<&NodeSlot<N, E>> {
        match self.store.slot(handle) {
            Some(slot) => (slot.generation() == handle.generation).then_some(slot),
            None => panic!("node handle {handle} does not belong to this graph"),
        }
    }

    /// Whether `handle` names a published node that has not been removed.
    pub(crate) fn is_live(&self, handle: NodeHandle) -> bool {
        self.store
            .slot(handle)
            .is_some_and(|slot| slot.is_live_for(handle))
    }

    /// Whether `handle` names a node that is pending or published. Records
    /// pointing anywhere else are holes.
    pub(crate) fn is_present(&self, handle: NodeHandle) -> bool {
        self.store
            .slot(handle)
            .is_some_and(|slot| slot.is_present_for(handle))
    }

    pub(crate) fn acquire(&self, handle: NodeHandle, flag: MethodFlag) -> Result<()> {
        self.gate.acquire_item(&handle, flag)
    }

    /// Acquires both endpoints of an edge in ascending lock order.
    pub(crate) fn acquire_pair(
        &self,
        a: NodeHandle,
        b: NodeHandle,
        flag: MethodFlag,
    ) -> Result<()> {
        let (first, second) = if a.lock_id() <= b.lock_id() {
            (a, b)
        } else {
            (b, a)
        };
        self.acquire(first, flag)?;
        if second.lock_id() != first.lock_id() {
            self.acquire(second, flag)?;
        }
        Ok(())
    }

    /// Iterates published nodes of the whole container.
    ///
    /// The iterator is weakly consistent: nodes published or removed while
    /// it runs may or may not be visited.
    pub fn iter(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.store
            .slots()
            .filter(|slot| slot.is_active())
            .map(NodeSlot::handle)
    }

    /// Iterates published nodes in the caller's share of the container.
    pub fn local_iter(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.store
            .local_slots()
            .filter(|slot| slot.is_active())
            .map(NodeSlot::handle)
    }

    /// Number of published nodes. Linear in the number of slots.
    pub fn size(&self) -> usize {
        self.iter().count()
    }

    /// Size in bytes of one edge payload.
    pub fn size_of_edge_data(&self) -> usize {
        std::mem::size_of::<E>()
    }

    /// Writes a node's chain link, active flag, payload and out-edges.
    ///
    /// Stale out-edges are written too; the receiver decides what to keep.
    pub fn serialize_node(
        &self,
        handle: NodeHandle,
        flag: MethodFlag,
        buf: &mut SerializeBuffer,
    ) -> Result<()>
    where
        N: Codec,
        E: Codec,
    {
        let slot = self.node(handle);
        self.acquire(handle, flag)?;
        let link = match slot.link.load(Ordering::Acquire) {
            NIL => None,
            index => {
                let mut next = slot.handle();
                next.index = index;
                self.store.slot(next).map(NodeSlot::handle)
            }
        };
        slot.serialize_into(link, buf);
        Ok(())
    }

    /// Reads a node written by [`Graph::serialize_node`].
    pub fn deserialize_node(buf: &mut DeserializeBuffer<'_>) -> Result<NodeImage<N, E>>
    where
        N: Codec,
        E: Codec,
    {
        buf.deserialize()
    }
}

impl<N, E, S> fmt::Debug for Graph<N, E, S>
where
    N: fmt::Debug + Send + Sync,
    E: fmt::Debug + Send + Sync,
    S: NodeStore<N, E>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph({:?})", self.direction)?;
        for slot in self.store.slots() {
            writeln!(f, "  {slot:?}")?;
        }
        Ok(())
    }
}
