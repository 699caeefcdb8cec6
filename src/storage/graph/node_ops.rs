use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use super::Graph;
use crate::primitives::concurrency::MethodFlag;
use crate::storage::edge::EdgeRecord;
use crate::storage::node::{erase_value, NodeRecord};
use crate::storage::options::Direction;
use crate::storage::store::NodeStore;
use crate::types::{NodeHandle, Result};

impl<N, E, S> Graph<N, E, S>
where
    N: Send + Sync,
    E: Send + Sync,
    S: NodeStore<N, E>,
{
    /// Allocates an unpublished node.
    ///
    /// The node is invisible to iteration until [`Graph::add_node`] publishes
    /// it, so the caller may finish initializing it first. No gate call is
    /// made.
    pub fn create_node(&self, data: N) -> NodeHandle {
        let handle = self.store.allocate(data);
        self.metrics.node_created();
        trace!(node = %handle, "graph.create_node");
        handle
    }

    /// Publishes a node created with [`Graph::create_node`].
    ///
    /// Publishing an already published node does nothing. A removed node
    /// cannot be published again: the call is a no-op and the slot stays
    /// queued for reuse.
    pub fn add_node(&self, handle: NodeHandle, flag: MethodFlag) -> Result<()> {
        let slot = self.node(handle);
        self.gate.check_write(flag, true)?;
        self.acquire(handle, flag)?;
        if slot.publish() {
            self.metrics.node_published();
        } else if slot.is_removed() {
            debug!(node = %handle, "graph.add_node_removed");
        }
        Ok(())
    }

    /// Shared access to a node's payload.
    pub fn get_data(
        &self,
        handle: NodeHandle,
        flag: MethodFlag,
    ) -> Result<MappedRwLockReadGuard<'_, N>> {
        let slot = self.node(handle);
        self.gate.check_write(flag, false)?;
        self.acquire(handle, flag)?;
        Ok(RwLockReadGuard::map(slot.record.read(), |record| {
            &record.data
        }))
    }

    /// Exclusive access to a node's payload.
    pub fn get_data_mut(
        &self,
        handle: NodeHandle,
        flag: MethodFlag,
    ) -> Result<MappedRwLockWriteGuard<'_, N>> {
        let slot = self.node(handle);
        self.gate.check_write(flag, true)?;
        self.acquire(handle, flag)?;
        Ok(RwLockWriteGuard::map(slot.record.write(), |record| {
            &mut record.data
        }))
    }

    /// Whether the node is published and not removed.
    ///
    /// A handle whose slot has been reused reports `false`.
    pub fn contains_node(&self, handle: NodeHandle, flag: MethodFlag) -> Result<bool> {
        let slot = self.node_if_current(handle);
        self.acquire(handle, flag)?;
        Ok(slot.is_some_and(|slot| slot.is_live_for(handle)))
    }

    /// Removes a published node and all of its edges.
    ///
    /// On undirected and bidirectional graphs the mirror records held by
    /// neighbors are erased too, which requires every neighbor that is not
    /// itself removed to pass the gate. On directed graphs edges pointing at the node from elsewhere
    /// stay behind as holes that iteration skips and insertion reuses.
    /// Removing a node that is not published is a no-op.
    pub fn remove_node(&self, handle: NodeHandle, flag: MethodFlag) -> Result<()> {
        let Some(slot) = self.node_if_current(handle) else {
            return Ok(());
        };
        self.gate.check_write(flag, true)?;
        self.acquire(handle, flag)?;
        if !slot.is_active() {
            return Ok(());
        }

        let (out_edges, in_edges) = {
            let record = slot.record.read();
            (record.edges.clone(), record.in_edges.clone())
        };
        if self.direction.is_mirrored() {
            for edge in out_edges.iter().chain(&in_edges) {
                if edge.dst != handle && self.is_present(edge.dst) {
                    self.acquire(edge.dst, flag)?;
                }
            }
        }

        if !slot.retire() {
            return Ok(());
        }
        match self.direction {
            Direction::Directed => {}
            Direction::Undirected => {
                for edge in &out_edges {
                    self.erase_mirror(handle, edge, |record| &mut record.edges);
                }
            }
            Direction::Bidirectional => {
                for edge in &out_edges {
                    self.erase_mirror(handle, edge, |record| &mut record.in_edges);
                }
                for edge in &in_edges {
                    self.erase_mirror(handle, edge, |record| &mut record.edges);
                }
            }
        }
        {
            let mut record = slot.record.write();
            record.edges.clear();
            record.in_edges.clear();
        }

        // Self-loops on bidirectional graphs share one cell between the
        // out-record and the in-record; release it through the out-record.
        let factory = self.store.edge_factory();
        let cells = out_edges
            .iter()
            .chain(in_edges.iter().filter(|edge| edge.dst != handle))
            .filter_map(|edge| edge.cell);
        let mut released = 0usize;
        for cell in cells {
            if factory.release(cell) {
                self.metrics.edge_cell_released();
                released += 1;
            }
        }

        self.store.reclaim(handle);
        self.metrics.node_removed();
        debug!(
            node = %handle,
            out_edges = out_edges.len(),
            in_edges = in_edges.len(),
            released,
            "graph.remove_node"
        );
        Ok(())
    }

    /// Erases the record mirroring `edge` from the far endpoint's list.
    fn erase_mirror(
        &self,
        owner: NodeHandle,
        edge: &EdgeRecord<E>,
        list: impl FnOnce(&mut NodeRecord<N, E>) -> &mut Vec<EdgeRecord<E>>,
    ) {
        if edge.dst == owner || !self.is_present(edge.dst) {
            return;
        }
        if let Some(neighbor) = self.store.slot(edge.dst) {
            let mut record = neighbor.record.write();
            erase_value(list(&mut *record), &edge.value);
        }
    }
}
