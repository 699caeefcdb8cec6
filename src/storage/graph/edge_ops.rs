use std::vec;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use super::Graph;
use crate::primitives::concurrency::MethodFlag;
use crate::storage::edge::{EdgeRecord, EdgeRef, EdgeValue};
use crate::storage::node::{erase_value, find_live, insert_with_reuse, NodeRecord};
use crate::storage::options::Direction;
use crate::storage::store::NodeStore;
use crate::types::{GraphError, NodeHandle, Result};

impl<N, E, S> Graph<N, E, S>
where
    N: Send + Sync,
    E: Send + Sync,
    S: NodeStore<N, E>,
{
    /// Adds an edge from `src` to `dst` unless a live one already exists.
    ///
    /// A new edge starts with `E::default()`. When an edge to `dst` already
    /// exists it is returned untouched, even while `dst` is unpublished.
    /// Adding an edge to or from a removed node is an `InvalidArgument`.
    pub fn add_edge(&self, src: NodeHandle, dst: NodeHandle, flag: MethodFlag) -> Result<EdgeRef<E>>
    where
        E: Default,
    {
        self.insert_edge(src, dst, flag, E::default, true)
    }

    /// Like [`Graph::add_edge`], with `value` as the payload of a new edge.
    pub fn add_edge_with(
        &self,
        src: NodeHandle,
        dst: NodeHandle,
        flag: MethodFlag,
        value: E,
    ) -> Result<EdgeRef<E>> {
        self.insert_edge(src, dst, flag, || value, true)
    }

    /// Adds an edge even when one between the same endpoints exists.
    pub fn add_multi_edge(
        &self,
        src: NodeHandle,
        dst: NodeHandle,
        flag: MethodFlag,
        value: E,
    ) -> Result<EdgeRef<E>> {
        self.insert_edge(src, dst, flag, || value, false)
    }

    fn insert_edge(
        &self,
        src: NodeHandle,
        dst: NodeHandle,
        flag: MethodFlag,
        value: impl FnOnce() -> E,
        dedup: bool,
    ) -> Result<EdgeRef<E>> {
        let src_slot = self.node(src);
        let dst_slot = self.node(dst);
        self.gate.check_write(flag, true)?;
        match self.direction {
            Direction::Directed => self.acquire(src, flag)?,
            Direction::Undirected | Direction::Bidirectional => {
                self.acquire_pair(src, dst, flag)?
            }
        }

        if src_slot.is_removed() || dst_slot.is_removed() {
            return Err(GraphError::InvalidArgument("edge endpoint was removed"));
        }

        // Records towards pending nodes are kept: their mirrors already sit
        // on the pending side and become visible on publication.
        let is_present = |handle| self.is_present(handle);
        if dedup {
            let record = src_slot.record.read();
            if let Some(at) = find_live(&record.edges, dst, is_present) {
                return Ok(EdgeRef {
                    src,
                    dst,
                    value: record.edges[at].value.clone(),
                });
            }
        }

        let (cell, value) = match self.direction {
            Direction::Directed => (None, EdgeValue::new(value())),
            Direction::Undirected | Direction::Bidirectional => {
                self.store.edge_factory().alloc(value())
            }
        };
        let insert = |list: &mut Vec<EdgeRecord<E>>, record: EdgeRecord<E>| {
            if dedup {
                insert_with_reuse(list, record, |handle| !is_present(handle))
            } else {
                list.push(record);
                false
            }
        };

        let mut reused = false;
        let mirrored = match self.direction {
            Direction::Directed => false,
            Direction::Undirected => src != dst,
            Direction::Bidirectional => true,
        };
        if mirrored {
            let mirror = EdgeRecord {
                dst: src,
                value: value.clone(),
                cell,
            };
            let mut record = dst_slot.record.write();
            reused |= insert(self.mirror_list(&mut record), mirror);
        }
        {
            let forward = EdgeRecord {
                dst,
                value: value.clone(),
                cell,
            };
            let mut record = src_slot.record.write();
            reused |= insert(&mut record.edges, forward);
        }

        self.metrics.edge_created();
        if reused {
            self.metrics.hole_reused();
        }
        trace!(%src, %dst, reused, "graph.add_edge");
        Ok(EdgeRef { src, dst, value })
    }

    /// List on the destination that mirrors a source's out-list.
    fn mirror_list<'r>(&self, record: &'r mut NodeRecord<N, E>) -> &'r mut Vec<EdgeRecord<E>> {
        match self.direction {
            Direction::Bidirectional => &mut record.in_edges,
            Direction::Directed | Direction::Undirected => &mut record.edges,
        }
    }

    /// Removes the edge `edge` from `src`.
    ///
    /// Removing an edge that is already gone is a no-op.
    ///
    /// # Panics
    ///
    /// Panics when `edge` does not start at `src`.
    pub fn remove_edge(&self, src: NodeHandle, edge: &EdgeRef<E>, flag: MethodFlag) -> Result<()> {
        assert_eq!(
            edge.src, src,
            "edge {} -> {} does not start at {src}",
            edge.src, edge.dst
        );
        let Some(src_slot) = self.node_if_current(src) else {
            return Ok(());
        };
        self.gate.check_write(flag, true)?;
        match self.direction {
            Direction::Directed => self.acquire(src, flag)?,
            Direction::Undirected | Direction::Bidirectional => {
                self.acquire_pair(src, edge.dst, flag)?
            }
        }

        let removed = erase_value(&mut src_slot.record.write().edges, &edge.value);
        let Some(removed) = removed else {
            return Ok(());
        };
        let mirrored = match self.direction {
            Direction::Directed => false,
            Direction::Undirected => edge.dst != src,
            Direction::Bidirectional => true,
        };
        if mirrored {
            if let Some(dst_slot) = self.node_if_current(edge.dst) {
                let mut record = dst_slot.record.write();
                erase_value(self.mirror_list(&mut record), &edge.value);
            }
        }
        if let Some(cell) = removed.cell {
            if self.store.edge_factory().release(cell) {
                self.metrics.edge_cell_released();
            }
        }

        self.metrics.edge_removed();
        trace!(%src, dst = %edge.dst, "graph.remove_edge");
        Ok(())
    }

    /// Looks up a live edge from `src` to `dst`.
    pub fn find_edge(
        &self,
        src: NodeHandle,
        dst: NodeHandle,
        flag: MethodFlag,
    ) -> Result<Option<EdgeRef<E>>> {
        let slot = self.node(src);
        self.acquire(src, flag)?;
        let record = slot.record.read();
        let found = find_live(&record.edges, dst, |handle| self.is_live(handle));
        Ok(found.map(|at| EdgeRef {
            src,
            dst,
            value: record.edges[at].value.clone(),
        }))
    }

    /// Destination of an edge.
    pub fn get_edge_dst(&self, edge: &EdgeRef<E>) -> NodeHandle {
        edge.dst
    }

    /// Shared access to an edge's payload, gated on the edge's owner.
    ///
    /// Pass [`MethodFlag::None`] when the owner was already acquired, e.g.
    /// by [`Graph::edges`].
    pub fn get_edge_data<'e>(
        &self,
        edge: &'e EdgeRef<E>,
        flag: MethodFlag,
    ) -> Result<RwLockReadGuard<'e, E>> {
        self.gate.check_write(flag, false)?;
        self.acquire(edge.src, flag)?;
        Ok(edge.value.read())
    }

    /// Exclusive access to an edge's payload, gated on the edge's owner.
    pub fn get_edge_data_mut<'e>(
        &self,
        edge: &'e EdgeRef<E>,
        flag: MethodFlag,
    ) -> Result<RwLockWriteGuard<'e, E>> {
        self.gate.check_write(flag, true)?;
        self.acquire(edge.src, flag)?;
        Ok(edge.value.write())
    }

    /// Iterates the live out-edges of `node`.
    ///
    /// With [`MethodFlag::All`] every live neighbor is acquired before the
    /// iterator is returned. The adjacency list is snapshotted at the call.
    pub fn edges(&self, node: NodeHandle, flag: MethodFlag) -> Result<EdgeIter<'_, N, E, S>> {
        let slot = self.node(node);
        self.acquire(node, flag)?;
        let records = slot.record.read().edges.clone();
        self.open_edges(node, flag, records, false)
    }

    /// Iterates the live in-edges of `node`.
    ///
    /// Undirected graphs report the same edges as [`Graph::edges`]. Directed
    /// graphs keep no in-edge index and return an error.
    pub fn in_edges(&self, node: NodeHandle, flag: MethodFlag) -> Result<EdgeIter<'_, N, E, S>> {
        match self.direction {
            Direction::Directed => Err(GraphError::InvalidArgument(
                "directed graphs keep no in-edge index",
            )),
            Direction::Undirected => self.edges(node, flag),
            Direction::Bidirectional => {
                let slot = self.node(node);
                self.acquire(node, flag)?;
                let records = slot.record.read().in_edges.clone();
                self.open_edges(node, flag, records, true)
            }
        }
    }

    fn open_edges(
        &self,
        node: NodeHandle,
        flag: MethodFlag,
        records: Vec<EdgeRecord<E>>,
        incoming: bool,
    ) -> Result<EdgeIter<'_, N, E, S>> {
        if flag.locks_neighbors() {
            for record in &records {
                if self.is_live(record.dst) {
                    self.acquire(record.dst, flag)?;
                }
            }
        }
        Ok(EdgeIter {
            graph: self,
            node,
            incoming,
            records: records.into_iter(),
        })
    }
}

/// Iterator over the live edges of one node.
///
/// Liveness of each destination is checked as the iterator advances, so a
/// neighbor removed mid-iteration is skipped.
pub struct EdgeIter<'g, N, E, S> {
    graph: &'g Graph<N, E, S>,
    node: NodeHandle,
    incoming: bool,
    records: vec::IntoIter<EdgeRecord<E>>,
}

impl<N, E, S> Iterator for EdgeIter<'_, N, E, S>
where
    N: Send + Sync,
    E: Send + Sync,
    S: NodeStore<N, E>,
{
    type Item = EdgeRef<E>;

    fn next(&mut self) -> Option<EdgeRef<E>> {
        loop {
            let record = self.records.next()?;
            if !self.graph.is_live(record.dst) {
                continue;
            }
            let (src, dst) = if self.incoming {
                (record.dst, self.node)
            } else {
                (self.node, record.dst)
            };
            return Some(EdgeRef {
                src,
                dst,
                value: record.value,
            });
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.records.len()))
    }
}
