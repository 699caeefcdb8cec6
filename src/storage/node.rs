//! Node slots, their records, and the adjacency list helpers.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use parking_lot::RwLock;

use crate::primitives::bytes::{Codec, DeserializeBuffer, SerializeBuffer};
use crate::types::{NodeHandle, PartitionId, Result};

use super::edge::{serialize_record, EdgeImage, EdgeRecord, EdgeValue};

/// Link word meaning "end of chain".
pub(crate) const NIL: u32 = u32::MAX;

const PENDING: u8 = 0;
const ACTIVE: u8 = 1;
const REMOVED: u8 = 2;

/// Payload and adjacency of one node.
pub(crate) struct NodeRecord<N, E> {
    pub(crate) data: N,
    pub(crate) edges: Vec<EdgeRecord<E>>,
    pub(crate) in_edges: Vec<EdgeRecord<E>>,
}

impl<N, E> NodeRecord<N, E> {
    fn new(data: N) -> Self {
        Self {
            data,
            edges: Vec::new(),
            in_edges: Vec::new(),
        }
    }
}

/// Position of the first live record pointing at `dst`.
pub(crate) fn find_live<E>(
    list: &[EdgeRecord<E>],
    dst: NodeHandle,
    is_live: impl Fn(NodeHandle) -> bool,
) -> Option<usize> {
    list.iter()
        .position(|record| record.dst == dst && is_live(record.dst))
}

/// Stores `record` over the first hole (a record whose far end is gone),
/// appending when there is none. Returns whether a hole was reused.
pub(crate) fn insert_with_reuse<E>(
    list: &mut Vec<EdgeRecord<E>>,
    record: EdgeRecord<E>,
    is_gone: impl Fn(NodeHandle) -> bool,
) -> bool {
    match list.iter().position(|existing| is_gone(existing.dst)) {
        Some(hole) => {
            list[hole] = record;
            true
        }
        None => {
            list.push(record);
            false
        }
    }
}

/// Removes the record sharing `value`'s cell. Order is not preserved.
pub(crate) fn erase_value<E>(
    list: &mut Vec<EdgeRecord<E>>,
    value: &EdgeValue<E>,
) -> Option<EdgeRecord<E>> {
    let at = list
        .iter()
        .position(|record| EdgeValue::ptr_eq(&record.value, value))?;
    Some(list.swap_remove(at))
}

/// Storage slot for one node.
///
/// `generation` and the lifecycle state live outside the record latch so
/// that liveness filters never block on a record being written. A slot moves
/// from pending to active on publication and from active to removed on
/// removal; only recycling takes it back to pending. `link` chains slots of a
/// distributed sub-graph state and is unused by in-process pools.
pub struct NodeSlot<N, E> {
    partition: PartitionId,
    segment: u16,
    index: u32,
    generation: AtomicU32,
    state: AtomicU8,
    pub(crate) link: AtomicU32,
    pub(crate) record: RwLock<NodeRecord<N, E>>,
}

impl<N, E> NodeSlot<N, E> {
    pub(crate) fn new(partition: PartitionId, segment: u16, index: u32, data: N) -> Self {
        Self {
            partition,
            segment,
            index,
            generation: AtomicU32::new(0),
            state: AtomicU8::new(PENDING),
            link: AtomicU32::new(NIL),
            record: RwLock::new(NodeRecord::new(data)),
        }
    }

    /// Handle naming the slot's current occupant.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle::new(self.partition, self.segment, self.index, self.generation())
    }

    /// Current slot generation.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether the occupant is published.
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    /// Whether the occupant was published and then removed.
    pub fn is_removed(&self) -> bool {
        self.state.load(Ordering::Acquire) == REMOVED
    }

    /// Whether `handle` names the current occupant and it is published.
    pub(crate) fn is_live_for(&self, handle: NodeHandle) -> bool {
        self.generation() == handle.generation && self.is_active()
    }

    /// Whether `handle` names the current occupant and it was not removed.
    pub(crate) fn is_present_for(&self, handle: NodeHandle) -> bool {
        self.generation() == handle.generation && !self.is_removed()
    }

    /// Moves a pending occupant to active. Returns false for any other state.
    pub(crate) fn publish(&self) -> bool {
        self.state
            .compare_exchange(PENDING, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves an active occupant to removed. Returns false for any other state.
    pub(crate) fn retire(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, REMOVED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Hands a removed slot to a new occupant. The link is left alone.
    pub(crate) fn recycle(&self, data: N) -> NodeHandle {
        let mut record = self.record.write();
        *record = NodeRecord::new(data);
        self.state.store(PENDING, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(record);
        self.handle()
    }

    /// Writes link, active flag, payload and out-edges in that order.
    pub(crate) fn serialize_into(&self, link: Option<NodeHandle>, buf: &mut SerializeBuffer)
    where
        N: Codec,
        E: Codec,
    {
        let record = self.record.read();
        buf.serialize(&link);
        buf.serialize(&self.is_active());
        buf.serialize(&record.data);
        buf.put_u64(record.edges.len() as u64);
        for edge in &record.edges {
            serialize_record(edge, buf);
        }
    }
}

impl<N: fmt::Debug, E: fmt::Debug> fmt::Debug for NodeSlot<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.record.read();
        write!(
            f,
            "(id: {} active: {} data: {:?} edges: [",
            self.handle(),
            self.is_active(),
            record.data
        )?;
        for edge in &record.edges {
            write!(f, "{edge:?} ")?;
        }
        f.write_str("])")
    }
}

/// Detached copy of a serialized node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeImage<N, E> {
    /// Next slot in the owning state's chain, if any.
    pub link: Option<NodeHandle>,
    /// Whether the node was published.
    pub active: bool,
    /// Payload.
    pub data: N,
    /// Out-edges in adjacency order, holes included.
    pub edges: Vec<EdgeImage<E>>,
}

impl<N: Codec, E: Codec> Codec for NodeImage<N, E> {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        buf.serialize(&self.link);
        buf.serialize(&self.active);
        buf.serialize(&self.data);
        buf.serialize(&self.edges);
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        Ok(Self {
            link: buf.deserialize()?,
            active: buf.deserialize()?,
            data: buf.deserialize()?,
            edges: buf.deserialize()?,
        })
    }
}
