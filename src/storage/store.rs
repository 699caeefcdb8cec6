//! Node storage backends.
//!
//! A [`NodeStore`] owns node slots and the edge factory of one container
//! value. The graph resolves handles through it and never frees slots on its
//! own; whether a removed slot is reused is up to the store.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::primitives::arena::Arena;
use crate::types::{NodeHandle, PartitionId};

use super::edge_factory::EdgeFactory;
use super::node::NodeSlot;

/// Backing storage for a graph container.
pub trait NodeStore<N, E>: Send + Sync {
    /// Allocates an unpublished node holding `data`.
    fn allocate(&self, data: N) -> NodeHandle;

    /// Slot at the handle's location, whatever its current generation.
    ///
    /// Returns `None` when the location does not belong to this container.
    fn slot(&self, handle: NodeHandle) -> Option<&NodeSlot<N, E>>;

    /// Offers the slot of a removed node for reuse.
    fn reclaim(&self, handle: NodeHandle);

    /// Every slot of the container, published or not.
    fn slots(&self) -> Box<dyn Iterator<Item = &NodeSlot<N, E>> + '_>;

    /// Slots in the caller's share of the container.
    fn local_slots(&self) -> Box<dyn Iterator<Item = &NodeSlot<N, E>> + '_>;

    /// Factory for shared edge value cells.
    fn edge_factory(&self) -> &EdgeFactory<E>;
}

static NEXT_WORKER: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static WORKER: usize = NEXT_WORKER.fetch_add(1, Ordering::Relaxed);
}

/// Dense id of the calling thread, assigned on first use.
pub(crate) fn current_worker() -> usize {
    WORKER.with(|worker| *worker)
}

/// In-process store: one append-only arena per segment.
///
/// Each thread inserts into the segment it was pinned to on first use, so
/// concurrent creators rarely contend on the same bucket. Slots are never
/// freed; removed nodes stay behind as tombstones.
pub struct NodePool<N, E> {
    segments: Box<[Arena<NodeSlot<N, E>>]>,
    factory: EdgeFactory<E>,
}

impl<N, E> NodePool<N, E> {
    /// Creates a pool with `segments` arenas.
    ///
    /// # Panics
    ///
    /// Panics when `segments` is zero or does not fit a handle.
    pub fn new(segments: usize, reclaim_edge_values: Option<bool>) -> Self {
        assert!(
            (1..=usize::from(u16::MAX)).contains(&segments),
            "segment count {segments} out of range"
        );
        Self {
            segments: (0..segments).map(|_| Arena::new()).collect(),
            factory: EdgeFactory::new(reclaim_edge_values),
        }
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn home(&self) -> usize {
        current_worker() % self.segments.len()
    }
}

impl<N: Send + Sync, E: Send + Sync> NodeStore<N, E> for NodePool<N, E> {
    fn allocate(&self, data: N) -> NodeHandle {
        let home = self.home();
        let segment = home as u16;
        let index = self.segments[home]
            .push_with(|index| NodeSlot::new(PartitionId::LOCAL, segment, index, data));
        NodeHandle::new(PartitionId::LOCAL, segment, index, 0)
    }

    fn slot(&self, handle: NodeHandle) -> Option<&NodeSlot<N, E>> {
        if handle.partition != PartitionId::LOCAL {
            return None;
        }
        self.segments
            .get(usize::from(handle.segment))?
            .get(handle.index)
    }

    fn reclaim(&self, _handle: NodeHandle) {}

    fn slots(&self) -> Box<dyn Iterator<Item = &NodeSlot<N, E>> + '_> {
        Box::new(
            self.segments
                .iter()
                .flat_map(|segment| segment.iter().map(|(_, slot)| slot)),
        )
    }

    fn local_slots(&self) -> Box<dyn Iterator<Item = &NodeSlot<N, E>> + '_> {
        Box::new(self.segments[self.home()].iter().map(|(_, slot)| slot))
    }

    fn edge_factory(&self) -> &EdgeFactory<E> {
        &self.factory
    }
}
