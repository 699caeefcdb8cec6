use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::primitives::arena::Arena;
use crate::primitives::bytes::SerializeBuffer;
use crate::primitives::concurrency::Lockable;
use crate::storage::edge_factory::EdgeFactory;
use crate::storage::node::{NodeSlot, NIL};
use crate::storage::options::Direction;
use crate::types::{LockId, PartitionId, StateRef};

/// One container's share of one partition.
///
/// States of the same container form a ring rooted at the master: the master
/// is created with the container, every other state is spliced in right after
/// the master when the container value first reaches its partition.
pub struct SubGraphState<N, E> {
    id: StateRef,
    master: StateRef,
    direction: Direction,
    pub(crate) head: AtomicU32,
    pub(crate) next: AtomicU64,
    pub(crate) nodes: Arena<NodeSlot<N, E>>,
    pub(crate) reclaimed: Mutex<Vec<u32>>,
    // Held on the master while a partition finds or creates its state.
    pub(crate) joining: Mutex<()>,
    // Only the master's factory hands out cells.
    pub(crate) factory: EdgeFactory<E>,
}

impl<N, E> SubGraphState<N, E> {
    /// Reference naming this state.
    pub fn id(&self) -> StateRef {
        self.id
    }

    /// Master of the ring this state belongs to.
    pub fn master(&self) -> StateRef {
        self.master
    }

    /// Whether this state is its ring's master.
    pub fn is_master(&self) -> bool {
        self.id == self.master
    }

    /// Edge orientation of the container.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Next state in the ring.
    pub fn next(&self) -> Option<StateRef> {
        StateRef::unpack(self.next.load(Ordering::Acquire))
    }

    /// Head of the node chain, `None` when empty.
    pub fn head(&self) -> Option<u32> {
        match self.head.load(Ordering::Acquire) {
            NIL => None,
            index => Some(index),
        }
    }

    /// Number of node slots ever allocated in this state.
    pub fn slot_count(&self) -> u32 {
        self.nodes.len()
    }

    /// Writes head, next and master in that order.
    pub fn serialize_fields(&self, buf: &mut SerializeBuffer) {
        buf.serialize(&self.head());
        buf.serialize(&self.next());
        buf.serialize(&self.master);
    }
}

impl<N, E> Lockable for SubGraphState<N, E> {
    fn lock_id(&self) -> LockId {
        self.id.lock_id()
    }
}

/// Stand-in for the runtime that makes node handles location transparent.
///
/// A cluster is a fixed set of partitions. Each partition holds the
/// sub-graph states created on it; any thread can resolve any [`StateRef`].
pub struct Cluster<N, E> {
    partitions: Box<[Arena<Arc<SubGraphState<N, E>>>]>,
}

impl<N, E> Cluster<N, E> {
    /// Creates a cluster of `partitions` empty partitions.
    ///
    /// # Panics
    ///
    /// Panics when `partitions` is zero.
    pub fn new(partitions: u16) -> Arc<Self> {
        assert!(partitions > 0, "a cluster needs at least one partition");
        Arc::new(Self {
            partitions: (0..partitions).map(|_| Arena::new()).collect(),
        })
    }

    /// Number of partitions.
    pub fn partitions(&self) -> u16 {
        self.partitions.len() as u16
    }

    /// Resolves a state reference.
    pub fn state(&self, state: StateRef) -> Option<&Arc<SubGraphState<N, E>>> {
        self.partitions
            .get(usize::from(state.partition.0))?
            .get(u32::from(state.segment))
    }

    /// Creates a state on `partition`. A state without a master becomes the
    /// master of a new ring.
    #[track_caller]
    pub(crate) fn create_state(
        &self,
        partition: PartitionId,
        master: Option<StateRef>,
        direction: Direction,
        reclaim_edge_values: Option<bool>,
    ) -> Arc<SubGraphState<N, E>> {
        let Some(arena) = self.partitions.get(usize::from(partition.0)) else {
            panic!("partition {partition} is not part of the cluster");
        };
        let mut created = None;
        arena.push_with(|index| {
            let segment = u16::try_from(index)
                .unwrap_or_else(|_| panic!("partition {partition} has no state slots left"));
            let id = StateRef { partition, segment };
            let state = Arc::new(SubGraphState {
                id,
                master: master.unwrap_or(id),
                direction,
                head: AtomicU32::new(NIL),
                next: AtomicU64::new(StateRef::pack_opt(None)),
                nodes: Arena::new(),
                reclaimed: Mutex::new(Vec::new()),
                joining: Mutex::new(()),
                factory: EdgeFactory::new(reclaim_edge_values),
            });
            created = Some(Arc::clone(&state));
            state
        });
        let Some(state) = created else {
            unreachable!("arena did not build the state");
        };
        trace!(state = %state.id, master = %state.master, "ring.create_state");
        state
    }
}
