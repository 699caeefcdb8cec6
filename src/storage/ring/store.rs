use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::trace;

use super::state::{Cluster, SubGraphState};
use crate::storage::edge_factory::EdgeFactory;
use crate::storage::node::{NodeSlot, NIL};
use crate::storage::store::NodeStore;
use crate::types::{NodeHandle, StateRef};

/// Node store of one partition's view of a distributed container.
///
/// Nodes are created in the local state and pushed on the front of its chain.
/// Global iteration walks the master's chain, then every other state in ring
/// order; local iteration walks only the local chain. Slots of removed nodes
/// are handed back to their owning state and reused by its next allocation.
pub struct RingStore<N, E> {
    cluster: Arc<Cluster<N, E>>,
    local: Arc<SubGraphState<N, E>>,
    master: Arc<SubGraphState<N, E>>,
}

impl<N, E> RingStore<N, E> {
    pub(crate) fn new(
        cluster: Arc<Cluster<N, E>>,
        local: Arc<SubGraphState<N, E>>,
        master: Arc<SubGraphState<N, E>>,
    ) -> Self {
        Self {
            cluster,
            local,
            master,
        }
    }

    /// The cluster the container lives in.
    pub fn cluster(&self) -> &Arc<Cluster<N, E>> {
        &self.cluster
    }

    /// This partition's state.
    pub fn local_state(&self) -> &SubGraphState<N, E> {
        &self.local
    }

    /// The ring's master state.
    pub fn master_state(&self) -> &SubGraphState<N, E> {
        &self.master
    }

    /// States of the ring, master first.
    pub fn states(&self) -> impl Iterator<Item = &SubGraphState<N, E>> + '_ {
        let mut cursor = Some(&*self.master);
        std::iter::from_fn(move || {
            let state = cursor?;
            cursor = state
                .next()
                .and_then(|next| self.cluster.state(next))
                .map(|next| &**next);
            Some(state)
        })
    }

    /// Resolves a state of this ring, rejecting states of other containers.
    fn ring_state(&self, state: StateRef) -> Option<&SubGraphState<N, E>> {
        let resolved = self.cluster.state(state)?;
        (resolved.master() == self.master.id()).then_some(&**resolved)
    }
}

fn chain<N, E>(state: &SubGraphState<N, E>) -> impl Iterator<Item = &NodeSlot<N, E>> + '_ {
    let mut cursor = state.head.load(Ordering::Acquire);
    std::iter::from_fn(move || {
        if cursor == NIL {
            return None;
        }
        let slot = state.nodes.get(cursor)?;
        cursor = slot.link.load(Ordering::Acquire);
        Some(slot)
    })
}

impl<N: Send + Sync, E: Send + Sync> NodeStore<N, E> for RingStore<N, E> {
    fn allocate(&self, data: N) -> NodeHandle {
        let state = &*self.local;
        let recycled = state.reclaimed.lock().pop();
        if let Some(slot) = recycled.and_then(|index| state.nodes.get(index)) {
            let handle = slot.recycle(data);
            trace!(node = %handle, "ring.reuse_slot");
            return handle;
        }

        let StateRef { partition, segment } = state.id();
        let index = state
            .nodes
            .push_with(|index| NodeSlot::new(partition, segment, index, data));
        let Some(slot) = state.nodes.get(index) else {
            unreachable!("slot {index} missing after push");
        };
        let mut head = state.head.load(Ordering::Acquire);
        loop {
            slot.link.store(head, Ordering::Relaxed);
            match state
                .head
                .compare_exchange_weak(head, index, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        NodeHandle::new(partition, segment, index, 0)
    }

    fn slot(&self, handle: NodeHandle) -> Option<&NodeSlot<N, E>> {
        let state = self.ring_state(StateRef {
            partition: handle.partition,
            segment: handle.segment,
        })?;
        state.nodes.get(handle.index)
    }

    fn reclaim(&self, handle: NodeHandle) {
        let owner = StateRef {
            partition: handle.partition,
            segment: handle.segment,
        };
        if let Some(state) = self.ring_state(owner) {
            state.reclaimed.lock().push(handle.index);
        }
    }

    fn slots(&self) -> Box<dyn Iterator<Item = &NodeSlot<N, E>> + '_> {
        Box::new(self.states().flat_map(chain))
    }

    fn local_slots(&self) -> Box<dyn Iterator<Item = &NodeSlot<N, E>> + '_> {
        Box::new(chain(&*self.local))
    }

    fn edge_factory(&self) -> &EdgeFactory<E> {
        &self.master.factory
    }
}
