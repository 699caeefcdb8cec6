//! Distributed variant of the graph container.
//!
//! A container value is created on one partition, which holds the ring's
//! master state. Sending the value to another partition writes only the
//! master reference; receiving it creates a state on the receiving partition
//! and splices it into the ring right after the master. Every partition's
//! view iterates the nodes of all states.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::primitives::bytes::{DeserializeBuffer, SerializeBuffer};
use crate::primitives::concurrency::{ConflictGate, MethodFlag, NoGate};
use crate::types::{GraphError, PartitionId, Result, StateRef};

use super::graph::Graph;
use super::metrics::{default_metrics, GraphMetrics};
use super::options::GraphOptions;

mod state;
mod store;

pub use state::{Cluster, SubGraphState};
pub use store::RingStore;

/// Graph container whose nodes are spread over the partitions of a cluster.
pub type DistGraph<N, E> = Graph<N, E, RingStore<N, E>>;

/// What a partition supplies when it constructs or receives a container:
/// the cluster, its own partition id, and its runtime services.
pub struct PartitionCtx<N, E> {
    cluster: Arc<Cluster<N, E>>,
    partition: PartitionId,
    gate: Arc<dyn ConflictGate>,
    metrics: Arc<dyn GraphMetrics>,
}

impl<N, E> Clone for PartitionCtx<N, E> {
    fn clone(&self) -> Self {
        Self {
            cluster: Arc::clone(&self.cluster),
            partition: self.partition,
            gate: Arc::clone(&self.gate),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<N, E> PartitionCtx<N, E> {
    /// Context for `partition` with no conflict detection and no metrics.
    ///
    /// # Panics
    ///
    /// Panics when the cluster has no such partition.
    pub fn new(cluster: Arc<Cluster<N, E>>, partition: PartitionId) -> Self {
        assert!(
            partition.0 < cluster.partitions(),
            "partition {partition} is not part of the cluster"
        );
        Self {
            cluster,
            partition,
            gate: Arc::new(NoGate),
            metrics: default_metrics(),
        }
    }

    /// Sets the conflict gate used by graphs opened through this context.
    pub fn with_gate(mut self, gate: Arc<dyn ConflictGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Sets the metrics sink used by graphs opened through this context.
    pub fn with_metrics(mut self, metrics: Arc<dyn GraphMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The cluster.
    pub fn cluster(&self) -> &Arc<Cluster<N, E>> {
        &self.cluster
    }

    /// The partition this context stands for.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }
}

impl<N: Send + Sync, E: Send + Sync> Graph<N, E, RingStore<N, E>> {
    /// Creates an empty container whose master state lives on the context's
    /// partition.
    ///
    /// Direction and edge value reclamation come from `options`; the gate
    /// and metrics come from the context. `options.segments` does not apply.
    pub fn new(ctx: &PartitionCtx<N, E>, options: GraphOptions) -> Self {
        let master = ctx.cluster.create_state(
            ctx.partition,
            None,
            options.direction,
            options.reclaim_edge_values,
        );
        debug!(state = %master.id(), direction = ?options.direction, "ring.open");
        let store = RingStore::new(Arc::clone(&ctx.cluster), Arc::clone(&master), master);
        Self::from_parts(
            store,
            options.direction,
            Arc::clone(&ctx.gate),
            Arc::clone(&ctx.metrics),
        )
    }

    /// Reference to the ring's master state.
    pub fn master(&self) -> StateRef {
        self.store.master_state().id()
    }

    /// Partition this view of the container belongs to.
    pub fn partition(&self) -> PartitionId {
        self.store.local_state().id().partition
    }

    /// Writes the container value. Only the master reference travels.
    pub fn serialize(&self, buf: &mut SerializeBuffer) {
        buf.serialize(&self.master());
    }

    /// Receives a container value on the context's partition.
    ///
    /// The first arrival on a partition creates a state there and splices it
    /// into the ring after the master; later arrivals reuse that state, even
    /// when they race the first one.
    pub fn deserialize(buf: &mut DeserializeBuffer<'_>, ctx: &PartitionCtx<N, E>) -> Result<Self> {
        let master_ref: StateRef = buf.deserialize()?;
        let master = Arc::clone(
            ctx.cluster
                .state(master_ref)
                .ok_or(GraphError::UnknownState(master_ref))?,
        );
        if !master.is_master() {
            return Err(GraphError::Corruption("ring reference does not name a master"));
        }
        ctx.gate.acquire_item(&*master, MethodFlag::Write)?;

        let local = {
            let _joining = master.joining.lock();
            match member_on(&ctx.cluster, &master, ctx.partition) {
                Some(local) => local,
                None => {
                    let local = ctx.cluster.create_state(
                        ctx.partition,
                        Some(master_ref),
                        master.direction(),
                        None,
                    );
                    splice(&master, &local);
                    ctx.metrics.ring_spliced();
                    debug!(state = %local.id(), master = %master_ref, "ring.splice");
                    local
                }
            }
        };

        let direction = master.direction();
        let store = RingStore::new(Arc::clone(&ctx.cluster), local, master);
        Ok(Self::from_parts(
            store,
            direction,
            Arc::clone(&ctx.gate),
            Arc::clone(&ctx.metrics),
        ))
    }
}

/// The state of `master`'s ring that lives on `partition`, if any.
fn member_on<N, E>(
    cluster: &Cluster<N, E>,
    master: &Arc<SubGraphState<N, E>>,
    partition: PartitionId,
) -> Option<Arc<SubGraphState<N, E>>> {
    let mut cursor = Some(Arc::clone(master));
    while let Some(state) = cursor {
        if state.id().partition == partition {
            return Some(state);
        }
        cursor = state.next().and_then(|next| cluster.state(next)).cloned();
    }
    None
}

/// Links `state` into the ring right after `master`.
fn splice<N, E>(master: &SubGraphState<N, E>, state: &SubGraphState<N, E>) {
    let packed = state.id().pack();
    let mut current = master.next.load(Ordering::Acquire);
    loop {
        state.next.store(current, Ordering::Release);
        match master
            .next
            .compare_exchange_weak(current, packed, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}
