//! Identifiers, handles, and the crate-wide error type.

use std::fmt;

/// Identifier of a memory partition (one process or machine share of a graph).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct PartitionId(pub u16);

impl PartitionId {
    /// Partition used by in-process graphs.
    pub const LOCAL: PartitionId = PartitionId(0);
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Location-transparent reference to a node.
///
/// A handle names the partition the node lives in, the storage segment inside
/// that partition, the slot index inside the segment, and the generation of the
/// slot at the time the handle was minted. Slots that get reused bump their
/// generation, which lets the container detect stale handles.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeHandle {
    /// Partition owning the node.
    pub partition: PartitionId,
    /// Storage segment inside the partition.
    pub segment: u16,
    /// Slot index inside the segment.
    pub index: u32,
    /// Slot generation the handle was issued for.
    pub generation: u32,
}

impl NodeHandle {
    /// Builds a handle from its parts.
    pub const fn new(partition: PartitionId, segment: u16, index: u32, generation: u32) -> Self {
        Self {
            partition,
            segment,
            index,
            generation,
        }
    }

    /// Lock identity of the node this handle refers to.
    ///
    /// The generation is not part of the identity: a reused slot is guarded by
    /// the same lock word as its previous occupant.
    pub const fn lock_id(&self) -> LockId {
        LockId::node(self.partition, self.segment, self.index)
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}@{}",
            self.partition, self.segment, self.index, self.generation
        )
    }
}

/// Reference to a sub-graph state (one container's share of one partition).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct StateRef {
    /// Partition holding the state.
    pub partition: PartitionId,
    /// Segment of the state inside its partition.
    pub segment: u16,
}

impl StateRef {
    const NIL: u64 = u64::MAX;

    /// Packs the reference into a word suitable for atomic storage.
    pub(crate) const fn pack(self) -> u64 {
        ((self.partition.0 as u64) << 16) | self.segment as u64
    }

    /// Reverses [`StateRef::pack`]; the nil word maps to `None`.
    pub(crate) const fn unpack(word: u64) -> Option<StateRef> {
        if word == Self::NIL {
            return None;
        }
        Some(StateRef {
            partition: PartitionId((word >> 16) as u16),
            segment: word as u16,
        })
    }

    pub(crate) const fn pack_opt(state: Option<StateRef>) -> u64 {
        match state {
            Some(state) => state.pack(),
            None => Self::NIL,
        }
    }

    /// Lock identity of the state.
    pub const fn lock_id(&self) -> LockId {
        LockId::state(self.partition, self.segment)
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition, self.segment)
    }
}

/// Identity of a shared edge value cell owned by an edge factory.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CellId {
    /// Slab index.
    pub index: u32,
    /// Slab slot generation.
    pub generation: u32,
}

/// What a lock word guards.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum LockClass {
    /// A node record.
    Node,
    /// A sub-graph state.
    State,
}

/// Token keying the conflict gate's lock table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LockId {
    /// Kind of entity guarded.
    pub class: LockClass,
    /// Entity key within its class.
    pub key: u64,
}

impl LockId {
    /// Lock identity of a node slot.
    pub const fn node(partition: PartitionId, segment: u16, index: u32) -> Self {
        LockId {
            class: LockClass::Node,
            key: ((partition.0 as u64) << 48) | ((segment as u64) << 32) | index as u64,
        }
    }

    /// Lock identity of a sub-graph state.
    pub const fn state(partition: PartitionId, segment: u16) -> Self {
        LockId {
            class: LockClass::State,
            key: ((partition.0 as u64) << 16) | segment as u64,
        }
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            LockClass::Node => write!(f, "node#{:x}", self.key),
            LockClass::State => write!(f, "state#{:x}", self.key),
        }
    }
}

/// Errors surfaced by the graph container.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    /// The conflict gate asked the current unit of work to abort and retry.
    #[error("conflict on {lock}")]
    Conflict {
        /// Lock that could not be acquired.
        lock: LockId,
    },
    /// A read-only method flag was used for a write.
    #[error("write attempted with a read-only method flag")]
    ReadOnlyAccess,
    /// Serialized input was malformed.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A ring reference names a state the cluster does not know about.
    #[error("unknown sub-graph state {0}")]
    UnknownState(StateRef),
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(String),
}

impl GraphError {
    /// Whether re-executing the unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GraphError::Conflict { .. })
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
