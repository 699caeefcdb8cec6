//! Edge records and the shared values they point at.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::primitives::bytes::{Codec, DeserializeBuffer, SerializeBuffer};
use crate::types::{CellId, NodeHandle, Result};

/// Shared cell holding an edge's payload.
///
/// Directed edges own their cell alone. Undirected and bidirectional edges
/// share one cell between the record on the source and the mirror record on
/// the destination, so a write through either endpoint is visible from both.
pub struct EdgeValue<E> {
    cell: Arc<RwLock<E>>,
}

impl<E> Clone for EdgeValue<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<E> EdgeValue<E> {
    /// Wraps `value` in a fresh, unshared cell.
    pub fn new(value: E) -> Self {
        Self {
            cell: Arc::new(RwLock::new(value)),
        }
    }

    /// Shared access to the payload.
    pub fn read(&self) -> RwLockReadGuard<'_, E> {
        self.cell.read()
    }

    /// Exclusive access to the payload.
    pub fn write(&self) -> RwLockWriteGuard<'_, E> {
        self.cell.write()
    }

    /// Whether both values point at the same cell.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.cell, &b.cell)
    }
}

impl<E: fmt::Debug> fmt::Debug for EdgeValue<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.try_read() {
            Some(value) => fmt::Debug::fmt(&*value, f),
            None => f.write_str("<locked>"),
        }
    }
}

/// One entry of a node's adjacency list.
///
/// `dst` is the far endpoint: the destination for out-lists and the source
/// for in-lists and undirected mirrors. `cell` is set when the value was
/// allocated from an edge factory and must be released through it.
pub(crate) struct EdgeRecord<E> {
    pub(crate) dst: NodeHandle,
    pub(crate) value: EdgeValue<E>,
    pub(crate) cell: Option<CellId>,
}

impl<E> Clone for EdgeRecord<E> {
    fn clone(&self) -> Self {
        Self {
            dst: self.dst,
            value: self.value.clone(),
            cell: self.cell,
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for EdgeRecord<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{{Edge: dst: {} val: {:?}}}>", self.dst, self.value)
    }
}

/// Edge as handed to callers: both endpoints plus the shared value cell.
///
/// An `EdgeRef` is a snapshot. It stays usable after the edge is removed;
/// its value cell simply stops being reachable from the graph.
pub struct EdgeRef<E> {
    pub(crate) src: NodeHandle,
    pub(crate) dst: NodeHandle,
    pub(crate) value: EdgeValue<E>,
}

impl<E> Clone for EdgeRef<E> {
    fn clone(&self) -> Self {
        Self {
            src: self.src,
            dst: self.dst,
            value: self.value.clone(),
        }
    }
}

impl<E> EdgeRef<E> {
    /// Node whose adjacency list holds the edge.
    pub fn src(&self) -> NodeHandle {
        self.src
    }

    /// Destination node.
    pub fn dst(&self) -> NodeHandle {
        self.dst
    }

    /// The shared value cell, bypassing the conflict gate.
    pub fn value(&self) -> &EdgeValue<E> {
        &self.value
    }

    /// Whether two references name the same edge.
    pub fn same_edge(&self, other: &Self) -> bool {
        EdgeValue::ptr_eq(&self.value, &other.value)
    }
}

impl<E: fmt::Debug> fmt::Debug for EdgeRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeRef")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("value", &self.value)
            .finish()
    }
}

/// Detached copy of an adjacency entry, produced by node deserialization.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeImage<E> {
    /// Far endpoint.
    pub dst: NodeHandle,
    /// Payload.
    pub value: E,
}

impl<E: Codec> Codec for EdgeImage<E> {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        buf.serialize(&self.dst);
        buf.serialize(&self.value);
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        let dst = buf.deserialize()?;
        let value = buf.deserialize()?;
        Ok(Self { dst, value })
    }
}

/// Writes a live record with the same layout as [`EdgeImage`].
pub(crate) fn serialize_record<E: Codec>(record: &EdgeRecord<E>, buf: &mut SerializeBuffer) {
    buf.serialize(&record.dst);
    buf.serialize(&*record.value.read());
}
