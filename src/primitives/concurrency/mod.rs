//! Conflict gate contract and a lock-table implementation of it.
//!
//! The graph container never serializes units of work itself. Every entry point
//! reports the nodes it is about to touch to a [`ConflictGate`], which either
//! grants the access, blocks, or asks the caller to abort and retry.

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::types::{GraphError, LockId, NodeHandle, Result, StateRef};

/// Locking mode requested by a container call.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodFlag {
    /// Skip the gate entirely.
    None,
    /// Register read intent.
    Read,
    /// Register write intent.
    Write,
    /// Full protocol: exclusive access, and traversals lock their neighbors.
    #[default]
    All,
}

impl MethodFlag {
    /// Whether the gate is consulted at all.
    pub fn locks(self) -> bool {
        self != MethodFlag::None
    }

    /// Whether the lock must be exclusive.
    pub fn exclusive(self) -> bool {
        matches!(self, MethodFlag::Write | MethodFlag::All)
    }

    /// Whether edge traversals pre-acquire every live neighbor.
    pub fn locks_neighbors(self) -> bool {
        self == MethodFlag::All
    }
}

/// Entities the gate can key its lock table by.
pub trait Lockable {
    /// Identity token of the entity.
    fn lock_id(&self) -> LockId;
}

impl Lockable for NodeHandle {
    fn lock_id(&self) -> LockId {
        NodeHandle::lock_id(self)
    }
}

impl Lockable for StateRef {
    fn lock_id(&self) -> LockId {
        StateRef::lock_id(self)
    }
}

/// Advisory conflict detection supplied by the surrounding runtime.
pub trait ConflictGate: Send + Sync {
    /// Registers intent to access `lock` under `flag`.
    ///
    /// Returns [`GraphError::Conflict`] when the enclosing unit of work must
    /// abort and be re-executed.
    fn acquire(&self, lock: LockId, flag: MethodFlag) -> Result<()>;

    /// Registers intent to access `item` under `flag`.
    fn acquire_item(&self, item: &dyn Lockable, flag: MethodFlag) -> Result<()> {
        self.acquire(item.lock_id(), flag)
    }

    /// Validates that `flag` permits the access kind of the operation.
    fn check_write(&self, flag: MethodFlag, is_write: bool) -> Result<()> {
        if is_write && flag == MethodFlag::Read {
            return Err(GraphError::ReadOnlyAccess);
        }
        Ok(())
    }
}

/// Gate that grants everything. Suitable for single-threaded use.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoGate;

impl ConflictGate for NoGate {
    fn acquire(&self, _lock: LockId, _flag: MethodFlag) -> Result<()> {
        Ok(())
    }
}

/// What [`LockTable`] does when a lock is held by another unit of work.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum GatePolicy {
    /// Report a conflict immediately (speculative execution).
    #[default]
    Abort,
    /// Block until the lock frees up, reporting a conflict after `timeout`.
    Wait {
        /// Longest time to wait for one lock.
        #[serde(rename = "timeout_ms", with = "millis")]
        timeout: Duration,
    },
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        u64::deserialize(de).map(Duration::from_millis)
    }
}

#[derive(Default, Debug)]
struct LockEntry {
    writer: Option<ThreadId>,
    readers: SmallVec<[ThreadId; 4]>,
}

impl LockEntry {
    fn grantable(&self, me: ThreadId, exclusive: bool) -> bool {
        let writer_ok = self.writer.map_or(true, |owner| owner == me);
        if !exclusive {
            return writer_ok;
        }
        writer_ok && self.readers.iter().all(|reader| *reader == me)
    }

    fn grant(&mut self, me: ThreadId, exclusive: bool) {
        if exclusive {
            self.writer = Some(me);
        } else if !self.readers.contains(&me) {
            self.readers.push(me);
        }
    }

    fn release(&mut self, me: ThreadId) {
        if self.writer == Some(me) {
            self.writer = None;
        }
        self.readers.retain(|reader| *reader != me);
    }

    fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

#[derive(Default)]
struct TableState {
    locks: FxHashMap<LockId, LockEntry>,
    units: FxHashMap<ThreadId, Vec<LockId>>,
}

/// Snapshot of lock table occupancy for observability.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct LockSnapshot {
    /// Lock words currently held by at least one unit.
    pub held: usize,
    /// Units of work currently open.
    pub units: usize,
}

/// Reference conflict gate: shared/exclusive lock words owned by units of work.
///
/// A unit of work is bound to the thread that opened it with
/// [`LockTable::begin_unit`]. Locks acquired by that thread are held until the
/// returned [`UnitOfWork`] is dropped. Acquisitions from a thread without an
/// open unit are granted without being recorded, matching calls made outside
/// of any parallel section.
pub struct LockTable {
    policy: GatePolicy,
    state: Mutex<TableState>,
    released: Condvar,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new(GatePolicy::default())
    }
}

impl LockTable {
    /// Creates an empty lock table.
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(TableState::default()),
            released: Condvar::new(),
        }
    }

    /// Returns the configured policy.
    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    /// Opens a unit of work for the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already has an open unit.
    pub fn begin_unit(&self) -> UnitOfWork<'_> {
        let me = thread::current().id();
        let previous = self.state.lock().units.insert(me, Vec::new());
        assert!(previous.is_none(), "unit of work already open on this thread");
        UnitOfWork { table: self, owner: me }
    }

    /// Number of locks held by the calling thread's unit.
    pub fn held_by_current(&self) -> usize {
        let me = thread::current().id();
        self.state.lock().units.get(&me).map_or(0, Vec::len)
    }

    /// Returns a snapshot of the table.
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.lock();
        LockSnapshot {
            held: state.locks.len(),
            units: state.units.len(),
        }
    }

    fn release_unit(&self, owner: ThreadId) {
        let mut state = self.state.lock();
        let Some(held) = state.units.remove(&owner) else {
            return;
        };
        for lock in &held {
            if let Some(entry) = state.locks.get_mut(lock) {
                entry.release(owner);
                if entry.is_free() {
                    state.locks.remove(lock);
                }
            }
        }
        drop(state);
        trace!(released = held.len(), "gate.unit_end");
        self.released.notify_all();
    }
}

impl ConflictGate for LockTable {
    fn acquire(&self, lock: LockId, flag: MethodFlag) -> Result<()> {
        if !flag.locks() {
            return Ok(());
        }
        let me = thread::current().id();
        let exclusive = flag.exclusive();
        let deadline = match self.policy {
            GatePolicy::Abort => None,
            GatePolicy::Wait { timeout } => Some(Instant::now() + timeout),
        };
        let mut state = self.state.lock();
        if !state.units.contains_key(&me) {
            return Ok(());
        }
        loop {
            let entry = state.locks.entry(lock).or_default();
            if entry.grantable(me, exclusive) {
                entry.grant(me, exclusive);
                if let Some(held) = state.units.get_mut(&me) {
                    if !held.contains(&lock) {
                        held.push(lock);
                    }
                }
                return Ok(());
            }
            let Some(deadline) = deadline else {
                debug!(%lock, "gate.conflict");
                return Err(GraphError::Conflict { lock });
            };
            if self.released.wait_until(&mut state, deadline).timed_out() {
                debug!(%lock, "gate.wait_timeout");
                return Err(GraphError::Conflict { lock });
            }
        }
    }
}

/// An open unit of work; releases every lock it holds when dropped.
pub struct UnitOfWork<'a> {
    table: &'a LockTable,
    owner: ThreadId,
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        self.table.release_unit(self.owner);
    }
}
