//! Allocator for edge value cells shared between the two endpoints of an
//! undirected or bidirectional edge.
//!
//! The factory keeps a slab entry per live cell so that removal can return it
//! exactly once. Slab slots are reused; a per-slot generation rejects releases
//! through a [`CellId`] whose slot has since been recycled.

use std::mem;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::types::CellId;

use super::edge::EdgeValue;

struct SlabSlot<E> {
    generation: u32,
    value: Option<EdgeValue<E>>,
}

struct Slab<E> {
    slots: Vec<SlabSlot<E>>,
    free: Vec<u32>,
    live: usize,
}

/// Slab of shared edge value cells.
pub struct EdgeFactory<E> {
    reclaim: bool,
    slab: Mutex<Slab<E>>,
}

impl<E> Default for EdgeFactory<E> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<E> EdgeFactory<E> {
    /// Creates a factory.
    ///
    /// Reclamation defaults to on unless `E` is zero-sized; `reclaim`
    /// overrides the default.
    pub fn new(reclaim: Option<bool>) -> Self {
        Self {
            reclaim: reclaim.unwrap_or(mem::size_of::<E>() != 0),
            slab: Mutex::new(Slab {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    /// Whether removed edges must hand their cells back.
    pub fn must_reclaim(&self) -> bool {
        self.reclaim
    }

    /// Number of tracked cells not yet released.
    pub fn live(&self) -> usize {
        self.slab.lock().live
    }

    /// Allocates a cell holding `value`.
    ///
    /// The cell is tracked only when the factory reclaims; otherwise the
    /// returned id is `None` and the cell lives as long as its records.
    pub fn alloc(&self, value: E) -> (Option<CellId>, EdgeValue<E>) {
        let value = EdgeValue::new(value);
        if !self.reclaim {
            return (None, value);
        }
        let mut slab = self.slab.lock();
        let index = match slab.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(slab.slots.len()).unwrap_or(u32::MAX);
                assert!(index != u32::MAX, "edge factory exhausted");
                slab.slots.push(SlabSlot {
                    generation: 0,
                    value: None,
                });
                index
            }
        };
        let slot = &mut slab.slots[index as usize];
        slot.value = Some(value.clone());
        let cell = CellId {
            index,
            generation: slot.generation,
        };
        slab.live += 1;
        (Some(cell), value)
    }

    /// Returns a cell to the factory. Returns `false` when the cell was
    /// already released.
    pub fn release(&self, cell: CellId) -> bool {
        let mut slab = self.slab.lock();
        let released = match slab.slots.get_mut(cell.index as usize) {
            Some(slot) if slot.generation == cell.generation && slot.value.is_some() => {
                slot.value = None;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            _ => false,
        };
        if !released {
            warn!(index = cell.index, generation = cell.generation, "edge_factory.double_release");
            return false;
        }
        slab.free.push(cell.index);
        slab.live -= 1;
        trace!(index = cell.index, "edge_factory.release");
        true
    }
}
