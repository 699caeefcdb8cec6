//! Append-only slot arena with stable indices.
//!
//! Slots are grouped into buckets of doubling size. A bucket is allocated the
//! first time an index inside it is reserved and is never moved afterwards, so
//! references handed out by [`Arena::get`] stay valid for the arena's lifetime.
//! Reservation is a single atomic increment; no lock is taken on any path.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use tracing::trace;

const FIRST_BUCKET_BITS: u32 = 5;
const FIRST_BUCKET_LEN: u64 = 1 << FIRST_BUCKET_BITS;
const BUCKETS: usize = 28;

type Bucket<T> = Box<[OnceLock<T>]>;

/// Lock-free append-only arena.
pub struct Arena<T> {
    buckets: [OnceLock<Bucket<T>>; BUCKETS],
    reserved: AtomicU32,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena. No bucket is allocated until the first push.
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| OnceLock::new()),
            reserved: AtomicU32::new(0),
        }
    }

    /// Stores `value` in a fresh slot and returns its index.
    ///
    /// # Panics
    ///
    /// Panics when the arena has handed out `u32::MAX` slots.
    pub fn push(&self, value: T) -> u32 {
        self.push_with(|_| value)
    }

    /// Reserves a slot and stores the value built from its index.
    ///
    /// # Panics
    ///
    /// Panics when the arena has handed out `u32::MAX` slots.
    pub fn push_with(&self, build: impl FnOnce(u32) -> T) -> u32 {
        let index = self.reserved.fetch_add(1, Ordering::AcqRel);
        assert!(index != u32::MAX, "arena exhausted");
        let (bucket, offset) = locate(index);
        let slots = self.buckets[bucket].get_or_init(|| {
            let len = bucket_len(bucket);
            trace!(bucket, len, "arena.bucket_alloc");
            (0..len).map(|_| OnceLock::new()).collect()
        });
        if slots[offset].set(build(index)).is_err() {
            unreachable!("arena slot {index} initialized twice");
        }
        index
    }

    /// Returns the value at `index` if the slot has been initialized.
    ///
    /// A slot whose index was reserved by a concurrent `push` that has not yet
    /// stored its value reads as `None`.
    pub fn get(&self, index: u32) -> Option<&T> {
        if index >= self.reserved.load(Ordering::Acquire) {
            return None;
        }
        let (bucket, offset) = locate(index);
        self.buckets[bucket].get()?.get(offset)?.get()
    }

    /// Number of reserved slots, including slots still being initialized.
    pub fn len(&self) -> u32 {
        self.reserved.load(Ordering::Acquire)
    }

    /// Whether nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates initialized slots in index order.
    ///
    /// The upper bound is sampled once; slots pushed after the call starts are
    /// not visited.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        (0..self.len()).filter_map(move |index| self.get(index).map(|value| (index, value)))
    }
}

fn locate(index: u32) -> (usize, usize) {
    let biased = index as u64 + FIRST_BUCKET_LEN;
    let log2 = 63 - biased.leading_zeros();
    let bucket = (log2 - FIRST_BUCKET_BITS) as usize;
    let offset = (biased - (1u64 << log2)) as usize;
    (bucket, offset)
}

fn bucket_len(bucket: usize) -> usize {
    1usize << (bucket as u32 + FIRST_BUCKET_BITS)
}
