//! Low-level primitives the graph container is built on.
//!
//! Includes the lock-free slot arena, byte encoding for container and record
//! shipping, and the conflict-detection protocol.

/// Append-only slot arena with stable indices.
pub mod arena;

/// Byte-level utilities and encoding/decoding.
///
/// Varints, serialization buffers, and the [`bytes::Codec`] trait.
pub mod bytes;

/// Concurrency primitives and synchronization.
///
/// Method flags, the conflict gate seam, and a reference lock table.
pub mod concurrency;
