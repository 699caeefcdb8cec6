//! Concurrency-aware graph container for parallel graph algorithms.
//!
//! Nodes are created in two phases (allocate, then publish), edges are kept
//! in per-node adjacency lists, and every operation consults a pluggable
//! conflict gate so that a speculative runtime can abort and retry units of
//! work. A distributed variant spreads one container over the partitions of
//! a cluster and links the partitions' shares in a replication ring.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;
