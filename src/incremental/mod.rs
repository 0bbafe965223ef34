// src/incremental/mod.rs

//! Incremental processing state.
//!
//! - [`hash`] computes file and file-dependency hashes with `blake3`.
//! - [`store`] defines the key-value store trait with memory and file
//!   implementations.
//! - [`tracker`] is the shared handle commands consult to skip unchanged
//!   work.

pub mod hash;
pub mod store;
pub mod tracker;

pub use store::{FileIncrementalStore, IncrementalStore, MemoryIncrementalStore, StateKind};
pub use tracker::IncrementalTracker;
