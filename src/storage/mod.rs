//! # Storage Module
//!
//! The persistent substrate of the engine: a single memory-mapped pool file
//! holding everything that survives a restart, with crash atomicity layered
//! on top of it.
//!
//! ## Architecture Overview
//!
//! ```text
//! +--------------------------------------------------+
//! |  Pool / Tx        scoped crash-atomic mutations  |
//! +------------+------------+------------------------+
//! |  alloc     |  log       |  headers               |
//! |  (heap)    |  (undo)    |  (pool header)         |
//! +------------+------------+------------------------+
//! |  PoolMap          bounds-checked mmap access     |
//! +--------------------------------------------------+
//! ```
//!
//! ## Pool File Layout
//!
//! ```text
//! Offset      Size      Region
//! ------      ----      --------------------------------
//! 0           128       PoolHeader (layout id, roots)
//! 128         64 KiB    undo log
//! 65664       rest      heap (allocator blocks)
//! ```
//!
//! All persistent references are byte offsets into this file; 0 is null.
//! The file's size is fixed at creation and the mapping lives for the whole
//! engine lifetime, so slices handed out by `PoolMap` can never dangle.
//!
//! ## Crash Consistency
//!
//! Mutations happen only inside `Pool::with_tx`. The undo log records the
//! prior contents of every live range a transaction overwrites, and is made
//! durable before the overwrite; commit flushes the mutated ranges and then
//! invalidates the log. Opening a pool replays any log left behind by a
//! crash, so the heap a caller sees always reflects a whole number of
//! committed transactions.

mod alloc;
mod headers;
mod log;
mod mmap;
mod pool;

pub use headers::{PoolHeader, FREE_HEAD_OFF, HEAP_TOP_OFF, ROOT_HEAD_OFF};
pub use mmap::PoolMap;
pub use pool::{Pool, Tx};
