//! # pmkv - Persistent-Memory Key/Value Engine
//!
//! pmkv is a crash-consistent key/value store built around a hybrid B+
//! tree: inner routing nodes live in volatile memory and are rebuilt from
//! persistent state at startup, while leaf storage resides in a
//! memory-mapped pool. Reopening a pool after a crash or clean shutdown
//! yields exactly the contents it held at the last committed operation.
//!
//! ## Quick Start
//!
//! ```ignore
//! use pmkv::{Status, Tree3};
//!
//! let mut kv = Tree3::open(std::ptr::null_mut(), "/tmp/pool".as_ref(), 8 << 20)?;
//!
//! assert_eq!(kv.put(b"key1", b"value1"), Status::Ok);
//! kv.get(b"key1", |value| assert_eq!(value, b"value1"));
//! assert_eq!(kv.count()?, 1);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------+
//! |        Engine API (Tree3 / Status)        |
//! +-------------------------------------------+
//! |  Volatile B+ tree index  |  Recovery      |
//! +-------------------------------------------+
//! |  Leaves / slot payloads / Pearson hashes  |
//! +-------------------------------------------+
//! |  Pool transactions (undo log, allocator)  |
//! +-------------------------------------------+
//! |        Memory-mapped pool file            |
//! +-------------------------------------------+
//! ```
//!
//! Writes route through the volatile index to a leaf, then commit their
//! persistent edits in one undo-logged transaction before the in-memory
//! mirror is touched. The volatile index is disposable: open rebuilds it
//! from the unordered persistent leaf list alone.
//!
//! ## Guarantees and Limits
//!
//! - Keys and values are arbitrary byte strings, empty and NUL-containing
//!   included; sizes fit in `u32`.
//! - A committed `put`/`remove` survives any crash; a torn operation is
//!   rolled back on the next open.
//! - Single-threaded by contract: one instance, one caller at a time.
//! - No range scans or ordered iteration; iteration order is unspecified.
//!
//! ## Module Overview
//!
//! - [`storage`]: pool file, undo-logged transactions, heap allocator
//! - [`tree`]: the hybrid B+ tree engine itself
//! - [`config`]: tunables and pool layout constants

pub mod config;
pub mod storage;
pub mod tree;

pub use tree::{Status, Tree3};
