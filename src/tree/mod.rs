//! # Hybrid B+ Tree Engine
//!
//! This module implements the `tree3` engine: a dictionary whose inner
//! routing nodes are volatile and rebuilt on every open, while leaves, the
//! only durable structure, live in the persistent pool.
//!
//! ## Architecture Overview
//!
//! ```text
//!            volatile                         persistent
//!  +--------------------------+    +------------------------------+
//!  |        tree_top          |    |  root_head                   |
//!  |           |              |    |     |                        |
//!  |      [ Inner ]           |    |  [ Leaf ]--[ Leaf ]--[ Leaf ]|
//!  |      /        \          |    |   48 slots, unordered,       |
//!  | [ Inner ]   [ Inner ]    |    |   each owning one payload    |
//!  |  /     \     /     \     |    +------------------------------+
//!  | Leaf  Leaf  Leaf  Leaf --+--------^  (mirrors, one per leaf)
//!  +--------------------------+
//! ```
//!
//! A volatile leaf node mirrors its persistent leaf: one Pearson
//! fingerprint and one key copy per slot. Searches run entirely in memory;
//! the pool is touched only to read a value or to commit a mutation.
//!
//! ## Module Organization
//!
//! - `hash`: Pearson fingerprint (RFC 3074 table, reverse traversal)
//! - `slot`: packed payload encoding and zero-copy views
//! - `pleaf`: persistent leaf slot array and list linkage
//! - `node`: the volatile arena of inner and leaf nodes
//! - `engine`: the operations and split machinery
//! - `recovery`: index reconstruction from the unordered leaf list

mod engine;
mod hash;
mod node;
mod pleaf;
mod recovery;
mod slot;

pub use engine::{Status, Tree3};
pub use hash::pearson_hash;
