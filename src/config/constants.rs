//! # pmkv Configuration Constants
//!
//! All numeric configuration for the engine lives here. Constants that depend
//! on each other are grouped together and the derivations are written out, so
//! a reader can change a tunable and see exactly what moves with it.
//!
//! ## Dependency Graph
//!
//! ```text
//! LEAF_KEYS (48)
//!       │
//!       ├─> LEAF_KEYS_MIDPOINT (24)    median index of the 49-key split sort
//!       │
//!       └─> PLEAF_SIZE (392)           48 slot pointers + 1 next pointer
//!
//! INNER_KEYS (4)
//!       │
//!       ├─> INNER_KEYS_MIDPOINT (2)    keys kept in each half after a split
//!       │
//!       └─> INNER_KEYS_UPPER (3)       first index moved to the new sibling
//!
//! POOL_HEADER_SIZE (128)
//!       │
//!       └─> LOG_REGION_OFF (128)
//!             │
//!             └─> HEAP_START (LOG_REGION_OFF + LOG_REGION_SIZE)
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `INNER_KEYS` is even, so the two halves of an inner split are the same
//!    size and the middle key is unambiguous.
//! 2. `HEAP_START` is 16-byte aligned, so every heap block keeps the
//!    allocator's alignment without per-block fixups.
//! 3. `MIN_POOL_SIZE` leaves room for the header, the log region, and at
//!    least one leaf with a handful of payloads.

// ============================================================================
// TREE SHAPE
// ============================================================================

/// Slots per persistent leaf.
pub const LEAF_KEYS: usize = 48;

/// Median index when sorting a full leaf's 48 keys plus the incoming one.
pub const LEAF_KEYS_MIDPOINT: usize = LEAF_KEYS / 2;

/// Maximum routing keys per volatile inner node.
pub const INNER_KEYS: usize = 4;

/// Keys kept in each half when an overflowing inner node splits.
pub const INNER_KEYS_MIDPOINT: usize = INNER_KEYS / 2;

/// Index where the upper half of an overflowing inner node begins.
pub const INNER_KEYS_UPPER: usize = INNER_KEYS / 2 + 1;

const _: () = assert!(INNER_KEYS % 2 == 0, "inner split needs an even key count");

// ============================================================================
// POOL FILE LAYOUT
// These define the fixed regions of the pool file; the heap fills the rest.
// ============================================================================

/// Layout identifier stored in the pool header. Open refuses a pool whose
/// stored identifier differs.
pub const LAYOUT: &[u8; 16] = b"pmkv-tree3\0\0\0\0\0\0";

/// Pool format version stored in the header.
pub const POOL_VERSION: u32 = 1;

/// Size of the pool header at offset 0.
pub const POOL_HEADER_SIZE: usize = 128;

/// Undo log region, directly after the header.
pub const LOG_REGION_OFF: u64 = POOL_HEADER_SIZE as u64;

/// Capacity of the undo log region. A single transaction snapshots at most a
/// few kilobytes (the worst case is a leaf split: 48 slot-pointer swaps plus
/// allocator metadata), so 64 KiB gives an order of magnitude of headroom.
pub const LOG_REGION_SIZE: u64 = 64 * 1024;

/// First heap byte. Everything from here to the end of the file is carved
/// into allocator blocks.
pub const HEAP_START: u64 = LOG_REGION_OFF + LOG_REGION_SIZE;

/// Smallest pool `create` accepts.
pub const MIN_POOL_SIZE: u64 = 1024 * 1024;

const _: () = assert!(HEAP_START % 16 == 0, "heap must start 16-byte aligned");
const _: () = assert!(MIN_POOL_SIZE > HEAP_START);

// ============================================================================
// HEAP ALLOCATOR
// ============================================================================

/// Allocation granularity. Payload capacities are rounded up to this.
pub const ALLOC_ALIGN: u64 = 16;

/// Bytes of bookkeeping in front of every heap block (the block size).
pub const BLOCK_HEADER_SIZE: u64 = 8;

/// Smallest block the allocator will split off as a free remainder. A free
/// block must be able to hold its header plus an intrusive list link.
pub const MIN_BLOCK_SIZE: u64 = BLOCK_HEADER_SIZE + ALLOC_ALIGN;

// ============================================================================
// PERSISTENT LEAF
// ============================================================================

/// Bytes of a persistent leaf: `LEAF_KEYS` slot pointers plus `next`.
pub const PLEAF_SIZE: u64 = (LEAF_KEYS as u64 + 1) * 8;

/// Bytes in front of a payload's key: key size, value size, hash.
pub const PAYLOAD_HEADER_SIZE: usize = 9;
