//! # Pool Header
//!
//! The first 128 bytes of every pool file. The header carries the layout
//! identifier the engine was configured with, the format version, and the
//! three mutable roots of the persistent state: the heap bump pointer, the
//! free-block list head, and the head of the leaf list.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ---------------------------------------------
//! 0       16    layout identifier (must match on open)
//! 16      4     version
//! 20      4     (padding)
//! 24      8     pool_size: file size recorded at creation
//! 32      8     heap_top: first never-allocated heap byte
//! 40      8     free_head: head of the free-block list (0 = none)
//! 48      8     root_head: head of the persistent leaf list (0 = empty)
//! 56      72    reserved
//! ```
//!
//! The mutable fields are updated through the transaction layer, never
//! directly, so they roll back together with the heap state they describe.
//! Their byte offsets are exported as constants for that purpose.
//!
//! All multi-byte fields are little-endian via zerocopy's `U32`/`U64` types.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{HEAP_START, LAYOUT, POOL_HEADER_SIZE, POOL_VERSION};

/// Byte offset of `heap_top` within the pool file.
pub const HEAP_TOP_OFF: u64 = 32;
/// Byte offset of `free_head` within the pool file.
pub const FREE_HEAD_OFF: u64 = 40;
/// Byte offset of `root_head` within the pool file.
pub const ROOT_HEAD_OFF: u64 = 48;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PoolHeader {
    layout: [u8; 16],
    version: U32,
    _pad: U32,
    pool_size: U64,
    heap_top: U64,
    free_head: U64,
    root_head: U64,
    reserved: [u8; 72],
}

const _: () = assert!(std::mem::size_of::<PoolHeader>() == POOL_HEADER_SIZE);

impl PoolHeader {
    pub fn new(pool_size: u64) -> Self {
        Self {
            layout: *LAYOUT,
            version: U32::new(POOL_VERSION),
            _pad: U32::new(0),
            pool_size: U64::new(pool_size),
            heap_top: U64::new(HEAP_START),
            free_head: U64::new(0),
            root_head: U64::new(0),
            reserved: [0u8; 72],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= POOL_HEADER_SIZE,
            "buffer too small for PoolHeader: {} < {}",
            bytes.len(),
            POOL_HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..POOL_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse PoolHeader: {:?}", e))?;

        ensure!(
            &header.layout == LAYOUT,
            "pool layout mismatch: expected {:?}, found {:?}",
            String::from_utf8_lossy(LAYOUT),
            String::from_utf8_lossy(&header.layout)
        );

        ensure!(
            header.version.get() == POOL_VERSION,
            "unsupported pool version: {} (expected {})",
            header.version.get(),
            POOL_VERSION
        );

        Ok(header)
    }

    pub fn pool_size(&self) -> u64 {
        self.pool_size.get()
    }

    pub fn heap_top(&self) -> u64 {
        self.heap_top.get()
    }

    pub fn free_head(&self) -> u64 {
        self.free_head.get()
    }

    pub fn root_head(&self) -> u64 {
        self.root_head.get()
    }
}
