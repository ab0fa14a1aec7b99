//! # Heap Allocator
//!
//! Variable-size block allocation from the pool heap, always inside a
//! transaction. Payload buffers and leaves both come from here.
//!
//! ## Block Layout
//!
//! ```text
//! +--------------+------------------------+
//! | size: u64    | payload                |
//! | (8 bytes)    | (16-byte multiple)     |
//! +--------------+------------------------+
//! ```
//!
//! `size` is the whole block including the header. Callers hold payload
//! offsets; the header sits at `payload - 8`. While a block is free, its
//! first payload bytes hold the intrusive link to the next free block,
//! rooted at the header's `free_head` field.
//!
//! ## Strategy
//!
//! First fit over the free list, splitting off the tail of an oversized
//! block as a new free block when the remainder can stand on its own;
//! otherwise the heap top is bumped. There is no coalescing: the engine's
//! churn is payload-sized and payload-shaped, so freed blocks fit the next
//! request of the same shape.
//!
//! ## Crash Atomicity
//!
//! Every metadata write goes through `Tx::write`, so a rolled-back
//! transaction restores the free list, the heap top, and every block header
//! exactly. Two details make that sufficient:
//!
//! - A block freed in an open transaction is quarantined (`Tx::freed`) so a
//!   later `alloc` in the same transaction cannot hand its bytes out and
//!   scribble over data a rollback would need to restore.
//! - When a free block is reused, its link bytes are snapshotted before the
//!   caller overwrites them, because rollback puts the block back on the
//!   free list, link and all.

use eyre::{ensure, Result};

use crate::config::{ALLOC_ALIGN, BLOCK_HEADER_SIZE, MIN_BLOCK_SIZE};

use super::headers::{FREE_HEAD_OFF, HEAP_TOP_OFF};
use super::pool::Tx;

fn align_up(n: u64, align: u64) -> u64 {
    (n + align - 1) / align * align
}

impl Tx<'_> {
    /// Allocates a block with at least `size` payload bytes and returns the
    /// payload offset. The block is unreachable until the caller commits a
    /// pointer to it, so writes into it skip the undo log.
    pub fn alloc(&mut self, size: u64) -> Result<u64> {
        ensure!(size > 0, "zero-size allocation");
        let need = align_up(size, ALLOC_ALIGN);

        // first fit over the free list
        let mut prev = 0u64;
        let mut cur = self.read_u64(FREE_HEAD_OFF)?;
        while cur != 0 {
            let bsize = self.read_u64(cur)?;
            let next = self.read_u64(cur + BLOCK_HEADER_SIZE)?;

            if bsize - BLOCK_HEADER_SIZE >= need && !self.freed.contains(&cur) {
                if prev == 0 {
                    self.write_u64(FREE_HEAD_OFF, next)?;
                } else {
                    self.write_u64(prev + BLOCK_HEADER_SIZE, next)?;
                }
                // rollback re-links this block; guard the link bytes before
                // the caller treats them as payload
                self.snapshot(cur + BLOCK_HEADER_SIZE, 8)?;

                let usable = bsize - BLOCK_HEADER_SIZE;
                if usable - need >= MIN_BLOCK_SIZE {
                    self.split_tail(cur, need, usable)?;
                    self.fresh.push((cur + BLOCK_HEADER_SIZE, need));
                } else {
                    self.fresh.push((cur + BLOCK_HEADER_SIZE, usable));
                }
                return Ok(cur + BLOCK_HEADER_SIZE);
            }

            prev = cur;
            cur = next;
        }

        // no fit: bump the heap top
        let top = self.read_u64(HEAP_TOP_OFF)?;
        let new_top = top + BLOCK_HEADER_SIZE + need;
        ensure!(
            new_top <= self.map.size(),
            "pool out of space: {} bytes requested, {} left",
            need,
            self.map.size() - top
        );
        self.write_u64(HEAP_TOP_OFF, new_top)?;

        self.fresh.push((top, BLOCK_HEADER_SIZE + need));
        self.write_u64(top, BLOCK_HEADER_SIZE + need)?;
        Ok(top + BLOCK_HEADER_SIZE)
    }

    /// Returns a payload's block to the free list. The bytes are left
    /// untouched except for the link, and the block stays quarantined from
    /// reuse until this transaction commits.
    pub fn free(&mut self, payload: u64) -> Result<()> {
        let block = payload - BLOCK_HEADER_SIZE;
        let bsize = self.read_u64(block)?;
        let heap_top = self.read_u64(HEAP_TOP_OFF)?;
        ensure!(
            bsize >= MIN_BLOCK_SIZE && block + bsize <= heap_top,
            "free of corrupt block at {} (size {})",
            block,
            bsize
        );

        let head = self.read_u64(FREE_HEAD_OFF)?;
        self.write_u64(payload, head)?;
        self.write_u64(FREE_HEAD_OFF, block)?;
        self.freed.push(block);
        Ok(())
    }

    /// Splits the tail of a reused free block off as a new free block. The
    /// tail lies in the dead interior of the original block, so its header
    /// and link writes need no undo entries of their own.
    fn split_tail(&mut self, block: u64, need: u64, usable: u64) -> Result<()> {
        let rem = block + BLOCK_HEADER_SIZE + need;
        let rem_size = usable - need;

        self.write_u64(block, BLOCK_HEADER_SIZE + need)?;

        self.fresh.push((rem, rem_size));
        self.write_u64(rem, rem_size)?;
        let head = self.read_u64(FREE_HEAD_OFF)?;
        self.write_u64(rem + BLOCK_HEADER_SIZE, head)?;
        self.write_u64(FREE_HEAD_OFF, rem)?;
        Ok(())
    }
}
