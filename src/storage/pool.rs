//! # Pool and Transactions
//!
//! `Pool` ties the mapped file, the header, the undo log, and the heap
//! allocator into the one mutation interface the engine is allowed to use:
//!
//! ```text
//! pool.with_tx(|tx| {
//!     let payload = tx.alloc(n)?;      // carve a heap block
//!     tx.write(payload, bytes)?;       // unlogged: fresh allocation
//!     tx.write_u64(slot_off, payload)  // logged: live range overwritten
//! })?;
//! ```
//!
//! If the closure returns `Ok`, every dirty range is flushed and the log is
//! invalidated; only then has the operation committed. If it returns `Err`,
//! or the process dies anywhere in between, the undo log puts every guarded
//! byte back. Callers therefore see all of a transaction's persistent
//! effects or none of them.
//!
//! ## What Gets Logged
//!
//! `Tx::write` consults the transaction's fresh-allocation list: a write
//! that lands entirely inside a block allocated by this same transaction
//! skips the undo entry, because rollback makes such a block unreachable
//! anyway. Everything else is snapshotted first. The allocator's own
//! metadata (heap top, free-list links, block headers) goes through the same
//! `write` path, so a rolled-back transaction also unwinds its allocations
//! and frees.
//!
//! ## Volatile State
//!
//! The transaction layer knows nothing about the volatile index. Callers
//! keep their in-memory mirrors consistent by applying mirror updates only
//! after `with_tx` returns `Ok`.

use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use tracing::{debug, error};
use zerocopy::IntoBytes;

use crate::config::{HEAP_START, LOG_REGION_OFF, MIN_POOL_SIZE, POOL_HEADER_SIZE};

use super::headers::{PoolHeader, ROOT_HEAD_OFF};
use super::log;
use super::mmap::PoolMap;

#[derive(Debug)]
pub struct Pool {
    pub(crate) map: PoolMap,
}

impl Pool {
    /// Creates a pool file of `size` bytes and installs an empty header.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        ensure!(
            size >= MIN_POOL_SIZE,
            "pool size {} below minimum {}",
            size,
            MIN_POOL_SIZE
        );

        let mut map = PoolMap::create(path, size)?;

        let header = PoolHeader::new(size);
        map.slice_mut(0, POOL_HEADER_SIZE)?
            .copy_from_slice(header.as_bytes());
        log::invalidate(&mut map)?;
        map.flush()?;

        Ok(Self { map })
    }

    /// Opens an existing pool. A torn transaction left by a crash is rolled
    /// back before the header or heap is looked at.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut map = PoolMap::open(path)?;

        let undone = log::replay(&mut map).wrap_err("failed to roll back torn transaction")?;
        if undone > 0 {
            debug!(entries = undone, "rolled back torn transaction on open");
        }

        let header = PoolHeader::from_bytes(map.slice(0, POOL_HEADER_SIZE)?)?;
        ensure!(
            header.pool_size() == map.size(),
            "pool size mismatch: header says {}, file is {}",
            header.pool_size(),
            map.size()
        );
        ensure!(
            header.heap_top() >= HEAP_START && header.heap_top() <= map.size(),
            "corrupt heap top {}",
            header.heap_top()
        );

        map.prefetch();
        Ok(Self { map })
    }

    /// Head of the persistent leaf list (0 = no leaves).
    pub fn root_head(&self) -> Result<u64> {
        self.map.read_u64(ROOT_HEAD_OFF)
    }

    pub fn read_u64(&self, off: u64) -> Result<u64> {
        self.map.read_u64(off)
    }

    pub fn slice(&self, off: u64, len: usize) -> Result<&[u8]> {
        self.map.slice(off, len)
    }

    /// Runs `f` as one crash-atomic transaction.
    pub fn with_tx<T>(&mut self, f: impl FnOnce(&mut Tx<'_>) -> Result<T>) -> Result<T> {
        let mut tx = Tx::begin(&mut self.map);
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb) = tx.rollback() {
                    error!("transaction rollback failed: {rb:#}");
                }
                Err(err)
            }
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let _ = self.map.flush();
    }
}

/// One open transaction. Obtained only through [`Pool::with_tx`].
pub struct Tx<'p> {
    pub(crate) map: &'p mut PoolMap,
    /// Next free byte in the undo log region.
    log_pos: u64,
    /// Salt shared by every undo entry of this transaction.
    salt: u64,
    /// Ranges to flush at commit.
    dirty: Vec<(u64, usize)>,
    /// Blocks allocated by this transaction: writes inside them skip the log.
    pub(crate) fresh: Vec<(u64, u64)>,
    /// Blocks freed by this transaction: not eligible for reuse until commit,
    /// because rollback must find their bytes intact.
    pub(crate) freed: Vec<u64>,
}

impl<'p> Tx<'p> {
    pub(crate) fn begin(map: &'p mut PoolMap) -> Self {
        Self {
            map,
            log_pos: LOG_REGION_OFF,
            salt: log::generate_salt(),
            dirty: Vec::new(),
            fresh: Vec::new(),
            freed: Vec::new(),
        }
    }

    pub fn read_u64(&self, off: u64) -> Result<u64> {
        self.map.read_u64(off)
    }

    pub fn slice(&self, off: u64, len: usize) -> Result<&[u8]> {
        self.map.slice(off, len)
    }

    fn is_fresh(&self, off: u64, len: usize) -> bool {
        self.fresh
            .iter()
            .any(|&(start, flen)| start <= off && off + len as u64 <= start + flen)
    }

    /// Appends an undo entry for the range regardless of freshness.
    pub(crate) fn snapshot(&mut self, off: u64, len: usize) -> Result<()> {
        self.log_pos = log::append(self.map, self.log_pos, self.salt, off, len)?;
        Ok(())
    }

    pub fn write(&mut self, off: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if !self.is_fresh(off, bytes.len()) {
            self.snapshot(off, bytes.len())?;
        }
        self.map.slice_mut(off, bytes.len())?.copy_from_slice(bytes);
        self.dirty.push((off, bytes.len()));
        Ok(())
    }

    pub fn write_u64(&mut self, off: u64, value: u64) -> Result<()> {
        self.write(off, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, off: u64, value: u32) -> Result<()> {
        self.write(off, &value.to_le_bytes())
    }

    pub fn write_u8(&mut self, off: u64, value: u8) -> Result<()> {
        self.write(off, &[value])
    }

    pub fn write_zeros(&mut self, off: u64, len: usize) -> Result<()> {
        if !self.is_fresh(off, len) {
            self.snapshot(off, len)?;
        }
        self.map.slice_mut(off, len)?.fill(0);
        self.dirty.push((off, len));
        Ok(())
    }

    fn commit(mut self) -> Result<()> {
        self.dirty.sort_unstable();

        let mut pending: Option<(u64, u64)> = None;
        for &(off, len) in &self.dirty {
            let end = off + len as u64;
            match pending {
                Some((start, pend)) if off <= pend => {
                    pending = Some((start, pend.max(end)));
                }
                Some((start, pend)) => {
                    self.map.flush_range(start, (pend - start) as usize)?;
                    pending = Some((off, end));
                }
                None => pending = Some((off, end)),
            }
        }
        if let Some((start, end)) = pending {
            self.map.flush_range(start, (end - start) as usize)?;
        }

        log::invalidate(self.map)
    }

    fn rollback(self) -> Result<()> {
        log::replay(self.map)?;
        Ok(())
    }
}
