//! # Memory-Mapped Pool File
//!
//! This module implements `PoolMap`, the lowest layer of the storage stack: a
//! single file mapped read/write into the process address space for the
//! lifetime of the engine. Everything persistent lives in this file and is
//! addressed by byte offset; offset 0 is the pool header and 0 doubles as the
//! null reference everywhere above this layer.
//!
//! ## Design
//!
//! Traditional engines copy data between kernel buffers and a user-space
//! cache. Mapping the pool eliminates that copy: reads hand out `&[u8]`
//! slices pointing directly at the file, and writes mutate it in place. The
//! OS pages the file transparently.
//!
//! The pool has a fixed size chosen at creation and is never remapped, which
//! keeps the safety story simple:
//!
//! ```text
//! slice(&self)      -> &[u8]      // immutable borrow of self
//! slice_mut(&mut self) -> &mut [u8]  // exclusive borrow of self
//! ```
//!
//! With no `grow()` there is no way for a slice to outlive its mapping; the
//! borrow checker does the rest.
//!
//! ## Durability
//!
//! `flush_range` is the ordering primitive the transaction layer is built
//! on: it returns only once the given byte range has reached the backing
//! file. `flush` syncs the whole mapping and is used at shutdown.
//!
//! ## Access Mode
//!
//! New pools are created with mode `0700`, matching the caller-facing
//! contract for pool files.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;

#[derive(Debug)]
pub struct PoolMap {
    #[allow(dead_code)]
    file: File,
    mmap: MmapMut,
    size: u64,
}

impl PoolMap {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open pool file '{}'", path.display()))?;

        let size = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat pool file '{}'", path.display()))?
            .len();

        ensure!(size > 0, "cannot open empty pool file '{}'", path.display());

        // SAFETY: MmapMut::map_mut is unsafe because the mapping can be
        // invalidated by external modification of the file. This is safe
        // because:
        // 1. The engine owns the pool file exclusively for its lifetime
        // 2. The mapping is never recreated, so no stale slices can exist
        // 3. All access goes through slice()/slice_mut() which bounds-check
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self { file, mmap, size })
    }

    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();

        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o700);
        }

        let file = options
            .open(path)
            .wrap_err_with(|| format!("failed to create pool file '{}'", path.display()))?;

        file.set_len(size)
            .wrap_err_with(|| format!("failed to size pool file to {} bytes", size))?;

        // SAFETY: see open(); additionally the file was just created with
        // create_new, so no other mapping of it can exist.
        let mmap = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        Ok(Self { file, mmap, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn slice(&self, off: u64, len: usize) -> Result<&[u8]> {
        self.check_range(off, len)?;
        let off = off as usize;
        Ok(&self.mmap[off..off + len])
    }

    pub fn slice_mut(&mut self, off: u64, len: usize) -> Result<&mut [u8]> {
        self.check_range(off, len)?;
        let off = off as usize;
        Ok(&mut self.mmap[off..off + len])
    }

    pub fn read_u64(&self, off: u64) -> Result<u64> {
        let bytes = self.slice(off, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("slice is 8 bytes")))
    }

    pub fn write_u64(&mut self, off: u64, value: u64) -> Result<()> {
        self.slice_mut(off, 8)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Syncs a byte range to the backing file. Returns only once the range
    /// is durable.
    pub fn flush_range(&self, off: u64, len: usize) -> Result<()> {
        self.check_range(off, len)?;
        self.mmap
            .flush_range(off as usize, len)
            .wrap_err("failed to flush pool range")
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush().wrap_err("failed to flush pool")
    }

    /// Hints the kernel to fault the whole pool in ahead of the recovery
    /// scan.
    pub fn prefetch(&self) {
        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is advisory. The pointer and
        // length describe exactly the mapping owned by self, which is valid
        // for the lifetime of the call.
        unsafe {
            libc::madvise(
                self.mmap.as_ptr() as *mut libc::c_void,
                self.size as usize,
                libc::MADV_WILLNEED,
            );
        }
    }

    fn check_range(&self, off: u64, len: usize) -> Result<()> {
        ensure!(
            off.checked_add(len as u64).is_some_and(|end| end <= self.size),
            "pool range {}..+{} out of bounds (size={})",
            off,
            len,
            self.size
        );
        Ok(())
    }
}
