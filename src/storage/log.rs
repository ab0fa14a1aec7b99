//! # Undo Log
//!
//! Crash atomicity for pool transactions. Before a transaction overwrites
//! any live byte range, it appends the range's current contents to this log
//! and waits for the entry to become durable. If the process dies mid
//! transaction, the next open finds the entries and copies the old bytes
//! back, erasing every trace of the torn transaction; if the transaction
//! commits, the log is invalidated and the entries become garbage.
//!
//! ## Entry Format
//!
//! Entries are packed back to back from the start of the log region:
//!
//! ```text
//! +------------------+------------------+
//! | Entry Header     | Old Bytes        |
//! | (32 bytes)       | (len bytes)      |
//! +------------------+------------------+
//! ```
//!
//! The header carries:
//! - `offset`: pool offset the old bytes belong to
//! - `len`: number of old bytes
//! - `salt`: drawn once per transaction, identical in all its entries
//! - `crc`: CRC64 over offset, len, salt, and the old bytes
//!
//! ## Validity
//!
//! The log has no entry count. A scan walks entries from the region start
//! and stops at the first header with a zero length, an out-of-range
//! target, a salt that differs from the first entry's, or a checksum
//! mismatch. A mismatch means the crash happened while the entry itself was
//! being written, before the guarded range was touched, so discarding it is
//! exactly right.
//!
//! The salt is what keeps residue from the previous transaction out of the
//! scan: invalidation zeroes only the first header, so when a new first
//! entry happens to line the scan up with an intact older entry, the salt
//! exposes it as stale. Same construction as a WAL distinguishing frame
//! generations.
//!
//! ## Write Ordering
//!
//! The one rule that makes this work: an entry is flushed *before* the range
//! it guards is modified. The mapped pool gives no control over when the OS
//! writes dirty pages back, so the guarded range may reach the file at any
//! moment after that; the log entry must already be there when it does.

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{LOG_REGION_OFF, LOG_REGION_SIZE};

use super::headers::HEAP_TOP_OFF;
use super::mmap::PoolMap;

pub const LOG_ENTRY_HEADER_SIZE: usize = 32;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct LogEntryHeader {
    offset: U64,
    len: U32,
    _pad: U32,
    salt: U64,
    crc: U64,
}

const _: () = assert!(std::mem::size_of::<LogEntryHeader>() == LOG_ENTRY_HEADER_SIZE);

/// Per-transaction salt, in the same spirit as WAL frame salts. The counter
/// keeps salts distinct even when the clock is coarser than a transaction.
pub fn generate_salt() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::SystemTime;
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    (nanos as u64) ^ ((nanos >> 64) as u64) ^ seq.wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

fn compute_crc(offset: u64, len: u32, salt: u64, old: &[u8]) -> u64 {
    let mut digest = CRC64.digest();
    digest.update(&offset.to_le_bytes());
    digest.update(&len.to_le_bytes());
    digest.update(&salt.to_le_bytes());
    digest.update(old);
    digest.finalize()
}

/// Appends an undo entry guarding `target..target+len` and flushes it.
/// `pos` is the next free byte in the log region; returns the position after
/// the new entry. Fails when the log region is full, which aborts the
/// enclosing transaction.
pub fn append(map: &mut PoolMap, pos: u64, salt: u64, target: u64, len: usize) -> Result<u64> {
    let entry_len = LOG_ENTRY_HEADER_SIZE + len;
    let region_end = LOG_REGION_OFF + LOG_REGION_SIZE;
    ensure!(
        pos + entry_len as u64 <= region_end,
        "undo log full: {} bytes needed, {} available",
        entry_len,
        region_end - pos
    );

    let old = map.slice(target, len)?.to_vec();
    let header = LogEntryHeader {
        offset: U64::new(target),
        len: U32::new(len as u32),
        _pad: U32::new(0),
        salt: U64::new(salt),
        crc: U64::new(compute_crc(target, len as u32, salt, &old)),
    };

    let entry = map.slice_mut(pos, entry_len)?;
    entry[..LOG_ENTRY_HEADER_SIZE].copy_from_slice(header.as_bytes());
    entry[LOG_ENTRY_HEADER_SIZE..].copy_from_slice(&old);

    map.flush_range(pos, entry_len)?;
    Ok(pos + entry_len as u64)
}

/// Walks the log from the region start and returns `(target, len, data_pos)`
/// for every valid entry, in append order.
fn scan(map: &PoolMap) -> Result<Vec<(u64, u32, u64)>> {
    let region_end = LOG_REGION_OFF + LOG_REGION_SIZE;
    let mut entries = Vec::new();
    let mut pos = LOG_REGION_OFF;
    let mut tx_salt = None;

    while pos + LOG_ENTRY_HEADER_SIZE as u64 <= region_end {
        let bytes = map.slice(pos, LOG_ENTRY_HEADER_SIZE)?;
        let header = LogEntryHeader::ref_from_bytes(bytes)
            .map_err(|e| eyre::eyre!("failed to parse log entry header: {:?}", e))?;

        let target = header.offset.get();
        let len = header.len.get();

        // entries only ever guard the header's mutable fields or the heap
        if len == 0
            || target < HEAP_TOP_OFF
            || target + len as u64 > map.size()
            || pos + (LOG_ENTRY_HEADER_SIZE + len as usize) as u64 > region_end
        {
            break;
        }
        // a salt change marks residue from an older transaction
        if *tx_salt.get_or_insert(header.salt.get()) != header.salt.get() {
            break;
        }

        let data_pos = pos + LOG_ENTRY_HEADER_SIZE as u64;
        let old = map.slice(data_pos, len as usize)?;
        if compute_crc(target, len, header.salt.get(), old) != header.crc.get() {
            break;
        }

        entries.push((target, len, data_pos));
        pos = data_pos + len as u64;
    }

    Ok(entries)
}

/// Rolls back whatever the log holds: valid entries are applied in reverse
/// append order, the restored ranges are flushed, and the log is
/// invalidated. Returns the number of entries undone. Called on every pool
/// open (where a non-empty log means a torn transaction) and on explicit
/// transaction abort.
pub fn replay(map: &mut PoolMap) -> Result<usize> {
    let entries = scan(map)?;

    for &(target, len, data_pos) in entries.iter().rev() {
        let old = map.slice(data_pos, len as usize)?.to_vec();
        map.slice_mut(target, len as usize)?.copy_from_slice(&old);
        map.flush_range(target, len as usize)?;
    }

    invalidate(map)?;
    Ok(entries.len())
}

/// Zeroes the first entry header and flushes it, ending the log's validity.
pub fn invalidate(map: &mut PoolMap) -> Result<()> {
    map.slice_mut(LOG_REGION_OFF, LOG_ENTRY_HEADER_SIZE)?.fill(0);
    map.flush_range(LOG_REGION_OFF, LOG_ENTRY_HEADER_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEAP_START;
    use tempfile::tempdir;

    fn test_map() -> (tempfile::TempDir, PoolMap) {
        let dir = tempdir().unwrap();
        let map = PoolMap::create(dir.path().join("pool"), 2 * HEAP_START).unwrap();
        (dir, map)
    }

    #[test]
    fn replay_restores_guarded_ranges_in_reverse() {
        let (_dir, mut map) = test_map();
        let salt = generate_salt();
        let a = HEAP_START;
        let b = HEAP_START + 64;

        map.write_u64(a, 1).unwrap();
        map.write_u64(b, 2).unwrap();

        let pos = append(&mut map, LOG_REGION_OFF, salt, a, 8).unwrap();
        map.write_u64(a, 100).unwrap();
        let pos = append(&mut map, pos, salt, b, 8).unwrap();
        map.write_u64(b, 200).unwrap();
        // second entry for the same range snapshots the mid-transaction value
        append(&mut map, pos, salt, a, 8).unwrap();
        map.write_u64(a, 300).unwrap();

        let undone = replay(&mut map).unwrap();
        assert_eq!(undone, 3);
        assert_eq!(map.read_u64(a).unwrap(), 1);
        assert_eq!(map.read_u64(b).unwrap(), 2);
    }

    #[test]
    fn invalidated_log_replays_nothing() {
        let (_dir, mut map) = test_map();
        map.write_u64(HEAP_START, 7).unwrap();

        append(&mut map, LOG_REGION_OFF, generate_salt(), HEAP_START, 8).unwrap();
        map.write_u64(HEAP_START, 8).unwrap();
        invalidate(&mut map).unwrap();

        assert_eq!(replay(&mut map).unwrap(), 0);
        assert_eq!(map.read_u64(HEAP_START).unwrap(), 8);
    }

    #[test]
    fn torn_entry_terminates_the_scan() {
        let (_dir, mut map) = test_map();
        let salt = generate_salt();
        map.write_u64(HEAP_START, 7).unwrap();

        let pos = append(&mut map, LOG_REGION_OFF, salt, HEAP_START, 8).unwrap();
        map.write_u64(HEAP_START, 8).unwrap();
        append(&mut map, pos, salt, HEAP_START + 32, 8).unwrap();
        // corrupt the second entry's payload, as a torn write would
        let data = map.slice_mut(pos + LOG_ENTRY_HEADER_SIZE as u64, 1).unwrap();
        data[0] ^= 0xff;

        assert_eq!(replay(&mut map).unwrap(), 1);
        assert_eq!(map.read_u64(HEAP_START).unwrap(), 7);
    }

    #[test]
    fn stale_entries_from_an_older_transaction_are_rejected() {
        let (_dir, mut map) = test_map();
        let a = HEAP_START;
        let b = HEAP_START + 64;

        // an older transaction left two entries; its first was then zeroed
        // by a commit
        let old_salt = 1111;
        let pos = append(&mut map, LOG_REGION_OFF, old_salt, a, 8).unwrap();
        append(&mut map, pos, old_salt, b, 8).unwrap();
        invalidate(&mut map).unwrap();

        map.write_u64(b, 4242).unwrap();

        // a new transaction writes one same-sized entry, lining the scan up
        // exactly with the stale second entry, then crashes
        map.write_u64(a, 1).unwrap();
        append(&mut map, LOG_REGION_OFF, 2222, a, 8).unwrap();
        map.write_u64(a, 99).unwrap();

        assert_eq!(replay(&mut map).unwrap(), 1, "only the live entry replays");
        assert_eq!(map.read_u64(a).unwrap(), 1);
        assert_eq!(map.read_u64(b).unwrap(), 4242, "stale undo must not fire");
    }

    #[test]
    fn append_fails_when_region_is_full() {
        let (_dir, mut map) = test_map();
        let pos = LOG_REGION_OFF + LOG_REGION_SIZE - 16;
        assert!(append(&mut map, pos, generate_salt(), HEAP_START, 8).is_err());
    }
}
