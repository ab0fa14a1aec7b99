//! # Slot Payloads
//!
//! Encoding and zero-copy decoding of the byte buffer a leaf slot owns. One
//! payload carries one key/value pair plus the metadata the leaf needs to
//! reject it cheaply:
//!
//! ```text
//! Offset        Size   Field
//! ------        ----   -----------------------------
//! 0             4      key_size
//! 4             4      value_size
//! 8             1      hash (Pearson; 0 = dead slot)
//! 9             ks     key bytes
//! 9+ks          1      zero separator
//! 10+ks         vs     value bytes
//! 10+ks+vs      1      zero terminator
//! ```
//!
//! The two zero bytes let a reader take C-string views of the key and value
//! straight out of the pool without copying. Keys and values themselves may
//! contain zero bytes; the sizes, not the separators, delimit them.
//!
//! Fields are little-endian via zerocopy. The layout is not portable across
//! endiannesses, which is accepted for this format.

use eyre::Result;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::PAYLOAD_HEADER_SIZE;
use crate::storage::{Pool, Tx};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct PayloadHeader {
    key_size: U32,
    value_size: U32,
    hash: u8,
}

const _: () = assert!(std::mem::size_of::<PayloadHeader>() == PAYLOAD_HEADER_SIZE);

/// Borrowed view of one payload, sliced directly out of the pool.
#[derive(Debug, Clone, Copy)]
pub struct SlotView<'a> {
    data: &'a [u8],
}

impl<'a> SlotView<'a> {
    pub fn read(pool: &'a Pool, payload: u64) -> Result<Self> {
        let head = pool.slice(payload, PAYLOAD_HEADER_SIZE)?;
        let header = PayloadHeader::ref_from_bytes(head)
            .map_err(|e| eyre::eyre!("failed to parse payload header: {:?}", e))?;

        let total = PAYLOAD_HEADER_SIZE
            + header.key_size.get() as usize
            + header.value_size.get() as usize
            + 2;
        let data = pool.slice(payload, total)?;
        Ok(Self { data })
    }

    fn header(&self) -> &'a PayloadHeader {
        let data = self.data;
        PayloadHeader::ref_from_bytes(&data[..PAYLOAD_HEADER_SIZE])
            .expect("view was constructed over a parsed header")
    }

    pub fn hash(&self) -> u8 {
        self.header().hash
    }

    pub fn key(&self) -> &'a [u8] {
        let data = self.data;
        let ks = self.header().key_size.get() as usize;
        &data[PAYLOAD_HEADER_SIZE..PAYLOAD_HEADER_SIZE + ks]
    }

    pub fn value(&self) -> &'a [u8] {
        let data = self.data;
        let ks = self.header().key_size.get() as usize;
        let vs = self.header().value_size.get() as usize;
        let start = PAYLOAD_HEADER_SIZE + ks + 1;
        &data[start..start + vs]
    }
}

/// Fills the slot at `slot_off` with a fresh payload for (hash, key, value),
/// freeing whatever payload the slot owned before. Runs inside the caller's
/// transaction; on abort the old payload and pointer come back untouched.
pub fn slot_set(tx: &mut Tx, slot_off: u64, hash: u8, key: &[u8], value: &[u8]) -> Result<()> {
    let old = tx.read_u64(slot_off)?;
    if old != 0 {
        tx.free(old)?;
    }

    let klen = key.len() as u64;
    let vlen = value.len() as u64;
    let payload = tx.alloc(PAYLOAD_HEADER_SIZE as u64 + klen + vlen + 2)?;

    tx.write_u32(payload, key.len() as u32)?;
    tx.write_u32(payload + 4, value.len() as u32)?;
    tx.write_u8(payload + 8, hash)?;
    tx.write(payload + 9, key)?;
    tx.write_u8(payload + 9 + klen, 0)?;
    tx.write(payload + 10 + klen, value)?;
    tx.write_u8(payload + 10 + klen + vlen, 0)?;

    tx.write_u64(slot_off, payload)
}

/// Empties the slot at `slot_off`: zeroes the payload's header fields in
/// place, frees the buffer, and nulls the owning pointer. A no-op for a slot
/// that is already empty.
pub fn slot_clear(tx: &mut Tx, slot_off: u64) -> Result<()> {
    let payload = tx.read_u64(slot_off)?;
    if payload == 0 {
        return Ok(());
    }

    tx.write_zeros(payload, PAYLOAD_HEADER_SIZE)?;
    tx.free(payload)?;
    tx.write_u64(slot_off, 0)
}
