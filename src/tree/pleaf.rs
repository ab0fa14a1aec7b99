//! # Persistent Leaves
//!
//! A persistent leaf is 49 pointer cells in the heap: `LEAF_KEYS` owning
//! slot pointers followed by one `next` pointer linking the leaf into the
//! pool-wide leaf list rooted at the header's `root_head`.
//!
//! ```text
//! +-----------+-----------+-- ... --+------------+-----------+
//! | slots[0]  | slots[1]  |         | slots[47]  | next      |
//! +-----------+-----------+---------+------------+-----------+
//! ```
//!
//! Slot order inside a leaf carries no meaning; the volatile index above
//! imposes ordering. The list itself is unordered too, newest leaf first,
//! and a leaf once linked is never unlinked. Empty leaves are recycled
//! through the engine's free pool rather than reclaimed.

use eyre::Result;

use crate::config::{LEAF_KEYS, PLEAF_SIZE};
use crate::storage::{Pool, Tx, ROOT_HEAD_OFF};

/// Offset of a persistent leaf in the pool. 0 is never a valid leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PLeaf(pub u64);

impl PLeaf {
    pub fn slot_off(self, slot: usize) -> u64 {
        debug_assert!(slot < LEAF_KEYS);
        self.0 + slot as u64 * 8
    }

    pub fn next_off(self) -> u64 {
        self.0 + LEAF_KEYS as u64 * 8
    }

    /// Payload offset owned by `slot`, or 0 when the slot is empty.
    pub fn slot(self, pool: &Pool, slot: usize) -> Result<u64> {
        pool.read_u64(self.slot_off(slot))
    }

    /// Next leaf in the list, or `None` at the tail.
    pub fn next(self, pool: &Pool) -> Result<Option<PLeaf>> {
        let off = pool.read_u64(self.next_off())?;
        Ok((off != 0).then_some(PLeaf(off)))
    }
}

/// Allocates a zeroed leaf and links it at the head of the leaf list. Must
/// run inside the transaction that also fills the leaf's first slot, so a
/// crash cannot commit a reachable leaf the volatile index never saw.
pub fn link_new_leaf(tx: &mut Tx) -> Result<PLeaf> {
    let leaf = tx.alloc(PLEAF_SIZE)?;
    tx.write_zeros(leaf, PLEAF_SIZE as usize)?;

    let old_head = tx.read_u64(ROOT_HEAD_OFF)?;
    tx.write_u64(PLeaf(leaf).next_off(), old_head)?;
    tx.write_u64(ROOT_HEAD_OFF, leaf)?;
    Ok(PLeaf(leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_POOL_SIZE;
    use tempfile::tempdir;

    #[test]
    fn new_leaves_link_at_the_head() {
        let dir = tempdir().unwrap();
        let mut pool = Pool::create(dir.path().join("pool"), MIN_POOL_SIZE).unwrap();

        let first = pool.with_tx(link_new_leaf).unwrap();
        let second = pool.with_tx(link_new_leaf).unwrap();

        assert_eq!(pool.root_head().unwrap(), second.0);
        assert_eq!(second.next(&pool).unwrap(), Some(first));
        assert_eq!(first.next(&pool).unwrap(), None);
    }

    #[test]
    fn fresh_leaf_slots_are_empty() {
        let dir = tempdir().unwrap();
        let mut pool = Pool::create(dir.path().join("pool"), MIN_POOL_SIZE).unwrap();
        let leaf = pool.with_tx(link_new_leaf).unwrap();

        for slot in 0..LEAF_KEYS {
            assert_eq!(leaf.slot(&pool, slot).unwrap(), 0);
        }
    }
}
