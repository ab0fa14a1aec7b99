//! # Tree3 Engine
//!
//! The hybrid B+ tree engine. Routing happens entirely in the volatile
//! arena; only leaves are durable. Every mutation follows the same shape:
//!
//! ```text
//! 1. Route to a leaf through the volatile inner nodes
//! 2. Decide slots from the volatile mirror (fingerprints + key copies)
//! 3. Apply the persistent edits inside one pool transaction
//! 4. After commit, apply the same edits to the mirror
//! ```
//!
//! Step 4 running strictly after commit is what keeps the mirror honest: an
//! aborted transaction leaves both halves exactly as they were, so `put`
//! and `remove` can report failure without poisoning the instance.
//!
//! ## Leaf Split
//!
//! A full leaf absorbs a 49th key by splitting. The 49 keys are sorted, the
//! median becomes the separator, and every resident slot whose key sorts
//! strictly above it swaps its payload pointer into the same slot index of
//! a sibling leaf, all inside one transaction together with the insertion
//! itself. Keeping the whole split in one transaction means a crash can
//! never leave the same key reachable in two leaves, which recovery relies
//! on. Separator propagation through the inner nodes is purely volatile
//! and happens after the transaction commits.
//!
//! ## Status Reporting
//!
//! The dispatch layer consumes a three-valued status, so the fallible
//! internals (eyre all the way down) are collapsed at this boundary:
//! missing keys are `NotFound`, aborted transactions and allocation
//! failures are `Failed` after rollback.
//!
//! ## Iteration
//!
//! `count`, `all`, and `each` ignore the index and walk the persistent leaf
//! list directly, skipping empty and dead slots. The order is stable for a
//! fixed pool, newest leaf first, and is not part of the contract.
//!
//! ## Threading
//!
//! One thread, one instance. The engine holds the pool for its lifetime
//! and does no locking; the raw context pointer keeps it `!Send` on
//! purpose.

use std::ffi::c_void;
use std::path::Path;

use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::{
    INNER_KEYS, INNER_KEYS_MIDPOINT, INNER_KEYS_UPPER, LEAF_KEYS, LEAF_KEYS_MIDPOINT,
};
use crate::storage::Pool;

use super::hash::pearson_hash;
use super::node::{InnerNode, LeafNode, Node, NodeArena, NodeId};
use super::pleaf::{link_new_leaf, PLeaf};
use super::slot::{slot_clear, slot_set, SlotView};

/// Outcome of one engine operation, as consumed by the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    Failed,
}

pub struct Tree3 {
    context: *mut c_void,
    pub(crate) pool: Pool,
    pub(crate) arena: NodeArena,
    pub(crate) tree_top: Option<NodeId>,
    /// Persistent leaves known to be empty, reused before allocating.
    pub(crate) leaves_prealloc: Vec<PLeaf>,
}

impl Tree3 {
    /// Creates the pool file when `path` does not exist and `size > 0`,
    /// otherwise opens the existing pool, then rebuilds the volatile index
    /// from the leaf list. Any failure here aborts construction.
    pub fn open(context: *mut c_void, path: &Path, size: u64) -> Result<Self> {
        let pool = if !path.exists() && size > 0 {
            debug!(path = %path.display(), size, "creating pool");
            Pool::create(path, size)?
        } else {
            debug!(path = %path.display(), "opening pool");
            Pool::open(path)?
        };

        let mut engine = Self {
            context,
            pool,
            arena: NodeArena::new(),
            tree_top: None,
            leaves_prealloc: Vec::new(),
        };
        engine.recover()?;
        Ok(engine)
    }

    pub fn name(&self) -> &'static str {
        "tree3"
    }

    pub fn engine_context(&self) -> *mut c_void {
        self.context
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Status {
        trace!(key_len = key.len(), value_len = value.len(), "put");
        match self.try_put(key, value) {
            Ok(()) => Status::Ok,
            Err(err) => {
                debug!("put failed: {err:#}");
                Status::Failed
            }
        }
    }

    pub fn get(&self, key: &[u8], f: impl FnOnce(&[u8])) -> Status {
        let Some(leaf_id) = self.leaf_search(key) else {
            return Status::NotFound;
        };
        let leaf = self.arena.leaf(leaf_id);
        let hash = pearson_hash(key);
        let Some(slot) = leaf.find_slot(hash, key) else {
            return Status::NotFound;
        };

        match self.read_slot_value(leaf.pleaf, slot, f) {
            Ok(()) => Status::Ok,
            Err(err) => {
                debug!("get failed: {err:#}");
                Status::Failed
            }
        }
    }

    pub fn exists(&self, key: &[u8]) -> Status {
        let Some(leaf_id) = self.leaf_search(key) else {
            return Status::NotFound;
        };
        let hash = pearson_hash(key);
        match self.arena.leaf(leaf_id).find_slot(hash, key) {
            Some(_) => Status::Ok,
            None => Status::NotFound,
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Status {
        trace!(key_len = key.len(), "remove");
        match self.try_remove(key) {
            Ok(true) => Status::Ok,
            Ok(false) => Status::NotFound,
            Err(err) => {
                debug!("remove failed: {err:#}");
                Status::Failed
            }
        }
    }

    /// Number of live slots across all leaves.
    pub fn count(&self) -> Result<usize> {
        let mut count = 0;
        self.walk_live_slots(|_| count += 1)?;
        Ok(count)
    }

    /// Visits every live key exactly once.
    pub fn all(&self, mut f: impl FnMut(&[u8])) -> Result<()> {
        self.walk_live_slots(|view| f(view.key()))
    }

    /// Visits every live key/value pair exactly once.
    pub fn each(&self, mut f: impl FnMut(&[u8], &[u8])) -> Result<()> {
        self.walk_live_slots(|view| f(view.key(), view.value()))
    }

    // ------------------------------------------------------------------
    // search
    // ------------------------------------------------------------------

    /// Descends from the top to the leaf whose range covers `key`. Returns
    /// `None` only for an empty tree.
    pub(crate) fn leaf_search(&self, key: &[u8]) -> Option<NodeId> {
        let mut id = self.tree_top?;
        loop {
            match self.arena.node(id) {
                Node::Leaf(_) => return Some(id),
                Node::Inner(inner) => {
                    debug_assert!(inner.check_invariants());
                    let mut next = inner.children[inner.keycount];
                    for i in 0..inner.keycount {
                        if key <= inner.keys[i].as_slice() {
                            next = inner.children[i];
                            break;
                        }
                    }
                    id = next.expect("routing child within keycount");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // put
    // ------------------------------------------------------------------

    fn try_put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        ensure!(
            key.len() <= u32::MAX as usize && value.len() <= u32::MAX as usize,
            "key or value size exceeds u32"
        );
        let hash = pearson_hash(key);

        let Some(leaf_id) = self.leaf_search(key) else {
            return self.put_first_leaf(hash, key, value);
        };

        let (matching, empty) = self.arena.leaf(leaf_id).scan_for_put(hash, key);
        if let Some(slot) = matching.or(empty) {
            let pleaf = self.arena.leaf(leaf_id).pleaf;
            self.pool
                .with_tx(|tx| slot_set(tx, pleaf.slot_off(slot), hash, key, value))?;

            let leaf = self.arena.leaf_mut(leaf_id);
            leaf.hashes[slot] = hash;
            leaf.keys[slot].clear();
            leaf.keys[slot].extend_from_slice(key);
            return Ok(());
        }

        self.leaf_split_full(leaf_id, hash, key, value)
    }

    /// Empty tree: wire in a single leaf holding the first pair.
    fn put_first_leaf(&mut self, hash: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let prealloc = self.leaves_prealloc.last().copied();
        let (pleaf, reused) = self.pool.with_tx(|tx| {
            let (pleaf, reused) = match prealloc {
                Some(pl) => (pl, true),
                None => (link_new_leaf(tx)?, false),
            };
            slot_set(tx, pleaf.slot_off(0), hash, key, value)?;
            Ok((pleaf, reused))
        })?;
        if reused {
            self.leaves_prealloc.pop();
        }

        let mut node = LeafNode::new(pleaf);
        node.hashes[0] = hash;
        node.keys[0] = key.to_vec();
        self.tree_top = Some(self.arena.push(Node::Leaf(node)));
        Ok(())
    }

    /// Splits a full leaf around the median of its 48 keys plus the new
    /// one, then inserts the new pair into whichever half it belongs to.
    fn leaf_split_full(&mut self, leaf_id: NodeId, hash: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let leaf = self.arena.leaf(leaf_id);
        let pleaf = leaf.pleaf;

        let split_key: Vec<u8> = {
            let mut keys: SmallVec<[&[u8]; LEAF_KEYS + 1]> =
                leaf.keys.iter().map(|k| k.as_slice()).collect();
            keys.push(key);
            keys.sort_unstable();
            keys[LEAF_KEYS_MIDPOINT].to_vec()
        };
        trace!(split_key_len = split_key.len(), "splitting leaf");

        // slots migrating to the sibling keep their indices
        let moved: SmallVec<[usize; LEAF_KEYS]> = (0..LEAF_KEYS)
            .filter(|&slot| leaf.keys[slot].as_slice() > split_key.as_slice())
            .collect();
        let into_new = key > split_key.as_slice();

        // highest empty slot of the target leaf, as it will look after the
        // move: the sibling's empties are the unmoved indices, the source's
        // empties are exactly the moved ones
        let insert_slot = if into_new {
            (0..LEAF_KEYS).rev().find(|slot| !moved.contains(slot))
        } else {
            (0..LEAF_KEYS).rev().find(|slot| moved.contains(slot))
        }
        .expect("split always leaves an empty slot in the target");

        let prealloc = self.leaves_prealloc.last().copied();
        let (new_pleaf, reused) = self.pool.with_tx(|tx| {
            let (new_pleaf, reused) = match prealloc {
                Some(pl) => (pl, true),
                None => (link_new_leaf(tx)?, false),
            };

            // swap rather than move: a recycled sibling may hold dead
            // payloads, which this hands back to the source slot for later
            // reuse instead of leaking
            for &slot in &moved {
                let from = pleaf.slot_off(slot);
                let to = new_pleaf.slot_off(slot);
                let source = tx.read_u64(from)?;
                let target = tx.read_u64(to)?;
                tx.write_u64(to, source)?;
                tx.write_u64(from, target)?;
            }

            let target = if into_new { new_pleaf } else { pleaf };
            slot_set(tx, target.slot_off(insert_slot), hash, key, value)?;
            Ok((new_pleaf, reused))
        })?;
        if reused {
            self.leaves_prealloc.pop();
        }

        // the persistent half is committed; mirror it
        let mut sibling = LeafNode::new(new_pleaf);
        sibling.parent = self.arena.leaf(leaf_id).parent;
        {
            let leaf = self.arena.leaf_mut(leaf_id);
            for &slot in &moved {
                sibling.hashes[slot] = leaf.hashes[slot];
                sibling.keys[slot] = std::mem::take(&mut leaf.keys[slot]);
                leaf.hashes[slot] = 0;
            }
        }
        if into_new {
            sibling.hashes[insert_slot] = hash;
            sibling.keys[insert_slot] = key.to_vec();
        } else {
            let leaf = self.arena.leaf_mut(leaf_id);
            leaf.hashes[insert_slot] = hash;
            leaf.keys[insert_slot] = key.to_vec();
        }
        let sibling_id = self.arena.push(Node::Leaf(sibling));

        self.inner_update_after_split(leaf_id, sibling_id, split_key);
        Ok(())
    }

    /// Propagates a split up the parent chain: inserts `split_key` and the
    /// new sibling into the parent, splitting overflowing inner nodes at
    /// their midpoint and bubbling the middle key further up. Reaching a
    /// node with no parent grows the tree by one level. Volatile only.
    pub(crate) fn inner_update_after_split(
        &mut self,
        mut node: NodeId,
        mut new_node: NodeId,
        mut split_key: Vec<u8>,
    ) {
        loop {
            let Some(parent_id) = self.arena.parent_of(node) else {
                debug_assert_eq!(Some(node), self.tree_top);
                let mut top = InnerNode::new();
                top.keycount = 1;
                top.keys[0] = split_key;
                top.children[0] = Some(node);
                top.children[1] = Some(new_node);
                let top_id = self.arena.push(Node::Inner(top));
                self.arena.set_parent(node, Some(top_id));
                self.arena.set_parent(new_node, Some(top_id));
                debug_assert!(self.arena.inner(top_id).check_invariants());
                self.tree_top = Some(top_id);
                return;
            };

            let keycount = {
                let inner = self.arena.inner_mut(parent_id);
                let n = inner.keycount;
                let mut idx = 0;
                while idx < n && inner.keys[idx].as_slice() <= split_key.as_slice() {
                    idx += 1;
                }
                for i in (idx..n).rev() {
                    inner.keys[i + 1] = std::mem::take(&mut inner.keys[i]);
                }
                for i in (idx + 1..=n).rev() {
                    inner.children[i + 1] = inner.children[i].take();
                }
                inner.keys[idx] = split_key;
                inner.children[idx + 1] = Some(new_node);
                inner.keycount = n + 1;
                inner.keycount
            };
            self.arena.set_parent(new_node, Some(parent_id));

            if keycount <= INNER_KEYS {
                debug_assert!(self.arena.inner(parent_id).check_invariants());
                return;
            }

            // overflowed: cut at the midpoint, keep the lower half in
            // place, hand the upper half to a new sibling, bubble the
            // middle key
            let (sibling, middle) = {
                let inner = self.arena.inner_mut(parent_id);
                let mut sibling = InnerNode::new();
                sibling.parent = inner.parent;
                for i in INNER_KEYS_UPPER..keycount {
                    sibling.keys[i - INNER_KEYS_UPPER] = std::mem::take(&mut inner.keys[i]);
                }
                for i in INNER_KEYS_UPPER..=keycount {
                    sibling.children[i - INNER_KEYS_UPPER] = inner.children[i].take();
                }
                sibling.keycount = INNER_KEYS_MIDPOINT;
                let middle = std::mem::take(&mut inner.keys[INNER_KEYS_MIDPOINT]);
                inner.keycount = INNER_KEYS_MIDPOINT;
                (sibling, middle)
            };
            let sibling_id = self.arena.push(Node::Inner(sibling));
            for i in 0..=INNER_KEYS_MIDPOINT {
                let child = self.arena.inner(sibling_id).children[i].expect("moved child");
                self.arena.set_parent(child, Some(sibling_id));
            }
            debug_assert!(self.arena.inner(parent_id).check_invariants());
            debug_assert!(self.arena.inner(sibling_id).check_invariants());

            node = parent_id;
            new_node = sibling_id;
            split_key = middle;
        }
    }

    // ------------------------------------------------------------------
    // remove
    // ------------------------------------------------------------------

    fn try_remove(&mut self, key: &[u8]) -> Result<bool> {
        let Some(leaf_id) = self.leaf_search(key) else {
            return Ok(false);
        };
        let hash = pearson_hash(key);
        let Some(slot) = self.arena.leaf(leaf_id).find_slot(hash, key) else {
            return Ok(false);
        };

        let pleaf = self.arena.leaf(leaf_id).pleaf;
        self.pool.with_tx(|tx| slot_clear(tx, pleaf.slot_off(slot)))?;

        // the leaf may now be fully empty; it stays linked and indexed, and
        // the slot is reclaimed by the next put that lands here
        let leaf = self.arena.leaf_mut(leaf_id);
        leaf.hashes[slot] = 0;
        leaf.keys[slot].clear();
        Ok(true)
    }

    // ------------------------------------------------------------------
    // iteration
    // ------------------------------------------------------------------

    fn read_slot_value(&self, pleaf: PLeaf, slot: usize, f: impl FnOnce(&[u8])) -> Result<()> {
        let payload = pleaf.slot(&self.pool, slot)?;
        ensure!(payload != 0, "mirror points at an empty slot");
        let view = SlotView::read(&self.pool, payload)?;
        f(view.value());
        Ok(())
    }

    pub(crate) fn walk_live_slots(&self, mut f: impl FnMut(SlotView<'_>)) -> Result<()> {
        let head = self.pool.root_head()?;
        let mut leaf = (head != 0).then_some(PLeaf(head));
        while let Some(pl) = leaf {
            for slot in (0..LEAF_KEYS).rev() {
                let payload = pl.slot(&self.pool, slot)?;
                if payload == 0 {
                    continue;
                }
                let view = SlotView::read(&self.pool, payload)?;
                if view.hash() == 0 {
                    continue;
                }
                f(view);
            }
            leaf = pl.next(&self.pool)?;
        }
        Ok(())
    }
}
