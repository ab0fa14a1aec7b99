//! # Recovery
//!
//! Rebuilds the volatile index from the persistent leaf list on open. The
//! list is unordered and so are the slots inside each leaf, but one scalar
//! per leaf is enough to order everything: its greatest key. Every key in a
//! leaf is `<=` that leaf's max by definition, and with keys unique across
//! leaves the max keys totally order the leaves. Sorting by max key and
//! replaying the ordinary split propagation with each predecessor's max as
//! the separator reproduces a routing structure every search agrees with.
//!
//! The same walk sorts leaves into two piles: leaves with at least one live
//! slot become volatile mirrors, and completely empty leaves (all slots
//! null or dead) go to the free pool for later puts and splits to recycle,
//! keeping the persistent list from growing past peak occupancy plus
//! residue.
//!
//! The undo log has already been replayed by the time this runs, so the
//! leaf list is a committed-transaction-consistent snapshot; in particular
//! a torn split cannot present the same key under two max keys here.

use eyre::Result;
use tracing::debug;

use crate::config::LEAF_KEYS;

use super::engine::Tree3;
use super::node::{LeafNode, Node};
use super::pleaf::PLeaf;
use super::slot::SlotView;

/// A leaf pulled off the persistent list, waiting to be ordered.
struct RecoveredLeaf {
    node: LeafNode,
    max_key: Vec<u8>,
}

impl Tree3 {
    pub(crate) fn recover(&mut self) -> Result<()> {
        debug!("recovering volatile index");
        self.tree_top = None;
        self.leaves_prealloc.clear();

        let mut recovered: Vec<RecoveredLeaf> = Vec::new();
        let head = self.pool.root_head()?;
        let mut leaf = (head != 0).then_some(PLeaf(head));

        while let Some(pl) = leaf {
            let mut node = LeafNode::new(pl);
            let mut max_key: Option<Vec<u8>> = None;

            for slot in (0..LEAF_KEYS).rev() {
                let payload = pl.slot(&self.pool, slot)?;
                if payload == 0 {
                    continue;
                }
                let view = SlotView::read(&self.pool, payload)?;
                node.hashes[slot] = view.hash();
                if view.hash() == 0 {
                    continue;
                }
                let key = view.key();
                if max_key.as_deref().map_or(true, |m| m < key) {
                    max_key = Some(key.to_vec());
                }
                node.keys[slot] = key.to_vec();
            }

            match max_key {
                None => self.leaves_prealloc.push(pl),
                Some(max_key) => recovered.push(RecoveredLeaf { node, max_key }),
            }

            leaf = pl.next(&self.pool)?;
        }

        recovered.sort_by(|a, b| a.max_key.cmp(&b.max_key));
        let leaves = recovered.len();

        // wire the ordered leaves together through the ordinary split
        // propagation, separated by each predecessor's max key
        let mut iter = recovered.into_iter();
        if let Some(first) = iter.next() {
            let mut prev_id = self.arena.push(Node::Leaf(first.node));
            self.tree_top = Some(prev_id);
            let mut prev_max = first.max_key;

            for entry in iter {
                let next_id = self.arena.push(Node::Leaf(entry.node));
                let separator = std::mem::replace(&mut prev_max, entry.max_key);
                self.inner_update_after_split(prev_id, next_id, separator);
                prev_id = next_id;
            }
        }

        debug!(
            leaves,
            prealloc = self.leaves_prealloc.len(),
            "recovery complete"
        );
        Ok(())
    }
}
