//! B-tree leaf node.
//!
//! Layout after the common header:
//!
//! ```text
//! | prev: u32 | next: u32 | overflow: u32 | overflow_occupation: u32 |
//! | key0 | offset0: u32 | key1 | offset1: u32 | ... | free | objN ... obj0 |
//! ```
//!
//! Entries are key-sorted; objects grow from the page end in reverse
//! insertion order, so the offset "pointers" are interleaved with respect to
//! object positions. `prev`/`next` chain the leaves in key order.
//!
//! A leaf may own an overflow chain for duplicates: `overflow` points at the
//! head node, each overflow node links the next, and `overflow_occupation` is
//! the entry count summed over the chain. A chain exists only while every key
//! in the leaf equals the duplicated key. Opening a leaf pins the whole
//! chain; releasing the leaf releases it again.

use crate::error::{ArboretumError, InsertOutcome, Result};
use crate::node::{self, NodeKind, OverflowNode, NODE_HEADER_SIZE};
use crate::page::Page;
use crate::storage::PageManager;
use crate::types::{Key, PageId};
use std::marker::PhantomData;

const PREV_OFFSET: usize = NODE_HEADER_SIZE;
const NEXT_OFFSET: usize = NODE_HEADER_SIZE + 4;
const OVERFLOW_OFFSET: usize = NODE_HEADER_SIZE + 8;
const OVERFLOW_OCC_OFFSET: usize = NODE_HEADER_SIZE + 12;
const ENTRIES_OFFSET: usize = NODE_HEADER_SIZE + 16;

/// View over a B-tree leaf page, including its loaded overflow chain
pub struct LeafNode<K: Key> {
    page: Page,
    overflow: Vec<OverflowNode>,
    _key: PhantomData<K>,
}

impl<K: Key> LeafNode<K> {
    const ENTRY_SIZE: usize = K::SIZE + 4;

    /// Initialize a fresh page as an empty leaf
    pub fn create(mut page: Page) -> Self {
        node::init_header(&mut page, NodeKind::Leaf);
        page.write_u32(PREV_OFFSET, 0);
        page.write_u32(NEXT_OFFSET, 0);
        page.write_u32(OVERFLOW_OFFSET, 0);
        page.write_u32(OVERFLOW_OCC_OFFSET, 0);
        Self {
            page,
            overflow: Vec::new(),
            _key: PhantomData,
        }
    }

    /// Interpret an existing page as a leaf, pinning its overflow chain
    pub fn open(pager: &impl PageManager, page: Page) -> Result<Self> {
        node::check_kind(&page, NodeKind::Leaf)?;
        let mut leaf = Self {
            page,
            overflow: Vec::new(),
            _key: PhantomData,
        };

        let mut next = PageId::new(leaf.page.read_u32(OVERFLOW_OFFSET));
        while next.is_some() {
            let node = OverflowNode::open(pager.get_page(next)?)?;
            next = node.next_overflow();
            leaf.overflow.push(node);
        }
        Ok(leaf)
    }

    /// Release the leaf page and every pinned overflow page
    pub fn release(self, pager: &impl PageManager) -> Result<()> {
        for node in self.overflow {
            node.release(pager)?;
        }
        pager.release_page(self.page)
    }

    /// Id of the underlying page
    pub fn page_id(&self) -> PageId {
        self.page.id()
    }

    /// Number of entries in the leaf body, excluding the overflow chain
    pub fn occupation(&self) -> usize {
        node::occupation(&self.page)
    }

    /// Number of entries across the overflow chain
    pub fn overflow_occupation(&self) -> usize {
        self.page.read_u32(OVERFLOW_OCC_OFFSET) as usize
    }

    /// Total number of entries addressed through this leaf
    pub fn num_entries(&self) -> usize {
        self.occupation() + self.overflow_occupation()
    }

    /// Whether this leaf owns an overflow chain
    pub fn has_overflow(&self) -> bool {
        !self.overflow.is_empty()
    }

    /// Length of the loaded overflow chain
    pub fn overflow_chain_len(&self) -> usize {
        self.overflow.len()
    }

    /// Head page id of the overflow chain as recorded in the leaf header
    pub fn overflow_page_id(&self) -> PageId {
        PageId::new(self.page.read_u32(OVERFLOW_OFFSET))
    }

    /// Page id of the previous leaf in key order
    pub fn prev(&self) -> PageId {
        PageId::new(self.page.read_u32(PREV_OFFSET))
    }

    /// Link the previous leaf
    pub fn set_prev(&mut self, id: PageId) {
        self.page.write_u32(PREV_OFFSET, id.value());
        self.page.mark_dirty();
    }

    /// Page id of the next leaf in key order
    pub fn next(&self) -> PageId {
        PageId::new(self.page.read_u32(NEXT_OFFSET))
    }

    /// Link the next leaf
    pub fn set_next(&mut self, id: PageId) {
        self.page.write_u32(NEXT_OFFSET, id.value());
        self.page.mark_dirty();
    }

    fn set_overflow_head(&mut self, id: PageId) {
        self.page.write_u32(OVERFLOW_OFFSET, id.value());
        self.page.mark_dirty();
    }

    fn set_overflow_occupation(&mut self, count: usize) {
        self.page.write_u32(OVERFLOW_OCC_OFFSET, count as u32);
        self.page.mark_dirty();
    }

    fn entry_offset(idx: usize) -> usize {
        ENTRIES_OFFSET + idx * Self::ENTRY_SIZE
    }

    fn object_offset_at(&self, idx: usize) -> usize {
        self.page.read_u32(Self::entry_offset(idx) + K::SIZE) as usize
    }

    fn set_object_offset_at(&mut self, idx: usize, offset: usize) {
        self.page
            .write_u32(Self::entry_offset(idx) + K::SIZE, offset as u32);
    }

    fn body_key_at(&self, idx: usize) -> K {
        K::read_from(&self.page.as_bytes()[Self::entry_offset(idx)..])
    }

    fn set_body_key_at(&mut self, idx: usize, key: K) {
        let offset = Self::entry_offset(idx);
        key.write_to(&mut self.page.as_bytes_mut()[offset..]);
    }

    /// Key of the entry at the logical position `idx`.
    ///
    /// Positions past the leaf body address the overflow chain; every object
    /// there shares the leaf's duplicated key, so the first body key is
    /// returned for them.
    pub fn key_at(&self, idx: usize) -> K {
        debug_assert!(idx < self.num_entries());
        if idx < self.occupation() {
            self.body_key_at(idx)
        } else {
            self.body_key_at(0)
        }
    }

    /// Serialized object at the logical position `idx`
    pub fn object_at(&self, idx: usize) -> Result<&[u8]> {
        let occ = self.occupation();
        if idx < occ {
            let offset = self.object_offset_at(idx);
            let size = self.body_object_size_at(idx);
            return Ok(&self.page.as_bytes()[offset..offset + size]);
        }

        let mut base = occ;
        for node in &self.overflow {
            if idx < base + node.num_entries() {
                return Ok(node.object_at(idx - base));
            }
            base += node.num_entries();
        }
        Err(ArboretumError::EntryIndexOutOfRange {
            index: idx,
            count: self.num_entries(),
        })
    }

    /// Serialized size of the object at the logical position `idx`
    pub fn object_size_at(&self, idx: usize) -> Result<usize> {
        let occ = self.occupation();
        if idx < occ {
            return Ok(self.body_object_size_at(idx));
        }

        let mut base = occ;
        for node in &self.overflow {
            if idx < base + node.num_entries() {
                return Ok(node.object_size_at(idx - base));
            }
            base += node.num_entries();
        }
        Err(ArboretumError::EntryIndexOutOfRange {
            index: idx,
            count: self.num_entries(),
        })
    }

    fn body_object_size_at(&self, idx: usize) -> usize {
        if idx == 0 {
            self.page.size() - self.object_offset_at(0)
        } else {
            self.object_offset_at(idx - 1) - self.object_offset_at(idx)
        }
    }

    /// Binary search over the leaf body. `Ok` holds the position of some
    /// occurrence of `key`; `Err` holds the insertion point.
    fn find(&self, key: K) -> std::result::Result<usize, usize> {
        let mut low = 0i64;
        let mut high = self.occupation() as i64 - 1;
        while low <= high {
            let mid = ((low + high) / 2) as usize;
            let probe = self.body_key_at(mid);
            if probe == key {
                return Ok(mid);
            }
            if key < probe {
                high = mid as i64 - 1;
            } else {
                low = mid as i64 + 1;
            }
        }
        Err(low as usize)
    }

    /// Position of the first occurrence of `key` in the body, or the
    /// insertion point when absent.
    pub fn find_first(&self, key: K) -> std::result::Result<usize, usize> {
        let mut idx = self.find(key)?;
        while idx > 0 && self.body_key_at(idx - 1) == key {
            idx -= 1;
        }
        Ok(idx)
    }

    /// Position of the last occurrence of `key`, or the insertion point when
    /// absent. In a leaf whose keys all equal `key` and that owns an overflow
    /// chain, the returned position addresses the final overflow entry
    /// virtually.
    pub fn find_last(&self, key: K) -> std::result::Result<usize, usize> {
        let mut idx = self.find(key)?;
        if self.has_overflow() {
            // All keys are equal; the last occurrence is the chain tail.
            idx = self.num_entries() - 1;
        } else {
            while idx < self.occupation() - 1 && self.body_key_at(idx + 1) == key {
                idx += 1;
            }
        }
        Ok(idx)
    }

    /// Split position for a leaf: start at the ceiling of half the
    /// occupation, then walk so the split never separates equal keys. A
    /// return of 0 means every key is equal and no valid split exists.
    pub fn find_median(&self) -> usize {
        let occ = self.occupation();
        if occ <= 1 {
            return 0;
        }
        let mut idx = (occ + 1) / 2;

        let mut down = idx;
        while down > 0 && self.body_key_at(down - 1) == self.body_key_at(down) {
            down -= 1;
        }

        if down != idx {
            let mut up = idx;
            while up < occ - 1 && self.body_key_at(up) == self.body_key_at(up + 1) {
                up += 1;
            }
            idx = if up - idx <= idx - down && up < occ - 1 {
                up + 1
            } else {
                down
            };
        }
        idx
    }

    /// Free space in the leaf body, ignoring overflow nodes
    pub fn leaf_free(&self) -> usize {
        let occ = self.occupation();
        let mut used = ENTRIES_OFFSET + occ * Self::ENTRY_SIZE;
        if occ > 0 {
            used += self.page.size() - self.object_offset_at(occ - 1);
        }
        self.page.size() - used
    }

    /// Free space of this node: the leaf body when no chain exists, the last
    /// overflow node otherwise.
    pub fn free_space(&self) -> usize {
        match self.overflow.last() {
            None => self.leaf_free(),
            Some(tail) => tail.free_space(),
        }
    }

    /// Bytes an empty leaf body can devote to one object
    pub fn empty_capacity(page_size: usize) -> usize {
        page_size - ENTRIES_OFFSET - Self::ENTRY_SIZE
    }

    /// Insert an object under `key`.
    ///
    /// The outcome is normal control flow: `NodeFull` asks the caller to
    /// split, `Duplication` reports a disallowed duplicate,
    /// `SuccessNewOverflow` signals that a fresh overflow node was linked. An
    /// object too large for a fresh overflow node is an error; any overflow
    /// node allocated for it is rolled back and disposed first.
    pub fn insert(
        &mut self,
        pager: &impl PageManager,
        key: K,
        object: &[u8],
        dup_allowed: bool,
    ) -> Result<InsertOutcome> {
        debug_assert!(!object.is_empty());
        let occ = self.occupation();

        // A chained leaf takes further duplicates straight into the chain;
        // any other key must not enter a pure-duplicate leaf and forces a
        // split instead.
        if self.has_overflow() && occ > 0 {
            if key != self.body_key_at(0) {
                return Ok(InsertOutcome::NodeFull);
            }
            if !dup_allowed {
                return Ok(InsertOutcome::Duplication);
            }
            return self.insert_into_chain(pager, object);
        }

        let entry_size = object.len() + Self::ENTRY_SIZE;
        if entry_size > self.leaf_free() {
            // Full. Duplicates of the leaf's only key route to the chain;
            // anything else is a split.
            if occ > 0 && key == self.body_key_at(0) && key == self.body_key_at(occ - 1) {
                if !dup_allowed {
                    return Ok(InsertOutcome::Duplication);
                }
                return self.insert_into_chain(pager, object);
            }
            if !dup_allowed && self.find(key).is_ok() {
                return Ok(InsertOutcome::Duplication);
            }
            return Ok(InsertOutcome::NodeFull);
        }

        let idx = if occ == 0 {
            0
        } else {
            match self.find_last(key) {
                Ok(found) => {
                    if !dup_allowed {
                        return Ok(InsertOutcome::Duplication);
                    }
                    found + 1
                }
                Err(pos) => pos,
            }
        };

        self.insert_into_body(idx, key, object);
        Ok(InsertOutcome::Success)
    }

    /// Open a gap and write an entry plus its object at body position `idx`
    fn insert_into_body(&mut self, idx: usize, key: K, object: &[u8]) {
        let occ = self.occupation();
        debug_assert!(idx <= occ);

        if occ > 0 && idx <= occ - 1 {
            let last = occ - 1;
            // Slide every object with a greater key toward the front of the
            // page in one overlap-safe move; objects grow from the page end.
            let src = self.object_offset_at(last);
            let len = if idx == 0 {
                self.page.size() - src
            } else {
                self.object_offset_at(idx - 1) - src
            };
            self.page.move_bytes(src, src - object.len(), len);

            // Shift the entries one slot right, fixing their offsets
            for i in (idx..=last).rev() {
                let k = self.body_key_at(i);
                let o = self.object_offset_at(i) - object.len();
                self.set_body_key_at(i + 1, k);
                self.set_object_offset_at(i + 1, o);
            }
        }

        let offset = if idx == 0 {
            self.page.size() - object.len()
        } else {
            self.object_offset_at(idx - 1) - object.len()
        };
        self.set_body_key_at(idx, key);
        self.set_object_offset_at(idx, offset);
        self.page.as_bytes_mut()[offset..offset + object.len()].copy_from_slice(object);

        node::set_occupation(&mut self.page, occ + 1);
        self.page.mark_dirty();
    }

    /// Route a duplicate into the overflow chain, allocating nodes as needed
    fn insert_into_chain(
        &mut self,
        pager: &impl PageManager,
        object: &[u8],
    ) -> Result<InsertOutcome> {
        let mut new_node_created = false;

        if self.overflow.is_empty() {
            let node = OverflowNode::create(pager.new_page()?);
            log::debug!(
                "leaf {}: allocated overflow head {}",
                self.page_id(),
                node.page_id()
            );
            self.set_overflow_head(node.page_id());
            self.overflow.push(node);
            new_node_created = true;
        }

        if self.overflow.last_mut().unwrap().insert(object) {
            let count = self.overflow_occupation();
            self.set_overflow_occupation(count + 1);
            return Ok(if new_node_created {
                InsertOutcome::SuccessNewOverflow
            } else {
                InsertOutcome::Success
            });
        }

        if new_node_created {
            // The object did not fit a fresh node: roll the allocation back.
            let node = self.overflow.pop().unwrap();
            let capacity = node.free_space();
            self.set_overflow_head(PageId::NONE);
            pager.dispose_page(node.into_page())?;
            return Err(ArboretumError::OversizeObject {
                size: object.len(),
                capacity,
            });
        }

        // Tail is full: link a new tail and retry once
        let node = OverflowNode::create(pager.new_page()?);
        log::debug!(
            "leaf {}: chained overflow node {}",
            self.page_id(),
            node.page_id()
        );
        self.overflow
            .last_mut()
            .unwrap()
            .set_next_overflow(node.page_id());
        self.overflow.push(node);

        if self.overflow.last_mut().unwrap().insert(object) {
            let count = self.overflow_occupation();
            self.set_overflow_occupation(count + 1);
            return Ok(InsertOutcome::SuccessNewOverflow);
        }

        // Still no fit: the object exceeds an empty node. Roll back.
        let node = self.overflow.pop().unwrap();
        let capacity = node.free_space();
        self.overflow
            .last_mut()
            .unwrap()
            .set_next_overflow(PageId::NONE);
        pager.dispose_page(node.into_page())?;
        Err(ArboretumError::OversizeObject {
            size: object.len(),
            capacity,
        })
    }

    /// Delete the entry at the logical position `idx`.
    ///
    /// Positions in the leaf body close their gap with an overlap-safe move;
    /// positions in the overflow chain delete from the owning node, and an
    /// overflow node left empty is unlinked and disposed. After a body
    /// delete, chain objects migrate back into the body while they fit, so a
    /// chained leaf stays full.
    pub fn delete_at(&mut self, pager: &impl PageManager, idx: usize) -> Result<()> {
        let occ = self.occupation();
        let total = self.num_entries();
        if idx >= total {
            return Err(ArboretumError::EntryIndexOutOfRange {
                index: idx,
                count: total,
            });
        }

        if idx < occ {
            // The duplicated key lives only in the body entries; capture it
            // before the delete in case the body empties.
            let refill_key = if self.has_overflow() {
                Some(self.body_key_at(0))
            } else {
                None
            };
            self.delete_from_body(idx);
            if let Some(key) = refill_key {
                self.refill_from_chain(pager, key)?;
            }
            return Ok(());
        }

        if self.overflow.is_empty() {
            return Err(ArboretumError::BrokenOverflowChain(self.page_id()));
        }

        let mut base = occ;
        for pos in 0..self.overflow.len() {
            let len = self.overflow[pos].num_entries();
            if idx < base + len {
                self.overflow[pos].delete_at(idx - base);

                if self.overflow[pos].num_entries() == 0 {
                    self.unlink_chain_node(pager, pos)?;
                }

                let count = self.overflow_occupation();
                self.set_overflow_occupation(count - 1);
                return Ok(());
            }
            base += len;
        }

        Err(ArboretumError::BrokenOverflowChain(self.page_id()))
    }

    fn delete_from_body(&mut self, idx: usize) {
        let occ = self.occupation();
        let last = occ - 1;
        let del_size = self.body_object_size_at(idx);

        if idx < last {
            // Slide later objects back toward the page end
            let src = self.object_offset_at(last);
            let len = self.object_offset_at(idx) - src;
            self.page.move_bytes(src, src + del_size, len);

            for i in idx..last {
                let k = self.body_key_at(i + 1);
                let o = self.object_offset_at(i + 1) + del_size;
                self.set_body_key_at(i, k);
                self.set_object_offset_at(i, o);
            }
        }

        node::set_occupation(&mut self.page, occ - 1);
        self.page.mark_dirty();
    }

    /// Pull chain objects back into the body while they fit, so that a leaf
    /// owning a chain is always full of its duplicated key.
    fn refill_from_chain(&mut self, pager: &impl PageManager, key: K) -> Result<()> {
        while let Some(tail) = self.overflow.last() {
            let last = tail.num_entries() - 1;
            let size = tail.object_size_at(last);
            if size + Self::ENTRY_SIZE > self.leaf_free() {
                break;
            }

            let object = tail.object_at(last).to_vec();
            let occ = self.occupation();
            self.insert_into_body(occ, key, &object);

            let tail = self.overflow.last_mut().unwrap();
            tail.delete_at(last);
            if tail.num_entries() == 0 {
                let pos = self.overflow.len() - 1;
                self.unlink_chain_node(pager, pos)?;
            }
            let count = self.overflow_occupation();
            self.set_overflow_occupation(count - 1);
        }
        Ok(())
    }

    /// Unlink the chain node at `pos` from its predecessor and dispose it
    fn unlink_chain_node(&mut self, pager: &impl PageManager, pos: usize) -> Result<()> {
        let next = self.overflow[pos].next_overflow();
        if pos == 0 {
            self.set_overflow_head(next);
        } else {
            self.overflow[pos - 1].set_next_overflow(next);
        }
        let node = self.overflow.remove(pos);
        log::debug!(
            "leaf {}: disposed empty overflow node {}",
            self.page_id(),
            node.page_id()
        );
        pager.dispose_page(node.into_page())
    }

    /// Append an entry at the end of the body without searching. Split code
    /// uses this when the insertion order is already known.
    pub fn push_entry(&mut self, key: K, object: &[u8]) -> bool {
        if object.len() + Self::ENTRY_SIZE > self.leaf_free() {
            return false;
        }
        let occ = self.occupation();
        debug_assert!(occ == 0 || key >= self.body_key_at(occ - 1));
        self.insert_into_body(occ, key, object);
        true
    }

    /// Move body entries `[from..]` into `other` (an empty leaf), preserving
    /// order. Used by splits.
    pub fn move_tail_to(&mut self, from: usize, other: &mut LeafNode<K>) {
        let occ = self.occupation();
        debug_assert!(from <= occ);
        debug_assert_eq!(other.occupation(), 0);

        for i in from..occ {
            let key = self.body_key_at(i);
            let object = {
                let offset = self.object_offset_at(i);
                let size = self.body_object_size_at(i);
                self.page.as_bytes()[offset..offset + size].to_vec()
            };
            let fit = other.push_entry(key, &object);
            debug_assert!(fit);
        }

        node::set_occupation(&mut self.page, from);
        self.page.mark_dirty();
    }

    /// Hand this leaf's whole overflow chain to `other`, which must not own
    /// one. Used by the degenerate split of a pure-duplicate leaf.
    pub fn transfer_chain_to(&mut self, other: &mut LeafNode<K>) {
        debug_assert!(!other.has_overflow());
        other.set_overflow_head(self.overflow_page_id());
        other.set_overflow_occupation(self.overflow_occupation());
        other.overflow = std::mem::take(&mut self.overflow);
        self.set_overflow_head(PageId::NONE);
        self.set_overflow_occupation(0);
    }

    /// Sum of entry counts over the loaded overflow chain. Structural checks
    /// compare this against the recorded overflow occupation.
    pub fn chain_entries_sum(&self) -> usize {
        self.overflow.iter().map(|n| n.num_entries()).sum()
    }

    /// Remove all body entries and forget the chain bookkeeping
    pub fn remove_all(&mut self) {
        node::set_occupation(&mut self.page, 0);
        self.set_overflow_head(PageId::NONE);
        self.set_overflow_occupation(0);
        self.overflow.clear();
        self.page.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPageManager;

    fn obj(byte: u8, len: usize) -> Vec<u8> {
        vec![byte; len]
    }

    fn new_leaf(pm: &MemoryPageManager) -> LeafNode<u32> {
        LeafNode::create(pm.new_page().unwrap())
    }

    #[test]
    fn test_sorted_insert_and_lookup() {
        let pm = MemoryPageManager::new();
        let mut leaf = new_leaf(&pm);

        for k in [5u32, 2, 8, 1, 9, 3] {
            let outcome = leaf.insert(&pm, k, &obj(k as u8, 10), true).unwrap();
            assert_eq!(outcome, InsertOutcome::Success);
        }

        assert_eq!(leaf.occupation(), 6);
        let keys: Vec<u32> = (0..6).map(|i| leaf.key_at(i)).collect();
        assert_eq!(keys, vec![1, 2, 3, 5, 8, 9]);
        for i in 0..6 {
            let k = leaf.key_at(i);
            assert_eq!(leaf.object_at(i).unwrap(), &obj(k as u8, 10)[..]);
        }

        leaf.release(&pm).unwrap();
        assert_eq!(pm.outstanding_pins(), 0);
    }

    #[test]
    fn test_duplicate_rejected_when_disallowed() {
        let pm = MemoryPageManager::new();
        let mut leaf = new_leaf(&pm);

        leaf.insert(&pm, 7u32, &obj(1, 8), true).unwrap();
        let outcome = leaf.insert(&pm, 7u32, &obj(2, 8), false).unwrap();
        assert_eq!(outcome, InsertOutcome::Duplication);
        assert_eq!(leaf.occupation(), 1);

        leaf.release(&pm).unwrap();
    }

    #[test]
    fn test_find_first_and_last() {
        let pm = MemoryPageManager::new();
        let mut leaf = new_leaf(&pm);

        for k in [3u32, 5, 5, 5, 9] {
            leaf.insert(&pm, k, &obj(k as u8, 6), true).unwrap();
        }

        assert_eq!(leaf.find_first(5), Ok(1));
        assert_eq!(leaf.find_last(5), Ok(3));
        assert_eq!(leaf.find_first(4), Err(1));
        assert_eq!(leaf.find_last(10), Err(5));

        leaf.release(&pm).unwrap();
    }

    #[test]
    fn test_delete_from_body() {
        let pm = MemoryPageManager::new();
        let mut leaf = new_leaf(&pm);

        for k in [1u32, 2, 3, 4] {
            leaf.insert(&pm, k, &obj(k as u8, k as usize + 4), true).unwrap();
        }

        leaf.delete_at(&pm, 1).unwrap();
        assert_eq!(leaf.occupation(), 3);
        assert_eq!(leaf.key_at(0), 1);
        assert_eq!(leaf.key_at(1), 3);
        assert_eq!(leaf.object_at(1).unwrap(), &obj(3, 7)[..]);
        assert_eq!(leaf.object_at(2).unwrap(), &obj(4, 8)[..]);

        leaf.release(&pm).unwrap();
    }

    /// Page sized so exactly 4 entries of 40-byte objects fit the body.
    fn small_pm() -> MemoryPageManager {
        // body capacity = page - 22; each entry costs 8 + 40
        MemoryPageManager::with_page_size(512)
    }

    fn fill_with_duplicates(
        pm: &MemoryPageManager,
        leaf: &mut LeafNode<u32>,
        n: usize,
    ) -> Vec<InsertOutcome> {
        (0..n)
            .map(|i| leaf.insert(pm, 7u32, &obj(i as u8, 102), true).unwrap())
            .collect()
    }

    #[test]
    fn test_overflow_chain_growth() {
        let pm = small_pm();
        let mut leaf = new_leaf(&pm);

        // 4 fit the body (4 * 110 = 440 <= 490), the rest chain
        let outcomes = fill_with_duplicates(&pm, &mut leaf, 10);
        assert_eq!(outcomes[3], InsertOutcome::Success);
        assert_eq!(outcomes[4], InsertOutcome::SuccessNewOverflow);

        assert_eq!(leaf.occupation(), 4);
        assert_eq!(leaf.overflow_occupation(), 6);
        assert_eq!(leaf.num_entries(), 10);
        // 6 chained objects at 106 bytes each, 502 usable per node
        assert_eq!(leaf.overflow_chain_len(), 2);

        // every logical index resolves, and overflow entries carry the key
        for i in 0..10 {
            assert_eq!(leaf.key_at(i), 7);
            assert_eq!(leaf.object_at(i).unwrap(), &obj(i as u8, 102)[..]);
        }

        leaf.release(&pm).unwrap();
        assert_eq!(pm.outstanding_pins(), 0);
    }

    #[test]
    fn test_overflow_reopen() {
        let pm = small_pm();
        let mut leaf = new_leaf(&pm);
        fill_with_duplicates(&pm, &mut leaf, 10);
        let id = leaf.page_id();
        leaf.release(&pm).unwrap();

        let leaf = LeafNode::<u32>::open(&pm, pm.get_page(id).unwrap()).unwrap();
        assert_eq!(leaf.num_entries(), 10);
        assert_eq!(leaf.overflow_occupation(), 6);
        assert_eq!(leaf.object_at(9).unwrap(), &obj(9, 102)[..]);
        leaf.release(&pm).unwrap();
        assert_eq!(pm.outstanding_pins(), 0);
    }

    #[test]
    fn test_delete_in_chain_disposes_empty_node() {
        let pm = small_pm();
        let mut leaf = new_leaf(&pm);
        fill_with_duplicates(&pm, &mut leaf, 10);
        assert_eq!(leaf.overflow_chain_len(), 2);

        // The 6th duplicate is the 2nd chain object
        leaf.delete_at(&pm, 5).unwrap();
        assert_eq!(leaf.overflow_occupation(), 5);
        assert_eq!(leaf.num_entries(), 9);

        // Drain the tail node: its remaining entries are indexes 8 (after
        // one delete the tail holds the 2 last objects)
        while leaf.overflow_chain_len() == 2 {
            leaf.delete_at(&pm, leaf.num_entries() - 1).unwrap();
        }
        assert_eq!(leaf.overflow_chain_len(), 1);

        leaf.release(&pm).unwrap();
        assert_eq!(pm.outstanding_pins(), 0);
    }

    #[test]
    fn test_body_delete_refills_from_chain() {
        let pm = small_pm();
        let mut leaf = new_leaf(&pm);
        fill_with_duplicates(&pm, &mut leaf, 6);
        assert_eq!(leaf.occupation(), 4);
        assert_eq!(leaf.overflow_occupation(), 2);

        // Deleting from the body pulls a chain object back in
        leaf.delete_at(&pm, 0).unwrap();
        assert_eq!(leaf.occupation(), 4);
        assert_eq!(leaf.overflow_occupation(), 1);
        assert_eq!(leaf.num_entries(), 5);

        leaf.delete_at(&pm, 0).unwrap();
        assert_eq!(leaf.occupation(), 4);
        assert_eq!(leaf.overflow_occupation(), 0);
        assert!(!leaf.has_overflow());
        assert!(leaf.overflow_page_id().is_none());

        leaf.release(&pm).unwrap();
        assert_eq!(pm.outstanding_pins(), 0);
    }

    #[test]
    fn test_oversize_duplicate_rolls_back() {
        let pm = small_pm();
        let mut leaf = new_leaf(&pm);
        fill_with_duplicates(&pm, &mut leaf, 4);

        // Larger than an empty overflow node can hold
        let big = obj(0xEE, 600);
        let err = leaf.insert(&pm, 7u32, &big, true);
        assert!(matches!(err, Err(ArboretumError::OversizeObject { .. })));
        assert!(!leaf.has_overflow());
        assert!(leaf.overflow_page_id().is_none());
        assert_eq!(leaf.overflow_occupation(), 0);

        leaf.release(&pm).unwrap();
        assert_eq!(pm.outstanding_pins(), 0);
    }

    #[test]
    fn test_full_leaf_with_distinct_keys_reports_node_full() {
        let pm = small_pm();
        let mut leaf = new_leaf(&pm);

        for k in 0..4u32 {
            leaf.insert(&pm, k, &obj(k as u8, 102), true).unwrap();
        }
        let outcome = leaf.insert(&pm, 2u32, &obj(9, 102), true).unwrap();
        assert_eq!(outcome, InsertOutcome::NodeFull);

        leaf.release(&pm).unwrap();
    }

    #[test]
    fn test_find_median_avoids_splitting_duplicates() {
        let pm = MemoryPageManager::new();
        let mut leaf = new_leaf(&pm);

        for k in [1u32, 2, 2, 2, 2, 3] {
            leaf.insert(&pm, k, &obj(k as u8, 8), true).unwrap();
        }
        // Naive median 3 sits inside the run of 2s; the walk moves it
        let m = leaf.find_median();
        assert!(m == 1 || m == 5);
        assert_ne!(leaf.body_key_at(m - 1), leaf.body_key_at(m));

        leaf.release(&pm).unwrap();
    }

    #[test]
    fn test_find_median_all_equal_returns_zero() {
        let pm = MemoryPageManager::new();
        let mut leaf = new_leaf(&pm);
        for _ in 0..5 {
            leaf.insert(&pm, 4u32, &obj(4, 8), true).unwrap();
        }
        assert_eq!(leaf.find_median(), 0);
        leaf.release(&pm).unwrap();
    }

    #[test]
    fn test_move_tail_to() {
        let pm = MemoryPageManager::new();
        let mut leaf = new_leaf(&pm);
        for k in [1u32, 2, 3, 4, 5, 6] {
            leaf.insert(&pm, k, &obj(k as u8, 12), true).unwrap();
        }

        let mut right = new_leaf(&pm);
        leaf.move_tail_to(3, &mut right);

        assert_eq!(leaf.occupation(), 3);
        assert_eq!(right.occupation(), 3);
        assert_eq!(leaf.key_at(2), 3);
        assert_eq!(right.key_at(0), 4);
        assert_eq!(right.object_at(2).unwrap(), &obj(6, 12)[..]);

        leaf.release(&pm).unwrap();
        right.release(&pm).unwrap();
    }

    #[test]
    fn test_transfer_chain() {
        let pm = small_pm();
        let mut leaf = new_leaf(&pm);
        fill_with_duplicates(&pm, &mut leaf, 6);
        let head = leaf.overflow_page_id();

        let mut other = new_leaf(&pm);
        other.insert(&pm, 7u32, &obj(0, 10), true).unwrap();
        leaf.transfer_chain_to(&mut other);

        assert!(!leaf.has_overflow());
        assert_eq!(leaf.overflow_occupation(), 0);
        assert_eq!(other.overflow_page_id(), head);
        assert_eq!(other.overflow_occupation(), 2);

        leaf.release(&pm).unwrap();
        other.release(&pm).unwrap();
        assert_eq!(pm.outstanding_pins(), 0);
    }
}
