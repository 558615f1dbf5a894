//! B-tree driver: descent, splits, duplicate routing, ordered lookups.

use crate::error::{ArboretumError, InsertOutcome, Result};
use crate::node::{self, IndexNode, LeafNode, NodeKind};
use crate::object::DataObject;
use crate::page::Page;
use crate::result::{KeyedResult, QueryKind};
use crate::storage::PageManager;
use crate::types::{Key, PageId};
use std::marker::PhantomData;

const HDR_ROOT: usize = 0;
const HDR_HEIGHT: usize = 4;
const HDR_OBJECT_COUNT: usize = 8;

/// Result of a recursive descent during insertion
enum Descend<K> {
    Inserted,
    Duplicate,
    Split { separator: K, right: PageId },
}

/// A disk-backed B-tree over (key, object) pairs.
///
/// Duplicate keys are supported: equal keys always live in one leaf, spilling
/// into an overflow chain when they fill it, and are never split across index
/// boundaries. Leaves are doubly linked in key order, which is what range
/// lookups walk.
pub struct BTree<K: Key, O: DataObject, P: PageManager> {
    pager: P,
    root: PageId,
    height: u32,
    object_count: u64,
    _marker: PhantomData<(K, O)>,
}

impl<K: Key, O: DataObject, P: PageManager> BTree<K, O, P> {
    /// Create a new tree on an empty store, or load the tree the store holds
    pub fn new(pager: P) -> Result<Self> {
        let mut tree = Self {
            pager,
            root: PageId::NONE,
            height: 0,
            object_count: 0,
            _marker: PhantomData,
        };
        if tree.pager.is_empty() {
            tree.write_header()?;
        } else {
            tree.load_header()?;
        }
        Ok(tree)
    }

    fn load_header(&mut self) -> Result<()> {
        let header = self.pager.header_page()?;
        self.root = PageId::new(header.read_u32(HDR_ROOT));
        self.height = header.read_u32(HDR_HEIGHT);
        self.object_count = u64::from_le_bytes(
            header.as_bytes()[HDR_OBJECT_COUNT..HDR_OBJECT_COUNT + 8]
                .try_into()
                .unwrap(),
        );
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        let mut header = self.pager.header_page()?;
        header.write_u32(HDR_ROOT, self.root.value());
        header.write_u32(HDR_HEIGHT, self.height);
        header.as_bytes_mut()[HDR_OBJECT_COUNT..HDR_OBJECT_COUNT + 8]
            .copy_from_slice(&self.object_count.to_le_bytes());
        self.pager.write_header_page(&header)
    }

    /// The page manager backing this tree
    pub fn pager(&self) -> &P {
        &self.pager
    }

    /// Root page id; the none sentinel for an empty tree
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Height of the tree (0 when empty, 1 for a single leaf)
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of stored objects
    pub fn num_objects(&self) -> u64 {
        self.object_count
    }

    /// Insert an object under `key`; duplicate keys are allowed
    pub fn insert(&mut self, key: K, object: &O) -> Result<()> {
        self.insert_impl(key, object, true).map(|_| ())
    }

    /// Insert an object under `key`, rejecting duplicates.
    ///
    /// Returns `false` when the key already exists (nothing is inserted).
    pub fn insert_unique(&mut self, key: K, object: &O) -> Result<bool> {
        self.insert_impl(key, object, false)
    }

    fn insert_impl(&mut self, key: K, object: &O, dup_allowed: bool) -> Result<bool> {
        let bytes = object.serialize();
        let capacity = LeafNode::<K>::empty_capacity(self.pager.min_page_size());
        if bytes.len() > capacity {
            return Err(ArboretumError::OversizeObject {
                size: bytes.len(),
                capacity,
            });
        }

        if self.root.is_none() {
            let mut leaf = LeafNode::<K>::create(self.pager.new_page()?);
            leaf.insert(&self.pager, key, &bytes, dup_allowed)?;
            self.root = leaf.page_id();
            self.height = 1;
            leaf.release(&self.pager)?;
        } else {
            match self.descend_insert(self.root, key, &bytes, dup_allowed)? {
                Descend::Duplicate => return Ok(false),
                Descend::Inserted => {}
                Descend::Split { separator, right } => {
                    let mut new_root = IndexNode::<K>::create(self.pager.new_page()?);
                    new_root.set_left_child_at(0, self.root);
                    new_root.insert_entry_at(0, separator, right);
                    log::debug!(
                        "root split: new root {} at height {}",
                        new_root.page_id(),
                        self.height + 1
                    );
                    self.root = new_root.page_id();
                    self.height += 1;
                    new_root.release(&self.pager)?;
                }
            }
        }

        self.object_count += 1;
        self.write_header()?;
        Ok(true)
    }

    fn descend_insert(
        &self,
        page_id: PageId,
        key: K,
        bytes: &[u8],
        dup_allowed: bool,
    ) -> Result<Descend<K>> {
        let page = self.pager.get_page(page_id)?;
        match node::node_kind(&page) {
            Some(NodeKind::Index) => self.index_insert(page, key, bytes, dup_allowed),
            Some(NodeKind::Leaf) => self.leaf_insert(page, key, bytes, dup_allowed),
            _ => {
                let found = page.read_u16(0);
                self.pager.release_page(page)?;
                Err(ArboretumError::NodeTypeMismatch {
                    page_id,
                    expected: NodeKind::Leaf.code(),
                    found,
                })
            }
        }
    }

    fn index_insert(
        &self,
        page: Page,
        key: K,
        bytes: &[u8],
        dup_allowed: bool,
    ) -> Result<Descend<K>> {
        let mut node = IndexNode::<K>::open(page)?;
        let child = node.left_child_at(node.find(key));

        let outcome = match self.descend_insert(child, key, bytes, dup_allowed) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = node.release(&self.pager);
                return Err(e);
            }
        };

        let result = match outcome {
            Descend::Split { separator, right } => {
                let pos = node.find(separator);
                if node.insert_entry_at(pos, separator, right) {
                    Descend::Inserted
                } else {
                    match self.split_index(&mut node, separator, right) {
                        Ok((promoted, new_right)) => Descend::Split {
                            separator: promoted,
                            right: new_right,
                        },
                        Err(e) => {
                            let _ = node.release(&self.pager);
                            return Err(e);
                        }
                    }
                }
            }
            other => other,
        };

        node.release(&self.pager)?;
        Ok(result)
    }

    /// Split a full index node around its median entry. The median key is
    /// promoted; entries right of it form a new node whose leftmost pointer
    /// is the median's right child.
    fn split_index(
        &self,
        left: &mut IndexNode<K>,
        separator: K,
        right_child: PageId,
    ) -> Result<(K, PageId)> {
        let n = left.num_entries();
        let m = left.find_median();
        let promoted = left.key_at(m - 1);
        let promoted_right = left.right_child_at(m - 1);

        let mut right = IndexNode::<K>::create(self.pager.new_page()?);
        right.set_left_child_at(0, promoted_right);
        for i in m..n {
            right.insert_entry_at(i - m, left.key_at(i), left.right_child_at(i));
        }
        for i in ((m - 1)..n).rev() {
            left.delete_entry_at(i);
        }

        if separator < promoted {
            let pos = left.find(separator);
            left.insert_entry_at(pos, separator, right_child);
        } else {
            let pos = right.find(separator);
            right.insert_entry_at(pos, separator, right_child);
        }

        log::debug!(
            "index split: {} -> {} promoting a separator",
            left.page_id(),
            right.page_id()
        );
        let right_id = right.page_id();
        right.release(&self.pager)?;
        Ok((promoted, right_id))
    }

    fn leaf_insert(&self, page: Page, key: K, bytes: &[u8], dup_allowed: bool) -> Result<Descend<K>> {
        let mut leaf = LeafNode::<K>::open(&self.pager, page)?;

        let outcome = match leaf.insert(&self.pager, key, bytes, dup_allowed) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = leaf.release(&self.pager);
                return Err(e);
            }
        };

        let result = match outcome {
            InsertOutcome::Success | InsertOutcome::SuccessNewOverflow => Descend::Inserted,
            InsertOutcome::Duplication => Descend::Duplicate,
            InsertOutcome::NodeFull => match self.split_leaf(&mut leaf, key, bytes) {
                Ok((separator, right)) => Descend::Split { separator, right },
                Err(e) => {
                    let _ = leaf.release(&self.pager);
                    return Err(e);
                }
            },
        };

        leaf.release(&self.pager)?;
        Ok(result)
    }

    /// Split a full leaf and place the pending entry on the correct side.
    ///
    /// A median of 0 means every key in the leaf is equal (and differs from
    /// the incoming key, or the chain would have taken it): the leaf cannot
    /// be divided, so the new key gets a side of its own and the duplicates —
    /// chain included — stay together on the other.
    fn split_leaf(&self, leaf: &mut LeafNode<K>, key: K, bytes: &[u8]) -> Result<(K, PageId)> {
        let m = leaf.find_median();
        let mut right = LeafNode::<K>::create(self.pager.new_page()?);

        let promoted = if m == 0 {
            let leaf_key = leaf.key_at(0);
            debug_assert!(key != leaf_key);
            if key > leaf_key {
                let fit = right.push_entry(key, bytes);
                debug_assert!(fit);
                leaf_key
            } else {
                leaf.move_tail_to(0, &mut right);
                if leaf.has_overflow() {
                    leaf.transfer_chain_to(&mut right);
                }
                let fit = leaf.push_entry(key, bytes);
                debug_assert!(fit);
                key
            }
        } else {
            let promoted = leaf.key_at(m - 1);
            leaf.move_tail_to(m, &mut right);

            let target = if key <= promoted { &mut *leaf } else { &mut right };
            match target.insert(&self.pager, key, bytes, true) {
                Ok(InsertOutcome::Success) | Ok(InsertOutcome::SuccessNewOverflow) => {}
                Ok(_) => {
                    // One split frees roughly half a page; an object mix that
                    // defeats it is outside the tree's design envelope.
                    let _ = right.release(&self.pager);
                    return Err(ArboretumError::invalid_operation(
                        "object does not fit either half of a split leaf",
                    ));
                }
                Err(e) => {
                    let _ = right.release(&self.pager);
                    return Err(e);
                }
            }
            promoted
        };

        // Stitch the sibling chain: right goes between leaf and its old next
        right.set_prev(leaf.page_id());
        let old_next = leaf.next();
        right.set_next(old_next);
        leaf.set_next(right.page_id());
        if old_next.is_some() {
            let mut successor = LeafNode::<K>::open(&self.pager, self.pager.get_page(old_next)?)?;
            successor.set_prev(right.page_id());
            successor.release(&self.pager)?;
        }

        log::debug!("leaf split: {} -> {}", leaf.page_id(), right.page_id());
        let right_id = right.page_id();
        right.release(&self.pager)?;
        Ok((promoted, right_id))
    }

    /// Descend to the leaf that owns `key`, without modifying anything
    fn find_leaf(&self, key: K) -> Result<Option<LeafNode<K>>> {
        if self.root.is_none() {
            return Ok(None);
        }
        let mut current = self.root;
        loop {
            let page = self.pager.get_page(current)?;
            match node::node_kind(&page) {
                Some(NodeKind::Index) => {
                    let node = IndexNode::<K>::open(page)?;
                    let child = node.left_child_at(node.find(key));
                    node.release(&self.pager)?;
                    current = child;
                }
                Some(NodeKind::Leaf) => {
                    return Ok(Some(LeafNode::open(&self.pager, page)?));
                }
                _ => {
                    let found = page.read_u16(0);
                    self.pager.release_page(page)?;
                    return Err(ArboretumError::NodeTypeMismatch {
                        page_id: current,
                        expected: NodeKind::Leaf.code(),
                        found,
                    });
                }
            }
        }
    }

    /// Every object stored under `key`, byte-identical to what was inserted
    pub fn search(&self, key: K) -> Result<KeyedResult<O, K>> {
        let mut result = KeyedResult::new();
        result.set_query_info(QueryKind::ToEqual, Some(key), Some(key));

        let Some(leaf) = self.find_leaf(key)? else {
            return Ok(result);
        };

        if let Ok(first) = leaf.find_first(key) {
            for idx in first..leaf.num_entries() {
                if leaf.key_at(idx) != key {
                    break;
                }
                let object = match leaf.object_at(idx) {
                    Ok(bytes) => O::deserialize(bytes),
                    Err(e) => {
                        let _ = leaf.release(&self.pager);
                        return Err(e);
                    }
                };
                result.add(object, key);
            }
        }
        leaf.release(&self.pager)?;
        Ok(result)
    }

    /// Every object with `low <= key <= high`, collected along the leaf
    /// sibling chain
    pub fn search_range(&self, low: K, high: K) -> Result<KeyedResult<O, K>> {
        let mut result = KeyedResult::new();
        result.set_query_info(QueryKind::ToBetween, Some(low), Some(high));
        if high < low {
            return Ok(result);
        }

        let Some(mut leaf) = self.find_leaf(low)? else {
            return Ok(result);
        };

        'chain: loop {
            for idx in 0..leaf.num_entries() {
                let key = leaf.key_at(idx);
                if key < low {
                    continue;
                }
                if high < key {
                    leaf.release(&self.pager)?;
                    break 'chain;
                }
                let object = match leaf.object_at(idx) {
                    Ok(bytes) => O::deserialize(bytes),
                    Err(e) => {
                        let _ = leaf.release(&self.pager);
                        return Err(e);
                    }
                };
                result.add(object, key);
            }

            let next = leaf.next();
            leaf.release(&self.pager)?;
            if next.is_none() {
                break;
            }
            leaf = LeafNode::open(&self.pager, self.pager.get_page(next)?)?;
        }

        Ok(result)
    }

    /// Descend to the first leaf in key order
    fn leftmost_leaf(&self) -> Result<Option<LeafNode<K>>> {
        if self.root.is_none() {
            return Ok(None);
        }
        let mut current = self.root;
        loop {
            let page = self.pager.get_page(current)?;
            match node::node_kind(&page) {
                Some(NodeKind::Index) => {
                    let node = IndexNode::<K>::open(page)?;
                    let child = node.left_child_at(0);
                    node.release(&self.pager)?;
                    current = child;
                }
                Some(NodeKind::Leaf) => {
                    return Ok(Some(LeafNode::open(&self.pager, page)?));
                }
                _ => {
                    let found = page.read_u16(0);
                    self.pager.release_page(page)?;
                    return Err(ArboretumError::NodeTypeMismatch {
                        page_id: current,
                        expected: NodeKind::Leaf.code(),
                        found,
                    });
                }
            }
        }
    }

    /// Walk the leaf chain from the front, collecting keys below `high`
    fn collect_below(
        &self,
        high: K,
        inclusive: bool,
        kind: QueryKind,
    ) -> Result<KeyedResult<O, K>> {
        let mut result = KeyedResult::new();
        result.set_query_info(kind, None, Some(high));

        let Some(mut leaf) = self.leftmost_leaf()? else {
            return Ok(result);
        };

        'chain: loop {
            for idx in 0..leaf.num_entries() {
                let key = leaf.key_at(idx);
                let within = if inclusive { key <= high } else { key < high };
                if !within {
                    leaf.release(&self.pager)?;
                    break 'chain;
                }
                let object = match leaf.object_at(idx) {
                    Ok(bytes) => O::deserialize(bytes),
                    Err(e) => {
                        let _ = leaf.release(&self.pager);
                        return Err(e);
                    }
                };
                result.add(object, key);
            }

            let next = leaf.next();
            leaf.release(&self.pager)?;
            if next.is_none() {
                break;
            }
            leaf = LeafNode::open(&self.pager, self.pager.get_page(next)?)?;
        }

        Ok(result)
    }

    /// Walk the leaf chain from the leaf owning `low` to the end, collecting
    /// keys above `low`
    fn collect_above(
        &self,
        low: K,
        inclusive: bool,
        kind: QueryKind,
    ) -> Result<KeyedResult<O, K>> {
        let mut result = KeyedResult::new();
        result.set_query_info(kind, Some(low), None);

        let Some(mut leaf) = self.find_leaf(low)? else {
            return Ok(result);
        };

        loop {
            for idx in 0..leaf.num_entries() {
                let key = leaf.key_at(idx);
                let within = if inclusive { key >= low } else { key > low };
                if !within {
                    continue;
                }
                let object = match leaf.object_at(idx) {
                    Ok(bytes) => O::deserialize(bytes),
                    Err(e) => {
                        let _ = leaf.release(&self.pager);
                        return Err(e);
                    }
                };
                result.add(object, key);
            }

            let next = leaf.next();
            leaf.release(&self.pager)?;
            if next.is_none() {
                break;
            }
            leaf = LeafNode::open(&self.pager, self.pager.get_page(next)?)?;
        }

        Ok(result)
    }

    /// Every object with key strictly less than `high`
    pub fn search_less_than(&self, high: K) -> Result<KeyedResult<O, K>> {
        self.collect_below(high, false, QueryKind::ToLessThan)
    }

    /// Every object with key at most `high`
    pub fn search_at_most(&self, high: K) -> Result<KeyedResult<O, K>> {
        self.collect_below(high, true, QueryKind::ToLessThanOrEqual)
    }

    /// Every object with key strictly greater than `low`
    pub fn search_greater_than(&self, low: K) -> Result<KeyedResult<O, K>> {
        self.collect_above(low, false, QueryKind::ToGreaterThan)
    }

    /// Every object with key at least `low`
    pub fn search_at_least(&self, low: K) -> Result<KeyedResult<O, K>> {
        self.collect_above(low, true, QueryKind::ToGreaterThanOrEqual)
    }

    /// Delete one occurrence of `key` (the first in logical order).
    ///
    /// Returns `true` when an object was removed. Underflowing nodes are not
    /// merged; an emptied overflow node is unlinked and disposed.
    pub fn delete(&mut self, key: K) -> Result<bool> {
        let Some(mut leaf) = self.find_leaf(key)? else {
            return Ok(false);
        };

        let deleted = match leaf.find_first(key) {
            Ok(idx) => {
                if let Err(e) = leaf.delete_at(&self.pager, idx) {
                    let _ = leaf.release(&self.pager);
                    return Err(e);
                }
                true
            }
            Err(_) => false,
        };
        leaf.release(&self.pager)?;

        if deleted {
            self.object_count -= 1;
            self.write_header()?;
        }
        Ok(deleted)
    }

    /// Validate the structural invariants of the whole tree: leaf key order,
    /// separator correctness, overflow bookkeeping, and the leaf sibling
    /// chain. Intended for tests and debugging.
    pub fn check(&self) -> Result<()> {
        if self.root.is_none() {
            return Ok(());
        }
        let mut leaves: Vec<(PageId, PageId, PageId)> = Vec::new();
        self.check_subtree(self.root, None, None, &mut leaves)?;

        for (i, &(id, prev, next)) in leaves.iter().enumerate() {
            let expect_prev = if i == 0 { PageId::NONE } else { leaves[i - 1].0 };
            let expect_next = if i + 1 == leaves.len() {
                PageId::NONE
            } else {
                leaves[i + 1].0
            };
            if prev != expect_prev || next != expect_next {
                return Err(ArboretumError::corruption(format!(
                    "leaf {} has siblings ({}, {}), expected ({}, {})",
                    id, prev, next, expect_prev, expect_next
                )));
            }
        }
        Ok(())
    }

    /// Check one subtree against its key bounds: every key must be greater
    /// than `lower` (when given) and at most `upper` (when given).
    fn check_subtree(
        &self,
        page_id: PageId,
        lower: Option<K>,
        upper: Option<K>,
        leaves: &mut Vec<(PageId, PageId, PageId)>,
    ) -> Result<()> {
        let in_bounds = |k: K| {
            lower.map_or(true, |lo| k > lo) && upper.map_or(true, |hi| k <= hi)
        };

        let page = self.pager.get_page(page_id)?;
        match node::node_kind(&page) {
            Some(NodeKind::Index) => {
                let node = IndexNode::<K>::open(page)?;
                let n = node.num_entries();
                if n == 0 {
                    let _ = node.release(&self.pager);
                    return Err(ArboretumError::corruption(format!(
                        "empty index page {}",
                        page_id
                    )));
                }
                let check = (|| -> Result<()> {
                    for i in 0..n {
                        let key = node.key_at(i);
                        if !in_bounds(key) {
                            return Err(ArboretumError::corruption(format!(
                                "separator out of bounds in index page {}",
                                page_id
                            )));
                        }
                        if i + 1 < n && node.key_at(i + 1) <= key {
                            return Err(ArboretumError::corruption(format!(
                                "separators out of order in index page {}",
                                page_id
                            )));
                        }
                    }
                    Ok(())
                })();
                if let Err(e) = check {
                    let _ = node.release(&self.pager);
                    return Err(e);
                }

                let mut children = Vec::with_capacity(n + 1);
                children.push((node.left_child_at(0), lower, Some(node.key_at(0))));
                for i in 0..n {
                    let child_upper = if i + 1 < n { Some(node.key_at(i + 1)) } else { upper };
                    children.push((node.right_child_at(i), Some(node.key_at(i)), child_upper));
                }
                node.release(&self.pager)?;

                for (child, lo, hi) in children {
                    self.check_subtree(child, lo, hi, leaves)?;
                }
                Ok(())
            }
            Some(NodeKind::Leaf) => {
                let leaf = LeafNode::<K>::open(&self.pager, page)?;
                let verdict = (|| -> Result<()> {
                    let occ = leaf.occupation();
                    for i in 0..occ {
                        let key = leaf.key_at(i);
                        if !in_bounds(key) {
                            return Err(ArboretumError::corruption(format!(
                                "leaf {} key out of bounds",
                                page_id
                            )));
                        }
                        if i + 1 < occ && leaf.key_at(i + 1) < key {
                            return Err(ArboretumError::corruption(format!(
                                "leaf {} keys out of order",
                                page_id
                            )));
                        }
                    }
                    if leaf.overflow_page_id().is_some() {
                        if occ == 0 || leaf.key_at(0) != leaf.key_at(occ - 1) {
                            return Err(ArboretumError::corruption(format!(
                                "leaf {} owns a chain over distinct keys",
                                page_id
                            )));
                        }
                    }
                    if leaf.chain_entries_sum() != leaf.overflow_occupation() {
                        return Err(ArboretumError::corruption(format!(
                            "leaf {} overflow occupation mismatch",
                            page_id
                        )));
                    }
                    Ok(())
                })();
                let prev = leaf.prev();
                let next = leaf.next();
                leaf.release(&self.pager)?;
                verdict?;
                leaves.push((page_id, prev, next));
                Ok(())
            }
            _ => {
                let found = page.read_u16(0);
                self.pager.release_page(page)?;
                Err(ArboretumError::NodeTypeMismatch {
                    page_id,
                    expected: NodeKind::Leaf.code(),
                    found,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryPageManager;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    /// Object with a payload whose size the tests control
    #[derive(Debug, Clone, PartialEq)]
    struct Blob {
        oid: u64,
        payload: Vec<u8>,
    }

    impl Blob {
        fn new(oid: u64, len: usize) -> Self {
            Self {
                oid,
                payload: vec![oid as u8; len],
            }
        }
    }

    impl DataObject for Blob {
        fn serialized_size(&self) -> usize {
            8 + self.payload.len()
        }

        fn serialize(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(self.serialized_size());
            buf.extend_from_slice(&self.oid.to_le_bytes());
            buf.extend_from_slice(&self.payload);
            buf
        }

        fn deserialize(bytes: &[u8]) -> Self {
            Self {
                oid: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
                payload: bytes[8..].to_vec(),
            }
        }

        fn oid(&self) -> u64 {
            self.oid
        }
    }

    fn new_tree() -> BTree<u32, Blob, MemoryPageManager> {
        BTree::new(MemoryPageManager::with_page_size(512)).unwrap()
    }

    #[test]
    fn test_empty_tree_searches() {
        let tree = new_tree();
        assert!(tree.search(5).unwrap().is_empty());
        assert!(tree.search_range(0, 100).unwrap().is_empty());
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_basic_insert_search_delete() {
        // Insert keys [5, 2, 8, 1, 9, 3]; search hits and misses; delete one
        let mut tree = new_tree();
        for (i, k) in [5u32, 2, 8, 1, 9, 3].iter().enumerate() {
            tree.insert(*k, &Blob::new(i as u64, 16)).unwrap();
        }
        assert_eq!(tree.num_objects(), 6);

        let hit = tree.search(8).unwrap();
        assert_eq!(hit.num_entries(), 1);
        assert_eq!(hit.get(0).object().oid(), 2);

        assert!(tree.search(4).unwrap().is_empty());

        assert!(tree.delete(2).unwrap());
        assert!(tree.search(2).unwrap().is_empty());
        assert_eq!(tree.num_objects(), 5);
        assert!(!tree.delete(2).unwrap());

        tree.check().unwrap();
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_round_trip_bytes() {
        let mut tree = new_tree();
        let original = Blob::new(77, 40);
        tree.insert(10, &original).unwrap();

        let found = tree.search(10).unwrap();
        assert_eq!(found.num_entries(), 1);
        assert_eq!(found.get(0).object(), &original);
    }

    #[test]
    fn test_split_and_ordered_range() {
        let mut tree = new_tree();
        // ~100-byte entries force splits on a 512-byte page
        for k in 0..40u32 {
            tree.insert(k, &Blob::new(k as u64, 90)).unwrap();
        }
        assert!(tree.height() > 1);
        tree.check().unwrap();

        let range = tree.search_range(10, 19).unwrap();
        assert_eq!(range.num_entries(), 10);
        let keys: Vec<u32> = range.iter().map(|e| e.key()).collect();
        assert_eq!(keys, (10..20).collect::<Vec<u32>>());

        for k in 0..40u32 {
            let found = tree.search(k).unwrap();
            assert_eq!(found.num_entries(), 1, "key {}", k);
            assert_eq!(found.get(0).object().oid(), k as u64);
        }
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_one_sided_lookups() {
        let mut tree = new_tree();
        for k in 0..40u32 {
            tree.insert(k, &Blob::new(k as u64, 90)).unwrap();
        }
        assert!(tree.height() > 1);

        let below = tree.search_less_than(10).unwrap();
        assert_eq!(below.num_entries(), 10);
        assert_eq!(below.get(9).key(), 9);
        assert_eq!(below.query_kind(), QueryKind::ToLessThan);
        assert_eq!(below.upper_bound(), Some(10));

        let at_most = tree.search_at_most(10).unwrap();
        assert_eq!(at_most.num_entries(), 11);
        assert_eq!(at_most.get(10).key(), 10);
        assert_eq!(at_most.query_kind(), QueryKind::ToLessThanOrEqual);

        let above = tree.search_greater_than(35).unwrap();
        assert_eq!(above.num_entries(), 4);
        assert_eq!(above.get(0).key(), 36);
        assert_eq!(above.query_kind(), QueryKind::ToGreaterThan);
        assert_eq!(above.lower_bound(), Some(35));

        let at_least = tree.search_at_least(35).unwrap();
        assert_eq!(at_least.num_entries(), 5);
        assert_eq!(at_least.get(0).key(), 35);
        assert_eq!(at_least.query_kind(), QueryKind::ToGreaterThanOrEqual);

        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_one_sided_lookups_with_duplicates() {
        let mut tree = new_tree();
        for i in 0..10u64 {
            tree.insert(7, &Blob::new(i, 94)).unwrap();
        }
        tree.insert(3, &Blob::new(100, 94)).unwrap();
        tree.insert(9, &Blob::new(101, 94)).unwrap();

        // The whole overflow chain qualifies on either side of its key
        assert_eq!(tree.search_at_least(7).unwrap().num_entries(), 11);
        assert_eq!(tree.search_greater_than(7).unwrap().num_entries(), 1);
        assert_eq!(tree.search_at_most(7).unwrap().num_entries(), 11);
        assert_eq!(tree.search_less_than(7).unwrap().num_entries(), 1);
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_one_sided_lookups_on_empty_tree() {
        let tree = new_tree();
        assert!(tree.search_less_than(5).unwrap().is_empty());
        assert!(tree.search_at_least(5).unwrap().is_empty());
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_random_inserts_hold_invariants() {
        let mut tree = new_tree();
        let mut keys: Vec<u32> = (0..200).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        keys.shuffle(&mut rng);

        for &k in &keys {
            tree.insert(k, &Blob::new(k as u64, 24)).unwrap();
        }
        tree.check().unwrap();

        let all = tree.search_range(0, 199).unwrap();
        assert_eq!(all.num_entries(), 200);

        // Delete a random half, then re-verify
        keys.shuffle(&mut rng);
        for &k in keys.iter().take(100) {
            assert!(tree.delete(k).unwrap());
        }
        tree.check().unwrap();
        assert_eq!(tree.num_objects(), 100);
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_duplicate_overflow_chain() {
        // Page sized so exactly 4 entries of 102-byte objects fit a leaf
        let mut tree = new_tree();
        for i in 0..10u64 {
            tree.insert(7, &Blob::new(i, 94)).unwrap();
        }

        let found = tree.search(7).unwrap();
        assert_eq!(found.num_entries(), 10);
        // OID order within the equal-key result
        let oids: Vec<u64> = found.iter().map(|e| e.object().oid()).collect();
        assert_eq!(oids, (0..10).collect::<Vec<u64>>());

        // The leaf carries 4 entries and a chain of ceil((10-4)/4) = 2 nodes
        let leaf = tree.find_leaf(7).unwrap().unwrap();
        assert_eq!(leaf.occupation(), 4);
        assert_eq!(leaf.overflow_occupation(), 6);
        assert_eq!(leaf.overflow_chain_len(), 2);
        leaf.release(tree.pager()).unwrap();

        tree.check().unwrap();
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_duplicate_delete_decrements_chain() {
        let mut tree = new_tree();
        for i in 0..10u64 {
            tree.insert(7, &Blob::new(i, 94)).unwrap();
        }

        // Deleting one duplicate shrinks the logical count by exactly one
        assert!(tree.delete(7).unwrap());
        let found = tree.search(7).unwrap();
        assert_eq!(found.num_entries(), 9);

        let leaf = tree.find_leaf(7).unwrap().unwrap();
        assert_eq!(leaf.num_entries(), 9);
        // The body refilled from the chain, so the leaf is still full
        assert_eq!(leaf.occupation(), 4);
        assert_eq!(leaf.overflow_occupation(), 5);
        leaf.release(tree.pager()).unwrap();

        // Drain the key entirely; the chain pages are disposed along the way
        for _ in 0..9 {
            assert!(tree.delete(7).unwrap());
        }
        assert!(tree.search(7).unwrap().is_empty());
        let leaf = tree.find_leaf(7).unwrap().unwrap();
        assert!(!leaf.has_overflow());
        assert!(leaf.overflow_page_id().is_none());
        leaf.release(tree.pager()).unwrap();

        tree.check().unwrap();
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_duplicates_never_split_across_leaves() {
        let mut tree = new_tree();
        // Fill one leaf with 7s, then force a split with a larger key
        for i in 0..6u64 {
            tree.insert(7, &Blob::new(i, 94)).unwrap();
        }
        tree.insert(9, &Blob::new(100, 94)).unwrap();
        tree.insert(3, &Blob::new(101, 94)).unwrap();

        tree.check().unwrap();
        assert_eq!(tree.search(7).unwrap().num_entries(), 6);
        assert_eq!(tree.search(9).unwrap().num_entries(), 1);
        assert_eq!(tree.search(3).unwrap().num_entries(), 1);

        // All 7s still hang off one leaf
        let leaf = tree.find_leaf(7).unwrap().unwrap();
        assert_eq!(leaf.num_entries(), 6);
        leaf.release(tree.pager()).unwrap();
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_insert_unique_rejects_duplicates() {
        let mut tree = new_tree();
        assert!(tree.insert_unique(5, &Blob::new(1, 16)).unwrap());
        assert!(!tree.insert_unique(5, &Blob::new(2, 16)).unwrap());
        assert_eq!(tree.num_objects(), 1);
        assert_eq!(tree.search(5).unwrap().num_entries(), 1);
    }

    #[test]
    fn test_oversize_object_is_fatal_error() {
        let mut tree = new_tree();
        let err = tree.insert(1, &Blob::new(1, 600));
        assert!(matches!(err, Err(ArboretumError::OversizeObject { .. })));
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_mixed_duplicates_and_splits() {
        let mut tree = new_tree();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut pool: Vec<u32> = (0..30).flat_map(|k| [k, k, k]).collect();
        pool.shuffle(&mut rng);

        for (i, &k) in pool.iter().enumerate() {
            tree.insert(k, &Blob::new(i as u64, 40)).unwrap();
        }
        tree.check().unwrap();

        for k in 0..30u32 {
            assert_eq!(tree.search(k).unwrap().num_entries(), 3, "key {}", k);
        }
        let all = tree.search_range(0, 29).unwrap();
        assert_eq!(all.num_entries(), 90);
        assert_eq!(tree.pager().outstanding_pins(), 0);
    }

    #[test]
    fn test_reload_from_store() {
        let pm = MemoryPageManager::with_page_size(512);
        let mut tree: BTree<u32, Blob, _> = BTree::new(pm).unwrap();
        for k in 0..20u32 {
            tree.insert(k, &Blob::new(k as u64, 30)).unwrap();
        }
        let BTree { pager, .. } = tree;

        let tree: BTree<u32, Blob, _> = BTree::new(pager).unwrap();
        assert_eq!(tree.num_objects(), 20);
        assert_eq!(tree.search(13).unwrap().num_entries(), 1);
        tree.check().unwrap();
    }
}
