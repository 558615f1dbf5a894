//! B-tree index node.
//!
//! Layout after the common header:
//!
//! ```text
//! | leftmost_child: u32 | key0 | right0: u32 | key1 | right1: u32 | ...
//! ```
//!
//! Entries are key-sorted. The subtree reached through `entry[i].right` holds
//! keys strictly greater than `entry[i].key`; the leftmost subtree holds keys
//! up to and including `entry[0].key`'s duplicates, which is why descent for
//! a key goes left of the first separator greater than or equal to it.

use crate::error::Result;
use crate::node::{self, NodeKind, NODE_HEADER_SIZE};
use crate::page::Page;
use crate::storage::PageManager;
use crate::types::{Key, PageId};
use std::marker::PhantomData;

const LEFTMOST_OFFSET: usize = NODE_HEADER_SIZE;
const ENTRIES_OFFSET: usize = NODE_HEADER_SIZE + 4;

/// View over a B-tree index page
pub struct IndexNode<K: Key> {
    page: Page,
    _key: PhantomData<K>,
}

impl<K: Key> IndexNode<K> {
    const ENTRY_SIZE: usize = K::SIZE + 4;

    /// Initialize a fresh page as an empty index node
    pub fn create(mut page: Page) -> Self {
        node::init_header(&mut page, NodeKind::Index);
        page.write_u32(LEFTMOST_OFFSET, 0);
        Self {
            page,
            _key: PhantomData,
        }
    }

    /// Interpret an existing page as an index node
    pub fn open(page: Page) -> Result<Self> {
        node::check_kind(&page, NodeKind::Index)?;
        Ok(Self {
            page,
            _key: PhantomData,
        })
    }

    /// Release the underlying page back to the manager
    pub fn release(self, pager: &impl PageManager) -> Result<()> {
        pager.release_page(self.page)
    }

    /// Give up the view and recover the page
    pub fn into_page(self) -> Page {
        self.page
    }

    /// Id of the underlying page
    pub fn page_id(&self) -> PageId {
        self.page.id()
    }

    /// Number of entries
    pub fn num_entries(&self) -> usize {
        node::occupation(&self.page)
    }

    fn entry_offset(idx: usize) -> usize {
        ENTRIES_OFFSET + idx * Self::ENTRY_SIZE
    }

    /// Key of entry `idx`
    pub fn key_at(&self, idx: usize) -> K {
        debug_assert!(idx < self.num_entries());
        K::read_from(&self.page.as_bytes()[Self::entry_offset(idx)..])
    }

    /// Right child of entry `idx`
    pub fn right_child_at(&self, idx: usize) -> PageId {
        debug_assert!(idx < self.num_entries());
        PageId::new(self.page.read_u32(Self::entry_offset(idx) + K::SIZE))
    }

    /// Left child of the key at `idx`: the leftmost pointer for `idx == 0`,
    /// otherwise the previous entry's right child.
    pub fn left_child_at(&self, idx: usize) -> PageId {
        if idx == 0 {
            PageId::new(self.page.read_u32(LEFTMOST_OFFSET))
        } else {
            self.right_child_at(idx - 1)
        }
    }

    /// Set the left child of the key at `idx`
    pub fn set_left_child_at(&mut self, idx: usize, child: PageId) {
        if idx == 0 {
            self.page.write_u32(LEFTMOST_OFFSET, child.value());
        } else {
            let offset = Self::entry_offset(idx - 1) + K::SIZE;
            self.page.write_u32(offset, child.value());
        }
        self.page.mark_dirty();
    }

    /// Set the right child of entry `idx`
    pub fn set_right_child_at(&mut self, idx: usize, child: PageId) {
        let offset = Self::entry_offset(idx) + K::SIZE;
        self.page.write_u32(offset, child.value());
        self.page.mark_dirty();
    }

    /// Insert an entry at position `idx`, shifting later entries right.
    ///
    /// Returns `false` if the node has no room.
    pub fn insert_entry_at(&mut self, idx: usize, key: K, right_child: PageId) -> bool {
        if self.free_space() < Self::ENTRY_SIZE {
            return false;
        }

        let count = self.num_entries();
        debug_assert!(idx <= count);

        // Make room for the new entry
        if idx < count {
            let src = Self::entry_offset(idx);
            let len = (count - idx) * Self::ENTRY_SIZE;
            self.page.move_bytes(src, src + Self::ENTRY_SIZE, len);
        }

        let offset = Self::entry_offset(idx);
        key.write_to(&mut self.page.as_bytes_mut()[offset..]);
        self.page.write_u32(offset + K::SIZE, right_child.value());

        node::set_occupation(&mut self.page, count + 1);
        self.page.mark_dirty();
        true
    }

    /// Delete the entry at `idx`, shifting later entries left
    pub fn delete_entry_at(&mut self, idx: usize) {
        let count = self.num_entries();
        debug_assert!(idx < count);

        if idx + 1 < count {
            let src = Self::entry_offset(idx + 1);
            let len = (count - idx - 1) * Self::ENTRY_SIZE;
            self.page.move_bytes(src, src - Self::ENTRY_SIZE, len);
        }

        node::set_occupation(&mut self.page, count - 1);
        self.page.mark_dirty();
    }

    /// Position of the first entry whose key is greater than or equal to
    /// `key`; `num_entries()` when every key is smaller. This is the descent
    /// pivot: the search key lives left of the returned separator.
    pub fn find(&self, key: K) -> usize {
        let mut low = 0;
        let mut high = self.num_entries();
        while low < high {
            let mid = low + (high - low) / 2;
            if self.key_at(mid) < key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    /// Split position for an index node: the ceiling of half the occupation
    pub fn find_median(&self) -> usize {
        let occ = self.num_entries();
        (occ + 1) / 2
    }

    /// Amount of free space in this node
    pub fn free_space(&self) -> usize {
        let used = ENTRIES_OFFSET + self.num_entries() * Self::ENTRY_SIZE;
        self.page.size() - used
    }

    /// Remove all entries
    pub fn remove_all(&mut self) {
        node::set_occupation(&mut self.page, 0);
        self.page.write_u32(LEFTMOST_OFFSET, 0);
        self.page.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(size: usize) -> IndexNode<u32> {
        IndexNode::create(Page::new(PageId::new(5), vec![0u8; size]))
    }

    #[test]
    fn test_create_and_open() {
        let node = fresh(512);
        assert_eq!(node.num_entries(), 0);
        assert!(node.left_child_at(0).is_none());

        let page = node.into_page();
        let node = IndexNode::<u32>::open(page).unwrap();
        assert_eq!(node.page_id(), PageId::new(5));
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut node = fresh(512);
        node.set_left_child_at(0, PageId::new(100));

        assert!(node.insert_entry_at(0, 20u32, PageId::new(2)));
        assert!(node.insert_entry_at(0, 10u32, PageId::new(1)));
        assert!(node.insert_entry_at(2, 30u32, PageId::new(3)));

        assert_eq!(node.num_entries(), 3);
        assert_eq!(node.key_at(0), 10);
        assert_eq!(node.key_at(1), 20);
        assert_eq!(node.key_at(2), 30);
        assert_eq!(node.left_child_at(0), PageId::new(100));
        assert_eq!(node.right_child_at(0), PageId::new(1));
        assert_eq!(node.left_child_at(1), PageId::new(1));
        assert_eq!(node.right_child_at(2), PageId::new(3));
    }

    #[test]
    fn test_find_partition_point() {
        let mut node = fresh(512);
        for (i, k) in [10u32, 20, 30].iter().enumerate() {
            node.insert_entry_at(i, *k, PageId::new(i as u32 + 1));
        }

        assert_eq!(node.find(5), 0);
        assert_eq!(node.find(10), 0);
        assert_eq!(node.find(15), 1);
        assert_eq!(node.find(30), 2);
        assert_eq!(node.find(31), 3);
    }

    #[test]
    fn test_delete_entry() {
        let mut node = fresh(512);
        for (i, k) in [10u32, 20, 30].iter().enumerate() {
            node.insert_entry_at(i, *k, PageId::new(i as u32 + 1));
        }

        node.delete_entry_at(1);
        assert_eq!(node.num_entries(), 2);
        assert_eq!(node.key_at(0), 10);
        assert_eq!(node.key_at(1), 30);
        assert_eq!(node.right_child_at(1), PageId::new(3));
    }

    #[test]
    fn test_insert_full_node_fails() {
        // 6 + 4 header bytes, 8 bytes per entry
        let mut node = fresh(NODE_HEADER_SIZE + 4 + 8 * 2);
        assert!(node.insert_entry_at(0, 1u32, PageId::new(1)));
        assert!(node.insert_entry_at(1, 2u32, PageId::new(2)));
        assert!(!node.insert_entry_at(2, 3u32, PageId::new(3)));
        assert_eq!(node.num_entries(), 2);
    }

    #[test]
    fn test_find_median() {
        let mut node = fresh(512);
        for (i, k) in [10u32, 20, 30, 40, 50].iter().enumerate() {
            node.insert_entry_at(i, *k, PageId::new(i as u32 + 1));
        }
        assert_eq!(node.find_median(), 3);
        node.delete_entry_at(4);
        assert_eq!(node.find_median(), 2);
    }
}
