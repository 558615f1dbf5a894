//! Sequential-scan node.
//!
//! Layout after the common header:
//!
//! ```text
//! | next_node: u32 | offset0: u32 | ... | offsetN: u32 | free | objN ... obj0 |
//! ```
//!
//! A container of opaque serialized objects with a link to the next node in
//! the chain. There is no ordering; the sequential store inserts at the chain
//! head and every query walks the whole chain.

use crate::error::Result;
use crate::node::{self, NodeKind, NODE_HEADER_SIZE};
use crate::page::Page;
use crate::storage::PageManager;
use crate::types::PageId;

const NEXT_OFFSET: usize = NODE_HEADER_SIZE;
const ENTRIES_OFFSET: usize = NODE_HEADER_SIZE + 4;
const ENTRY_SIZE: usize = 4;

/// View over a sequential-scan page
pub struct SequentialNode {
    page: Page,
}

impl SequentialNode {
    /// Initialize a fresh page as an empty sequential node
    pub fn create(mut page: Page) -> Self {
        node::init_header(&mut page, NodeKind::Sequential);
        page.write_u32(NEXT_OFFSET, 0);
        Self { page }
    }

    /// Interpret an existing page as a sequential node
    pub fn open(page: Page) -> Result<Self> {
        node::check_kind(&page, NodeKind::Sequential)?;
        Ok(Self { page })
    }

    /// Release the underlying page back to the manager
    pub fn release(self, pager: &impl PageManager) -> Result<()> {
        pager.release_page(self.page)
    }

    /// Id of the underlying page
    pub fn page_id(&self) -> PageId {
        self.page.id()
    }

    /// Number of objects stored here
    pub fn num_entries(&self) -> usize {
        node::occupation(&self.page)
    }

    /// Next node in the chain
    pub fn next_node(&self) -> PageId {
        PageId::new(self.page.read_u32(NEXT_OFFSET))
    }

    /// Link the next node in the chain
    pub fn set_next_node(&mut self, id: PageId) {
        self.page.write_u32(NEXT_OFFSET, id.value());
        self.page.mark_dirty();
    }

    fn offset_at(&self, idx: usize) -> usize {
        self.page.read_u32(ENTRIES_OFFSET + idx * ENTRY_SIZE) as usize
    }

    /// Append an object; returns its entry index, or `None` on overflow
    pub fn add_entry(&mut self, object: &[u8]) -> Option<usize> {
        if object.len() + ENTRY_SIZE > self.free_space() {
            return None;
        }

        let count = self.num_entries();
        let offset = if count == 0 {
            self.page.size() - object.len()
        } else {
            self.offset_at(count - 1) - object.len()
        };
        self.page
            .write_u32(ENTRIES_OFFSET + count * ENTRY_SIZE, offset as u32);
        self.page.as_bytes_mut()[offset..offset + object.len()].copy_from_slice(object);

        node::set_occupation(&mut self.page, count + 1);
        self.page.mark_dirty();
        Some(count)
    }

    /// Serialized object at `idx`
    pub fn object_at(&self, idx: usize) -> &[u8] {
        debug_assert!(idx < self.num_entries());
        let offset = self.offset_at(idx);
        &self.page.as_bytes()[offset..offset + self.object_size_at(idx)]
    }

    /// Serialized size of the object at `idx`
    pub fn object_size_at(&self, idx: usize) -> usize {
        debug_assert!(idx < self.num_entries());
        if idx == 0 {
            self.page.size() - self.offset_at(0)
        } else {
            self.offset_at(idx - 1) - self.offset_at(idx)
        }
    }

    /// Amount of free space in this node
    pub fn free_space(&self) -> usize {
        let count = self.num_entries();
        let mut used = ENTRIES_OFFSET + count * ENTRY_SIZE;
        if count > 0 {
            used += self.page.size() - self.offset_at(count - 1);
        }
        self.page.size() - used
    }

    /// Remove all entries
    pub fn remove_all(&mut self) {
        node::set_occupation(&mut self.page, 0);
        self.page.mark_dirty();
    }

    /// Fixed per-node overhead: common header, chain link, one entry slot
    pub fn per_object_overhead() -> usize {
        ENTRIES_OFFSET + ENTRY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(size: usize) -> SequentialNode {
        SequentialNode::create(Page::new(PageId::new(4), vec![0u8; size]))
    }

    #[test]
    fn test_append_and_read_back() {
        let mut node = fresh(256);
        assert_eq!(node.add_entry(b"alpha"), Some(0));
        assert_eq!(node.add_entry(b"beta"), Some(1));
        assert_eq!(node.add_entry(b"gamma!"), Some(2));

        assert_eq!(node.num_entries(), 3);
        assert_eq!(node.object_at(0), b"alpha");
        assert_eq!(node.object_at(1), b"beta");
        assert_eq!(node.object_at(2), b"gamma!");
        assert_eq!(node.object_size_at(2), 6);
    }

    #[test]
    fn test_overflow_returns_none() {
        let mut node = fresh(64);
        let mut count = 0;
        while node.add_entry(&[7u8; 10]).is_some() {
            count += 1;
        }
        // 10 header bytes leave 54; each object costs 14
        assert_eq!(count, 3);
        assert!(node.add_entry(&[7u8; 10]).is_none());
    }

    #[test]
    fn test_chain_link() {
        let mut node = fresh(128);
        assert!(node.next_node().is_none());
        node.set_next_node(PageId::new(12));
        assert_eq!(node.next_node(), PageId::new(12));
    }

    #[test]
    fn test_remove_all() {
        let mut node = fresh(128);
        node.add_entry(b"data");
        node.remove_all();
        assert_eq!(node.num_entries(), 0);
        assert_eq!(node.free_space(), 128 - ENTRIES_OFFSET);
    }
}
