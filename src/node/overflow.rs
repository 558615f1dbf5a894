//! B-tree leaf overflow node.
//!
//! Layout after the common header:
//!
//! ```text
//! | next_overflow: u32 | offset0: u32 | ... | offsetN: u32 | free | objN ... obj0 |
//! ```
//!
//! No keys are stored: every object in an overflow chain shares the
//! duplicated key of its owning leaf. Objects grow from the page end in
//! reverse insertion order; an object's size is the gap between adjacent
//! offsets.

use crate::error::Result;
use crate::node::{self, NodeKind, NODE_HEADER_SIZE};
use crate::page::Page;
use crate::storage::PageManager;
use crate::types::PageId;

const NEXT_OFFSET: usize = NODE_HEADER_SIZE;
const ENTRIES_OFFSET: usize = NODE_HEADER_SIZE + 4;
const ENTRY_SIZE: usize = 4;

/// View over a leaf overflow page
pub struct OverflowNode {
    page: Page,
}

impl OverflowNode {
    /// Initialize a fresh page as an empty overflow node
    pub fn create(mut page: Page) -> Self {
        node::init_header(&mut page, NodeKind::LeafOverflow);
        page.write_u32(NEXT_OFFSET, 0);
        Self { page }
    }

    /// Interpret an existing page as an overflow node
    pub fn open(page: Page) -> Result<Self> {
        node::check_kind(&page, NodeKind::LeafOverflow)?;
        Ok(Self { page })
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

    /// Number of objects stored here
    pub fn num_entries(&self) -> usize {
        node::occupation(&self.page)
    }

    /// Page id of the next overflow node in the chain
    pub fn next_overflow(&self) -> PageId {
        PageId::new(self.page.read_u32(NEXT_OFFSET))
    }

    /// Link the next overflow node
    pub fn set_next_overflow(&mut self, id: PageId) {
        self.page.write_u32(NEXT_OFFSET, id.value());
        self.page.mark_dirty();
    }

    fn offset_at(&self, idx: usize) -> usize {
        self.page.read_u32(ENTRIES_OFFSET + idx * ENTRY_SIZE) as usize
    }

    fn set_offset_at(&mut self, idx: usize, offset: usize) {
        self.page
            .write_u32(ENTRIES_OFFSET + idx * ENTRY_SIZE, offset as u32);
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

    /// Append an object. Returns `false` when it does not fit.
    pub fn insert(&mut self, object: &[u8]) -> bool {
        debug_assert!(!object.is_empty());
        if object.len() + ENTRY_SIZE > self.free_space() {
            return false;
        }

        let count = self.num_entries();
        let offset = if count == 0 {
            self.page.size() - object.len()
        } else {
            self.offset_at(count - 1) - object.len()
        };
        self.set_offset_at(count, offset);
        self.page.as_bytes_mut()[offset..offset + object.len()].copy_from_slice(object);

        node::set_occupation(&mut self.page, count + 1);
        self.page.mark_dirty();
        true
    }

    /// Delete the object at `idx`, closing the gap with an overlap-safe move
    pub fn delete_at(&mut self, idx: usize) {
        let count = self.num_entries();
        debug_assert!(idx < count);

        let last = count - 1;
        let del_size = self.object_size_at(idx);

        if idx < last {
            // Slide every later object toward the page end
            let src = self.offset_at(last);
            let len = self.offset_at(idx) - src;
            self.page.move_bytes(src, src + del_size, len);

            for i in idx..last {
                let next = self.offset_at(i + 1) + del_size;
                self.set_offset_at(i, next);
            }
        }

        node::set_occupation(&mut self.page, count - 1);
        self.page.mark_dirty();
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
}
