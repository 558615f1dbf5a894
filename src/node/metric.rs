//! Metric (MM partition) node.
//!
//! Layout after the common header:
//!
//! ```text
//! | discriminating_distance: f64 | child0..child3: u32 |
//! | offset0: u32 | offset1: u32 | free | obj1 | obj0 |
//! ```
//!
//! A node holds at most two pivot objects. The discriminating distance is the
//! distance between them; together with a candidate's distances to both
//! pivots it induces the four regions the child pointers correspond to.

use crate::error::Result;
use crate::node::{self, NodeKind, NODE_HEADER_SIZE};
use crate::page::Page;
use crate::storage::PageManager;
use crate::types::PageId;

/// Number of regions induced by the two pivots
pub const NUM_REGIONS: usize = 4;

/// Maximum pivots per node
pub const MAX_PIVOTS: usize = 2;

const DISTANCE_OFFSET: usize = NODE_HEADER_SIZE;
const CHILDREN_OFFSET: usize = NODE_HEADER_SIZE + 8;
const ENTRIES_OFFSET: usize = CHILDREN_OFFSET + NUM_REGIONS * 4;
const ENTRY_SIZE: usize = 4;

/// View over a metric-tree page
pub struct MetricNode {
    page: Page,
}

impl MetricNode {
    /// Initialize a fresh page as an empty metric node
    pub fn create(mut page: Page) -> Self {
        node::init_header(&mut page, NodeKind::Metric);
        page.write_f64(DISTANCE_OFFSET, 0.0);
        for region in 0..NUM_REGIONS {
            page.write_u32(CHILDREN_OFFSET + region * 4, 0);
        }
        Self { page }
    }

    /// Interpret an existing page as a metric node
    pub fn open(page: Page) -> Result<Self> {
        node::check_kind(&page, NodeKind::Metric)?;
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

    /// Number of pivot objects stored (0..=2)
    pub fn num_entries(&self) -> usize {
        node::occupation(&self.page)
    }

    /// Distance between the two pivots
    pub fn distance(&self) -> f64 {
        self.page.read_f64(DISTANCE_OFFSET)
    }

    /// Record the distance between the two pivots
    pub fn set_distance(&mut self, distance: f64) {
        self.page.write_f64(DISTANCE_OFFSET, distance);
        self.page.mark_dirty();
    }

    /// Child page for `region` (0..4)
    pub fn child(&self, region: usize) -> PageId {
        debug_assert!(region < NUM_REGIONS);
        PageId::new(self.page.read_u32(CHILDREN_OFFSET + region * 4))
    }

    /// Link the child page for `region`
    pub fn set_child(&mut self, region: usize, id: PageId) {
        debug_assert!(region < NUM_REGIONS);
        self.page.write_u32(CHILDREN_OFFSET + region * 4, id.value());
        self.page.mark_dirty();
    }

    fn offset_at(&self, idx: usize) -> usize {
        self.page.read_u32(ENTRIES_OFFSET + idx * ENTRY_SIZE) as usize
    }

    /// Store a pivot object; returns its index, or `None` when the node
    /// already holds two pivots or has no room.
    pub fn add_entry(&mut self, object: &[u8]) -> Option<usize> {
        let count = self.num_entries();
        if count >= MAX_PIVOTS || object.len() + ENTRY_SIZE > self.free_space() {
            return None;
        }

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

    /// Serialized pivot at `idx`
    pub fn object_at(&self, idx: usize) -> &[u8] {
        debug_assert!(idx < self.num_entries());
        let offset = self.offset_at(idx);
        &self.page.as_bytes()[offset..offset + self.object_size_at(idx)]
    }

    /// Serialized size of the pivot at `idx`
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

    /// Reset pivots, children and distance, keeping the type tag. Used when
    /// a rebalance redistributes the objects of a subtree.
    pub fn clear(&mut self) {
        node::set_occupation(&mut self.page, 0);
        self.page.write_f64(DISTANCE_OFFSET, 0.0);
        for region in 0..NUM_REGIONS {
            self.page.write_u32(CHILDREN_OFFSET + region * 4, 0);
        }
        self.page.mark_dirty();
    }

    /// Fixed per-node overhead for the oversize check
    pub fn per_object_overhead() -> usize {
        ENTRIES_OFFSET + ENTRY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(size: usize) -> MetricNode {
        MetricNode::create(Page::new(PageId::new(6), vec![0u8; size]))
    }

    #[test]
    fn test_two_pivots_max() {
        let mut node = fresh(256);
        assert_eq!(node.add_entry(b"pivot-one"), Some(0));
        assert_eq!(node.add_entry(b"pivot-two!"), Some(1));
        assert_eq!(node.add_entry(b"third"), None);

        assert_eq!(node.num_entries(), 2);
        assert_eq!(node.object_at(0), b"pivot-one");
        assert_eq!(node.object_at(1), b"pivot-two!");
    }

    #[test]
    fn test_distance_and_children() {
        let mut node = fresh(256);
        node.set_distance(3.75);
        assert_eq!(node.distance(), 3.75);

        node.set_child(0, PageId::new(10));
        node.set_child(3, PageId::new(13));
        assert_eq!(node.child(0), PageId::new(10));
        assert!(node.child(1).is_none());
        assert_eq!(node.child(3), PageId::new(13));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut node = fresh(256);
        node.add_entry(b"pivot");
        node.set_distance(1.0);
        node.set_child(2, PageId::new(9));

        node.clear();
        assert_eq!(node.num_entries(), 0);
        assert_eq!(node.distance(), 0.0);
        assert!(node.child(2).is_none());

        // the page is still a metric node
        let page = node.into_page();
        assert!(MetricNode::open(page).is_ok());
    }
}
