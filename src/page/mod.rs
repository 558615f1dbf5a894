//! Page layer: the fixed-size byte buffer every node layout is built on.
//!
//! A [`Page`] is the unit of I/O. The first bytes of every page hold a node
//! header; the rest of the layout is specific to the node kind interpreting
//! the page. Node views never copy a page — they compute offsets into this
//! buffer and read or write scalars in place, little-endian.

use crate::types::PageId;

/// A pinned page: an owned byte buffer plus identity and a modified flag.
///
/// Pages are produced by a page manager (`new_page` / `get_page`) and must be
/// given back through `release_page` or `dispose_page` exactly once. A page
/// whose `dirty` flag is set is persisted by the manager on release.
pub struct Page {
    id: PageId,
    data: Vec<u8>,
    dirty: bool,
}

impl Page {
    /// Wrap an id and a buffer into a page. Used by page managers.
    pub fn new(id: PageId, data: Vec<u8>) -> Self {
        Self {
            id,
            data,
            dirty: false,
        }
    }

    /// The id of this page
    pub fn id(&self) -> PageId {
        self.id
    }

    /// The page size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether this page has been modified since it was pinned
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark this page as modified so the manager persists it on release
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the modified flag. Used by page managers after write-back.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Get a reference to the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the raw bytes.
    ///
    /// Does not mark the page dirty; node views do that when they commit a
    /// structural change.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero the whole buffer
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.dirty = true;
    }

    /// Read a little-endian `u16` at `offset`
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Write a little-endian `u16` at `offset`
    pub fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a little-endian `u32` at `offset`
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a little-endian `u32` at `offset`
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a little-endian `f64` at `offset`
    pub fn read_f64(&self, offset: usize) -> f64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[offset..offset + 8]);
        f64::from_le_bytes(raw)
    }

    /// Write a little-endian `f64` at `offset`
    pub fn write_f64(&mut self, offset: usize, value: f64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Move `len` bytes from `src` to `dst` within the page.
    ///
    /// Overlap-safe; this is the block move the leaf layouts use to open or
    /// close a gap in the object area.
    pub fn move_bytes(&mut self, src: usize, dst: usize, len: usize) {
        self.data.copy_within(src..src + len, dst);
    }
}
