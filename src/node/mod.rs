//! Node layouts: typed views over a page.
//!
//! Every node page starts with a 6-byte common header:
//!
//! ```text
//! Offset  Size  Description
//! 0       2     Node type code (little-endian; the bytes read as ASCII)
//! 2       4     Occupation (number of entries)
//! ```
//!
//! The remainder of the page is specific to the node kind. Entry arrays grow
//! from the front; serialized objects grow from the page end toward the
//! front, addressed by per-entry offsets. A node is never copied — each view
//! takes ownership of its pinned page, computes offsets into the buffer, and
//! marks the page dirty when it commits a change. Views are handed back to
//! the page manager explicitly via their `release` method.

mod index;
mod leaf;
mod metric;
mod overflow;
mod sequential;

pub use index::IndexNode;
pub use leaf::LeafNode;
pub use metric::{MetricNode, NUM_REGIONS};
pub use overflow::OverflowNode;
pub use sequential::SequentialNode;

use crate::error::{ArboretumError, Result};
use crate::page::Page;

/// Size of the common node header
pub const NODE_HEADER_SIZE: usize = 6;

const TYPE_OFFSET: usize = 0;
const OCCUPATION_OFFSET: usize = 2;

/// Node type codes.
///
/// The values encode two ASCII characters in little-endian byte order, so a
/// hex dump of a page starts with a readable tag ("ID", "LF", "LO", "SQ",
/// "MM").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NodeKind {
    /// B-tree index node
    Index = 0x4449,
    /// B-tree leaf node
    Leaf = 0x464C,
    /// B-tree leaf overflow node
    LeafOverflow = 0x4F4C,
    /// Sequential-scan node
    Sequential = 0x5153,
    /// Metric (MM partition) node
    Metric = 0x4D4D,
}

impl NodeKind {
    /// The on-page type code
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Decode a type code
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x4449 => Some(Self::Index),
            0x464C => Some(Self::Leaf),
            0x4F4C => Some(Self::LeafOverflow),
            0x5153 => Some(Self::Sequential),
            0x4D4D => Some(Self::Metric),
            _ => None,
        }
    }
}

/// Read the node kind stored on a page
pub fn node_kind(page: &Page) -> Option<NodeKind> {
    NodeKind::from_code(page.read_u16(TYPE_OFFSET))
}

pub(crate) fn init_header(page: &mut Page, kind: NodeKind) {
    page.write_u16(TYPE_OFFSET, kind.code());
    page.write_u32(OCCUPATION_OFFSET, 0);
    page.mark_dirty();
}

pub(crate) fn check_kind(page: &Page, expected: NodeKind) -> Result<()> {
    let found = page.read_u16(TYPE_OFFSET);
    if found != expected.code() {
        return Err(ArboretumError::NodeTypeMismatch {
            page_id: page.id(),
            expected: expected.code(),
            found,
        });
    }
    Ok(())
}

pub(crate) fn occupation(page: &Page) -> usize {
    page.read_u32(OCCUPATION_OFFSET) as usize
}

pub(crate) fn set_occupation(page: &mut Page, count: usize) {
    page.write_u32(OCCUPATION_OFFSET, count as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageId;

    #[test]
    fn test_type_codes_are_ascii() {
        let mut page = Page::new(PageId::new(1), vec![0u8; 512]);
        init_header(&mut page, NodeKind::Leaf);
        assert_eq!(&page.as_bytes()[0..2], b"LF");

        init_header(&mut page, NodeKind::Index);
        assert_eq!(&page.as_bytes()[0..2], b"ID");

        init_header(&mut page, NodeKind::LeafOverflow);
        assert_eq!(&page.as_bytes()[0..2], b"LO");

        init_header(&mut page, NodeKind::Sequential);
        assert_eq!(&page.as_bytes()[0..2], b"SQ");

        init_header(&mut page, NodeKind::Metric);
        assert_eq!(&page.as_bytes()[0..2], b"MM");
    }

    #[test]
    fn test_kind_mismatch_detected() {
        let mut page = Page::new(PageId::new(3), vec![0u8; 512]);
        init_header(&mut page, NodeKind::Leaf);
        assert!(check_kind(&page, NodeKind::Leaf).is_ok());
        assert!(check_kind(&page, NodeKind::Index).is_err());
        assert_eq!(node_kind(&page), Some(NodeKind::Leaf));
    }

    #[test]
    fn test_occupation_roundtrip() {
        let mut page = Page::new(PageId::new(1), vec![0u8; 512]);
        init_header(&mut page, NodeKind::Sequential);
        assert_eq!(occupation(&page), 0);
        set_occupation(&mut page, 17);
        assert_eq!(occupation(&page), 17);
    }
}
