//! Error types for the indexing engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for indexing operations
pub type Result<T> = std::result::Result<T, ArboretumError>;

/// Errors that can occur in the indexing engine
#[derive(Error, Debug)]
pub enum ArboretumError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page was not found
    #[error("Page {0} not found")]
    PageNotFound(PageId),

    /// Page is already free or was never allocated
    #[error("Page {0} is not allocated")]
    PageNotAllocated(PageId),

    /// An object is larger than an empty node can hold; fatal for the tree
    /// instance that received it
    #[error("Object of {size} bytes exceeds the {capacity} bytes an empty node can hold")]
    OversizeObject { size: usize, capacity: usize },

    /// A node view was constructed over a page with the wrong type tag
    #[error("Node type mismatch on page {page_id}: expected {expected:#06x}, found {found:#06x}")]
    NodeTypeMismatch {
        page_id: PageId,
        expected: u16,
        found: u16,
    },

    /// Entry index out of range for a node access
    #[error("Entry index {index} out of range (node has {count} entries)")]
    EntryIndexOutOfRange { index: usize, count: usize },

    /// Overflow bookkeeping is nonzero but the chain is missing or broken
    #[error("Overflow chain inconsistency on leaf page {0}")]
    BrokenOverflowChain(PageId),

    /// Data corruption detected (e.g., checksum mismatch)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Store file has an invalid format
    #[error("Invalid store file: {0}")]
    InvalidStoreFile(String),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl ArboretumError {
    /// Create a corruption error with a message
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Create an invalid store file error
    pub fn invalid_store(msg: impl Into<String>) -> Self {
        Self::InvalidStoreFile(msg.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }
}

/// Outcome of an insertion into a B-tree node.
///
/// These are normal control flow for the B-tree driver, not errors: `NodeFull`
/// triggers a split, `Duplication` is reported to the caller when duplicates
/// are disallowed, and `SuccessNewOverflow` tells the driver that a fresh
/// overflow node was linked and the leaf header must be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry was stored.
    Success,
    /// The entry was stored in a freshly allocated overflow node.
    SuccessNewOverflow,
    /// The node has no room; the caller must split.
    NodeFull,
    /// Duplicates are disallowed and the key already exists.
    Duplication,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArboretumError::NodeTypeMismatch {
            page_id: PageId::new(7),
            expected: 0x464C,
            found: 0x4449,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("page 7"));
        assert!(msg.contains("0x464c"));
    }

    #[test]
    fn test_outcome_is_plain_data() {
        assert_eq!(InsertOutcome::Success, InsertOutcome::Success);
        assert_ne!(InsertOutcome::NodeFull, InsertOutcome::Duplication);
    }
}
