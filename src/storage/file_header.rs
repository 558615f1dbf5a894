//! Store file header.
//!
//! The first page (page 0) of a store file describes the store itself. Page 1
//! is the client header page handed to trees; data pages start at page 2.

use crate::error::{ArboretumError, Result};
use crate::types::MIN_PAGE_SIZE;

/// Magic bytes to identify a valid store file
pub const MAGIC: &[u8; 16] = b"ArboretumStore1\0";

/// First page id handed out for data
pub const FIRST_DATA_PAGE: u32 = 2;

/// Store file header
///
/// Layout:
/// ```text
/// Offset  Size  Description
/// 0       16    Magic string "ArboretumStore1\0"
/// 16      4     Page size (little-endian)
/// 20      4     Total page count, including pages 0 and 1
/// 24      4     Checksum of bytes 0..24 (CRC32)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    /// Page size in bytes
    pub page_size: u32,
    /// Total number of pages in the file
    pub page_count: u32,
}

impl FileHeader {
    /// Create a header for an empty store: pages 0 (this header) and 1 (the
    /// client header page) exist from the start.
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            page_count: FIRST_DATA_PAGE,
        }
    }

    /// Read a store header from bytes
    pub fn read(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 28 {
            return Err(ArboretumError::invalid_store("header too short"));
        }

        if &bytes[0..16] != MAGIC {
            return Err(ArboretumError::invalid_store("invalid magic bytes"));
        }

        let page_size = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let page_count = u32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);

        let stored_checksum = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
        let computed_checksum = crc32fast::hash(&bytes[0..24]);
        if stored_checksum != computed_checksum {
            return Err(ArboretumError::corruption("store header checksum mismatch"));
        }

        if (page_size as usize) < MIN_PAGE_SIZE {
            return Err(ArboretumError::invalid_store(format!(
                "page size {} below minimum {}",
                page_size, MIN_PAGE_SIZE
            )));
        }

        Ok(Self {
            page_size,
            page_count,
        })
    }

    /// Write this header into the first bytes of a page buffer
    pub fn write(&self, bytes: &mut [u8]) {
        bytes[..28].fill(0);
        bytes[0..16].copy_from_slice(MAGIC);
        bytes[16..20].copy_from_slice(&self.page_size.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.page_count.to_le_bytes());

        let checksum = crc32fast::hash(&bytes[0..24]);
        bytes[24..28].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Hand out the next fresh page id
    pub fn allocate_page(&mut self) -> u32 {
        let id = self.page_count;
        self.page_count += 1;
        id
    }
}
