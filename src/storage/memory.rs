//! In-memory page store.
//!
//! The reference implementation of the page-manager contract: pages live in a
//! `Vec` indexed by id, with a free list for reuse. This is the store the test
//! suite runs on and the natural default for small, transient indexes.

use crate::error::{ArboretumError, Result};
use crate::page::Page;
use crate::storage::{FreeList, PageManager, FIRST_DATA_PAGE};
use crate::types::{PageId, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Frame {
    data: Vec<u8>,
    free: bool,
}

struct Inner {
    /// Frames indexed by page id; slots 0 and 1 are reserved (store identity
    /// and header page).
    frames: Vec<Frame>,
    free_list: FreeList,
    header: Vec<u8>,
}

/// A page manager keeping every page in memory
pub struct MemoryPageManager {
    page_size: usize,
    inner: Mutex<Inner>,
    pins: AtomicUsize,
}

impl MemoryPageManager {
    /// Create an empty store with the default page size
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store with the given page size
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is below the supported minimum.
    pub fn with_page_size(page_size: usize) -> Self {
        assert!(
            page_size >= MIN_PAGE_SIZE,
            "page size {} below minimum {}",
            page_size,
            MIN_PAGE_SIZE
        );
        let mut frames = Vec::new();
        // Reserved slots so data page ids start at FIRST_DATA_PAGE
        for _ in 0..FIRST_DATA_PAGE {
            frames.push(Frame {
                data: Vec::new(),
                free: true,
            });
        }
        Self {
            page_size,
            inner: Mutex::new(Inner {
                frames,
                free_list: FreeList::new(),
                header: vec![0u8; page_size],
            }),
            pins: AtomicUsize::new(0),
        }
    }
}

impl Default for MemoryPageManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PageManager for MemoryPageManager {
    fn new_page(&self) -> Result<Page> {
        let mut inner = self.inner.lock();
        let id = if let Some(id) = inner.free_list.pop() {
            let frame = &mut inner.frames[id.value() as usize];
            frame.data.fill(0);
            frame.free = false;
            id
        } else {
            let id = PageId::new(inner.frames.len() as u32);
            inner.frames.push(Frame {
                data: vec![0u8; self.page_size],
                free: false,
            });
            id
        };
        self.pins.fetch_add(1, Ordering::Relaxed);
        Ok(Page::new(id, vec![0u8; self.page_size]))
    }

    fn get_page(&self, id: PageId) -> Result<Page> {
        let inner = self.inner.lock();
        let idx = id.value() as usize;
        if id.value() < FIRST_DATA_PAGE || idx >= inner.frames.len() {
            return Err(ArboretumError::PageNotFound(id));
        }
        let frame = &inner.frames[idx];
        if frame.free {
            return Err(ArboretumError::PageNotAllocated(id));
        }
        self.pins.fetch_add(1, Ordering::Relaxed);
        Ok(Page::new(id, frame.data.clone()))
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = page.id().value() as usize;
        if page.id().value() < FIRST_DATA_PAGE || idx >= inner.frames.len() {
            return Err(ArboretumError::PageNotFound(page.id()));
        }
        if inner.frames[idx].free {
            return Err(ArboretumError::PageNotAllocated(page.id()));
        }
        inner.frames[idx].data.copy_from_slice(page.as_bytes());
        Ok(())
    }

    fn release_page(&self, mut page: Page) -> Result<()> {
        if page.is_dirty() {
            self.write_page(&page)?;
            page.clear_dirty();
        }
        self.pins.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    fn dispose_page(&self, page: Page) -> Result<()> {
        let mut inner = self.inner.lock();
        let idx = page.id().value() as usize;
        if page.id().value() < FIRST_DATA_PAGE || idx >= inner.frames.len() {
            return Err(ArboretumError::PageNotFound(page.id()));
        }
        inner.frames[idx].free = true;
        inner.free_list.push(page.id());
        self.pins.fetch_sub(1, Ordering::Relaxed);
        log::trace!("disposed page {}", page.id());
        Ok(())
    }

    fn header_page(&self) -> Result<Page> {
        let inner = self.inner.lock();
        Ok(Page::new(PageId::new(1), inner.header.clone()))
    }

    fn write_header_page(&self, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.header.copy_from_slice(page.as_bytes());
        Ok(())
    }

    fn min_page_size(&self) -> usize {
        self.page_size
    }

    fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.frames.len() as u32 == FIRST_DATA_PAGE
    }

    fn outstanding_pins(&self) -> usize {
        self.pins.load(Ordering::Relaxed)
    }
}
