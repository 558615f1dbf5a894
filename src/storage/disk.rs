//! File-backed page store.
//!
//! Pages map one-to-one onto fixed-size blocks of a single file: page 0 holds
//! the checksummed store header, page 1 is the client header page, data pages
//! follow. The free list is kept in memory; a reopened store starts with an
//! empty free list and extends the file for new pages.

use crate::error::{ArboretumError, Result};
use crate::page::Page;
use crate::storage::{FileHeader, FreeList, PageManager, FIRST_DATA_PAGE};
use crate::types::{PageId, DEFAULT_PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Inner {
    file: File,
    header: FileHeader,
    free_list: FreeList,
}

/// A page manager persisting pages to a single file
pub struct DiskPageManager {
    page_size: usize,
    inner: Mutex<Inner>,
    pins: AtomicUsize,
    sync_on_write: bool,
}

impl DiskPageManager {
    /// Open an existing store or create a new one with the default page size
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, DEFAULT_PAGE_SIZE, false)
    }

    /// Open an existing store or create a new one.
    ///
    /// `page_size` only applies to a freshly created store; an existing file
    /// keeps the size recorded in its header. With `sync_on_write`, every
    /// page write is followed by a data sync.
    pub fn open_with(path: &Path, page_size: usize, sync_on_write: bool) -> Result<Self> {
        let exists = path.exists();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if exists && file.metadata()?.len() >= 28 {
            let mut probe = vec![0u8; 28];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut probe)?;
            FileHeader::read(&probe)?
        } else {
            // Fresh store: lay down the header page and the client header page
            let header = FileHeader::new(page_size as u32);
            let mut buf = vec![0u8; page_size];
            header.write(&mut buf);

            file.seek(SeekFrom::Start(0))?;
            file.write_all(&buf)?;
            file.write_all(&vec![0u8; page_size])?;
            file.sync_all()?;

            header
        };

        Ok(Self {
            page_size: header.page_size as usize,
            inner: Mutex::new(Inner {
                file,
                header,
                free_list: FreeList::new(),
            }),
            pins: AtomicUsize::new(0),
            sync_on_write,
        })
    }

    fn flush_header(&self, inner: &mut Inner) -> Result<()> {
        let mut buf = vec![0u8; 28];
        inner.header.write(&mut buf);
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&buf)?;
        if self.sync_on_write {
            inner.file.sync_data()?;
        }
        Ok(())
    }

    fn write_at(&self, inner: &mut Inner, id: PageId, data: &[u8]) -> Result<()> {
        let offset = id.file_offset(self.page_size);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;
        if self.sync_on_write {
            inner.file.sync_data()?;
        }
        Ok(())
    }

    fn check_data_page(&self, inner: &Inner, id: PageId) -> Result<()> {
        if id.value() < FIRST_DATA_PAGE || id.value() >= inner.header.page_count {
            return Err(ArboretumError::PageNotFound(id));
        }
        if inner.free_list.contains(id) {
            return Err(ArboretumError::PageNotAllocated(id));
        }
        Ok(())
    }

    /// Sync all pending writes to disk
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.flush_header(&mut inner)?;
        inner.file.sync_all()?;
        Ok(())
    }
}

impl PageManager for DiskPageManager {
    fn new_page(&self) -> Result<Page> {
        let mut inner = self.inner.lock();

        let id = if let Some(id) = inner.free_list.pop() {
            id
        } else {
            let id = PageId::new(inner.header.allocate_page());
            // Extend the file with a zeroed block
            let zeros = vec![0u8; self.page_size];
            self.write_at(&mut inner, id, &zeros)?;
            self.flush_header(&mut inner)?;
            id
        };

        self.pins.fetch_add(1, Ordering::Relaxed);
        Ok(Page::new(id, vec![0u8; self.page_size]))
    }

    fn get_page(&self, id: PageId) -> Result<Page> {
        let mut inner = self.inner.lock();
        self.check_data_page(&inner, id)?;

        let offset = id.file_offset(self.page_size);
        let mut buf = vec![0u8; self.page_size];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut buf)?;

        self.pins.fetch_add(1, Ordering::Relaxed);
        Ok(Page::new(id, buf))
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_data_page(&inner, page.id())?;
        self.write_at(&mut inner, page.id(), page.as_bytes())
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
        self.check_data_page(&inner, page.id())?;
        inner.free_list.push(page.id());
        self.pins.fetch_sub(1, Ordering::Relaxed);
        log::trace!("disposed page {}", page.id());
        Ok(())
    }

    fn header_page(&self) -> Result<Page> {
        let mut inner = self.inner.lock();
        let offset = PageId::new(1).file_offset(self.page_size);
        let mut buf = vec![0u8; self.page_size];
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(&mut buf)?;
        Ok(Page::new(PageId::new(1), buf))
    }

    fn write_header_page(&self, page: &Page) -> Result<()> {
        let mut inner = self.inner.lock();
        self.write_at(&mut inner, PageId::new(1), page.as_bytes())
    }

    fn min_page_size(&self) -> usize {
        self.page_size
    }

    fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.header.page_count == FIRST_DATA_PAGE
    }

    fn outstanding_pins(&self) -> usize {
        self.pins.load(Ordering::Relaxed)
    }
}
