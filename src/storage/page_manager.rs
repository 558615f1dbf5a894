//! The page-manager contract.
//!
//! Trees never touch files or frames directly; they allocate, pin, write and
//! dispose pages through this trait. Every method takes `&self` — concrete
//! managers guard their state internally so that a manager can be shared for
//! read access, e.g. by the two sides of a join query.

use crate::error::Result;
use crate::page::Page;
use crate::types::PageId;

/// Storage contract consumed by every tree in this crate.
///
/// # Pin discipline
///
/// Every page obtained from [`new_page`](PageManager::new_page) or
/// [`get_page`](PageManager::get_page) must be returned exactly once, through
/// either [`release_page`](PageManager::release_page) (keeps the page) or
/// [`dispose_page`](PageManager::dispose_page) (frees its id for reuse), on
/// every control-flow path including errors. [`outstanding_pins`]
/// (PageManager::outstanding_pins) exposes the live pin count so tests can
/// assert the balance.
///
/// The header page is separate from this discipline: it is distinguished,
/// persistently holds tree-wide metadata, and is written back explicitly with
/// [`write_header_page`](PageManager::write_header_page).
pub trait PageManager {
    /// Allocate a fresh page with a new id. The buffer content is zeroed.
    fn new_page(&self) -> Result<Page>;

    /// Pin an existing page.
    fn get_page(&self, id: PageId) -> Result<Page>;

    /// Schedule the page's current bytes for durable storage.
    fn write_page(&self, page: &Page) -> Result<()>;

    /// Release a pin. A dirty page is written back first.
    fn release_page(&self, page: Page) -> Result<()>;

    /// Mark the page free and release its id for reuse.
    fn dispose_page(&self, page: Page) -> Result<()>;

    /// The header page holding tree-wide metadata.
    fn header_page(&self) -> Result<Page>;

    /// Persist the header page.
    fn write_header_page(&self, page: &Page) -> Result<()>;

    /// The smallest page this store will hand out. All pages of a store have
    /// this size.
    fn min_page_size(&self) -> usize;

    /// Whether the store holds no data pages yet. Trees use this to decide
    /// between creating and loading their metadata.
    fn is_empty(&self) -> bool;

    /// Number of pages currently pinned.
    fn outstanding_pins(&self) -> usize;
}
