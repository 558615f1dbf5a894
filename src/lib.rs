//! # Arboretum
//!
//! Disk-backed indexing structures for similarity (metric-space) and ordered
//! (B-tree) retrieval over user-defined object types, built on one generic
//! paged-tree engine.
//!
//! ## Architecture
//!
//! The engine is composed of swappable layers:
//!
//! - **Page layer** (`page`): fixed-size byte buffers with a modified flag
//! - **Storage layer** (`storage`): the page-manager contract plus in-memory
//!   and file-backed stores
//! - **Node layouts** (`node`): typed views interpreting a page as a B-tree
//!   index/leaf/overflow node, a sequential node, or a metric node
//! - **B-tree** (`btree`): ordered retrieval with duplicate keys chained
//!   into per-leaf overflow nodes
//! - **Sequential scanner** (`scanner`): the brute-force similarity store
//!   hosting the whole family of similarity queries
//! - **Priority queues** (`queue`): typed best-first queues for incremental
//!   nearest-neighbour search
//! - **Results** (`result`): ordered, reproducible query-result containers
//! - **MM tree** (`mmtree`): a four-region partition tree validated against
//!   the scanner
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arboretum::{DataObject, Metric, MemoryPageManager, SequentialScan};
//!
//! let scan = SequentialScan::new(MemoryPageManager::new(), MyMetric)?;
//! // ... add objects, then:
//! let nearest = scan.nearest_query(&sample, 10, false)?;
//! let in_range = scan.range_query(&sample, 0.5)?;
//! ```
//!
//! Stored object types implement [`DataObject`] (an opaque byte encoding
//! plus a durable identifier used for reproducible tie-breaking); distances
//! come from a [`Metric`] evaluator, assumed non-negative and symmetric,
//! with the triangle inequality wherever pruning bounds are used.

pub mod btree;
pub mod error;
pub mod mmtree;
pub mod node;
pub mod object;
pub mod page;
pub mod queue;
pub mod result;
pub mod scanner;
pub mod storage;
pub mod types;

pub use error::{ArboretumError, InsertOutcome, Result};
pub use object::{DataObject, Metric};
pub use types::{F64Key, Key, PageId};

// Re-export the main public API
pub use btree::BTree;
pub use mmtree::{InsertPolicy, MmTree};
pub use page::Page;
pub use queue::{EntryKind, PriorityHeap, PriorityList, QueueEntry};
pub use result::{
    ConstrainedResult, JoinedResult, KeyedResult, QueryKind, QueryResult, ResultEntry,
};
pub use scanner::SequentialScan;
pub use storage::{DiskPageManager, MemoryPageManager, PageManager};
