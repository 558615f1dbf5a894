//! Priority queues for incremental best-first search.
//!
//! Two interchangeable implementations with identical semantics: an
//! insertion-sorted list and a binary heap over a growable array. Entries are
//! typed — a queue mixes nodes awaiting descent with objects awaiting
//! reporting — and priorities are triangle-inequality lower bounds on the
//! distance from the query, clamped at zero.
//!
//! Ordering (ascending = next to visit):
//! 1. smaller priority first;
//! 2. on equal priority, smaller kind first (`Object` < `ApproxObject` <
//!    `Node` < `ApproxNode`): objects and close approximations preempt node
//!    descents;
//! 3. on equal kind, greater height first, which finishes an in-progress
//!    descent before opening new branches.

use crate::object::DataObject;
use crate::types::PageId;
use std::cmp::Ordering;

/// The kind of a queue entry. The discriminant order is the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum EntryKind {
    /// A stored object with an exact distance to the query
    Object = 0,
    /// A stored object known only through its representative
    ApproxObject = 1,
    /// A subtree with an exact distance from its representative to the query
    Node = 2,
    /// A subtree known only through its representative's representative
    ApproxNode = 3,
}

/// One queue entry: a node to descend into or an object to report
#[derive(Debug, Clone)]
pub struct QueueEntry<O: DataObject> {
    kind: EntryKind,
    page_id: PageId,
    object: Option<O>,
    d_query: f64,
    d_rep: f64,
    d_rep_query: f64,
    radius: f64,
    height: u32,
    priority: f64,
}

impl<O: DataObject> QueueEntry<O> {
    /// A node entry: priority is `max(0, d_query - radius)`
    pub fn node(page_id: PageId, d_query: f64, radius: f64, height: u32) -> Self {
        Self {
            kind: EntryKind::Node,
            page_id,
            object: None,
            d_query,
            d_rep: 0.0,
            d_rep_query: d_query,
            radius,
            height,
            priority: (d_query - radius).max(0.0),
        }
    }

    /// An approximate node entry: priority is
    /// `max(0, |d_rep_query - d_rep| - radius)`
    pub fn approx_node(
        page_id: PageId,
        d_rep_query: f64,
        d_rep: f64,
        radius: f64,
        height: u32,
    ) -> Self {
        Self {
            kind: EntryKind::ApproxNode,
            page_id,
            object: None,
            d_query: 0.0,
            d_rep,
            d_rep_query,
            radius,
            height,
            priority: ((d_rep_query - d_rep).abs() - radius).max(0.0),
        }
    }

    /// An object entry: priority is the exact query distance
    pub fn exact_object(object: O, d_query: f64) -> Self {
        Self {
            kind: EntryKind::Object,
            page_id: PageId::NONE,
            object: Some(object),
            d_query,
            d_rep: 0.0,
            d_rep_query: 0.0,
            radius: 0.0,
            height: 0,
            priority: d_query,
        }
    }

    /// An approximate object entry: priority is `|d_rep_query - d_rep|`
    pub fn approx_object(object: O, d_rep: f64, d_rep_query: f64) -> Self {
        Self {
            kind: EntryKind::ApproxObject,
            page_id: PageId::NONE,
            object: Some(object),
            d_query: 0.0,
            d_rep,
            d_rep_query,
            radius: 0.0,
            height: 0,
            priority: (d_rep_query - d_rep).abs(),
        }
    }

    /// The entry kind
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// The subtree page for node kinds
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// The computed priority
    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// Exact distance to the query, for kinds that carry one
    pub fn d_query(&self) -> f64 {
        self.d_query
    }

    /// Distance to the representative
    pub fn d_rep(&self) -> f64 {
        self.d_rep
    }

    /// Distance from the representative to the query
    pub fn d_rep_query(&self) -> f64 {
        self.d_rep_query
    }

    /// Subtree radius for node kinds
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Height of the subtree for node kinds
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Borrow the object payload
    pub fn object(&self) -> Option<&O> {
        self.object.as_ref()
    }

    /// Take ownership of the object payload
    pub fn take_object(&mut self) -> Option<O> {
        self.object.take()
    }

    fn order(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then((self.kind as u8).cmp(&(other.kind as u8)))
            .then(other.height.cmp(&self.height))
    }
}

/// Insertion-sorted priority queue.
///
/// The list walk makes insertion linear; pops are constant. For the queue
/// sizes incremental search produces the simplicity usually wins over the
/// heap.
pub struct PriorityList<O: DataObject> {
    entries: Vec<QueueEntry<O>>,
}

impl<O: DataObject> Default for PriorityList<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: DataObject> PriorityList<O> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue an entry at its priority position. Insertion is stable: an
    /// entry goes after every earlier entry it ties with completely.
    pub fn push(&mut self, entry: QueueEntry<O>) {
        let mut pos = 0;
        while pos < self.entries.len() && self.entries[pos].order(&entry) != Ordering::Greater {
            pos += 1;
        }
        self.entries.insert(pos, entry);
    }

    /// Remove and return the next entry to visit
    pub fn pop(&mut self) -> Option<QueueEntry<O>> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Peek at the next entry without removing it
    pub fn peek(&self) -> Option<&QueueEntry<O>> {
        self.entries.first()
    }
}

/// Binary-heap priority queue over a growable array.
///
/// Same ordering semantics as [`PriorityList`]; the sift routines carry the
/// three-level comparison explicitly.
pub struct PriorityHeap<O: DataObject> {
    entries: Vec<QueueEntry<O>>,
}

impl<O: DataObject> Default for PriorityHeap<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: DataObject> PriorityHeap<O> {
    /// Create an empty heap
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create an empty heap with reserved capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the heap is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue an entry
    pub fn push(&mut self, entry: QueueEntry<O>) {
        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    /// Remove and return the next entry to visit
    pub fn pop(&mut self) -> Option<QueueEntry<O>> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let top = self.entries.pop();
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        top
    }

    /// Peek at the next entry without removing it
    pub fn peek(&self) -> Option<&QueueEntry<O>> {
        self.entries.first()
    }

    fn sift_up(&mut self, mut child: usize) {
        while child > 0 {
            let parent = (child - 1) / 2;
            if self.entries[parent].order(&self.entries[child]) == Ordering::Greater {
                self.entries.swap(parent, child);
                child = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut parent: usize) {
        loop {
            let left = parent * 2 + 1;
            if left >= self.entries.len() {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < self.entries.len()
                && self.entries[right].order(&self.entries[left]) == Ordering::Less
            {
                smallest = right;
            }
            if self.entries[parent].order(&self.entries[smallest]) == Ordering::Greater {
                self.entries.swap(parent, smallest);
                parent = smallest;
            } else {
                break;
            }
        }
    }
}
