//! Constrained result: a result split into satisfying and non-satisfying
//! views.
//!
//! Constrained nearest-neighbour queries bound how many of the k answers
//! must (or may) satisfy a predicate. This container keeps the two classes in
//! separate sorted lists; the master order is their merge, so every entry
//! belongs to exactly one view by construction. Master-level operations
//! (global maximum, remove-last, cut) compare the two list tails.

use crate::object::DataObject;
use crate::result::{QueryInfo, QueryKind, ResultEntry};
use std::cmp::Ordering;

/// A query result whose entries are partitioned by a predicate
#[derive(Debug, Clone)]
pub struct ConstrainedResult<O: DataObject> {
    satisfying: Vec<ResultEntry<O>>,
    not_satisfying: Vec<ResultEntry<O>>,
    info: QueryInfo<O>,
}

impl<O: DataObject> Default for ConstrainedResult<O> {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_order<O: DataObject>(a: &ResultEntry<O>, b: &ResultEntry<O>) -> Ordering {
    a.key()
        .total_cmp(&b.key())
        .then(a.object().oid().cmp(&b.object().oid()))
}

fn sorted_insert<O: DataObject>(list: &mut Vec<ResultEntry<O>>, entry: ResultEntry<O>) {
    let pos = list.partition_point(|probe| entry_order(probe, &entry) != Ordering::Greater);
    list.insert(pos, entry);
}

impl<O: DataObject> ConstrainedResult<O> {
    /// Create an empty constrained result
    pub fn new() -> Self {
        Self {
            satisfying: Vec::new(),
            not_satisfying: Vec::new(),
            info: QueryInfo::default(),
        }
    }

    /// Attach information about the query that produced this result
    pub fn set_query_info(&mut self, sample: Option<O>, kind: QueryKind, k: usize, radius: f64) {
        self.info = QueryInfo {
            kind,
            k,
            radius,
            inner_radius: 0.0,
            tie: false,
            sample,
        };
    }

    /// The query kind tag
    pub fn query_kind(&self) -> QueryKind {
        self.info.kind
    }

    /// The k the query ran with
    pub fn k(&self) -> usize {
        self.info.k
    }

    /// Total number of entries across both views
    pub fn num_entries(&self) -> usize {
        self.satisfying.len() + self.not_satisfying.len()
    }

    /// Number of entries satisfying the predicate
    pub fn num_satisfying(&self) -> usize {
        self.satisfying.len()
    }

    /// Number of entries not satisfying the predicate
    pub fn num_not_satisfying(&self) -> usize {
        self.not_satisfying.len()
    }

    /// Whether the result is empty
    pub fn is_empty(&self) -> bool {
        self.satisfying.is_empty() && self.not_satisfying.is_empty()
    }

    /// Add an entry to the satisfying view
    pub fn add_satisfying(&mut self, object: O, key: f64) {
        sorted_insert(&mut self.satisfying, ResultEntry::new(object, key));
    }

    /// Add an entry to the non-satisfying view
    pub fn add_not_satisfying(&mut self, object: O, key: f64) {
        sorted_insert(&mut self.not_satisfying, ResultEntry::new(object, key));
    }

    /// Satisfying entry at position `idx`
    pub fn satisfying(&self, idx: usize) -> &ResultEntry<O> {
        &self.satisfying[idx]
    }

    /// Iterate the satisfying view in key order
    pub fn iter_satisfying(&self) -> std::slice::Iter<'_, ResultEntry<O>> {
        self.satisfying.iter()
    }

    /// Iterate the non-satisfying view in key order
    pub fn iter_not_satisfying(&self) -> std::slice::Iter<'_, ResultEntry<O>> {
        self.not_satisfying.iter()
    }

    /// Entries of both views merged into global key order
    pub fn iter(&self) -> Vec<&ResultEntry<O>> {
        let mut merged: Vec<&ResultEntry<O>> = Vec::with_capacity(self.num_entries());
        let mut sat = self.satisfying.iter().peekable();
        let mut non = self.not_satisfying.iter().peekable();
        loop {
            match (sat.peek(), non.peek()) {
                (Some(a), Some(b)) => {
                    if entry_order(a, b) != Ordering::Greater {
                        merged.push(sat.next().unwrap());
                    } else {
                        merged.push(non.next().unwrap());
                    }
                }
                (Some(_), None) => merged.push(sat.next().unwrap()),
                (None, Some(_)) => merged.push(non.next().unwrap()),
                (None, None) => break,
            }
        }
        merged
    }

    /// Maximum key across both views, or `None` when empty
    pub fn max_key(&self) -> Option<f64> {
        match (self.satisfying.last(), self.not_satisfying.last()) {
            (Some(a), Some(b)) => Some(a.key().max(b.key())),
            (Some(a), None) => Some(a.key()),
            (None, Some(b)) => Some(b.key()),
            (None, None) => None,
        }
    }

    /// Key of the farthest satisfying entry
    pub fn last_satisfying_key(&self) -> Option<f64> {
        self.satisfying.last().map(|e| e.key())
    }

    /// Key of the farthest non-satisfying entry
    pub fn last_not_satisfying_key(&self) -> Option<f64> {
        self.not_satisfying.last().map(|e| e.key())
    }

    /// Remove the globally last entry (the larger of the two view tails)
    pub fn remove_last(&mut self) -> Option<ResultEntry<O>> {
        match (self.satisfying.last(), self.not_satisfying.last()) {
            (Some(a), Some(b)) => {
                if entry_order(a, b) == Ordering::Greater {
                    self.satisfying.pop()
                } else {
                    self.not_satisfying.pop()
                }
            }
            (Some(_), None) => self.satisfying.pop(),
            (None, Some(_)) => self.not_satisfying.pop(),
            (None, None) => None,
        }
    }

    /// Cut the master list to `limit` entries, removing globally-last ones
    pub fn cut(&mut self, limit: usize) {
        while self.num_entries() > limit {
            self.remove_last();
        }
    }

    /// Cut the satisfying view to `limit` entries
    pub fn cut_satisfying(&mut self, limit: usize) {
        self.satisfying.truncate(limit);
    }

    /// Cut the non-satisfying view to `limit` entries
    pub fn cut_not_satisfying(&mut self, limit: usize) {
        self.not_satisfying.truncate(limit);
    }

    /// Move the satisfying entry at `idx` into the non-satisfying view
    pub fn demote_satisfying(&mut self, idx: usize) {
        let entry = self.satisfying.remove(idx);
        sorted_insert(&mut self.not_satisfying, entry);
    }

    /// Remove the satisfying entry at `idx` entirely
    pub fn remove_satisfying(&mut self, idx: usize) -> ResultEntry<O> {
        self.satisfying.remove(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::test_objects::Item;

    fn filled() -> ConstrainedResult<Item> {
        let mut result = ConstrainedResult::new();
        result.add_satisfying(Item::new(1, 0.0), 1.0);
        result.add_satisfying(Item::new(3, 0.0), 3.0);
        result.add_not_satisfying(Item::new(2, 0.0), 2.0);
        result.add_not_satisfying(Item::new(4, 0.0), 4.0);
        result
    }

    #[test]
    fn test_views_and_merge() {
        let result = filled();
        assert_eq!(result.num_entries(), 4);
        assert_eq!(result.num_satisfying(), 2);
        assert_eq!(result.num_not_satisfying(), 2);

        let order: Vec<u64> = result.iter().iter().map(|e| e.object().oid()).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(result.max_key(), Some(4.0));
    }

    #[test]
    fn test_global_cut_removes_from_the_right_view() {
        let mut result = filled();
        result.cut(3);
        // The farthest entry was non-satisfying
        assert_eq!(result.num_satisfying(), 2);
        assert_eq!(result.num_not_satisfying(), 1);

        result.cut(2);
        assert_eq!(result.num_satisfying(), 1);
        assert_eq!(result.num_not_satisfying(), 1);
    }

    #[test]
    fn test_view_cuts() {
        let mut result = filled();
        result.cut_satisfying(1);
        assert_eq!(result.num_satisfying(), 1);
        assert_eq!(result.last_satisfying_key(), Some(1.0));

        result.cut_not_satisfying(0);
        assert_eq!(result.num_not_satisfying(), 0);
        assert_eq!(result.last_not_satisfying_key(), None);
    }

    #[test]
    fn test_demote_satisfying() {
        let mut result = filled();
        result.demote_satisfying(1);
        assert_eq!(result.num_satisfying(), 1);
        assert_eq!(result.num_not_satisfying(), 3);
        // merged order unchanged
        let order: Vec<u64> = result.iter().iter().map(|e| e.object().oid()).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }
}
