//! Joined result: triples produced by join queries.
//!
//! A joined result is a mathematical set of (object, joined object,
//! distance) triples: adding an already-present triple is a no-op, so a join
//! that evaluates a pair through more than one code path still reports it
//! once. Ordering follows the plain result container: distance ascending,
//! ties broken by the OID pair.

use crate::object::DataObject;
use crate::result::{QueryInfo, QueryKind};
use std::cmp::Ordering;

/// One join triple
#[derive(Debug, Clone)]
pub struct JoinedEntry<O: DataObject> {
    object: O,
    joined: O,
    key: f64,
}

impl<O: DataObject> JoinedEntry<O> {
    /// The left-side object
    pub fn object(&self) -> &O {
        &self.object
    }

    /// The right-side object
    pub fn joined_object(&self) -> &O {
        &self.joined
    }

    /// The distance between the two
    pub fn key(&self) -> f64 {
        self.key
    }

    fn order(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then(self.object.oid().cmp(&other.object.oid()))
            .then(self.joined.oid().cmp(&other.joined.oid()))
    }

    fn same_triple(&self, other: &Self) -> bool {
        self.key == other.key
            && self.object.oid() == other.object.oid()
            && self.joined.oid() == other.joined.oid()
    }
}

/// An ordered set of join triples
#[derive(Debug, Clone)]
pub struct JoinedResult<O: DataObject> {
    entries: Vec<JoinedEntry<O>>,
    info: QueryInfo<O>,
}

impl<O: DataObject> Default for JoinedResult<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: DataObject> JoinedResult<O> {
    /// Create an empty joined result
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            info: QueryInfo::default(),
        }
    }

    /// Attach information about the join that produced this result
    pub fn set_query_info(&mut self, kind: QueryKind, k: usize, radius: f64, tie: bool) {
        self.info = QueryInfo {
            kind,
            k,
            radius,
            inner_radius: 0.0,
            tie,
            sample: None,
        };
    }

    /// The query kind tag
    pub fn query_kind(&self) -> QueryKind {
        self.info.kind
    }

    /// The k the join ran with, if any
    pub fn k(&self) -> usize {
        self.info.k
    }

    /// The join radius, if any
    pub fn radius(&self) -> f64 {
        self.info.radius
    }

    /// Number of triples
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Whether the result is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Triple at position `idx`
    pub fn get(&self, idx: usize) -> &JoinedEntry<O> {
        &self.entries[idx]
    }

    /// Iterate triples in distance order
    pub fn iter(&self) -> std::slice::Iter<'_, JoinedEntry<O>> {
        self.entries.iter()
    }

    /// Add a triple, taking ownership of both objects. Re-adding a triple
    /// with the same OID pair and distance is a no-op.
    pub fn add_triple(&mut self, object: O, joined: O, key: f64) {
        let entry = JoinedEntry {
            object,
            joined,
            key,
        };
        let pos = self
            .entries
            .partition_point(|probe| probe.order(&entry) == Ordering::Less);
        if pos < self.entries.len() && self.entries[pos].same_triple(&entry) {
            return;
        }
        self.entries.insert(pos, entry);
    }

    /// Minimum distance, or `None` when empty
    pub fn min_key(&self) -> Option<f64> {
        self.entries.first().map(|e| e.key)
    }

    /// Maximum distance, or `None` when empty
    pub fn max_key(&self) -> Option<f64> {
        self.entries.last().map(|e| e.key)
    }

    /// Retain the first `limit` triples; with the tie flag, the suffix tied
    /// on the pivot distance is retained as well.
    pub fn cut(&mut self, limit: usize) {
        if limit == 0 {
            self.entries.clear();
            return;
        }
        if self.entries.is_empty() {
            return;
        }
        if self.info.tie {
            let pivot = self.entries[limit.min(self.entries.len()) - 1].key;
            while let Some(last) = self.entries.last() {
                if last.key > pivot {
                    self.entries.pop();
                } else {
                    break;
                }
            }
        } else {
            self.entries.truncate(limit);
        }
    }
}

impl<'a, O: DataObject> IntoIterator for &'a JoinedResult<O> {
    type Item = &'a JoinedEntry<O>;
    type IntoIter = std::slice::Iter<'a, JoinedEntry<O>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::test_objects::Item;

    #[test]
    fn test_triples_are_a_set() {
        let mut result = JoinedResult::new();
        result.add_triple(Item::new(1, 0.0), Item::new(2, 0.0), 1.0);
        result.add_triple(Item::new(1, 0.0), Item::new(2, 0.0), 1.0);
        result.add_triple(Item::new(1, 0.0), Item::new(3, 0.0), 1.0);

        assert_eq!(result.num_entries(), 2);
    }

    #[test]
    fn test_distance_order() {
        let mut result = JoinedResult::new();
        result.add_triple(Item::new(1, 0.0), Item::new(2, 0.0), 5.0);
        result.add_triple(Item::new(3, 0.0), Item::new(4, 0.0), 1.0);
        result.add_triple(Item::new(5, 0.0), Item::new(6, 0.0), 3.0);

        let keys: Vec<f64> = result.iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![1.0, 3.0, 5.0]);
        assert_eq!(result.min_key(), Some(1.0));
        assert_eq!(result.max_key(), Some(5.0));
    }

    #[test]
    fn test_cut() {
        let mut result = JoinedResult::new();
        for i in 0..5u64 {
            result.add_triple(Item::new(i, 0.0), Item::new(10 + i, 0.0), i as f64);
        }
        result.cut(3);
        assert_eq!(result.num_entries(), 3);
        assert_eq!(result.max_key(), Some(2.0));
    }
}
