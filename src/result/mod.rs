//! Query-result containers.
//!
//! Every query returns one of the containers in this module. A result owns
//! its objects and keeps them ordered by key ascending, ties broken by the
//! object's durable identifier (OID) so output order is total and
//! reproducible. Attached query metadata (kind, k, radius, inner radius, tie
//! flag, sample) describes the query that produced the result without
//! changing its behavior.

mod constrained;
mod joined;
mod ordered;

pub use constrained::ConstrainedResult;
pub use joined::{JoinedEntry, JoinedResult};
pub use ordered::{KeyedEntry, KeyedResult};

use crate::object::DataObject;
use std::cmp::Ordering;

/// Stable integer tags describing the query that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum QueryKind {
    /// No information about the query
    Unknown = 0,
    /// Range query
    Range = 1,
    /// k nearest neighbours
    KNearest = 2,
    /// Estimated k nearest neighbours
    EstimateKNearest = 3,
    /// Ring query
    Ring = 4,
    /// k ring query
    KRing = 5,
    /// k AND range query
    KAndRange = 6,
    /// k OR range query
    KOrRange = 7,
    /// Point query
    Point = 8,
    /// Reversed range query
    ReversedRange = 9,
    /// k farthest neighbours
    KFarthest = 10,
    /// k closest join
    KClosestJoin = 11,
    /// k nearest join
    KNearestJoin = 12,
    /// Range join
    RangeJoin = 13,
    /// Grouped sum k nearest
    SumKNearest = 14,
    /// Grouped sum range
    SumRange = 15,
    /// Lazy range query
    LazyRange = 16,
    /// Next range query
    NextRange = 17,
    /// Previous range query
    PreviousRange = 18,
    /// Total order: less than
    ToLessThan = 19,
    /// Total order: less than or equal
    ToLessThanOrEqual = 20,
    /// Total order: equal
    ToEqual = 21,
    /// Total order: greater than
    ToGreaterThan = 22,
    /// Total order: greater than or equal
    ToGreaterThanOrEqual = 23,
    /// Total order: between
    ToBetween = 24,
    /// Grouped max k nearest
    MaxKNearest = 25,
    /// Grouped max range
    MaxRange = 26,
    /// Grouped aggregate (Euclidean) k nearest
    AllKNearest = 27,
    /// Grouped aggregate (Euclidean) range
    AllRange = 28,
}

/// One result entry: an owned object and the key it qualified under.
///
/// For similarity queries the key is the distance from the sample.
#[derive(Debug, Clone)]
pub struct ResultEntry<O: DataObject> {
    object: O,
    key: f64,
}

impl<O: DataObject> ResultEntry<O> {
    /// Create an entry
    pub fn new(object: O, key: f64) -> Self {
        Self { object, key }
    }

    /// The stored object
    pub fn object(&self) -> &O {
        &self.object
    }

    /// The entry's key
    pub fn key(&self) -> f64 {
        self.key
    }

    /// Take the object out of the entry
    pub fn into_object(self) -> O {
        self.object
    }

    fn order(&self, other: &Self) -> Ordering {
        self.key
            .total_cmp(&other.key)
            .then(self.object.oid().cmp(&other.object.oid()))
    }
}

/// Query metadata shared by the result containers
#[derive(Debug, Clone)]
pub(crate) struct QueryInfo<O: DataObject> {
    pub kind: QueryKind,
    pub k: usize,
    pub radius: f64,
    pub inner_radius: f64,
    pub tie: bool,
    pub sample: Option<O>,
}

impl<O: DataObject> Default for QueryInfo<O> {
    fn default() -> Self {
        Self {
            kind: QueryKind::Unknown,
            k: 0,
            radius: 0.0,
            inner_radius: 0.0,
            tie: false,
            sample: None,
        }
    }
}

/// An ordered multiset of (object, key) pairs answering a query.
///
/// Iteration order is key ascending, ties by OID ascending.
#[derive(Debug, Clone)]
pub struct QueryResult<O: DataObject> {
    entries: Vec<ResultEntry<O>>,
    info: QueryInfo<O>,
}

impl<O: DataObject> Default for QueryResult<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: DataObject> QueryResult<O> {
    /// Create an empty result
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            info: QueryInfo::default(),
        }
    }

    /// Attach information about the query that produced this result
    #[allow(clippy::too_many_arguments)]
    pub fn set_query_info(
        &mut self,
        sample: Option<O>,
        kind: QueryKind,
        k: usize,
        radius: f64,
        inner_radius: f64,
        tie: bool,
    ) {
        self.info = QueryInfo {
            kind,
            k,
            radius,
            inner_radius,
            tie,
            sample,
        };
    }

    /// The query kind tag
    pub fn query_kind(&self) -> QueryKind {
        self.info.kind
    }

    /// The k the query ran with, if any
    pub fn k(&self) -> usize {
        self.info.k
    }

    /// The query radius, if any
    pub fn radius(&self) -> f64 {
        self.info.radius
    }

    /// The inner radius (ring queries)
    pub fn inner_radius(&self) -> f64 {
        self.info.inner_radius
    }

    /// Whether the query kept a tie list
    pub fn tie(&self) -> bool {
        self.info.tie
    }

    /// The sample object the query ran against, if recorded
    pub fn sample(&self) -> Option<&O> {
        self.info.sample.as_ref()
    }

    /// Number of entries
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Whether the result is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at position `idx`
    pub fn get(&self, idx: usize) -> &ResultEntry<O> {
        &self.entries[idx]
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> std::slice::Iter<'_, ResultEntry<O>> {
        self.entries.iter()
    }

    /// Add a pair, taking ownership of the object. Duplicates are not
    /// checked; every pair is kept.
    pub fn add(&mut self, object: O, key: f64) {
        let entry = ResultEntry::new(object, key);
        let pos = self
            .entries
            .partition_point(|probe| probe.order(&entry) != Ordering::Greater);
        self.entries.insert(pos, entry);
    }

    /// Remove the first (minimum-key) entry
    pub fn remove_first(&mut self) -> Option<ResultEntry<O>> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Remove the last (maximum-key) entry
    pub fn remove_last(&mut self) -> Option<ResultEntry<O>> {
        self.entries.pop()
    }

    /// Minimum key, or `None` when empty
    pub fn min_key(&self) -> Option<f64> {
        self.entries.first().map(|e| e.key)
    }

    /// Maximum key, or `None` when empty
    pub fn max_key(&self) -> Option<f64> {
        self.entries.last().map(|e| e.key)
    }

    /// Retain the first `limit` entries. When the tie flag is set, a suffix
    /// whose key equals the key of entry `limit - 1` is retained as well.
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

    /// Retain the last `limit` entries. The mirror of [`cut`](Self::cut),
    /// used by farthest-neighbour queries.
    pub fn cut_first(&mut self, limit: usize) {
        while self.entries.len() > limit {
            self.entries.remove(0);
        }
    }

    /// Whether two results hold the same multiset of (key, object) pairs.
    ///
    /// Both results are already in total order, so a pairwise walk decides.
    pub fn is_equal(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|(a, b)| a.key == b.key && a.object == b.object)
    }

    /// Entries of `a` whose object also occurs in `b`
    pub fn intersection(a: &Self, b: &Self) -> Self {
        let mut out = Self::new();
        for entry in a.iter() {
            if b.iter().any(|probe| probe.object == entry.object) {
                out.add(entry.object.clone(), entry.key);
            }
        }
        out
    }

    /// Entries of `a` plus the entries of `b` whose object is not in `a`
    pub fn union(a: &Self, b: &Self) -> Self {
        let mut out = Self::new();
        for entry in a.iter() {
            out.add(entry.object.clone(), entry.key);
        }
        for entry in b.iter() {
            if !a.iter().any(|probe| probe.object == entry.object) {
                out.add(entry.object.clone(), entry.key);
            }
        }
        out
    }

    /// Fraction of `reference`'s objects present in `self`
    pub fn precision(&self, reference: &Self) -> f64 {
        if reference.is_empty() {
            return 0.0;
        }
        let hits = reference
            .iter()
            .filter(|entry| self.iter().any(|probe| probe.object == entry.object))
            .count();
        hits as f64 / reference.num_entries() as f64
    }
}

impl<'a, O: DataObject> IntoIterator for &'a QueryResult<O> {
    type Item = &'a ResultEntry<O>;
    type IntoIter = std::slice::Iter<'a, ResultEntry<O>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
pub(crate) mod test_objects {
    use crate::object::{DataObject, Metric};

    /// A labeled point on the line; the OID doubles as the label
    #[derive(Debug, Clone, PartialEq)]
    pub struct Item {
        pub oid: u64,
        pub value: f64,
    }

    impl Item {
        pub fn new(oid: u64, value: f64) -> Self {
            Self { oid, value }
        }
    }

    impl DataObject for Item {
        fn serialized_size(&self) -> usize {
            16
        }

        fn serialize(&self) -> Vec<u8> {
            let mut buf = Vec::with_capacity(16);
            buf.extend_from_slice(&self.oid.to_le_bytes());
            buf.extend_from_slice(&self.value.to_le_bytes());
            buf
        }

        fn deserialize(bytes: &[u8]) -> Self {
            Self {
                oid: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
                value: f64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            }
        }

        fn oid(&self) -> u64 {
            self.oid
        }
    }

    impl PartialOrd for Item {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }

    impl Ord for Item {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            self.oid.cmp(&other.oid)
        }
    }

    impl Eq for Item {}

    /// Absolute difference of the values
    pub struct LineMetric;

    impl Metric<Item> for LineMetric {
        fn distance(&self, a: &Item, b: &Item) -> f64 {
            (a.value - b.value).abs()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_objects::Item;
    use super::*;

    fn result_with(pairs: &[(u64, f64)]) -> QueryResult<Item> {
        let mut result = QueryResult::new();
        for &(oid, key) in pairs {
            result.add(Item::new(oid, 0.0), key);
        }
        result
    }

    #[test]
    fn test_key_ordering_with_oid_ties() {
        let result = result_with(&[(3, 2.0), (1, 1.0), (4, 2.0), (2, 2.0)]);
        let order: Vec<u64> = result.iter().map(|e| e.object().oid()).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert_eq!(result.min_key(), Some(1.0));
        assert_eq!(result.max_key(), Some(2.0));
    }

    #[test]
    fn test_cut_truncates() {
        let mut result = result_with(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]);
        result.cut(2);
        assert_eq!(result.num_entries(), 2);
        assert_eq!(result.max_key(), Some(2.0));
    }

    #[test]
    fn test_cut_retains_tie_suffix() {
        let mut result = result_with(&[(1, 1.0), (2, 2.0), (3, 2.0), (4, 2.0), (5, 9.0)]);
        result.set_query_info(None, QueryKind::KNearest, 2, 0.0, 0.0, true);
        result.cut(2);
        // entry[1] has key 2.0; the equal suffix stays, 9.0 goes
        assert_eq!(result.num_entries(), 4);
        assert_eq!(result.max_key(), Some(2.0));
    }

    #[test]
    fn test_cut_is_idempotent() {
        let mut result = result_with(&[(1, 1.0), (2, 2.0), (3, 2.0), (4, 5.0)]);
        result.set_query_info(None, QueryKind::KNearest, 2, 0.0, 0.0, true);
        result.cut(2);
        let after_first: Vec<u64> = result.iter().map(|e| e.object().oid()).collect();
        result.cut(2);
        let after_second: Vec<u64> = result.iter().map(|e| e.object().oid()).collect();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_cut_first_for_farthest() {
        let mut result = result_with(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]);
        result.cut_first(2);
        assert_eq!(result.num_entries(), 2);
        assert_eq!(result.min_key(), Some(3.0));
        assert_eq!(result.max_key(), Some(4.0));
    }

    #[test]
    fn test_remove_first_and_last() {
        let mut result = result_with(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        assert_eq!(result.remove_first().unwrap().key(), 1.0);
        assert_eq!(result.remove_last().unwrap().key(), 3.0);
        assert_eq!(result.num_entries(), 1);
    }

    #[test]
    fn test_set_algebra() {
        let a = result_with(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let b = result_with(&[(2, 2.0), (3, 3.0), (4, 4.0)]);

        let both = QueryResult::intersection(&a, &b);
        let ids: Vec<u64> = both.iter().map(|e| e.object().oid()).collect();
        assert_eq!(ids, vec![2, 3]);

        let all = QueryResult::union(&a, &b);
        let ids: Vec<u64> = all.iter().map(|e| e.object().oid()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        assert!(a.is_equal(&a.clone()));
        assert!(!a.is_equal(&b));
        assert!((a.precision(&b) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_query_info_roundtrip() {
        let mut result: QueryResult<Item> = QueryResult::new();
        result.set_query_info(Some(Item::new(0, 5.0)), QueryKind::Ring, 0, 4.0, 1.0, false);
        assert_eq!(result.query_kind(), QueryKind::Ring);
        assert_eq!(result.radius(), 4.0);
        assert_eq!(result.inner_radius(), 1.0);
        assert_eq!(result.sample().unwrap().oid(), 0);
    }
}
