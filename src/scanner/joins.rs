//! Join queries between two sequential stores.
//!
//! All joins are nested-loop: the outer store walks its chain, and for each
//! outer object the inner store's chain is walked in full. Results are sets
//! of (object, joined object, distance) triples; the joined-result container
//! refuses duplicate triples, so a pair can never be reported twice.

use crate::error::Result;
use crate::object::{DataObject, Metric};
use crate::result::{JoinedResult, QueryKind, QueryResult};
use crate::scanner::SequentialScan;
use crate::storage::PageManager;

impl<O: DataObject, M: Metric<O>, P: PageManager> SequentialScan<O, M, P> {
    /// Every pair within `radius` of each other, one triple per pair
    pub fn range_join_query<M2: Metric<O>, P2: PageManager>(
        &self,
        other: &SequentialScan<O, M2, P2>,
        radius: f64,
    ) -> Result<JoinedResult<O>> {
        let mut result = JoinedResult::new();
        result.set_query_info(QueryKind::RangeJoin, 0, radius, false);

        self.scan(|object| {
            other.scan(|joined| {
                let distance = self.metric().distance(&object, &joined);
                if distance <= radius {
                    result.add_triple(object.clone(), joined, distance);
                }
                Ok(true)
            })?;
            Ok(true)
        })?;
        Ok(result)
    }

    /// For each object here, its `k` nearest partners in `other`
    pub fn nearest_join_query<M2: Metric<O>, P2: PageManager>(
        &self,
        other: &SequentialScan<O, M2, P2>,
        k: usize,
        tie: bool,
    ) -> Result<JoinedResult<O>> {
        let mut result = JoinedResult::new();
        result.set_query_info(QueryKind::KNearestJoin, k, -1.0, tie);
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            // k-bounded accumulator local to this outer object
            let mut nearest: QueryResult<O> = QueryResult::new();
            nearest.set_query_info(None, QueryKind::KNearest, k, -1.0, 0.0, tie);

            other.scan(|joined| {
                let distance = self.metric().distance(&object, &joined);
                if nearest.num_entries() < k {
                    nearest.add(joined, distance);
                } else if distance <= nearest.max_key().unwrap() {
                    nearest.add(joined, distance);
                    nearest.cut(k);
                }
                Ok(true)
            })?;

            for entry in nearest.iter() {
                result.add_triple(object.clone(), entry.object().clone(), entry.key());
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// The `k` closest pairs across both stores
    pub fn closest_join_query<M2: Metric<O>, P2: PageManager>(
        &self,
        other: &SequentialScan<O, M2, P2>,
        k: usize,
        tie: bool,
    ) -> Result<JoinedResult<O>> {
        let mut result = JoinedResult::new();
        result.set_query_info(QueryKind::KClosestJoin, k, -1.0, tie);
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            other.scan(|joined| {
                let distance = self.metric().distance(&object, &joined);
                if result.num_entries() < k {
                    result.add_triple(object.clone(), joined, distance);
                } else if distance <= result.max_key().unwrap() {
                    result.add_triple(object.clone(), joined, distance);
                    result.cut(k);
                }
                Ok(true)
            })?;
            Ok(true)
        })?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::object::DataObject;
    use crate::result::test_objects::{Item, LineMetric};
    use crate::scanner::fixtures::LineScan;
    use crate::scanner::SequentialScan;
    use crate::PageManager;
    use crate::storage::MemoryPageManager;

    fn scan_with(oids_values: &[(u64, f64)]) -> LineScan {
        let mut scan =
            SequentialScan::new(MemoryPageManager::with_page_size(512), LineMetric).unwrap();
        for &(oid, v) in oids_values {
            scan.add(&Item::new(oid, v)).unwrap();
        }
        scan
    }

    #[test]
    fn test_range_join() {
        // left a=0, b=4; right c=1, d=-5
        // d(a,c)=1, d(a,d)=5, d(b,c)=3, d(b,d)=9
        let left = scan_with(&[(1, 0.0), (2, 4.0)]);
        let right = scan_with(&[(11, 1.0), (12, -5.0)]);

        let result = left.range_join_query(&right, 3.0).unwrap();
        assert_eq!(result.num_entries(), 2);

        let triples: Vec<(u64, u64, f64)> = result
            .iter()
            .map(|t| (t.object().oid(), t.joined_object().oid(), t.key()))
            .collect();
        assert_eq!(triples, vec![(1, 11, 1.0), (2, 11, 3.0)]);
    }

    #[test]
    fn test_range_join_reports_each_pair_once() {
        let left = scan_with(&[(1, 0.0), (2, 0.0)]);
        let right = scan_with(&[(11, 0.0)]);

        let result = left.range_join_query(&right, 1.0).unwrap();
        assert_eq!(result.num_entries(), 2);
    }

    #[test]
    fn test_nearest_join_bounds_per_left_object() {
        let left = scan_with(&[(1, 0.0), (2, 10.0)]);
        let right = scan_with(&[(11, 1.0), (12, 2.0), (13, 9.0)]);

        let result = left.nearest_join_query(&right, 1, false).unwrap();
        assert_eq!(result.num_entries(), 2);

        let triples: Vec<(u64, u64, f64)> = result
            .iter()
            .map(|t| (t.object().oid(), t.joined_object().oid(), t.key()))
            .collect();
        // each left object contributes its own nearest partner
        assert!(triples.contains(&(1, 11, 1.0)));
        assert!(triples.contains(&(2, 13, 1.0)));
    }

    #[test]
    fn test_closest_join_is_global() {
        let left = scan_with(&[(1, 0.0), (2, 10.0)]);
        let right = scan_with(&[(11, 1.0), (12, 8.0)]);

        // pair distances: (1,11)=1, (1,12)=8, (2,11)=9, (2,12)=2
        let result = left.closest_join_query(&right, 2, false).unwrap();
        assert_eq!(result.num_entries(), 2);
        let triples: Vec<(u64, u64, f64)> = result
            .iter()
            .map(|t| (t.object().oid(), t.joined_object().oid(), t.key()))
            .collect();
        assert_eq!(triples, vec![(1, 11, 1.0), (2, 12, 2.0)]);
    }

    #[test]
    fn test_join_pin_balance() {
        let left = scan_with(&[(1, 0.0), (2, 1.0), (3, 2.0)]);
        let right = scan_with(&[(11, 0.5), (12, 1.5)]);
        left.range_join_query(&right, 10.0).unwrap();
        assert_eq!(left.pager().outstanding_pins(), 0);
        assert_eq!(right.pager().outstanding_pins(), 0);
    }
}
