//! Grouped similarity queries: one query against a list of samples.
//!
//! Each stored object's per-sample distances are folded into a single
//! aggregate — their sum, their maximum, or their Euclidean combination — and
//! the usual range or k-nearest bound applies to the aggregate.

use crate::error::Result;
use crate::object::{DataObject, Metric};
use crate::result::{QueryKind, QueryResult};
use crate::scanner::SequentialScan;
use crate::storage::PageManager;

/// How per-sample distances combine into one aggregate
#[derive(Clone, Copy)]
enum Fold {
    Sum,
    Max,
    Euclidean,
}

impl Fold {
    fn aggregate<O: DataObject>(
        self,
        metric: &impl Metric<O>,
        object: &O,
        samples: &[O],
    ) -> f64 {
        match self {
            Fold::Sum => samples
                .iter()
                .map(|sample| metric.distance(object, sample))
                .sum(),
            Fold::Max => samples
                .iter()
                .map(|sample| metric.distance(object, sample))
                .fold(0.0, f64::max),
            Fold::Euclidean => samples
                .iter()
                .map(|sample| {
                    let d = metric.distance(object, sample);
                    d * d
                })
                .sum::<f64>()
                .sqrt(),
        }
    }
}

impl<O: DataObject, M: Metric<O>, P: PageManager> SequentialScan<O, M, P> {
    fn grouped_nearest(
        &self,
        samples: &[O],
        k: usize,
        tie: bool,
        fold: Fold,
        kind: QueryKind,
    ) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(samples.first().cloned(), kind, k, -1.0, 0.0, tie);
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            let distance = fold.aggregate(self.metric(), &object, samples);
            if result.num_entries() < k {
                result.add(object, distance);
            } else if distance <= result.max_key().unwrap() {
                result.add(object, distance);
                result.cut(k);
            }
            Ok(true)
        })?;
        Ok(result)
    }

    fn grouped_range(
        &self,
        samples: &[O],
        radius: f64,
        fold: Fold,
        kind: QueryKind,
    ) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(samples.first().cloned(), kind, 0, radius, 0.0, false);

        self.scan(|object| {
            let distance = fold.aggregate(self.metric(), &object, samples);
            if distance <= radius {
                result.add(object, distance);
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// k objects minimizing the sum of distances to the samples
    pub fn sum_nearest_query(&self, samples: &[O], k: usize, tie: bool) -> Result<QueryResult<O>> {
        self.grouped_nearest(samples, k, tie, Fold::Sum, QueryKind::SumKNearest)
    }

    /// Objects whose summed distance to the samples is within `radius`
    pub fn sum_range_query(&self, samples: &[O], radius: f64) -> Result<QueryResult<O>> {
        self.grouped_range(samples, radius, Fold::Sum, QueryKind::SumRange)
    }

    /// k objects minimizing the maximum distance to any sample
    pub fn max_nearest_query(&self, samples: &[O], k: usize, tie: bool) -> Result<QueryResult<O>> {
        self.grouped_nearest(samples, k, tie, Fold::Max, QueryKind::MaxKNearest)
    }

    /// Objects whose maximum distance to any sample is within `radius`
    pub fn max_range_query(&self, samples: &[O], radius: f64) -> Result<QueryResult<O>> {
        self.grouped_range(samples, radius, Fold::Max, QueryKind::MaxRange)
    }

    /// k objects minimizing the Euclidean combination of the per-sample
    /// distances (the square root of their sum of squares)
    pub fn all_nearest_query(&self, samples: &[O], k: usize, tie: bool) -> Result<QueryResult<O>> {
        self.grouped_nearest(samples, k, tie, Fold::Euclidean, QueryKind::AllKNearest)
    }

    /// Objects whose Euclidean distance combination is within `radius`
    pub fn all_range_query(&self, samples: &[O], radius: f64) -> Result<QueryResult<O>> {
        self.grouped_range(samples, radius, Fold::Euclidean, QueryKind::AllRange)
    }
}

#[cfg(test)]
mod tests {
    use crate::object::DataObject;
    use crate::result::test_objects::Item;
    use crate::result::QueryKind;
    use crate::scanner::fixtures::line_scan;

    fn samples() -> Vec<Item> {
        // two probes at 0 and 4
        vec![Item::new(100, 0.0), Item::new(101, 4.0)]
    }

    #[test]
    fn test_sum_queries() {
        let scan = line_scan(&[0.0, 2.0, 4.0, 10.0]);

        // sums of |x| + |x - 4|: 4, 4, 4, 16
        let result = scan.sum_range_query(&samples(), 4.0).unwrap();
        assert_eq!(result.num_entries(), 3);
        assert_eq!(result.query_kind(), QueryKind::SumRange);

        let result = scan.sum_nearest_query(&samples(), 1, false).unwrap();
        assert_eq!(result.num_entries(), 1);
        assert_eq!(result.get(0).key(), 4.0);
    }

    #[test]
    fn test_max_queries() {
        let scan = line_scan(&[0.0, 2.0, 4.0, 10.0]);

        // max distances: 4, 2, 4, 10
        let result = scan.max_range_query(&samples(), 2.0).unwrap();
        assert_eq!(result.num_entries(), 1);
        assert_eq!(result.get(0).object().oid(), 1);

        let result = scan.max_nearest_query(&samples(), 1, false).unwrap();
        assert_eq!(result.get(0).object().oid(), 1);
        assert_eq!(result.get(0).key(), 2.0);
    }

    #[test]
    fn test_all_queries() {
        let scan = line_scan(&[0.0, 2.0, 10.0]);

        // sqrt(x^2 + (x-4)^2): sqrt(16)=4, sqrt(8)=2.828.., sqrt(136)
        let result = scan.all_range_query(&samples(), 4.0).unwrap();
        assert_eq!(result.num_entries(), 2);
        assert_eq!(result.min_key().map(|k| (k * 1000.0).round()), Some(2828.0));

        let result = scan.all_nearest_query(&samples(), 2, false).unwrap();
        let oids: Vec<u64> = result.iter().map(|e| e.object().oid()).collect();
        assert_eq!(oids, vec![1, 0]);
    }
}
