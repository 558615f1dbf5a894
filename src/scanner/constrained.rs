//! Constrained nearest-neighbour queries.
//!
//! These variants bound how many of the k answers satisfy a predicate over
//! the object. The pre-constrained form filters candidates before they count
//! toward k; the intra-constrained forms fill a [`ConstrainedResult`] whose
//! satisfying and non-satisfying views are balanced against the aggregate
//! bound while the scan runs. Distance is always tested first — the
//! constraint may require decoding payload the index does not carry.
//!
//! The distinct variants collapse duplicates of a secondary key: only the
//! closest instance of each distinct value counts toward the aggregate, and
//! farther instances are treated as non-satisfying.

use crate::error::Result;
use crate::object::{DataObject, Metric};
use crate::result::{ConstrainedResult, QueryKind};
use crate::scanner::SequentialScan;
use crate::storage::PageManager;

impl<O: DataObject, M: Metric<O>, P: PageManager> SequentialScan<O, M, P> {
    /// k nearest among the objects satisfying `predicate`
    pub fn pre_constrained_nearest_query<F>(
        &self,
        sample: &O,
        k: usize,
        predicate: F,
    ) -> Result<ConstrainedResult<O>>
    where
        F: Fn(&O) -> bool,
    {
        let mut result = ConstrainedResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::KNearest, k, -1.0);
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            let distance = self.metric().distance(&object, sample);
            if result.num_entries() < k || distance <= result.max_key().unwrap() {
                if predicate(&object) {
                    result.add_satisfying(object, distance);
                    if result.num_entries() > k {
                        result.cut(k);
                    }
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// k nearest with at least `agg_value` of them satisfying `predicate`.
    ///
    /// Matching objects always compete; non-matching ones are admitted only
    /// into the `k - agg_value` slots the bound leaves open.
    ///
    /// # Panics
    ///
    /// Panics if `agg_value` exceeds `k`.
    pub fn constrained_nearest_count_at_least<F>(
        &self,
        sample: &O,
        k: usize,
        predicate: F,
        agg_value: usize,
    ) -> Result<ConstrainedResult<O>>
    where
        F: Fn(&O) -> bool,
    {
        assert!(
            agg_value <= k,
            "aggregate bound {} exceeds k {}",
            agg_value,
            k
        );
        let mut result = ConstrainedResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::KNearest, k, -1.0);
        if k == 0 {
            return Ok(result);
        }
        let open_slots = k - agg_value;

        self.scan(|object| {
            let distance = self.metric().distance(&object, sample);
            if result.num_entries() >= k && distance > result.max_key().unwrap() {
                return Ok(true);
            }

            if predicate(&object) {
                result.add_satisfying(object, distance);
                if result.num_entries() > k {
                    result.cut(k);
                }
            } else if result.num_not_satisfying() < open_slots {
                result.add_not_satisfying(object, distance);
                if result.num_entries() > k {
                    result.cut(k);
                }
            } else if result.num_not_satisfying() > 0
                && distance < result.last_not_satisfying_key().unwrap()
            {
                result.add_not_satisfying(object, distance);
                result.cut_not_satisfying(open_slots);
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// k nearest with at most `agg_value` of them satisfying `predicate`.
    ///
    /// The mirror bound: matching objects only occupy up to `agg_value`
    /// slots (kept closest-first), non-matching ones fill the rest.
    ///
    /// # Panics
    ///
    /// Panics if `agg_value` exceeds `k`.
    pub fn constrained_nearest_count_at_most<F>(
        &self,
        sample: &O,
        k: usize,
        predicate: F,
        agg_value: usize,
    ) -> Result<ConstrainedResult<O>>
    where
        F: Fn(&O) -> bool,
    {
        assert!(
            agg_value <= k,
            "aggregate bound {} exceeds k {}",
            agg_value,
            k
        );
        let mut result = ConstrainedResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::KNearest, k, -1.0);
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            let distance = self.metric().distance(&object, sample);
            if result.num_entries() >= k && distance > result.max_key().unwrap() {
                return Ok(true);
            }

            if predicate(&object) {
                if result.num_satisfying() < agg_value {
                    result.add_satisfying(object, distance);
                    if result.num_entries() > k {
                        result.cut(k);
                    }
                } else if result.num_satisfying() > 0
                    && distance < result.last_satisfying_key().unwrap()
                {
                    result.add_satisfying(object, distance);
                    result.cut_satisfying(agg_value);
                }
            } else {
                result.add_not_satisfying(object, distance);
                if result.num_entries() > k {
                    result.cut(k);
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// Like [`constrained_nearest_count_at_least`]
    /// (Self::constrained_nearest_count_at_least), but duplicates of the
    /// secondary key `agg_key` count once: only the closest instance sits in
    /// the satisfying view, later instances compete as non-satisfying.
    ///
    /// # Panics
    ///
    /// Panics if `agg_value` exceeds `k`.
    pub fn constrained_nearest_count_distinct_at_least<F, A, T>(
        &self,
        sample: &O,
        k: usize,
        predicate: F,
        agg_key: A,
        agg_value: usize,
    ) -> Result<ConstrainedResult<O>>
    where
        F: Fn(&O) -> bool,
        A: Fn(&O) -> T,
        T: PartialEq,
    {
        assert!(
            agg_value <= k,
            "aggregate bound {} exceeds k {}",
            agg_value,
            k
        );
        let mut result = ConstrainedResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::KNearest, k, -1.0);
        if k == 0 {
            return Ok(result);
        }
        let open_slots = k - agg_value;

        self.scan(|object| {
            let distance = self.metric().distance(&object, sample);
            if result.num_entries() >= k && distance > result.max_key().unwrap() {
                return Ok(true);
            }

            if !predicate(&object) {
                if result.num_not_satisfying() < open_slots {
                    result.add_not_satisfying(object, distance);
                    result.cut(k);
                } else if result.num_not_satisfying() > 0
                    && distance < result.last_not_satisfying_key().unwrap()
                {
                    result.add_not_satisfying(object, distance);
                    result.cut_not_satisfying(open_slots);
                }
                return Ok(true);
            }

            let key = agg_key(&object);
            let duplicate = (0..result.num_satisfying())
                .find(|&i| agg_key(result.satisfying(i).object()) == key);

            match duplicate {
                None => {
                    result.add_satisfying(object, distance);
                    if result.num_entries() > k {
                        if result.num_satisfying() > agg_value {
                            result.cut(k);
                        } else {
                            result.cut_not_satisfying(open_slots);
                        }
                    }
                }
                Some(i) if distance < result.satisfying(i).key() => {
                    // The new instance is closer: it takes the satisfying
                    // slot and the old one is demoted to non-satisfying (or
                    // dropped when no slot admits it).
                    let old_key = result.satisfying(i).key();
                    if result.num_not_satisfying() < open_slots {
                        result.demote_satisfying(i);
                        result.add_satisfying(object, distance);
                        result.cut(k);
                    } else if result.num_not_satisfying() > 0
                        && old_key < result.last_not_satisfying_key().unwrap()
                    {
                        result.demote_satisfying(i);
                        result.add_satisfying(object, distance);
                        result.cut_not_satisfying(open_slots);
                    } else {
                        result.remove_satisfying(i);
                        result.add_satisfying(object, distance);
                    }
                }
                Some(_) => {
                    // A closer instance already represents this value; the
                    // new one competes as non-satisfying.
                    if result.num_not_satisfying() < open_slots {
                        result.add_not_satisfying(object, distance);
                        result.cut(k);
                    } else if result.num_not_satisfying() > 0
                        && distance < result.last_not_satisfying_key().unwrap()
                    {
                        result.add_not_satisfying(object, distance);
                        result.cut_not_satisfying(open_slots);
                    }
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// Like [`constrained_nearest_count_at_most`]
    /// (Self::constrained_nearest_count_at_most), with duplicates of
    /// `agg_key` collapsed to their closest instance, so at most `agg_value`
    /// distinct values remain in the satisfying view.
    ///
    /// # Panics
    ///
    /// Panics if `agg_value` exceeds `k`.
    pub fn constrained_nearest_count_distinct_at_most<F, A, T>(
        &self,
        sample: &O,
        k: usize,
        predicate: F,
        agg_key: A,
        agg_value: usize,
    ) -> Result<ConstrainedResult<O>>
    where
        F: Fn(&O) -> bool,
        A: Fn(&O) -> T,
        T: PartialEq,
    {
        assert!(
            agg_value <= k,
            "aggregate bound {} exceeds k {}",
            agg_value,
            k
        );
        let mut result = ConstrainedResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::KNearest, k, -1.0);
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            let distance = self.metric().distance(&object, sample);
            if result.num_entries() >= k && distance > result.max_key().unwrap() {
                return Ok(true);
            }

            if !predicate(&object) {
                result.add_not_satisfying(object, distance);
                result.cut(k);
                return Ok(true);
            }

            let key = agg_key(&object);
            let duplicate = (0..result.num_satisfying())
                .find(|&i| agg_key(result.satisfying(i).object()) == key);

            match duplicate {
                Some(i) if distance < result.satisfying(i).key() => {
                    // Exchange with its farther duplicate
                    result.remove_satisfying(i);
                    result.add_satisfying(object, distance);
                }
                Some(_) => {}
                None => {
                    if result.num_satisfying() < agg_value {
                        result.add_satisfying(object, distance);
                        result.cut(k);
                    } else if result.num_satisfying() > 0
                        && distance < result.last_satisfying_key().unwrap()
                    {
                        result.add_satisfying(object, distance);
                        result.cut_satisfying(agg_value);
                    }
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use crate::object::DataObject;
    use crate::result::test_objects::{Item, LineMetric};
    use crate::scanner::fixtures::sample;
    use crate::scanner::SequentialScan;
    use crate::PageManager;
    use crate::storage::MemoryPageManager;

    /// Matching objects carry even OIDs
    fn is_even(item: &Item) -> bool {
        item.oid % 2 == 0
    }

    fn scan_with(oids_values: &[(u64, f64)]) -> SequentialScan<Item, LineMetric, MemoryPageManager>
    {
        let mut scan =
            SequentialScan::new(MemoryPageManager::with_page_size(512), LineMetric).unwrap();
        for &(oid, v) in oids_values {
            scan.add(&Item::new(oid, v)).unwrap();
        }
        scan
    }

    /// Matching (even oid) at distances 0.5, 1.5, 2.5; non-matching at
    /// 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0
    fn mixed_scan() -> SequentialScan<Item, LineMetric, MemoryPageManager> {
        scan_with(&[
            (2, 0.5),
            (4, 1.5),
            (6, 2.5),
            (1, 1.0),
            (3, 2.0),
            (5, 3.0),
            (7, 4.0),
            (9, 5.0),
            (11, 6.0),
            (13, 7.0),
        ])
    }

    #[test]
    fn test_pre_constrained_ignores_non_matching() {
        let scan = mixed_scan();
        let result = scan
            .pre_constrained_nearest_query(&sample(0.0), 2, is_even)
            .unwrap();

        assert_eq!(result.num_entries(), 2);
        assert_eq!(result.num_satisfying(), 2);
        let oids: Vec<u64> = result.iter_satisfying().map(|e| e.object().oid()).collect();
        assert_eq!(oids, vec![2, 4]);
    }

    #[test]
    fn test_count_at_least_holds_the_bound() {
        let scan = mixed_scan();
        let result = scan
            .constrained_nearest_count_at_least(&sample(0.0), 4, is_even, 2)
            .unwrap();

        // k answers, at least agg_value of them matching
        assert_eq!(result.num_entries(), 4);
        assert!(result.num_satisfying() >= 2);
        assert!(result.num_not_satisfying() <= 2);

        // closest possible under the bound: 0.5, 1.0, 1.5, 2.0
        let keys: Vec<f64> = result.iter().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec![0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn test_count_at_least_fills_with_matching_when_needed() {
        // Only matching objects beyond the near ones; the bound forces the
        // farther matching object in over a closer non-matching one
        let scan = scan_with(&[(2, 1.0), (4, 5.0), (6, 6.0), (1, 2.0), (3, 3.0)]);
        let result = scan
            .constrained_nearest_count_at_least(&sample(0.0), 3, is_even, 2)
            .unwrap();

        assert_eq!(result.num_entries(), 3);
        assert!(result.num_satisfying() >= 2);
        let sat: Vec<u64> = result.iter_satisfying().map(|e| e.object().oid()).collect();
        assert_eq!(sat, vec![2, 4]);
        let non: Vec<u64> = result
            .iter_not_satisfying()
            .map(|e| e.object().oid())
            .collect();
        assert_eq!(non, vec![1]);
    }

    #[test]
    fn test_count_at_most_caps_matching() {
        let scan = mixed_scan();
        let result = scan
            .constrained_nearest_count_at_most(&sample(0.0), 4, is_even, 1)
            .unwrap();

        assert_eq!(result.num_entries(), 4);
        assert!(result.num_satisfying() <= 1);
        // the single matching slot holds the closest match
        assert_eq!(result.satisfying(0).object().oid(), 2);
        // the rest are the closest non-matching objects
        let non: Vec<f64> = result.iter_not_satisfying().map(|e| e.key()).collect();
        assert_eq!(non, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_distinct_at_least_collapses_duplicates() {
        // Secondary key = oid % 10: objects 12 and 22 share value 2
        let scan = scan_with(&[(12, 1.0), (22, 0.5), (14, 2.0), (1, 1.5), (3, 3.0)]);
        let result = scan
            .constrained_nearest_count_distinct_at_least(
                &sample(0.0),
                3,
                is_even,
                |item| item.oid % 10,
                2,
            )
            .unwrap();

        assert_eq!(result.num_entries(), 3);
        // Distinct matching values: {2 (via 22 at 0.5), 4 (via 14 at 2.0)}
        assert!(result.num_satisfying() >= 2);
        let sat: Vec<u64> = result.iter_satisfying().map(|e| e.object().oid()).collect();
        assert!(sat.contains(&22));
        assert!(sat.contains(&14));
        assert!(!sat.contains(&12));
    }

    #[test]
    fn test_distinct_at_most_keeps_closest_representative() {
        let scan = scan_with(&[(12, 2.0), (22, 1.0), (1, 0.5), (3, 3.0)]);
        let result = scan
            .constrained_nearest_count_distinct_at_most(
                &sample(0.0),
                3,
                is_even,
                |item| item.oid % 10,
                1,
            )
            .unwrap();

        // One distinct matching value allowed; 22 (closer) represents it
        assert!(result.num_satisfying() <= 1);
        assert_eq!(result.satisfying(0).object().oid(), 22);
        assert_eq!(result.num_entries(), 3);
    }

    #[test]
    fn test_constrained_pin_balance() {
        let scan = mixed_scan();
        scan.constrained_nearest_count_at_least(&sample(0.0), 4, is_even, 2)
            .unwrap();
        assert_eq!(scan.pager().outstanding_pins(), 0);
    }
}
