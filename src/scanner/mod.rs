//! Sequential scanner: a linked chain of full pages hosting every
//! brute-force similarity query.
//!
//! Insertion targets the chain head; when the head fills, a fresh head is
//! allocated and linked to the previous one, so inserts are O(1) amortized.
//! Every query walks the whole chain, deserializes each object, evaluates
//! its distance and updates a result container. This store is the ground
//! truth the elaborate metric indexes are validated against.

mod constrained;
mod grouped;
mod joins;

use crate::error::{ArboretumError, Result};
use crate::node::SequentialNode;
use crate::object::{DataObject, Metric};
use crate::result::{QueryKind, QueryResult};
use crate::storage::PageManager;
use crate::types::PageId;
use std::marker::PhantomData;

const HDR_ROOT: usize = 0;
const HDR_OBJECT_COUNT: usize = 4;
const HDR_NODE_COUNT: usize = 12;
const HDR_MAX_OCCUPATION: usize = 16;

/// A sequential (brute-force) similarity store
pub struct SequentialScan<O: DataObject, M: Metric<O>, P: PageManager> {
    pager: P,
    metric: M,
    root: PageId,
    object_count: u64,
    node_count: u32,
    max_occupation: u32,
    _marker: PhantomData<O>,
}

impl<O: DataObject, M: Metric<O>, P: PageManager> SequentialScan<O, M, P> {
    /// Create a new store, or load the one the pager holds
    pub fn new(pager: P, metric: M) -> Result<Self> {
        let mut scan = Self {
            pager,
            metric,
            root: PageId::NONE,
            object_count: 0,
            node_count: 0,
            max_occupation: 0,
            _marker: PhantomData,
        };
        if scan.pager.is_empty() {
            scan.write_header()?;
        } else {
            scan.load_header()?;
        }
        Ok(scan)
    }

    fn load_header(&mut self) -> Result<()> {
        let header = self.pager.header_page()?;
        self.root = PageId::new(header.read_u32(HDR_ROOT));
        self.object_count = u64::from_le_bytes(
            header.as_bytes()[HDR_OBJECT_COUNT..HDR_OBJECT_COUNT + 8]
                .try_into()
                .unwrap(),
        );
        self.node_count = header.read_u32(HDR_NODE_COUNT);
        self.max_occupation = header.read_u32(HDR_MAX_OCCUPATION);
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        let mut header = self.pager.header_page()?;
        header.write_u32(HDR_ROOT, self.root.value());
        header.as_bytes_mut()[HDR_OBJECT_COUNT..HDR_OBJECT_COUNT + 8]
            .copy_from_slice(&self.object_count.to_le_bytes());
        header.write_u32(HDR_NODE_COUNT, self.node_count);
        header.write_u32(HDR_MAX_OCCUPATION, self.max_occupation);
        self.pager.write_header_page(&header)
    }

    /// The page manager backing this store
    pub fn pager(&self) -> &P {
        &self.pager
    }

    /// The metric evaluator of this store
    pub fn metric(&self) -> &M {
        &self.metric
    }

    /// Head of the node chain
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Number of stored objects
    pub fn num_objects(&self) -> u64 {
        self.object_count
    }

    /// Number of chain nodes
    pub fn num_nodes(&self) -> u32 {
        self.node_count
    }

    /// Largest per-node occupation seen so far
    pub fn max_occupation(&self) -> u32 {
        self.max_occupation
    }

    /// Store an object.
    ///
    /// Tries the current head node; on overflow a fresh head is allocated and
    /// linked to the previous one.
    pub fn add(&mut self, object: &O) -> Result<()> {
        let bytes = object.serialize();
        let capacity = self.pager.min_page_size() - SequentialNode::per_object_overhead();
        if bytes.len() > capacity {
            return Err(ArboretumError::OversizeObject {
                size: bytes.len(),
                capacity,
            });
        }

        let mut stored = false;
        if self.root.is_some() {
            let mut node = SequentialNode::open(self.pager.get_page(self.root)?)?;
            if node.add_entry(&bytes).is_some() {
                stored = true;
                if node.num_entries() as u32 > self.max_occupation {
                    self.max_occupation = node.num_entries() as u32;
                }
            }
            node.release(&self.pager)?;
        }

        if !stored {
            // New head, linked to the previous chain
            let mut node = SequentialNode::create(self.pager.new_page()?);
            node.set_next_node(self.root);
            node.add_entry(&bytes);
            self.node_count += 1;
            self.root = node.page_id();
            node.release(&self.pager)?;
        }

        self.object_count += 1;
        self.write_header()
    }

    /// Walk the chain, handing every stored object to `visit`. The walk
    /// stops early when `visit` returns `false`.
    pub(crate) fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(O) -> Result<bool>,
    {
        let mut next = self.root;
        while next.is_some() {
            let node = SequentialNode::open(self.pager.get_page(next)?)?;
            for i in 0..node.num_entries() {
                let object = O::deserialize(node.object_at(i));
                match visit(object) {
                    Ok(true) => {}
                    Ok(false) => {
                        node.release(&self.pager)?;
                        return Ok(());
                    }
                    Err(e) => {
                        let _ = node.release(&self.pager);
                        return Err(e);
                    }
                }
            }
            next = node.next_node();
            node.release(&self.pager)?;
        }
        Ok(())
    }

    /// Iterate every stored object in chain order
    pub fn iter(&self) -> ScanIter<'_, O, M, P> {
        ScanIter {
            scan: self,
            node: None,
            next_page: self.root,
            idx: 0,
            done: false,
        }
    }

    /// Every object within `radius` of `sample`
    pub fn range_query(&self, sample: &O, radius: f64) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::Range, 0, radius, 0.0, false);

        self.scan(|object| {
            if self.metric.filter(&object, sample) {
                let distance = self.metric.distance(&object, sample);
                if distance <= radius {
                    result.add(object, distance);
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// Like a range query, but stops at the first qualifying object
    pub fn exists_query(&self, sample: &O, radius: f64) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::Range, 0, radius, 0.0, false);

        self.scan(|object| {
            if self.metric.filter(&object, sample) {
                let distance = self.metric.distance(&object, sample);
                if distance <= radius {
                    result.add(object, distance);
                    return Ok(false);
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// Every object at distance at least `radius` from `sample`
    pub fn reversed_range_query(&self, sample: &O, radius: f64) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(
            Some(sample.clone()),
            QueryKind::ReversedRange,
            0,
            radius,
            0.0,
            false,
        );

        self.scan(|object| {
            let distance = self.metric.distance(&object, sample);
            if distance >= radius {
                result.add(object, distance);
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// The `k` objects nearest to `sample`. With `tie` set, the equally
    /// distant suffix beyond `k` is retained.
    pub fn nearest_query(&self, sample: &O, k: usize, tie: bool) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::KNearest, k, -1.0, 0.0, tie);
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            if self.metric.filter(&object, sample) {
                let distance = self.metric.distance(&object, sample);
                if result.num_entries() < k {
                    result.add(object, distance);
                } else if distance <= result.max_key().unwrap() {
                    result.add(object, distance);
                    result.cut(k);
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// k-nearest with deterministic tie-breaking by the object's own order.
    ///
    /// When candidates tie on the k-th distance, the tied set is ordered by
    /// `Ord` on the object type and only the first ones are retained, so the
    /// answer is independent of storage order. The object ordering must be
    /// total; with a merely partial order the retained subset is
    /// implementation-defined.
    pub fn nearest_query_tiebreaker(&self, sample: &O, k: usize) -> Result<QueryResult<O>>
    where
        O: Ord,
    {
        let mut result = QueryResult::new();
        result.set_query_info(
            Some(sample.clone()),
            QueryKind::KNearest,
            k,
            -1.0,
            0.0,
            false,
        );
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            if !self.metric.filter(&object, sample) {
                return Ok(true);
            }
            let distance = self.metric.distance(&object, sample);
            if result.num_entries() < k {
                result.add(object, distance);
                return Ok(true);
            }

            let range_k = result.max_key().unwrap();
            if distance > range_k {
                return Ok(true);
            }
            result.add(object, distance);

            // Pull the tied tail out, order it by the objects' own relation,
            // and keep only what still fits under k.
            let pivot = result.max_key().unwrap();
            let mut tied: Vec<O> = Vec::new();
            while result.max_key() == Some(pivot) {
                tied.push(result.remove_last().unwrap().into_object());
                if result.is_empty() {
                    break;
                }
            }
            tied.sort();
            let keep = k - result.num_entries();
            for object in tied.into_iter().take(keep) {
                result.add(object, pivot);
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// The `k` objects farthest from `sample`
    pub fn farthest_query(&self, sample: &O, k: usize, tie: bool) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(
            Some(sample.clone()),
            QueryKind::KFarthest,
            k,
            -1.0,
            0.0,
            tie,
        );
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            let distance = self.metric.distance(&object, sample);
            if result.num_entries() < k {
                result.add(object, distance);
            } else if distance >= result.min_key().unwrap() {
                result.add(object, distance);
                result.cut_first(k);
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// At most `k` objects, all within `radius`
    pub fn k_and_range_query(
        &self,
        sample: &O,
        radius: f64,
        k: usize,
        tie: bool,
    ) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(
            Some(sample.clone()),
            QueryKind::KAndRange,
            k,
            radius,
            0.0,
            tie,
        );
        if k == 0 {
            return Ok(result);
        }

        self.scan(|object| {
            let distance = self.metric.distance(&object, sample);
            if distance <= radius {
                if result.num_entries() < k {
                    result.add(object, distance);
                } else if distance <= result.max_key().unwrap() {
                    result.add(object, distance);
                    result.cut(k);
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// At least `k` objects, plus every object within `radius`.
    ///
    /// The effective radius starts unbounded and adapts: once `k` results
    /// are held it shrinks to the larger of `radius` and the current k-th
    /// distance.
    pub fn k_or_range_query(
        &self,
        sample: &O,
        radius: f64,
        k: usize,
        tie: bool,
    ) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(
            Some(sample.clone()),
            QueryKind::KOrRange,
            k,
            radius,
            0.0,
            tie,
        );
        if k == 0 {
            return Ok(result);
        }

        let mut dk = f64::INFINITY;
        self.scan(|object| {
            let distance = self.metric.distance(&object, sample);
            if distance <= dk {
                result.add(object, distance);
                if dk > radius && result.num_entries() >= k {
                    result.cut(k);
                    let max = result.max_key().unwrap();
                    dk = if max <= radius { radius } else { max };
                }
            }
            Ok(true)
        })?;
        Ok(result)
    }

    /// Every object with `inner < distance <= outer`
    pub fn ring_query(&self, sample: &O, inner: f64, outer: f64) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::Ring, 0, outer, inner, false);

        self.scan(|object| {
            let distance = self.metric.distance(&object, sample);
            if distance <= outer && distance > inner {
                result.add(object, distance);
            }
            Ok(true)
        })?;
        Ok(result)
    }
}

/// Iterator over every object of a sequential store, in chain order
pub struct ScanIter<'a, O: DataObject, M: Metric<O>, P: PageManager> {
    scan: &'a SequentialScan<O, M, P>,
    node: Option<SequentialNode>,
    next_page: PageId,
    idx: usize,
    done: bool,
}

impl<O: DataObject, M: Metric<O>, P: PageManager> Iterator for ScanIter<'_, O, M, P> {
    type Item = Result<O>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(node) = &self.node {
                if self.idx < node.num_entries() {
                    let object = O::deserialize(node.object_at(self.idx));
                    self.idx += 1;
                    return Some(Ok(object));
                }
                self.next_page = node.next_node();
                let node = self.node.take().unwrap();
                if let Err(e) = node.release(&self.scan.pager) {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            if self.next_page.is_none() {
                self.done = true;
                return None;
            }
            let page = match self.scan.pager.get_page(self.next_page) {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            match SequentialNode::open(page) {
                Ok(node) => {
                    self.node = Some(node);
                    self.idx = 0;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<O: DataObject, M: Metric<O>, P: PageManager> Drop for ScanIter<'_, O, M, P> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            let _ = node.release(&self.scan.pager);
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::result::test_objects::{Item, LineMetric};
    use crate::storage::MemoryPageManager;

    pub type LineScan = SequentialScan<Item, LineMetric, MemoryPageManager>;

    /// A store over 1-d points; OIDs follow insertion order
    pub fn line_scan(values: &[f64]) -> LineScan {
        let mut scan =
            SequentialScan::new(MemoryPageManager::with_page_size(512), LineMetric).unwrap();
        for (i, &v) in values.iter().enumerate() {
            scan.add(&Item::new(i as u64, v)).unwrap();
        }
        scan
    }

    pub fn sample(value: f64) -> Item {
        Item::new(u64::MAX, value)
    }
}
