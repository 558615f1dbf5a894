//! MM partition tree: a four-region metric tree skeleton.
//!
//! Every node holds up to two pivots and the distance between them. A
//! candidate's distances to both pivots, compared against that
//! discriminating distance, select one of four regions; each region may have
//! a child node. Insertion descends region by region; an optional
//! try-to-balance policy redistributes a small two-level subtree when a
//! better pivot pairing exists. Range and nearest queries prune regions with
//! the standard two-pivot triangle inequalities.

use crate::error::{ArboretumError, Result};
use crate::node::{MetricNode, NUM_REGIONS};
use crate::object::{DataObject, Metric};
use crate::result::{QueryKind, QueryResult};
use crate::storage::PageManager;
use crate::types::PageId;
use std::marker::PhantomData;

const HDR_ROOT: usize = 0;
const HDR_OBJECT_COUNT: usize = 4;
const HDR_NODE_COUNT: usize = 12;

/// Largest number of objects a rebalance attempt juggles: two pivots, up to
/// two per region, plus the incoming object
const BALANCE_CAP: usize = 2 + 2 * NUM_REGIONS + 1;

/// Insertion policy of the MM tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Plain region descent
    NoBalance,
    /// On a full node, attempt an exhaustive redistribution of the local
    /// subtree before descending further
    TryToBalance,
}

/// Per-operation scratch for the rebalance distance computations.
///
/// Distances are evaluated lazily and memoized for the duration of one
/// balance attempt; the matrix never outlives the operation.
struct DistanceScratch {
    cells: [[f64; BALANCE_CAP]; BALANCE_CAP],
}

impl DistanceScratch {
    fn new() -> Self {
        Self {
            cells: [[-1.0; BALANCE_CAP]; BALANCE_CAP],
        }
    }

    fn get<O: DataObject>(
        &mut self,
        i: usize,
        j: usize,
        objects: &[O],
        metric: &impl Metric<O>,
    ) -> f64 {
        if self.cells[i][j] < 0.0 {
            let d = metric.distance(&objects[i], &objects[j]);
            self.cells[i][j] = d;
            self.cells[j][i] = d;
        }
        self.cells[i][j]
    }
}

/// A disk-backed MM partition tree
pub struct MmTree<O: DataObject, M: Metric<O>, P: PageManager> {
    pager: P,
    metric: M,
    policy: InsertPolicy,
    root: PageId,
    object_count: u64,
    node_count: u32,
    _marker: PhantomData<O>,
}

impl<O: DataObject, M: Metric<O>, P: PageManager> MmTree<O, M, P> {
    /// Create a new tree (or load the stored one) with the try-to-balance
    /// insertion policy
    pub fn new(pager: P, metric: M) -> Result<Self> {
        Self::with_policy(pager, metric, InsertPolicy::TryToBalance)
    }

    /// Create a new tree (or load the stored one) with an explicit policy
    pub fn with_policy(pager: P, metric: M, policy: InsertPolicy) -> Result<Self> {
        let mut tree = Self {
            pager,
            metric,
            policy,
            root: PageId::NONE,
            object_count: 0,
            node_count: 0,
            _marker: PhantomData,
        };
        if tree.pager.is_empty() {
            tree.write_header()?;
        } else {
            tree.load_header()?;
        }
        Ok(tree)
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
        Ok(())
    }

    fn write_header(&self) -> Result<()> {
        let mut header = self.pager.header_page()?;
        header.write_u32(HDR_ROOT, self.root.value());
        header.as_bytes_mut()[HDR_OBJECT_COUNT..HDR_OBJECT_COUNT + 8]
            .copy_from_slice(&self.object_count.to_le_bytes());
        header.write_u32(HDR_NODE_COUNT, self.node_count);
        self.pager.write_header_page(&header)
    }

    /// The page manager backing this tree
    pub fn pager(&self) -> &P {
        &self.pager
    }

    /// Number of stored objects
    pub fn num_objects(&self) -> u64 {
        self.object_count
    }

    /// Number of tree nodes
    pub fn num_nodes(&self) -> u32 {
        self.node_count
    }

    /// Region of `object` relative to a node's pivots: both distances inside
    /// the discriminating distance, only the first, only the second, or
    /// neither.
    fn region(d1: f64, d2: f64, discriminating: f64) -> usize {
        match (d1 < discriminating, d2 < discriminating) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    }

    /// Store an object
    pub fn add(&mut self, object: &O) -> Result<()> {
        let bytes = object.serialize();
        let capacity = self.pager.min_page_size() - MetricNode::per_object_overhead();
        if bytes.len() > capacity {
            return Err(ArboretumError::OversizeObject {
                size: bytes.len(),
                capacity,
            });
        }

        if self.root.is_none() {
            let mut node = MetricNode::create(self.pager.new_page()?);
            node.add_entry(&bytes);
            self.node_count += 1;
            self.root = node.page_id();
            node.release(&self.pager)?;
        } else {
            let root_page = self.pager.get_page(self.root)?;
            let mut current = MetricNode::open(root_page)?;

            if current.num_entries() < 2 {
                if current.add_entry(&bytes).is_none() {
                    let _ = current.release(&self.pager);
                    return Err(ArboretumError::invalid_operation(
                        "object does not fit beside the existing pivot",
                    ));
                }
                let pivot = O::deserialize(current.object_at(0));
                let d = self.metric.distance(&pivot, object);
                current.set_distance(d);
                current.release(&self.pager)?;
            } else {
                self.descend_insert(current, object, &bytes)?;
            }
        }

        self.object_count += 1;
        self.write_header()
    }

    /// Region descent over full nodes until a slot takes the object
    fn descend_insert(&mut self, mut current: MetricNode, object: &O, bytes: &[u8]) -> Result<()> {
        loop {
            let step = (|tree: &mut Self, current: &mut MetricNode| -> Result<Option<PageId>> {
                let pivot1 = O::deserialize(current.object_at(0));
                let pivot2 = O::deserialize(current.object_at(1));
                let d1 = tree.metric.distance(&pivot1, object);
                let d2 = tree.metric.distance(&pivot2, object);
                let region = Self::region(d1, d2, current.distance());

                let child_id = current.child(region);
                if child_id.is_none() {
                    // Empty region: the object founds a new node
                    let mut child = MetricNode::create(tree.pager.new_page()?);
                    child.add_entry(bytes);
                    current.set_child(region, child.page_id());
                    tree.node_count += 1;
                    log::debug!(
                        "mm node {}: region {} gets node {}",
                        current.page_id(),
                        region,
                        child.page_id()
                    );
                    child.release(&tree.pager)?;
                    return Ok(None);
                }

                let mut child = MetricNode::open(tree.pager.get_page(child_id)?)?;
                if child.num_entries() == 1 {
                    // Room for a second pivot
                    if child.add_entry(bytes).is_none() {
                        let _ = child.release(&tree.pager);
                        return Err(ArboretumError::invalid_operation(
                            "object does not fit beside the existing pivot",
                        ));
                    }
                    let pivot = O::deserialize(child.object_at(0));
                    let d = tree.metric.distance(&pivot, object);
                    child.set_distance(d);
                    child.release(&tree.pager)?;
                    return Ok(None);
                }

                // Full child: try to rebalance the local subtree, else keep
                // descending
                if tree.policy == InsertPolicy::TryToBalance
                    && tree.try_balance(current, &child, object)?
                {
                    child.release(&tree.pager)?;
                    return Ok(None);
                }
                let next = child.page_id();
                child.release(&tree.pager)?;
                Ok(Some(next))
            })(self, &mut current);

            match step {
                Ok(None) => {
                    current.release(&self.pager)?;
                    return Ok(());
                }
                Ok(Some(next)) => {
                    current.release(&self.pager)?;
                    current = MetricNode::open(self.pager.get_page(next)?)?;
                }
                Err(e) => {
                    let _ = current.release(&self.pager);
                    return Err(e);
                }
            }
        }
    }

    /// Whether the node at `page` has any child
    fn has_child(&self, page: PageId) -> Result<bool> {
        if page.is_none() {
            return Ok(false);
        }
        let node = MetricNode::open(self.pager.get_page(page)?)?;
        let any = (0..NUM_REGIONS).any(|r| node.child(r).is_some());
        node.release(&self.pager)?;
        Ok(any)
    }

    /// Objects stored in `parent` and its direct children
    fn count_objects(&self, parent: &MetricNode) -> Result<usize> {
        let mut count = parent.num_entries();
        for region in 0..NUM_REGIONS {
            let child_id = parent.child(region);
            if child_id.is_some() {
                let node = MetricNode::open(self.pager.get_page(child_id)?)?;
                count += node.num_entries();
                node.release(&self.pager)?;
            }
        }
        Ok(count)
    }

    /// Collect the objects of `parent` and its direct children
    fn associate(&self, parent: &MetricNode) -> Result<Vec<O>> {
        let mut objects = Vec::with_capacity(BALANCE_CAP);
        objects.push(O::deserialize(parent.object_at(0)));
        objects.push(O::deserialize(parent.object_at(1)));
        for region in 0..NUM_REGIONS {
            let child_id = parent.child(region);
            if child_id.is_some() {
                let node = MetricNode::open(self.pager.get_page(child_id)?)?;
                for i in 0..node.num_entries() {
                    objects.push(O::deserialize(node.object_at(i)));
                }
                node.release(&self.pager)?;
            }
        }
        Ok(objects)
    }

    /// Attempt the try-to-balance policy on (`parent`, full `child`).
    ///
    /// Applies only to a two-level subtree — no grandchildren — holding few
    /// enough objects to try every pivot pairing; redistributes and stores
    /// the incoming object when a pairing puts at most two objects in every
    /// region.
    fn try_balance(&mut self, parent: &mut MetricNode, child: &MetricNode, object: &O) -> Result<bool> {
        if child.num_entries() != 2 {
            return Ok(false);
        }
        for region in 0..NUM_REGIONS {
            if self.has_child(parent.child(region))? {
                return Ok(false);
            }
        }
        let count = self.count_objects(parent)?;
        if !(4..8).contains(&count) {
            return Ok(false);
        }

        let mut objects = self.associate(parent)?;
        objects.push(object.clone());

        let mut scratch = DistanceScratch::new();
        match self.distribute(&objects, &mut scratch) {
            Some(regions) => {
                self.reallocate(parent, &objects, &regions, &mut scratch)?;
                log::debug!("mm rebalanced subtree under node {}", parent.page_id());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Try every pivot pairing over `objects`; return per-object region
    /// assignments (0 = the parent node, 1..=4 = the four regions) for the
    /// first pairing placing at most two objects per region.
    fn distribute(&self, objects: &[O], scratch: &mut DistanceScratch) -> Option<Vec<usize>> {
        let n = objects.len();
        for i in 0..n {
            for j in (i + 1)..n {
                if i == 0 && j == 1 {
                    // The current pivot pair already failed to balance
                    continue;
                }
                let dd = scratch.get(i, j, objects, &self.metric);
                let mut counts = [0usize; NUM_REGIONS];
                let mut regions = vec![0usize; n];
                let mut feasible = true;

                for k in 0..n {
                    if k == i || k == j {
                        continue;
                    }
                    let dki = scratch.get(k, i, objects, &self.metric);
                    let dkj = scratch.get(k, j, objects, &self.metric);
                    let region = Self::region(dki, dkj, dd);
                    counts[region] += 1;
                    if counts[region] > 2 {
                        feasible = false;
                        break;
                    }
                    regions[k] = region + 1;
                }

                if feasible {
                    return Some(regions);
                }
            }
        }
        None
    }

    /// Rebuild `parent` and its children according to `regions`
    fn reallocate(
        &mut self,
        parent: &mut MetricNode,
        objects: &[O],
        regions: &[usize],
        scratch: &mut DistanceScratch,
    ) -> Result<()> {
        // Reinitialize the surviving children in place
        let mut nodes: [Option<MetricNode>; NUM_REGIONS] = [None, None, None, None];
        for (region, slot) in nodes.iter_mut().enumerate() {
            let child_id = parent.child(region);
            if child_id.is_some() {
                *slot = Some(MetricNode::create(self.pager.get_page(child_id)?));
            }
        }
        parent.clear();

        let mut first: [Option<usize>; NUM_REGIONS + 1] = [None; NUM_REGIONS + 1];
        for (idx, &assignment) in regions.iter().enumerate() {
            let bytes = objects[idx].serialize();
            if assignment == 0 {
                parent.add_entry(&bytes);
                match first[0] {
                    None => first[0] = Some(idx),
                    Some(pivot) => {
                        let d = scratch.get(pivot, idx, objects, &self.metric);
                        parent.set_distance(d);
                    }
                }
            } else {
                let region = assignment - 1;
                if nodes[region].is_none() {
                    let node = MetricNode::create(self.pager.new_page()?);
                    parent.set_child(region, node.page_id());
                    self.node_count += 1;
                    nodes[region] = Some(node);
                }
                let node = nodes[region].as_mut().unwrap();
                node.add_entry(&bytes);
                match first[assignment] {
                    None => first[assignment] = Some(idx),
                    Some(pivot) => {
                        let d = scratch.get(pivot, idx, objects, &self.metric);
                        node.set_distance(d);
                    }
                }
            }
        }

        // Dispose children the redistribution emptied
        for (region, slot) in nodes.iter_mut().enumerate() {
            if let Some(node) = slot.take() {
                if node.num_entries() == 0 {
                    parent.set_child(region, PageId::NONE);
                    self.node_count -= 1;
                    self.pager.dispose_page(node.into_page())?;
                } else {
                    node.release(&self.pager)?;
                }
            }
        }
        Ok(())
    }

    /// Every object within `radius` of `sample`
    pub fn range_query(&self, sample: &O, radius: f64) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::Range, 0, radius, 0.0, false);
        if self.root.is_some() {
            self.range_into(sample, radius, &mut result, self.root)?;
        }
        Ok(result)
    }

    fn range_into(
        &self,
        sample: &O,
        radius: f64,
        result: &mut QueryResult<O>,
        page: PageId,
    ) -> Result<()> {
        let node = MetricNode::open(self.pager.get_page(page)?)?;

        let walk = (|| -> Result<()> {
            let pivot1 = O::deserialize(node.object_at(0));
            let d1 = self.metric.distance(&pivot1, sample);
            if d1 <= radius {
                result.add(pivot1, d1);
            }

            if node.num_entries() == 2 {
                let pivot2 = O::deserialize(node.object_at(1));
                let d2 = self.metric.distance(&pivot2, sample);
                if d2 <= radius {
                    result.add(pivot2, d2);
                }

                let dd = node.distance();
                // Visit every region the query ball intercepts
                if d2 < radius + dd && d1 < radius + dd && node.child(0).is_some() {
                    self.range_into(sample, radius, result, node.child(0))?;
                }
                if d1 < radius + dd && d2 + radius >= dd && node.child(1).is_some() {
                    self.range_into(sample, radius, result, node.child(1))?;
                }
                if d1 + radius >= dd && d2 < radius + dd && node.child(2).is_some() {
                    self.range_into(sample, radius, result, node.child(2))?;
                }
                if d2 + radius >= dd && d1 + radius >= dd && node.child(3).is_some() {
                    self.range_into(sample, radius, result, node.child(3))?;
                }
            }
            Ok(())
        })();

        node.release(&self.pager)?;
        walk
    }

    /// The `k` objects nearest to `sample`
    pub fn nearest_query(&self, sample: &O, k: usize, tie: bool) -> Result<QueryResult<O>> {
        let mut result = QueryResult::new();
        result.set_query_info(Some(sample.clone()), QueryKind::KNearest, k, -1.0, 0.0, tie);
        if k == 0 {
            return Ok(result);
        }
        if self.root.is_some() {
            self.nearest_into(sample, k, &mut result, self.root)?;
        }
        Ok(result)
    }

    fn nearest_into(
        &self,
        sample: &O,
        k: usize,
        result: &mut QueryResult<O>,
        page: PageId,
    ) -> Result<()> {
        if page.is_none() {
            return Ok(());
        }
        let node = MetricNode::open(self.pager.get_page(page)?)?;

        let walk = (|| -> Result<()> {
            let pivot1 = O::deserialize(node.object_at(0));
            let d1 = self.metric.distance(&pivot1, sample);
            if result.num_entries() < k {
                result.add(pivot1, d1);
            } else if d1 <= result.max_key().unwrap() {
                result.add(pivot1, d1);
                result.cut(k);
            }

            if node.num_entries() == 2 {
                let pivot2 = O::deserialize(node.object_at(1));
                let d2 = self.metric.distance(&pivot2, sample);
                if result.num_entries() < k {
                    result.add(pivot2, d2);
                } else if d2 <= result.max_key().unwrap() {
                    result.add(pivot2, d2);
                    result.cut(k);
                }

                let dd = node.distance();
                // The search ball cannot shrink below the current k-th
                // distance; until k results exist every region intercepts.
                let bound = |result: &QueryResult<O>| {
                    if result.num_entries() < k {
                        f64::INFINITY
                    } else {
                        result.max_key().unwrap()
                    }
                };

                let b = bound(result);
                if d2 < b + dd && d1 < b + dd {
                    self.nearest_into(sample, k, result, node.child(0))?;
                }
                let b = bound(result);
                if d1 < b + dd && d2 + b >= dd {
                    self.nearest_into(sample, k, result, node.child(1))?;
                }
                let b = bound(result);
                if d2 + b >= dd && d1 + b >= dd {
                    self.nearest_into(sample, k, result, node.child(3))?;
                }
                let b = bound(result);
                if d1 + b >= dd && d2 < b + dd {
                    self.nearest_into(sample, k, result, node.child(2))?;
                }
            }
            Ok(())
        })();

        node.release(&self.pager)?;
        walk
    }
}
