use std::collections::BTreeMap;
use std::ops::Bound;
use ordered_float::OrderedFloat;
use crate::compression::codec::{PostingEntry, RecordFlags};
use crate::core::error::Result;
use crate::core::types::DocId;
use crate::index::geo;
use crate::index::inverted::{InvertedIndex, PostingSnapshot};

/// Value-level check applied to records of leaves that only partly overlap
/// the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericFilter {
    Range { lo: f64, hi: f64, lo_incl: bool, hi_incl: bool },
    GeoRadius { lon: f64, lat: f64, radius_m: f64 },
}

impl NumericFilter {
    pub fn range(lo: f64, hi: f64, lo_incl: bool, hi_incl: bool) -> Self {
        NumericFilter::Range { lo, hi, lo_incl, hi_incl }
    }

    pub fn accepts(&self, value: f64) -> bool {
        match *self {
            NumericFilter::Range { lo, hi, lo_incl, hi_incl } => {
                let above = if lo_incl { value >= lo } else { value > lo };
                let below = if hi_incl { value <= hi } else { value < hi };
                above && below
            }
            NumericFilter::GeoRadius { lon, lat, radius_m } => {
                let (plon, plat) = geo::decode(value as u64);
                geo::haversine_m(lon, lat, plon, plat) <= radius_m
            }
        }
    }
}

/// One leaf: the postings of every value in [key, next key).
#[derive(Debug, Clone)]
pub struct NumericLeaf {
    pub postings: InvertedIndex,
    pub min_val: f64,
    pub max_val: f64,
}

impl NumericLeaf {
    fn new(block_size: usize) -> Self {
        NumericLeaf {
            postings: InvertedIndex::new(RecordFlags::numeric(), block_size),
            min_val: f64::INFINITY,
            max_val: f64::NEG_INFINITY,
        }
    }

    fn from_entries(entries: &[PostingEntry], block_size: usize) -> Result<Self> {
        let mut leaf = NumericLeaf::new(block_size);
        for e in entries {
            leaf.postings.append(e)?;
            leaf.min_val = leaf.min_val.min(e.value);
            leaf.max_val = leaf.max_val.max(e.value);
        }
        Ok(leaf)
    }

    /// Recomputes min/max after GC dropped records.
    fn refresh_bounds(&mut self) -> Result<()> {
        self.min_val = f64::INFINITY;
        self.max_val = f64::NEG_INFINITY;
        for e in self.postings.entries()? {
            self.min_val = self.min_val.min(e.value);
            self.max_val = self.max_val.max(e.value);
        }
        Ok(())
    }
}

/// A leaf selected by a range query, with the filter its records still need.
#[derive(Debug, Clone)]
pub struct LeafScan {
    pub snapshot: PostingSnapshot,
    pub filter: Option<NumericFilter>,
}

/// Ordered leaves keyed by their lower bound. The first leaf is keyed by
/// -inf so every value has a home.
#[derive(Debug, Clone)]
pub struct NumericTree {
    leaves: BTreeMap<OrderedFloat<f64>, NumericLeaf>,
    split_threshold: usize,
    merge_threshold: usize,
    precision: Option<u32>, // Decimal digits kept when compression is on
    block_size: usize,
    num_values: usize,
    revision: u64,          // Bumped on every split or merge
}

impl NumericTree {
    pub fn new(split_threshold: usize, merge_threshold: usize, precision: Option<u32>, block_size: usize) -> Self {
        let mut leaves = BTreeMap::new();
        leaves.insert(OrderedFloat(f64::NEG_INFINITY), NumericLeaf::new(block_size));
        NumericTree {
            leaves,
            split_threshold: split_threshold.max(2),
            merge_threshold,
            precision,
            block_size,
            num_values: 0,
            revision: 0,
        }
    }

    pub fn precision(&self) -> Option<u32> {
        self.precision
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    pub fn num_values(&self) -> usize {
        self.num_values
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn leaves(&self) -> impl Iterator<Item = (f64, &NumericLeaf)> {
        self.leaves.iter().map(|(k, v)| (k.0, v))
    }

    pub fn leaf_mut(&mut self, key: f64) -> Option<&mut NumericLeaf> {
        self.leaves.get_mut(&OrderedFloat(key))
    }

    pub fn bytes(&self) -> usize {
        self.leaves.values().map(|l| l.postings.bytes()).sum()
    }

    /// Applies the configured precision. Ingest and query bounds go through
    /// the same rounding so equality stays consistent.
    pub fn round(&self, value: f64) -> f64 {
        match self.precision {
            Some(p) if value.is_finite() => {
                let scale = 10f64.powi(p as i32);
                (value * scale).round() / scale
            }
            _ => value,
        }
    }

    fn leaf_key_for(&self, value: f64) -> OrderedFloat<f64> {
        self.leaves
            .range(..=OrderedFloat(value))
            .next_back()
            .map(|(k, _)| *k)
            .unwrap_or(OrderedFloat(f64::NEG_INFINITY))
    }

    /// Adds `value` for `doc_id`. Returns bytes written.
    pub fn add(&mut self, doc_id: DocId, value: f64) -> Result<usize> {
        let value = self.round(value);
        let key = self.leaf_key_for(value);
        let Some(leaf) = self.leaves.get_mut(&key) else {
            return Ok(0);
        };
        let before = leaf.postings.num_docs();
        let added = leaf.postings.append(&PostingEntry::numeric(doc_id, value))?;
        if leaf.postings.num_docs() > before {
            leaf.min_val = leaf.min_val.min(value);
            leaf.max_val = leaf.max_val.max(value);
            self.num_values += 1;
        }
        let needs_split = leaf.postings.num_docs() > self.split_threshold && leaf.min_val < leaf.max_val;
        if needs_split {
            self.split(key)?;
        }
        Ok(added)
    }

    fn split(&mut self, key: OrderedFloat<f64>) -> Result<()> {
        let Some(leaf) = self.leaves.get(&key) else {
            return Ok(());
        };
        let entries = leaf.postings.entries()?;
        let mut values: Vec<f64> = entries.iter().map(|e| e.value).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        let mut median = values[values.len() / 2];
        if median <= values[0] {
            // Median equals the minimum: split at the next distinct value
            match values.iter().find(|v| **v > values[0]) {
                Some(v) => median = *v,
                None => return Ok(()),
            }
        }

        let (left, right): (Vec<PostingEntry>, Vec<PostingEntry>) =
            entries.into_iter().partition(|e| e.value < median);
        let left_leaf = NumericLeaf::from_entries(&left, self.block_size)?;
        let right_leaf = NumericLeaf::from_entries(&right, self.block_size)?;
        tracing::debug!("numeric leaf split at {} ({} | {})", median, left.len(), right.len());
        self.leaves.insert(key, left_leaf);
        self.leaves.insert(OrderedFloat(median), right_leaf);
        self.revision += 1;
        Ok(())
    }

    /// Leaves intersecting the range. A leaf whose values all fall inside
    /// needs no per-record filter.
    pub fn query_range(&self, lo: f64, hi: f64, lo_incl: bool, hi_incl: bool) -> Vec<LeafScan> {
        let lo = self.round(lo);
        let hi = self.round(hi);
        if lo > hi || (lo == hi && !(lo_incl && hi_incl)) {
            return Vec::new();
        }
        let filter = NumericFilter::range(lo, hi, lo_incl, hi_incl);
        let start = self.leaf_key_for(lo);
        let mut out = Vec::new();
        for (key, leaf) in self.leaves.range((Bound::Included(start), Bound::Unbounded)) {
            if key.0 > hi {
                break;
            }
            if leaf.postings.is_empty() {
                continue;
            }
            if !filter.accepts(leaf.min_val) && leaf.min_val > hi {
                continue;
            }
            let covered = filter.accepts(leaf.min_val) && filter.accepts(leaf.max_val);
            out.push(LeafScan {
                snapshot: leaf.postings.snapshot(),
                filter: if covered { None } else { Some(filter) },
            });
        }
        out
    }

    /// Leaves intersecting [lo, hi) with a caller-provided record filter.
    /// Used by geo radius queries over hash ranges.
    pub fn query_with_filter(&self, lo: f64, hi: f64, filter: NumericFilter) -> Vec<LeafScan> {
        let start = self.leaf_key_for(lo);
        let mut out = Vec::new();
        for (key, leaf) in self.leaves.range((Bound::Included(start), Bound::Unbounded)) {
            if key.0 >= hi {
                break;
            }
            if leaf.postings.is_empty() || leaf.max_val < lo || leaf.min_val >= hi {
                continue;
            }
            out.push(LeafScan { snapshot: leaf.postings.snapshot(), filter: Some(filter) });
        }
        out
    }

    /// Keys of every leaf, for GC walks.
    pub fn leaf_keys(&self) -> Vec<f64> {
        self.leaves.keys().map(|k| k.0).collect()
    }

    /// After GC: refresh bounds of `touched` leaves, then fold adjacent
    /// under-filled leaves together.
    pub fn rebalance(&mut self, touched: &[f64], records_removed: usize) -> Result<()> {
        self.num_values = self.num_values.saturating_sub(records_removed);
        for key in touched {
            if let Some(leaf) = self.leaves.get_mut(&OrderedFloat(*key)) {
                leaf.refresh_bounds()?;
            }
        }
        let keys: Vec<OrderedFloat<f64>> = self.leaves.keys().copied().collect();
        let mut i = 0;
        while i + 1 < keys.len() {
            let (left_key, right_key) = (keys[i], keys[i + 1]);
            let mergeable = match (self.leaves.get(&left_key), self.leaves.get(&right_key)) {
                (Some(l), Some(r)) => {
                    l.postings.num_docs() < self.merge_threshold && r.postings.num_docs() < self.merge_threshold
                }
                _ => false,
            };
            if mergeable {
                self.merge_into(left_key, right_key)?;
                i += 2;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    fn merge_into(&mut self, left_key: OrderedFloat<f64>, right_key: OrderedFloat<f64>) -> Result<()> {
        let (Some(left), Some(right)) = (self.leaves.get(&left_key), self.leaves.get(&right_key)) else {
            return Ok(());
        };
        let mut merged = left.postings.entries()?;
        merged.extend(right.postings.entries()?);
        merged.sort_by_key(|e| e.doc_id);
        merged.dedup_by_key(|e| e.doc_id);
        let leaf = NumericLeaf::from_entries(&merged, self.block_size)?;
        self.leaves.remove(&right_key);
        self.leaves.insert(left_key, leaf);
        self.revision += 1;
        Ok(())
    }

    /// Rebuilds a tree from (doc, value) pairs; used by snapshot load.
    pub fn rebuild<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (DocId, f64)>,
    {
        let mut pairs: Vec<(DocId, f64)> = values.into_iter().collect();
        pairs.sort_by_key(|(d, _)| *d);
        for (doc, v) in pairs {
            self.add(doc, v)?;
        }
        Ok(())
    }

    /// Every (doc, value) pair in doc order, for snapshots.
    pub fn dump(&self) -> Result<Vec<(DocId, f64)>> {
        let mut out = Vec::with_capacity(self.num_values);
        for leaf in self.leaves.values() {
            out.extend(leaf.postings.entries()?.into_iter().map(|e| (e.doc_id, e.value)));
        }
        out.sort_by_key(|(d, _)| *d);
        Ok(out)
    }

    pub fn clear(&mut self) {
        *self = NumericTree::new(self.split_threshold, self.merge_threshold, self.precision, self.block_size);
    }
}
