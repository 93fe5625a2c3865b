//! Reclaims postings of deleted documents.
//!
//! Forked mode snapshots every posting list under the read lock, compacts
//! the immutable blocks on a background thread, and streams rewrites back
//! over a channel. Each rewrite is swapped in under a short write lock, and
//! only when the block it replaces is still the one that was snapshotted.
//! Legacy mode compacts in place, `GC_SCANSIZE` terms per step.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use crossbeam::channel::bounded;
use roaring::RoaringTreemap;
use tracing::{debug, info};
use crate::core::config::{Config, GcPolicy};
use crate::core::error::{Error, Result};
use crate::engine::index::{FieldIndex, IndexData, SearchIndex};
use crate::index::inverted::{BlockRewrite, InvertedIndex, PostingSnapshot};

/// One posting list inside an index.
#[derive(Debug, Clone, PartialEq)]
pub enum ListRef {
    Term(String),
    Tag { slot: usize, value: String },
    /// Numeric and geo leaves, by lower bound.
    Leaf { slot: usize, key: f64 },
    Missing(usize),
    IndexAll,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcReport {
    pub lists_scanned: usize,
    pub bytes_freed: usize,
    pub records_freed: usize,
    pub expired_removed: usize,
    /// Rewrites dropped because a writer touched the block meanwhile.
    pub conflicts: usize,
    pub skipped: bool,
}

fn list_mut<'a>(data: &'a mut IndexData, list: &ListRef) -> Option<&'a mut InvertedIndex> {
    match list {
        ListRef::Term(t) => data.terms.get_mut(t),
        ListRef::Tag { slot, value } => match &mut data.slots.get_mut(*slot)?.index {
            FieldIndex::Tag(tags) => tags.dictionary_mut().get_mut(value),
            _ => None,
        },
        ListRef::Leaf { slot, key } => match &mut data.slots.get_mut(*slot)?.index {
            FieldIndex::Numeric(tree) | FieldIndex::Geo(tree) => tree.leaf_mut(*key).map(|l| &mut l.postings),
            _ => None,
        },
        ListRef::Missing(slot) => data.slots.get_mut(*slot)?.missing.as_mut(),
        ListRef::IndexAll => data.index_all.as_mut(),
    }
}

/// Every posting list with a snapshot of its blocks.
fn snapshot_lists(data: &IndexData) -> Vec<(ListRef, PostingSnapshot)> {
    let mut out: Vec<(ListRef, PostingSnapshot)> =
        data.terms.iter().map(|(t, l)| (ListRef::Term(t.clone()), l.snapshot())).collect();
    for (slot, s) in data.slots.iter().enumerate() {
        match &s.index {
            FieldIndex::Tag(tags) => {
                for (value, l) in tags.dictionary().iter() {
                    out.push((ListRef::Tag { slot, value: value.clone() }, l.snapshot()));
                }
            }
            FieldIndex::Numeric(tree) | FieldIndex::Geo(tree) => {
                for (key, leaf) in tree.leaves() {
                    out.push((ListRef::Leaf { slot, key }, leaf.postings.snapshot()));
                }
            }
            _ => {}
        }
        if let Some(m) = &s.missing {
            out.push((ListRef::Missing(slot), m.snapshot()));
        }
    }
    if let Some(all) = &data.index_all {
        out.push((ListRef::IndexAll, all.snapshot()));
    }
    out
}

/// Tombstones documents a query found expired.
pub fn purge_expired(data: &mut IndexData) -> usize {
    let mut removed = 0;
    for id in data.docs.drain_expired() {
        let Some(key) = data.docs.get(id).map(|m| m.key.clone()) else { continue };
        if data.remove_document(&key).is_some() {
            removed += 1;
        }
    }
    removed
}

/// Bookkeeping shared by both modes once rewrites are in.
struct Applier {
    report: GcReport,
    /// (slot, leaf key, records freed)
    touched_leaves: Vec<(usize, f64, usize)>,
    emptied: Vec<ListRef>,
}

impl Applier {
    fn new() -> Self {
        Applier { report: GcReport::default(), touched_leaves: Vec::new(), emptied: Vec::new() }
    }

    fn apply(&mut self, data: &mut IndexData, list: ListRef, rewrites: Vec<BlockRewrite>) {
        let expected: usize = rewrites.iter().map(|r| r.records_freed).sum();
        let Some(target) = list_mut(data, &list) else {
            self.report.conflicts += 1;
            return;
        };
        let (bytes, records) = target.apply_rewrites(rewrites);
        let now_empty = target.is_empty();
        if records < expected {
            self.report.conflicts += 1;
        }
        self.report.bytes_freed += bytes;
        self.report.records_freed += records;
        match &list {
            ListRef::Leaf { slot, key } => self.touched_leaves.push((*slot, *key, records)),
            ListRef::Term(_) | ListRef::Tag { .. } if now_empty => self.emptied.push(list),
            _ => {}
        }
    }

    /// Drops emptied lists and rebalances numeric trees. Tombstones in
    /// `reclaimed` are forgotten only when every rewrite landed.
    fn finish(self, data: &mut IndexData, reclaimed: Option<&RoaringTreemap>) -> Result<GcReport> {
        for list in &self.emptied {
            match list {
                ListRef::Term(t) => {
                    data.terms.remove(t);
                }
                ListRef::Tag { slot, value } => {
                    if let Some(FieldIndex::Tag(tags)) = data.slots.get_mut(*slot).map(|s| &mut s.index) {
                        tags.dictionary_mut().remove(value);
                    }
                }
                _ => {}
            }
        }
        let slots: HashSet<usize> = self.touched_leaves.iter().map(|(s, _, _)| *s).collect();
        for slot in slots {
            let mine = self.touched_leaves.iter().filter(|(s, _, _)| *s == slot);
            let keys: Vec<f64> = mine.clone().map(|(_, k, _)| *k).collect();
            let freed: usize = mine.map(|(_, _, n)| *n).sum();
            if let Some(FieldIndex::Numeric(tree) | FieldIndex::Geo(tree)) = data.slots.get_mut(slot).map(|s| &mut s.index) {
                tree.rebalance(&keys, freed)?;
            }
        }
        if let Some(ids) = reclaimed {
            if self.report.conflicts == 0 {
                data.docs.clear_deleted(ids);
            }
        }
        Ok(self.report)
    }
}

/// Runs one forked-style cycle. Unless `force`, a cycle with fewer than
/// `FORK_GC_CLEAN_THRESHOLD` tombstones is skipped.
pub fn run_forked(index: &SearchIndex, config: &Config, force: bool) -> Result<GcReport> {
    let started = Instant::now();
    let expired_removed = purge_expired(&mut index.data.write());

    let (deleted, lists) = {
        let data = index.data.read();
        let deleted = data.docs.deleted().clone();
        if deleted.is_empty() || (!force && (deleted.len() as usize) < config.fork_gc_clean_threshold) {
            return Ok(GcReport { expired_removed, skipped: true, ..GcReport::default() });
        }
        (deleted, snapshot_lists(&data))
    };
    let scanned = lists.len();
    let deleted = Arc::new(deleted);

    let (tx, rx) = bounded::<Result<(ListRef, Vec<BlockRewrite>)>>(16);
    let worker_deleted = deleted.clone();
    let worker = std::thread::Builder::new()
        .name(format!("gc-{}", index.name))
        .spawn(move || {
            for (list, snapshot) in lists {
                let msg = InvertedIndex::compact(&snapshot, &worker_deleted).map(|rw| (list, rw));
                let failed = msg.is_err();
                let empty = matches!(&msg, Ok((_, rw)) if rw.is_empty());
                if !empty && tx.send(msg).is_err() {
                    return;
                }
                if failed {
                    return;
                }
            }
        })
        .map_err(|e| Error::internal(format!("failed to start gc worker: {}", e)))?;

    let mut applier = Applier::new();
    for msg in rx.iter() {
        let (list, rewrites) = msg?;
        if index.is_dropped() {
            break;
        }
        // The write lock covers only the pointer swap of one list
        let mut data = index.data.write();
        applier.apply(&mut data, list, rewrites);
    }
    let _ = worker.join();

    let mut report = {
        let mut data = index.data.write();
        applier.finish(&mut data, Some(deleted.as_ref()))?
    };
    report.lists_scanned = scanned;
    report.expired_removed = expired_removed;
    record(index, &report, started);
    Ok(report)
}

/// In-process collector state: where the term walk stopped and the
/// tombstones the walk is reclaiming.
#[derive(Debug, Default)]
pub struct LegacyGc {
    cursor: Option<String>,
    walk: Option<RoaringTreemap>,
}

impl LegacyGc {
    pub fn new() -> Self {
        LegacyGc::default()
    }

    /// One incremental step: `GC_SCANSIZE` terms, plus every non-text list
    /// once the term walk wraps around. Tombstones go when a walk ends.
    pub fn step(&mut self, index: &SearchIndex, config: &Config) -> Result<GcReport> {
        let started = Instant::now();
        let scan_size = config.gc_scan_size.max(1);
        let mut data = index.data.write();
        let expired_removed = purge_expired(&mut data);
        if self.walk.is_none() {
            let deleted = data.docs.deleted().clone();
            if deleted.is_empty() {
                return Ok(GcReport { expired_removed, skipped: true, ..GcReport::default() });
            }
            self.walk = Some(deleted);
        }
        let batch = data.terms.terms_after(self.cursor.as_deref(), scan_size);
        let wrapped = batch.len() < scan_size;
        self.cursor = batch.last().cloned();

        let mut lists: Vec<(ListRef, PostingSnapshot)> = batch
            .into_iter()
            .filter_map(|t| data.terms.get(&t).map(|l| l.snapshot()).map(|s| (ListRef::Term(t), s)))
            .collect();
        if wrapped {
            lists.extend(snapshot_lists(&data).into_iter().filter(|(l, _)| !matches!(l, ListRef::Term(_))));
        }
        let scanned = lists.len();
        let walk = self.walk.take().unwrap_or_default();
        let mut applier = Applier::new();
        for (list, snapshot) in lists {
            let rewrites = InvertedIndex::compact(&snapshot, &walk)?;
            if !rewrites.is_empty() {
                applier.apply(&mut data, list, rewrites);
            }
        }
        let mut report = applier.finish(&mut data, wrapped.then_some(&walk))?;
        drop(data);
        if wrapped {
            self.cursor = None;
        } else {
            self.walk = Some(walk);
        }
        report.lists_scanned = scanned;
        report.expired_removed = expired_removed;
        record(index, &report, started);
        Ok(report)
    }
}

fn record(index: &SearchIndex, report: &GcReport, started: Instant) {
    let ms = started.elapsed().as_millis() as u64;
    index.gc.lock().absorb(report.bytes_freed as u64, report.records_freed as u64, ms);
    index.counters.add_bytes(-(report.bytes_freed as isize));
    index.counters.add_records(-(report.records_freed as isize));
    if report.records_freed > 0 {
        info!(
            index = %index.name,
            bytes = report.bytes_freed,
            records = report.records_freed,
            conflicts = report.conflicts,
            ms,
            "gc cycle reclaimed postings"
        );
    } else {
        debug!(index = %index.name, lists = report.lists_scanned, "gc cycle found nothing");
    }
}

/// A collector for one index under the configured policy.
pub enum Collector {
    Forked,
    Legacy(LegacyGc),
}

impl Collector {
    pub fn for_policy(policy: GcPolicy) -> Self {
        match policy {
            GcPolicy::Fork => Collector::Forked,
            GcPolicy::Legacy => Collector::Legacy(LegacyGc::new()),
        }
    }

    pub fn run(&mut self, index: &SearchIndex, config: &Config, force: bool) -> Result<GcReport> {
        match self {
            Collector::Forked => run_forked(index, config, force),
            Collector::Legacy(gc) => gc.step(index, config),
        }
    }
}
