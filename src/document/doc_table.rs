use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use crate::analysis::language::Language;
use crate::core::types::{DocId, Value};

/// Per-document flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocFlags(u8);

impl DocFlags {
    pub const HAS_PAYLOAD: u8 = 1;
    pub const HAS_SORTABLES: u8 = 2;
    pub const HAS_EXPIRATION: u8 = 4;

    pub fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u8) {
        self.0 |= bit;
    }
}

/// Metadata of one indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    pub id: DocId,
    pub key: String,
    pub score: f64,
    pub language: Language,
    pub flags: DocFlags,
    pub payload: Option<Vec<u8>>,
    pub sortables: Vec<(String, Value)>,
    pub len: u32,       // Surface tokens across TEXT fields
    pub max_freq: u32,  // Highest term frequency in the doc
    pub expires_at: Option<u64>, // Unix millis
    pub content_hash: u32,
}

impl DocMeta {
    pub fn new(key: String, score: f64, language: Language) -> Self {
        DocMeta {
            id: DocId(0),
            key,
            score,
            language,
            flags: DocFlags::default(),
            payload: None,
            sortables: Vec::new(),
            len: 0,
            max_freq: 0,
            expires_at: None,
            content_hash: 0,
        }
    }

    pub fn sortable(&self, field: &str) -> Option<&Value> {
        self.sortables.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.map(|t| t <= now_ms).unwrap_or(false)
    }
}

/// Key <-> id mapping plus per-doc metadata. Metadata lives in
/// `max_buckets` buckets addressed by `id % max_buckets`; a bucket keeps
/// its entries ordered by id so lookups are a binary search.
///
/// Ids come from a monotonic counter and are never handed out twice, so a
/// posting entry can only ever refer to the document it was written for.
#[derive(Debug)]
pub struct DocTable {
    buckets: Vec<Vec<DocMeta>>,
    max_buckets: usize,
    keys: HashMap<String, DocId>,
    live: Arc<RoaringTreemap>,
    deleted: RoaringTreemap, // Tombstones not yet reclaimed by GC
    max_id: u64,
    total_len: u64,
    pending_expired: Mutex<Vec<DocId>>,
}

impl DocTable {
    pub fn new(max_buckets: usize) -> Self {
        DocTable {
            buckets: Vec::new(),
            max_buckets: max_buckets.max(1),
            keys: HashMap::new(),
            live: Arc::new(RoaringTreemap::new()),
            deleted: RoaringTreemap::new(),
            max_id: 0,
            total_len: 0,
            pending_expired: Mutex::new(Vec::new()),
        }
    }

    fn bucket_of(&self, id: DocId) -> usize {
        (id.0 % self.max_buckets as u64) as usize
    }

    /// Registers a document under a fresh id. The caller removes any
    /// previous version of the key first.
    pub fn add(&mut self, mut meta: DocMeta) -> DocId {
        self.max_id += 1;
        let id = DocId(self.max_id);
        meta.id = id;
        self.insert_meta(meta);
        id
    }

    fn insert_meta(&mut self, meta: DocMeta) {
        let id = meta.id;
        let b = self.bucket_of(id);
        if self.buckets.len() <= b {
            let want = (b + 1).min(self.max_buckets);
            self.buckets.resize_with(want, Vec::new);
        }
        self.total_len += meta.len as u64;
        self.keys.insert(meta.key.clone(), id);
        Arc::make_mut(&mut self.live).insert(id.0);
        let bucket = &mut self.buckets[b];
        let pos = bucket.partition_point(|m| m.id < id);
        bucket.insert(pos, meta);
    }

    pub fn get(&self, id: DocId) -> Option<&DocMeta> {
        let bucket = self.buckets.get(self.bucket_of(id))?;
        let pos = bucket.binary_search_by(|m| m.id.cmp(&id)).ok()?;
        Some(&bucket[pos])
    }

    pub fn get_mut(&mut self, id: DocId) -> Option<&mut DocMeta> {
        let b = self.bucket_of(id);
        let bucket = self.buckets.get_mut(b)?;
        let pos = bucket.binary_search_by(|m| m.id.cmp(&id)).ok()?;
        Some(&mut bucket[pos])
    }

    pub fn lookup(&self, key: &str) -> Option<DocId> {
        self.keys.get(key).copied()
    }

    pub fn get_by_key(&self, key: &str) -> Option<&DocMeta> {
        self.lookup(key).and_then(|id| self.get(id))
    }

    /// Tombstones `id`. Its postings stay until GC compacts them.
    pub fn delete(&mut self, id: DocId) -> Option<DocMeta> {
        let b = self.bucket_of(id);
        let bucket = self.buckets.get_mut(b)?;
        let pos = bucket.binary_search_by(|m| m.id.cmp(&id)).ok()?;
        let meta = bucket.remove(pos);
        if self.keys.get(&meta.key) == Some(&id) {
            self.keys.remove(&meta.key);
        }
        Arc::make_mut(&mut self.live).remove(id.0);
        self.deleted.insert(id.0);
        self.total_len = self.total_len.saturating_sub(meta.len as u64);
        Some(meta)
    }

    pub fn is_live(&self, id: DocId) -> bool {
        self.live.contains(id.0)
    }

    pub fn num_docs(&self) -> usize {
        self.keys.len()
    }

    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    pub fn avg_doc_len(&self) -> f64 {
        let n = self.num_docs();
        if n == 0 { 0.0 } else { self.total_len as f64 / n as f64 }
    }

    /// Live ids in ascending order, shared with readers.
    pub fn live_ids(&self) -> Arc<RoaringTreemap> {
        self.live.clone()
    }

    pub fn scan_live_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.live.iter().map(DocId)
    }

    pub fn deleted(&self) -> &RoaringTreemap {
        &self.deleted
    }

    pub fn num_deleted(&self) -> u64 {
        self.deleted.len()
    }

    /// Forgets tombstones whose postings GC has reclaimed.
    pub fn clear_deleted(&mut self, reclaimed: &RoaringTreemap) {
        self.deleted -= reclaimed;
    }

    /// Queues an id found expired while a query yielded it. Callable
    /// under a shared lock.
    pub fn queue_expired(&self, id: DocId) {
        let mut pending = self.pending_expired.lock();
        if !pending.contains(&id) {
            pending.push(id);
        }
    }

    pub fn drain_expired(&mut self) -> Vec<DocId> {
        std::mem::take(&mut *self.pending_expired.lock())
    }

    pub fn has_pending_expired(&self) -> bool {
        !self.pending_expired.lock().is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocMeta> + '_ {
        self.buckets.iter().flat_map(|b| b.iter())
    }

    /// Every live document in id order, for snapshots.
    pub fn dump(&self) -> Vec<DocMeta> {
        let mut out: Vec<DocMeta> = self.iter().cloned().collect();
        out.sort_by_key(|m| m.id);
        out
    }

    /// Rebuilds a table from a dump, keeping the original ids.
    pub fn restore(max_buckets: usize, max_id: u64, docs: Vec<DocMeta>, deleted: RoaringTreemap) -> Self {
        let mut table = DocTable::new(max_buckets);
        for meta in docs {
            table.insert_meta(meta);
        }
        table.max_id = max_id.max(table.live.max().unwrap_or(0));
        table.deleted = deleted;
        table
    }

    pub fn clear(&mut self) {
        let max_id = self.max_id;
        *self = DocTable::new(self.max_buckets);
        self.max_id = max_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str) -> DocMeta {
        let mut m = DocMeta::new(key.to_string(), 1.0, Language::English);
        m.len = 4;
        m
    }

    #[test]
    fn test_add_lookup_delete() {
        let mut t = DocTable::new(4);
        let a = t.add(meta("a"));
        let b = t.add(meta("b"));
        assert_eq!(t.lookup("b"), Some(b));
        assert_eq!(t.get(a).unwrap().key, "a");
        assert!(t.delete(a).is_some());
        assert!(t.get(a).is_none());
        assert!(!t.is_live(a));
        assert!(t.deleted().contains(a.0));
        assert_eq!(t.num_docs(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut t = DocTable::new(2);
        let a = t.add(meta("a"));
        t.delete(a);
        let again = t.add(meta("a"));
        assert!(again > a);
    }

    #[test]
    fn test_bucket_chaining() {
        let mut t = DocTable::new(3);
        let ids: Vec<DocId> = (0..20).map(|i| t.add(meta(&format!("k{}", i)))).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(t.get(*id).unwrap().key, format!("k{}", i));
        }
        assert_eq!(t.scan_live_ids().count(), 20);
        assert_eq!(t.avg_doc_len(), 4.0);
    }

    #[test]
    fn test_expired_queue() {
        let mut t = DocTable::new(8);
        let a = t.add(meta("a"));
        t.queue_expired(a);
        t.queue_expired(a);
        assert_eq!(t.drain_expired(), vec![a]);
        assert!(!t.has_pending_expired());
    }
}
