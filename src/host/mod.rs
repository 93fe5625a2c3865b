//! Contract of the key-value store that owns the documents, plus an
//! in-process reference store.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value as Json;
use crate::core::error::Result;
use crate::core::types::format_number;
use crate::document::json_path::JsonPath;

/// A stored document as the engine sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum HostDocument {
    Hash(BTreeMap<String, Bytes>),
    Json(Json),
}

/// One raw value selected from a document.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Bytes(Bytes),
    Json(Json),
}

impl RawValue {
    /// Textual form of a scalar. Arrays and objects have none.
    pub fn as_text(&self) -> Option<String> {
        match self {
            RawValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            RawValue::Json(j) => json_scalar_text(j),
        }
    }

    /// Scalars of the value, flattening one level of JSON array.
    pub fn texts(&self) -> Vec<String> {
        match self {
            RawValue::Json(Json::Array(items)) => items.iter().filter_map(json_scalar_text).collect(),
            other => other.as_text().into_iter().collect(),
        }
    }
}

fn json_scalar_text(j: &Json) -> Option<String> {
    match j {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => n.as_f64().map(format_number),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl HostDocument {
    pub fn is_json(&self) -> bool {
        matches!(self, HostDocument::Json(_))
    }

    /// Values selected by a field path: the hash field of that name, or
    /// every match of the JSON selector. Empty when absent.
    pub fn select(&self, path: &str) -> Result<Vec<RawValue>> {
        match self {
            HostDocument::Hash(fields) => Ok(fields.get(path).cloned().map(RawValue::Bytes).into_iter().collect()),
            HostDocument::Json(root) => {
                let selector = JsonPath::parse(path)?;
                Ok(selector
                    .select(root)
                    .into_iter()
                    .filter(|v| !v.is_null())
                    .cloned()
                    .map(RawValue::Json)
                    .collect())
            }
        }
    }

    /// First textual value at `path`.
    pub fn text(&self, path: &str) -> Option<String> {
        self.select(path).ok()?.into_iter().find_map(|v| v.as_text())
    }

    /// Every top-level (name, text) pair, for unrestricted loads.
    pub fn all_fields(&self) -> Vec<(String, String)> {
        match self {
            HostDocument::Hash(fields) => fields
                .iter()
                .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
                .collect(),
            HostDocument::Json(root) => vec![("$".to_string(), root.to_string())],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryInfo {
    pub used: u64,
    pub max: u64, // 0 = unlimited
}

impl MemoryInfo {
    /// Used memory as a percentage of the limit; 0 when unlimited.
    pub fn percent_used(&self) -> f64 {
        if self.max == 0 { 0.0 } else { self.used as f64 * 100.0 / self.max as f64 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOp {
    Write,
    Delete,
    Expire,
    Rename { from: String },
}

/// A change notification for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub op: KeyOp,
}

impl KeyEvent {
    pub fn write(key: impl Into<String>) -> Self {
        KeyEvent { key: key.into(), op: KeyOp::Write }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        KeyEvent { key: key.into(), op: KeyOp::Delete }
    }

    pub fn expire(key: impl Into<String>) -> Self {
        KeyEvent { key: key.into(), op: KeyOp::Expire }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        KeyEvent { key: to.into(), op: KeyOp::Rename { from: from.into() } }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushScope {
    /// Every database was wiped: indexes go away.
    AllDatabases,
    /// The indexed database was wiped: indexes stay, empty.
    Database,
}

/// The store the engine indexes.
pub trait HostStore: Send + Sync {
    fn get(&self, key: &str) -> Option<HostDocument>;

    fn exists(&self, key: &str) -> bool;

    /// Keys in a stable order starting at `cursor`. Returns the next
    /// cursor, 0 once the walk is complete.
    fn scan(&self, cursor: u64, count: usize) -> (u64, Vec<String>);

    fn delete(&self, key: &str) -> bool;

    fn memory_usage(&self) -> MemoryInfo;

    /// Approximate number of keys, for scan progress. 0 when unknown.
    fn key_count(&self) -> u64 {
        0
    }

    /// Wall-clock expiry of a key in unix millis, when it has a TTL.
    fn expires_at_ms(&self, _key: &str) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone)]
struct Entry {
    doc: HostDocument,
    expires_at: Option<Instant>,
}

impl Entry {
    fn alive(&self, now: Instant) -> bool {
        self.expires_at.map(|t| t > now).unwrap_or(true)
    }

    fn approx_size(&self) -> u64 {
        match &self.doc {
            HostDocument::Hash(f) => f.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum(),
            HostDocument::Json(j) => j.to_string().len() as u64,
        }
    }
}

/// In-memory store with lazy TTL expiry. Mutations do not notify the
/// engine; callers pass the matching [`KeyEvent`] themselves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    max_memory: RwLock<u64>,
    used_override: RwLock<Option<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset<K, V>(&self, key: &str, fields: &[(K, V)])
    where
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let mut entries = self.entries.write();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            doc: HostDocument::Hash(BTreeMap::new()),
            expires_at: None,
        });
        if !matches!(entry.doc, HostDocument::Hash(_)) {
            entry.doc = HostDocument::Hash(BTreeMap::new());
        }
        if let HostDocument::Hash(map) = &mut entry.doc {
            for (k, v) in fields {
                map.insert(k.as_ref().to_string(), Bytes::copy_from_slice(v.as_ref()));
            }
        }
    }

    pub fn set_json(&self, key: &str, value: Json) {
        self.entries
            .write()
            .insert(key.to_string(), Entry { doc: HostDocument::Json(value), expires_at: None });
    }

    pub fn put(&self, key: &str, doc: HostDocument) {
        self.entries.write().insert(key.to_string(), Entry { doc, expires_at: None });
    }

    /// Sets a TTL. Returns false when the key is absent.
    pub fn expire(&self, key: &str, ttl: Duration) -> bool {
        match self.entries.write().get_mut(key) {
            Some(e) => {
                e.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    pub fn rename(&self, from: &str, to: &str) -> bool {
        let mut entries = self.entries.write();
        match entries.remove(from) {
            Some(e) => {
                entries.insert(to.to_string(), e);
                true
            }
            None => false,
        }
    }

    pub fn flush(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.read().values().filter(|e| e.alive(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_max_memory(&self, bytes: u64) {
        *self.max_memory.write() = bytes;
    }

    /// Pins the reported used memory, for exercising OOM paths.
    pub fn set_used_memory(&self, bytes: Option<u64>) {
        *self.used_override.write() = bytes;
    }
}

impl HostStore for MemoryStore {
    fn get(&self, key: &str) -> Option<HostDocument> {
        let entries = self.entries.read();
        let e = entries.get(key)?;
        if e.alive(Instant::now()) { Some(e.doc.clone()) } else { None }
    }

    fn exists(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .map(|e| e.alive(Instant::now()))
            .unwrap_or(false)
    }

    fn scan(&self, cursor: u64, count: usize) -> (u64, Vec<String>) {
        let entries = self.entries.read();
        let now = Instant::now();
        let keys: Vec<String> = entries
            .iter()
            .skip(cursor as usize)
            .take(count.max(1))
            .filter(|(_, e)| e.alive(now))
            .map(|(k, _)| k.clone())
            .collect();
        let next = cursor + count.max(1) as u64;
        if next as usize >= entries.len() { (0, keys) } else { (next, keys) }
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    fn memory_usage(&self) -> MemoryInfo {
        let used = match *self.used_override.read() {
            Some(u) => u,
            None => self.entries.read().iter().map(|(k, e)| k.len() as u64 + e.approx_size()).sum(),
        };
        MemoryInfo { used, max: *self.max_memory.read() }
    }

    fn key_count(&self) -> u64 {
        self.entries.read().len() as u64
    }

    fn expires_at_ms(&self, key: &str) -> Option<u64> {
        let at = self.entries.read().get(key)?.expires_at?;
        let left = at.saturating_duration_since(Instant::now());
        Some(chrono::Utc::now().timestamp_millis().max(0) as u64 + left.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_select() {
        let store = MemoryStore::new();
        store.hset("doc:1", &[("title", "hello"), ("n", "3")]);
        let doc = store.get("doc:1").unwrap();
        assert_eq!(doc.text("title").as_deref(), Some("hello"));
        assert!(doc.select("missing").unwrap().is_empty());
    }

    #[test]
    fn test_json_select_flattens_arrays() {
        let store = MemoryStore::new();
        store.set_json("j", json!({"tags": ["a", "b"], "n": 2}));
        let doc = store.get("j").unwrap();
        let tags = doc.select("$.tags").unwrap();
        assert_eq!(tags[0].texts(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(doc.text("$.n").as_deref(), Some("2"));
    }

    #[test]
    fn test_scan_walks_every_key() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store.hset(&format!("k{:02}", i), &[("f", "v")]);
        }
        let mut cursor = 0;
        let mut seen = Vec::new();
        loop {
            let (next, keys) = store.scan(cursor, 10);
            seen.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn test_ttl_expiry_is_lazy() {
        let store = MemoryStore::new();
        store.hset("k", &[("f", "v")]);
        assert!(store.expire("k", Duration::from_millis(0)));
        assert!(!store.exists("k"));
        assert!(store.get("k").is_none());
    }

    #[test]
    fn test_memory_override() {
        let store = MemoryStore::new();
        store.set_max_memory(100);
        store.set_used_memory(Some(90));
        assert_eq!(store.memory_usage().percent_used(), 90.0);
    }
}
