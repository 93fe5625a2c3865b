//! Turns one host document into postings across the field arena.

use std::collections::BTreeMap;
use serde_json::Value as Json;
use tracing::debug;
use crate::analysis::analyzer::{AnalyzerOptions, AnalyzerRegistry};
use crate::analysis::language::Language;
use crate::analysis::token::TokenKind;
use crate::compression::codec::PostingEntry;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::stats::IndexCounters;
use crate::core::types::{parse_number, DocId, FieldMask, Value};
use crate::document::doc_table::{DocFlags, DocMeta};
use crate::engine::index::{FieldIndex, IndexData};
use crate::host::{HostDocument, RawValue};
use crate::index::geo;
use crate::index::tag::EMPTY_TAG;
use crate::schema::{FieldFlags, FieldKind, FieldSpec, EMPTY_TERM};
use crate::vector::distance::parse_blob;

/// Gap between the positions of consecutive TEXT fields, so a phrase
/// never matches across a field boundary.
const FIELD_POSITION_GAP: u32 = 1000;

/// What ingestion needs besides the index itself.
pub struct IngestContext<'a> {
    pub config: &'a Config,
    pub analyzers: &'a AnalyzerRegistry,
    pub counters: &'a IndexCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed(DocId),
    /// Same content as the indexed version; nothing was written.
    Unchanged(DocId),
    /// The rule rejected the document. Any previous version was removed.
    NotMatched,
}

#[derive(Default)]
struct TermAcc {
    freq: u32,
    mask: FieldMask,
    offsets: Vec<u32>,
}

/// One field's values, extracted and validated before any write.
enum Prepared {
    Text { bit: u8, tokens: Vec<(String, u32, TokenKind)>, empty: bool },
    Tag(Vec<String>),
    Numeric(Vec<f64>),
    Geo(Vec<u64>),
    GeoShape(String),
    Vector(Vec<f32>),
    Missing,
    Skip,
}

impl IndexData {
    /// Indexes (or re-indexes) `key`. Bad field values are counted as
    /// indexing failures and skipped; the rest of the document is kept.
    pub fn index_document(
        &mut self,
        key: &str,
        doc: &HostDocument,
        expires_at: Option<u64>,
        ctx: &IngestContext<'_>,
    ) -> Result<IngestOutcome> {
        if !self.definition.rule.matches(key, doc) {
            self.remove_document(key);
            return Ok(IngestOutcome::NotMatched);
        }
        let hash = content_hash(doc);
        if let Some(existing) = self.docs.get_by_key(key) {
            if existing.content_hash == hash && existing.expires_at == expires_at {
                return Ok(IngestOutcome::Unchanged(existing.id));
            }
        }
        self.remove_document(key);

        let rule = &self.definition.rule;
        let language = rule.language_for(doc);
        let mut meta = DocMeta::new(key.to_string(), rule.score_for(doc), language);
        meta.payload = rule.payload_for(doc);
        if meta.payload.is_some() {
            meta.flags.set(DocFlags::HAS_PAYLOAD);
        }
        if let Some(t) = expires_at {
            meta.expires_at = Some(t);
            meta.flags.set(DocFlags::HAS_EXPIRATION);
        }
        meta.content_hash = hash;

        let fields: Vec<FieldSpec> = self.definition.schema.fields().to_vec();
        let mut prepared = Vec::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            let values = match doc.select(&field.path) {
                Ok(v) => v,
                Err(e) => {
                    ctx.counters.record_failure(format!("{}: {}", field.name, e.context));
                    prepared.push(Prepared::Skip);
                    continue;
                }
            };
            if field.is_sortable() {
                if let Some(v) = sortable_value(field, &values) {
                    meta.sortables.push((field.name.clone(), v));
                    meta.flags.set(DocFlags::HAS_SORTABLES);
                }
            }
            let p = self.prepare(i, field, &values, language, ctx).unwrap_or_else(|msg| {
                ctx.counters.record_failure(format!("{} '{}': {}", key, field.name, msg));
                Prepared::Skip
            });
            prepared.push(p);
        }

        // Merge TEXT tokens into per-term accumulators
        let mut terms: BTreeMap<String, TermAcc> = BTreeMap::new();
        let mut base = 0u32;
        let mut doc_len = 0u32;
        for p in &prepared {
            let Prepared::Text { bit, tokens, empty } = p else { continue };
            let mut top = base;
            for (text, pos, kind) in tokens {
                let pos = base + pos;
                top = top.max(pos);
                if *kind == TokenKind::Word {
                    doc_len += 1;
                }
                let acc = terms.entry(text.clone()).or_default();
                acc.freq += 1;
                acc.mask |= 1u64 << bit;
                acc.offsets.push(pos);
            }
            if *empty {
                let acc = terms.entry(EMPTY_TERM.to_string()).or_default();
                acc.freq += 1;
                acc.mask |= 1u64 << bit;
            }
            base = top + FIELD_POSITION_GAP;
        }
        meta.len = doc_len;
        meta.max_freq = terms.values().map(|a| a.freq).max().unwrap_or(0);

        let id = self.docs.add(meta);
        let mut bytes = 0usize;
        let mut records = 0usize;
        for (term, mut acc) in terms {
            acc.offsets.sort_unstable();
            acc.offsets.dedup();
            let entry = PostingEntry { doc_id: id, freq: acc.freq, field_mask: acc.mask, offsets: acc.offsets, value: 0.0 };
            bytes += self.terms.append(&term, &entry)?;
            records += 1;
        }

        for (i, p) in prepared.into_iter().enumerate() {
            let slot = &mut self.slots[i];
            match (p, &mut slot.index) {
                (Prepared::Tag(tags), FieldIndex::Tag(t)) => {
                    records += tags.len();
                    bytes += t.add(id, &tags)?;
                }
                (Prepared::Numeric(values), FieldIndex::Numeric(tree)) => {
                    for v in values {
                        bytes += tree.add(id, v)?;
                        records += 1;
                    }
                }
                (Prepared::Geo(hashes), FieldIndex::Geo(tree)) => {
                    for h in hashes {
                        bytes += tree.add(id, h as f64)?;
                        records += 1;
                    }
                }
                (Prepared::GeoShape(wkt), FieldIndex::GeoShape(shapes)) => {
                    if let Err(e) = shapes.add(id, &wkt) {
                        ctx.counters.record_failure(format!("{} '{}': {}", key, fields[i].name, e.context));
                    }
                }
                (Prepared::Vector(v), FieldIndex::Vector(index)) => {
                    if let Err(e) = index.add(id, v) {
                        ctx.counters.record_failure(format!("{} '{}': {}", key, fields[i].name, e.context));
                    }
                }
                (Prepared::Missing, _) => {
                    if let Some(missing) = slot.missing.as_mut() {
                        bytes += missing.append(&PostingEntry::doc(id))?;
                        records += 1;
                    }
                }
                _ => {}
            }
        }
        if let Some(all) = self.index_all.as_mut() {
            bytes += all.append(&PostingEntry::doc(id))?;
            records += 1;
        }

        ctx.counters.add_bytes(bytes as isize);
        ctx.counters.add_records(records as isize);
        ctx.counters
            .total_doc_len
            .fetch_add(doc_len as u64, std::sync::atomic::Ordering::Relaxed);
        debug!(key, doc_id = id.0, bytes, records, "indexed document");
        Ok(IngestOutcome::Indexed(id))
    }

    /// Tombstones the indexed version of `key`. Postings stay until the
    /// collector reclaims them; vector and shape entries go at once.
    pub fn remove_document(&mut self, key: &str) -> Option<DocId> {
        let id = self.docs.lookup(key)?;
        self.docs.delete(id);
        for slot in &mut self.slots {
            match &mut slot.index {
                FieldIndex::Vector(v) => {
                    v.delete(id);
                }
                FieldIndex::GeoShape(g) => {
                    g.remove(id);
                }
                _ => {}
            }
        }
        Some(id)
    }

    fn prepare(
        &self,
        slot: usize,
        field: &FieldSpec,
        values: &[RawValue],
        language: Language,
        ctx: &IngestContext<'_>,
    ) -> std::result::Result<Prepared, String> {
        if values.is_empty() {
            return Ok(if field.has(FieldFlags::INDEXMISSING) { Prepared::Missing } else { Prepared::Skip });
        }
        if !field.is_indexed() {
            return Ok(Prepared::Skip);
        }
        match field.kind {
            FieldKind::Text => {
                let Some(bit) = field.text_bit else { return Ok(Prepared::Skip) };
                let opts = AnalyzerOptions {
                    language,
                    case_sensitive: false,
                    stem: !field.has(FieldFlags::NOSTEM),
                    min_stem_len: ctx.config.min_stem_len,
                    phonetic: field.has(FieldFlags::PHONETIC),
                    stopwords: self.definition.options.stopword_filter(),
                    separators: None,
                };
                let analyzer = ctx.analyzers.build(&opts);
                let texts: Vec<String> = values.iter().flat_map(|v| v.texts()).collect();
                let mut tokens = Vec::new();
                let mut base = 0u32;
                for text in &texts {
                    let mut top = base;
                    for t in analyzer.analyze(text) {
                        let pos = base + t.position;
                        top = top.max(pos);
                        tokens.push((t.text, pos, t.kind));
                    }
                    base = top + 1;
                }
                let empty = field.has(FieldFlags::INDEXEMPTY) && texts.iter().all(|t| t.trim().is_empty());
                Ok(Prepared::Text { bit, tokens, empty })
            }
            FieldKind::Tag => {
                let FieldIndex::Tag(tags) = &self.slots[slot].index else { return Ok(Prepared::Skip) };
                let mut out = Vec::new();
                let mut saw_empty = false;
                for v in values {
                    match v {
                        // JSON array elements are whole tags
                        RawValue::Json(Json::Array(items)) => {
                            for item in items {
                                if let Some(s) = RawValue::Json(item.clone()).as_text() {
                                    let s = s.trim();
                                    if s.is_empty() {
                                        saw_empty = true;
                                    } else {
                                        out.push(tags.fold(s));
                                    }
                                }
                            }
                        }
                        other => {
                            let raw = other.as_text().unwrap_or_default();
                            let split = tags.split(&raw);
                            saw_empty |= split.is_empty();
                            out.extend(split);
                        }
                    }
                }
                if saw_empty && field.has(FieldFlags::INDEXEMPTY) {
                    out.push(EMPTY_TAG.to_string());
                }
                out.sort();
                out.dedup();
                Ok(Prepared::Tag(out))
            }
            FieldKind::Numeric => {
                let mut out = Vec::new();
                for text in values.iter().flat_map(|v| v.texts()) {
                    let n = parse_number(&text).ok_or_else(|| format!("invalid numeric value '{}'", text))?;
                    out.push(n);
                }
                Ok(Prepared::Numeric(out))
            }
            FieldKind::Geo => {
                let mut out = Vec::new();
                for text in values.iter().flat_map(|v| v.texts()) {
                    let (lon, lat) = geo::parse_point(&text).map_err(|e| e.context)?;
                    out.push(geo::encode(lon, lat));
                }
                Ok(Prepared::Geo(out))
            }
            FieldKind::GeoShape => {
                let wkt = values.iter().find_map(|v| v.as_text()).ok_or("geoshape value is not text")?;
                Ok(Prepared::GeoShape(wkt))
            }
            FieldKind::Vector => {
                let Some(params) = &field.vector else { return Ok(Prepared::Skip) };
                let v = match &values[0] {
                    RawValue::Bytes(b) => parse_blob(b, params.elem_type, params.dim).map_err(|e| e.context)?,
                    RawValue::Json(Json::Array(items)) => {
                        let v: Vec<f32> = items.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect();
                        if v.len() != items.len() || v.len() != params.dim {
                            return Err(format!("expected {} numbers, got {}", params.dim, items.len()));
                        }
                        v
                    }
                    RawValue::Json(_) => return Err("vector value is not an array".into()),
                };
                Ok(Prepared::Vector(v))
            }
        }
    }
}

/// Normalized sort key of a SORTABLE field: text lowercased unless UNF,
/// numbers as numbers.
fn sortable_value(field: &FieldSpec, values: &[RawValue]) -> Option<Value> {
    let text = values.iter().find_map(|v| v.as_text())?;
    match field.kind {
        FieldKind::Numeric => parse_number(&text).map(Value::Number),
        FieldKind::Text | FieldKind::Tag if !field.has(FieldFlags::UNF) => Some(Value::Str(text.to_lowercase())),
        _ => Some(Value::Str(text)),
    }
}

/// Checksum over every stored field, to skip re-indexing unchanged writes.
fn content_hash(doc: &HostDocument) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for (name, value) in doc.all_fields() {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::testing::data;
    use crate::host::{HostStore, MemoryStore};
    use serde_json::json;

    fn ingest(data: &mut IndexData, store: &MemoryStore, key: &str, counters: &IndexCounters) -> IngestOutcome {
        let config = Config::default();
        let analyzers = AnalyzerRegistry::new();
        let ctx = IngestContext { config: &config, analyzers: &analyzers, counters };
        let doc = store.get(key).unwrap();
        data.index_document(key, &doc, None, &ctx).unwrap()
    }

    #[test]
    fn test_text_terms_and_stems() {
        let mut d = data("SCHEMA title TEXT body TEXT");
        let store = MemoryStore::new();
        let counters = IndexCounters::default();
        store.hset("doc:1", &[("title", "Running shoes"), ("body", "the running man")]);
        let IngestOutcome::Indexed(id) = ingest(&mut d, &store, "doc:1", &counters) else { panic!() };
        let list = d.terms.get("running").unwrap();
        assert_eq!(list.num_docs(), 1);
        let entries = list.entries().unwrap();
        assert_eq!(entries[0].doc_id, id);
        assert_eq!(entries[0].field_mask, 0b11);
        assert!(d.terms.get("+run").is_some());
        assert!(d.terms.get("the").is_none());
        // Positions of the second field start past the gap
        assert!(entries[0].offsets.iter().any(|&p| p > FIELD_POSITION_GAP));
        assert_eq!(d.docs.get(id).unwrap().len, 4);
    }

    #[test]
    fn test_unchanged_document_is_noop() {
        let mut d = data("SCHEMA t TEXT");
        let store = MemoryStore::new();
        let counters = IndexCounters::default();
        store.hset("k", &[("t", "hello")]);
        let IngestOutcome::Indexed(first) = ingest(&mut d, &store, "k", &counters) else { panic!() };
        assert_eq!(ingest(&mut d, &store, "k", &counters), IngestOutcome::Unchanged(first));
        store.hset("k", &[("t", "world")]);
        let IngestOutcome::Indexed(second) = ingest(&mut d, &store, "k", &counters) else { panic!() };
        assert!(second > first);
        assert!(!d.docs.is_live(first));
        assert_eq!(d.docs.num_docs(), 1);
    }

    #[test]
    fn test_bad_numeric_counts_failure_and_keeps_doc() {
        let mut d = data("SCHEMA t TEXT n NUMERIC");
        let store = MemoryStore::new();
        let counters = IndexCounters::default();
        store.hset("k", &[("t", "hello"), ("n", "abc")]);
        assert!(matches!(ingest(&mut d, &store, "k", &counters), IngestOutcome::Indexed(_)));
        assert_eq!(counters.indexing_failures.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert!(d.terms.get("hello").is_some());
    }

    #[test]
    fn test_tags_missing_and_empty() {
        let mut d = data("SCHEMA tags TAG INDEXEMPTY INDEXMISSING");
        let store = MemoryStore::new();
        let counters = IndexCounters::default();
        store.hset("a", &[("tags", "Red, blue")]);
        store.hset("b", &[("tags", "")]);
        store.hset("c", &[("other", "x")]);
        for k in ["a", "b", "c"] {
            ingest(&mut d, &store, k, &counters);
        }
        let FieldIndex::Tag(t) = &d.slots[0].index else { panic!() };
        assert_eq!(t.lookup("red").unwrap().num_docs, 1);
        assert_eq!(t.lookup(EMPTY_TAG).unwrap().num_docs, 1);
        assert_eq!(d.slots[0].missing.as_ref().unwrap().num_docs(), 1);
    }

    #[test]
    fn test_rule_mismatch_removes_previous() {
        let mut d = data("PREFIX 1 doc: FILTER @n>1 SCHEMA n NUMERIC");
        let store = MemoryStore::new();
        let counters = IndexCounters::default();
        store.hset("doc:1", &[("n", "5")]);
        assert!(matches!(ingest(&mut d, &store, "doc:1", &counters), IngestOutcome::Indexed(_)));
        store.hset("doc:1", &[("n", "0")]);
        assert_eq!(ingest(&mut d, &store, "doc:1", &counters), IngestOutcome::NotMatched);
        assert_eq!(d.docs.num_docs(), 0);
    }

    #[test]
    fn test_json_vector_and_sortables() {
        let mut d = data("ON JSON SCHEMA $.v AS v VECTOR FLAT 6 TYPE FLOAT32 DIM 2 DISTANCE_METRIC L2 $.name AS name TEXT SORTABLE");
        let store = MemoryStore::new();
        let counters = IndexCounters::default();
        store.set_json("j", json!({"v": [1.0, 2.0], "name": "Alice"}));
        let IngestOutcome::Indexed(id) = ingest(&mut d, &store, "j", &counters) else { panic!() };
        assert_eq!(d.vector("v").unwrap().get(id), Some(vec![1.0, 2.0]));
        assert_eq!(d.docs.get(id).unwrap().sortable("name"), Some(&Value::Str("alice".into())));
        d.remove_document("j");
        assert!(!d.vector("v").unwrap().contains(id));
    }
}
