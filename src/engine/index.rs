use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Mutex, RwLock};
use crate::compression::codec::RecordFlags;
use crate::core::config::Config;
use crate::core::deadline::Deadline;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{GcStats, IndexCounters, IndexInfo};
use crate::document::doc_table::DocTable;
use crate::index::geoshape::GeoShapeIndex;
use crate::index::inverted::InvertedIndex;
use crate::index::numeric::NumericTree;
use crate::index::tag::TagIndex;
use crate::index::terms::TermDictionary;
use crate::schema::{FieldFlags, FieldKind, FieldSpec, IndexDefinition};
use crate::scoring::ScoringStats;
use crate::vector::tiered::TieredIndex;

/// Per-field index storage. TEXT postings live in the shared term
/// dictionary, keyed by field mask, so the slot only marks the kind.
pub enum FieldIndex {
    Text,
    Tag(TagIndex),
    Numeric(NumericTree),
    Geo(NumericTree),
    GeoShape(GeoShapeIndex),
    Vector(Arc<TieredIndex>),
    Unindexed,
}

impl FieldIndex {
    pub fn bytes(&self) -> usize {
        match self {
            FieldIndex::Tag(t) => t.dictionary().total_bytes(),
            FieldIndex::Numeric(n) | FieldIndex::Geo(n) => n.bytes(),
            FieldIndex::GeoShape(g) => g.bytes(),
            FieldIndex::Vector(v) => v.memory(),
            FieldIndex::Text | FieldIndex::Unindexed => 0,
        }
    }
}

/// One arena slot, at the same position as its field in the schema.
pub struct FieldSlot {
    pub index: FieldIndex,
    /// Doc ids lacking the field, when declared INDEXMISSING.
    pub missing: Option<InvertedIndex>,
}

/// Everything an index owns below its lock: definition, documents, and
/// the per-field arena. Children refer to each other by slot position.
pub struct IndexData {
    pub definition: IndexDefinition,
    pub docs: DocTable,
    pub terms: TermDictionary,
    pub slots: Vec<FieldSlot>,
    /// Every indexed doc id, kept when INDEXALL is enabled.
    pub index_all: Option<InvertedIndex>,
    pub block_size: usize,
}

impl IndexData {
    pub fn new(definition: IndexDefinition, config: &Config) -> Self {
        let block_size = config.posting_block_size;
        let with_suffixes = definition
            .schema
            .text_fields()
            .any(|f| f.has(FieldFlags::WITHSUFFIXTRIE));
        let terms = TermDictionary::new(definition.options.text_record_flags(), block_size, with_suffixes);
        let slots = definition
            .schema
            .fields()
            .iter()
            .map(|f| Self::slot_for(f, config))
            .collect();
        let index_all = definition
            .options
            .index_all
            .then(|| InvertedIndex::new(RecordFlags::tag(config.raw_docid_encoding), block_size));
        IndexData {
            docs: DocTable::new(config.max_doc_table_size),
            definition,
            terms,
            slots,
            index_all,
            block_size,
        }
    }

    fn slot_for(field: &FieldSpec, config: &Config) -> FieldSlot {
        let block_size = config.posting_block_size;
        let precision = config.numeric_compress.then_some(config.numeric_precision);
        let index = if !field.is_indexed() {
            FieldIndex::Unindexed
        } else {
            match field.kind {
                FieldKind::Text => FieldIndex::Text,
                FieldKind::Tag => FieldIndex::Tag(TagIndex::new(
                    field.separator,
                    field.has(FieldFlags::CASESENSITIVE),
                    field.has(FieldFlags::WITHSUFFIXTRIE),
                    config.raw_docid_encoding,
                    block_size,
                )),
                FieldKind::Numeric => FieldIndex::Numeric(NumericTree::new(
                    config.numeric_tree_split,
                    config.numeric_tree_merge,
                    precision,
                    block_size,
                )),
                // Geohashes are exact integers, never rounded
                FieldKind::Geo => FieldIndex::Geo(NumericTree::new(
                    config.numeric_tree_split,
                    config.numeric_tree_merge,
                    None,
                    block_size,
                )),
                FieldKind::GeoShape => FieldIndex::GeoShape(GeoShapeIndex::new(field.coord_system)),
                FieldKind::Vector => match &field.vector {
                    Some(params) => FieldIndex::Vector(Arc::new(TieredIndex::new(
                        params.clone(),
                        config.tiered_hnsw_buffer_limit,
                    ))),
                    None => FieldIndex::Unindexed,
                },
            }
        };
        let missing = field
            .has(FieldFlags::INDEXMISSING)
            .then(|| InvertedIndex::new(RecordFlags::tag(config.raw_docid_encoding), block_size));
        FieldSlot { index, missing }
    }

    /// Allocates slots for fields appended by ALTER.
    pub fn sync_slots(&mut self, config: &Config) {
        let fields = self.definition.schema.fields();
        for field in &fields[self.slots.len()..] {
            let slot = Self::slot_for(field, config);
            self.slots.push(slot);
        }
    }

    /// Field descriptor and slot for a schema name, in one lookup.
    pub fn field(&self, name: &str) -> Result<(usize, &FieldSpec, &FieldSlot)> {
        let (i, spec) = self.definition.schema.require(name)?;
        let slot = self
            .slots
            .get(i)
            .ok_or_else(|| Error::internal(format!("no slot for field '{}'", name)))?;
        Ok((i, spec, slot))
    }

    pub fn vector(&self, name: &str) -> Result<Arc<TieredIndex>> {
        match self.field(name)? {
            (_, _, FieldSlot { index: FieldIndex::Vector(v), .. }) => Ok(v.clone()),
            (_, spec, _) => Err(Error::new(
                ErrorKind::TypeMismatch,
                format!("field '{}' is {} not VECTOR", name, spec.kind.name()),
            )),
        }
    }

    /// Every vector index, for background transfers and drop.
    pub fn vectors(&self) -> Vec<(String, Arc<TieredIndex>)> {
        self.definition
            .schema
            .fields()
            .iter()
            .zip(&self.slots)
            .filter_map(|(f, s)| match &s.index {
                FieldIndex::Vector(v) => Some((f.name.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn inverted_bytes(&self) -> usize {
        let slots: usize = self.slots.iter().map(|s| s.index.bytes() + s.missing.as_ref().map_or(0, |m| m.bytes())).sum();
        self.terms.total_bytes() + slots + self.index_all.as_ref().map_or(0, |i| i.bytes())
    }

    pub fn vector_bytes(&self) -> usize {
        self.vectors().iter().map(|(_, v)| v.memory()).sum()
    }

    /// Collection statistics scorers read, captured at plan time.
    pub fn scoring_stats(&self, config: &Config) -> ScoringStats {
        ScoringStats {
            total_docs: self.docs.num_docs(),
            avg_doc_len: self.docs.avg_doc_len(),
            field_weights: self.definition.schema.text_weights(),
            tanh_factor: config.bm25std_tanh_factor,
            ..ScoringStats::default()
        }
    }

    /// Drops every document and posting but keeps the definition.
    pub fn clear(&mut self, config: &Config) {
        for (_, v) in self.vectors() {
            v.cancel();
            v.clear();
        }
        let definition = self.definition.clone();
        let max_id = self.docs.max_id();
        *self = IndexData::new(definition, config);
        // Ids stay monotonic across a flush
        self.docs = DocTable::restore(config.max_doc_table_size, max_id, Vec::new(), Default::default());
    }
}

/// Progress of the background key scan that (re)builds an index.
#[derive(Debug, Default)]
pub struct IndexingState {
    pub running: AtomicBool,
    /// Bumped by ALTER and FLUSH; a scan of an older generation stops.
    pub generation: AtomicU64,
    pub scanned: AtomicU64,
    pub total: AtomicU64,
    /// Paused because host memory crossed the background threshold.
    pub paused_oom: AtomicBool,
}

impl IndexingState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn percent(&self) -> f64 {
        if !self.is_running() {
            return 1.0;
        }
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.scanned.load(Ordering::Relaxed) as f64 / total as f64).min(1.0)
    }

    /// Queries over a scan paused for memory see an incomplete index.
    pub fn is_partial(&self) -> bool {
        self.paused_oom.load(Ordering::Acquire)
    }
}

/// A named index: its data under a reader-writer lock plus the lock-free
/// state INFO and the background jobs read.
pub struct SearchIndex {
    pub name: String,
    pub data: RwLock<IndexData>,
    pub counters: IndexCounters,
    pub indexing: IndexingState,
    pub gc: Mutex<GcStats>,
    dropped: Arc<AtomicBool>,
    last_access: Mutex<Instant>,
}

impl SearchIndex {
    pub fn new(name: &str, data: IndexData) -> Self {
        SearchIndex {
            name: name.to_string(),
            data: RwLock::new(data),
            counters: IndexCounters::default(),
            indexing: IndexingState::default(),
            gc: Mutex::new(GcStats::default()),
            dropped: Arc::new(AtomicBool::new(false)),
            last_access: Mutex::new(Instant::now()),
        }
    }

    /// Flags in-flight queries and background jobs to stop.
    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
        self.indexing.generation.fetch_add(1, Ordering::AcqRel);
        for (_, v) in self.data.read().vectors() {
            v.cancel();
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// A deadline that also trips when the index is dropped.
    pub fn deadline(&self, timeout_ms: u64, force_after: Option<u64>) -> Deadline {
        Deadline::with_forced_timeout(timeout_ms, self.dropped.clone(), force_after)
    }

    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    /// TEMPORARY indexes expire after this much idle time.
    pub fn temporary_ttl(&self) -> Option<Duration> {
        self.data.read().definition.options.temporary.map(Duration::from_secs)
    }

    pub fn info(&self, cursors_open: usize) -> IndexInfo {
        let data = self.data.read();
        let failures = self.counters.indexing_failures.load(Ordering::Relaxed);
        IndexInfo {
            name: self.name.clone(),
            num_docs: data.docs.num_docs(),
            max_doc_id: data.docs.max_id(),
            num_terms: data.terms.len(),
            num_records: self.counters.num_records.load(Ordering::Relaxed),
            inverted_bytes: data.inverted_bytes(),
            vector_bytes: data.vector_bytes(),
            indexing: self.indexing.is_running(),
            percent_indexed: self.indexing.percent(),
            indexing_failures: failures,
            last_indexing_error: self.counters.last_failure.lock().clone(),
            partial_index: self.indexing.is_partial(),
            gc: self.gc.lock().clone(),
            cursors_open,
            temporary: data.definition.options.temporary.is_some(),
            fields: data
                .definition
                .schema
                .fields()
                .iter()
                .map(|f| (f.name.clone(), f.kind.name().to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::to_args;
    use crate::engine::args::ArgCursor;

    fn words(s: &str) -> Vec<Vec<u8>> {
        to_args(&s.split_whitespace().collect::<Vec<_>>())
    }

    fn definition(args: &str) -> IndexDefinition {
        let args = words(args);
        let mut cursor = ArgCursor::new(&args);
        IndexDefinition::parse(&mut cursor).unwrap()
    }

    #[test]
    fn test_slots_follow_schema() {
        let def = definition("SCHEMA t TEXT n NUMERIC g GEO tg TAG INDEXMISSING v VECTOR FLAT 6 TYPE FLOAT32 DIM 2 DISTANCE_METRIC L2");
        let data = IndexData::new(def, &Config::default());
        assert_eq!(data.slots.len(), 5);
        assert!(matches!(data.slots[0].index, FieldIndex::Text));
        assert!(matches!(data.slots[1].index, FieldIndex::Numeric(_)));
        assert!(matches!(data.slots[2].index, FieldIndex::Geo(_)));
        assert!(data.slots[3].missing.is_some());
        assert!(data.vector("v").is_ok());
        assert_eq!(data.vector("t").err().map(|e| e.kind), Some(ErrorKind::TypeMismatch));
    }

    #[test]
    fn test_sync_slots_after_alter() {
        let def = definition("SCHEMA t TEXT");
        let config = Config::default();
        let mut data = IndexData::new(def, &config);
        let args = words("n NUMERIC");
        let mut cursor = ArgCursor::new(&args);
        data.definition.add_fields(&mut cursor).unwrap();
        data.sync_slots(&config);
        assert_eq!(data.slots.len(), 2);
        assert!(data.field("n").is_ok());
    }

    #[test]
    fn test_drop_trips_deadline() {
        let index = SearchIndex::new("idx", IndexData::new(definition("SCHEMA t TEXT"), &Config::default()));
        let deadline = index.deadline(0, None);
        assert!(deadline.check().is_ok());
        index.mark_dropped();
        assert!(index.is_dropped());
        assert_eq!(deadline.check(), Err(crate::core::deadline::Interrupt::IndexDropped));
        assert_eq!(index.info(0).name, "idx");
    }
}
