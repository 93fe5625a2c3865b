//! The engine: named indexes over one host store, kept current by key
//! events, queried through SEARCH, AGGREGATE and HYBRID, and maintained by
//! a periodic tick (GC, cursor expiry, temporary indexes, vector
//! transfers).

pub mod aggregate;
pub mod args;
pub mod commands;
pub mod debug;
pub mod hybrid;
pub mod index;
pub mod ingest;
pub mod reply;
pub mod search;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use parking_lot::{Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, instrument, warn};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::IndexInfo;
use crate::gc::{Collector, GcReport};
use crate::host::{FlushScope, HostStore, KeyEvent, KeyOp};
use crate::indexer::{memory_exhausted, ScanJob, ScanOutcome};
use crate::pipeline::CursorPool;
use crate::query::cache::AstCache;
use crate::schema::{FieldSpec, IndexDefinition};
use crate::storage::snapshot;
use crate::vector::tiered::TransferOutcome;

use self::aggregate::AggregateOptions;
use self::hybrid::HybridOptions;
use self::index::{FieldIndex, IndexData, SearchIndex};
use self::ingest::{IngestContext, IngestOutcome};
use self::reply::QueryReply;
use self::search::{QueryEnv, QueryOptions, SearchOptions};

/// How often the background thread checks its stop flag while sleeping.
const STOP_POLL: Duration = Duration::from_millis(20);

struct GcSlot {
    collector: Collector,
    next_run: Instant,
}

struct Inner {
    config: RwLock<Config>,
    store: Arc<dyn HostStore>,
    indexes: RwLock<BTreeMap<String, Arc<SearchIndex>>>,
    analyzers: Arc<AnalyzerRegistry>,
    cursors: CursorPool,
    ast_cache: AstCache,
    gc: Mutex<HashMap<String, GcSlot>>,
    scans: Mutex<Vec<JoinHandle<ScanOutcome>>>,
    /// Query pool; `None` runs queries on the caller's thread.
    workers: RwLock<Option<Arc<ThreadPool>>>,
    /// Runs vector front-to-back transfers.
    io_pool: ThreadPool,
}

struct Background {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct Engine {
    inner: Arc<Inner>,
    background: Mutex<Option<Background>>,
}

fn build_workers(config: &Config) -> Result<Option<Arc<ThreadPool>>> {
    if config.workers == 0 {
        return Ok(None);
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(config.worker_threads())
        .thread_name(|i| format!("vex-worker-{}", i))
        .build()
        .map_err(|e| Error::internal(format!("failed to start worker pool: {}", e)))?;
    Ok(Some(Arc::new(pool)))
}

impl Engine {
    pub fn new(store: Arc<dyn HostStore>, config: Config) -> Result<Engine> {
        let io_pool = ThreadPoolBuilder::new()
            .num_threads(config.search_io_threads.max(1))
            .thread_name(|i| format!("vex-io-{}", i))
            .build()
            .map_err(|e| Error::internal(format!("failed to start io pool: {}", e)))?;
        let workers = build_workers(&config)?;
        info!(workers = config.workers, io_threads = config.search_io_threads, "engine started");
        let inner = Inner {
            cursors: CursorPool::new(config.index_cursor_limit),
            ast_cache: AstCache::new(config.query_cache_size),
            config: RwLock::new(config),
            store,
            indexes: RwLock::new(BTreeMap::new()),
            analyzers: Arc::new(AnalyzerRegistry::new()),
            gc: Mutex::new(HashMap::new()),
            scans: Mutex::new(Vec::new()),
            workers: RwLock::new(workers),
            io_pool,
        };
        Ok(Engine { inner: Arc::new(inner), background: Mutex::new(None) })
    }

    pub fn store(&self) -> &Arc<dyn HostStore> {
        &self.inner.store
    }

    /// Registry for custom tokenizers and analyzers.
    pub fn analyzers(&self) -> &AnalyzerRegistry {
        &self.inner.analyzers
    }

    pub fn config(&self) -> Config {
        self.inner.config.read().clone()
    }

    pub fn index(&self, name: &str) -> Result<Arc<SearchIndex>> {
        self.inner.index(name)
    }

    pub fn list(&self) -> Vec<String> {
        self.inner.indexes.read().keys().cloned().collect()
    }

    pub fn create_index(&self, name: &str, definition: IndexDefinition) -> Result<()> {
        let config = self.config();
        let skip_scan = definition.options.skip_initial_scan;
        let index = {
            let mut indexes = self.inner.indexes.write();
            if indexes.contains_key(name) {
                return Err(Error::new(ErrorKind::IndexExists, "Index already exists"));
            }
            let index = Arc::new(SearchIndex::new(name, IndexData::new(definition, &config)));
            indexes.insert(name.to_string(), index.clone());
            index
        };
        self.inner.gc.lock().insert(name.to_string(), self.inner.gc_slot(&config));
        info!(index = name, fields = index.data.read().definition.schema.fields().len(), "index created");
        if !skip_scan {
            self.inner.start_scan(&index, config)?;
        }
        Ok(())
    }

    /// SCHEMA ADD. Existing documents are re-indexed by a fresh scan.
    pub fn alter_index(&self, name: &str, fields: Vec<FieldSpec>, skip_scan: bool) -> Result<()> {
        let index = self.index(name)?;
        let config = self.config();
        let added = fields.len();
        {
            let mut data = index.data.write();
            let limit = data.definition.options.text_field_limit();
            let mut schema = data.definition.schema.clone();
            for field in fields {
                schema.add(field, limit)?;
            }
            data.definition.schema = schema;
            data.sync_slots(&config);
            let live: Vec<_> = data.docs.scan_live_ids().collect();
            for id in live {
                if let Some(meta) = data.docs.get_mut(id) {
                    meta.content_hash = 0;
                }
            }
            // Under the write lock so a running scan sees it before its next batch
            index.indexing.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.inner.ast_cache.clear();
        info!(index = name, added, "index altered");
        if !skip_scan {
            self.inner.start_scan(&index, config)?;
        }
        Ok(())
    }

    /// Drops the index. With `delete_docs` the indexed keys are deleted
    /// from the store too.
    pub fn drop_index(&self, name: &str, delete_docs: bool) -> Result<()> {
        self.inner.drop_index(name, delete_docs)
    }

    pub fn info(&self, name: &str) -> Result<IndexInfo> {
        let index = self.index(name)?;
        Ok(index.info(self.inner.cursors.count_for(name)))
    }

    pub fn explain(&self, name: &str, query: &str, opts: &QueryOptions) -> Result<String> {
        self.index(name)?;
        self.with_env(|env| Ok(search::bind(env, query, opts)?.explain()))
    }

    /// Distinct values of a TAG field, sorted.
    pub fn tag_values(&self, name: &str, field: &str) -> Result<Vec<String>> {
        let index = self.index(name)?;
        let data = index.data.read();
        let (_, _, slot) = data.field(field)?;
        match &slot.index {
            FieldIndex::Tag(tags) => {
                let mut values = tags.values();
                values.sort_unstable();
                Ok(values)
            }
            _ => Err(Error::new(ErrorKind::TypeMismatch, format!("`{}` is not a TAG field", field))),
        }
    }

    pub fn search(&self, name: &str, query: &str, opts: &SearchOptions) -> Result<QueryReply> {
        let index = self.index(name)?;
        self.with_env(|env| search::run(env, &index, query, opts))
    }

    pub fn aggregate(&self, name: &str, query: &str, opts: &AggregateOptions) -> Result<QueryReply> {
        let index = self.index(name)?;
        let cursors = &self.inner.cursors;
        self.with_env(|env| aggregate::run(env, &index, query, opts, cursors))
    }

    pub fn hybrid(&self, name: &str, opts: &HybridOptions) -> Result<QueryReply> {
        let index = self.index(name)?;
        self.with_env(|env| hybrid::run(env, &index, opts))
    }

    pub fn cursor_read(&self, name: &str, id: u64, count: Option<usize>) -> Result<QueryReply> {
        let index = self.index(name)?;
        index.touch();
        let cursors = &self.inner.cursors;
        self.with_pool(|| aggregate::read_cursor(cursors, name, id, count))
    }

    pub fn cursor_del(&self, name: &str, id: u64) -> Result<()> {
        self.index(name)?;
        self.inner.cursors.delete(name, id)
    }

    /// Frees idle cursors. Returns how many were removed.
    pub fn cursor_gc(&self) -> usize {
        self.inner.cursors.gc_idle()
    }

    pub fn config_get(&self, pattern: &str) -> Vec<(String, String)> {
        self.inner.config.read().get_matching(pattern)
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let config = {
            let mut config = self.inner.config.write();
            config.set(key, value)?;
            config.clone()
        };
        match key.to_ascii_uppercase().as_str() {
            "WORKERS" => *self.inner.workers.write() = build_workers(&config)?,
            "GC_POLICY" => {
                for slot in self.inner.gc.lock().values_mut() {
                    slot.collector = Collector::for_policy(config.gc_policy);
                }
            }
            _ => {}
        }
        debug!(key, value, "config updated");
        Ok(())
    }

    /// Applies one host keyspace notification to every index.
    pub fn on_key_event(&self, event: &KeyEvent) {
        let config = self.config();
        for index in self.inner.snapshot() {
            match &event.op {
                KeyOp::Write => self.inner.ingest_key(&index, &event.key, &config),
                KeyOp::Delete | KeyOp::Expire => self.inner.remove_key(&index, &event.key),
                KeyOp::Rename { from } => {
                    self.inner.remove_key(&index, from);
                    self.inner.ingest_key(&index, &event.key, &config);
                }
            }
        }
    }

    pub fn on_flush(&self, scope: FlushScope) {
        match scope {
            FlushScope::AllDatabases => {
                for name in self.list() {
                    // Only fails when the index is already gone
                    let _ = self.inner.drop_index(&name, false);
                }
            }
            FlushScope::Database => {
                let config = self.config();
                for index in self.inner.snapshot() {
                    index.indexing.generation.fetch_add(1, Ordering::AcqRel);
                    index.data.write().clear(&config);
                    index.counters.reset();
                    self.inner.cursors.purge_index(&index.name);
                }
            }
        }
        info!(?scope, "keyspace flushed");
    }

    /// One GC cycle on one index, regardless of its schedule.
    pub fn run_gc(&self, name: &str, force: bool) -> Result<GcReport> {
        let index = self.index(name)?;
        let config = self.config();
        self.inner.run_gc(&index, &config, force)
    }

    /// Blocks until every background scan started so far has finished.
    pub fn wait_for_scans(&self) -> Vec<ScanOutcome> {
        let handles: Vec<_> = self.inner.scans.lock().drain(..).collect();
        handles
            .into_iter()
            .filter_map(|h| match h.join() {
                Ok(outcome) => Some(outcome),
                Err(_) => {
                    warn!("index scan thread panicked");
                    None
                }
            })
            .collect()
    }

    /// Runs the periodic maintenance once.
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Starts a thread calling [`Engine::tick`] every `period`. The
    /// thread stops when the engine is dropped.
    pub fn start_background(&self, period: Duration) -> Result<()> {
        let mut slot = self.background.lock();
        if slot.is_some() {
            return Ok(());
        }
        let stop = Arc::new(AtomicBool::new(false));
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("vex-maintenance".into())
            .spawn(move || {
                let mut last = Instant::now();
                while !flag.load(Ordering::Acquire) {
                    std::thread::sleep(STOP_POLL.min(period));
                    if last.elapsed() < period {
                        continue;
                    }
                    last = Instant::now();
                    match weak.upgrade() {
                        Some(inner) => inner.tick(),
                        None => break,
                    }
                }
            })
            .map_err(|e| Error::internal(format!("failed to start maintenance thread: {}", e)))?;
        *slot = Some(Background { stop, handle });
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let indexes = self.inner.snapshot();
        snapshot::save(path.as_ref(), &indexes)?;
        info!(indexes = indexes.len(), "snapshot saved");
        Ok(())
    }

    /// Replaces every index with the snapshot's content. Loaded indexes
    /// are not rescanned.
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let config = self.config();
        let loaded = snapshot::load(path.as_ref(), &config)?;
        for name in self.list() {
            let _ = self.inner.drop_index(&name, false);
        }
        let count = loaded.len();
        {
            let mut indexes = self.inner.indexes.write();
            let mut gc = self.inner.gc.lock();
            for index in loaded {
                gc.insert(index.name.clone(), self.inner.gc_slot(&config));
                indexes.insert(index.name.clone(), Arc::new(index));
            }
        }
        info!(indexes = count, "snapshot loaded");
        Ok(())
    }

    fn with_pool<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce() -> Result<T> + Send,
    {
        let pool = self.inner.workers.read().clone();
        match pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    fn with_env<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&QueryEnv<'_>) -> Result<T> + Send,
    {
        let config = self.config();
        let inner = &self.inner;
        self.with_pool(|| {
            let env = QueryEnv {
                config: &config,
                analyzers: &inner.analyzers,
                ast_cache: &inner.ast_cache,
                store: &inner.store,
            };
            f(&env)
        })
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(bg) = self.background.lock().take() {
            bg.stop.store(true, Ordering::Release);
            if bg.handle.join().is_err() {
                warn!("maintenance thread panicked");
            }
        }
        for index in self.inner.snapshot() {
            index.mark_dropped();
        }
    }
}

impl Inner {
    fn index(&self, name: &str) -> Result<Arc<SearchIndex>> {
        self.indexes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::IndexNotFound, format!("{}: no such index", name)))
    }

    fn snapshot(&self) -> Vec<Arc<SearchIndex>> {
        self.indexes.read().values().cloned().collect()
    }

    fn gc_slot(&self, config: &Config) -> GcSlot {
        GcSlot {
            collector: Collector::for_policy(config.gc_policy),
            next_run: Instant::now() + Duration::from_secs(config.fork_gc_run_interval_secs),
        }
    }

    fn start_scan(&self, index: &Arc<SearchIndex>, config: Config) -> Result<()> {
        let job = ScanJob::new(index.clone(), self.store.clone(), config, self.analyzers.clone());
        let handle = job.spawn()?;
        let mut scans = self.scans.lock();
        scans.retain(|h| !h.is_finished());
        scans.push(handle);
        Ok(())
    }

    fn drop_index(&self, name: &str, delete_docs: bool) -> Result<()> {
        let index = self
            .indexes
            .write()
            .remove(name)
            .ok_or_else(|| Error::new(ErrorKind::IndexNotFound, format!("{}: no such index", name)))?;
        index.mark_dropped();
        let cursors = self.cursors.purge_index(name);
        self.gc.lock().remove(name);
        let mut deleted = 0usize;
        if delete_docs {
            let keys: Vec<String> = index.data.read().docs.iter().map(|m| m.key.clone()).collect();
            for key in keys {
                if self.store.delete(&key) {
                    deleted += 1;
                }
            }
        }
        info!(index = name, cursors, deleted, "index dropped");
        Ok(())
    }

    fn ingest_key(&self, index: &Arc<SearchIndex>, key: &str, config: &Config) {
        let known = index.data.read().docs.get_by_key(key).is_some();
        if !known && !index.data.read().definition.rule.matches_key(key) {
            return;
        }
        let Some(doc) = self.store.get(key) else {
            self.remove_key(index, key);
            return;
        };
        let expires_at = self.store.expires_at_ms(key);
        let ctx = IngestContext { config, analyzers: &self.analyzers, counters: &index.counters };
        let outcome = index.data.write().index_document(key, &doc, expires_at, &ctx);
        match outcome {
            Ok(IngestOutcome::Indexed(id)) => {
                debug!(index = %index.name, key, id = id.value(), "document indexed");
                self.schedule_transfers(index, config);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(index = %index.name, key, error = %e, "document indexing failed");
                index.counters.record_failure(format!("{}: {}", key, e));
            }
        }
    }

    fn remove_key(&self, index: &SearchIndex, key: &str) {
        if let Some(id) = index.data.write().remove_document(key) {
            debug!(index = %index.name, key, id = id.value(), "document removed");
        }
    }

    /// Moves buffered vectors into their graph indexes on the io pool.
    fn schedule_transfers(&self, index: &Arc<SearchIndex>, config: &Config) {
        let pending: Vec<_> = index.data.read().vectors().into_iter().filter(|(_, v)| v.needs_transfer()).collect();
        for (field, tiered) in pending {
            let store = self.store.clone();
            let threshold = config.bg_index_mem_pct_thr;
            let name = index.name.clone();
            self.io_pool.spawn(move || {
                let low_memory = || memory_exhausted(store.as_ref(), threshold);
                match tiered.transfer(&low_memory) {
                    TransferOutcome::Paused(moved) => warn!(index = %name, field = %field, moved, "vector transfer paused on memory"),
                    outcome => debug!(index = %name, field = %field, ?outcome, "vector transfer finished"),
                }
            });
        }
    }

    fn run_gc(&self, index: &SearchIndex, config: &Config, force: bool) -> Result<GcReport> {
        let mut gc = self.gc.lock();
        let slot = gc.entry(index.name.clone()).or_insert_with(|| self.gc_slot(config));
        let report = slot.collector.run(index, config, force);
        let wait = match &report {
            Ok(_) => config.fork_gc_run_interval_secs,
            Err(_) => config.fork_gc_retry_interval_secs,
        };
        slot.next_run = Instant::now() + Duration::from_secs(wait);
        report
    }

    fn tick(&self) {
        let config = self.config.read().clone();
        let swept = self.cursors.gc_idle();
        if swept > 0 {
            debug!(swept, "idle cursors freed");
        }
        let now = Instant::now();
        for index in self.snapshot() {
            if let Some(ttl) = index.temporary_ttl() {
                if index.idle_for() >= ttl {
                    info!(index = %index.name, "temporary index expired");
                    let _ = self.drop_index(&index.name, false);
                    continue;
                }
            }
            let due = self.gc.lock().get(&index.name).is_none_or(|s| s.next_run <= now);
            if due {
                if let Err(e) = self.run_gc(&index, &config, false) {
                    warn!(index = %index.name, error = %e, "gc cycle failed, will retry");
                }
            }
            self.schedule_transfers(&index, &config);
        }
        self.scans.lock().retain(|h| !h.is_finished());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::{to_args, ArgCursor};
    use crate::host::MemoryStore;

    fn engine() -> (Engine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store.clone(), Config::default()).unwrap();
        (engine, store)
    }

    fn definition(args: &str) -> IndexDefinition {
        let args = to_args(&args.split_whitespace().collect::<Vec<_>>());
        IndexDefinition::parse(&mut ArgCursor::new(&args)).unwrap()
    }

    fn query(engine: &Engine, q: &str) -> Vec<String> {
        let mut keys: Vec<String> = engine
            .search("idx", q, &SearchOptions::default())
            .unwrap()
            .keys()
            .into_iter()
            .map(String::from)
            .collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_scan_then_events() {
        let (engine, store) = engine();
        store.hset("doc:1", &[("t", "hello world")]);
        engine.create_index("idx", definition("PREFIX 1 doc: SCHEMA t TEXT")).unwrap();
        engine.wait_for_scans();
        assert_eq!(query(&engine, "hello"), vec!["doc:1"]);

        store.hset("doc:2", &[("t", "hello again")]);
        engine.on_key_event(&KeyEvent::write("doc:2"));
        store.hset("other:1", &[("t", "hello")]);
        engine.on_key_event(&KeyEvent::write("other:1"));
        assert_eq!(query(&engine, "hello"), vec!["doc:1", "doc:2"]);

        store.rename("doc:1", "doc:9");
        engine.on_key_event(&KeyEvent::rename("doc:1", "doc:9"));
        assert_eq!(query(&engine, "world"), vec!["doc:9"]);

        engine.on_key_event(&KeyEvent::delete("doc:2"));
        assert_eq!(query(&engine, "again"), Vec::<String>::new());
    }

    #[test]
    fn test_create_twice_and_drop() {
        let (engine, store) = engine();
        store.hset("doc:1", &[("t", "x")]);
        engine.create_index("idx", definition("SCHEMA t TEXT")).unwrap();
        let again = engine.create_index("idx", definition("SCHEMA t TEXT"));
        assert_eq!(again.err().map(|e| e.kind), Some(ErrorKind::IndexExists));
        engine.wait_for_scans();
        engine.drop_index("idx", true).unwrap();
        assert!(store.is_empty());
        assert_eq!(engine.info("idx").err().map(|e| e.kind), Some(ErrorKind::IndexNotFound));
    }

    #[test]
    fn test_flush_database_keeps_index() {
        let (engine, store) = engine();
        store.hset("a", &[("t", "word")]);
        engine.create_index("idx", definition("SCHEMA t TEXT")).unwrap();
        engine.wait_for_scans();
        let before = engine.info("idx").unwrap().max_doc_id;
        store.flush();
        engine.on_flush(FlushScope::Database);
        assert_eq!(engine.info("idx").unwrap().num_docs, 0);
        store.hset("b", &[("t", "word")]);
        engine.on_key_event(&KeyEvent::write("b"));
        assert!(engine.info("idx").unwrap().max_doc_id > before);
        engine.on_flush(FlushScope::AllDatabases);
        assert!(engine.list().is_empty());
    }

    #[test]
    fn test_alter_reindexes_existing_docs() {
        let (engine, store) = engine();
        store.hset("a", &[("t", "x"), ("n", "5")]);
        engine.create_index("idx", definition("SCHEMA t TEXT")).unwrap();
        engine.wait_for_scans();
        let args = to_args(&["n", "NUMERIC"]);
        let field = FieldSpec::parse(&mut ArgCursor::new(&args)).unwrap();
        engine.alter_index("idx", vec![field], false).unwrap();
        engine.wait_for_scans();
        assert_eq!(query(&engine, "@n:[1 10]"), vec!["a"]);
    }

    #[test]
    fn test_config_set_workers_rebuilds_pool() {
        let (engine, store) = engine();
        store.hset("a", &[("t", "word")]);
        engine.create_index("idx", definition("SCHEMA t TEXT")).unwrap();
        engine.wait_for_scans();
        engine.config_set("WORKERS", "2").unwrap();
        assert!(engine.inner.workers.read().is_some());
        assert_eq!(query(&engine, "word"), vec!["a"]);
        assert_eq!(engine.config_get("WORKERS"), vec![("WORKERS".to_string(), "2".to_string())]);
    }
}
