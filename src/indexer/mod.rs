//! Background scans that (re)build an index from the host store.
//!
//! A scan walks every key of the store in batches, feeding matching keys
//! through ingestion under the index write lock, one batch per lock. It
//! pauses while host memory is above `_BG_INDEX_MEM_PCT_THR` and stops as
//! soon as the index moves to a newer generation (ALTER, FLUSH, DROP).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::engine::index::SearchIndex;
use crate::engine::ingest::{IngestContext, IngestOutcome};
use crate::host::HostStore;

/// Keys fetched from the store per batch.
const SCAN_BATCH: usize = 100;
/// How often a scan paused on memory re-checks the store.
const OOM_POLL: Duration = Duration::from_millis(10);
/// Progress is logged every this many keys.
const PROGRESS_EVERY: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed { scanned: u64, indexed: u64 },
    /// A newer generation took over, or the index was dropped.
    Aborted { scanned: u64 },
}

/// True when the host is above the background-indexing memory threshold.
pub fn memory_exhausted(store: &dyn HostStore, threshold_pct: u8) -> bool {
    let usage = store.memory_usage();
    usage.max > 0 && usage.percent_used() >= threshold_pct as f64
}

/// One scan of one index generation.
pub struct ScanJob {
    index: Arc<SearchIndex>,
    store: Arc<dyn HostStore>,
    config: Config,
    analyzers: Arc<AnalyzerRegistry>,
    generation: u64,
}

impl ScanJob {
    /// Claims the index's current generation. Callers bump the generation
    /// first when an older scan must stop.
    pub fn new(
        index: Arc<SearchIndex>,
        store: Arc<dyn HostStore>,
        config: Config,
        analyzers: Arc<AnalyzerRegistry>,
    ) -> Self {
        let generation = index.indexing.generation.load(Ordering::Acquire);
        let state = &index.indexing;
        state.running.store(true, Ordering::Release);
        state.scanned.store(0, Ordering::Relaxed);
        state.total.store(store.key_count(), Ordering::Relaxed);
        ScanJob { index, store, config, analyzers, generation }
    }

    fn is_stale(&self) -> bool {
        self.index.is_dropped() || self.index.indexing.generation.load(Ordering::Acquire) != self.generation
    }

    pub fn spawn(self) -> Result<JoinHandle<ScanOutcome>> {
        std::thread::Builder::new()
            .name(format!("scan-{}", self.index.name))
            .spawn(move || self.run())
            .map_err(|e| Error::internal(format!("failed to start index scan: {}", e)))
    }

    /// Blocks until memory drops below the threshold. Returns false when
    /// the scan went stale while waiting.
    fn wait_for_memory(&self) -> bool {
        if !memory_exhausted(self.store.as_ref(), self.config.bg_index_mem_pct_thr) {
            return true;
        }
        let state = &self.index.indexing;
        state.paused_oom.store(true, Ordering::Release);
        warn!(index = %self.index.name, "background indexing paused on memory threshold");
        let started = Instant::now();
        while memory_exhausted(self.store.as_ref(), self.config.bg_index_mem_pct_thr) {
            if self.is_stale() {
                return false;
            }
            std::thread::sleep(OOM_POLL);
        }
        state.paused_oom.store(false, Ordering::Release);
        info!(
            index = %self.index.name,
            paused_ms = started.elapsed().as_millis() as u64,
            "background indexing resumed"
        );
        true
    }

    pub fn run(self) -> ScanOutcome {
        let started = Instant::now();
        let state = &self.index.indexing;
        info!(index = %self.index.name, generation = self.generation, "schema scan started");
        let ctx = IngestContext {
            config: &self.config,
            analyzers: &self.analyzers,
            counters: &self.index.counters,
        };
        let mut cursor = 0u64;
        let mut scanned = 0u64;
        let mut indexed = 0u64;
        loop {
            if self.is_stale() || !self.wait_for_memory() {
                info!(index = %self.index.name, scanned, "schema scan aborted");
                return ScanOutcome::Aborted { scanned };
            }
            let (next, keys) = self.store.scan(cursor, SCAN_BATCH);
            let docs: Vec<_> = {
                let data = self.index.data.read();
                keys.iter()
                    .filter(|k| data.definition.rule.matches_key(k))
                    .filter_map(|k| self.store.get(k).map(|d| (k, d, self.store.expires_at_ms(k))))
                    .collect()
            };
            if !docs.is_empty() {
                let mut data = self.index.data.write();
                // Checked again under the lock: ALTER bumps the generation
                // while holding it
                if self.is_stale() {
                    return ScanOutcome::Aborted { scanned };
                }
                for (key, doc, expires_at) in docs {
                    match data.index_document(key, &doc, expires_at, &ctx) {
                        Ok(IngestOutcome::Indexed(_)) => indexed += 1,
                        Ok(_) => {}
                        Err(e) => self.index.counters.record_failure(format!("{}: {}", key, e)),
                    }
                }
            }
            let before = scanned / PROGRESS_EVERY;
            scanned += keys.len() as u64;
            state.scanned.store(scanned, Ordering::Relaxed);
            if scanned / PROGRESS_EVERY > before {
                debug!(index = %self.index.name, scanned, indexed, "schema scan progress");
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        if !self.is_stale() {
            state.running.store(false, Ordering::Release);
        }
        info!(
            index = %self.index.name,
            scanned,
            indexed,
            ms = started.elapsed().as_millis() as u64,
            "schema scan completed"
        );
        ScanOutcome::Completed { scanned, indexed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ingest::testing::data;
    use crate::host::MemoryStore;

    fn setup(n: usize) -> (Arc<SearchIndex>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for i in 0..n {
            store.hset(&format!("doc:{}", i), &[("t", format!("hello {}", i))]);
        }
        store.hset("other:1", &[("t", "hello")]);
        let index = Arc::new(SearchIndex::new("idx", data("PREFIX 1 doc: SCHEMA t TEXT")));
        (index, store)
    }

    fn job(index: &Arc<SearchIndex>, store: &Arc<MemoryStore>) -> ScanJob {
        ScanJob::new(index.clone(), store.clone(), Config::default(), Arc::new(AnalyzerRegistry::new()))
    }

    #[test]
    fn test_scan_indexes_matching_keys() {
        let (index, store) = setup(250);
        let outcome = job(&index, &store).run();
        assert_eq!(outcome, ScanOutcome::Completed { scanned: 251, indexed: 250 });
        assert_eq!(index.data.read().docs.num_docs(), 250);
        assert!(!index.indexing.is_running());
        assert_eq!(index.indexing.percent(), 1.0);
    }

    #[test]
    fn test_rescan_is_idempotent() {
        let (index, store) = setup(10);
        job(&index, &store).run();
        let max_id = index.data.read().docs.max_id();
        assert_eq!(job(&index, &store).run(), ScanOutcome::Completed { scanned: 11, indexed: 0 });
        assert_eq!(index.data.read().docs.max_id(), max_id);
    }

    #[test]
    fn test_newer_generation_aborts() {
        let (index, store) = setup(10);
        let old = job(&index, &store);
        index.indexing.generation.fetch_add(1, Ordering::AcqRel);
        assert_eq!(old.run(), ScanOutcome::Aborted { scanned: 0 });
        assert_eq!(index.data.read().docs.num_docs(), 0);
    }

    #[test]
    fn test_pauses_on_memory_then_resumes() {
        let (index, store) = setup(5);
        store.set_max_memory(100);
        store.set_used_memory(Some(95));
        let handle = job(&index, &store).spawn().unwrap();
        let waited = Instant::now();
        while !index.indexing.is_partial() && waited.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(index.indexing.is_partial());
        assert_eq!(index.data.read().docs.num_docs(), 0);
        store.set_used_memory(Some(10));
        assert!(matches!(handle.join().unwrap(), ScanOutcome::Completed { indexed: 5, .. }));
        assert!(!index.indexing.is_partial());
    }
}
