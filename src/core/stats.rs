use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use serde::{Serialize, Deserialize};

/// Live counters of one index. Writers update them under the index write
/// lock; INFO reads them without locking.
#[derive(Debug, Default)]
pub struct IndexCounters {
    pub inverted_bytes: AtomicUsize,  // Encoded posting bytes, GC'd bytes excluded
    pub num_records: AtomicUsize,
    pub total_doc_len: AtomicU64,     // Sum of token counts, for BM25 avg length
    pub indexing_failures: AtomicUsize,
    pub last_failure: parking_lot::Mutex<Option<String>>,
}

impl IndexCounters {
    pub fn add_bytes(&self, delta: isize) {
        if delta >= 0 {
            self.inverted_bytes.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            let d = delta.unsigned_abs();
            let _ = self.inverted_bytes.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(d))
            });
        }
    }

    pub fn add_records(&self, delta: isize) {
        if delta >= 0 {
            self.num_records.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            let d = delta.unsigned_abs();
            let _ = self.num_records.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(d))
            });
        }
    }

    pub fn record_failure(&self, message: String) {
        self.indexing_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(message);
    }

    pub fn reset(&self) {
        self.inverted_bytes.store(0, Ordering::Relaxed);
        self.num_records.store(0, Ordering::Relaxed);
        self.total_doc_len.store(0, Ordering::Relaxed);
    }
}

/// Garbage-collector totals since index creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GcStats {
    pub bytes_collected: u64,
    pub records_collected: u64,
    pub cycles: u64,
    pub last_run_ms: u64,
    pub total_ms: u64,
}

impl GcStats {
    pub fn absorb(&mut self, bytes: u64, records: u64, elapsed_ms: u64) {
        self.bytes_collected += bytes;
        self.records_collected += records;
        self.cycles += 1;
        self.last_run_ms = elapsed_ms;
        self.total_ms += elapsed_ms;
    }
}

/// Point-in-time INFO view of one index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub num_docs: usize,
    pub max_doc_id: u64,
    pub num_terms: usize,
    pub num_records: usize,
    pub inverted_bytes: usize,
    pub vector_bytes: usize,
    pub indexing: bool,
    pub percent_indexed: f64,
    pub indexing_failures: usize,
    pub last_indexing_error: Option<String>,
    pub partial_index: bool,
    pub gc: GcStats,
    pub cursors_open: usize,
    pub temporary: bool,
    pub fields: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_never_underflow() {
        let c = IndexCounters::default();
        c.add_bytes(10);
        c.add_bytes(-25);
        assert_eq!(c.inverted_bytes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_gc_absorb() {
        let mut s = GcStats::default();
        s.absorb(100, 4, 3);
        s.absorb(50, 1, 2);
        assert_eq!(s.bytes_collected, 150);
        assert_eq!(s.cycles, 2);
        assert_eq!(s.total_ms, 5);
    }
}
