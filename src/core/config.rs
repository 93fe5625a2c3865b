use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    Return,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcPolicy {
    /// Snapshot blocks and rewrite them on a background thread.
    Fork,
    /// Incremental pass on the caller's thread.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MtMode {
    Single,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub default_dialect: u32,
    pub max_dialect: u32,
    pub max_search_results: i64,
    pub max_aggregate_results: i64,
    pub max_prefix_expansions: usize,
    pub timeout_ms: u64,
    pub on_timeout: TimeoutPolicy,
    pub min_prefix: usize,
    pub min_stem_len: usize,
    pub max_doc_table_size: usize,

    // Garbage collection
    pub gc_policy: GcPolicy,
    pub fork_gc_run_interval_secs: u64,
    pub fork_gc_clean_threshold: usize,
    pub fork_gc_retry_interval_secs: u64,
    pub gc_scan_size: usize,

    // Threading
    pub workers: usize,
    pub search_io_threads: usize,
    pub mt_mode: MtMode,

    pub raw_docid_encoding: bool,
    pub bg_index_mem_pct_thr: u8,

    // Cursors
    pub cursor_max_idle_ms: u64,
    pub index_cursor_limit: usize,
    pub cursor_read_size: usize,

    // Scoring
    pub default_scorer: String,
    pub bm25std_tanh_factor: f64,

    // Hybrid
    pub hybrid_default_window: usize,
    pub hybrid_rrf_constant: f64,

    // Vectors
    pub tiered_hnsw_buffer_limit: usize,
    pub vamana_training_threshold: usize,
    pub vss_max_resize: usize,

    // Numeric tree
    pub numeric_compress: bool,
    pub numeric_precision: u32,
    pub numeric_tree_split: usize,
    pub numeric_tree_merge: usize,

    pub union_iterator_heap: usize,
    pub posting_block_size: usize,
    pub query_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Config {
            default_dialect: 2,
            max_dialect: 4,
            max_search_results: 1_000_000,
            max_aggregate_results: -1,
            max_prefix_expansions: 200,
            timeout_ms: 500,
            on_timeout: TimeoutPolicy::Return,
            min_prefix: 2,
            min_stem_len: 4,
            max_doc_table_size: 1_000_000,

            gc_policy: GcPolicy::Fork,
            fork_gc_run_interval_secs: 30,
            fork_gc_clean_threshold: 100,
            fork_gc_retry_interval_secs: 5,
            gc_scan_size: 100,

            workers: 0,
            search_io_threads: cpus.min(4),
            mt_mode: MtMode::Single,

            raw_docid_encoding: false,
            bg_index_mem_pct_thr: 80,

            cursor_max_idle_ms: 300_000,
            index_cursor_limit: 128,
            cursor_read_size: 1000,

            default_scorer: "BM25STD".to_string(),
            bm25std_tanh_factor: 4.0,

            hybrid_default_window: 20,
            hybrid_rrf_constant: 60.0,

            tiered_hnsw_buffer_limit: 1024,
            vamana_training_threshold: 1024,
            vss_max_resize: 0,

            numeric_compress: false,
            numeric_precision: 6,
            numeric_tree_split: 1024,
            numeric_tree_merge: 64,

            union_iterator_heap: 20,
            posting_block_size: 1000,
            query_cache_size: 256,
        }
    }
}

/// Names accepted by CONFIG GET/SET, in reply order.
pub const CONFIG_KEYS: &[&str] = &[
    "DEFAULT_DIALECT",
    "MAXSEARCHRESULTS",
    "MAXAGGREGATERESULTS",
    "MAXPREFIXEXPANSIONS",
    "TIMEOUT",
    "ON_TIMEOUT",
    "MINPREFIX",
    "MINSTEMLEN",
    "MAXDOCTABLESIZE",
    "GC_POLICY",
    "FORK_GC_RUN_INTERVAL",
    "FORK_GC_CLEAN_THRESHOLD",
    "FORK_GC_RETRY_INTERVAL",
    "GC_SCANSIZE",
    "WORKERS",
    "SEARCH_IO_THREADS",
    "MT_MODE",
    "RAW_DOCID_ENCODING",
    "_BG_INDEX_MEM_PCT_THR",
    "CURSOR_MAX_IDLE",
    "INDEX_CURSOR_LIMIT",
    "CURSOR_READ_SIZE",
    "DEFAULT_SCORER",
    "BM25STD_TANH_FACTOR",
    "HYBRID_DEFAULT_WINDOW",
    "HYBRID_RRF_CONSTANT",
    "TIERED_HNSW_BUFFER_LIMIT",
    "VAMANA_TRAINING_THRESHOLD",
    "VSS_MAX_RESIZE",
    "NUMERIC_COMPRESS",
    "NUMERIC_PRECISION",
    "NUMERIC_TREE_SPLIT",
    "NUMERIC_TREE_MERGE",
    "UNION_ITERATOR_HEAP",
    "MAX_DIALECT",
];

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        Error::new(ErrorKind::BadParameter, format!("invalid value '{}' for {}", value, key))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" | "enable" => Ok(true),
        "false" | "no" | "0" | "off" | "disable" => Ok(false),
        _ => Err(Error::new(ErrorKind::BadParameter, format!("invalid value '{}' for {}", value, key))),
    }
}

impl Config {
    pub fn get(&self, key: &str) -> Option<String> {
        let v = match key.to_ascii_uppercase().as_str() {
            "DEFAULT_DIALECT" => self.default_dialect.to_string(),
            "MAX_DIALECT" => self.max_dialect.to_string(),
            "MAXSEARCHRESULTS" => self.max_search_results.to_string(),
            "MAXAGGREGATERESULTS" => self.max_aggregate_results.to_string(),
            "MAXPREFIXEXPANSIONS" => self.max_prefix_expansions.to_string(),
            "TIMEOUT" => self.timeout_ms.to_string(),
            "ON_TIMEOUT" => match self.on_timeout {
                TimeoutPolicy::Return => "return".to_string(),
                TimeoutPolicy::Fail => "fail".to_string(),
            },
            "MINPREFIX" => self.min_prefix.to_string(),
            "MINSTEMLEN" => self.min_stem_len.to_string(),
            "MAXDOCTABLESIZE" => self.max_doc_table_size.to_string(),
            "GC_POLICY" => match self.gc_policy {
                GcPolicy::Fork => "fork".to_string(),
                GcPolicy::Legacy => "legacy".to_string(),
            },
            "FORK_GC_RUN_INTERVAL" => self.fork_gc_run_interval_secs.to_string(),
            "FORK_GC_CLEAN_THRESHOLD" => self.fork_gc_clean_threshold.to_string(),
            "FORK_GC_RETRY_INTERVAL" => self.fork_gc_retry_interval_secs.to_string(),
            "GC_SCANSIZE" => self.gc_scan_size.to_string(),
            "WORKERS" => self.workers.to_string(),
            "SEARCH_IO_THREADS" => self.search_io_threads.to_string(),
            "MT_MODE" => match self.mt_mode {
                MtMode::Single => "MT_MODE_OFF".to_string(),
                MtMode::Full => "MT_MODE_FULL".to_string(),
            },
            "RAW_DOCID_ENCODING" => self.raw_docid_encoding.to_string(),
            "_BG_INDEX_MEM_PCT_THR" => self.bg_index_mem_pct_thr.to_string(),
            "CURSOR_MAX_IDLE" => self.cursor_max_idle_ms.to_string(),
            "INDEX_CURSOR_LIMIT" => self.index_cursor_limit.to_string(),
            "CURSOR_READ_SIZE" => self.cursor_read_size.to_string(),
            "DEFAULT_SCORER" => self.default_scorer.clone(),
            "BM25STD_TANH_FACTOR" => self.bm25std_tanh_factor.to_string(),
            "HYBRID_DEFAULT_WINDOW" => self.hybrid_default_window.to_string(),
            "HYBRID_RRF_CONSTANT" => self.hybrid_rrf_constant.to_string(),
            "TIERED_HNSW_BUFFER_LIMIT" => self.tiered_hnsw_buffer_limit.to_string(),
            "VAMANA_TRAINING_THRESHOLD" => self.vamana_training_threshold.to_string(),
            "VSS_MAX_RESIZE" => self.vss_max_resize.to_string(),
            "NUMERIC_COMPRESS" => self.numeric_compress.to_string(),
            "NUMERIC_PRECISION" => self.numeric_precision.to_string(),
            "NUMERIC_TREE_SPLIT" => self.numeric_tree_split.to_string(),
            "NUMERIC_TREE_MERGE" => self.numeric_tree_merge.to_string(),
            "UNION_ITERATOR_HEAP" => self.union_iterator_heap.to_string(),
            _ => return None,
        };
        Some(v)
    }

    /// All (key, value) pairs whose key matches a `*`-glob pattern.
    pub fn get_matching(&self, pattern: &str) -> Vec<(String, String)> {
        let pattern = pattern.to_ascii_uppercase();
        CONFIG_KEYS
            .iter()
            .filter(|k| glob_match(&pattern, k))
            .filter_map(|k| self.get(k).map(|v| (k.to_string(), v)))
            .collect()
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let key_upper = key.to_ascii_uppercase();
        let k = key_upper.as_str();
        match k {
            "DEFAULT_DIALECT" => {
                let d: u32 = parse_num(k, value)?;
                if d < 1 || d > self.max_dialect {
                    return Err(Error::new(
                        ErrorKind::UnsupportedDialect,
                        format!("dialect {} is outside 1..={}", d, self.max_dialect),
                    ));
                }
                self.default_dialect = d;
            }
            "MAXSEARCHRESULTS" => self.max_search_results = parse_num(k, value)?,
            "MAXAGGREGATERESULTS" => self.max_aggregate_results = parse_num(k, value)?,
            "MAXPREFIXEXPANSIONS" => self.max_prefix_expansions = parse_num(k, value)?,
            "TIMEOUT" => self.timeout_ms = parse_num(k, value)?,
            "ON_TIMEOUT" => {
                self.on_timeout = match value.to_ascii_lowercase().as_str() {
                    "return" => TimeoutPolicy::Return,
                    "fail" => TimeoutPolicy::Fail,
                    _ => {
                        return Err(Error::new(
                            ErrorKind::BadParameter,
                            format!("invalid ON_TIMEOUT value '{}'", value),
                        ))
                    }
                }
            }
            "MINPREFIX" => self.min_prefix = parse_num(k, value)?,
            "MINSTEMLEN" => self.min_stem_len = parse_num(k, value)?,
            "MAXDOCTABLESIZE" => {
                let v: usize = parse_num(k, value)?;
                if v == 0 {
                    return Err(Error::new(ErrorKind::BadParameter, "MAXDOCTABLESIZE must be positive"));
                }
                self.max_doc_table_size = v;
            }
            "GC_POLICY" => {
                self.gc_policy = match value.to_ascii_lowercase().as_str() {
                    "fork" => GcPolicy::Fork,
                    "legacy" => GcPolicy::Legacy,
                    _ => {
                        return Err(Error::new(
                            ErrorKind::BadParameter,
                            format!("invalid GC_POLICY value '{}'", value),
                        ))
                    }
                }
            }
            "FORK_GC_RUN_INTERVAL" => self.fork_gc_run_interval_secs = parse_num(k, value)?,
            "FORK_GC_CLEAN_THRESHOLD" => self.fork_gc_clean_threshold = parse_num(k, value)?,
            "FORK_GC_RETRY_INTERVAL" => self.fork_gc_retry_interval_secs = parse_num(k, value)?,
            "GC_SCANSIZE" => self.gc_scan_size = parse_num::<usize>(k, value)?.max(1),
            "WORKERS" => self.workers = parse_num(k, value)?,
            "SEARCH_IO_THREADS" => self.search_io_threads = parse_num::<usize>(k, value)?.max(1),
            "MT_MODE" => {
                self.mt_mode = match value.to_ascii_uppercase().as_str() {
                    "MT_MODE_OFF" | "SINGLE" | "OFF" => MtMode::Single,
                    "MT_MODE_FULL" | "FULL" => MtMode::Full,
                    _ => {
                        return Err(Error::new(
                            ErrorKind::BadParameter,
                            format!("invalid MT_MODE value '{}'", value),
                        ))
                    }
                }
            }
            "RAW_DOCID_ENCODING" => self.raw_docid_encoding = parse_bool(k, value)?,
            "_BG_INDEX_MEM_PCT_THR" => {
                let v: u8 = parse_num(k, value)?;
                if v > 100 {
                    return Err(Error::new(ErrorKind::BadParameter, "percentage must be <= 100"));
                }
                self.bg_index_mem_pct_thr = v;
            }
            "CURSOR_MAX_IDLE" => self.cursor_max_idle_ms = parse_num(k, value)?,
            "INDEX_CURSOR_LIMIT" => self.index_cursor_limit = parse_num(k, value)?,
            "CURSOR_READ_SIZE" => self.cursor_read_size = parse_num::<usize>(k, value)?.max(1),
            "DEFAULT_SCORER" => {
                let name = value.to_ascii_uppercase();
                if crate::scoring::scorer::ScorerKind::from_name(&name).is_none() {
                    return Err(Error::new(ErrorKind::BadParameter, format!("unknown scorer '{}'", value)));
                }
                self.default_scorer = name;
            }
            "BM25STD_TANH_FACTOR" => {
                let v: f64 = parse_num(k, value)?;
                if v <= 0.0 {
                    return Err(Error::new(ErrorKind::BadParameter, "BM25STD_TANH_FACTOR must be positive"));
                }
                self.bm25std_tanh_factor = v;
            }
            "HYBRID_DEFAULT_WINDOW" => self.hybrid_default_window = parse_num::<usize>(k, value)?.max(1),
            "HYBRID_RRF_CONSTANT" => {
                let v: f64 = parse_num(k, value)?;
                if v <= 0.0 {
                    return Err(Error::new(ErrorKind::BadParameter, "RRF constant must be positive"));
                }
                self.hybrid_rrf_constant = v;
            }
            "TIERED_HNSW_BUFFER_LIMIT" => self.tiered_hnsw_buffer_limit = parse_num(k, value)?,
            "VAMANA_TRAINING_THRESHOLD" => self.vamana_training_threshold = parse_num(k, value)?,
            "VSS_MAX_RESIZE" => self.vss_max_resize = parse_num(k, value)?,
            "NUMERIC_COMPRESS" => self.numeric_compress = parse_bool(k, value)?,
            "NUMERIC_PRECISION" => self.numeric_precision = parse_num::<u32>(k, value)?.min(15),
            "NUMERIC_TREE_SPLIT" => self.numeric_tree_split = parse_num::<usize>(k, value)?.max(2),
            "NUMERIC_TREE_MERGE" => self.numeric_tree_merge = parse_num(k, value)?,
            "UNION_ITERATOR_HEAP" => self.union_iterator_heap = parse_num::<usize>(k, value)?.max(1),
            "MAX_DIALECT" => {
                return Err(Error::new(ErrorKind::BadParameter, "MAX_DIALECT is read-only"));
            }
            _ => {
                return Err(Error::new(
                    ErrorKind::ArgUnrecognized,
                    format!("unknown configuration option '{}'", key),
                ))
            }
        }
        Ok(())
    }

    /// Effective page cap for SEARCH; `None` when unbounded.
    pub fn search_cap(&self) -> Option<usize> {
        if self.max_search_results < 0 {
            None
        } else {
            Some(self.max_search_results as usize)
        }
    }

    pub fn aggregate_cap(&self) -> Option<usize> {
        if self.max_aggregate_results < 0 {
            None
        } else {
            Some(self.max_aggregate_results as usize)
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.workers
    }
}

pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            (Some(b'?'), Some(_)) => rec(&p[1..], &t[1..]),
            (Some(a), Some(b)) if a == b => rec(&p[1..], &t[1..]),
            _ => false,
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_roundtrip() {
        let mut config = Config::default();
        config.set("MAXPREFIXEXPANSIONS", "5").unwrap();
        assert_eq!(config.get("maxprefixexpansions").as_deref(), Some("5"));
        config.set("ON_TIMEOUT", "FAIL").unwrap();
        assert_eq!(config.on_timeout, TimeoutPolicy::Fail);
    }

    #[test]
    fn test_rejects_bad_dialect() {
        let mut config = Config::default();
        let err = config.set("DEFAULT_DIALECT", "9").unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedDialect);
    }

    #[test]
    fn test_unknown_key() {
        let mut config = Config::default();
        assert_eq!(config.set("NOPE", "1").unwrap_err().kind, ErrorKind::ArgUnrecognized);
    }

    #[test]
    fn test_glob() {
        let config = Config::default();
        let all = config.get_matching("*");
        assert_eq!(all.len(), CONFIG_KEYS.len());
        let gc = config.get_matching("FORK_GC_*");
        assert_eq!(gc.len(), 3);
    }
}
