pub mod core;
pub mod compression;
pub mod analysis;
pub mod document;
pub mod schema;
pub mod index;
pub mod vector;
pub mod host;
pub mod expr;
pub mod query;
pub mod iterators;
pub mod scoring;
pub mod pipeline;
pub mod hybrid;
pub mod gc;
pub mod indexer;
pub mod engine;
pub mod storage;
pub mod coord;

pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::engine::reply::{QueryReply, Reply, ResultRow};
pub use crate::engine::Engine;
pub use crate::host::{FlushScope, HostStore, KeyEvent, MemoryStore};

/*
┌──────────────────────────────── VEXSEARCH LAYOUT ────────────────────────────────┐
│                                                                                  │
│  host store ──KeyEvent──▶ Engine::on_key_event ──▶ IndexData::index_document     │
│                                 │                      │                         │
│                                 │             DocTable · TermDictionary          │
│                                 │             Tag · NumericTree · GeoShape       │
│                                 │             TieredIndex (flat ▸ hnsw/vamana)   │
│                                 ▼                                                │
│  SEARCH/AGGREGATE/HYBRID ─▶ query::parse ─▶ Planner ─▶ iterators                 │
│                                                          │                       │
│                          pipeline: Root ▸ Scorer ▸ Sorter ▸ Pager ▸ Loader ...   │
│                                                          │                       │
│                                        QueryReply / CursorPool                   │
│                                                                                  │
│  background: ScanJob (indexer) · Collector (gc) · vector transfers · cursor GC   │
│  storage::snapshot: lz4 + bincode images of every index                          │
└──────────────────────────────────────────────────────────────────────────────────┘
*/
