#![allow(dead_code)]

use std::sync::Arc;
use vexsearch::engine::search::SearchOptions;
use vexsearch::{Config, Engine, KeyEvent, MemoryStore, QueryReply, Reply};

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = Engine::new(store.clone(), config).unwrap();
        Harness { engine, store }
    }

    pub fn exec(&self, args: &[&str]) -> Reply {
        self.engine.execute(args).unwrap()
    }

    /// Creates `idx` over whatever the store already holds and waits for
    /// the initial scan.
    pub fn create(&self, schema: &str) {
        let mut args = vec!["INDEX.CREATE", "idx"];
        args.extend(schema.split_whitespace());
        assert_eq!(self.exec(&args), Reply::Ok);
        self.engine.wait_for_scans();
    }

    /// Writes a hash and delivers the change event.
    pub fn hset<V: AsRef<[u8]>>(&self, key: &str, fields: &[(&str, V)]) {
        self.store.hset(key, fields);
        self.engine.on_key_event(&KeyEvent::write(key));
    }

    pub fn delete(&self, key: &str) {
        self.engine.store().delete(key);
        self.engine.on_key_event(&KeyEvent::delete(key));
    }

    pub fn search(&self, query: &str) -> QueryReply {
        let opts = SearchOptions { count: 10_000, ..Default::default() };
        self.engine.search("idx", query, &opts).unwrap()
    }

    pub fn sorted_keys(&self, query: &str) -> Vec<String> {
        let mut keys: Vec<String> = self.search(query).keys().into_iter().map(String::from).collect();
        keys.sort();
        keys
    }
}

pub fn blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn result_ids(reply: &Reply) -> Vec<String> {
    reply
        .get("results")
        .and_then(Reply::as_array)
        .map(|rows| rows.iter().filter_map(|r| r.get("id").and_then(Reply::as_str).map(String::from)).collect())
        .unwrap_or_default()
}
