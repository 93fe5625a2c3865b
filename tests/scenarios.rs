mod common;

use std::collections::HashSet;
use common::{blob, result_ids, Harness};
use vexsearch::coord::merge_search_replies;
use vexsearch::engine::args::{to_args, ArgCursor};
use vexsearch::engine::hybrid::HybridOptions;
use vexsearch::pipeline::SortBy;
use vexsearch::Reply;

#[test]
fn numeric_equality() {
    let h = Harness::new();
    h.create("SCHEMA n NUMERIC");
    for i in 0..50 {
        let value = format!("{}", i as f64 * 0.01);
        h.hset(&format!("d{}", i), &[("n", value.as_str())]);
    }
    let reply = h.exec(&["SEARCH", "idx", "@n:[0.17 0.17]"]);
    assert_eq!(result_ids(&reply), vec!["d17"]);
    let first = &reply.get("results").and_then(Reply::as_array).unwrap()[0];
    assert_eq!(first.get("extra_attributes").and_then(|a| a.get("n")), Some(&Reply::str("0.17")));
}

#[test]
fn phonetic_match() {
    let h = Harness::new();
    h.create("SCHEMA t TEXT PHONETIC dm:en");
    h.hset("d1", &[("t", "morfix")]);
    assert_eq!(h.sorted_keys("@t:morphix"), vec!["d1"]);
    assert!(h.sorted_keys("@t:morphix=>{$phonetic:false}").is_empty());
}

fn hybrid_harness(range: std::ops::Range<usize>) -> Harness {
    let h = Harness::new();
    for i in range {
        let v = [(i % 10) as f32, ((2 * i) % 10) as f32, ((3 * i) % 10) as f32];
        let tag = if i % 2 == 0 { "even" } else { "odd" };
        h.store.hset(
            &format!("d{}", i),
            &[
                ("n", i.to_string().into_bytes()),
                ("text", format!("doc number {}", i).into_bytes()),
                ("tag", tag.as_bytes().to_vec()),
                ("vec", blob(&v)),
            ],
        );
    }
    h.create("SCHEMA n NUMERIC text TEXT tag TAG vec VECTOR FLAT 6 TYPE FLOAT32 DIM 3 DISTANCE_METRIC L2");
    h
}

fn rrf_request() -> HybridOptions {
    let query = blob(&[5.0, 5.0, 5.0]);
    let mut args = to_args(&[
        "SEARCH", "@n:[69 1420]", "VSIM", "@vec", "$q", "KNN", "2", "K", "16384",
        "COMBINE", "RRF", "2", "CONSTANT", "60",
    ]);
    args.extend(to_args(&["PARAMS", "2", "q"]));
    args.push(query);
    HybridOptions::parse(&mut ArgCursor::new(&args), 60.0).unwrap()
}

#[test]
fn hybrid_rrf_sanity() {
    let h = hybrid_harness(0..16384);
    let reply = h.engine.hybrid("idx", &rrf_request()).unwrap();
    assert!(!reply.rows.is_empty());
    assert!(reply.rows.len() <= 10);
    let scores: Vec<f64> = reply.rows.iter().map(|r| r.score.unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    // A window of K covers every range match, so the top row is ranked by both halves
    assert!(scores[0] <= 2.0 / 61.0 + 1e-9);
    assert!(scores[0] > 1.0 / 61.0);
    let top = reply.rows[0].key.as_deref().unwrap();
    let n: usize = top.trim_start_matches('d').parse().unwrap();
    assert!((69..=1420).contains(&n));

    // Two shards holding halves of the keyspace merge into a consistent reply
    let shards = [hybrid_harness(0..8192), hybrid_harness(8192..16384)];
    let replies: Vec<_> = shards.iter().map(|s| s.engine.hybrid("idx", &rrf_request()).unwrap()).collect();
    let shard_keys: HashSet<String> =
        replies.iter().flat_map(|r| r.keys().into_iter().map(String::from)).collect();
    let merged = merge_search_replies(replies, &SortBy::Score, None);
    let merged_keys: HashSet<String> = merged.keys().into_iter().map(String::from).collect();
    assert_eq!(merged_keys, shard_keys);
}

#[test]
fn timeout_return_propagation() {
    let h = Harness::new();
    for i in 0..20 {
        h.store.hset(&format!("d{}", i), &[("t", "hello")]);
    }
    h.create("SCHEMA t TEXT");
    assert_eq!(h.exec(&["CONFIG", "SET", "ON_TIMEOUT", "RETURN"]), Reply::Ok);
    let reply = h.exec(&["DEBUG", "TIMEOUT_AFTER_N", "0", "AGGREGATE", "idx", "*", "TIMEOUT", "0", "LOAD", "1", "@t"]);
    assert_eq!(reply.get("results"), Some(&Reply::Array(vec![])));
    assert_eq!(reply.get("warning"), Some(&Reply::strings(["Timeout limit was reached"])));
}

#[test]
fn highlight_empty_field() {
    let h = Harness::new();
    h.create("SCHEMA lisbon TEXT seattle TEXT");
    h.hset("doc1", &[("lisbon", ""), ("seattle", "my Dog sleeps")]);
    let reply = h.exec(&["SEARCH", "idx", "Dog", "SORTBY", "lisbon", "DESC", "HIGHLIGHT"]);
    assert_eq!(result_ids(&reply), vec!["doc1"]);
    let attrs = reply.get("results").and_then(Reply::as_array).unwrap()[0].get("extra_attributes").unwrap().clone();
    let seattle = attrs.get("seattle").and_then(Reply::as_str).unwrap();
    assert!(seattle.contains("<b>Dog</b>"));
    if let Some(lisbon) = attrs.get("lisbon").and_then(Reply::as_str) {
        assert!(!lisbon.contains("<b>"));
    }
}

#[test]
fn tiered_vectors_after_mass_deletion() {
    let h = Harness::new();
    assert_eq!(h.exec(&["CONFIG", "SET", "TIERED_HNSW_BUFFER_LIMIT", "16"]), Reply::Ok);
    h.create("SCHEMA v VECTOR FLAT 6 TYPE FLOAT32 DIM 2 DISTANCE_METRIC L2");
    for i in 0..10240 {
        h.hset(&format!("d{}", i), &[("v", blob(&[i as f32, 0.0]))]);
    }
    let survivors: Vec<String> = (0..10240).step_by(1024).map(|i| format!("d{}", i)).collect();
    for i in 0..10240 {
        let key = format!("d{}", i);
        if !survivors.contains(&key) {
            h.delete(&key);
        }
    }
    h.engine.tick();

    let query = blob(&[0.0, 0.0]);
    let mut args = to_args(&["SEARCH", "idx", "*=>[KNN 10 @v $q]", "PARAMS", "2", "q"]);
    args.push(query);
    args.extend(to_args(&["DIALECT", "2", "NOCONTENT"]));
    let reply = h.engine.execute(&args).unwrap();
    let mut ids = result_ids(&reply);
    ids.sort();
    let mut expected = survivors.clone();
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn summarize_with_highlight_keeps_tags_intact() {
    let h = Harness::new();
    h.create("SCHEMA t TEXT");
    h.hset("doc1", &[("t", "hello big world of hello things")]);
    let reply = h.exec(&[
        "SEARCH", "idx", "hello", "SUMMARIZE", "FIELDS", "1", "t", "FRAGS", "1", "LEN", "3", "HIGHLIGHT", "TAGS", "[", "]",
    ]);
    let attrs = reply.get("results").and_then(Reply::as_array).unwrap()[0].get("extra_attributes").unwrap().clone();
    assert_eq!(attrs.get("t").and_then(Reply::as_str), Some("[hello] big world... "));
}
