mod common;

use common::{blob, Harness};
use vexsearch::core::error::{ErrorKind, QueryWarning};
use vexsearch::engine::args::{to_args, ArgCursor};
use vexsearch::engine::hybrid::HybridOptions;
use vexsearch::engine::search::SearchOptions;
use vexsearch::{Config, Engine, KeyEvent};

fn populated() -> Harness {
    let h = Harness::new();
    h.create("INDEXALL ENABLE SCHEMA t TEXT n NUMERIC SORTABLE g TAG");
    for i in 0..30 {
        let n = (i * 7 % 11).to_string();
        let g = if i % 3 == 0 { "red" } else { "blue" };
        h.hset(&format!("k{}", i), &[("t", format!("word{} shared", i % 4).as_str()), ("n", n.as_str()), ("g", g)]);
    }
    for i in (0..30).step_by(5) {
        h.delete(&format!("k{}", i));
    }
    h
}

#[test]
fn wildcard_returns_exactly_the_live_documents() {
    let h = populated();
    let live: Vec<String> = (0..30).filter(|i| i % 5 != 0).map(|i| format!("k{}", i)).collect();
    let mut expected = live.clone();
    expected.sort();
    assert_eq!(h.sorted_keys("*"), expected);
    assert_eq!(h.engine.info("idx").unwrap().num_docs, live.len());
}

#[test]
fn numeric_point_query_finds_every_value() {
    let h = populated();
    for i in (0..30).filter(|i| i % 5 != 0) {
        let v = i * 7 % 11;
        let keys = h.sorted_keys(&format!("@n:[{} {}]", v, v));
        assert!(keys.contains(&format!("k{}", i)), "k{} missing for n={}", i, v);
    }
}

#[test]
fn not_over_index_all_drops_one_document() {
    let h = Harness::new();
    h.create("INDEXALL ENABLE SCHEMA t TEXT");
    for i in 0..12 {
        let t = if i == 4 { "unique" } else { "common" };
        h.hset(&format!("k{}", i), &[("t", t)]);
    }
    h.delete("k7");
    assert_eq!(h.search("-unique").rows.len(), 10);
}

#[test]
fn reingesting_the_same_event_changes_nothing() {
    let h = populated();
    let before = h.engine.info("idx").unwrap();
    let keys_before = h.sorted_keys("shared");
    for i in 0..30 {
        h.engine.on_key_event(&KeyEvent::write(format!("k{}", i)));
    }
    let after = h.engine.info("idx").unwrap();
    assert_eq!(before.max_doc_id, after.max_doc_id);
    assert_eq!(before.num_records, after.num_records);
    assert_eq!(keys_before, h.sorted_keys("shared"));
}

#[test]
fn snapshot_round_trip_preserves_query_results() {
    let h = populated();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.snap");
    h.engine.save_snapshot(&path).unwrap();

    let restored = Engine::new(h.store.clone(), Config::default()).unwrap();
    restored.load_snapshot(&path).unwrap();
    let opts = vexsearch::engine::search::SearchOptions { count: 100, ..Default::default() };
    for q in ["*", "shared", "@g:{red}", "@n:[3 8]", "word1|word2", "-@g:{blue}"] {
        let a = h.engine.search("idx", q, &opts).unwrap();
        let b = restored.search("idx", q, &opts).unwrap();
        assert_eq!(a.keys(), b.keys(), "query {}", q);
        assert_eq!(a.total, b.total, "query {}", q);
    }
}

fn hybrid(h: &Harness, combine: &[&str]) -> vexsearch::QueryReply {
    let mut args = to_args(&["SEARCH", "alpha", "VSIM", "@v", "$q", "KNN", "2", "K", "1"]);
    args.extend(to_args(combine));
    args.extend(to_args(&["PARAMS", "2", "q"]));
    args.push(blob(&[0.0, 0.0]));
    let opts = HybridOptions::parse(&mut ArgCursor::new(&args), 60.0).unwrap();
    h.engine.hybrid("idx", &opts).unwrap()
}

fn hybrid_fixture() -> Harness {
    let h = Harness::new();
    h.create("SCHEMA t TEXT v VECTOR FLAT 6 TYPE FLOAT32 DIM 2 DISTANCE_METRIC L2");
    // "lex" matches the text but is far away; "vec" is the nearest vector
    h.hset("lex", &[("t", b"alpha".to_vec()), ("v", blob(&[9.0, 9.0]))]);
    h.hset("vec", &[("t", b"omega".to_vec()), ("v", blob(&[0.0, 0.1]))]);
    h
}

#[test]
fn rrf_rank_one_in_one_half_scores_one_over_61() {
    let h = hybrid_fixture();
    let reply = hybrid(&h, &["COMBINE", "RRF", "2", "CONSTANT", "60"]);
    assert_eq!(reply.rows.len(), 2);
    for row in &reply.rows {
        assert!((row.score.unwrap() - 1.0 / 61.0).abs() < 1e-9);
    }
}

#[test]
fn linear_weights_select_one_half() {
    let h = hybrid_fixture();
    let vector_only = hybrid(&h, &["COMBINE", "LINEAR", "4", "ALPHA", "0", "BETA", "1"]);
    assert_eq!(vector_only.keys()[0], "vec");
    // Squared L2 from the origin to [0, 0.1]
    let d = (0.1f32 * 0.1f32) as f64;
    assert!((vector_only.rows[0].score.unwrap() - 1.0 / (1.0 + d)).abs() < 1e-6);

    let lexical_only = hybrid(&h, &["COMBINE", "LINEAR", "4", "ALPHA", "1", "BETA", "0"]);
    assert_eq!(lexical_only.keys()[0], "lex");
    let opts = SearchOptions { with_scores: true, ..Default::default() };
    let plain = h.engine.search("idx", "alpha", &opts).unwrap();
    assert_eq!(plain.keys(), vec!["lex"]);
    let lexical = plain.rows[0].score.unwrap();
    assert!(lexical > 0.0);
    assert!((lexical_only.rows[0].score.unwrap() - lexical).abs() < 1e-9);
    let vec_row = lexical_only.rows.iter().find(|r| r.key.as_deref() == Some("vec"));
    assert!(vec_row.is_none_or(|r| r.score == Some(0.0)));
}

#[test]
fn equal_scores_within_a_half_rank_by_key() {
    let h = Harness::new();
    h.create("SCHEMA t TEXT v VECTOR FLAT 6 TYPE FLOAT32 DIM 2 DISTANCE_METRIC L2");
    // "b" gets the lower doc id; both halves score the two documents equally
    h.hset("b", &[("t", b"alpha".to_vec()), ("v", blob(&[1.0, 1.0]))]);
    h.hset("a", &[("t", b"alpha".to_vec()), ("v", blob(&[1.0, 1.0]))]);
    let mut args = to_args(&["SEARCH", "alpha", "VSIM", "@v", "$q", "KNN", "2", "K", "2"]);
    args.extend(to_args(&["COMBINE", "RRF", "2", "CONSTANT", "60", "PARAMS", "2", "q"]));
    args.push(blob(&[0.0, 0.0]));
    let opts = HybridOptions::parse(&mut ArgCursor::new(&args), 60.0).unwrap();
    let reply = h.engine.hybrid("idx", &opts).unwrap();
    assert_eq!(reply.keys(), vec!["a", "b"]);
    assert!((reply.rows[0].score.unwrap() - 2.0 / 61.0).abs() < 1e-9);
    assert!((reply.rows[1].score.unwrap() - 2.0 / 62.0).abs() < 1e-9);
}

#[test]
fn nosort_keeps_fused_rows_in_arrival_order() {
    let h = hybrid_fixture();
    let sorted = hybrid(&h, &["COMBINE", "LINEAR", "4", "ALPHA", "0", "BETA", "1"]);
    assert_eq!(sorted.keys(), vec!["vec", "lex"]);
    let unsorted = hybrid(&h, &["COMBINE", "LINEAR", "4", "ALPHA", "0", "BETA", "1", "NOSORT"]);
    assert_eq!(unsorted.keys(), vec!["lex", "vec"]);
}

#[test]
fn nosort_search_pages_in_match_order_with_full_total() {
    let h = Harness::new();
    h.create("SCHEMA t TEXT");
    h.hset("d1", &[("t", "fox jumps over the lazy dog again")]);
    h.hset("d2", &[("t", "fox fox fox")]);
    let scored = h.exec(&["SEARCH", "idx", "fox", "LIMIT", "0", "1"]);
    assert_eq!(common::result_ids(&scored), vec!["d2"]);
    let reply = h.exec(&["SEARCH", "idx", "fox", "NOSORT", "LIMIT", "0", "1"]);
    assert_eq!(common::result_ids(&reply), vec!["d1"]);
    assert_eq!(reply.get("total_results"), Some(&vexsearch::Reply::Int(2)));
    let err = h.engine.execute(&["SEARCH", "idx", "fox", "SORTBY", "t", "NOSORT"]);
    assert_eq!(err.err().map(|e| e.kind), Some(ErrorKind::BadParameter));
}

#[test]
fn prefix_expansion_cap_attaches_warning() {
    let h = Harness::new();
    assert_eq!(h.exec(&["CONFIG", "SET", "MAXPREFIXEXPANSIONS", "3"]), vexsearch::Reply::Ok);
    h.create("SCHEMA t TEXT");
    for i in 0..10 {
        h.hset(&format!("k{}", i), &[("t", format!("pre{}", i).as_str())]);
    }
    let reply = h.search("pre*");
    assert!(reply.warnings.contains(&QueryWarning::MaxPrefixExpansions));
    assert!(reply.rows.len() <= 3);
}
