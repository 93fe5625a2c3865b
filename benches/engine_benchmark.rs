use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use std::sync::Arc;
use vexsearch::engine::search::SearchOptions;
use vexsearch::{Config, Engine, HostStore, KeyEvent, MemoryStore};

const WORDS: [&str; 8] = ["the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog"];

/// Writes a random document and notifies the engine
fn write_doc(engine: &Engine, store: &MemoryStore, id: usize, words: usize) {
    let mut rng = rand::thread_rng();
    let body = (0..words).map(|_| WORDS[rng.gen_range(0..WORDS.len())]).collect::<Vec<_>>().join(" ");
    let vector: Vec<u8> = (0..4).flat_map(|_| rng.gen_range(0.0f32..1.0).to_le_bytes()).collect();
    let key = format!("doc:{}", id);
    store.hset(
        &key,
        &[
            ("title", format!("Document {}", id).into_bytes()),
            ("body", body.into_bytes()),
            ("category", format!("c{}", id % 10).into_bytes()),
            ("price", rng.gen_range(0.0..100.0f64).to_string().into_bytes()),
            ("vec", vector),
        ],
    );
    engine.on_key_event(&KeyEvent::write(key));
}

fn setup(docs: usize) -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone(), Config::default()).unwrap();
    engine
        .execute(&[
            "INDEX.CREATE", "idx", "PREFIX", "1", "doc:", "SCHEMA", "title", "TEXT", "body", "TEXT", "category", "TAG",
            "price", "NUMERIC", "SORTABLE", "vec", "VECTOR", "FLAT", "6", "TYPE", "FLOAT32", "DIM", "4",
            "DISTANCE_METRIC", "COSINE",
        ])
        .unwrap();
    for id in 0..docs {
        write_doc(&engine, &store, id, 50);
    }
    (engine, store)
}

fn bench_ingest(c: &mut Criterion) {
    let (engine, store) = setup(0);
    c.bench_function("ingest_single_document", |b| {
        let mut id = 0;
        b.iter(|| {
            write_doc(&engine, &store, id, 50);
            id += 1;
        });
    });
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let (engine, _store) = setup(5_000);
    let opts = SearchOptions::default();
    for query in ["fox", "quick brown", "@category:{c3}", "@price:[10 20]", "qu*", "fox -lazy"] {
        group.bench_with_input(BenchmarkId::from_parameter(query), query, |b, q| {
            b.iter(|| black_box(engine.search("idx", q, &opts).unwrap()));
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let (engine, _store) = setup(5_000);
    c.bench_function("aggregate_group_by_category", |b| {
        b.iter(|| {
            black_box(
                engine
                    .execute(&[
                        "AGGREGATE", "idx", "*", "LOAD", "1", "@price", "GROUPBY", "1", "@category", "REDUCE", "AVG",
                        "1", "@price", "AS", "avg", "SORTBY", "2", "@avg", "DESC",
                    ])
                    .unwrap(),
            )
        });
    });
}

fn bench_gc(c: &mut Criterion) {
    c.bench_function("gc_after_deleting_half", |b| {
        b.iter_batched(
            || {
                let (engine, store) = setup(2_000);
                for id in (0..2_000).step_by(2) {
                    let key = format!("doc:{}", id);
                    store.delete(&key);
                    engine.on_key_event(&KeyEvent::delete(key));
                }
                engine
            },
            |engine| black_box(engine.run_gc("idx", true).unwrap()),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_ingest, bench_queries, bench_aggregate, bench_gc);
criterion_main!(benches);
