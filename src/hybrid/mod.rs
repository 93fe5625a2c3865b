//! HYBRID: a lexical half and a vector half run side by side against one
//! index, then their ranked outputs are fused into a single stream.

pub mod fusion;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use crossbeam::channel::{bounded, select, Receiver, Sender};
use tracing::{debug, warn};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::core::config::{Config, TimeoutPolicy};
use crate::core::deadline::{Deadline, Interrupt};
use crate::core::error::{Error, ErrorKind, QueryWarning, Result, Warnings};
use crate::core::types::Value;
use crate::engine::index::SearchIndex;
use crate::pipeline::{
    ExecCtx, Pipeline, PipelineBuilder, Processor, ResultProcessor, RootProcessor, Row, ScorerProcessor, SortBy,
    SorterProcessor, Step,
};
use crate::query::ast::{Blob, KnnClause, Node, NodeKind, Operand};
use crate::query::{PlanOptions, Planner};
use crate::scoring::ScorerKind;

pub use fusion::{fuse, fuse_unordered, yield_score, Combine};

/// Rows a half hands to the merger per message.
const HALF_BATCH: usize = 256;
/// Row field carrying a vector distance inside the vector half.
const DISTANCE_FIELD: &str = "__vector_distance";

#[derive(Debug, Clone, PartialEq)]
pub enum VsimMode {
    Knn { k: usize, ef_runtime: Option<usize> },
    Range { radius: f64, epsilon: Option<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VsimSpec {
    pub field: String,
    pub blob: Vec<u8>,
    pub mode: VsimMode,
    /// Pre-filter applied to the vector half only.
    pub filter: Option<Node>,
    /// Row field that receives the vector similarity.
    pub yield_score_as: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HybridRequest {
    /// Parameters already bound.
    pub search: Node,
    pub scorer: ScorerKind,
    pub vsim: VsimSpec,
    pub combine: Combine,
    /// Row field that receives the fused score.
    pub yield_score_as: Option<String>,
    pub verbatim: bool,
    /// Keep fused rows in arrival order instead of by fused score.
    pub no_sort: bool,
}

/// Fused rows plus what both halves reported.
pub struct HybridOutput {
    pub rows: Vec<Row>,
    pub warnings: Warnings,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Lexical,
    Vector,
}

enum HalfMsg {
    Batch(Side, Vec<Row>),
    Done(Side, Result<(Warnings, bool)>),
    /// The half's chain failed after it started producing rows.
    Failed(Side, Error),
}

/// Settles a half that failed mid-run. On a worker thread the failure
/// becomes a warning and the other half's rows still fuse; interrupts and
/// failures on the calling thread end the query.
fn settle_failure(side: Side, err: Error, threaded: bool, warnings: &mut Warnings) -> Result<()> {
    if !threaded || matches!(err.kind, ErrorKind::IndexDropped | ErrorKind::Timeout) {
        return Err(err);
    }
    warn!(?side, error = %err, "hybrid half failed on a worker");
    warnings.push(err.into_async_warning());
    Ok(())
}

/// Checks what can be rejected before any work starts.
pub fn validate(req: &HybridRequest) -> Result<()> {
    if req.search.contains_vector() {
        return Err(Error::new(
            ErrorKind::BadQuerySyntax,
            "Vector expressions are not allowed in the SEARCH clause of HYBRID",
        ));
    }
    if !req.scorer.allowed_in_hybrid() {
        return Err(Error::new(
            ErrorKind::BadParameter,
            format!("Scorer {} is not supported in HYBRID", req.scorer.name()),
        ));
    }
    if req.vsim.filter.as_ref().is_some_and(|f| f.contains_vector()) {
        return Err(Error::new(ErrorKind::BadQuerySyntax, "Vector expressions are not allowed in the VSIM FILTER"));
    }
    if let Combine::Rrf { constant, .. } = req.combine {
        if constant <= 0.0 {
            return Err(Error::new(ErrorKind::BadParameter, "RRF CONSTANT must be positive"));
        }
    }
    Ok(())
}

/// Per-half window: explicit WINDOW, else K for RRF over KNN, else the
/// configured default.
fn window(req: &HybridRequest, config: &Config) -> usize {
    if let Some(w) = req.combine.window() {
        return w.max(1);
    }
    match (&req.combine, &req.vsim.mode) {
        (Combine::Rrf { .. }, VsimMode::Knn { k, .. }) => (*k).max(1),
        _ => config.hybrid_default_window.max(1),
    }
}

/// Runs both halves and fuses them. With `workers == 0` the halves run
/// one after the other on the calling thread.
pub fn execute(
    index: &Arc<SearchIndex>,
    req: &HybridRequest,
    config: &Config,
    analyzers: &AnalyzerRegistry,
    deadline: Deadline,
) -> Result<HybridOutput> {
    validate(req)?;
    let window = window(req, config);
    let mut lexical = Vec::new();
    let mut vector = Vec::new();
    let mut warnings = Warnings::new();
    let mut timed_out = false;

    let threaded = config.workers > 0;
    let mut absorb = |msg: HalfMsg, warnings: &mut Warnings, timed_out: &mut bool| -> Result<bool> {
        match msg {
            HalfMsg::Batch(Side::Lexical, rows) => lexical.extend(rows),
            HalfMsg::Batch(Side::Vector, rows) => vector.extend(rows),
            HalfMsg::Done(side, result) => {
                let (w, t) = result?;
                debug!(?side, timed_out = t, "hybrid half finished");
                warnings.extend(&w);
                *timed_out |= t;
                return Ok(true);
            }
            HalfMsg::Failed(side, err) => {
                settle_failure(side, err, threaded, warnings)?;
                return Ok(true);
            }
        }
        Ok(false)
    };

    if config.workers == 0 {
        for side in [Side::Lexical, Side::Vector] {
            let (tx, rx) = crossbeam::channel::unbounded();
            run_half(side, index, req, config, analyzers, &deadline, window, &tx);
            drop(tx);
            for msg in rx.try_iter() {
                absorb(msg, &mut warnings, &mut timed_out)?;
            }
        }
    } else {
        let (tx, rx): (Sender<HalfMsg>, Receiver<HalfMsg>) = bounded(4);
        std::thread::scope(|s| -> Result<()> {
            for side in [Side::Lexical, Side::Vector] {
                let tx = tx.clone();
                let deadline = deadline.clone();
                s.spawn(move || run_half(side, index, req, config, analyzers, &deadline, window, &tx));
            }
            drop(tx);
            let mut finished = 0;
            while finished < 2 {
                // Stop draining once the deadline fires so halves never
                // queue more work than the merger will take
                if deadline.check().is_err() {
                    timed_out = true;
                    deadline.expire();
                    break;
                }
                select! {
                    recv(rx) -> msg => match msg {
                        Ok(msg) => {
                            if absorb(msg, &mut warnings, &mut timed_out)? {
                                finished += 1;
                            }
                        }
                        Err(_) => break,
                    },
                    default(Duration::from_millis(5)) => {}
                }
            }
            // Halves still running see the expired deadline; unblock their sends
            while rx.try_recv().is_ok() {}
            drop(rx);
            Ok(())
        })?;
    }

    if let Err(why) = deadline.check() {
        if why == Interrupt::IndexDropped {
            return Err(Error::from(why));
        }
        timed_out = true;
    }
    if timed_out {
        if config.on_timeout == TimeoutPolicy::Fail {
            return Err(Error::from(Interrupt::TimedOut));
        }
        warnings.push(QueryWarning::Timeout);
    }

    let mut rows = if req.no_sort {
        fuse_unordered(lexical, vector, &req.combine)
    } else {
        fuse(lexical, vector, &req.combine)
    };
    if let Some(alias) = &req.yield_score_as {
        yield_score(&mut rows, alias);
    }
    Ok(HybridOutput { rows, warnings, timed_out })
}

#[allow(clippy::too_many_arguments)]
fn run_half(
    side: Side,
    index: &Arc<SearchIndex>,
    req: &HybridRequest,
    config: &Config,
    analyzers: &AnalyzerRegistry,
    deadline: &Deadline,
    window: usize,
    tx: &Sender<HalfMsg>,
) {
    let built = match side {
        Side::Lexical => lexical_half(index, req, config, analyzers, deadline, window),
        Side::Vector => vector_half(index, req, config, analyzers, deadline, window),
    };
    let mut pipeline = match built {
        Ok(p) => p,
        Err(e) => {
            let _ = tx.send(HalfMsg::Done(side, Err(e)));
            return;
        }
    };
    loop {
        let rows = match pipeline.read(Some(HALF_BATCH)) {
            Ok(rows) => rows,
            Err(e) => {
                let _ = tx.send(HalfMsg::Failed(side, e));
                return;
            }
        };
        let rows = match side {
            Side::Lexical => rows,
            Side::Vector => rows.into_iter().map(|r| vector_row(r, &req.vsim)).collect(),
        };
        if !rows.is_empty() && tx.send(HalfMsg::Batch(side, rows)).is_err() {
            warn!(?side, "hybrid merger went away");
            return;
        }
        if pipeline.is_done() {
            break;
        }
    }
    let end = (pipeline.ctx.warnings.clone(), pipeline.ctx.timed_out);
    let _ = tx.send(HalfMsg::Done(side, Ok(end)));
}

fn lexical_half(
    index: &Arc<SearchIndex>,
    req: &HybridRequest,
    config: &Config,
    analyzers: &AnalyzerRegistry,
    deadline: &Deadline,
    window: usize,
) -> Result<Pipeline> {
    let opts = PlanOptions { verbatim: req.verbatim, hybrid_search: true, ..PlanOptions::default() };
    let (plan, mut stats) = {
        let data = index.data.read();
        let plan = Planner::new(&data, config, analyzers, deadline.clone(), &opts).plan(&req.search)?;
        (plan, data.scoring_stats(config))
    };
    stats.ignore_tags = true;
    let mut ctx = ExecCtx::new(deadline.clone(), TimeoutPolicy::Return);
    ctx.warnings.extend(&plan.warnings);
    let root: Processor = Box::new(RootProcessor::new(plan.root, index.clone(), None));
    let scorer = req.scorer.build();
    let normalize = req.scorer.normalizes_results();
    Ok(PipelineBuilder::new(root)
        .then(|p| Box::new(ScorerProcessor::new(p, scorer, stats, false)))
        .then(|p| Box::new(SorterProcessor::new(p, SortBy::Score, Some(window), normalize)))
        .build(ctx))
}

fn vector_half(
    index: &Arc<SearchIndex>,
    req: &HybridRequest,
    config: &Config,
    analyzers: &AnalyzerRegistry,
    deadline: &Deadline,
    window: usize,
) -> Result<Pipeline> {
    let vsim = &req.vsim;
    let node = vector_query(vsim);
    let opts = PlanOptions::default();
    let (plan, metric) = {
        let data = index.data.read();
        let metric = data.vector(&vsim.field)?.params().metric;
        let plan = Planner::new(&data, config, analyzers, deadline.clone(), &opts).plan(&node)?;
        (plan, metric)
    };
    let mut ctx = ExecCtx::new(deadline.clone(), TimeoutPolicy::Return);
    ctx.warnings.extend(&plan.warnings);
    let root: Processor = Box::new(RootProcessor::new(plan.root, index.clone(), Some(DISTANCE_FIELD.to_string())));
    Ok(PipelineBuilder::new(root)
        .then(|p| Box::new(SimilarityProcessor { upstream: p, metric }))
        .then(|p| Box::new(SorterProcessor::new(p, SortBy::Score, Some(window), false)))
        .build(ctx))
}

/// The vector half as a query: KNN over the filter, or a range intersected
/// with it.
fn vector_query(vsim: &VsimSpec) -> Node {
    let blob = Blob::Bytes(vsim.blob.clone());
    match &vsim.mode {
        VsimMode::Knn { k, ef_runtime } => Node::new(NodeKind::VectorKnn {
            base: Box::new(vsim.filter.clone().unwrap_or_else(Node::wildcard)),
            knn: KnnClause {
                k: Operand::Literal(k.to_string()),
                field: vsim.field.clone(),
                blob,
                ef_runtime: ef_runtime.map(|e| Operand::Literal(e.to_string())),
                alias: Some(DISTANCE_FIELD.to_string()),
            },
        }),
        VsimMode::Range { radius, epsilon } => {
            let mut range = Node::new(NodeKind::VectorRange {
                field: vsim.field.clone(),
                radius: Operand::Literal(radius.to_string()),
                blob,
                epsilon: epsilon.map(|e| Operand::Literal(e.to_string())),
            });
            range.attrs.yield_distance_as = Some(DISTANCE_FIELD.to_string());
            match &vsim.filter {
                Some(f) => Node::new(NodeKind::Intersect(vec![range, f.clone()])),
                None => range,
            }
        }
    }
}

/// Scores vector rows by metric similarity of their distance.
struct SimilarityProcessor {
    upstream: Processor,
    metric: crate::vector::distance::Metric,
}

impl ResultProcessor for SimilarityProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        let mut row = match self.upstream.next(ctx)? {
            Step::Row(r) => r,
            other => return Ok(other),
        };
        let distance = row.get(DISTANCE_FIELD).and_then(Value::as_number).unwrap_or(f64::INFINITY);
        row.score = self.metric.to_similarity(distance);
        Ok(Step::Row(row))
    }

    fn name(&self) -> &'static str {
        "Vector similarity"
    }
}

/// Drops the internal distance field, yielding the similarity if asked.
fn vector_row(mut row: Row, vsim: &VsimSpec) -> Row {
    row.fields.retain(|(k, _)| k != DISTANCE_FIELD);
    if let Some(alias) = &vsim.yield_score_as {
        let s = row.score;
        row.set(alias, Value::Number(s));
    }
    row
}

/// Feeds fused rows into the tail chain.
pub struct FusedProcessor {
    rows: VecDeque<Row>,
}

impl FusedProcessor {
    pub fn new(rows: Vec<Row>) -> Self {
        FusedProcessor { rows: rows.into() }
    }
}

impl ResultProcessor for FusedProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        match self.rows.pop_front() {
            Some(r) => {
                ctx.total += 1;
                Ok(Step::Row(r))
            }
            None => Ok(Step::Eof),
        }
    }

    fn name(&self) -> &'static str {
        "Hybrid merger"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ingest::testing::data;
    use crate::engine::ingest::IngestContext;
    use crate::core::stats::IndexCounters;
    use crate::host::{HostStore, MemoryStore};
    use crate::query::parse_query;
    use crate::vector::distance::to_blob;

    fn index() -> Arc<SearchIndex> {
        let mut d = data("SCHEMA title TEXT tag TAG v VECTOR FLAT 6 TYPE FLOAT32 DIM 2 DISTANCE_METRIC L2");
        let config = Config::default();
        let analyzers = AnalyzerRegistry::new();
        let counters = IndexCounters::default();
        let ctx = IngestContext { config: &config, analyzers: &analyzers, counters: &counters };
        let docs = [
            ("a", "red apple", [0.0f32, 0.0]),
            ("b", "green apple", [5.0, 5.0]),
            ("c", "red car", [0.1, 0.0]),
            ("d", "blue sky", [9.0, 9.0]),
        ];
        let store = MemoryStore::new();
        for (key, title, v) in docs {
            store.hset(key, &[("title", title.as_bytes().to_vec()), ("tag", b"x".to_vec()), ("v", to_blob(&v))]);
            let doc = store.get(key).unwrap();
            d.index_document(key, &doc, None, &ctx).unwrap();
        }
        Arc::new(SearchIndex::new("idx", d))
    }

    fn request(query: &str, combine: Combine) -> HybridRequest {
        HybridRequest {
            search: parse_query(query, 2).unwrap(),
            scorer: ScorerKind::Bm25Std,
            vsim: VsimSpec {
                field: "v".into(),
                blob: to_blob(&[0.0, 0.0]),
                mode: VsimMode::Knn { k: 2, ef_runtime: None },
                filter: None,
                yield_score_as: Some("vs".into()),
            },
            combine,
            yield_score_as: Some("fused".into()),
            verbatim: false,
            no_sort: false,
        }
    }

    fn keys(out: &HybridOutput) -> Vec<String> {
        out.rows.iter().map(|r| r.key.clone().unwrap()).collect()
    }

    #[test]
    fn test_rrf_over_both_halves() {
        let idx = index();
        let req = request("apple", Combine::Rrf { window: None, constant: 60.0 });
        for workers in [0, 2] {
            let config = Config { workers, ..Config::default() };
            let out = execute(&idx, &req, &config, &AnalyzerRegistry::new(), Deadline::unlimited()).unwrap();
            // "a" is in both halves, "b" only lexical, "c" only vector
            assert_eq!(out.rows[0].key.as_deref(), Some("a"));
            let mut k = keys(&out);
            k.sort();
            assert_eq!(k, vec!["a", "b", "c"]);
            assert!(out.rows[0].get("vs").is_some());
            assert!(out.rows.iter().all(|r| r.get("fused").is_some()));
            assert!(!out.timed_out);
        }
    }

    #[test]
    fn test_vector_filter_and_linear() {
        let idx = index();
        let mut req = request("sky", Combine::Linear { alpha: 0.0, beta: 1.0, window: None });
        req.vsim.filter = Some(parse_query("car", 2).unwrap());
        let out = execute(&idx, &req, &Config::default(), &AnalyzerRegistry::new(), Deadline::unlimited()).unwrap();
        assert_eq!(keys(&out), vec!["c", "d"]);
        assert_eq!(out.rows[1].score, 0.0);
    }

    #[test]
    fn test_rejects_vector_search_clause_and_hamming() {
        let idx = index();
        let req = request("*=>[KNN 2 @v $b]", Combine::Rrf { window: None, constant: 60.0 });
        let err = execute(&idx, &req, &Config::default(), &AnalyzerRegistry::new(), Deadline::unlimited());
        assert_eq!(err.err().map(|e| e.kind), Some(ErrorKind::BadQuerySyntax));

        let mut req = request("apple", Combine::Rrf { window: None, constant: 60.0 });
        req.scorer = ScorerKind::Hamming;
        assert!(validate(&req).is_err());
    }

    #[test]
    fn test_expired_deadline_returns_partial_or_fails() {
        let idx = index();
        let req = request("apple", Combine::Rrf { window: None, constant: 60.0 });
        let deadline = Deadline::unlimited();
        deadline.expire();
        let out = execute(&idx, &req, &Config::default(), &AnalyzerRegistry::new(), deadline).unwrap();
        assert!(out.timed_out);
        assert!(out.warnings.contains(&QueryWarning::Timeout));

        let deadline = Deadline::unlimited();
        deadline.expire();
        let config = Config { on_timeout: TimeoutPolicy::Fail, ..Config::default() };
        let err = execute(&idx, &req, &config, &AnalyzerRegistry::new(), deadline);
        assert_eq!(err.err().map(|e| e.kind), Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_worker_half_failure_is_reported_as_warning() {
        let err = || Error::new(ErrorKind::Io, "vector store unreachable").in_stage("Vector similarity");
        let mut warnings = Warnings::new();
        settle_failure(Side::Vector, err(), true, &mut warnings).unwrap();
        assert_eq!(
            warnings.to_strings(),
            vec![
                "the following error was caught upon running the query asynchronously: \
                 io: Vector similarity: vector store unreachable"
                    .to_string()
            ]
        );

        let mut warnings = Warnings::new();
        let inline = settle_failure(Side::Vector, err(), false, &mut warnings);
        assert_eq!(inline.err().map(|e| e.kind), Some(ErrorKind::Io));
        let dropped = settle_failure(Side::Lexical, Error::new(ErrorKind::IndexDropped, "index dropped"), true, &mut warnings);
        assert_eq!(dropped.err().map(|e| e.kind), Some(ErrorKind::IndexDropped));
        assert!(warnings.is_empty());
    }
}
