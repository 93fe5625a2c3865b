//! HYBRID command: argument parsing, binding, and the tail chain over the
//! fused rows.

use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::engine::aggregate::{append_steps, parse_step, AggregateStep};
use crate::engine::args::ArgCursor;
use crate::engine::index::SearchIndex;
use crate::engine::reply::{QueryReply, ResultRow};
use crate::engine::search::{bind, parse_scorer, QueryEnv, QueryOptions};
use crate::hybrid::{self, Combine, FusedProcessor, HybridRequest, VsimMode, VsimSpec};
use crate::pipeline::{ExecCtx, PipelineBuilder};
use crate::scoring::ScorerKind;

/// Rows returned when the request names no LIMIT.
const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct HybridOptions {
    pub query: QueryOptions,
    pub search: String,
    pub scorer: Option<ScorerKind>,
    pub field: String,
    /// Raw vector bytes, or `$name` bound through PARAMS.
    pub blob: Vec<u8>,
    pub mode: VsimMode,
    /// Text query restricting the vector half.
    pub filter: Option<String>,
    pub vsim_yield: Option<String>,
    pub combine: Option<Combine>,
    pub yield_score_as: Option<String>,
    pub steps: Vec<AggregateStep>,
}

/// `n key value …` blocks of KNN, RANGE and COMBINE.
fn parse_pairs(cursor: &mut ArgCursor<'_>, what: &str) -> Result<Vec<(String, String)>> {
    let n = cursor.next_usize(what)?;
    if n % 2 != 0 {
        return Err(Error::new(ErrorKind::BadParameter, format!("{} expects name/value pairs", what)));
    }
    let mut out = Vec::with_capacity(n / 2);
    for _ in 0..n / 2 {
        let key = cursor.next_str(what)?.to_ascii_uppercase();
        out.push((key, cursor.next_str(what)?));
    }
    Ok(out)
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::new(ErrorKind::BadParameter, format!("invalid {} `{}`", key, value)))
}

fn unknown(what: &str, key: &str) -> Error {
    Error::new(ErrorKind::ArgUnrecognized, format!("Unknown {} argument `{}`", what, key))
}

fn parse_vsim_mode(cursor: &mut ArgCursor<'_>, vsim_yield: &mut Option<String>) -> Result<VsimMode> {
    if cursor.eat("KNN") {
        let mut k = None;
        let mut ef_runtime = None;
        for (key, value) in parse_pairs(cursor, "KNN")? {
            match key.as_str() {
                "K" => k = Some(number::<usize>(&key, &value)?),
                "EF_RUNTIME" => ef_runtime = Some(number::<usize>(&key, &value)?),
                "YIELD_SCORE_AS" => *vsim_yield = Some(value),
                _ => return Err(unknown("KNN", &key)),
            }
        }
        let k = k.ok_or_else(|| Error::new(ErrorKind::BadParameter, "KNN requires K"))?;
        return Ok(VsimMode::Knn { k, ef_runtime });
    }
    if cursor.eat("RANGE") {
        let mut radius = None;
        let mut epsilon = None;
        for (key, value) in parse_pairs(cursor, "RANGE")? {
            match key.as_str() {
                "RADIUS" => radius = Some(number::<f64>(&key, &value)?),
                "EPSILON" => epsilon = Some(number::<f64>(&key, &value)?),
                "YIELD_SCORE_AS" => *vsim_yield = Some(value),
                _ => return Err(unknown("RANGE", &key)),
            }
        }
        let radius = radius.ok_or_else(|| Error::new(ErrorKind::BadParameter, "RANGE requires RADIUS"))?;
        return Ok(VsimMode::Range { radius, epsilon });
    }
    Ok(VsimMode::Knn { k: 10, ef_runtime: None })
}

fn parse_combine(cursor: &mut ArgCursor<'_>, rrf_constant: f64) -> Result<Combine> {
    if cursor.eat("RRF") {
        let mut constant = rrf_constant;
        let mut window = None;
        for (key, value) in parse_pairs(cursor, "RRF")? {
            match key.as_str() {
                "CONSTANT" => constant = number::<f64>(&key, &value)?,
                "WINDOW" => window = Some(number::<usize>(&key, &value)?),
                _ => return Err(unknown("RRF", &key)),
            }
        }
        return Ok(Combine::Rrf { window, constant });
    }
    if cursor.eat("LINEAR") {
        let (mut alpha, mut beta, mut window) = (None, None, None);
        for (key, value) in parse_pairs(cursor, "LINEAR")? {
            match key.as_str() {
                "ALPHA" => alpha = Some(number::<f64>(&key, &value)?),
                "BETA" => beta = Some(number::<f64>(&key, &value)?),
                "WINDOW" => window = Some(number::<usize>(&key, &value)?),
                _ => return Err(unknown("LINEAR", &key)),
            }
        }
        return match (alpha, beta) {
            (Some(alpha), Some(beta)) => Ok(Combine::Linear { alpha, beta, window }),
            _ => Err(Error::new(ErrorKind::BadParameter, "LINEAR requires ALPHA and BETA")),
        };
    }
    Err(cursor.unrecognized())
}

impl HybridOptions {
    /// Parses everything after `HYBRID <index>`.
    pub fn parse(cursor: &mut ArgCursor<'_>, rrf_constant: f64) -> Result<HybridOptions> {
        cursor.expect("SEARCH")?;
        let search = cursor.next_str("SEARCH")?;
        let scorer = if cursor.eat("SCORER") { Some(parse_scorer(cursor)?) } else { None };
        cursor.expect("VSIM")?;
        let field = cursor.next_str("VSIM")?.trim_start_matches('@').to_string();
        let blob = cursor.next_bytes("VSIM")?.to_vec();
        let mut vsim_yield = None;
        let mode = parse_vsim_mode(cursor, &mut vsim_yield)?;
        let filter = if cursor.eat("FILTER") { Some(cursor.next_str("FILTER")?) } else { None };

        let mut o = HybridOptions {
            query: QueryOptions::default(),
            search,
            scorer,
            field,
            blob,
            mode,
            filter,
            vsim_yield,
            combine: None,
            yield_score_as: None,
            steps: Vec::new(),
        };
        while !cursor.is_done() {
            if o.query.parse_one(cursor)? {
                continue;
            }
            if cursor.eat("COMBINE") {
                o.combine = Some(parse_combine(cursor, rrf_constant)?);
            } else if cursor.eat("YIELD_SCORE_AS") {
                o.yield_score_as = Some(cursor.next_str("YIELD_SCORE_AS")?);
            } else if let Some(step) = parse_step(cursor)? {
                o.steps.push(step);
            } else {
                return Err(cursor.unrecognized());
            }
        }
        o.query.check_sorting(o.steps.iter().any(|s| matches!(s, AggregateStep::SortBy { .. })))?;
        Ok(o)
    }

    fn blob(&self) -> Result<Vec<u8>> {
        match self.blob.strip_prefix(b"$") {
            Some(name) => {
                let name = String::from_utf8_lossy(name);
                self.query
                    .params
                    .get(name.as_ref())
                    .cloned()
                    .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("No such parameter `{}`", name)))
            }
            None => Ok(self.blob.clone()),
        }
    }
}

pub(crate) fn run(env: &QueryEnv<'_>, index: &Arc<SearchIndex>, opts: &HybridOptions) -> Result<QueryReply> {
    let search = bind(env, &opts.search, &opts.query)?;
    let filter = opts.filter.as_deref().map(|f| bind(env, f, &opts.query)).transpose()?;
    let req = HybridRequest {
        search,
        scorer: opts.scorer.unwrap_or_else(|| env.default_scorer()),
        vsim: VsimSpec {
            field: opts.field.clone(),
            blob: opts.blob()?,
            mode: opts.mode.clone(),
            filter,
            yield_score_as: opts.vsim_yield.clone(),
        },
        combine: opts
            .combine
            .clone()
            .unwrap_or(Combine::Rrf { window: None, constant: env.config.hybrid_rrf_constant }),
        yield_score_as: opts.yield_score_as.clone(),
        verbatim: opts.query.verbatim,
        no_sort: opts.query.no_sort,
    };
    index.touch();
    let deadline = index.deadline(opts.query.timeout_ms.unwrap_or(env.config.timeout_ms), opts.query.timeout_after);
    let out = hybrid::execute(index, &req, env.config, env.analyzers, deadline)?;

    // The fused rows are already bounded; the tail only watches for a drop
    let mut ctx = ExecCtx::new(index.deadline(0, None), env.config.on_timeout);
    ctx.warnings.extend(&out.warnings);
    ctx.timed_out = out.timed_out;
    let mut steps = opts.steps.clone();
    if !steps.iter().any(|s| matches!(s, AggregateStep::Limit { .. })) {
        steps.push(AggregateStep::Limit { offset: 0, count: DEFAULT_LIMIT });
    }
    let b = PipelineBuilder::new(Box::new(FusedProcessor::new(out.rows)));
    let mut pipeline = append_steps(env, b, &steps)?.build(ctx);
    let rows = pipeline.read(None)?;
    Ok(QueryReply {
        total: pipeline.ctx.total,
        rows: rows
            .into_iter()
            .map(|r| ResultRow {
                score: r.key.is_some().then_some(r.score),
                key: r.key,
                fields: r.fields,
                ..Default::default()
            })
            .collect(),
        warnings: pipeline.ctx.warnings.clone(),
        cursor: None,
    })
}
