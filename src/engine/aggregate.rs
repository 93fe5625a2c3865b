//! AGGREGATE: ordered steps over the matching rows, optionally paged
//! through a cursor.

use std::sync::Arc;
use std::time::Duration;
use crate::core::error::{Error, ErrorKind, Result};
use crate::engine::args::ArgCursor;
use crate::engine::index::SearchIndex;
use crate::engine::reply::{QueryReply, ResultRow};
use crate::engine::search::{check_limit, parse_scorer, parse_sort_direction, prepare, QueryEnv, QueryOptions, Restrict};
use crate::expr;
use crate::pipeline::{
    ApplyProcessor, CursorPool, FilterProcessor, GroupProcessor, LoadSpec, PagerProcessor, Pipeline, PipelineBuilder,
    Processor, ReducerSpec, RootProcessor, Row, ScorerProcessor, SortBy, SortField, SorterProcessor,
};
use crate::scoring::ScorerKind;

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateStep {
    Load(LoadSpec),
    GroupBy { by: Vec<String>, reducers: Vec<ReducerSpec> },
    Apply { expr: String, alias: String },
    Filter(String),
    SortBy { fields: Vec<SortField>, max: Option<usize> },
    Limit { offset: usize, count: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorOptions {
    pub count: Option<usize>,
    pub max_idle_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    pub query: QueryOptions,
    pub steps: Vec<AggregateStep>,
    pub add_scores: bool,
    pub scorer: Option<ScorerKind>,
    pub cursor: Option<CursorOptions>,
}

/// `LOAD *` or `LOAD n path [AS name] …`.
fn parse_load(cursor: &mut ArgCursor<'_>) -> Result<LoadSpec> {
    if cursor.eat("*") {
        return Ok(LoadSpec::All);
    }
    let n = cursor.next_usize("LOAD")?;
    let mut fields = Vec::new();
    let mut taken = 0;
    while taken < n {
        let path = cursor.next_str("LOAD")?.trim_start_matches('@').to_string();
        taken += 1;
        let name = if taken < n && cursor.peek_is("AS") {
            cursor.eat("AS");
            taken += 2;
            cursor.next_str("AS")?
        } else {
            path.rsplit('.').next().unwrap_or(&path).to_string()
        };
        fields.push((path, name));
    }
    Ok(LoadSpec::Fields(fields))
}

/// `GROUPBY n @f… [REDUCE name nargs args… [AS alias]]…`
fn parse_group(cursor: &mut ArgCursor<'_>) -> Result<AggregateStep> {
    let by = cursor.next_counted("GROUPBY")?;
    let mut reducers = Vec::new();
    while cursor.eat("REDUCE") {
        let name = cursor.next_str("REDUCE")?;
        let args = cursor.next_counted("REDUCE")?;
        let alias = if cursor.eat("AS") { Some(cursor.next_str("AS")?) } else { None };
        reducers.push(ReducerSpec::new(&name, args, alias)?);
    }
    Ok(AggregateStep::GroupBy { by, reducers })
}

/// `SORTBY n @f [ASC|DESC] … [MAX m]`, where `n` counts every token.
fn parse_sort(cursor: &mut ArgCursor<'_>) -> Result<AggregateStep> {
    let n = cursor.next_usize("SORTBY")?;
    let mut fields = Vec::new();
    let mut taken = 0;
    while taken < n {
        let name = cursor.next_str("SORTBY")?.trim_start_matches('@').to_string();
        taken += 1;
        let mut ascending = true;
        if taken < n && (cursor.peek_is("ASC") || cursor.peek_is("DESC")) {
            ascending = parse_sort_direction(cursor);
            taken += 1;
        }
        fields.push(SortField { name, ascending });
    }
    let max = if cursor.eat("MAX") { Some(cursor.next_usize("MAX")?) } else { None };
    Ok(AggregateStep::SortBy { fields, max })
}

/// Consumes one pipeline step if present. Shared with HYBRID's tail.
pub(crate) fn parse_step(cursor: &mut ArgCursor<'_>) -> Result<Option<AggregateStep>> {
    let step = if cursor.eat("LOAD") {
        AggregateStep::Load(parse_load(cursor)?)
    } else if cursor.eat("GROUPBY") {
        parse_group(cursor)?
    } else if cursor.eat("APPLY") {
        let expr = cursor.next_str("APPLY")?;
        let alias = if cursor.eat("AS") { cursor.next_str("AS")? } else { expr.clone() };
        AggregateStep::Apply { expr, alias }
    } else if cursor.eat("FILTER") {
        AggregateStep::Filter(cursor.next_str("FILTER")?)
    } else if cursor.eat("SORTBY") {
        parse_sort(cursor)?
    } else if cursor.eat("LIMIT") {
        let offset = cursor.next_usize("LIMIT")?;
        let count = cursor.next_usize("LIMIT")?;
        AggregateStep::Limit { offset, count }
    } else {
        return Ok(None);
    };
    Ok(Some(step))
}

impl AggregateOptions {
    /// Parses everything after `AGGREGATE <index> <query>`.
    pub fn parse(cursor: &mut ArgCursor<'_>) -> Result<AggregateOptions> {
        let mut o = AggregateOptions::default();
        while !cursor.is_done() {
            if o.query.parse_one(cursor)? {
                continue;
            }
            if let Some(step) = parse_step(cursor)? {
                o.steps.push(step);
            } else if cursor.eat("ADDSCORES") {
                o.add_scores = true;
            } else if cursor.eat("SCORER") {
                o.scorer = Some(parse_scorer(cursor)?);
            } else if cursor.eat("WITHCURSOR") {
                let mut c = CursorOptions::default();
                loop {
                    if cursor.eat("COUNT") {
                        c.count = Some(cursor.next_usize("COUNT")?);
                    } else if cursor.eat("MAXIDLE") {
                        c.max_idle_ms = Some(cursor.next_u64("MAXIDLE")?);
                    } else {
                        break;
                    }
                }
                o.cursor = Some(c);
            } else {
                return Err(cursor.unrecognized());
            }
        }
        o.query.check_sorting(o.steps.iter().any(|s| matches!(s, AggregateStep::SortBy { .. })))?;
        Ok(o)
    }
}

/// Appends the steps in order. A SORTBY directly followed by LIMIT keeps
/// only `offset + count` rows in its heap.
pub(crate) fn append_steps(
    env: &QueryEnv<'_>,
    mut b: PipelineBuilder,
    steps: &[AggregateStep],
) -> Result<PipelineBuilder> {
    let cap = env.config.aggregate_cap();
    let mut i = 0;
    while i < steps.len() {
        match &steps[i] {
            AggregateStep::Load(spec) => {
                let spec = spec.clone();
                b = b.then(|p| env.loader(p, spec));
            }
            AggregateStep::GroupBy { by, reducers } => {
                let (by, reducers) = (by.clone(), reducers.clone());
                b = b.then(|p| Box::new(GroupProcessor::new(p, by, reducers)));
            }
            AggregateStep::Apply { expr: source, alias } => {
                let e = expr::parse(source)?;
                let alias = alias.clone();
                b = b.then(|p| Box::new(ApplyProcessor::new(p, e, alias)));
            }
            AggregateStep::Filter(source) => {
                let e = expr::parse(source)?;
                b = b.then(|p| Box::new(FilterProcessor::new(p, e)));
            }
            AggregateStep::SortBy { fields, max } => {
                let by = SortBy::Fields(fields.clone());
                if let Some(AggregateStep::Limit { offset, count }) = steps.get(i + 1) {
                    check_limit(*offset, *count, cap)?;
                    let window = max.map_or(offset + count, |m| m.min(offset + count));
                    let (offset, count) = (*offset, *count);
                    b = b.then(|p| Box::new(SorterProcessor::new(p, by, Some(window), false)));
                    b = b.then(|p| Box::new(PagerProcessor::new(p, offset, count)));
                    i += 1;
                } else {
                    let limit = *max;
                    b = b.then(|p| Box::new(SorterProcessor::new(p, by, limit, false)));
                }
            }
            AggregateStep::Limit { offset, count } => {
                check_limit(*offset, *count, cap)?;
                let (offset, count) = (*offset, *count);
                b = b.then(|p| Box::new(PagerProcessor::new(p, offset, count)));
            }
        }
        i += 1;
    }
    Ok(b)
}

pub(crate) fn build(env: &QueryEnv<'_>, index: &Arc<SearchIndex>, query: &str, opts: &AggregateOptions) -> Result<Pipeline> {
    if opts.cursor.as_ref().is_some_and(|c| c.count == Some(0)) {
        return Err(Error::new(ErrorKind::BadParameter, "WITHCURSOR COUNT must be positive"));
    }
    let prepared = prepare(env, index, query, &opts.query, Restrict::default())?;
    let plan = prepared.plan;
    let root: Processor = Box::new(RootProcessor::new(plan.root, index.clone(), plan.distance_alias.clone()));
    let mut b = PipelineBuilder::new(root);
    if opts.add_scores || opts.scorer.is_some() {
        let scorer = opts.scorer.unwrap_or_else(|| env.default_scorer());
        let stats = prepared.stats;
        b = b.then(|p| Box::new(ScorerProcessor::new(p, scorer.build(), stats, false)));
    }
    if opts.add_scores {
        // Materialized before any GROUPBY, and kept by parked cursors
        let e = expr::parse("@__score")?;
        b = b.then(|p| Box::new(ApplyProcessor::new(p, e, "__score".to_string())));
    }
    let b = append_steps(env, b, &opts.steps)?;
    Ok(b.build(prepared.ctx))
}

pub(crate) fn aggregate_row(row: Row) -> ResultRow {
    ResultRow { fields: row.fields, ..Default::default() }
}

/// Runs AGGREGATE. With WITHCURSOR the chain is parked in the pool and
/// the first batch is returned.
pub(crate) fn run(
    env: &QueryEnv<'_>,
    index: &Arc<SearchIndex>,
    query: &str,
    opts: &AggregateOptions,
    cursors: &CursorPool,
) -> Result<QueryReply> {
    let mut pipeline = build(env, index, query, opts)?;
    let Some(c) = &opts.cursor else {
        let rows = pipeline.read(None)?;
        return Ok(QueryReply {
            total: pipeline.ctx.total,
            rows: rows.into_iter().map(aggregate_row).collect(),
            warnings: pipeline.ctx.warnings.clone(),
            cursor: None,
        });
    };
    let count = c.count.unwrap_or(env.config.cursor_read_size);
    let max_idle = c.max_idle_ms.unwrap_or(env.config.cursor_max_idle_ms).min(env.config.cursor_max_idle_ms);
    let id = cursors.open(&index.name, pipeline, count, Duration::from_millis(max_idle))?;
    read_cursor(cursors, &index.name, id, None)
}

/// One READ on a parked cursor. The reply's cursor id is 0 once the chain
/// is exhausted, and the cursor is gone.
pub(crate) fn read_cursor(
    cursors: &CursorPool,
    index: &str,
    id: u64,
    count: Option<usize>,
) -> Result<QueryReply> {
    let mut c = cursors.take(index, id)?;
    let n = count.unwrap_or(c.count).max(1);
    let rows = match c.pipeline.read(Some(n)) {
        Ok(rows) => rows,
        Err(e) => {
            cursors.finish(id);
            return Err(e);
        }
    };
    let total = c.pipeline.ctx.total;
    let warnings = c.pipeline.ctx.warnings.clone();
    let next = if c.pipeline.is_done() {
        cursors.finish(id);
        0
    } else {
        cursors.release(c);
        id
    };
    Ok(QueryReply {
        total,
        rows: rows.into_iter().map(aggregate_row).collect(),
        warnings,
        cursor: Some(next),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::to_args;

    fn parse(args: &[&str]) -> Result<AggregateOptions> {
        let args = to_args(args);
        let mut cursor = ArgCursor::new(&args);
        AggregateOptions::parse(&mut cursor)
    }

    #[test]
    fn test_parse_steps_in_order() {
        let o = parse(&[
            "LOAD", "3", "@title", "AS", "t", "GROUPBY", "1", "@brand", "REDUCE", "COUNT", "0", "AS", "n",
            "APPLY", "@n * 2", "AS", "n2", "FILTER", "@n2 > 2", "SORTBY", "2", "@n2", "DESC", "MAX", "5",
            "LIMIT", "0", "3", "WITHCURSOR", "COUNT", "2", "TIMEOUT", "10",
        ])
        .unwrap();
        assert_eq!(o.steps.len(), 6);
        assert_eq!(o.steps[0], AggregateStep::Load(LoadSpec::Fields(vec![("title".into(), "t".into())])));
        assert!(matches!(&o.steps[1], AggregateStep::GroupBy { by, reducers } if by == &["@brand"] && reducers[0].alias == "n"));
        assert_eq!(
            o.steps[4],
            AggregateStep::SortBy { fields: vec![SortField { name: "n2".into(), ascending: false }], max: Some(5) }
        );
        assert_eq!(o.steps[5], AggregateStep::Limit { offset: 0, count: 3 });
        assert_eq!(o.cursor, Some(CursorOptions { count: Some(2), max_idle_ms: None }));
        assert_eq!(o.query.timeout_ms, Some(10));
    }

    #[test]
    fn test_load_star_and_generated_alias() {
        let o = parse(&["LOAD", "*", "GROUPBY", "0", "REDUCE", "SUM", "1", "@price"]).unwrap();
        assert_eq!(o.steps[0], AggregateStep::Load(LoadSpec::All));
        match &o.steps[1] {
            AggregateStep::GroupBy { reducers, .. } => assert_eq!(reducers[0].alias, "__generated_aliassumprice"),
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_unknown_reducer_rejected() {
        let err = parse(&["GROUPBY", "1", "@a", "REDUCE", "NOPE", "0"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_nosort_excludes_sortby_step() {
        assert!(parse(&["NOSORT", "LOAD", "1", "@n"]).unwrap().query.no_sort);
        let both = parse(&["SORTBY", "2", "@n", "ASC", "NOSORT"]);
        assert_eq!(both.err().map(|e| e.kind), Some(ErrorKind::BadParameter));
    }
}
