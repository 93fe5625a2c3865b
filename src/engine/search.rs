//! SEARCH: option parsing, the query preparation shared with AGGREGATE,
//! and the result chain a search runs through.

use std::sync::Arc;
use rust_stemmers::Algorithm;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::analysis::language::Language;
use crate::core::config::{Config, MtMode};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::FieldMask;
use crate::engine::args::ArgCursor;
use crate::engine::index::SearchIndex;
use crate::engine::reply::{QueryReply, ResultRow};
use crate::host::HostStore;
use crate::pipeline::{
    ExecCtx, HighlightProcessor, HighlightSpec, LoadSpec, LoaderProcessor, PagerProcessor, Pipeline,
    PipelineBuilder, Processor, RootProcessor, Row, ScorerProcessor, SortBy, SortField, SorterProcessor,
    SummarizeProcessor, SummarizeSpec,
};
use crate::query::cache::AstCache;
use crate::query::{resolve_params, Node, Params, Plan, PlanOptions, Planner};
use crate::scoring::{ScorerKind, ScoringStats};

/// Rows fetched from the host store per loader batch.
pub(crate) const LOAD_BATCH: usize = 64;

/// Engine services a query reads while it runs.
pub(crate) struct QueryEnv<'a> {
    pub config: &'a Config,
    pub analyzers: &'a AnalyzerRegistry,
    pub ast_cache: &'a AstCache,
    pub store: &'a Arc<dyn HostStore>,
}

impl QueryEnv<'_> {
    pub(crate) fn loader(&self, upstream: Processor, spec: LoadSpec) -> Processor {
        let parallel = self.config.mt_mode == MtMode::Full;
        Box::new(LoaderProcessor::new(upstream, self.store.clone(), spec, LOAD_BATCH, parallel))
    }

    pub(crate) fn default_scorer(&self) -> ScorerKind {
        ScorerKind::from_name(&self.config.default_scorer).unwrap_or(ScorerKind::Bm25Std)
    }
}

/// Clauses every query command accepts.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub dialect: Option<u32>,
    pub params: Params,
    pub timeout_ms: Option<u64>,
    pub verbatim: bool,
    /// Rows keep the order they were produced in.
    pub no_sort: bool,
    /// Debug hook: report a timeout once this many results were produced.
    pub timeout_after: Option<u64>,
}

impl QueryOptions {
    /// Consumes one shared clause if present.
    pub(crate) fn parse_one(&mut self, cursor: &mut ArgCursor<'_>) -> Result<bool> {
        if cursor.eat("DIALECT") {
            self.dialect = Some(cursor.next_u64("DIALECT")? as u32);
        } else if cursor.eat("TIMEOUT") {
            self.timeout_ms = Some(cursor.next_u64("TIMEOUT")?);
        } else if cursor.eat("VERBATIM") {
            self.verbatim = true;
        } else if cursor.eat("NOSORT") {
            self.no_sort = true;
        } else if cursor.eat("PARAMS") {
            let items = cursor.next_counted_bytes("PARAMS")?;
            if items.len() % 2 != 0 {
                return Err(Error::new(ErrorKind::BadParameter, "PARAMS expects name/value pairs"));
            }
            for pair in items.chunks(2) {
                let name = String::from_utf8_lossy(pair[0]).into_owned();
                self.params.insert(name, pair[1].to_vec());
            }
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// NOSORT and an explicit SORTBY cannot both be given.
    pub(crate) fn check_sorting(&self, sort_by: bool) -> Result<()> {
        if self.no_sort && sort_by {
            return Err(Error::new(ErrorKind::BadParameter, "SORTBY and NOSORT are mutually exclusive"));
        }
        Ok(())
    }

    pub(crate) fn dialect(&self, config: &Config) -> Result<u32> {
        let d = self.dialect.unwrap_or(config.default_dialect);
        if d == 0 || d > config.max_dialect {
            return Err(Error::new(
                ErrorKind::UnsupportedDialect,
                format!("DIALECT requires a value between 1 and {}", config.max_dialect),
            ));
        }
        Ok(d)
    }
}

/// Parses through the AST cache and binds parameters.
pub(crate) fn bind(env: &QueryEnv<'_>, query: &str, opts: &QueryOptions) -> Result<Node> {
    let dialect = opts.dialect(env.config)?;
    let ast = env.ast_cache.parse(query, dialect)?;
    let mut node = Node::clone(&ast);
    resolve_params(&mut node, &opts.params)?;
    Ok(node)
}

/// SEARCH-only restrictions on what the query may match.
#[derive(Debug, Clone, Default)]
pub(crate) struct Restrict<'a> {
    pub in_keys: Option<&'a [String]>,
    pub in_fields: Option<&'a [String]>,
    pub language: Option<Language>,
    pub slop: Option<i32>,
    pub in_order: bool,
}

pub(crate) struct Prepared {
    pub plan: Plan,
    pub stats: ScoringStats,
    pub language: Language,
    pub ctx: ExecCtx,
}

/// Parses, binds and plans a query against one index.
pub(crate) fn prepare(
    env: &QueryEnv<'_>,
    index: &Arc<SearchIndex>,
    query: &str,
    opts: &QueryOptions,
    restrict: Restrict<'_>,
) -> Result<Prepared> {
    let mut node = bind(env, query, opts)?;
    if node.attrs.slop.is_none() {
        node.attrs.slop = restrict.slop;
    }
    if restrict.in_order && node.attrs.inorder.is_none() {
        node.attrs.inorder = Some(true);
    }
    index.touch();
    let deadline = index.deadline(opts.timeout_ms.unwrap_or(env.config.timeout_ms), opts.timeout_after);
    let (plan, stats, language) = {
        let data = index.data.read();
        let in_keys = restrict
            .in_keys
            .map(|keys| keys.iter().filter_map(|k| data.docs.lookup(k)).collect());
        let in_fields = match restrict.in_fields {
            Some(fields) => {
                let mut mask: FieldMask = 0;
                for f in fields {
                    mask |= data.definition.schema.mask_for(f).ok_or_else(|| {
                        Error::new(ErrorKind::FieldNotFound, format!("INFIELDS: unknown TEXT field `{}`", f))
                    })?;
                }
                Some(mask)
            }
            None => None,
        };
        let plan_opts = PlanOptions {
            verbatim: opts.verbatim,
            language: restrict.language,
            in_keys,
            in_fields,
            hybrid_search: false,
        };
        let plan = Planner::new(&data, env.config, env.analyzers, deadline.clone(), &plan_opts).plan(&node)?;
        let language = restrict.language.unwrap_or(data.definition.rule.language);
        (plan, data.scoring_stats(env.config), language)
    };
    let mut ctx = ExecCtx::new(deadline, env.config.on_timeout);
    ctx.warnings.extend(&plan.warnings);
    Ok(Prepared { plan, stats, language, ctx })
}

/// `LIMIT offset count` against MAXSEARCHRESULTS or MAXAGGREGATERESULTS.
pub(crate) fn check_limit(offset: usize, count: usize, cap: Option<usize>) -> Result<()> {
    match cap {
        Some(max) if offset.saturating_add(count) > max => Err(Error::new(
            ErrorKind::LimitExceedsMax,
            format!("LIMIT exceeds maximum of {}", max),
        )),
        _ => Ok(()),
    }
}

pub(crate) fn parse_sort_direction(cursor: &mut ArgCursor<'_>) -> bool {
    if cursor.eat("DESC") {
        false
    } else {
        cursor.eat("ASC");
        true
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query: QueryOptions,
    pub no_content: bool,
    pub with_scores: bool,
    pub with_payloads: bool,
    pub explain_score: bool,
    pub in_keys: Option<Vec<String>>,
    pub in_fields: Option<Vec<String>>,
    /// (selector path, reply name) pairs.
    pub return_fields: Option<Vec<(String, String)>>,
    pub highlight: Option<HighlightSpec>,
    pub summarize: Option<SummarizeSpec>,
    pub slop: Option<i32>,
    pub in_order: bool,
    pub language: Option<Language>,
    pub scorer: Option<ScorerKind>,
    pub sort_by: Option<SortField>,
    pub offset: usize,
    pub count: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            query: QueryOptions::default(),
            no_content: false,
            with_scores: false,
            with_payloads: false,
            explain_score: false,
            in_keys: None,
            in_fields: None,
            return_fields: None,
            highlight: None,
            summarize: None,
            slop: None,
            in_order: false,
            language: None,
            scorer: None,
            sort_by: None,
            offset: 0,
            count: 10,
        }
    }
}

fn parse_fields_clause(cursor: &mut ArgCursor<'_>) -> Result<Option<Vec<String>>> {
    if cursor.eat("FIELDS") {
        Ok(Some(cursor.next_counted("FIELDS")?))
    } else {
        Ok(None)
    }
}

pub(crate) fn parse_scorer(cursor: &mut ArgCursor<'_>) -> Result<ScorerKind> {
    let name = cursor.next_str("SCORER")?;
    ScorerKind::from_name(&name)
        .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("Unknown scorer `{}`", name)))
}

impl SearchOptions {
    /// Parses everything after `SEARCH <index> <query>`.
    pub fn parse(cursor: &mut ArgCursor<'_>) -> Result<SearchOptions> {
        let mut o = SearchOptions::default();
        while !cursor.is_done() {
            if o.query.parse_one(cursor)? {
                continue;
            }
            if cursor.eat("NOCONTENT") {
                o.no_content = true;
            } else if cursor.eat("WITHSCORES") {
                o.with_scores = true;
            } else if cursor.eat("WITHPAYLOADS") {
                o.with_payloads = true;
            } else if cursor.eat("EXPLAINSCORE") {
                o.explain_score = true;
            } else if cursor.eat("INORDER") {
                o.in_order = true;
            } else if cursor.eat("INKEYS") {
                o.in_keys = Some(cursor.next_counted("INKEYS")?);
            } else if cursor.eat("INFIELDS") {
                o.in_fields = Some(cursor.next_counted("INFIELDS")?);
            } else if cursor.eat("RETURN") {
                o.return_fields = Some(parse_return(cursor)?);
            } else if cursor.eat("SUMMARIZE") {
                let mut spec = SummarizeSpec::default();
                loop {
                    if let Some(fields) = parse_fields_clause(cursor)? {
                        spec.fields = Some(fields);
                    } else if cursor.eat("FRAGS") {
                        spec.frags = cursor.next_usize("FRAGS")?;
                    } else if cursor.eat("LEN") {
                        spec.len = cursor.next_usize("LEN")?;
                    } else if cursor.eat("SEPARATOR") {
                        spec.separator = cursor.next_str("SEPARATOR")?;
                    } else {
                        break;
                    }
                }
                o.summarize = Some(spec);
            } else if cursor.eat("HIGHLIGHT") {
                let mut spec = HighlightSpec::default();
                loop {
                    if let Some(fields) = parse_fields_clause(cursor)? {
                        spec.fields = Some(fields);
                    } else if cursor.eat("TAGS") {
                        spec.open = cursor.next_str("TAGS")?;
                        spec.close = cursor.next_str("TAGS")?;
                    } else {
                        break;
                    }
                }
                o.highlight = Some(spec);
            } else if cursor.eat("SLOP") {
                o.slop = Some(cursor.next_i64("SLOP")? as i32);
            } else if cursor.eat("LANGUAGE") {
                o.language = Some(Language::parse(&cursor.next_str("LANGUAGE")?)?);
            } else if cursor.eat("SCORER") {
                o.scorer = Some(parse_scorer(cursor)?);
            } else if cursor.eat("SORTBY") {
                let name = cursor.next_str("SORTBY")?;
                let ascending = parse_sort_direction(cursor);
                o.sort_by = Some(SortField { name: name.trim_start_matches('@').to_string(), ascending });
            } else if cursor.eat("LIMIT") {
                o.offset = cursor.next_usize("LIMIT")?;
                o.count = cursor.next_usize("LIMIT")?;
            } else {
                return Err(cursor.unrecognized());
            }
        }
        o.query.check_sorting(o.sort_by.is_some())?;
        Ok(o)
    }
}

/// `RETURN n path [AS name] …`, where `n` counts every token.
fn parse_return(cursor: &mut ArgCursor<'_>) -> Result<Vec<(String, String)>> {
    let n = cursor.next_usize("RETURN")?;
    let mut out = Vec::new();
    let mut taken = 0;
    while taken < n {
        let path = cursor.next_str("RETURN")?;
        taken += 1;
        let mut name = path.trim_start_matches('@').to_string();
        if taken < n && cursor.peek_is("AS") {
            cursor.eat("AS");
            name = cursor.next_str("AS")?;
            taken += 2;
        }
        out.push((path.trim_start_matches('@').to_string(), name));
    }
    Ok(out)
}

/// How the sorter orders rows and whether a sort field must be loaded
/// first.
fn sort_plan(index: &SearchIndex, opts: &SearchOptions, plan: &Plan) -> Result<(SortBy, Option<(String, String)>)> {
    if let Some(f) = &opts.sort_by {
        if plan.distance_alias.as_deref() == Some(f.name.as_str()) {
            return Ok((SortBy::Fields(vec![f.clone()]), None));
        }
        let data = index.data.read();
        let spec = data.definition.schema.field(&f.name).ok_or_else(|| {
            Error::new(ErrorKind::FieldNotFound, format!("Property `{}` not loaded nor in schema", f.name))
        })?;
        let load = (!spec.is_sortable()).then(|| (spec.path.clone(), spec.name.clone()));
        return Ok((SortBy::Fields(vec![f.clone()]), load));
    }
    match (&plan.knn, &plan.distance_alias) {
        (Some(_), Some(alias)) => Ok((SortBy::Fields(vec![SortField { name: alias.clone(), ascending: true }]), None)),
        _ => Ok((SortBy::Score, None)),
    }
}

pub(crate) fn build(env: &QueryEnv<'_>, index: &Arc<SearchIndex>, query: &str, opts: &SearchOptions) -> Result<Pipeline> {
    check_limit(opts.offset, opts.count, env.config.search_cap())?;
    let restrict = Restrict {
        in_keys: opts.in_keys.as_deref(),
        in_fields: opts.in_fields.as_deref(),
        language: opts.language,
        slop: opts.slop,
        in_order: opts.in_order,
    };
    let Prepared { plan, stats, language, ctx } = prepare(env, index, query, &opts.query, restrict)?;
    let (sort_by, sort_load) = sort_plan(index, opts, &plan)?;
    let is_knn = plan.knn.is_some();
    let scorer = opts.scorer.unwrap_or_else(|| env.default_scorer());

    let root: Processor = Box::new(RootProcessor::new(plan.root, index.clone(), plan.distance_alias.clone()));
    let mut b = PipelineBuilder::new(root);
    if !is_knn {
        b = b.then(|p| Box::new(ScorerProcessor::new(p, scorer.build(), stats, opts.explain_score)));
    }
    if let Some(field) = sort_load {
        b = b.then(|p| env.loader(p, LoadSpec::Fields(vec![field])));
    }
    if opts.query.no_sort {
        // Rows leave in match order; the pager still counts every match
        b = b.then(|p| Box::new(PagerProcessor::counting(p, opts.offset, opts.count)));
    } else {
        let window = opts.offset + opts.count;
        let normalize = !is_knn && scorer.normalizes_results();
        b = b.then(|p| Box::new(SorterProcessor::new(p, sort_by, Some(window), normalize)));
        if opts.count > 0 {
            b = b.then(|p| Box::new(PagerProcessor::new(p, opts.offset, opts.count)));
        }
    }
    let load = match &opts.return_fields {
        _ if opts.no_content => None,
        Some(fields) if fields.is_empty() => None,
        Some(fields) => Some(LoadSpec::Fields(fields.clone())),
        None => Some(LoadSpec::All),
    };
    if let Some(spec) = load {
        b = b.then(|p| env.loader(p, spec));
        let algorithm = language.stemmer().unwrap_or(Algorithm::English);
        // Fragments are cut from the raw text, then marked up
        if let Some(spec) = &opts.summarize {
            b = b.then(|p| Box::new(SummarizeProcessor::new(p, spec.clone(), algorithm)));
        }
        if let Some(spec) = &opts.highlight {
            b = b.then(|p| Box::new(HighlightProcessor::new(p, spec.clone(), algorithm)));
        }
    }
    Ok(b.build(ctx))
}

fn result_row(row: Row, opts: &SearchOptions) -> ResultRow {
    ResultRow {
        key: row.key,
        score: opts.with_scores.then_some(row.score),
        payload: if opts.with_payloads { row.meta.payload } else { None },
        explain: row.explain,
        fields: if opts.no_content { Vec::new() } else { row.fields },
    }
}

/// Runs SEARCH to completion.
pub(crate) fn run(env: &QueryEnv<'_>, index: &Arc<SearchIndex>, query: &str, opts: &SearchOptions) -> Result<QueryReply> {
    let mut pipeline = build(env, index, query, opts)?;
    let rows = pipeline.read(None)?;
    let rows = rows
        .into_iter()
        .filter(|r| !r.missing)
        .map(|r| result_row(r, opts))
        .collect();
    Ok(QueryReply { total: pipeline.ctx.total, rows, warnings: pipeline.ctx.warnings.clone(), cursor: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::to_args;

    fn parse(args: &[&str]) -> Result<SearchOptions> {
        let args = to_args(args);
        let mut cursor = ArgCursor::new(&args);
        SearchOptions::parse(&mut cursor)
    }

    #[test]
    fn test_parse_search_options() {
        let o = parse(&[
            "RETURN", "3", "title", "AS", "t", "WITHSCORES", "SORTBY", "@price", "DESC", "LIMIT", "5", "20",
            "PARAMS", "2", "q", "hello", "DIALECT", "3", "HIGHLIGHT", "TAGS", "[", "]",
        ])
        .unwrap();
        assert_eq!(o.return_fields, Some(vec![("title".into(), "t".into())]));
        assert!(o.with_scores);
        assert_eq!(o.sort_by, Some(SortField { name: "price".into(), ascending: false }));
        assert_eq!((o.offset, o.count), (5, 20));
        assert_eq!(o.query.params.get("q").map(Vec::as_slice), Some(&b"hello"[..]));
        assert_eq!(o.query.dialect, Some(3));
        assert_eq!(o.highlight.unwrap().open, "[");
    }

    #[test]
    fn test_parse_rejects_unknown_and_odd_params() {
        assert_eq!(parse(&["BOGUS"]).err().map(|e| e.kind), Some(ErrorKind::ArgUnrecognized));
        assert_eq!(parse(&["PARAMS", "1", "q"]).err().map(|e| e.kind), Some(ErrorKind::BadParameter));
        assert_eq!(parse(&["SCORER", "NOPE"]).err().map(|e| e.kind), Some(ErrorKind::BadParameter));
    }

    #[test]
    fn test_return_without_alias() {
        let o = parse(&["RETURN", "2", "a", "@b", "NOCONTENT"]).unwrap();
        assert_eq!(o.return_fields, Some(vec![("a".into(), "a".into()), ("b".into(), "b".into())]));
        assert!(o.no_content);
    }

    #[test]
    fn test_limit_cap_and_dialect_range() {
        assert!(check_limit(0, 10, Some(10)).is_ok());
        assert_eq!(check_limit(5, 10, Some(10)).err().map(|e| e.kind), Some(ErrorKind::LimitExceedsMax));
        assert!(check_limit(usize::MAX, 10, None).is_ok());

        let config = Config::default();
        let opts = QueryOptions { dialect: Some(9), ..Default::default() };
        assert_eq!(opts.dialect(&config).err().map(|e| e.kind), Some(ErrorKind::UnsupportedDialect));
        assert_eq!(QueryOptions::default().dialect(&config).unwrap(), config.default_dialect);
    }

    #[test]
    fn test_nosort_excludes_sortby() {
        let o = parse(&["NOSORT", "LIMIT", "0", "5"]).unwrap();
        assert!(o.query.no_sort);
        let both = parse(&["SORTBY", "n", "NOSORT"]);
        assert_eq!(both.err().map(|e| e.kind), Some(ErrorKind::BadParameter));
    }
}
