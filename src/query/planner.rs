use roaring::RoaringTreemap;
use rust_stemmers::Stemmer;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::analysis::filters::phonetic::PhoneticFilter;
use crate::analysis::filters::stemmer::StemmerFilter;
use crate::analysis::language::Language;
use crate::analysis::token::STEM_PREFIX;
use crate::core::config::Config;
use crate::core::deadline::Deadline;
use crate::core::error::{Error, ErrorKind, QueryWarning, Result, Warnings};
use crate::core::types::{parse_number, DocId, FieldMask, ALL_FIELDS};
use crate::engine::index::{FieldIndex, IndexData};
use crate::index::geo::{self, DistanceUnit};
use crate::index::geoshape::ShapePredicate;
use crate::index::inverted::PostingSnapshot;
use crate::index::numeric::{NumericFilter, NumericTree};
use crate::index::tag::EMPTY_TAG;
use crate::index::terms::Expansion;
use crate::iterators::{
    EmptyIterator, IdListIterator, IntersectIterator, NotIterator, OptionalIterator, PostingIterator,
    QueryIterator, UnionIterator, VectorIterator, VectorOrder, WildcardIterator,
};
use crate::query::ast::{Blob, KnnClause, MatchKind, Node, NodeKind, Operand, TagValue};
use crate::schema::{FieldFlags, FieldKind, EMPTY_TERM};
use crate::vector::distance::{parse_blob, Metric, VectorType};

type Iter = Box<dyn QueryIterator>;

/// Request-level switches that shape planning.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub verbatim: bool,
    pub language: Option<Language>,
    /// INKEYS, already resolved to ids.
    pub in_keys: Option<Vec<DocId>>,
    /// INFIELDS as a TEXT field mask.
    pub in_fields: Option<FieldMask>,
    /// Planning the SEARCH half of HYBRID: vector clauses are rejected.
    pub hybrid_search: bool,
}

/// Root KNN clause details the result chain needs.
#[derive(Debug, Clone)]
pub struct KnnPlan {
    pub field: String,
    pub k: usize,
    pub metric: Metric,
}

/// A planned query: the iterator tree plus what the result chain must know.
pub struct Plan {
    pub root: Iter,
    pub knn: Option<KnnPlan>,
    /// Row field that receives a vector distance.
    pub distance_alias: Option<String>,
    pub warnings: Warnings,
}

/// Attributes inherited down the tree.
#[derive(Debug, Clone, Copy)]
struct Scope {
    mask: FieldMask,
    weight: f64,
    phonetic: Option<bool>,
    verbatim: bool,
    slop: Option<i32>,
    inorder: Option<bool>,
}

/// Turns an AST into iterators over the index's posting snapshots. Runs
/// under the index read lock; the tree it returns owns its snapshots and
/// outlives the lock.
pub struct Planner<'a> {
    data: &'a IndexData,
    config: &'a Config,
    analyzers: &'a AnalyzerRegistry,
    deadline: Deadline,
    opts: &'a PlanOptions,
    warnings: Warnings,
    distance_alias: Option<String>,
}

impl<'a> Planner<'a> {
    pub fn new(
        data: &'a IndexData,
        config: &'a Config,
        analyzers: &'a AnalyzerRegistry,
        deadline: Deadline,
        opts: &'a PlanOptions,
    ) -> Self {
        Planner { data, config, analyzers, deadline, opts, warnings: Warnings::new(), distance_alias: None }
    }

    pub fn plan(mut self, node: &Node) -> Result<Plan> {
        let scope = Scope {
            mask: self.opts.in_fields.unwrap_or(ALL_FIELDS),
            weight: 1.0,
            phonetic: None,
            verbatim: self.opts.verbatim,
            slop: None,
            inorder: None,
        };
        let (root, knn) = match &node.kind {
            NodeKind::VectorKnn { base, knn } => {
                if self.opts.hybrid_search {
                    return Err(vector_in_hybrid());
                }
                let (iter, plan) = self.plan_knn(base, knn, node, scope)?;
                (iter, Some(plan))
            }
            _ => {
                let iter = self.build(node, scope)?.unwrap_or_else(|| Box::new(EmptyIterator));
                let iter = match &self.opts.in_keys {
                    Some(keys) => Box::new(IntersectIterator::new(
                        vec![iter, Box::new(IdListIterator::new(keys.clone()))],
                        None,
                        false,
                    )) as Iter,
                    None => iter,
                };
                (iter, None)
            }
        };
        Ok(Plan { root, knn, distance_alias: self.distance_alias, warnings: self.warnings })
    }

    fn scope_for(&self, node: &Node, parent: Scope) -> Scope {
        let a = &node.attrs;
        Scope {
            mask: parent.mask,
            weight: parent.weight * a.weight,
            phonetic: a.phonetic.or(parent.phonetic),
            verbatim: parent.verbatim || a.verbatim,
            slop: a.slop.or(parent.slop),
            inorder: a.inorder.or(parent.inorder),
        }
    }

    /// `None` means the node drops out of its parent (a stopword).
    fn build(&mut self, node: &Node, parent: Scope) -> Result<Option<Iter>> {
        let scope = self.scope_for(node, parent);
        let iter: Iter = match &node.kind {
            NodeKind::Wildcard => self.wildcard(),
            NodeKind::Empty => Box::new(EmptyIterator),
            NodeKind::Term(op) => return self.term(literal(op)?, scope),
            NodeKind::Affix(kind, op) => self.affix(*kind, literal(op)?, scope)?,
            NodeKind::Fuzzy { term, distance } => {
                let term = literal(term)?.to_lowercase();
                let expansion = self.data.terms.expand_fuzzy(&term, *distance, self.config.max_prefix_expansions)?;
                self.text_expansion(expansion, scope)
            }
            NodeKind::Phrase(children) => {
                let kids = self.build_all(children, scope)?;
                if kids.is_empty() {
                    return Ok(None);
                }
                let slop = scope.slop.unwrap_or(0).max(0) as u32;
                Box::new(IntersectIterator::new(kids, Some(slop), scope.inorder.unwrap_or(true)))
            }
            NodeKind::Intersect(children) => {
                let kids = self.build_all(children, scope)?;
                match kids.len() {
                    0 => return Ok(None),
                    1 if scope.slop.is_none() => kids.into_iter().next().unwrap_or_else(|| Box::new(EmptyIterator)),
                    _ => {
                        let slop = scope.slop.filter(|s| *s >= 0).map(|s| s as u32);
                        Box::new(IntersectIterator::new(kids, slop, scope.inorder.unwrap_or(false)))
                    }
                }
            }
            NodeKind::Union(children) => {
                let kids = self.build_all(children, scope)?;
                if kids.is_empty() {
                    return Ok(None);
                }
                self.union(kids)
            }
            NodeKind::Not(child) => {
                let inner = self.build(child, scope)?.unwrap_or_else(|| Box::new(EmptyIterator));
                Box::new(NotIterator::new(inner, self.reference()))
            }
            NodeKind::Optional(child) => {
                // The optional weight scales the child's matches once, here
                let inner = self.build(child, Scope { weight: 1.0, ..scope })?.unwrap_or_else(|| Box::new(EmptyIterator));
                Box::new(OptionalIterator::new(inner, self.reference(), scope.weight))
            }
            NodeKind::Fields { fields, child } => {
                let mut mask = 0;
                for name in fields {
                    let (_, spec, _) = self.data.field(name)?;
                    if spec.kind != FieldKind::Text {
                        return Err(Error::new(
                            ErrorKind::TypeMismatch,
                            format!("field '{}' is {} not TEXT", name, spec.kind.name()),
                        ));
                    }
                    mask |= spec.text_bit.map_or(0, |b| 1u64 << b);
                }
                let child_scope = Scope { mask: scope.mask & mask, ..scope };
                return self.build(child, child_scope);
            }
            NodeKind::Numeric { field, lo, hi } => {
                let lo_v = number(&lo.value)?;
                let hi_v = number(&hi.value)?;
                let tree = self.numeric_tree(field, FieldKind::Numeric)?;
                let scans = tree.query_range(lo_v, hi_v, lo.inclusive, hi.inclusive);
                let kids = scans
                    .into_iter()
                    .map(|s| Box::new(PostingIterator::numeric(s.snapshot, s.filter, self.deadline.clone())) as Iter)
                    .collect();
                self.union(kids)
            }
            NodeKind::Tag { field, values } => self.tag(field, values, scope)?,
            NodeKind::Geo { field, lon, lat, radius, unit } => {
                let lon = number(lon)?;
                let lat = number(lat)?;
                geo::validate(lon, lat)?;
                let radius_m = DistanceUnit::parse(unit)?.to_meters(number(radius)?);
                let tree = self.numeric_tree(field, FieldKind::Geo)?;
                let filter = NumericFilter::GeoRadius { lon, lat, radius_m };
                let mut kids: Vec<Iter> = Vec::new();
                for (lo, hi) in geo::covering_ranges(lon, lat, radius_m) {
                    for s in tree.query_with_filter(lo as f64, hi as f64, filter) {
                        kids.push(Box::new(PostingIterator::numeric(s.snapshot, s.filter, self.deadline.clone())));
                    }
                }
                self.union(kids)
            }
            NodeKind::GeoShape { field, predicate, wkt } => {
                let predicate = ShapePredicate::parse(predicate)?;
                let (_, spec, slot) = self.data.field(field)?;
                let FieldIndex::GeoShape(shapes) = &slot.index else {
                    return Err(mismatch(field, spec.kind, FieldKind::GeoShape));
                };
                Box::new(IdListIterator::new(shapes.query(predicate, literal(wkt)?)?))
            }
            NodeKind::VectorRange { field, radius, blob, epsilon } => {
                if self.opts.hybrid_search {
                    return Err(vector_in_hybrid());
                }
                let index = self.data.vector(field)?;
                let query = query_vector(blob, &index.params().elem_type, index.params().dim)?;
                let radius = number(radius)? as f32;
                let epsilon = epsilon.as_ref().map(number).transpose()?;
                let hits = index.range(&query, radius, None, epsilon);
                if let Some(alias) = &node.attrs.yield_distance_as {
                    self.distance_alias = Some(alias.clone());
                }
                Box::new(VectorIterator::new(hits, VectorOrder::Id))
            }
            NodeKind::VectorKnn { .. } => {
                if self.opts.hybrid_search {
                    return Err(vector_in_hybrid());
                }
                return Err(Error::syntax("KNN is only allowed at the top level of a query"));
            }
            NodeKind::IsMissing(field) => {
                let (_, spec, slot) = self.data.field(field)?;
                match &slot.missing {
                    Some(list) => Box::new(PostingIterator::plain(list.snapshot(), self.deadline.clone())),
                    None => {
                        return Err(Error::syntax(format!(
                            "'ismissing' requires field '{}' to be declared INDEXMISSING",
                            spec.name
                        )))
                    }
                }
            }
        };
        Ok(Some(iter))
    }

    fn build_all(&mut self, children: &[Node], scope: Scope) -> Result<Vec<Iter>> {
        let mut out = Vec::with_capacity(children.len());
        for c in children {
            if let Some(it) = self.build(c, scope)? {
                out.push(it);
            }
        }
        Ok(out)
    }

    fn union(&self, mut kids: Vec<Iter>) -> Iter {
        match kids.len() {
            0 => Box::new(EmptyIterator),
            1 => kids.remove(0),
            _ => Box::new(UnionIterator::new(kids, self.config.union_iterator_heap)),
        }
    }

    fn wildcard(&self) -> Iter {
        Box::new(WildcardIterator::new(self.data.docs.live_ids(), self.deadline.clone()))
    }

    /// Universe for NOT and OPTIONAL: the INDEXALL list when kept,
    /// otherwise every live id.
    fn reference(&self) -> Iter {
        match &self.data.index_all {
            Some(all) => Box::new(PostingIterator::plain(all.snapshot(), self.deadline.clone())),
            None => self.wildcard(),
        }
    }

    fn language(&self) -> Language {
        self.opts.language.unwrap_or(self.data.definition.rule.language)
    }

    fn posting(&self, snapshot: PostingSnapshot, term: &str, scope: Scope, is_tag: bool) -> Iter {
        Box::new(PostingIterator::term(snapshot, term, scope.mask, scope.weight, is_tag, self.deadline.clone()))
    }

    /// A single query term plus its stem and phonetic companions.
    fn term(&mut self, raw: &str, scope: Scope) -> Result<Option<Iter>> {
        if raw.is_empty() {
            let it = match self.data.terms.get(EMPTY_TERM) {
                Some(list) => self.posting(list.snapshot(), EMPTY_TERM, scope, false),
                None => Box::new(EmptyIterator) as Iter,
            };
            return Ok(Some(it));
        }
        let term = raw.to_lowercase();
        let stopwords = self.data.definition.options.stopword_filter();
        if stopwords.as_ref().is_some_and(|s| s.is_stopword(&term)) {
            return Ok(None);
        }

        let mut kids: Vec<Iter> = Vec::new();
        if let Some(list) = self.data.terms.get(&term) {
            kids.push(self.posting(list.snapshot(), &term, scope, false));
        }
        if !scope.verbatim {
            if let Some(alg) = self.language().stemmer() {
                let stemmer = Stemmer::create(alg);
                let mut companions = vec![format!("{}{}", STEM_PREFIX, term)];
                if let Some(stem) = StemmerFilter::stem_term(&stemmer, &term, self.config.min_stem_len) {
                    companions.push(stem);
                }
                companions.dedup();
                for c in companions {
                    if let Some(list) = self.data.terms.get(&c) {
                        kids.push(self.posting(list.snapshot(), &term, scope, false));
                    }
                }
            }
            if scope.phonetic != Some(false) && self.phonetic_in_scope(scope.mask) {
                let encoder = self.analyzers.phonetic_encoder();
                if let Some(key) = PhoneticFilter::term_for(encoder.as_ref(), &term) {
                    if let Some(list) = self.data.terms.get(&key) {
                        kids.push(self.posting(list.snapshot(), &term, scope, false));
                    }
                }
            }
        }
        Ok(Some(self.union(kids)))
    }

    fn phonetic_in_scope(&self, mask: FieldMask) -> bool {
        self.data
            .definition
            .schema
            .text_fields()
            .any(|f| f.has(FieldFlags::PHONETIC) && f.text_bit.is_some_and(|b| mask & (1u64 << b) != 0))
    }

    fn affix(&mut self, kind: MatchKind, raw: &str, scope: Scope) -> Result<Iter> {
        let term = raw.to_lowercase();
        let max = self.config.max_prefix_expansions;
        if kind != MatchKind::Pattern && term.chars().count() < self.config.min_prefix {
            return Err(Error::syntax(format!(
                "affix '{}' is shorter than the minimum of {} characters",
                raw, self.config.min_prefix
            )));
        }
        let expansion = match kind {
            MatchKind::Prefix => self.data.terms.expand_prefix(&term, max),
            MatchKind::Suffix => self.data.terms.expand_suffix(&term, max),
            MatchKind::Infix => self.data.terms.expand_infix(&term, max),
            MatchKind::Pattern => self.data.terms.expand_wildcard(&term, max)?,
            MatchKind::Exact => return Ok(self.term(&term, scope)?.unwrap_or_else(|| Box::new(EmptyIterator))),
        };
        Ok(self.text_expansion(expansion, scope))
    }

    fn note_expansion(&mut self, expansion: &Expansion) {
        if expansion.truncated {
            self.warnings.push(QueryWarning::MaxPrefixExpansions);
        }
    }

    fn text_expansion(&mut self, expansion: Expansion, scope: Scope) -> Iter {
        self.note_expansion(&expansion);
        let kids = expansion
            .terms
            .iter()
            .filter_map(|t| self.data.terms.get(t).map(|l| self.posting(l.snapshot(), t, scope, false)))
            .collect();
        self.union(kids)
    }

    fn tag(&mut self, field: &str, values: &[TagValue], scope: Scope) -> Result<Iter> {
        let (_, spec, slot) = self.data.field(field)?;
        let FieldIndex::Tag(tags) = &slot.index else {
            return Err(mismatch(field, spec.kind, FieldKind::Tag));
        };
        let max = self.config.max_prefix_expansions;
        let mut kids: Vec<Iter> = Vec::new();
        for v in values {
            let raw = literal(&v.value)?;
            let value = if raw.is_empty() { EMPTY_TAG.to_string() } else { tags.fold(raw) };
            let expansion = match v.kind {
                MatchKind::Exact => {
                    if let Some(snap) = tags.lookup(&value) {
                        kids.push(self.posting(snap, &value, scope, true));
                    }
                    continue;
                }
                MatchKind::Prefix => tags.expand_prefix(&value, max),
                MatchKind::Suffix => tags.expand_suffix(&value, max),
                MatchKind::Infix => tags.expand_infix(&value, max),
                MatchKind::Pattern => tags.expand_wildcard(&value, max)?,
            };
            self.note_expansion(&expansion);
            for t in &expansion.terms {
                if let Some(snap) = tags.lookup(t) {
                    kids.push(self.posting(snap, t, scope, true));
                }
            }
        }
        Ok(self.union(kids))
    }

    fn numeric_tree(&self, field: &str, want: FieldKind) -> Result<&'a NumericTree> {
        let (_, spec, slot) = self.data.field(field)?;
        match (&slot.index, want) {
            (FieldIndex::Numeric(t), FieldKind::Numeric) | (FieldIndex::Geo(t), FieldKind::Geo) => Ok(t),
            _ => Err(mismatch(field, spec.kind, want)),
        }
    }

    /// KNN over the ids the base query matches. The result streams in
    /// distance order.
    fn plan_knn(&mut self, base: &Node, knn: &KnnClause, node: &Node, scope: Scope) -> Result<(Iter, KnnPlan)> {
        let index = self.data.vector(&knn.field)?;
        let params = index.params().clone();
        let query = query_vector(&knn.blob, &params.elem_type, params.dim)?;
        let k = literal(&knn.k)?
            .parse::<usize>()
            .map_err(|_| Error::new(ErrorKind::BadParameter, format!("invalid KNN k '{}'", knn.k)))?;
        let ef = match &knn.ef_runtime {
            Some(op) => Some(number(op)? as usize),
            None => None,
        };

        let allowed: Option<RoaringTreemap> = if base.is_wildcard() && self.opts.in_keys.is_none() {
            None
        } else {
            let mut it = self.build(base, scope)?.unwrap_or_else(|| Box::new(EmptyIterator));
            let mut set = RoaringTreemap::new();
            while let Some(r) = it.read()? {
                set.insert(r.doc_id.0);
            }
            if let Some(keys) = &self.opts.in_keys {
                let keys: RoaringTreemap = keys.iter().map(|d| d.0).collect();
                set &= keys;
            }
            Some(set)
        };
        let hits = match &allowed {
            Some(set) => {
                let filter = |id: DocId| set.contains(id.0);
                index.knn(&query, k, Some(&filter), ef)
            }
            None => index.knn(&query, k, None, ef),
        };
        self.distance_alias = Some(
            knn.alias
                .clone()
                .or_else(|| node.attrs.yield_distance_as.clone())
                .unwrap_or_else(|| format!("__{}_score", knn.field)),
        );
        let plan = KnnPlan { field: knn.field.clone(), k, metric: params.metric };
        Ok((Box::new(VectorIterator::new(hits, VectorOrder::Distance)), plan))
    }
}

fn literal(op: &Operand) -> Result<&str> {
    op.literal()
        .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("No such parameter `{}`", op)))
}

fn number(op: &Operand) -> Result<f64> {
    let s = literal(op)?;
    parse_number(s).ok_or_else(|| Error::new(ErrorKind::BadQuerySyntax, format!("invalid number '{}'", s)))
}

fn query_vector(blob: &Blob, elem: &VectorType, dim: usize) -> Result<Vec<f32>> {
    let bytes = blob
        .bytes()
        .ok_or_else(|| Error::new(ErrorKind::BadParameter, "unbound vector parameter"))?;
    parse_blob(bytes, *elem, dim)
}

fn mismatch(field: &str, have: FieldKind, want: FieldKind) -> Error {
    Error::new(
        ErrorKind::TypeMismatch,
        format!("field '{}' is {} not {}", field, have.name(), want.name()),
    )
}

fn vector_in_hybrid() -> Error {
    Error::syntax("vector expressions are not allowed in the SEARCH part of HYBRID")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ingest::testing::with_hashes;
    use crate::iterators::collect_ids;
    use crate::query::params::{resolve_params, Params};
    use crate::query::parser::parse_query;
    use crate::vector::distance::to_blob;

    fn run(data: &IndexData, query: &str, opts: &PlanOptions) -> Result<(Vec<u64>, Plan)> {
        let config = Config::default();
        let analyzers = AnalyzerRegistry::new();
        let node = parse_query(query, 2)?;
        let mut plan = Planner::new(data, &config, &analyzers, Deadline::unlimited(), opts).plan(&node)?;
        let ids = collect_ids(plan.root.as_mut())?.into_iter().map(|d| d.0).collect();
        Ok((ids, plan))
    }

    fn ids(data: &IndexData, query: &str) -> Vec<u64> {
        run(data, query, &PlanOptions::default()).unwrap().0
    }

    fn corpus() -> IndexData {
        with_hashes(
            "INDEXALL ENABLE SCHEMA title TEXT PHONETIC dm:en price NUMERIC tags TAG",
            &[
                ("d1", &[("title", "running shoes"), ("price", "10"), ("tags", "red,sale")]),
                ("d2", &[("title", "blue shirt"), ("price", "25"), ("tags", "blue")]),
                ("d3", &[("title", "morphix runs home"), ("price", "40"), ("tags", "Red")]),
            ],
        )
    }

    #[test]
    fn test_term_matches_stem() {
        let d = corpus();
        assert_eq!(ids(&d, "running"), vec![1, 3]);
        assert_eq!(run(&d, "running", &PlanOptions { verbatim: true, ..Default::default() }).unwrap().0, vec![1]);
    }

    #[test]
    fn test_numeric_and_tag() {
        let d = corpus();
        assert_eq!(ids(&d, "@price:[10 25]"), vec![1, 2]);
        assert_eq!(ids(&d, "@price:[(10 +inf]"), vec![2, 3]);
        assert_eq!(ids(&d, "@tags:{red}"), vec![1, 3]);
        assert_eq!(ids(&d, "@tags:{red} @price:[20 50]"), vec![3]);
    }

    #[test]
    fn test_not_and_optional() {
        let d = corpus();
        assert_eq!(ids(&d, "-shirt"), vec![1, 3]);
        assert_eq!(ids(&d, "*"), vec![1, 2, 3]);
        assert_eq!(ids(&d, "~shirt"), vec![1, 2, 3]);
    }

    #[test]
    fn test_phonetic_opt_out() {
        let d = corpus();
        assert_eq!(ids(&d, "@title:morfix"), vec![3]);
        assert!(ids(&d, "@title:morfix=>{$phonetic:false}").is_empty());
    }

    #[test]
    fn test_prefix_expansion_warning() {
        let d = with_hashes(
            "SCHEMA t TEXT",
            &[("a", &[("t", "apple")]), ("b", &[("t", "apricot")]), ("c", &[("t", "april")])],
        );
        assert_eq!(ids(&d, "ap*"), vec![1, 2, 3]);
        let short = run(&d, "a*", &PlanOptions::default());
        assert_eq!(short.err().map(|e| e.kind), Some(ErrorKind::BadQuerySyntax));

        let config = Config { max_prefix_expansions: 2, ..Config::default() };
        let analyzers = AnalyzerRegistry::new();
        let node = parse_query("ap*", 2).unwrap();
        let opts = PlanOptions::default();
        let mut plan = Planner::new(&d, &config, &analyzers, Deadline::unlimited(), &opts).plan(&node).unwrap();
        assert_eq!(collect_ids(plan.root.as_mut()).unwrap().len(), 2);
        assert!(plan.warnings.contains(&QueryWarning::MaxPrefixExpansions));
    }

    #[test]
    fn test_unknown_field_and_type_mismatch() {
        let d = corpus();
        assert_eq!(run(&d, "@nope:foo", &PlanOptions::default()).err().map(|e| e.kind), Some(ErrorKind::FieldNotFound));
        assert_eq!(run(&d, "@price:{x}", &PlanOptions::default()).err().map(|e| e.kind), Some(ErrorKind::TypeMismatch));
    }

    #[test]
    fn test_in_keys_restricts() {
        let d = corpus();
        let opts = PlanOptions { in_keys: Some(vec![DocId(3)]), ..Default::default() };
        assert_eq!(run(&d, "running", &opts).unwrap().0, vec![3]);
    }

    #[test]
    fn test_knn_prefilter() {
        let d = with_hashes(
            "SCHEMA color TAG v VECTOR FLAT 6 TYPE FLOAT32 DIM 2 DISTANCE_METRIC L2",
            &[],
        );
        let config = Config::default();
        let analyzers = AnalyzerRegistry::new();
        let v = d.vector("v").unwrap();
        v.add(DocId(1), vec![0.0, 0.0]).unwrap();
        v.add(DocId(2), vec![1.0, 0.0]).unwrap();
        v.add(DocId(3), vec![5.0, 5.0]).unwrap();

        let mut node = parse_query("*=>[KNN 2 @v $q AS dist]", 2).unwrap();
        let mut params = Params::new();
        params.insert("q".into(), to_blob(&[0.9, 0.0]));
        resolve_params(&mut node, &params).unwrap();
        let opts = PlanOptions::default();
        let mut plan = Planner::new(&d, &config, &analyzers, Deadline::unlimited(), &opts).plan(&node).unwrap();
        assert_eq!(plan.knn.as_ref().unwrap().k, 2);
        assert_eq!(plan.distance_alias.as_deref(), Some("dist"));
        let mut got = Vec::new();
        while let Some(r) = plan.root.read().unwrap() {
            got.push((r.doc_id.0, r.distance.is_some()));
        }
        assert_eq!(got, vec![(2, true), (1, true)]);

        let hybrid = PlanOptions { hybrid_search: true, ..Default::default() };
        let rejected = Planner::new(&d, &config, &analyzers, Deadline::unlimited(), &hybrid).plan(&node);
        assert_eq!(rejected.err().map(|e| e.kind), Some(ErrorKind::BadQuerySyntax));
    }
}
