use std::collections::VecDeque;
use std::sync::Arc;
use crate::core::deadline::Interrupt;
use crate::core::error::{QueryWarning, Result};
use crate::core::types::{DocId, Value};
use crate::engine::index::SearchIndex;
use crate::iterators::{IndexResult, QueryIterator};
use crate::pipeline::{ExecCtx, Processor, ResultProcessor, Row, RowMeta, Step};
use crate::scoring::{DocStats, Scorer, ScoringStats};

/// Iterator results resolved per batch under one read lock.
const RESOLVE_BATCH: usize = 64;

/// Turns iterator hits into rows. Deleted documents are skipped, expired
/// ones are skipped and queued for removal.
pub struct RootProcessor {
    iter: Box<dyn QueryIterator>,
    index: Arc<SearchIndex>,
    distance_alias: Option<String>,
    buffer: VecDeque<Row>,
    pending: Option<Interrupt>,
    eof: bool,
    checked_partial: bool,
}

impl RootProcessor {
    pub fn new(iter: Box<dyn QueryIterator>, index: Arc<SearchIndex>, distance_alias: Option<String>) -> Self {
        RootProcessor {
            iter,
            index,
            distance_alias,
            buffer: VecDeque::new(),
            pending: None,
            eof: false,
            checked_partial: false,
        }
    }

    fn fill(&mut self, ctx: &mut ExecCtx) {
        let mut hits: Vec<IndexResult> = Vec::with_capacity(RESOLVE_BATCH);
        while hits.len() < RESOLVE_BATCH {
            match self.iter.read() {
                Ok(Some(r)) => hits.push(r),
                Ok(None) => {
                    self.eof = true;
                    break;
                }
                Err(why) => {
                    self.pending = Some(why);
                    break;
                }
            }
        }
        if hits.is_empty() {
            return;
        }
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let data = self.index.data.read();
        for hit in hits {
            let Some(meta) = data.docs.get(hit.doc_id) else { continue };
            if !data.docs.is_live(hit.doc_id) {
                continue;
            }
            if meta.is_expired(now_ms) {
                data.docs.queue_expired(hit.doc_id);
                continue;
            }
            let mut row = Row {
                doc_id: Some(hit.doc_id),
                key: Some(meta.key.clone()),
                score: 0.0,
                meta: RowMeta {
                    doc_len: meta.len,
                    max_freq: meta.max_freq,
                    doc_score: meta.score,
                    payload: meta.payload.clone(),
                },
                sortables: meta.sortables.clone(),
                ..Default::default()
            };
            if let (Some(alias), Some(d)) = (&self.distance_alias, hit.distance) {
                row.fields.push((alias.clone(), Value::Number(d as f64)));
            }
            row.result = Some(hit);
            ctx.total += 1;
            self.buffer.push_back(row);
        }
    }
}

impl ResultProcessor for RootProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        if !self.checked_partial {
            self.checked_partial = true;
            if self.index.indexing.is_partial() {
                ctx.warnings.push(QueryWarning::PartialIndex);
            }
        }
        loop {
            if let Some(row) = self.buffer.pop_front() {
                if let Err(why) = ctx.deadline.on_result() {
                    self.buffer.clear();
                    return ctx.interrupted(why);
                }
                return Ok(Step::Row(row));
            }
            if let Some(why) = self.pending.take() {
                return ctx.interrupted(why);
            }
            if self.eof {
                return Ok(Step::Eof);
            }
            self.fill(ctx);
        }
    }

    fn name(&self) -> &'static str {
        "Index"
    }
}

/// Scores rows with the request's scorer. Rows whose score is not a
/// number are dropped.
pub struct ScorerProcessor {
    upstream: Processor,
    scorer: Box<dyn Scorer>,
    stats: ScoringStats,
    explain: bool,
}

impl ScorerProcessor {
    pub fn new(upstream: Processor, scorer: Box<dyn Scorer>, stats: ScoringStats, explain: bool) -> Self {
        ScorerProcessor { upstream, scorer, stats, explain }
    }
}

impl ResultProcessor for ScorerProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        loop {
            let mut row = match self.upstream.next(ctx)? {
                Step::Row(r) => r,
                other => return Ok(other),
            };
            let empty = IndexResult::bare(row.doc_id.unwrap_or(DocId(0)));
            let result = row.result.as_ref().unwrap_or(&empty);
            let doc = DocStats {
                doc_len: row.meta.doc_len,
                max_freq: row.meta.max_freq,
                doc_score: row.meta.doc_score,
                payload: row.meta.payload.as_deref(),
            };
            let score = if self.explain {
                let (s, why) = self.scorer.explain(result, &doc, &self.stats);
                row.explain = Some(why);
                s
            } else {
                self.scorer.score(result, &doc, &self.stats)
            };
            if score.is_nan() {
                ctx.total = ctx.total.saturating_sub(1);
                continue;
            }
            row.score = score;
            return Ok(Step::Row(row));
        }
    }

    fn name(&self) -> &'static str {
        "Scorer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::index::{IndexData, SearchIndex};
    use crate::engine::ingest::testing::with_hashes;
    use crate::iterators::WildcardIterator;
    use crate::pipeline::testing::drain;
    use crate::core::deadline::Deadline;
    use crate::scoring::ScorerKind;

    fn index() -> Arc<SearchIndex> {
        let data: IndexData = with_hashes(
            "SCHEMA t TEXT n NUMERIC SORTABLE",
            &[("a", &[("t", "x"), ("n", "1")]), ("b", &[("t", "x y"), ("n", "2")]), ("c", &[("t", "z"), ("n", "3")])],
        );
        Arc::new(SearchIndex::new("idx", data))
    }

    fn wildcard(index: &SearchIndex) -> Box<dyn QueryIterator> {
        Box::new(WildcardIterator::new(index.data.read().docs.live_ids(), Deadline::unlimited()))
    }

    #[test]
    fn test_root_skips_deleted() {
        let idx = index();
        let it = wildcard(&idx);
        idx.data.write().remove_document("b");
        let mut root: Processor = Box::new(RootProcessor::new(it, idx.clone(), None));
        let rows = drain(&mut root);
        let keys: Vec<_> = rows.iter().map(|r| r.key.clone().unwrap()).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert_eq!(rows[1].sortables, vec![("n".to_string(), Value::Number(3.0))]);
    }

    #[test]
    fn test_forced_timeout_returns_partial() {
        let idx = index();
        let it = wildcard(&idx);
        let mut ctx = ExecCtx::new(idx.deadline(0, Some(1)), crate::core::config::TimeoutPolicy::Return);
        let mut root = RootProcessor::new(it, idx, None);
        assert!(matches!(root.next(&mut ctx).unwrap(), Step::Row(_)));
        assert!(matches!(root.next(&mut ctx).unwrap(), Step::Timeout));
        assert!(ctx.timed_out);
    }

    #[test]
    fn test_docscore_scorer_stage() {
        let idx = index();
        let it = wildcard(&idx);
        let root: Processor = Box::new(RootProcessor::new(it, idx, None));
        let mut scored: Processor =
            Box::new(ScorerProcessor::new(root, ScorerKind::DocScore.build(), ScoringStats::default(), true));
        let rows = drain(&mut scored);
        assert!(rows.iter().all(|r| r.score == 1.0 && r.explain.is_some()));
    }
}
