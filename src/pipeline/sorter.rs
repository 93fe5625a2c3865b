use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use crate::core::error::Result;
use crate::core::types::Value;
use crate::pipeline::{ExecCtx, Processor, ResultProcessor, Row, Step};
use crate::scoring::normalize_scores;

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub name: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortBy {
    /// Score descending, then key ascending.
    Score,
    /// Fields in order; ties fall back to score, then key.
    Fields(Vec<SortField>),
}

/// Total order for rows under `by`: the best row compares Less.
pub fn compare_rows(by: &SortBy, a: &Row, b: &Row) -> Ordering {
    if let SortBy::Fields(fields) = by {
        for f in fields {
            let null = Value::Null;
            let va = a.get(&f.name).unwrap_or(&null);
            let vb = b.get(&f.name).unwrap_or(&null);
            // Missing values sort last in either direction
            let ord = match (va.is_null(), vb.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                _ if f.ascending => va.sort_cmp(vb),
                _ => vb.sort_cmp(va),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
    }
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.key.cmp(&b.key))
        .then_with(|| a.doc_id.cmp(&b.doc_id))
}

/// Heap entry ordered so the worst kept row sits on top.
struct Ranked<'a> {
    row: Row,
    by: &'a SortBy,
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked<'_> {}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(self.by, &self.row, &other.row)
    }
}

/// Top-K collector: drains upstream, keeps the best `limit` rows, then
/// yields them in order. A timeout upstream ends collection early.
pub struct SorterProcessor {
    upstream: Processor,
    by: SortBy,
    limit: Option<usize>,
    normalize: bool,
    sorted: Option<VecDeque<Row>>,
}

impl SorterProcessor {
    pub fn new(upstream: Processor, by: SortBy, limit: Option<usize>, normalize: bool) -> Self {
        SorterProcessor { upstream, by, limit, normalize, sorted: None }
    }

    fn collect(&mut self, ctx: &mut ExecCtx) -> Result<VecDeque<Row>> {
        let by = self.by.clone();
        let mut heap: BinaryHeap<Ranked<'_>> = BinaryHeap::new();
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        loop {
            match self.upstream.next(ctx)? {
                Step::Row(row) => {
                    lo = lo.min(row.score);
                    hi = hi.max(row.score);
                    heap.push(Ranked { row, by: &by });
                    if let Some(limit) = self.limit {
                        if heap.len() > limit {
                            heap.pop();
                        }
                    }
                }
                Step::Eof | Step::Timeout => break,
            }
        }
        let mut rows: Vec<Row> = heap.into_sorted_vec().into_iter().map(|r| r.row).collect();
        if self.normalize && !rows.is_empty() {
            // Rescale against the whole set, not only the kept rows
            let mut scores: Vec<f64> = rows.iter().map(|r| r.score).collect();
            scores.push(lo);
            scores.push(hi);
            normalize_scores(&mut scores);
            for (r, s) in rows.iter_mut().zip(scores) {
                r.score = s;
            }
        }
        Ok(rows.into())
    }
}

impl ResultProcessor for SorterProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        if self.sorted.is_none() {
            let rows = self.collect(ctx)?;
            self.sorted = Some(rows);
        }
        match self.sorted.as_mut().and_then(|q| q.pop_front()) {
            Some(r) => Ok(Step::Row(r)),
            None => Ok(Step::Eof),
        }
    }

    fn name(&self) -> &'static str {
        match self.by {
            SortBy::Score => "Sorter(score)",
            SortBy::Fields(_) => "Sorter(fields)",
        }
    }
}

/// LIMIT offset count.
pub struct PagerProcessor {
    upstream: Processor,
    offset: usize,
    count: usize,
    seen: usize,
    drain: bool,
}

impl PagerProcessor {
    pub fn new(upstream: Processor, offset: usize, count: usize) -> Self {
        PagerProcessor { upstream, offset, count, seen: 0, drain: false }
    }

    /// A pager that consumes the rest of upstream once the page is full,
    /// so match totals stay exact without a sorter.
    pub fn counting(upstream: Processor, offset: usize, count: usize) -> Self {
        PagerProcessor { drain: true, ..PagerProcessor::new(upstream, offset, count) }
    }
}

impl ResultProcessor for PagerProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        loop {
            if self.seen >= self.offset + self.count {
                if !self.drain {
                    return Ok(Step::Eof);
                }
                loop {
                    match self.upstream.next(ctx)? {
                        Step::Row(_) => {}
                        end => return Ok(end),
                    }
                }
            }
            let row = match self.upstream.next(ctx)? {
                Step::Row(r) => r,
                other => return Ok(other),
            };
            self.seen += 1;
            if self.seen > self.offset {
                return Ok(Step::Row(row));
            }
        }
    }

    fn name(&self) -> &'static str {
        "Pager/Limiter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{drain, row, Rows};

    fn keys(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r.key.clone().unwrap()).collect()
    }

    fn input() -> Vec<Row> {
        vec![
            row(1, "d", 1.0, &[("price", Value::Number(30.0))]),
            row(2, "b", 3.0, &[("price", Value::Number(10.0))]),
            row(3, "a", 3.0, &[]),
            row(4, "c", 2.0, &[("price", Value::Number(20.0))]),
        ]
    }

    #[test]
    fn test_score_order_breaks_ties_by_key() {
        let mut p: Processor = Box::new(SorterProcessor::new(Rows::boxed(input()), SortBy::Score, None, false));
        assert_eq!(keys(&drain(&mut p)), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_field_order_puts_missing_last() {
        let by = SortBy::Fields(vec![SortField { name: "price".into(), ascending: false }]);
        let mut p: Processor = Box::new(SorterProcessor::new(Rows::boxed(input()), by, None, false));
        assert_eq!(keys(&drain(&mut p)), vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn test_heap_keeps_top_k() {
        let mut p: Processor = Box::new(SorterProcessor::new(Rows::boxed(input()), SortBy::Score, Some(2), false));
        assert_eq!(keys(&drain(&mut p)), vec!["a", "b"]);
    }

    #[test]
    fn test_normalized_scores_use_whole_set() {
        let mut p: Processor = Box::new(SorterProcessor::new(Rows::boxed(input()), SortBy::Score, Some(1), true));
        let rows = drain(&mut p);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 1.0);
    }

    #[test]
    fn test_pager() {
        let sorted: Processor = Box::new(SorterProcessor::new(Rows::boxed(input()), SortBy::Score, None, false));
        let mut p: Processor = Box::new(PagerProcessor::new(sorted, 1, 2));
        assert_eq!(keys(&drain(&mut p)), vec!["b", "c"]);
        let mut none: Processor = Box::new(PagerProcessor::new(Rows::boxed(input()), 0, 0));
        assert!(drain(&mut none).is_empty());
    }

    #[test]
    fn test_counting_pager_sees_every_row() {
        let mut p: Processor = Box::new(PagerProcessor::counting(Rows::boxed(input()), 1, 1));
        let mut c = crate::pipeline::testing::ctx();
        let mut out = Vec::new();
        while let Step::Row(r) = p.next(&mut c).unwrap() {
            out.push(r);
        }
        assert_eq!(keys(&out), vec!["b"]);
        assert_eq!(c.total, 4);
    }
}
