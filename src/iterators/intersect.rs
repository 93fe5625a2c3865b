use crate::core::types::DocId;
use crate::iterators::{IndexResult, IterResult, QueryIterator};

/// Ids present in every child. Children are ordered by estimated size so
/// the rarest one leads and the others skip to it.
///
/// With `slop` set, the children's positions must also fit in a window of
/// `children - 1 + slop` gaps, in child order when `in_order` is set.
pub struct IntersectIterator {
    children: Vec<Box<dyn QueryIterator>>,
    // Child positions in query order, for in-order phrase checks
    query_order: Vec<usize>,
    last: Vec<Option<IndexResult>>,
    slop: Option<u32>,
    in_order: bool,
    current: Option<IndexResult>,
    eof: bool,
}

impl IntersectIterator {
    pub fn new(children: Vec<Box<dyn QueryIterator>>, slop: Option<u32>, in_order: bool) -> Self {
        let mut indexed: Vec<(usize, Box<dyn QueryIterator>)> = children.into_iter().enumerate().collect();
        indexed.sort_by_key(|(_, c)| c.num_estimated());
        let mut query_order = vec![0; indexed.len()];
        for (sorted_pos, (orig, _)) in indexed.iter().enumerate() {
            query_order[*orig] = sorted_pos;
        }
        let children: Vec<Box<dyn QueryIterator>> = indexed.into_iter().map(|(_, c)| c).collect();
        IntersectIterator {
            last: vec![None; children.len()],
            children,
            query_order,
            slop,
            in_order,
            current: None,
            eof: false,
        }
    }

    /// Child `i` positioned at the first id >= `target`, reusing its last
    /// result when that already qualifies.
    fn seek(&mut self, i: usize, target: DocId) -> IterResult<Option<IndexResult>> {
        if let Some(last) = &self.last[i] {
            if last.doc_id >= target {
                return Ok(Some(last.clone()));
            }
        }
        let r = self.children[i].skip_to(target)?;
        self.last[i] = r.clone();
        Ok(r)
    }

    fn advance(&mut self, mut target: Option<DocId>) -> IterResult<Option<IndexResult>> {
        if self.eof || self.children.is_empty() {
            return Ok(None);
        }
        loop {
            let lead = match target {
                None => {
                    let r = self.children[0].read()?;
                    self.last[0] = r.clone();
                    r
                }
                Some(t) => self.seek(0, t)?,
            };
            let Some(lead) = lead else {
                return self.finish();
            };
            let doc = lead.doc_id;
            let mut next_target = None;
            for i in 1..self.children.len() {
                match self.seek(i, doc)? {
                    None => return self.finish(),
                    Some(r) if r.doc_id > doc => {
                        next_target = Some(r.doc_id);
                        break;
                    }
                    Some(_) => {}
                }
            }
            if let Some(t) = next_target {
                target = Some(t);
                continue;
            }
            if self.positions_match() {
                let mut out = IndexResult::bare(doc);
                for r in self.last.iter().flatten() {
                    out.merge(r.clone());
                }
                self.current = Some(out.clone());
                return Ok(Some(out));
            }
            target = None;
        }
    }

    fn finish(&mut self) -> IterResult<Option<IndexResult>> {
        self.eof = true;
        self.current = None;
        Ok(None)
    }

    fn positions_match(&self) -> bool {
        let Some(slop) = self.slop else { return true };
        let lists: Vec<Vec<u32>> = self
            .query_order
            .iter()
            .map(|&i| self.last[i].as_ref().map(|r| r.positions()).unwrap_or_default())
            .collect();
        if lists.iter().any(|l| l.is_empty()) {
            // No position data recorded
            return true;
        }
        match min_span(&lists, self.in_order) {
            Some(span) => span <= slop as u64 + lists.len() as u64 - 1,
            None => false,
        }
    }
}

/// Smallest `max - min` over picks of one position per list. In order, the
/// picks must also be strictly increasing in list order.
pub fn min_span(lists: &[Vec<u32>], in_order: bool) -> Option<u64> {
    if lists.is_empty() {
        return Some(0);
    }
    if in_order {
        let mut best: Option<u64> = None;
        for &start in &lists[0] {
            let mut prev = start;
            let mut ok = true;
            for list in &lists[1..] {
                match list.iter().find(|&&p| p > prev) {
                    Some(&p) => prev = p,
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                let span = (prev - start) as u64;
                best = Some(best.map_or(span, |b| b.min(span)));
            }
        }
        return best;
    }

    // Sliding window over the merged, labelled positions
    let mut merged: Vec<(u32, usize)> = lists
        .iter()
        .enumerate()
        .flat_map(|(i, l)| l.iter().map(move |&p| (p, i)))
        .collect();
    merged.sort_unstable();
    let n = lists.len();
    let mut counts = vec![0usize; n];
    let mut covered = 0;
    let mut best: Option<u64> = None;
    let mut left = 0;
    for right in 0..merged.len() {
        let (_, label) = merged[right];
        if counts[label] == 0 {
            covered += 1;
        }
        counts[label] += 1;
        while covered == n {
            let span = (merged[right].0 - merged[left].0) as u64;
            best = Some(best.map_or(span, |b| b.min(span)));
            let (_, l) = merged[left];
            counts[l] -= 1;
            if counts[l] == 0 {
                covered -= 1;
            }
            left += 1;
        }
    }
    best
}

impl QueryIterator for IntersectIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        self.advance(None)
    }

    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>> {
        if let Some(cur) = &self.current {
            if cur.doc_id >= target {
                return Ok(Some(cur.clone()));
            }
        }
        self.advance(Some(target))
    }

    fn current(&self) -> Option<DocId> {
        self.current.as_ref().map(|r| r.doc_id)
    }

    fn num_estimated(&self) -> usize {
        self.children.iter().map(|c| c.num_estimated()).min().unwrap_or(0)
    }

    fn rewind(&mut self) {
        for c in &mut self.children {
            c.rewind();
        }
        self.last.iter_mut().for_each(|l| *l = None);
        self.current = None;
        self.eof = false;
    }

    fn name(&self) -> &'static str {
        "INTERSECT"
    }
}
