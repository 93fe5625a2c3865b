use std::cmp::Reverse;
use std::collections::BinaryHeap;
use crate::core::types::DocId;
use crate::iterators::{IndexResult, IterResult, QueryIterator};

/// Yields every id present in any child, merging the matches of children
/// that share it. Above `heap_threshold` children a min-heap picks the next
/// id; below it a linear scan is cheaper.
pub struct UnionIterator {
    children: Vec<Box<dyn QueryIterator>>,
    heads: Vec<Option<IndexResult>>,
    heap: Option<BinaryHeap<Reverse<(DocId, usize)>>>,
    started: bool,
    current: Option<DocId>,
    estimate: usize,
}

impl UnionIterator {
    pub fn new(children: Vec<Box<dyn QueryIterator>>, heap_threshold: usize) -> Self {
        let estimate = children.iter().map(|c| c.num_estimated()).sum();
        let use_heap = children.len() > heap_threshold;
        UnionIterator {
            heads: vec![None; children.len()],
            heap: if use_heap { Some(BinaryHeap::with_capacity(children.len())) } else { None },
            children,
            started: false,
            current: None,
            estimate,
        }
    }

    fn set_head(&mut self, i: usize, r: Option<IndexResult>) {
        if let (Some(heap), Some(res)) = (self.heap.as_mut(), r.as_ref()) {
            heap.push(Reverse((res.doc_id, i)));
        }
        self.heads[i] = r;
    }

    fn start(&mut self) -> IterResult<()> {
        if !self.started {
            self.started = true;
            for i in 0..self.children.len() {
                let r = self.children[i].read()?;
                self.set_head(i, r);
            }
        }
        Ok(())
    }

    fn min_doc(&mut self) -> Option<DocId> {
        match self.heap.as_mut() {
            Some(heap) => {
                // Drop stale entries whose child moved on
                while let Some(Reverse((doc, i))) = heap.peek().copied() {
                    if self.heads[i].as_ref().map(|h| h.doc_id) == Some(doc) {
                        return Some(doc);
                    }
                    heap.pop();
                }
                None
            }
            None => self.heads.iter().flatten().map(|h| h.doc_id).min(),
        }
    }

    /// Emits the minimum head, merging every child positioned on it, and
    /// advances those children.
    fn emit(&mut self) -> IterResult<Option<IndexResult>> {
        let Some(doc) = self.min_doc() else {
            self.current = None;
            return Ok(None);
        };
        let mut out: Option<IndexResult> = None;
        for i in 0..self.children.len() {
            if self.heads[i].as_ref().map(|h| h.doc_id) != Some(doc) {
                continue;
            }
            if let Some(head) = self.heads[i].take() {
                match out.as_mut() {
                    Some(o) => o.merge(head),
                    None => out = Some(head),
                }
            }
            let next = self.children[i].read()?;
            self.set_head(i, next);
        }
        self.current = Some(doc);
        Ok(out)
    }
}

impl QueryIterator for UnionIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        self.start()?;
        self.emit()
    }

    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>> {
        self.start()?;
        for i in 0..self.children.len() {
            let behind = self.heads[i].as_ref().map(|h| h.doc_id < target).unwrap_or(false);
            if behind {
                let r = self.children[i].skip_to(target)?;
                self.set_head(i, r);
            }
        }
        self.emit()
    }

    fn current(&self) -> Option<DocId> {
        self.current
    }

    fn num_estimated(&self) -> usize {
        self.estimate
    }

    fn rewind(&mut self) {
        for c in &mut self.children {
            c.rewind();
        }
        self.heads.iter_mut().for_each(|h| *h = None);
        if let Some(heap) = self.heap.as_mut() {
            heap.clear();
        }
        self.started = false;
        self.current = None;
    }

    fn name(&self) -> &'static str {
        "UNION"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterators::collect_ids;
    use crate::iterators::testing::ids;

    fn union(threshold: usize) -> UnionIterator {
        UnionIterator::new(vec![ids(&[1, 4, 7]), ids(&[2, 4, 9]), ids(&[4, 10])], threshold)
    }

    #[test]
    fn test_union_dedups_and_merges() {
        for threshold in [0, 20] {
            let mut u = union(threshold);
            let first = u.read().unwrap().unwrap();
            assert_eq!(first.doc_id, DocId(1));
            let _ = u.read().unwrap();
            let four = u.read().unwrap().unwrap();
            assert_eq!(four.doc_id, DocId(4));
            assert_eq!(four.terms.len(), 3);
            u.rewind();
            let all: Vec<u64> = collect_ids(&mut u).unwrap().into_iter().map(|d| d.0).collect();
            assert_eq!(all, vec![1, 2, 4, 7, 9, 10]);
        }
    }

    #[test]
    fn test_union_skip_to() {
        for threshold in [0, 20] {
            let mut u = union(threshold);
            assert_eq!(u.skip_to(DocId(5)).unwrap().unwrap().doc_id, DocId(7));
            assert_eq!(u.read().unwrap().unwrap().doc_id, DocId(9));
            assert_eq!(u.skip_to(DocId(11)).unwrap(), None);
        }
    }
}
