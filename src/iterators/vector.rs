use crate::core::types::DocId;
use crate::iterators::{IndexResult, IterResult, QueryIterator};
use crate::vector::VectorHit;

/// How vector hits are yielded. KNN at the root of a query streams by
/// distance; anywhere else the hits must follow doc-id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOrder {
    Distance,
    Id,
}

/// Precomputed vector hits carrying their distance on each result.
pub struct VectorIterator {
    hits: Vec<VectorHit>,
    order: VectorOrder,
    pos: usize,
    current: Option<DocId>,
}

impl VectorIterator {
    pub fn new(mut hits: Vec<VectorHit>, order: VectorOrder) -> Self {
        match order {
            VectorOrder::Distance => hits.sort_by(|a, b| a.cmp_rank(b)),
            VectorOrder::Id => hits.sort_by_key(|h| h.doc_id),
        }
        VectorIterator { hits, order, pos: 0, current: None }
    }

    pub fn order(&self) -> VectorOrder {
        self.order
    }

    fn at(&mut self, pos: usize) -> Option<IndexResult> {
        let hit = self.hits.get(pos)?;
        self.pos = pos + 1;
        self.current = Some(hit.doc_id);
        Some(IndexResult { doc_id: hit.doc_id, terms: Vec::new(), distance: Some(hit.distance) })
    }
}

impl QueryIterator for VectorIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        let out = self.at(self.pos);
        if out.is_none() {
            self.current = None;
        }
        Ok(out)
    }

    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>> {
        let pos = match self.order {
            VectorOrder::Id => self.hits.partition_point(|h| h.doc_id < target).max(self.pos),
            VectorOrder::Distance => self.hits[self.pos.min(self.hits.len())..]
                .iter()
                .position(|h| h.doc_id >= target)
                .map_or(self.hits.len(), |p| p + self.pos),
        };
        let out = self.at(pos);
        if out.is_none() {
            self.pos = self.hits.len();
            self.current = None;
        }
        Ok(out)
    }

    fn current(&self) -> Option<DocId> {
        self.current
    }

    fn num_estimated(&self) -> usize {
        self.hits.len()
    }

    fn rewind(&mut self) {
        self.pos = 0;
        self.current = None;
    }

    fn name(&self) -> &'static str {
        "VECTOR"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits() -> Vec<VectorHit> {
        vec![
            VectorHit { doc_id: DocId(5), distance: 0.1 },
            VectorHit { doc_id: DocId(2), distance: 0.7 },
            VectorHit { doc_id: DocId(9), distance: 0.3 },
        ]
    }

    #[test]
    fn test_distance_order() {
        let mut it = VectorIterator::new(hits(), VectorOrder::Distance);
        let first = it.read().unwrap().unwrap();
        assert_eq!((first.doc_id, first.distance), (DocId(5), Some(0.1)));
        assert_eq!(it.read().unwrap().unwrap().doc_id, DocId(9));
        assert_eq!(it.read().unwrap().unwrap().doc_id, DocId(2));
        assert_eq!(it.read().unwrap(), None);
    }

    #[test]
    fn test_id_order_skip() {
        let mut it = VectorIterator::new(hits(), VectorOrder::Id);
        assert_eq!(it.skip_to(DocId(3)).unwrap().unwrap().doc_id, DocId(5));
        assert_eq!(it.read().unwrap().unwrap().distance, Some(0.3));
        assert_eq!(it.skip_to(DocId(10)).unwrap(), None);
    }
}
