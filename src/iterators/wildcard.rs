use std::sync::Arc;
use roaring::RoaringTreemap;
use crate::core::deadline::Deadline;
use crate::core::types::DocId;
use crate::iterators::{IndexResult, IterResult, Poller, QueryIterator};

/// Every live document, read from a frozen copy of the live-id bitmap.
pub struct WildcardIterator {
    ids: Arc<RoaringTreemap>,
    pos: u64,
    current: Option<DocId>,
    poller: Poller,
}

impl WildcardIterator {
    pub fn new(ids: Arc<RoaringTreemap>, deadline: Deadline) -> Self {
        WildcardIterator { ids, pos: 0, current: None, poller: Poller::new(deadline) }
    }

    fn at(&mut self, pos: u64) -> IterResult<Option<IndexResult>> {
        self.poller.tick()?;
        self.current = self.ids.select(pos).map(DocId);
        self.pos = pos + 1;
        Ok(self.current.map(IndexResult::bare))
    }
}

impl QueryIterator for WildcardIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        self.at(self.pos)
    }

    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>> {
        let pos = if target.0 == 0 { 0 } else { self.ids.rank(target.0 - 1) };
        self.at(pos.max(self.pos))
    }

    fn current(&self) -> Option<DocId> {
        self.current
    }

    fn num_estimated(&self) -> usize {
        self.ids.len() as usize
    }

    fn rewind(&mut self) {
        self.pos = 0;
        self.current = None;
    }

    fn name(&self) -> &'static str {
        "WILDCARD"
    }
}

/// A precomputed sorted id list, used for INKEYS and geoshape results.
pub struct IdListIterator {
    ids: Vec<DocId>,
    pos: usize,
    current: Option<DocId>,
}

impl IdListIterator {
    pub fn new(mut ids: Vec<DocId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        IdListIterator { ids, pos: 0, current: None }
    }

    fn at(&mut self, pos: usize) -> Option<IndexResult> {
        self.current = self.ids.get(pos).copied();
        self.pos = pos + 1;
        self.current.map(IndexResult::bare)
    }
}

impl QueryIterator for IdListIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        Ok(self.at(self.pos))
    }

    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>> {
        let pos = self.ids.partition_point(|d| *d < target);
        Ok(self.at(pos.max(self.pos)))
    }

    fn current(&self) -> Option<DocId> {
        self.current
    }

    fn num_estimated(&self) -> usize {
        self.ids.len()
    }

    fn rewind(&mut self) {
        self.pos = 0;
        self.current = None;
    }

    fn name(&self) -> &'static str {
        "ID-LIST"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterators::collect_ids;

    #[test]
    fn test_wildcard_skip() {
        let ids: RoaringTreemap = [1u64, 5, 6, 10, 1 << 40].into_iter().collect();
        let mut it = WildcardIterator::new(Arc::new(ids), Deadline::unlimited());
        assert_eq!(it.read().unwrap().unwrap().doc_id, DocId(1));
        assert_eq!(it.skip_to(DocId(6)).unwrap().unwrap().doc_id, DocId(6));
        assert_eq!(it.skip_to(DocId(11)).unwrap().unwrap().doc_id, DocId(1 << 40));
        assert_eq!(it.read().unwrap(), None);
        it.rewind();
        assert_eq!(collect_ids(&mut it).unwrap().len(), 5);
    }

    #[test]
    fn test_id_list_dedups_and_sorts() {
        let mut it = IdListIterator::new(vec![DocId(9), DocId(3), DocId(3), DocId(7)]);
        assert_eq!(it.skip_to(DocId(4)).unwrap().unwrap().doc_id, DocId(7));
        assert_eq!(it.read().unwrap().unwrap().doc_id, DocId(9));
        assert_eq!(it.read().unwrap(), None);
    }
}
