use crate::core::types::DocId;
use crate::iterators::{IndexResult, IterResult, QueryIterator};

/// Tracks a child iterator while a reference iterator drives the walk.
struct Follower {
    child: Box<dyn QueryIterator>,
    last: Option<IndexResult>,
    eof: bool,
}

impl Follower {
    fn new(child: Box<dyn QueryIterator>) -> Self {
        Follower { child, last: None, eof: false }
    }

    /// The child's match on `doc`, if it has one.
    fn hit(&mut self, doc: DocId) -> IterResult<Option<&IndexResult>> {
        let behind = self.last.as_ref().map_or(true, |r| r.doc_id < doc);
        if behind && !self.eof {
            self.last = self.child.skip_to(doc)?;
            self.eof = self.last.is_none();
        }
        Ok(self.last.as_ref().filter(|r| r.doc_id == doc))
    }

    fn rewind(&mut self) {
        self.child.rewind();
        self.last = None;
        self.eof = false;
    }
}

/// Documents of the reference set that the child does not match. The
/// reference is either every live document or the INDEXALL list.
pub struct NotIterator {
    child: Follower,
    reference: Box<dyn QueryIterator>,
    current: Option<DocId>,
}

impl NotIterator {
    pub fn new(child: Box<dyn QueryIterator>, reference: Box<dyn QueryIterator>) -> Self {
        NotIterator { child: Follower::new(child), reference, current: None }
    }

    fn walk(&mut self, mut next: Option<IndexResult>) -> IterResult<Option<IndexResult>> {
        loop {
            let Some(r) = next else {
                self.current = None;
                return Ok(None);
            };
            if self.child.hit(r.doc_id)?.is_none() {
                self.current = Some(r.doc_id);
                return Ok(Some(IndexResult::bare(r.doc_id)));
            }
            next = self.reference.read()?;
        }
    }
}

impl QueryIterator for NotIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        let next = self.reference.read()?;
        self.walk(next)
    }

    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>> {
        let next = self.reference.skip_to(target)?;
        self.walk(next)
    }

    fn current(&self) -> Option<DocId> {
        self.current
    }

    fn num_estimated(&self) -> usize {
        self.reference.num_estimated()
    }

    fn rewind(&mut self) {
        self.child.rewind();
        self.reference.rewind();
        self.current = None;
    }

    fn name(&self) -> &'static str {
        "NOT"
    }
}

/// Every reference document, carrying the child's match data where the
/// child matches so the scorer can reward it.
pub struct OptionalIterator {
    child: Follower,
    reference: Box<dyn QueryIterator>,
    weight: f64,
    current: Option<DocId>,
}

impl OptionalIterator {
    pub fn new(child: Box<dyn QueryIterator>, reference: Box<dyn QueryIterator>, weight: f64) -> Self {
        OptionalIterator { child: Follower::new(child), reference, weight, current: None }
    }

    fn emit(&mut self, next: Option<IndexResult>) -> IterResult<Option<IndexResult>> {
        let Some(r) = next else {
            self.current = None;
            return Ok(None);
        };
        self.current = Some(r.doc_id);
        let weight = self.weight;
        Ok(Some(match self.child.hit(r.doc_id)? {
            Some(hit) => {
                let mut out = hit.clone();
                for t in &mut out.terms {
                    t.weight *= weight;
                }
                out
            }
            None => IndexResult::bare(r.doc_id),
        }))
    }
}

impl QueryIterator for OptionalIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        let next = self.reference.read()?;
        self.emit(next)
    }

    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>> {
        let next = self.reference.skip_to(target)?;
        self.emit(next)
    }

    fn current(&self) -> Option<DocId> {
        self.current
    }

    fn num_estimated(&self) -> usize {
        self.reference.num_estimated()
    }

    fn rewind(&mut self) {
        self.child.rewind();
        self.reference.rewind();
        self.current = None;
    }

    fn name(&self) -> &'static str {
        "OPTIONAL"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterators::collect_ids;
    use crate::iterators::testing::ids;

    fn docs(v: Vec<DocId>) -> Vec<u64> {
        v.into_iter().map(|d| d.0).collect()
    }

    #[test]
    fn test_not_excludes_child() {
        let mut it = NotIterator::new(ids(&[2, 4, 9]), ids(&[1, 2, 3, 4, 5]));
        assert_eq!(docs(collect_ids(&mut it).unwrap()), vec![1, 3, 5]);
        it.rewind();
        assert_eq!(it.skip_to(DocId(2)).unwrap().unwrap().doc_id, DocId(3));
    }

    #[test]
    fn test_not_of_everything_is_empty() {
        let mut it = NotIterator::new(ids(&[1, 2, 3]), ids(&[1, 2, 3]));
        assert!(collect_ids(&mut it).unwrap().is_empty());
    }

    #[test]
    fn test_optional_keeps_all_and_marks_hits() {
        let mut it = OptionalIterator::new(ids(&[2, 3]), ids(&[1, 2, 3, 4]), 2.0);
        let mut hits = Vec::new();
        while let Some(r) = it.read().unwrap() {
            hits.push((r.doc_id.0, r.terms.first().map(|t| t.weight)));
        }
        assert_eq!(hits, vec![(1, None), (2, Some(2.0)), (3, Some(2.0)), (4, None)]);
    }
}
