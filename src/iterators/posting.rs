use std::sync::Arc;
use crate::compression::codec::PostingEntry;
use crate::core::deadline::Deadline;
use crate::core::types::{DocId, FieldMask};
use crate::index::inverted::{PostingReader, PostingSnapshot};
use crate::index::numeric::NumericFilter;
use crate::iterators::{IndexResult, IterResult, Poller, QueryIterator, TermMatch};

/// Reads one posting list: a term, a tag value or a numeric leaf.
pub struct PostingIterator {
    reader: PostingReader,
    term: Option<Arc<str>>,
    weight: f64,
    is_tag: bool,
    filter: Option<NumericFilter>,
    current: Option<DocId>,
    poller: Poller,
}

impl PostingIterator {
    /// A term or tag list whose matches carry scoring data.
    pub fn term(
        snapshot: PostingSnapshot,
        term: &str,
        field_mask: FieldMask,
        weight: f64,
        is_tag: bool,
        deadline: Deadline,
    ) -> Self {
        PostingIterator {
            reader: PostingReader::new(snapshot, field_mask),
            term: Some(Arc::from(term)),
            weight,
            is_tag,
            filter: None,
            current: None,
            poller: Poller::new(deadline),
        }
    }

    /// A numeric leaf, optionally filtered per record.
    pub fn numeric(snapshot: PostingSnapshot, filter: Option<NumericFilter>, deadline: Deadline) -> Self {
        PostingIterator {
            reader: PostingReader::new(snapshot, u64::MAX),
            term: None,
            weight: 1.0,
            is_tag: false,
            filter,
            current: None,
            poller: Poller::new(deadline),
        }
    }

    /// A doc-id-only list (INDEXALL, missing-value lists).
    pub fn plain(snapshot: PostingSnapshot, deadline: Deadline) -> Self {
        Self::numeric(snapshot, None, deadline)
    }

    fn to_result(&self, e: PostingEntry) -> IndexResult {
        let terms = match &self.term {
            Some(term) => vec![TermMatch {
                term: term.clone(),
                doc_freq: self.reader.num_docs(),
                freq: e.freq,
                field_mask: e.field_mask,
                offsets: e.offsets,
                weight: self.weight,
                is_tag: self.is_tag,
            }],
            None => Vec::new(),
        };
        IndexResult { doc_id: e.doc_id, terms, distance: None }
    }

    fn accept(&mut self, mut entry: Option<PostingEntry>) -> IterResult<Option<IndexResult>> {
        loop {
            self.poller.tick()?;
            let Some(e) = entry else {
                self.current = None;
                return Ok(None);
            };
            if self.filter.map(|f| f.accepts(e.value)).unwrap_or(true) {
                self.current = Some(e.doc_id);
                return Ok(Some(self.to_result(e)));
            }
            entry = self.reader.next();
        }
    }
}

impl QueryIterator for PostingIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        let e = self.reader.next();
        self.accept(e)
    }

    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>> {
        let e = self.reader.skip_to(target);
        self.accept(e)
    }

    fn current(&self) -> Option<DocId> {
        self.current
    }

    fn num_estimated(&self) -> usize {
        self.reader.num_docs()
    }

    fn rewind(&mut self) {
        self.reader.rewind();
        self.current = None;
    }

    fn name(&self) -> &'static str {
        if self.term.is_some() { "TERM" } else { "NUMERIC" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::codec::RecordFlags;
    use crate::index::inverted::InvertedIndex;
    use crate::iterators::collect_ids;

    #[test]
    fn test_numeric_filter_applied() {
        let mut idx = InvertedIndex::new(RecordFlags::numeric(), 2);
        for (id, v) in [(1, 1.0), (2, 5.0), (3, 9.0), (4, 5.5)] {
            idx.append(&PostingEntry::numeric(DocId(id), v)).unwrap();
        }
        let filter = NumericFilter::range(5.0, 6.0, true, true);
        let mut it = PostingIterator::numeric(idx.snapshot(), Some(filter), Deadline::unlimited());
        assert_eq!(collect_ids(&mut it).unwrap(), vec![DocId(2), DocId(4)]);
    }

    #[test]
    fn test_skip_to_and_rewind() {
        let mut it = crate::iterators::testing::ids(&[1, 3, 5, 7, 9, 11]);
        let r = it.skip_to(DocId(6)).unwrap().unwrap();
        assert_eq!(r.doc_id, DocId(7));
        assert_eq!(r.terms[0].doc_freq, 6);
        assert_eq!(it.current(), Some(DocId(7)));
        it.rewind();
        assert_eq!(it.read().unwrap().unwrap().doc_id, DocId(1));
    }

    #[test]
    fn test_field_mask_filters_records() {
        let mut idx = InvertedIndex::new(RecordFlags::text(true, true, false), 10);
        for (id, mask) in [(1u64, 1u64), (2, 2), (3, 3)] {
            let e = PostingEntry { doc_id: DocId(id), freq: 1, field_mask: mask, offsets: vec![], value: 0.0 };
            idx.append(&e).unwrap();
        }
        let mut it = PostingIterator::term(idx.snapshot(), "x", 2, 1.0, false, Deadline::unlimited());
        assert_eq!(collect_ids(&mut it).unwrap(), vec![DocId(2), DocId(3)]);
    }
}
