//! Doc-id ordered iterators with skip-to, composed by the planner into a
//! tree per query.

pub mod intersect;
pub mod not;
pub mod posting;
pub mod union;
pub mod vector;
pub mod wildcard;

use std::sync::Arc;
use crate::core::deadline::{Deadline, Interrupt};
use crate::core::types::{DocId, FieldMask};

pub use intersect::IntersectIterator;
pub use not::{NotIterator, OptionalIterator};
pub use posting::PostingIterator;
pub use union::UnionIterator;
pub use vector::{VectorIterator, VectorOrder};
pub use wildcard::{IdListIterator, WildcardIterator};

/// Deadline polls happen once per this many records.
pub const POLL_INTERVAL: u32 = 1000;

pub type IterResult<T> = std::result::Result<T, Interrupt>;

/// Term-level facts a scorer needs about one match.
#[derive(Debug, Clone, PartialEq)]
pub struct TermMatch {
    pub term: Arc<str>,
    pub doc_freq: usize,
    pub freq: u32,
    pub field_mask: FieldMask,
    pub offsets: Vec<u32>,
    pub weight: f64,
    pub is_tag: bool,
}

/// One document yielded by an iterator.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexResult {
    pub doc_id: DocId,
    pub terms: Vec<TermMatch>,
    pub distance: Option<f32>,
}

impl IndexResult {
    pub fn bare(doc_id: DocId) -> Self {
        IndexResult { doc_id, terms: Vec::new(), distance: None }
    }

    /// Folds another match of the same document into this one.
    pub fn merge(&mut self, other: IndexResult) {
        self.terms.extend(other.terms);
        if self.distance.is_none() {
            self.distance = other.distance;
        }
    }

    /// All token positions across matched terms, sorted.
    pub fn positions(&self) -> Vec<u32> {
        let mut out: Vec<u32> = self.terms.iter().flat_map(|t| t.offsets.iter().copied()).collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn field_mask(&self) -> FieldMask {
        self.terms.iter().fold(0, |m, t| m | t.field_mask)
    }
}

pub trait QueryIterator: Send {
    /// Next document in id order, or `None` at EOF.
    fn read(&mut self) -> IterResult<Option<IndexResult>>;

    /// First document with id >= `target`. The caller compares ids to tell
    /// a hit from a miss, and only skips past `current()`.
    fn skip_to(&mut self, target: DocId) -> IterResult<Option<IndexResult>>;

    /// Id of the last document returned.
    fn current(&self) -> Option<DocId>;

    fn num_estimated(&self) -> usize;

    fn rewind(&mut self);

    fn name(&self) -> &'static str;
}

/// Counts records and polls the deadline every [`POLL_INTERVAL`].
#[derive(Debug, Clone)]
pub struct Poller {
    deadline: Deadline,
    count: u32,
}

impl Poller {
    pub fn new(deadline: Deadline) -> Self {
        Poller { deadline, count: 0 }
    }

    pub fn tick(&mut self) -> IterResult<()> {
        self.count += 1;
        if self.count >= POLL_INTERVAL {
            self.count = 0;
            self.deadline.check()?;
        }
        Ok(())
    }
}

/// Matches nothing.
#[derive(Debug, Default)]
pub struct EmptyIterator;

impl QueryIterator for EmptyIterator {
    fn read(&mut self) -> IterResult<Option<IndexResult>> {
        Ok(None)
    }

    fn skip_to(&mut self, _target: DocId) -> IterResult<Option<IndexResult>> {
        Ok(None)
    }

    fn current(&self) -> Option<DocId> {
        None
    }

    fn num_estimated(&self) -> usize {
        0
    }

    fn rewind(&mut self) {}

    fn name(&self) -> &'static str {
        "EMPTY"
    }
}

/// Drains an iterator into its ids, for tests and id-set building.
pub fn collect_ids(it: &mut dyn QueryIterator) -> IterResult<Vec<DocId>> {
    let mut out = Vec::new();
    while let Some(r) = it.read()? {
        out.push(r.doc_id);
    }
    Ok(out)
}
