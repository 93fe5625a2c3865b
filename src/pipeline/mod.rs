//! Pull-based result processors. Each processor owns its upstream and
//! hands rows downstream one at a time:
//! root → scorer → sorter → pager → loader → (group | apply | filter |
//! highlight | summarize)*.

pub mod apply;
pub mod cursor;
pub mod group;
pub mod highlight;
pub mod loader;
pub mod reducers;
pub mod root;
pub mod sorter;

use std::sync::Arc;
use crate::core::config::TimeoutPolicy;
use crate::core::deadline::{Deadline, Interrupt};
use crate::core::error::{Error, QueryWarning, Result, Warnings};
use crate::core::types::{DocId, Value};
use crate::iterators::IndexResult;

pub use apply::{ApplyProcessor, FilterProcessor};
pub use cursor::{Cursor, CursorPool};
pub use group::{GroupProcessor, ReducerSpec};
pub use highlight::{HighlightProcessor, HighlightSpec, SummarizeProcessor, SummarizeSpec};
pub use loader::{LoadSpec, LoaderProcessor};
pub use root::{RootProcessor, ScorerProcessor};
pub use sorter::{PagerProcessor, SortBy, SortField, SorterProcessor};

/// Document-level state copied out of the doc table at the root.
#[derive(Debug, Clone, Default)]
pub struct RowMeta {
    pub doc_len: u32,
    pub max_freq: u32,
    pub doc_score: f64,
    pub payload: Option<Vec<u8>>,
}

/// One result flowing through the chain. Grouped rows carry no document.
#[derive(Debug, Clone, Default)]
pub struct Row {
    pub doc_id: Option<DocId>,
    pub key: Option<String>,
    pub score: f64,
    pub meta: RowMeta,
    pub result: Option<IndexResult>,
    /// Normalized SORTABLE values, readable without a load.
    pub sortables: Vec<(String, Value)>,
    /// Loaded and computed fields, in reply order.
    pub fields: Vec<(String, Value)>,
    /// The document vanished between match and load.
    pub missing: bool,
    pub explain: Option<String>,
}

impl Row {
    pub fn group() -> Self {
        Row::default()
    }

    /// A field by name: computed or loaded first, then sortables.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = name.strip_prefix('@').unwrap_or(name);
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .or_else(|| self.sortables.iter().find(|(k, _)| k == name))
            .map(|(_, v)| v)
    }

    /// Sets or replaces a field, keeping first-insertion order.
    pub fn set(&mut self, name: &str, value: Value) {
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    /// Property lookup for the expression language. `__key` and
    /// `__score` are always defined.
    pub fn property(&self, name: &str) -> Option<Value> {
        match name {
            "__key" => self.key.clone().map(Value::Str),
            "__score" => Some(Value::Number(self.score)),
            _ => self.get(name).cloned(),
        }
    }
}

pub enum Step {
    Row(Row),
    Eof,
    /// The deadline fired; rows produced so far stay valid.
    Timeout,
}

/// State shared along one chain.
pub struct ExecCtx {
    pub deadline: Deadline,
    pub policy: TimeoutPolicy,
    pub warnings: Warnings,
    /// Matches seen by the root, before paging.
    pub total: usize,
    pub timed_out: bool,
}

impl ExecCtx {
    pub fn new(deadline: Deadline, policy: TimeoutPolicy) -> Self {
        ExecCtx { deadline, policy, warnings: Warnings::new(), total: 0, timed_out: false }
    }

    /// Maps an interrupt to a step or an error per the timeout policy.
    pub fn interrupted(&mut self, why: Interrupt) -> Result<Step> {
        match why {
            Interrupt::TimedOut if self.policy == TimeoutPolicy::Return => {
                self.timed_out = true;
                self.warnings.push(QueryWarning::Timeout);
                Ok(Step::Timeout)
            }
            other => Err(Error::from(other)),
        }
    }
}

pub trait ResultProcessor: Send {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step>;

    fn name(&self) -> &'static str;
}

pub type Processor = Box<dyn ResultProcessor>;

/// A built chain and its context. Cursors keep one alive across reads.
pub struct Pipeline {
    tail: Processor,
    pub ctx: ExecCtx,
    done: bool,
    names: Arc<Vec<&'static str>>,
}

impl Pipeline {
    pub fn new(tail: Processor, ctx: ExecCtx, names: Vec<&'static str>) -> Self {
        Pipeline { tail, ctx, done: false, names: Arc::new(names) }
    }

    /// Up to `limit` rows (all when `None`). Sets `is_done` at EOF or
    /// timeout.
    pub fn read(&mut self, limit: Option<usize>) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        while !self.done && limit.is_none_or(|l| out.len() < l) {
            match self.tail.next(&mut self.ctx)? {
                Step::Row(r) => out.push(r),
                Step::Eof | Step::Timeout => self.done = true,
            }
        }
        Ok(out)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Processor names from root to tail, for DEBUG output.
    pub fn stages(&self) -> &[&'static str] {
        &self.names
    }
}

/// Tags errors leaving a processor with its stage name.
struct Staged(Processor);

impl ResultProcessor for Staged {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        match self.0.next(ctx) {
            Err(e) => Err(e.in_stage(self.0.name())),
            step => step,
        }
    }

    fn name(&self) -> &'static str {
        self.0.name()
    }
}

/// Assembles a chain stage by stage.
pub struct PipelineBuilder {
    tail: Processor,
    names: Vec<&'static str>,
}

impl PipelineBuilder {
    pub fn new(root: Processor) -> Self {
        let names = vec![root.name()];
        PipelineBuilder { tail: Box::new(Staged(root)), names }
    }

    pub fn then<F>(mut self, stage: F) -> Self
    where
        F: FnOnce(Processor) -> Processor,
    {
        let next = stage(self.tail);
        self.names.push(next.name());
        self.tail = Box::new(Staged(next));
        self
    }

    pub fn build(self, ctx: ExecCtx) -> Pipeline {
        Pipeline::new(self.tail, ctx, self.names)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Feeds fixed rows, then EOF.
    pub struct Rows(pub std::collections::VecDeque<Row>);

    impl Rows {
        pub fn boxed(rows: Vec<Row>) -> Processor {
            Box::new(Rows(rows.into()))
        }
    }

    impl ResultProcessor for Rows {
        fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
            match self.0.pop_front() {
                Some(r) => {
                    ctx.total += 1;
                    Ok(Step::Row(r))
                }
                None => Ok(Step::Eof),
            }
        }

        fn name(&self) -> &'static str {
            "ROWS"
        }
    }

    pub fn row(id: u64, key: &str, score: f64, fields: &[(&str, Value)]) -> Row {
        Row {
            doc_id: Some(DocId(id)),
            key: Some(key.to_string()),
            score,
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ..Default::default()
        }
    }

    pub fn ctx() -> ExecCtx {
        ExecCtx::new(Deadline::unlimited(), TimeoutPolicy::Return)
    }

    pub fn drain(p: &mut Processor) -> Vec<Row> {
        let mut c = ctx();
        let mut out = Vec::new();
        while let Step::Row(r) = p.next(&mut c).unwrap() {
            out.push(r);
        }
        out
    }
}
