use std::collections::VecDeque;
use std::sync::Arc;
use rayon::prelude::*;
use serde_json::Value as Json;
use crate::core::error::{Error, Result};
use crate::core::types::Value;
use crate::host::{HostDocument, HostStore, RawValue};
use crate::pipeline::{ExecCtx, Processor, ResultProcessor, Row, Step};

/// Which stored fields a row receives.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadSpec {
    /// Every stored field (`LOAD *`, or SEARCH without RETURN).
    All,
    /// (selector path, reply name) pairs.
    Fields(Vec<(String, String)>),
}

/// Fetches stored fields from the host store in batches. A document gone
/// since it matched is flagged `missing` instead of failing the query.
pub struct LoaderProcessor {
    upstream: Processor,
    store: Arc<dyn HostStore>,
    spec: LoadSpec,
    batch: usize,
    parallel: bool,
    buffer: VecDeque<Row>,
    ended: Option<Step>,
}

impl LoaderProcessor {
    pub fn new(upstream: Processor, store: Arc<dyn HostStore>, spec: LoadSpec, batch: usize, parallel: bool) -> Self {
        LoaderProcessor {
            upstream,
            store,
            spec,
            batch: batch.max(1),
            parallel,
            buffer: VecDeque::new(),
            ended: None,
        }
    }

    fn fill(&mut self, ctx: &mut ExecCtx) -> Result<()> {
        let mut rows = Vec::with_capacity(self.batch);
        while rows.len() < self.batch {
            match self.upstream.next(ctx)? {
                Step::Row(r) => rows.push(r),
                other => {
                    self.ended = Some(other);
                    break;
                }
            }
        }
        if self.ended.is_none() {
            if let Err(why) = ctx.deadline.check() {
                // Rows already pulled are kept; loading stops here
                self.ended = Some(ctx.interrupted(why)?);
            }
        }
        let store = self.store.as_ref();
        let spec = &self.spec;
        if self.parallel && rows.len() > 1 {
            // A row that fails on a worker keeps what it loaded; the query goes on
            let failures: Vec<Error> = rows.par_iter_mut().filter_map(|r| load_row(store, spec, r).err()).collect();
            for e in failures {
                ctx.warnings.push(e.into_async_warning());
            }
        } else {
            for r in rows.iter_mut() {
                load_row(store, spec, r)?;
            }
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl ResultProcessor for LoaderProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        loop {
            if let Some(r) = self.buffer.pop_front() {
                return Ok(Step::Row(r));
            }
            if let Some(end) = self.ended.take() {
                return Ok(end);
            }
            self.fill(ctx)?;
        }
    }

    fn name(&self) -> &'static str {
        "Loader"
    }
}

fn load_row(store: &dyn HostStore, spec: &LoadSpec, row: &mut Row) -> Result<()> {
    let Some(key) = row.key.as_deref() else { return Ok(()) };
    let Some(doc) = store.get(key) else {
        row.missing = true;
        return Ok(());
    };
    match spec {
        LoadSpec::All => {
            for (name, text) in doc.all_fields() {
                row.set(&name, Value::Str(text));
            }
        }
        LoadSpec::Fields(fields) => {
            for (path, name) in fields {
                if let Some(v) = selected_value(&doc, path)? {
                    row.set(name, v);
                }
            }
        }
    }
    Ok(())
}

/// Reply form of a selector: scalars as text, anything else as JSON text.
pub fn selected_value(doc: &HostDocument, path: &str) -> Result<Option<Value>> {
    let mut values = doc.select(path)?;
    let v = match values.len() {
        0 => None,
        1 => match values.remove(0) {
            RawValue::Json(Json::Array(items)) => Some(Value::Str(Json::Array(items).to_string())),
            RawValue::Json(Json::Object(map)) => Some(Value::Str(Json::Object(map).to_string())),
            other => other.as_text().map(Value::Str),
        },
        _ => {
            let items: Vec<Json> = values
                .into_iter()
                .map(|v| match v {
                    RawValue::Json(j) => j,
                    RawValue::Bytes(b) => Json::String(String::from_utf8_lossy(&b).into_owned()),
                })
                .collect();
            Some(Value::Str(Json::Array(items).to_string()))
        }
    };
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryStore;
    use crate::pipeline::testing::{drain, row, Rows};
    use serde_json::json;

    fn store() -> Arc<MemoryStore> {
        let s = MemoryStore::new();
        s.hset("a", &[("title", "hello"), ("n", "1")]);
        s.set_json("j", json!({"name": "x", "tags": ["p", "q"]}));
        Arc::new(s)
    }

    #[test]
    fn test_load_fields_and_missing() {
        let s = store();
        let rows = vec![row(1, "a", 0.0, &[]), row(2, "gone", 0.0, &[])];
        let spec = LoadSpec::Fields(vec![("title".into(), "t".into())]);
        for parallel in [false, true] {
            let mut p: Processor = Box::new(LoaderProcessor::new(Rows::boxed(rows.clone()), s.clone(), spec.clone(), 8, parallel));
            let out = drain(&mut p);
            assert_eq!(out[0].get("t"), Some(&Value::Str("hello".into())));
            assert!(!out[0].missing);
            assert!(out[1].missing);
        }
    }

    #[test]
    fn test_load_all_and_json_paths() {
        let s = store();
        let mut p: Processor = Box::new(LoaderProcessor::new(Rows::boxed(vec![row(1, "a", 0.0, &[])]), s.clone(), LoadSpec::All, 2, false));
        assert_eq!(drain(&mut p)[0].fields.len(), 2);

        let doc = s.get("j").unwrap();
        assert_eq!(selected_value(&doc, "$.name").unwrap(), Some(Value::Str("x".into())));
        assert_eq!(selected_value(&doc, "$.tags").unwrap(), Some(Value::Str("[\"p\",\"q\"]".into())));
        assert_eq!(selected_value(&doc, "$.nope").unwrap(), None);
    }

    #[test]
    fn test_worker_failures_become_warnings() {
        let s = store();
        let rows = vec![row(1, "j", 0.0, &[]), row(2, "j", 0.0, &[])];
        let spec = LoadSpec::Fields(vec![("$.a[".into(), "a".into())]);

        let mut p: Processor = Box::new(LoaderProcessor::new(Rows::boxed(rows.clone()), s.clone(), spec.clone(), 8, true));
        let mut c = crate::pipeline::testing::ctx();
        assert!(matches!(p.next(&mut c).unwrap(), Step::Row(_)));
        assert_eq!(c.warnings.len(), 1);
        let text = &c.warnings.to_strings()[0];
        assert!(text.starts_with("the following error was caught upon running the query asynchronously: "));

        let mut serial: Processor = Box::new(LoaderProcessor::new(Rows::boxed(rows), s, spec, 8, false));
        assert!(serial.next(&mut crate::pipeline::testing::ctx()).is_err());
    }
}
