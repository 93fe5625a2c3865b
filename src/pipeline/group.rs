use std::collections::{HashMap, VecDeque};
use crate::core::error::Result;
use crate::core::types::Value;
use crate::pipeline::reducers::Reducer;
use crate::pipeline::{ExecCtx, Processor, ResultProcessor, Row, Step};

pub use crate::pipeline::reducers::ReducerSpec;

struct Group {
    values: Vec<Value>,
    reducers: Vec<Box<dyn Reducer>>,
}

/// GROUPBY: drains upstream into groups keyed by the `by` properties and
/// emits one row per group, in first-seen order.
pub struct GroupProcessor {
    upstream: Processor,
    by: Vec<String>,
    specs: Vec<ReducerSpec>,
    output: Option<VecDeque<Row>>,
}

impl GroupProcessor {
    pub fn new(upstream: Processor, by: Vec<String>, specs: Vec<ReducerSpec>) -> Self {
        let by = by.into_iter().map(|f| f.trim_start_matches('@').to_string()).collect();
        GroupProcessor { upstream, by, specs, output: None }
    }

    fn collect(&mut self, ctx: &mut ExecCtx) -> Result<VecDeque<Row>> {
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        loop {
            let row = match self.upstream.next(ctx)? {
                Step::Row(r) => r,
                Step::Eof | Step::Timeout => break,
            };
            let values: Vec<Value> = self.by.iter().map(|f| row.get(f).cloned().unwrap_or(Value::Null)).collect();
            let key = group_key(&values);
            let slot = match index.get(&key) {
                Some(&i) => i,
                None => {
                    let reducers = self.specs.iter().map(|s| s.build()).collect::<Result<Vec<_>>>()?;
                    groups.push(Group { values, reducers });
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };
            for r in groups[slot].reducers.iter_mut() {
                r.add(&row);
            }
        }
        ctx.total = groups.len();
        let rows = groups
            .into_iter()
            .map(|mut g| {
                let mut row = Row::group();
                for (name, v) in self.by.iter().zip(g.values) {
                    row.set(name, v);
                }
                for (spec, r) in self.specs.iter().zip(g.reducers.iter_mut()) {
                    row.set(&spec.alias, r.finish());
                }
                row
            })
            .collect();
        Ok(rows)
    }
}

fn group_key(values: &[Value]) -> String {
    let parts: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::Null => "\u{0}".to_string(),
            Value::Number(n) => format!("n{}", n),
            other => format!("s{}", other),
        })
        .collect();
    parts.join("\u{1}")
}

impl ResultProcessor for GroupProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        if self.output.is_none() {
            let rows = self.collect(ctx)?;
            self.output = Some(rows);
        }
        match self.output.as_mut().and_then(|q| q.pop_front()) {
            Some(r) => Ok(Step::Row(r)),
            None => Ok(Step::Eof),
        }
    }

    fn name(&self) -> &'static str {
        "Grouper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{drain, row, Rows};

    fn input() -> Vec<Row> {
        let s = |x: &str| Value::Str(x.into());
        vec![
            row(1, "a", 0.0, &[("color", s("red")), ("price", Value::Number(10.0))]),
            row(2, "b", 0.0, &[("color", s("blue")), ("price", Value::Number(5.0))]),
            row(3, "c", 0.0, &[("color", s("red")), ("price", Value::Number(30.0))]),
            row(4, "d", 0.0, &[("price", Value::Number(1.0))]),
        ]
    }

    #[test]
    fn test_group_and_reduce() {
        let specs = vec![
            ReducerSpec::new("COUNT", vec![], Some("n".into())).unwrap(),
            ReducerSpec::new("SUM", vec!["@price".into()], Some("total".into())).unwrap(),
        ];
        let mut p: Processor = Box::new(GroupProcessor::new(Rows::boxed(input()), vec!["@color".into()], specs));
        let rows = drain(&mut p);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("color"), Some(&Value::Str("red".into())));
        assert_eq!(rows[0].get("n"), Some(&Value::Number(2.0)));
        assert_eq!(rows[0].get("total"), Some(&Value::Number(40.0)));
        // Rows lacking the property group under null
        assert_eq!(rows[2].get("color"), Some(&Value::Null));
        assert!(rows.iter().all(|r| r.doc_id.is_none()));
    }

    #[test]
    fn test_group_by_nothing_is_one_group() {
        let specs = vec![ReducerSpec::new("MAX", vec!["@price".into()], Some("top".into())).unwrap()];
        let mut p: Processor = Box::new(GroupProcessor::new(Rows::boxed(input()), vec![], specs));
        let rows = drain(&mut p);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("top"), Some(&Value::Number(30.0)));
    }
}
