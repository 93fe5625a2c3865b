use crate::core::error::Result;
use crate::core::types::Value;
use crate::expr::Expr;
use crate::pipeline::{ExecCtx, Processor, ResultProcessor, Step};

/// APPLY expr AS alias. An evaluation error yields null for that row.
pub struct ApplyProcessor {
    upstream: Processor,
    expr: Expr,
    alias: String,
}

impl ApplyProcessor {
    pub fn new(upstream: Processor, expr: Expr, alias: String) -> Self {
        ApplyProcessor { upstream, expr, alias }
    }
}

impl ResultProcessor for ApplyProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        let mut row = match self.upstream.next(ctx)? {
            Step::Row(r) => r,
            other => return Ok(other),
        };
        let value = {
            let env = |name: &str| row.property(name);
            self.expr.eval(&env).unwrap_or(Value::Null)
        };
        row.set(&self.alias, value);
        Ok(Step::Row(row))
    }

    fn name(&self) -> &'static str {
        "Projector"
    }
}

/// FILTER expr: keeps rows whose value is truthy.
pub struct FilterProcessor {
    upstream: Processor,
    expr: Expr,
}

impl FilterProcessor {
    pub fn new(upstream: Processor, expr: Expr) -> Self {
        FilterProcessor { upstream, expr }
    }
}

impl ResultProcessor for FilterProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        loop {
            let row = match self.upstream.next(ctx)? {
                Step::Row(r) => r,
                other => return Ok(other),
            };
            let keep = {
                let env = |name: &str| row.property(name);
                self.expr.eval(&env).map(|v| v.truthy()).unwrap_or(false)
            };
            if keep {
                return Ok(Step::Row(row));
            }
        }
    }

    fn name(&self) -> &'static str {
        "Filter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use crate::pipeline::testing::{drain, row, Rows};
    use crate::pipeline::Row;

    fn input() -> Vec<Row> {
        vec![
            row(1, "a", 0.5, &[("price", Value::Number(10.0))]),
            row(2, "b", 0.25, &[("price", Value::Number(40.0))]),
            row(3, "c", 1.0, &[("price", Value::Str("n/a".into()))]),
        ]
    }

    #[test]
    fn test_apply_sets_alias() {
        let expr = parse("@price * 2").unwrap();
        let mut p: Processor = Box::new(ApplyProcessor::new(Rows::boxed(input()), expr, "double".into()));
        let rows = drain(&mut p);
        assert_eq!(rows[0].get("double"), Some(&Value::Number(20.0)));
        assert_eq!(rows[1].get("double"), Some(&Value::Number(80.0)));
    }

    #[test]
    fn test_apply_sees_key_and_score() {
        let expr = parse("@__score * 4").unwrap();
        let mut p: Processor = Box::new(ApplyProcessor::new(Rows::boxed(input()), expr, "s".into()));
        assert_eq!(drain(&mut p)[1].get("s"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_filter_keeps_truthy() {
        let expr = parse("@price > 20").unwrap();
        let mut p: Processor = Box::new(FilterProcessor::new(Rows::boxed(input()), expr));
        let keys: Vec<_> = drain(&mut p).into_iter().map(|r| r.key.unwrap()).collect();
        assert_eq!(keys, vec!["b"]);
    }
}
