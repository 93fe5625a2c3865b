//! Merging of per-shard replies into one coordinator reply.

use std::cmp::Ordering;
use crate::core::error::Warnings;
use crate::engine::reply::{QueryReply, ResultRow};
use crate::pipeline::{SortBy, SortField};

fn compare(by: &SortBy, a: &ResultRow, b: &ResultRow) -> Ordering {
    if let SortBy::Fields(fields) = by {
        for SortField { name, ascending } in fields {
            let ord = match (a.get(name).filter(|v| !v.is_null()), b.get(name).filter(|v| !v.is_null())) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(x), Some(y)) if *ascending => x.sort_cmp(y),
                (Some(x), Some(y)) => y.sort_cmp(x),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
    }
    let score = |r: &ResultRow| r.score.unwrap_or(0.0);
    score(b)
        .partial_cmp(&score(a))
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.key.cmp(&b.key))
}

/// Merges shard replies: totals add up, rows are re-ordered under `sort`
/// and cut to `limit`, and warnings are kept from every shard, including
/// shards that returned no rows.
pub fn merge_search_replies(replies: Vec<QueryReply>, sort: &SortBy, limit: Option<usize>) -> QueryReply {
    let mut total = 0;
    let mut warnings = Warnings::new();
    let mut rows = Vec::new();
    for reply in replies {
        total += reply.total;
        warnings.extend(&reply.warnings);
        rows.extend(reply.rows);
    }
    rows.sort_by(|a, b| compare(sort, a, b));
    if let Some(n) = limit {
        rows.truncate(n);
    }
    QueryReply { total, rows, warnings, cursor: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::QueryWarning;
    use crate::core::types::Value;

    fn row(key: &str, score: f64, n: Option<f64>) -> ResultRow {
        ResultRow {
            key: Some(key.into()),
            score: Some(score),
            fields: n.map(|v| vec![("n".to_string(), Value::Number(v))]).unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_by_score() {
        let a = QueryReply { total: 2, rows: vec![row("a1", 3.0, None), row("a2", 1.0, None)], ..Default::default() };
        let b = QueryReply { total: 1, rows: vec![row("b1", 2.0, None)], ..Default::default() };
        let merged = merge_search_replies(vec![a, b], &SortBy::Score, Some(2));
        assert_eq!(merged.total, 3);
        assert_eq!(merged.keys(), vec!["a1", "b1"]);
    }

    #[test]
    fn test_empty_shard_warnings_survive() {
        let mut warned = Warnings::new();
        warned.push(QueryWarning::Timeout);
        let empty = QueryReply { warnings: warned, ..Default::default() };
        let full = QueryReply { total: 1, rows: vec![row("x", 1.0, Some(4.0))], ..Default::default() };
        let merged = merge_search_replies(vec![full, empty], &SortBy::Score, None);
        assert!(merged.warnings.contains(&QueryWarning::Timeout));
        assert_eq!(merged.rows.len(), 1);
    }

    #[test]
    fn test_merge_by_field_missing_last() {
        let sort = SortBy::Fields(vec![SortField { name: "n".into(), ascending: false }]);
        let a = QueryReply { total: 2, rows: vec![row("a", 0.0, Some(1.0)), row("m", 0.0, None)], ..Default::default() };
        let b = QueryReply { total: 1, rows: vec![row("b", 0.0, Some(5.0))], ..Default::default() };
        let merged = merge_search_replies(vec![a, b], &sort, None);
        assert_eq!(merged.keys(), vec!["b", "a", "m"]);
    }
}
