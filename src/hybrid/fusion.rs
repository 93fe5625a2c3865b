use std::cmp::Ordering;
use std::collections::HashMap;
use crate::core::types::{DocId, Value};
use crate::pipeline::Row;

/// How the two ranked halves are combined.
#[derive(Debug, Clone, PartialEq)]
pub enum Combine {
    /// Sum of 1/(constant + rank) over the halves a document appears in.
    Rrf { window: Option<usize>, constant: f64 },
    /// alpha * lexical score + beta * vector similarity.
    Linear { alpha: f64, beta: f64, window: Option<usize> },
}

impl Combine {
    pub fn window(&self) -> Option<usize> {
        match self {
            Combine::Rrf { window, .. } | Combine::Linear { window, .. } => *window,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Combine::Rrf { .. } => "RRF",
            Combine::Linear { .. } => "LINEAR",
        }
    }
}

struct Candidate {
    row: Row,
    /// (1-based rank, half score)
    lexical: Option<(usize, f64)>,
    vector: Option<(usize, f64)>,
}

/// Fuses two halves, each already ranked best-first. Returns one row per
/// document, ordered by fused score descending then key ascending. Each
/// row's score is the fused score; fields from both halves are merged.
pub fn fuse(lexical: Vec<Row>, vector: Vec<Row>, combine: &Combine) -> Vec<Row> {
    let mut out = fuse_unordered(lexical, vector, combine);
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    out
}

/// Like [`fuse`], but rows stay in first-seen order: the lexical half's
/// rows, then vector-only rows.
pub fn fuse_unordered(lexical: Vec<Row>, vector: Vec<Row>, combine: &Combine) -> Vec<Row> {
    let mut order: Vec<DocId> = Vec::new();
    let mut by_doc: HashMap<DocId, Candidate> = HashMap::new();

    for (i, row) in lexical.into_iter().enumerate() {
        let Some(id) = row.doc_id else { continue };
        let score = row.score;
        by_doc.entry(id).or_insert_with(|| {
            order.push(id);
            Candidate { row, lexical: Some((i + 1, score)), vector: None }
        });
    }
    for (i, row) in vector.into_iter().enumerate() {
        let Some(id) = row.doc_id else { continue };
        let hit = (i + 1, row.score);
        match by_doc.get_mut(&id) {
            Some(c) => {
                if c.vector.is_none() {
                    c.vector = Some(hit);
                    for (k, v) in row.fields {
                        c.row.set(&k, v);
                    }
                }
            }
            None => {
                order.push(id);
                by_doc.insert(id, Candidate { row, lexical: None, vector: Some(hit) });
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| by_doc.remove(&id))
        .map(|c| {
            let mut row = c.row;
            row.score = match combine {
                Combine::Rrf { constant, .. } => {
                    let part = |h: Option<(usize, f64)>| h.map_or(0.0, |(rank, _)| 1.0 / (constant + rank as f64));
                    part(c.lexical) + part(c.vector)
                }
                Combine::Linear { alpha, beta, .. } => {
                    alpha * c.lexical.map_or(0.0, |h| h.1) + beta * c.vector.map_or(0.0, |h| h.1)
                }
            };
            row
        })
        .collect()
}

/// Writes the fused score under `alias` on every row.
pub fn yield_score(rows: &mut [Row], alias: &str) {
    for r in rows {
        let s = r.score;
        r.set(alias, Value::Number(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::row;

    fn keys(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r.key.as_deref().unwrap()).collect()
    }

    #[test]
    fn test_rrf_rewards_presence_in_both() {
        let lex = vec![row(1, "a", 9.0, &[]), row(2, "b", 5.0, &[])];
        let vec = vec![row(2, "b", 0.9, &[("vs", Value::Number(0.9))]), row(3, "c", 0.8, &[])];
        let out = fuse(lex, vec, &Combine::Rrf { window: None, constant: 60.0 });
        assert_eq!(keys(&out), vec!["b", "a", "c"]);
        assert!((out[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        // Same rank in one half only: equal scores, key order
        assert_eq!(out[1].score, out[2].score);
        assert_eq!(out[0].get("vs"), Some(&Value::Number(0.9)));
    }

    #[test]
    fn test_linear_missing_half_counts_zero() {
        let lex = vec![row(1, "a", 1.0, &[]), row(2, "b", 0.5, &[])];
        let vec = vec![row(2, "b", 1.0, &[])];
        let out = fuse(lex, vec, &Combine::Linear { alpha: 0.3, beta: 0.7, window: Some(20) });
        assert_eq!(keys(&out), vec!["b", "a"]);
        assert!((out[0].score - 0.85).abs() < 1e-12);
        assert!((out[1].score - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_duplicates_keep_first_rank() {
        let lex = vec![row(1, "a", 2.0, &[]), row(1, "a", 1.0, &[])];
        let out = fuse(lex, Vec::new(), &Combine::Rrf { window: None, constant: 1.0 });
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 0.5);
    }

    #[test]
    fn test_yield_score() {
        let mut rows = vec![row(1, "a", 0.25, &[])];
        yield_score(&mut rows, "fused");
        assert_eq!(rows[0].get("fused"), Some(&Value::Number(0.25)));
    }

    #[test]
    fn test_unordered_keeps_arrival_order() {
        let lex = vec![row(1, "a", 0.1, &[])];
        let vec = vec![row(2, "b", 0.9, &[])];
        let combine = Combine::Linear { alpha: 0.0, beta: 1.0, window: None };
        assert_eq!(keys(&fuse_unordered(lex.clone(), vec.clone(), &combine)), vec!["a", "b"]);
        assert_eq!(keys(&fuse(lex, vec, &combine)), vec!["b", "a"]);
    }
}
