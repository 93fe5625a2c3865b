use crate::iterators::intersect::min_span;
use crate::iterators::{IndexResult, TermMatch};

/// Scorer trait
pub trait Scorer: Send + Sync {
    fn score(&self, result: &IndexResult, doc: &DocStats<'_>, stats: &ScoringStats) -> f64;

    fn name(&self) -> &str;

    /// Score plus a one-line breakdown, for DEBUG output.
    fn explain(&self, result: &IndexResult, doc: &DocStats<'_>, stats: &ScoringStats) -> (f64, String) {
        let s = self.score(result, doc, stats);
        (s, format!("{}: {:.6}", self.name(), s))
    }
}

/// Per-document state a scorer may read.
#[derive(Debug, Clone, Copy)]
pub struct DocStats<'a> {
    pub doc_len: u32,     // Word tokens across TEXT fields
    pub max_freq: u32,
    pub doc_score: f64,   // Rule-assigned document score
    pub payload: Option<&'a [u8]>,
}

/// Collection state captured when the query is planned.
#[derive(Debug, Clone)]
pub struct ScoringStats {
    pub total_docs: usize,
    pub avg_doc_len: f64,
    pub field_weights: Vec<f64>, // By TEXT mask bit
    /// Tag matches filter but never score (hybrid SEARCH half).
    pub ignore_tags: bool,
    pub query_payload: Option<Vec<u8>>,
    pub tanh_factor: f64,
}

impl Default for ScoringStats {
    fn default() -> Self {
        ScoringStats {
            total_docs: 0,
            avg_doc_len: 0.0,
            field_weights: vec![1.0; 64],
            ignore_tags: false,
            query_payload: None,
            tanh_factor: 4.0,
        }
    }
}

impl ScoringStats {
    /// Highest weight among the fields in `mask`; 1.0 when no field bit is set.
    pub fn field_weight(&self, mask: u64) -> f64 {
        let mut best: Option<f64> = None;
        let mut m = mask;
        while m != 0 {
            let bit = m.trailing_zeros() as usize;
            m &= m - 1;
            if let Some(w) = self.field_weights.get(bit) {
                best = Some(best.map_or(*w, |b: f64| b.max(*w)));
            }
        }
        best.unwrap_or(1.0)
    }

    fn scored_terms<'r>(&self, result: &'r IndexResult) -> impl Iterator<Item = &'r TermMatch> + 'r {
        let ignore_tags = self.ignore_tags;
        result.terms.iter().filter(move |t| !(ignore_tags && t.is_tag))
    }

    /// log2(1 + N/df)
    fn idf(&self, doc_freq: usize) -> f64 {
        (1.0 + self.total_docs as f64 / doc_freq.max(1) as f64).log2()
    }

    /// ln(1 + (N - df + 0.5) / (df + 0.5))
    fn bm25_idf(&self, doc_freq: usize) -> f64 {
        let n = self.total_docs as f64;
        let df = doc_freq as f64;
        (1.0 + ((n - df + 0.5) / (df + 0.5)).max(0.0)).ln()
    }
}

/// Penalty for matched terms spread apart: 1 when they sit next to each
/// other, falling with the square of the extra span.
pub fn proximity_penalty(result: &IndexResult) -> f64 {
    let lists: Vec<Vec<u32>> = result
        .terms
        .iter()
        .filter(|t| !t.offsets.is_empty())
        .map(|t| t.offsets.clone())
        .collect();
    if lists.len() < 2 {
        return 1.0;
    }
    match min_span(&lists, false) {
        Some(span) => {
            let gap = span.saturating_sub(lists.len() as u64 - 1) as f64;
            1.0 / ((1.0 + gap) * (1.0 + gap))
        }
        None => 1.0,
    }
}

/// TF-IDF Scorer
pub struct TfIdfScorer {
    /// Divide by document length instead of the most frequent term.
    pub doc_norm: bool,
}

impl TfIdfScorer {
    pub fn new(doc_norm: bool) -> Self {
        TfIdfScorer { doc_norm }
    }
}

impl Scorer for TfIdfScorer {
    fn score(&self, result: &IndexResult, doc: &DocStats<'_>, stats: &ScoringStats) -> f64 {
        let raw: f64 = stats
            .scored_terms(result)
            .map(|t| t.freq as f64 * t.weight * stats.field_weight(t.field_mask) * stats.idf(t.doc_freq))
            .sum();
        let norm = if self.doc_norm { doc.doc_len } else { doc.max_freq };
        if norm == 0 {
            return 0.0;
        }
        raw / norm as f64 * doc.doc_score * proximity_penalty(result)
    }

    fn name(&self) -> &str {
        if self.doc_norm { "TFIDF.DOCNORM" } else { "TFIDF" }
    }
}

/// BM25 variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bm25Flavor {
    /// Legacy form: b = 0.5, proximity penalty, scaled by doc score.
    Classic,
    /// Textbook form: b = 0.75, scaled by doc score.
    Std,
    /// Std squashed through tanh(score / factor).
    Tanh,
}

pub struct BM25Scorer {
    pub k1: f64,  // Term frequency saturation
    pub b: f64,   // Length normalization strength
    pub flavor: Bm25Flavor,
}

impl BM25Scorer {
    pub fn new(flavor: Bm25Flavor) -> Self {
        let b = if flavor == Bm25Flavor::Classic { 0.5 } else { 0.75 };
        BM25Scorer { k1: 1.2, b, flavor }
    }

    fn raw(&self, result: &IndexResult, doc: &DocStats<'_>, stats: &ScoringStats) -> f64 {
        let len_ratio = if stats.avg_doc_len > 0.0 { doc.doc_len as f64 / stats.avg_doc_len } else { 1.0 };
        stats
            .scored_terms(result)
            .map(|t| {
                let f = t.freq as f64 * stats.field_weight(t.field_mask);
                let idf = stats.bm25_idf(t.doc_freq);
                t.weight * idf * f * (self.k1 + 1.0) / (f + self.k1 * (1.0 - self.b + self.b * len_ratio))
            })
            .sum()
    }
}

impl Scorer for BM25Scorer {
    fn score(&self, result: &IndexResult, doc: &DocStats<'_>, stats: &ScoringStats) -> f64 {
        let raw = self.raw(result, doc, stats) * doc.doc_score;
        match self.flavor {
            Bm25Flavor::Classic => raw * proximity_penalty(result),
            Bm25Flavor::Std => raw,
            Bm25Flavor::Tanh => (raw / stats.tanh_factor.max(f64::EPSILON)).tanh(),
        }
    }

    fn name(&self) -> &str {
        match self.flavor {
            Bm25Flavor::Classic => "BM25",
            Bm25Flavor::Std => "BM25STD",
            Bm25Flavor::Tanh => "BM25STD.TANH",
        }
    }

    fn explain(&self, result: &IndexResult, doc: &DocStats<'_>, stats: &ScoringStats) -> (f64, String) {
        let s = self.score(result, doc, stats);
        let terms: Vec<String> = stats
            .scored_terms(result)
            .map(|t| format!("{}(tf={}, df={})", t.term, t.freq, t.doc_freq))
            .collect();
        (
            s,
            format!(
                "{}: {:.6} = sum[{}] * docscore {} (len {}, avg {:.2})",
                self.name(),
                s,
                terms.join(", "),
                doc.doc_score,
                doc.doc_len,
                stats.avg_doc_len
            ),
        )
    }
}

/// Highest per-field sum of weighted frequencies.
pub struct DisMaxScorer;

impl Scorer for DisMaxScorer {
    fn score(&self, result: &IndexResult, _doc: &DocStats<'_>, stats: &ScoringStats) -> f64 {
        let mut per_field = [0.0f64; 64];
        let mut any = false;
        for t in stats.scored_terms(result) {
            let contrib = t.freq as f64 * t.weight;
            if t.field_mask == 0 {
                per_field[0] += contrib;
                any = true;
                continue;
            }
            let mut m = t.field_mask;
            while m != 0 {
                let bit = m.trailing_zeros() as usize;
                m &= m - 1;
                per_field[bit] += contrib * stats.field_weights.get(bit).copied().unwrap_or(1.0);
                any = true;
            }
        }
        if !any {
            return 0.0;
        }
        per_field.iter().copied().fold(0.0, f64::max)
    }

    fn name(&self) -> &str {
        "DISMAX"
    }
}

pub struct DocScoreScorer;

impl Scorer for DocScoreScorer {
    fn score(&self, _result: &IndexResult, doc: &DocStats<'_>, _stats: &ScoringStats) -> f64 {
        doc.doc_score
    }

    fn name(&self) -> &str {
        "DOCSCORE"
    }
}

/// 1 / (1 + bit distance) between the document payload and the query
/// payload. Zero when either is absent or their lengths differ.
pub struct HammingScorer;

impl Scorer for HammingScorer {
    fn score(&self, _result: &IndexResult, doc: &DocStats<'_>, stats: &ScoringStats) -> f64 {
        let (Some(a), Some(b)) = (doc.payload, stats.query_payload.as_deref()) else {
            return 0.0;
        };
        if a.len() != b.len() {
            return 0.0;
        }
        let dist: u32 = a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum();
        1.0 / (1.0 + dist as f64)
    }

    fn name(&self) -> &str {
        "HAMMING"
    }
}

/// Named scoring functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScorerKind {
    TfIdf,
    TfIdfDocNorm,
    Bm25,
    Bm25Std,
    Bm25StdNorm,
    Bm25StdTanh,
    DisMax,
    DocScore,
    Hamming,
}

impl ScorerKind {
    pub const ALL: [ScorerKind; 9] = [
        ScorerKind::TfIdf,
        ScorerKind::TfIdfDocNorm,
        ScorerKind::Bm25,
        ScorerKind::Bm25Std,
        ScorerKind::Bm25StdNorm,
        ScorerKind::Bm25StdTanh,
        ScorerKind::DisMax,
        ScorerKind::DocScore,
        ScorerKind::Hamming,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        Self::ALL.into_iter().find(|k| k.name() == upper)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScorerKind::TfIdf => "TFIDF",
            ScorerKind::TfIdfDocNorm => "TFIDF.DOCNORM",
            ScorerKind::Bm25 => "BM25",
            ScorerKind::Bm25Std => "BM25STD",
            ScorerKind::Bm25StdNorm => "BM25STD.NORM",
            ScorerKind::Bm25StdTanh => "BM25STD.TANH",
            ScorerKind::DisMax => "DISMAX",
            ScorerKind::DocScore => "DOCSCORE",
            ScorerKind::Hamming => "HAMMING",
        }
    }

    pub fn build(&self) -> Box<dyn Scorer> {
        match self {
            ScorerKind::TfIdf => Box::new(TfIdfScorer::new(false)),
            ScorerKind::TfIdfDocNorm => Box::new(TfIdfScorer::new(true)),
            ScorerKind::Bm25 => Box::new(BM25Scorer::new(Bm25Flavor::Classic)),
            ScorerKind::Bm25Std | ScorerKind::Bm25StdNorm => Box::new(BM25Scorer::new(Bm25Flavor::Std)),
            ScorerKind::Bm25StdTanh => Box::new(BM25Scorer::new(Bm25Flavor::Tanh)),
            ScorerKind::DisMax => Box::new(DisMaxScorer),
            ScorerKind::DocScore => Box::new(DocScoreScorer),
            ScorerKind::Hamming => Box::new(HammingScorer),
        }
    }

    /// Scores are rescaled by the result set's min and max once all rows
    /// are known.
    pub fn normalizes_results(&self) -> bool {
        *self == ScorerKind::Bm25StdNorm
    }

    /// HAMMING compares payloads, which the lexical half of HYBRID lacks.
    pub fn allowed_in_hybrid(&self) -> bool {
        *self != ScorerKind::Hamming
    }
}

/// Min-max rescaling into [0, 1]. A flat set maps to 1.
pub fn normalize_scores(scores: &mut [f64]) {
    let (min, max) = scores
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    if scores.is_empty() {
        return;
    }
    let range = max - min;
    for s in scores.iter_mut() {
        *s = if range > 0.0 { (*s - min) / range } else { 1.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DocId;
    use std::sync::Arc;

    fn term(t: &str, freq: u32, df: usize, mask: u64, offsets: Vec<u32>) -> TermMatch {
        TermMatch { term: Arc::from(t), doc_freq: df, freq, field_mask: mask, offsets, weight: 1.0, is_tag: false }
    }

    fn doc(len: u32) -> DocStats<'static> {
        DocStats { doc_len: len, max_freq: 2, doc_score: 1.0, payload: None }
    }

    fn stats() -> ScoringStats {
        ScoringStats { total_docs: 100, avg_doc_len: 10.0, ..Default::default() }
    }

    #[test]
    fn test_from_name() {
        assert_eq!(ScorerKind::from_name("bm25std.tanh"), Some(ScorerKind::Bm25StdTanh));
        assert_eq!(ScorerKind::from_name("nope"), None);
        for k in ScorerKind::ALL {
            assert_eq!(k.build().name(), if k == ScorerKind::Bm25StdNorm { "BM25STD" } else { k.name() });
        }
    }

    #[test]
    fn test_rare_terms_score_higher() {
        let scorer = BM25Scorer::new(Bm25Flavor::Std);
        let rare = IndexResult { doc_id: DocId(1), terms: vec![term("a", 1, 2, 1, vec![])], distance: None };
        let common = IndexResult { doc_id: DocId(1), terms: vec![term("b", 1, 90, 1, vec![])], distance: None };
        assert!(scorer.score(&rare, &doc(10), &stats()) > scorer.score(&common, &doc(10), &stats()));
    }

    #[test]
    fn test_shorter_docs_score_higher() {
        let scorer = BM25Scorer::new(Bm25Flavor::Std);
        let r = IndexResult { doc_id: DocId(1), terms: vec![term("a", 1, 5, 1, vec![])], distance: None };
        assert!(scorer.score(&r, &doc(5), &stats()) > scorer.score(&r, &doc(50), &stats()));
    }

    #[test]
    fn test_tanh_is_bounded() {
        let scorer = BM25Scorer::new(Bm25Flavor::Tanh);
        let r = IndexResult { doc_id: DocId(1), terms: vec![term("a", 50, 1, 1, vec![])], distance: None };
        let s = scorer.score(&r, &doc(5), &stats());
        assert!(s > 0.0 && s < 1.0);
    }

    #[test]
    fn test_proximity_penalty() {
        let near = IndexResult {
            doc_id: DocId(1),
            terms: vec![term("a", 1, 5, 1, vec![3]), term("b", 1, 5, 1, vec![4])],
            distance: None,
        };
        let far = IndexResult {
            doc_id: DocId(1),
            terms: vec![term("a", 1, 5, 1, vec![3]), term("b", 1, 5, 1, vec![7])],
            distance: None,
        };
        assert_eq!(proximity_penalty(&near), 1.0);
        assert!((proximity_penalty(&far) - 1.0 / 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_field_weights_and_tags() {
        let mut s = stats();
        s.field_weights[1] = 3.0;
        assert_eq!(s.field_weight(0b11), 3.0);
        assert_eq!(s.field_weight(0), 1.0);
        let mut tag = term("red", 1, 5, 0, vec![]);
        tag.is_tag = true;
        let r = IndexResult { doc_id: DocId(1), terms: vec![tag], distance: None };
        let scorer = TfIdfScorer::new(false);
        assert!(scorer.score(&r, &doc(4), &s) > 0.0);
        s.ignore_tags = true;
        assert_eq!(scorer.score(&r, &doc(4), &s), 0.0);
    }

    #[test]
    fn test_dismax_takes_best_field() {
        let r = IndexResult {
            doc_id: DocId(1),
            terms: vec![term("a", 2, 5, 0b01, vec![]), term("b", 3, 5, 0b10, vec![])],
            distance: None,
        };
        assert_eq!(DisMaxScorer.score(&r, &doc(4), &stats()), 3.0);
    }

    #[test]
    fn test_hamming() {
        let mut s = stats();
        s.query_payload = Some(vec![0b1111]);
        let r = IndexResult::bare(DocId(1));
        let d = DocStats { payload: Some(&[0b0111]), ..doc(1) };
        assert_eq!(HammingScorer.score(&r, &d, &s), 0.5);
        assert_eq!(HammingScorer.score(&r, &doc(1), &s), 0.0);
    }

    #[test]
    fn test_normalize_scores() {
        let mut v = vec![2.0, 4.0, 6.0];
        normalize_scores(&mut v);
        assert_eq!(v, vec![0.0, 0.5, 1.0]);
    }
}
