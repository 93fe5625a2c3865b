use std::collections::HashSet;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_segmentation::UnicodeSegmentation;
use crate::analysis::token::{PHONETIC_PREFIX, STEM_PREFIX};
use crate::core::error::Result;
use crate::core::types::Value;
use crate::pipeline::{ExecCtx, Processor, ResultProcessor, Row, Step};

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightSpec {
    /// `None` highlights every loaded text field.
    pub fields: Option<Vec<String>>,
    pub open: String,
    pub close: String,
}

impl Default for HighlightSpec {
    fn default() -> Self {
        HighlightSpec { fields: None, open: "<b>".into(), close: "</b>".into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarizeSpec {
    pub fields: Option<Vec<String>>,
    pub frags: usize,
    /// Words per fragment.
    pub len: usize,
    pub separator: String,
}

impl Default for SummarizeSpec {
    fn default() -> Self {
        SummarizeSpec { fields: None, frags: 3, len: 20, separator: "... ".into() }
    }
}

/// Words a row matched, taken from its iterator result.
struct MatchSet {
    words: HashSet<String>,
    stems: HashSet<String>,
    stemmer: Stemmer,
}

impl MatchSet {
    fn of(row: &Row, algorithm: Algorithm) -> Self {
        let mut words = HashSet::new();
        let mut stems = HashSet::new();
        if let Some(result) = &row.result {
            for t in result.terms.iter().filter(|t| !t.is_tag) {
                let term: &str = &t.term;
                if let Some(stem) = term.strip_prefix(STEM_PREFIX) {
                    stems.insert(stem.to_string());
                } else if !term.starts_with(PHONETIC_PREFIX) {
                    words.insert(term.to_string());
                }
            }
        }
        MatchSet { words, stems, stemmer: Stemmer::create(algorithm) }
    }

    fn is_empty(&self) -> bool {
        self.words.is_empty() && self.stems.is_empty()
    }

    fn matches(&self, word: &str) -> bool {
        let lower = word.to_lowercase();
        if self.words.contains(&lower) {
            return true;
        }
        !self.stems.is_empty() && {
            let stem = self.stemmer.stem(&lower);
            self.stems.contains(stem.as_ref()) || self.words.contains(stem.as_ref())
        }
    }
}

/// Word spans of `text` as (byte start, word).
fn words(text: &str) -> Vec<(usize, &str)> {
    text.split_word_bound_indices()
        .filter(|(_, w)| w.chars().any(|c| c.is_alphanumeric()))
        .collect()
}

fn highlight_text(text: &str, set: &MatchSet, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for (start, word) in words(text) {
        if set.matches(word) {
            out.push_str(&text[last..start]);
            out.push_str(open);
            out.push_str(word);
            out.push_str(close);
            last = start + word.len();
        }
    }
    out.push_str(&text[last..]);
    out
}

/// The `frags` densest windows of `len` words, kept in text order.
fn summarize_text(text: &str, set: &MatchSet, spec: &SummarizeSpec) -> String {
    let spans = words(text);
    let len = spec.len.max(1);
    if spans.is_empty() {
        return String::new();
    }
    let hits: Vec<usize> = spans.iter().enumerate().filter(|(_, (_, w))| set.matches(w)).map(|(i, _)| i).collect();

    let fragment = |from: usize| -> String {
        let to = (from + len).min(spans.len());
        let begin = spans[from].0;
        let (s, w) = spans[to - 1];
        text[begin..s + w.len()].to_string()
    };

    if hits.is_empty() {
        return fragment(0);
    }
    // Greedy: one window per hit, skipping hits a chosen window covers
    let mut windows: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < hits.len() {
        let from = hits[i].saturating_sub(len / 4);
        let end = from + len;
        let covered = hits[i..].iter().take_while(|&&h| h < end).count();
        windows.push((from, covered));
        i += covered.max(1);
    }
    windows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    windows.truncate(spec.frags.max(1));
    windows.sort_by_key(|w| w.0);

    let parts: Vec<String> = windows.into_iter().map(|(from, _)| fragment(from)).collect();
    let mut out = parts.join(&spec.separator);
    out.push_str(&spec.separator);
    out
}

fn targets(row: &Row, fields: &Option<Vec<String>>) -> Vec<String> {
    match fields {
        Some(list) => list.iter().map(|f| f.trim_start_matches('@').to_string()).collect(),
        None => row.fields.iter().filter(|(_, v)| matches!(v, Value::Str(_))).map(|(k, _)| k.clone()).collect(),
    }
}

/// Wraps matched words of loaded text fields in the open/close tags.
pub struct HighlightProcessor {
    upstream: Processor,
    spec: HighlightSpec,
    algorithm: Algorithm,
}

impl HighlightProcessor {
    pub fn new(upstream: Processor, spec: HighlightSpec, algorithm: Algorithm) -> Self {
        HighlightProcessor { upstream, spec, algorithm }
    }
}

impl ResultProcessor for HighlightProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        let mut row = match self.upstream.next(ctx)? {
            Step::Row(r) => r,
            other => return Ok(other),
        };
        let set = MatchSet::of(&row, self.algorithm);
        if set.is_empty() {
            return Ok(Step::Row(row));
        }
        for name in targets(&row, &self.spec.fields) {
            if let Some(Value::Str(text)) = row.fields.iter().find(|(k, _)| *k == name).map(|(_, v)| v) {
                let marked = highlight_text(text, &set, &self.spec.open, &self.spec.close);
                row.set(&name, Value::Str(marked));
            }
        }
        Ok(Step::Row(row))
    }

    fn name(&self) -> &'static str {
        "Highlighter"
    }
}

/// Cuts loaded text fields down to the fragments around matched words.
pub struct SummarizeProcessor {
    upstream: Processor,
    spec: SummarizeSpec,
    algorithm: Algorithm,
}

impl SummarizeProcessor {
    pub fn new(upstream: Processor, spec: SummarizeSpec, algorithm: Algorithm) -> Self {
        SummarizeProcessor { upstream, spec, algorithm }
    }
}

impl ResultProcessor for SummarizeProcessor {
    fn next(&mut self, ctx: &mut ExecCtx) -> Result<Step> {
        let mut row = match self.upstream.next(ctx)? {
            Step::Row(r) => r,
            other => return Ok(other),
        };
        let set = MatchSet::of(&row, self.algorithm);
        for name in targets(&row, &self.spec.fields) {
            if let Some(Value::Str(text)) = row.fields.iter().find(|(k, _)| *k == name).map(|(_, v)| v) {
                let summary = summarize_text(text, &set, &self.spec);
                row.set(&name, Value::Str(summary));
            }
        }
        Ok(Step::Row(row))
    }

    fn name(&self) -> &'static str {
        "Summarizer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::core::types::{DocId, ALL_FIELDS};
    use crate::iterators::{IndexResult, TermMatch};
    use crate::pipeline::testing::{drain, row, Rows};

    fn matched(terms: &[&str], text: &str) -> Row {
        let mut r = row(1, "a", 1.0, &[("body", Value::Str(text.into())), ("n", Value::Number(1.0))]);
        let mut res = IndexResult::bare(DocId(1));
        for t in terms {
            res.terms.push(TermMatch {
                term: Arc::from(*t),
                doc_freq: 1,
                freq: 1,
                field_mask: ALL_FIELDS,
                offsets: vec![],
                weight: 1.0,
                is_tag: false,
            });
        }
        r.result = Some(res);
        r
    }

    #[test]
    fn test_highlight_words_and_stems() {
        let r = matched(&["+run", "home"], "He Runs home, running late.");
        let mut p: Processor =
            Box::new(HighlightProcessor::new(Rows::boxed(vec![r]), HighlightSpec::default(), Algorithm::English));
        let out = drain(&mut p);
        assert_eq!(
            out[0].get("body"),
            Some(&Value::Str("He <b>Runs</b> <b>home</b>, <b>running</b> late.".into()))
        );
        assert_eq!(out[0].get("n"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_highlight_without_terms_is_untouched() {
        let r = row(1, "a", 1.0, &[("body", Value::Str("plain".into()))]);
        let mut p: Processor =
            Box::new(HighlightProcessor::new(Rows::boxed(vec![r]), HighlightSpec::default(), Algorithm::English));
        assert_eq!(drain(&mut p)[0].get("body"), Some(&Value::Str("plain".into())));
    }

    #[test]
    fn test_summarize_picks_window_around_match() {
        let text = "one two three four five six seven eight nine target ten eleven twelve";
        let spec = SummarizeSpec { fields: Some(vec!["@body".into()]), frags: 1, len: 4, separator: "...".into() };
        let r = matched(&["target"], text);
        let mut p: Processor = Box::new(SummarizeProcessor::new(Rows::boxed(vec![r]), spec, Algorithm::English));
        assert_eq!(drain(&mut p)[0].get("body"), Some(&Value::Str("nine target ten eleven...".into())));
    }

    #[test]
    fn test_summarize_without_match_takes_head() {
        let spec = SummarizeSpec { fields: None, frags: 2, len: 2, separator: "|".into() };
        let r = row(1, "a", 1.0, &[("body", Value::Str("alpha beta gamma".into()))]);
        let mut p: Processor = Box::new(SummarizeProcessor::new(Rows::boxed(vec![r]), spec, Algorithm::English));
        assert_eq!(drain(&mut p)[0].get("body"), Some(&Value::Str("alpha beta".into())));
    }

    #[test]
    fn test_summary_fragments_keep_whole_tags() {
        let spec = SummarizeSpec { fields: Some(vec!["body".into()]), frags: 1, len: 3, separator: "... ".into() };
        let marks = HighlightSpec { fields: Some(vec!["body".into()]), open: "[".into(), close: "]".into() };
        let r = matched(&["hello"], "hello big world of hello things");
        let summarized: Processor = Box::new(SummarizeProcessor::new(Rows::boxed(vec![r]), spec, Algorithm::English));
        let mut p: Processor = Box::new(HighlightProcessor::new(summarized, marks, Algorithm::English));
        assert_eq!(drain(&mut p)[0].get("body"), Some(&Value::Str("[hello] big world... ".into())));
    }
}
