use crate::compression::codec::{PostingEntry, RecordFlags};
use crate::core::error::Result;
use crate::core::types::DocId;
use crate::index::inverted::PostingSnapshot;
use crate::index::terms::{Expansion, TermDictionary};

pub const EMPTY_TAG: &str = "__empty";

/// Values of one TAG field. Each distinct (folded) value owns a doc-id-only
/// posting list.
#[derive(Debug)]
pub struct TagIndex {
    values: TermDictionary,
    separator: char,
    case_sensitive: bool,
}

impl TagIndex {
    pub fn new(separator: char, case_sensitive: bool, with_suffixes: bool, raw_docids: bool, block_size: usize) -> Self {
        TagIndex {
            values: TermDictionary::new(RecordFlags::tag(raw_docids), block_size, with_suffixes),
            separator,
            case_sensitive,
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn fold(&self, value: &str) -> String {
        if self.case_sensitive { value.to_string() } else { value.to_lowercase() }
    }

    /// Splits a raw field value into trimmed, folded tags. An empty value
    /// yields nothing; callers decide whether to index `__empty`.
    pub fn split(&self, raw: &str) -> Vec<String> {
        let mut out: Vec<String> = raw
            .split(self.separator)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| self.fold(t))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Indexes pre-split tags. Returns bytes written.
    pub fn add(&mut self, doc_id: DocId, tags: &[String]) -> Result<usize> {
        let mut bytes = 0;
        for tag in tags {
            bytes += self.values.append(tag, &PostingEntry::doc(doc_id))?;
        }
        Ok(bytes)
    }

    pub fn lookup(&self, value: &str) -> Option<PostingSnapshot> {
        self.values.get(&self.fold(value)).map(|l| l.snapshot())
    }

    pub fn expand_prefix(&self, prefix: &str, max: usize) -> Expansion {
        self.values.expand_prefix(&self.fold(prefix), max)
    }

    pub fn expand_suffix(&self, suffix: &str, max: usize) -> Expansion {
        self.values.expand_suffix(&self.fold(suffix), max)
    }

    pub fn expand_infix(&self, infix: &str, max: usize) -> Expansion {
        self.values.expand_infix(&self.fold(infix), max)
    }

    pub fn expand_wildcard(&self, pattern: &str, max: usize) -> Result<Expansion> {
        self.values.expand_wildcard(&self.fold(pattern), max)
    }

    /// Distinct values, for TAGVALS.
    pub fn values(&self) -> Vec<String> {
        self.values.iter().filter(|(_, l)| !l.is_empty()).map(|(k, _)| k.clone()).collect()
    }

    pub fn dictionary(&self) -> &TermDictionary {
        &self.values
    }

    pub fn dictionary_mut(&mut self) -> &mut TermDictionary {
        &mut self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::inverted::PostingReader;

    fn ids(snap: PostingSnapshot) -> Vec<u64> {
        let mut r = PostingReader::new(snap, u64::MAX);
        let mut out = Vec::new();
        while let Some(e) = r.next() {
            out.push(e.doc_id.0);
        }
        out
    }

    #[test]
    fn test_split_trims_and_folds() {
        let idx = TagIndex::new(',', false, false, false, 16);
        assert_eq!(idx.split(" Red, blue ,red,"), vec!["blue", "red"]);
        assert!(idx.split("").is_empty());
    }

    #[test]
    fn test_case_sensitive_lookup() {
        let mut idx = TagIndex::new(',', true, false, false, 16);
        let tags = idx.split("Red");
        idx.add(DocId(1), &tags).unwrap();
        assert!(idx.lookup("red").is_none());
        assert_eq!(ids(idx.lookup("Red").unwrap()), vec![1]);
    }

    #[test]
    fn test_custom_separator_and_prefix() {
        let mut idx = TagIndex::new(';', false, true, false, 16);
        for (id, raw) in [(1u64, "news;sport"), (2, "newsletter"), (3, "weather")] {
            let tags = idx.split(raw);
            idx.add(DocId(id), &tags).unwrap();
        }
        assert_eq!(idx.expand_prefix("NEWS", 10).terms, vec!["news", "newsletter"]);
        assert_eq!(idx.expand_suffix("her", 10).terms, vec!["weather"]);
        assert_eq!(idx.values(), vec!["news", "newsletter", "sport", "weather"]);
    }

    #[test]
    fn test_raw_docids() {
        let mut idx = TagIndex::new(',', false, false, true, 16);
        idx.add(DocId(7), &["a".to_string()]).unwrap();
        idx.add(DocId(9), &["a".to_string()]).unwrap();
        assert_eq!(ids(idx.lookup("a").unwrap()), vec![7, 9]);
    }
}
