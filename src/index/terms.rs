use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use fst::{Automaton, IntoStreamer, Set, Streamer};
use levenshtein_automata::{Distance, LevenshteinAutomatonBuilder, DFA, SINK_STATE};
use parking_lot::Mutex;
use regex::Regex;
use crate::analysis::token::{PHONETIC_PREFIX, STEM_PREFIX};
use crate::compression::codec::{PostingEntry, RecordFlags};
use crate::core::error::Result;
use crate::index::inverted::InvertedIndex;

/// Terms produced by expanding a pattern against the dictionary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub terms: Vec<String>,
    pub truncated: bool, // Hit the expansion cap
}

impl Expansion {
    fn push(&mut self, term: &str, max: usize) -> bool {
        if self.terms.len() >= max {
            self.truncated = true;
            return false;
        }
        self.terms.push(term.to_string());
        true
    }
}

/// Drives an `fst` search with a Levenshtein DFA.
struct DfaAutomaton<'a>(&'a DFA);

impl Automaton for DfaAutomaton<'_> {
    type State = u32;

    fn start(&self) -> u32 {
        self.0.initial_state()
    }

    fn is_match(&self, state: &u32) -> bool {
        matches!(self.0.distance(*state), Distance::Exact(_))
    }

    fn can_match(&self, state: &u32) -> bool {
        *state != SINK_STATE
    }

    fn accept(&self, state: &u32, byte: u8) -> u32 {
        self.0.transition(*state, byte)
    }
}

fn is_companion(term: &str) -> bool {
    term.starts_with(STEM_PREFIX) || term.starts_with(PHONETIC_PREFIX)
}

/// Translates a `w'...'` pattern (`*` any run, `?` one char, `\` escapes)
/// into an anchored regex.
pub fn wildcard_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Ok(Regex::new(&re)?)
}

/// Sorted term → posting list map with the auxiliary structures needed for
/// pattern expansion. Shared by TEXT fields (one dictionary per index) and
/// TAG fields (one per field).
pub struct TermDictionary {
    terms: BTreeMap<String, InvertedIndex>,
    suffixes: Option<BTreeMap<String, BTreeSet<String>>>, // Every suffix -> terms ending with it
    fst: Mutex<Option<Arc<Set<Vec<u8>>>>>,
    flags: RecordFlags,
    block_size: usize,
}

impl std::fmt::Debug for TermDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermDictionary")
            .field("terms", &self.terms.len())
            .field("flags", &self.flags)
            .finish()
    }
}

impl TermDictionary {
    pub fn new(flags: RecordFlags, block_size: usize, with_suffixes: bool) -> Self {
        TermDictionary {
            terms: BTreeMap::new(),
            suffixes: if with_suffixes { Some(BTreeMap::new()) } else { None },
            fst: Mutex::new(None),
            flags,
            block_size,
        }
    }

    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn has_suffix_index(&self) -> bool {
        self.suffixes.is_some()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn get(&self, term: &str) -> Option<&InvertedIndex> {
        self.terms.get(term)
    }

    pub fn get_mut(&mut self, term: &str) -> Option<&mut InvertedIndex> {
        self.terms.get_mut(term)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InvertedIndex)> {
        self.terms.iter()
    }

    /// Terms strictly after `cursor`, at most `limit` of them. Drives the
    /// incremental GC walk.
    pub fn terms_after(&self, cursor: Option<&str>, limit: usize) -> Vec<String> {
        use std::ops::Bound;
        let lower = match cursor {
            Some(c) => Bound::Excluded(c.to_string()),
            None => Bound::Unbounded,
        };
        self.terms
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Appends a record to `term`, creating the list on first use. Returns
    /// the bytes written.
    pub fn append(&mut self, term: &str, entry: &PostingEntry) -> Result<usize> {
        if let Some(list) = self.terms.get_mut(term) {
            return list.append(entry);
        }
        let mut list = InvertedIndex::new(self.flags, self.block_size);
        let added = list.append(entry)?;
        self.terms.insert(term.to_string(), list);
        self.on_term_added(term);
        Ok(added)
    }

    pub fn insert_list(&mut self, term: String, list: InvertedIndex) {
        self.on_term_added(&term);
        self.terms.insert(term, list);
    }

    fn on_term_added(&mut self, term: &str) {
        *self.fst.lock() = None;
        if is_companion(term) {
            return;
        }
        if let Some(suffixes) = self.suffixes.as_mut() {
            for (i, _) in term.char_indices() {
                suffixes.entry(term[i..].to_string()).or_default().insert(term.to_string());
            }
        }
    }

    /// Drops a list that GC emptied.
    pub fn remove(&mut self, term: &str) -> Option<InvertedIndex> {
        let removed = self.terms.remove(term)?;
        *self.fst.lock() = None;
        if let Some(suffixes) = self.suffixes.as_mut() {
            for (i, _) in term.char_indices() {
                let key = &term[i..];
                let now_empty = match suffixes.get_mut(key) {
                    Some(set) => {
                        set.remove(term);
                        set.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    suffixes.remove(key);
                }
            }
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.terms.clear();
        if let Some(s) = self.suffixes.as_mut() {
            s.clear();
        }
        *self.fst.lock() = None;
    }

    pub fn expand_prefix(&self, prefix: &str, max: usize) -> Expansion {
        let mut out = Expansion::default();
        for (term, _) in self.terms.range(prefix.to_string()..) {
            if !term.starts_with(prefix) {
                break;
            }
            if !out.push(term, max) {
                break;
            }
        }
        out
    }

    pub fn expand_suffix(&self, suffix: &str, max: usize) -> Expansion {
        let mut out = Expansion::default();
        match &self.suffixes {
            Some(map) => {
                if let Some(terms) = map.get(suffix) {
                    for t in terms {
                        if !out.push(t, max) {
                            break;
                        }
                    }
                }
            }
            None => {
                for term in self.terms.keys() {
                    if !is_companion(term) && term.ends_with(suffix) && !out.push(term, max) {
                        break;
                    }
                }
            }
        }
        out
    }

    pub fn expand_infix(&self, infix: &str, max: usize) -> Expansion {
        let mut out = Expansion::default();
        match &self.suffixes {
            Some(map) => {
                // A term contains `infix` iff one of its suffixes starts with it
                let mut seen = BTreeSet::new();
                for (suffix, terms) in map.range(infix.to_string()..) {
                    if !suffix.starts_with(infix) {
                        break;
                    }
                    seen.extend(terms.iter().cloned());
                }
                for t in &seen {
                    if !out.push(t, max) {
                        break;
                    }
                }
            }
            None => {
                for term in self.terms.keys() {
                    if !is_companion(term) && term.contains(infix) && !out.push(term, max) {
                        break;
                    }
                }
            }
        }
        out
    }

    fn fst_set(&self) -> Result<Arc<Set<Vec<u8>>>> {
        let mut cached = self.fst.lock();
        if let Some(set) = cached.as_ref() {
            return Ok(set.clone());
        }
        let set = Arc::new(Set::from_iter(self.terms.keys())?);
        *cached = Some(set.clone());
        Ok(set)
    }

    /// Terms within `distance` edits of `term`.
    pub fn expand_fuzzy(&self, term: &str, distance: u8, max: usize) -> Result<Expansion> {
        let set = self.fst_set()?;
        let dfa = LevenshteinAutomatonBuilder::new(distance, false).build_dfa(term);
        let mut stream = set.search(DfaAutomaton(&dfa)).into_stream();
        let mut out = Expansion::default();
        while let Some(key) = stream.next() {
            let Ok(candidate) = std::str::from_utf8(key) else { continue };
            if is_companion(candidate) {
                continue;
            }
            if !out.push(candidate, max) {
                break;
            }
        }
        Ok(out)
    }

    pub fn expand_wildcard(&self, pattern: &str, max: usize) -> Result<Expansion> {
        let re = wildcard_to_regex(pattern)?;
        // Literal head narrows the scan to a prefix range
        let head: String = pattern.chars().take_while(|c| !matches!(c, '*' | '?' | '\\')).collect();
        let mut out = Expansion::default();
        for (term, _) in self.terms.range(head.clone()..) {
            if !term.starts_with(&head) {
                break;
            }
            if !is_companion(term) && re.is_match(term) && !out.push(term, max) {
                break;
            }
        }
        Ok(out)
    }

    pub fn total_bytes(&self) -> usize {
        self.terms.values().map(|l| l.bytes()).sum()
    }

    pub fn total_records(&self) -> usize {
        self.terms.values().map(|l| l.num_docs()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DocId;

    fn dict(terms: &[&str], suffixes: bool) -> TermDictionary {
        let mut d = TermDictionary::new(RecordFlags::DOCIDS_ONLY, 16, suffixes);
        for t in terms {
            d.append(t, &PostingEntry::doc(DocId(1))).unwrap();
        }
        d
    }

    #[test]
    fn test_prefix_expansion_and_cap() {
        let d = dict(&["hello", "help", "helmet", "world"], false);
        let exp = d.expand_prefix("hel", 10);
        assert_eq!(exp.terms, vec!["hello", "helmet", "help"]);
        assert!(!exp.truncated);
        let capped = d.expand_prefix("hel", 2);
        assert_eq!(capped.terms.len(), 2);
        assert!(capped.truncated);
    }

    #[test]
    fn test_suffix_and_infix_agree_with_scan() {
        let terms = ["running", "jumping", "ring", "bring", "+run"];
        for with_trie in [true, false] {
            let d = dict(&terms, with_trie);
            let mut suffix = d.expand_suffix("ing", 10).terms;
            suffix.sort();
            assert_eq!(suffix, vec!["bring", "jumping", "ring", "running"]);
            let mut infix = d.expand_infix("rin", 10).terms;
            infix.sort();
            assert_eq!(infix, vec!["bring", "ring"]);
        }
    }

    #[test]
    fn test_remove_cleans_suffixes() {
        let mut d = dict(&["ring", "bring"], true);
        d.remove("ring");
        assert_eq!(d.expand_suffix("ing", 10).terms, vec!["bring"]);
    }

    #[test]
    fn test_fuzzy_distance() {
        let d = dict(&["hello", "hallo", "help", "yellow", "+hello"], false);
        let one = d.expand_fuzzy("hello", 1, 10).unwrap().terms;
        assert_eq!(one, vec!["hallo", "hello"]);
        let two = d.expand_fuzzy("hello", 2, 10).unwrap().terms;
        assert!(two.contains(&"help".to_string()));
        assert!(two.contains(&"yellow".to_string()));
    }

    #[test]
    fn test_fuzzy_sees_new_terms() {
        let mut d = dict(&["cat"], false);
        assert_eq!(d.expand_fuzzy("cot", 1, 10).unwrap().terms, vec!["cat"]);
        d.append("cut", &PostingEntry::doc(DocId(2))).unwrap();
        assert_eq!(d.expand_fuzzy("cot", 1, 10).unwrap().terms, vec!["cat", "cut"]);
    }

    #[test]
    fn test_wildcard_pattern() {
        let d = dict(&["hello", "hallo", "hollow", "help"], false);
        let exp = d.expand_wildcard("h?llo", 10).unwrap();
        assert_eq!(exp.terms, vec!["hallo", "hello"]);
        let star = d.expand_wildcard("he*", 10).unwrap();
        assert_eq!(star.terms, vec!["hello", "help"]);
    }

    #[test]
    fn test_terms_after_walks_in_order() {
        let d = dict(&["a", "b", "c", "d"], false);
        assert_eq!(d.terms_after(None, 2), vec!["a", "b"]);
        assert_eq!(d.terms_after(Some("b"), 2), vec!["c", "d"]);
    }
}
