use std::collections::HashSet;
use std::sync::Arc;
use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

pub const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "is", "the", "an", "and", "are", "as", "at", "be", "but", "by", "for",
    "if", "in", "into", "it", "no", "not", "of", "on", "or", "such", "that", "their",
    "then", "there", "these", "they", "this", "to", "was", "will", "with",
];

/// Drops stopwords. Positions are kept, so a removed word leaves a gap that
/// phrase matching still sees.
#[derive(Clone)]
pub struct StopWordFilter {
    pub stop_words: Arc<HashSet<String>>,
}

impl StopWordFilter {
    pub fn new(stop_words: Vec<String>) -> Self {
        StopWordFilter {
            stop_words: Arc::new(stop_words.into_iter().map(|w| w.to_lowercase()).collect()),
        }
    }

    pub fn english() -> Self {
        StopWordFilter::new(DEFAULT_STOPWORDS.iter().map(|w| w.to_string()).collect())
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stop_words.contains(&word.to_lowercase())
    }
}

impl TokenFilter for StopWordFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens.into_iter()
            .filter(|token| !self.stop_words.contains(&token.text.to_lowercase()))
            .collect()
    }

    fn name(&self) -> &str {
        "stop_words"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_positions_of_survivors() {
        let tokens = vec![
            Token::new("the".into(), 0, 0),
            Token::new("dog".into(), 1, 4),
        ];
        let out = StopWordFilter::english().filter(tokens);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].position, 1);
    }

    #[test]
    fn test_custom_list() {
        let f = StopWordFilter::new(vec!["Foo".into()]);
        assert!(f.is_stopword("foo"));
        assert!(!f.is_stopword("the"));
    }
}
