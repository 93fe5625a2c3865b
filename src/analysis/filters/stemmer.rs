use rust_stemmers::{Algorithm, Stemmer};
use crate::analysis::filter::TokenFilter;
use crate::analysis::token::{Token, TokenKind, STEM_PREFIX};

/// Emits a `+stem` companion next to each word whose stem differs from it.
/// Words shorter than `min_len` are not stemmed.
pub struct StemmerFilter {
    pub algorithm: Algorithm,
    pub min_len: usize,
}

impl StemmerFilter {
    pub fn new(algorithm: Algorithm, min_len: usize) -> Self {
        StemmerFilter { algorithm, min_len }
    }

    /// The companion term for `word`, if stemming changes it.
    pub fn stem_term(stemmer: &Stemmer, word: &str, min_len: usize) -> Option<String> {
        if word.chars().count() < min_len {
            return None;
        }
        let stem = stemmer.stem(word);
        if stem.is_empty() || stem == word {
            None
        } else {
            Some(format!("{}{}", STEM_PREFIX, stem))
        }
    }
}

impl TokenFilter for StemmerFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        let stemmer = Stemmer::create(self.algorithm);
        let mut out = Vec::with_capacity(tokens.len() * 2);

        for token in tokens {
            let companion = if token.kind == TokenKind::Word {
                Self::stem_term(&stemmer, &token.text, self.min_len)
                    .map(|stem| token.companion(stem, TokenKind::Stem))
            } else {
                None
            };
            out.push(token);
            if let Some(c) = companion {
                out.push(c);
            }
        }
        out
    }

    fn name(&self) -> &str {
        "stemmer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_companion_added() {
        let out = StemmerFilter::new(Algorithm::English, 4)
            .filter(vec![Token::new("running".into(), 3, 0)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].text, "+run");
        assert_eq!(out[1].position, 3);
        assert_eq!(out[1].kind, TokenKind::Stem);
    }

    #[test]
    fn test_short_words_not_stemmed() {
        let out = StemmerFilter::new(Algorithm::English, 4)
            .filter(vec![Token::new("ran".into(), 0, 0)]);
        assert_eq!(out.len(), 1);
    }
}
