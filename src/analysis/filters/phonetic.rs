use std::sync::Arc;
use crate::analysis::filter::TokenFilter;
use crate::analysis::token::{Token, TokenKind, PHONETIC_PREFIX};

/// Maps a word to its phonetic key. Words with the same key sound alike.
pub trait PhoneticEncoder: Send + Sync {
    fn encode(&self, word: &str) -> Option<String>;
}

/// Metaphone-family primary key, truncated to `max_len` symbols.
pub struct MetaphoneEncoder {
    pub max_len: usize,
}

impl Default for MetaphoneEncoder {
    fn default() -> Self {
        MetaphoneEncoder { max_len: 4 }
    }
}

fn is_vowel(c: u8) -> bool {
    matches!(c, b'A' | b'E' | b'I' | b'O' | b'U' | b'Y')
}

impl PhoneticEncoder for MetaphoneEncoder {
    fn encode(&self, word: &str) -> Option<String> {
        let w: Vec<u8> = word
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_uppercase() as u8)
            .collect();
        if w.is_empty() {
            return None;
        }

        let at = |i: isize| -> u8 {
            if i < 0 || i as usize >= w.len() { 0 } else { w[i as usize] }
        };
        let mut key = String::new();
        let mut i: isize = 0;

        // Silent leading letters
        if matches!((at(0), at(1)), (b'K', b'N') | (b'G', b'N') | (b'P', b'N') | (b'A', b'E') | (b'W', b'R')) {
            i = 1;
        }
        if at(0) == b'X' {
            key.push('S');
            i = 1;
        } else if at(0) == b'W' && at(1) == b'H' {
            key.push('W');
            i = 2;
        }

        while (i as usize) < w.len() && key.len() < self.max_len {
            let c = at(i);
            // Collapse doubled letters except C
            if c != b'C' && i > 0 && at(i - 1) == c {
                i += 1;
                continue;
            }
            match c {
                b'A' | b'E' | b'I' | b'O' | b'U' | b'Y' => {
                    if i == 0 {
                        key.push('A');
                    }
                }
                b'B' => {
                    if !(at(i - 1) == b'M' && i as usize == w.len() - 1) {
                        key.push('P');
                    }
                }
                b'C' => {
                    if at(i + 1) == b'I' && at(i + 2) == b'A' {
                        key.push('X');
                    } else if at(i + 1) == b'H' {
                        if at(i - 1) == b'S' {
                            key.push('K');
                        } else {
                            key.push('X');
                        }
                        i += 1;
                    } else if matches!(at(i + 1), b'I' | b'E' | b'Y') {
                        if at(i - 1) != b'S' {
                            key.push('S');
                        }
                    } else {
                        key.push('K');
                    }
                }
                b'D' => {
                    if at(i + 1) == b'G' && matches!(at(i + 2), b'E' | b'Y' | b'I') {
                        key.push('J');
                        i += 1;
                    } else {
                        key.push('T');
                    }
                }
                b'G' => {
                    if at(i + 1) == b'H' && !is_vowel(at(i + 2)) && at(i + 2) != 0 {
                        // silent GH before a consonant
                    } else if at(i + 1) == b'N' && (i as usize + 2 >= w.len()) {
                        // silent in trailing GN
                    } else if matches!(at(i + 1), b'I' | b'E' | b'Y') {
                        key.push('J');
                    } else {
                        key.push('K');
                    }
                }
                b'H' => {
                    if is_vowel(at(i + 1)) && !matches!(at(i - 1), b'C' | b'G' | b'P' | b'S' | b'T') {
                        key.push('H');
                    }
                }
                b'K' => {
                    if at(i - 1) != b'C' {
                        key.push('K');
                    }
                }
                b'P' => {
                    if at(i + 1) == b'H' {
                        key.push('F');
                        i += 1;
                    } else {
                        key.push('P');
                    }
                }
                b'Q' => key.push('K'),
                b'S' => {
                    if at(i + 1) == b'H' {
                        key.push('X');
                        i += 1;
                    } else if at(i + 1) == b'I' && matches!(at(i + 2), b'O' | b'A') {
                        key.push('X');
                    } else {
                        key.push('S');
                    }
                }
                b'T' => {
                    if at(i + 1) == b'I' && matches!(at(i + 2), b'O' | b'A') {
                        key.push('X');
                    } else if at(i + 1) == b'H' {
                        key.push('0');
                        i += 1;
                    } else if !(at(i + 1) == b'C' && at(i + 2) == b'H') {
                        key.push('T');
                    }
                }
                b'V' => key.push('F'),
                b'W' => {
                    if is_vowel(at(i + 1)) {
                        key.push('W');
                    }
                }
                b'X' => key.push_str("KS"),
                b'Z' => key.push('S'),
                other => key.push(other as char),
            }
            i += 1;
        }

        key.truncate(self.max_len);
        if key.is_empty() { None } else { Some(key) }
    }
}

/// Emits a `<KEY` companion for every surface word.
#[derive(Clone)]
pub struct PhoneticFilter {
    pub encoder: Arc<dyn PhoneticEncoder>,
}

impl PhoneticFilter {
    pub fn new(encoder: Arc<dyn PhoneticEncoder>) -> Self {
        PhoneticFilter { encoder }
    }

    pub fn term_for(encoder: &dyn PhoneticEncoder, word: &str) -> Option<String> {
        encoder.encode(word).map(|k| format!("{}{}", PHONETIC_PREFIX, k))
    }
}

impl TokenFilter for PhoneticFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        let mut out = Vec::with_capacity(tokens.len() * 2);
        for token in tokens {
            let companion = if token.kind == TokenKind::Word {
                Self::term_for(self.encoder.as_ref(), &token.text)
                    .map(|k| token.companion(k, TokenKind::Phonetic))
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
        "phonetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(word: &str) -> String {
        MetaphoneEncoder::default().encode(word).unwrap()
    }

    #[test]
    fn test_ph_sounds_like_f() {
        assert_eq!(key("morfix"), key("morphix"));
        assert_eq!(key("morfix"), "MRFK");
    }

    #[test]
    fn test_distinct_words_differ() {
        assert_ne!(key("morfix"), key("banana"));
    }

    #[test]
    fn test_silent_leading_letters() {
        assert_eq!(key("knight"), key("night"));
    }

    #[test]
    fn test_non_alphabetic_has_no_key() {
        assert!(MetaphoneEncoder::default().encode("1234").is_none());
    }

    #[test]
    fn test_filter_adds_companion() {
        let f = PhoneticFilter::new(Arc::new(MetaphoneEncoder::default()));
        let out = f.filter(vec![Token::new("morfix".into(), 0, 0)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].text, "<MRFK");
    }
}
