use crate::analysis::token::Token;

pub const DEFAULT_SEPARATORS: &str = ",.<>{}[]\"':;!@#$%^&*()-+=~/\\|?`";

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<Token>;

    fn name(&self) -> &str;

    fn clone_box(&self) -> Box<dyn Tokenizer>;
}

/// Splits on a separator set plus whitespace. A backslash makes the next
/// separator part of the token (`hello\-world` stays one token).
#[derive(Clone)]
pub struct SeparatorTokenizer {
    pub separators: Vec<char>,
    pub lowercase: bool,
    pub max_token_length: usize,
}

impl Default for SeparatorTokenizer {
    fn default() -> Self {
        SeparatorTokenizer {
            separators: DEFAULT_SEPARATORS.chars().collect(),
            lowercase: true,
            max_token_length: 255,
        }
    }
}

impl SeparatorTokenizer {
    pub fn case_sensitive(mut self) -> Self {
        self.lowercase = false;
        self
    }

    fn is_separator(&self, c: char) -> bool {
        c.is_whitespace() || c.is_control() || self.separators.contains(&c)
    }

    fn flush(&self, buf: &mut String, span: (usize, usize), position: &mut u32, tokens: &mut Vec<Token>) {
        if buf.is_empty() {
            return;
        }
        if buf.len() <= self.max_token_length {
            let text = if self.lowercase { buf.to_lowercase() } else { buf.clone() };
            let mut token = Token::new(text, *position, span.0);
            token.length = span.1 - span.0;
            tokens.push(token);
            *position += 1;
        }
        buf.clear();
    }
}

impl Tokenizer for SeparatorTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        let mut buf = String::new();
        let mut span = (0usize, 0usize);
        let mut chars = text.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if c == '\\' {
                if let Some(&(j, next)) = chars.peek() {
                    if !next.is_whitespace() {
                        if buf.is_empty() {
                            span.0 = i;
                        }
                        buf.push(next);
                        span.1 = j + next.len_utf8();
                        chars.next();
                        continue;
                    }
                }
                self.flush(&mut buf, span, &mut position, &mut tokens);
                continue;
            }
            if self.is_separator(c) {
                self.flush(&mut buf, span, &mut position, &mut tokens);
            } else {
                if buf.is_empty() {
                    span.0 = i;
                }
                buf.push(c);
                span.1 = i + c.len_utf8();
            }
        }
        self.flush(&mut buf, span, &mut position, &mut tokens);
        tokens
    }

    fn name(&self) -> &str {
        "separator"
    }

    fn clone_box(&self) -> Box<dyn Tokenizer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_splits_on_punctuation_and_lowercases() {
        let tokens = SeparatorTokenizer::default().tokenize("Hello, World! foo-bar");
        assert_eq!(texts(&tokens), vec!["hello", "world", "foo", "bar"]);
        assert_eq!(tokens[1].position, 1);
        assert_eq!(tokens[1].offset, 7);
        assert_eq!(tokens[1].length, 5);
    }

    #[test]
    fn test_escaped_separator_joins() {
        let tokens = SeparatorTokenizer::default().tokenize("hello\\-world x");
        assert_eq!(texts(&tokens), vec!["hello-world", "x"]);
    }

    #[test]
    fn test_case_sensitive() {
        let tokens = SeparatorTokenizer::default().case_sensitive().tokenize("Dog");
        assert_eq!(texts(&tokens), vec!["Dog"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(SeparatorTokenizer::default().tokenize("").is_empty());
        assert!(SeparatorTokenizer::default().tokenize(" ,, ").is_empty());
    }
}
