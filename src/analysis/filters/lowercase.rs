use crate::analysis::filter::TokenFilter;
use crate::analysis::token::{Token, TokenKind};

/// Unicode lowercasing of surface words. Companion terms are left alone.
pub struct LowercaseFilter;

impl TokenFilter for LowercaseFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens.into_iter()
            .map(|mut token| {
                if token.kind == TokenKind::Word {
                    token.text = token.text.to_lowercase();
                }
                token
            })
            .collect()
    }

    fn name(&self) -> &str {
        "lowercase"
    }
}
