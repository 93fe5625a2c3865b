use crate::analysis::token::Token;

/// One stage of an analyzer chain. Filters may drop tokens or append
/// companion terms at the same position.
pub trait TokenFilter: Send + Sync {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token>;

    fn name(&self) -> &str;
}
