pub mod scorer;

pub use scorer::{normalize_scores, DocStats, Scorer, ScorerKind, ScoringStats};
