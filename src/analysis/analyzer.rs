use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::analysis::filter::TokenFilter;
use crate::analysis::filters::lowercase::LowercaseFilter;
use crate::analysis::filters::phonetic::{MetaphoneEncoder, PhoneticEncoder, PhoneticFilter};
use crate::analysis::filters::stemmer::StemmerFilter;
use crate::analysis::filters::stopword::StopWordFilter;
use crate::analysis::language::Language;
use crate::analysis::language::chinese::CjkSegmenter;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{SeparatorTokenizer, Tokenizer};

/// Text analysis pipeline
pub struct Analyzer {
    pub tokenizer: Box<dyn Tokenizer>,
    pub filters: Vec<Box<dyn TokenFilter>>,
    pub name: String,
}

impl Analyzer {
    pub fn new(name: String, tokenizer: Box<dyn Tokenizer>) -> Self {
        Analyzer {
            tokenizer,
            filters: Vec::new(),
            name,
        }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);

        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }

        tokens
    }
}

/// Per-field knobs that decide which filters an analyzer carries.
#[derive(Clone)]
pub struct AnalyzerOptions {
    pub language: Language,
    pub case_sensitive: bool,
    pub stem: bool,
    pub min_stem_len: usize,
    pub phonetic: bool,
    pub stopwords: Option<StopWordFilter>,
    pub separators: Option<Vec<char>>,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        AnalyzerOptions {
            language: Language::English,
            case_sensitive: false,
            stem: true,
            min_stem_len: 4,
            phonetic: false,
            stopwords: Some(StopWordFilter::english()),
            separators: None,
        }
    }
}

/// Registry of per-language tokenizers plus the phonetic encoder. Analyzers
/// are cheap, single-use objects built from it for each field or query.
pub struct AnalyzerRegistry {
    tokenizers: RwLock<HashMap<Language, Arc<dyn Tokenizer>>>,
    phonetic: RwLock<Arc<dyn PhoneticEncoder>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        let registry = AnalyzerRegistry {
            tokenizers: RwLock::new(HashMap::new()),
            phonetic: RwLock::new(Arc::new(MetaphoneEncoder::default())),
        };
        registry.register_defaults();
        registry
    }

    fn register_defaults(&self) {
        let cjk: Arc<dyn Tokenizer> = Arc::new(CjkSegmenter::default());
        self.register(Language::Chinese, cjk.clone());
        self.register(Language::Japanese, cjk);
    }

    /// Replaces the tokenizer used for `language` (e.g. a dictionary segmenter).
    pub fn register(&self, language: Language, tokenizer: Arc<dyn Tokenizer>) {
        self.tokenizers.write().insert(language, tokenizer);
    }

    pub fn set_phonetic_encoder(&self, encoder: Arc<dyn PhoneticEncoder>) {
        *self.phonetic.write() = encoder;
    }

    pub fn phonetic_encoder(&self) -> Arc<dyn PhoneticEncoder> {
        self.phonetic.read().clone()
    }

    pub fn build(&self, opts: &AnalyzerOptions) -> Analyzer {
        let custom = self.tokenizers.read().get(&opts.language).map(|t| t.clone_box());
        let tokenizer: Box<dyn Tokenizer> = match custom {
            Some(t) => t,
            None => {
                let mut t = SeparatorTokenizer::default();
                if let Some(seps) = &opts.separators {
                    t.separators = seps.clone();
                }
                if opts.case_sensitive {
                    t = t.case_sensitive();
                }
                Box::new(t)
            }
        };

        let mut analyzer = Analyzer::new(opts.language.name().to_string(), tokenizer);
        if opts.language.is_cjk() && !opts.case_sensitive {
            analyzer = analyzer.add_filter(Box::new(LowercaseFilter));
        }
        if let Some(stop) = &opts.stopwords {
            analyzer = analyzer.add_filter(Box::new(stop.clone()));
        }
        if opts.stem {
            if let Some(alg) = opts.language.stemmer() {
                analyzer = analyzer.add_filter(Box::new(StemmerFilter::new(alg, opts.min_stem_len)));
            }
        }
        if opts.phonetic {
            analyzer = analyzer.add_filter(Box::new(PhoneticFilter::new(self.phonetic_encoder())));
        }
        analyzer
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::token::TokenKind;

    #[test]
    fn test_default_chain() {
        let registry = AnalyzerRegistry::new();
        let tokens = registry.build(&AnalyzerOptions::default()).analyze("The dogs are running");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["dogs", "+dog", "running", "+run"]);
    }

    #[test]
    fn test_phonetic_companions() {
        let registry = AnalyzerRegistry::new();
        let opts = AnalyzerOptions { phonetic: true, stem: false, ..Default::default() };
        let tokens = registry.build(&opts).analyze("morfix");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Phonetic && t.text == "<MRFK"));
    }

    #[test]
    fn test_chinese_uses_segmenter() {
        let registry = AnalyzerRegistry::new();
        let opts = AnalyzerOptions { language: Language::Chinese, ..Default::default() };
        let tokens = registry.build(&opts).analyze("中华人民");
        assert_eq!(tokens.len(), 3);
    }
}
