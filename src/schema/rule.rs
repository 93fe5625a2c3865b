use std::fmt;
use serde::{Deserialize, Serialize};
use crate::analysis::language::Language;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;
use crate::engine::args::ArgCursor;
use crate::expr::{self, Expr};
use crate::host::HostDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocType {
    Hash,
    Json,
}

impl DocType {
    pub fn name(&self) -> &'static str {
        match self {
            DocType::Hash => "HASH",
            DocType::Json => "JSON",
        }
    }

    pub fn accepts(&self, doc: &HostDocument) -> bool {
        doc.is_json() == (*self == DocType::Json)
    }
}

/// A compiled FILTER expression. Serialized as its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuleFilter {
    source: String,
    expr: Expr,
}

impl RuleFilter {
    pub fn compile(source: &str) -> Result<Self> {
        let expr = expr::parse(source).map_err(|e| Error::new(ErrorKind::BadSchema, format!("FILTER: {}", e.context)))?;
        Ok(RuleFilter { source: source.to_string(), expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl TryFrom<String> for RuleFilter {
    type Error = Error;

    fn try_from(source: String) -> Result<Self> {
        RuleFilter::compile(&source)
    }
}

impl From<RuleFilter> for String {
    fn from(f: RuleFilter) -> String {
        f.source
    }
}

impl fmt::Display for RuleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Decides which host keys belong to an index and how their document-level
/// attributes are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRule {
    pub on: DocType,
    pub prefixes: Vec<String>,
    pub filter: Option<RuleFilter>,
    pub language: Language,
    pub language_field: Option<String>,
    pub score: f64,
    pub score_field: Option<String>,
    pub payload_field: Option<String>,
}

impl Default for IndexRule {
    fn default() -> Self {
        IndexRule {
            on: DocType::Hash,
            prefixes: Vec::new(),
            filter: None,
            language: Language::English,
            language_field: None,
            score: 1.0,
            score_field: None,
            payload_field: None,
        }
    }
}

impl IndexRule {
    /// Consumes one rule clause if present.
    pub fn parse_one(&mut self, cursor: &mut ArgCursor<'_>) -> Result<bool> {
        if cursor.eat("ON") {
            let t = cursor.next_str("ON")?;
            self.on = match t.to_ascii_uppercase().as_str() {
                "HASH" => DocType::Hash,
                "JSON" => DocType::Json,
                _ => return Err(Error::new(ErrorKind::BadSchema, format!("unknown document type '{}'", t))),
            };
        } else if cursor.eat("PREFIX") {
            self.prefixes = cursor.next_counted("PREFIX")?;
        } else if cursor.eat("FILTER") {
            self.filter = Some(RuleFilter::compile(&cursor.next_str("FILTER")?)?);
        } else if cursor.eat("LANGUAGE") {
            self.language = Language::parse(&cursor.next_str("LANGUAGE")?)?;
        } else if cursor.eat("LANGUAGE_FIELD") {
            self.language_field = Some(cursor.next_str("LANGUAGE_FIELD")?);
        } else if cursor.eat("SCORE") {
            let s = cursor.next_f64("SCORE")?;
            if !(0.0..=1.0).contains(&s) {
                return Err(Error::new(ErrorKind::BadParameter, "SCORE must be between 0 and 1"));
            }
            self.score = s;
        } else if cursor.eat("SCORE_FIELD") {
            self.score_field = Some(cursor.next_str("SCORE_FIELD")?);
        } else if cursor.eat("PAYLOAD_FIELD") {
            self.payload_field = Some(cursor.next_str("PAYLOAD_FIELD")?);
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Prefix check only; used before the document is loaded.
    pub fn matches_key(&self, key: &str) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    /// Full rule: document type, prefix, then FILTER with `@__key` bound to
    /// the key name. A FILTER that fails to evaluate rejects the document.
    pub fn matches(&self, key: &str, doc: &HostDocument) -> bool {
        if !self.on.accepts(doc) || !self.matches_key(key) {
            return false;
        }
        let Some(filter) = &self.filter else { return true };
        let env = |name: &str| -> Option<Value> {
            if name == "__key" {
                return Some(Value::Str(key.to_string()));
            }
            doc.text(name).map(Value::Str)
        };
        filter.expr.eval(&env).map(|v| v.truthy()).unwrap_or(false)
    }

    /// Document language: LANGUAGE_FIELD when present and valid, else the
    /// rule default.
    pub fn language_for(&self, doc: &HostDocument) -> Language {
        self.language_field
            .as_deref()
            .and_then(|f| doc.text(f))
            .and_then(|l| Language::parse(&l).ok())
            .unwrap_or(self.language)
    }

    pub fn score_for(&self, doc: &HostDocument) -> f64 {
        self.score_field
            .as_deref()
            .and_then(|f| doc.text(f))
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|s| (0.0..=1.0).contains(s))
            .unwrap_or(self.score)
    }

    pub fn payload_for(&self, doc: &HostDocument) -> Option<Vec<u8>> {
        let field = self.payload_field.as_deref()?;
        doc.text(field).map(String::into_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::to_args;
    use crate::host::{HostStore, MemoryStore};

    fn rule(args: &[&str]) -> IndexRule {
        let args = to_args(args);
        let mut cursor = ArgCursor::new(&args);
        let mut r = IndexRule::default();
        while r.parse_one(&mut cursor).unwrap() {}
        r
    }

    #[test]
    fn test_prefix_and_filter() {
        let r = rule(&["PREFIX", "2", "user:", "admin:", "FILTER", "@age > 18 && hasprefix(@__key, \"user:\")"]);
        let store = MemoryStore::new();
        store.hset("user:1", &[("age", "30")]);
        store.hset("user:2", &[("age", "10")]);
        store.hset("admin:1", &[("age", "40")]);
        assert!(r.matches("user:1", &store.get("user:1").unwrap()));
        assert!(!r.matches("user:2", &store.get("user:2").unwrap()));
        assert!(!r.matches("admin:1", &store.get("admin:1").unwrap()));
        assert!(!r.matches_key("other:1"));
    }

    #[test]
    fn test_doc_type_must_match() {
        let r = rule(&["ON", "JSON"]);
        let store = MemoryStore::new();
        store.hset("h", &[("a", "b")]);
        assert!(!r.matches("h", &store.get("h").unwrap()));
    }

    #[test]
    fn test_score_and_language_fields() {
        let r = rule(&["SCORE_FIELD", "s", "LANGUAGE_FIELD", "lang", "SCORE", "0.5"]);
        let store = MemoryStore::new();
        store.hset("d", &[("s", "0.25"), ("lang", "french")]);
        let doc = store.get("d").unwrap();
        assert_eq!(r.score_for(&doc), 0.25);
        assert_eq!(r.language_for(&doc), Language::French);
        store.hset("e", &[("s", "7")]);
        assert_eq!(r.score_for(&store.get("e").unwrap()), 0.5);
    }

    #[test]
    fn test_filter_serializes_as_source() {
        let r = rule(&["FILTER", "@a == 1"]);
        let json = serde_json::to_string(&r).unwrap();
        let back: IndexRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_bad_filter_is_schema_error() {
        let args = to_args(&["FILTER", "@a =="]);
        let mut cursor = ArgCursor::new(&args);
        let err = IndexRule::default().parse_one(&mut cursor).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadSchema);
    }
}
