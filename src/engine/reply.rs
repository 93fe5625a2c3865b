use crate::core::error::Warnings;
use crate::core::types::{format_number, Value};

/// Command reply tree. Maps keep insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Reply>),
    Map(Vec<(String, Reply)>),
}

impl Reply {
    pub fn str(s: impl Into<String>) -> Reply {
        Reply::Str(s.into())
    }

    pub fn strings<I, S>(items: I) -> Reply
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Reply::Array(items.into_iter().map(|s| Reply::Str(s.into())).collect())
    }

    /// Value of `key` in a map reply.
    pub fn get(&self, key: &str) -> Option<&Reply> {
        match self {
            Reply::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&Value> for Reply {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Reply::Nil,
            Value::Number(n) => Reply::Str(format_number(*n)),
            Value::Str(s) => Reply::Str(s.clone()),
            Value::Array(items) => Reply::Array(items.iter().map(Reply::from).collect()),
        }
    }
}

/// One result of SEARCH, AGGREGATE, HYBRID or a cursor read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    pub key: Option<String>,
    pub score: Option<f64>,
    pub payload: Option<Vec<u8>>,
    pub explain: Option<String>,
    pub fields: Vec<(String, Value)>,
}

impl ResultRow {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    fn to_reply(&self) -> Reply {
        let mut entries = Vec::new();
        if let Some(key) = &self.key {
            entries.push(("id".to_string(), Reply::str(key.clone())));
        }
        if let Some(score) = self.score {
            entries.push(("score".to_string(), Reply::Double(score)));
        }
        if let Some(why) = &self.explain {
            entries.push(("explain".to_string(), Reply::str(why.clone())));
        }
        if let Some(p) = &self.payload {
            entries.push(("payload".to_string(), Reply::str(String::from_utf8_lossy(p).into_owned())));
        }
        let attrs = self.fields.iter().map(|(k, v)| (k.clone(), Reply::from(v))).collect();
        entries.push(("extra_attributes".to_string(), Reply::Map(attrs)));
        Reply::Map(entries)
    }
}

/// Typed result of a query command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryReply {
    pub total: usize,
    pub rows: Vec<ResultRow>,
    pub warnings: Warnings,
    /// Set on WITHCURSOR replies; 0 once the cursor is exhausted.
    pub cursor: Option<u64>,
}

impl QueryReply {
    pub fn keys(&self) -> Vec<&str> {
        self.rows.iter().filter_map(|r| r.key.as_deref()).collect()
    }

    pub fn to_reply(&self) -> Reply {
        let body = Reply::Map(vec![
            ("total_results".to_string(), Reply::Int(self.total as i64)),
            ("results".to_string(), Reply::Array(self.rows.iter().map(ResultRow::to_reply).collect())),
            ("warning".to_string(), Reply::strings(self.warnings.to_strings())),
        ]);
        match self.cursor {
            Some(id) => Reply::Array(vec![body, Reply::Int(id as i64)]),
            None => body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::QueryWarning;

    #[test]
    fn test_query_reply_shape() {
        let mut warnings = Warnings::new();
        warnings.push(QueryWarning::Timeout);
        let reply = QueryReply {
            total: 1,
            rows: vec![ResultRow {
                key: Some("d1".into()),
                fields: vec![("n".into(), Value::Number(0.17))],
                ..Default::default()
            }],
            warnings,
            cursor: None,
        }
        .to_reply();
        assert_eq!(reply.get("total_results"), Some(&Reply::Int(1)));
        let first = &reply.get("results").unwrap().as_array().unwrap()[0];
        assert_eq!(first.get("id").and_then(Reply::as_str), Some("d1"));
        assert_eq!(first.get("extra_attributes").unwrap().get("n"), Some(&Reply::str("0.17")));
        assert_eq!(reply.get("warning"), Some(&Reply::strings(["Timeout limit was reached"])));
    }

    #[test]
    fn test_cursor_reply_wraps_body() {
        let reply = QueryReply { cursor: Some(0), ..Default::default() }.to_reply();
        let parts = reply.as_array().unwrap();
        assert_eq!(parts[1], Reply::Int(0));
        assert!(parts[0].get("results").is_some());
    }
}
