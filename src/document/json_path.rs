use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char, i64 as parse_i64};
use nom::combinator::{map, value};
use nom::multi::many0;
use nom::sequence::{delimited, preceded};
use nom::{IResult, Parser};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use crate::core::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Segment {
    Key(String),
    Index(i64),
    AnyChild,
    Descendant(String),
}

/// Compiled JSON selector: `$.a.b`, `$.a[0]`, `$.a[*]`, `$..a`,
/// `$['a b']`, or a bare dotted path `a.b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPath {
    source: String,
    segments: Vec<Segment>,
}

fn ident(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == '$' || c == '@').parse(i)
}

fn quoted(i: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
    ))
    .parse(i)
}

fn segment(i: &str) -> IResult<&str, Segment> {
    alt((
        map(preceded(tag(".."), ident), |s: &str| Segment::Descendant(s.to_string())),
        value(Segment::AnyChild, tag(".*")),
        map(preceded(char('.'), ident), |s: &str| Segment::Key(s.to_string())),
        value(Segment::AnyChild, tag("[*]")),
        map(delimited(char('['), quoted, char(']')), |s: &str| Segment::Key(s.to_string())),
        map(delimited(char('['), parse_i64, char(']')), Segment::Index),
    ))
    .parse(i)
}

impl JsonPath {
    pub fn parse(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        let normalized = if trimmed.starts_with('$') {
            trimmed[1..].to_string()
        } else {
            format!(".{}", trimmed)
        };
        let (rest, segments) = many0(segment)
            .parse(normalized.as_str())
            .map_err(|e| Error::new(ErrorKind::BadSchema, format!("invalid JSON path '{}': {}", source, e)))?;
        if !rest.is_empty() {
            return Err(Error::new(
                ErrorKind::BadSchema,
                format!("invalid JSON path '{}' near '{}'", source, rest),
            ));
        }
        Ok(JsonPath { source: source.to_string(), segments })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the path can match more than one value.
    pub fn is_multi(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::AnyChild | Segment::Descendant(_)))
    }

    pub fn select<'a>(&self, root: &'a Json) -> Vec<&'a Json> {
        let mut current = vec![root];
        for seg in &self.segments {
            let mut next = Vec::new();
            for node in current {
                match seg {
                    Segment::Key(k) => {
                        if let Some(v) = node.get(k.as_str()) {
                            next.push(v);
                        }
                    }
                    Segment::Index(i) => {
                        if let Json::Array(items) = node {
                            let idx = if *i < 0 { items.len() as i64 + *i } else { *i };
                            if idx >= 0 {
                                if let Some(v) = items.get(idx as usize) {
                                    next.push(v);
                                }
                            }
                        }
                    }
                    Segment::AnyChild => match node {
                        Json::Array(items) => next.extend(items.iter()),
                        Json::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                    Segment::Descendant(k) => collect_descendants(node, k, &mut next),
                }
            }
            current = next;
        }
        current
    }
}

fn collect_descendants<'a>(node: &'a Json, key: &str, out: &mut Vec<&'a Json>) {
    match node {
        Json::Object(map) => {
            for (k, v) in map {
                if k == key {
                    out.push(v);
                }
                collect_descendants(v, key, out);
            }
        }
        Json::Array(items) => {
            for v in items {
                collect_descendants(v, key, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Json {
        json!({
            "name": "bike",
            "tags": ["red", "fast"],
            "specs": {"weight": 7.5, "parts": [{"name": "wheel"}, {"name": "seat"}]},
            "odd key": 1
        })
    }

    #[test]
    fn test_dotted_and_bare() {
        let d = doc();
        assert_eq!(JsonPath::parse("$.specs.weight").unwrap().select(&d), vec![&json!(7.5)]);
        assert_eq!(JsonPath::parse("specs.weight").unwrap().select(&d), vec![&json!(7.5)]);
    }

    #[test]
    fn test_indexes_and_wildcards() {
        let d = doc();
        assert_eq!(JsonPath::parse("$.tags[1]").unwrap().select(&d), vec![&json!("fast")]);
        assert_eq!(JsonPath::parse("$.tags[-1]").unwrap().select(&d), vec![&json!("fast")]);
        let all = JsonPath::parse("$.tags[*]").unwrap();
        assert!(all.is_multi());
        assert_eq!(all.select(&d).len(), 2);
    }

    #[test]
    fn test_descendants_and_quoted() {
        let d = doc();
        let names = JsonPath::parse("$..name").unwrap().select(&d);
        assert_eq!(names.len(), 3);
        assert_eq!(JsonPath::parse("$['odd key']").unwrap().select(&d), vec![&json!(1)]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(JsonPath::parse("$.a[").is_err());
    }
}
