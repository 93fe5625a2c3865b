use std::fmt;
use serde::{Deserialize, Serialize};

/// A literal or a `$name` reference bound through PARAMS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Literal(String),
    Param(String),
}

impl Operand {
    pub fn literal(&self) -> Option<&str> {
        match self {
            Operand::Literal(s) => Some(s),
            Operand::Param(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(s) => f.write_str(s),
            Operand::Param(p) => write!(f, "${}", p),
        }
    }
}

/// Raw vector bytes, inline or by parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Blob {
    Bytes(Vec<u8>),
    Param(String),
}

impl Blob {
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Blob::Bytes(b) => Some(b),
            Blob::Param(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchKind {
    Exact,
    Prefix,
    Suffix,
    Infix,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    pub kind: MatchKind,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericBound {
    pub value: Operand,
    pub inclusive: bool,
}

/// Per-node attributes from `=>{$name: value; …}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attrs {
    pub weight: f64,
    pub slop: Option<i32>,
    pub inorder: Option<bool>,
    pub phonetic: Option<bool>,
    pub verbatim: bool,
    pub yield_distance_as: Option<String>,
}

impl Default for Attrs {
    fn default() -> Self {
        Attrs {
            weight: 1.0,
            slop: None,
            inorder: None,
            phonetic: None,
            verbatim: false,
            yield_distance_as: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnClause {
    pub k: Operand,
    pub field: String,
    pub blob: Blob,
    pub ef_runtime: Option<Operand>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// `*`: every live document.
    Wildcard,
    /// Matches nothing, e.g. a query made only of stopwords.
    Empty,
    Term(Operand),
    Affix(MatchKind, Operand),
    Fuzzy { term: Operand, distance: u8 },
    /// `"a b c"`: adjacent terms in order.
    Phrase(Vec<Node>),
    Union(Vec<Node>),
    Intersect(Vec<Node>),
    Not(Box<Node>),
    Optional(Box<Node>),
    /// `@a|b:(…)`: restricts TEXT matching to the listed fields.
    Fields { fields: Vec<String>, child: Box<Node> },
    Numeric { field: String, lo: NumericBound, hi: NumericBound },
    Tag { field: String, values: Vec<TagValue> },
    Geo { field: String, lon: Operand, lat: Operand, radius: Operand, unit: String },
    GeoShape { field: String, predicate: String, wkt: Operand },
    VectorKnn { base: Box<Node>, knn: KnnClause },
    VectorRange { field: String, radius: Operand, blob: Blob, epsilon: Option<Operand> },
    IsMissing(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub attrs: Attrs,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Node { kind, attrs: Attrs::default() }
    }

    pub fn wildcard() -> Self {
        Node::new(NodeKind::Wildcard)
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.kind, NodeKind::Wildcard)
    }

    pub fn children(&self) -> Vec<&Node> {
        match &self.kind {
            NodeKind::Phrase(c) | NodeKind::Union(c) | NodeKind::Intersect(c) => c.iter().collect(),
            NodeKind::Not(c) | NodeKind::Optional(c) => vec![c.as_ref()],
            NodeKind::Fields { child, .. } => vec![child.as_ref()],
            NodeKind::VectorKnn { base, .. } => vec![base.as_ref()],
            _ => Vec::new(),
        }
    }

    /// True when any KNN or VECTOR_RANGE node is in the tree.
    pub fn contains_vector(&self) -> bool {
        matches!(self.kind, NodeKind::VectorKnn { .. } | NodeKind::VectorRange { .. })
            || self.children().iter().any(|c| c.contains_vector())
    }

    /// Indented plan, one node per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        let head = match &self.kind {
            NodeKind::Wildcard => "<WILDCARD>".to_string(),
            NodeKind::Empty => "<EMPTY>".to_string(),
            NodeKind::Term(t) => t.to_string(),
            NodeKind::Affix(kind, t) => match kind {
                MatchKind::Prefix => format!("PREFIX{{{}*}}", t),
                MatchKind::Suffix => format!("SUFFIX{{*{}}}", t),
                MatchKind::Infix => format!("INFIX{{*{}*}}", t),
                MatchKind::Pattern => format!("WILDCARD{{{}}}", t),
                MatchKind::Exact => t.to_string(),
            },
            NodeKind::Fuzzy { term, distance } => format!("FUZZY{{{}}} d={}", term, distance),
            NodeKind::Phrase(_) => "EXACT {".to_string(),
            NodeKind::Union(_) => "UNION {".to_string(),
            NodeKind::Intersect(_) => "INTERSECT {".to_string(),
            NodeKind::Not(_) => "NOT {".to_string(),
            NodeKind::Optional(_) => "OPTIONAL {".to_string(),
            NodeKind::Fields { fields, .. } => format!("@{}: {{", fields.join("|")),
            NodeKind::Numeric { field, lo, hi } => format!(
                "NUMERIC {{{} {} @{} {} {}}}",
                lo.value,
                if lo.inclusive { "<=" } else { "<" },
                field,
                if hi.inclusive { "<=" } else { "<" },
                hi.value
            ),
            NodeKind::Tag { field, values } => {
                let vals: Vec<String> = values.iter().map(|v| v.value.to_string()).collect();
                format!("TAG:@{} {{{}}}", field, vals.join(" | "))
            }
            NodeKind::Geo { field, lon, lat, radius, unit } => {
                format!("GEO @{}:{{{},{} --> {} {}}}", field, lon, lat, radius, unit)
            }
            NodeKind::GeoShape { field, predicate, wkt } => format!("GEOSHAPE{{{} @{} {}}}", predicate, field, wkt),
            NodeKind::VectorKnn { knn, .. } => format!("VECTOR {{K={} nearest to @{}", knn.k, knn.field),
            NodeKind::VectorRange { field, radius, .. } => format!("VECTOR {{RANGE {} @{}}}", radius, field),
            NodeKind::IsMissing(f) => format!("ISMISSING{{@{}}}", f),
        };
        out.push_str(&pad);
        out.push_str(&head);
        if self.attrs.weight != 1.0 {
            out.push_str(&format!(" => {{$weight: {}}}", self.attrs.weight));
        }
        out.push('\n');
        let children = self.children();
        if !children.is_empty() {
            for c in children {
                c.explain_into(out, depth + 1);
            }
            out.push_str(&pad);
            out.push_str("}\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_vector_nested() {
        let knn = Node::new(NodeKind::VectorKnn {
            base: Box::new(Node::wildcard()),
            knn: KnnClause {
                k: Operand::Literal("3".into()),
                field: "v".into(),
                blob: Blob::Param("b".into()),
                ef_runtime: None,
                alias: None,
            },
        });
        let tree = Node::new(NodeKind::Union(vec![Node::new(NodeKind::Term(Operand::Literal("a".into()))), knn]));
        assert!(tree.contains_vector());
        assert!(!Node::wildcard().contains_vector());
    }

    #[test]
    fn test_explain_lists_children() {
        let tree = Node::new(NodeKind::Intersect(vec![
            Node::new(NodeKind::Term(Operand::Literal("a".into()))),
            Node::new(NodeKind::Affix(MatchKind::Prefix, Operand::Literal("b".into()))),
        ]));
        let text = tree.explain();
        assert!(text.starts_with("INTERSECT {"));
        assert!(text.contains("  PREFIX{b*}"));
    }
}
