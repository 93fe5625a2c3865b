use crate::core::error::{Error, ErrorKind, Result};
use crate::query::ast::{
    Attrs, Blob, KnnClause, MatchKind, Node, NodeKind, NumericBound, Operand, TagValue,
};

/// Characters with a meaning of their own in the query grammar.
const GRAMMAR_CHARS: &[char] = &[
    '(', ')', '|', '@', '{', '}', '[', ']', '"', '\'', '-', '~', '*', '%', '$', '=', ':',
];

const GEOSHAPE_PREDICATES: &[&str] = &["WITHIN", "CONTAINS", "INTERSECTS", "DISJOINT"];

fn is_term_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.' || (!c.is_ascii() && !c.is_whitespace())
}

/// Recursive-descent parser over the query text. Dialect 1 rejects
/// parameters and vector clauses.
pub struct QueryParser {
    chars: Vec<char>,
    pos: usize,
    dialect: u32,
}

/// Parses `text` into an AST under `dialect`.
pub fn parse_query(text: &str, dialect: u32) -> Result<Node> {
    let mut parser = QueryParser { chars: text.chars().collect(), pos: 0, dialect };
    parser.parse()
}

impl QueryParser {
    fn parse(&mut self) -> Result<Node> {
        self.skip_separators();
        if self.at_end() {
            return Err(Error::syntax("empty query"));
        }
        let mut node = self.parse_union()?;
        self.skip_separators();
        if self.looking_at("=>[") {
            self.require_dialect2("vector similarity clause")?;
            self.pos += 3;
            let knn = self.parse_knn_clause()?;
            node = Node::new(NodeKind::VectorKnn { base: Box::new(node), knn });
            self.skip_separators();
        }
        if !self.at_end() {
            return Err(self.error(format!("unexpected '{}'", self.chars[self.pos])));
        }
        Ok(node)
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Error::syntax(format!("{} at offset {}", msg.into(), self.pos))
    }

    fn require_dialect2(&self, what: &str) -> Result<()> {
        if self.dialect < 2 {
            return Err(self.error(format!("{} requires dialect 2 or greater", what)));
        }
        Ok(())
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn looking_at(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn looking_at_ci(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i).map(|p| p.eq_ignore_ascii_case(&c)).unwrap_or(false))
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// Whitespace plus punctuation that carries no grammar meaning.
    fn skip_separators(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || (!is_term_char(c) && !GRAMMAR_CHARS.contains(&c) && c != '\\') {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    fn parse_union(&mut self) -> Result<Node> {
        let mut children = vec![self.parse_intersect()?];
        loop {
            self.skip_separators();
            if self.peek() == Some('|') {
                self.pos += 1;
                children.push(self.parse_intersect()?);
            } else {
                break;
            }
        }
        Ok(if children.len() == 1 { children.remove(0) } else { Node::new(NodeKind::Union(children)) })
    }

    fn parse_intersect(&mut self) -> Result<Node> {
        let mut children = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None | Some(')') | Some('|') => break,
                _ if self.looking_at("=>[") => break,
                _ => children.push(self.parse_unary()?),
            }
        }
        match children.len() {
            0 => Err(self.error("empty expression")),
            1 => Ok(children.remove(0)),
            _ => Ok(Node::new(NodeKind::Intersect(children))),
        }
    }

    fn parse_unary(&mut self) -> Result<Node> {
        self.skip_separators();
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(Node::new(NodeKind::Not(Box::new(self.parse_unary()?))))
            }
            Some('~') => {
                self.pos += 1;
                Ok(Node::new(NodeKind::Optional(Box::new(self.parse_unary()?))))
            }
            _ => {
                let mut node = self.parse_atom()?;
                self.parse_attrs(&mut node.attrs)?;
                Ok(node)
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Node> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_union()?;
                self.expect(')')?;
                Ok(inner)
            }
            Some('@') => self.parse_field(),
            Some('"') => self.parse_phrase(),
            Some('%') => self.parse_fuzzy(),
            Some('$') => Ok(Node::new(NodeKind::Term(self.parse_param()?))),
            Some('*') => {
                self.pos += 1;
                if self.peek().is_some_and(|c| is_term_char(c) || c == '\\') {
                    let term = self.read_term();
                    if self.peek() == Some('*') {
                        self.pos += 1;
                        Ok(Node::new(NodeKind::Affix(MatchKind::Infix, Operand::Literal(term))))
                    } else {
                        Ok(Node::new(NodeKind::Affix(MatchKind::Suffix, Operand::Literal(term))))
                    }
                } else {
                    Ok(Node::wildcard())
                }
            }
            Some('w') if self.peek_at(1) == Some('\'') => {
                self.pos += 2;
                let pattern = self.read_until_quote('\'')?;
                Ok(Node::new(NodeKind::Affix(MatchKind::Pattern, Operand::Literal(pattern))))
            }
            Some(_) if self.looking_at_ci("ismissing(") => {
                self.pos += "ismissing(".len();
                self.skip_ws();
                if self.peek() != Some('@') {
                    return Err(self.error("ismissing() expects a field"));
                }
                self.pos += 1;
                let field = self.read_name();
                self.expect(')')?;
                Ok(Node::new(NodeKind::IsMissing(field)))
            }
            Some(c) if is_term_char(c) || c == '\\' => {
                let term = self.read_term();
                if self.peek() == Some('*') {
                    self.pos += 1;
                    Ok(Node::new(NodeKind::Affix(MatchKind::Prefix, Operand::Literal(term))))
                } else {
                    Ok(Node::new(NodeKind::Term(Operand::Literal(term))))
                }
            }
            Some(c) => Err(self.error(format!("unexpected '{}'", c))),
            None => Err(self.error("unexpected end of query")),
        }
    }

    /// Term characters, honoring backslash escapes.
    fn read_term(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                if let Some(next) = self.peek_at(1) {
                    out.push(next);
                    self.pos += 2;
                    continue;
                }
                self.pos += 1;
                break;
            }
            if !is_term_char(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    fn read_name(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                if let Some(next) = self.peek_at(1) {
                    out.push(next);
                    self.pos += 2;
                    continue;
                }
            }
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        out
    }

    fn read_until_quote(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quoted string")),
                Some('\\') => {
                    if let Some(next) = self.peek_at(1) {
                        out.push(next);
                    }
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn parse_param(&mut self) -> Result<Operand> {
        self.require_dialect2("parameter")?;
        self.pos += 1;
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.error("empty parameter name"));
        }
        Ok(Operand::Param(name))
    }

    fn parse_phrase(&mut self) -> Result<Node> {
        self.pos += 1;
        let body = self.read_until_quote('"')?;
        let words: Vec<Node> = body
            .split_whitespace()
            .map(|w| Node::new(NodeKind::Term(Operand::Literal(w.to_string()))))
            .collect();
        if words.is_empty() {
            // `""` queries the empty-value sentinel
            return Ok(Node::new(NodeKind::Term(Operand::Literal(String::new()))));
        }
        Ok(Node::new(NodeKind::Phrase(words)))
    }

    fn parse_fuzzy(&mut self) -> Result<Node> {
        let mut open = 0u8;
        while self.peek() == Some('%') {
            open += 1;
            self.pos += 1;
        }
        if open > 3 {
            return Err(self.error("fuzzy distance above 3"));
        }
        let term = if self.peek() == Some('$') { self.parse_param()? } else { Operand::Literal(self.read_term()) };
        for _ in 0..open {
            if self.peek() != Some('%') {
                return Err(self.error("unbalanced '%' in fuzzy term"));
            }
            self.pos += 1;
        }
        Ok(Node::new(NodeKind::Fuzzy { term, distance: open }))
    }

    fn parse_field(&mut self) -> Result<Node> {
        self.pos += 1;
        let mut fields = vec![self.read_name()];
        while self.peek() == Some('|') {
            self.pos += 1;
            fields.push(self.read_name());
        }
        if fields.iter().any(|f| f.is_empty()) {
            return Err(self.error("empty field name"));
        }
        self.skip_ws();
        if self.peek() != Some(':') {
            return Err(self.error("expected ':' after field name"));
        }
        self.pos += 1;
        self.skip_ws();

        match self.peek() {
            Some('[') => {
                let field = self.single_field(&fields)?;
                self.pos += 1;
                self.parse_bracket(field)
            }
            Some('{') => {
                let field = self.single_field(&fields)?;
                self.pos += 1;
                self.parse_tags(field)
            }
            _ => {
                let child = self.parse_unary_no_attrs()?;
                Ok(Node::new(NodeKind::Fields { fields, child: Box::new(child) }))
            }
        }
    }

    /// Operand of a field scope. Attributes written after it land on the
    /// enclosing field node.
    fn parse_unary_no_attrs(&mut self) -> Result<Node> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(Node::new(NodeKind::Not(Box::new(self.parse_unary()?))))
            }
            Some('~') => {
                self.pos += 1;
                Ok(Node::new(NodeKind::Optional(Box::new(self.parse_unary()?))))
            }
            _ => self.parse_atom(),
        }
    }

    fn single_field(&self, fields: &[String]) -> Result<String> {
        match fields {
            [f] => Ok(f.clone()),
            _ => Err(self.error("only TEXT queries accept several fields")),
        }
    }

    /// Whitespace-separated tokens up to the closing bracket; quoted
    /// strings stay whole.
    fn bracket_tokens(&mut self) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        loop {
            while self.peek().is_some_and(|c| c.is_whitespace() || c == ',') {
                self.pos += 1;
            }
            match self.peek() {
                None => return Err(self.error("missing ']'")),
                Some(']') => {
                    self.pos += 1;
                    return Ok(tokens);
                }
                Some(q @ ('"' | '\'')) => {
                    self.pos += 1;
                    let s = self.read_until_quote(q)?;
                    tokens.push(format!("'{}", s));
                }
                Some(_) => {
                    let mut t = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_whitespace() || c == ']' || c == ',' {
                            break;
                        }
                        t.push(c);
                        self.pos += 1;
                    }
                    tokens.push(t);
                }
            }
        }
    }

    fn operand(&self, token: &str) -> Result<Operand> {
        if let Some(quoted) = token.strip_prefix('\'') {
            return Ok(Operand::Literal(quoted.to_string()));
        }
        if let Some(name) = token.strip_prefix('$') {
            self.require_dialect2("parameter")?;
            if name.is_empty() {
                return Err(self.error("empty parameter name"));
            }
            return Ok(Operand::Param(name.to_string()));
        }
        Ok(Operand::Literal(token.to_string()))
    }

    fn bound(&self, token: &str) -> Result<NumericBound> {
        match token.strip_prefix('(') {
            Some(rest) => Ok(NumericBound { value: self.operand(rest)?, inclusive: false }),
            None => Ok(NumericBound { value: self.operand(token)?, inclusive: true }),
        }
    }

    fn parse_bracket(&mut self, field: String) -> Result<Node> {
        let tokens = self.bracket_tokens()?;
        let first = tokens.first().map(|t| t.to_ascii_uppercase()).unwrap_or_default();

        if first == "VECTOR_RANGE" {
            self.require_dialect2("VECTOR_RANGE")?;
            let (Some(radius), Some(blob)) = (tokens.get(1), tokens.get(2)) else {
                return Err(self.error("VECTOR_RANGE expects a radius and a blob"));
            };
            let blob = match blob.strip_prefix('$') {
                Some(p) => Blob::Param(p.to_string()),
                None => Blob::Bytes(blob.trim_start_matches('\'').as_bytes().to_vec()),
            };
            let mut epsilon = None;
            let mut i = 3;
            while i < tokens.len() {
                if tokens[i].eq_ignore_ascii_case("EPSILON") && i + 1 < tokens.len() {
                    epsilon = Some(self.operand(&tokens[i + 1])?);
                    i += 2;
                } else {
                    return Err(self.error(format!("unknown VECTOR_RANGE argument '{}'", tokens[i])));
                }
            }
            return Ok(Node::new(NodeKind::VectorRange { field, radius: self.operand(radius)?, blob, epsilon }));
        }

        if GEOSHAPE_PREDICATES.contains(&first.as_str()) {
            let Some(wkt) = tokens.get(1) else {
                return Err(self.error("geoshape predicate expects a shape"));
            };
            return Ok(Node::new(NodeKind::GeoShape { field, predicate: first, wkt: self.operand(wkt)? }));
        }

        match tokens.len() {
            1 => {
                let b = self.bound(&tokens[0])?;
                let lo = NumericBound { value: b.value.clone(), inclusive: true };
                let hi = NumericBound { value: b.value, inclusive: true };
                Ok(Node::new(NodeKind::Numeric { field, lo, hi }))
            }
            2 => Ok(Node::new(NodeKind::Numeric { field, lo: self.bound(&tokens[0])?, hi: self.bound(&tokens[1])? })),
            4 => Ok(Node::new(NodeKind::Geo {
                field,
                lon: self.operand(&tokens[0])?,
                lat: self.operand(&tokens[1])?,
                radius: self.operand(&tokens[2])?,
                unit: tokens[3].clone(),
            })),
            _ => Err(self.error("malformed range")),
        }
    }

    fn parse_tags(&mut self, field: String) -> Result<Node> {
        let mut values = Vec::new();
        loop {
            self.skip_ws();
            let value = match self.peek() {
                None => return Err(self.error("missing '}'")),
                Some('}') if values.is_empty() => return Err(self.error("empty tag list")),
                Some('"') => {
                    self.pos += 1;
                    let v = self.read_until_quote('"')?;
                    TagValue { kind: MatchKind::Exact, value: Operand::Literal(v) }
                }
                Some('$') => TagValue { kind: MatchKind::Exact, value: self.parse_param()? },
                Some('w') if self.peek_at(1) == Some('\'') => {
                    self.pos += 2;
                    let v = self.read_until_quote('\'')?;
                    TagValue { kind: MatchKind::Pattern, value: Operand::Literal(v) }
                }
                Some(_) => self.read_tag_value()?,
            };
            values.push(value);
            self.skip_ws();
            match self.peek() {
                Some('|') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.error("expected '|' or '}' in tag list")),
            }
        }
        Ok(Node::new(NodeKind::Tag { field, values }))
    }

    /// One unquoted tag. Unescaped leading or trailing `*` selects the
    /// prefix, suffix or infix form.
    fn read_tag_value(&mut self) -> Result<TagValue> {
        let leading = self.peek() == Some('*');
        if leading {
            self.pos += 1;
        }
        let mut out = String::new();
        let mut trailing = false;
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    if let Some(next) = self.peek_at(1) {
                        out.push(next);
                    }
                    self.pos += 2;
                }
                '|' | '}' => break,
                '*' => {
                    self.pos += 1;
                    trailing = true;
                    break;
                }
                _ => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        let value = out.trim_end().to_string();
        if value.is_empty() && !(leading || trailing) {
            return Err(self.error("empty tag value"));
        }
        let kind = match (leading, trailing) {
            (false, false) => MatchKind::Exact,
            (false, true) => MatchKind::Prefix,
            (true, false) => MatchKind::Suffix,
            (true, true) => MatchKind::Infix,
        };
        Ok(TagValue { kind, value: Operand::Literal(value) })
    }

    fn parse_attrs(&mut self, attrs: &mut Attrs) -> Result<()> {
        let save = self.pos;
        self.skip_ws();
        if !self.looking_at("=>") {
            self.pos = save;
            return Ok(());
        }
        let after_arrow = self.pos + 2;
        self.pos = after_arrow;
        self.skip_ws();
        if self.peek() != Some('{') {
            // A KNN clause, handled by the caller
            self.pos = save;
            return Ok(());
        }
        self.pos += 1;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(';') => {
                    self.pos += 1;
                    continue;
                }
                Some('$') => {}
                _ => return Err(self.error("expected attribute")),
            }
            self.pos += 1;
            let name = self.read_name().to_ascii_lowercase();
            self.expect(':')?;
            self.skip_ws();
            let mut value = String::new();
            while let Some(c) = self.peek() {
                if c == ';' || c == '}' {
                    break;
                }
                value.push(c);
                self.pos += 1;
            }
            let value = value.trim().to_string();
            let bad = || Error::new(ErrorKind::BadQuerySyntax, format!("invalid value '{}' for ${}", value, name));
            let as_bool = || match value.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(bad()),
            };
            match name.as_str() {
                "weight" => attrs.weight = value.parse().map_err(|_| bad())?,
                "slop" => attrs.slop = Some(value.parse().map_err(|_| bad())?),
                "inorder" => attrs.inorder = Some(as_bool()?),
                "phonetic" => attrs.phonetic = Some(as_bool()?),
                "verbatim" => attrs.verbatim = as_bool()?,
                "yield_distance_as" => attrs.yield_distance_as = Some(value.clone()),
                other => return Err(self.error(format!("unknown attribute ${}", other))),
            }
        }
    }

    /// Body of `=>[KNN k @field $blob [EF_RUNTIME e] [AS alias]]`.
    fn parse_knn_clause(&mut self) -> Result<KnnClause> {
        let tokens = self.bracket_tokens()?;
        let mut it = tokens.iter();
        match it.next() {
            Some(t) if t.eq_ignore_ascii_case("KNN") => {}
            _ => return Err(self.error("expected KNN")),
        }
        let k = self.operand(it.next().ok_or_else(|| self.error("KNN expects k"))?)?;
        let field = it
            .next()
            .and_then(|f| f.strip_prefix('@'))
            .ok_or_else(|| self.error("KNN expects @field"))?
            .to_string();
        let blob_tok = it.next().ok_or_else(|| self.error("KNN expects a blob"))?;
        let blob = match blob_tok.strip_prefix('$') {
            Some(p) => Blob::Param(p.to_string()),
            None => Blob::Bytes(blob_tok.trim_start_matches('\'').as_bytes().to_vec()),
        };
        let mut clause = KnnClause { k, field, blob, ef_runtime: None, alias: None };
        while let Some(t) = it.next() {
            let upper = t.to_ascii_uppercase();
            let val = it.next().ok_or_else(|| self.error(format!("{} expects a value", upper)))?;
            match upper.as_str() {
                "EF_RUNTIME" => clause.ef_runtime = Some(self.operand(val)?),
                "AS" | "YIELD_DISTANCE_AS" => clause.alias = Some(val.clone()),
                _ => return Err(self.error(format!("unknown KNN argument '{}'", t))),
            }
        }
        Ok(clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Operand {
        Operand::Literal(s.to_string())
    }

    fn parse(q: &str) -> Node {
        parse_query(q, 2).unwrap()
    }

    #[test]
    fn test_intersect_binds_tighter_than_union() {
        let n = parse("hello world | foo");
        match n.kind {
            NodeKind::Union(children) => {
                assert!(matches!(children[0].kind, NodeKind::Intersect(_)));
                assert_eq!(children[1].kind, NodeKind::Term(lit("foo")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_numeric_forms() {
        match parse("@n:[0.17 0.17]").kind {
            NodeKind::Numeric { field, lo, hi } => {
                assert_eq!(field, "n");
                assert_eq!(lo.value, lit("0.17"));
                assert!(lo.inclusive && hi.inclusive);
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse("@n:[(1 +inf]").kind {
            NodeKind::Numeric { lo, hi, .. } => {
                assert!(!lo.inclusive);
                assert_eq!(hi.value, lit("+inf"));
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse("@n:[5]").kind {
            NodeKind::Numeric { lo, hi, .. } => assert_eq!(lo.value, hi.value),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_geo_and_geoshape() {
        assert!(matches!(parse("@loc:[2.3 48.8 10 km]").kind, NodeKind::Geo { .. }));
        match parse("@s:[WITHIN $poly]").kind {
            NodeKind::GeoShape { predicate, wkt, .. } => {
                assert_eq!(predicate, "WITHIN");
                assert_eq!(wkt, Operand::Param("poly".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tags() {
        match parse("@t:{foo bar | baz* | *qux | \"\"}").kind {
            NodeKind::Tag { values, .. } => {
                assert_eq!(values[0], TagValue { kind: MatchKind::Exact, value: lit("foo bar") });
                assert_eq!(values[1].kind, MatchKind::Prefix);
                assert_eq!(values[2].kind, MatchKind::Suffix);
                assert_eq!(values[3].value, lit(""));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_attributes_on_scoped_term() {
        match parse("@t:morphix=>{$phonetic:false}").kind {
            NodeKind::Fields { ref fields, .. } => assert_eq!(fields, &vec!["t".to_string()]),
            ref other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse("@t:morphix=>{$phonetic:false}").attrs.phonetic, Some(false));
        let n = parse("(a b)=>{$slop: 2; $inorder: true; $weight: 0.5}");
        assert_eq!(n.attrs.slop, Some(2));
        assert_eq!(n.attrs.inorder, Some(true));
        assert_eq!(n.attrs.weight, 0.5);
    }

    #[test]
    fn test_knn_suffix() {
        match parse("*=>[KNN 10 @vec $blob AS dist]").kind {
            NodeKind::VectorKnn { base, knn } => {
                assert!(base.is_wildcard());
                assert_eq!(knn.k, lit("10"));
                assert_eq!(knn.field, "vec");
                assert_eq!(knn.blob, Blob::Param("blob".into()));
                assert_eq!(knn.alias.as_deref(), Some("dist"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_affixes_fuzzy_and_missing() {
        assert_eq!(parse("hel*").kind, NodeKind::Affix(MatchKind::Prefix, lit("hel")));
        assert_eq!(parse("*llo").kind, NodeKind::Affix(MatchKind::Suffix, lit("llo")));
        assert_eq!(parse("*ll*").kind, NodeKind::Affix(MatchKind::Infix, lit("ll")));
        assert_eq!(parse("w'h?llo'").kind, NodeKind::Affix(MatchKind::Pattern, lit("h?llo")));
        assert_eq!(parse("%%helo%%").kind, NodeKind::Fuzzy { term: lit("helo"), distance: 2 });
        assert_eq!(parse("ismissing(@f)").kind, NodeKind::IsMissing("f".into()));
        assert!(parse("*").is_wildcard());
    }

    #[test]
    fn test_negation_and_optional() {
        let n = parse("-foo ~bar");
        match n.kind {
            NodeKind::Intersect(c) => {
                assert!(matches!(c[0].kind, NodeKind::Not(_)));
                assert!(matches!(c[1].kind, NodeKind::Optional(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dialect_one_rejects_params_and_vectors() {
        assert!(parse_query("@n:[$lo 5]", 1).is_err());
        assert!(parse_query("*=>[KNN 3 @v $b]", 1).is_err());
        assert!(parse_query("hello", 1).is_ok());
    }

    #[test]
    fn test_syntax_errors() {
        for q in ["", "(foo", "@:foo", "@n:[1 2 3]", "%%%%a%%%%", "@t:{}", "foo=>{$bogus: 1}"] {
            let err = parse_query(q, 2).unwrap_err();
            assert_eq!(err.kind, ErrorKind::BadQuerySyntax, "{}", q);
        }
    }
}
