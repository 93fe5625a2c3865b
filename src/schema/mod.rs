//! Index definitions: ordered field descriptors, key rules and options.

pub mod field;
pub mod options;
pub mod rule;

use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::FieldMask;
use crate::engine::args::ArgCursor;

pub use field::{FieldFlags, FieldKind, FieldSpec};
pub use options::IndexOptions;
pub use rule::{DocType, IndexRule};

/// Sentinel term indexed for an absent INDEXMISSING field.
pub const MISSING_TERM: &str = "__missing";
/// Sentinel term indexed for an empty INDEXEMPTY field.
pub const EMPTY_TERM: &str = "__empty";

/// Append-only, ordered set of fields. A field's position is its slot in
/// the per-index field arena.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, assigning its TEXT mask bit.
    pub fn add(&mut self, mut field: FieldSpec, text_limit: usize) -> Result<usize> {
        if self.fields.iter().any(|f| f.name == field.name) {
            return Err(Error::new(ErrorKind::BadSchema, format!("duplicate field '{}'", field.name)));
        }
        if field.kind == FieldKind::Text {
            let used = self.text_fields().count();
            if used >= text_limit.min(64) {
                return Err(Error::new(
                    ErrorKind::BadSchema,
                    format!("too many TEXT fields (limit {})", text_limit.min(64)),
                ));
            }
            field.text_bit = Some(used as u8);
        }
        self.fields.push(field);
        Ok(self.fields.len() - 1)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Looks up by name, then by path (`$.a.b` style selectors).
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.field_index(name).map(|i| &self.fields[i])
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .or_else(|| self.fields.iter().position(|f| f.path == name))
    }

    pub fn require(&self, name: &str) -> Result<(usize, &FieldSpec)> {
        self.field_index(name)
            .map(|i| (i, &self.fields[i]))
            .ok_or_else(|| Error::new(ErrorKind::FieldNotFound, format!("unknown field '{}'", name)))
    }

    pub fn text_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.kind == FieldKind::Text)
    }

    /// Mask bit of a TEXT field.
    pub fn mask_for(&self, name: &str) -> Option<FieldMask> {
        let f = self.field(name)?;
        f.text_bit.map(|b| 1u64 << b)
    }

    /// Highest TEXT weight per mask bit, for scorers.
    pub fn text_weights(&self) -> Vec<f64> {
        let mut weights = vec![1.0; 64];
        for f in self.text_fields() {
            if let Some(b) = f.text_bit {
                weights[b as usize] = f.weight;
            }
        }
        weights
    }
}

/// Everything `INDEX.CREATE` carries besides the name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub rule: IndexRule,
    pub options: IndexOptions,
    pub schema: Schema,
}

impl IndexDefinition {
    /// Parses `[rule clauses] [options] SCHEMA field…`.
    pub fn parse(cursor: &mut ArgCursor<'_>) -> Result<IndexDefinition> {
        let mut def = IndexDefinition::default();
        loop {
            if cursor.eat("SCHEMA") {
                break;
            }
            if cursor.is_done() {
                return Err(Error::new(ErrorKind::BadSchema, "missing SCHEMA"));
            }
            if def.rule.parse_one(cursor)? || def.options.parse_one(cursor)? {
                continue;
            }
            return Err(cursor.unrecognized());
        }
        def.add_fields(cursor)?;
        if def.schema.is_empty() {
            return Err(Error::new(ErrorKind::BadSchema, "schema has no fields"));
        }
        Ok(def)
    }

    /// Parses field specs until the arguments run out.
    pub fn add_fields(&mut self, cursor: &mut ArgCursor<'_>) -> Result<Vec<usize>> {
        let mut added = Vec::new();
        while !cursor.is_done() {
            let field = FieldSpec::parse(cursor)?;
            added.push(self.schema.add(field, self.options.text_field_limit())?);
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::to_args;

    fn define(args: &[&str]) -> Result<IndexDefinition> {
        let args = to_args(args);
        let mut cursor = ArgCursor::new(&args);
        IndexDefinition::parse(&mut cursor)
    }

    #[test]
    fn test_create_definition() {
        let def = define(&[
            "ON", "HASH", "PREFIX", "1", "doc:", "INDEXALL", "ENABLE", "SCHEMA", "title", "TEXT", "WEIGHT", "2", "body",
            "TEXT", "n", "NUMERIC", "SORTABLE", "tags", "TAG", "SEPARATOR", ";",
        ])
        .unwrap();
        assert_eq!(def.rule.prefixes, vec!["doc:".to_string()]);
        assert!(def.options.index_all);
        assert_eq!(def.schema.len(), 4);
        assert_eq!(def.schema.mask_for("body"), Some(2));
        assert_eq!(def.schema.field("tags").unwrap().separator, ';');
        assert_eq!(def.schema.text_weights()[0], 2.0);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = define(&["SCHEMA", "a", "TEXT", "a", "NUMERIC"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadSchema);
    }

    #[test]
    fn test_missing_schema() {
        assert_eq!(define(&["PREFIX", "1", "x"]).unwrap_err().kind, ErrorKind::BadSchema);
        assert_eq!(define(&["BOGUS", "SCHEMA", "a", "TEXT"]).unwrap_err().kind, ErrorKind::ArgUnrecognized);
    }

    #[test]
    fn test_text_field_limit() {
        let mut schema = Schema::new();
        for i in 0..32 {
            schema.add(FieldSpec::new(&format!("f{}", i), FieldKind::Text), 32).unwrap();
        }
        assert!(schema.add(FieldSpec::new("extra", FieldKind::Text), 32).is_err());
        assert!(schema.add(FieldSpec::new("extra", FieldKind::Text), 64).is_ok());
    }
}
