use serde::{Deserialize, Serialize};
use crate::analysis::language::Language;
use crate::core::error::{Error, ErrorKind, Result};
use crate::engine::args::ArgCursor;
use crate::index::geoshape::CoordSystem;
use crate::vector::distance::{Metric, VectorType};
use crate::vector::{Algorithm, VectorParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Text,
    Tag,
    Numeric,
    Geo,
    GeoShape,
    Vector,
}

impl FieldKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TEXT" => Some(FieldKind::Text),
            "TAG" => Some(FieldKind::Tag),
            "NUMERIC" => Some(FieldKind::Numeric),
            "GEO" => Some(FieldKind::Geo),
            "GEOSHAPE" => Some(FieldKind::GeoShape),
            "VECTOR" => Some(FieldKind::Vector),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Text => "TEXT",
            FieldKind::Tag => "TAG",
            FieldKind::Numeric => "NUMERIC",
            FieldKind::Geo => "GEO",
            FieldKind::GeoShape => "GEOSHAPE",
            FieldKind::Vector => "VECTOR",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFlags(u16);

impl FieldFlags {
    pub const SORTABLE: u16 = 1;
    pub const UNF: u16 = 1 << 1;
    pub const NOINDEX: u16 = 1 << 2;
    pub const CASESENSITIVE: u16 = 1 << 3;
    pub const WITHSUFFIXTRIE: u16 = 1 << 4;
    pub const INDEXMISSING: u16 = 1 << 5;
    pub const INDEXEMPTY: u16 = 1 << 6;
    pub const NOSTEM: u16 = 1 << 7;
    pub const PHONETIC: u16 = 1 << 8;

    pub fn has(&self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u16) {
        self.0 |= bit;
    }

    pub fn names(&self) -> Vec<&'static str> {
        [
            (Self::SORTABLE, "SORTABLE"),
            (Self::UNF, "UNF"),
            (Self::NOINDEX, "NOINDEX"),
            (Self::CASESENSITIVE, "CASESENSITIVE"),
            (Self::WITHSUFFIXTRIE, "WITHSUFFIXTRIE"),
            (Self::INDEXMISSING, "INDEXMISSING"),
            (Self::INDEXEMPTY, "INDEXEMPTY"),
            (Self::NOSTEM, "NOSTEM"),
            (Self::PHONETIC, "PHONETIC"),
        ]
        .iter()
        .filter(|(bit, _)| self.has(*bit))
        .map(|(_, n)| *n)
        .collect()
    }
}

/// One schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub path: String,
    pub kind: FieldKind,
    pub flags: FieldFlags,
    pub weight: f64,
    pub separator: char,
    pub phonetic: Option<Language>,
    pub coord_system: CoordSystem,
    pub vector: Option<VectorParams>,
    pub text_bit: Option<u8>, // Bit in the TEXT field mask
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        FieldSpec {
            name: name.to_string(),
            path: name.to_string(),
            kind,
            flags: FieldFlags::default(),
            weight: 1.0,
            separator: ',',
            phonetic: None,
            coord_system: CoordSystem::Spherical,
            vector: None,
            text_bit: None,
        }
    }

    pub fn with_flag(mut self, bit: u16) -> Self {
        self.flags.set(bit);
        self
    }

    pub fn is_sortable(&self) -> bool {
        self.flags.has(FieldFlags::SORTABLE)
    }

    pub fn is_indexed(&self) -> bool {
        !self.flags.has(FieldFlags::NOINDEX)
    }

    pub fn has(&self, bit: u16) -> bool {
        self.flags.has(bit)
    }

    /// Parses `path [AS name] KIND [options…]`. Stops at the first
    /// argument that is not an option of this kind.
    pub fn parse(cursor: &mut ArgCursor<'_>) -> Result<FieldSpec> {
        let path = cursor.next_str("field name")?;
        let name = if cursor.eat("AS") { cursor.next_str("field alias")? } else { path.clone() };
        let kind_str = cursor.next_str("field type")?;
        let kind = FieldKind::parse(&kind_str)
            .ok_or_else(|| Error::new(ErrorKind::BadSchema, format!("unknown field type '{}' for '{}'", kind_str, name)))?;
        let mut field = FieldSpec::new(&name, kind);
        field.path = path;

        match kind {
            FieldKind::Vector => field.vector = Some(parse_vector_params(cursor, &name)?),
            FieldKind::GeoShape => {
                if cursor.eat("FLAT") {
                    field.coord_system = CoordSystem::Flat;
                } else if cursor.eat("SPHERICAL") {
                    field.coord_system = CoordSystem::Spherical;
                }
            }
            _ => {}
        }

        loop {
            if cursor.eat("SORTABLE") {
                if matches!(kind, FieldKind::Vector | FieldKind::GeoShape) {
                    return Err(Error::new(ErrorKind::BadSchema, format!("{} fields cannot be SORTABLE", kind.name())));
                }
                field.flags.set(FieldFlags::SORTABLE);
                if cursor.eat("UNF") {
                    field.flags.set(FieldFlags::UNF);
                }
            } else if cursor.eat("UNF") {
                field.flags.set(FieldFlags::UNF);
            } else if cursor.eat("NOINDEX") {
                field.flags.set(FieldFlags::NOINDEX);
            } else if cursor.eat("INDEXMISSING") {
                field.flags.set(FieldFlags::INDEXMISSING);
            } else if kind == FieldKind::Text && cursor.eat("NOSTEM") {
                field.flags.set(FieldFlags::NOSTEM);
            } else if kind == FieldKind::Text && cursor.eat("WEIGHT") {
                field.weight = cursor.next_f64("WEIGHT")?;
                if field.weight < 0.0 {
                    return Err(Error::new(ErrorKind::BadSchema, "WEIGHT must not be negative"));
                }
            } else if kind == FieldKind::Text && cursor.eat("PHONETIC") {
                let spec = cursor.next_str("PHONETIC")?;
                field.phonetic = Some(parse_phonetic(&spec)?);
                field.flags.set(FieldFlags::PHONETIC);
            } else if matches!(kind, FieldKind::Text | FieldKind::Tag) && cursor.eat("WITHSUFFIXTRIE") {
                field.flags.set(FieldFlags::WITHSUFFIXTRIE);
            } else if matches!(kind, FieldKind::Text | FieldKind::Tag) && cursor.eat("INDEXEMPTY") {
                field.flags.set(FieldFlags::INDEXEMPTY);
            } else if kind == FieldKind::Tag && cursor.eat("CASESENSITIVE") {
                field.flags.set(FieldFlags::CASESENSITIVE);
            } else if kind == FieldKind::Tag && cursor.eat("SEPARATOR") {
                let sep = cursor.next_str("SEPARATOR")?;
                let mut chars = sep.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => field.separator = c,
                    _ => return Err(Error::new(ErrorKind::BadSchema, "SEPARATOR must be a single character")),
                }
            } else {
                break;
            }
        }
        Ok(field)
    }
}

/// `dm:en` style phonetic spec: matcher and language.
fn parse_phonetic(spec: &str) -> Result<Language> {
    let (matcher, lang) = spec
        .split_once(':')
        .ok_or_else(|| Error::new(ErrorKind::BadSchema, format!("invalid phonetic spec '{}'", spec)))?;
    if !matcher.eq_ignore_ascii_case("dm") {
        return Err(Error::new(ErrorKind::BadSchema, format!("unsupported phonetic matcher '{}'", matcher)));
    }
    let language = match lang.to_ascii_lowercase().as_str() {
        "en" => Language::English,
        "fr" => Language::French,
        "pt" => Language::Portuguese,
        "es" => Language::Spanish,
        other => return Err(Error::new(ErrorKind::BadSchema, format!("unsupported phonetic language '{}'", other))),
    };
    Ok(language)
}

fn parse_vector_params(cursor: &mut ArgCursor<'_>, name: &str) -> Result<VectorParams> {
    let algorithm = Algorithm::parse(&cursor.next_str("vector algorithm")?)?;
    let nargs = cursor.next_usize("vector attribute count")?;
    if nargs % 2 != 0 {
        return Err(Error::new(ErrorKind::BadSchema, "vector attributes come in name/value pairs"));
    }
    let mut elem_type = None;
    let mut dim = None;
    let mut metric = None;
    let mut extra: Vec<(String, String)> = Vec::new();
    for _ in 0..nargs / 2 {
        let key = cursor.next_str("vector attribute")?.to_ascii_uppercase();
        let val = cursor.next_str(&key)?;
        match key.as_str() {
            "TYPE" => {
                elem_type = Some(VectorType::parse(&val)?);
            }
            "DIM" => {
                let d: usize = val
                    .parse()
                    .map_err(|_| Error::new(ErrorKind::BadSchema, format!("invalid DIM '{}'", val)))?;
                if d == 0 {
                    return Err(Error::new(ErrorKind::BadSchema, "DIM must be positive"));
                }
                dim = Some(d);
            }
            "DISTANCE_METRIC" => metric = Some(Metric::parse(&val)?),
            _ => extra.push((key, val)),
        }
    }
    let (Some(elem_type), Some(dim), Some(metric)) = (elem_type, dim, metric) else {
        return Err(Error::new(
            ErrorKind::BadSchema,
            format!("vector field '{}' needs TYPE, DIM and DISTANCE_METRIC", name),
        ));
    };
    let mut params = VectorParams::new(algorithm, elem_type, dim, metric);
    for (key, val) in extra {
        let bad = || Error::new(ErrorKind::BadSchema, format!("invalid value '{}' for {}", val, key));
        let as_usize = || val.parse::<usize>().map_err(|_| bad());
        match (algorithm, key.as_str()) {
            (_, "INITIAL_CAP") => params.initial_cap = as_usize()?,
            (_, "BLOCK_SIZE") => params.block_size = as_usize()?.max(1),
            (Algorithm::Hnsw, "M") => params.m = as_usize()?.max(2),
            (Algorithm::Hnsw, "EF_CONSTRUCTION") => params.ef_construction = as_usize()?.max(1),
            (Algorithm::Hnsw, "EF_RUNTIME") => params.ef_runtime = as_usize()?.max(1),
            (Algorithm::Hnsw | Algorithm::Vamana, "EPSILON") => {
                params.epsilon = val.parse::<f64>().map_err(|_| bad())?
            }
            (Algorithm::Vamana, "GRAPH_MAX_DEGREE") => params.graph_max_degree = as_usize()?.max(2),
            (Algorithm::Vamana, "CONSTRUCTION_WINDOW_SIZE") => params.construction_window = as_usize()?.max(1),
            (Algorithm::Vamana, "SEARCH_WINDOW_SIZE") => params.search_window = as_usize()?.max(1),
            (Algorithm::Vamana, "ALPHA") => params.alpha = val.parse::<f32>().map_err(|_| bad())?,
            (Algorithm::Vamana, "TRAINING_THRESHOLD") => params.training_threshold = as_usize()?.max(1),
            _ => {
                return Err(Error::new(
                    ErrorKind::BadSchema,
                    format!("unknown {} attribute '{}'", algorithm.name(), key),
                ))
            }
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::to_args;

    fn parse(args: &[&str]) -> Result<FieldSpec> {
        let args = to_args(args);
        let mut c = ArgCursor::new(&args);
        FieldSpec::parse(&mut c)
    }

    #[test]
    fn test_text_options() {
        let f = parse(&["title", "TEXT", "WEIGHT", "2", "PHONETIC", "dm:en", "SORTABLE"]).unwrap();
        assert_eq!(f.kind, FieldKind::Text);
        assert_eq!(f.weight, 2.0);
        assert_eq!(f.phonetic, Some(Language::English));
        assert!(f.is_sortable());
    }

    #[test]
    fn test_alias_and_tag_separator() {
        let f = parse(&["$.tags", "AS", "tags", "TAG", "SEPARATOR", "|", "CASESENSITIVE"]).unwrap();
        assert_eq!(f.name, "tags");
        assert_eq!(f.path, "$.tags");
        assert_eq!(f.separator, '|');
        assert!(f.has(FieldFlags::CASESENSITIVE));
    }

    #[test]
    fn test_vector_params() {
        let f = parse(&["v", "VECTOR", "HNSW", "8", "TYPE", "FLOAT32", "DIM", "3", "DISTANCE_METRIC", "COSINE", "M", "8"]).unwrap();
        let p = f.vector.unwrap();
        assert_eq!(p.dim, 3);
        assert_eq!(p.metric, Metric::Cosine);
        assert_eq!(p.m, 8);
    }

    #[test]
    fn test_vector_requires_dim() {
        let err = parse(&["v", "VECTOR", "FLAT", "4", "TYPE", "FLOAT32", "DISTANCE_METRIC", "L2"]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadSchema);
    }

    #[test]
    fn test_stops_at_next_field() {
        let args = to_args(&["a", "NUMERIC", "SORTABLE", "b", "TAG"]);
        let mut c = ArgCursor::new(&args);
        FieldSpec::parse(&mut c).unwrap();
        assert_eq!(c.peek_str().as_deref(), Some("b"));
    }

    #[test]
    fn test_bad_phonetic() {
        assert!(parse(&["t", "TEXT", "PHONETIC", "xx:en"]).is_err());
    }
}
