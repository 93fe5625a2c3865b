use std::collections::HashMap;
use crate::core::error::{Error, ErrorKind, Result};
use crate::query::ast::{Blob, Node, NodeKind, Operand};

/// PARAMS name → raw value.
pub type Params = HashMap<String, Vec<u8>>;

fn missing(name: &str) -> Error {
    Error::new(ErrorKind::BadParameter, format!("No such parameter `{}`", name))
}

fn resolve_operand(op: &mut Operand, params: &Params) -> Result<()> {
    if let Operand::Param(name) = op {
        let value = params.get(name.as_str()).ok_or_else(|| missing(name))?;
        *op = Operand::Literal(String::from_utf8_lossy(value).into_owned());
    }
    Ok(())
}

fn resolve_blob(blob: &mut Blob, params: &Params) -> Result<()> {
    if let Blob::Param(name) = blob {
        let value = params.get(name.as_str()).ok_or_else(|| missing(name))?;
        *blob = Blob::Bytes(value.clone());
    }
    Ok(())
}

/// Replaces every parameter reference with its bound value. Any reference
/// without a binding fails the query.
pub fn resolve_params(node: &mut Node, params: &Params) -> Result<()> {
    match &mut node.kind {
        NodeKind::Term(op) | NodeKind::Affix(_, op) => resolve_operand(op, params)?,
        NodeKind::Fuzzy { term, .. } => resolve_operand(term, params)?,
        NodeKind::Phrase(children) | NodeKind::Union(children) | NodeKind::Intersect(children) => {
            for c in children {
                resolve_params(c, params)?;
            }
        }
        NodeKind::Not(child) | NodeKind::Optional(child) => resolve_params(child, params)?,
        NodeKind::Fields { child, .. } => resolve_params(child, params)?,
        NodeKind::Numeric { lo, hi, .. } => {
            resolve_operand(&mut lo.value, params)?;
            resolve_operand(&mut hi.value, params)?;
        }
        NodeKind::Tag { values, .. } => {
            for v in values {
                resolve_operand(&mut v.value, params)?;
            }
        }
        NodeKind::Geo { lon, lat, radius, .. } => {
            resolve_operand(lon, params)?;
            resolve_operand(lat, params)?;
            resolve_operand(radius, params)?;
        }
        NodeKind::GeoShape { wkt, .. } => resolve_operand(wkt, params)?,
        NodeKind::VectorKnn { base, knn } => {
            resolve_params(base, params)?;
            resolve_operand(&mut knn.k, params)?;
            resolve_blob(&mut knn.blob, params)?;
            if let Some(ef) = &mut knn.ef_runtime {
                resolve_operand(ef, params)?;
            }
        }
        NodeKind::VectorRange { radius, blob, epsilon, .. } => {
            resolve_operand(radius, params)?;
            resolve_blob(blob, params)?;
            if let Some(e) = epsilon {
                resolve_operand(e, params)?;
            }
        }
        NodeKind::Wildcard | NodeKind::Empty | NodeKind::IsMissing(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_query;

    #[test]
    fn test_resolves_numeric_and_blob() {
        let mut node = parse_query("@n:[$lo $hi]=>[KNN $k @v $vec]", 2).unwrap();
        let params: Params = [
            ("lo".to_string(), b"1".to_vec()),
            ("hi".to_string(), b"5".to_vec()),
            ("k".to_string(), b"3".to_vec()),
            ("vec".to_string(), vec![0, 0, 128, 63]),
        ]
        .into_iter()
        .collect();
        resolve_params(&mut node, &params).unwrap();
        match node.kind {
            NodeKind::VectorKnn { base, knn } => {
                assert_eq!(knn.k, Operand::Literal("3".into()));
                assert_eq!(knn.blob, Blob::Bytes(vec![0, 0, 128, 63]));
                assert!(matches!(base.kind, NodeKind::Numeric { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unbound_parameter_fails() {
        let mut node = parse_query("@t:{$tag}", 2).unwrap();
        let err = resolve_params(&mut node, &Params::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadParameter);
    }
}
