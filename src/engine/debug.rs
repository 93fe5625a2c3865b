//! DEBUG views over one index's internals.

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::format_number;
use crate::engine::index::{FieldIndex, SearchIndex};
use crate::engine::reply::Reply;
use crate::gc::GcReport;

/// Doc ids of a term's posting list, tombstoned ones included.
pub fn dump_invidx(index: &SearchIndex, term: &str) -> Result<Reply> {
    let data = index.data.read();
    let list = data
        .terms
        .get(term)
        .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("Can not find the inverted index for `{}`", term)))?;
    let ids = list.entries()?.into_iter().map(|e| Reply::Int(e.doc_id.value() as i64)).collect();
    Ok(Reply::Array(ids))
}

/// `[doc id, value]` pairs of a NUMERIC field, in tree order.
pub fn dump_numidx(index: &SearchIndex, field: &str) -> Result<Reply> {
    let data = index.data.read();
    let (_, _, slot) = data.field(field)?;
    let tree = match &slot.index {
        FieldIndex::Numeric(t) => t,
        _ => return Err(Error::new(ErrorKind::TypeMismatch, format!("`{}` is not a NUMERIC field", field))),
    };
    let pairs = tree
        .dump()?
        .into_iter()
        .map(|(id, v)| Reply::Array(vec![Reply::Int(id.value() as i64), Reply::Str(format_number(v))]))
        .collect();
    Ok(Reply::Array(pairs))
}

pub fn dump_terms(index: &SearchIndex) -> Reply {
    let data = index.data.read();
    let mut terms: Vec<&str> = data.terms.iter().map(|(t, _)| t.as_str()).collect();
    terms.sort_unstable();
    Reply::strings(terms)
}

pub fn vecsim_info(index: &SearchIndex, field: &str) -> Result<Reply> {
    let info = index.data.read().vector(field)?.info();
    Ok(Reply::Map(vec![
        ("algorithm".into(), Reply::str(info.algorithm)),
        ("dim".into(), Reply::Int(info.dim as i64)),
        ("metric".into(), Reply::str(info.metric)),
        ("front_size".into(), Reply::Int(info.front_size as i64)),
        ("back_size".into(), Reply::Int(info.back_size as i64)),
        ("memory".into(), Reply::Int(info.memory as i64)),
        ("status".into(), Reply::str(info.status)),
        ("transfer_threshold".into(), Reply::Int(info.transfer_threshold as i64)),
    ]))
}

/// Seconds a TEMPORARY index has left before it expires.
pub fn ttl(index: &SearchIndex) -> Result<Reply> {
    let ttl = index
        .temporary_ttl()
        .ok_or_else(|| Error::new(ErrorKind::InvalidState, "Index is not temporary"))?;
    Ok(Reply::Int(ttl.saturating_sub(index.idle_for()).as_secs() as i64))
}

pub fn docinfo(index: &SearchIndex, key: &str) -> Result<Reply> {
    let data = index.data.read();
    let meta = data
        .docs
        .get_by_key(key)
        .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("Document `{}` is not indexed", key)))?;
    Ok(Reply::Map(vec![
        ("internal_id".into(), Reply::Int(meta.id.value() as i64)),
        ("score".into(), Reply::Double(meta.score)),
        ("language".into(), Reply::str(meta.language.name())),
        ("doc_len".into(), Reply::Int(meta.len as i64)),
        ("max_freq".into(), Reply::Int(meta.max_freq as i64)),
        ("has_payload".into(), Reply::Int(meta.payload.is_some() as i64)),
        ("sortables".into(), Reply::Map(meta.sortables.iter().map(|(k, v)| (k.clone(), Reply::from(v))).collect())),
        ("expires_at".into(), meta.expires_at.map_or(Reply::Nil, |t| Reply::Int(t as i64))),
    ]))
}

pub fn gc_report(report: &GcReport) -> Reply {
    Reply::Map(vec![
        ("lists_scanned".into(), Reply::Int(report.lists_scanned as i64)),
        ("bytes_collected".into(), Reply::Int(report.bytes_freed as i64)),
        ("records_collected".into(), Reply::Int(report.records_freed as i64)),
        ("expired_removed".into(), Reply::Int(report.expired_removed as i64)),
        ("conflicts".into(), Reply::Int(report.conflicts as i64)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ingest::testing::with_hashes;

    fn index() -> SearchIndex {
        let data = with_hashes(
            "SCHEMA t TEXT n NUMERIC",
            &[("a", &[("t", "hello world"), ("n", "3")]), ("b", &[("t", "hello"), ("n", "1.5")])],
        );
        SearchIndex::new("idx", data)
    }

    #[test]
    fn test_dump_views() {
        let idx = index();
        assert_eq!(dump_invidx(&idx, "hello").unwrap(), Reply::Array(vec![Reply::Int(1), Reply::Int(2)]));
        assert!(dump_invidx(&idx, "absent").is_err());
        let nums = dump_numidx(&idx, "n").unwrap();
        assert_eq!(nums.as_array().map(|a| a.len()), Some(2));
        assert_eq!(dump_numidx(&idx, "t").err().map(|e| e.kind), Some(ErrorKind::TypeMismatch));
        let terms = dump_terms(&idx);
        assert!(terms.as_array().unwrap().contains(&Reply::str("world")));
    }

    #[test]
    fn test_docinfo_and_ttl() {
        let idx = index();
        let info = docinfo(&idx, "b").unwrap();
        assert_eq!(info.get("internal_id"), Some(&Reply::Int(2)));
        assert_eq!(ttl(&idx).err().map(|e| e.kind), Some(ErrorKind::InvalidState));
    }
}
