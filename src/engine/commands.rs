//! Argument-vector command surface over [`Engine`].

use serde_json::Value as Json;
use crate::core::error::{Error, ErrorKind, Result};
use crate::engine::aggregate::AggregateOptions;
use crate::engine::args::{to_args, ArgCursor};
use crate::engine::debug;
use crate::engine::hybrid::HybridOptions;
use crate::engine::reply::Reply;
use crate::engine::search::{QueryOptions, SearchOptions};
use crate::engine::Engine;
use crate::schema::{FieldSpec, IndexDefinition};

/// Serialized stats to a reply tree.
fn json_reply(v: Json) -> Reply {
    match v {
        Json::Null => Reply::Nil,
        Json::Bool(b) => Reply::Int(b as i64),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Reply::Int(i),
            None => Reply::Double(n.as_f64().unwrap_or(0.0)),
        },
        Json::String(s) => Reply::Str(s),
        Json::Array(items) => Reply::Array(items.into_iter().map(json_reply).collect()),
        Json::Object(map) => Reply::Map(map.into_iter().map(|(k, v)| (k, json_reply(v))).collect()),
    }
}

fn finish<T>(cursor: &ArgCursor<'_>, value: T) -> Result<T> {
    if cursor.is_done() { Ok(value) } else { Err(cursor.unrecognized()) }
}

impl Engine {
    /// Runs one command given as an argument vector, e.g.
    /// `["SEARCH", "idx", "hello"]`.
    pub fn execute<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<Reply> {
        let args = to_args(args);
        let mut cursor = ArgCursor::new(&args);
        let name = cursor.next_str("command")?.to_ascii_uppercase();
        match name.as_str() {
            "INDEX.CREATE" => {
                let index = cursor.next_str("INDEX.CREATE")?;
                let definition = IndexDefinition::parse(&mut cursor)?;
                self.create_index(&index, definition)?;
                Ok(Reply::Ok)
            }
            "INDEX.ALTER" => {
                let index = cursor.next_str("INDEX.ALTER")?;
                let skip_scan = cursor.eat("SKIPINITIALSCAN");
                cursor.expect("SCHEMA")?;
                cursor.expect("ADD")?;
                let mut fields = Vec::new();
                while !cursor.is_done() {
                    fields.push(FieldSpec::parse(&mut cursor)?);
                }
                if fields.is_empty() {
                    return Err(Error::new(ErrorKind::BadSchema, "SCHEMA ADD needs at least one field"));
                }
                self.alter_index(&index, fields, skip_scan)?;
                Ok(Reply::Ok)
            }
            "INDEX.DROP" => {
                let index = cursor.next_str("INDEX.DROP")?;
                let dd = cursor.eat("DD");
                finish(&cursor, ())?;
                self.drop_index(&index, dd)?;
                Ok(Reply::Ok)
            }
            "INDEX.INFO" => {
                let index = cursor.next_str("INDEX.INFO")?;
                let info = self.info(&index)?;
                let json = serde_json::to_value(&info).map_err(|e| Error::internal(e.to_string()))?;
                Ok(json_reply(json))
            }
            "INDEX.LIST" | "INDEX._LIST" => Ok(Reply::strings(self.list())),
            "INDEX.EXPLAIN" => {
                let index = cursor.next_str("INDEX.EXPLAIN")?;
                let query = cursor.next_str("INDEX.EXPLAIN")?;
                let mut opts = QueryOptions::default();
                while !cursor.is_done() {
                    if !opts.parse_one(&mut cursor)? {
                        return Err(cursor.unrecognized());
                    }
                }
                Ok(Reply::Str(self.explain(&index, &query, &opts)?))
            }
            "INDEX.TAGVALS" => {
                let index = cursor.next_str("INDEX.TAGVALS")?;
                let field = cursor.next_str("INDEX.TAGVALS")?;
                finish(&cursor, ())?;
                Ok(Reply::strings(self.tag_values(&index, field.trim_start_matches('@'))?))
            }
            "SEARCH" | "AGGREGATE" | "HYBRID" => self.query_command(&name, &mut cursor, None),
            "CURSOR" => self.cursor_command(&mut cursor),
            "CONFIG" => {
                if cursor.eat("GET") {
                    let pattern = cursor.next_str("CONFIG GET")?;
                    finish(&cursor, ())?;
                    let pairs = self.config_get(&pattern);
                    Ok(Reply::Array(
                        pairs.into_iter().map(|(k, v)| Reply::Array(vec![Reply::Str(k), Reply::Str(v)])).collect(),
                    ))
                } else if cursor.eat("SET") {
                    let key = cursor.next_str("CONFIG SET")?;
                    let value = cursor.next_str("CONFIG SET")?;
                    finish(&cursor, ())?;
                    self.config_set(&key, &value)?;
                    Ok(Reply::Ok)
                } else {
                    Err(cursor.unrecognized())
                }
            }
            "DEBUG" => self.debug_command(&mut cursor),
            _ => Err(Error::new(ErrorKind::ArgUnrecognized, format!("Unknown command `{}`", name))),
        }
    }

    fn query_command(&self, name: &str, cursor: &mut ArgCursor<'_>, timeout_after: Option<u64>) -> Result<Reply> {
        let index = cursor.next_str(name)?;
        let reply = match name {
            "SEARCH" => {
                let query = cursor.next_str("SEARCH")?;
                let mut opts = SearchOptions::parse(cursor)?;
                opts.query.timeout_after = timeout_after;
                self.search(&index, &query, &opts)?
            }
            "AGGREGATE" => {
                let query = cursor.next_str("AGGREGATE")?;
                let mut opts = AggregateOptions::parse(cursor)?;
                opts.query.timeout_after = timeout_after;
                self.aggregate(&index, &query, &opts)?
            }
            _ => {
                let rrf_constant = self.config().hybrid_rrf_constant;
                let mut opts = HybridOptions::parse(cursor, rrf_constant)?;
                opts.query.timeout_after = timeout_after;
                self.hybrid(&index, &opts)?
            }
        };
        Ok(reply.to_reply())
    }

    fn cursor_command(&self, cursor: &mut ArgCursor<'_>) -> Result<Reply> {
        if cursor.eat("READ") {
            let index = cursor.next_str("CURSOR READ")?;
            let id = cursor.next_u64("CURSOR READ")?;
            let count = if cursor.eat("COUNT") { Some(cursor.next_usize("COUNT")?) } else { None };
            finish(cursor, ())?;
            Ok(self.cursor_read(&index, id, count)?.to_reply())
        } else if cursor.eat("DEL") {
            let index = cursor.next_str("CURSOR DEL")?;
            let id = cursor.next_u64("CURSOR DEL")?;
            finish(cursor, ())?;
            self.cursor_del(&index, id)?;
            Ok(Reply::Ok)
        } else if cursor.eat("GC") {
            // Index and id are accepted for compatibility; every idle cursor is swept
            while !cursor.is_done() {
                cursor.next_bytes("CURSOR GC")?;
            }
            Ok(Reply::Int(self.cursor_gc() as i64))
        } else {
            Err(cursor.unrecognized())
        }
    }

    fn debug_command(&self, cursor: &mut ArgCursor<'_>) -> Result<Reply> {
        let sub = cursor.next_str("DEBUG")?.to_ascii_uppercase();
        if sub == "TIMEOUT_AFTER_N" {
            let n = cursor.next_u64("TIMEOUT_AFTER_N")?;
            let name = cursor.next_str("TIMEOUT_AFTER_N")?.to_ascii_uppercase();
            if !matches!(name.as_str(), "SEARCH" | "AGGREGATE" | "HYBRID") {
                return Err(Error::new(ErrorKind::BadParameter, "TIMEOUT_AFTER_N wraps SEARCH, AGGREGATE or HYBRID"));
            }
            return self.query_command(&name, cursor, Some(n));
        }
        let index = self.index(&cursor.next_str("DEBUG")?)?;
        let reply = match sub.as_str() {
            "DUMP_INVIDX" => debug::dump_invidx(&index, &cursor.next_str("DUMP_INVIDX")?)?,
            "DUMP_NUMIDX" => debug::dump_numidx(&index, cursor.next_str("DUMP_NUMIDX")?.trim_start_matches('@'))?,
            "DUMP_TERMS" => debug::dump_terms(&index),
            "VECSIM_INFO" => debug::vecsim_info(&index, cursor.next_str("VECSIM_INFO")?.trim_start_matches('@'))?,
            "GC_FORCEINVOKE" => debug::gc_report(&self.run_gc(&index.name, true)?),
            "TTL" => debug::ttl(&index)?,
            "DOCINFO" => debug::docinfo(&index, &cursor.next_str("DOCINFO")?)?,
            _ => return Err(Error::new(ErrorKind::ArgUnrecognized, format!("Unknown DEBUG subcommand `{}`", sub))),
        };
        finish(cursor, reply)
    }
}
