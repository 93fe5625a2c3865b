use serde::{Deserialize, Serialize};
use crate::analysis::filters::stopword::StopWordFilter;
use crate::compression::codec::RecordFlags;
use crate::core::error::{Error, ErrorKind, Result};
use crate::engine::args::ArgCursor;

/// Index-wide options given at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Idle seconds before a temporary index drops itself.
    pub temporary: Option<u64>,
    pub skip_initial_scan: bool,
    /// Keep a posting list of every document, used by wildcard and NOT.
    pub index_all: bool,
    pub max_text_fields: bool,
    pub no_offsets: bool,
    pub no_freqs: bool,
    pub no_fields: bool,
    pub no_hl: bool,
    /// `None` keeps the default English list.
    pub stopwords: Option<Vec<String>>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            temporary: None,
            skip_initial_scan: false,
            index_all: false,
            max_text_fields: false,
            no_offsets: false,
            no_freqs: false,
            no_fields: false,
            no_hl: false,
            stopwords: None,
        }
    }
}

impl IndexOptions {
    /// Consumes one option keyword if present. Returns false when the next
    /// argument is not an index option.
    pub fn parse_one(&mut self, cursor: &mut ArgCursor<'_>) -> Result<bool> {
        if cursor.eat("TEMPORARY") {
            let secs = cursor.next_u64("TEMPORARY")?;
            if secs == 0 {
                return Err(Error::new(ErrorKind::BadParameter, "TEMPORARY needs a positive ttl"));
            }
            self.temporary = Some(secs);
        } else if cursor.eat("SKIPINITIALSCAN") {
            self.skip_initial_scan = true;
        } else if cursor.eat("INDEXALL") {
            let v = cursor.next_str("INDEXALL")?;
            self.index_all = match v.to_ascii_uppercase().as_str() {
                "ENABLE" => true,
                "DISABLE" => false,
                _ => return Err(Error::new(ErrorKind::BadParameter, "INDEXALL expects ENABLE or DISABLE")),
            };
        } else if cursor.eat("MAXTEXTFIELDS") {
            self.max_text_fields = true;
        } else if cursor.eat("NOOFFSETS") {
            self.no_offsets = true;
        } else if cursor.eat("NOHL") {
            self.no_hl = true;
            self.no_offsets = true;
        } else if cursor.eat("NOFREQS") {
            self.no_freqs = true;
        } else if cursor.eat("NOFIELDS") {
            self.no_fields = true;
        } else if cursor.eat("STOPWORDS") {
            self.stopwords = Some(cursor.next_counted("STOPWORDS")?);
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Record layout for TEXT posting lists.
    pub fn text_record_flags(&self) -> RecordFlags {
        RecordFlags::text(!self.no_freqs, !self.no_fields, !self.no_offsets)
    }

    pub fn stopword_filter(&self) -> Option<StopWordFilter> {
        match &self.stopwords {
            None => Some(StopWordFilter::english()),
            Some(words) if words.is_empty() => None,
            Some(words) => Some(StopWordFilter::new(words.clone())),
        }
    }

    /// Limit on TEXT fields.
    pub fn text_field_limit(&self) -> usize {
        if self.max_text_fields { 64 } else { 32 }
    }

    pub fn describe(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(t) = self.temporary {
            out.push(format!("TEMPORARY {}", t));
        }
        if self.skip_initial_scan {
            out.push("SKIPINITIALSCAN".into());
        }
        if self.index_all {
            out.push("INDEXALL".into());
        }
        if self.max_text_fields {
            out.push("MAXTEXTFIELDS".into());
        }
        if self.no_offsets {
            out.push("NOOFFSETS".into());
        }
        if self.no_hl {
            out.push("NOHL".into());
        }
        if self.no_freqs {
            out.push("NOFREQS".into());
        }
        if self.no_fields {
            out.push("NOFIELDS".into());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::to_args;

    fn parse_all(args: &[&str]) -> IndexOptions {
        let args = to_args(args);
        let mut cursor = ArgCursor::new(&args);
        let mut opts = IndexOptions::default();
        while opts.parse_one(&mut cursor).unwrap() {}
        assert!(cursor.is_done());
        opts
    }

    #[test]
    fn test_parse_options() {
        let o = parse_all(&["TEMPORARY", "30", "INDEXALL", "enable", "NOHL", "STOPWORDS", "0"]);
        assert_eq!(o.temporary, Some(30));
        assert!(o.index_all);
        assert!(o.no_offsets);
        assert!(o.stopword_filter().is_none());
    }

    #[test]
    fn test_record_flags_follow_options() {
        let o = parse_all(&["NOFREQS", "NOFIELDS"]);
        let flags = o.text_record_flags();
        assert!(!flags.has(RecordFlags::FREQS));
        assert!(!flags.has(RecordFlags::FIELDS));
        assert!(flags.has(RecordFlags::OFFSETS));
    }
}
