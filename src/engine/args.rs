use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::parse_number;

/// Walks a command's argument vector. Keywords match case-insensitively;
/// values keep their raw bytes so vector blobs pass through untouched.
#[derive(Debug, Clone)]
pub struct ArgCursor<'a> {
    args: &'a [Vec<u8>],
    pos: usize,
}

impl<'a> ArgCursor<'a> {
    pub fn new(args: &'a [Vec<u8>]) -> Self {
        ArgCursor { args, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.args.len().saturating_sub(self.pos)
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek_str(&self) -> Option<String> {
        self.args.get(self.pos).map(|a| String::from_utf8_lossy(a).into_owned())
    }

    /// True when the next argument is `keyword`, without consuming it.
    pub fn peek_is(&self, keyword: &str) -> bool {
        self.args
            .get(self.pos)
            .map(|a| a.eq_ignore_ascii_case(keyword.as_bytes()))
            .unwrap_or(false)
    }

    /// Consumes the next argument if it is `keyword`.
    pub fn eat(&mut self, keyword: &str) -> bool {
        if self.peek_is(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, keyword: &str) -> Result<()> {
        if self.eat(keyword) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::ArgUnrecognized,
                format!("expected {} at argument {}", keyword, self.pos),
            ))
        }
    }

    pub fn next_bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let arg = self
            .args
            .get(self.pos)
            .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("missing argument for {}", what)))?;
        self.pos += 1;
        Ok(arg.as_slice())
    }

    pub fn next_str(&mut self, what: &str) -> Result<String> {
        let bytes = self.next_bytes(what)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn next_f64(&mut self, what: &str) -> Result<f64> {
        let s = self.next_str(what)?;
        parse_number(&s)
            .ok_or_else(|| Error::new(ErrorKind::BadParameter, format!("invalid number '{}' for {}", s, what)))
    }

    pub fn next_i64(&mut self, what: &str) -> Result<i64> {
        let s = self.next_str(what)?;
        s.trim()
            .parse::<i64>()
            .map_err(|_| Error::new(ErrorKind::BadParameter, format!("invalid integer '{}' for {}", s, what)))
    }

    pub fn next_u64(&mut self, what: &str) -> Result<u64> {
        let v = self.next_i64(what)?;
        u64::try_from(v).map_err(|_| Error::new(ErrorKind::BadParameter, format!("{} must not be negative", what)))
    }

    pub fn next_usize(&mut self, what: &str) -> Result<usize> {
        Ok(self.next_u64(what)? as usize)
    }

    /// `n arg1 .. argn`
    pub fn next_counted(&mut self, what: &str) -> Result<Vec<String>> {
        let n = self.next_usize(what)?;
        if n > self.remaining() {
            return Err(Error::new(
                ErrorKind::BadParameter,
                format!("{} expects {} arguments, {} left", what, n, self.remaining()),
            ));
        }
        (0..n).map(|_| self.next_str(what)).collect()
    }

    /// Like [`next_counted`](Self::next_counted) but keeps raw bytes.
    pub fn next_counted_bytes(&mut self, what: &str) -> Result<Vec<&'a [u8]>> {
        let n = self.next_usize(what)?;
        if n > self.remaining() {
            return Err(Error::new(
                ErrorKind::BadParameter,
                format!("{} expects {} arguments, {} left", what, n, self.remaining()),
            ));
        }
        (0..n).map(|_| self.next_bytes(what)).collect()
    }

    pub fn unrecognized(&self) -> Error {
        let arg = self.peek_str().unwrap_or_default();
        Error::new(ErrorKind::ArgUnrecognized, format!("unknown argument '{}' at position {}", arg, self.pos))
    }
}

/// Converts anything byte-like into owned argument vectors.
pub fn to_args<A: AsRef<[u8]>>(args: &[A]) -> Vec<Vec<u8>> {
    args.iter().map(|a| a.as_ref().to_vec()).collect()
}
