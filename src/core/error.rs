use std::fmt;

/// Kinds of failures surfaced to callers. Each renders as a stable
/// kebab-case code so replies can be matched by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Parse,
    Internal,
    InvalidState,
    IndexNotFound,
    IndexExists,
    IndexDropped,
    BadSchema,
    BadQuerySyntax,
    BadParameter,
    UnsupportedDialect,
    ArgUnrecognized,
    FieldNotFound,
    TypeMismatch,
    VectorBlobSizeMismatch,
    IndexMismatch,
    Timeout,
    OutOfMemory,
    PartialIndex,
    CursorNotFound,
    CursorCapacityExceeded,
    LimitExceedsMax,
    MaxPrefixExpansions,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::Parse => "parse",
            ErrorKind::Internal => "internal",
            ErrorKind::InvalidState => "invalid-state",
            ErrorKind::IndexNotFound => "index-not-found",
            ErrorKind::IndexExists => "index-exists",
            ErrorKind::IndexDropped => "index-dropped",
            ErrorKind::BadSchema => "bad-schema",
            ErrorKind::BadQuerySyntax => "bad-query-syntax",
            ErrorKind::BadParameter => "bad-parameter",
            ErrorKind::UnsupportedDialect => "unsupported-dialect",
            ErrorKind::ArgUnrecognized => "arg-unrecognized",
            ErrorKind::FieldNotFound => "field-not-found",
            ErrorKind::TypeMismatch => "type-mismatch",
            ErrorKind::VectorBlobSizeMismatch => "vector-blob-size-mismatch",
            ErrorKind::IndexMismatch => "index-mismatch",
            ErrorKind::Timeout => "timeout",
            ErrorKind::OutOfMemory => "oom",
            ErrorKind::PartialIndex => "partial-index",
            ErrorKind::CursorNotFound => "cursor-not-found",
            ErrorKind::CursorCapacityExceeded => "cursor-capacity-exceeded",
            ErrorKind::LimitExceedsMax => "limit-exceeds-max",
            ErrorKind::MaxPrefixExpansions => "max-prefix-expansions",
        }
    }

    /// Errors a client may retry without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::CursorCapacityExceeded | ErrorKind::Timeout | ErrorKind::OutOfMemory
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {context}")]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    /// Result-processor stage the error was raised in, once known.
    pub stage: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error { kind, context: context.into(), stage: None }
    }

    /// Prefix the context with the result-processor stage that raised it.
    /// Only the innermost stage is recorded; interrupts pass through as is.
    pub fn in_stage(self, stage: &str) -> Self {
        if self.stage.is_some() || matches!(self.kind, ErrorKind::Timeout | ErrorKind::IndexDropped) {
            return self;
        }
        Error {
            kind: self.kind,
            context: format!("{}: {}", stage, self.context),
            stage: Some(stage.to_string()),
        }
    }

    /// The warning a query reports for an error caught on a worker thread.
    pub fn into_async_warning(self) -> QueryWarning {
        QueryWarning::Async(self.to_string())
    }

    pub fn syntax(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::BadQuerySyntax, context)
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Error::new(ErrorKind::Internal, context)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::new(ErrorKind::Parse, err.to_string())
    }
}

impl From<fst::Error> for Error {
    fn from(err: fst::Error) -> Self {
        Error::new(ErrorKind::Internal, format!("FST error: {}", err))
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::new(ErrorKind::BadQuerySyntax, format!("invalid pattern: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Parse, format!("JSON error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal conditions attached to a successful reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryWarning {
    Timeout,
    MaxPrefixExpansions,
    PartialIndex,
    Async(String),
}

impl fmt::Display for QueryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryWarning::Timeout => f.write_str("Timeout limit was reached"),
            QueryWarning::MaxPrefixExpansions => {
                f.write_str("Max prefix expansions limit was reached")
            }
            QueryWarning::PartialIndex => f.write_str(
                "Index contains partial data due to an indexing failure caused by insufficient memory",
            ),
            QueryWarning::Async(msg) => write!(
                f,
                "the following error was caught upon running the query asynchronously: {}",
                msg
            ),
        }
    }
}

/// Ordered, de-duplicated warning list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Warnings(Vec<QueryWarning>);

impl Warnings {
    pub fn new() -> Self {
        Warnings(Vec::new())
    }

    pub fn push(&mut self, warning: QueryWarning) {
        if !self.0.contains(&warning) {
            self.0.push(warning);
        }
    }

    pub fn extend(&mut self, other: &Warnings) {
        for w in &other.0 {
            self.push(w.clone());
        }
    }

    pub fn contains(&self, warning: &QueryWarning) -> bool {
        self.0.contains(warning)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryWarning> {
        self.0.iter()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|w| w.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_uses_code() {
        let err = Error::new(ErrorKind::IndexNotFound, "idx");
        assert_eq!(err.to_string(), "index-not-found: idx");
    }

    #[test]
    fn test_stage_wrapping() {
        let err = Error::new(ErrorKind::Io, "boom").in_stage("loader").in_stage("sorter");
        assert_eq!(err.context, "loader: boom");
        assert_eq!(err.stage.as_deref(), Some("loader"));
        assert_eq!(err.kind, ErrorKind::Io);
        let timeout = Error::new(ErrorKind::Timeout, "Timeout limit was reached").in_stage("loader");
        assert_eq!(timeout.context, "Timeout limit was reached");
    }

    #[test]
    fn test_async_warning_text() {
        let w = Error::new(ErrorKind::Internal, "half failed").into_async_warning();
        assert_eq!(
            w.to_string(),
            "the following error was caught upon running the query asynchronously: internal: half failed"
        );
    }

    #[test]
    fn test_warnings_deduplicate() {
        let mut w = Warnings::new();
        w.push(QueryWarning::Timeout);
        w.push(QueryWarning::Timeout);
        assert_eq!(w.len(), 1);
        assert_eq!(w.to_strings(), vec!["Timeout limit was reached".to_string()]);
    }
}
