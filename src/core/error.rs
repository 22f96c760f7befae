//! Purpose: Single error model shared by mappers, scanners, sub-queries and adapters.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Carries a stable kind plus optional column/hint context and a boxed source.
//! Invariants: Library code never panics on bad input; every failure is an `Error`.
//! Invariants: `ErrorKind::NotFound` is the sentinel for "exactly one row" misses.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Config,
    Argument,
    Decode,
    NotFound,
    Database,
    Cancelled,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    column: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            column: None,
            source: None,
        }
    }

    /// Zero rows where exactly one was required.
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound).with_message("no rows in result set")
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config).with_message(message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode).with_message(message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(column) = &self.column {
            write!(f, " (column: {column})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Config => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Argument => 4,
        ErrorKind::Decode => 5,
        ErrorKind::Database => 6,
        ErrorKind::Cancelled => 7,
        ErrorKind::Io => 8,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use std::error::Error as StdError;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Config, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::Argument, 4),
            (ErrorKind::Decode, 5),
            (ErrorKind::Database, 6),
            (ErrorKind::Cancelled, 7),
            (ErrorKind::Io, 8),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_message_and_column() {
        let err = Error::decode("invalid decimal").with_column("price");
        assert_eq!(err.to_string(), "Decode: invalid decimal (column: price)");
        assert_eq!(err.column(), Some("price"));
    }

    #[test]
    fn source_is_exposed() {
        let io = std::io::Error::other("disk gone");
        let err = Error::new(ErrorKind::Io).with_source(io);
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "disk gone");
    }

    #[test]
    fn not_found_sentinel() {
        let err = Error::not_found();
        assert!(err.is_not_found());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
