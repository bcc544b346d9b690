//! Structured errors for the whole toolchain.
//!
//! Compiler diagnostics are *values*: a [`SpyError`] carries a kind, a
//! message and an ordered list of source annotations, and only becomes text
//! when rendered through [`crate::errfmt::ErrorFormatter`]. This keeps error
//! construction (in the VM and the analyzers) decoupled from display (in the
//! driver), and lets redshift convert static errors into residual `raise`
//! statements in lazy mode.

use eyre::Error as EyreError;
use std::result;
use thiserror::Error;

use crate::span::Span;

/// The classification of a [`SpyError`]. Mirrors the app-level exception
/// types: `TypeError` is a static error, so during lazy redshift it can be
/// deferred to run time instead of aborting compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Syntax,
    Static,
    Type,
    Value,
    Index,
    Name,
    Scope,
    Import,
    Assertion,
    ZeroDivision,
    Panic,
    /// Plain app-level `Exception`, raised by user code.
    Exception,
    /// Something that is supposed to work but is not implemented yet.
    Wip,
}

impl ErrorKind {
    /// Static errors can be turned into lazy errors during redshift; all the
    /// others abort it immediately.
    pub fn is_static(self) -> bool {
        matches!(self, ErrorKind::Static | ErrorKind::Type)
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Parse => "ParseError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Static => "StaticError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Name => "NameError",
            ErrorKind::Scope => "ScopeError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Assertion => "AssertionError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Panic => "PanicError",
            ErrorKind::Exception => "Exception",
            ErrorKind::Wip => "WIP",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Error,
    Note,
    Panic,
}

impl Level {
    pub fn name(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Note => "note",
            Level::Panic => "panic",
        }
    }
}

/// One source-anchored line of a diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub level: Level,
    pub message: String,
    pub span: Span,
}

/// A structured diagnostic. Annotations are rendered in insertion order, so
/// nested blue-call sites naturally read inner-to-outer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpyError {
    pub kind: ErrorKind,
    pub message: String,
    pub annotations: Vec<Annotation>,
}

impl SpyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> SpyError {
        SpyError {
            kind,
            message: message.into(),
            annotations: Vec::new(),
        }
    }

    /// The common one-error-one-annotation shape.
    pub fn simple(
        kind: ErrorKind,
        primary: impl Into<String>,
        secondary: impl Into<String>,
        span: Span,
    ) -> SpyError {
        let mut err = SpyError::new(kind, primary);
        err.add(Level::Error, secondary, span);
        err
    }

    pub fn add(&mut self, level: Level, message: impl Into<String>, span: Span) {
        self.annotations.push(Annotation {
            level,
            message: message.into(),
            span,
        });
    }

    /// Attach a generic location, but only if the error has none yet. Used
    /// while unwinding evaluation so the innermost frame wins.
    pub fn add_span_maybe(&mut self, span: Span) {
        if self.annotations.is_empty() {
            self.add(Level::Error, "called from here", span);
        }
    }

    pub fn is_static(&self) -> bool {
        self.kind.is_static()
    }
}

impl std::fmt::Display for SpyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Spy(SpyError),
    #[error("generic error: {0}")]
    Generic(EyreError),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn spy(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error::Spy(SpyError::new(kind, message))
    }

    pub fn simple(
        kind: ErrorKind,
        primary: impl Into<String>,
        secondary: impl Into<String>,
        span: Span,
    ) -> Error {
        Error::Spy(SpyError::simple(kind, primary, secondary, span))
    }

    pub fn as_spy(&self) -> Option<&SpyError> {
        match self {
            Error::Spy(err) => Some(err),
            Error::Generic(_) => None,
        }
    }

    pub fn matches(&self, kind: ErrorKind) -> bool {
        self.as_spy().is_some_and(|err| err.kind == kind)
    }

    /// Attach a source location while unwinding, without disturbing errors
    /// that already point somewhere.
    pub fn with_span_maybe(self, span: Span) -> Error {
        match self {
            Error::Spy(mut err) => {
                err.add_span_maybe(span);
                Error::Spy(err)
            }
            other => other,
        }
    }

    pub fn note(self, message: impl Into<String>, span: Span) -> Error {
        match self {
            Error::Spy(mut err) => {
                err.add(Level::Note, message, span);
                Error::Spy(err)
            }
            other => other,
        }
    }
}

impl From<SpyError> for Error {
    fn from(err: SpyError) -> Self {
        Error::Spy(err)
    }
}

impl From<EyreError> for Error {
    fn from(err: EyreError) -> Self {
        Error::Generic(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Generic(e.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(EyreError::msg(s))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Generic(EyreError::msg(s.to_string()))
    }
}

/// "1 value" / "3 values", for error messages.
pub fn maybe_plural(n: usize, singular: &str) -> String {
    if n == 1 {
        singular.to_string()
    } else {
        format!("{}s", singular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_kinds() {
        assert!(ErrorKind::Type.is_static());
        assert!(ErrorKind::Static.is_static());
        assert!(!ErrorKind::Value.is_static());
        assert!(!ErrorKind::Panic.is_static());
    }

    #[test]
    fn add_span_maybe_only_once() {
        let mut err = SpyError::new(ErrorKind::Type, "mismatched types");
        err.add_span_maybe(Span::fake());
        err.add_span_maybe(Span::fake());
        assert_eq!(err.annotations.len(), 1);
    }

    #[test]
    fn error_matches() {
        let err = Error::spy(ErrorKind::Name, "name `x` is not defined");
        assert!(err.matches(ErrorKind::Name));
        assert!(!err.matches(ErrorKind::Type));
        assert_eq!(err.to_string(), "NameError: name `x` is not defined");
    }
}
