//! Error taxonomy, exit statuses and the diagnostic handler.
//!
//! Two error channels exist and they do not mix:
//!
//! - [`SieveError`] — the outcome of an operation (compile, save, load).
//!   Returned as `Result::Err`; a stage either produces its artifact or one
//!   of these kinds.
//! - [`Diagnostic`]s — user-facing messages accumulated in an
//!   [`ErrorHandler`] while a stage keeps running. Parser, validator and
//!   generator never bail out on the first problem; they report through the
//!   handler and the stage fails at the end iff the error count is non-zero.

use crate::foundation::Span;
use serde::Serialize;
use thiserror::Error;

/// Failure kinds for engine operations.
///
/// Only `Internal` indicates a bug in the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum SieveError {
    #[error("temporary failure")]
    TempFailure,
    #[error("quota exceeded")]
    NoQuota,
    #[error("not found")]
    NotFound,
    #[error("permission denied")]
    NoPermission,
    #[error("operation not possible")]
    NotPossible,
    #[error("not valid")]
    NotValid,
    #[error("bad resource")]
    BadResource,
    #[error("already exists")]
    Exists,
    #[error("internal error")]
    Internal,
}

impl SieveError {
    /// Map an I/O error onto the taxonomy.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => SieveError::NotFound,
            ErrorKind::PermissionDenied => SieveError::NoPermission,
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded => SieveError::NoQuota,
            ErrorKind::AlreadyExists => SieveError::Exists,
            _ => SieveError::BadResource,
        }
    }
}

/// Outcome of executing a binary against a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitStatus {
    Ok,
    Failure,
    TempFailure,
    BinCorrupt,
    KeepFailed,
}

impl ExitStatus {
    /// Numeric code kept for compatibility with existing callers.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Ok => 1,
            ExitStatus::Failure => 0,
            ExitStatus::TempFailure => -1,
            ExitStatus::BinCorrupt => -2,
            ExitStatus::KeepFailed => -3,
        }
    }
}

/// Errors surfaced by opcode execution.
///
/// These never escape the dispatch loop; the interpreter maps them onto an
/// [`ExitStatus`] and, for the recoverable kinds, reports through the
/// execution error handler.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Bytecode is malformed: unknown opcode, truncated operand, offset out
    /// of range. Execution aborts and no actions are committed.
    #[error("corrupt binary: {0}")]
    Corrupt(String),
    /// Recoverable script-level failure; triggers the implicit keep.
    #[error("{0}")]
    Failure(String),
    /// Resource or infrastructure failure; nothing is committed.
    #[error("{0}")]
    TempFailure(String),
}

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Source location of a diagnostic: script name plus position.
///
/// `None` positions are permitted for pipeline-level messages that do not
/// refer to a place in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub script: String,
    pub span: Span,
}

impl Location {
    pub fn new(script: impl Into<String>, span: Span) -> Self {
        Self {
            script: script.into(),
            span,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.script, self.span)
    }
}

/// A single user-facing message with optional source location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Option<Location>,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}: {}", loc, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Collects diagnostics for one compilation or execution.
///
/// Errors past `max_errors` are counted but dropped, so a pathological
/// script cannot flood the log. A final "too many errors" marker is kept in
/// their place.
#[derive(Debug)]
pub struct ErrorHandler {
    max_errors: usize,
    error_count: usize,
    warning_count: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(crate::foundation::limits::MAX_ERRORS)
    }
}

impl ErrorHandler {
    pub fn new(max_errors: usize) -> Self {
        Self {
            max_errors,
            error_count: 0,
            warning_count: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn error(&mut self, location: Option<Location>, message: impl Into<String>) {
        let message = message.into();
        self.error_count += 1;
        if self.error_count <= self.max_errors {
            tracing::debug!(target: "sieve::diag", %message, "script error");
            self.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                location,
                message,
            });
        } else if self.error_count == self.max_errors + 1 {
            self.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                location: None,
                message: "too many errors, dropping further messages".into(),
            });
        }
    }

    pub fn warning(&mut self, location: Option<Location>, message: impl Into<String>) {
        let message = message.into();
        self.warning_count += 1;
        tracing::debug!(target: "sieve::diag", %message, "script warning");
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            location,
            message,
        });
    }

    /// Record an engine-level failure. Not subject to the error cap.
    pub fn critical(&mut self, location: Option<Location>, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(target: "sieve::diag", %message, "critical error");
        self.error_count += 1;
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            location,
            message,
        });
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// All diagnostics, one per line, ready for a log or stderr.
    pub fn format_all(&self) -> String {
        let mut out = String::new();
        for diag in &self.diagnostics {
            out.push_str(&diag.to_string());
            out.push('\n');
        }
        out
    }
}
