use std::fmt;

/// Error kind for call errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Submitted source text could not be parsed into a callable.
    Parse,
    /// Input argument does not fit the wire/type contract.
    Argument,
    /// No coercion exists between a native value and the requested wire type.
    TypeMismatch,
    /// Guest code failed during evaluation.
    Evaluation,
    /// Another call holds the session.
    ResourceBusy,
    /// The transport cancelled the call.
    Cancelled,
    /// The declared return type cannot be materialized at all.
    Unsupported,
    /// Interpreter startup failure or lifecycle violation.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Argument => "argument",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::Evaluation => "evaluation",
            ErrorKind::ResourceBusy => "resource busy",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// Call error, returned by every phase of a call and by the codecs.
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, msg)
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Argument, msg)
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeMismatch, msg)
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Evaluation, msg)
    }

    pub fn resource_busy(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceBusy, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, msg)
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, msg)
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, msg)
    }

    /// Whether the error is reported inside a well-formed response
    /// (`CallResponse.exception`) rather than as a transport-level status.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Parse | ErrorKind::Argument | ErrorKind::TypeMismatch | ErrorKind::Evaluation
        )
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for CallError {}

// ---------------------------------------------------------------------------
// From impls: standard error types → CallError with correct ErrorKind
// ---------------------------------------------------------------------------

impl From<serde_json::Error> for CallError {
    fn from(e: serde_json::Error) -> Self {
        Self::argument(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for CallError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::type_mismatch(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prepended_and_kind_kept() {
        let err = CallError::parse("unexpected token").with_context("function 'f'");
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.message, "function 'f': unexpected token");
        assert_eq!(err.to_string(), "parse error: function 'f': unexpected token");
    }

    #[test]
    fn only_guest_side_errors_are_recoverable() {
        assert!(CallError::parse("x").is_recoverable());
        assert!(CallError::argument("x").is_recoverable());
        assert!(CallError::type_mismatch("x").is_recoverable());
        assert!(CallError::evaluation("x").is_recoverable());
        assert!(!CallError::resource_busy("x").is_recoverable());
        assert!(!CallError::cancelled("x").is_recoverable());
        assert!(!CallError::unsupported("x").is_recoverable());
        assert!(!CallError::fatal("x").is_recoverable());
    }
}
