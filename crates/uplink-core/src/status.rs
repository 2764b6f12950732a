//! Operation results richer than a plain boolean.
//!
//! Gateway-election and lifecycle calls report one of a small set of
//! outcome codes plus a human-readable message. A [`Status`] is a value,
//! not an `Err` payload: `NoOp` and `NotFound` are ordinary outcomes the
//! caller routes on, not failures to propagate.

use std::fmt;

/// Outcome code carried by a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Operation successful.
    Ok,
    /// No operation was necessary.
    NoOp,
    /// Unknown failure.
    UnknownError,
    /// Argument not found.
    NotFound,
    /// Function not implemented.
    NotImplemented,
    /// Operation denied due to permissions.
    PermissionError,
    /// The caller used invalid arguments.
    InvalidArguments,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::NoOp => "NO_OP",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::PermissionError => "PERMISSION_ERROR",
            ErrorCode::InvalidArguments => "INVALID_ARGUMENTS",
        }
    }
}

/// An outcome code plus a message describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: ErrorCode,
    message: String,
}

impl Status {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// A successful result with no message.
    pub fn ok() -> Self {
        Status::new(ErrorCode::Ok, "")
    }

    pub fn no_op(message: impl Into<String>) -> Self {
        Status::new(ErrorCode::NoOp, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Status::new(ErrorCode::NotFound, message)
    }

    pub fn unknown_error(message: impl Into<String>) -> Self {
        Status::new(ErrorCode::UnknownError, message)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Status::new(ErrorCode::InvalidArguments, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == ErrorCode::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code.as_str())
        } else {
            write!(f, "{}: {}", self.code.as_str(), self.message)
        }
    }
}
