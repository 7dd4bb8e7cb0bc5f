//! Error types for the expression compiler

use thiserror::Error;

/// Main error type for the compiler.
///
/// Every failure during compilation is a syntax error carrying the 0-based
/// byte offset of the offending construct in the source text. `Internal` is
/// reserved for conditions that are unreachable in a well-formed compilation.
#[derive(Debug, Error)]
pub enum JsError {
    #[error("SyntaxError: {message} at {offset}")]
    SyntaxError { message: String, offset: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl JsError {
    pub fn syntax_error(message: impl Into<String>, offset: i32) -> Self {
        JsError::SyntaxError {
            message: message.into(),
            offset: offset.max(0) as usize,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        JsError::Internal(message.into())
    }

    /// The message without the error-name prefix.
    pub fn message(&self) -> &str {
        match self {
            JsError::SyntaxError { message, .. } => message,
            JsError::Internal(message) => message,
        }
    }

    /// Source offset of a syntax error, if known.
    pub fn offset(&self) -> Option<usize> {
        match self {
            JsError::SyntaxError { offset, .. } => Some(*offset),
            JsError::Internal(_) => None,
        }
    }
}
