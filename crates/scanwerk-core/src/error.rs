// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

/// Top-level error type for all Scanwerk operations.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Input boundary --
    #[error("capture rejected: {0}")]
    Capture(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not allowed: {0}")]
    PrecludedOperation(String),

    // -- Document lifecycle --
    #[error("document failed validation: {}", violations.join("; "))]
    Validation { violations: Vec<String> },

    #[error("assembly failed: {0}")]
    Assembly(String),

    #[error("assembly cancelled")]
    Cancelled,

    #[error("catalog write failed: {0}")]
    Persistence(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // -- Lookup --
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Duplicate(String),

    // -- Processing --
    #[error("image processing failed: {0}")]
    Image(String),

    #[error("PDF operation failed: {0}")]
    Pdf(String),

    // -- Storage / persistence --
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How a caller should react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself was wrong; state is unchanged and repeating it
    /// will fail the same way.
    Rejected,
    /// A transient failure; the state machine has rolled back and the same
    /// request may be issued again.
    Retryable,
    /// Stored data is unreadable or the operation can never succeed.
    Fatal,
}

impl ScanwerkError {
    /// Classify this error for retry decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Capture(_)
            | Self::InvalidArgument(_)
            | Self::PrecludedOperation(_)
            | Self::Validation { .. }
            | Self::InvalidTransition { .. }
            | Self::NotFound(_)
            | Self::Duplicate(_) => ErrorClass::Rejected,

            Self::Assembly(_) | Self::Cancelled | Self::Persistence(_) | Self::Database(_) => {
                ErrorClass::Retryable
            }

            Self::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ErrorClass::Fatal
                }
                _ => ErrorClass::Retryable,
            },

            Self::Image(_)
            | Self::Pdf(_)
            | Self::IntegrityMismatch { .. }
            | Self::Serialization(_) => ErrorClass::Fatal,
        }
    }

    /// Whether issuing the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Build a `Validation` error from a list of violations.
    pub fn validation(violations: Vec<String>) -> Self {
        Self::Validation { violations }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_lists_every_violation() {
        let err = ScanwerkError::validation(vec![
            "document has no pages".into(),
            "page 3 has no corrected image".into(),
        ]);
        let text = err.to_string();
        assert!(text.contains("document has no pages"));
        assert!(text.contains("page 3 has no corrected image"));
    }

    #[test]
    fn classification() {
        assert_eq!(
            ScanwerkError::InvalidArgument("x".into()).class(),
            ErrorClass::Rejected
        );
        assert!(ScanwerkError::Assembly("disk full".into()).is_retryable());
        assert!(ScanwerkError::Persistence("locked".into()).is_retryable());
        assert_eq!(ScanwerkError::Pdf("bad".into()).class(), ErrorClass::Fatal);

        let not_found = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ScanwerkError::Io(not_found).class(), ErrorClass::Fatal);
    }
}
