//! Error types for the recognition pipeline
//!
//! "No identifier in this text" is not an error; the normalizer returns
//! `None` for it. These types cover the conditions a caller has to act on.

use crate::domain::types::CanonicalId;
use thiserror::Error;

/// An externally supplied identifier failed validation (user-correctable)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidIdentifier {
    #[error("identifier must not be empty")]
    Empty,
    #[error("identifier must be 13 digits, got {0} characters")]
    Length(usize),
    #[error("identifier must contain only digits")]
    NonDigit,
    #[error("identifier must start with 978 or 979")]
    Prefix,
    #[error("identifier checksum does not match")]
    Checksum,
    #[error("no valid ISBN found in input")]
    NotFound,
}

/// Manual entry could not be accepted
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManualEntryError {
    #[error(transparent)]
    Invalid(#[from] InvalidIdentifier),
    #[error("session already accepted {0}; reset before entering another ISBN")]
    AlreadyAccepted(CanonicalId),
    #[error("session was reset while the entry was being submitted")]
    SessionReset,
}

/// Failure reported by a recognizer capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecognizerError {
    /// The recognizer could not be initialized or is gone
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),
    /// A single recognition call failed
    #[error("recognition failed: {0}")]
    Failed(String),
}

/// A frame buffer could not be returned to its owner
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("frame release failed: {0}")]
pub struct ReleaseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_entry_error_wraps_invalid() {
        let err: ManualEntryError = InvalidIdentifier::Checksum.into();
        assert_eq!(err.to_string(), "identifier checksum does not match");
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            InvalidIdentifier::Length(12).to_string(),
            "identifier must be 13 digits, got 12 characters"
        );
        assert_eq!(
            RecognizerError::Unavailable("no model".into()).to_string(),
            "recognizer unavailable: no model"
        );
    }
}
