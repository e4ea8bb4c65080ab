//! Shared types for the ISBN fusion pipeline

use crate::domain::error::InvalidIdentifier;
use crate::domain::isbn;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for camera frame sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(transparent)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unvalidated text emitted by a recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate(pub String);

impl RawCandidate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RawCandidate {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A checksum-valid ISBN-13 (EAN-13 with prefix 978 or 979)
///
/// Can only be built through [`isbn::normalize`] or [`CanonicalId::parse`],
/// so holding one means the value passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Strict parse of an already-canonical identifier (no searching)
    pub fn parse(text: &str) -> Result<Self, InvalidIdentifier> {
        isbn::validate_canonical(text)
    }

    /// Caller guarantees `digits` is 13 ASCII digits that passed validation
    pub(crate) fn from_validated(digits: &[u8]) -> Self {
        Self(digits.iter().map(|&b| char::from(b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for CanonicalId {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Where an accepted identifier came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionSource {
    Barcode,
    Ocr,
    Manual,
}

impl RecognitionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionSource::Barcode => "barcode",
            RecognitionSource::Ocr => "ocr",
            RecognitionSource::Manual => "manual",
        }
    }
}

impl std::fmt::Display for RecognitionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single accepted result of a scan session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanHit {
    pub isbn13: CanonicalId,
    pub source: RecognitionSource,
    /// Frame that produced the hit (None for manual entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<FrameId>,
    /// Acceptance time (epoch ms)
    pub accepted_at_ms: u64,
}

impl ScanHit {
    pub fn new(isbn13: CanonicalId, source: RecognitionSource, frame_id: Option<FrameId>) -> Self {
        Self { isbn13, source, frame_id, accepted_at_ms: epoch_ms() }
    }
}

/// Observational scan status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Scanning,
    TryingOcr,
    Found(RecognitionSource),
    InvalidManual,
    Paused,
    NoRecognizer,
    Failed,
}

impl ScanStatus {
    /// Found, Failed and Paused are only replaced by the controller
    pub fn holds_over_progress(&self) -> bool {
        matches!(self, ScanStatus::Found(_) | ScanStatus::Failed | ScanStatus::Paused)
    }

    pub fn text(&self) -> &'static str {
        match self {
            ScanStatus::Scanning => "Scanning barcode…",
            ScanStatus::TryingOcr => "No barcode yet, trying OCR…",
            ScanStatus::Found(RecognitionSource::Barcode) => "Found ISBN via barcode",
            ScanStatus::Found(RecognitionSource::Ocr) => "Found ISBN via OCR",
            ScanStatus::Found(RecognitionSource::Manual) => "ISBN found",
            ScanStatus::InvalidManual => "Invalid ISBN",
            ScanStatus::Paused => "Paused",
            ScanStatus::NoRecognizer => "No recognizer available",
            ScanStatus::Failed => "Scanner error, please retake",
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}
