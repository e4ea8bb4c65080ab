//! Domain models - identifiers, scan results, and errors
//!
//! This module contains the canonical data types used throughout the system:
//! - `isbn` - pure ISBN-10/ISBN-13 normalization
//! - `types` - `CanonicalId`, `ScanHit`, `RecognitionSource`, `ScanStatus`
//! - `error` - typed errors surfaced to callers

pub mod error;
pub mod isbn;
pub mod types;

// Re-export commonly used types at module level
pub use error::{InvalidIdentifier, ManualEntryError, RecognizerError, ReleaseError};
pub use isbn::{is_valid_canonical, normalize};
pub use types::{CanonicalId, FrameId, RawCandidate, RecognitionSource, ScanHit, ScanStatus};
