//! IO modules - external system interfaces
//!
//! This module contains the boundaries to the host:
//! - `frame` - Camera frames and the release-once guard
//! - `recognizer` - Barcode and text recognizer capabilities
//! - `replay` - Scripted recognizers for offline replay
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod frame;
pub mod prometheus;
pub mod recognizer;
pub mod replay;

// Re-export commonly used types
pub use frame::{Frame, FrameGuard, FrameReleaser, NoopReleaser};
pub use recognizer::{BarcodeRecognizer, RecognizerSet, TextRecognizer};
pub use replay::ReplayScript;
