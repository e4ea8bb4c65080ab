//! Recognizer capability boundary
//!
//! Barcode decoding and OCR are host-provided. Each call takes a frame and
//! eventually yields zero or one raw text candidate, with unspecified latency.

use crate::domain::error::RecognizerError;
use crate::domain::types::RawCandidate;
use crate::io::frame::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Fast path: barcode decoder (EAN-13 / UPC)
#[async_trait]
pub trait BarcodeRecognizer: Send + Sync {
    async fn recognize_barcode(&self, frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError>;
}

/// Fallback path: text recognizer (OCR over the whole frame)
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize_text(&self, frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError>;
}

/// The recognizers that initialized successfully
///
/// A missing recognizer leaves the scheduler running in degraded mode.
#[derive(Clone, Default)]
pub struct RecognizerSet {
    pub barcode: Option<Arc<dyn BarcodeRecognizer>>,
    pub text: Option<Arc<dyn TextRecognizer>>,
}

impl RecognizerSet {
    pub fn new(barcode: Arc<dyn BarcodeRecognizer>, text: Arc<dyn TextRecognizer>) -> Self {
        Self { barcode: Some(barcode), text: Some(text) }
    }

    /// Build from initialization results, logging any recognizer that failed
    pub fn from_init(
        barcode: Result<Arc<dyn BarcodeRecognizer>, RecognizerError>,
        text: Result<Arc<dyn TextRecognizer>, RecognizerError>,
    ) -> Self {
        let barcode = match barcode {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(recognizer = "barcode", error = %e, "recognizer_unavailable");
                None
            }
        };
        let text = match text {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(recognizer = "text", error = %e, "recognizer_unavailable");
                None
            }
        };
        let set = Self { barcode, text };
        info!(
            barcode = %set.barcode.is_some(),
            text = %set.text.is_some(),
            "recognizers_initialized"
        );
        set
    }

    pub fn is_empty(&self) -> bool {
        self.barcode.is_none() && self.text.is_none()
    }

    pub fn is_degraded(&self) -> bool {
        self.barcode.is_none() || self.text.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    #[async_trait]
    impl BarcodeRecognizer for Silent {
        async fn recognize_barcode(&self, _frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
            Ok(None)
        }
    }

    #[test]
    fn test_from_init_degraded() {
        let set = RecognizerSet::from_init(
            Ok(Arc::new(Silent) as Arc<dyn BarcodeRecognizer>),
            Err(RecognizerError::Unavailable("model missing".into())),
        );
        assert!(set.barcode.is_some());
        assert!(set.text.is_none());
        assert!(set.is_degraded());
        assert!(!set.is_empty());
    }

    #[test]
    fn test_default_is_empty() {
        assert!(RecognizerSet::default().is_empty());
    }
}
