//! Scripted recognizers for replaying a capture session offline
//!
//! A replay script is JSONL, one object per frame:
//!
//! ```text
//! {"frame":1,"barcode":null,"barcode_delay_ms":5,"ocr":"ISBN 0-14-312774-8","ocr_delay_ms":80}
//! ```
//!
//! Fields other than `frame` are optional. `barcode_error` / `ocr_error` make
//! the corresponding recognizer fail for that frame. Blank lines and lines
//! starting with `#` are skipped.

use crate::domain::error::{RecognizerError, ReleaseError};
use crate::domain::types::{FrameId, RawCandidate};
use crate::io::frame::{Frame, FrameGuard, FrameReleaser};
use crate::io::recognizer::{BarcodeRecognizer, RecognizerSet, TextRecognizer};
use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// What the recognizers report for one frame
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptedFrame {
    pub frame: u64,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub barcode_delay_ms: u64,
    #[serde(default)]
    pub barcode_error: bool,
    #[serde(default)]
    pub ocr: Option<String>,
    #[serde(default)]
    pub ocr_delay_ms: u64,
    #[serde(default)]
    pub ocr_error: bool,
}

/// A parsed replay script
#[derive(Debug, Clone)]
pub struct ReplayScript {
    order: Vec<u64>,
    frames: Arc<FxHashMap<u64, ScriptedFrame>>,
}

impl ReplayScript {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut order = Vec::new();
        let mut frames = FxHashMap::default();

        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let scripted: ScriptedFrame = serde_json::from_str(line)
                .with_context(|| format!("Invalid replay entry on line {}", idx + 1))?;
            if frames.contains_key(&scripted.frame) {
                bail!("Duplicate frame {} on line {}", scripted.frame, idx + 1);
            }
            order.push(scripted.frame);
            frames.insert(scripted.frame, scripted);
        }

        Ok(Self { order, frames: Arc::new(frames) })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script {}", path.display()))?;
        let script = Self::parse(&content)
            .with_context(|| format!("Failed to parse replay script {}", path.display()))?;
        info!(path = %path.display(), frames = %script.len(), "replay_script_loaded");
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Frame ids in script order
    pub fn frame_ids(&self) -> impl Iterator<Item = FrameId> + '_ {
        self.order.iter().map(|&id| FrameId(id))
    }

    /// Longest single-frame recognizer latency in the script
    pub fn max_delay(&self) -> Duration {
        let ms = self
            .frames
            .values()
            .map(|f| f.barcode_delay_ms + f.ocr_delay_ms)
            .max()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }

    /// Recognizers that answer from the script
    pub fn recognizers(&self) -> RecognizerSet {
        RecognizerSet::new(
            Arc::new(ScriptedBarcode { frames: self.frames.clone() }),
            Arc::new(ScriptedText { frames: self.frames.clone() }),
        )
    }
}

struct ScriptedBarcode {
    frames: Arc<FxHashMap<u64, ScriptedFrame>>,
}

#[async_trait]
impl BarcodeRecognizer for ScriptedBarcode {
    async fn recognize_barcode(&self, frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
        let Some(scripted) = self.frames.get(&frame.id.0) else {
            return Ok(None);
        };
        if scripted.barcode_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(scripted.barcode_delay_ms)).await;
        }
        if scripted.barcode_error {
            return Err(RecognizerError::Failed(format!("scripted barcode error on frame {}", frame.id)));
        }
        Ok(scripted.barcode.as_deref().map(RawCandidate::from))
    }
}

struct ScriptedText {
    frames: Arc<FxHashMap<u64, ScriptedFrame>>,
}

#[async_trait]
impl TextRecognizer for ScriptedText {
    async fn recognize_text(&self, frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
        let Some(scripted) = self.frames.get(&frame.id.0) else {
            return Ok(None);
        };
        if scripted.ocr_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(scripted.ocr_delay_ms)).await;
        }
        if scripted.ocr_error {
            return Err(RecognizerError::Failed(format!("scripted OCR error on frame {}", frame.id)));
        }
        Ok(scripted.ocr.as_deref().map(RawCandidate::from))
    }
}

/// Releaser that only counts returned buffers
#[derive(Debug, Default)]
pub struct CountingReleaser {
    released: AtomicU64,
}

impl CountingReleaser {
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl FrameReleaser for CountingReleaser {
    fn release(&self, _id: FrameId) -> Result<(), ReleaseError> {
        self.released.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Build the guard for a scripted frame (empty pixel data)
pub fn scripted_frame(id: FrameId, releaser: Arc<dyn FrameReleaser>) -> FrameGuard {
    FrameGuard::new(Frame::new(id, Bytes::new(), 0, 0), releaser)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
# two frames, OCR finds it on the second
{"frame":1}
{"frame":2,"barcode_delay_ms":5,"ocr":"ISBN 0-14-312774-8","ocr_delay_ms":20}
"#;

    #[test]
    fn test_parse_script() {
        let script = ReplayScript::parse(SCRIPT).unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script.frame_ids().collect::<Vec<_>>(), vec![FrameId(1), FrameId(2)]);
        assert_eq!(script.max_delay(), Duration::from_millis(25));
    }

    #[test]
    fn test_parse_rejects_duplicates_and_garbage() {
        assert!(ReplayScript::parse("{\"frame\":1}\n{\"frame\":1}").is_err());
        let err = ReplayScript::parse("{\"frame\":1}\nnot json").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[tokio::test]
    async fn test_scripted_recognizers() {
        let script = ReplayScript::parse(
            "{\"frame\":3,\"barcode\":\"9780143127741\"}\n{\"frame\":4,\"ocr_error\":true}",
        )
        .unwrap();
        let recognizers = script.recognizers();
        let barcode = recognizers.barcode.unwrap();
        let text = recognizers.text.unwrap();

        let frame3 = Frame::new(FrameId(3), Bytes::new(), 0, 0);
        let frame4 = Frame::new(FrameId(4), Bytes::new(), 0, 0);
        let unknown = Frame::new(FrameId(99), Bytes::new(), 0, 0);

        assert_eq!(
            barcode.recognize_barcode(&frame3).await.unwrap(),
            Some(RawCandidate::from("9780143127741"))
        );
        assert!(text.recognize_text(&frame4).await.is_err());
        assert_eq!(barcode.recognize_barcode(&unknown).await.unwrap(), None);
    }

    #[test]
    fn test_counting_releaser() {
        let releaser = Arc::new(CountingReleaser::default());
        let guard = scripted_frame(FrameId(1), releaser.clone());
        guard.release().unwrap();
        assert_eq!(releaser.released(), 1);
    }
}
