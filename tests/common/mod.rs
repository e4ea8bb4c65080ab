//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use isbn_fusion::domain::{FrameId, RawCandidate, RecognizerError, ReleaseError};
use isbn_fusion::infra::Metrics;
use isbn_fusion::io::{BarcodeRecognizer, Frame, FrameGuard, FrameReleaser, RecognizerSet, TextRecognizer};
use isbn_fusion::services::{
    create_event_channel, EventSender, FallbackPolicy, FusionScheduler, ReleaseMonitor, ScanSession,
    SessionEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Barrier, Notify};

/// Records every released frame id
#[derive(Default)]
pub struct RecordingReleaser {
    released: Mutex<Vec<FrameId>>,
}

impl RecordingReleaser {
    pub fn count(&self) -> usize {
        self.released.lock().len()
    }

    /// True if every id was released exactly once
    pub fn all_released_once(&self, expected: usize) -> bool {
        let mut ids = self.released.lock().clone();
        ids.sort();
        let total = ids.len();
        ids.dedup();
        total == expected && ids.len() == expected
    }
}

impl FrameReleaser for RecordingReleaser {
    fn release(&self, id: FrameId) -> Result<(), ReleaseError> {
        self.released.lock().push(id);
        Ok(())
    }
}

/// Every release fails
pub struct FailingReleaser;

impl FrameReleaser for FailingReleaser {
    fn release(&self, id: FrameId) -> Result<(), ReleaseError> {
        Err(ReleaseError(format!("buffer {} busy", id)))
    }
}

pub fn frame(id: u64, releaser: &Arc<dyn FrameReleaser>) -> FrameGuard {
    FrameGuard::new(Frame::new(FrameId(id), Bytes::from_static(b"jpeg"), 640, 480), releaser.clone())
}

/// Returns the same answer for every frame and counts calls
pub struct FixedBarcode {
    answer: Option<String>,
    pub calls: AtomicU64,
}

impl FixedBarcode {
    pub fn new(answer: Option<&str>) -> Arc<Self> {
        Arc::new(Self { answer: answer.map(str::to_string), calls: AtomicU64::new(0) })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BarcodeRecognizer for FixedBarcode {
    async fn recognize_barcode(&self, _frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.as_deref().map(RawCandidate::from))
    }
}

/// OCR stand-in that records which frames it was asked about
pub struct RecordingText {
    answer: Option<String>,
    seen: Mutex<Vec<FrameId>>,
}

impl RecordingText {
    pub fn new(answer: Option<&str>) -> Arc<Self> {
        Arc::new(Self { answer: answer.map(str::to_string), seen: Mutex::new(Vec::new()) })
    }

    pub fn seen(&self) -> Vec<FrameId> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TextRecognizer for RecordingText {
    async fn recognize_text(&self, frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
        self.seen.lock().push(frame.id);
        Ok(self.answer.as_deref().map(RawCandidate::from))
    }
}

/// Holds one frame's barcode result until the gate is opened
pub struct GatedBarcode {
    gated_frame: FrameId,
    answer: String,
    pub gate: Notify,
    pub entered: Notify,
}

impl GatedBarcode {
    pub fn new(gated_frame: u64, answer: &str) -> Arc<Self> {
        Arc::new(Self {
            gated_frame: FrameId(gated_frame),
            answer: answer.to_string(),
            gate: Notify::new(),
            entered: Notify::new(),
        })
    }
}

#[async_trait]
impl BarcodeRecognizer for GatedBarcode {
    async fn recognize_barcode(&self, frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
        if frame.id != self.gated_frame {
            return Ok(None);
        }
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(Some(RawCandidate::new(self.answer.clone())))
    }
}

/// All callers wait for each other, then report their frame's answer
pub struct BarrierBarcode {
    barrier: Barrier,
    answers: Vec<String>,
}

impl BarrierBarcode {
    pub fn new(parties: usize, answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            barrier: Barrier::new(parties),
            answers: answers.iter().map(|a| a.to_string()).collect(),
        })
    }
}

#[async_trait]
impl BarcodeRecognizer for BarrierBarcode {
    async fn recognize_barcode(&self, frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
        self.barrier.wait().await;
        let answer = &self.answers[frame.id.0 as usize % self.answers.len()];
        Ok(Some(RawCandidate::new(answer.clone())))
    }
}

/// Even frames wait at the barrier and then decode `answer`; odd frames have no barcode
pub struct SplitBarcode {
    barrier: Arc<Barrier>,
    answer: String,
}

impl SplitBarcode {
    pub fn new(barrier: Arc<Barrier>, answer: &str) -> Arc<Self> {
        Arc::new(Self { barrier, answer: answer.to_string() })
    }
}

#[async_trait]
impl BarcodeRecognizer for SplitBarcode {
    async fn recognize_barcode(&self, frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
        if frame.id.0 % 2 == 1 {
            return Ok(None);
        }
        self.barrier.wait().await;
        Ok(Some(RawCandidate::new(self.answer.clone())))
    }
}

/// OCR that waits at the barrier and then reads `answer`
pub struct BarrierText {
    barrier: Arc<Barrier>,
    answer: String,
}

impl BarrierText {
    pub fn new(barrier: Arc<Barrier>, answer: &str) -> Arc<Self> {
        Arc::new(Self { barrier, answer: answer.to_string() })
    }
}

#[async_trait]
impl TextRecognizer for BarrierText {
    async fn recognize_text(&self, _frame: &Frame) -> Result<Option<RawCandidate>, RecognizerError> {
        self.barrier.wait().await;
        Ok(Some(RawCandidate::new(self.answer.clone())))
    }
}

/// A scheduler wired to its own session, channels, and metrics
pub struct Pipeline {
    pub scheduler: Arc<FusionScheduler>,
    pub session: Arc<ScanSession>,
    pub events: EventSender,
    pub event_rx: mpsc::Receiver<SessionEvent>,
    pub release_monitor: Arc<ReleaseMonitor>,
    pub metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(recognizers: RecognizerSet, every_n_frames: u64, max_release_failures: u32) -> Self {
        let (events, event_rx, _status_rx) = create_event_channel(64);
        let metrics = Arc::new(Metrics::new());
        let session = Arc::new(ScanSession::new());
        let release_monitor =
            Arc::new(ReleaseMonitor::new(max_release_failures, events.clone(), metrics.clone()));
        let scheduler = Arc::new(FusionScheduler::new(
            session.clone(),
            recognizers,
            FallbackPolicy::new(every_n_frames),
            events.clone(),
            release_monitor.clone(),
            metrics.clone(),
        ));
        Self { scheduler, session, events, event_rx, release_monitor, metrics }
    }

    /// Drain pending events
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            out.push(event);
        }
        out
    }
}
