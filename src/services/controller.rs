//! Session controller - the surface the UI layer talks to
//!
//! Owns the session, the scheduler, and the analysis worker. The camera gets a
//! [`FrameFeed`] from `frame_sink()`; the UI reads status and events and calls
//! `pause`/`resume`/`reset`/`submit_manual`.

use crate::domain::error::ManualEntryError;
use crate::domain::types::{CanonicalId, ScanHit, ScanStatus};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::recognizer::RecognizerSet;
use crate::services::analysis_worker::{create_analysis_worker, AnalysisWorker, FrameFeed};
use crate::services::events::{create_event_channel, EventSender, SessionEvent};
use crate::services::release_monitor::ReleaseMonitor;
use crate::services::scheduler::{FallbackPolicy, FusionScheduler};
use crate::services::session::ScanSession;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct SessionController {
    session: Arc<ScanSession>,
    scheduler: Arc<FusionScheduler>,
    events: EventSender,
    event_rx: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    release_monitor: Arc<ReleaseMonitor>,
    metrics: Arc<Metrics>,
    feed: FrameFeed,
    worker: Mutex<Option<AnalysisWorker>>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionController {
    pub fn new(config: &Config, recognizers: RecognizerSet, metrics: Arc<Metrics>) -> Self {
        let (events, event_rx, _status_rx) = create_event_channel(config.event_channel_capacity());
        let session = Arc::new(ScanSession::new());
        let release_monitor = Arc::new(ReleaseMonitor::new(
            config.max_consecutive_release_failures(),
            events.clone(),
            metrics.clone(),
        ));

        if recognizers.is_empty() {
            events.set_status(ScanStatus::NoRecognizer);
        } else if recognizers.is_degraded() {
            warn!(
                barcode = %recognizers.barcode.is_some(),
                text = %recognizers.text.is_some(),
                "scanner_degraded"
            );
        }

        let scheduler = Arc::new(FusionScheduler::new(
            session.clone(),
            recognizers,
            FallbackPolicy::new(config.ocr_every_n_frames()),
            events.clone(),
            release_monitor.clone(),
            metrics.clone(),
        ));

        let (feed, worker) = create_analysis_worker(
            scheduler.clone(),
            release_monitor.clone(),
            metrics.clone(),
            config.max_in_flight(),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            session,
            scheduler,
            events,
            event_rx: Mutex::new(Some(event_rx)),
            release_monitor,
            metrics,
            feed,
            worker: Mutex::new(Some(worker)),
            worker_handle: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Spawn the analysis worker on the current tokio runtime
    ///
    /// Returns false if the worker was already started or no runtime is running.
    pub fn start(&self) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            warn!("session_start_without_runtime");
            return false;
        };
        let Some(worker) = self.worker.lock().take() else {
            warn!("session_already_started");
            return false;
        };

        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = runtime.spawn(worker.run(shutdown_rx));
        *self.worker_handle.lock() = Some(handle);

        info!(
            session_id = %self.session.session_id(),
            ocr_every_n_frames = %self.scheduler.policy().every_n_frames(),
            "session_started"
        );
        true
    }

    /// Start over: new session, counter cleared, scanning resumes
    pub fn reset(&self) -> String {
        let session_id = self.session.reset();
        self.release_monitor.reset();
        self.events.set_status(self.idle_status());
        info!(session_id = %session_id, generation = %self.session.generation(), "session_reset");
        session_id
    }

    pub fn pause(&self) {
        self.session.pause();
        if !self.session.is_emitted() {
            self.events.set_status(ScanStatus::Paused);
        }
        info!(session_id = %self.session.session_id(), "session_paused");
    }

    pub fn resume(&self) {
        self.session.resume();
        if !self.session.is_emitted() {
            self.events.set_status(self.idle_status());
        }
        info!(session_id = %self.session.session_id(), "session_resumed");
    }

    fn idle_status(&self) -> ScanStatus {
        if self.scheduler.has_recognizers() {
            ScanStatus::Scanning
        } else {
            ScanStatus::NoRecognizer
        }
    }

    /// Human-readable status line
    pub fn status(&self) -> String {
        self.events.status().text().to_string()
    }

    pub fn scan_status(&self) -> ScanStatus {
        self.events.status()
    }

    /// The accepted hit. Holds even if the `Accepted` event was dropped.
    pub fn accepted(&self) -> Option<ScanHit> {
        self.session.accepted()
    }

    /// True while frames are being dropped (explicit pause or after acceptance)
    pub fn is_paused(&self) -> bool {
        self.session.is_closed()
    }

    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    pub fn submit_manual(&self, text: &str) -> Result<CanonicalId, ManualEntryError> {
        self.scheduler.submit_manual(text)
    }

    /// Producer handle for the camera
    pub fn frame_sink(&self) -> FrameFeed {
        self.feed.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.events.subscribe_status()
    }

    /// Take the event receiver (only the first call gets it)
    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.lock().take()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop the worker, release any queued frame, and wait for in-flight frames
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.feed.close();

        let handle = self.worker_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "analysis_worker_join_failed");
            }
        }
        // never started: drop the worker so its feed handle goes away
        self.worker.lock().take();

        info!(session_id = %self.session.session_id(), "session_shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::InvalidIdentifier;
    use crate::domain::types::RecognitionSource;

    fn controller() -> SessionController {
        SessionController::new(&Config::default(), RecognizerSet::default(), Arc::new(Metrics::new()))
    }

    #[test]
    fn test_no_recognizers_status() {
        let controller = controller();
        assert_eq!(controller.status(), "No recognizer available");
        assert!(!controller.is_paused());
    }

    #[test]
    fn test_pause_resume_status() {
        let controller = controller();
        controller.pause();
        assert!(controller.is_paused());
        assert_eq!(controller.status(), "Paused");

        controller.resume();
        assert!(!controller.is_paused());
        assert_eq!(controller.scan_status(), ScanStatus::NoRecognizer);
    }

    #[test]
    fn test_manual_then_reset() {
        let controller = controller();
        let mut events = controller.take_events().unwrap();
        assert!(controller.take_events().is_none());

        let id = controller.submit_manual("9780143127741").unwrap();
        assert_eq!(controller.status(), "ISBN found");
        assert!(controller.is_paused());
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Accepted(ref hit) if hit.source == RecognitionSource::Manual && hit.isbn13 == id
        ));

        let old_session = controller.session_id();
        let new_session = controller.reset();
        assert_ne!(old_session, new_session);
        assert!(controller.accepted().is_none());
        assert!(!controller.is_paused());

        assert_eq!(
            controller.submit_manual("12345"),
            Err(ManualEntryError::Invalid(InvalidIdentifier::NotFound))
        );
        assert_eq!(controller.status(), "Invalid ISBN");
    }

    #[tokio::test]
    async fn test_start_once_and_shutdown() {
        let controller = controller();
        assert!(controller.start());
        assert!(!controller.start());
        controller.shutdown().await;
        assert!(controller.frame_sink().is_closed());
    }

    #[test]
    fn test_start_without_runtime() {
        let controller = controller();
        assert!(!controller.start());
    }
}
