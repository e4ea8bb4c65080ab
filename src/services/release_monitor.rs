//! Frame release accounting
//!
//! A failed release is logged and the session keeps going, but a camera that
//! cannot take its buffers back will eventually stall. After a run of
//! consecutive failures the monitor fails the session once.

use crate::domain::error::ReleaseError;
use crate::domain::types::{FrameId, ScanStatus};
use crate::infra::metrics::Metrics;
use crate::io::frame::FrameGuard;
use crate::services::events::{EventSender, SessionEvent};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct ReleaseMonitor {
    consecutive_failures: AtomicU32,
    max_consecutive_failures: u32,
    /// Set once the failure event has been emitted for the current session
    failed: AtomicBool,
    events: EventSender,
    metrics: Arc<Metrics>,
}

impl ReleaseMonitor {
    pub fn new(max_consecutive_failures: u32, events: EventSender, metrics: Arc<Metrics>) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            max_consecutive_failures: max_consecutive_failures.max(1),
            failed: AtomicBool::new(false),
            events,
            metrics,
        }
    }

    /// Release a frame and account for the result
    pub fn release(&self, frame: FrameGuard) {
        let frame_id = frame.id();
        let result = frame.release();
        self.record(frame_id, result);
    }

    fn record(&self, frame_id: FrameId, result: Result<(), ReleaseError>) {
        match result {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics.record_release_failure();
                let streak = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                warn!(
                    frame_id = %frame_id,
                    error = %e,
                    consecutive_failures = %streak,
                    "frame_release_failed"
                );
                if streak >= self.max_consecutive_failures
                    && self
                        .failed
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    error!(consecutive_failures = %streak, "pipeline_failure");
                    self.metrics.record_pipeline_failure();
                    self.events.set_status(ScanStatus::Failed);
                    self.events.send(SessionEvent::PipelineFailure { consecutive_failures: streak });
                }
            }
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Clear the failure latch (new session after a retake)
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.failed.store(false, Ordering::Release);
        debug!("release_monitor_reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::events::create_event_channel;

    #[test]
    fn test_failure_threshold_emits_once() {
        let (events, mut rx, _status_rx) = create_event_channel(8);
        let monitor = ReleaseMonitor::new(3, events, Arc::new(Metrics::new()));

        for i in 0..5 {
            monitor.record(FrameId(i), Err(ReleaseError("busy".into())));
        }

        assert!(monitor.has_failed());
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::PipelineFailure { consecutive_failures: 3 }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_success_resets_streak() {
        let (events, mut rx, _status_rx) = create_event_channel(8);
        let monitor = ReleaseMonitor::new(3, events, Arc::new(Metrics::new()));

        monitor.record(FrameId(1), Err(ReleaseError("busy".into())));
        monitor.record(FrameId(2), Err(ReleaseError("busy".into())));
        monitor.record(FrameId(3), Ok(()));
        monitor.record(FrameId(4), Err(ReleaseError("busy".into())));

        assert_eq!(monitor.consecutive_failures(), 1);
        assert!(!monitor.has_failed());
        assert!(rx.try_recv().is_err());
    }
}
