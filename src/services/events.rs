//! Session output channels
//!
//! Acceptances and pipeline failures go over a bounded mpsc channel whose last
//! free slot is kept for `Accepted`. The session itself still records the
//! accepted hit, so `SessionController::accepted` is authoritative if a UI
//! stops draining events. Status text goes over a watch channel: only the
//! latest value matters and losing an intermediate status is harmless.

use crate::domain::types::{ScanHit, ScanStatus};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::warn;

/// Events delivered to the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session's single accepted identifier
    Accepted(ScanHit),
    /// Frame buffers keep failing to release; the session needs a retake
    PipelineFailure { consecutive_failures: u32 },
}

/// Sender handle for session events and status
///
/// Clone this to share across frame tasks. Non-blocking.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<SessionEvent>,
    status_tx: Arc<watch::Sender<ScanStatus>>,
}

impl EventSender {
    pub fn send(&self, event: SessionEvent) {
        if !matches!(event, SessionEvent::Accepted(_)) && self.tx.capacity() <= 1 {
            warn!(event = ?event, "session_event_dropped_slot_reserved");
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event = ?event, "session_event_dropped_channel_full");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn set_status(&self, status: ScanStatus) {
        self.status_tx.send_replace(status);
    }

    /// Publish a frame progress status unless the current one holds over it.
    /// Returns whether the status changed.
    pub fn set_progress(&self, status: ScanStatus) -> bool {
        self.status_tx.send_if_modified(|current| {
            if current.holds_over_progress() || *current == status {
                return false;
            }
            *current = status;
            true
        })
    }

    pub fn status(&self) -> ScanStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.status_tx.subscribe()
    }
}

/// Create a new session event channel
///
/// Returns the sender, the event receiver, and a status receiver. The
/// channel holds at least two events so one slot can stay free for `Accepted`.
pub fn create_event_channel(
    buffer_size: usize,
) -> (EventSender, mpsc::Receiver<SessionEvent>, watch::Receiver<ScanStatus>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(2));
    let (status_tx, status_rx) = watch::channel(ScanStatus::Scanning);
    (EventSender { tx, status_tx: Arc::new(status_tx) }, rx, status_rx)
}
