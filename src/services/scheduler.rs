//! Barcode-first recognition with throttled OCR fallback
//!
//! Every admitted frame goes to the barcode recognizer. Frames that yield no
//! usable barcode advance the session frame counter, and only every Nth such
//! frame is also handed to OCR. Whatever path a frame takes, it is released
//! exactly once through the [`ReleaseMonitor`] before `process_frame` returns.

use crate::domain::error::{InvalidIdentifier, ManualEntryError};
use crate::domain::isbn::{normalize, validate_canonical, ISBN13_LEN};
use crate::domain::types::{CanonicalId, FrameId, RawCandidate, RecognitionSource, ScanHit, ScanStatus};
use crate::infra::metrics::Metrics;
use crate::io::frame::{Frame, FrameGuard};
use crate::io::recognizer::RecognizerSet;
use crate::services::events::{EventSender, SessionEvent};
use crate::services::release_monitor::ReleaseMonitor;
use crate::services::session::{AcceptOutcome, ScanSession, SessionTicket};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Decides which counted frames also go to OCR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    every_n_frames: u64,
}

impl FallbackPolicy {
    pub fn new(every_n_frames: u64) -> Self {
        Self { every_n_frames: every_n_frames.max(1) }
    }

    pub fn every_n_frames(&self) -> u64 {
        self.every_n_frames
    }

    /// `counter` is the 1-based count of frames without a barcode result
    #[inline]
    pub fn should_run(&self, counter: u64) -> bool {
        counter % self.every_n_frames == 0
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(12)
    }
}

/// What happened to a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Session was paused, found, reset, or has no recognizers
    Discarded,
    /// This frame produced the session's result
    Accepted(RecognitionSource),
    /// A valid identifier arrived after another one won, or after a reset
    Superseded,
    /// Recognizers ran and found nothing usable
    NoCandidate,
    /// No barcode and the OCR throttle skipped this frame
    Throttled,
    /// A recognizer call returned an error
    RecognizerFailed,
}

pub struct FusionScheduler {
    session: Arc<ScanSession>,
    recognizers: RecognizerSet,
    policy: FallbackPolicy,
    events: EventSender,
    release_monitor: Arc<ReleaseMonitor>,
    metrics: Arc<Metrics>,
}

impl FusionScheduler {
    pub fn new(
        session: Arc<ScanSession>,
        recognizers: RecognizerSet,
        policy: FallbackPolicy,
        events: EventSender,
        release_monitor: Arc<ReleaseMonitor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { session, recognizers, policy, events, release_monitor, metrics }
    }

    pub fn session(&self) -> &Arc<ScanSession> {
        &self.session
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    pub fn has_recognizers(&self) -> bool {
        !self.recognizers.is_empty()
    }

    /// Analyze one frame and release it
    pub async fn process_frame(&self, frame: FrameGuard) -> FrameOutcome {
        let ticket = self.session.ticket();

        let outcome = if self.session.is_closed() {
            self.metrics.record_frame_discarded();
            FrameOutcome::Discarded
        } else if self.recognizers.is_empty() {
            self.metrics.record_frame_discarded();
            self.events.set_status(ScanStatus::NoRecognizer);
            FrameOutcome::Discarded
        } else {
            self.metrics.record_frame_analyzed();
            self.analyze(frame.frame(), ticket).await
        };

        debug!(frame_id = %frame.id(), outcome = ?outcome, "frame_processed");
        self.release_monitor.release(frame);
        outcome
    }

    async fn analyze(&self, frame: &Frame, ticket: SessionTicket) -> FrameOutcome {
        if let Some(barcode) = &self.recognizers.barcode {
            let start = Instant::now();
            let result = barcode.recognize_barcode(frame).await;
            self.metrics.record_barcode_call(start.elapsed().as_millis() as u64);

            match result {
                Ok(Some(raw)) => match normalize(raw.as_str()) {
                    Some(id) => return self.offer(ticket, id, RecognitionSource::Barcode, frame.id),
                    None => {
                        debug!(frame_id = %frame.id, raw = %raw.as_str(), "barcode_not_isbn");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    // a failed barcode call only releases the frame
                    self.metrics.record_recognizer_failure();
                    warn!(frame_id = %frame.id, error = %e, "barcode_recognizer_failed");
                    return FrameOutcome::RecognizerFailed;
                }
            }
        }

        let Some(counter) = self.session.next_frame_count(ticket) else {
            self.metrics.record_frame_discarded();
            return FrameOutcome::Discarded;
        };
        if !self.policy.should_run(counter) {
            self.metrics.record_ocr_throttled();
            self.set_status_if_live(ticket, ScanStatus::Scanning);
            return FrameOutcome::Throttled;
        }

        let Some(text) = &self.recognizers.text else {
            debug!(frame_id = %frame.id, frame_count = %counter, "ocr_unavailable");
            return FrameOutcome::NoCandidate;
        };

        self.set_status_if_live(ticket, ScanStatus::TryingOcr);
        debug!(frame_id = %frame.id, frame_count = %counter, "ocr_dispatched");

        let start = Instant::now();
        let result = text.recognize_text(frame).await;
        self.metrics.record_ocr_call(start.elapsed().as_millis() as u64);

        match result {
            Ok(Some(raw)) => self.offer_raw(ticket, &raw, RecognitionSource::Ocr, frame.id),
            Ok(None) => FrameOutcome::NoCandidate,
            Err(e) => {
                self.metrics.record_recognizer_failure();
                warn!(frame_id = %frame.id, error = %e, "text_recognizer_failed");
                FrameOutcome::RecognizerFailed
            }
        }
    }

    fn offer_raw(
        &self,
        ticket: SessionTicket,
        raw: &RawCandidate,
        source: RecognitionSource,
        frame_id: FrameId,
    ) -> FrameOutcome {
        match normalize(raw.as_str()) {
            Some(id) => self.offer(ticket, id, source, frame_id),
            None => FrameOutcome::NoCandidate,
        }
    }

    fn offer(
        &self,
        ticket: SessionTicket,
        id: CanonicalId,
        source: RecognitionSource,
        frame_id: FrameId,
    ) -> FrameOutcome {
        let hit = ScanHit::new(id, source, Some(frame_id));
        match self.session.try_accept_then(ticket, hit, true, |hit, session_id| self.announce(hit, session_id)) {
            AcceptOutcome::Accepted => FrameOutcome::Accepted(source),
            AcceptOutcome::Paused => {
                debug!(frame_id = %frame_id, source = %source, "completion_while_paused");
                self.metrics.record_frame_discarded();
                FrameOutcome::Discarded
            }
            AcceptOutcome::AlreadyEmitted(winner) => {
                self.metrics.record_late_completion();
                debug!(
                    frame_id = %frame_id,
                    source = %source,
                    winner = %winner.isbn13,
                    "late_completion_ignored"
                );
                FrameOutcome::Superseded
            }
            AcceptOutcome::StaleGeneration => {
                self.metrics.record_late_completion();
                debug!(frame_id = %frame_id, source = %source, "stale_completion_ignored");
                FrameOutcome::Superseded
            }
        }
    }

    /// Runs under the session lock for the winning hit
    fn announce(&self, hit: &ScanHit, session_id: &str) {
        self.metrics.record_accepted(hit.source);
        info!(
            session_id = %session_id,
            isbn = %hit.isbn13,
            source = %hit.source,
            frame_id = ?hit.frame_id.map(|f| f.0),
            "isbn_accepted"
        );
        self.events.set_status(ScanStatus::Found(hit.source));
        self.events.send(SessionEvent::Accepted(hit.clone()));
    }

    /// Progress updates never overwrite Found, Failed or Paused
    fn set_status_if_live(&self, ticket: SessionTicket, status: ScanStatus) {
        if self.session.is_live(ticket) {
            self.events.set_progress(status);
        }
    }

    /// Accept a typed identifier, bypassing the frame path
    ///
    /// Exactly 13 digits must be a valid ISBN-13 as typed; anything else is
    /// searched for an embedded ISBN-10 or ISBN-13.
    pub fn submit_manual(&self, text: &str) -> Result<CanonicalId, ManualEntryError> {
        let ticket = self.session.ticket();
        let trimmed = text.trim();

        let parsed = if trimmed.len() == ISBN13_LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            validate_canonical(trimmed)
        } else if trimmed.is_empty() {
            Err(InvalidIdentifier::Empty)
        } else {
            normalize(trimmed).ok_or(InvalidIdentifier::NotFound)
        };

        let id = match parsed {
            Ok(id) => id,
            Err(e) => {
                self.metrics.record_manual_rejected();
                info!(input = %trimmed, reason = %e, "manual_entry_rejected");
                if !self.session.is_emitted() {
                    self.events.set_status(ScanStatus::InvalidManual);
                }
                return Err(e.into());
            }
        };

        let hit = ScanHit::new(id.clone(), RecognitionSource::Manual, None);
        match self.session.try_accept_then(ticket, hit, false, |hit, session_id| self.announce(hit, session_id)) {
            AcceptOutcome::Accepted => Ok(id),
            AcceptOutcome::AlreadyEmitted(winner) => {
                info!(input = %id, winner = %winner.isbn13, "manual_entry_after_accept");
                Err(ManualEntryError::AlreadyAccepted(winner.isbn13))
            }
            AcceptOutcome::StaleGeneration => Err(ManualEntryError::SessionReset),
            // not returned while pause is ignored
            AcceptOutcome::Paused => Err(ManualEntryError::SessionReset),
        }
    }
}
