//! Scan session state shared by all in-flight recognizer completions
//!
//! This is the only mutable state the pipeline shares across tasks. The
//! transition to "found" goes through `try_accept`, which does a
//! compare-and-set on `emitted` while holding the generation lock, so a
//! completion from before a reset can never be accepted into the new session.
//! Pause, reset and frame counting take the same lock, so each of them is
//! ordered strictly before or after any acceptance.

use crate::domain::types::{epoch_ms, ScanHit};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Result of offering a hit to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// This hit is the session's result
    Accepted,
    /// Another hit won first (the winner is returned)
    AlreadyEmitted(ScanHit),
    /// The session was paused before the hit arrived
    Paused,
    /// The hit belongs to a session generation that was reset
    StaleGeneration,
}

/// Snapshot of the session taken at frame dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTicket {
    pub generation: u64,
}

struct Slot {
    session_id: String,
    hit: Option<ScanHit>,
}

/// Mutable per-scan state (emitted flag, frame counter, pause flag)
pub struct ScanSession {
    generation: AtomicU64,
    emitted: AtomicBool,
    paused: AtomicBool,
    frame_counter: AtomicU64,
    slot: Mutex<Slot>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            emitted: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            frame_counter: AtomicU64::new(0),
            slot: Mutex::new(Slot { session_id: new_session_id(), hit: None }),
        }
    }

    /// Capture the current generation for a frame about to be analyzed
    pub fn ticket(&self) -> SessionTicket {
        SessionTicket { generation: self.generation.load(Ordering::Acquire) }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn session_id(&self) -> String {
        self.slot.lock().session_id.clone()
    }

    pub fn is_emitted(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// True when frames should be dropped (paused or already found)
    pub fn is_closed(&self) -> bool {
        self.is_paused() || self.is_emitted()
    }

    /// True when a completion for `ticket` may still change anything
    pub fn is_live(&self, ticket: SessionTicket) -> bool {
        !self.is_closed() && self.generation() == ticket.generation
    }

    /// Once this returns, no frame completion can be accepted until `resume`
    pub fn pause(&self) {
        let _slot = self.slot.lock();
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        let _slot = self.slot.lock();
        self.paused.store(false, Ordering::Release);
    }

    /// Count a frame that produced no barcode result; returns the new count
    /// (1-based), or `None` if `ticket` is no longer live
    pub fn next_frame_count(&self, ticket: SessionTicket) -> Option<u64> {
        let _slot = self.slot.lock();
        if !self.is_live(ticket) {
            return None;
        }
        Some(self.frame_counter.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::Acquire)
    }

    /// The accepted hit, if any
    pub fn accepted(&self) -> Option<ScanHit> {
        self.slot.lock().hit.clone()
    }

    /// Single decision point for the found transition of a frame hit
    pub fn try_accept(&self, ticket: SessionTicket, hit: ScanHit) -> AcceptOutcome {
        self.try_accept_then(ticket, hit, true, |_, _| {})
    }

    /// Like [`try_accept`](Self::try_accept), running `on_accept` for the
    /// winner before the lock is released, so a concurrent `reset` cannot slip
    /// in between the acceptance and its notification. `on_accept` must not
    /// block or touch the session.
    ///
    /// With `respect_pause`, a paused session refuses the hit. Manual entry
    /// passes `false` because it is allowed while paused.
    pub fn try_accept_then<F>(
        &self,
        ticket: SessionTicket,
        hit: ScanHit,
        respect_pause: bool,
        on_accept: F,
    ) -> AcceptOutcome
    where
        F: FnOnce(&ScanHit, &str),
    {
        let mut slot = self.slot.lock();

        if ticket.generation != self.generation.load(Ordering::Acquire) {
            return AcceptOutcome::StaleGeneration;
        }

        if respect_pause && self.paused.load(Ordering::Acquire) && !self.is_emitted() {
            return AcceptOutcome::Paused;
        }

        if self
            .emitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // emitted and hit are only changed together under this lock
            return match slot.hit.clone() {
                Some(winner) => AcceptOutcome::AlreadyEmitted(winner),
                None => AcceptOutcome::StaleGeneration,
            };
        }

        let hit = ScanHit { accepted_at_ms: epoch_ms(), ..hit };
        on_accept(&hit, &slot.session_id);
        slot.hit = Some(hit);
        AcceptOutcome::Accepted
    }

    /// Start a fresh session (retake). Returns the new session id.
    pub fn reset(&self) -> String {
        let mut slot = self.slot.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.frame_counter.store(0, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.emitted.store(false, Ordering::Release);
        slot.hit = None;
        slot.session_id = new_session_id();
        slot.session_id.clone()
    }
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}
