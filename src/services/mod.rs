//! Services - scanning logic and session state
//!
//! This module contains the core services:
//! - `session` - Per-scan state and the exactly-once acceptance point
//! - `scheduler` - Barcode-first recognition with throttled OCR fallback
//! - `analysis_worker` - Keep-latest frame feed and bounded analysis tasks
//! - `controller` - Session controller used by the UI layer
//! - `release_monitor` - Frame release accounting
//! - `events` - Session event and status channels

pub mod analysis_worker;
pub mod controller;
pub mod events;
pub mod release_monitor;
pub mod scheduler;
pub mod session;

// Re-export commonly used types
pub use analysis_worker::{create_analysis_worker, AnalysisWorker, FrameFeed};
pub use controller::SessionController;
pub use events::{create_event_channel, EventSender, SessionEvent};
pub use release_monitor::ReleaseMonitor;
pub use scheduler::{FallbackPolicy, FrameOutcome, FusionScheduler};
pub use session::{AcceptOutcome, ScanSession, SessionTicket};
