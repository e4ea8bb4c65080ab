//! Camera frames and their release-once guard
//!
//! The camera owns a finite pool of image buffers. Every frame handed to the
//! pipeline must go back to that pool exactly once, whichever branch it took.
//! `FrameGuard::release` consumes the guard, and `Drop` covers the paths where
//! a future was cancelled before it could release explicitly.

use crate::domain::error::ReleaseError;
use crate::domain::types::FrameId;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Opaque image frame. The core never inspects `data`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u16,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(id: FrameId, data: Bytes, width: u32, height: u32) -> Self {
        Self { id, data, width, height, rotation_degrees: 0, captured_at: Instant::now() }
    }

    pub fn with_rotation(mut self, rotation_degrees: u16) -> Self {
        self.rotation_degrees = rotation_degrees;
        self
    }
}

/// Host-side owner of frame buffers (camera image pool)
pub trait FrameReleaser: Send + Sync {
    fn release(&self, id: FrameId) -> Result<(), ReleaseError>;
}

/// Releaser for frames whose buffers need no explicit return
#[derive(Debug, Default)]
pub struct NoopReleaser;

impl FrameReleaser for NoopReleaser {
    fn release(&self, _id: FrameId) -> Result<(), ReleaseError> {
        Ok(())
    }
}

/// A frame plus the obligation to release it
pub struct FrameGuard {
    frame: Frame,
    releaser: Arc<dyn FrameReleaser>,
    released: bool,
}

impl FrameGuard {
    pub fn new(frame: Frame, releaser: Arc<dyn FrameReleaser>) -> Self {
        Self { frame, releaser, released: false }
    }

    pub fn id(&self) -> FrameId {
        self.frame.id
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Return the buffer to its owner. Consumes the guard so it cannot run twice.
    pub fn release(mut self) -> Result<(), ReleaseError> {
        self.released = true;
        self.releaser.release(self.frame.id)
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.releaser.release(self.frame.id) {
            warn!(frame_id = %self.frame.id, error = %e, "frame_release_on_drop_failed");
        }
    }
}

impl std::fmt::Debug for FrameGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGuard")
            .field("frame_id", &self.frame.id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingReleaser {
        released: Mutex<Vec<FrameId>>,
    }

    impl FrameReleaser for RecordingReleaser {
        fn release(&self, id: FrameId) -> Result<(), ReleaseError> {
            self.released.lock().push(id);
            Ok(())
        }
    }

    fn guard(id: u64, releaser: &Arc<RecordingReleaser>) -> FrameGuard {
        let frame = Frame::new(FrameId(id), Bytes::from_static(b"px"), 2, 1);
        FrameGuard::new(frame, releaser.clone())
    }

    #[test]
    fn test_explicit_release_once() {
        let releaser = Arc::new(RecordingReleaser::default());
        guard(1, &releaser).release().unwrap();
        assert_eq!(*releaser.released.lock(), vec![FrameId(1)]);
    }

    #[test]
    fn test_drop_releases_unreleased_guard() {
        let releaser = Arc::new(RecordingReleaser::default());
        {
            let _g = guard(7, &releaser);
        }
        assert_eq!(*releaser.released.lock(), vec![FrameId(7)]);
    }
}
