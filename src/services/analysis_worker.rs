//! Analysis worker - pulls frames off the camera feed and runs the scheduler
//!
//! The camera thread pushes frames into a [`FrameFeed`] that holds only the
//! latest unconsumed frame. The worker admits at most `max_in_flight` frames
//! at once and analyzes each in its own task, so recognizer latency never
//! blocks the producer.

use crate::infra::metrics::Metrics;
use crate::io::frame::FrameGuard;
use crate::services::release_monitor::ReleaseMonitor;
use crate::services::scheduler::{FrameOutcome, FusionScheduler};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

struct FeedState {
    latest: Option<FrameGuard>,
    closed: bool,
}

struct FeedInner {
    state: Mutex<FeedState>,
    notify: Notify,
    release_monitor: Arc<ReleaseMonitor>,
    metrics: Arc<Metrics>,
}

/// Keep-only-latest frame slot shared by the camera and the worker
///
/// Cloning gives another producer handle onto the same slot. There is a single
/// consumer (the worker).
#[derive(Clone)]
pub struct FrameFeed {
    inner: Arc<FeedInner>,
}

impl FrameFeed {
    pub fn new(release_monitor: Arc<ReleaseMonitor>, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                state: Mutex::new(FeedState { latest: None, closed: false }),
                notify: Notify::new(),
                release_monitor,
                metrics,
            }),
        }
    }

    /// Offer a frame; an unconsumed older frame is released immediately
    ///
    /// Returns false (and releases the frame) if the feed is closed.
    pub fn push(&self, frame: FrameGuard) -> bool {
        self.inner.metrics.record_frame_submitted();

        let (stale, rejected) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                (None, Some(frame))
            } else {
                (state.latest.replace(frame), None)
            }
        };

        if let Some(frame) = rejected {
            debug!(frame_id = %frame.id(), "frame_rejected_feed_closed");
            self.inner.metrics.record_frame_discarded();
            self.inner.release_monitor.release(frame);
            return false;
        }

        if let Some(stale) = stale {
            debug!(frame_id = %stale.id(), "frame_superseded");
            self.inner.metrics.record_frame_superseded();
            self.inner.release_monitor.release(stale);
        }

        self.inner.notify.notify_one();
        true
    }

    /// Wait for the next frame; `None` once the feed is closed
    pub async fn next(&self) -> Option<FrameGuard> {
        loop {
            {
                let mut state = self.inner.state.lock();
                if let Some(frame) = state.latest.take() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Stop accepting frames and release the queued one, if any
    pub fn close(&self) {
        let queued = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.latest.take()
        };
        if let Some(frame) = queued {
            debug!(frame_id = %frame.id(), "frame_released_on_close");
            self.inner.metrics.record_frame_discarded();
            self.inner.release_monitor.release(frame);
        }
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// True if a frame is waiting to be analyzed
    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().latest.is_some()
    }
}

/// Worker that feeds frames to the scheduler with bounded concurrency
pub struct AnalysisWorker {
    scheduler: Arc<FusionScheduler>,
    feed: FrameFeed,
    max_in_flight: usize,
}

impl AnalysisWorker {
    pub fn new(scheduler: Arc<FusionScheduler>, feed: FrameFeed, max_in_flight: usize) -> Self {
        Self { scheduler, feed, max_in_flight: max_in_flight.max(1) }
    }

    /// Run until shutdown is signalled or the feed is closed
    ///
    /// Frames already being analyzed are allowed to finish; they release their
    /// buffers on the way out.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(max_in_flight = %self.max_in_flight, "analysis_worker_started");

        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks: JoinSet<FrameOutcome> = JoinSet::new();

        loop {
            let permit = tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let frame = tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                frame = self.feed.next() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let scheduler = self.scheduler.clone();
            tasks.spawn(async move {
                let outcome = scheduler.process_frame(frame).await;
                drop(permit);
                outcome
            });

            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    warn!(error = %e, "frame_task_failed");
                }
            }
        }

        self.feed.close();

        let draining = tasks.len();
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "frame_task_failed");
            }
        }

        info!(drained_tasks = %draining, "analysis_worker_stopped");
    }
}

/// Create a frame feed and the worker that consumes it
///
/// Returns the feed (for the camera) and the worker (to be spawned)
pub fn create_analysis_worker(
    scheduler: Arc<FusionScheduler>,
    release_monitor: Arc<ReleaseMonitor>,
    metrics: Arc<Metrics>,
    max_in_flight: usize,
) -> (FrameFeed, AnalysisWorker) {
    let feed = FrameFeed::new(release_monitor, metrics);
    let worker = AnalysisWorker::new(scheduler, feed.clone(), max_in_flight);
    (feed, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ReleaseError;
    use crate::domain::types::FrameId;
    use crate::io::frame::{Frame, FrameReleaser};
    use crate::services::events::create_event_channel;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingReleaser {
        released: AtomicU64,
    }

    impl FrameReleaser for CountingReleaser {
        fn release(&self, _id: FrameId) -> Result<(), ReleaseError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn feed() -> (FrameFeed, Arc<Metrics>) {
        let (events, _rx, _status_rx) = create_event_channel(4);
        let metrics = Arc::new(Metrics::new());
        let monitor = Arc::new(ReleaseMonitor::new(8, events, metrics.clone()));
        (FrameFeed::new(monitor, metrics.clone()), metrics)
    }

    fn guard(id: u64, releaser: &Arc<CountingReleaser>) -> FrameGuard {
        let releaser: Arc<dyn FrameReleaser> = releaser.clone();
        FrameGuard::new(Frame::new(FrameId(id), Bytes::new(), 1, 1), releaser)
    }

    #[tokio::test]
    async fn test_feed_keeps_latest() {
        let (feed, metrics) = feed();
        let releaser = Arc::new(CountingReleaser::default());

        assert!(feed.push(guard(1, &releaser)));
        assert!(feed.push(guard(2, &releaser)));
        assert!(feed.push(guard(3, &releaser)));

        // frames 1 and 2 were superseded and released
        assert_eq!(releaser.released.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.frames_superseded(), 2);

        let frame = feed.next().await.unwrap();
        assert_eq!(frame.id(), FrameId(3));
        assert!(!feed.has_pending());
        drop(frame);
        assert_eq!(releaser.released.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_close_releases_queued_and_rejects() {
        let (feed, _metrics) = feed();
        let releaser = Arc::new(CountingReleaser::default());

        feed.push(guard(1, &releaser));
        feed.close();
        assert_eq!(releaser.released.load(Ordering::SeqCst), 1);

        assert!(!feed.push(guard(2, &releaser)));
        assert_eq!(releaser.released.load(Ordering::SeqCst), 2);
        assert!(feed.next().await.is_none());
        assert!(feed.is_closed());
    }

    #[tokio::test]
    async fn test_next_wakes_on_push() {
        let (feed, _metrics) = feed();
        let releaser = Arc::new(CountingReleaser::default());

        let consumer = feed.clone();
        let handle = tokio::spawn(async move { consumer.next().await.map(|f| f.id()) });
        tokio::task::yield_now().await;
        feed.push(guard(7, &releaser));

        assert_eq!(handle.await.unwrap(), Some(FrameId(7)));
    }
}
