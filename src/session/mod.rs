// SPDX-License-Identifier: GPL-3.0-only

//! Ranging session
//!
//! Wires one depth producer to both pipelines:
//!
//! ```text
//! producer ──► frame loop thread ──► TargetSampler ──► mpsc ──► display task
//!                     │                                              │
//!                     │                               watch<ReadoutSnapshot>
//!                     │
//!                     └──► LatestFrame slot ──► field renderer (newest only)
//! ```
//!
//! Stopping the session joins the frame loop, stops the producer and clears
//! the frame slot, so no frame memory outlives the session.

use crate::backends::depth::{
    DepthFrame, DepthFrameSource, FrameLoopController, LoopAction, ScreenSize, ScreenTarget,
};
use crate::config::Config;
use crate::constants::FRAME_WAIT_TIMEOUT;
use crate::display::{DistanceHistory, RangeReadout, ReadoutSnapshot, SampleUpdate};
use crate::errors::SourceError;
use crate::sampler::{TargetSampler, VerticalOrientation};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Single-slot mailbox holding the newest frame for the renderer
///
/// Publishing replaces whatever the renderer has not taken yet.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<DepthFrame>>,
    overwritten: AtomicU64,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, returning true if an untaken frame was replaced
    pub fn publish(&self, frame: DepthFrame) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let replaced = slot.replace(frame).is_some();
        if replaced {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }

    /// Take the newest frame, leaving the slot empty
    pub fn take(&self) -> Option<DepthFrame> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    pub fn clear(&self) {
        self.take();
    }

    /// Frames replaced before the renderer took them
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// Session parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub orientation: VerticalOrientation,
    pub screen: ScreenSize,
    /// Initial reticle position; screen center when `None`
    pub target: Option<ScreenTarget>,
    pub history_capacity: usize,
    pub velocity_window: usize,
}

impl SessionOptions {
    pub fn from_config(config: &Config, screen: ScreenSize) -> Self {
        Self {
            orientation: config.vertical_orientation,
            screen,
            target: None,
            history_capacity: config.history_capacity,
            velocity_window: config.velocity_window,
        }
    }
}

/// State owned by the frame loop thread
struct LoopState {
    source: Box<dyn DepthFrameSource>,
    sampler: TargetSampler,
    target: Arc<Mutex<ScreenTarget>>,
    screen: Arc<Mutex<ScreenSize>>,
    latest: Arc<LatestFrame>,
    updates: mpsc::UnboundedSender<SampleUpdate>,
}

impl LoopState {
    fn tick(&mut self) -> LoopAction {
        let frame = match self.source.next_frame(FRAME_WAIT_TIMEOUT) {
            Ok(Some(frame)) => frame,
            Ok(None) => return LoopAction::Continue,
            Err(e) => {
                warn!(
                    source = self.source.name(),
                    error = %e,
                    "Depth source failed, ending session loop"
                );
                return LoopAction::Stop;
            }
        };

        let target = *self.target.lock().unwrap_or_else(|e| e.into_inner());
        let screen = *self.screen.lock().unwrap_or_else(|e| e.into_inner());
        let sample = self.sampler.sample(target, &frame, screen);
        let update = SampleUpdate {
            sequence: frame.sequence(),
            captured_at: frame.captured_at(),
            sample,
        };

        if self.latest.publish(frame) {
            debug!(sequence = update.sequence, "Renderer fell behind, replaced untaken frame");
        }

        if self.updates.send(update).is_err() {
            debug!("Display context gone, ending session loop");
            return LoopAction::Stop;
        }
        LoopAction::Continue
    }
}

impl Drop for LoopState {
    fn drop(&mut self) {
        self.source.stop();
    }
}

/// A running ranging session
pub struct RangingSession {
    frame_loop: Option<FrameLoopController>,
    display_task: Option<tokio::task::JoinHandle<()>>,
    target: Arc<Mutex<ScreenTarget>>,
    screen: Arc<Mutex<ScreenSize>>,
    latest: Arc<LatestFrame>,
    readout: watch::Receiver<ReadoutSnapshot>,
}

impl RangingSession {
    /// Start `source` and both pipelines
    ///
    /// Must be called from within a tokio runtime; the display context runs
    /// as a task on it.
    pub fn start(
        mut source: Box<dyn DepthFrameSource>,
        options: SessionOptions,
    ) -> Result<Self, SourceError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SourceError::StartFailed(format!("No tokio runtime: {}", e)))?;

        source.start()?;
        info!(
            source = source.name(),
            width = options.screen.width,
            height = options.screen.height,
            "Starting ranging session"
        );

        let target = Arc::new(Mutex::new(
            options.target.unwrap_or_else(|| options.screen.center()),
        ));
        let screen = Arc::new(Mutex::new(options.screen));
        let latest = Arc::new(LatestFrame::new());
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<SampleUpdate>();
        let (readout_tx, readout_rx) = watch::channel(ReadoutSnapshot::default());

        let history = DistanceHistory::new(options.history_capacity, options.velocity_window);
        let display_task = runtime.spawn(async move {
            let mut readout = RangeReadout::new(history);
            while let Some(update) = updates_rx.recv().await {
                readout.apply(&update);
                readout_tx.send_replace(readout.snapshot());
            }
            debug!(
                stale = readout.stale_updates(),
                "Display context finished"
            );
        });

        let mut state = LoopState {
            source,
            sampler: TargetSampler::new(options.orientation),
            target: Arc::clone(&target),
            screen: Arc::clone(&screen),
            latest: Arc::clone(&latest),
            updates: updates_tx,
        };
        let frame_loop = FrameLoopController::start("depth-session", move || state.tick());

        Ok(Self {
            frame_loop: Some(frame_loop),
            display_task: Some(display_task),
            target,
            screen,
            latest,
            readout: readout_rx,
        })
    }

    /// Move the reticle; applies from the next frame on
    pub fn set_target(&self, target: ScreenTarget) {
        *self.target.lock().unwrap_or_else(|e| e.into_inner()) = target;
    }

    pub fn target(&self) -> ScreenTarget {
        *self.target.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_screen_size(&self, screen: ScreenSize) {
        *self.screen.lock().unwrap_or_else(|e| e.into_inner()) = screen;
    }

    pub fn screen_size(&self) -> ScreenSize {
        *self.screen.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to readout snapshots
    pub fn readout(&self) -> watch::Receiver<ReadoutSnapshot> {
        self.readout.clone()
    }

    /// Current readout without waiting
    pub fn snapshot(&self) -> ReadoutSnapshot {
        self.readout.borrow().clone()
    }

    /// Take the newest frame not yet rendered
    pub fn take_latest_frame(&self) -> Option<DepthFrame> {
        self.latest.take()
    }

    /// Frames the renderer never saw because a newer one replaced them
    pub fn dropped_render_frames(&self) -> u64 {
        self.latest.overwritten()
    }

    pub fn is_running(&self) -> bool {
        self.frame_loop
            .as_ref()
            .map(FrameLoopController::is_running)
            .unwrap_or(false)
    }

    /// Stop both pipelines and wait for them to finish
    pub async fn stop(&mut self) {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.request_stop();
            if let Err(e) = tokio::task::spawn_blocking(move || frame_loop.stop()).await {
                warn!(error = %e, "Failed to join session frame loop");
            }
        }
        // The loop thread owned the only update sender, so the display
        // task drains what is left and exits
        if let Some(task) = self.display_task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Display task failed");
        }
        self.latest.clear();
        info!("Ranging session stopped");
    }
}

impl Drop for RangingSession {
    fn drop(&mut self) {
        if let Some(mut frame_loop) = self.frame_loop.take() {
            frame_loop.stop();
        }
        self.latest.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::depth::{ChannelDepthSource, ConfidenceGrade, FrameSender, Plane};
    use crate::sampler::Rejection;
    use std::time::Duration;

    fn uniform_frame(sequence: u64, value: f32) -> DepthFrame {
        let depth = Plane::<f32>::filled(4, 4, 32, value).unwrap();
        let confidence = Plane::<u8>::filled(4, 4, 4, 1).unwrap();
        DepthFrame::new(sequence, depth, Some(confidence)).unwrap()
    }

    fn options() -> SessionOptions {
        SessionOptions {
            orientation: VerticalOrientation::Flipped,
            screen: ScreenSize::new(400.0, 400.0),
            target: None,
            history_capacity: 50,
            velocity_window: 4,
        }
    }

    async fn wait_for_sequence(
        rx: &mut watch::Receiver<ReadoutSnapshot>,
        sequence: u64,
    ) -> ReadoutSnapshot {
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.sequence == Some(sequence)),
        )
        .await
        .expect("timed out waiting for readout")
        .expect("readout channel closed");
        result.clone()
    }

    fn start_channel_session() -> (FrameSender, RangingSession) {
        let (sender, source) = ChannelDepthSource::new();
        let session = RangingSession::start(Box::new(source), options()).unwrap();
        (sender, session)
    }

    #[tokio::test]
    async fn test_session_samples_frames() {
        let (sender, mut session) = start_channel_session();
        assert_eq!(session.target(), ScreenTarget::new(200.0, 200.0));
        let mut rx = session.readout();

        sender.send(uniform_frame(1, 2.5)).unwrap();
        let snapshot = wait_for_sequence(&mut rx, 1).await;
        assert_eq!(snapshot.distance_m, Some(2.5));
        assert_eq!(snapshot.grade, Some(ConfidenceGrade::Medium));
        assert!(snapshot.live);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_session_retains_last_good_value() {
        let (sender, mut session) = start_channel_session();
        let mut rx = session.readout();

        sender.send(uniform_frame(1, 1.25)).unwrap();
        wait_for_sequence(&mut rx, 1).await;
        sender.send(uniform_frame(2, f32::NAN)).unwrap();
        let snapshot = wait_for_sequence(&mut rx, 2).await;
        assert_eq!(snapshot.distance_m, Some(1.25));
        assert!(!snapshot.live);
        assert_eq!(snapshot.last_rejection, Some(Rejection::NonFinite));

        session.set_target(ScreenTarget::new(-10.0, 200.0));
        sender.send(uniform_frame(3, 3.0)).unwrap();
        let snapshot = wait_for_sequence(&mut rx, 3).await;
        assert_eq!(snapshot.distance_m, Some(1.25));
        assert_eq!(snapshot.last_rejection, Some(Rejection::OutOfBounds));

        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_clears_frame_slot() {
        let (sender, mut session) = start_channel_session();
        let mut rx = session.readout();

        sender.send(uniform_frame(1, 2.0)).unwrap();
        wait_for_sequence(&mut rx, 1).await;
        session.stop().await;

        assert!(session.take_latest_frame().is_none());
        assert!(!session.is_running());
        // Producer side sees the consumer gone
        assert!(sender.send(uniform_frame(2, 2.0)).is_err());
    }

    #[tokio::test]
    async fn test_latest_frame_is_newest() {
        let (sender, mut session) = start_channel_session();
        let mut rx = session.readout();

        for seq in 1..=3 {
            sender.send(uniform_frame(seq, 2.0)).unwrap();
            wait_for_sequence(&mut rx, seq).await;
        }
        let frame = session.take_latest_frame().unwrap();
        assert_eq!(frame.sequence(), 3);
        assert!(session.take_latest_frame().is_none());
        assert_eq!(session.dropped_render_frames(), 2);

        session.stop().await;
    }

    #[tokio::test]
    async fn test_producer_disconnect_ends_loop() {
        let (sender, mut session) = start_channel_session();
        drop(sender);
        tokio::time::timeout(Duration::from_secs(5), async {
            while session.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        session.stop().await;
    }

    #[test]
    fn test_start_requires_runtime() {
        let (_sender, source) = ChannelDepthSource::new();
        assert!(matches!(
            RangingSession::start(Box::new(source), options()),
            Err(SourceError::StartFailed(_))
        ));
    }

    #[test]
    fn test_latest_frame_slot_overwrites() {
        let latest = LatestFrame::new();
        assert!(!latest.publish(uniform_frame(1, 1.0)));
        assert!(latest.publish(uniform_frame(2, 1.0)));
        assert_eq!(latest.overwritten(), 1);
        assert_eq!(latest.take().map(|f| f.sequence()), Some(2));
        assert!(latest.is_empty());
    }
}
