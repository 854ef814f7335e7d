// SPDX-License-Identifier: GPL-3.0-only

//! Depth frame producers
//!
//! [`DepthFrameSource`] is the seam to the sensor runtime. Two producers ship
//! with the crate:
//! - [`SyntheticDepthSource`] renders a deterministic scene at a fixed rate
//! - [`ChannelDepthSource`] receives frames pushed by an external producer

use super::types::{DepthFrame, Plane, PlaneBuffer};
use crate::constants::{
    DEFAULT_SYNTHETIC_FPS, SYNTHETIC_HEIGHT, SYNTHETIC_ROW_PADDING, SYNTHETIC_WIDTH,
};
use crate::errors::{FrameError, SourceError};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A producer of depth frames
///
/// Callers drive it from a single thread: `start`, then `next_frame` in a
/// loop, then `stop`. Implementations return the newest frame available and
/// never queue stale ones for the caller.
pub trait DepthFrameSource: Send {
    /// Human-readable producer name for logs
    fn name(&self) -> &str;

    fn start(&mut self) -> Result<(), SourceError>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Wait up to `timeout` for the next frame
    ///
    /// `Ok(None)` means no frame arrived in time.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<DepthFrame>, SourceError>;
}

/// Layout and timing of the synthetic scene
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    /// Bytes appended to every depth row (and to every confidence row)
    pub row_padding: usize,
    pub fps: u32,
    /// Emit a confidence plane alongside the depth plane
    pub with_confidence: bool,
    /// Mean wall distance (meters)
    pub wall_distance_m: f32,
    /// Peak deviation of the wall from its mean (meters)
    pub wall_swing_m: f32,
    /// Seconds per back-and-forth wall cycle
    pub wall_period_s: f32,
}

impl Default for SyntheticScene {
    fn default() -> Self {
        Self {
            width: SYNTHETIC_WIDTH,
            height: SYNTHETIC_HEIGHT,
            row_padding: SYNTHETIC_ROW_PADDING,
            fps: DEFAULT_SYNTHETIC_FPS,
            with_confidence: true,
            wall_distance_m: 1.6,
            wall_swing_m: 0.9,
            wall_period_s: 6.0,
        }
    }
}

impl SyntheticScene {
    /// Wall distance at `elapsed` seconds
    pub fn wall_distance(&self, elapsed: f32) -> f32 {
        let phase = if self.wall_period_s > 0.0 {
            elapsed / self.wall_period_s * std::f32::consts::TAU
        } else {
            0.0
        };
        self.wall_distance_m + self.wall_swing_m * phase.sin()
    }

    /// Depth at cell `(x, y)` in sensor row order: row 0 is the bottom of
    /// the sensed scene, matching [`VerticalOrientation::Flipped`]
    ///
    /// The lower third of the scene is a floor receding toward the horizon,
    /// and a sparse deterministic pattern of cells reads NaN or 0 the way
    /// occluded or absorbing surfaces do.
    ///
    /// [`VerticalOrientation::Flipped`]: crate::sampler::VerticalOrientation::Flipped
    pub fn depth_at(&self, x: u32, y: u32, sequence: u64, elapsed: f32) -> f32 {
        match dropout(x, y, sequence) {
            Dropout::Missing => return f32::NAN,
            Dropout::Zero => return 0.0,
            Dropout::None => {}
        }

        let wall = self.wall_distance(elapsed);
        let horizon = self.height as f32 * 2.0 / 3.0;
        // Distance from the top of the scene, in rows
        let row = self.height.saturating_sub(1).saturating_sub(y) as f32 + 0.5;
        if row > horizon {
            // Camera 1.2 m above the floor, rows below the horizon see
            // floor points closer the further down they are
            let below = (row - horizon) / (self.height as f32 - horizon);
            let floor = 1.2 / (below * 0.9 + 0.05);
            floor.min(wall)
        } else {
            wall
        }
    }

    /// Confidence code for a reading
    pub fn confidence_for(&self, x: u32, depth: f32) -> u8 {
        let edge = x < 4 || x + 4 >= self.width;
        if !(depth > 0.0) || !depth.is_finite() || edge {
            0
        } else if depth < 2.0 {
            2
        } else if depth < 3.5 {
            1
        } else {
            0
        }
    }

    /// Render one frame of the scene
    pub fn render(&self, sequence: u64, elapsed: f32) -> Result<DepthFrame, FrameError> {
        let (width, height) = (self.width, self.height);
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame);
        }
        let depth_stride = width as usize * 4 + self.row_padding;
        let depth_buffer = Arc::new(PlaneBuffer::zeroed(depth_stride * height as usize));
        depth_buffer.fill_with(|bytes| {
            for (y, row) in bytes.chunks_exact_mut(depth_stride).enumerate() {
                for x in 0..width {
                    let value = self.depth_at(x, y as u32, sequence, elapsed);
                    let start = x as usize * 4;
                    row[start..start + 4].copy_from_slice(&value.to_ne_bytes());
                }
            }
        });
        let depth = Plane::<f32>::from_raw(width, height, depth_stride, Arc::clone(&depth_buffer));

        let confidence = if self.with_confidence {
            let conf_stride = width as usize + self.row_padding;
            let codes: Vec<u8> = (0..height)
                .flat_map(|y| {
                    (0..width).map(move |x| {
                        self.confidence_for(x, self.depth_at(x, y, sequence, elapsed))
                    })
                })
                .collect();
            Some(Plane::<u8>::from_values(width, height, conf_stride, &codes)?)
        } else {
            None
        };

        DepthFrame::new(sequence, depth, confidence)
    }
}

enum Dropout {
    None,
    Missing,
    Zero,
}

/// Deterministic per-cell sensor dropout (about 1.5% of cells per frame)
fn dropout(x: u32, y: u32, sequence: u64) -> Dropout {
    let mut h = (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ sequence.wrapping_mul(0x1656_67B1_9E37_79F9);
    h ^= h >> 29;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h ^= h >> 32;
    match h % 1000 {
        0..=9 => Dropout::Missing,
        10..=14 => Dropout::Zero,
        _ => Dropout::None,
    }
}

/// Fixed-rate producer rendering a [`SyntheticScene`]
pub struct SyntheticDepthSource {
    scene: SyntheticScene,
    running: bool,
    started_at: Option<Instant>,
    next_due: Option<Instant>,
    sequence: u64,
}

impl SyntheticDepthSource {
    pub fn new(scene: SyntheticScene) -> Self {
        Self {
            scene,
            running: false,
            started_at: None,
            next_due: None,
            sequence: 0,
        }
    }

    pub fn scene(&self) -> &SyntheticScene {
        &self.scene
    }

    fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.scene.fps.max(1)))
    }
}

impl Default for SyntheticDepthSource {
    fn default() -> Self {
        Self::new(SyntheticScene::default())
    }
}

impl DepthFrameSource for SyntheticDepthSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.running {
            return Err(SourceError::AlreadyRunning);
        }
        info!(
            width = self.scene.width,
            height = self.scene.height,
            fps = self.scene.fps,
            "Starting synthetic depth source"
        );
        let now = Instant::now();
        self.started_at = Some(now);
        self.next_due = Some(now);
        self.sequence = 0;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            info!(frames = self.sequence, "Stopping synthetic depth source");
        }
        self.running = false;
        self.next_due = None;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Option<DepthFrame>, SourceError> {
        let (Some(started_at), Some(due)) = (self.started_at, self.next_due) else {
            return Err(SourceError::NotRunning);
        };
        if !self.running {
            return Err(SourceError::NotRunning);
        }

        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }

        // A slow consumer skips missed ticks instead of receiving a burst
        let period = self.frame_period();
        let mut next = due + period;
        let now = Instant::now();
        while next <= now {
            next += period;
        }
        self.next_due = Some(next);

        let captured_at = Instant::now();
        let elapsed = captured_at.duration_since(started_at).as_secs_f32();
        let frame = self
            .scene
            .render(self.sequence, elapsed)
            .map_err(|e| SourceError::FrameFailed(e.to_string()))?
            .with_captured_at(captured_at);
        self.sequence += 1;
        Ok(Some(frame))
    }
}

/// Producer half of a [`ChannelDepthSource`]
#[derive(Clone)]
pub struct FrameSender {
    sender: Sender<DepthFrame>,
}

impl FrameSender {
    /// Hand a frame to the consumer
    pub fn send(&self, frame: DepthFrame) -> Result<(), SourceError> {
        self.sender
            .send(frame)
            .map_err(|_| SourceError::Disconnected)
    }
}

/// Source fed by an external producer over a channel
///
/// `next_frame` drains everything pending and returns only the newest frame.
pub struct ChannelDepthSource {
    receiver: Receiver<DepthFrame>,
    running: bool,
    dropped: u64,
}

impl ChannelDepthSource {
    /// Create a connected sender/source pair
    pub fn new() -> (FrameSender, Self) {
        let (sender, receiver) = mpsc::channel();
        (
            FrameSender { sender },
            Self {
                receiver,
                running: false,
                dropped: 0,
            },
        )
    }

    /// Frames discarded because a newer one was already waiting
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

impl DepthFrameSource for ChannelDepthSource {
    fn name(&self) -> &str {
        "channel"
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.running {
            return Err(SourceError::AlreadyRunning);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        // Release frames still queued so their buffers do not outlive the session
        while self.receiver.try_recv().is_ok() {}
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Option<DepthFrame>, SourceError> {
        if !self.running {
            return Err(SourceError::NotRunning);
        }

        let mut latest = match self.receiver.recv_timeout(timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => return Err(SourceError::Disconnected),
        };

        loop {
            match self.receiver.try_recv() {
                Ok(frame) => {
                    self.dropped += 1;
                    latest = frame;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Frame producer disconnected after final frame");
                    break;
                }
            }
        }

        Ok(Some(latest))
    }
}
