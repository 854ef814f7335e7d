// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Usable range of the depth sensor (meters)
///
/// Readings outside this range are still reported; the range only drives
/// the visualization ramp and the chart axis.
pub const SENSOR_MIN_RANGE_M: f32 = 0.2;
pub const SENSOR_MAX_RANGE_M: f32 = 5.0;

/// Default number of samples kept for the distance chart
pub const DEFAULT_HISTORY_CAPACITY: usize = 300;

/// Default number of recent samples used for the velocity fit
pub const DEFAULT_VELOCITY_WINDOW: usize = 8;

/// Default synthetic producer rate (frames per second)
pub const DEFAULT_SYNTHETIC_FPS: u32 = 30;

/// Synthetic depth grid size, matching a typical LiDAR depth map
pub const SYNTHETIC_WIDTH: u32 = 256;
pub const SYNTHETIC_HEIGHT: u32 = 192;

/// Extra bytes appended to each synthetic row so consumers exercise stride
/// addressing instead of assuming tight packing
pub const SYNTHETIC_ROW_PADDING: usize = 64;

/// How long the frame loop waits on the producer before re-checking its
/// stop signal
pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Texture uploads slower than this are reported as stutter risks
pub const SLOW_UPLOAD_THRESHOLD: Duration = Duration::from_millis(8);

/// Directory name used under the platform config dir
pub const APP_DIR_NAME: &str = "motion-visualizer";
