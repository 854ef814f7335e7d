// SPDX-License-Identifier: GPL-3.0-only

//! Depth frame acquisition
//!
//! - [`types`]: frames, strided planes and the scoped lock over their memory
//! - [`source`]: the producer seam plus the synthetic and channel producers
//! - [`frame_loop`]: the dedicated thread that drains a producer

pub mod frame_loop;
pub mod source;
pub mod types;

pub use frame_loop::{FrameLoopController, LoopAction};
pub use source::{
    ChannelDepthSource, DepthFrameSource, FrameSender, SyntheticDepthSource, SyntheticScene,
};
pub use types::{
    BufferCell, ConfidenceGrade, ConfidencePlane, DepthFrame, DepthPlane, Plane, PlaneBuffer,
    PlaneGuard, PlaneView, ScreenSize, ScreenTarget,
};
