// SPDX-License-Identifier: GPL-3.0-only

//! Motion Visualizer - depth ranging and depth field visualization
//!
//! This library turns a stream of depth frames into two outputs: a distance
//! readout for one user-chosen point on screen, and a false-color rendering
//! of the whole depth field.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Depth frame types and frame sources (synthetic, channel)
//! - [`sampler`]: Screen-to-grid mapping and validated depth lookup
//! - [`display`]: Readout state, units, history and velocity
//! - [`session`]: Frame loop and display context wiring
//! - [`shaders`]: GPU depth field renderer and its CPU twin
//! - [`config`]: User configuration handling
//! - [`terminal`]: Interactive terminal viewer
//!
//! # Example
//!
//! ```ignore
//! use motion_visualizer::backends::depth::{DepthFrame, DepthPlane, ScreenSize, ScreenTarget};
//! use motion_visualizer::sampler::{TargetSampler, VerticalOrientation};
//!
//! let depth = DepthPlane::packed(4, 4, &[2.5; 16])?;
//! let frame = DepthFrame::new(1, depth, None)?;
//! let sampler = TargetSampler::new(VerticalOrientation::Flipped);
//! let sample = sampler.sample(
//!     ScreenTarget::new(200.0, 200.0),
//!     &frame,
//!     ScreenSize::new(400.0, 400.0),
//! );
//! assert_eq!(sample.distance_m(), Some(2.5));
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod display;
pub mod errors;
pub mod gpu;
pub mod sampler;
pub mod session;
pub mod shaders;
pub mod terminal;

// Re-export commonly used types
pub use backends::depth::{ConfidenceGrade, DepthFrame, ScreenSize, ScreenTarget};
pub use config::Config;
pub use display::{DistanceUnit, RangeReadout, ReadoutSnapshot};
pub use sampler::{DepthSample, TargetSampler, VerticalOrientation};
pub use session::RangingSession;
