// SPDX-License-Identifier: GPL-3.0-only
//! Shaders and GPU resource helpers
//!
//! The depth field shader is the single source of truth for the false-color
//! ramp; the CPU colormap in [`depth`] mirrors it.

pub mod depth;
mod gpu_processor;

pub use gpu_processor::{CachedDimensions, padded_bytes_per_row, read_buffer_async};

pub use depth::{FieldRenderer, FieldStyle, RenderTick, SkipReason, depth_to_rgba};
