// SPDX-License-Identifier: GPL-3.0-only

//! Depth field rendering
//!
//! GPU path ([`FieldRenderer`]) and the matching CPU colormap
//! ([`depth_to_rgba`]) for hosts without a usable GPU.

mod constants;
mod renderer;
mod visualization;

pub use constants::*;
pub use renderer::{
    DEPTH_FIELD_SHADER, DepthTextureCache, FieldParams, FieldRenderer, GpuTextureAllocator,
    RenderTick, SkipReason, TextureAllocator, TextureUpdate, UploadLayout, plan_upload,
    repack_rows,
};
pub use visualization::{FieldStyle, depth_to_rgba, turbo};
