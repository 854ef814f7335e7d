// SPDX-License-Identifier: GPL-3.0-only

//! Depth field rendering constants

use crate::gpu::wgpu;

/// GPU format of the depth texture: one float (meters) per pixel
pub const DEPTH_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Format of offscreen renders read back to the CPU
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Bytes per depth texel
pub const DEPTH_TEXEL_SIZE: u32 = 4;

/// The full-screen quad is a 4-vertex triangle strip
pub const FIELD_VERTEX_COUNT: u32 = 4;

/// Color of pixels without a valid reading
pub const INVALID_COLOR: [u8; 4] = [0, 0, 0, 255];
