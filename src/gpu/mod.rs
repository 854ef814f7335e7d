// SPDX-License-Identifier: GPL-3.0-only

//! GPU initialization utilities
//!
//! Creates the wgpu device and queue used by the depth field renderer.
//! Failure here is the fatal setup class: the caller loses field rendering
//! for the session while depth sampling keeps running.

use crate::errors::RenderError;
use std::sync::Arc;
use tracing::{debug, info};

/// Re-export wgpu so renderers share one import path
pub use ::wgpu;

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
    /// Whether `R32Float` textures can be bound as storage (shader write target)
    pub float_storage_textures: bool,
}

/// Create a wgpu device and queue for rendering
///
/// No surface is required: callers render either into a view they own or
/// into an offscreen texture.
pub async fn create_render_device(
    label: &str,
) -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>, GpuDeviceInfo), RenderError> {
    info!(label = label, "Creating GPU device for rendering");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| {
            debug!(error = %e, "Adapter request failed");
            RenderError::NoAdapter
        })?;

    let adapter_info = adapter.get_info();
    let adapter_limits = adapter.limits();
    let float_storage_textures = adapter
        .get_texture_format_features(wgpu::TextureFormat::R32Float)
        .allowed_usages
        .contains(wgpu::TextureUsages::STORAGE_BINDING);

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected for rendering"
    );
    debug!(float_storage_textures, "Depth texture capabilities");

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits,
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| RenderError::DeviceCreation(e.to_string()))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
        float_storage_textures,
    };

    Ok((Arc::new(device), Arc::new(queue), info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_render_device() {
        // This test requires a GPU, so it may be skipped in CI
        match create_render_device("test_device").await {
            Ok((device, queue, info)) => {
                println!("Created device: {:?}", info);
                drop(queue);
                drop(device);
            }
            Err(e) => {
                assert!(e.is_fatal());
                println!("Skipping test (no GPU): {}", e);
            }
        }
    }
}
