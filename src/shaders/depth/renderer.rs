// SPDX-License-Identifier: GPL-3.0-only

//! GPU depth field renderer
//!
//! Keeps an `R32Float` texture in lock-step with incoming depth frames and
//! draws it through a full-screen triangle strip with a false-color fragment
//! stage. Per tick the order is always update-then-draw.
//!
//! Pipeline construction happens once and its failure is fatal for the
//! renderer; everything per frame (missing frame, missing drawable,
//! oversized frame) skips the tick instead.

use super::constants::{
    DEPTH_TEXEL_SIZE, DEPTH_TEXTURE_FORMAT, FIELD_VERTEX_COUNT, OFFSCREEN_FORMAT,
};
use super::visualization::FieldStyle;
use crate::backends::depth::{DepthFrame, DepthPlane, PlaneView};
use crate::config::Colormap;
use crate::constants::SLOW_UPLOAD_THRESHOLD;
use crate::errors::RenderError;
use crate::gpu::{self, GpuDeviceInfo, wgpu};
use crate::sampler::VerticalOrientation;
use crate::shaders::gpu_processor::{CachedDimensions, padded_bytes_per_row, read_buffer_async};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// False-color shader source
pub const DEPTH_FIELD_SHADER: &str = include_str!("depth_field.wgsl");

/// Uniform buffer for shader parameters
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FieldParams {
    min_depth: f32,
    max_depth: f32,
    grayscale: u32,
    bands: u32,
    flip_rows: u32,
    _pad: [u32; 3],
}

impl FieldParams {
    pub fn from_style(style: &FieldStyle) -> Self {
        Self {
            min_depth: style.range.min_m,
            max_depth: style.range.max_m,
            grayscale: u32::from(style.colormap == Colormap::Grayscale),
            bands: style.bands,
            flip_rows: u32::from(style.orientation == VerticalOrientation::Flipped),
            _pad: [0; 3],
        }
    }
}

/// Why a tick drew nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No current frame this tick
    NoFrame,
    /// No target view to draw into
    NoDrawable,
    /// The frame could not be uploaded (e.g. over the texture size limit)
    UploadFailed,
}

/// Outcome of one render tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTick {
    Drawn { sequence: u64 },
    Skipped(SkipReason),
}

/// Creates depth textures of a given size
pub trait TextureAllocator {
    type Texture;

    fn allocate(&mut self, width: u32, height: u32) -> Self::Texture;
}

/// The single depth texture, recreated whenever the frame size changes
pub struct DepthTextureCache<A: TextureAllocator> {
    allocator: A,
    texture: Option<A::Texture>,
    dims: CachedDimensions,
    allocations: u64,
}

impl<A: TextureAllocator> DepthTextureCache<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            texture: None,
            dims: CachedDimensions::default(),
            allocations: 0,
        }
    }

    /// Texture sized exactly `width x height`, and whether it was just allocated
    ///
    /// A size change drops the old texture before allocating the new one;
    /// textures are never resized in place.
    pub fn ensure(&mut self, width: u32, height: u32) -> (&A::Texture, bool) {
        let reallocate = self.texture.is_none() || self.dims.needs_update(width, height);
        if reallocate {
            if self.texture.take().is_some() {
                debug!(
                    old_width = self.dims.width,
                    old_height = self.dims.height,
                    width,
                    height,
                    "Depth frame resized, replacing texture"
                );
            }
            self.dims.update(width, height);
            self.allocations += 1;
        }
        let allocator = &mut self.allocator;
        let texture = self
            .texture
            .get_or_insert_with(|| allocator.allocate(width, height));
        (texture, reallocate)
    }

    pub fn texture(&self) -> Option<&A::Texture> {
        self.texture.as_ref()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.texture
            .as_ref()
            .map(|_| (self.dims.width, self.dims.height))
    }

    /// Textures allocated so far
    pub fn allocations(&self) -> u64 {
        self.allocations
    }
}

/// Allocates `R32Float` depth textures on a wgpu device
pub struct GpuTextureAllocator {
    device: Arc<wgpu::Device>,
    usage: wgpu::TextureUsages,
}

impl GpuTextureAllocator {
    pub fn new(device: Arc<wgpu::Device>, storage: bool) -> Self {
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if storage {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        Self { device, usage }
    }
}

impl TextureAllocator for GpuTextureAllocator {
    type Texture = wgpu::Texture;

    fn allocate(&mut self, width: u32, height: u32) -> wgpu::Texture {
        debug!(width, height, "Allocating depth texture");
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Field Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_TEXTURE_FORMAT,
            usage: self.usage,
            view_formats: &[],
        })
    }
}

/// How a depth plane reaches the texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadLayout {
    /// Plane memory copied as-is, the texture copy skipping row padding
    Direct { bytes_per_row: u32 },
    /// Rows repacked tightly first; unreadable cells become NaN
    Repacked,
}

/// Pick the upload path for a plane
///
/// The direct path needs a texel-aligned stride no shorter than a row and a
/// buffer that actually holds every row the stride implies.
pub fn plan_upload(plane: &DepthPlane) -> UploadLayout {
    let (width, height) = plane.dimensions();
    let row_bytes = width as usize * DEPTH_TEXEL_SIZE as usize;
    let stride = plane.stride();
    let required = stride
        .checked_mul(height.saturating_sub(1) as usize)
        .and_then(|bytes| bytes.checked_add(row_bytes));

    match (u32::try_from(stride), required) {
        (Ok(bytes_per_row), Some(required))
            if stride >= row_bytes
                && stride % DEPTH_TEXEL_SIZE as usize == 0
                && required <= plane.buffer().len() =>
        {
            UploadLayout::Direct { bytes_per_row }
        }
        _ => UploadLayout::Repacked,
    }
}

/// Copy a plane's rows into `out`, tightly packed
///
/// Whole rows are copied when they fit; otherwise each cell goes through the
/// checked accessor and unreadable cells are written as NaN.
pub fn repack_rows(view: &PlaneView<'_, f32>, out: &mut Vec<u8>) {
    let plane = view.plane();
    let (width, height) = plane.dimensions();
    let row_bytes = width as usize * DEPTH_TEXEL_SIZE as usize;
    let stride = plane.stride();
    let bytes = view.bytes();

    out.clear();
    out.reserve(row_bytes * height as usize);
    for row in 0..height {
        let whole_row = (stride >= row_bytes)
            .then(|| (row as usize).checked_mul(stride))
            .flatten()
            .and_then(|start| bytes.get(start..start.checked_add(row_bytes)?));
        match whole_row {
            Some(src) => out.extend_from_slice(src),
            None => {
                for col in 0..width {
                    let value = view.read(row, col).unwrap_or(f32::NAN);
                    out.extend_from_slice(&value.to_ne_bytes());
                }
            }
        }
    }
}

/// Result of a texture update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureUpdate {
    pub width: u32,
    pub height: u32,
    /// A new texture was allocated for this frame
    pub reallocated: bool,
    pub layout: UploadLayout,
    pub elapsed: Duration,
}

struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    buffer: wgpu::Buffer,
    dims: CachedDimensions,
    padded_row: u32,
}

/// GPU renderer for the full depth field
pub struct FieldRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuDeviceInfo,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    bind_group: Option<wgpu::BindGroup>,
    textures: DepthTextureCache<GpuTextureAllocator>,
    output_format: wgpu::TextureFormat,
    style: FieldStyle,
    upload_scratch: Vec<u8>,
    offscreen: Option<OffscreenTarget>,
}

impl FieldRenderer {
    /// Create a renderer on its own device, drawing into `output_format` targets
    pub async fn new(
        output_format: wgpu::TextureFormat,
        style: FieldStyle,
    ) -> Result<Self, RenderError> {
        let (device, queue, info) = gpu::create_render_device("Depth Field").await?;
        Self::with_device(device, queue, info, output_format, style).await
    }

    /// Create a renderer for offscreen RGBA readback
    pub async fn new_offscreen(style: FieldStyle) -> Result<Self, RenderError> {
        Self::new(OFFSCREEN_FORMAT, style).await
    }

    /// Create a renderer on an existing device
    pub async fn with_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        info: GpuDeviceInfo,
        output_format: wgpu::TextureFormat,
        style: FieldStyle,
    ) -> Result<Self, RenderError> {
        Self::build(device, queue, info, output_format, style, DEPTH_FIELD_SHADER).await
    }

    async fn build(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        info: GpuDeviceInfo,
        output_format: wgpu::TextureFormat,
        style: FieldStyle,
        shader_source: &str,
    ) -> Result<Self, RenderError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Depth Field Shader"),
            source: wgpu::ShaderSource::Wgsl(shader_source.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Depth Field Bind Group Layout"),
            entries: &[
                // Depth texture (R32Float is not filterable, read with textureLoad)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Depth Field Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Depth Field Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader_module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                strip_index_format: None,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader_module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: output_format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Depth Field Params Buffer"),
            size: std::mem::size_of::<FieldParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if let Some(error) = device.pop_error_scope().await {
            warn!(error = %error, "Depth field pipeline construction failed");
            return Err(RenderError::PipelineCreation(error.to_string()));
        }

        queue.write_buffer(
            &params_buffer,
            0,
            bytemuck::bytes_of(&FieldParams::from_style(&style)),
        );

        info!(
            adapter_name = %info.adapter_name,
            format = ?output_format,
            "Depth field renderer ready"
        );

        let textures = DepthTextureCache::new(GpuTextureAllocator::new(
            Arc::clone(&device),
            info.float_storage_textures,
        ));

        Ok(Self {
            device,
            queue,
            info,
            pipeline,
            bind_group_layout,
            params_buffer,
            bind_group: None,
            textures,
            output_format,
            style,
            upload_scratch: Vec::new(),
            offscreen: None,
        })
    }

    pub fn device_info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    pub fn style(&self) -> &FieldStyle {
        &self.style
    }

    /// Change colors, range or orientation; applies from the next draw
    pub fn set_style(&mut self, style: FieldStyle) {
        self.style = style;
        self.queue.write_buffer(
            &self.params_buffer,
            0,
            bytemuck::bytes_of(&FieldParams::from_style(&style)),
        );
    }

    /// The current depth texture, if any frame was uploaded yet
    pub fn texture(&self) -> Option<&wgpu::Texture> {
        self.textures.texture()
    }

    /// Depth textures allocated so far (one per size change)
    pub fn texture_allocations(&self) -> u64 {
        self.textures.allocations()
    }

    /// Bring the depth texture up to date with `frame`
    ///
    /// Reallocates when the frame size changed, then copies the depth rows
    /// honoring the plane stride. The plane stays locked only for the copy.
    pub fn update_texture(&mut self, frame: &DepthFrame) -> Result<TextureUpdate, RenderError> {
        let (width, height) = (frame.width(), frame.height());
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(RenderError::FrameTooLarge { width, height, max });
        }

        let started = Instant::now();
        let layout = plan_upload(frame.depth());
        let (texture, reallocated) = self.textures.ensure(width, height);
        if reallocated {
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Depth Field Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: self.params_buffer.as_entire_binding(),
                    },
                ],
            }));
        }

        let destination = wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        };
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        {
            let view = frame.depth().lock();
            match layout {
                UploadLayout::Direct { bytes_per_row } => {
                    self.queue.write_texture(
                        destination,
                        view.bytes(),
                        wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(bytes_per_row),
                            rows_per_image: Some(height),
                        },
                        size,
                    );
                }
                UploadLayout::Repacked => {
                    debug!(
                        sequence = frame.sequence(),
                        stride = frame.depth().stride(),
                        "Repacking depth rows for upload"
                    );
                    repack_rows(&view, &mut self.upload_scratch);
                    self.queue.write_texture(
                        destination,
                        &self.upload_scratch,
                        wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(width * DEPTH_TEXEL_SIZE),
                            rows_per_image: Some(height),
                        },
                        size,
                    );
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed > SLOW_UPLOAD_THRESHOLD {
            warn!(
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                width,
                height,
                "Slow depth texture upload, may stutter"
            );
        }

        Ok(TextureUpdate {
            width,
            height,
            reallocated,
            layout,
            elapsed,
        })
    }

    fn encode_draw(&self, target: &wgpu::TextureView, encoder: &mut wgpu::CommandEncoder) -> bool {
        let Some(bind_group) = &self.bind_group else {
            return false;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Depth Field Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..FIELD_VERTEX_COUNT, 0..1);
        true
    }

    /// One tick: update the texture from `frame`, then draw into `target`
    ///
    /// `target` must use the format the renderer was built for. A missing
    /// frame or target skips the tick; nothing is queued for later.
    pub fn render(
        &mut self,
        frame: Option<&DepthFrame>,
        target: Option<&wgpu::TextureView>,
    ) -> RenderTick {
        let Some(frame) = frame else {
            return RenderTick::Skipped(SkipReason::NoFrame);
        };
        if let Err(e) = self.update_texture(frame) {
            warn!(sequence = frame.sequence(), error = %e, "Skipping depth field tick");
            return RenderTick::Skipped(SkipReason::UploadFailed);
        }
        let Some(target) = target else {
            debug!(sequence = frame.sequence(), "No drawable, skipping draw");
            return RenderTick::Skipped(SkipReason::NoDrawable);
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Depth Field Encoder"),
            });
        if !self.encode_draw(target, &mut encoder) {
            return RenderTick::Skipped(SkipReason::NoFrame);
        }
        self.queue.submit(Some(encoder.finish()));

        RenderTick::Drawn {
            sequence: frame.sequence(),
        }
    }

    fn ensure_offscreen(&mut self, width: u32, height: u32) {
        if self
            .offscreen
            .as_ref()
            .is_some_and(|o| !o.dims.needs_update(width, height))
        {
            return;
        }

        debug!(width, height, "Allocating offscreen depth field target");
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Field Offscreen Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.output_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let padded_row = padded_bytes_per_row(width, 4);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Depth Field Readback Buffer"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        self.offscreen = Some(OffscreenTarget {
            texture,
            view,
            buffer,
            dims: CachedDimensions::new(width, height),
            padded_row,
        });
    }

    /// Render `frame` offscreen at `width x height` and read back RGBA
    pub async fn render_to_rgba(
        &mut self,
        frame: &DepthFrame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyFrame);
        }
        if self.output_format != OFFSCREEN_FORMAT {
            return Err(RenderError::Readback(format!(
                "renderer targets {:?}, offscreen readback needs {:?}",
                self.output_format, OFFSCREEN_FORMAT
            )));
        }
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(RenderError::FrameTooLarge { width, height, max });
        }

        self.update_texture(frame)?;
        self.ensure_offscreen(width, height);
        let Some(offscreen) = self.offscreen.as_ref() else {
            return Err(RenderError::Readback("offscreen target missing".to_string()));
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Depth Field Offscreen Encoder"),
            });
        if !self.encode_draw(&offscreen.view, &mut encoder) {
            return Err(RenderError::Readback("no depth texture bound".to_string()));
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &offscreen.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &offscreen.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(offscreen.padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let padded = read_buffer_async(&self.device, &offscreen.buffer)
            .await
            .map_err(RenderError::Readback)?;

        let row_bytes = width as usize * 4;
        let mut rgba = Vec::with_capacity(row_bytes * height as usize);
        for row in padded.chunks_exact(offscreen.padded_row as usize) {
            rgba.extend_from_slice(&row[..row_bytes]);
        }
        Ok(rgba)
    }
}
