// ============================================================================
// GPU RENDERER — wgpu implementation of RenderBackend
// ============================================================================
//
// Owns the canvas texture, an offscreen color target sized to the container,
// and two render pipelines (background fill, textured canvas).  The host
// displays the target (or reads it back for export); tests and the CLI use
// `read_texture` / `read_target`.

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::texture::CanvasTexture;
use super::{aligned_bytes_per_row, unpad_rows};
use crate::canvas::BufferRect;
use crate::render::{DrawParams, RenderBackend, RenderError};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Matches `ViewUniforms` in `CANVAS_SHADER`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ViewUniforms {
    pan: [f32; 2],
    viewport: [f32; 2],
    zoom: f32,
    half_size: f32,
    _pad: [f32; 2],
    color: [f32; 4],
}

impl ViewUniforms {
    fn from_params(p: &DrawParams) -> Self {
        let c = p.background.0;
        Self {
            pan: p.pan,
            viewport: [p.viewport[0].max(1.0), p.viewport[1].max(1.0)],
            zoom: p.zoom,
            half_size: p.half_size,
            _pad: [0.0; 2],
            color: [c[0] as f32 / 255.0, c[1] as f32 / 255.0, c[2] as f32 / 255.0, c[3] as f32 / 255.0],
        }
    }
}

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub struct GpuRenderer {
    pub ctx: GpuContext,
    background_pipeline: wgpu::RenderPipeline,
    canvas_pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_bgl: wgpu::BindGroupLayout,
    sampler_nearest: wgpu::Sampler,
    texture: Option<CanvasTexture>,
    target: Option<RenderTarget>,
    target_size: (u32, u32),
    /// Cached staging buffer for readback, with its size.
    cached_staging: Option<(wgpu::Buffer, u64)>,
    name: String,
}

impl GpuRenderer {
    /// Acquire a device, build both pipelines and allocate a `width`×`height`
    /// target plus an empty `canvas_size` texture.  Any failure here is the
    /// only one reported; frames never retry acquisition.
    pub fn new(preferred_gpu: &str, width: u32, height: u32, canvas_size: u32) -> Result<Self, RenderError> {
        let ctx = GpuContext::new(preferred_gpu)?;
        let device = ctx.device.clone();

        let (background_pipeline, canvas_pipeline, uniform_bgl, texture_bgl) =
            ctx.scoped("canvas pipelines", || Self::create_pipelines(&device))?;

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("view_uniforms"),
            contents: bytemuck::bytes_of(&ViewUniforms::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("view_uniform_bg"),
            layout: &uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        // Pixel art: never interpolate between cells.
        let sampler_nearest = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("canvas_sampler_nearest"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let name = format!("wgpu ({})", ctx.adapter_name);
        let mut renderer = Self {
            ctx,
            background_pipeline,
            canvas_pipeline,
            uniform_buffer,
            uniform_bind_group,
            texture_bgl,
            sampler_nearest,
            texture: None,
            target: None,
            target_size: (width.max(1), height.max(1)),
            cached_staging: None,
            name,
        };
        renderer.ensure_target();
        if !renderer.ctx.supports_size(canvas_size, canvas_size) {
            return Err(RenderError::Resource(format!(
                "canvas size {} exceeds device limit {}",
                canvas_size, renderer.ctx.max_texture_dim
            )));
        }
        renderer.create_texture(canvas_size, &vec![0; canvas_size as usize * canvas_size as usize * 4])?;
        Ok(renderer)
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_name
    }

    /// (Re)allocate the canvas texture.  On failure the old texture is dropped
    /// so nothing stale is drawn.
    fn create_texture(&mut self, size: u32, rgba: &[u8]) -> Result<(), RenderError> {
        self.texture = None;
        if !self.ctx.supports_size(size, size) {
            return Err(RenderError::Resource(format!(
                "canvas size {} exceeds device limit {}",
                size, self.ctx.max_texture_dim
            )));
        }
        let tex = self.ctx.scoped("canvas texture", || {
            CanvasTexture::new(
                &self.ctx.device,
                &self.ctx.queue,
                &self.texture_bgl,
                &self.sampler_nearest,
                size,
                rgba,
            )
        })?;
        self.texture = Some(tex);
        Ok(())
    }

    fn create_pipelines(
        device: &wgpu::Device,
    ) -> (wgpu::RenderPipeline, wgpu::RenderPipeline, wgpu::BindGroupLayout, wgpu::BindGroupLayout) {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("canvas_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::CANVAS_SHADER.into()),
        });

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("view_uniform_bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("canvas_tex_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let background_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("background_pipeline_layout"),
            bind_group_layouts: &[&uniform_bgl],
            push_constant_ranges: &[],
        });
        let canvas_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("canvas_pipeline_layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            push_constant_ranges: &[],
        });

        let make = |label: &str, layout: &wgpu::PipelineLayout, vs: &str, fs: &str, blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: vs,
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: fs,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
            })
        };

        // Background replaces; canvas texels are straight alpha, blended over it.
        let background = make(
            "background_pipeline",
            &background_layout,
            "vs_background",
            "fs_background",
            wgpu::BlendState::REPLACE,
        );
        let canvas = make(
            "canvas_pipeline",
            &canvas_layout,
            "vs_canvas",
            "fs_canvas",
            wgpu::BlendState::ALPHA_BLENDING,
        );

        (background, canvas, uniform_bgl, texture_bgl)
    }

    fn ensure_target(&mut self) {
        let (width, height) = self.target_size;
        if let Some(t) = &self.target {
            if t.width == width && t.height == height {
                return;
            }
        }
        let texture = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("canvas_target"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.target = Some(RenderTarget { texture, view, width, height });
    }

    /// Blocking copy of `texture` into CPU memory (tight rows).
    fn readback(&mut self, texture: &wgpu::Texture, width: u32, height: u32) -> Result<Vec<u8>, RenderError> {
        let device = &self.ctx.device;
        let padded_row = aligned_bytes_per_row(width);
        let buffer_size = (padded_row * height) as u64;

        let need_new = !matches!(&self.cached_staging, Some((_, sz)) if *sz >= buffer_size);
        if need_new {
            let buf = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback_staging"),
                size: buffer_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            self.cached_staging = Some((buf, buffer_size));
        }
        let Some((staging, _)) = &self.cached_staging else {
            return Err(RenderError::Readback("staging buffer missing".into()));
        };

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        );
        self.ctx.submit_one(encoder);

        let slice = staging.slice(..buffer_size);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RenderError::Readback(format!("map error: {:?}", e))),
            Err(e) => return Err(RenderError::Readback(format!("channel error: {:?}", e))),
        }

        let mapped = slice.get_mapped_range();
        let out = unpad_rows(&mapped, width, height, padded_row);
        drop(mapped);
        staging.unmap();
        Ok(out)
    }
}

impl RenderBackend for GpuRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload_full(&mut self, size: u32, rgba: &[u8]) -> Result<(), RenderError> {
        if let Some(tex) = self.texture.as_ref().filter(|t| t.size == size) {
            tex.upload_full(&self.ctx.queue, rgba);
            return Ok(());
        }
        self.create_texture(size, rgba)
    }

    fn upload_rect(&mut self, rect: BufferRect, rgba: &[u8]) {
        match &self.texture {
            Some(tex) => tex.update_rect(&self.ctx.queue, rect, rgba),
            None => log::warn!("upload_rect before the canvas texture exists; ignored"),
        }
    }

    fn resize_target(&mut self, width: u32, height: u32) {
        self.target_size = (width.max(1), height.max(1));
        self.ensure_target();
    }

    fn draw(&mut self, params: &DrawParams) {
        self.ensure_target();
        let Some(target) = &self.target else { return };

        self.ctx
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&ViewUniforms::from_params(params)));

        let mut encoder = self.ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("canvas_draw"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("canvas_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.background_pipeline);
            pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            pass.draw(0..6, 0..1);

            if let Some(tex) = &self.texture {
                pass.set_pipeline(&self.canvas_pipeline);
                pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                pass.set_bind_group(1, &tex.bind_group, &[]);
                pass.draw(0..6, 0..1);
            }
        }
        self.ctx.submit_one(encoder);
    }

    fn read_texture(&mut self) -> Option<Vec<u8>> {
        let tex = self.texture.take()?;
        let result = self.readback(&tex.texture, tex.size, tex.size);
        self.texture = Some(tex);
        result.map_err(|e| log::error!("{}", e)).ok()
    }

    fn read_target(&mut self) -> Option<RgbaImage> {
        let target = self.target.take()?;
        let result = self.readback(&target.texture, target.width, target.height);
        let (w, h) = (target.width, target.height);
        self.target = Some(target);
        let bytes = result.map_err(|e| log::error!("{}", e)).ok()?;
        RgbaImage::from_raw(w, h, bytes)
    }
}
