// ============================================================================
// CANVAS TEXTURE — GPU-side copy of the pixel buffer with partial upload
// ============================================================================

use crate::canvas::BufferRect;

/// Square RGBA8 texture mirroring a `PixelBuffer`.
///
/// Strokes only touch a few cells per frame, so `update_rect` uploads just the
/// dirty sub-rectangle through `queue.write_texture`.
pub struct CanvasTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
    pub size: u32,
}

impl CanvasTexture {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        bind_group_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        size: u32,
        data: &[u8],
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("CanvasTexture"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CanvasTexture bind group"),
            layout: bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        let tex = Self { texture, view, bind_group, size };
        tex.upload_full(queue, data);
        tex
    }

    /// Upload packed RGBA rows for `rect` only.
    pub fn update_rect(&self, queue: &wgpu::Queue, rect: BufferRect, data: &[u8]) {
        let (w, h) = (rect.width(), rect.height());
        debug_assert_eq!(data.len(), (w * h * 4) as usize);

        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: rect.min_x, y: rect.min_y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * w),
                rows_per_image: Some(h),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn upload_full(&self, queue: &wgpu::Queue, data: &[u8]) {
        let all = BufferRect { min_x: 0, min_y: 0, max_x: self.size - 1, max_y: self.size - 1 };
        self.update_rect(queue, all, data);
    }
}
