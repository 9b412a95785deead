// ============================================================================
// GPU CONTEXT — wgpu Device, Queue, and adapter initialization
// ============================================================================

use std::sync::Arc;

use crate::render::RenderError;

/// Core wgpu resources for one renderer.
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_name: String,
    /// Maximum texture dimension supported by this device.
    pub max_texture_dim: u32,
}

impl GpuContext {
    /// Tries a hardware adapter first, then the software rasterizer
    /// (`force_fallback_adapter`).
    pub fn new(preferred_gpu: &str) -> Result<Self, RenderError> {
        match pollster::block_on(Self::new_async(preferred_gpu, false)) {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                log::warn!("Hardware adapter unavailable ({}), trying software fallback", e);
                pollster::block_on(Self::new_async(preferred_gpu, true))
            }
        }
    }

    async fn new_async(preferred_gpu: &str, force_fallback: bool) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let power = match preferred_gpu.to_lowercase().as_str() {
            "low power" | "integrated" => wgpu::PowerPreference::LowPower,
            _ => wgpu::PowerPreference::HighPerformance,
        };

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: power,
                compatible_surface: None, // offscreen only
                force_fallback_adapter: force_fallback,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let adapter_name = adapter.get_info().name.clone();
        let limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Pixlet GPU"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits {
                        max_texture_dimension_2d: limits.max_texture_dimension_2d,
                        ..wgpu::Limits::downlevel_webgl2_defaults()
                    },
                },
                None,
            )
            .await
            .map_err(|e| RenderError::Device(e.to_string()))?;

        log::info!("GPU adapter: {} (fallback={})", adapter_name, force_fallback);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            max_texture_dim: limits.max_texture_dimension_2d,
        })
    }

    pub fn supports_size(&self, width: u32, height: u32) -> bool {
        width <= self.max_texture_dim && height <= self.max_texture_dim
    }

    pub fn submit_one(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Run `f` inside a validation error scope.  Errors wgpu would otherwise
    /// only report through its uncaptured-error handler come back here.
    pub fn scoped<T>(&self, what: &str, f: impl FnOnce() -> T) -> Result<T, RenderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(out),
            Some(e) => Err(RenderError::Resource(format!("{}: {}", what, e))),
        }
    }
}
