//! GPU context: owns `wgpu::Device`, `Queue`, and optional `Surface`.
//!
//! Two construction paths:
//!
//! 1. **Headless** (`GpuContext::new_headless`): no window; frames go to
//!    an offscreen target.  Used for tests, benchmarks and CI.
//!
//! 2. **Windowed** (`GpuContext::new_with_surface`): renders into a
//!    window surface.  Used by `arbor-desktop`.

use thiserror::Error;
use wgpu::{
    Adapter, Device, DeviceDescriptor, Instance, InstanceDescriptor, Queue,
    RequestAdapterOptions, Surface, SurfaceConfiguration, TextureFormat, TextureUsages,
};

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("Failed to request device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("Surface error: {0}")]
    Surface(String),
}

/// Format of node textures and of the headless target.
///
/// Targets and textures are both non-sRGB: colours are stored as given
/// and blending happens on the stored values, so the flat and textured
/// paths produce the same bytes for the same `Rgb`.
pub const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Device, queue and (optionally) the window surface.
pub struct GpuContext {
    pub device: Device,
    pub queue: Queue,
    pub adapter: Adapter,
    /// Present only when rendering to a window.
    pub surface: Option<Surface<'static>>,
    pub surface_config: Option<SurfaceConfiguration>,
    /// Colour format every pipeline targets.
    pub surface_format: TextureFormat,
}

impl GpuContext {
    /// Create a headless context (no window, no surface).
    pub async fn new_headless() -> Result<Self, GpuError> {
        let instance = Instance::new(&InstanceDescriptor::default());
        let adapter = request_adapter(&instance, None).await?;
        let (device, queue) = request_device(&adapter, "arbor-headless").await?;

        Ok(Self {
            device,
            queue,
            adapter,
            surface: None,
            surface_config: None,
            // RGBA so offscreen frames read back without swizzling.
            surface_format: COLOR_FORMAT,
        })
    }

    /// Create a context with a surface attached to `window`.
    ///
    /// `window` must outlive the returned context; passing an
    /// `Arc<winit::window::Window>` satisfies that.
    pub async fn new_with_surface<W>(window: W, width: u32, height: u32) -> Result<Self, GpuError>
    where
        W: wgpu::WasmNotSendSync + Into<wgpu::SurfaceTarget<'static>>,
    {
        let instance = Instance::new(&InstanceDescriptor::default());

        let surface = instance
            .create_surface(window)
            .map_err(|e| GpuError::Surface(e.to_string()))?;

        let adapter = request_adapter(&instance, Some(&surface)).await?;
        let (device, queue) = request_device(&adapter, "arbor-windowed").await?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first())
            .copied()
            .ok_or_else(|| GpuError::Surface("surface reports no formats".into()))?;
        // Alpha blending over a transparent clear leaves premultiplied output.
        let alpha_mode = caps
            .alpha_modes
            .iter()
            .find(|m| **m == wgpu::CompositeAlphaMode::PreMultiplied)
            .or_else(|| caps.alpha_modes.first())
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::Fifo, // VSync
            desired_maximum_frame_latency: 2,
            alpha_mode,
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        log::info!("surface configured: {format:?} {}x{}", config.width, config.height);

        Ok(Self {
            device,
            queue,
            adapter,
            surface: Some(surface),
            surface_config: Some(config),
            surface_format: format,
        })
    }

    /// Resize the surface.  No-op if headless or for a zero size.
    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(config) = &mut self.surface_config {
            if width == 0 || height == 0 {
                return;
            }
            config.width = width;
            config.height = height;
            if let Some(surface) = &self.surface {
                surface.configure(&self.device, config);
            }
        }
    }

    /// Current surface dimensions, or `(0, 0)` if headless.
    pub fn surface_size(&self) -> (u32, u32) {
        self.surface_config
            .as_ref()
            .map(|c| (c.width, c.height))
            .unwrap_or((0, 0))
    }

    pub fn is_headless(&self) -> bool {
        self.surface.is_none()
    }

    /// Largest texture edge the device accepts.
    pub fn max_texture_size(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }
}

async fn request_adapter(instance: &Instance, surface: Option<&Surface<'_>>) -> Result<Adapter, GpuError> {
    let adapter = instance
        .request_adapter(&RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .ok_or(GpuError::NoAdapter)?;
    log::info!("using adapter: {}", adapter.get_info().name);
    Ok(adapter)
}

async fn request_device(adapter: &Adapter, label: &str) -> Result<(Device, Queue), GpuError> {
    let device = adapter
        .request_device(
            &DeviceDescriptor {
                label: Some(label),
                ..Default::default()
            },
            None,
        )
        .await?;
    Ok(device)
}

// ===================================================================
// Tests
// ===================================================================
