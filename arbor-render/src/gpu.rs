//! The wgpu implementation of [`RenderBackend`].
//!
//! Every draw is recorded into its own render pass and submitted at once.
//! The instanced matrix buffer is rewritten for every batch, and queue
//! writes land at the next submit, so submitting per draw keeps each
//! batch paired with its own matrices.  The first pass of a frame clears
//! the target, later passes load it.

use std::iter;
use std::sync::mpsc;

use arbor_core::Viewport;
use image::RgbaImage;
use rustc_hash::FxHashMap;
use wgpu::util::{DeviceExt, TextureDataOrder};
use wgpu::{
    BufferDescriptor, BufferUsages, Color, CommandEncoderDescriptor, Extent3d, LoadOp, MapMode,
    Operations, Origin3d, RenderPass, RenderPassColorAttachment, RenderPassDescriptor, StoreOp,
    SurfaceTexture, TexelCopyBufferInfo, TexelCopyBufferLayout, TexelCopyTextureInfo, Texture,
    TextureAspect, TextureDescriptor, TextureDimension, TextureUsages, TextureView,
    TextureViewDescriptor,
};

use crate::backend::{BatchFlush, BulkLayer, BulkUniform, RenderBackend, TextureId};
use crate::config::RendererConfig;
use crate::context::{GpuContext, COLOR_FORMAT};
use crate::geometry::BulkGeometry;
use crate::pipelines::{BulkPipeline, InstancedPipeline};
use crate::raster::MipChain;
use crate::renderer::{RenderError, Renderer};

/// Node textures, all [`COLOR_FORMAT`] with a full mip chain.
#[derive(Default)]
pub struct TextureStore {
    textures: FxHashMap<TextureId, (Texture, TextureView)>,
    next_id: u64,
}

impl TextureStore {
    fn insert(&mut self, texture: Texture) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        let view = texture.create_view(&TextureViewDescriptor::default());
        self.textures.insert(id, (texture, view));
        id
    }

    pub fn view(&self, id: TextureId) -> Result<&TextureView, RenderError> {
        self.textures
            .get(&id)
            .map(|(_, view)| view)
            .ok_or_else(|| RenderError::Resource(format!("unknown texture {id:?}")))
    }

    fn remove(&mut self, id: TextureId) {
        if let Some((texture, _)) = self.textures.remove(&id) {
            texture.destroy();
        }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// Render target used when there is no surface.
struct OffscreenTarget {
    texture: Texture,
    width: u32,
    height: u32,
}

struct ActiveFrame {
    /// `None` when drawing offscreen.
    surface_texture: Option<SurfaceTexture>,
    view: TextureView,
    cleared: bool,
}

pub struct WgpuBackend {
    gpu: GpuContext,
    instanced: InstancedPipeline,
    bulk: BulkPipeline,
    textures: TextureStore,
    clear_color: Color,
    offscreen: Option<OffscreenTarget>,
    frame: Option<ActiveFrame>,
}

impl WgpuBackend {
    /// Build both pipelines.  Shader failures are fatal.
    pub fn new(gpu: GpuContext, config: &RendererConfig) -> Result<Self, RenderError> {
        let instanced = InstancedPipeline::new(&gpu.device, &gpu.queue, gpu.surface_format)?;
        let bulk = BulkPipeline::new(&gpu.device, gpu.surface_format)?;
        log::info!("wgpu backend ready ({:?})", gpu.surface_format);

        Ok(Self {
            gpu,
            instanced,
            bulk,
            textures: TextureStore::default(),
            clear_color: config.clear_color(),
            offscreen: None,
            frame: None,
        })
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn textures(&self) -> &TextureStore {
        &self.textures
    }

    /// Resize the window surface.  Headless targets follow the viewport.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
    }

    /// View of the offscreen target, creating or resizing it to match.
    fn offscreen_view(&mut self, width: u32, height: u32) -> TextureView {
        let target = match self.offscreen.take() {
            Some(target) if target.width == width && target.height == height => target,
            _ => OffscreenTarget {
                texture: self.gpu.device.create_texture(&TextureDescriptor {
                    label: Some("arbor_offscreen_target"),
                    size: Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: TextureDimension::D2,
                    format: self.gpu.surface_format,
                    usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
                    view_formats: &[],
                }),
                width,
                height,
            },
        };
        let view = target.texture.create_view(&TextureViewDescriptor::default());
        self.offscreen = Some(target);
        view
    }

    /// Copy the offscreen target back to the CPU (headless only).
    pub fn read_target(&self) -> Result<RgbaImage, RenderError> {
        let target = self.offscreen.as_ref().ok_or(RenderError::NoFrame)?;
        let (width, height) = (target.width, target.height);
        let unpadded = width * 4;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let buffer = self.gpu.device.create_buffer(&BufferDescriptor {
            label: Some("arbor_readback"),
            size: u64::from(padded) * u64::from(height),
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.gpu.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("arbor_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            TexelCopyBufferInfo {
                buffer: &buffer,
                layout: TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| RenderError::Resource(e.to_string()))?
            .map_err(|e| RenderError::Resource(e.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| RenderError::Resource("readback size mismatch".into()))
    }
}

/// Record one pass into the frame and submit it.
fn submit_pass(
    gpu: &GpuContext,
    frame: &mut ActiveFrame,
    clear_color: Color,
    label: &str,
    record: impl FnOnce(&mut RenderPass<'_>),
) {
    let load = if frame.cleared {
        LoadOp::Load
    } else {
        LoadOp::Clear(clear_color)
    };
    frame.cleared = true;

    let mut encoder = gpu.device.create_command_encoder(&CommandEncoderDescriptor {
        label: Some("arbor_frame_encoder"),
    });
    {
        let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: &frame.view,
                resolve_target: None,
                ops: Operations {
                    load,
                    store: StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        record(&mut pass);
    }
    gpu.queue.submit(iter::once(encoder.finish()));
}

impl RenderBackend for WgpuBackend {
    fn begin_frame(&mut self, viewport: &Viewport) -> Result<(), RenderError> {
        if self.frame.take().is_some() {
            log::warn!("previous frame was never ended; discarding it");
        }

        let frame = match &self.gpu.surface {
            Some(surface) => {
                let output = surface.get_current_texture()?;
                let view = output.texture.create_view(&TextureViewDescriptor::default());
                ActiveFrame {
                    surface_texture: Some(output),
                    view,
                    cleared: false,
                }
            }
            None => {
                let width = (viewport.width as u32).max(1);
                let height = (viewport.height as u32).max(1);
                ActiveFrame {
                    surface_texture: None,
                    view: self.offscreen_view(width, height),
                    cleared: false,
                }
            }
        };
        self.frame = Some(frame);
        Ok(())
    }

    fn upload_geometry(&mut self, geometry: &BulkGeometry) -> Result<(), RenderError> {
        self.bulk.upload_geometry(&self.gpu.device, geometry);
        Ok(())
    }

    fn draw_geometry(&mut self, layer: BulkLayer, uniform: &BulkUniform) -> Result<(), RenderError> {
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        self.bulk.upload_uniform(&self.gpu.queue, uniform);
        let bulk = &self.bulk;
        submit_pass(&self.gpu, frame, self.clear_color, "arbor_bulk_pass", |pass| {
            bulk.draw(pass, layer)
        });
        Ok(())
    }

    fn max_texture_size(&self) -> u32 {
        self.gpu.max_texture_size()
    }

    fn create_texture(&mut self, mips: &MipChain) -> Result<TextureId, RenderError> {
        let (width, height) = mips.size();
        let limit = self.max_texture_size();
        if width > limit || height > limit {
            return Err(RenderError::TextureTooLarge {
                size: width.max(height),
                limit,
            });
        }

        let data: Vec<u8> = mips
            .levels()
            .iter()
            .flat_map(|level| level.as_raw().iter().copied())
            .collect();
        let texture = self.gpu.device.create_texture_with_data(
            &self.gpu.queue,
            &TextureDescriptor {
                label: Some("node_texture"),
                size: Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: mips.level_count(),
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: COLOR_FORMAT,
                usage: TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
            TextureDataOrder::LayerMajor,
            &data,
        );
        Ok(self.textures.insert(texture))
    }

    fn release_texture(&mut self, id: TextureId) {
        self.textures.remove(id);
    }

    fn draw_instances(&mut self, flush: &BatchFlush<'_>) -> Result<(), RenderError> {
        let frame = self.frame.as_mut().ok_or(RenderError::NoFrame)?;
        let views = flush
            .textures
            .iter()
            .map(|id| self.textures.view(*id))
            .collect::<Result<Vec<_>, _>>()?;

        self.instanced
            .upload(&self.gpu.queue, flush.pan_zoom, flush.matrices);
        let bind_group = self.instanced.bind_textures(&self.gpu.device, &views);
        let count = flush.instance_count() as u32;

        let instanced = &self.instanced;
        submit_pass(&self.gpu, frame, self.clear_color, "arbor_instanced_pass", |pass| {
            instanced.draw(pass, &bind_group, count)
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        let mut frame = self.frame.take().ok_or(RenderError::NoFrame)?;
        if !frame.cleared {
            submit_pass(&self.gpu, &mut frame, self.clear_color, "arbor_clear_pass", |_| {});
        }
        if let Some(output) = frame.surface_texture {
            output.present();
        }
        Ok(())
    }

    fn abort_frame(&mut self) {
        // Dropping an unpresented surface texture discards it.
        self.frame = None;
    }
}

impl Renderer<WgpuBackend> {
    /// Renderer drawing through `gpu`.
    pub fn with_gpu(gpu: GpuContext, config: RendererConfig) -> Result<Self, RenderError> {
        let backend = WgpuBackend::new(gpu, &config)?;
        Ok(Renderer::new(backend, config))
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_creation_headless() {
        let gpu = pollster::block_on(GpuContext::new_headless());
        // No adapter (e.g. CI): skip.
        if let Ok(gpu) = gpu {
            let backend = WgpuBackend::new(gpu, &RendererConfig::default()).unwrap();
            assert!(backend.textures().is_empty());
            assert!(backend.gpu().is_headless());
        }
    }

    #[test]
    fn test_draw_without_frame_is_error() {
        if let Ok(gpu) = pollster::block_on(GpuContext::new_headless()) {
            let mut backend = WgpuBackend::new(gpu, &RendererConfig::default()).unwrap();
            let uniform = BulkUniform::new(&glam::Mat3::IDENTITY, &glam::Mat3::IDENTITY);
            assert!(matches!(
                backend.draw_geometry(BulkLayer::Edges, &uniform),
                Err(RenderError::NoFrame)
            ));
            assert!(matches!(backend.end_frame(), Err(RenderError::NoFrame)));
        }
    }

    #[test]
    fn test_texture_lifecycle() {
        if let Ok(gpu) = pollster::block_on(GpuContext::new_headless()) {
            let mut backend = WgpuBackend::new(gpu, &RendererConfig::default()).unwrap();
            let mips = MipChain::from_base(RgbaImage::new(8, 8));
            let id = backend.create_texture(&mips).unwrap();
            assert_eq!(backend.textures().len(), 1);
            assert!(backend.textures().view(id).is_ok());

            backend.release_texture(id);
            assert!(backend.textures().is_empty());
            assert!(matches!(
                backend.textures().view(id),
                Err(RenderError::Resource(_))
            ));
        }
    }

    #[test]
    fn test_clear_only_frame_reads_back_clear_color() {
        if let Ok(gpu) = pollster::block_on(GpuContext::new_headless()) {
            let config = RendererConfig {
                clear_color: [0.0, 0.0, 1.0, 1.0],
                ..RendererConfig::default()
            };
            let mut backend = WgpuBackend::new(gpu, &config).unwrap();
            backend.begin_frame(&Viewport::new(4.0, 4.0)).unwrap();
            backend.end_frame().unwrap();

            let image = backend.read_target().unwrap();
            assert_eq!(image.dimensions(), (4, 4));
            assert_eq!(image.get_pixel(2, 2).0, [0, 0, 255, 255]);
        }
    }
}
