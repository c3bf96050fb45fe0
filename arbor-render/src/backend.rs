//! The seam between frame orchestration and the GPU.
//!
//! [`Renderer`](crate::renderer::Renderer) only talks to a
//! [`RenderBackend`].  [`WgpuBackend`](crate::gpu::WgpuBackend) is the real
//! one; [`RecordingBackend`] keeps a log of calls instead of drawing, which
//! is what the tests assert on and what a caller can use to dry-run a
//! frame without a device.

use arbor_core::Viewport;
use bytemuck::{Pod, Zeroable};
use glam::Mat3;

use crate::geometry::BulkGeometry;
use crate::raster::MipChain;
use crate::renderer::RenderError;
use crate::transform::{mat3_to_std140, MATRIX_SIZE};

/// Handle to a texture owned by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Which half of the bulk geometry to draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BulkLayer {
    Edges,
    Nodes,
}

/// Bulk program uniforms.  96 bytes, two padded `mat3x3<f32>`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct BulkUniform {
    pub transform: [[f32; 4]; 3],
    pub projection: [[f32; 4]; 3],
}

impl BulkUniform {
    pub fn new(transform: &Mat3, projection: &Mat3) -> Self {
        Self {
            transform: mat3_to_std140(transform),
            projection: mat3_to_std140(projection),
        }
    }
}

/// Everything one instanced draw needs.  `matrices[i]` and
/// `textures[i]` belong to instance `i`.
#[derive(Debug)]
pub struct BatchFlush<'a> {
    pub pan_zoom: &'a Mat3,
    pub matrices: &'a [[f32; MATRIX_SIZE]],
    pub textures: &'a [TextureId],
}

impl BatchFlush<'_> {
    pub fn instance_count(&self) -> usize {
        self.textures.len()
    }
}

pub trait RenderBackend {
    /// Acquire the frame target and set the viewport.
    fn begin_frame(&mut self, viewport: &Viewport) -> Result<(), RenderError>;

    /// Replace the bulk vertex buffers.
    fn upload_geometry(&mut self, geometry: &BulkGeometry) -> Result<(), RenderError>;

    fn draw_geometry(&mut self, layer: BulkLayer, uniform: &BulkUniform) -> Result<(), RenderError>;

    /// Largest texture edge the backend accepts.  Checked before a
    /// texture is rasterised.
    fn max_texture_size(&self) -> u32;

    /// Upload a texture with its full mip chain.
    fn create_texture(&mut self, mips: &MipChain) -> Result<TextureId, RenderError>;

    fn release_texture(&mut self, id: TextureId);

    /// One instanced draw of the unit quad, `flush.instance_count()` times.
    fn draw_instances(&mut self, flush: &BatchFlush<'_>) -> Result<(), RenderError>;

    /// Present whatever was drawn.
    fn end_frame(&mut self) -> Result<(), RenderError>;

    /// Drop the frame without presenting it.
    fn abort_frame(&mut self);
}

/// A call observed by [`RecordingBackend`].
#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    BeginFrame,
    UploadGeometry {
        node_vertices: usize,
        edge_vertices: usize,
    },
    DrawGeometry {
        layer: BulkLayer,
        vertex_count: usize,
    },
    CreateTexture {
        id: TextureId,
        size: u32,
    },
    ReleaseTexture(TextureId),
    DrawInstances {
        instances: usize,
        textures: Vec<TextureId>,
        matrices: Vec<[f32; MATRIX_SIZE]>,
    },
    EndFrame,
    AbortFrame,
}

/// Backend that records calls instead of touching a GPU.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    next_texture: u64,
    live_textures: usize,
    node_vertices: usize,
    edge_vertices: usize,
    /// Fail `create_texture` once this many textures have been created.
    pub texture_budget: Option<usize>,
    /// Texture edge limit; unlimited when `None`.
    pub texture_limit: Option<u32>,
    /// Last uploaded geometry bytes, for determinism checks.
    pub last_node_bytes: Vec<u8>,
    pub last_edge_bytes: Vec<u8>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn live_textures(&self) -> usize {
        self.live_textures
    }

    /// Instance counts of every instanced draw so far, in order.
    pub fn flush_sizes(&self) -> Vec<usize> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::DrawInstances { instances, .. } => Some(*instances),
                _ => None,
            })
            .collect()
    }
}

impl RenderBackend for RecordingBackend {
    fn begin_frame(&mut self, _viewport: &Viewport) -> Result<(), RenderError> {
        self.calls.push(BackendCall::BeginFrame);
        Ok(())
    }

    fn upload_geometry(&mut self, geometry: &BulkGeometry) -> Result<(), RenderError> {
        self.node_vertices = geometry.node_vertex_count();
        self.edge_vertices = geometry.edge_vertex_count();
        self.last_node_bytes = geometry.node_bytes().to_vec();
        self.last_edge_bytes = geometry.edge_bytes().to_vec();
        self.calls.push(BackendCall::UploadGeometry {
            node_vertices: self.node_vertices,
            edge_vertices: self.edge_vertices,
        });
        Ok(())
    }

    fn draw_geometry(&mut self, layer: BulkLayer, _uniform: &BulkUniform) -> Result<(), RenderError> {
        let vertex_count = match layer {
            BulkLayer::Edges => self.edge_vertices,
            BulkLayer::Nodes => self.node_vertices,
        };
        self.calls.push(BackendCall::DrawGeometry { layer, vertex_count });
        Ok(())
    }

    fn max_texture_size(&self) -> u32 {
        self.texture_limit.unwrap_or(u32::MAX)
    }

    fn create_texture(&mut self, mips: &MipChain) -> Result<TextureId, RenderError> {
        if self
            .texture_budget
            .is_some_and(|budget| self.next_texture as usize >= budget)
        {
            return Err(RenderError::Resource("texture budget exhausted".into()));
        }
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        self.live_textures += 1;
        self.calls.push(BackendCall::CreateTexture {
            id,
            size: mips.size().0,
        });
        Ok(id)
    }

    fn release_texture(&mut self, id: TextureId) {
        self.live_textures = self.live_textures.saturating_sub(1);
        self.calls.push(BackendCall::ReleaseTexture(id));
    }

    fn draw_instances(&mut self, flush: &BatchFlush<'_>) -> Result<(), RenderError> {
        self.calls.push(BackendCall::DrawInstances {
            instances: flush.instance_count(),
            textures: flush.textures.to_vec(),
            matrices: flush.matrices.to_vec(),
        });
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        self.calls.push(BackendCall::EndFrame);
        Ok(())
    }

    fn abort_frame(&mut self) {
        self.calls.push(BackendCall::AbortFrame);
    }
}
