//! Bulk pipeline: flat-coloured node quads and edge lines.
//!
//! Both layers share one program and uniform; they differ only in
//! topology.  Vertex buffers are replaced wholesale on rebuild and drawn
//! unchanged on every other frame.

use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, BlendState, Buffer, BufferAddress, BufferBindingType,
    BufferDescriptor, BufferUsages, ColorTargetState, ColorWrites, Device, FragmentState,
    FrontFace, MultisampleState, PipelineCompilationOptions, PipelineLayoutDescriptor,
    PolygonMode, PrimitiveState, PrimitiveTopology, Queue, RenderPass, RenderPipeline,
    RenderPipelineDescriptor, ShaderStages, TextureFormat, VertexState,
};

use crate::backend::{BulkLayer, BulkUniform};
use crate::geometry::{BulkGeometry, ColorVertex};
use crate::program::{ProgramError, ShaderProgram};

const VERTEX_SOURCE: &str = include_str!("../shaders/bulk.vert.wgsl");
const FRAGMENT_SOURCE: &str = include_str!("../shaders/bulk.frag.wgsl");

pub fn program() -> Result<ShaderProgram, ProgramError> {
    ShaderProgram::compile("bulk", VERTEX_SOURCE, FRAGMENT_SOURCE)
}

/// A static vertex buffer and how many vertices it holds.
struct LayerBuffer {
    buffer: Option<Buffer>,
    vertex_count: u32,
}

impl LayerBuffer {
    const EMPTY: Self = Self {
        buffer: None,
        vertex_count: 0,
    };

    fn replace(&mut self, device: &Device, label: &str, bytes: &[u8], vertex_count: usize) {
        self.vertex_count = vertex_count as u32;
        self.buffer = (vertex_count > 0).then(|| {
            device.create_buffer_init(&BufferInitDescriptor {
                label: Some(label),
                contents: bytes,
                usage: BufferUsages::VERTEX,
            })
        });
    }
}

pub struct BulkPipeline {
    triangles: RenderPipeline,
    lines: RenderPipeline,

    nodes: LayerBuffer,
    edges: LayerBuffer,

    uniform_buffer: Buffer,
    bind_group: BindGroup,
}

impl BulkPipeline {
    pub fn new(device: &Device, target_format: TextureFormat) -> Result<Self, ProgramError> {
        // ── Shader ──────────────────────────────────────────────
        let program = program()?;
        let (vs, fs) = program.create_modules(device);
        let attributes = ColorVertex::attributes(program.attribute("position")?, program.attribute("color")?);
        let matrices = program.resource("u_matrices")?;

        // ── Uniforms ────────────────────────────────────────────
        let layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("bulk_matrices_bgl"),
            entries: &[BindGroupLayoutEntry {
                binding: matrices.binding,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let uniform_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("bulk_matrices_ub"),
            size: std::mem::size_of::<BulkUniform>() as BufferAddress,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("bulk_matrices_bg"),
            layout: &layout,
            entries: &[BindGroupEntry {
                binding: matrices.binding,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("bulk_pipeline_layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        // ── Pipelines ───────────────────────────────────────────
        let create = |label: &str, topology: PrimitiveTopology| {
            device.create_render_pipeline(&RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: VertexState {
                    module: &vs,
                    entry_point: Some(program.vertex_entry_point()),
                    compilation_options: PipelineCompilationOptions::default(),
                    buffers: &[ColorVertex::layout(&attributes)],
                },
                fragment: Some(FragmentState {
                    module: &fs,
                    entry_point: Some(program.fragment_entry_point()),
                    compilation_options: PipelineCompilationOptions::default(),
                    targets: &[Some(ColorTargetState {
                        format: target_format,
                        blend: Some(BlendState::ALPHA_BLENDING),
                        write_mask: ColorWrites::ALL,
                    })],
                }),
                primitive: PrimitiveState {
                    topology,
                    strip_index_format: None,
                    front_face: FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        Ok(Self {
            triangles: create("bulk_nodes_pipeline", PrimitiveTopology::TriangleList),
            lines: create("bulk_edges_pipeline", PrimitiveTopology::LineList),
            nodes: LayerBuffer::EMPTY,
            edges: LayerBuffer::EMPTY,
            uniform_buffer,
            bind_group,
        })
    }

    // ───────────────────── Upload ─────────────────────────────────

    /// Replace both vertex buffers.
    pub fn upload_geometry(&mut self, device: &Device, geometry: &BulkGeometry) {
        self.nodes.replace(
            device,
            "bulk_nodes_vb",
            geometry.node_bytes(),
            geometry.node_vertex_count(),
        );
        self.edges.replace(
            device,
            "bulk_edges_vb",
            geometry.edge_bytes(),
            geometry.edge_vertex_count(),
        );
    }

    pub fn upload_uniform(&self, queue: &Queue, uniform: &BulkUniform) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniform));
    }

    pub fn vertex_count(&self, layer: BulkLayer) -> u32 {
        match layer {
            BulkLayer::Edges => self.edges.vertex_count,
            BulkLayer::Nodes => self.nodes.vertex_count,
        }
    }

    // ───────────────────── Draw ───────────────────────────────────

    pub fn draw(&self, pass: &mut RenderPass<'_>, layer: BulkLayer) {
        let (pipeline, buffer) = match layer {
            BulkLayer::Edges => (&self.lines, &self.edges),
            BulkLayer::Nodes => (&self.triangles, &self.nodes),
        };
        let Some(vertices) = &buffer.buffer else {
            return;
        };

        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.draw(0..buffer.vertex_count, 0..1);
    }
}
