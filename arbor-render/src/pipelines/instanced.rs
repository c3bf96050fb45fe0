//! Instanced node pipeline: textured unit quads, one texture per instance.
//!
//! The fragment stage declares one texture binding per instance slot and
//! picks among them with the instance index, so its source is generated
//! from [`MAX_INSTANCES`].

use std::fmt::Write as _;

use glam::Mat3;
use wgpu::util::{BufferInitDescriptor, DeviceExt, TextureDataOrder};
use wgpu::{
    AddressMode, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout,
    BindGroupLayoutDescriptor, BindGroupLayoutEntry, BindingResource, BindingType, BlendState,
    Buffer, BufferAddress, BufferBindingType, BufferDescriptor, BufferUsages, ColorTargetState,
    ColorWrites, Device, Extent3d, FilterMode, FragmentState, FrontFace, MultisampleState,
    PipelineCompilationOptions, PipelineLayoutDescriptor, PolygonMode, PrimitiveState,
    PrimitiveTopology, Queue, RenderPass, RenderPipeline, RenderPipelineDescriptor, Sampler,
    SamplerBindingType, SamplerDescriptor, ShaderStages, TextureDescriptor, TextureDimension,
    TextureFormat, TextureSampleType, TextureUsages, TextureView, TextureViewDescriptor,
    TextureViewDimension, VertexAttribute, VertexBufferLayout, VertexFormat, VertexState,
    VertexStepMode,
};

use crate::batch::MAX_INSTANCES;
use crate::context::COLOR_FORMAT;
use crate::program::{ProgramError, ShaderProgram};
use crate::transform::{mat3_to_std140, MATRIX_SIZE};

const VERTEX_SOURCE: &str = include_str!("../shaders/instanced.vert.wgsl");

/// Unit quad as two triangles; also used as texture coordinates.
const UNIT_QUAD: [[f32; 2]; 6] = [
    [0.0, 0.0],
    [0.0, 1.0],
    [1.0, 0.0],
    [1.0, 0.0],
    [0.0, 1.0],
    [1.0, 1.0],
];

const MATRIX_STRIDE: BufferAddress = (MATRIX_SIZE * std::mem::size_of::<f32>()) as BufferAddress;

/// WGSL fragment stage selecting among `texture_count` textures by
/// instance id.
pub fn fragment_source(texture_count: usize) -> String {
    let mut src = String::from(
        "// Generated: one texture binding per instance slot.\n\n\
         @group(1) @binding(0) var u_sampler: sampler;\n",
    );
    for i in 0..texture_count {
        let _ = writeln!(src, "@group(1) @binding({}) var u_texture_{i}: texture_2d<f32>;", i + 1);
    }
    src.push_str(
        "\nstruct FragmentInput {\n\
         \x20   @location(0) tex_coord: vec2<f32>,\n\
         \x20   @location(1) @interpolate(flat) tex_id: u32,\n\
         };\n\n\
         @fragment\n\
         fn fs_main(in: FragmentInput) -> @location(0) vec4<f32> {\n\
         \x20   let ddx = dpdx(in.tex_coord);\n\
         \x20   let ddy = dpdy(in.tex_coord);\n",
    );
    let last = texture_count.saturating_sub(1);
    for i in 0..last {
        let _ = writeln!(
            src,
            "    if in.tex_id == {i}u {{ return textureSampleGrad(u_texture_{i}, u_sampler, in.tex_coord, ddx, ddy); }}"
        );
    }
    let _ = writeln!(
        src,
        "    return textureSampleGrad(u_texture_{last}, u_sampler, in.tex_coord, ddx, ddy);\n}}"
    );
    src
}

/// Compile and link the instanced program.
pub fn program() -> Result<ShaderProgram, ProgramError> {
    ShaderProgram::compile("instanced", VERTEX_SOURCE, &fragment_source(MAX_INSTANCES))
}

/// Owns the wgpu pipeline, buffers and sampler for instanced nodes.
pub struct InstancedPipeline {
    pipeline: RenderPipeline,

    // Shared geometry
    quad_buffer: Buffer,
    tex_coord_buffer: Buffer,

    // Per-instance matrices
    matrix_buffer: Buffer,

    // Pan-zoom
    pan_zoom_buffer: Buffer,
    pan_zoom_bind_group: BindGroup,

    // Textures
    texture_layout: BindGroupLayout,
    sampler: Sampler,
    placeholder: TextureView,
    sampler_binding: u32,
    texture_bindings: Vec<u32>,
}

impl InstancedPipeline {
    /// Create the pipeline and allocate GPU buffers.
    pub fn new(device: &Device, queue: &Queue, target_format: TextureFormat) -> Result<Self, ProgramError> {
        // ── Shader ──────────────────────────────────────────────
        let program = program()?;
        let (vs, fs) = program.create_modules(device);

        let position = program.attribute("position")?;
        let tex_coord = program.attribute("tex_coord")?;
        let matrix_columns = [
            program.attribute("node_matrix_0")?,
            program.attribute("node_matrix_1")?,
            program.attribute("node_matrix_2")?,
        ];
        let pan_zoom_slot = program.resource("u_pan_zoom")?;
        let sampler_binding = program.resource("u_sampler")?.binding;
        let texture_bindings = (0..MAX_INSTANCES)
            .map(|i| program.resource(&format!("u_texture_{i}")).map(|slot| slot.binding))
            .collect::<Result<Vec<_>, _>>()?;

        // ── Bind group layouts ──────────────────────────────────
        let pan_zoom_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("pan_zoom_bgl"),
            entries: &[BindGroupLayoutEntry {
                binding: pan_zoom_slot.binding,
                visibility: ShaderStages::VERTEX,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let mut texture_entries = vec![BindGroupLayoutEntry {
            binding: sampler_binding,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Sampler(SamplerBindingType::Filtering),
            count: None,
        }];
        texture_entries.extend(texture_bindings.iter().map(|&binding| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        }));
        let texture_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("node_textures_bgl"),
            entries: &texture_entries,
        });

        // ── Pipeline ────────────────────────────────────────────
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("instanced_pipeline_layout"),
            bind_group_layouts: &[&pan_zoom_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let position_attr = [VertexAttribute {
            offset: 0,
            shader_location: position,
            format: VertexFormat::Float32x2,
        }];
        let tex_coord_attr = [VertexAttribute {
            offset: 0,
            shader_location: tex_coord,
            format: VertexFormat::Float32x2,
        }];
        let matrix_attrs = [0, 1, 2].map(|column| VertexAttribute {
            offset: column as BufferAddress * 12,
            shader_location: matrix_columns[column],
            format: VertexFormat::Float32x3,
        });
        let quad_stride = std::mem::size_of::<[f32; 2]>() as BufferAddress;

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("instanced_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &vs,
                entry_point: Some(program.vertex_entry_point()),
                compilation_options: PipelineCompilationOptions::default(),
                buffers: &[
                    VertexBufferLayout {
                        array_stride: quad_stride,
                        step_mode: VertexStepMode::Vertex,
                        attributes: &position_attr,
                    },
                    VertexBufferLayout {
                        array_stride: quad_stride,
                        step_mode: VertexStepMode::Vertex,
                        attributes: &tex_coord_attr,
                    },
                    VertexBufferLayout {
                        array_stride: MATRIX_STRIDE,
                        step_mode: VertexStepMode::Instance,
                        attributes: &matrix_attrs,
                    },
                ],
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
                topology: PrimitiveTopology::TriangleList,
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
        });

        // ── Buffers ─────────────────────────────────────────────
        let quad_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("unit_quad_vb"),
            contents: bytemuck::cast_slice(&UNIT_QUAD),
            usage: BufferUsages::VERTEX,
        });
        let tex_coord_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("unit_tex_coord_vb"),
            contents: bytemuck::cast_slice(&UNIT_QUAD),
            usage: BufferUsages::VERTEX,
        });
        let matrix_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("node_matrices"),
            size: MAX_INSTANCES as BufferAddress * MATRIX_STRIDE,
            usage: BufferUsages::VERTEX | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let pan_zoom_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("pan_zoom_ub"),
            size: std::mem::size_of::<[[f32; 4]; 3]>() as BufferAddress,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let pan_zoom_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("pan_zoom_bg"),
            layout: &pan_zoom_layout,
            entries: &[BindGroupEntry {
                binding: pan_zoom_slot.binding,
                resource: pan_zoom_buffer.as_entire_binding(),
            }],
        });

        // ── Sampling ────────────────────────────────────────────
        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("node_sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Nearest,
            ..Default::default()
        });

        // Bound in slots past the instance count.
        let placeholder = device
            .create_texture_with_data(
                queue,
                &TextureDescriptor {
                    label: Some("placeholder_texture"),
                    size: Extent3d {
                        width: 1,
                        height: 1,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: TextureDimension::D2,
                    format: COLOR_FORMAT,
                    usage: TextureUsages::TEXTURE_BINDING,
                    view_formats: &[],
                },
                TextureDataOrder::LayerMajor,
                &[0, 0, 0, 0],
            )
            .create_view(&TextureViewDescriptor::default());

        log::debug!("instanced pipeline created ({MAX_INSTANCES} texture slots)");

        Ok(Self {
            pipeline,
            quad_buffer,
            tex_coord_buffer,
            matrix_buffer,
            pan_zoom_buffer,
            pan_zoom_bind_group,
            texture_layout,
            sampler,
            placeholder,
            sampler_binding,
            texture_bindings,
        })
    }

    // ───────────────────── Upload ─────────────────────────────────

    /// Upload the pan-zoom uniform and the populated matrix slots.
    pub fn upload(&self, queue: &Queue, pan_zoom: &Mat3, matrices: &[[f32; MATRIX_SIZE]]) {
        queue.write_buffer(
            &self.pan_zoom_buffer,
            0,
            bytemuck::cast_slice(&mat3_to_std140(pan_zoom)),
        );
        let count = matrices.len().min(MAX_INSTANCES);
        if count > 0 {
            queue.write_buffer(&self.matrix_buffer, 0, bytemuck::cast_slice(&matrices[..count]));
        }
    }

    /// Bind group with `views[i]` in texture slot `i`.  Unused slots get
    /// the placeholder.
    pub fn bind_textures(&self, device: &Device, views: &[&TextureView]) -> BindGroup {
        let mut entries = Vec::with_capacity(MAX_INSTANCES + 1);
        entries.push(BindGroupEntry {
            binding: self.sampler_binding,
            resource: BindingResource::Sampler(&self.sampler),
        });
        for (slot, &binding) in self.texture_bindings.iter().enumerate() {
            let view = views.get(slot).copied().unwrap_or(&self.placeholder);
            entries.push(BindGroupEntry {
                binding,
                resource: BindingResource::TextureView(view),
            });
        }
        device.create_bind_group(&BindGroupDescriptor {
            label: Some("node_textures_bg"),
            layout: &self.texture_layout,
            entries: &entries,
        })
    }

    // ───────────────────── Draw ───────────────────────────────────

    /// One instanced draw of the unit quad, `count` times.
    pub fn draw(&self, pass: &mut RenderPass<'_>, textures: &BindGroup, count: u32) {
        if count == 0 {
            return;
        }
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.pan_zoom_bind_group, &[]);
        pass.set_bind_group(1, textures, &[]);
        pass.set_vertex_buffer(0, self.quad_buffer.slice(..));
        pass.set_vertex_buffer(1, self.tex_coord_buffer.slice(..));
        pass.set_vertex_buffer(2, self.matrix_buffer.slice(..));
        pass.draw(0..UNIT_QUAD.len() as u32, 0..count.min(MAX_INSTANCES as u32));
    }
}
