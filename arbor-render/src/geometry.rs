//! Bulk geometry: every flat node as a coloured quad and every edge as a
//! line segment, in one pair of static vertex buffers.
//!
//! Built from the z-ordered element list in a single pass.  The buffers are
//! only rebuilt when the renderer has been invalidated; otherwise the last
//! upload is drawn again as-is.

use arbor_core::{EdgeSnapshot, Element, NodeSnapshot};
use bytemuck::{Pod, Zeroable};
use wgpu::{BufferAddress, VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode};

/// Vertices per node quad (two triangles).
pub const VERTICES_PER_NODE: usize = 6;
/// Vertices per edge segment.
pub const VERTICES_PER_EDGE: usize = 2;

/// Position plus straight-alpha RGBA.  24 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq)]
pub struct ColorVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

impl ColorVertex {
    pub const fn new(x: f32, y: f32, color: [f32; 4]) -> Self {
        Self {
            position: [x, y],
            color,
        }
    }

    /// Attributes at the locations reflected from the bulk program.
    pub fn attributes(position_location: u32, color_location: u32) -> [VertexAttribute; 2] {
        [
            VertexAttribute {
                offset: 0,
                shader_location: position_location,
                format: VertexFormat::Float32x2,
            },
            VertexAttribute {
                offset: 8,
                shader_location: color_location,
                format: VertexFormat::Float32x4,
            },
        ]
    }

    pub fn layout(attributes: &[VertexAttribute]) -> VertexBufferLayout<'_> {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<ColorVertex>() as BufferAddress,
            step_mode: VertexStepMode::Vertex,
            attributes,
        }
    }
}

/// CPU-side bulk vertex arrays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkGeometry {
    node_vertices: Vec<ColorVertex>,
    edge_vertices: Vec<ColorVertex>,
    node_count: usize,
    edge_count: usize,
}

impl BulkGeometry {
    /// Partition `elements` into node quads and edge segments, keeping
    /// their relative order.
    pub fn build<'a>(elements: impl IntoIterator<Item = &'a Element>) -> Self {
        let mut geometry = Self::default();
        for element in elements {
            match element {
                Element::Node(node) => geometry.push_node(node),
                Element::Edge(edge) => geometry.push_edge(edge),
            }
        }
        geometry
    }

    fn push_node(&mut self, node: &NodeSnapshot) {
        let color = node.color.with_opacity(node.opacity);

        let half_w = node.outer_width() / 2.0;
        let half_h = node.outer_height() / 2.0;
        let top = node.position.y + half_h;
        let bottom = node.position.y - half_h;
        let left = node.position.x - half_w;
        let right = node.position.x + half_w;

        self.node_vertices.extend_from_slice(&[
            ColorVertex::new(left, bottom, color),
            ColorVertex::new(right, bottom, color),
            ColorVertex::new(right, top, color),
            ColorVertex::new(left, bottom, color),
            ColorVertex::new(right, top, color),
            ColorVertex::new(left, top, color),
        ]);
        self.node_count += 1;
    }

    fn push_edge(&mut self, edge: &EdgeSnapshot) {
        let color = edge.color.with_opacity(edge.opacity);
        self.edge_vertices.extend_from_slice(&[
            ColorVertex::new(edge.source.x, edge.source.y, color),
            ColorVertex::new(edge.target.x, edge.target.y, color),
        ]);
        self.edge_count += 1;
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn node_vertex_count(&self) -> usize {
        self.node_count * VERTICES_PER_NODE
    }

    pub fn edge_vertex_count(&self) -> usize {
        self.edge_count * VERTICES_PER_EDGE
    }

    pub fn node_vertices(&self) -> &[ColorVertex] {
        &self.node_vertices
    }

    pub fn edge_vertices(&self) -> &[ColorVertex] {
        &self.edge_vertices
    }

    pub fn node_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.node_vertices)
    }

    pub fn edge_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.edge_vertices)
    }

    pub fn is_empty(&self) -> bool {
        self.node_count == 0 && self.edge_count == 0
    }
}
