//! # arbor-core
//!
//! Read-only snapshots of graph elements as the renderer consumes them.
//!
//! Style resolution happens elsewhere: every value here is already
//! resolved (colours in 0-255, opacity in 0-1, rotation in radians).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod graph;

pub use graph::{Graph, GraphError};

/// Render type used by nodes that never asked for a specific one.
pub const DEFAULT_RENDER_TYPE: &str = "node";

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in model (graph) space, `x1`/`y1` being the top-left.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, w: f32, h: f32) -> Self {
        Self { x1, y1, w, h }
    }

    pub fn x2(&self) -> f32 {
        self.x1 + self.w
    }

    pub fn y2(&self) -> f32 {
        self.y1 + self.h
    }

    pub fn center(&self) -> Point {
        Point::new(self.x1 + self.w / 2.0, self.y1 + self.h / 2.0)
    }
}

/// 8-bit RGB colour as produced by the style resolver.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channels normalised to `[0, 1]`.
    pub fn to_f32(self) -> [f32; 3] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        ]
    }

    /// Channels normalised to `[0, 1]` with `opacity` as alpha.
    pub fn with_opacity(self, opacity: f32) -> [f32; 4] {
        let [r, g, b] = self.to_f32();
        [r, g, b, opacity.clamp(0.0, 1.0)]
    }
}

/// Per-frame view of a node.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct NodeSnapshot {
    pub id: Uuid,
    /// Name of the render type registered with the renderer.
    pub render_type: String,
    /// Centre of the node.
    pub position: Point,
    pub width: f32,
    pub height: f32,
    pub padding: f32,
    pub color: Rgb,
    pub opacity: f32,
    /// Rotation in radians.
    pub rotation: f32,
    pub rotation_point: Point,
    pub rotation_offset: Point,
}

impl NodeSnapshot {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            render_type: DEFAULT_RENDER_TYPE.to_string(),
            position: Point::new(x, y),
            width,
            height,
            padding: 0.0,
            color: Rgb::default(),
            opacity: 1.0,
            rotation: 0.0,
            rotation_point: Point::new(x, y),
            rotation_offset: Point::new(-width / 2.0, -height / 2.0),
        }
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding;
        self.rotation_offset = Point::new(-self.outer_width() / 2.0, -self.outer_height() / 2.0);
        self
    }

    pub fn with_render_type(mut self, render_type: impl Into<String>) -> Self {
        self.render_type = render_type.into();
        self
    }

    /// Rotate about `pivot`; after rotating, the box is drawn from `offset`.
    pub fn with_rotation(mut self, angle: f32, pivot: Point, offset: Point) -> Self {
        self.rotation = angle;
        self.rotation_point = pivot;
        self.rotation_offset = offset;
        self
    }

    pub fn outer_width(&self) -> f32 {
        self.width + 2.0 * self.padding
    }

    pub fn outer_height(&self) -> f32 {
        self.height + 2.0 * self.padding
    }

    /// Padded box centred on `position`.
    pub fn bounding_box(&self) -> BoundingBox {
        let w = self.outer_width();
        let h = self.outer_height();
        BoundingBox::new(self.position.x - w / 2.0, self.position.y - h / 2.0, w, h)
    }
}

/// Per-frame view of an edge with its endpoints already resolved.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct EdgeSnapshot {
    pub id: Uuid,
    pub source: Point,
    pub target: Point,
    pub color: Rgb,
    pub opacity: f32,
}

impl EdgeSnapshot {
    pub fn new(source: Point, target: Point) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            target,
            color: Rgb::new(128, 128, 128),
            opacity: 1.0,
        }
    }

    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub enum Element {
    Node(NodeSnapshot),
    Edge(EdgeSnapshot),
}

impl Element {
    pub fn is_node(&self) -> bool {
        matches!(self, Element::Node(_))
    }

    pub fn id(&self) -> Uuid {
        match self {
            Element::Node(n) => n.id,
            Element::Edge(e) => e.id,
        }
    }
}

/// Camera and canvas state for one frame.
///
/// `width`/`height` are canvas pixels (already multiplied by the
/// device pixel ratio); `pan` and `zoom` are in CSS/logical units.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct Viewport {
    pub pan: Point,
    pub zoom: f32,
    pub pixel_ratio: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            pan: Point::default(),
            zoom: 1.0,
            pixel_ratio: 1.0,
            width,
            height,
        }
    }

    pub fn with_pan_zoom(mut self, pan: Point, zoom: f32) -> Self {
        self.pan = pan;
        self.zoom = zoom;
        self
    }

    pub fn with_pixel_ratio(mut self, pixel_ratio: f32) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    /// Convert a canvas pixel position to model coordinates.
    pub fn canvas_to_model(&self, x: f32, y: f32) -> Point {
        let zoom = self.zoom * self.pixel_ratio;
        Point::new(
            (x - self.pan.x * self.pixel_ratio) / zoom,
            (y - self.pan.y * self.pixel_ratio) / zoom,
        )
    }
}
