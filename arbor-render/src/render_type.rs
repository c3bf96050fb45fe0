//! Render types: per-category policy for drawing nodes.
//!
//! A render type is registered once under a name.  Nodes whose
//! `render_type` names a [`RenderStrategy::Textured`] entry go through the
//! instanced batcher; everything else is drawn flat by the bulk path.

use std::hash::{Hash, Hasher};

use arbor_core::{BoundingBox, NodeSnapshot, Point, Rgb};
use rustc_hash::{FxHashMap, FxHasher};

use crate::raster::RasterCanvas;
use crate::renderer::RenderError;

/// Texture edge length used when a render type does not pick one.
pub const DEFAULT_TEXTURE_SIZE: u32 = 1024;

/// Opaque style key.  Equal fingerprints share one texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = FxHasher::default();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// Policy bundle for one textured node category.
///
/// Only `key` and `draw` are required; the geometric accessors default
/// to the values carried by the snapshot.
pub trait NodeRenderType: Send + Sync {
    /// Style fingerprint of `node`.  Must change whenever `draw` would
    /// produce different pixels.
    fn key(&self, node: &NodeSnapshot) -> Fingerprint;

    /// Paint `node` into `canvas` in box-local coordinates
    /// (`0..bb.w × 0..bb.h`).
    fn draw(&self, canvas: &mut RasterCanvas, node: &NodeSnapshot, bb: &BoundingBox);

    fn bounding_box(&self, node: &NodeSnapshot) -> BoundingBox {
        node.bounding_box()
    }

    fn rotation(&self, node: &NodeSnapshot) -> f32 {
        node.rotation
    }

    fn rotation_point(&self, node: &NodeSnapshot) -> Point {
        node.rotation_point
    }

    fn rotation_offset(&self, node: &NodeSnapshot) -> Point {
        node.rotation_offset
    }

    /// Edge length of the square texture, in pixels.  `None` uses the
    /// renderer's configured default.
    fn texture_size(&self) -> Option<u32> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    Rectangle,
    Ellipse,
}

/// Built-in render type: a filled shape in the node colour with an
/// optional border.
#[derive(Clone, Debug)]
pub struct SolidNode {
    pub shape: Shape,
    pub border: Option<(Rgb, f32)>,
    pub texture_size: Option<u32>,
}

impl SolidNode {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            border: None,
            texture_size: None,
        }
    }

    pub fn with_border(mut self, color: Rgb, width: f32) -> Self {
        self.border = Some((color, width));
        self
    }

    pub fn with_texture_size(mut self, size: u32) -> Self {
        self.texture_size = Some(size);
        self
    }
}

impl NodeRenderType for SolidNode {
    fn key(&self, node: &NodeSnapshot) -> Fingerprint {
        // The fill stretches over the box. A border is drawn in box units,
        // so its share of the texture depends on the box size.
        let border = self.border.map(|(c, w)| {
            let bb = self.bounding_box(node);
            (c, w.to_bits(), bb.w.to_bits(), bb.h.to_bits())
        });
        Fingerprint::of(&(
            &node.render_type,
            self.shape,
            node.color,
            node.opacity.to_bits(),
            border,
        ))
    }

    fn draw(&self, canvas: &mut RasterCanvas, node: &NodeSnapshot, bb: &BoundingBox) {
        let fill = node.color.with_opacity(node.opacity);
        match self.shape {
            Shape::Rectangle => canvas.fill_rect(0.0, 0.0, bb.w, bb.h, fill),
            Shape::Ellipse => canvas.fill_ellipse(0.0, 0.0, bb.w, bb.h, fill),
        }
        if let Some((color, width)) = self.border {
            canvas.stroke_rect(0.0, 0.0, bb.w, bb.h, width, color.with_opacity(node.opacity));
        }
    }

    fn texture_size(&self) -> Option<u32> {
        self.texture_size
    }
}

/// How nodes of one render type are drawn.
pub enum RenderStrategy {
    /// Rasterised once per fingerprint, drawn through the instanced batcher.
    Textured(Box<dyn NodeRenderType>),
    /// Untextured, unrotated quad in the bulk geometry buffer.
    FlatColor,
}

impl RenderStrategy {
    pub fn textured(render_type: impl NodeRenderType + 'static) -> Self {
        Self::Textured(Box::new(render_type))
    }

    pub fn is_textured(&self) -> bool {
        matches!(self, Self::Textured(_))
    }
}

impl std::fmt::Debug for RenderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Textured(t) => write!(f, "Textured(texture_size={:?})", t.texture_size()),
            Self::FlatColor => write!(f, "FlatColor"),
        }
    }
}

static FLAT_COLOR: RenderStrategy = RenderStrategy::FlatColor;

/// Name → strategy map.  Immutable per entry once registered, except
/// for explicit replacement.
#[derive(Debug, Default)]
pub struct RenderTypeRegistry {
    types: FxHashMap<String, RenderStrategy>,
}

impl RenderTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy` under `name`.
    ///
    /// Replacing a textured type with one of a different texture size is
    /// rejected: textures already cached for it would have the wrong
    /// resolution.
    pub fn register(&mut self, name: &str, strategy: RenderStrategy) -> Result<(), RenderError> {
        if let (Some(RenderStrategy::Textured(old)), RenderStrategy::Textured(new)) =
            (self.types.get(name), &strategy)
        {
            if old.texture_size() != new.texture_size() {
                return Err(RenderError::ConflictingRenderType {
                    name: name.to_string(),
                    existing: old.texture_size(),
                    requested: new.texture_size(),
                });
            }
        }

        if self.types.insert(name.to_string(), strategy).is_some() {
            log::warn!("render type '{name}' replaced");
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RenderStrategy> {
        self.types.get(name)
    }

    /// Strategy for `node`; unregistered types draw flat.
    pub fn strategy_for(&self, node: &NodeSnapshot) -> &RenderStrategy {
        self.types.get(&node.render_type).unwrap_or(&FLAT_COLOR)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(Fingerprint::of("circle"), Fingerprint::of("circle"));
        assert_ne!(Fingerprint::of("circle"), Fingerprint::of("square"));
    }

    #[test]
    fn test_solid_key_ignores_size_but_not_color() {
        let solid = SolidNode::new(Shape::Ellipse);
        let small = NodeSnapshot::new(0.0, 0.0, 10.0, 10.0).with_color(Rgb::new(255, 0, 0));
        let large = NodeSnapshot::new(50.0, 50.0, 80.0, 30.0).with_color(Rgb::new(255, 0, 0));
        let blue = NodeSnapshot::new(0.0, 0.0, 10.0, 10.0).with_color(Rgb::new(0, 0, 255));

        assert_eq!(solid.key(&small), solid.key(&large));
        assert_ne!(solid.key(&small), solid.key(&blue));
        assert_ne!(solid.key(&small), solid.key(&small.clone().with_opacity(0.5)));
    }

    #[test]
    fn test_bordered_key_includes_box_size() {
        let solid = SolidNode::new(Shape::Rectangle).with_border(Rgb::new(255, 255, 255), 3.0);
        let small = NodeSnapshot::new(0.0, 0.0, 30.0, 30.0).with_color(Rgb::new(0, 0, 255));
        let large = NodeSnapshot::new(0.0, 0.0, 300.0, 300.0).with_color(Rgb::new(0, 0, 255));
        let moved = NodeSnapshot::new(90.0, 40.0, 30.0, 30.0).with_color(Rgb::new(0, 0, 255));

        assert_ne!(solid.key(&small), solid.key(&large));
        assert_eq!(solid.key(&small), solid.key(&moved));
    }

    #[test]
    fn test_default_accessors_read_snapshot() {
        let solid = SolidNode::new(Shape::Rectangle);
        let node = NodeSnapshot::new(10.0, 10.0, 4.0, 2.0).with_rotation(
            1.0,
            Point::new(1.0, 2.0),
            Point::new(3.0, 4.0),
        );
        assert_eq!(solid.rotation(&node), 1.0);
        assert_eq!(solid.rotation_point(&node), Point::new(1.0, 2.0));
        assert_eq!(solid.rotation_offset(&node), Point::new(3.0, 4.0));
        assert_eq!(solid.bounding_box(&node), node.bounding_box());
        assert_eq!(solid.texture_size(), None);
    }

    #[test]
    fn test_unregistered_type_is_flat() {
        let registry = RenderTypeRegistry::new();
        let node = NodeSnapshot::new(0.0, 0.0, 1.0, 1.0).with_render_type("mystery");
        assert!(!registry.strategy_for(&node).is_textured());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_conflicting_texture_size_rejected() {
        let mut registry = RenderTypeRegistry::new();
        registry
            .register("round", RenderStrategy::textured(SolidNode::new(Shape::Ellipse)))
            .unwrap();

        let same = SolidNode::new(Shape::Rectangle);
        assert!(registry.register("round", RenderStrategy::textured(same)).is_ok());

        let bigger = SolidNode::new(Shape::Ellipse).with_texture_size(2048);
        let err = registry
            .register("round", RenderStrategy::textured(bigger))
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::ConflictingRenderType { existing: None, requested: Some(2048), .. }
        ));
        assert_eq!(registry.len(), 1);
    }
}
