//! Fingerprint → texture cache.
//!
//! A miss rasterises the node into a square canvas of the render type's
//! resolution, builds the mip chain and uploads it through the backend.
//! Capacity is configurable; `None` keeps every texture for the lifetime
//! of the renderer.  Bounded caches never hold fewer than
//! [`MAX_INSTANCES`] entries, so textures referenced by the pending batch
//! are always among the most recently used and survive eviction.

use std::num::NonZeroUsize;

use arbor_core::NodeSnapshot;
use lru::LruCache;

use crate::backend::{RenderBackend, TextureId};
use crate::batch::MAX_INSTANCES;
use crate::raster::RasterCanvas;
use crate::render_type::{Fingerprint, NodeRenderType, DEFAULT_TEXTURE_SIZE};
use crate::renderer::RenderError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct TextureCache {
    entries: LruCache<Fingerprint, TextureId>,
    default_size: u32,
    stats: CacheStats,
}

impl TextureCache {
    pub fn new(capacity: Option<usize>) -> Self {
        let entries = capacity
            .and_then(|c| NonZeroUsize::new(c.max(MAX_INSTANCES)))
            .map_or_else(LruCache::unbounded, LruCache::new);
        Self {
            entries,
            default_size: DEFAULT_TEXTURE_SIZE,
            stats: CacheStats::default(),
        }
    }

    /// Resolution for render types that do not choose one.
    pub fn with_default_size(mut self, size: u32) -> Self {
        self.default_size = size;
        self
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Texture for `node`, creating it on first use of its fingerprint.
    pub fn get_texture<B: RenderBackend + ?Sized>(
        &mut self,
        node: &NodeSnapshot,
        render_type: &dyn NodeRenderType,
        backend: &mut B,
    ) -> Result<TextureId, RenderError> {
        let key = render_type.key(node);
        if let Some(id) = self.entries.get(&key) {
            self.stats.hits += 1;
            return Ok(*id);
        }
        self.stats.misses += 1;

        let bb = render_type.bounding_box(node);
        let size = render_type.texture_size().unwrap_or(self.default_size);
        let limit = backend.max_texture_size();
        if size > limit {
            return Err(RenderError::TextureTooLarge { size, limit });
        }
        let mut canvas = RasterCanvas::for_box(size, &bb);
        render_type.draw(&mut canvas, node, &bb);
        let id = backend.create_texture(&canvas.into_mip_chain())?;

        if let Some((evicted_key, evicted)) = self.entries.push(key, id) {
            if evicted_key != key {
                self.stats.evictions += 1;
                log::debug!("texture cache evicted {evicted_key:?}");
                backend.release_texture(evicted);
            }
        }
        Ok(id)
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Edge length for render types without their own size.
    pub fn default_size(&self) -> u32 {
        self.default_size
    }

    /// `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        let cap = self.entries.cap().get();
        (cap != usize::MAX).then_some(cap)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Release every cached texture.
    pub fn clear<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        while let Some((_, id)) = self.entries.pop_lru() {
            backend.release_texture(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::render_type::{Shape, SolidNode};
    use arbor_core::Rgb;

    fn node(color: Rgb) -> NodeSnapshot {
        NodeSnapshot::new(0.0, 0.0, 20.0, 10.0).with_color(color)
    }

    fn solid() -> SolidNode {
        SolidNode::new(Shape::Rectangle).with_texture_size(8)
    }

    #[test]
    fn test_same_fingerprint_same_handle() {
        let mut cache = TextureCache::unbounded();
        let mut backend = RecordingBackend::new();
        let rt = solid();

        let a = cache.get_texture(&node(Rgb::new(255, 0, 0)), &rt, &mut backend).unwrap();
        let b = cache.get_texture(&node(Rgb::new(255, 0, 0)), &rt, &mut backend).unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.live_textures(), 1);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1, evictions: 0 });
    }

    #[test]
    fn test_different_fingerprints_never_share() {
        let mut cache = TextureCache::unbounded();
        let mut backend = RecordingBackend::new();
        let rt = solid();

        let red = cache.get_texture(&node(Rgb::new(255, 0, 0)), &rt, &mut backend).unwrap();
        let blue = cache.get_texture(&node(Rgb::new(0, 0, 255)), &rt, &mut backend).unwrap();
        assert_ne!(red, blue);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&rt.key(&node(Rgb::new(0, 0, 255)))));
    }

    #[test]
    fn test_texture_uses_render_type_resolution() {
        let mut cache = TextureCache::unbounded();
        let mut backend = RecordingBackend::new();
        cache.get_texture(&node(Rgb::new(1, 2, 3)), &solid(), &mut backend).unwrap();
        assert_eq!(
            backend.calls(),
            &[BackendCall::CreateTexture { id: TextureId(0), size: 8 }]
        );
    }

    #[test]
    fn test_default_size_applies_to_unsized_types() {
        let mut cache = TextureCache::unbounded().with_default_size(16);
        let mut backend = RecordingBackend::new();
        let rt = SolidNode::new(Shape::Ellipse);
        cache.get_texture(&node(Rgb::new(1, 2, 3)), &rt, &mut backend).unwrap();
        assert_eq!(
            backend.calls(),
            &[BackendCall::CreateTexture { id: TextureId(0), size: 16 }]
        );
    }

    #[test]
    fn test_capacity_is_at_least_batch_limit() {
        assert_eq!(TextureCache::new(Some(2)).capacity(), Some(MAX_INSTANCES));
        assert_eq!(TextureCache::new(Some(64)).capacity(), Some(64));
        assert_eq!(TextureCache::unbounded().capacity(), None);
    }

    #[test]
    fn test_lru_eviction_releases_texture() {
        let mut cache = TextureCache::new(Some(MAX_INSTANCES));
        let mut backend = RecordingBackend::new();
        let rt = solid();

        for i in 0..=MAX_INSTANCES as u8 {
            cache.get_texture(&node(Rgb::new(i, 0, 0)), &rt, &mut backend).unwrap();
        }
        assert_eq!(cache.len(), MAX_INSTANCES);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(backend.live_textures(), MAX_INSTANCES);
        assert!(backend
            .calls()
            .contains(&BackendCall::ReleaseTexture(TextureId(0))));
        assert!(!cache.contains(&rt.key(&node(Rgb::new(0, 0, 0)))));
    }

    #[test]
    fn test_failed_upload_is_not_cached() {
        let mut cache = TextureCache::unbounded();
        let mut backend = RecordingBackend::new();
        backend.texture_budget = Some(0);
        let result = cache.get_texture(&node(Rgb::new(9, 9, 9)), &solid(), &mut backend);
        assert!(matches!(result, Err(RenderError::Resource(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_releases_all() {
        let mut cache = TextureCache::unbounded();
        let mut backend = RecordingBackend::new();
        for i in 0..3 {
            cache.get_texture(&node(Rgb::new(i, i, i)), &solid(), &mut backend).unwrap();
        }
        cache.clear(&mut backend);
        assert!(cache.is_empty());
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_bordered_nodes_of_different_sizes_get_own_textures() {
        let mut cache = TextureCache::unbounded();
        let mut backend = RecordingBackend::new();
        let rt = SolidNode::new(Shape::Rectangle)
            .with_border(Rgb::new(255, 255, 255), 3.0)
            .with_texture_size(64);
        let small = NodeSnapshot::new(0.0, 0.0, 30.0, 30.0).with_color(Rgb::new(0, 0, 255));
        let large = NodeSnapshot::new(0.0, 0.0, 300.0, 300.0).with_color(Rgb::new(0, 0, 255));

        let a = cache.get_texture(&small, &rt, &mut backend).unwrap();
        let b = cache.get_texture(&large, &rt, &mut backend).unwrap();
        assert_ne!(a, b);

        // The rasters really differ: the border is thicker on the small node.
        let raster = |node: &NodeSnapshot| {
            let bb = rt.bounding_box(node);
            let mut canvas = RasterCanvas::for_box(64, &bb);
            rt.draw(&mut canvas, node, &bb);
            canvas.pixel(4, 32)
        };
        assert_eq!(raster(&small), [255, 255, 255, 255]);
        assert_eq!(raster(&large), [0, 0, 255, 255]);
    }

    #[test]
    fn test_oversized_texture_rejected_before_raster() {
        let mut cache = TextureCache::unbounded();
        let mut backend = RecordingBackend::new();
        backend.texture_limit = Some(256);
        let rt = SolidNode::new(Shape::Ellipse).with_texture_size(65536);

        let result = cache.get_texture(&node(Rgb::new(1, 1, 1)), &rt, &mut backend);
        assert!(matches!(
            result,
            Err(RenderError::TextureTooLarge { size: 65536, limit: 256 })
        ));
        assert!(backend.calls().is_empty());
        assert!(cache.is_empty());
    }
}
