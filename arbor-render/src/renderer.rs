//! High-level renderer that ties render types, the texture cache, the
//! batcher and the bulk geometry together into a single
//! `render_frame()` call.

use arbor_core::{Element, Viewport};
use thiserror::Error;

use crate::backend::{BulkLayer, BulkUniform, RenderBackend};
use crate::batch::{BatchTransition, NodeBatcher};
use crate::config::RendererConfig;
use crate::context::GpuError;
use crate::geometry::BulkGeometry;
use crate::program::ProgramError;
use crate::render_type::{RenderStrategy, RenderTypeRegistry};
use crate::texture_cache::TextureCache;
use crate::transform::{pan_zoom, projection, view_projection};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("texture of {size}px exceeds the device limit of {limit}px")]
    TextureTooLarge { size: u32, limit: u32 },
    #[error("draw called outside an active batch")]
    BatchNotActive,
    #[error("render type '{name}' already registered with texture size {existing:?}, not {requested:?}")]
    ConflictingRenderType {
        name: String,
        existing: Option<u32>,
        requested: Option<u32>,
    },
    #[error("no frame in progress")]
    NoFrame,
    #[error("GPU resource error: {0}")]
    Resource(String),
}

/// Frame statistics returned after each render.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Edge segments in the bulk buffer.
    pub edge_count: usize,
    /// Nodes drawn as flat quads by the bulk path.
    pub flat_node_count: usize,
    /// Nodes drawn through the instanced batcher.
    pub textured_node_count: usize,
    /// Instanced draws issued.
    pub batch_flushes: usize,
    /// All draw calls, bulk and instanced.
    pub draw_calls: usize,
    /// Whether the bulk buffers were rebuilt this frame.
    pub rebuilt: bool,
}

/// Frame orchestrator for graph rendering.
///
/// # Usage
///
/// ```ignore
/// let mut renderer = Renderer::with_gpu(gpu, RendererConfig::default())?;
/// renderer.add_render_type("round", RenderStrategy::textured(SolidNode::new(Shape::Ellipse)))?;
/// let stats = renderer.render_frame(&graph.z_sorted(), &viewport)?;
/// ```
pub struct Renderer<B: RenderBackend> {
    backend: B,
    config: RendererConfig,
    registry: RenderTypeRegistry,
    cache: TextureCache,
    batcher: NodeBatcher,
    geometry: BulkGeometry,
    needs_buffer: bool,
}

impl<B: RenderBackend> Renderer<B> {
    pub fn new(backend: B, config: RendererConfig) -> Self {
        let cache = TextureCache::new(config.texture_cache_capacity)
            .with_default_size(config.default_texture_size);
        log::info!(
            "renderer ready (texture cache capacity: {:?})",
            cache.capacity()
        );

        Self {
            backend,
            config,
            registry: RenderTypeRegistry::new(),
            cache,
            batcher: NodeBatcher::new(),
            geometry: BulkGeometry::default(),
            needs_buffer: true,
        }
    }

    /// Register a node category before its first use.
    ///
    /// Textured types whose resolution exceeds the backend limit are
    /// rejected here, before anything is rasterised.
    pub fn add_render_type(&mut self, name: &str, strategy: RenderStrategy) -> Result<(), RenderError> {
        if let RenderStrategy::Textured(render_type) = &strategy {
            let size = render_type.texture_size().unwrap_or(self.cache.default_size());
            let limit = self.backend.max_texture_size();
            if size > limit {
                return Err(RenderError::TextureTooLarge { size, limit });
            }
        }
        self.registry.register(name, strategy)?;
        // Which nodes are flat may have changed.
        self.needs_buffer = true;
        Ok(())
    }

    /// Mark the bulk geometry stale.  The next frame rebuilds it.
    pub fn invalidate(&mut self) {
        self.needs_buffer = true;
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_buffer
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn registry(&self) -> &RenderTypeRegistry {
        &self.registry
    }

    /// Release every cached node texture.
    pub fn clear_textures(&mut self) {
        self.cache.clear(&mut self.backend);
    }

    /// Draw one frame: bulk edges, bulk flat nodes, then textured nodes
    /// in z-order.  An empty element list draws nothing.
    ///
    /// On error nothing is presented and the batcher is reset, so the
    /// next call starts clean.
    pub fn render_frame(
        &mut self,
        elements: &[Element],
        viewport: &Viewport,
    ) -> Result<FrameStats, RenderError> {
        if elements.is_empty() {
            return Ok(FrameStats::default());
        }

        match self.draw_frame(elements, viewport) {
            Ok(stats) => Ok(stats),
            Err(e) => {
                log::error!("frame aborted: {e}");
                self.batcher.reset();
                self.batcher.take_transitions();
                self.backend.abort_frame();
                Err(e)
            }
        }
    }

    fn draw_frame(&mut self, elements: &[Element], viewport: &Viewport) -> Result<FrameStats, RenderError> {
        self.backend.begin_frame(viewport)?;

        let mut stats = FrameStats::default();

        // ── Bulk geometry ───────────────────────────────────────
        if self.needs_buffer {
            let registry = &self.registry;
            self.geometry = BulkGeometry::build(elements.iter().filter(|element| match element {
                Element::Node(node) => !registry.strategy_for(node).is_textured(),
                Element::Edge(_) => true,
            }));
            self.backend.upload_geometry(&self.geometry)?;
            self.needs_buffer = false;
            stats.rebuilt = true;
            log::debug!(
                "bulk geometry rebuilt: {} node(s), {} edge(s)",
                self.geometry.node_count(),
                self.geometry.edge_count()
            );
        }

        let uniform = BulkUniform::new(&pan_zoom(viewport), &projection(viewport.width, viewport.height));
        stats.edge_count = self.geometry.edge_count();
        stats.flat_node_count = self.geometry.node_count();

        if stats.edge_count > 0 {
            self.backend.draw_geometry(BulkLayer::Edges, &uniform)?;
            stats.draw_calls += 1;
        }
        if stats.flat_node_count > 0 {
            self.backend.draw_geometry(BulkLayer::Nodes, &uniform)?;
            stats.draw_calls += 1;
        }

        // ── Textured nodes ──────────────────────────────────────
        self.batcher.start_batch(Some(view_projection(viewport)));
        for element in elements {
            let Element::Node(node) = element else { continue };
            if let RenderStrategy::Textured(render_type) = self.registry.strategy_for(node) {
                self.batcher
                    .draw(render_type.as_ref(), node, &mut self.cache, &mut self.backend)?;
                stats.textured_node_count += 1;
            }
        }
        self.batcher.end_batch(&mut self.backend)?;

        stats.batch_flushes = self
            .batcher
            .take_transitions()
            .iter()
            .filter(|t| matches!(t, BatchTransition::Flushed { .. }))
            .count();
        stats.draw_calls += stats.batch_flushes;

        self.backend.end_frame()?;
        Ok(stats)
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::render_type::{Shape, SolidNode};
    use arbor_core::{EdgeSnapshot, NodeSnapshot, Rgb};

    fn renderer() -> Renderer<RecordingBackend> {
        let mut renderer = Renderer::new(RecordingBackend::new(), RendererConfig::default());
        renderer
            .add_render_type(
                "round",
                RenderStrategy::textured(SolidNode::new(Shape::Ellipse).with_texture_size(8)),
            )
            .unwrap();
        renderer
    }

    fn viewport() -> Viewport {
        Viewport::new(800.0, 600.0)
    }

    fn textured(x: f32, color: Rgb) -> NodeSnapshot {
        NodeSnapshot::new(x, 0.0, 20.0, 20.0)
            .with_render_type("round")
            .with_color(color)
    }

    #[test]
    fn test_frame_stats_default() {
        let stats = FrameStats::default();
        assert_eq!(stats.draw_calls, 0);
        assert!(!stats.rebuilt);
    }

    #[test]
    fn test_empty_frame_is_noop() {
        let mut renderer = renderer();
        let stats = renderer.render_frame(&[], &viewport()).unwrap();
        assert_eq!(stats, FrameStats::default());
        assert!(renderer.backend().calls().is_empty());
    }

    #[test]
    fn test_mixed_frame_order() {
        let mut renderer = renderer();
        let flat = NodeSnapshot::new(0.0, 0.0, 10.0, 10.0);
        let round = textured(50.0, Rgb::new(255, 0, 0));
        let elements = vec![
            Element::Edge(EdgeSnapshot::new(flat.position, round.position)),
            Element::Node(flat),
            Element::Node(round),
        ];

        let stats = renderer.render_frame(&elements, &viewport()).unwrap();
        assert_eq!(
            stats,
            FrameStats {
                edge_count: 1,
                flat_node_count: 1,
                textured_node_count: 1,
                batch_flushes: 1,
                draw_calls: 3,
                rebuilt: true,
            }
        );

        let calls = renderer.backend().calls();
        assert_eq!(calls[0], BackendCall::BeginFrame);
        assert_eq!(
            calls[1],
            BackendCall::UploadGeometry { node_vertices: 6, edge_vertices: 2 }
        );
        assert_eq!(
            calls[2],
            BackendCall::DrawGeometry { layer: BulkLayer::Edges, vertex_count: 2 }
        );
        assert_eq!(
            calls[3],
            BackendCall::DrawGeometry { layer: BulkLayer::Nodes, vertex_count: 6 }
        );
        assert!(matches!(calls[4], BackendCall::CreateTexture { size: 8, .. }));
        assert!(matches!(calls[5], BackendCall::DrawInstances { instances: 1, .. }));
        assert_eq!(calls[6], BackendCall::EndFrame);
    }

    #[test]
    fn test_rebuild_only_when_dirty() {
        let mut renderer = renderer();
        let elements = vec![Element::Node(NodeSnapshot::new(0.0, 0.0, 10.0, 10.0))];

        assert!(renderer.render_frame(&elements, &viewport()).unwrap().rebuilt);
        let second = renderer.render_frame(&elements, &viewport()).unwrap();
        assert!(!second.rebuilt);
        assert_eq!(second.flat_node_count, 1);

        renderer.invalidate();
        assert!(renderer.needs_rebuild());
        assert!(renderer.render_frame(&elements, &viewport()).unwrap().rebuilt);

        let uploads = renderer
            .backend()
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::UploadGeometry { .. }))
            .count();
        assert_eq!(uploads, 2);
    }

    #[test]
    fn test_registering_type_forces_rebuild() {
        let mut renderer = renderer();
        let node = NodeSnapshot::new(0.0, 0.0, 10.0, 10.0).with_render_type("square");
        let elements = vec![Element::Node(node)];

        let stats = renderer.render_frame(&elements, &viewport()).unwrap();
        assert_eq!(stats.flat_node_count, 1);

        renderer
            .add_render_type("square", RenderStrategy::textured(SolidNode::new(Shape::Rectangle).with_texture_size(4)))
            .unwrap();
        let stats = renderer.render_frame(&elements, &viewport()).unwrap();
        assert!(stats.rebuilt);
        assert_eq!(stats.flat_node_count, 0);
        assert_eq!(stats.textured_node_count, 1);
    }

    #[test]
    fn test_texture_failure_aborts_frame() {
        let mut renderer = renderer();
        renderer.backend_mut().texture_budget = Some(0);
        let elements = vec![Element::Node(textured(0.0, Rgb::new(1, 1, 1)))];

        let err = renderer.render_frame(&elements, &viewport()).unwrap_err();
        assert!(matches!(err, RenderError::Resource(_)));
        let calls = renderer.backend().calls();
        assert_eq!(calls.last(), Some(&BackendCall::AbortFrame));
        assert!(!calls.contains(&BackendCall::EndFrame));
        assert!(!calls.iter().any(|c| matches!(c, BackendCall::DrawInstances { .. })));

        // The next frame starts from a clean batcher.
        renderer.backend_mut().texture_budget = None;
        let stats = renderer.render_frame(&elements, &viewport()).unwrap();
        assert_eq!(stats.batch_flushes, 1);
    }

    #[test]
    fn test_textures_shared_across_frames() {
        let mut renderer = renderer();
        let elements: Vec<Element> = (0..4)
            .map(|i| Element::Node(textured(i as f32 * 30.0, Rgb::new(0, 128, 0))))
            .collect();

        renderer.render_frame(&elements, &viewport()).unwrap();
        renderer.render_frame(&elements, &viewport()).unwrap();
        assert_eq!(renderer.backend().live_textures(), 1);
        assert_eq!(renderer.texture_cache().stats().misses, 1);
        assert_eq!(renderer.texture_cache().stats().hits, 7);

        renderer.clear_textures();
        assert_eq!(renderer.backend().live_textures(), 0);
    }

    #[test]
    fn test_oversized_render_type_rejected_at_registration() {
        let mut backend = RecordingBackend::new();
        backend.texture_limit = Some(512);
        let mut renderer = Renderer::new(backend, RendererConfig::default());

        let err = renderer
            .add_render_type(
                "huge",
                RenderStrategy::textured(SolidNode::new(Shape::Ellipse).with_texture_size(65536)),
            )
            .unwrap_err();
        assert!(matches!(err, RenderError::TextureTooLarge { size: 65536, limit: 512 }));

        // The configured default (1024) is over the limit too.
        let err = renderer
            .add_render_type("unsized", RenderStrategy::textured(SolidNode::new(Shape::Ellipse)))
            .unwrap_err();
        assert!(matches!(err, RenderError::TextureTooLarge { size: 1024, limit: 512 }));

        assert!(renderer.registry().is_empty());
        assert!(renderer
            .add_render_type("flat", RenderStrategy::FlatColor)
            .is_ok());
    }
}
