//! Application state: the graph, the renderer and the camera.
//!
//! `AppState` is the single source of truth for the running application.
//! Graph edits set the graph's dirty flag; `render_frame` forwards it to
//! the renderer so bulk geometry is rebuilt only when something moved.

use std::path::Path;

use arbor_core::{Graph, GraphError, NodeSnapshot, Point, Rgb, Viewport};
use arbor_render::{
    FrameStats, GpuContext, RenderError, RenderStrategy, Renderer, RendererConfig, Shape,
    SolidNode, WgpuBackend,
};

/// Environment variable naming a JSON renderer config file.
pub const CONFIG_ENV: &str = "ARBOR_CONFIG";

const MIN_ZOOM: f32 = 0.1;
const MAX_ZOOM: f32 = 50.0;

/// Pan and zoom for the window.
///
/// `width`/`height` are physical pixels.  `pan` is in logical pixels,
/// matching [`Viewport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub pan: Point,
    pub zoom: f32,
    pub pixel_ratio: f32,
    pub width: f32,
    pub height: f32,
}

impl Camera {
    pub fn new(width: f32, height: f32, pixel_ratio: f32) -> Self {
        Self {
            pan: Point::default(),
            zoom: 1.0,
            pixel_ratio,
            width,
            height,
        }
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
            .with_pan_zoom(self.pan, self.zoom)
            .with_pixel_ratio(self.pixel_ratio)
    }

    /// Pan by a delta in physical pixels.
    pub fn pan(&mut self, dx: f32, dy: f32) {
        self.pan.x += dx / self.pixel_ratio;
        self.pan.y += dy / self.pixel_ratio;
    }

    /// Zoom by `factor` around the physical pixel (sx, sy).
    pub fn zoom_at(&mut self, sx: f32, sy: f32, factor: f32) {
        // Model point under the cursor stays put.
        let anchor = self.viewport().canvas_to_model(sx, sy);

        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);

        let scale = self.zoom * self.pixel_ratio;
        self.pan.x = (sx - anchor.x * scale) / self.pixel_ratio;
        self.pan.y = (sy - anchor.y * scale) / self.pixel_ratio;
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
    }
}

/// Read the renderer config from `path`, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> RendererConfig {
    let Some(path) = path else {
        return RendererConfig::default();
    };

    match std::fs::read_to_string(path) {
        Ok(json) => match RendererConfig::from_json(&json) {
            Ok(config) => {
                log::info!("loaded renderer config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("ignoring malformed config {}: {e}", path.display());
                RendererConfig::default()
            }
        },
        Err(e) => {
            log::warn!("cannot read config {}: {e}", path.display());
            RendererConfig::default()
        }
    }
}

/// Render types the demo graph refers to.
pub fn register_render_types<B: arbor_render::RenderBackend>(
    renderer: &mut Renderer<B>,
) -> Result<(), RenderError> {
    renderer.add_render_type("round", RenderStrategy::textured(SolidNode::new(Shape::Ellipse)))?;
    renderer.add_render_type(
        "square",
        RenderStrategy::textured(
            SolidNode::new(Shape::Rectangle).with_border(Rgb::new(240, 240, 240), 3.0),
        ),
    )?;
    Ok(())
}

/// A small tree: a root, two hubs and a fan of leaves under each.
pub fn demo_graph() -> Result<Graph, GraphError> {
    let palette = [
        Rgb::new(66, 133, 244),
        Rgb::new(219, 68, 55),
        Rgb::new(244, 180, 0),
        Rgb::new(15, 157, 88),
        Rgb::new(171, 71, 188),
    ];

    let mut graph = Graph::new();
    let root = graph.add_node(
        NodeSnapshot::new(640.0, 80.0, 60.0, 60.0)
            .with_render_type("square")
            .with_color(Rgb::new(40, 40, 48)),
    );

    for (h, hub_x) in [320.0_f32, 960.0].into_iter().enumerate() {
        let hub = graph.add_node(
            NodeSnapshot::new(hub_x, 260.0, 48.0, 48.0)
                .with_render_type("round")
                .with_color(palette[h]),
        );
        graph.add_edge(root, hub)?;

        for i in 0..12 {
            let x = hub_x - 275.0 + i as f32 * 50.0;
            let y = 460.0 + (i % 3) as f32 * 70.0;
            let mut leaf = NodeSnapshot::new(x, y, 28.0, 28.0).with_color(palette[i % palette.len()]);
            // Every third leaf stays on the flat path.
            if i % 3 != 0 {
                leaf = leaf.with_render_type("round");
            }
            let leaf = graph.add_node(leaf.with_opacity(if i % 4 == 0 { 0.6 } else { 1.0 }));
            graph.add_edge_with_color(hub, leaf, palette[h])?;
        }
    }
    Ok(graph)
}

/// Owns the graph, renderer and camera.
pub struct AppState {
    pub graph: Graph,
    pub renderer: Renderer<WgpuBackend>,
    pub camera: Camera,
}

impl AppState {
    /// Build the state once the GPU context exists.
    pub fn new(gpu: GpuContext, config: RendererConfig, pixel_ratio: f32) -> Result<Self, RenderError> {
        let (width, height) = gpu.surface_size();
        let mut renderer = Renderer::with_gpu(gpu, config)?;
        register_render_types(&mut renderer)?;

        Ok(Self {
            graph: Graph::new(),
            renderer,
            camera: Camera::new(width as f32, height as f32, pixel_ratio),
        })
    }

    pub fn load_demo_graph(&mut self) -> Result<(), GraphError> {
        self.graph = demo_graph()?;
        self.renderer.invalidate();
        Ok(())
    }

    /// Draw one frame of the current graph.
    pub fn render_frame(&mut self) -> Result<FrameStats, RenderError> {
        if self.graph.take_dirty() {
            self.renderer.invalidate();
        }
        let elements = self.graph.z_sorted();
        self.renderer.render_frame(&elements, &self.camera.viewport())
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.renderer.backend_mut().resize(width, height);
        self.camera.resize(width as f32, height as f32);
    }

    pub fn pan(&mut self, dx: f32, dy: f32) {
        self.camera.pan(dx, dy);
    }

    /// Scroll-wheel zoom; one line of scroll is ten percent.
    pub fn zoom_at(&mut self, sx: f32, sy: f32, lines: f32) {
        self.camera.zoom_at(sx, sy, 1.1_f32.powf(lines));
    }
}
