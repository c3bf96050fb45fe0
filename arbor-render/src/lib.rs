//! # arbor-render
//!
//! GPU batch rendering for Arbor graphs, built on `wgpu`.
//!
//! ## Architecture
//!
//! ```text
//!  Graph (arbor-core)
//!       │  z_sorted() + take_dirty()
//!       ▼
//!  Renderer.render_frame(elements, viewport)
//!       │
//!       ├── BulkGeometry ─────────▶ edges + flat nodes, rebuilt only when dirty
//!       │
//!       └── NodeBatcher ──────────▶ textured nodes, ≤ MAX_INSTANCES per draw
//!              │
//!              └── TextureCache ──▶ one texture per style fingerprint
//!       ▼
//!  RenderBackend (WgpuBackend | RecordingBackend)
//! ```
//!
//! ## Crate modules
//!
//! - [`context`]: GPU device/queue/surface initialisation
//! - [`program`]: WGSL compile, validate, link and reflection
//! - [`transform`]: instance, pan-zoom and projection matrices
//! - [`render_type`]: per-category node policies and the registry
//! - [`raster`]: offscreen canvas and mip chains for node textures
//! - [`texture_cache`]: fingerprint → texture, optionally LRU-bounded
//! - [`batch`]: instanced node batcher
//! - [`geometry`]: bulk vertex arrays for edges and flat nodes
//! - [`backend`]: the backend seam and a recording implementation
//! - [`pipelines`]: wgpu render pipelines (instanced, bulk)
//! - [`gpu`]: the wgpu backend
//! - [`renderer`]: high-level frame orchestration
//! - [`config`]: renderer settings

pub mod backend;
pub mod batch;
pub mod config;
pub mod context;
pub mod geometry;
pub mod gpu;
pub mod pipelines;
pub mod program;
pub mod raster;
pub mod render_type;
pub mod renderer;
pub mod texture_cache;
pub mod transform;

// Re-exports for convenience
pub use backend::{BackendCall, RecordingBackend, RenderBackend, TextureId};
pub use batch::{BatchState, BatchTransition, NodeBatcher, MAX_INSTANCES};
pub use config::RendererConfig;
pub use context::{GpuContext, GpuError};
pub use geometry::BulkGeometry;
pub use gpu::WgpuBackend;
pub use program::{ProgramError, ShaderProgram};
pub use render_type::{NodeRenderType, RenderStrategy, Shape, SolidNode};
pub use renderer::{FrameStats, RenderError, Renderer};
pub use texture_cache::TextureCache;
