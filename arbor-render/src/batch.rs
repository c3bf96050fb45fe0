//! Instanced node batcher.
//!
//! Accumulates up to [`MAX_INSTANCES`] `(matrix, texture)` pairs and draws
//! them with one instanced call.  State machine:
//!
//! ```text
//!            start_batch               draw × MAX_INSTANCES
//!   Idle ───────────────▶ Accumulating ─────────────────────▶ Flushing
//!    ▲                        ▲   │                              │
//!    │        end_batch       │   └──────── flush_full ──────────┘
//!    └────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! Matrices live in a fixed arena, one slot per instance, written in place
//! so steady-state drawing allocates nothing.

use arbor_core::NodeSnapshot;
use glam::Mat3;

use crate::backend::{BatchFlush, RenderBackend, TextureId};
use crate::render_type::NodeRenderType;
use crate::renderer::RenderError;
use crate::texture_cache::TextureCache;
use crate::transform::{compute_instance_matrix, write_mat3, MATRIX_SIZE};

/// Instances per draw call.  Equal to the number of texture bindings the
/// generated fragment shader declares; the two change together.
pub const MAX_INSTANCES: usize = 10;

/// Contiguous per-instance matrix storage (`MAX_INSTANCES × 9` floats).
#[derive(Clone, Debug)]
pub struct MatrixArena {
    slots: [[f32; MATRIX_SIZE]; MAX_INSTANCES],
}

impl Default for MatrixArena {
    fn default() -> Self {
        Self {
            slots: [[0.0; MATRIX_SIZE]; MAX_INSTANCES],
        }
    }
}

impl MatrixArena {
    pub fn slot(&self, index: usize) -> Option<&[f32; MATRIX_SIZE]> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut [f32; MATRIX_SIZE]> {
        self.slots.get_mut(index)
    }

    /// The first `count` slots.
    pub fn populated(&self, count: usize) -> &[[f32; MATRIX_SIZE]] {
        &self.slots[..count.min(MAX_INSTANCES)]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Accumulating,
    Flushing,
}

/// Observable state-machine transitions, drained once per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchTransition {
    Started,
    /// A batch was drawn.  `full` marks the implicit flush on reaching the limit.
    Flushed { instances: usize, full: bool },
}

pub struct NodeBatcher {
    state: BatchState,
    arena: MatrixArena,
    textures: Vec<TextureId>,
    pan_zoom: Mat3,
    transitions: Vec<BatchTransition>,
}

impl Default for NodeBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBatcher {
    pub fn new() -> Self {
        Self {
            state: BatchState::Idle,
            arena: MatrixArena::default(),
            textures: Vec::with_capacity(MAX_INSTANCES),
            pan_zoom: Mat3::IDENTITY,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Instances accumulated in the current batch.
    pub fn instance_count(&self) -> usize {
        self.textures.len()
    }

    pub fn pan_zoom(&self) -> &Mat3 {
        &self.pan_zoom
    }

    pub fn arena(&self) -> &MatrixArena {
        &self.arena
    }

    /// Begin a batch.  `None` keeps the matrix of the previous batch, which
    /// is what follow-up batches within one frame do.
    pub fn start_batch(&mut self, pan_zoom: Option<Mat3>) {
        if let Some(matrix) = pan_zoom {
            self.pan_zoom = matrix;
        }
        self.textures.clear();
        self.state = BatchState::Accumulating;
        self.transitions.push(BatchTransition::Started);
    }

    /// Add one node.  Reaching the limit flushes and restarts the batch.
    pub fn draw<B: RenderBackend + ?Sized>(
        &mut self,
        render_type: &dyn NodeRenderType,
        node: &NodeSnapshot,
        cache: &mut TextureCache,
        backend: &mut B,
    ) -> Result<(), RenderError> {
        if self.state != BatchState::Accumulating {
            return Err(RenderError::BatchNotActive);
        }

        let index = self.textures.len();
        let slot = self.arena.slot_mut(index).ok_or(RenderError::BatchNotActive)?;
        write_mat3(&compute_instance_matrix(render_type, node), slot);

        let texture = cache.get_texture(node, render_type, backend)?;
        self.textures.push(texture);

        if self.textures.len() >= MAX_INSTANCES {
            self.flush_full(backend)?;
        }
        Ok(())
    }

    /// Draw what has accumulated and return to `Idle`.  Returns the number
    /// of instances drawn, or `None` for an empty batch.
    pub fn end_batch<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> Result<Option<usize>, RenderError> {
        let drawn = self.flush(backend, false)?;
        self.state = BatchState::Idle;
        Ok(drawn)
    }

    /// Limit reached: draw, then immediately accept more instances.
    fn flush_full<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> Result<(), RenderError> {
        self.flush(backend, true)?;
        self.start_batch(None);
        Ok(())
    }

    fn flush<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        full: bool,
    ) -> Result<Option<usize>, RenderError> {
        let instances = self.textures.len();
        if instances == 0 {
            return Ok(None);
        }

        self.state = BatchState::Flushing;
        backend.draw_instances(&BatchFlush {
            pan_zoom: &self.pan_zoom,
            matrices: self.arena.populated(instances),
            textures: &self.textures,
        })?;
        log::debug!("drew {instances} node instance(s)");

        self.transitions.push(BatchTransition::Flushed { instances, full });
        Ok(Some(instances))
    }

    /// Abandon the current batch without drawing it.
    pub fn reset(&mut self) {
        self.textures.clear();
        self.state = BatchState::Idle;
    }

    pub fn take_transitions(&mut self) -> Vec<BatchTransition> {
        std::mem::take(&mut self.transitions)
    }
}
