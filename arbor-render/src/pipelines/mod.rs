//! wgpu render pipelines.
//!
//! - [`instanced`]: textured node quads, up to `MAX_INSTANCES` per draw
//! - [`bulk`]: flat-coloured node quads and edge lines from static buffers

pub mod bulk;
pub mod instanced;

pub use bulk::BulkPipeline;
pub use instanced::InstancedPipeline;
