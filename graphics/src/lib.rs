//! Cross-API graphics abstraction runtime.
//!
//! The [`GraphicsContext`](context::GraphicsContext) façade presents one
//! uniform, frame-pacing-aware rendering API above a concrete backend. GPU
//! objects are addressed through typed generational handles; per-frame state
//! (command allocators, descriptor-set copies, synchronisation) rotates over
//! the backend's in-flight frame slots.

pub mod backend;
pub mod barriers;
pub mod context;
pub mod descriptor_set_manager;
pub mod descs;
pub mod enums;
pub mod frame_context;
pub mod handles;
pub mod headless;
pub mod pipeline_layout;
pub mod shader_pipeline;

pub use backend::GraphicsBackend;
pub use context::GraphicsContext;
pub use handles::*;
