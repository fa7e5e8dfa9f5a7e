//! Render graph: declare passes and their resource dependencies, build a
//! DAG, cull passes that cannot reach a declared target, derive the memory
//! barriers each surviving pass needs, then record everything into command
//! lists, either on the calling thread or fanned out across the fiber
//! runtime.

pub mod builder;
pub mod declarations;
pub mod graph;
pub mod registry;
pub mod resource;
pub mod state_tracker;

pub use builder::Builder;
pub use declarations::{Dependency, PassDeclaration, PassExecutionData, PassType};
pub use graph::RenderGraph;
pub use registry::Registry;
pub use resource::{Resource, ResourceData};
