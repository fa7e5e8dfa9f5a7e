//! Graphics helper kit built on top of the abstraction runtime: per-frame
//! dynamic buffers with transparent staging, and the shelf allocator behind
//! UI and font atlases.

pub mod atlas_shelf_allocator;
pub mod dynamic_buffer;

pub use atlas_shelf_allocator::AtlasShelfAllocator;
pub use dynamic_buffer::DynamicBuffer;
