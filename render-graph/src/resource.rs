//! Render-graph resource model.
//!
//! Resources are registered once and addressed by simple-pool handles for
//! the lifetime of the graph. Views carry the pool handle of their
//! underlying raw resource and hold a strong reference on it through the
//! pool's refcount.

use kryne_core::memory::SimplePoolHandle;
use kryne_graphics::handles::{
    BufferHandle, BufferViewHandle, RenderTargetViewHandle, SamplerHandle, TextureHandle,
    TextureViewHandle,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResourceData {
    RawBuffer {
        buffer: BufferHandle,
    },
    RawTexture {
        texture: TextureHandle,
    },
    TextureView {
        view: TextureViewHandle,
        texture_resource: SimplePoolHandle,
    },
    BufferView {
        view: BufferViewHandle,
        buffer_resource: SimplePoolHandle,
    },
    RenderTargetView {
        view: RenderTargetViewHandle,
        texture_resource: SimplePoolHandle,
    },
    Sampler {
        sampler: SamplerHandle,
    },
}

pub struct Resource {
    pub data: ResourceData,
    /// Owned resources tear their GPU object down when the last reference
    /// goes away.
    pub owned: bool,
    pub name: String,
}

impl Resource {
    /// True when barriers against this resource are image barriers.
    pub fn is_texture(&self) -> bool {
        matches!(
            self.data,
            ResourceData::RawTexture { .. }
                | ResourceData::TextureView { .. }
                | ResourceData::RenderTargetView { .. }
        )
    }

    /// The pool handle of the raw resource this one ultimately refers to,
    /// when it is a view.
    pub fn underlying(&self) -> Option<SimplePoolHandle> {
        match self.data {
            ResourceData::TextureView { texture_resource, .. } => Some(texture_resource),
            ResourceData::RenderTargetView { texture_resource, .. } => Some(texture_resource),
            ResourceData::BufferView { buffer_resource, .. } => Some(buffer_resource),
            _ => None,
        }
    }
}
