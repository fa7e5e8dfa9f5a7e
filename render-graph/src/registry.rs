//! Render-graph resource registry.

use crate::resource::{Resource, ResourceData};
use kryne_core::memory::{SimplePool, SimplePoolHandle};
use kryne_core::{ke_assert, verify_or_return};
use kryne_graphics::descs::TextureCreateDesc;
use kryne_graphics::handles::{
    BufferHandle, BufferViewHandle, RenderTargetViewHandle, SamplerHandle, TextureHandle,
    TextureViewHandle,
};
use kryne_graphics::{GraphicsBackend, GraphicsContext};

/// Owns the graph's resource table. Registering a view takes a strong
/// reference on the underlying raw resource; releasing the last reference
/// to an owned resource destroys its GPU object.
pub struct Registry {
    resources: SimplePool<Resource>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            resources: SimplePool::new(),
        }
    }

    pub fn register_raw_texture(&mut self, texture: TextureHandle, name: &str) -> SimplePoolHandle {
        self.resources.allocate(Resource {
            data: ResourceData::RawTexture { texture },
            owned: false,
            name: name.to_owned(),
        })
    }

    pub fn register_raw_buffer(&mut self, buffer: BufferHandle, name: &str) -> SimplePoolHandle {
        self.resources.allocate(Resource {
            data: ResourceData::RawBuffer { buffer },
            owned: false,
            name: name.to_owned(),
        })
    }

    pub fn register_texture_view(
        &mut self,
        view: TextureViewHandle,
        texture_resource: SimplePoolHandle,
        name: &str,
    ) -> SimplePoolHandle {
        ke_assert!(matches!(
            self.resources.get(texture_resource).data,
            ResourceData::RawTexture { .. }
        ));
        self.resources.add_ref(texture_resource);
        self.resources.allocate(Resource {
            data: ResourceData::TextureView {
                view,
                texture_resource,
            },
            owned: false,
            name: name.to_owned(),
        })
    }

    pub fn register_buffer_view(
        &mut self,
        view: BufferViewHandle,
        buffer_resource: SimplePoolHandle,
        name: &str,
    ) -> SimplePoolHandle {
        ke_assert!(matches!(
            self.resources.get(buffer_resource).data,
            ResourceData::RawBuffer { .. }
        ));
        self.resources.add_ref(buffer_resource);
        self.resources.allocate(Resource {
            data: ResourceData::BufferView {
                view,
                buffer_resource,
            },
            owned: false,
            name: name.to_owned(),
        })
    }

    pub fn register_render_target_view(
        &mut self,
        view: RenderTargetViewHandle,
        texture_resource: SimplePoolHandle,
        name: &str,
    ) -> SimplePoolHandle {
        ke_assert!(matches!(
            self.resources.get(texture_resource).data,
            ResourceData::RawTexture { .. }
        ));
        self.resources.add_ref(texture_resource);
        self.resources.allocate(Resource {
            data: ResourceData::RenderTargetView {
                view,
                texture_resource,
            },
            owned: false,
            name: name.to_owned(),
        })
    }

    pub fn register_sampler(&mut self, sampler: SamplerHandle, name: &str) -> SimplePoolHandle {
        self.resources.allocate(Resource {
            data: ResourceData::Sampler { sampler },
            owned: false,
            name: name.to_owned(),
        })
    }

    /// Creates a texture through the context and registers it as owned: the
    /// GPU object is destroyed when the last reference is released.
    pub fn create_raw_texture<B: GraphicsBackend>(
        &mut self,
        graphics_context: &GraphicsContext<B>,
        desc: &TextureCreateDesc,
    ) -> SimplePoolHandle {
        let texture = graphics_context.create_texture(desc);
        self.resources.allocate(Resource {
            data: ResourceData::RawTexture { texture },
            owned: true,
            name: desc.desc.debug_name.clone(),
        })
    }

    /// Resolves a view down to its raw resource; raw resources and samplers
    /// resolve to themselves.
    pub fn get_underlying(&self, resource: SimplePoolHandle) -> SimplePoolHandle {
        self.resources
            .get(resource)
            .underlying()
            .unwrap_or(resource)
    }

    pub fn is_registered(&self, resource: SimplePoolHandle) -> bool {
        self.resources.is_occupied(resource)
    }

    pub fn is_render_target_view(&self, resource: SimplePoolHandle) -> bool {
        matches!(
            self.resources.get(resource).data,
            ResourceData::RenderTargetView { .. }
        )
    }

    pub fn render_target_view(&self, resource: SimplePoolHandle) -> RenderTargetViewHandle {
        match self.resources.get(resource).data {
            ResourceData::RenderTargetView { view, .. } => view,
            _ => {
                ke_assert!(false, "resource is not a render target view");
                RenderTargetViewHandle::INVALID
            }
        }
    }

    /// The texture behind a raw-texture resource or any view over one.
    pub fn texture_of(&self, resource: SimplePoolHandle) -> TextureHandle {
        let raw = self.get_underlying(resource);
        match self.resources.get(raw).data {
            ResourceData::RawTexture { texture } => texture,
            _ => TextureHandle::INVALID,
        }
    }

    /// The buffer behind a raw-buffer resource or a buffer view.
    pub fn buffer_of(&self, resource: SimplePoolHandle) -> BufferHandle {
        let raw = self.get_underlying(resource);
        match self.resources.get(raw).data {
            ResourceData::RawBuffer { buffer } => buffer,
            _ => BufferHandle::INVALID,
        }
    }

    pub fn resource(&self, resource: SimplePoolHandle) -> &Resource {
        self.resources.get(resource)
    }

    pub fn name(&self, resource: SimplePoolHandle) -> &str {
        &self.resources.get(resource).name
    }

    pub fn ref_count(&self, resource: SimplePoolHandle) -> i32 {
        self.resources.ref_count(resource)
    }

    pub fn add_ref(&mut self, resource: SimplePoolHandle) -> i32 {
        self.resources.add_ref(resource)
    }

    /// Releases one reference. Dropping the last reference of a view also
    /// releases its underlying resource; owned raw resources destroy their
    /// GPU object through the context.
    pub fn release<B: GraphicsBackend>(
        &mut self,
        graphics_context: &GraphicsContext<B>,
        resource: SimplePoolHandle,
    ) {
        verify_or_return!(self.resources.is_occupied(resource), ());
        if let Some(freed) = self.resources.release(resource) {
            match freed.data {
                ResourceData::TextureView {
                    view,
                    texture_resource,
                } => {
                    if freed.owned {
                        graphics_context.destroy_texture_view(view);
                    }
                    self.release(graphics_context, texture_resource);
                }
                ResourceData::RenderTargetView {
                    view,
                    texture_resource,
                } => {
                    if freed.owned {
                        graphics_context.destroy_render_target_view(view);
                    }
                    self.release(graphics_context, texture_resource);
                }
                ResourceData::BufferView {
                    view,
                    buffer_resource,
                } => {
                    if freed.owned {
                        graphics_context.destroy_buffer_view(view);
                    }
                    self.release(graphics_context, buffer_resource);
                }
                ResourceData::RawTexture { texture } => {
                    if freed.owned {
                        graphics_context.destroy_texture(texture);
                    }
                }
                ResourceData::RawBuffer { buffer } => {
                    if freed.owned {
                        graphics_context.destroy_buffer(buffer);
                    }
                }
                ResourceData::Sampler { sampler } => {
                    if freed.owned {
                        graphics_context.destroy_sampler(sampler);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kryne_core::memory::GenPoolHandle;

    fn texture(index: u32) -> TextureHandle {
        TextureHandle(GenPoolHandle::new(index, 0))
    }

    #[test]
    fn views_keep_their_texture_alive() {
        let mut registry = Registry::new();
        let raw = registry.register_raw_texture(texture(1), "gbuffer");
        let view = registry.register_render_target_view(
            RenderTargetViewHandle(GenPoolHandle::new(2, 0)),
            raw,
            "gbuffer-rtv",
        );

        assert_eq!(registry.ref_count(raw), 2);
        assert_eq!(registry.get_underlying(view), raw);
        assert_eq!(registry.texture_of(view), texture(1));
        assert!(registry.is_render_target_view(view));
        assert!(!registry.is_render_target_view(raw));
    }
}
