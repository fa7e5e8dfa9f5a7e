//! Resource creation descriptors.

use crate::enums::{
    MemoryUsage, Texture4ComponentsMapping, TextureFormat, TextureLayout, TexturePlane,
    TextureTypes, TextureUsage, DEFAULT_TEXTURE_COMPONENTS_MAPPING,
};
use crate::handles::{BufferHandle, RenderTargetViewHandle};
use kryne_core::ke_verify;
use smallvec::SmallVec;

/// Identity of a buffer, without its memory behaviour.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferDesc {
    pub size: u64,
    pub debug_name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferCreateDesc {
    pub desc: BufferDesc,
    pub usage: MemoryUsage,
}

impl BufferCreateDesc {
    /// Creation preconditions: non-zero size, at least one bind flag.
    pub fn validate(&self) -> bool {
        ke_verify!(self.desc.size > 0, "buffer '{}' has zero size", self.desc.debug_name)
            && ke_verify!(
                self.usage.has_bind_flags(),
                "buffer '{}' needs at least one non-usage-type flag",
                self.desc.debug_name
            )
    }
}

/// Identity of a texture: dimensions, format, sub-resource layout.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub dimensions: (u32, u32, u32),
    pub format: TextureFormat,
    pub array_size: u16,
    pub mip_count: u8,
    pub texture_type: TextureTypes,
    pub debug_name: String,
}

impl Default for TextureDesc {
    fn default() -> Self {
        TextureDesc {
            dimensions: (0, 0, 1),
            format: TextureFormat::NoFormat,
            array_size: 1,
            mip_count: 1,
            texture_type: TextureTypes::Single2D,
            debug_name: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TextureCreateDesc {
    pub desc: TextureDesc,
    pub memory_usage: MemoryUsage,
    pub usage: TextureUsage,
}

impl TextureCreateDesc {
    /// Creation preconditions: non-zero extents and counts, a non-empty
    /// usage, and depth-stencil usage coherent with the format.
    pub fn validate(&self) -> bool {
        let (width, height, depth) = self.desc.dimensions;
        let name = &self.desc.debug_name;
        ke_verify!(
            width > 0 && height > 0 && depth > 0,
            "texture '{}' has a zero dimension",
            name
        ) && ke_verify!(self.desc.array_size > 0, "texture '{}' has no array layers", name)
            && ke_verify!(self.desc.mip_count > 0, "texture '{}' has no mips", name)
            && ke_verify!(!self.usage.is_empty(), "texture '{}' declares no usage", name)
            && ke_verify!(
                !self.usage.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT)
                    || self.desc.format.is_depth(),
                "texture '{}' wants depth-stencil usage with color format {:?}",
                name,
                self.desc.format
            )
            && ke_verify!(
                !self.desc.format.is_depth()
                    || !self.usage.contains(TextureUsage::COLOR_ATTACHMENT),
                "texture '{}' wants color-attachment usage with depth format {:?}",
                name,
                self.desc.format
            )
    }
}

/// Shader-visible view over a texture sub-resource range.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureViewDesc {
    pub texture: crate::handles::TextureHandle,
    pub format: TextureFormat,
    pub view_type: TextureTypes,
    pub planes: TexturePlane,
    pub components: Texture4ComponentsMapping,
    pub mip_start: u8,
    pub mip_count: u8,
    pub array_start: u16,
    pub array_count: u16,
    pub debug_name: String,
}

impl TextureViewDesc {
    pub fn whole_texture(texture: crate::handles::TextureHandle, desc: &TextureDesc) -> Self {
        TextureViewDesc {
            texture,
            format: desc.format,
            view_type: desc.texture_type,
            planes: desc.format.aspect_planes(),
            components: DEFAULT_TEXTURE_COMPONENTS_MAPPING,
            mip_start: 0,
            mip_count: desc.mip_count,
            array_start: 0,
            array_count: desc.array_size,
            debug_name: desc.debug_name.clone(),
        }
    }

    pub fn validate(&self) -> bool {
        ke_verify!(self.texture.is_valid(), "texture view over an invalid texture")
            && ke_verify!(self.mip_count > 0 && self.array_count > 0, "empty texture view range")
    }
}

/// Typed range over a buffer, as bound to descriptor sets.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferViewDesc {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
    pub debug_name: String,
}

impl BufferViewDesc {
    pub fn validate(&self) -> bool {
        ke_verify!(self.buffer.is_valid(), "buffer view over an invalid buffer")
            && ke_verify!(self.size > 0, "buffer view '{}' has zero size", self.debug_name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderTargetViewDesc {
    pub texture: crate::handles::TextureHandle,
    pub format: TextureFormat,
    pub texture_type: TextureTypes,
    pub mip_level: u8,
    pub array_range: (u16, u16),
    pub plane: TexturePlane,
    pub debug_name: String,
}

impl RenderTargetViewDesc {
    pub fn validate(&self) -> bool {
        ke_verify!(self.texture.is_valid(), "render target view over an invalid texture")
            && ke_verify!(self.array_range.1 > 0, "render target view has no array layers")
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SamplerFilter {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SamplerAddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: SamplerFilter,
    pub mag_filter: SamplerFilter,
    pub mip_filter: SamplerFilter,
    pub address_mode_u: SamplerAddressMode,
    pub address_mode_v: SamplerAddressMode,
    pub address_mode_w: SamplerAddressMode,
    pub anisotropy: u8,
    pub lod_min: f32,
    pub lod_max: f32,
    pub debug_name: String,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        SamplerDesc {
            min_filter: SamplerFilter::Linear,
            mag_filter: SamplerFilter::Linear,
            mip_filter: SamplerFilter::Linear,
            address_mode_u: SamplerAddressMode::Repeat,
            address_mode_v: SamplerAddressMode::Repeat,
            address_mode_w: SamplerAddressMode::Repeat,
            anisotropy: 0,
            lod_min: 0.0,
            lod_max: f32::MAX,
            debug_name: String::new(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LoadOperation {
    Load,
    Clear,
    DontCare,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StoreOperation {
    Store,
    Resolve,
    DontCare,
}

/// One attachment of a render pass, with its load/store behaviour and the
/// layouts expected at entry and exit.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderPassAttachment {
    pub load_operation: LoadOperation,
    pub store_operation: StoreOperation,
    pub initial_layout: TextureLayout,
    pub final_layout: TextureLayout,
    pub rtv: RenderTargetViewHandle,
    pub clear_color: [f32; 4],
}

impl Default for RenderPassAttachment {
    fn default() -> Self {
        RenderPassAttachment {
            load_operation: LoadOperation::DontCare,
            store_operation: StoreOperation::DontCare,
            initial_layout: TextureLayout::Unknown,
            final_layout: TextureLayout::ColorAttachment,
            rtv: RenderTargetViewHandle::INVALID,
            clear_color: [0.0; 4],
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DepthStencilAttachment {
    pub attachment: RenderPassAttachment,
    pub stencil_load_operation: LoadOperation,
    pub stencil_store_operation: StoreOperation,
    pub depth_clear_value: f32,
    pub stencil_clear_value: u8,
}

impl Default for DepthStencilAttachment {
    fn default() -> Self {
        DepthStencilAttachment {
            attachment: RenderPassAttachment::default(),
            stencil_load_operation: LoadOperation::DontCare,
            stencil_store_operation: StoreOperation::DontCare,
            depth_clear_value: 1.0,
            stencil_clear_value: 0,
        }
    }
}

pub const MAX_SUPPORTED_COLOR_ATTACHMENTS: usize = 8;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderPassDesc {
    pub color_attachments: SmallVec<[RenderPassAttachment; MAX_SUPPORTED_COLOR_ATTACHMENTS]>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
    pub debug_name: String,
}

impl RenderPassDesc {
    pub fn validate(&self) -> bool {
        ke_verify!(
            self.color_attachments.len() <= MAX_SUPPORTED_COLOR_ATTACHMENTS,
            "render pass '{}' exceeds the color attachment limit",
            self.debug_name
        ) && ke_verify!(
            !self.color_attachments.is_empty() || self.depth_stencil_attachment.is_some(),
            "render pass '{}' has no attachments",
            self.debug_name
        )
    }
}

/// CPU mapping of a buffer range. `ptr` is populated by `map_buffer` and
/// cleared by `unmap_buffer`.
#[derive(Debug)]
pub struct BufferMapping {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
    pub ptr: *mut u8,
}

impl BufferMapping {
    /// Maps the whole buffer.
    pub fn whole_buffer(buffer: BufferHandle) -> Self {
        BufferMapping {
            buffer,
            offset: 0,
            size: u64::MAX,
            ptr: std::ptr::null_mut(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BufferCopyParameters {
    pub copy_size: u64,
    pub offset_src: u64,
    pub offset_dst: u64,
    pub buffer_src: BufferHandle,
    pub buffer_dst: BufferHandle,
}

/// Linear memory layout of one texture sub-resource inside a staging buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TextureMemoryFootprint {
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub row_pitch: u32,
    pub format: TextureFormat,
}

impl TextureMemoryFootprint {
    pub fn slice_byte_size(&self) -> u64 {
        u64::from(self.row_pitch) * u64::from(self.height) * u64::from(self.depth)
    }
}

/// Addresses one sub-resource of a texture.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SubResourceIndexing {
    pub mip_index: u8,
    pub array_index: u16,
    pub plane: TexturePlane,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Viewport {
    pub top_left_x: i32,
    pub top_left_y: i32,
    pub width: u32,
    pub height: u32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// A bound buffer range, used for vertex and index buffer binding.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BufferSpan {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DrawInstancedDesc {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub vertex_offset: u32,
    pub instance_offset: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DrawIndexedInstancedDesc {
    pub element_count: u32,
    pub instance_count: u32,
    pub index_offset: u32,
    pub vertex_offset: i32,
    pub instance_offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kryne_core::assert::ScopedAssertCatcher;

    #[test]
    fn buffer_validation() {
        let _catcher = ScopedAssertCatcher::new();
        let mut desc = BufferCreateDesc {
            desc: BufferDesc {
                size: 256,
                debug_name: "test".to_owned(),
            },
            usage: MemoryUsage::GPU_ONLY_USAGE_TYPE | MemoryUsage::CONSTANT_BUFFER,
        };
        assert!(desc.validate());

        desc.desc.size = 0;
        assert!(!desc.validate());

        desc.desc.size = 16;
        desc.usage = MemoryUsage::GPU_ONLY_USAGE_TYPE;
        assert!(!desc.validate());
    }

    #[test]
    fn texture_validation() {
        let _catcher = ScopedAssertCatcher::new();
        let mut desc = TextureCreateDesc {
            desc: TextureDesc {
                dimensions: (64, 64, 1),
                format: TextureFormat::Rgba8Unorm,
                ..TextureDesc::default()
            },
            memory_usage: MemoryUsage::GPU_ONLY_USAGE_TYPE,
            usage: TextureUsage::SHADER_SAMPLING,
        };
        assert!(desc.validate());

        desc.desc.dimensions = (64, 0, 1);
        assert!(!desc.validate());
        desc.desc.dimensions = (64, 64, 1);

        desc.desc.mip_count = 0;
        assert!(!desc.validate());
        desc.desc.mip_count = 1;

        desc.usage = TextureUsage::DEPTH_STENCIL_ATTACHMENT;
        assert!(!desc.validate());
        desc.desc.format = TextureFormat::D32F;
        assert!(desc.validate());
    }
}
