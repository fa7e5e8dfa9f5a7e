//! Shared graphics enumerations and flag sets.

use bitflags::bitflags;

/// Pixel formats understood by every backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TextureFormat {
    NoFormat,

    R8Unorm,
    Rg8Unorm,
    Rgb8Unorm,
    Rgba8Unorm,

    Rgb8Srgb,
    Rgba8Srgb,

    // Present special formats
    Bgra8Unorm,
    Bgra8Srgb,

    R8Snorm,
    Rg8Snorm,
    Rgb8Snorm,
    Rgba8Snorm,

    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,

    D16,
    D24,
    D24S8,
    D32F,
    D32FS8,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::D16
                | TextureFormat::D24
                | TextureFormat::D24S8
                | TextureFormat::D32F
                | TextureFormat::D32FS8
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, TextureFormat::D24S8 | TextureFormat::D32FS8)
    }

    /// The planes an image of this format is made of.
    pub fn aspect_planes(self) -> TexturePlane {
        if self.is_depth() {
            if self.has_stencil() {
                TexturePlane::DEPTH | TexturePlane::STENCIL
            } else {
                TexturePlane::DEPTH
            }
        } else {
            TexturePlane::COLOR
        }
    }

    /// Bytes per pixel for linear copy footprints.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::NoFormat => 0,
            TextureFormat::R8Unorm | TextureFormat::R8Snorm => 1,
            TextureFormat::Rg8Unorm | TextureFormat::Rg8Snorm | TextureFormat::D16 => 2,
            TextureFormat::Rgb8Unorm | TextureFormat::Rgb8Srgb | TextureFormat::Rgb8Snorm => 3,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8Srgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8Srgb
            | TextureFormat::Rgba8Snorm
            | TextureFormat::R16Float
            | TextureFormat::D24
            | TextureFormat::D24S8
            | TextureFormat::D32F => 4,
            TextureFormat::Rg16Float | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float | TextureFormat::D32FS8 => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

impl Default for TextureFormat {
    fn default() -> Self {
        TextureFormat::NoFormat
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TextureTypes {
    Single1D,
    Single2D,
    Single3D,
    Array1D,
    Array2D,
    SingleCube,
    ArrayCube,
}

impl Default for TextureTypes {
    fn default() -> Self {
        TextureTypes::Single2D
    }
}

bitflags! {
    pub struct TextureUsage: u8 {
        const TRANSFER_SOURCE        = 1 << 0;
        const TRANSFER_DESTINATION   = 1 << 1;
        const SHADER_SAMPLING        = 1 << 2;
        const UNORDERED_ACCESS       = 1 << 3;
        const COLOR_ATTACHMENT       = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        TextureUsage::SHADER_SAMPLING
    }
}

/// Logical image layouts, mapped to the closest native concept per backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TextureLayout {
    Unknown,
    Common,
    Present,
    GenericRead,
    ColorAttachment,
    DepthStencilAttachment,
    DepthStencilReadOnly,
    UnorderedAccess,
    ShaderResource,
    TransferSrc,
    TransferDst,
}

impl Default for TextureLayout {
    fn default() -> Self {
        TextureLayout::Unknown
    }
}

bitflags! {
    pub struct TexturePlane: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

impl Default for TexturePlane {
    fn default() -> Self {
        TexturePlane::COLOR
    }
}

bitflags! {
    /// Memory behaviour and bind points of a buffer or texture allocation.
    ///
    /// The low three bits carry the usage *type* (how the CPU reaches the
    /// memory); the remaining bits are bind-point flags.
    pub struct MemoryUsage: u16 {
        const GPU_ONLY_USAGE_TYPE          = 1;
        const STAGE_ONCE_USAGE_TYPE        = 2;
        const STAGE_EVERY_FRAME_USAGE_TYPE = 3;
        const READBACK_USAGE_TYPE          = 4;
        const USAGE_TYPE_MASK              = 0b111;

        const TRANSFER_SRC_BUFFER = 1 << 3;
        const TRANSFER_DST_BUFFER = 1 << 4;
        const CONSTANT_BUFFER     = 1 << 5;
        const READ_BUFFER         = 1 << 6;
        const WRITE_BUFFER        = 1 << 7;
        const INDEX_BUFFER        = 1 << 8;
        const VERTEX_BUFFER       = 1 << 9;
        const INDIRECT_BUFFER     = 1 << 10;
    }
}

impl MemoryUsage {
    #[inline]
    pub fn usage_type(self) -> MemoryUsage {
        self & MemoryUsage::USAGE_TYPE_MASK
    }

    /// True when at least one flag outside the usage-type mask is set.
    #[inline]
    pub fn has_bind_flags(self) -> bool {
        !(self & !MemoryUsage::USAGE_TYPE_MASK).is_empty()
    }
}

impl Default for MemoryUsage {
    fn default() -> Self {
        MemoryUsage::GPU_ONLY_USAGE_TYPE
    }
}

/// Per-channel source selection for texture views.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TextureComponentMapping {
    Red,
    Green,
    Blue,
    Alpha,
    Zero,
    One,
}

pub type Texture4ComponentsMapping = [TextureComponentMapping; 4];

pub const DEFAULT_TEXTURE_COMPONENTS_MAPPING: Texture4ComponentsMapping = [
    TextureComponentMapping::Red,
    TextureComponentMapping::Green,
    TextureComponentMapping::Blue,
    TextureComponentMapping::Alpha,
];

/// The three hardware queues the runtime records against.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

impl QueueType {
    pub const COUNT: usize = 3;

    #[inline]
    pub fn index(self) -> usize {
        match self {
            QueueType::Graphics => 0,
            QueueType::Compute => 1,
            QueueType::Transfer => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_aspects() {
        assert_eq!(TextureFormat::Rgba8Unorm.aspect_planes(), TexturePlane::COLOR);
        assert_eq!(TextureFormat::D32F.aspect_planes(), TexturePlane::DEPTH);
        assert_eq!(
            TextureFormat::D24S8.aspect_planes(),
            TexturePlane::DEPTH | TexturePlane::STENCIL
        );
    }

    #[test]
    fn usage_type_extraction() {
        let usage = MemoryUsage::STAGE_EVERY_FRAME_USAGE_TYPE
            | MemoryUsage::CONSTANT_BUFFER
            | MemoryUsage::TRANSFER_SRC_BUFFER;
        assert_eq!(usage.usage_type(), MemoryUsage::STAGE_EVERY_FRAME_USAGE_TYPE);
        assert!(usage.has_bind_flags());
        assert!(!MemoryUsage::GPU_ONLY_USAGE_TYPE.has_bind_flags());
    }
}
