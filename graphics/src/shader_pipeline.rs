//! Shader, descriptor-set and pipeline descriptors.

use crate::enums::TextureTypes;
use crate::handles::{
    DescriptorSetLayoutHandle, PipelineLayoutHandle, RenderPassHandle, ShaderModuleHandle,
};
use bitflags::bitflags;
use kryne_core::ke_verify;
use smallvec::SmallVec;

bitflags! {
    pub struct ShaderVisibility: u8 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
        const ALL      = Self::VERTEX.bits | Self::FRAGMENT.bits | Self::COMPUTE.bits;
    }
}

impl Default for ShaderVisibility {
    fn default() -> Self {
        ShaderVisibility::ALL
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// What a descriptor binding holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorType {
    Sampler,
    SampledTexture,
    StorageReadOnlyTexture,
    StorageReadWriteTexture,
    ConstantBuffer,
    StorageReadOnlyBuffer,
    StorageReadWriteBuffer,
}

impl DescriptorType {
    pub const COUNT: usize = 7;

    #[inline]
    pub(crate) fn to_index(self) -> u32 {
        match self {
            DescriptorType::Sampler => 0,
            DescriptorType::SampledTexture => 1,
            DescriptorType::StorageReadOnlyTexture => 2,
            DescriptorType::StorageReadWriteTexture => 3,
            DescriptorType::ConstantBuffer => 4,
            DescriptorType::StorageReadOnlyBuffer => 5,
            DescriptorType::StorageReadWriteBuffer => 6,
        }
    }

    #[inline]
    pub(crate) fn from_index(index: u32) -> Option<DescriptorType> {
        match index {
            0 => Some(DescriptorType::Sampler),
            1 => Some(DescriptorType::SampledTexture),
            2 => Some(DescriptorType::StorageReadOnlyTexture),
            3 => Some(DescriptorType::StorageReadWriteTexture),
            4 => Some(DescriptorType::ConstantBuffer),
            5 => Some(DescriptorType::StorageReadOnlyBuffer),
            6 => Some(DescriptorType::StorageReadWriteBuffer),
            _ => None,
        }
    }

    pub fn is_texture(self) -> bool {
        matches!(
            self,
            DescriptorType::SampledTexture
                | DescriptorType::StorageReadOnlyTexture
                | DescriptorType::StorageReadWriteTexture
        )
    }

    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorType::ConstantBuffer
                | DescriptorType::StorageReadOnlyBuffer
                | DescriptorType::StorageReadWriteBuffer
        )
    }
}

/// One binding of a descriptor-set layout.
#[derive(Clone, Debug, PartialEq)]
pub struct DescriptorBindingDesc {
    pub descriptor_type: DescriptorType,
    pub count: u32,
    /// Explicit binding index, or [`DescriptorBindingDesc::IMPLICIT_BINDING_INDEX`]
    /// to assign indices densely from zero in declaration order.
    pub binding_index: u32,
    pub visibility: ShaderVisibility,
    /// For texture bindings: the expected view dimensionality.
    pub texture_type: Option<TextureTypes>,
}

impl DescriptorBindingDesc {
    pub const IMPLICIT_BINDING_INDEX: u32 = u32::MAX;

    pub fn new(descriptor_type: DescriptorType, visibility: ShaderVisibility) -> Self {
        DescriptorBindingDesc {
            descriptor_type,
            count: 1,
            binding_index: Self::IMPLICIT_BINDING_INDEX,
            visibility,
            texture_type: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DescriptorSetDesc {
    pub bindings: Vec<DescriptorBindingDesc>,
}

impl DescriptorSetDesc {
    pub fn validate(&self) -> bool {
        ke_verify!(!self.bindings.is_empty(), "descriptor set layout with no bindings")
            && self
                .bindings
                .iter()
                .all(|binding| ke_verify!(binding.count > 0, "descriptor binding with zero count"))
    }
}

/// A push-constant range within a pipeline layout.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PushConstantDesc {
    pub offset: u32,
    pub size_bytes: u32,
    pub visibility: ShaderVisibility,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineLayoutDesc {
    pub descriptor_sets: Vec<DescriptorSetLayoutHandle>,
    pub push_constants: Vec<PushConstantDesc>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
}

impl Default for PrimitiveTopology {
    fn default() -> Self {
        PrimitiveTopology::TriangleList
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InputAssemblyDesc {
    pub topology: PrimitiveTopology,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VertexAttributeFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Unorm8x4,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VertexAttributeDesc {
    pub location: u32,
    pub binding: u32,
    pub offset: u32,
    pub format: VertexAttributeFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VertexBindingDesc {
    pub binding: u32,
    pub stride: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexInputDesc {
    pub bindings: Vec<VertexBindingDesc>,
    pub attributes: Vec<VertexAttributeDesc>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DepthStencilStateDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
}

impl Default for DepthStencilStateDesc {
    fn default() -> Self {
        DepthStencilStateDesc {
            depth_test: false,
            depth_write: false,
            depth_compare: CompareOp::LessEqual,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderStageDesc {
    pub module: ShaderModuleHandle,
    pub stage: ShaderStage,
    pub entry_point: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GraphicsPipelineDesc {
    pub stages: SmallVec<[ShaderStageDesc; 2]>,
    pub vertex_input: VertexInputDesc,
    pub input_assembly: InputAssemblyDesc,
    pub depth_stencil: DepthStencilStateDesc,
    pub pipeline_layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub debug_name: String,
}

impl GraphicsPipelineDesc {
    pub fn validate(&self) -> bool {
        ke_verify!(
            !self.stages.is_empty(),
            "graphics pipeline '{}' has no shader stages",
            self.debug_name
        ) && ke_verify!(
            self.pipeline_layout.is_valid(),
            "graphics pipeline '{}' has no layout",
            self.debug_name
        ) && self.stages.iter().all(|stage| {
            ke_verify!(
                stage.module.is_valid(),
                "graphics pipeline '{}' binds an invalid shader module",
                self.debug_name
            )
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComputePipelineDesc {
    pub stage: ShaderStageDesc,
    pub pipeline_layout: PipelineLayoutHandle,
    pub debug_name: String,
}

impl ComputePipelineDesc {
    pub fn validate(&self) -> bool {
        ke_verify!(
            self.stage.module.is_valid(),
            "compute pipeline '{}' binds an invalid shader module",
            self.debug_name
        ) && ke_verify!(
            self.pipeline_layout.is_valid(),
            "compute pipeline '{}' has no layout",
            self.debug_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kryne_core::assert::ScopedAssertCatcher;

    #[test]
    fn descriptor_type_index_round_trip() {
        for index in 0..DescriptorType::COUNT as u32 {
            let ty = DescriptorType::from_index(index).unwrap();
            assert_eq!(ty.to_index(), index);
        }
        assert_eq!(DescriptorType::from_index(99), None);
    }

    #[test]
    fn set_desc_validation() {
        let _catcher = ScopedAssertCatcher::new();
        assert!(!DescriptorSetDesc::default().validate());

        let desc = DescriptorSetDesc {
            bindings: vec![DescriptorBindingDesc::new(
                DescriptorType::ConstantBuffer,
                ShaderVisibility::VERTEX,
            )],
        };
        assert!(desc.validate());
    }
}
