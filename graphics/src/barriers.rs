//! Memory barrier descriptions.
//!
//! Barriers are expressed in backend-neutral sync-stage / access / layout
//! terms; each backend lowers them to its native granularity. Backends that
//! only support global barriers (`SUPPORTS_NON_GLOBAL_BARRIERS == false`)
//! may widen buffer and texture barriers as needed.

use crate::enums::{TextureLayout, TexturePlane};
use crate::handles::{BufferHandle, TextureHandle};
use bitflags::bitflags;

bitflags! {
    pub struct BarrierSyncStage: u32 {
        const NONE                         = 1 << 0;
        const ALL                          = 1 << 1;
        const EXECUTE_INDIRECT             = 1 << 2;
        const INPUT_ASSEMBLY               = 1 << 3;
        const VERTEX_SHADING               = 1 << 4;
        const FRAGMENT_SHADING             = 1 << 5;
        const COLOR_BLENDING               = 1 << 6;
        const DEPTH_STENCIL_TESTING        = 1 << 7;
        const TRANSFER                     = 1 << 8;
        const MULTI_SAMPLE_RESOLVE         = 1 << 9;
        const COMPUTE_SHADING              = 1 << 10;
        const ALL_SHADING                  = 1 << 11;
    }
}

impl Default for BarrierSyncStage {
    fn default() -> Self {
        BarrierSyncStage::ALL
    }
}

bitflags! {
    pub struct BarrierAccess: u32 {
        const VERTEX_BUFFER        = 1 << 0;
        const INDEX_BUFFER         = 1 << 1;
        const CONSTANT_BUFFER      = 1 << 2;
        const INDIRECT_BUFFER      = 1 << 3;
        const COLOR_ATTACHMENT     = 1 << 4;
        const DEPTH_STENCIL_READ   = 1 << 5;
        const DEPTH_STENCIL_WRITE  = 1 << 6;
        const SHADER_RESOURCE      = 1 << 7;
        const UNORDERED_ACCESS     = 1 << 8;
        const RESOLVE_SRC          = 1 << 9;
        const RESOLVE_DST          = 1 << 10;
        const TRANSFER_SRC         = 1 << 11;
        const TRANSFER_DST         = 1 << 12;
        const ALL_READ             = 1 << 13;
        const ALL_WRITE            = 1 << 14;
        const ALL                  = Self::ALL_READ.bits | Self::ALL_WRITE.bits;
        const NONE                 = 1 << 15;
    }
}

impl Default for BarrierAccess {
    fn default() -> Self {
        BarrierAccess::ALL
    }
}

/// Execution + memory dependency with no resource granularity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GlobalMemoryBarrier {
    pub stages_src: BarrierSyncStage,
    pub stages_dst: BarrierSyncStage,
    pub access_src: BarrierAccess,
    pub access_dst: BarrierAccess,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BufferMemoryBarrier {
    pub stages_src: BarrierSyncStage,
    pub stages_dst: BarrierSyncStage,
    pub access_src: BarrierAccess,
    pub access_dst: BarrierAccess,

    pub offset: u64,
    pub size: u64,
    pub buffer: BufferHandle,
}

impl BufferMemoryBarrier {
    pub fn whole_buffer(buffer: BufferHandle) -> Self {
        BufferMemoryBarrier {
            stages_src: BarrierSyncStage::ALL,
            stages_dst: BarrierSyncStage::ALL,
            access_src: BarrierAccess::ALL,
            access_dst: BarrierAccess::ALL,
            offset: 0,
            size: u64::MAX,
            buffer,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TextureMemoryBarrier {
    pub stages_src: BarrierSyncStage,
    pub stages_dst: BarrierSyncStage,
    pub access_src: BarrierAccess,
    pub access_dst: BarrierAccess,

    pub texture: TextureHandle,
    pub array_start: u16,
    pub array_count: u16,
    pub layout_src: TextureLayout,
    pub layout_dst: TextureLayout,
    pub mip_start: u8,
    pub mip_count: u8,
    pub planes: TexturePlane,
}

impl TextureMemoryBarrier {
    /// Barrier over the texture's first subresource, color plane.
    pub fn new(texture: TextureHandle) -> Self {
        TextureMemoryBarrier {
            stages_src: BarrierSyncStage::ALL,
            stages_dst: BarrierSyncStage::ALL,
            access_src: BarrierAccess::ALL,
            access_dst: BarrierAccess::ALL,
            texture,
            array_start: 0,
            array_count: 1,
            layout_src: TextureLayout::Unknown,
            layout_dst: TextureLayout::Unknown,
            mip_start: 0,
            mip_count: 1,
            planes: TexturePlane::COLOR,
        }
    }
}
