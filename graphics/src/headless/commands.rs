//! Command-list recording for the headless device.
//!
//! Commands are not executed against any GPU; they are appended to an
//! inspectable log per command list, which is what the test suites assert
//! against.

use crate::barriers::{BufferMemoryBarrier, GlobalMemoryBarrier, TextureMemoryBarrier};
use crate::descs::{
    BufferCopyParameters, BufferSpan, DrawIndexedInstancedDesc, DrawInstancedDesc, Rect,
    SubResourceIndexing, TextureMemoryFootprint, Viewport,
};
use crate::handles::*;
use fxhash::FxHashMap;

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass(RenderPassHandle),
    EndRenderPass,
    BeginComputePass,
    EndComputePass,
    GlobalBarrier(GlobalMemoryBarrier),
    BufferBarrier(BufferMemoryBarrier),
    TextureBarrier(TextureMemoryBarrier),
    CopyBuffer(BufferCopyParameters),
    SetTextureData {
        staging_buffer: BufferHandle,
        dst_texture: TextureHandle,
        footprint: TextureMemoryFootprint,
        sub_resource: SubResourceIndexing,
        byte_size: u64,
    },
    DeclareTextureViewUsage(Vec<TextureViewHandle>),
    SetViewport(Viewport),
    SetScissorsRect(Rect),
    SetIndexBuffer {
        view: BufferSpan,
        is_u16: bool,
    },
    SetVertexBuffers(Vec<BufferSpan>),
    SetGraphicsPipeline(GraphicsPipelineHandle),
    SetGraphicsPushConstant {
        layout: PipelineLayoutHandle,
        data: Vec<u32>,
        index: u32,
        offset: u32,
    },
    SetGraphicsDescriptorSets {
        layout: PipelineLayoutHandle,
        sets: Vec<DescriptorSetHandle>,
        frame_index: u8,
    },
    SetComputePipeline(ComputePipelineHandle),
    SetComputeDescriptorSets {
        layout: PipelineLayoutHandle,
        sets: Vec<DescriptorSetHandle>,
        frame_index: u8,
    },
    DrawInstanced(DrawInstancedDesc),
    DrawIndexedInstanced(DrawIndexedInstancedDesc),
    Dispatch((u32, u32, u32)),
}

pub(super) struct RecordedList {
    pub frame_id: u64,
    pub open: bool,
    pub commands: Vec<RecordedCommand>,
}

#[derive(Default)]
pub(super) struct CommandRegistry {
    pub next_id: usize,
    pub lists: FxHashMap<usize, RecordedList>,
}

impl CommandRegistry {
    /// Registers (or re-opens, when recycled) a command list.
    pub fn open(&mut self, handle: CommandListHandle, frame_id: u64) {
        let entry = self.lists.entry(handle.0).or_insert(RecordedList {
            frame_id,
            open: true,
            commands: Vec::new(),
        });
        entry.frame_id = frame_id;
        entry.open = true;
        entry.commands.clear();
    }

    pub fn close(&mut self, handle: CommandListHandle) -> bool {
        match self.lists.get_mut(&handle.0) {
            Some(list) if list.open => {
                list.open = false;
                true
            }
            _ => false,
        }
    }

    pub fn record(&mut self, handle: CommandListHandle, command: RecordedCommand) -> bool {
        match self.lists.get_mut(&handle.0) {
            Some(list) if list.open => {
                list.commands.push(command);
                true
            }
            _ => false,
        }
    }
}
