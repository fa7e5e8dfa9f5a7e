//! Per-frame rolling buffer with transparent staging.
//!
//! The client maps, fills and unmaps one buffer per frame slot. Where the
//! backend can reach the requested memory from the CPU, those buffers feed
//! the GPU directly; otherwise they degrade to staging buffers and a single
//! GPU-only backing buffer receives a copy each frame. `prepare_buffers`
//! emits whichever barriers the active path requires.
//!
//! Resizes are recorded by `request_resize` and applied lazily: each frame
//! slot re-creates its mappable on its next `map`, and the replaced GPU
//! backing buffer is destroyed one full slot rotation later.

use kryne_core::ke_assert;
use kryne_graphics::barriers::{BarrierAccess, BarrierSyncStage, BufferMemoryBarrier};
use kryne_graphics::descs::{BufferCopyParameters, BufferCreateDesc, BufferMapping};
use kryne_graphics::enums::MemoryUsage;
use kryne_graphics::handles::{BufferHandle, CommandListHandle};
use kryne_graphics::{GraphicsBackend, GraphicsContext};

struct BufferToFree {
    buffer: BufferHandle,
    at_index: u8,
}

#[derive(Default)]
pub struct DynamicBuffer {
    mappable_buffers: Vec<BufferHandle>,
    sizes: Vec<u64>,
    mappable_recreate_desc: BufferCreateDesc,

    gpu_buffer: BufferHandle,
    gpu_recreate_desc: BufferCreateDesc,
    gpu_buffers_to_free: Vec<BufferToFree>,

    current_mapping: Option<BufferMapping>,
}

impl DynamicBuffer {
    pub fn new() -> Self {
        DynamicBuffer {
            mappable_buffers: Vec::new(),
            sizes: Vec::new(),
            mappable_recreate_desc: BufferCreateDesc::default(),
            gpu_buffer: BufferHandle::INVALID,
            gpu_recreate_desc: BufferCreateDesc::default(),
            gpu_buffers_to_free: Vec::new(),
            current_mapping: None,
        }
    }

    /// Creates the per-frame buffers. The descriptor must use the
    /// stage-every-frame usage type; whether a GPU backing buffer and the
    /// staging path are needed is decided by the backend.
    pub fn init<B: GraphicsBackend>(
        &mut self,
        graphics_context: &GraphicsContext<B>,
        buffer_desc: &BufferCreateDesc,
        frame_count: u8,
    ) {
        ke_assert!(
            buffer_desc.usage.usage_type() == MemoryUsage::STAGE_EVERY_FRAME_USAGE_TYPE,
            "dynamic buffer '{}' must use the stage-every-frame usage type",
            buffer_desc.desc.debug_name
        );

        self.mappable_buffers.clear();
        let base_buffer = graphics_context.create_buffer(buffer_desc);

        if graphics_context.needs_staging_buffer(base_buffer) {
            // Must go through staging buffers.
            self.gpu_buffer = base_buffer;
            self.gpu_recreate_desc = buffer_desc.clone();

            self.mappable_recreate_desc = BufferCreateDesc {
                desc: buffer_desc.desc.clone(),
                usage: MemoryUsage::STAGE_ONCE_USAGE_TYPE | MemoryUsage::TRANSFER_SRC_BUFFER,
            };
            for _ in 0..frame_count {
                self.mappable_buffers
                    .push(graphics_context.create_buffer(&self.mappable_recreate_desc));
            }
        } else {
            // The CPU writes straight into GPU-visible memory.
            self.gpu_buffer = BufferHandle::INVALID;
            self.mappable_recreate_desc = buffer_desc.clone();
            self.mappable_buffers.push(base_buffer);
            for _ in 1..frame_count {
                self.mappable_buffers
                    .push(graphics_context.create_buffer(&self.mappable_recreate_desc));
            }
        }

        self.sizes.clear();
        self.sizes
            .resize(frame_count as usize, self.mappable_recreate_desc.desc.size);
    }

    /// Records the new size; applied per frame slot on its next [`DynamicBuffer::map`].
    pub fn request_resize(&mut self, size: u64) {
        self.mappable_recreate_desc.desc.size = size;
        if self.gpu_buffer.is_valid() {
            self.gpu_recreate_desc.desc.size = size;
        }
    }

    /// Maps this frame slot's buffer, re-creating it first when a resize is
    /// pending. Returns the CPU pointer, or null on failure.
    pub fn map<B: GraphicsBackend>(
        &mut self,
        graphics_context: &GraphicsContext<B>,
        frame_index: u8,
    ) -> *mut u8 {
        if let Some(first) = self.gpu_buffers_to_free.first() {
            if first.at_index == frame_index {
                graphics_context.destroy_buffer(first.buffer);
                self.gpu_buffers_to_free.remove(0);
            }
        }

        let slot = frame_index as usize;
        if self.mappable_recreate_desc.desc.size != self.sizes[slot] {
            log::debug!(
                "dynamic buffer '{}': slot {} resizing {} -> {}",
                self.mappable_recreate_desc.desc.debug_name,
                slot,
                self.sizes[slot],
                self.mappable_recreate_desc.desc.size
            );
            graphics_context.destroy_buffer(self.mappable_buffers[slot]);
            self.mappable_buffers[slot] =
                graphics_context.create_buffer(&self.mappable_recreate_desc);

            if self.gpu_buffer.is_valid() {
                let frame_count = self.mappable_buffers.len() as u8;
                self.gpu_buffers_to_free.push(BufferToFree {
                    buffer: self.gpu_buffer,
                    at_index: (frame_index + frame_count - 1) % frame_count,
                });
                self.gpu_buffer = graphics_context.create_buffer(&self.gpu_recreate_desc);
            }

            self.sizes[slot] = self.mappable_recreate_desc.desc.size;
        }

        let mut mapping = BufferMapping::whole_buffer(self.mappable_buffers[slot]);
        mapping.size = self.sizes[slot];
        graphics_context.map_buffer(&mut mapping);
        let ptr = mapping.ptr;
        self.current_mapping = Some(mapping);
        ptr
    }

    pub fn unmap<B: GraphicsBackend>(&mut self, graphics_context: &GraphicsContext<B>) {
        if let Some(mapping) = self.current_mapping.as_mut() {
            graphics_context.unmap_buffer(mapping);
        }
        self.current_mapping = None;
    }

    /// Emits the barriers (and, on the staging path, the copy) that make
    /// this frame's data visible to consumers with the requested access.
    pub fn prepare_buffers<B: GraphicsBackend>(
        &self,
        graphics_context: &GraphicsContext<B>,
        command_list: CommandListHandle,
        access: BarrierAccess,
        frame_index: u8,
    ) {
        let slot = frame_index as usize;
        if !self.gpu_buffer.is_valid() {
            let memory_barrier = BufferMemoryBarrier {
                stages_src: BarrierSyncStage::ALL,
                stages_dst: BarrierSyncStage::ALL,
                access_src: BarrierAccess::ALL,
                access_dst: access,
                ..BufferMemoryBarrier::whole_buffer(self.mappable_buffers[slot])
            };
            graphics_context.place_memory_barriers(command_list, &[], &[memory_barrier], &[]);
        } else {
            let params = BufferCopyParameters {
                copy_size: self.sizes[slot],
                offset_src: 0,
                offset_dst: 0,
                buffer_src: self.mappable_buffers[slot],
                buffer_dst: self.gpu_buffer,
            };

            let pre_copy = [
                BufferMemoryBarrier {
                    stages_src: BarrierSyncStage::NONE,
                    stages_dst: BarrierSyncStage::TRANSFER,
                    access_src: BarrierAccess::ALL,
                    access_dst: BarrierAccess::TRANSFER_SRC,
                    ..BufferMemoryBarrier::whole_buffer(params.buffer_src)
                },
                BufferMemoryBarrier {
                    stages_src: BarrierSyncStage::NONE,
                    stages_dst: BarrierSyncStage::TRANSFER,
                    access_src: BarrierAccess::ALL,
                    access_dst: BarrierAccess::TRANSFER_DST,
                    ..BufferMemoryBarrier::whole_buffer(params.buffer_dst)
                },
            ];
            graphics_context.place_memory_barriers(command_list, &[], &pre_copy, &[]);

            graphics_context.copy_buffer(command_list, &params);

            let post_copy = BufferMemoryBarrier {
                stages_src: BarrierSyncStage::TRANSFER,
                stages_dst: BarrierSyncStage::ALL,
                access_src: BarrierAccess::TRANSFER_DST,
                access_dst: access,
                ..BufferMemoryBarrier::whole_buffer(params.buffer_dst)
            };
            graphics_context.place_memory_barriers(command_list, &[], &[post_copy], &[]);
        }
    }

    /// The buffer consumers should bind for this frame slot.
    pub fn buffer(&self, frame_index: u8) -> BufferHandle {
        if self.gpu_buffer.is_valid() {
            self.gpu_buffer
        } else {
            self.mappable_buffers[frame_index as usize]
        }
    }

    /// True when this buffer runs the staging-plus-copy path.
    pub fn uses_staging(&self) -> bool {
        self.gpu_buffer.is_valid()
    }

    pub fn destroy<B: GraphicsBackend>(&mut self, graphics_context: &GraphicsContext<B>) {
        for buffer in self.mappable_buffers.drain(..) {
            graphics_context.destroy_buffer(buffer);
        }
        for pending in self.gpu_buffers_to_free.drain(..) {
            graphics_context.destroy_buffer(pending.buffer);
        }
        if self.gpu_buffer.is_valid() {
            graphics_context.destroy_buffer(self.gpu_buffer);
            self.gpu_buffer = BufferHandle::INVALID;
        }
    }
}
