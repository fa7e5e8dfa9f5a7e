//! Headless software backend.
//!
//! A complete implementation of the backend contract with no GPU behind it:
//! buffers are byte arrays, command lists are inspectable logs, and a frame
//! "executes" the moment it is ended. It drives the test suites and doubles
//! as a null device for tooling that needs the runtime without a swapchain.
//!
//! Memory behaviour is configurable: a [`StagingPolicy`] decides which
//! usage types are CPU-reachable, so both data paths of clients such as the
//! dynamic buffer can be exercised.

mod commands;

pub use commands::RecordedCommand;

use crate::backend::{ApplicationInfo, GraphicsBackend};
use crate::barriers::{BufferMemoryBarrier, GlobalMemoryBarrier, TextureMemoryBarrier};
use crate::context::INITIAL_FRAME_ID;
use crate::descriptor_set_manager::{
    pack_binding_indices, DescriptorData, DescriptorSetUpdateTracker, DescriptorSetWriteInfo,
};
use crate::descs::*;
use crate::enums::{MemoryUsage, QueueType, TextureFormat, TextureLayout, TextureTypes, TextureUsage};
use crate::frame_context::{FrameContext, FrameFence};
use crate::handles::*;
use crate::pipeline_layout::PipelineLayoutModel;
use crate::shader_pipeline::{
    ComputePipelineDesc, DescriptorSetDesc, GraphicsPipelineDesc, PipelineLayoutDesc,
};
use commands::CommandRegistry;
use fxhash::FxHashMap;
use kryne_core::common::hashing::hash_64;
use kryne_core::memory::GenerationalPool;
use kryne_core::{ke_assert, ke_verify, verify_or_return};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Which memory usage types the CPU can reach directly on this device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StagingPolicy {
    /// Unified memory: everything but GPU-only allocations is mappable.
    UnifiedMemory,
    /// Discrete adapter: only the explicit staging/readback heaps map;
    /// per-frame staged data must be copied into GPU memory.
    DiscreteMemory,
}

impl StagingPolicy {
    fn is_cpu_reachable(self, usage: MemoryUsage) -> bool {
        let usage_type = usage.usage_type();
        match self {
            StagingPolicy::UnifiedMemory => usage_type != MemoryUsage::GPU_ONLY_USAGE_TYPE,
            StagingPolicy::DiscreteMemory => {
                usage_type == MemoryUsage::STAGE_ONCE_USAGE_TYPE
                    || usage_type == MemoryUsage::READBACK_USAGE_TYPE
            }
        }
    }

    fn needs_staging(self, usage: MemoryUsage) -> bool {
        !self.is_cpu_reachable(usage)
    }
}

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub application_info: ApplicationInfo,
    /// In-flight frame slots; 2 or 3 in practice.
    pub frame_context_count: u8,
    pub staging_policy: StagingPolicy,
    pub swapchain_extent: (u32, u32),
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        HeadlessConfig {
            application_info: ApplicationInfo {
                application_name: "headless".to_owned(),
                application_version: 0,
            },
            frame_context_count: 3,
            staging_policy: StagingPolicy::UnifiedMemory,
            swapchain_extent: (1280, 720),
        }
    }
}

struct BufferEntry {
    usage: MemoryUsage,
    size: u64,
    fingerprint: u64,
    debug_name: String,
    data: Mutex<Box<[u8]>>,
}

struct TextureEntry {
    desc: TextureDesc,
    usage: TextureUsage,
    fingerprint: u64,
    layout: Mutex<TextureLayout>,
}

struct TextureViewEntry {
    desc: TextureViewDesc,
}

struct BufferViewEntry {
    desc: BufferViewDesc,
}

struct SamplerEntry {
    desc: SamplerDesc,
}

struct RenderTargetViewEntry {
    desc: RenderTargetViewDesc,
}

struct RenderPassEntry {
    desc: RenderPassDesc,
}

struct ShaderModuleEntry {
    byte_size: usize,
    bytecode_hash: u64,
}

struct PipelineLayoutEntry {
    model: PipelineLayoutModel,
}

struct GraphicsPipelineEntry {
    desc: GraphicsPipelineDesc,
}

struct ComputePipelineEntry {
    desc: ComputePipelineDesc,
}

struct DescriptorSetLayoutEntry {
    desc: DescriptorSetDesc,
}

type SetContents = FxHashMap<(u32, u32), DescriptorData>;

struct DescriptorSetEntry {
    layout: DescriptorSetLayoutHandle,
    /// One copy per in-flight frame slot.
    copies: Mutex<Vec<SetContents>>,
}

#[derive(Default)]
struct LiveCounters {
    buffers: AtomicI64,
    textures: AtomicI64,
}

struct SwapchainState {
    textures: Vec<TextureHandle>,
    render_target_views: Vec<RenderTargetViewHandle>,
    present_index: AtomicU32,
}

pub struct HeadlessBackend {
    config: HeadlessConfig,

    buffers: GenerationalPool<BufferEntry>,
    textures: GenerationalPool<TextureEntry>,
    texture_views: GenerationalPool<TextureViewEntry>,
    buffer_views: GenerationalPool<BufferViewEntry>,
    samplers: GenerationalPool<SamplerEntry>,
    render_target_views: GenerationalPool<RenderTargetViewEntry>,
    render_passes: GenerationalPool<RenderPassEntry>,
    shader_modules: GenerationalPool<ShaderModuleEntry>,
    pipeline_layouts: GenerationalPool<PipelineLayoutEntry>,
    graphics_pipelines: GenerationalPool<GraphicsPipelineEntry>,
    compute_pipelines: GenerationalPool<ComputePipelineEntry>,
    descriptor_set_layouts: GenerationalPool<DescriptorSetLayoutEntry>,
    descriptor_sets: GenerationalPool<DescriptorSetEntry>,

    live: LiveCounters,

    fence: FrameFence,
    frame_contexts: Vec<FrameContext>,
    descriptor_tracker: Mutex<DescriptorSetUpdateTracker>,
    commands: Mutex<CommandRegistry>,
    swapchain: SwapchainState,
}

fn fingerprint_of(debug: &impl std::fmt::Debug) -> u64 {
    hash_64(format!("{:?}", debug).as_bytes())
}

impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        ke_assert!(config.frame_context_count >= 2);
        let frame_count = config.frame_context_count as usize;

        let backend = HeadlessBackend {
            buffers: GenerationalPool::new(),
            textures: GenerationalPool::new(),
            texture_views: GenerationalPool::new(),
            buffer_views: GenerationalPool::new(),
            samplers: GenerationalPool::new(),
            render_target_views: GenerationalPool::new(),
            render_passes: GenerationalPool::new(),
            shader_modules: GenerationalPool::new(),
            pipeline_layouts: GenerationalPool::new(),
            graphics_pipelines: GenerationalPool::new(),
            compute_pipelines: GenerationalPool::new(),
            descriptor_set_layouts: GenerationalPool::new(),
            descriptor_sets: GenerationalPool::new(),
            live: LiveCounters::default(),
            fence: FrameFence::new(),
            frame_contexts: (0..frame_count).map(|_| FrameContext::new()).collect(),
            descriptor_tracker: Mutex::new(DescriptorSetUpdateTracker::new(
                frame_count,
                (INITIAL_FRAME_ID % frame_count as u64) as usize,
            )),
            commands: Mutex::new(CommandRegistry::default()),
            swapchain: SwapchainState {
                textures: Vec::new(),
                render_target_views: Vec::new(),
                present_index: AtomicU32::new((INITIAL_FRAME_ID % frame_count as u64) as u32),
            },
            config,
        };

        backend.frame_contexts[(INITIAL_FRAME_ID % frame_count as u64) as usize]
            .prepare_for_next_frame(INITIAL_FRAME_ID);
        backend.init_swapchain()
    }

    fn init_swapchain(mut self) -> Self {
        let (width, height) = self.config.swapchain_extent;
        let count = self.config.frame_context_count;
        let mut textures = Vec::new();
        let mut views = Vec::new();
        for image in 0..count {
            let desc = TextureCreateDesc {
                desc: TextureDesc {
                    dimensions: (width, height, 1),
                    format: TextureFormat::Bgra8Unorm,
                    array_size: 1,
                    mip_count: 1,
                    texture_type: TextureTypes::Single2D,
                    debug_name: format!("swapchain/{}", image),
                },
                memory_usage: MemoryUsage::GPU_ONLY_USAGE_TYPE,
                usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::TRANSFER_SOURCE,
            };
            let texture = self.create_texture(&desc);
            let view = self.create_render_target_view(&RenderTargetViewDesc {
                texture,
                format: desc.desc.format,
                texture_type: TextureTypes::Single2D,
                mip_level: 0,
                array_range: (0, 1),
                plane: desc.desc.format.aspect_planes(),
                debug_name: format!("swapchain-rtv/{}", image),
            });
            textures.push(texture);
            views.push(view);
        }
        self.swapchain.textures = textures;
        self.swapchain.render_target_views = views;
        self
    }

    pub fn staging_policy(&self) -> StagingPolicy {
        self.config.staging_policy
    }

    fn frame_context(&self, frame_id: u64) -> &FrameContext {
        &self.frame_contexts[(frame_id % self.frame_contexts.len() as u64) as usize]
    }

    fn record(&self, command_list: CommandListHandle, command: RecordedCommand) {
        let recorded = self.commands.lock().record(command_list, command);
        ke_assert!(recorded, "recording into a command list that is not open");
    }

    fn flush_pool_frees(&self) {
        self.buffers.flush_deferred_frees();
        self.textures.flush_deferred_frees();
        self.texture_views.flush_deferred_frees();
        self.buffer_views.flush_deferred_frees();
        self.samplers.flush_deferred_frees();
        self.render_target_views.flush_deferred_frees();
        self.render_passes.flush_deferred_frees();
        self.descriptor_sets.flush_deferred_frees();
    }

    // ---------------------------------------------------------------------
    // Inspection, for tests and tooling

    /// Commands recorded into `command_list`, in order.
    pub fn recorded_commands(&self, command_list: CommandListHandle) -> Vec<RecordedCommand> {
        self.commands
            .lock()
            .lists
            .get(&command_list.0)
            .map(|list| list.commands.clone())
            .unwrap_or_default()
    }

    /// The given frame slot's copy of a descriptor set, keyed by
    /// `(packed binding id, array index)`.
    pub fn descriptor_set_contents(
        &self,
        set: DescriptorSetHandle,
        frame_index: u8,
    ) -> Option<SetContents> {
        let entry = self.descriptor_sets.get(set.0)?;
        entry.copies.lock().get(frame_index as usize).cloned()
    }

    pub fn buffer_bytes(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.buffers.get(buffer.0).map(|entry| entry.data.lock().to_vec())
    }

    pub fn texture_layout(&self, texture: TextureHandle) -> Option<TextureLayout> {
        self.textures.get(texture.0).map(|entry| *entry.layout.lock())
    }

    pub fn live_buffer_count(&self) -> i64 {
        self.live.buffers.load(Ordering::Relaxed)
    }

    pub fn live_texture_count(&self) -> i64 {
        self.live.textures.load(Ordering::Relaxed)
    }

    pub fn buffer_size(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(buffer.0).map(|entry| entry.size)
    }

    pub fn buffer_fingerprint(&self, buffer: BufferHandle) -> Option<u64> {
        self.buffers.get(buffer.0).map(|entry| entry.fingerprint)
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(texture.0).map(|entry| entry.desc.clone())
    }

    pub fn texture_fingerprint(&self, texture: TextureHandle) -> Option<u64> {
        self.textures.get(texture.0).map(|entry| entry.fingerprint)
    }

    pub fn texture_view_desc(&self, view: TextureViewHandle) -> Option<TextureViewDesc> {
        self.texture_views.get(view.0).map(|entry| entry.desc.clone())
    }

    pub fn buffer_view_desc(&self, view: BufferViewHandle) -> Option<BufferViewDesc> {
        self.buffer_views.get(view.0).map(|entry| entry.desc.clone())
    }

    pub fn sampler_desc(&self, sampler: SamplerHandle) -> Option<SamplerDesc> {
        self.samplers.get(sampler.0).map(|entry| entry.desc.clone())
    }

    pub fn render_target_view_desc(
        &self,
        view: RenderTargetViewHandle,
    ) -> Option<RenderTargetViewDesc> {
        self.render_target_views
            .get(view.0)
            .map(|entry| entry.desc.clone())
    }

    pub fn render_pass_desc(&self, render_pass: RenderPassHandle) -> Option<RenderPassDesc> {
        self.render_passes
            .get(render_pass.0)
            .map(|entry| entry.desc.clone())
    }

    /// Byte size and content hash of a registered shader module.
    pub fn shader_module_info(&self, module: ShaderModuleHandle) -> Option<(usize, u64)> {
        self.shader_modules
            .get(module.0)
            .map(|entry| (entry.byte_size, entry.bytecode_hash))
    }

    pub fn pipeline_layout_model(&self, layout: PipelineLayoutHandle) -> Option<PipelineLayoutModel> {
        self.pipeline_layouts
            .get(layout.0)
            .map(|entry| entry.model.clone())
    }

    pub fn descriptor_set_layout_desc(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> Option<DescriptorSetDesc> {
        self.descriptor_set_layouts
            .get(layout.0)
            .map(|entry| entry.desc.clone())
    }

    pub fn descriptor_set_layout_of(&self, set: DescriptorSetHandle) -> Option<DescriptorSetLayoutHandle> {
        self.descriptor_sets.get(set.0).map(|entry| entry.layout)
    }

    pub fn graphics_pipeline_desc(
        &self,
        pipeline: GraphicsPipelineHandle,
    ) -> Option<GraphicsPipelineDesc> {
        self.graphics_pipelines
            .get(pipeline.0)
            .map(|entry| entry.desc.clone())
    }

    pub fn compute_pipeline_desc(
        &self,
        pipeline: ComputePipelineHandle,
    ) -> Option<ComputePipelineDesc> {
        self.compute_pipelines
            .get(pipeline.0)
            .map(|entry| entry.desc.clone())
    }

    fn apply_set_write(
        copies: &mut [SetContents],
        frame_index: usize,
        index_raw: u32,
        array_offset: u32,
        data: &[DescriptorData],
    ) {
        let contents = &mut copies[frame_index];
        for (extra, descriptor) in data.iter().enumerate() {
            contents.insert((index_raw, array_offset + extra as u32), *descriptor);
        }
    }
}

impl GraphicsBackend for HeadlessBackend {
    const SUPPORTS_NON_GLOBAL_BARRIERS: bool = true;
    const RENDER_PASS_NEEDS_USAGE_DECLARATION: bool = false;
    const COMPUTE_PASS_NEEDS_USAGE_DECLARATION: bool = false;
    const SHADER_FILE_EXTENSION: &'static str = "spv";

    fn frame_context_count(&self) -> u8 {
        self.config.frame_context_count
    }

    fn end_frame(&self, frame_id: u64) {
        let count = self.frame_contexts.len() as u64;

        // Everything recorded this frame must have been closed.
        let current = self.frame_context(frame_id);
        for queue in &[QueueType::Graphics, QueueType::Compute, QueueType::Transfer] {
            ke_assert!(
                current.allocator(*queue).open_count() == 0,
                "frame ended with open command lists"
            );
        }

        // No GPU: the frame completes the moment it is submitted.
        self.fence.signal(frame_id);
        log::trace!("headless frame {} executed", frame_id);

        // Roll per-frame state over to the slot the next frame will use.
        let next_frame_id = frame_id + 1;
        self.frame_context(next_frame_id).prepare_for_next_frame(next_frame_id);
        self.swapchain
            .present_index
            .store((next_frame_id % count) as u32, Ordering::Release);

        {
            let mut tracker = self.descriptor_tracker.lock();
            let next_slot = (next_frame_id % count) as usize;
            tracker.next_frame(|op| {
                if let Some(entry) = self.descriptor_sets.get(op.set.0) {
                    let mut copies = entry.copies.lock();
                    Self::apply_set_write(
                        &mut copies,
                        next_slot,
                        op.index.to_raw(),
                        op.array_offset,
                        &op.data,
                    );
                }
            });
        }

        if frame_id % count == 0 {
            self.flush_pool_frees();
        }
    }

    fn wait_for_frame(&self, frame_id: u64) {
        self.fence.wait_for_frame(frame_id);
    }

    fn is_frame_executed(&self, frame_id: u64) -> bool {
        self.fence.is_frame_executed(frame_id)
    }

    fn application_info(&self) -> &ApplicationInfo {
        &self.config.application_info
    }

    // ---------------------------------------------------------------------
    // Resources

    fn create_buffer(&self, desc: &BufferCreateDesc) -> BufferHandle {
        if !desc.validate() {
            return BufferHandle::INVALID;
        }
        let handle = self.buffers.allocate(BufferEntry {
            usage: desc.usage,
            size: desc.desc.size,
            fingerprint: fingerprint_of(desc),
            debug_name: desc.desc.debug_name.clone(),
            data: Mutex::new(vec![0u8; desc.desc.size as usize].into_boxed_slice()),
        });
        if handle.is_some() {
            self.live.buffers.fetch_add(1, Ordering::Relaxed);
        }
        BufferHandle(handle)
    }

    fn needs_staging_buffer(&self, buffer: BufferHandle) -> bool {
        match self.buffers.get(buffer.0) {
            Some(entry) => self.config.staging_policy.needs_staging(entry.usage),
            None => {
                ke_assert!(false, "needs_staging_buffer on a stale buffer handle");
                false
            }
        }
    }

    fn destroy_buffer(&self, buffer: BufferHandle) -> bool {
        let destroyed = self.buffers.free_deferred(buffer.0).is_some();
        if destroyed {
            self.live.buffers.fetch_sub(1, Ordering::Relaxed);
        }
        destroyed
    }

    fn create_texture(&self, desc: &TextureCreateDesc) -> TextureHandle {
        if !desc.validate() {
            return TextureHandle::INVALID;
        }
        let handle = self.textures.allocate(TextureEntry {
            desc: desc.desc.clone(),
            usage: desc.usage,
            fingerprint: fingerprint_of(desc),
            layout: Mutex::new(TextureLayout::Unknown),
        });
        if handle.is_some() {
            self.live.textures.fetch_add(1, Ordering::Relaxed);
        }
        TextureHandle(handle)
    }

    fn fetch_texture_sub_resources_memory_footprints(
        &self,
        desc: &TextureDesc,
    ) -> Vec<TextureMemoryFootprint> {
        // D3D-style packing: rows padded to 256 bytes, sub-resources ordered
        // mip-major within each array slice.
        const ROW_ALIGNMENT: u32 = 256;
        let mut footprints = Vec::with_capacity(desc.array_size as usize * desc.mip_count as usize);
        let mut offset = 0u64;
        for _slice in 0..desc.array_size {
            for mip in 0..desc.mip_count {
                let width = (desc.dimensions.0 >> mip).max(1);
                let height = (desc.dimensions.1 >> mip).max(1);
                let depth = (desc.dimensions.2 >> mip).max(1);
                let row_pitch = kryne_core::common::alignment::align_up(
                    width * desc.format.bytes_per_pixel(),
                    ROW_ALIGNMENT,
                );
                let footprint = TextureMemoryFootprint {
                    offset,
                    width,
                    height,
                    depth,
                    row_pitch,
                    format: desc.format,
                };
                offset += footprint.slice_byte_size();
                footprints.push(footprint);
            }
        }
        footprints
    }

    fn destroy_texture(&self, texture: TextureHandle) -> bool {
        let destroyed = self.textures.free_deferred(texture.0).is_some();
        if destroyed {
            self.live.textures.fetch_sub(1, Ordering::Relaxed);
        }
        destroyed
    }

    fn create_texture_view(&self, desc: &TextureViewDesc) -> TextureViewHandle {
        if !desc.validate() || !ke_verify!(self.textures.get(desc.texture.0).is_some()) {
            return TextureViewHandle::INVALID;
        }
        TextureViewHandle(self.texture_views.allocate(TextureViewEntry { desc: desc.clone() }))
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) -> bool {
        self.texture_views.free_deferred(view.0).is_some()
    }

    fn create_buffer_view(&self, desc: &BufferViewDesc) -> BufferViewHandle {
        if !desc.validate() || !ke_verify!(self.buffers.get(desc.buffer.0).is_some()) {
            return BufferViewHandle::INVALID;
        }
        BufferViewHandle(self.buffer_views.allocate(BufferViewEntry { desc: desc.clone() }))
    }

    fn destroy_buffer_view(&self, view: BufferViewHandle) -> bool {
        self.buffer_views.free_deferred(view.0).is_some()
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> SamplerHandle {
        SamplerHandle(self.samplers.allocate(SamplerEntry { desc: desc.clone() }))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) -> bool {
        self.samplers.free_deferred(sampler.0).is_some()
    }

    fn create_render_target_view(&self, desc: &RenderTargetViewDesc) -> RenderTargetViewHandle {
        if !desc.validate() || !ke_verify!(self.textures.get(desc.texture.0).is_some()) {
            return RenderTargetViewHandle::INVALID;
        }
        RenderTargetViewHandle(
            self.render_target_views
                .allocate(RenderTargetViewEntry { desc: desc.clone() }),
        )
    }

    fn destroy_render_target_view(&self, view: RenderTargetViewHandle) -> bool {
        self.render_target_views.free_deferred(view.0).is_some()
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderPassHandle {
        if !desc.validate() {
            return RenderPassHandle::INVALID;
        }
        for attachment in &desc.color_attachments {
            verify_or_return!(
                self.render_target_views.get(attachment.rtv.0).is_some(),
                RenderPassHandle::INVALID
            );
        }
        if let Some(depth) = &desc.depth_stencil_attachment {
            verify_or_return!(
                self.render_target_views.get(depth.attachment.rtv.0).is_some(),
                RenderPassHandle::INVALID
            );
        }
        RenderPassHandle(self.render_passes.allocate(RenderPassEntry { desc: desc.clone() }))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) -> bool {
        self.render_passes.free_deferred(render_pass.0).is_some()
    }

    // ---------------------------------------------------------------------
    // Swapchain

    fn get_present_render_target_view(&self, swapchain_index: u8) -> RenderTargetViewHandle {
        self.swapchain
            .render_target_views
            .get(swapchain_index as usize)
            .copied()
            .unwrap_or(RenderTargetViewHandle::INVALID)
    }

    fn get_present_texture(&self, swapchain_index: u8) -> TextureHandle {
        self.swapchain
            .textures
            .get(swapchain_index as usize)
            .copied()
            .unwrap_or(TextureHandle::INVALID)
    }

    fn get_current_present_image_index(&self) -> u32 {
        self.swapchain.present_index.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Shaders, descriptors, pipelines

    fn register_shader_module(&self, bytecode: &[u8]) -> ShaderModuleHandle {
        if !ke_verify!(!bytecode.is_empty(), "empty shader bytecode") {
            return ShaderModuleHandle::INVALID;
        }
        ShaderModuleHandle(self.shader_modules.allocate(ShaderModuleEntry {
            byte_size: bytecode.len(),
            bytecode_hash: hash_64(bytecode),
        }))
    }

    fn free_shader_module(&self, module: ShaderModuleHandle) -> bool {
        self.shader_modules.free(module.0).is_some()
    }

    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetDesc,
        binding_indices: &mut [u32],
    ) -> DescriptorSetLayoutHandle {
        if !desc.validate()
            || !ke_verify!(
                pack_binding_indices(desc, binding_indices),
                "binding_indices too small for the layout"
            )
        {
            return DescriptorSetLayoutHandle::INVALID;
        }
        DescriptorSetLayoutHandle(
            self.descriptor_set_layouts
                .allocate(DescriptorSetLayoutEntry { desc: desc.clone() }),
        )
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) -> bool {
        self.descriptor_set_layouts.free(layout.0).is_some()
    }

    fn create_descriptor_set(&self, layout: DescriptorSetLayoutHandle) -> DescriptorSetHandle {
        verify_or_return!(
            self.descriptor_set_layouts.get(layout.0).is_some(),
            DescriptorSetHandle::INVALID
        );
        let copies = (0..self.frame_contexts.len())
            .map(|_| SetContents::default())
            .collect();
        DescriptorSetHandle(self.descriptor_sets.allocate(DescriptorSetEntry {
            layout,
            copies: Mutex::new(copies),
        }))
    }

    fn destroy_descriptor_set(&self, set: DescriptorSetHandle) -> bool {
        self.descriptor_sets.free_deferred(set.0).is_some()
    }

    fn update_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorSetWriteInfo],
        frame_id: u64,
    ) {
        let entry = match self.descriptor_sets.get(set.0) {
            Some(entry) => entry,
            None => {
                ke_assert!(false, "updating a stale descriptor set");
                return;
            }
        };
        let frame_index = (frame_id % self.frame_contexts.len() as u64) as usize;
        {
            let mut copies = entry.copies.lock();
            for write in writes {
                Self::apply_set_write(
                    &mut copies,
                    frame_index,
                    write.index.to_raw(),
                    write.array_offset,
                    &write.data,
                );
            }
        }
        self.descriptor_tracker.lock().track(set, writes);
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> PipelineLayoutHandle {
        for layout in &desc.descriptor_sets {
            verify_or_return!(
                self.descriptor_set_layouts.get(layout.0).is_some(),
                PipelineLayoutHandle::INVALID
            );
        }
        // The headless device models a backend with native push constants.
        let model = PipelineLayoutModel::build(desc, true);
        PipelineLayoutHandle(self.pipeline_layouts.allocate(PipelineLayoutEntry { model }))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) -> bool {
        self.pipeline_layouts.free(layout.0).is_some()
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GraphicsPipelineHandle {
        if !desc.validate()
            || !ke_verify!(self.pipeline_layouts.get(desc.pipeline_layout.0).is_some())
        {
            return GraphicsPipelineHandle::INVALID;
        }
        for stage in &desc.stages {
            verify_or_return!(
                self.shader_modules.get(stage.module.0).is_some(),
                GraphicsPipelineHandle::INVALID
            );
        }
        GraphicsPipelineHandle(
            self.graphics_pipelines
                .allocate(GraphicsPipelineEntry { desc: desc.clone() }),
        )
    }

    fn destroy_graphics_pipeline(&self, pipeline: GraphicsPipelineHandle) -> bool {
        self.graphics_pipelines.free(pipeline.0).is_some()
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> ComputePipelineHandle {
        if !desc.validate()
            || !ke_verify!(self.pipeline_layouts.get(desc.pipeline_layout.0).is_some())
            || !ke_verify!(self.shader_modules.get(desc.stage.module.0).is_some())
        {
            return ComputePipelineHandle::INVALID;
        }
        ComputePipelineHandle(
            self.compute_pipelines
                .allocate(ComputePipelineEntry { desc: desc.clone() }),
        )
    }

    fn destroy_compute_pipeline(&self, pipeline: ComputePipelineHandle) -> bool {
        self.compute_pipelines.free(pipeline.0).is_some()
    }

    // ---------------------------------------------------------------------
    // Command recording

    fn begin_graphics_command_list(&self, frame_id: u64) -> CommandListHandle {
        let context = self.frame_context(frame_id);
        ke_assert!(
            context.frame_id() == frame_id,
            "frame context slot not prepared for frame {}",
            frame_id
        );
        let handle = context.allocator(QueueType::Graphics).begin_command_list(|| {
            let mut registry = self.commands.lock();
            registry.next_id += 1;
            CommandListHandle(registry.next_id)
        });
        self.commands.lock().open(handle, frame_id);
        handle
    }

    fn end_graphics_command_list(&self, command_list: CommandListHandle, frame_id: u64) {
        let context = self.frame_context(frame_id);
        let was_open = context
            .allocator(QueueType::Graphics)
            .end_command_list(command_list);
        ke_assert!(was_open, "ending a command list that is not open this frame");
        self.commands.lock().close(command_list);
    }

    fn begin_render_pass(&self, command_list: CommandListHandle, render_pass: RenderPassHandle) {
        verify_or_return!(self.render_passes.get(render_pass.0).is_some(), ());
        self.record(command_list, RecordedCommand::BeginRenderPass(render_pass));
    }

    fn end_render_pass(&self, command_list: CommandListHandle) {
        self.record(command_list, RecordedCommand::EndRenderPass);
    }

    fn begin_compute_pass(&self, command_list: CommandListHandle) {
        self.record(command_list, RecordedCommand::BeginComputePass);
    }

    fn end_compute_pass(&self, command_list: CommandListHandle) {
        self.record(command_list, RecordedCommand::EndComputePass);
    }

    fn set_texture_data(
        &self,
        command_list: CommandListHandle,
        staging_buffer: BufferHandle,
        dst_texture: TextureHandle,
        footprint: &TextureMemoryFootprint,
        sub_resource: &SubResourceIndexing,
        data: &[u8],
    ) {
        verify_or_return!(self.textures.get(dst_texture.0).is_some(), ());
        let staging = match self.buffers.get(staging_buffer.0) {
            Some(entry) => entry,
            None => {
                ke_assert!(false, "staging upload from a stale buffer");
                return;
            }
        };
        {
            // Populate the staging range, as the real backends do before the
            // recorded copy.
            let mut bytes = staging.data.lock();
            let start = footprint.offset as usize;
            let end = (start + data.len()).min(bytes.len());
            bytes[start..end].copy_from_slice(&data[..end - start]);
        }
        self.record(
            command_list,
            RecordedCommand::SetTextureData {
                staging_buffer,
                dst_texture,
                footprint: *footprint,
                sub_resource: *sub_resource,
                byte_size: data.len() as u64,
            },
        );
    }

    fn map_buffer(&self, mapping: &mut BufferMapping) {
        let entry = match self.buffers.get(mapping.buffer.0) {
            Some(entry) => entry,
            None => {
                ke_assert!(false, "mapping a stale buffer handle");
                mapping.ptr = std::ptr::null_mut();
                return;
            }
        };
        if !ke_verify!(
            self.config.staging_policy.is_cpu_reachable(entry.usage),
            "mapping a buffer the CPU cannot reach ('{}')",
            entry.debug_name
        ) {
            mapping.ptr = std::ptr::null_mut();
            return;
        }
        if mapping.size == u64::MAX {
            mapping.size = entry.size - mapping.offset;
        }
        verify_or_return!(mapping.offset + mapping.size <= entry.size, ());
        let mut bytes = entry.data.lock();
        // The box allocation is stable while the entry lives; handing the
        // pointer out after unlocking mirrors persistent mapping.
        mapping.ptr = unsafe { bytes.as_mut_ptr().add(mapping.offset as usize) };
    }

    fn unmap_buffer(&self, mapping: &mut BufferMapping) {
        mapping.ptr = std::ptr::null_mut();
    }

    fn copy_buffer(&self, command_list: CommandListHandle, params: &BufferCopyParameters) {
        let (src, dst) = match (
            self.buffers.get(params.buffer_src.0),
            self.buffers.get(params.buffer_dst.0),
        ) {
            (Some(src), Some(dst)) => (src, dst),
            _ => {
                ke_assert!(false, "buffer copy with stale handles");
                return;
            }
        };
        {
            let size = params.copy_size as usize;
            let src_start = params.offset_src as usize;
            let dst_start = params.offset_dst as usize;
            if params.buffer_src == params.buffer_dst {
                let mut bytes = src.data.lock();
                verify_or_return!(src_start + size <= bytes.len(), ());
                verify_or_return!(dst_start + size <= bytes.len(), ());
                bytes.copy_within(src_start..src_start + size, dst_start);
            } else {
                let src_bytes = src.data.lock();
                let mut dst_bytes = dst.data.lock();
                verify_or_return!(src_start + size <= src_bytes.len(), ());
                verify_or_return!(dst_start + size <= dst_bytes.len(), ());
                dst_bytes[dst_start..dst_start + size]
                    .copy_from_slice(&src_bytes[src_start..src_start + size]);
            }
        }
        self.record(command_list, RecordedCommand::CopyBuffer(*params));
    }

    fn place_memory_barriers(
        &self,
        command_list: CommandListHandle,
        global_barriers: &[GlobalMemoryBarrier],
        buffer_barriers: &[BufferMemoryBarrier],
        texture_barriers: &[TextureMemoryBarrier],
    ) {
        for barrier in global_barriers {
            self.record(command_list, RecordedCommand::GlobalBarrier(*barrier));
        }
        for barrier in buffer_barriers {
            self.record(command_list, RecordedCommand::BufferBarrier(*barrier));
        }
        for barrier in texture_barriers {
            if let Some(entry) = self.textures.get(barrier.texture.0) {
                *entry.layout.lock() = barrier.layout_dst;
            }
            self.record(command_list, RecordedCommand::TextureBarrier(*barrier));
        }
    }

    fn declare_pass_texture_view_usage(
        &self,
        command_list: CommandListHandle,
        views: &[TextureViewHandle],
    ) {
        self.record(
            command_list,
            RecordedCommand::DeclareTextureViewUsage(views.to_vec()),
        );
    }

    fn set_viewport(&self, command_list: CommandListHandle, viewport: &Viewport) {
        self.record(command_list, RecordedCommand::SetViewport(*viewport));
    }

    fn set_scissors_rect(&self, command_list: CommandListHandle, rect: &Rect) {
        self.record(command_list, RecordedCommand::SetScissorsRect(*rect));
    }

    fn set_index_buffer(&self, command_list: CommandListHandle, view: &BufferSpan, is_u16: bool) {
        self.record(
            command_list,
            RecordedCommand::SetIndexBuffer {
                view: *view,
                is_u16,
            },
        );
    }

    fn set_vertex_buffers(&self, command_list: CommandListHandle, views: &[BufferSpan]) {
        self.record(command_list, RecordedCommand::SetVertexBuffers(views.to_vec()));
    }

    fn set_graphics_pipeline(
        &self,
        command_list: CommandListHandle,
        pipeline: GraphicsPipelineHandle,
    ) {
        self.record(command_list, RecordedCommand::SetGraphicsPipeline(pipeline));
    }

    fn set_graphics_push_constant(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        data: &[u32],
        index: u32,
        offset: u32,
    ) {
        self.record(
            command_list,
            RecordedCommand::SetGraphicsPushConstant {
                layout,
                data: data.to_vec(),
                index,
                offset,
            },
        );
    }

    fn set_graphics_descriptor_sets(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
        frame_id: u64,
    ) {
        self.record(
            command_list,
            RecordedCommand::SetGraphicsDescriptorSets {
                layout,
                sets: sets.to_vec(),
                frame_index: (frame_id % self.frame_contexts.len() as u64) as u8,
            },
        );
    }

    fn set_compute_pipeline(
        &self,
        command_list: CommandListHandle,
        pipeline: ComputePipelineHandle,
    ) {
        self.record(command_list, RecordedCommand::SetComputePipeline(pipeline));
    }

    fn set_compute_descriptor_sets(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
        frame_id: u64,
    ) {
        self.record(
            command_list,
            RecordedCommand::SetComputeDescriptorSets {
                layout,
                sets: sets.to_vec(),
                frame_index: (frame_id % self.frame_contexts.len() as u64) as u8,
            },
        );
    }

    fn draw_instanced(&self, command_list: CommandListHandle, desc: &DrawInstancedDesc) {
        self.record(command_list, RecordedCommand::DrawInstanced(*desc));
    }

    fn draw_indexed_instanced(
        &self,
        command_list: CommandListHandle,
        desc: &DrawIndexedInstancedDesc,
    ) {
        self.record(command_list, RecordedCommand::DrawIndexedInstanced(*desc));
    }

    fn dispatch(&self, command_list: CommandListHandle, group_counts: (u32, u32, u32)) {
        self.record(command_list, RecordedCommand::Dispatch(group_counts));
    }
}
