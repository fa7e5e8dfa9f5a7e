//! The uniform backend contract.
//!
//! One object implementing [`GraphicsBackend`] sits behind each
//! [`GraphicsContext`](crate::context::GraphicsContext). The trait covers
//! the intersection of the native APIs; anything one backend cannot express
//! directly is surfaced as an explicit query (`needs_staging_buffer`, the
//! static predicates) rather than emulated silently.
//!
//! Every frame-paced entry point receives the façade's current `frame_id`;
//! backends derive their frame slot as `frame_id % frame_context_count()`.

use crate::barriers::{BufferMemoryBarrier, GlobalMemoryBarrier, TextureMemoryBarrier};
use crate::descriptor_set_manager::DescriptorSetWriteInfo;
use crate::descs::*;
use crate::handles::*;
use crate::shader_pipeline::{
    ComputePipelineDesc, DescriptorSetDesc, GraphicsPipelineDesc, PipelineLayoutDesc,
};

/// Application-level identity reported by the context.
#[derive(Clone, Debug, Default)]
pub struct ApplicationInfo {
    pub application_name: String,
    pub application_version: u32,
}

pub trait GraphicsBackend {
    /// Whether the backend can express buffer/texture-granular barriers.
    /// When false the façade may only rely on global barriers.
    const SUPPORTS_NON_GLOBAL_BARRIERS: bool;
    /// Whether render passes must declare the texture views they sample.
    const RENDER_PASS_NEEDS_USAGE_DECLARATION: bool;
    /// Whether compute passes must declare the texture views they access.
    const COMPUTE_PASS_NEEDS_USAGE_DECLARATION: bool;
    /// File extension of this backend's shader bytecode ("spv", "cso",
    /// "metallib").
    const SHADER_FILE_EXTENSION: &'static str;

    // ---------------------------------------------------------------------
    // Lifecycle

    /// Number of in-flight frame slots (2 or 3 depending on the swapchain).
    fn frame_context_count(&self) -> u8;

    /// Submits the frame's recorded work and schedules the present. Called
    /// by the façade before it increments its frame id.
    fn end_frame(&self, frame_id: u64);

    /// Blocks until the GPU has fully executed `frame_id`. Returns
    /// immediately when it already has.
    fn wait_for_frame(&self, frame_id: u64);

    fn is_frame_executed(&self, frame_id: u64) -> bool;

    fn application_info(&self) -> &ApplicationInfo;

    // ---------------------------------------------------------------------
    // Resources

    fn create_buffer(&self, desc: &BufferCreateDesc) -> BufferHandle;
    /// True when writes to this buffer must go through a staging copy
    /// (its memory is not CPU-reachable on this backend).
    fn needs_staging_buffer(&self, buffer: BufferHandle) -> bool;
    fn destroy_buffer(&self, buffer: BufferHandle) -> bool;

    fn create_texture(&self, desc: &TextureCreateDesc) -> TextureHandle;
    fn fetch_texture_sub_resources_memory_footprints(
        &self,
        desc: &TextureDesc,
    ) -> Vec<TextureMemoryFootprint>;
    fn destroy_texture(&self, texture: TextureHandle) -> bool;

    fn create_texture_view(&self, desc: &TextureViewDesc) -> TextureViewHandle;
    fn destroy_texture_view(&self, view: TextureViewHandle) -> bool;

    fn create_buffer_view(&self, desc: &BufferViewDesc) -> BufferViewHandle;
    fn destroy_buffer_view(&self, view: BufferViewHandle) -> bool;

    fn create_sampler(&self, desc: &SamplerDesc) -> SamplerHandle;
    fn destroy_sampler(&self, sampler: SamplerHandle) -> bool;

    fn create_render_target_view(&self, desc: &RenderTargetViewDesc) -> RenderTargetViewHandle;
    fn destroy_render_target_view(&self, view: RenderTargetViewHandle) -> bool;

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderPassHandle;
    fn destroy_render_pass(&self, render_pass: RenderPassHandle) -> bool;

    // ---------------------------------------------------------------------
    // Swapchain

    fn get_present_render_target_view(&self, swapchain_index: u8) -> RenderTargetViewHandle;
    fn get_present_texture(&self, swapchain_index: u8) -> TextureHandle;
    fn get_current_present_image_index(&self) -> u32;

    // ---------------------------------------------------------------------
    // Shaders, descriptors, pipelines

    fn register_shader_module(&self, bytecode: &[u8]) -> ShaderModuleHandle;
    fn free_shader_module(&self, module: ShaderModuleHandle) -> bool;

    /// Creates the layout and writes one packed per-binding id per entry
    /// into `binding_indices`, for use in later descriptor writes.
    fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetDesc,
        binding_indices: &mut [u32],
    ) -> DescriptorSetLayoutHandle;
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) -> bool;

    fn create_descriptor_set(&self, layout: DescriptorSetLayoutHandle) -> DescriptorSetHandle;
    fn destroy_descriptor_set(&self, set: DescriptorSetHandle) -> bool;

    /// Applies the writes to the frame's copy of the set and queues them for
    /// replay on the other in-flight copies.
    fn update_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorSetWriteInfo],
        frame_id: u64,
    );

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> PipelineLayoutHandle;
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) -> bool;

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GraphicsPipelineHandle;
    fn destroy_graphics_pipeline(&self, pipeline: GraphicsPipelineHandle) -> bool;

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> ComputePipelineHandle;
    fn destroy_compute_pipeline(&self, pipeline: ComputePipelineHandle) -> bool;

    // ---------------------------------------------------------------------
    // Command recording

    fn begin_graphics_command_list(&self, frame_id: u64) -> CommandListHandle;
    fn end_graphics_command_list(&self, command_list: CommandListHandle, frame_id: u64);

    fn begin_render_pass(&self, command_list: CommandListHandle, render_pass: RenderPassHandle);
    fn end_render_pass(&self, command_list: CommandListHandle);

    fn begin_compute_pass(&self, command_list: CommandListHandle);
    fn end_compute_pass(&self, command_list: CommandListHandle);

    fn set_texture_data(
        &self,
        command_list: CommandListHandle,
        staging_buffer: BufferHandle,
        dst_texture: TextureHandle,
        footprint: &TextureMemoryFootprint,
        sub_resource: &SubResourceIndexing,
        data: &[u8],
    );

    fn map_buffer(&self, mapping: &mut BufferMapping);
    fn unmap_buffer(&self, mapping: &mut BufferMapping);
    fn copy_buffer(&self, command_list: CommandListHandle, params: &BufferCopyParameters);

    fn place_memory_barriers(
        &self,
        command_list: CommandListHandle,
        global_barriers: &[GlobalMemoryBarrier],
        buffer_barriers: &[BufferMemoryBarrier],
        texture_barriers: &[TextureMemoryBarrier],
    );

    /// For backends whose passes must pre-declare sampled views
    /// (`RENDER_PASS_NEEDS_USAGE_DECLARATION`).
    fn declare_pass_texture_view_usage(
        &self,
        command_list: CommandListHandle,
        views: &[TextureViewHandle],
    );

    fn set_viewport(&self, command_list: CommandListHandle, viewport: &Viewport);
    fn set_scissors_rect(&self, command_list: CommandListHandle, rect: &Rect);
    fn set_index_buffer(&self, command_list: CommandListHandle, view: &BufferSpan, is_u16: bool);
    fn set_vertex_buffers(&self, command_list: CommandListHandle, views: &[BufferSpan]);

    fn set_graphics_pipeline(&self, command_list: CommandListHandle, pipeline: GraphicsPipelineHandle);
    fn set_graphics_push_constant(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        data: &[u32],
        index: u32,
        offset: u32,
    );
    fn set_graphics_descriptor_sets(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
        frame_id: u64,
    );

    fn set_compute_pipeline(&self, command_list: CommandListHandle, pipeline: ComputePipelineHandle);
    fn set_compute_descriptor_sets(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
        frame_id: u64,
    );

    fn draw_instanced(&self, command_list: CommandListHandle, desc: &DrawInstancedDesc);
    fn draw_indexed_instanced(&self, command_list: CommandListHandle, desc: &DrawIndexedInstancedDesc);
    fn dispatch(&self, command_list: CommandListHandle, group_counts: (u32, u32, u32));
}
