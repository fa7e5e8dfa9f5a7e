//! The graphics-context façade.
//!
//! The single public surface of the runtime: owns one backend, threads the
//! monotonically increasing frame id into every frame-paced call, and
//! forwards everything else verbatim. Failures surface as sentinel returns
//! from the backend; the façade adds no recovery of its own.

use crate::backend::{ApplicationInfo, GraphicsBackend};
use crate::barriers::{BufferMemoryBarrier, GlobalMemoryBarrier, TextureMemoryBarrier};
use crate::descriptor_set_manager::DescriptorSetWriteInfo;
use crate::descs::*;
use crate::enums::MemoryUsage;
use crate::handles::*;
use crate::shader_pipeline::{
    ComputePipelineDesc, DescriptorSetDesc, GraphicsPipelineDesc, PipelineLayoutDesc,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Frame ids start at 1; 0 therefore reads as "never".
pub const INITIAL_FRAME_ID: u64 = 1;

pub struct GraphicsContext<B: GraphicsBackend> {
    backend: B,
    frame_id: AtomicU64,
}

impl<B: GraphicsBackend> GraphicsContext<B> {
    pub fn new(backend: B) -> Self {
        GraphicsContext {
            backend,
            frame_id: AtomicU64::new(INITIAL_FRAME_ID),
        }
    }

    /// Direct access to the backend, for backend-specific inspection.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ---------------------------------------------------------------------
    // Lifecycle

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn frame_context_count(&self) -> u8 {
        self.backend.frame_context_count()
    }

    #[inline]
    pub fn current_frame_context_index(&self) -> u8 {
        (self.frame_id() % u64::from(self.frame_context_count())) as u8
    }

    /// Submits the frame and advances the frame id. Exactly one increment
    /// per call.
    pub fn end_frame(&self) {
        let frame_id = self.frame_id();
        self.backend.end_frame(frame_id);
        self.frame_id.store(frame_id + 1, Ordering::Release);
    }

    /// Blocks until the previous frame has fully executed.
    pub fn wait_for_last_frame(&self) {
        let frame_id = self.frame_id();
        if frame_id > INITIAL_FRAME_ID {
            self.backend.wait_for_frame(frame_id - 1);
        }
    }

    pub fn wait_for_frame(&self, frame_id: u64) {
        self.backend.wait_for_frame(frame_id);
    }

    pub fn is_frame_executed(&self, frame_id: u64) -> bool {
        self.backend.is_frame_executed(frame_id)
    }

    pub fn application_info(&self) -> &ApplicationInfo {
        self.backend.application_info()
    }

    /// File extension of the shader bytecode this backend consumes.
    pub fn shader_file_extension() -> &'static str {
        B::SHADER_FILE_EXTENSION
    }

    pub fn supports_non_global_barriers() -> bool {
        B::SUPPORTS_NON_GLOBAL_BARRIERS
    }

    pub fn render_pass_needs_usage_declaration() -> bool {
        B::RENDER_PASS_NEEDS_USAGE_DECLARATION
    }

    pub fn compute_pass_needs_usage_declaration() -> bool {
        B::COMPUTE_PASS_NEEDS_USAGE_DECLARATION
    }

    // ---------------------------------------------------------------------
    // Buffers

    pub fn create_buffer(&self, desc: &BufferCreateDesc) -> BufferHandle {
        self.backend.create_buffer(desc)
    }

    pub fn needs_staging_buffer(&self, buffer: BufferHandle) -> bool {
        self.backend.needs_staging_buffer(buffer)
    }

    pub fn destroy_buffer(&self, buffer: BufferHandle) -> bool {
        self.backend.destroy_buffer(buffer)
    }

    pub fn map_buffer(&self, mapping: &mut BufferMapping) {
        self.backend.map_buffer(mapping);
    }

    pub fn unmap_buffer(&self, mapping: &mut BufferMapping) {
        self.backend.unmap_buffer(mapping);
    }

    pub fn copy_buffer(&self, command_list: CommandListHandle, params: &BufferCopyParameters) {
        self.backend.copy_buffer(command_list, params);
    }

    // ---------------------------------------------------------------------
    // Textures

    pub fn create_texture(&self, desc: &TextureCreateDesc) -> TextureHandle {
        self.backend.create_texture(desc)
    }

    pub fn fetch_texture_sub_resources_memory_footprints(
        &self,
        desc: &TextureDesc,
    ) -> Vec<TextureMemoryFootprint> {
        self.backend.fetch_texture_sub_resources_memory_footprints(desc)
    }

    /// Creates a CPU-writable transfer-source buffer sized for the given
    /// sub-resource footprints.
    pub fn create_staging_buffer(
        &self,
        desc: &TextureDesc,
        footprints: &[TextureMemoryFootprint],
    ) -> BufferHandle {
        let total_size = footprints
            .last()
            .map(|footprint| footprint.offset + footprint.slice_byte_size())
            .unwrap_or(0);
        self.backend.create_buffer(&BufferCreateDesc {
            desc: BufferDesc {
                size: total_size,
                debug_name: format!("{}/staging", desc.debug_name),
            },
            usage: MemoryUsage::STAGE_ONCE_USAGE_TYPE | MemoryUsage::TRANSFER_SRC_BUFFER,
        })
    }

    pub fn destroy_texture(&self, texture: TextureHandle) -> bool {
        self.backend.destroy_texture(texture)
    }

    pub fn set_texture_data(
        &self,
        command_list: CommandListHandle,
        staging_buffer: BufferHandle,
        dst_texture: TextureHandle,
        footprint: &TextureMemoryFootprint,
        sub_resource: &SubResourceIndexing,
        data: &[u8],
    ) {
        self.backend.set_texture_data(
            command_list,
            staging_buffer,
            dst_texture,
            footprint,
            sub_resource,
            data,
        );
    }

    // ---------------------------------------------------------------------
    // Views and samplers

    pub fn create_texture_view(&self, desc: &TextureViewDesc) -> TextureViewHandle {
        self.backend.create_texture_view(desc)
    }

    pub fn destroy_texture_view(&self, view: TextureViewHandle) -> bool {
        self.backend.destroy_texture_view(view)
    }

    pub fn create_buffer_view(&self, desc: &BufferViewDesc) -> BufferViewHandle {
        self.backend.create_buffer_view(desc)
    }

    pub fn destroy_buffer_view(&self, view: BufferViewHandle) -> bool {
        self.backend.destroy_buffer_view(view)
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> SamplerHandle {
        self.backend.create_sampler(desc)
    }

    pub fn destroy_sampler(&self, sampler: SamplerHandle) -> bool {
        self.backend.destroy_sampler(sampler)
    }

    pub fn create_render_target_view(&self, desc: &RenderTargetViewDesc) -> RenderTargetViewHandle {
        self.backend.create_render_target_view(desc)
    }

    pub fn destroy_render_target_view(&self, view: RenderTargetViewHandle) -> bool {
        self.backend.destroy_render_target_view(view)
    }

    // ---------------------------------------------------------------------
    // Swapchain

    pub fn get_present_render_target_view(&self, swapchain_index: u8) -> RenderTargetViewHandle {
        self.backend.get_present_render_target_view(swapchain_index)
    }

    pub fn get_present_texture(&self, swapchain_index: u8) -> TextureHandle {
        self.backend.get_present_texture(swapchain_index)
    }

    pub fn get_current_present_image_index(&self) -> u32 {
        self.backend.get_current_present_image_index()
    }

    // ---------------------------------------------------------------------
    // Render passes and command lists

    pub fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderPassHandle {
        self.backend.create_render_pass(desc)
    }

    pub fn destroy_render_pass(&self, render_pass: RenderPassHandle) -> bool {
        self.backend.destroy_render_pass(render_pass)
    }

    pub fn begin_graphics_command_list(&self) -> CommandListHandle {
        self.backend.begin_graphics_command_list(self.frame_id())
    }

    pub fn end_graphics_command_list(&self, command_list: CommandListHandle) {
        self.backend.end_graphics_command_list(command_list, self.frame_id());
    }

    pub fn begin_render_pass(&self, command_list: CommandListHandle, render_pass: RenderPassHandle) {
        self.backend.begin_render_pass(command_list, render_pass);
    }

    pub fn end_render_pass(&self, command_list: CommandListHandle) {
        self.backend.end_render_pass(command_list);
    }

    pub fn begin_compute_pass(&self, command_list: CommandListHandle) {
        self.backend.begin_compute_pass(command_list);
    }

    pub fn end_compute_pass(&self, command_list: CommandListHandle) {
        self.backend.end_compute_pass(command_list);
    }

    pub fn place_memory_barriers(
        &self,
        command_list: CommandListHandle,
        global_barriers: &[GlobalMemoryBarrier],
        buffer_barriers: &[BufferMemoryBarrier],
        texture_barriers: &[TextureMemoryBarrier],
    ) {
        self.backend.place_memory_barriers(
            command_list,
            global_barriers,
            buffer_barriers,
            texture_barriers,
        );
    }

    pub fn declare_pass_texture_view_usage(
        &self,
        command_list: CommandListHandle,
        views: &[TextureViewHandle],
    ) {
        self.backend.declare_pass_texture_view_usage(command_list, views);
    }

    // ---------------------------------------------------------------------
    // Shaders, descriptors, pipelines

    pub fn register_shader_module(&self, bytecode: &[u8]) -> ShaderModuleHandle {
        self.backend.register_shader_module(bytecode)
    }

    pub fn free_shader_module(&self, module: ShaderModuleHandle) -> bool {
        self.backend.free_shader_module(module)
    }

    pub fn create_descriptor_set_layout(
        &self,
        desc: &DescriptorSetDesc,
        binding_indices: &mut [u32],
    ) -> DescriptorSetLayoutHandle {
        self.backend.create_descriptor_set_layout(desc, binding_indices)
    }

    pub fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) -> bool {
        self.backend.destroy_descriptor_set_layout(layout)
    }

    pub fn create_descriptor_set(&self, layout: DescriptorSetLayoutHandle) -> DescriptorSetHandle {
        self.backend.create_descriptor_set(layout)
    }

    pub fn destroy_descriptor_set(&self, set: DescriptorSetHandle) -> bool {
        self.backend.destroy_descriptor_set(set)
    }

    pub fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorSetWriteInfo]) {
        self.backend.update_descriptor_set(set, writes, self.frame_id());
    }

    pub fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> PipelineLayoutHandle {
        self.backend.create_pipeline_layout(desc)
    }

    pub fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) -> bool {
        self.backend.destroy_pipeline_layout(layout)
    }

    pub fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GraphicsPipelineHandle {
        self.backend.create_graphics_pipeline(desc)
    }

    pub fn destroy_graphics_pipeline(&self, pipeline: GraphicsPipelineHandle) -> bool {
        self.backend.destroy_graphics_pipeline(pipeline)
    }

    pub fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> ComputePipelineHandle {
        self.backend.create_compute_pipeline(desc)
    }

    pub fn destroy_compute_pipeline(&self, pipeline: ComputePipelineHandle) -> bool {
        self.backend.destroy_compute_pipeline(pipeline)
    }

    // ---------------------------------------------------------------------
    // Draw state

    pub fn set_viewport(&self, command_list: CommandListHandle, viewport: &Viewport) {
        self.backend.set_viewport(command_list, viewport);
    }

    pub fn set_scissors_rect(&self, command_list: CommandListHandle, rect: &Rect) {
        self.backend.set_scissors_rect(command_list, rect);
    }

    pub fn set_index_buffer(&self, command_list: CommandListHandle, view: &BufferSpan, is_u16: bool) {
        self.backend.set_index_buffer(command_list, view, is_u16);
    }

    pub fn set_vertex_buffers(&self, command_list: CommandListHandle, views: &[BufferSpan]) {
        self.backend.set_vertex_buffers(command_list, views);
    }

    pub fn set_graphics_pipeline(
        &self,
        command_list: CommandListHandle,
        pipeline: GraphicsPipelineHandle,
    ) {
        self.backend.set_graphics_pipeline(command_list, pipeline);
    }

    pub fn set_graphics_push_constant(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        data: &[u32],
        index: u32,
        offset: u32,
    ) {
        self.backend
            .set_graphics_push_constant(command_list, layout, data, index, offset);
    }

    pub fn set_graphics_descriptor_sets(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
    ) {
        self.backend
            .set_graphics_descriptor_sets(command_list, layout, sets, self.frame_id());
    }

    pub fn set_compute_pipeline(
        &self,
        command_list: CommandListHandle,
        pipeline: ComputePipelineHandle,
    ) {
        self.backend.set_compute_pipeline(command_list, pipeline);
    }

    pub fn set_compute_descriptor_sets(
        &self,
        command_list: CommandListHandle,
        layout: PipelineLayoutHandle,
        sets: &[DescriptorSetHandle],
    ) {
        self.backend
            .set_compute_descriptor_sets(command_list, layout, sets, self.frame_id());
    }

    pub fn draw_instanced(&self, command_list: CommandListHandle, desc: &DrawInstancedDesc) {
        self.backend.draw_instanced(command_list, desc);
    }

    pub fn draw_indexed_instanced(
        &self,
        command_list: CommandListHandle,
        desc: &DrawIndexedInstancedDesc,
    ) {
        self.backend.draw_indexed_instanced(command_list, desc);
    }

    pub fn dispatch(&self, command_list: CommandListHandle, group_counts: (u32, u32, u32)) {
        self.backend.dispatch(command_list, group_counts);
    }
}
