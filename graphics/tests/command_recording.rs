//! End-to-end command recording through the façade: pipelines, binds,
//! draws, dispatches and texture upload.

use kryne_graphics::descriptor_set_manager::{
    DescriptorData, DescriptorSetWriteInfo, PackedIndex,
};
use kryne_graphics::descs::*;
use kryne_graphics::enums::{MemoryUsage, TextureFormat, TextureUsage};
use kryne_graphics::headless::{HeadlessBackend, HeadlessConfig, RecordedCommand};
use kryne_graphics::shader_pipeline::*;
use kryne_graphics::GraphicsContext;
use smallvec::smallvec;

fn context() -> GraphicsContext<HeadlessBackend> {
    GraphicsContext::new(HeadlessBackend::new(HeadlessConfig::default()))
}

#[test]
fn draw_loop_records_in_program_order() {
    let context = context();

    // Shaders and layouts.
    let vertex_shader = context.register_shader_module(&[1, 2, 3, 4]);
    let fragment_shader = context.register_shader_module(&[5, 6, 7, 8]);
    assert!(vertex_shader.is_valid() && fragment_shader.is_valid());
    assert_eq!(
        context.backend().shader_module_info(vertex_shader).unwrap().0,
        4
    );

    let set_desc = DescriptorSetDesc {
        bindings: vec![
            DescriptorBindingDesc::new(DescriptorType::ConstantBuffer, ShaderVisibility::VERTEX),
            DescriptorBindingDesc::new(DescriptorType::SampledTexture, ShaderVisibility::FRAGMENT),
        ],
    };
    let mut binding_indices = vec![0u32; set_desc.bindings.len()];
    let set_layout = context.create_descriptor_set_layout(&set_desc, &mut binding_indices);
    let set = context.create_descriptor_set(set_layout);

    let pipeline_layout = context.create_pipeline_layout(&PipelineLayoutDesc {
        descriptor_sets: vec![set_layout],
        push_constants: vec![PushConstantDesc {
            offset: 0,
            size_bytes: 8,
            visibility: ShaderVisibility::VERTEX,
        }],
    });
    assert!(pipeline_layout.is_valid());

    // Render target and render pass.
    let rtv = context.get_present_render_target_view(0);
    let render_pass = context.create_render_pass(&RenderPassDesc {
        color_attachments: smallvec![RenderPassAttachment {
            load_operation: LoadOperation::Clear,
            store_operation: StoreOperation::Store,
            rtv,
            ..RenderPassAttachment::default()
        }],
        depth_stencil_attachment: None,
        debug_name: "main".to_owned(),
    });
    assert!(render_pass.is_valid());

    let pipeline = context.create_graphics_pipeline(&GraphicsPipelineDesc {
        stages: smallvec![
            ShaderStageDesc {
                module: vertex_shader,
                stage: ShaderStage::Vertex,
                entry_point: "vs_main".to_owned(),
            },
            ShaderStageDesc {
                module: fragment_shader,
                stage: ShaderStage::Fragment,
                entry_point: "fs_main".to_owned(),
            },
        ],
        vertex_input: VertexInputDesc {
            bindings: vec![VertexBindingDesc {
                binding: 0,
                stride: 16,
            }],
            attributes: vec![VertexAttributeDesc {
                location: 0,
                binding: 0,
                offset: 0,
                format: VertexAttributeFormat::Float32x4,
            }],
        },
        input_assembly: InputAssemblyDesc::default(),
        depth_stencil: DepthStencilStateDesc::default(),
        pipeline_layout,
        render_pass,
        debug_name: "main".to_owned(),
    });
    assert!(pipeline.is_valid());

    // Geometry buffers.
    let vertex_buffer = context.create_buffer(&BufferCreateDesc {
        desc: BufferDesc {
            size: 1024,
            debug_name: "vertices".to_owned(),
        },
        usage: MemoryUsage::GPU_ONLY_USAGE_TYPE | MemoryUsage::VERTEX_BUFFER,
    });
    let index_buffer = context.create_buffer(&BufferCreateDesc {
        desc: BufferDesc {
            size: 256,
            debug_name: "indices".to_owned(),
        },
        usage: MemoryUsage::GPU_ONLY_USAGE_TYPE | MemoryUsage::INDEX_BUFFER,
    });

    // Record one frame.
    let command_list = context.begin_graphics_command_list();
    context.begin_render_pass(command_list, render_pass);
    context.set_viewport(
        command_list,
        &Viewport {
            width: 1280,
            height: 720,
            max_depth: 1.0,
            ..Viewport::default()
        },
    );
    context.set_scissors_rect(
        command_list,
        &Rect {
            right: 1280,
            bottom: 720,
            ..Rect::default()
        },
    );
    context.set_graphics_pipeline(command_list, pipeline);
    context.set_graphics_descriptor_sets(command_list, pipeline_layout, &[set]);
    context.set_graphics_push_constant(command_list, pipeline_layout, &[0x40, 0x41], 0, 0);
    context.set_vertex_buffers(
        command_list,
        &[BufferSpan {
            buffer: vertex_buffer,
            offset: 0,
            size: 1024,
        }],
    );
    context.set_index_buffer(
        command_list,
        &BufferSpan {
            buffer: index_buffer,
            offset: 0,
            size: 256,
        },
        true,
    );
    context.draw_indexed_instanced(
        command_list,
        &DrawIndexedInstancedDesc {
            element_count: 36,
            instance_count: 2,
            ..DrawIndexedInstancedDesc::default()
        },
    );
    context.end_render_pass(command_list);
    context.end_graphics_command_list(command_list);
    context.end_frame();

    let commands = context.backend().recorded_commands(command_list);
    let kinds: Vec<&'static str> = commands
        .iter()
        .map(|command| match command {
            RecordedCommand::BeginRenderPass(_) => "begin_render_pass",
            RecordedCommand::SetViewport(_) => "viewport",
            RecordedCommand::SetScissorsRect(_) => "scissors",
            RecordedCommand::SetGraphicsPipeline(_) => "pipeline",
            RecordedCommand::SetGraphicsDescriptorSets { .. } => "descriptor_sets",
            RecordedCommand::SetGraphicsPushConstant { .. } => "push_constant",
            RecordedCommand::SetVertexBuffers(_) => "vertex_buffers",
            RecordedCommand::SetIndexBuffer { .. } => "index_buffer",
            RecordedCommand::DrawIndexedInstanced(_) => "draw",
            RecordedCommand::EndRenderPass => "end_render_pass",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "begin_render_pass",
            "viewport",
            "scissors",
            "pipeline",
            "descriptor_sets",
            "push_constant",
            "vertex_buffers",
            "index_buffer",
            "draw",
            "end_render_pass",
        ]
    );

    // The descriptor-set bind captured the issuing frame's slot.
    match &commands[4] {
        RecordedCommand::SetGraphicsDescriptorSets { sets, frame_index, .. } => {
            assert_eq!(sets, &vec![set]);
            assert_eq!(*frame_index, 1);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn compute_dispatch_records_with_its_own_pass() {
    let context = context();

    let shader = context.register_shader_module(&[9, 9, 9]);
    let set_desc = DescriptorSetDesc {
        bindings: vec![DescriptorBindingDesc::new(
            DescriptorType::StorageReadWriteBuffer,
            ShaderVisibility::COMPUTE,
        )],
    };
    let mut binding_indices = vec![0u32];
    let set_layout = context.create_descriptor_set_layout(&set_desc, &mut binding_indices);
    let set = context.create_descriptor_set(set_layout);
    let layout = context.create_pipeline_layout(&PipelineLayoutDesc {
        descriptor_sets: vec![set_layout],
        push_constants: Vec::new(),
    });

    let pipeline = context.create_compute_pipeline(&ComputePipelineDesc {
        stage: ShaderStageDesc {
            module: shader,
            stage: ShaderStage::Compute,
            entry_point: "cs_main".to_owned(),
        },
        pipeline_layout: layout,
        debug_name: "reduce".to_owned(),
    });
    assert!(pipeline.is_valid());

    // Write a storage buffer view into the set.
    let buffer = context.create_buffer(&BufferCreateDesc {
        desc: BufferDesc {
            size: 4096,
            debug_name: "storage".to_owned(),
        },
        usage: MemoryUsage::GPU_ONLY_USAGE_TYPE | MemoryUsage::WRITE_BUFFER,
    });
    let view = context.create_buffer_view(&BufferViewDesc {
        buffer,
        offset: 0,
        size: 4096,
        debug_name: "storage-view".to_owned(),
    });
    context.update_descriptor_set(
        set,
        &[DescriptorSetWriteInfo::new(
            PackedIndex::from_raw(binding_indices[0]),
            DescriptorData::BufferView(view),
        )],
    );

    let command_list = context.begin_graphics_command_list();
    context.begin_compute_pass(command_list);
    context.set_compute_pipeline(command_list, pipeline);
    context.set_compute_descriptor_sets(command_list, layout, &[set]);
    context.dispatch(command_list, (16, 16, 1));
    context.end_compute_pass(command_list);
    context.end_graphics_command_list(command_list);
    context.end_frame();

    let commands = context.backend().recorded_commands(command_list);
    assert_eq!(commands.len(), 5);
    assert!(matches!(commands[0], RecordedCommand::BeginComputePass));
    assert!(matches!(
        commands[1],
        RecordedCommand::SetComputePipeline(handle) if handle == pipeline
    ));
    assert!(matches!(commands[3], RecordedCommand::Dispatch((16, 16, 1))));
    assert!(matches!(commands[4], RecordedCommand::EndComputePass));
}

#[test]
fn texture_upload_goes_through_staging() {
    let context = context();

    let texture_desc = TextureDesc {
        dimensions: (64, 64, 1),
        format: TextureFormat::Rgba8Unorm,
        debug_name: "albedo".to_owned(),
        ..TextureDesc::default()
    };
    let texture = context.create_texture(&TextureCreateDesc {
        desc: texture_desc.clone(),
        memory_usage: MemoryUsage::GPU_ONLY_USAGE_TYPE,
        usage: TextureUsage::SHADER_SAMPLING | TextureUsage::TRANSFER_DESTINATION,
    });
    assert!(texture.is_valid());

    let footprints = context.fetch_texture_sub_resources_memory_footprints(&texture_desc);
    assert_eq!(footprints.len(), 1);
    let staging = context.create_staging_buffer(&texture_desc, &footprints);

    let pixels = vec![0x7Fu8; (64 * 4) as usize];
    let command_list = context.begin_graphics_command_list();
    context.set_texture_data(
        command_list,
        staging,
        texture,
        &footprints[0],
        &SubResourceIndexing::default(),
        &pixels,
    );
    context.end_graphics_command_list(command_list);
    context.end_frame();

    let commands = context.backend().recorded_commands(command_list);
    match &commands[0] {
        RecordedCommand::SetTextureData {
            staging_buffer,
            dst_texture,
            byte_size,
            ..
        } => {
            assert_eq!(*staging_buffer, staging);
            assert_eq!(*dst_texture, texture);
            assert_eq!(*byte_size, pixels.len() as u64);
        }
        other => panic!("unexpected command {:?}", other),
    }

    // The staging bytes were populated before the recorded copy.
    let bytes = context.backend().buffer_bytes(staging).unwrap();
    assert!(bytes[..pixels.len()].iter().all(|byte| *byte == 0x7F));

    // A texture view over the uploaded texture resolves through the
    // backend registry.
    let view = context.create_texture_view(&TextureViewDesc::whole_texture(texture, &texture_desc));
    assert!(view.is_valid());
    assert_eq!(
        context.backend().texture_view_desc(view).unwrap().format,
        TextureFormat::Rgba8Unorm
    );
}
