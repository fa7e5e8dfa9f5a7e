//! Render-graph construction, culling, barrier derivation and execution.

use kryne_core::memory::SimplePoolHandle;
use kryne_core::threads::FibersManager;
use kryne_graphics::barriers::{BarrierAccess, BarrierSyncStage};
use kryne_graphics::descs::{
    BufferCreateDesc, BufferDesc, LoadOperation, RenderTargetViewDesc, StoreOperation,
    TextureCreateDesc, TextureDesc,
};
use kryne_graphics::enums::{MemoryUsage, TextureFormat, TextureLayout, TextureUsage};
use kryne_graphics::handles::CommandListHandle;
use kryne_graphics::headless::{HeadlessBackend, HeadlessConfig, RecordedCommand};
use kryne_graphics::GraphicsContext;
use kryne_render_graph::{Dependency, PassType, RenderGraph};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Context = GraphicsContext<HeadlessBackend>;

fn context() -> Context {
    GraphicsContext::new(HeadlessBackend::new(HeadlessConfig::default()))
}

/// Creates a color texture plus RTV and registers both in the graph.
fn color_target(
    context: &Context,
    graph: &mut RenderGraph<HeadlessBackend>,
    name: &str,
) -> (SimplePoolHandle, SimplePoolHandle) {
    let texture = context.create_texture(&TextureCreateDesc {
        desc: TextureDesc {
            dimensions: (256, 256, 1),
            format: TextureFormat::Rgba8Unorm,
            debug_name: name.to_owned(),
            ..TextureDesc::default()
        },
        memory_usage: MemoryUsage::GPU_ONLY_USAGE_TYPE,
        usage: TextureUsage::COLOR_ATTACHMENT | TextureUsage::SHADER_SAMPLING,
    });
    assert!(texture.is_valid());
    let rtv = context.create_render_target_view(&RenderTargetViewDesc {
        texture,
        format: TextureFormat::Rgba8Unorm,
        texture_type: Default::default(),
        mip_level: 0,
        array_range: (0, 1),
        plane: TextureFormat::Rgba8Unorm.aspect_planes(),
        debug_name: format!("{}-rtv", name),
    });

    let registry = graph.registry_mut();
    let raw = registry.register_raw_texture(texture, name);
    let rtv_resource = registry.register_render_target_view(rtv, raw, &format!("{}-rtv", name));
    (raw, rtv_resource)
}

fn execution_flag(
    builder: kryne_render_graph::declarations::PassDeclarationBuilder<'_, HeadlessBackend>,
) -> (
    kryne_render_graph::declarations::PassDeclarationBuilder<'_, HeadlessBackend>,
    Arc<AtomicBool>,
) {
    let flag = Arc::new(AtomicBool::new(false));
    let in_pass = Arc::clone(&flag);
    let builder = builder.set_execute_fn(move |_, _| {
        in_pass.store(true, Ordering::Release);
    });
    (builder, flag)
}

#[test]
fn chains_execute_and_orphans_are_culled() {
    let context = context();
    let mut graph: RenderGraph<HeadlessBackend> = RenderGraph::new();

    let (_raw_a, rtv_a) = color_target(&context, &mut graph, "a");
    let (_raw_b, rtv_b) = color_target(&context, &mut graph, "b");
    let (_raw_c, rtv_c) = color_target(&context, &mut graph, "c");
    let (_raw_d, rtv_d) = color_target(&context, &mut graph, "d");
    let (_raw_e, rtv_e) = color_target(&context, &mut graph, "e");

    let mut flags = Vec::new();
    {
        let builder = graph.begin_frame();

        // A -> B -> C through attachment writes and reads.
        let (pass, flag) = execution_flag(builder.declare_pass(PassType::Render));
        pass.set_name("a")
            .add_color_attachment(rtv_a, |attachment| {
                attachment.load_operation = LoadOperation::Clear;
                attachment.store_operation = StoreOperation::Store;
            });
        flags.push(flag);

        let (pass, flag) = execution_flag(builder.declare_pass(PassType::Render));
        pass.set_name("b")
            .read_dependency(Dependency::new(rtv_a))
            .add_color_attachment(rtv_b, |attachment| {
                attachment.store_operation = StoreOperation::Store;
            });
        flags.push(flag);

        let (pass, flag) = execution_flag(builder.declare_pass(PassType::Render));
        pass.set_name("c")
            .read_dependency(Dependency::new(rtv_b))
            .add_color_attachment(rtv_c, |attachment| {
                attachment.store_operation = StoreOperation::Store;
            });
        flags.push(flag);

        // D -> E, unreachable from the target.
        let (pass, flag) = execution_flag(builder.declare_pass(PassType::Render));
        pass.set_name("d").add_color_attachment(rtv_d, |attachment| {
            attachment.store_operation = StoreOperation::Store;
        });
        flags.push(flag);

        let (pass, flag) = execution_flag(builder.declare_pass(PassType::Render));
        pass.set_name("e")
            .read_dependency(Dependency::new(rtv_d))
            .add_color_attachment(rtv_e, |attachment| {
                attachment.store_operation = StoreOperation::Store;
            });
        flags.push(flag);

        builder.declare_target_resource(rtv_c);
    }
    graph.build_dag();
    graph.submit_frame(&context, None);
    context.end_frame();

    let executed: Vec<bool> = flags.iter().map(|flag| flag.load(Ordering::Acquire)).collect();
    assert_eq!(executed, vec![true, true, true, false, false]);
}

#[test]
fn no_targets_means_no_execution() {
    let context = context();
    let mut graph: RenderGraph<HeadlessBackend> = RenderGraph::new();
    let (_raw, rtv) = color_target(&context, &mut graph, "orphan");

    let (pass, flag) = {
        let builder = graph.begin_frame();
        execution_flag(builder.declare_pass(PassType::Render))
    };
    pass.set_name("orphan").add_color_attachment(rtv, |attachment| {
        attachment.store_operation = StoreOperation::Store;
    });

    graph.build_dag();
    graph.submit_frame(&context, None);
    context.end_frame();

    assert!(!flag.load(Ordering::Acquire));
}

#[test]
fn dependencies_emit_exactly_one_transition_each() {
    let context = context();
    let mut graph: RenderGraph<HeadlessBackend> = RenderGraph::new();

    let buffer = context.create_buffer(&BufferCreateDesc {
        desc: BufferDesc {
            size: 1024,
            debug_name: "instances".to_owned(),
        },
        usage: MemoryUsage::GPU_ONLY_USAGE_TYPE | MemoryUsage::TRANSFER_DST_BUFFER
            | MemoryUsage::READ_BUFFER,
    });
    let buffer_resource = graph.registry_mut().register_raw_buffer(buffer, "instances");

    let recorded_list: Arc<parking_lot::Mutex<Option<CommandListHandle>>> =
        Arc::new(parking_lot::Mutex::new(None));

    {
        let builder = graph.begin_frame();

        let capture = Arc::clone(&recorded_list);
        builder
            .declare_pass(PassType::Transfer)
            .set_name("upload")
            .write_dependency(
                Dependency::new(buffer_resource)
                    .with_layout(TextureLayout::Unknown)
                    .with_sync_stage(BarrierSyncStage::TRANSFER)
                    .with_access(BarrierAccess::TRANSFER_DST),
            )
            .set_execute_fn(move |_, data| {
                *capture.lock() = Some(data.command_list);
            });

        builder
            .declare_pass(PassType::Compute)
            .set_name("consume")
            .read_dependency(
                Dependency::new(buffer_resource)
                    .with_layout(TextureLayout::Unknown)
                    .with_sync_stage(BarrierSyncStage::COMPUTE_SHADING)
                    .with_access(BarrierAccess::SHADER_RESOURCE),
            )
            .write_dependency(
                Dependency::new(buffer_resource)
                    .with_layout(TextureLayout::Unknown)
                    .with_sync_stage(BarrierSyncStage::COMPUTE_SHADING)
                    .with_access(BarrierAccess::UNORDERED_ACCESS),
            )
            .set_execute_fn(|_, _| {});

        builder.declare_target_resource(buffer_resource);
    }
    graph.build_dag();
    graph.submit_frame(&context, None);
    context.end_frame();

    let command_list = recorded_list.lock().expect("upload pass ran");
    let commands = context.backend().recorded_commands(command_list);

    let barriers: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BufferBarrier(barrier) => Some(*barrier),
            _ => None,
        })
        .collect();
    assert_eq!(barriers.len(), 3);

    // First transition: from the default state into the declared write.
    assert_eq!(barriers[0].buffer, buffer);
    assert_eq!(barriers[0].stages_src, BarrierSyncStage::ALL);
    assert_eq!(barriers[0].access_src, BarrierAccess::ALL);
    assert_eq!(barriers[0].stages_dst, BarrierSyncStage::TRANSFER);
    assert_eq!(barriers[0].access_dst, BarrierAccess::TRANSFER_DST);

    // Second: the read picks up exactly where the write left the resource.
    assert_eq!(barriers[1].stages_src, BarrierSyncStage::TRANSFER);
    assert_eq!(barriers[1].access_src, BarrierAccess::TRANSFER_DST);
    assert_eq!(barriers[1].stages_dst, BarrierSyncStage::COMPUTE_SHADING);
    assert_eq!(barriers[1].access_dst, BarrierAccess::SHADER_RESOURCE);

    // Third: the same pass's write transitions from the read state.
    assert_eq!(barriers[2].access_src, BarrierAccess::SHADER_RESOURCE);
    assert_eq!(barriers[2].access_dst, BarrierAccess::UNORDERED_ACCESS);
}

#[test]
fn attachment_transitions_fold_into_the_render_pass() {
    let context = context();
    let mut graph: RenderGraph<HeadlessBackend> = RenderGraph::new();

    let (_raw, rtv) = color_target(&context, &mut graph, "scene");
    let (_raw_post, rtv_post) = color_target(&context, &mut graph, "post");

    let sampled_list: Arc<parking_lot::Mutex<Option<CommandListHandle>>> =
        Arc::new(parking_lot::Mutex::new(None));
    {
        let builder = graph.begin_frame();
        builder
            .declare_pass(PassType::Render)
            .set_name("scene")
            .add_color_attachment(rtv, |attachment| {
                attachment.load_operation = LoadOperation::Clear;
                attachment.store_operation = StoreOperation::Store;
            })
            .set_execute_fn(|_, _| {});

        let capture = Arc::clone(&sampled_list);
        builder
            .declare_pass(PassType::Render)
            .set_name("post")
            .read_dependency(
                Dependency::new(rtv)
                    .with_layout(TextureLayout::ShaderResource)
                    .with_sync_stage(BarrierSyncStage::FRAGMENT_SHADING)
                    .with_access(BarrierAccess::SHADER_RESOURCE),
            )
            .add_color_attachment(rtv_post, |attachment| {
                attachment.store_operation = StoreOperation::Store;
            })
            .set_execute_fn(move |_, data| {
                *capture.lock() = Some(data.command_list);
            });

        builder.declare_target_resource(rtv_post);
    }
    graph.build_dag();
    graph.submit_frame(&context, None);
    context.end_frame();

    // The scene pass's store-layout was amended to the reader's layout, so
    // the reader needs no texture barrier of its own.
    let command_list = sampled_list.lock().expect("post pass ran");
    let commands = context.backend().recorded_commands(command_list);
    assert!(commands
        .iter()
        .all(|command| !matches!(command, RecordedCommand::TextureBarrier(_))));

    // Both passes record into the one job group's command list; the scene
    // render pass carries the amended final layout.
    let render_passes: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BeginRenderPass(handle) => Some(*handle),
            _ => None,
        })
        .collect();
    assert_eq!(render_passes.len(), 2);

    let scene_desc = context.backend().render_pass_desc(render_passes[0]).unwrap();
    assert_eq!(scene_desc.debug_name, "scene");
    assert_eq!(
        scene_desc.color_attachments[0].final_layout,
        TextureLayout::ShaderResource
    );
    assert_eq!(
        scene_desc.color_attachments[0].initial_layout,
        TextureLayout::Unknown
    );

    let post_desc = context.backend().render_pass_desc(render_passes[1]).unwrap();
    assert_eq!(post_desc.debug_name, "post");
}

#[test]
fn pass_timings_are_published_after_submit() {
    let context = context();
    let mut graph: RenderGraph<HeadlessBackend> = RenderGraph::new();
    let (_raw, rtv) = color_target(&context, &mut graph, "timed");

    {
        let builder = graph.begin_frame();
        builder
            .declare_pass(PassType::Render)
            .set_name("timed")
            .add_color_attachment(rtv, |attachment| {
                attachment.store_operation = StoreOperation::Store;
            })
            .set_execute_fn(|_, _| {
                std::thread::sleep(std::time::Duration::from_millis(2));
            });
        builder.declare_target_resource(rtv);
    }
    graph.build_dag();

    assert!(graph.previous_pass_duration("timed").is_none());
    graph.submit_frame(&context, None);
    context.end_frame();

    let duration = graph.previous_pass_duration("timed").expect("timing recorded");
    assert!(duration >= std::time::Duration::from_millis(2));
    assert!(graph.previous_total_duration() >= duration);
    assert!(graph.previous_pass_duration("unknown").is_none());
}

#[test]
fn owned_resources_release_their_gpu_objects() {
    let context = context();
    let mut graph: RenderGraph<HeadlessBackend> = RenderGraph::new();
    let baseline = context.backend().live_texture_count();

    let owned = graph.registry_mut().create_raw_texture(
        &context,
        &TextureCreateDesc {
            desc: TextureDesc {
                dimensions: (64, 64, 1),
                format: TextureFormat::Rgba8Unorm,
                debug_name: "transient".to_owned(),
                ..TextureDesc::default()
            },
            memory_usage: MemoryUsage::GPU_ONLY_USAGE_TYPE,
            usage: TextureUsage::COLOR_ATTACHMENT,
        },
    );
    assert_eq!(context.backend().live_texture_count(), baseline + 1);

    let texture = graph.registry().texture_of(owned);
    let rtv = context.create_render_target_view(&RenderTargetViewDesc {
        texture,
        format: TextureFormat::Rgba8Unorm,
        texture_type: Default::default(),
        mip_level: 0,
        array_range: (0, 1),
        plane: TextureFormat::Rgba8Unorm.aspect_planes(),
        debug_name: "transient-rtv".to_owned(),
    });
    let rtv_resource = graph
        .registry_mut()
        .register_render_target_view(rtv, owned, "transient-rtv");

    // The view holds a strong reference: releasing the raw handle keeps the
    // texture alive.
    graph.registry_mut().release(&context, owned);
    assert_eq!(context.backend().live_texture_count(), baseline + 1);

    // Dropping the last view releases the underlying texture with it.
    graph.registry_mut().release(&context, rtv_resource);
    assert_eq!(context.backend().live_texture_count(), baseline);
}

#[test]
fn job_groups_fan_out_across_fibers() {
    let context = context();
    let fibers = FibersManager::new(Some(2));
    let mut graph: RenderGraph<HeadlessBackend> = RenderGraph::new();

    let buffer = context.create_buffer(&BufferCreateDesc {
        desc: BufferDesc {
            size: 64,
            debug_name: "chain".to_owned(),
        },
        usage: MemoryUsage::GPU_ONLY_USAGE_TYPE | MemoryUsage::READ_BUFFER,
    });
    let resource = graph.registry_mut().register_raw_buffer(buffer, "chain");

    let lists: Arc<parking_lot::Mutex<Vec<CommandListHandle>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    {
        let builder = graph.begin_frame();
        for index in 0..4 {
            let capture = Arc::clone(&lists);
            builder
                .declare_pass(PassType::Transfer)
                .set_name(&format!("link{}", index))
                .write_dependency(
                    Dependency::new(resource)
                        .with_sync_stage(BarrierSyncStage::TRANSFER)
                        .with_access(BarrierAccess::TRANSFER_DST),
                )
                .set_execute_fn(move |_, data| {
                    capture.lock().push(data.command_list);
                });
        }
        builder.declare_target_resource(resource);
    }
    graph.build_dag();
    graph.set_job_group_count(2);
    graph.submit_frame(&context, Some(&fibers));
    context.end_frame();

    let lists = lists.lock();
    assert_eq!(lists.len(), 4);
    // Two job groups: two distinct command lists, two passes each.
    let mut unique: Vec<CommandListHandle> = lists.clone();
    unique.sort_by_key(|handle| handle.0);
    unique.dedup();
    assert_eq!(unique.len(), 2);
}
