//! Resource state tracking and barrier derivation.
//!
//! Walks the surviving passes in declaration order, carrying the last known
//! `(sync stage, access, layout)` of every touched resource. Each declared
//! dependency becomes exactly one barrier from the last known state to the
//! declared target state. Render-pass attachments never emit barriers:
//! their transitions are folded into the attachment's before/after layouts
//! and performed by the render pass itself.
//!
//! Barriers land in flat pools with a per-pass index range, so the
//! executor fetches them without allocating.

use crate::builder::Builder;
use crate::declarations::Dependency;
use crate::registry::Registry;
use fxhash::FxHashMap;
use kryne_core::memory::SimplePoolHandle;
use kryne_graphics::barriers::{BarrierAccess, BarrierSyncStage, BufferMemoryBarrier, TextureMemoryBarrier};
use kryne_graphics::descs::StoreOperation;
use kryne_graphics::enums::TextureLayout;
use kryne_graphics::GraphicsBackend;

/// Where the latest version of a resource currently is, and whether that
/// state is carried by a pending attachment (whose `layout_after` is still
/// open for amendment).
#[derive(Clone, Copy)]
struct ResourceState {
    sync_stage: BarrierSyncStage,
    access: BarrierAccess,
    layout: TextureLayout,
    attachment: Option<AttachmentRef>,
}

impl Default for ResourceState {
    fn default() -> Self {
        ResourceState {
            sync_stage: BarrierSyncStage::ALL,
            access: BarrierAccess::ALL,
            layout: TextureLayout::Unknown,
            attachment: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AttachmentRef {
    Color { pass: usize, index: usize },
    Depth { pass: usize },
}

#[derive(Clone, Copy, Default)]
struct PassBarrierRanges {
    buffer_start: usize,
    buffer_count: usize,
    texture_start: usize,
    texture_count: usize,
}

#[derive(Default)]
pub struct ResourceStateTracker {
    buffer_barriers: Vec<BufferMemoryBarrier>,
    texture_barriers: Vec<TextureMemoryBarrier>,
    pass_ranges: Vec<PassBarrierRanges>,
    tracked_states: FxHashMap<SimplePoolHandle, ResourceState>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process<B: GraphicsBackend>(&mut self, builder: &mut Builder<B>, registry: &Registry) {
        self.buffer_barriers.clear();
        self.texture_barriers.clear();
        self.pass_ranges.clear();
        self.pass_ranges
            .resize(builder.passes.len(), PassBarrierRanges::default());
        self.tracked_states.clear();

        for pass_index in 0..builder.passes.len() {
            if !builder.pass_alive[pass_index] {
                continue;
            }

            let buffer_start = self.buffer_barriers.len();
            let texture_start = self.texture_barriers.len();

            let reads: Vec<Dependency> = builder.passes[pass_index].read_dependencies.clone();
            for dependency in &reads {
                self.apply_dependency(builder, registry, dependency);
            }
            let writes: Vec<Dependency> = builder.passes[pass_index].write_dependencies.clone();
            for dependency in &writes {
                self.apply_dependency(builder, registry, dependency);
            }

            let color_count = builder.passes[pass_index].color_attachments.len();
            for attachment_index in 0..color_count {
                self.apply_attachment(
                    builder,
                    registry,
                    AttachmentRef::Color {
                        pass: pass_index,
                        index: attachment_index,
                    },
                );
            }
            if builder.passes[pass_index].depth_attachment.is_some() {
                self.apply_attachment(builder, registry, AttachmentRef::Depth { pass: pass_index });
            }

            self.pass_ranges[pass_index] = PassBarrierRanges {
                buffer_start,
                buffer_count: self.buffer_barriers.len() - buffer_start,
                texture_start,
                texture_count: self.texture_barriers.len() - texture_start,
            };
        }
    }

    /// Barriers the given pass must place before executing.
    pub fn pass_barriers(
        &self,
        pass_index: usize,
    ) -> (&[BufferMemoryBarrier], &[TextureMemoryBarrier]) {
        let ranges = self
            .pass_ranges
            .get(pass_index)
            .copied()
            .unwrap_or_default();
        (
            &self.buffer_barriers[ranges.buffer_start..ranges.buffer_start + ranges.buffer_count],
            &self.texture_barriers
                [ranges.texture_start..ranges.texture_start + ranges.texture_count],
        )
    }

    fn apply_dependency<B: GraphicsBackend>(
        &mut self,
        builder: &mut Builder<B>,
        registry: &Registry,
        dependency: &Dependency,
    ) {
        let underlying = registry.get_underlying(dependency.resource);
        let previous = self
            .tracked_states
            .get(&underlying)
            .copied()
            .unwrap_or_default();

        if let Some(attachment) = previous.attachment {
            // The last producer was a render pass: amend its store-time
            // layout instead of emitting a barrier.
            *attachment_layout_after(builder, attachment) = dependency.target_layout;
        } else if registry.resource(dependency.resource).is_texture() {
            self.texture_barriers.push(TextureMemoryBarrier {
                stages_src: previous.sync_stage,
                stages_dst: dependency.target_sync_stage,
                access_src: previous.access,
                access_dst: dependency.target_access,
                layout_src: previous.layout,
                layout_dst: dependency.target_layout,
                planes: dependency.planes,
                ..TextureMemoryBarrier::new(registry.texture_of(underlying))
            });
        } else {
            self.buffer_barriers.push(BufferMemoryBarrier {
                stages_src: previous.sync_stage,
                stages_dst: dependency.target_sync_stage,
                access_src: previous.access,
                access_dst: dependency.target_access,
                ..BufferMemoryBarrier::whole_buffer(registry.buffer_of(underlying))
            });
        }

        self.tracked_states.insert(
            underlying,
            ResourceState {
                sync_stage: dependency.target_sync_stage,
                access: dependency.target_access,
                layout: dependency.target_layout,
                attachment: None,
            },
        );
    }

    fn apply_attachment<B: GraphicsBackend>(
        &mut self,
        builder: &mut Builder<B>,
        registry: &Registry,
        reference: AttachmentRef,
    ) {
        let depth = matches!(reference, AttachmentRef::Depth { .. });
        let (rtv, store_operation, read_only) = {
            let attachment = attachment_of(builder, reference);
            (attachment.rtv, attachment.store_operation, attachment.read_only)
        };
        let underlying = registry.get_underlying(rtv);

        // Store-time layout guess: depth stays an attachment, stored color
        // is most likely heading to present. Amended later if a subsequent
        // dependency declares otherwise.
        let layout_after = if depth {
            if read_only {
                TextureLayout::DepthStencilReadOnly
            } else {
                TextureLayout::DepthStencilAttachment
            }
        } else if store_operation == StoreOperation::Store {
            TextureLayout::Present
        } else {
            TextureLayout::ColorAttachment
        };

        let previous = self.tracked_states.get(&underlying).copied();
        let layout_before = match previous {
            None => TextureLayout::Unknown,
            Some(state) => match state.attachment {
                Some(previous_attachment) => {
                    // Chained render passes hand over in attachment layout.
                    let handover = if depth {
                        layout_after
                    } else {
                        TextureLayout::ColorAttachment
                    };
                    *attachment_layout_after(builder, previous_attachment) = handover;
                    handover
                }
                None => state.layout,
            },
        };

        {
            let attachment = attachment_of(builder, reference);
            attachment.layout_before = layout_before;
            attachment.layout_after = layout_after;
        }

        self.tracked_states.insert(
            underlying,
            ResourceState {
                sync_stage: BarrierSyncStage::ALL,
                access: BarrierAccess::ALL,
                layout: layout_after,
                attachment: Some(reference),
            },
        );
    }
}

fn attachment_of<B: GraphicsBackend>(
    builder: &mut Builder<B>,
    reference: AttachmentRef,
) -> &mut crate::declarations::PassAttachmentDeclaration {
    match reference {
        AttachmentRef::Color { pass, index } => &mut builder.passes[pass].color_attachments[index],
        AttachmentRef::Depth { pass } => builder.passes[pass]
            .depth_attachment
            .as_mut()
            .expect("depth attachment reference without attachment"),
    }
}

fn attachment_layout_after<B: GraphicsBackend>(
    builder: &mut Builder<B>,
    reference: AttachmentRef,
) -> &mut TextureLayout {
    &mut attachment_of(builder, reference).layout_after
}
