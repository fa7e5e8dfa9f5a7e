//! Pass declarations and their fluent builders.

use kryne_core::common::hashing::{hash_64, hash_64_append, StringHash};
use kryne_graphics::barriers::{BarrierAccess, BarrierSyncStage};
use kryne_graphics::descs::{LoadOperation, StoreOperation};
use kryne_graphics::enums::{TextureLayout, TexturePlane};
use kryne_graphics::handles::CommandListHandle;
use kryne_graphics::{GraphicsBackend, GraphicsContext};
use kryne_core::memory::SimplePoolHandle;
use parking_lot::Mutex;
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PassType {
    Render,
    Compute,
    Transfer,
}

/// A declared read or write of a registry resource, with the state the pass
/// needs the resource in.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Dependency {
    pub resource: SimplePoolHandle,
    pub target_layout: TextureLayout,
    pub target_sync_stage: BarrierSyncStage,
    pub target_access: BarrierAccess,
    pub planes: TexturePlane,
}

impl Dependency {
    pub fn new(resource: SimplePoolHandle) -> Self {
        Dependency {
            resource,
            target_layout: TextureLayout::ShaderResource,
            target_sync_stage: BarrierSyncStage::ALL_SHADING,
            target_access: BarrierAccess::SHADER_RESOURCE,
            planes: TexturePlane::COLOR,
        }
    }

    pub fn with_layout(mut self, layout: TextureLayout) -> Self {
        self.target_layout = layout;
        self
    }

    pub fn with_sync_stage(mut self, stage: BarrierSyncStage) -> Self {
        self.target_sync_stage = stage;
        self
    }

    pub fn with_access(mut self, access: BarrierAccess) -> Self {
        self.target_access = access;
        self
    }

    pub fn with_planes(mut self, planes: TexturePlane) -> Self {
        self.planes = planes;
        self
    }
}

/// One attachment of a render pass declaration. The before/after layouts
/// are filled by the resource state tracker, which folds the transitions
/// into the render pass instead of emitting barriers.
#[derive(Clone, Debug, PartialEq)]
pub struct PassAttachmentDeclaration {
    pub rtv: SimplePoolHandle,
    pub load_operation: LoadOperation,
    pub store_operation: StoreOperation,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u8,
    pub read_only: bool,
    pub layout_before: TextureLayout,
    pub layout_after: TextureLayout,
}

impl PassAttachmentDeclaration {
    pub fn new(rtv: SimplePoolHandle) -> Self {
        PassAttachmentDeclaration {
            rtv,
            load_operation: LoadOperation::DontCare,
            store_operation: StoreOperation::DontCare,
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            clear_stencil: 0,
            read_only: false,
            layout_before: TextureLayout::Unknown,
            layout_after: TextureLayout::Unknown,
        }
    }
}

/// Everything a pass needs at execution time.
pub struct PassExecutionData {
    pub command_list: CommandListHandle,
}

pub type ExecuteFn<B> =
    Box<dyn FnMut(&GraphicsContext<B>, &mut PassExecutionData) + Send + 'static>;

pub const MAX_COLOR_ATTACHMENTS: usize = 8;

pub struct PassDeclaration<B: GraphicsBackend> {
    pub pass_type: PassType,
    pub name: StringHash,
    pub color_attachments: SmallVec<[PassAttachmentDeclaration; MAX_COLOR_ATTACHMENTS]>,
    pub depth_attachment: Option<PassAttachmentDeclaration>,
    pub read_dependencies: Vec<Dependency>,
    pub write_dependencies: Vec<Dependency>,
    /// Behind a mutex so executor jobs can run distinct passes of one graph
    /// concurrently.
    pub execute_fn: Option<Mutex<ExecuteFn<B>>>,
    render_pass_hash: Option<u64>,
}

impl<B: GraphicsBackend> PassDeclaration<B> {
    pub fn new(pass_type: PassType, index: usize) -> Self {
        PassDeclaration {
            pass_type,
            name: StringHash::new(&format!("pass#{}", index)),
            color_attachments: SmallVec::new(),
            depth_attachment: None,
            read_dependencies: Vec::new(),
            write_dependencies: Vec::new(),
            execute_fn: None,
            render_pass_hash: None,
        }
    }

    /// Signature over the attachment set (targets, ops, final layouts),
    /// computed once; passes with equal hashes can share the underlying
    /// render-pass object.
    pub fn render_pass_hash(&mut self) -> u64 {
        if let Some(hash) = self.render_pass_hash {
            return hash;
        }
        let mut hash = hash_64(b"render-pass");
        for attachment in &self.color_attachments {
            hash = hash_attachment(attachment, hash);
        }
        if let Some(depth) = &self.depth_attachment {
            hash = hash_64_append(b"depth", hash);
            hash = hash_attachment(depth, hash);
        }
        self.render_pass_hash = Some(hash);
        hash
    }
}

fn hash_attachment(attachment: &PassAttachmentDeclaration, accumulated: u64) -> u64 {
    let key = (
        attachment.rtv as u64,
        attachment.load_operation,
        attachment.store_operation,
        attachment.layout_after,
        attachment.read_only,
    );
    hash_64_append(format!("{:?}", key).as_bytes(), accumulated)
}

/// Fluent declaration interface returned by
/// [`Builder::declare_pass`](crate::builder::Builder::declare_pass).
pub struct PassDeclarationBuilder<'a, B: GraphicsBackend> {
    pass: &'a mut PassDeclaration<B>,
}

impl<'a, B: GraphicsBackend> PassDeclarationBuilder<'a, B> {
    pub(crate) fn new(pass: &'a mut PassDeclaration<B>) -> Self {
        PassDeclarationBuilder { pass }
    }

    pub fn set_name(self, name: &str) -> Self {
        self.pass.name = StringHash::new(name);
        self
    }

    /// Appends a color attachment; `configure` tweaks load/store/clear on
    /// the default declaration.
    pub fn add_color_attachment(
        self,
        rtv: SimplePoolHandle,
        configure: impl FnOnce(&mut PassAttachmentDeclaration),
    ) -> Self {
        let mut attachment = PassAttachmentDeclaration::new(rtv);
        configure(&mut attachment);
        self.pass.color_attachments.push(attachment);
        self
    }

    pub fn set_depth_attachment(
        self,
        rtv: SimplePoolHandle,
        configure: impl FnOnce(&mut PassAttachmentDeclaration),
    ) -> Self {
        let mut attachment = PassAttachmentDeclaration::new(rtv);
        configure(&mut attachment);
        self.pass.depth_attachment = Some(attachment);
        self
    }

    pub fn read_dependency(self, dependency: Dependency) -> Self {
        self.pass.read_dependencies.push(dependency);
        self
    }

    pub fn write_dependency(self, dependency: Dependency) -> Self {
        self.pass.write_dependencies.push(dependency);
        self
    }

    pub fn set_execute_fn(
        self,
        execute: impl FnMut(&GraphicsContext<B>, &mut PassExecutionData) + Send + 'static,
    ) -> Self {
        self.pass.execute_fn = Some(Mutex::new(Box::new(execute)));
        self
    }
}
