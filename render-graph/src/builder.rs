//! Pass collection, resource versioning, DAG construction and culling.
//!
//! Passes are collected in declaration order. Every resource carries a
//! version number: a write produces a new version, a read is recorded
//! against the then-current one. Edges connect each pass to the producer of
//! the versions it consumes (including write-after-write). Declaration
//! order means a producer always precedes its consumers, so the graph is
//! acyclic by construction.
//!
//! After the DAG is built, passes that cannot reach a declared target
//! resource are dead and skipped by the executor.

use crate::declarations::{PassDeclaration, PassDeclarationBuilder, PassType};
use crate::registry::Registry;
use fxhash::{FxHashMap, FxHashSet};
use kryne_core::ke_assert;
use kryne_core::memory::SimplePoolHandle;
use kryne_graphics::GraphicsBackend;

#[derive(Default, Clone)]
pub(crate) struct Node {
    pub children: Vec<usize>,
    pub parents: Vec<usize>,
}

pub struct Builder<B: GraphicsBackend> {
    pub(crate) passes: Vec<PassDeclaration<B>>,
    pub(crate) dag: Vec<Node>,
    pub(crate) pass_alive: Vec<bool>,
    pub(crate) is_built: bool,

    /// resource → (current version, producing pass of that version).
    resource_versions: FxHashMap<SimplePoolHandle, (u32, usize)>,
    target_resources: FxHashSet<SimplePoolHandle>,
}

impl<B: GraphicsBackend> Default for Builder<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GraphicsBackend> Builder<B> {
    pub fn new() -> Self {
        Builder {
            passes: Vec::new(),
            dag: Vec::new(),
            pass_alive: Vec::new(),
            is_built: false,
            resource_versions: FxHashMap::default(),
            target_resources: FxHashSet::default(),
        }
    }

    pub fn declare_pass(&mut self, pass_type: PassType) -> PassDeclarationBuilder<'_, B> {
        ke_assert!(!self.is_built, "declaring a pass on an already-built graph");
        let index = self.passes.len();
        self.passes.push(PassDeclaration::new(pass_type, index));
        PassDeclarationBuilder::new(self.passes.last_mut().expect("just pushed"))
    }

    /// Declares a resource the frame must produce. Only passes that
    /// (transitively) contribute to a target resource survive culling.
    pub fn declare_target_resource(&mut self, resource: SimplePoolHandle) -> &mut Self {
        self.target_resources.insert(resource);
        self
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn is_pass_alive(&self, pass_index: usize) -> bool {
        self.pass_alive.get(pass_index).copied().unwrap_or(false)
    }

    pub fn alive_passes(&self) -> Vec<usize> {
        (0..self.passes.len())
            .filter(|index| self.pass_alive[*index])
            .collect()
    }

    /// Builds dependency edges from the declared reads and writes, then
    /// culls passes unreachable from the target set.
    pub fn build_dag(&mut self, registry: &Registry) {
        ke_assert!(!self.is_built, "graph already built");

        self.dag = vec![Node::default(); self.passes.len()];

        for pass_index in 0..self.passes.len() {
            // Reads first: a pass that reads and writes the same resource
            // consumes the previous version before producing the next.
            let reads: Vec<SimplePoolHandle> = self.passes[pass_index]
                .read_dependencies
                .iter()
                .map(|dependency| dependency.resource)
                .collect();
            for resource in reads {
                self.link_read(registry, pass_index, resource);
            }

            let writes: Vec<SimplePoolHandle> = self.passes[pass_index]
                .write_dependencies
                .iter()
                .map(|dependency| dependency.resource)
                .chain(
                    self.passes[pass_index]
                        .color_attachments
                        .iter()
                        .map(|attachment| attachment.rtv),
                )
                .chain(
                    self.passes[pass_index]
                        .depth_attachment
                        .iter()
                        .map(|attachment| attachment.rtv),
                )
                .collect();
            for resource in writes {
                self.link_write(registry, pass_index, resource);
            }
        }

        // Targets may have been declared through views; culling works on
        // the underlying version keys.
        self.resolve_targets(registry);
        self.cull();
        self.is_built = true;

        if log::log_enabled!(log::Level::Debug) {
            self.print_dag(registry);
        }
    }

    fn version_key(&self, registry: &Registry, resource: SimplePoolHandle) -> SimplePoolHandle {
        ke_assert!(
            registry.is_registered(resource),
            "pass depends on an unregistered resource"
        );
        registry.get_underlying(resource)
    }

    fn link_read(&mut self, registry: &Registry, pass_index: usize, resource: SimplePoolHandle) {
        let key = self.version_key(registry, resource);
        if let Some(&(_, producer)) = self.resource_versions.get(&key) {
            self.add_edge(producer, pass_index);
        }
    }

    fn link_write(&mut self, registry: &Registry, pass_index: usize, resource: SimplePoolHandle) {
        let key = self.version_key(registry, resource);
        let next_version = match self.resource_versions.get(&key) {
            Some(&(version, producer)) => {
                // Write-after-write edge to the previous producer.
                self.add_edge(producer, pass_index);
                version + 1
            }
            None => 1,
        };
        self.resource_versions.insert(key, (next_version, pass_index));
    }

    fn add_edge(&mut self, parent: usize, child: usize) {
        if parent == child {
            return;
        }
        if !self.dag[parent].children.contains(&child) {
            self.dag[parent].children.push(child);
        }
        if !self.dag[child].parents.contains(&parent) {
            self.dag[child].parents.push(parent);
        }
    }

    /// A pass lives iff it is (an ancestor of) a producer of a target
    /// resource.
    fn cull(&mut self) {
        self.pass_alive = vec![false; self.passes.len()];

        let mut stack: Vec<usize> = Vec::new();
        for target in &self.target_resources {
            // Versions are keyed by the underlying resource; the target may
            // have been declared through a view.
            if let Some(&(_, producer)) = self.resource_versions.get(target) {
                stack.push(producer);
            }
        }

        while let Some(pass_index) = stack.pop() {
            if self.pass_alive[pass_index] {
                continue;
            }
            self.pass_alive[pass_index] = true;
            stack.extend(self.dag[pass_index].parents.iter().copied());
        }
    }

    fn resolve_targets(&mut self, registry: &Registry) {
        let resolved: FxHashSet<SimplePoolHandle> = self
            .target_resources
            .iter()
            .map(|target| registry.get_underlying(*target))
            .collect();
        self.target_resources = resolved;
    }

    fn print_dag(&self, registry: &Registry) {
        log::debug!("render graph: {} declared passes", self.passes.len());
        for (index, pass) in self.passes.iter().enumerate() {
            log::debug!(
                "  [{}] '{}' ({:?}) alive={}",
                index,
                pass.name.as_str(),
                pass.pass_type,
                self.pass_alive[index]
            );
            for attachment in &pass.color_attachments {
                log::debug!(
                    "    color attachment '{}' load={:?} store={:?}",
                    registry.name(attachment.rtv),
                    attachment.load_operation,
                    attachment.store_operation
                );
            }
            if let Some(depth) = &pass.depth_attachment {
                log::debug!(
                    "    depth attachment '{}' load={:?} store={:?} read_only={}",
                    registry.name(depth.rtv),
                    depth.load_operation,
                    depth.store_operation,
                    depth.read_only
                );
            }
            for dependency in &pass.read_dependencies {
                log::debug!("    reads '{}'", registry.name(dependency.resource));
            }
            for dependency in &pass.write_dependencies {
                log::debug!("    writes '{}'", registry.name(dependency.resource));
            }
            log::debug!(
                "    children: {:?} parents: {:?}",
                self.dag[index].children,
                self.dag[index].parents
            );
        }
        for (resource, (version, producer)) in &self.resource_versions {
            log::debug!(
                "  resource '{}' at version {} (producer pass {})",
                registry.name(*resource),
                version,
                producer
            );
        }
    }
}
