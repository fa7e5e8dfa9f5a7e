//! Render-graph frame driver: state tracking, command recording, optional
//! fiber fan-out, and per-pass timing.

use crate::builder::Builder;
use crate::declarations::{PassExecutionData, PassType};
use crate::registry::Registry;
use crate::state_tracker::ResourceStateTracker;
use fxhash::FxHashMap;
use kryne_core::common::hashing::hash_64;
use kryne_core::ke_assert;
use kryne_core::threads::{FibersManager, JobPriority};
use kryne_graphics::descs::{
    DepthStencilAttachment, RenderPassAttachment, RenderPassDesc,
};
use kryne_graphics::handles::RenderPassHandle;
use kryne_graphics::{GraphicsBackend, GraphicsContext};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Per-submit execution state shared by the recording jobs.
struct ExecutionShared {
    /// Alive pass indices, in declaration order.
    alive: Vec<usize>,
    /// Resolved render-pass objects, indexed by pass.
    render_passes: Vec<RenderPassHandle>,
    /// Nanosecond durations, indexed by pass.
    durations: Vec<AtomicU64>,
}

/// Raw-pointer capsule handed to recording jobs. The pointees live across
/// the whole fan-out: `submit_frame` joins the job counter before any of
/// them can go away.
struct JobData<B: GraphicsBackend> {
    graph: *const RenderGraph<B>,
    context: *const GraphicsContext<B>,
    shared: *const ExecutionShared,
    range: (usize, usize),
}

impl<B: GraphicsBackend> Clone for JobData<B> {
    fn clone(&self) -> Self {
        JobData {
            graph: self.graph,
            context: self.context,
            shared: self.shared,
            range: self.range,
        }
    }
}

unsafe impl<B: GraphicsBackend> Send for JobData<B> {}
unsafe impl<B: GraphicsBackend> Sync for JobData<B> {}

pub struct RenderGraph<B: GraphicsBackend> {
    registry: Registry,
    builder: Option<Builder<B>>,
    state_tracker: ResourceStateTracker,
    /// Render-pass objects deduplicated by attachment signature, reused
    /// across frames.
    render_pass_cache: FxHashMap<u64, RenderPassHandle>,
    job_group_count: usize,

    previous_pass_durations: FxHashMap<u64, u64>,
    previous_total_duration: u64,
}

impl<B: GraphicsBackend + 'static> Default for RenderGraph<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GraphicsBackend + 'static> RenderGraph<B> {
    pub fn new() -> Self {
        RenderGraph {
            registry: Registry::new(),
            builder: None,
            state_tracker: ResourceStateTracker::new(),
            render_pass_cache: FxHashMap::default(),
            job_group_count: 1,
            previous_pass_durations: FxHashMap::default(),
            previous_total_duration: 0,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// How many command lists to record the frame into. With more than one
    /// group and a fiber runtime passed to `submit_frame`, groups record in
    /// parallel.
    pub fn set_job_group_count(&mut self, count: usize) {
        self.job_group_count = count.max(1);
    }

    /// Starts collecting pass declarations for the frame.
    pub fn begin_frame(&mut self) -> &mut Builder<B> {
        ke_assert!(self.builder.is_none(), "previous frame was never submitted");
        self.builder = Some(Builder::new());
        self.builder.as_mut().expect("just created")
    }

    /// The frame's builder, between `begin_frame` and `submit_frame`.
    pub fn builder_mut(&mut self) -> Option<&mut Builder<B>> {
        self.builder.as_mut()
    }

    /// Builds the dependency DAG and culls dead passes.
    pub fn build_dag(&mut self) {
        let registry = &self.registry;
        match self.builder.as_mut() {
            Some(builder) => builder.build_dag(registry),
            None => ke_assert!(false, "build_dag without begin_frame"),
        }
    }

    /// Records every surviving pass and submits nothing itself: command
    /// lists are begun and ended against the context, ready for its
    /// `end_frame`. When `fibers` is given and more than one job group is
    /// configured, recording fans out; the last group records on the
    /// calling thread either way.
    pub fn submit_frame(&mut self, context: &GraphicsContext<B>, fibers: Option<&FibersManager>)
    where
        B: Sync,
    {
        let mut builder = match self.builder.take() {
            Some(builder) => builder,
            None => {
                ke_assert!(false, "submit_frame without begin_frame");
                return;
            }
        };
        ke_assert!(builder.is_built, "submit_frame before build_dag");

        self.state_tracker.process(&mut builder, &self.registry);
        let alive = builder.alive_passes();

        // Resolve render-pass objects up front so recording jobs only read.
        let mut render_passes = vec![RenderPassHandle::INVALID; builder.passes.len()];
        for &pass_index in &alive {
            if builder.passes[pass_index].pass_type != PassType::Render {
                continue;
            }
            let hash = builder.passes[pass_index].render_pass_hash();
            let handle = match self.render_pass_cache.get(&hash) {
                Some(handle) => *handle,
                None => {
                    let desc = build_render_pass_desc(&self.registry, &builder.passes[pass_index]);
                    let handle = context.create_render_pass(&desc);
                    self.render_pass_cache.insert(hash, handle);
                    handle
                }
            };
            render_passes[pass_index] = handle;
        }

        let shared = ExecutionShared {
            alive: alive.clone(),
            render_passes,
            durations: (0..builder.passes.len()).map(|_| AtomicU64::new(0)).collect(),
        };

        // Jobs reach the passes through `self`.
        self.builder = Some(builder);

        let group_count = self.job_group_count.min(alive.len().max(1));
        match fibers {
            Some(fibers) if group_count > 1 => {
                // All recording in this window goes through the raw pointer;
                // `self` is not touched again until the counter clears.
                let graph = self as *const RenderGraph<B>;
                let ranges = split_ranges(alive.len(), group_count);
                let jobs: Vec<JobData<B>> = ranges
                    .iter()
                    .map(|range| JobData {
                        graph,
                        context: context as *const GraphicsContext<B>,
                        shared: &shared as *const ExecutionShared,
                        range: *range,
                    })
                    .collect();

                // Record the last group on this thread, dispatch the rest.
                let (last, rest) = jobs.split_last().expect("group_count >= 1");
                let last = last.clone();
                let rest = Arc::new(rest.to_vec());
                let counter = fibers.init_and_batch_jobs(
                    rest.len() as u32,
                    JobPriority::High,
                    move |index| {
                        let job = &rest[index as usize];
                        // Safety: submit_frame joins the counter below, so
                        // graph, context and shared outlive every job.
                        unsafe {
                            (*job.graph).execute_range(
                                &*job.context,
                                &*job.shared,
                                job.range.0,
                                job.range.1,
                            );
                        }
                    },
                );
                // Safety: same window as the dispatched jobs.
                unsafe {
                    (*last.graph).execute_range(context, &shared, last.range.0, last.range.1);
                }
                fibers.wait_for_counter_and_reset(counter);
            }
            _ => {
                self.execute_range(context, &shared, 0, alive.len());
            }
        }

        let builder = self.builder.take().expect("restored above");
        self.previous_pass_durations.clear();
        let mut total = 0u64;
        for &pass_index in &shared.alive {
            let nanoseconds = shared.durations[pass_index].load(Ordering::Acquire);
            self.previous_pass_durations
                .insert(builder.passes[pass_index].name.hash(), nanoseconds);
            total += nanoseconds;
        }
        self.previous_total_duration = total;
    }

    /// Records the alive passes in `[from, to)` into one command list.
    fn execute_range(
        &self,
        context: &GraphicsContext<B>,
        shared: &ExecutionShared,
        from: usize,
        to: usize,
    ) {
        let builder = match self.builder.as_ref() {
            Some(builder) => builder,
            None => return,
        };
        if from >= to {
            return;
        }

        let command_list = context.begin_graphics_command_list();
        for &pass_index in &shared.alive[from..to] {
            let (buffer_barriers, texture_barriers) = self.state_tracker.pass_barriers(pass_index);
            if !buffer_barriers.is_empty() || !texture_barriers.is_empty() {
                context.place_memory_barriers(command_list, &[], buffer_barriers, texture_barriers);
            }

            let pass = &builder.passes[pass_index];
            let start = Instant::now();

            let mut execution_data = PassExecutionData { command_list };
            let run_execute = |execution_data: &mut PassExecutionData| {
                ke_assert!(pass.execute_fn.is_some(), "pass without an execute callback");
                if let Some(execute) = &pass.execute_fn {
                    let mut execute = execute.lock();
                    (&mut *execute)(context, execution_data);
                }
            };

            match pass.pass_type {
                PassType::Render => {
                    context.begin_render_pass(command_list, shared.render_passes[pass_index]);
                    run_execute(&mut execution_data);
                    context.end_render_pass(command_list);
                }
                PassType::Compute => {
                    context.begin_compute_pass(command_list);
                    run_execute(&mut execution_data);
                    context.end_compute_pass(command_list);
                }
                PassType::Transfer => {
                    run_execute(&mut execution_data);
                }
            }

            shared.durations[pass_index]
                .store(start.elapsed().as_nanos() as u64, Ordering::Release);
        }
        context.end_graphics_command_list(command_list);
    }

    /// Wall-clock duration of a pass during the previous submitted frame.
    pub fn previous_pass_duration(&self, name: &str) -> Option<std::time::Duration> {
        self.previous_pass_durations
            .get(&hash_64(name.as_bytes()))
            .map(|nanoseconds| std::time::Duration::from_nanos(*nanoseconds))
    }

    pub fn previous_total_duration(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.previous_total_duration)
    }
}

fn split_ranges(len: usize, groups: usize) -> Vec<(usize, usize)> {
    let groups = groups.min(len).max(1);
    let base = len / groups;
    let remainder = len % groups;
    let mut ranges = Vec::with_capacity(groups);
    let mut start = 0;
    for group in 0..groups {
        let size = base + usize::from(group < remainder);
        ranges.push((start, start + size));
        start += size;
    }
    ranges
}

fn build_render_pass_desc<B: GraphicsBackend>(
    registry: &Registry,
    pass: &crate::declarations::PassDeclaration<B>,
) -> RenderPassDesc {
    let mut desc = RenderPassDesc {
        color_attachments: Default::default(),
        depth_stencil_attachment: None,
        debug_name: pass.name.as_str().to_owned(),
    };
    for attachment in &pass.color_attachments {
        desc.color_attachments.push(RenderPassAttachment {
            load_operation: attachment.load_operation,
            store_operation: attachment.store_operation,
            initial_layout: attachment.layout_before,
            final_layout: attachment.layout_after,
            rtv: registry.render_target_view(attachment.rtv),
            clear_color: attachment.clear_color,
        });
    }
    if let Some(depth) = &pass.depth_attachment {
        desc.depth_stencil_attachment = Some(DepthStencilAttachment {
            attachment: RenderPassAttachment {
                load_operation: depth.load_operation,
                store_operation: depth.store_operation,
                initial_layout: depth.layout_before,
                final_layout: depth.layout_after,
                rtv: registry.render_target_view(depth.rtv),
                clear_color: [0.0; 4],
            },
            stencil_load_operation: depth.load_operation,
            stencil_store_operation: depth.store_operation,
            depth_clear_value: depth.clear_depth,
            stencil_clear_value: depth.clear_stencil,
        });
    }
    desc
}

#[cfg(test)]
mod tests {
    use super::split_ranges;

    #[test]
    fn range_splitting_covers_everything() {
        assert_eq!(split_ranges(5, 1), vec![(0, 5)]);
        assert_eq!(split_ranges(5, 2), vec![(0, 3), (3, 5)]);
        assert_eq!(split_ranges(2, 4), vec![(0, 1), (1, 2)]);
        assert_eq!(split_ranges(6, 3), vec![(0, 2), (2, 4), (4, 6)]);
    }
}
