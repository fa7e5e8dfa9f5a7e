//! Per-frame command allocation and frame-completion fencing.
//!
//! One [`FrameContext`] exists per in-flight frame slot. Each owns three
//! command allocator sets (graphics, compute, transfer) recycling command
//! lists between uses of the slot, plus the frame-id stamp of the frame
//! currently recorded against it. Acquisition is mutex-protected so several
//! fibers can record simultaneously.

use crate::enums::QueueType;
use crate::handles::CommandListHandle;
use kryne_core::threads::LightweightMutex;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct AllocatorState {
    available: Vec<CommandListHandle>,
    used: Vec<CommandListHandle>,
    open: Vec<CommandListHandle>,
}

/// Command-list recycling for one queue of one frame slot.
pub struct CommandAllocatorSet {
    state: LightweightMutex<AllocatorState>,
}

impl CommandAllocatorSet {
    pub fn new() -> Self {
        CommandAllocatorSet {
            state: LightweightMutex::new(AllocatorState::default()),
        }
    }

    /// Hands out a recycled command list, or the one produced by
    /// `create_new` when none is available.
    pub fn begin_command_list(
        &self,
        create_new: impl FnOnce() -> CommandListHandle,
    ) -> CommandListHandle {
        let mut state = self.state.lock();
        let handle = state.available.pop().unwrap_or_else(create_new);
        state.used.push(handle);
        state.open.push(handle);
        handle
    }

    /// Closes an open command list. False when the handle was not open in
    /// this slot.
    pub fn end_command_list(&self, handle: CommandListHandle) -> bool {
        let mut state = self.state.lock();
        match state.open.iter().position(|open| *open == handle) {
            Some(position) => {
                state.open.swap_remove(position);
                true
            }
            None => false,
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Moves every used command list back to the available list. The caller
    /// guarantees the GPU is done with them (frame fence).
    pub fn reset(&self) {
        let mut state = self.state.lock();
        kryne_core::ke_assert!(
            state.open.is_empty(),
            "recycling a command allocator with open command lists"
        );
        let used = std::mem::take(&mut state.used);
        state.available.extend(used);
    }
}

impl Default for CommandAllocatorSet {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one in-flight frame slot.
pub struct FrameContext {
    queues: [CommandAllocatorSet; QueueType::COUNT],
    frame_id: AtomicU64,
}

impl FrameContext {
    pub fn new() -> Self {
        FrameContext {
            queues: [
                CommandAllocatorSet::new(),
                CommandAllocatorSet::new(),
                CommandAllocatorSet::new(),
            ],
            frame_id: AtomicU64::new(0),
        }
    }

    pub fn allocator(&self, queue: QueueType) -> &CommandAllocatorSet {
        &self.queues[queue.index()]
    }

    /// Frame id currently recorded against this slot.
    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::Acquire)
    }

    /// Recycles the slot's command lists and stamps it with the frame that
    /// will record into it next.
    pub fn prepare_for_next_frame(&self, frame_id: u64) {
        for queue in &self.queues {
            queue.reset();
        }
        self.frame_id.store(frame_id, Ordering::Release);
    }
}

impl Default for FrameContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the newest fully-executed frame id and lets callers block on it.
pub struct FrameFence {
    executed: Mutex<u64>,
    condvar: Condvar,
}

impl FrameFence {
    pub fn new() -> Self {
        FrameFence {
            executed: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Marks `frame_id` (and everything before it) executed.
    pub fn signal(&self, frame_id: u64) {
        let mut executed = self.executed.lock();
        if frame_id > *executed {
            *executed = frame_id;
            self.condvar.notify_all();
        }
    }

    pub fn is_frame_executed(&self, frame_id: u64) -> bool {
        *self.executed.lock() >= frame_id
    }

    /// Returns once `frame_id` has executed; immediately when it already has.
    pub fn wait_for_frame(&self, frame_id: u64) {
        let mut executed = self.executed.lock();
        while *executed < frame_id {
            self.condvar.wait(&mut executed);
        }
    }
}

impl Default for FrameFence {
    fn default() -> Self {
        Self::new()
    }
}
