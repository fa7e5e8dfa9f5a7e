//! Rolling per-frame payload tracking.

use crate::memory::DynamicArray;

/// Keeps one payload vector per in-flight frame slot, so that an operation
/// applied to the current frame's copy of some resource can be replayed on
/// the other frames' copies when their turn comes.
///
/// `track_for_other_frames` pushes into every slot except the current one;
/// `advance_to_next_frame` rotates the head, after which `get_data` exposes
/// the operations that were deferred for the newly-current slot.
pub struct MultiFrameDataTracker<T> {
    current_frame: usize,
    tracked_data: DynamicArray<Vec<T>>,
}

impl<T: Clone> MultiFrameDataTracker<T> {
    pub fn new(frame_count: usize, frame_index: usize) -> Self {
        debug_assert!(frame_count > 0);
        MultiFrameDataTracker {
            current_frame: frame_index % frame_count,
            tracked_data: DynamicArray::from_fn(frame_count, |_| Vec::new()),
        }
    }

    pub fn advance_to_next_frame(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.tracked_data.len();
    }

    pub fn track_for_other_frames(&mut self, user_data: T) {
        let count = self.tracked_data.len();
        for offset in 1..count {
            let index = (self.current_frame + offset) % count;
            self.tracked_data[index].push(user_data.clone());
        }
    }

    /// Pending payloads for the current frame slot.
    pub fn get_data(&self) -> &[T] {
        &self.tracked_data[self.current_frame]
    }

    pub fn clear_data(&mut self) {
        let index = self.current_frame;
        self.tracked_data[index].clear();
    }

    pub fn frame_count(&self) -> usize {
        self.tracked_data.len()
    }
}
