//! Job description for the fiber runtime.

use crate::threads::sync_counter_pool::SyncCounterId;

/// Scheduling priority. Workers drain higher priorities first.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum JobPriority {
    High,
    Medium,
    Low,
}

impl JobPriority {
    pub const COUNT: usize = 3;

    #[inline]
    pub(crate) fn queue_index(self) -> usize {
        match self {
            JobPriority::High => 0,
            JobPriority::Medium => 1,
            JobPriority::Low => 2,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Medium
    }
}

/// A fire-and-forget unit of work.
///
/// Jobs run to completion on a worker's stack; there is no cancellation.
/// A job may carry a sync counter, which the runtime decrements once the
/// job body has returned.
pub struct FiberJob {
    pub(crate) func: Box<dyn FnOnce() + Send + 'static>,
    pub(crate) priority: JobPriority,
    pub(crate) counter: SyncCounterId,
}

impl FiberJob {
    pub fn new(priority: JobPriority, func: impl FnOnce() + Send + 'static) -> Self {
        FiberJob {
            func: Box::new(func),
            priority,
            counter: SyncCounterId::INVALID,
        }
    }

    pub(crate) fn with_counter(
        priority: JobPriority,
        counter: SyncCounterId,
        func: impl FnOnce() + Send + 'static,
    ) -> Self {
        FiberJob {
            func: Box::new(func),
            priority,
            counter,
        }
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }
}

impl std::fmt::Debug for FiberJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberJob")
            .field("priority", &self.priority)
            .field("counter", &self.counter)
            .finish()
    }
}
