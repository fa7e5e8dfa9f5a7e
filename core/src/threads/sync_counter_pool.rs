//! Fixed pool of countdown counters for fork/join synchronisation.
//!
//! A counter is acquired with an initial value, decremented once per
//! completed job, and waited on until it reaches zero. Jobs can be parked on
//! a counter; they are rescued into the runtime's ready queues by the
//! decrement that clears it.

use crate::threads::fiber_job::FiberJob;
use crate::threads::lightweight_mutex::LightweightMutex;
use crate::threads::spin_lock::SpinLock;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};

/// Number of counters in a pool.
pub const POOL_SIZE: usize = 128;

/// Handle to a pool slot. `INVALID` is returned when the pool is exhausted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SyncCounterId(pub(crate) i32);

impl SyncCounterId {
    pub const INVALID: SyncCounterId = SyncCounterId(-1);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl Default for SyncCounterId {
    fn default() -> Self {
        Self::INVALID
    }
}

pub(crate) type RescuedJobs = SmallVec<[FiberJob; 4]>;

struct Entry {
    counter: AtomicI32,
    waiting_jobs: LightweightMutex<RescuedJobs>,
}

pub struct SyncCounterPool {
    entries: Vec<Entry>,
    free_ids: SpinLock,
    free_id_queue: std::cell::UnsafeCell<VecDeque<u16>>,
}

unsafe impl Sync for SyncCounterPool {}

impl SyncCounterPool {
    pub fn new() -> Self {
        SyncCounterPool {
            entries: (0..POOL_SIZE)
                .map(|_| Entry {
                    counter: AtomicI32::new(0),
                    waiting_jobs: LightweightMutex::new(SmallVec::new()),
                })
                .collect(),
            free_ids: SpinLock::new(),
            free_id_queue: std::cell::UnsafeCell::new((0..POOL_SIZE as u16).collect()),
        }
    }

    /// Acquires a counter initialised to `initial_value`. Returns
    /// [`SyncCounterId::INVALID`] when all slots are in use.
    pub fn acquire_counter(&self, initial_value: u32) -> SyncCounterId {
        let id = {
            let _guard = self.free_ids.lock();
            // Safety: the id queue is only touched under the free-ids lock.
            unsafe { (*self.free_id_queue.get()).pop_front() }
        };
        match id {
            Some(id) => {
                self.entries[id as usize]
                    .counter
                    .store(initial_value as i32, Ordering::Release);
                SyncCounterId(i32::from(id))
            }
            None => {
                crate::assert::report_failure("sync counter pool exhausted", file!(), line!());
                SyncCounterId::INVALID
            }
        }
    }

    /// Parks a job on the counter. Returns the job back when the counter is
    /// already zero, in which case the caller should run or requeue it.
    pub fn add_waiting_job(&self, id: SyncCounterId, job: FiberJob) -> Result<(), FiberJob> {
        if !id.is_valid() {
            return Err(job);
        }
        let entry = &self.entries[id.0 as usize];
        let mut waiting = entry.waiting_jobs.lock();
        // Checked under the slot lock so a concurrent decrement-to-zero
        // either sees this job or reports zero to us.
        if entry.counter.load(Ordering::Acquire) <= 0 {
            return Err(job);
        }
        waiting.push(job);
        Ok(())
    }

    /// Decrements the counter, returning the post-decrement value and the
    /// jobs released if it reached zero. Decrementing a counter that is
    /// already at zero stays at zero.
    pub fn decrement(&self, id: SyncCounterId) -> (u32, RescuedJobs) {
        if !id.is_valid() {
            return (0, SmallVec::new());
        }
        let entry = &self.entries[id.0 as usize];
        let mut waiting = entry.waiting_jobs.lock();
        let current = entry.counter.load(Ordering::Acquire);
        if current <= 0 {
            return (0, SmallVec::new());
        }
        let next = current - 1;
        entry.counter.store(next, Ordering::Release);
        if next == 0 {
            (0, std::mem::take(&mut *waiting))
        } else {
            (next as u32, SmallVec::new())
        }
    }

    pub fn is_zero(&self, id: SyncCounterId) -> bool {
        !id.is_valid() || self.entries[id.0 as usize].counter.load(Ordering::Acquire) <= 0
    }

    pub fn value(&self, id: SyncCounterId) -> u32 {
        if !id.is_valid() {
            return 0;
        }
        self.entries[id.0 as usize]
            .counter
            .load(Ordering::Acquire)
            .max(0) as u32
    }

    /// Returns the slot to the pool. The caller must not use the id again.
    pub fn free_counter(&self, id: SyncCounterId) {
        if !id.is_valid() {
            return;
        }
        let entry = &self.entries[id.0 as usize];
        {
            let waiting = entry.waiting_jobs.lock();
            crate::ke_assert!(
                waiting.is_empty(),
                "freeing a sync counter with parked jobs"
            );
        }
        entry.counter.store(0, Ordering::Release);
        let _guard = self.free_ids.lock();
        // Safety: the id queue is only touched under the free-ids lock.
        unsafe { (*self.free_id_queue.get()).push_back(id.0 as u16) };
    }
}

impl Default for SyncCounterPool {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII wrapper freeing its counter on drop.
pub struct AutoSyncCounter<'a> {
    id: SyncCounterId,
    pool: &'a SyncCounterPool,
}

impl<'a> AutoSyncCounter<'a> {
    pub(crate) fn new(id: SyncCounterId, pool: &'a SyncCounterPool) -> Self {
        AutoSyncCounter { id, pool }
    }

    pub fn id(&self) -> SyncCounterId {
        self.id
    }
}

impl Drop for AutoSyncCounter<'_> {
    fn drop(&mut self) {
        self.pool.free_counter(self.id);
    }
}
