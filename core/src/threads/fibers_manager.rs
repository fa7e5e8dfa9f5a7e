//! Work-stealing job runtime.
//!
//! M worker threads drain per-priority injector queues into local deques and
//! steal from each other when their own work runs dry. Fork/join is built on
//! the sync counter pool: a batch of jobs shares a counter, and
//! [`FibersManager::wait_for_counter`] blocks until it clears.
//!
//! Waiting is cooperative on worker threads: instead of suspending a stack,
//! the waiting worker keeps running ready jobs until the counter reaches
//! zero. Threads outside the runtime park on a condvar. Jobs never migrate
//! mid-execution and always run to completion.

use crate::threads::fiber_job::{FiberJob, JobPriority};
use crate::threads::sync_counter_pool::{AutoSyncCounter, SyncCounterId, SyncCounterPool};
use crossbeam_deque::{Injector, Stealer, Steal, Worker};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

struct Shared {
    injectors: [Injector<FiberJob>; JobPriority::COUNT],
    stealers: Vec<Stealer<FiberJob>>,
    counters: SyncCounterPool,
    shutdown: AtomicBool,
    /// Workers park here when every queue is dry.
    idle_mutex: Mutex<()>,
    idle_cond: Condvar,
    /// External threads park here in `wait_for_counter`.
    counter_mutex: Mutex<()>,
    counter_cond: Condvar,
}

thread_local! {
    /// Points at the runtime this thread is a worker of, if any.
    static CURRENT_RUNTIME: Cell<*const Shared> = Cell::new(std::ptr::null());
}

impl Shared {
    fn inject(&self, job: FiberJob) {
        self.injectors[job.priority.queue_index()].push(job);
        self.idle_cond.notify_one();
    }

    /// High priority first, then batch-steal from the injectors, then raid
    /// the other workers' deques.
    fn steal_job(&self, local: Option<&Worker<FiberJob>>) -> Option<FiberJob> {
        if let Some(local) = local {
            if let Some(job) = local.pop() {
                return Some(job);
            }
        }
        for injector in &self.injectors {
            loop {
                let steal = match local {
                    Some(local) => injector.steal_batch_and_pop(local),
                    None => injector.steal(),
                };
                match steal {
                    Steal::Success(job) => return Some(job),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        for stealer in &self.stealers {
            loop {
                match stealer.steal() {
                    Steal::Success(job) => return Some(job),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }
        None
    }

    fn run_job(&self, job: FiberJob) {
        let counter = job.counter;
        (job.func)();
        if counter.is_valid() {
            self.decrement_counter(counter);
        }
    }

    fn decrement_counter(&self, id: SyncCounterId) -> u32 {
        let (value, rescued) = self.counters.decrement(id);
        for job in rescued {
            self.inject(job);
        }
        if value == 0 {
            // Taken so a parked external waiter cannot miss the wake between
            // its zero check and its wait.
            let _guard = self.counter_mutex.lock();
            self.counter_cond.notify_all();
        }
        value
    }
}

fn worker_loop(shared: Arc<Shared>, local: Worker<FiberJob>) {
    CURRENT_RUNTIME.with(|current| current.set(Arc::as_ptr(&shared)));

    let mut idle_spins = 0u32;
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        match shared.steal_job(Some(&local)) {
            Some(job) => {
                idle_spins = 0;
                shared.run_job(job);
            }
            None => {
                idle_spins += 1;
                if idle_spins < 64 {
                    std::thread::yield_now();
                } else {
                    let mut guard = shared.idle_mutex.lock();
                    shared
                        .idle_cond
                        .wait_for(&mut guard, std::time::Duration::from_millis(2));
                    idle_spins = 0;
                }
            }
        }
    }

    CURRENT_RUNTIME.with(|current| current.set(std::ptr::null()));
}

/// See the module documentation.
pub struct FibersManager {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl FibersManager {
    /// Spawns `requested_thread_count` workers, or one per logical core
    /// minus one (minimum one) when `None`.
    pub fn new(requested_thread_count: Option<usize>) -> Self {
        let count = requested_thread_count
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1))
            .max(1);

        let locals: Vec<Worker<FiberJob>> = (0..count).map(|_| Worker::new_fifo()).collect();
        let stealers = locals.iter().map(Worker::stealer).collect();

        let shared = Arc::new(Shared {
            injectors: [Injector::new(), Injector::new(), Injector::new()],
            stealers,
            counters: SyncCounterPool::new(),
            shutdown: AtomicBool::new(false),
            idle_mutex: Mutex::new(()),
            idle_cond: Condvar::new(),
            counter_mutex: Mutex::new(()),
            counter_cond: Condvar::new(),
        });

        let workers = locals
            .into_iter()
            .enumerate()
            .map(|(index, local)| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("kryne-worker-{}", index))
                    .spawn(move || worker_loop(shared, local))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        FibersManager { shared, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// True when the calling thread is one of this runtime's workers.
    pub fn is_worker_thread(&self) -> bool {
        CURRENT_RUNTIME.with(|current| current.get() == Arc::as_ptr(&self.shared))
    }

    /// Enqueues a job for execution.
    pub fn queue_job(&self, job: FiberJob) {
        self.shared.inject(job);
    }

    /// Acquires a counter set to `job_count` and enqueues that many jobs,
    /// each invoking `func` with its batch index. The counter is decremented
    /// as jobs complete; wait on it to join the batch.
    ///
    /// Returns [`SyncCounterId::INVALID`] without enqueuing anything when the
    /// counter pool is exhausted.
    pub fn init_and_batch_jobs<F>(
        &self,
        job_count: u32,
        priority: JobPriority,
        func: F,
    ) -> SyncCounterId
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let counter = self.shared.counters.acquire_counter(job_count);
        if !counter.is_valid() {
            return counter;
        }
        let func = Arc::new(func);
        for index in 0..job_count {
            let func = Arc::clone(&func);
            self.shared.inject(FiberJob::with_counter(priority, counter, move || {
                func(index)
            }));
        }
        counter
    }

    /// Parks a job until the counter clears; it is requeued by the decrement
    /// reaching zero. Hands the job back when the counter is already clear.
    pub fn add_waiting_job(&self, id: SyncCounterId, job: FiberJob) -> Result<(), FiberJob> {
        self.shared.counters.add_waiting_job(id, job)
    }

    /// Blocks until the counter reaches zero.
    ///
    /// On a worker thread this runs ready jobs while waiting; on any other
    /// thread it parks on a condvar.
    pub fn wait_for_counter(&self, id: SyncCounterId) {
        if !id.is_valid() {
            return;
        }
        if self.is_worker_thread() {
            let mut idle_spins = 0u32;
            while !self.shared.counters.is_zero(id) {
                match self.shared.steal_job(None) {
                    Some(job) => {
                        idle_spins = 0;
                        self.shared.run_job(job);
                    }
                    None => {
                        idle_spins += 1;
                        if idle_spins > 16 {
                            std::thread::yield_now();
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        } else {
            let mut guard = self.shared.counter_mutex.lock();
            while !self.shared.counters.is_zero(id) {
                self.shared
                    .counter_cond
                    .wait_for(&mut guard, std::time::Duration::from_millis(10));
            }
        }
    }

    /// Returns the counter to the pool.
    pub fn reset_counter(&self, id: SyncCounterId) {
        self.shared.counters.free_counter(id);
    }

    pub fn wait_for_counter_and_reset(&self, id: SyncCounterId) {
        self.wait_for_counter(id);
        self.reset_counter(id);
    }

    /// Decrements the counter, returning the post-decrement value. Reaching
    /// zero rescues parked jobs into the ready queues and wakes waiters.
    pub fn decrement_counter(&self, id: SyncCounterId) -> u32 {
        self.shared.decrement_counter(id)
    }

    /// Acquires a counter that frees itself when the wrapper drops.
    pub fn acquire_auto_sync_counter(&self, count: u32) -> AutoSyncCounter<'_> {
        AutoSyncCounter::new(self.shared.counters.acquire_counter(count), &self.shared.counters)
    }

    /// Yields the current job's time slice: runs `next` if given, otherwise
    /// one pending job if any is ready.
    pub fn yield_job(&self, next: Option<FiberJob>) {
        match next {
            Some(job) => self.shared.run_job(job),
            None => {
                if let Some(job) = self.shared.steal_job(None) {
                    self.shared.run_job(job);
                } else {
                    std::thread::yield_now();
                }
            }
        }
    }
}

impl Drop for FibersManager {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.idle_cond.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn batch_fork_join() {
        let fibers = FibersManager::new(Some(4));
        let hits = Arc::new(AtomicU32::new(0));

        let hits_in_jobs = Arc::clone(&hits);
        let counter = fibers.init_and_batch_jobs(16, JobPriority::Medium, move |_| {
            hits_in_jobs.fetch_add(1, Ordering::Relaxed);
        });
        assert!(counter.is_valid());

        fibers.wait_for_counter_and_reset(counter);
        assert_eq!(hits.load(Ordering::Relaxed), 16);
    }

    #[test]
    fn batch_indices_are_distinct() {
        let fibers = FibersManager::new(Some(2));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_in_jobs = Arc::clone(&seen);
        let counter = fibers.init_and_batch_jobs(8, JobPriority::High, move |index| {
            seen_in_jobs.lock().push(index);
        });
        fibers.wait_for_counter_and_reset(counter);

        let mut indices = seen.lock().clone();
        indices.sort_unstable();
        assert_eq!(indices, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn workers_help_while_waiting() {
        // A single worker must still complete a nested batch: the outer job
        // waits for the inner batch by running it.
        let fibers = Arc::new(FibersManager::new(Some(1)));
        let done = Arc::new(AtomicU32::new(0));

        let inner_fibers = Arc::clone(&fibers);
        let inner_done = Arc::clone(&done);
        let outer = fibers.init_and_batch_jobs(1, JobPriority::Medium, move |_| {
            let tally = Arc::clone(&inner_done);
            let counter = inner_fibers.init_and_batch_jobs(4, JobPriority::Medium, move |_| {
                tally.fetch_add(1, Ordering::Relaxed);
            });
            inner_fibers.wait_for_counter_and_reset(counter);
        });
        fibers.wait_for_counter_and_reset(outer);
        assert_eq!(done.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn parked_jobs_run_after_counter_clears() {
        let fibers = FibersManager::new(Some(2));
        let order = Arc::new(Mutex::new(Vec::new()));

        let gate = fibers.acquire_auto_sync_counter(1);
        let order_in_parked = Arc::clone(&order);
        let parked = FiberJob::new(JobPriority::Medium, move || {
            order_in_parked.lock().push("parked");
        });
        assert!(fibers.add_waiting_job(gate.id(), parked).is_ok());

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(order.lock().is_empty());

        order.lock().push("release");
        fibers.decrement_counter(gate.id());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while order.lock().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(*order.lock(), vec!["release", "parked"]);
    }

    #[test]
    fn queue_job_runs_without_counter() {
        let fibers = FibersManager::new(Some(2));
        let ran = Arc::new(AtomicU32::new(0));

        let flag = Arc::clone(&ran);
        fibers.queue_job(FiberJob::new(JobPriority::Low, move || {
            flag.store(1, Ordering::Release);
        }));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while ran.load(Ordering::Acquire) == 0 && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert_eq!(ran.load(Ordering::Acquire), 1);
    }
}
