pub mod fiber_job;
pub mod fibers_manager;
pub mod lightweight_mutex;
pub mod rw_spin_lock;
pub mod spin_lock;
pub mod sync_counter_pool;

pub use fiber_job::{FiberJob, JobPriority};
pub use fibers_manager::FibersManager;
pub use lightweight_mutex::LightweightMutex;
pub use rw_spin_lock::RwSpinLock;
pub use spin_lock::SpinLock;
pub use sync_counter_pool::{AutoSyncCounter, SyncCounterId, SyncCounterPool};
