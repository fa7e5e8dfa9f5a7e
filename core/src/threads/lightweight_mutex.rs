//! Spin-then-park mutex.
//!
//! Starts with a bounded spin phase, betting that the critical section held
//! by the other thread is short (command-pool acquisition, waiter-list
//! edits), and escalates to a parked wait when the bet fails.

use parking_lot::{Mutex, MutexGuard};

const SPIN_ATTEMPTS: u32 = 64;

pub struct LightweightMutex<T> {
    inner: Mutex<T>,
}

impl<T> LightweightMutex<T> {
    pub const fn new(value: T) -> Self {
        LightweightMutex {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        for _ in 0..SPIN_ATTEMPTS {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            std::hint::spin_loop();
        }
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }
}

impl<T: Default> Default for LightweightMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn exclusion_under_contention() {
        let mutex = Arc::new(LightweightMutex::new(0u64));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(*mutex.lock(), 40_000);
    }
}
