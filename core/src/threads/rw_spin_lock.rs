//! Reader/writer spin lock.
//!
//! Writer-preferring: once a writer is waiting, new readers spin until the
//! writer has come and gone. For read-mostly data whose writes are rare and
//! short (callback registration, configuration swaps).

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

const WRITER: u32 = 1 << 31;
const WRITER_PENDING: u32 = 1 << 30;
const READER_MASK: u32 = WRITER_PENDING - 1;

pub struct RwSpinLock<T> {
    state: AtomicU32,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for RwSpinLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwSpinLock<T> {}

impl<T> RwSpinLock<T> {
    pub const fn new(value: T) -> Self {
        RwSpinLock {
            state: AtomicU32::new(0),
            value: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> RwSpinLockReadGuard<'_, T> {
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state & (WRITER | WRITER_PENDING) == 0 {
                if self
                    .state
                    .compare_exchange_weak(
                        state,
                        state + 1,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return RwSpinLockReadGuard { lock: self };
                }
            }
            std::hint::spin_loop();
        }
    }

    pub fn write(&self) -> RwSpinLockWriteGuard<'_, T> {
        loop {
            // Re-announced every iteration: a competing writer's release
            // clears the whole state word.
            self.state.fetch_or(WRITER_PENDING, Ordering::Relaxed);
            if self
                .state
                .compare_exchange_weak(
                    WRITER_PENDING,
                    WRITER,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return RwSpinLockWriteGuard { lock: self };
            }
            std::hint::spin_loop();
        }
    }

    pub fn reader_count(&self) -> u32 {
        self.state.load(Ordering::Relaxed) & READER_MASK
    }
}

pub struct RwSpinLockReadGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwSpinLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> Drop for RwSpinLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

pub struct RwSpinLockWriteGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwSpinLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for RwSpinLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for RwSpinLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn readers_share_writers_exclude() {
        let lock = RwSpinLock::new(5u32);
        {
            let a = lock.read();
            let b = lock.read();
            assert_eq!((*a, *b), (5, 5));
            assert_eq!(lock.reader_count(), 2);
        }
        {
            let mut w = lock.write();
            *w = 9;
        }
        assert_eq!(*lock.read(), 9);
    }

    #[test]
    fn contended_updates_stay_consistent() {
        let lock = Arc::new(RwSpinLock::new(0u64));
        let mut threads = Vec::new();
        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            threads.push(std::thread::spawn(move || {
                for _ in 0..5_000 {
                    *lock.write() += 1;
                }
            }));
        }
        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            threads.push(std::thread::spawn(move || {
                for _ in 0..5_000 {
                    let value = *lock.read();
                    assert!(value <= 10_000);
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(*lock.read(), 10_000);
    }
}
