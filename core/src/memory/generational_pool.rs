//! Thread-safe generational pool.
//!
//! Reads are completely lock-free, writes are serialised on a spin lock. The
//! container is meant to be read very frequently during a frame and to see
//! few writes, so this split provides the right trade-off.
//!
//! Storage grows in segments whose sizes double, so a slot's address never
//! changes once allocated: references handed out by [`GenerationalPool::get`]
//! stay valid across growth. Callers must still sequence frees so that no
//! reference obtained from `get` outlives the free of its slot; the deferred
//! free list exists so that GPU-object owners can delay index reuse by a full
//! frame rotation.

use crate::threads::spin_lock::SpinLock;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

/// Bits of a handle dedicated to the slot index.
pub const INDEX_BITS: u32 = 20;
/// Bits of a handle dedicated to the generation.
pub const GENERATION_BITS: u32 = 32 - INDEX_BITS;

const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// Bit set in a slot's stored state while the slot holds a live payload.
/// Lives above the generation bits, inside the slot only (never in handles).
const LIVE_BIT: u32 = 1 << GENERATION_BITS;

const INITIAL_SIZE_POT: u32 = 5;
const SEGMENT_COUNT: usize = (INDEX_BITS - INITIAL_SIZE_POT) as usize;

/// Largest number of slots a pool can hold.
pub const MAX_SIZE: usize = (1 << INDEX_BITS) - (1 << INITIAL_SIZE_POT);

/// An index + generation pair identifying a pool slot.
///
/// Two sentinels exist: [`GenPoolHandle::INVALID`] (generation all-ones,
/// index zero), returned by failed allocations, and
/// [`GenPoolHandle::UNDEFINED`] (all-ones everywhere) for "not yet assigned".
/// Equality is bit equality.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct GenPoolHandle(u32);

impl GenPoolHandle {
    pub const INVALID: GenPoolHandle = GenPoolHandle(GENERATION_MASK << INDEX_BITS);
    pub const UNDEFINED: GenPoolHandle = GenPoolHandle(u32::MAX);

    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        GenPoolHandle((index & INDEX_MASK) | ((generation & GENERATION_MASK) << INDEX_BITS))
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.0 >> INDEX_BITS
    }

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        GenPoolHandle(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// False for the two sentinel values.
    #[inline]
    pub fn is_some(self) -> bool {
        self != Self::INVALID && self != Self::UNDEFINED
    }
}

impl Default for GenPoolHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Debug for GenPoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == Self::INVALID {
            write!(f, "GenPoolHandle(INVALID)")
        } else if *self == Self::UNDEFINED {
            write!(f, "GenPoolHandle(UNDEFINED)")
        } else {
            write!(f, "GenPoolHandle({}:{})", self.index(), self.generation())
        }
    }
}

struct HotSlot<H> {
    /// Generation bits plus [`LIVE_BIT`] while occupied.
    state: AtomicU32,
    data: UnsafeCell<MaybeUninit<H>>,
}

struct ColdSlot<C> {
    data: UnsafeCell<MaybeUninit<C>>,
}

struct FreeLists {
    available: Vec<u32>,
    /// Two-stage deferral: `deferred` holds indices freed since the last
    /// flush, `pending` the ones from the flush before. A flush promotes
    /// `pending` to `available` and `deferred` to `pending`, so an index
    /// freed right before a flush still survives one full flush period.
    pending: Vec<u32>,
    deferred: Vec<u32>,
}

/// See the module documentation.
pub struct GenerationalPool<H, C = ()> {
    hot_segments: [AtomicPtr<HotSlot<H>>; SEGMENT_COUNT],
    cold_segments: [AtomicPtr<ColdSlot<C>>; SEGMENT_COUNT],
    /// High-water mark: number of slot indices ever handed out.
    size: AtomicUsize,
    lock: SpinLock,
    free_lists: UnsafeCell<FreeLists>,
}

unsafe impl<H: Send + Sync, C: Send + Sync> Send for GenerationalPool<H, C> {}
unsafe impl<H: Send + Sync, C: Send + Sync> Sync for GenerationalPool<H, C> {}

#[inline]
const fn segment_len(segment: usize) -> usize {
    1 << (INITIAL_SIZE_POT as usize + segment)
}

#[inline]
fn locate(index: u32) -> (usize, usize) {
    let biased = index + (1 << INITIAL_SIZE_POT);
    let segment = (31 - biased.leading_zeros()) - INITIAL_SIZE_POT;
    let base = (1u32 << (segment + INITIAL_SIZE_POT)) - (1 << INITIAL_SIZE_POT);
    (segment as usize, (index - base) as usize)
}

impl<H, C> Default for GenerationalPool<H, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, C> GenerationalPool<H, C> {
    pub fn new() -> Self {
        GenerationalPool {
            hot_segments: Default::default(),
            cold_segments: Default::default(),
            size: AtomicUsize::new(0),
            lock: SpinLock::new(),
            free_lists: UnsafeCell::new(FreeLists {
                available: Vec::new(),
                pending: Vec::new(),
                deferred: Vec::new(),
            }),
        }
    }

    /// Number of slot indices ever handed out (freed slots included).
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    fn hot_slot(&self, index: u32) -> Option<&HotSlot<H>> {
        let (segment, local) = locate(index);
        let ptr = self.hot_segments[segment].load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        // Within bounds: a segment is always allocated in full.
        Some(unsafe { &*ptr.add(local) })
    }

    fn cold_slot(&self, index: u32) -> &ColdSlot<C> {
        let (segment, local) = locate(index);
        let ptr = self.cold_segments[segment].load(Ordering::Acquire);
        debug_assert!(!ptr.is_null());
        unsafe { &*ptr.add(local) }
    }

    /// Allocates the next segment. Caller holds the write lock.
    fn grow(&self, segment: usize) {
        let hot: Box<[HotSlot<H>]> = (0..segment_len(segment))
            .map(|_| HotSlot {
                state: AtomicU32::new(0),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        let cold: Box<[ColdSlot<C>]> = (0..segment_len(segment))
            .map(|_| ColdSlot {
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        self.hot_segments[segment].store(Box::into_raw(hot) as *mut HotSlot<H>, Ordering::Release);
        self.cold_segments[segment]
            .store(Box::into_raw(cold) as *mut ColdSlot<C>, Ordering::Release);
    }

    /// Allocates a slot and moves both payloads into it.
    ///
    /// Fails with [`GenPoolHandle::INVALID`] once the 20-bit index space is
    /// exhausted; existing entries are unaffected.
    pub fn allocate_with(&self, hot: H, cold: C) -> GenPoolHandle {
        let _guard = self.lock.lock();
        // Safety: free lists are only touched under the spin lock.
        let free_lists = unsafe { &mut *self.free_lists.get() };

        let index = match free_lists.available.pop() {
            Some(index) => index,
            None => {
                let index = self.size.load(Ordering::Relaxed);
                if index >= MAX_SIZE {
                    crate::assert::report_failure(
                        "generational pool exhausted its index space",
                        file!(),
                        line!(),
                    );
                    return GenPoolHandle::INVALID;
                }
                let (segment, local) = locate(index as u32);
                if local == 0 {
                    self.grow(segment);
                }
                self.size.store(index + 1, Ordering::Relaxed);
                index as u32
            }
        };

        let slot = self.hot_slot(index).expect("slot segment must exist");
        let state = slot.state.load(Ordering::Relaxed);
        debug_assert_eq!(state & LIVE_BIT, 0);
        let generation = state & GENERATION_MASK;
        unsafe {
            (*slot.data.get()).write(hot);
            (*self.cold_slot(index).data.get()).write(cold);
        }
        slot.state
            .store(generation | LIVE_BIT, Ordering::Release);

        GenPoolHandle::new(index, generation)
    }

    /// Lock-free lookup of the hot payload. Returns `None` when the handle's
    /// generation no longer matches the slot.
    pub fn get(&self, handle: GenPoolHandle) -> Option<&H> {
        if !handle.is_some() || handle.index() as usize >= self.size() {
            return None;
        }
        let slot = self.hot_slot(handle.index())?;
        let state = slot.state.load(Ordering::Acquire);
        if state != (handle.generation() | LIVE_BIT) {
            return None;
        }
        Some(unsafe { (*slot.data.get()).assume_init_ref() })
    }

    /// Lock-free lookup of both payloads.
    pub fn get_all(&self, handle: GenPoolHandle) -> Option<(&H, &C)> {
        self.get(handle).map(|hot| {
            let cold = unsafe { (*self.cold_slot(handle.index()).data.get()).assume_init_ref() };
            (hot, cold)
        })
    }

    /// Lock-free lookup of the cold payload.
    pub fn get_cold(&self, handle: GenPoolHandle) -> Option<&C> {
        self.get_all(handle).map(|(_, cold)| cold)
    }

    /// Frees the slot, bumping its generation, and moves the payloads out.
    /// Returns `None` (and leaves the pool untouched) if the handle was
    /// already stale.
    ///
    /// The freed index becomes available for reuse immediately.
    pub fn free(&self, handle: GenPoolHandle) -> Option<(H, C)> {
        self.free_impl(handle, false)
    }

    /// Like [`GenerationalPool::free`], but the index only becomes available
    /// for reuse after the second
    /// [`GenerationalPool::flush_deferred_frees`] from now. An owner that
    /// flushes once per frame-slot rotation therefore keeps freed indices
    /// out of circulation for at least one full rotation.
    pub fn free_deferred(&self, handle: GenPoolHandle) -> Option<(H, C)> {
        self.free_impl(handle, true)
    }

    fn free_impl(&self, handle: GenPoolHandle, deferred: bool) -> Option<(H, C)> {
        if !handle.is_some() || handle.index() as usize >= self.size() {
            return None;
        }
        let _guard = self.lock.lock();

        let slot = self.hot_slot(handle.index())?;
        let state = slot.state.load(Ordering::Acquire);
        if state != (handle.generation() | LIVE_BIT) {
            return None;
        }

        let payloads = unsafe {
            let hot = (*slot.data.get()).assume_init_read();
            let cold = (*self.cold_slot(handle.index()).data.get()).assume_init_read();
            (hot, cold)
        };

        let next_generation = (handle.generation() + 1) & GENERATION_MASK;
        slot.state.store(next_generation, Ordering::Release);

        // Safety: free lists are only touched under the spin lock.
        let free_lists = unsafe { &mut *self.free_lists.get() };
        if deferred {
            free_lists.deferred.push(handle.index());
        } else {
            free_lists.available.push(handle.index());
        }

        Some(payloads)
    }

    /// Advances the deferred-free stages. Called once per frame-slot
    /// rotation by the pool's owner.
    pub fn flush_deferred_frees(&self) {
        let _guard = self.lock.lock();
        // Safety: free lists are only touched under the spin lock.
        let free_lists = unsafe { &mut *self.free_lists.get() };
        let pending = std::mem::take(&mut free_lists.pending);
        free_lists.available.extend(pending);
        free_lists.pending = std::mem::take(&mut free_lists.deferred);
    }
}

impl<H, C> Drop for GenerationalPool<H, C> {
    fn drop(&mut self) {
        let size = self.size();
        for index in 0..size as u32 {
            let (segment, local) = locate(index);
            let hot = self.hot_segments[segment].load(Ordering::Acquire);
            if hot.is_null() {
                continue;
            }
            let slot = unsafe { &*hot.add(local) };
            if slot.state.load(Ordering::Acquire) & LIVE_BIT != 0 {
                unsafe {
                    (*slot.data.get()).assume_init_drop();
                    (*self.cold_slot(index).data.get()).assume_init_drop();
                }
            }
        }
        for segment in 0..SEGMENT_COUNT {
            let hot = self.hot_segments[segment].load(Ordering::Acquire);
            if !hot.is_null() {
                unsafe {
                    drop(Box::from_raw(std::slice::from_raw_parts_mut(
                        hot,
                        segment_len(segment),
                    )));
                }
            }
            let cold = self.cold_segments[segment].load(Ordering::Acquire);
            if !cold.is_null() {
                unsafe {
                    drop(Box::from_raw(std::slice::from_raw_parts_mut(
                        cold,
                        segment_len(segment),
                    )));
                }
            }
        }
    }
}

impl<H> GenerationalPool<H, ()> {
    /// Allocates a slot for a hot payload only.
    pub fn allocate(&self, hot: H) -> GenPoolHandle {
        self.allocate_with(hot, ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_sentinels() {
        assert_eq!(GenPoolHandle::INVALID.index(), 0);
        assert_eq!(GenPoolHandle::INVALID.generation(), GENERATION_MASK);
        assert_eq!(GenPoolHandle::UNDEFINED.to_raw(), u32::MAX);
        assert!(!GenPoolHandle::INVALID.is_some());
        assert!(!GenPoolHandle::UNDEFINED.is_some());
        assert!(GenPoolHandle::new(0, 0).is_some());
    }

    #[test]
    fn allocate_get_free_round_trip() {
        let pool: GenerationalPool<u64> = GenerationalPool::new();
        let handle = pool.allocate(1234);
        assert_eq!(pool.get(handle), Some(&1234));
        assert_eq!(pool.free(handle), Some((1234, ())));
        assert_eq!(pool.get(handle), None);
        assert_eq!(pool.free(handle), None);
    }

    #[test]
    fn freed_index_is_reused_with_bumped_generation() {
        let pool: GenerationalPool<u32> = GenerationalPool::new();
        // Allocate past the first segment so growth happens at least once.
        let handles: Vec<_> = (0..33).map(|i| pool.allocate(i)).collect();
        assert_eq!(pool.size(), 33);

        let old = handles[10];
        assert!(pool.free(old).is_some());

        let new = pool.allocate(999);
        assert_eq!(new.index(), 10);
        assert_eq!(new.generation(), old.generation() + 1);
        assert_eq!(pool.get(old), None);
        assert_eq!(pool.get(new), Some(&999));
    }

    #[test]
    fn references_survive_growth() {
        let pool: GenerationalPool<u64> = GenerationalPool::new();
        let first = pool.allocate(42);
        let first_ptr = pool.get(first).unwrap() as *const u64;
        // Grow across several segment boundaries.
        for i in 0..1000 {
            pool.allocate(i);
        }
        assert_eq!(pool.get(first).unwrap() as *const u64, first_ptr);
    }

    #[test]
    fn deferred_frees_only_reused_after_two_flushes() {
        let pool: GenerationalPool<u32> = GenerationalPool::new();
        let handles: Vec<_> = (0..4).map(|i| pool.allocate(i)).collect();
        assert!(pool.free_deferred(handles[2]).is_some());

        // The freed index must not come back before the second flush.
        let fresh = pool.allocate(100);
        assert_eq!(fresh.index(), 4);
        pool.flush_deferred_frees();
        let fresh = pool.allocate(101);
        assert_eq!(fresh.index(), 5);

        pool.flush_deferred_frees();
        let recycled = pool.allocate(200);
        assert_eq!(recycled.index(), 2);
        assert_eq!(recycled.generation(), handles[2].generation() + 1);
    }

    #[test]
    fn cold_payloads() {
        let pool: GenerationalPool<u32, String> = GenerationalPool::new();
        let handle = pool.allocate_with(7, "seven".to_owned());
        assert_eq!(pool.get(handle), Some(&7));
        assert_eq!(pool.get_cold(handle).map(String::as_str), Some("seven"));
        let (hot, cold) = pool.get_all(handle).unwrap();
        assert_eq!((*hot, cold.as_str()), (7, "seven"));
        let (hot, cold) = pool.free(handle).unwrap();
        assert_eq!((hot, cold.as_str()), (7, "seven"));
    }

    #[test]
    fn drops_live_entries() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Payload;
        impl Drop for Payload {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        {
            let pool: GenerationalPool<Payload> = GenerationalPool::new();
            let a = pool.allocate(Payload);
            let _b = pool.allocate(Payload);
            drop(pool.free(a));
        }
        assert_eq!(DROPS.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn exhaustion_fails_without_corrupting_entries() {
        let _catcher = crate::assert::ScopedAssertCatcher::new();
        let pool: GenerationalPool<u32> = GenerationalPool::new();
        let first = pool.allocate(7);
        for i in 1..MAX_SIZE {
            pool.allocate(i as u32);
        }
        assert_eq!(pool.size(), MAX_SIZE);

        let overflow = pool.allocate(1);
        assert_eq!(overflow, GenPoolHandle::INVALID);
        assert_eq!(pool.get(first), Some(&7));

        // Freeing makes the index space usable again.
        assert!(pool.free(first).is_some());
        let recycled = pool.allocate(9);
        assert_eq!(recycled.index(), first.index());
        assert_eq!(pool.get(recycled), Some(&9));
    }

    #[test]
    fn concurrent_readers_and_allocators() {
        use std::sync::Arc;

        let pool: Arc<GenerationalPool<u64>> = Arc::new(GenerationalPool::new());
        let reader_handle = pool.allocate(77);

        let mut threads = Vec::new();
        for t in 0..4 {
            let pool = Arc::clone(&pool);
            threads.push(std::thread::spawn(move || {
                for i in 0..500u64 {
                    let h = pool.allocate(t * 1000 + i);
                    assert_eq!(pool.get(h), Some(&(t * 1000 + i)));
                    assert_eq!(pool.get(reader_handle), Some(&77));
                    if i % 2 == 0 {
                        assert!(pool.free(h).is_some());
                    }
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(pool.get(reader_handle), Some(&77));
    }
}
