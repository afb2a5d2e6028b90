use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::Backoff;

/// Test-and-set spinlock over a borrowed `AtomicBool`.
///
/// The cell can live anywhere, including inside a shared memory region or
/// in front of a message header in the ring.
#[derive(Clone, Copy)]
pub struct SpinLock<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SpinLock<'a> {
    pub fn new(flag: &'a AtomicBool) -> Self {
        Self { flag }
    }

    /// Builds a lock over a raw cell.
    ///
    /// # Safety
    /// `cell` must be valid for reads and writes for `'a`, and only accessed
    /// atomically while the lock is in use.
    pub unsafe fn from_ptr(cell: *mut bool) -> Self {
        Self {
            flag: AtomicBool::from_ptr(cell),
        }
    }

    /// Returns true if the lock was free and is now held.
    #[inline]
    pub fn try_lock(&self) -> bool {
        !self.flag.swap(true, Acquire)
    }

    pub fn lock(&self) {
        let backoff = Backoff::new();
        while !self.try_lock() {
            while self.flag.load(Relaxed) {
                backoff.snooze();
            }
        }
    }

    #[inline]
    pub fn unlock(&self) {
        self.flag.store(false, Release);
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.flag.load(Relaxed)
    }

    pub fn acquire(&self) -> SpinGuard<'a> {
        self.lock();
        SpinGuard { lock: *self }
    }

    pub fn try_acquire(&self) -> Option<SpinGuard<'a>> {
        self.try_lock().then(|| SpinGuard { lock: *self })
    }
}

pub struct SpinGuard<'a> {
    lock: SpinLock<'a>,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
