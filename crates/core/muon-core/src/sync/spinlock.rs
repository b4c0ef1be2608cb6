//! Spin lock.
//!
//! Muon runs on one core, so the only contention a lock ever sees is an
//! interrupt handler interleaving with thread code. Acquisition is
//! therefore a plain test-and-set spin; there is no multi-core
//! scalability to chase. The kernel has two kinds of users: the debug
//! output channel, and the lazily installed subsystem singletons (heap,
//! VFS, symbol table, module registry, scheduler), which all live in
//! `static NAME: SpinLock<Option<T>>` slots and go through
//! [`SpinLock::with_init`].

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A test-and-set spin lock.
///
/// Const-constructable so it can be placed in `static` items.
pub struct SpinLock<T> {
    taken: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: At most one guard exists at a time, so the value is only ever
// reached from one context at once; `T: Send` covers handing it between
// thread and handler context.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new unlocked lock wrapping `value`.
    pub const fn new(value: T) -> Self {
        Self {
            taken: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is free.
    ///
    /// Thread-context callers must not hold the lock across an interrupt
    /// that takes it too; on one core that spin never ends.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self.taken.swap(true, Ordering::Acquire) {
            core::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }

    /// Acquires the lock only if it is free right now.
    ///
    /// Handler-context code uses this where spinning would hang the core.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.taken.swap(true, Ordering::Acquire) {
            None
        } else {
            Some(SpinLockGuard { lock: self })
        }
    }
}

impl<T> SpinLock<Option<T>> {
    /// Runs `f` on an installed subsystem singleton.
    ///
    /// The kernel's process-wide services are populated once at boot into
    /// `SpinLock<Option<T>>` statics; this is the accessor behind their
    /// `with_*` functions.
    ///
    /// # Panics
    ///
    /// Panics if the singleton named `what` has not been installed yet.
    pub fn with_init<R>(&self, what: &str, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock();
        let value = guard
            .as_mut()
            .unwrap_or_else(|| panic!("{what} not initialized"));
        f(value)
    }
}

/// RAII guard; the lock is released when this drops.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: A live guard means this context won the test-and-set;
        // no other guard can exist until Drop clears `taken`.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Same exclusivity as `deref`.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.taken.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_gives_exclusive_access_until_drop() {
        let lock = SpinLock::new(7);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.try_lock().is_none());
        }
        assert_eq!(*lock.lock(), 8);
    }

    #[test]
    fn try_lock_takes_a_free_lock() {
        let lock = SpinLock::new(());
        let guard = lock.try_lock();
        assert!(guard.is_some());
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn with_init_reaches_installed_singleton() {
        let slot: SpinLock<Option<u32>> = SpinLock::new(None);
        *slot.lock() = Some(5);
        assert_eq!(slot.with_init("slot", |v| {
            *v += 1;
            *v
        }), 6);
        assert_eq!(*slot.lock(), Some(6));
    }

    #[test]
    #[should_panic(expected = "slot not initialized")]
    fn with_init_panics_on_empty_slot() {
        let slot: SpinLock<Option<u32>> = SpinLock::new(None);
        slot.with_init("slot", |v| *v);
    }

    #[test]
    fn counter_survives_thread_contention() {
        let lock = std::sync::Arc::new(SpinLock::new(0u32));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let lock = lock.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 6000);
    }
}
