use core::cell::UnsafeCell;
use core::fmt::{Debug, Formatter};
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A SpinLock Mutex implementation
///
/// Every per-resource lock of the hypervisor (vCPUs, mailboxes, page tables, the memory tracker) is one of these.
/// Interrupts are never taken while hypervisor code runs so plain spinning is sufficient.
pub struct SpinLock<T> {
    is_locked: AtomicBool,
    value: UnsafeCell<T>,
}

/// A Guard protecting some data locked through a [`SpinLock`].
///
/// Use it via the implemented [`Deref`] and [`DerefMut`] traits.
pub struct Guard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            is_locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Try to lock the lock and return a [`Guard`] if successful
    pub fn try_lock(&self) -> Result<Guard<T>, ()> {
        if self.is_locked.swap(true, Ordering::Acquire) {
            Err(())
        } else {
            Ok(Guard { lock: self })
        }
    }

    /// Try to repeatedly lock the lock until it succeeds, returning the protected data via a [`Guard`]
    pub fn spin_lock(&self) -> Guard<T> {
        while self.is_locked.swap(true, Ordering::Acquire) {
            while self.is_locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        Guard { lock: self }
    }

    /// Whether some [`Guard`] currently holds this lock.
    ///
    /// The answer may already be outdated when it is returned and should only be used for assertions.
    pub fn is_locked(&self) -> bool {
        self.is_locked.load(Ordering::Relaxed)
    }

    /// Access the protected value without locking.
    ///
    /// This is possible because the exclusive borrow of the lock statically proves that no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consume the lock and return the protected value
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn unlock(&self) {
        self.is_locked.store(false, Ordering::Release)
    }
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Debug> Debug for SpinLock<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self.try_lock() {
            Ok(guard) => f.debug_struct("SpinLock").field("value", &*guard).finish(),
            Err(_) => f.write_str("SpinLock { <locked> }"),
        }
    }
}

impl<T> Deref for Guard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: The very existence of this Guard guarantees we've exclusively locked the lock
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for Guard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: The very existence of this Guard guarantees we've exclusively locked the lock
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T: Debug> Debug for Guard<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        Debug::fmt(&**self, f)
    }
}

impl<T> Drop for Guard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use std::format;

    #[test]
    fn test_try_lock_fails_while_guard_is_alive() {
        let lock = SpinLock::new(5u32);
        let guard = lock.spin_lock();
        assert!(lock.is_locked());
        assert!(lock.try_lock().is_err());
        drop(guard);
        assert!(!lock.is_locked());
        assert_eq!(*lock.try_lock().unwrap(), 5);
    }

    #[test]
    fn test_guard_mutates_value() {
        let lock = SpinLock::new([0u8; 4]);
        lock.spin_lock()[2] = 7;
        assert_eq!(lock.into_inner(), [0, 0, 7, 0]);
    }

    #[test]
    fn test_debug_does_not_deadlock() {
        let lock = SpinLock::new(1u8);
        let _guard = lock.spin_lock();
        assert_eq!(format!("{:?}", lock), "SpinLock { <locked> }");
    }
}
