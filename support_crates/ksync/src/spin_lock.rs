use core::cell::UnsafeCell;
use core::fmt::{Debug, Formatter};
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A SpinLock Mutex implementation
///
/// The lock is not reentrant.
/// Trying to acquire it again from the thread that already holds it spins forever.
pub struct SpinLock<T> {
    is_locked: AtomicBool,
    value: UnsafeCell<T>,
}

/// A Guard protecting some data locked through a [`SpinLock`].
///
/// Use it via the implemented [`Deref`] and [`DerefMut`] traits.
/// The lock is released when the guard is dropped, including when a function holding it returns early.
pub struct Guard<'a, T> {
    lock: &'a SpinLock<T>,
}

/// The error returned by [`SpinLock::try_lock`] when the lock is currently held by someone else.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WouldBlock;

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            is_locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Try to lock the lock and return a [`Guard`] if successful
    pub fn try_lock(&self) -> Result<Guard<T>, WouldBlock> {
        if self.is_locked.swap(true, Ordering::Acquire) {
            Err(WouldBlock)
        } else {
            Ok(Guard { lock: self })
        }
    }

    /// Try to repeatedly lock the lock until it succeeds, returning the protected data via a [`Guard`]
    pub fn spin_lock(&self) -> Guard<T> {
        loop {
            if !self.is_locked.swap(true, Ordering::Acquire) {
                return Guard { lock: self };
            }
            // wait on a plain load so that contending cores don't keep bouncing the cache line
            while self.is_locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    /// Whether the lock is currently held.
    ///
    /// The answer may already be outdated when it is returned and should only be used for diagnostics.
    pub fn is_locked(&self) -> bool {
        self.is_locked.load(Ordering::Relaxed)
    }

    /// Access the protected data without locking.
    ///
    /// This is statically safe because the exclusive borrow proves that no guard exists.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Consume the lock and return the protected data.
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
            Err(WouldBlock) => f
                .debug_struct("SpinLock")
                .field("value", &"<locked>")
                .finish(),
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
    use std::thread;

    #[test]
    fn test_try_lock_fails_while_guard_is_alive() {
        let lock = SpinLock::new(0u32);
        let guard = lock.try_lock().unwrap();
        assert!(lock.is_locked());
        assert_eq!(lock.try_lock().err(), Some(WouldBlock));
        drop(guard);
        assert!(!lock.is_locked());
        assert!(lock.try_lock().is_ok());
    }

    #[test]
    fn test_guard_released_on_early_return() {
        fn bump(lock: &SpinLock<u32>, fail: bool) -> Result<(), ()> {
            let mut guard = lock.spin_lock();
            *guard += 1;
            if fail {
                return Err(());
            }
            *guard += 1;
            Ok(())
        }

        let lock = SpinLock::new(0u32);
        assert!(bump(&lock, true).is_err());
        assert!(!lock.is_locked());
        assert_eq!(lock.into_inner(), 1);
    }

    #[test]
    fn test_get_mut_bypasses_lock() {
        let mut lock = SpinLock::new(5u32);
        *lock.get_mut() = 7;
        assert_eq!(*lock.spin_lock(), 7);
    }

    #[test]
    fn test_debug_of_locked_lock() {
        let lock = SpinLock::new(3u8);
        assert_eq!(format!("{:?}", lock), "SpinLock { value: 3 }");
        let _guard = lock.spin_lock();
        assert_eq!(format!("{:?}", lock), "SpinLock { value: \"<locked>\" }");
    }

    #[test]
    fn test_concurrent_increments() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 1000;
        let lock = SpinLock::new(0usize);
        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..ROUNDS {
                        *lock.spin_lock() += 1;
                    }
                });
            }
        });
        assert_eq!(lock.into_inner(), THREADS * ROUNDS);
    }
}
