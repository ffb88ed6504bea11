//! Bare-metal spinlock built on atomic memory operations.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Protects a `T` against concurrent or reentrant access.
///
/// This fills the role `Mutex` plays in hosted code, stripped down for
/// bare metal: locking is best-effort and may fail, because there is no
/// scheduler to block on. The intended use is sharing hardware handles
/// between the cooperative loop and the firing interrupts, where a failed
/// `try_lock` in an ISR indicates a wiring bug rather than contention to
/// wait out.
#[derive(Debug)]
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    contents: UnsafeCell<T>,
}

unsafe impl<T: Send + ?Sized> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(contents: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            contents: UnsafeCell::new(contents),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum SpinLockError {
    Contended,
}

impl<T: ?Sized + Send> SpinLock<T> {
    pub fn try_lock(&self) -> Result<SpinLockGuard<T>, SpinLockError> {
        if self.locked.swap(true, Ordering::Acquire) {
            // Already held elsewhere.
            Err(SpinLockError::Contended)
        } else {
            // We observed the false->true transition, so no other context
            // can hold a guard; handing out one exclusive reference is
            // sound until it drops and releases the flag.
            Ok(SpinLockGuard {
                locked: LockBorrow(&self.locked),
                contents: unsafe { &mut *self.contents.get() },
            })
        }
    }

    /// Spins until the lock is acquired. Cooperative-context only; an ISR
    /// spinning here against the thread it preempted would never return.
    pub fn lock(&self) -> SpinLockGuard<T> {
        loop {
            if let Ok(guard) = self.try_lock() {
                return guard;
            }
        }
    }
}

#[must_use = "if dropped, the spinlock will immediately unlock"]
#[derive(Debug)]
pub struct SpinLockGuard<'a, T: ?Sized> {
    locked: LockBorrow<'a>,
    contents: &'a mut T,
}

/// Borrow of the lock flag that releases it on drop. Split out of
/// `SpinLockGuard` so the guard itself stays consumable by `map`, which a
/// `Drop` type could not be.
#[derive(Debug)]
struct LockBorrow<'a>(&'a AtomicBool);

impl<'a, T: ?Sized> SpinLockGuard<'a, T> {
    /// Narrows a guard of `T` into a guard of some part of `T`, consuming
    /// the original.
    pub fn map<U>(
        orig: SpinLockGuard<'a, T>,
        f: impl FnOnce(&mut T) -> &mut U,
    ) -> SpinLockGuard<'a, U> {
        let SpinLockGuard { locked, contents } = orig;
        SpinLockGuard {
            locked,
            contents: f(contents),
        }
    }
}

impl<'a, T: ?Sized> core::ops::Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.contents
    }
}

impl<'a, T: ?Sized> core::ops::DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.contents
    }
}

impl<'a> Drop for LockBorrow<'a> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
