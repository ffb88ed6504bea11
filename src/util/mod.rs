//! Utility code shared between the cooperative loop and interrupt context.

pub mod spin_lock;

use spin_lock::{SpinLock, SpinLockGuard};

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        /// Runs `f` with interrupts masked.
        ///
        /// Cooperative code uses this around multi-word reads or writes of
        /// state the firing ISRs also touch; single-word accesses go
        /// through atomics and don't need it.
        pub fn critical<R>(f: impl FnOnce() -> R) -> R {
            cortex_m::interrupt::free(|_| f())
        }
    } else {
        /// Runs `f` with interrupts masked.
        ///
        /// On hosted targets there are no interrupts to mask; tests get a
        /// plain call.
        pub fn critical<R>(f: impl FnOnce() -> R) -> R {
            f()
        }
    }
}

/// Pattern for acquiring hardware resources loaned to an ISR in a static.
///
/// Board support stashes its concrete hardware in a
/// `SpinLock<Option<Hw>>` at init; interrupt handlers borrow it through
/// this helper for the duration of one ISR invocation.
///
/// # Panics
///
/// If the lock is held, or the hardware has not been provisioned yet.
/// Either means the IRQ was enabled before init finished, or two handlers
/// are using the hardware without coordination -- both wiring bugs worth a
/// loud stop.
pub fn acquire_hw<T: Send>(lock: &SpinLock<Option<T>>) -> SpinLockGuard<T> {
    SpinLockGuard::map(
        lock.try_lock().expect("HW lock held at ISR"),
        |o| o.as_mut().expect("ISR fired without HW available"),
    )
}
