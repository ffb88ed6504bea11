//! Type-level representation of execution contexts.
//!
//! The zero-cross and timer-fire handlers run in one interrupt priority
//! class; everything else runs at thread priority in the cooperative loop.
//! These zero-sized tokens let APIs state which context they expect to be
//! called from, instead of documenting it and hoping.

use core::marker::PhantomData;

// Marker type used to cause things to stop being Sync/Send.
type NotSyncOrSend = PhantomData<*mut ()>;

/// Firing-interrupt execution: the zero-cross edge handler and the
/// one-shot timer handler. Both share one priority and never preempt each
/// other.
#[derive(Copy, Clone)]
pub struct Isr(NotSyncOrSend);

/// Thread-mode execution, outside any interrupt handler.
#[derive(Copy, Clone)]
pub struct Thread(NotSyncOrSend);

impl Isr {
    /// Conjures an ISR token.
    ///
    /// # Safety
    ///
    /// Call this only from the interrupt vectors wired to the engine's
    /// entry points. Tests simulating those vectors count.
    pub unsafe fn new() -> Self {
        Isr(PhantomData)
    }
}

impl Thread {
    pub(crate) unsafe fn new() -> Self {
        Thread(PhantomData)
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        impl Thread {
            /// Returns a `Thread` token only if called from thread priority.
            pub fn new_checked() -> Option<Self> {
                // Safety: reads of the ICSR are safe.
                let icsr = unsafe {
                    &(*cortex_m::peripheral::SCB::ptr()).icsr
                }
                .read();
                if icsr & 0xFF == 0 {
                    Some(unsafe { Self::new() })
                } else {
                    None
                }
            }
        }
    } else {
        impl Thread {
            /// Returns a `Thread` token. Hosted targets have no interrupt
            /// context to rule out.
            pub fn new_checked() -> Option<Self> {
                Some(unsafe { Self::new() })
            }
        }
    }
}
