//! Zero-cross-synchronized TRIAC firing engine.
//!
//! # Theory of operation
//!
//! Mains voltage crosses zero twice per cycle; a detector pin produces an
//! edge at (approximately) each crossing. Delaying the TRIAC gate pulse
//! into the half-cycle reduces the delivered energy, so each channel's
//! brightness boils down to one number: how many microseconds past the
//! edge its gate fires.
//!
//! Two interrupt handlers do all the time-critical work. The zero-cross
//! handler ([`Engine::on_zero_cross`]) debounces the detector, stamps the
//! edge, clears the per-channel fired flags, and arms a one-shot timer for
//! the earliest pending gate. The timer handler ([`Engine::on_fire_timer`])
//! recomputes the earliest pending delay (brightness may have changed in
//! between), pulses every channel within a small window of it -- grouping
//! near-equal delays into one pulse instead of re-arming the timer for
//! sub-window gaps -- and then arms the timer for the next-latest group.
//! A channel at level 0 carries a delay past the half-cycle and is never
//! considered, so it never fires.
//!
//! The cooperative loop calls [`Engine::update`] as a watchdog: if no edge
//! has been accepted for [`ZC_LOST_TIMEOUT_US`] the engine drives every
//! gate low and disables the timer. The split is deliberate: the edge ISR
//! never spins deciding recovery (it just stamps and proceeds), and the
//! thread never mutates firing state behind the ISRs' backs -- its
//! emergency hardware writes happen with interrupts masked.
//!
//! All state shared with the handlers lives in single-word atomics, so
//! `&Engine` can be handed to interrupt vectors and cooperative code
//! alike. The concrete gate pins and timer enter through [`FiringHw`];
//! board support owns them (typically inside a
//! [`SpinLock`](crate::util::spin_lock::SpinLock), borrowed per-ISR via
//! [`acquire_hw`](crate::util::acquire_hw)), and tests substitute a
//! recorder.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::priority;
use crate::util;
use crate::CHANNELS;

/// Nominal half-cycle length at 50 Hz mains.
pub const HALF_CYCLE_US: u32 = 10_000;

/// Shortest usable fire delay: full brightness fires this far past the
/// edge.
pub const MIN_FIRE_DELAY_US: u32 = 100;

/// Gate pulse width. The TRIAC latches well before this elapses.
pub const GATE_PULSE_US: u32 = 500;

/// Edges closer together than this are rejected as detector noise. The
/// detector's ~1.5 ms pulse width double-triggers some inputs, so this
/// must stay at or above 3 ms.
pub const ZC_DEBOUNCE_US: u32 = 5_000;

/// No accepted edge for this long means the mains reference is gone and
/// firing blind is unsafe.
pub const ZC_LOST_TIMEOUT_US: u32 = 100_000;

/// Delay assigned to level 0. Strictly beyond the half-cycle, so a dark
/// channel can never be selected for firing.
pub const OFF_DELAY_US: u32 = HALF_CYCLE_US + 2_000;

/// Highest brightness level the engine understands.
pub const MAX_LEVEL: u8 = 9;

/// Channels within this many microseconds of the firing target share one
/// pulse event.
const FUSE_WINDOW_US: u32 = 10;

/// Shortest one-shot delay worth arming; anything tighter is rounded up.
const MIN_REARM_US: u32 = 10;

/// Level 1 fires here; levels 2..=8 step linearly down toward
/// [`MIN_FIRE_DELAY_US`].
const DIMMEST_DELAY_US: u32 = HALF_CYCLE_US - 1_500;

const LEVEL_STEP_US: u32 =
    (DIMMEST_DELAY_US - MIN_FIRE_DELAY_US) / (MAX_LEVEL as u32 - 1);

/// Maps a brightness level to its fire delay past the zero-cross.
///
/// Deterministic and pure; this table *is* the light curve. Monotone
/// decreasing in `level`, with level 0 pinned past the half-cycle.
pub fn level_to_delay_us(level: u8) -> u32 {
    if level == 0 {
        OFF_DELAY_US
    } else if level >= MAX_LEVEL {
        MIN_FIRE_DELAY_US
    } else {
        MIN_FIRE_DELAY_US + u32::from(MAX_LEVEL - level) * LEVEL_STEP_US
    }
}

/// Hardware operations the engine needs, implemented by board support.
///
/// Implementations must be callable from interrupt context: no allocation,
/// no locking, no blocking beyond the explicit `busy_wait_us`.
pub trait FiringHw {
    /// Drives one channel's gate pin high.
    fn gate_high(&mut self, channel: usize);
    /// Drives every gate pin low.
    fn all_gates_low(&mut self);
    /// Arms (or re-arms) the one-shot fire timer.
    fn arm_fire_timer(&mut self, delay_us: u32);
    /// Disarms the fire timer.
    fn cancel_fire_timer(&mut self);
    /// Spins for `us` microseconds. The only intentional blocking point in
    /// interrupt context; it bounds the gate pulse width.
    fn busy_wait_us(&mut self, us: u32);
}

/// Phase-control state for all channels.
///
/// Every field is a single-word atomic: the firing ISRs and the
/// cooperative loop share `&Engine` without locks. The two ISRs run in one
/// priority class and never preempt each other.
pub struct Engine {
    /// Brightness levels, 0..=[`MAX_LEVEL`]. Observability only -- the ISRs
    /// consume `delays`.
    levels: [AtomicU8; CHANNELS],
    /// Fire delays derived from `levels` via [`level_to_delay_us`].
    delays: [AtomicU32; CHANNELS],
    /// Set when a channel's gate has pulsed this half-cycle; cleared on
    /// each accepted edge.
    fired: [AtomicBool; CHANNELS],
    /// Timestamp of the last accepted zero-cross edge.
    last_zc_us: AtomicU32,
    /// Whether any edge has ever been accepted since boot.
    zc_ever: AtomicBool,
    /// Detector health, as last judged by the edge ISR / watchdog.
    zc_healthy: AtomicBool,
    /// Emergency shutoff engaged by the watchdog.
    shutoff: AtomicBool,
    /// Delay of the last pulse event in this half-cycle; the next timer
    /// arm is relative to it.
    last_fire_delay_us: AtomicU32,
}

impl Engine {
    pub const fn new() -> Self {
        const LEVEL0: AtomicU8 = AtomicU8::new(0);
        const DELAY0: AtomicU32 = AtomicU32::new(OFF_DELAY_US);
        const UNFIRED: AtomicBool = AtomicBool::new(false);
        Engine {
            levels: [LEVEL0; CHANNELS],
            delays: [DELAY0; CHANNELS],
            fired: [UNFIRED; CHANNELS],
            last_zc_us: AtomicU32::new(0),
            zc_ever: AtomicBool::new(false),
            zc_healthy: AtomicBool::new(false),
            shutoff: AtomicBool::new(false),
            last_fire_delay_us: AtomicU32::new(0),
        }
    }

    /// Sets one channel's brightness. Never fails; out-of-range channels
    /// are ignored and levels clamp to [`MAX_LEVEL`].
    ///
    /// Atomic with respect to the ISRs: the delay is a single-word store,
    /// and the half-cycle after the store reflects the new value.
    pub fn set_channel_brightness(&self, channel: usize, level: u8) {
        if channel >= CHANNELS {
            return;
        }
        let level = level.min(MAX_LEVEL);
        self.delays[channel].store(level_to_delay_us(level), Ordering::Relaxed);
        self.levels[channel].store(level, Ordering::Relaxed);
    }

    /// Sets every channel to the same brightness.
    pub fn set_brightness(&self, level: u8) {
        for channel in 0..CHANNELS {
            self.set_channel_brightness(channel, level);
        }
    }

    /// Zero-cross edge handler.
    pub fn on_zero_cross(
        &self,
        now_us: u32,
        hw: &mut impl FiringHw,
        _: priority::Isr,
    ) {
        // Reject the detector's pulse-width double-trigger.
        if self.zc_ever.load(Ordering::Relaxed) {
            let since = now_us.wrapping_sub(self.last_zc_us.load(Ordering::Relaxed));
            if since < ZC_DEBOUNCE_US {
                return;
            }
        }

        self.last_zc_us.store(now_us, Ordering::Relaxed);
        self.zc_ever.store(true, Ordering::Relaxed);
        self.zc_healthy.store(true, Ordering::Relaxed);

        // Fresh half-cycle: every channel may fire once again.
        for fired in &self.fired {
            fired.store(false, Ordering::Relaxed);
        }
        self.last_fire_delay_us.store(0, Ordering::Relaxed);

        // During emergency shutoff the edge only re-stamps; the watchdog
        // clears the flag from thread context once it sees edges again.
        if !self.shutoff.load(Ordering::Relaxed) {
            self.schedule_next(hw);
        }
    }

    /// One-shot timer handler: fire the current pulse group, then schedule
    /// the next.
    pub fn on_fire_timer(&self, hw: &mut impl FiringHw, _: priority::Isr) {
        // Re-snapshot: brightness may have changed since the timer was
        // armed, so the target is recomputed rather than remembered.
        let mut delays = [0u32; CHANNELS];
        let mut fired = [false; CHANNELS];
        for channel in 0..CHANNELS {
            delays[channel] = self.delays[channel].load(Ordering::Relaxed);
            fired[channel] = self.fired[channel].load(Ordering::Relaxed);
        }

        let mut target: Option<u32> = None;
        for channel in 0..CHANNELS {
            if fired[channel] || delays[channel] >= HALF_CYCLE_US {
                continue;
            }
            target = Some(match target {
                Some(t) => t.min(delays[channel]),
                None => delays[channel],
            });
        }
        let target = match target {
            Some(t) => t,
            None => {
                // Everything pending when the timer was armed has since
                // been dimmed off or fired.
                hw.cancel_fire_timer();
                return;
            }
        };

        let mut pulsed = false;
        for channel in 0..CHANNELS {
            if fired[channel] {
                continue;
            }
            let delay = delays[channel];
            if delay >= target && delay <= target + FUSE_WINDOW_US {
                hw.gate_high(channel);
                self.fired[channel].store(true, Ordering::Relaxed);
                pulsed = true;
            }
        }
        if pulsed {
            hw.busy_wait_us(GATE_PULSE_US);
            hw.all_gates_low();
        }

        // Advance only after the pulse, so a re-entered scheduler keeps
        // measuring from the previous event until this one is real.
        self.last_fire_delay_us.store(target, Ordering::Relaxed);

        self.schedule_next(hw);
    }

    /// Arms the one-shot timer for the earliest unfired channel, or
    /// disarms it when nothing remains this half-cycle.
    ///
    /// Called from both handlers. Does not advance `last_fire_delay_us`.
    fn schedule_next(&self, hw: &mut impl FiringHw) {
        let last_fire = self.last_fire_delay_us.load(Ordering::Relaxed);

        let mut min_delay: Option<u32> = None;
        for channel in 0..CHANNELS {
            if self.fired[channel].load(Ordering::Relaxed) {
                continue;
            }
            let delay = self.delays[channel].load(Ordering::Relaxed);
            if delay >= HALF_CYCLE_US {
                continue;
            }
            min_delay = Some(match min_delay {
                Some(m) => m.min(delay),
                None => delay,
            });
        }

        match min_delay {
            None => hw.cancel_fire_timer(),
            Some(target) if target <= last_fire => {
                // Already at or past the target; fire as soon as the
                // timer can manage.
                hw.arm_fire_timer(1);
            }
            Some(target) => {
                hw.arm_fire_timer((target - last_fire).max(MIN_REARM_US));
            }
        }
    }

    /// Cooperative watchdog tick.
    ///
    /// Engages emergency shutoff when the zero-cross reference disappears,
    /// and releases it once edges return. The hardware writes run with
    /// interrupts masked so an in-flight firing ISR cannot interleave.
    pub fn update(
        &self,
        now_us: u32,
        hw: &mut impl FiringHw,
        _: &priority::Thread,
    ) {
        let seen = self.zc_ever.load(Ordering::Relaxed);
        let since = now_us.wrapping_sub(self.last_zc_us.load(Ordering::Relaxed));
        let stale = !seen || since > ZC_LOST_TIMEOUT_US;

        if stale && !self.shutoff.load(Ordering::Relaxed) {
            util::critical(|| {
                self.shutoff.store(true, Ordering::Relaxed);
                self.zc_healthy.store(false, Ordering::Relaxed);
                hw.cancel_fire_timer();
                hw.all_gates_low();
            });
            if seen {
                log::warn!("zero-cross lost; outputs disabled");
            }
        } else if !stale && self.shutoff.load(Ordering::Relaxed) {
            // Edges are back; the next one will resume firing.
            self.shutoff.store(false, Ordering::Relaxed);
            log::info!("zero-cross recovered");
        }
    }

    // Observables.

    pub fn last_zero_cross_us(&self) -> u32 {
        self.last_zc_us.load(Ordering::Relaxed)
    }

    pub fn last_fire_delay_us(&self) -> u32 {
        self.last_fire_delay_us.load(Ordering::Relaxed)
    }

    pub fn channel_level(&self, channel: usize) -> u8 {
        self.levels[channel].load(Ordering::Relaxed)
    }

    pub fn channel_delay_us(&self, channel: usize) -> u32 {
        self.delays[channel].load(Ordering::Relaxed)
    }

    pub fn zero_cross_healthy(&self) -> bool {
        self.zc_healthy.load(Ordering::Relaxed)
    }

    pub fn is_shut_off(&self) -> bool {
        self.shutoff.load(Ordering::Relaxed)
    }
}
