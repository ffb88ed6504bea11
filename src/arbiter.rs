//! Mode arbiter: decides which producer currently drives the engine.
//!
//! Three producers of wildly different rates share one engine: a retained
//! static vector (≤1 Hz), the schedule player (~10 Hz), and the fast
//! datagram stream (~60 Hz). The arbiter caches the latest frame from
//! each, tracks which mode is active, and pushes exactly one of the
//! caches into the engine -- with change detection, so a chatty producer
//! repeating itself doesn't contend with the firing ISRs for no reason.
//!
//! Mode rules, in brief: a fast packet always seizes control; a static
//! frame takes over from planned but not from an active fast stream
//! (there it only refreshes the fallback cache); planned frames drive the
//! engine only while planned mode is active, which the plan driver forces
//! explicitly. When the fast stream goes quiet for [`UDP_TIMEOUT_MS`] the
//! arbiter falls back to the static cache, else the planned cache, else
//! black.

use crate::engine::{Engine, MAX_LEVEL};
use crate::{Frame, CHANNELS};

/// Fast-stream silence tolerated before falling back.
pub const UDP_TIMEOUT_MS: u64 = 3_000;

/// Which producer owns the engine right now.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    Static,
    Planned,
    Fast,
}

impl Mode {
    /// Wire spelling used in the heartbeat.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Static => "STATIC",
            Mode::Planned => "PLANNED",
            Mode::Fast => "FAST",
        }
    }
}

/// Quantizes a wire brightness (0..=255) to an engine level (0..=9).
pub fn quantize(value: u8) -> u8 {
    (u32::from(value) * u32::from(MAX_LEVEL) / 255) as u8
}

pub struct Arbiter<'e> {
    engine: &'e Engine,
    mode: Mode,
    static_frame: Frame,
    has_static: bool,
    planned_frame: Frame,
    has_planned: bool,
    fast_frame: Frame,
    /// Frame most recently pushed toward the engine (pre-quantization).
    current_frame: Frame,
    /// Receive time of the newest fast frame.
    last_fast_ms: u64,
    /// Quantized vector last actually written to the engine.
    last_applied: Option<[u8; CHANNELS]>,
    /// Number of real engine writes; diagnostic.
    pushes: u32,
}

impl<'e> Arbiter<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Arbiter {
            engine,
            mode: Mode::Static,
            static_frame: [0; CHANNELS],
            has_static: false,
            planned_frame: [0; CHANNELS],
            has_planned: false,
            fast_frame: [0; CHANNELS],
            current_frame: [0; CHANNELS],
            last_fast_ms: 0,
            last_applied: None,
            pushes: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Frame the engine was most recently driven with.
    pub fn current_frame(&self) -> Frame {
        self.current_frame
    }

    /// Operator override: takes the engine unless a fast stream is live,
    /// in which case it only refreshes the fallback cache.
    pub fn set_static(&mut self, values: Frame) {
        self.static_frame = values;
        self.has_static = true;
        match self.mode {
            Mode::Fast => {}
            Mode::Static | Mode::Planned => {
                self.mode = Mode::Static;
                self.apply(values);
            }
        }
    }

    /// Schedule output. Drives the engine only while planned mode is
    /// active; otherwise the cache just tracks the schedule.
    pub fn set_planned(&mut self, values: Frame) {
        self.planned_frame = values;
        self.has_planned = true;
        if self.mode == Mode::Planned {
            self.apply(values);
        }
    }

    /// Fast-stream frame: seizes the engine from any mode.
    pub fn set_fast(&mut self, values: Frame, now_ms: u64) {
        self.fast_frame = values;
        self.last_fast_ms = now_ms;
        self.mode = Mode::Fast;
        self.apply(values);
    }

    /// Switches mode explicitly and drives the engine with the target
    /// mode's cache (zeros if that cache was never written).
    pub fn force_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.apply(self.active_cache());
    }

    /// Cooperative tick: applies the fast-stream timeout.
    pub fn tick(&mut self, now_ms: u64) {
        if self.mode != Mode::Fast {
            return;
        }
        if now_ms.saturating_sub(self.last_fast_ms) > UDP_TIMEOUT_MS {
            self.mode = if self.has_static || !self.has_planned {
                Mode::Static
            } else {
                Mode::Planned
            };
            log::info!("fast stream timed out; falling back");
            self.apply(self.active_cache());
        }
    }

    fn active_cache(&self) -> Frame {
        match self.mode {
            Mode::Static => self.static_frame,
            Mode::Planned => self.planned_frame,
            Mode::Fast => self.fast_frame,
        }
    }

    /// Pushes a frame into the engine, skipping the write when the
    /// quantized vector is unchanged.
    fn apply(&mut self, values: Frame) {
        self.current_frame = values;
        let mut mapped = [0u8; CHANNELS];
        for (m, v) in mapped.iter_mut().zip(values.iter()) {
            *m = quantize(*v);
        }
        if self.last_applied == Some(mapped) {
            return;
        }
        for (channel, level) in mapped.iter().enumerate() {
            self.engine.set_channel_brightness(channel, *level);
        }
        self.last_applied = Some(mapped);
        self.pushes += 1;
    }
}
