//! Heartbeat egress: the device's one outbound status signal.
//!
//! A small JSON document -- identity, uptime, firmware, address, and which
//! mode currently drives the engine -- published on a fixed cadence while
//! the broker session is up, plus once immediately on connect. The `mode`
//! field doubles as the only user-visible error channel: a device that
//! fell back from FAST shows it here.

use heapless::Vec;
use serde::Serialize;

/// Serialized heartbeat size bound; the payload is far smaller.
pub const MAX_HEARTBEAT_BYTES: usize = 192;

#[derive(Serialize)]
pub struct Heartbeat<'a> {
    pub device_id: &'a str,
    /// Seconds since boot.
    pub uptime: u64,
    pub firmware: &'a str,
    pub ip: &'a str,
    /// `"STATIC"`, `"PLANNED"` or `"FAST"`.
    pub mode: &'a str,
}

impl<'a> Heartbeat<'a> {
    pub fn to_json(&self) -> Option<Vec<u8, MAX_HEARTBEAT_BYTES>> {
        serde_json_core::to_vec(self).ok()
    }
}

/// Fixed-period due-signal, driven from the cooperative loop with
/// monotonic milliseconds.
#[derive(Debug)]
pub struct Cadence {
    period_ms: u64,
    last_ms: Option<u64>,
}

impl Cadence {
    pub const fn new(period_ms: u64) -> Self {
        Cadence {
            period_ms,
            last_ms: None,
        }
    }

    /// True when a period has elapsed since the last due tick (and on the
    /// very first call).
    pub fn due(&mut self, now_ms: u64) -> bool {
        let fire = match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.period_ms,
        };
        if fire {
            self.last_ms = Some(now_ms);
        }
        fire
    }
}
