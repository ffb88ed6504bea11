//! Plan ingress: JSON payloads of future frames, queued into the
//! schedule player.
//!
//! Three payload shapes are recognized, because three generations of
//! hosts exist in the field:
//!
//! - **V2** (canonical): `{"format_version":2,"steps":[{"ts_ms":…,
//!   "values":[…]},…]}` -- absolute millisecond timestamps, ready to
//!   queue. Unknown `format_version` values are rejected outright rather
//!   than guessed at.
//! - **Commands**: `{"commands":[…]}` -- each command carries either an
//!   absolute `timestamp` (seconds) or a relative `duration_ms` chained
//!   from `base_timestamp` (seconds) or the current wall-clock.
//! - **Legacy**: `{"sequence":[[…],…],"timestamp":…,"interval_ms":…}` -- a
//!   fixed-interval run of frames. Accepting one replaces the whole
//!   schedule.
//!
//! Steps shorter than the device's channel count are skipped; longer ones
//! contribute their first [`CHANNELS`] values. Frames refused by a full
//! schedule are dropped with a throttled log line.

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::Vec;
use serde::Deserialize;

use crate::arbiter::{Arbiter, Mode};
use crate::schedule::Schedule;
use crate::{Frame, CHANNELS};

/// Most steps a single payload may carry.
pub const MAX_STEPS: usize = 64;

/// Widest channel vector accepted on the wire.
pub const MAX_WIRE_CHANNELS: usize = 16;

/// One schedule-full log line per this many rejections.
const SCHED_FULL_LOG_EVERY: u32 = 32;

static SCHED_FULL_REJECTS: AtomicU32 = AtomicU32::new(0);

type WireValues = Vec<u8, MAX_WIRE_CHANNELS>;

#[derive(Deserialize)]
struct RawStep {
    ts_ms: u64,
    values: WireValues,
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    duration_ms: Option<u64>,
    values: WireValues,
}

/// Union of every field any recognized variant uses. The discriminator
/// is which of them are present.
#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    format_version: Option<u32>,
    #[serde(default)]
    steps: Option<Vec<RawStep, MAX_STEPS>>,
    #[serde(default)]
    commands: Option<Vec<RawCommand, MAX_STEPS>>,
    #[serde(default)]
    base_timestamp: Option<f64>,
    #[serde(default)]
    sequence: Option<Vec<WireValues, MAX_STEPS>>,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    interval_ms: Option<u64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PlanError {
    /// Payload is not valid JSON, or not a shape we can represent.
    Json,
    /// A `format_version` this firmware does not speak.
    UnknownVersion(u32),
    /// Parsed fine but carried no usable steps.
    Empty,
}

fn secs_to_ms(seconds: f64) -> u64 {
    (seconds * 1_000.0) as u64
}

/// First [`CHANNELS`] values of a wire vector, or `None` when it is too
/// short to fill a frame.
fn frame_from_wire(values: &[u8]) -> Option<Frame> {
    if values.len() < CHANNELS {
        return None;
    }
    let mut frame = [0; CHANNELS];
    frame.copy_from_slice(&values[..CHANNELS]);
    Some(frame)
}

fn queue(schedule: &mut Schedule, ts_ms: u64, values: Frame) -> bool {
    if schedule.insert(ts_ms, values).is_ok() {
        return true;
    }
    let rejects = SCHED_FULL_REJECTS.fetch_add(1, Ordering::Relaxed);
    if rejects % SCHED_FULL_LOG_EVERY == 0 {
        log::warn!("schedule full; dropping frame at {}", ts_ms);
    }
    false
}

/// Parses a plan payload and queues its steps.
///
/// Returns the number of frames actually queued. A caller seeing a
/// positive count forces planned mode; zero (or an error) leaves all
/// state untouched beyond the queue itself.
pub fn ingest(
    payload: &[u8],
    now_ms: u64,
    schedule: &mut Schedule,
) -> Result<usize, PlanError> {
    let (plan, _) = serde_json_core::from_slice::<RawPlan>(payload)
        .map_err(|_| PlanError::Json)?;

    if let Some(version) = plan.format_version {
        if version != 2 {
            return Err(PlanError::UnknownVersion(version));
        }
        let steps = plan.steps.ok_or(PlanError::Empty)?;
        let mut accepted = 0;
        for step in steps.iter() {
            match frame_from_wire(&step.values) {
                Some(frame) => {
                    if queue(schedule, step.ts_ms, frame) {
                        accepted += 1;
                    }
                }
                None => log::warn!("plan step shorter than {} channels", CHANNELS),
            }
        }
        return Ok(accepted);
    }

    if let Some(commands) = plan.commands {
        let mut cursor = plan
            .base_timestamp
            .map(secs_to_ms)
            .unwrap_or(now_ms);
        let mut accepted = 0;
        for command in commands.iter() {
            let at = match command.timestamp {
                Some(seconds) => secs_to_ms(seconds),
                None => cursor + command.duration_ms.unwrap_or(0),
            };
            cursor = at;
            if let Some(frame) = frame_from_wire(&command.values) {
                if queue(schedule, at, frame) {
                    accepted += 1;
                }
            } else {
                log::warn!("plan command shorter than {} channels", CHANNELS);
            }
        }
        return Ok(accepted);
    }

    if let Some(sequence) = plan.sequence {
        let start_ms = secs_to_ms(plan.timestamp.ok_or(PlanError::Empty)?);
        let interval_ms = plan.interval_ms.ok_or(PlanError::Empty)?;
        // The legacy shape describes the whole show, not an increment.
        schedule.clear();
        let mut accepted = 0;
        for (i, values) in sequence.iter().enumerate() {
            if let Some(frame) = frame_from_wire(values) {
                if queue(schedule, start_ms + i as u64 * interval_ms, frame) {
                    accepted += 1;
                }
            } else {
                log::warn!("sequence entry shorter than {} channels", CHANNELS);
            }
        }
        return Ok(accepted);
    }

    Err(PlanError::Empty)
}

/// Cooperative drive step: forwards the schedule's current frame to the
/// arbiter, gated on clock validity and planned mode being active.
pub fn drive(
    schedule: &mut Schedule,
    arbiter: &mut Arbiter<'_>,
    clock_synced: bool,
    now_ms: u64,
) {
    if !clock_synced || arbiter.mode() != Mode::Planned {
        return;
    }
    if !schedule.has_valid_schedule() {
        return;
    }
    if let Some(frame) = schedule.current_frame(now_ms) {
        arbiter.set_planned(frame);
    }
}
