//! Network ingress and egress paths.
//!
//! Setpoints arrive three ways: retained static vectors and plans over
//! the broker session ([`session`]), and low-latency frames over raw
//! datagrams ([`fast`]). The one egress path is the periodic heartbeat
//! ([`heartbeat`]). Everything here runs in the cooperative loop; nothing
//! network-facing ever touches interrupt context.

pub mod fast;
pub mod heartbeat;
pub mod session;

use heapless::Vec;
use serde::Deserialize;
use smart_default::SmartDefault;

use crate::clock::SntpConfig;
use crate::plan::MAX_WIRE_CHANNELS;
use crate::{Frame, CHANNELS};

/// Largest broker message payload the node accepts.
pub const MAX_MSG_BYTES: usize = 1024;

/// Per-device configuration, all strings overridable per deployment.
#[derive(Clone, Debug, SmartDefault)]
pub struct NodeConfig {
    #[default = "triac-dimmer"]
    pub device_id: &'static str,
    #[default(_code = "env!(\"CARGO_PKG_VERSION\")")]
    pub firmware: &'static str,
    #[default = "dimmer/set_static"]
    pub static_topic: &'static str,
    #[default = "dimmer/set_plan"]
    pub plan_topic: &'static str,
    #[default = "dimmer/heartbeat"]
    pub heartbeat_topic: &'static str,
    #[default = 5000]
    pub udp_port: u16,
    #[default = 5_000]
    pub heartbeat_period_ms: u64,
    #[default = 5_000]
    pub reconnect_interval_ms: u64,
    pub sntp: SntpConfig,
}

/// A broker message, classified by topic, payload copied out of the
/// transport's buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Inbound {
    Static(Vec<u8, MAX_MSG_BYTES>),
    Plan(Vec<u8, MAX_MSG_BYTES>),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// Not JSON, or not the expected shape.
    Json,
    /// `values` missing or empty.
    Empty,
}

#[derive(Deserialize)]
struct StaticMsg {
    values: Vec<u8, MAX_WIRE_CHANNELS>,
}

/// Parses a static-topic payload: `{"values":[…]}`, zero-padded or
/// truncated to the device's channel count.
pub fn parse_static_frame(payload: &[u8]) -> Result<Frame, FrameError> {
    let (msg, _) = serde_json_core::from_slice::<StaticMsg>(payload)
        .map_err(|_| FrameError::Json)?;
    if msg.values.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(frame_padded(&msg.values))
}

/// First `min(len, CHANNELS)` bytes of `values`, zero-padded to a frame.
pub fn frame_padded(values: &[u8]) -> Frame {
    let mut frame = [0; CHANNELS];
    let n = values.len().min(CHANNELS);
    frame[..n].copy_from_slice(&values[..n]);
    frame
}
