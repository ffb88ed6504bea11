//! Firmware core of a mains-AC, multi-channel TRIAC dimmer node.
//!
//! The crate turns per-channel brightness setpoints (0..=255) into gate
//! pulses phase-locked to the mains zero-crossing, while three network
//! ingress paths compete to supply those setpoints:
//!
//! - a retained static vector on a broker topic,
//! - a plan of future frames executed at wall-clock timestamps,
//! - a low-latency datagram stream.
//!
//! [`engine`] holds the interrupt-driven phase-control machinery;
//! [`schedule`] replays timed frames in order; [`arbiter`] decides which
//! producer currently drives the engine; [`plan`] and [`net`] are the
//! ingress/egress paths; [`node`] ties the cooperative side together into
//! one loop body.
//!
//! Everything board-specific -- interrupt vectors, gate pins, the one-shot
//! timer, the IP stack, SNTP -- enters through traits. A board crate wires
//! its interrupt handlers to [`engine::Engine::on_zero_cross`] and
//! [`engine::Engine::on_fire_timer`], shares the concrete hardware with
//! them through [`util::spin_lock::SpinLock`] + [`util::acquire_hw`], and
//! runs [`node::Node`] plus the network stack from its main loop.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod arbiter;
pub mod clock;
pub mod engine;
pub mod net;
pub mod node;
pub mod plan;
pub mod priority;
pub mod schedule;
pub mod util;

cfg_if::cfg_if! {
    if #[cfg(feature = "channels-2")] {
        /// Number of TRIAC output channels on this hardware variant.
        pub const CHANNELS: usize = 2;
    } else if #[cfg(feature = "channels-3")] {
        /// Number of TRIAC output channels on this hardware variant.
        pub const CHANNELS: usize = 3;
    } else {
        /// Number of TRIAC output channels on this hardware variant.
        pub const CHANNELS: usize = 4;
    }
}

/// A full per-channel brightness vector, one byte (0..=255) per channel.
///
/// Every frame moving through the system has exactly [`CHANNELS`] entries;
/// ingress paths pad with zero or truncate when the wire carries a
/// different count.
pub type Frame = [u8; CHANNELS];
