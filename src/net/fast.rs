//! Fast ingress: low-latency frames over raw datagrams.
//!
//! The stream source fires tens of frames per second; each datagram is a
//! complete LED v1 frame and the newest one always wins, so there is no
//! queueing -- the receiver just decodes and hands the frame to the
//! arbiter, which seizes fast mode. Loss of the stream is detected by the
//! arbiter's timeout, not here.
//!
//! Relays resolve the multi-stream LED v2 format before frames reach a
//! device; a v2 packet arriving here is a misconfiguration and is
//! dropped, never guessed at.

use embedded_nal::UdpFullStack;

use crate::net::frame_padded;
use crate::Frame;

/// Largest datagram worth reading: a maximal v1 frame plus slack.
pub const MAX_DATAGRAM_BYTES: usize = 300;

/// Decodes one datagram payload into a frame.
///
/// Valid LED v1 packets contribute `min(K, CHANNELS)` values, zero-padded.
/// With the `raw-fast-fallback` feature, payloads that do not even carry
/// the magic are taken as bare channel bytes, an escape hatch for the
/// oldest stream sources, which sent nothing but the values.
pub fn decode_datagram(payload: &[u8]) -> Option<Frame> {
    match ledwire::parse_frame(payload) {
        Ok(values) => Some(frame_padded(values)),
        Err(_) => {
            #[cfg(feature = "raw-fast-fallback")]
            {
                if !payload.is_empty() && !payload.starts_with(&ledwire::MAGIC) {
                    return Some(frame_padded(payload));
                }
            }
            log::debug!("fast datagram rejected");
            None
        }
    }
}

/// Non-blocking receiver bound to the fast-ingress port.
pub struct FastReceiver<S: UdpFullStack> {
    socket: S::UdpSocket,
}

impl<S: UdpFullStack> FastReceiver<S> {
    pub fn bind(stack: &mut S, port: u16) -> Result<Self, S::Error> {
        let mut socket = stack.socket()?;
        stack.bind(&mut socket, port)?;
        Ok(FastReceiver { socket })
    }

    /// Drains at most one datagram. Call until it returns `None` to stay
    /// ahead of a ~60 Hz source with a ~100 Hz loop.
    pub fn poll(&mut self, stack: &mut S) -> Option<Frame> {
        let mut buf = [0u8; MAX_DATAGRAM_BYTES];
        match stack.receive(&mut self.socket, &mut buf) {
            Ok((len, _remote)) => decode_datagram(&buf[..len]),
            Err(nb::Error::WouldBlock) => None,
            Err(nb::Error::Other(_)) => {
                log::debug!("udp receive error");
                None
            }
        }
    }
}
