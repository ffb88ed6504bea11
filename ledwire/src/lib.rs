//! Binary LED frame formats.
//!
//! Two packet versions share the three-byte `"LED"` magic:
//!
//! v1, the device format, carries a single channel vector:
//!
//! ```norust
//! offset 0  3  "LED"       magic
//!        3  1  0x01        version
//!        4  1  K           channel count, 1..=255
//!        5  K  values      one byte per channel
//! ```
//!
//! v2, the relay format, carries several alternative renderings of the same
//! frame ("streams"), one per hardware flavor. A relay picks the stream
//! matching the device and forwards it as v1; devices never see v2.
//!
//! ```norust
//! offset 0  3  "LED"
//!        3  1  0x02
//!        4  1  S           stream count
//!        5  .. streams:    stream_id (1) | K (1) | values (K)
//! ```
//!
//! Supports `no_std`.

#![no_std]

/// Leading magic shared by all packet versions.
pub const MAGIC: [u8; 3] = *b"LED";

/// Version byte of a single-frame device packet.
pub const VERSION_FRAME: u8 = 0x01;
/// Version byte of a multi-stream relay packet.
pub const VERSION_STREAMS: u8 = 0x02;

/// Stream id for the 4-channel hardware flavor (G, Y, B, R).
pub const STREAM_4CH: u8 = 1;
/// Stream id for the 2-channel hardware flavor.
pub const STREAM_2CH: u8 = 2;
/// Stream id for the 3-channel RGB hardware flavor.
pub const STREAM_3CH: u8 = 3;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireError {
    /// Payload shorter than the fixed header, or than the header promises.
    Truncated,
    /// First three bytes are not `"LED"`.
    BadMagic,
    /// Version byte is not the one the parser handles.
    BadVersion,
    /// Channel or stream count of zero.
    Empty,
}

/// Parses a v1 device packet, returning the channel values.
///
/// Acceptance rule: at least 6 bytes total, correct magic, version 0x01,
/// `K != 0`, and at least `5 + K` bytes of payload. Trailing bytes beyond
/// the advertised count are ignored.
pub fn parse_frame(buf: &[u8]) -> Result<&[u8], WireError> {
    if buf.len() < 6 {
        return Err(WireError::Truncated);
    }
    if buf[..3] != MAGIC {
        return Err(WireError::BadMagic);
    }
    if buf[3] != VERSION_FRAME {
        return Err(WireError::BadVersion);
    }
    let count = buf[4] as usize;
    if count == 0 {
        return Err(WireError::Empty);
    }
    if buf.len() < 5 + count {
        return Err(WireError::Truncated);
    }
    Ok(&buf[5..5 + count])
}

/// Serializes a v1 device packet into `out`, returning the encoded length.
///
/// This is the exact inverse of [`parse_frame`] for any `values` of length
/// 1..=255.
pub fn encode_frame<'a>(
    values: &[u8],
    out: &'a mut [u8],
) -> Result<&'a [u8], WireError> {
    if values.is_empty() {
        return Err(WireError::Empty);
    }
    if values.len() > 255 || out.len() < 5 + values.len() {
        return Err(WireError::Truncated);
    }
    out[..3].copy_from_slice(&MAGIC);
    out[3] = VERSION_FRAME;
    out[4] = values.len() as u8;
    out[5..5 + values.len()].copy_from_slice(values);
    Ok(&out[..5 + values.len()])
}

/// A parsed v2 relay packet. Streams are visited lazily; a packet is only
/// known to be fully well-formed once the iterator has been drained without
/// error.
#[derive(Copy, Clone, Debug)]
pub struct StreamPacket<'a> {
    count: u8,
    body: &'a [u8],
}

impl<'a> StreamPacket<'a> {
    /// Number of streams the header advertises.
    pub fn stream_count(&self) -> u8 {
        self.count
    }

    pub fn streams(&self) -> Streams<'a> {
        Streams {
            remaining: self.count,
            body: self.body,
        }
    }

    /// Finds the stream with the given id, scanning in packet order.
    pub fn stream(&self, id: u8) -> Option<&'a [u8]> {
        for s in self.streams() {
            match s {
                Ok((sid, values)) if sid == id => return Some(values),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }
}

/// Iterator over `(stream_id, values)` pairs of a v2 packet.
#[derive(Copy, Clone, Debug)]
pub struct Streams<'a> {
    remaining: u8,
    body: &'a [u8],
}

impl<'a> Iterator for Streams<'a> {
    type Item = Result<(u8, &'a [u8]), WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        if self.body.len() < 2 {
            self.remaining = 0;
            return Some(Err(WireError::Truncated));
        }
        let id = self.body[0];
        let count = self.body[1] as usize;
        if count == 0 {
            self.remaining = 0;
            return Some(Err(WireError::Empty));
        }
        if self.body.len() < 2 + count {
            self.remaining = 0;
            return Some(Err(WireError::Truncated));
        }
        let values = &self.body[2..2 + count];
        self.body = &self.body[2 + count..];
        Some(Ok((id, values)))
    }
}

/// Parses the header of a v2 relay packet.
pub fn parse_streams(buf: &[u8]) -> Result<StreamPacket<'_>, WireError> {
    if buf.len() < 5 {
        return Err(WireError::Truncated);
    }
    if buf[..3] != MAGIC {
        return Err(WireError::BadMagic);
    }
    if buf[3] != VERSION_STREAMS {
        return Err(WireError::BadVersion);
    }
    if buf[4] == 0 {
        return Err(WireError::Empty);
    }
    Ok(StreamPacket {
        count: buf[4],
        body: &buf[5..],
    })
}

/// Stream id a device with `channels` outputs wants to receive.
pub fn stream_id_for_channels(channels: usize) -> u8 {
    match channels {
        2 => STREAM_2CH,
        3 => STREAM_3CH,
        _ => STREAM_4CH,
    }
}

/// Derives a 2-channel vector from a 4-channel (G, Y, B, R) stream:
/// output 0 takes `max(R, Y)`, output 1 takes `max(G, B)`.
///
/// Relays use this when a v2 packet lacks a native 2-channel stream.
pub fn adapt_4ch_to_2ch(gybr: &[u8; 4]) -> [u8; 2] {
    let (g, y, b, r) = (gybr[0], gybr[1], gybr[2], gybr[3]);
    [r.max(y), g.max(b)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let mut buf = [0; 300];
        for k in [1usize, 2, 4, 16, 255].iter().cloned() {
            let values: [u8; 255] = {
                let mut v = [0; 255];
                for (i, b) in v.iter_mut().enumerate() {
                    *b = i as u8;
                }
                v
            };
            let encoded = encode_frame(&values[..k], &mut buf).unwrap();
            assert_eq!(encoded.len(), 5 + k);
            assert_eq!(parse_frame(encoded).unwrap(), &values[..k]);
        }
    }

    #[test]
    fn frame_accepts_trailing_garbage() {
        let buf = [b'L', b'E', b'D', 0x01, 2, 10, 20, 0xEE, 0xEE];
        assert_eq!(parse_frame(&buf).unwrap(), &[10, 20]);
    }

    #[test]
    fn frame_rejects_short_payload() {
        assert_eq!(parse_frame(b"LED\x01"), Err(WireError::Truncated));
        // Header claims 4 values but carries 3.
        let buf = [b'L', b'E', b'D', 0x01, 4, 1, 2, 3];
        assert_eq!(parse_frame(&buf), Err(WireError::Truncated));
    }

    #[test]
    fn frame_rejects_bad_magic() {
        let buf = [b'X', b'Y', b'Z', 0x01, 0x04, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(parse_frame(&buf), Err(WireError::BadMagic));
    }

    #[test]
    fn frame_rejects_wrong_version() {
        let buf = [b'L', b'E', b'D', 0x02, 1, 42];
        assert_eq!(parse_frame(&buf), Err(WireError::BadVersion));
    }

    #[test]
    fn frame_rejects_zero_count() {
        let buf = [b'L', b'E', b'D', 0x01, 0, 0];
        assert_eq!(parse_frame(&buf), Err(WireError::Empty));
    }

    #[test]
    fn streams_walk() {
        // Two streams: 4-channel and 2-channel renderings of one frame.
        let buf = [
            b'L', b'E', b'D', 0x02, 2, // header
            1, 4, 10, 20, 30, 40, // stream 1
            2, 2, 40, 30, // stream 2
        ];
        let pkt = parse_streams(&buf).unwrap();
        assert_eq!(pkt.stream_count(), 2);
        let mut it = pkt.streams();
        assert_eq!(it.next(), Some(Ok((1, &[10, 20, 30, 40][..]))));
        assert_eq!(it.next(), Some(Ok((2, &[40, 30][..]))));
        assert_eq!(it.next(), None);
        assert_eq!(pkt.stream(2), Some(&[40u8, 30][..]));
        assert_eq!(pkt.stream(7), None);
    }

    #[test]
    fn streams_truncated_tail() {
        let buf = [b'L', b'E', b'D', 0x02, 2, 1, 4, 10, 20, 30, 40, 2, 9, 1];
        let pkt = parse_streams(&buf).unwrap();
        let mut it = pkt.streams();
        assert!(it.next().unwrap().is_ok());
        assert_eq!(it.next(), Some(Err(WireError::Truncated)));
        assert_eq!(it.next(), None);
    }

    #[test]
    fn two_channel_adaptation() {
        // out0 = max(R, Y), out1 = max(G, B)
        assert_eq!(adapt_4ch_to_2ch(&[1, 2, 3, 4]), [4, 3]);
        assert_eq!(adapt_4ch_to_2ch(&[200, 90, 10, 80]), [90, 200]);
    }

    #[test]
    fn stream_id_mapping() {
        assert_eq!(stream_id_for_channels(4), STREAM_4CH);
        assert_eq!(stream_id_for_channels(2), STREAM_2CH);
        assert_eq!(stream_id_for_channels(3), STREAM_3CH);
        // Unknown counts fall back to the 4-channel stream.
        assert_eq!(stream_id_for_channels(8), STREAM_4CH);
    }
}
