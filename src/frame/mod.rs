//! QUIC frame codec (RFC 9000 sections 12.4, 19; RFC 9221 for DATAGRAM).
//!
//! Pure encode/decode, no state machines. Data-carrying frames borrow
//! from the decrypted packet payload.

use crate::error::{Error, TransportError};
use crate::ranges::RangeSet;
use crate::varint::{decode_varint, varint_len, write_varint};

// ---------------------------------------------------------------------------
// Sub-structs
// ---------------------------------------------------------------------------

/// One additional ACK range, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRange {
    pub gap: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub largest: u64,
    /// Encoded delay, scaled by the sender's ack_delay_exponent.
    pub delay: u64,
    pub first_range: u64,
    pub ranges: Vec<AckRange>,
    pub ecn: Option<EcnCounts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcnCounts {
    pub ect0: u64,
    pub ect1: u64,
    pub ecn_ce: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetStreamFrame {
    pub stream_id: u64,
    pub error_code: u64,
    pub final_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSendingFrame {
    pub stream_id: u64,
    pub error_code: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoFrame<'a> {
    pub offset: u64,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame<'a> {
    pub stream_id: u64,
    pub offset: u64,
    pub data: &'a [u8],
    pub fin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxStreamDataFrame {
    pub stream_id: u64,
    pub max_data: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamsLimitFrame {
    pub bidirectional: bool,
    pub max_streams: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDataBlockedFrame {
    pub stream_id: u64,
    pub data_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnectionIdFrame<'a> {
    pub sequence_number: u64,
    pub retire_prior_to: u64,
    pub connection_id: &'a [u8],
    pub stateless_reset_token: &'a [u8; 16],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCloseFrame<'a> {
    /// `true` for application close (0x1d), `false` for transport close (0x1c).
    pub is_application: bool,
    pub error_code: u64,
    /// Only meaningful for transport close (0x1c).
    pub frame_type: u64,
    pub reason: &'a [u8],
}

// ---------------------------------------------------------------------------
// Frame enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    /// A run of PADDING bytes; decoding collapses consecutive padding.
    Padding(usize),                             // 0x00
    Ping,                                       // 0x01
    Ack(AckFrame),                              // 0x02-0x03
    ResetStream(ResetStreamFrame),              // 0x04
    StopSending(StopSendingFrame),              // 0x05
    Crypto(CryptoFrame<'a>),                    // 0x06
    NewToken(&'a [u8]),                         // 0x07
    Stream(StreamFrame<'a>),                    // 0x08-0x0f
    MaxData(u64),                               // 0x10
    MaxStreamData(MaxStreamDataFrame),          // 0x11
    MaxStreams(StreamsLimitFrame),              // 0x12-0x13
    DataBlocked(u64),                           // 0x14
    StreamDataBlocked(StreamDataBlockedFrame),  // 0x15
    StreamsBlocked(StreamsLimitFrame),          // 0x16-0x17
    NewConnectionId(NewConnectionIdFrame<'a>),  // 0x18
    RetireConnectionId(u64),                    // 0x19
    PathChallenge([u8; 8]),                     // 0x1a
    PathResponse([u8; 8]),                      // 0x1b
    ConnectionClose(ConnectionCloseFrame<'a>),  // 0x1c-0x1d
    HandshakeDone,                              // 0x1e
    ImmediateAck,                               // 0x1f
    Datagram(&'a [u8]),                         // 0x30-0x31
}

impl Frame<'_> {
    /// Frames that oblige the receiver to send an acknowledgement.
    pub fn is_ack_eliciting(&self) -> bool {
        matches!(
            self,
            Frame::Stream(_)
                | Frame::Crypto(_)
                | Frame::NewConnectionId(_)
                | Frame::HandshakeDone
                | Frame::PathChallenge(_)
                | Frame::PathResponse(_)
                | Frame::Ping
                | Frame::Datagram(_)
        )
    }
}

// ---------------------------------------------------------------------------
// ACK <-> range set
// ---------------------------------------------------------------------------

impl AckFrame {
    /// Build an ACK covering every packet number in `acked`, largest first.
    ///
    /// Returns `None` for an empty set.
    pub fn from_ranges(acked: &RangeSet, delay: u64) -> Option<AckFrame> {
        let mut iter = acked.iter().rev();
        let top = iter.next()?;
        let largest = top.end - 1;
        let first_range = largest - top.start;

        let mut prev_start = top.start;
        let ranges = iter
            .map(|r| {
                let range = AckRange {
                    gap: prev_start - r.end - 1,
                    length: r.end - 1 - r.start,
                };
                prev_start = r.start;
                range
            })
            .collect();

        Some(AckFrame {
            largest,
            delay,
            first_range,
            ranges,
            ecn: None,
        })
    }
}

/// Expand an ACK frame into the set of packet numbers it acknowledges.
///
/// A range running below packet number zero is a frame encoding error.
pub fn ack_info_to_ranges(ack: &AckFrame) -> Result<RangeSet, Error> {
    let mut set = RangeSet::new();
    let mut smallest = ack
        .largest
        .checked_sub(ack.first_range)
        .ok_or_else(frame_encoding_error)?;
    set.add(smallest, ack.largest + 1);

    for range in &ack.ranges {
        let largest = smallest
            .checked_sub(range.gap + 2)
            .ok_or_else(frame_encoding_error)?;
        smallest = largest
            .checked_sub(range.length)
            .ok_or_else(frame_encoding_error)?;
        set.add(smallest, largest + 1);
    }
    Ok(set)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Frame-encoding error for malformed wire data.
fn frame_encoding_error() -> Error {
    Error::Transport(TransportError::FrameEncodingError)
}

/// Decode a varint from `buf[pos..]`, advancing `pos`.
fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, Error> {
    let rest = buf.get(*pos..).ok_or_else(frame_encoding_error)?;
    let (val, n) = decode_varint(rest).map_err(|_| frame_encoding_error())?;
    *pos += n;
    Ok(val)
}

/// Read exactly `len` bytes from `buf[pos..]`, advancing `pos`.
fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, len: u64) -> Result<&'a [u8], Error> {
    let len = usize::try_from(len).map_err(|_| frame_encoding_error())?;
    let end = pos.checked_add(len).ok_or_else(frame_encoding_error)?;
    let slice = buf.get(*pos..end).ok_or_else(frame_encoding_error)?;
    *pos = end;
    Ok(slice)
}

fn read_array<const N: usize>(buf: &[u8], pos: &mut usize) -> Result<[u8; N], Error> {
    let bytes = read_bytes(buf, pos, N as u64)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn write_bytes(data: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
    write_varint(data.len() as u64, out)?;
    out.extend_from_slice(data);
    Ok(())
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode one QUIC frame from `buf`.
///
/// Returns the decoded frame and the number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(Frame<'_>, usize), Error> {
    let mut pos = 0;
    let frame_type = read_varint(buf, &mut pos)?;

    let frame = match frame_type {
        0x00 => {
            while buf.get(pos) == Some(&0) {
                pos += 1;
            }
            Frame::Padding(pos)
        }

        0x01 => Frame::Ping,

        // ACK (0x02 without ECN, 0x03 with ECN)
        0x02 | 0x03 => {
            let largest = read_varint(buf, &mut pos)?;
            let delay = read_varint(buf, &mut pos)?;
            let range_count = read_varint(buf, &mut pos)?;
            let first_range = read_varint(buf, &mut pos)?;

            // Each range takes at least two bytes; bound the allocation.
            if range_count > (buf.len() - pos) as u64 / 2 {
                return Err(frame_encoding_error());
            }
            let mut ranges = Vec::with_capacity(range_count as usize);
            for _ in 0..range_count {
                let gap = read_varint(buf, &mut pos)?;
                let length = read_varint(buf, &mut pos)?;
                ranges.push(AckRange { gap, length });
            }

            let ecn = if frame_type == 0x03 {
                Some(EcnCounts {
                    ect0: read_varint(buf, &mut pos)?,
                    ect1: read_varint(buf, &mut pos)?,
                    ecn_ce: read_varint(buf, &mut pos)?,
                })
            } else {
                None
            };

            Frame::Ack(AckFrame {
                largest,
                delay,
                first_range,
                ranges,
                ecn,
            })
        }

        0x04 => Frame::ResetStream(ResetStreamFrame {
            stream_id: read_varint(buf, &mut pos)?,
            error_code: read_varint(buf, &mut pos)?,
            final_size: read_varint(buf, &mut pos)?,
        }),

        0x05 => Frame::StopSending(StopSendingFrame {
            stream_id: read_varint(buf, &mut pos)?,
            error_code: read_varint(buf, &mut pos)?,
        }),

        0x06 => {
            let offset = read_varint(buf, &mut pos)?;
            let length = read_varint(buf, &mut pos)?;
            let data = read_bytes(buf, &mut pos, length)?;
            Frame::Crypto(CryptoFrame { offset, data })
        }

        0x07 => {
            let length = read_varint(buf, &mut pos)?;
            Frame::NewToken(read_bytes(buf, &mut pos, length)?)
        }

        // STREAM: low bits are OFF, LEN, FIN
        0x08..=0x0f => {
            let stream_id = read_varint(buf, &mut pos)?;
            let offset = if frame_type & 0x04 != 0 {
                read_varint(buf, &mut pos)?
            } else {
                0
            };
            let data = if frame_type & 0x02 != 0 {
                let length = read_varint(buf, &mut pos)?;
                read_bytes(buf, &mut pos, length)?
            } else {
                let rest = &buf[pos..];
                pos = buf.len();
                rest
            };
            Frame::Stream(StreamFrame {
                stream_id,
                offset,
                data,
                fin: frame_type & 0x01 != 0,
            })
        }

        0x10 => Frame::MaxData(read_varint(buf, &mut pos)?),

        0x11 => Frame::MaxStreamData(MaxStreamDataFrame {
            stream_id: read_varint(buf, &mut pos)?,
            max_data: read_varint(buf, &mut pos)?,
        }),

        0x12 | 0x13 => Frame::MaxStreams(StreamsLimitFrame {
            bidirectional: frame_type == 0x12,
            max_streams: read_varint(buf, &mut pos)?,
        }),

        0x14 => Frame::DataBlocked(read_varint(buf, &mut pos)?),

        0x15 => Frame::StreamDataBlocked(StreamDataBlockedFrame {
            stream_id: read_varint(buf, &mut pos)?,
            data_limit: read_varint(buf, &mut pos)?,
        }),

        0x16 | 0x17 => Frame::StreamsBlocked(StreamsLimitFrame {
            bidirectional: frame_type == 0x16,
            max_streams: read_varint(buf, &mut pos)?,
        }),

        0x18 => {
            let sequence_number = read_varint(buf, &mut pos)?;
            let retire_prior_to = read_varint(buf, &mut pos)?;
            let cid_len = *buf.get(pos).ok_or_else(frame_encoding_error)? as u64;
            pos += 1;
            if cid_len == 0 || cid_len > 20 {
                return Err(frame_encoding_error());
            }
            let connection_id = read_bytes(buf, &mut pos, cid_len)?;
            let stateless_reset_token: &[u8; 16] = read_bytes(buf, &mut pos, 16)?
                .try_into()
                .map_err(|_| frame_encoding_error())?;
            Frame::NewConnectionId(NewConnectionIdFrame {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token,
            })
        }

        0x19 => Frame::RetireConnectionId(read_varint(buf, &mut pos)?),

        0x1a => Frame::PathChallenge(read_array(buf, &mut pos)?),

        0x1b => Frame::PathResponse(read_array(buf, &mut pos)?),

        // CONNECTION_CLOSE (0x1c = transport, 0x1d = application)
        0x1c | 0x1d => {
            let is_application = frame_type == 0x1d;
            let error_code = read_varint(buf, &mut pos)?;
            let frame_type = if is_application {
                0
            } else {
                read_varint(buf, &mut pos)?
            };
            let reason_len = read_varint(buf, &mut pos)?;
            let reason = read_bytes(buf, &mut pos, reason_len)?;
            Frame::ConnectionClose(ConnectionCloseFrame {
                is_application,
                error_code,
                frame_type,
                reason,
            })
        }

        0x1e => Frame::HandshakeDone,

        0x1f => Frame::ImmediateAck,

        // DATAGRAM: 0x31 carries a length, 0x30 runs to the end of the packet
        0x30 => {
            let rest = &buf[pos..];
            pos = buf.len();
            Frame::Datagram(rest)
        }
        0x31 => {
            let length = read_varint(buf, &mut pos)?;
            Frame::Datagram(read_bytes(buf, &mut pos, length)?)
        }

        _ => return Err(frame_encoding_error()),
    };

    Ok((frame, pos))
}

/// Decode every frame of a packet payload.
///
/// Parsing is lenient: an unknown or truncated frame ends the list, and
/// the frames decoded before it are still returned.
pub fn parse_frames(payload: &[u8]) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < payload.len() {
        match decode(&payload[pos..]) {
            Ok((frame, n)) => {
                pos += n;
                frames.push(frame);
            }
            Err(e) => {
                tracing::trace!(offset = pos, error = %e, "stopping frame parse");
                break;
            }
        }
    }
    frames
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Append the wire encoding of `frame` to `out`.
pub fn encode(frame: &Frame<'_>, out: &mut Vec<u8>) -> Result<(), Error> {
    match frame {
        Frame::Padding(n) => out.resize(out.len() + n, 0),

        Frame::Ping => out.push(0x01),

        Frame::Ack(ack) => {
            out.push(if ack.ecn.is_some() { 0x03 } else { 0x02 });
            write_varint(ack.largest, out)?;
            write_varint(ack.delay, out)?;
            write_varint(ack.ranges.len() as u64, out)?;
            write_varint(ack.first_range, out)?;
            for range in &ack.ranges {
                write_varint(range.gap, out)?;
                write_varint(range.length, out)?;
            }
            if let Some(ecn) = &ack.ecn {
                write_varint(ecn.ect0, out)?;
                write_varint(ecn.ect1, out)?;
                write_varint(ecn.ecn_ce, out)?;
            }
        }

        Frame::ResetStream(f) => {
            out.push(0x04);
            write_varint(f.stream_id, out)?;
            write_varint(f.error_code, out)?;
            write_varint(f.final_size, out)?;
        }

        Frame::StopSending(f) => {
            out.push(0x05);
            write_varint(f.stream_id, out)?;
            write_varint(f.error_code, out)?;
        }

        Frame::Crypto(f) => {
            out.push(0x06);
            write_varint(f.offset, out)?;
            write_bytes(f.data, out)?;
        }

        Frame::NewToken(token) => {
            out.push(0x07);
            write_bytes(token, out)?;
        }

        Frame::Stream(f) => {
            // Length is always explicit so frames can be followed by others.
            let mut ty = 0x08 | 0x02;
            if f.offset > 0 {
                ty |= 0x04;
            }
            if f.fin {
                ty |= 0x01;
            }
            out.push(ty);
            write_varint(f.stream_id, out)?;
            if f.offset > 0 {
                write_varint(f.offset, out)?;
            }
            write_bytes(f.data, out)?;
        }

        Frame::MaxData(v) => {
            out.push(0x10);
            write_varint(*v, out)?;
        }

        Frame::MaxStreamData(f) => {
            out.push(0x11);
            write_varint(f.stream_id, out)?;
            write_varint(f.max_data, out)?;
        }

        Frame::MaxStreams(f) => {
            out.push(if f.bidirectional { 0x12 } else { 0x13 });
            write_varint(f.max_streams, out)?;
        }

        Frame::DataBlocked(v) => {
            out.push(0x14);
            write_varint(*v, out)?;
        }

        Frame::StreamDataBlocked(f) => {
            out.push(0x15);
            write_varint(f.stream_id, out)?;
            write_varint(f.data_limit, out)?;
        }

        Frame::StreamsBlocked(f) => {
            out.push(if f.bidirectional { 0x16 } else { 0x17 });
            write_varint(f.max_streams, out)?;
        }

        Frame::NewConnectionId(f) => {
            out.push(0x18);
            write_varint(f.sequence_number, out)?;
            write_varint(f.retire_prior_to, out)?;
            out.push(f.connection_id.len() as u8);
            out.extend_from_slice(f.connection_id);
            out.extend_from_slice(f.stateless_reset_token);
        }

        Frame::RetireConnectionId(seq) => {
            out.push(0x19);
            write_varint(*seq, out)?;
        }

        Frame::PathChallenge(data) => {
            out.push(0x1a);
            out.extend_from_slice(data);
        }

        Frame::PathResponse(data) => {
            out.push(0x1b);
            out.extend_from_slice(data);
        }

        Frame::ConnectionClose(f) => {
            out.push(if f.is_application { 0x1d } else { 0x1c });
            write_varint(f.error_code, out)?;
            if !f.is_application {
                write_varint(f.frame_type, out)?;
            }
            write_bytes(f.reason, out)?;
        }

        Frame::HandshakeDone => out.push(0x1e),

        Frame::ImmediateAck => out.push(0x1f),

        Frame::Datagram(data) => {
            out.push(0x31);
            write_bytes(data, out)?;
        }
    }
    Ok(())
}

/// Bytes a STREAM frame header takes for these fields, excluding data.
pub fn stream_frame_overhead(stream_id: u64, offset: u64, data_len: usize) -> usize {
    let offset_len = if offset > 0 { varint_len(offset) } else { 0 };
    1 + varint_len(stream_id) + offset_len + varint_len(data_len as u64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: &Frame<'_>) {
        let mut buf = Vec::new();
        encode(frame, &mut buf).unwrap();
        let (decoded, consumed) = decode(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(&decoded, frame);
    }

    fn ranges(set: &RangeSet) -> Vec<(u64, u64)> {
        set.iter().map(|r| (r.start, r.end)).collect()
    }

    #[test]
    fn roundtrip_control_frames() {
        roundtrip(&Frame::Ping);
        roundtrip(&Frame::HandshakeDone);
        roundtrip(&Frame::MaxData(1 << 40));
        roundtrip(&Frame::PathChallenge(*b"abcdefgh"));
        roundtrip(&Frame::ConnectionClose(ConnectionCloseFrame {
            is_application: false,
            error_code: 0x0128,
            frame_type: 0x06,
            reason: b"handshake failure",
        }));
        roundtrip(&Frame::ConnectionClose(ConnectionCloseFrame {
            is_application: true,
            error_code: 0x0100,
            frame_type: 0,
            reason: b"",
        }));
    }

    #[test]
    fn padding_run_collapses() {
        let buf = [0u8, 0, 0, 0, 0x01];
        let (frame, n) = decode(&buf).unwrap();
        assert_eq!(frame, Frame::Padding(4));
        assert_eq!(n, 4);
        assert_eq!(parse_frames(&buf), vec![Frame::Padding(4), Frame::Ping]);
    }

    // ---------------------------------------------------------------
    // STREAM
    // ---------------------------------------------------------------

    #[test]
    fn stream_flag_bits() {
        let mut buf = Vec::new();
        encode(
            &Frame::Stream(StreamFrame {
                stream_id: 4,
                offset: 0,
                data: b"hi",
                fin: false,
            }),
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf, [0x0a, 0x04, 0x02, b'h', b'i']);

        buf.clear();
        encode(
            &Frame::Stream(StreamFrame {
                stream_id: 4,
                offset: 7,
                data: b"",
                fin: true,
            }),
            &mut buf,
        )
        .unwrap();
        assert_eq!(buf, [0x0f, 0x04, 0x07, 0x00]);
        assert_eq!(buf.len(), stream_frame_overhead(4, 7, 0));
    }

    #[test]
    fn stream_without_length_runs_to_end() {
        // type 0x0c: OFF set, LEN clear
        let buf = [0x0c, 0x00, 0x05, b'a', b'b', b'c'];
        let (frame, n) = decode(&buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(
            frame,
            Frame::Stream(StreamFrame {
                stream_id: 0,
                offset: 5,
                data: b"abc",
                fin: false,
            })
        );
    }

    // ---------------------------------------------------------------
    // ACK
    // ---------------------------------------------------------------

    #[test]
    fn ack_with_ecn_roundtrip() {
        roundtrip(&Frame::Ack(AckFrame {
            largest: 100,
            delay: 25,
            first_range: 3,
            ranges: vec![AckRange { gap: 1, length: 2 }],
            ecn: Some(EcnCounts {
                ect0: 1,
                ect1: 2,
                ecn_ce: 3,
            }),
        }));
    }

    #[test]
    fn ack_info_expands_ranges() {
        // Acknowledges 8..=10 and 2..=5.
        let ack = AckFrame {
            largest: 10,
            delay: 0,
            first_range: 2,
            ranges: vec![AckRange { gap: 1, length: 3 }],
            ecn: None,
        };
        let set = ack_info_to_ranges(&ack).unwrap();
        assert_eq!(ranges(&set), vec![(2, 6), (8, 11)]);
    }

    #[test]
    fn ack_from_ranges_inverts() {
        let mut set = RangeSet::new();
        set.add(0, 3);
        set.add(5, 6);
        set.add(9, 20);
        let ack = AckFrame::from_ranges(&set, 12).unwrap();
        assert_eq!(ack.largest, 19);
        assert_eq!(ack.first_range, 10);
        assert_eq!(
            ack.ranges,
            vec![AckRange { gap: 2, length: 0 }, AckRange { gap: 0, length: 2 }]
        );
        assert_eq!(ack_info_to_ranges(&ack).unwrap(), set);
        assert!(AckFrame::from_ranges(&RangeSet::new(), 0).is_none());
    }

    #[test]
    fn ack_underflow_is_encoding_error() {
        let ack = AckFrame {
            largest: 3,
            delay: 0,
            first_range: 1,
            ranges: vec![AckRange { gap: 5, length: 0 }],
            ecn: None,
        };
        assert_eq!(
            ack_info_to_ranges(&ack),
            Err(Error::Transport(TransportError::FrameEncodingError))
        );
    }

    #[test]
    fn ack_range_count_bounded_by_input() {
        // Claims 2^30 ranges in a 6-byte frame.
        let buf = [0x02, 0x05, 0x00, 0xbf, 0xff, 0xff];
        assert!(decode(&buf).is_err());
    }

    // ---------------------------------------------------------------
    // DATAGRAM
    // ---------------------------------------------------------------

    #[test]
    fn datagram_forms() {
        roundtrip(&Frame::Datagram(b"\x00hello"));
        let (frame, n) = decode(&[0x30, 1, 2, 3]).unwrap();
        assert_eq!(frame, Frame::Datagram(&[1, 2, 3]));
        assert_eq!(n, 4);
    }

    // ---------------------------------------------------------------
    // Lenient parsing
    // ---------------------------------------------------------------

    #[test]
    fn parse_keeps_prefix_before_unknown_frame() {
        let mut buf = Vec::new();
        encode(&Frame::Ping, &mut buf).unwrap();
        encode(
            &Frame::Crypto(CryptoFrame {
                offset: 0,
                data: b"abc",
            }),
            &mut buf,
        )
        .unwrap();
        buf.push(0x21); // unknown type
        encode(&Frame::Ping, &mut buf).unwrap();

        let frames = parse_frames(&buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], Frame::Ping);
        assert!(matches!(frames[1], Frame::Crypto(CryptoFrame { data: b"abc", .. })));
    }

    #[test]
    fn parse_keeps_prefix_before_truncated_frame() {
        let buf = [0x01, 0x06, 0x00, 0x10, 0xaa];
        assert_eq!(parse_frames(&buf), vec![Frame::Ping]);
    }

    #[test]
    fn ack_eliciting_classification() {
        assert!(Frame::Ping.is_ack_eliciting());
        assert!(Frame::HandshakeDone.is_ack_eliciting());
        assert!(!Frame::Padding(3).is_ack_eliciting());
        assert!(!Frame::Ack(AckFrame {
            largest: 0,
            delay: 0,
            first_range: 0,
            ranges: vec![],
            ecn: None,
        })
        .is_ack_eliciting());
        assert!(!Frame::ConnectionClose(ConnectionCloseFrame {
            is_application: false,
            error_code: 0,
            frame_type: 0,
            reason: b"",
        })
        .is_ack_eliciting());
    }

    #[test]
    fn new_connection_id_validates_length() {
        let mut buf = Vec::new();
        let token = [7u8; 16];
        encode(
            &Frame::NewConnectionId(NewConnectionIdFrame {
                sequence_number: 1,
                retire_prior_to: 0,
                connection_id: &[1, 2, 3, 4],
                stateless_reset_token: &token,
            }),
            &mut buf,
        )
        .unwrap();
        assert!(decode(&buf).is_ok());
        // Rewrite the length byte to 21.
        buf[3] = 21;
        assert!(decode(&buf).is_err());
    }
}
