//! HTTP/3 frame types and encode/decode (RFC 9114 §7).
//!
//! HTTP/3 frames are carried on QUIC streams and use a simple TLV format:
//!
//! ```text
//! Frame {
//!   Type (varint),
//!   Length (varint),
//!   Payload (..)
//! }
//! ```

use crate::error::{Error, H3Error};
use crate::varint::{decode_varint, read_varint, varint_len, write_varint};

use super::Settings;

pub const FRAME_DATA: u64 = 0x00;
pub const FRAME_HEADERS: u64 = 0x01;
pub const FRAME_CANCEL_PUSH: u64 = 0x03;
pub const FRAME_SETTINGS: u64 = 0x04;
pub const FRAME_PUSH_PROMISE: u64 = 0x05;
pub const FRAME_GOAWAY: u64 = 0x07;
pub const FRAME_MAX_PUSH_ID: u64 = 0x0d;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum H3Frame<'a> {
    Data(&'a [u8]),
    /// QPACK-encoded field section.
    Headers(&'a [u8]),
    CancelPush(u64),
    Settings(Settings),
    PushPromise {
        push_id: u64,
        field_section: &'a [u8],
    },
    GoAway(u64),
    MaxPushId(u64),
    /// Unknown or reserved type; receivers skip it (RFC 9114 §7.2.8).
    Unknown(u64),
}

fn single_varint(payload: &[u8]) -> Result<u64, Error> {
    match decode_varint(payload) {
        Ok((v, n)) if n == payload.len() => Ok(v),
        _ => Err(H3Error::FrameError.into()),
    }
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` while the frame is incomplete.
pub fn decode(buf: &[u8]) -> Result<Option<(H3Frame<'_>, usize)>, Error> {
    let Some((frame_type, type_len)) = read_varint(buf, 0) else {
        return Ok(None);
    };
    let Some((payload_len, len_len)) = read_varint(buf, type_len) else {
        return Ok(None);
    };
    let start = type_len + len_len;
    let Some(end) = usize::try_from(payload_len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= buf.len())
    else {
        return Ok(None);
    };
    let payload = &buf[start..end];

    let frame = match frame_type {
        FRAME_DATA => H3Frame::Data(payload),
        FRAME_HEADERS => H3Frame::Headers(payload),
        FRAME_CANCEL_PUSH => H3Frame::CancelPush(single_varint(payload)?),
        FRAME_SETTINGS => H3Frame::Settings(Settings::decode(payload)?),
        FRAME_PUSH_PROMISE => {
            let (push_id, n) = decode_varint(payload).map_err(|_| H3Error::FrameError)?;
            H3Frame::PushPromise {
                push_id,
                field_section: &payload[n..],
            }
        }
        FRAME_GOAWAY => H3Frame::GoAway(single_varint(payload)?),
        FRAME_MAX_PUSH_ID => H3Frame::MaxPushId(single_varint(payload)?),
        other => H3Frame::Unknown(other),
    };
    Ok(Some((frame, end)))
}

/// Decode every complete frame of `buf`, which holds stream data starting
/// at stream offset `from_offset`.
///
/// Returns the frames and the offset just past the last complete one.
/// Bytes of a trailing partial frame wait for the next call.
pub fn extract_frames(buf: &[u8], from_offset: u64) -> Result<(Vec<H3Frame<'_>>, u64), Error> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while let Some((frame, used)) = decode(&buf[pos..])? {
        frames.push(frame);
        pos += used;
    }
    Ok((frames, from_offset + pos as u64))
}

fn put_frame(frame_type: u64, payload: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
    write_varint(frame_type, out)?;
    write_varint(payload.len() as u64, out)?;
    out.extend_from_slice(payload);
    Ok(())
}

fn put_varint_frame(frame_type: u64, value: u64, out: &mut Vec<u8>) -> Result<(), Error> {
    write_varint(frame_type, out)?;
    write_varint(varint_len(value) as u64, out)?;
    write_varint(value, out)
}

/// Append `frame` to `out`. `Unknown` frames are receive-only and encode
/// to nothing.
pub fn encode(frame: &H3Frame<'_>, out: &mut Vec<u8>) -> Result<(), Error> {
    match frame {
        H3Frame::Data(data) => put_frame(FRAME_DATA, data, out),
        H3Frame::Headers(block) => put_frame(FRAME_HEADERS, block, out),
        H3Frame::CancelPush(id) => put_varint_frame(FRAME_CANCEL_PUSH, *id, out),
        H3Frame::Settings(settings) => {
            let mut payload = Vec::new();
            settings.encode(&mut payload)?;
            put_frame(FRAME_SETTINGS, &payload, out)
        }
        H3Frame::PushPromise {
            push_id,
            field_section,
        } => {
            let mut payload = Vec::with_capacity(8 + field_section.len());
            write_varint(*push_id, &mut payload)?;
            payload.extend_from_slice(field_section);
            put_frame(FRAME_PUSH_PROMISE, &payload, out)
        }
        H3Frame::GoAway(id) => put_varint_frame(FRAME_GOAWAY, *id, out),
        H3Frame::MaxPushId(id) => put_varint_frame(FRAME_MAX_PUSH_ID, *id, out),
        H3Frame::Unknown(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frame: &H3Frame<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        encode(frame, &mut out).unwrap();
        out
    }

    #[test]
    fn data_frame_layout() {
        assert_eq!(encoded(&H3Frame::Data(b"hi")), [0x00, 0x02, b'h', b'i']);
        assert_eq!(encoded(&H3Frame::GoAway(4)), [0x07, 0x01, 0x04]);
    }

    #[test]
    fn incomplete_frame_waits() {
        let bytes = encoded(&H3Frame::Headers(&[0, 0, 0xd1]));
        for cut in 0..bytes.len() {
            assert_eq!(decode(&bytes[..cut]).unwrap(), None);
        }
        let (frame, used) = decode(&bytes).unwrap().unwrap();
        assert_eq!(frame, H3Frame::Headers(&[0, 0, 0xd1]));
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn extract_stops_at_partial_frame() {
        let mut stream = encoded(&H3Frame::Headers(&[0, 0, 0xd1]));
        stream.extend(encoded(&H3Frame::Data(b"body")));
        let first_two = stream.len() as u64;
        stream.extend_from_slice(&[0x00, 0x05, b'x']);

        let (frames, next) = extract_frames(&stream, 100).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], H3Frame::Data(b"body"));
        assert_eq!(next, 100 + first_two);

        let (frames, next) = extract_frames(&stream[first_two as usize..], next).unwrap();
        assert!(frames.is_empty());
        assert_eq!(next, 100 + first_two);
    }

    #[test]
    fn settings_frame() {
        let settings = Settings::server_defaults();
        let bytes = encoded(&H3Frame::Settings(settings.clone()));
        assert_eq!(bytes[0], 0x04);
        let (frame, _) = decode(&bytes).unwrap().unwrap();
        assert_eq!(frame, H3Frame::Settings(settings));
    }

    #[test]
    fn unknown_and_malformed() {
        // reserved type 0x21 with a 2-byte payload is skipped whole
        let (frame, used) = decode(&[0x21, 0x02, 0xaa, 0xbb]).unwrap().unwrap();
        assert_eq!(frame, H3Frame::Unknown(0x21));
        assert_eq!(used, 4);
        // GOAWAY with trailing garbage
        assert_eq!(decode(&[0x07, 0x02, 0x04, 0x00]), Err(H3Error::FrameError.into()));
    }
}
