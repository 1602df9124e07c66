//! Long header packet parsing and encoding (RFC 9000 section 17.2).

use crate::error::{Error, TransportError};
use crate::packet::{LongHeader, PacketHeader, PacketType, MAX_CID_LEN};
use crate::varint::{decode_varint, encode_varint, varint_len};

/// Parse a long header up to (not including) the packet number.
///
/// Version Negotiation and Retry packets have no Length field; for them
/// `length` covers the rest of the buffer.
pub fn parse_long_header(buf: &[u8]) -> Result<(PacketHeader<'_>, usize), Error> {
    // first byte + version + dcid len + scid len
    if buf.len() < 7 {
        return Err(Error::BufferTooSmall { needed: 7 });
    }

    let first_byte = buf[0];
    if first_byte & 0x80 == 0 {
        return Err(TransportError::ProtocolViolation.into());
    }

    let version = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    let mut pos = 5;
    let dcid = read_cid(buf, &mut pos)?;
    let scid = read_cid(buf, &mut pos)?;

    if version == 0 {
        return Ok((PacketHeader::VersionNegotiation { dcid, scid }, buf.len()));
    }

    let packet_type = match (first_byte >> 4) & 0x03 {
        0b00 => PacketType::Initial,
        0b01 => PacketType::ZeroRtt,
        0b10 => PacketType::Handshake,
        _ => PacketType::Retry,
    };

    let mut token: &[u8] = &[];
    if packet_type == PacketType::Initial {
        let (token_len, n) = decode_varint(&buf[pos..])?;
        pos += n;
        let end = pos
            .checked_add(token_len as usize)
            .filter(|&end| end <= buf.len())
            .ok_or(Error::BufferTooSmall {
                needed: pos.saturating_add(token_len as usize),
            })?;
        token = &buf[pos..end];
        pos = end;
    }

    let length = if packet_type == PacketType::Retry {
        buf.len() - pos
    } else {
        let (length, n) = decode_varint(&buf[pos..])?;
        pos += n;
        length as usize
    };

    if length > buf.len() - pos {
        return Err(Error::BufferTooSmall {
            needed: pos + length,
        });
    }

    Ok((
        PacketHeader::Long(LongHeader {
            packet_type,
            version,
            dcid,
            scid,
            token,
            pn_offset: pos,
            length,
        }),
        pos,
    ))
}

fn read_cid<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8], Error> {
    let len = *buf.get(*pos).ok_or(Error::BufferTooSmall { needed: *pos + 1 })? as usize;
    if len > MAX_CID_LEN {
        return Err(TransportError::ProtocolViolation.into());
    }
    let start = *pos + 1;
    let cid = buf.get(start..start + len).ok_or(Error::BufferTooSmall {
        needed: start + len,
    })?;
    *pos = start + len;
    Ok(cid)
}

/// Size of an encoded long header (without packet number) for the given fields.
pub fn long_header_len(dcid: &[u8], scid: &[u8], token: Option<&[u8]>, length: usize) -> usize {
    let token_len = token.map_or(0, |t| varint_len(t.len() as u64) + t.len());
    1 + 4 + 1 + dcid.len() + 1 + scid.len() + token_len + varint_len(length as u64)
}

/// Encode an Initial or Handshake long header into `buf`.
///
/// `token` must be `Some` exactly for Initial packets. `length` covers the
/// packet number and the protected payload. Returns the bytes written,
/// which is the packet number offset.
#[allow(clippy::too_many_arguments)]
pub fn encode_long_header(
    packet_type: PacketType,
    version: u32,
    dcid: &[u8],
    scid: &[u8],
    token: Option<&[u8]>,
    pn_len: usize,
    length: usize,
    buf: &mut [u8],
) -> Result<usize, Error> {
    let type_bits = match packet_type {
        PacketType::Initial => 0b00,
        PacketType::ZeroRtt => 0b01,
        PacketType::Handshake => 0b10,
        PacketType::Retry | PacketType::OneRtt => return Err(Error::InvalidState),
    };
    if !(1..=4).contains(&pn_len) || dcid.len() > MAX_CID_LEN || scid.len() > MAX_CID_LEN {
        return Err(Error::InvalidState);
    }

    let needed = long_header_len(dcid, scid, token, length);
    if buf.len() < needed {
        return Err(Error::BufferTooSmall { needed });
    }

    buf[0] = 0xc0 | (type_bits << 4) | (pn_len as u8 - 1);
    buf[1..5].copy_from_slice(&version.to_be_bytes());
    let mut pos = 5;
    for cid in [dcid, scid] {
        buf[pos] = cid.len() as u8;
        buf[pos + 1..pos + 1 + cid.len()].copy_from_slice(cid);
        pos += 1 + cid.len();
    }
    if let Some(token) = token {
        pos += encode_varint(token.len() as u64, &mut buf[pos..])?;
        buf[pos..pos + token.len()].copy_from_slice(token);
        pos += token.len();
    }
    pos += encode_varint(length as u64, &mut buf[pos..])?;
    Ok(pos)
}
