//! Short header (1-RTT) packet parsing and encoding (RFC 9000 section 17.3).

use crate::error::{Error, TransportError};
use crate::packet::ShortHeader;

/// Parse a short header packet.
///
/// The DCID has no length prefix; the caller knows its length from the
/// connection IDs it issued.
pub fn parse_short_header(buf: &[u8], dcid_len: usize) -> Result<ShortHeader<'_>, Error> {
    let needed = 1 + dcid_len;
    if buf.len() < needed {
        return Err(Error::BufferTooSmall { needed });
    }

    // form bit clear, fixed bit set
    if buf[0] & 0xc0 != 0x40 {
        return Err(TransportError::ProtocolViolation.into());
    }

    Ok(ShortHeader {
        dcid: &buf[1..needed],
        pn_offset: needed,
    })
}

/// Encode a short header with spin and key phase bits clear.
///
/// Returns the bytes written, which is the packet number offset.
pub fn encode_short_header(dcid: &[u8], pn_len: usize, buf: &mut [u8]) -> Result<usize, Error> {
    if !(1..=4).contains(&pn_len) {
        return Err(Error::InvalidState);
    }
    let needed = 1 + dcid.len();
    if buf.len() < needed {
        return Err(Error::BufferTooSmall { needed });
    }

    buf[0] = 0x40 | (pn_len as u8 - 1);
    buf[1..needed].copy_from_slice(dcid);
    Ok(needed)
}
