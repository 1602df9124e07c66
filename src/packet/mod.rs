//! QUIC packet header types and codec.
//!
//! This module handles the outer QUIC packet structure: headers, packet
//! numbers, coalescing, and (in [`protection`]) header protection plus
//! AEAD sealing of whole packets.

pub mod coalesce;
pub mod long_header;
pub mod number;
pub mod protection;
pub mod short_header;

pub use coalesce::CoalescedPackets;
pub use long_header::{encode_long_header, parse_long_header};
pub use number::{decode_pn, pn_length};
pub use protection::{build_packet, open_packet, OpenedPacket, OutgoingHeader};
pub use short_header::{encode_short_header, parse_short_header};

use crate::crypto::Level;
use crate::error::Error;

/// QUIC v1 version number (RFC 9000).
pub const QUIC_VERSION_1: u32 = 0x0000_0001;

/// Maximum connection ID length (RFC 9000).
pub const MAX_CID_LEN: usize = 20;

/// Minimum size of a client Initial datagram, and of server Initial
/// packets carrying ack-eliciting frames (RFC 9000 section 14.1).
pub const MIN_INITIAL_PACKET_SIZE: usize = 1200;

/// Packet types, long and short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    Retry,
    /// Short header.
    OneRtt,
}

impl PacketType {
    /// Encryption level, for packet types the server processes.
    pub const fn level(self) -> Option<Level> {
        match self {
            PacketType::Initial => Some(Level::Initial),
            PacketType::Handshake => Some(Level::Handshake),
            PacketType::OneRtt => Some(Level::Application),
            PacketType::ZeroRtt | PacketType::Retry => None,
        }
    }

    pub const fn for_level(level: Level) -> Self {
        match level {
            Level::Initial => PacketType::Initial,
            Level::Handshake => PacketType::Handshake,
            Level::Application => PacketType::OneRtt,
        }
    }
}

/// A parsed QUIC packet header, before header protection is removed.
#[derive(Debug)]
pub enum PacketHeader<'a> {
    Long(LongHeader<'a>),
    Short(ShortHeader<'a>),
    /// Parsed but never generated.
    VersionNegotiation { dcid: &'a [u8], scid: &'a [u8] },
}

impl<'a> PacketHeader<'a> {
    pub fn dcid(&self) -> &'a [u8] {
        match self {
            PacketHeader::Long(h) => h.dcid,
            PacketHeader::Short(h) => h.dcid,
            PacketHeader::VersionNegotiation { dcid, .. } => dcid,
        }
    }
}

/// Long header fields up to the packet number.
#[derive(Debug)]
pub struct LongHeader<'a> {
    pub packet_type: PacketType,
    pub version: u32,
    pub dcid: &'a [u8],
    pub scid: &'a [u8],
    /// Initial packets only; empty otherwise.
    pub token: &'a [u8],
    /// Offset of the packet number field.
    pub pn_offset: usize,
    /// Value of the Length field: packet number plus protected payload.
    pub length: usize,
}

/// Short header (1-RTT) packet.
#[derive(Debug)]
pub struct ShortHeader<'a> {
    pub dcid: &'a [u8],
    /// Offset of the packet number field.
    pub pn_offset: usize,
}

/// Parse either header form. `short_dcid_len` is the length of the
/// connection IDs this endpoint issues.
pub fn parse_header(buf: &[u8], short_dcid_len: usize) -> Result<(PacketHeader<'_>, usize), Error> {
    match buf.first() {
        None => Err(Error::BufferTooSmall { needed: 1 }),
        Some(b) if b & 0x80 != 0 => parse_long_header(buf),
        Some(_) => {
            let hdr = parse_short_header(buf, short_dcid_len)?;
            let pn_offset = hdr.pn_offset;
            Ok((PacketHeader::Short(hdr), pn_offset))
        }
    }
}
