//! Packet protection: header protection and AEAD (RFC 9001 section 5).
//!
//! The header protection sample is the 16 bytes starting 4 bytes after
//! the packet number offset, so every packet needs at least
//! `4 - pn_len` payload bytes before the tag. [`build_packet`] pads with
//! PADDING frames to guarantee that.

use crate::crypto::{PacketKeys, TAG_LEN};
use crate::error::Error;
use crate::packet::long_header::{encode_long_header, long_header_len};
use crate::packet::number::{decode_pn, pn_length, truncate_pn};
use crate::packet::short_header::encode_short_header;
use crate::packet::PacketType;

const SAMPLE_LEN: usize = 16;

fn sample_mask(keys: &PacketKeys, packet: &[u8], pn_offset: usize) -> Result<[u8; 5], Error> {
    let start = pn_offset + 4;
    let sample: &[u8; SAMPLE_LEN] = packet
        .get(start..start + SAMPLE_LEN)
        .and_then(|s| s.try_into().ok())
        .ok_or(Error::BufferTooSmall {
            needed: start + SAMPLE_LEN,
        })?;
    Ok(keys.header_mask(sample))
}

const fn first_byte_mask(first_byte: u8) -> u8 {
    if first_byte & 0x80 != 0 {
        0x0f
    } else {
        0x1f
    }
}

/// Mask the flags byte and packet number of a sealed packet in place.
pub fn apply_header_protection(
    keys: &PacketKeys,
    packet: &mut [u8],
    pn_offset: usize,
    pn_len: usize,
) -> Result<(), Error> {
    let mask = sample_mask(keys, packet, pn_offset)?;
    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    for (b, m) in packet[pn_offset..pn_offset + pn_len].iter_mut().zip(&mask[1..]) {
        *b ^= m;
    }
    Ok(())
}

/// Unmask a received packet in place.
///
/// Returns `(pn_len, truncated_pn)` read from the unprotected header.
pub fn remove_header_protection(
    keys: &PacketKeys,
    packet: &mut [u8],
    pn_offset: usize,
) -> Result<(usize, u64), Error> {
    let mask = sample_mask(keys, packet, pn_offset)?;
    packet[0] ^= mask[0] & first_byte_mask(packet[0]);
    let pn_len = (packet[0] & 0x03) as usize + 1;

    let mut truncated = 0u64;
    for (b, m) in packet[pn_offset..pn_offset + pn_len].iter_mut().zip(&mask[1..]) {
        *b ^= m;
        truncated = (truncated << 8) | u64::from(*b);
    }
    Ok((pn_len, truncated))
}

/// A decrypted packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedPacket {
    pub packet_number: u64,
    pub payload: Vec<u8>,
}

/// Remove header protection and decrypt one packet.
///
/// `packet` spans exactly this packet (for long headers, up to the end of
/// its Length field). `expected_pn` is one past the largest packet
/// number received in the space.
pub fn open_packet(
    keys: &PacketKeys,
    packet: &[u8],
    pn_offset: usize,
    expected_pn: u64,
) -> Result<OpenedPacket, Error> {
    let mut buf = packet.to_vec();
    let (pn_len, truncated) = remove_header_protection(keys, &mut buf, pn_offset)?;
    let packet_number = decode_pn(truncated, pn_len, expected_pn);

    let (header, body) = buf.split_at_mut(pn_offset + pn_len);
    let body_len = body.len();
    let plain_len = keys.open(packet_number, header, body, body_len)?;
    buf.truncate(pn_offset + pn_len + plain_len);
    buf.drain(..pn_offset + pn_len);

    Ok(OpenedPacket {
        packet_number,
        payload: buf,
    })
}

/// Header fields of an outgoing packet.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingHeader<'a> {
    pub packet_type: PacketType,
    pub version: u32,
    pub dcid: &'a [u8],
    /// Ignored for 1-RTT packets.
    pub scid: &'a [u8],
}

/// Encode, encrypt and header-protect one packet.
///
/// The payload is padded with PADDING frames so the header protection
/// sample exists and the whole packet is at least `min_size` bytes.
pub fn build_packet(
    header: &OutgoingHeader<'_>,
    keys: &PacketKeys,
    packet_number: u64,
    largest_acked: Option<u64>,
    payload: &[u8],
    min_size: usize,
) -> Result<Vec<u8>, Error> {
    let pn_len = pn_length(packet_number, largest_acked);
    let is_long = header.packet_type != PacketType::OneRtt;
    let token: Option<&[u8]> = (header.packet_type == PacketType::Initial).then_some(&[][..]);

    let mut padded_len = payload.len().max(4usize.saturating_sub(pn_len));
    let header_len = loop {
        let length = pn_len + padded_len + TAG_LEN;
        let header_len = if is_long {
            long_header_len(header.dcid, header.scid, token, length)
        } else {
            1 + header.dcid.len()
        };
        let total = header_len + length;
        if total >= min_size {
            break header_len;
        }
        padded_len += min_size - total;
    };

    let length = pn_len + padded_len + TAG_LEN;
    let mut buf = vec![0u8; header_len + length];
    let pn_offset = if is_long {
        encode_long_header(
            header.packet_type,
            header.version,
            header.dcid,
            header.scid,
            token,
            pn_len,
            length,
            &mut buf,
        )?
    } else {
        encode_short_header(header.dcid, pn_len, &mut buf)?
    };
    debug_assert_eq!(pn_offset, header_len);

    let pn_bytes = truncate_pn(packet_number, pn_len);
    buf[pn_offset..pn_offset + pn_len].copy_from_slice(&pn_bytes[..pn_len]);
    let body_start = pn_offset + pn_len;
    buf[body_start..body_start + payload.len()].copy_from_slice(payload);

    let (aad, body) = buf.split_at_mut(body_start);
    keys.seal(packet_number, aad, body, padded_len)?;
    apply_header_protection(keys, &mut buf, pn_offset, pn_len)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_schedule::derive_initial_keys;
    use crate::packet::{parse_header, PacketHeader, QUIC_VERSION_1};
    use hex_literal::hex;

    fn initial_header<'a>(dcid: &'a [u8], scid: &'a [u8]) -> OutgoingHeader<'a> {
        OutgoingHeader {
            packet_type: PacketType::Initial,
            version: QUIC_VERSION_1,
            dcid,
            scid,
        }
    }

    #[test]
    fn initial_roundtrip_is_padded() {
        let odcid = hex!("8394c8f03e515708");
        let (client, server) = derive_initial_keys(&odcid).unwrap();
        let payload = [0x06, 0x00, 0x03, 1, 2, 3];

        let packet = build_packet(
            &initial_header(&odcid, b"srv"),
            &client,
            0,
            None,
            &payload,
            1200,
        )
        .unwrap();
        assert!(packet.len() >= 1200);

        let (hdr, _) = parse_header(&packet, 8).unwrap();
        let PacketHeader::Long(hdr) = hdr else {
            panic!("expected long header");
        };
        assert_eq!(hdr.packet_type, PacketType::Initial);
        assert_eq!(hdr.pn_offset + hdr.length, packet.len());

        // Server keys must not open a client packet.
        assert!(open_packet(&server, &packet, hdr.pn_offset, 0).is_err());

        let opened = open_packet(&client, &packet, hdr.pn_offset, 0).unwrap();
        assert_eq!(opened.packet_number, 0);
        assert_eq!(&opened.payload[..payload.len()], &payload);
        assert!(opened.payload[payload.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn short_packet_tiny_payload_still_has_sample() {
        let (_, server) = derive_initial_keys(b"\x01\x02\x03\x04").unwrap();
        let dcid = [9u8; 8];
        let header = OutgoingHeader {
            packet_type: PacketType::OneRtt,
            version: QUIC_VERSION_1,
            dcid: &dcid,
            scid: &[],
        };
        // A lone PING with a 1-byte packet number.
        let packet = build_packet(&header, &server, 5, Some(4), &[0x01], 0).unwrap();
        assert!(packet.len() >= 1 + dcid.len() + 4 + 16);

        let opened = open_packet(&server, &packet, 1 + dcid.len(), 5).unwrap();
        assert_eq!(opened.packet_number, 5);
        assert_eq!(opened.payload[0], 0x01);
    }

    #[test]
    fn header_protection_roundtrip() {
        let (client, _) = derive_initial_keys(b"\x55\x66").unwrap();
        let mut packet = [0u8; 40];
        packet[0] = 0xc1;
        for (i, b) in packet.iter_mut().enumerate().skip(1) {
            *b = i as u8;
        }
        let original = packet;
        apply_header_protection(&client, &mut packet, 10, 2).unwrap();
        assert_ne!(packet[..12], original[..12]);
        // Long header: upper nibble is never masked.
        assert_eq!(packet[0] & 0xf0, 0xc0);

        let (pn_len, truncated) = remove_header_protection(&client, &mut packet, 10).unwrap();
        assert_eq!(packet, original);
        assert_eq!(pn_len, 2);
        assert_eq!(truncated, 0x0a0b);
    }

    #[test]
    fn truncated_packet_rejected() {
        let (client, _) = derive_initial_keys(b"\x55\x66").unwrap();
        let mut packet = [0xc0u8; 20];
        assert!(remove_header_protection(&client, &mut packet, 10).is_err());
    }

    #[test]
    fn large_packet_number_decodes() {
        let (_, server) = derive_initial_keys(b"\xaa").unwrap();
        let header = OutgoingHeader {
            packet_type: PacketType::Handshake,
            version: QUIC_VERSION_1,
            dcid: b"abc",
            scid: b"def",
        };
        let packet = build_packet(&header, &server, 70_000, Some(1), b"hello", 0).unwrap();
        let (hdr, _) = parse_header(&packet, 0).unwrap();
        let PacketHeader::Long(hdr) = hdr else {
            panic!("expected long header");
        };
        let opened = open_packet(&server, &packet, hdr.pn_offset, 69_990).unwrap();
        assert_eq!(opened.packet_number, 70_000);
        assert_eq!(&opened.payload, b"hello");
    }
}
