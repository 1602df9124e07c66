//! Iterator over coalesced QUIC packets in a single UDP datagram.

use crate::error::Error;
use crate::packet::{long_header::parse_long_header, PacketHeader};

/// Iterator over the packets of one UDP datagram.
///
/// Long header packets end where their Length field says. A short
/// header packet consumes the rest of the datagram. A malformed packet
/// yields one error and ends iteration.
pub struct CoalescedPackets<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> CoalescedPackets<'a> {
    pub fn new(datagram: &'a [u8]) -> Self {
        CoalescedPackets {
            buf: datagram,
            offset: 0,
        }
    }
}

impl<'a> Iterator for CoalescedPackets<'a> {
    type Item = Result<&'a [u8], Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.buf.get(self.offset..).filter(|r| !r.is_empty())?;

        if remaining[0] & 0x80 == 0 {
            self.offset = self.buf.len();
            return Some(Ok(remaining));
        }

        let end = match parse_long_header(remaining) {
            Ok((PacketHeader::Long(hdr), _)) => hdr.pn_offset + hdr.length,
            Ok(_) => remaining.len(),
            Err(e) => {
                self.offset = self.buf.len();
                return Some(Err(e));
            }
        };
        self.offset += end;
        Some(Ok(&remaining[..end]))
    }
}
