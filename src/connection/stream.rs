//! Per-stream send and receive buffers.
//!
//! Both sides work in absolute stream offsets. The send side also backs
//! CRYPTO data for the Initial and Handshake levels, which has the same
//! offset/ack bookkeeping without a final size.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{Error, TransportError};
use crate::ranges::RangeSet;

/// One piece of stream data picked for the next packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub offset: u64,
    pub data: Vec<u8>,
    pub fin: bool,
}

impl StreamChunk {
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Chunks selected for one packet and where the send cursor ends up if
/// the packet goes out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<StreamChunk>,
    pub send_offset_next: u64,
}

impl ChunkPlan {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Bytes of stream data in the plan.
    pub fn data_len(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }
}

/// Outgoing half of a stream.
#[derive(Debug, Clone, Default)]
pub struct SendStream {
    /// Written bytes not yet acknowledged from the front,
    /// starting at `pending_offset_start`.
    pending_data: Vec<u8>,
    pending_offset_start: u64,
    write_offset_next: u64,
    /// Resume point for new data.
    send_offset_next: u64,
    total_size: Option<u64>,
    acked_ranges: RangeSet,
    /// Byte ranges carried by each unacknowledged packet.
    in_flight_ranges: BTreeMap<u64, Vec<Range<u64>>>,
    fin_in_flight: Option<u64>,
    fin_acked: bool,
}

impl SendStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset_next
    }

    pub fn send_offset(&self) -> u64 {
        self.send_offset_next
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn acked_ranges(&self) -> &RangeSet {
        &self.acked_ranges
    }

    /// Packet numbers currently carrying data of this stream.
    pub fn packets_in_flight(&self) -> impl Iterator<Item = u64> + '_ {
        self.in_flight_ranges.keys().copied()
    }

    /// Append `data`; with `fin` the stream's final size becomes known.
    pub fn write(&mut self, data: &[u8], fin: bool) -> Result<(), Error> {
        if self.total_size.is_some() {
            return Err(TransportError::FinalSizeError.into());
        }
        let start = self.write_offset_next;
        let end = start + data.len() as u64;
        self.write_offset_next = end;
        if fin {
            self.total_size = Some(end);
        }

        if self.pending_data.is_empty() {
            self.pending_offset_start = start;
        }
        self.pending_data.extend_from_slice(data);
        Ok(())
    }

    fn acked_prefix(&self) -> u64 {
        match self.acked_ranges.first() {
            Some(r) if r.start == 0 => r.end,
            _ => 0,
        }
    }

    fn outstanding(&self) -> RangeSet {
        let mut covered = self.acked_ranges.clone();
        for ranges in self.in_flight_ranges.values() {
            for r in ranges {
                covered.add(r.start, r.end);
            }
        }
        covered
    }

    fn slice(&self, from: u64, to: u64) -> Vec<u8> {
        let start = (from - self.pending_offset_start) as usize;
        let end = (to - self.pending_offset_start) as usize;
        self.pending_data[start..end].to_vec()
    }

    /// Anything left to put on the wire?
    pub fn has_pending(&self) -> bool {
        let end = self.write_offset_next;
        !self.outstanding().invert(self.pending_offset_start, end).is_empty()
            || self.fin_needs_sending()
    }

    fn fin_needs_sending(&self) -> bool {
        self.total_size.is_some() && !self.fin_acked && self.fin_in_flight.is_none()
    }

    /// Pick the data for the next packet within `allowed` bytes.
    ///
    /// Sending resumes at `send_offset_next` and runs forward through the
    /// unsent range containing it. Leftover budget then fills unsent gaps
    /// from the front of the stream, up to where the first pass started.
    /// `frame_overhead(offset, len)` is the frame header cost charged
    /// against the budget for each chunk.
    pub fn select_chunks(
        &self,
        allowed: usize,
        frame_overhead: &dyn Fn(u64, usize) -> usize,
    ) -> ChunkPlan {
        let end = self.write_offset_next;
        let unsent = self.outstanding().invert(self.pending_offset_start, end);
        let mut chunks = Vec::new();
        let mut used = 0usize;
        let mut first_chunk_offset = None;

        let take = |from: u64, to: u64, chunks: &mut Vec<StreamChunk>, used: &mut usize| {
            let mut offset = from;
            while offset < to && *used < allowed {
                let left = allowed - *used;
                let overhead = frame_overhead(offset, left);
                if left <= overhead {
                    break;
                }
                let len = ((left - overhead) as u64).min(to - offset);
                chunks.push(StreamChunk {
                    offset,
                    data: self.slice(offset, offset + len),
                    fin: self.total_size == Some(offset + len),
                });
                *used += overhead + len as usize;
                offset += len;
            }
        };

        let cursor = self.send_offset_next;
        if let Some(range) = unsent.iter().find(|r| r.start <= cursor && cursor < r.end) {
            first_chunk_offset = Some(cursor);
            take(cursor, range.end, &mut chunks, &mut used);
        }

        let gap_limit = first_chunk_offset.unwrap_or(end);
        for range in unsent.iter() {
            if range.start >= gap_limit || used >= allowed {
                break;
            }
            take(range.start, range.end.min(gap_limit), &mut chunks, &mut used);
        }

        let mut send_offset_next = cursor;
        for chunk in &chunks {
            if chunk.offset != send_offset_next {
                break;
            }
            send_offset_next = chunk.end();
        }

        if self.fin_needs_sending() && !chunks.iter().any(|c| c.fin) && unsent.is_empty() {
            let offset = self.total_size.unwrap_or(end);
            if used + frame_overhead(offset, 0) <= allowed {
                chunks.push(StreamChunk {
                    offset,
                    data: Vec::new(),
                    fin: true,
                });
            }
        }

        ChunkPlan {
            chunks,
            send_offset_next,
        }
    }

    /// Record that `plan` went out in packet `pn`.
    pub fn on_sent(&mut self, pn: u64, plan: &ChunkPlan) {
        let mut ranges: Vec<Range<u64>> = plan
            .chunks
            .iter()
            .filter(|c| !c.data.is_empty())
            .map(|c| c.offset..c.end())
            .collect();
        ranges.sort_by_key(|r| r.start);
        if !ranges.is_empty() {
            self.in_flight_ranges.insert(pn, ranges);
        }
        if plan.chunks.iter().any(|c| c.fin) {
            self.fin_in_flight = Some(pn);
        }
        self.send_offset_next = self.send_offset_next.max(plan.send_offset_next);
    }

    /// Credit the ranges of an acknowledged packet. Returns whether the
    /// packet carried data of this stream.
    pub fn on_packet_acked(&mut self, pn: u64) -> bool {
        let mut touched = false;
        if let Some(ranges) = self.in_flight_ranges.remove(&pn) {
            for r in ranges {
                self.acked_ranges.add(r.start, r.end);
            }
            touched = true;
        }
        if self.fin_in_flight == Some(pn) {
            self.fin_in_flight = None;
            self.fin_acked = true;
            touched = true;
        }
        self.release_acked_prefix();
        touched
    }

    /// Packet `pn` is considered lost: its ranges become unsent again.
    pub fn on_packet_lost(&mut self, pn: u64) {
        if let Some(ranges) = self.in_flight_ranges.remove(&pn) {
            if let Some(start) = ranges
                .iter()
                .map(|r| r.start)
                .filter(|&start| !self.acked_ranges.covers(start, start + 1))
                .min()
            {
                self.send_offset_next = self.send_offset_next.min(start);
            }
        }
        if self.fin_in_flight == Some(pn) {
            self.fin_in_flight = None;
        }
    }

    fn release_acked_prefix(&mut self) {
        let prefix = self.acked_prefix();
        if prefix > self.pending_offset_start {
            let drop = ((prefix - self.pending_offset_start) as usize).min(self.pending_data.len());
            self.pending_data.drain(..drop);
            self.pending_offset_start += drop as u64;
        }
    }

    /// Every byte up to the final size, and the fin itself, acknowledged.
    pub fn is_finished(&self) -> bool {
        match self.total_size {
            Some(0) => self.fin_acked,
            Some(total) => self.fin_acked && self.acked_ranges.covers(0, total),
            None => false,
        }
    }
}

/// Incoming half of a stream, also used for CRYPTO reassembly.
#[derive(Debug, Clone, Default)]
pub struct RecvStream {
    ranges: RangeSet,
    chunks: BTreeMap<u64, Vec<u8>>,
    total_size: Option<u64>,
    /// Set when new data arrived since the last delivery.
    pub need_check: bool,
    /// Bytes before this offset were consumed by the reader.
    from_offset: u64,
}

impl RecvStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a received piece. Returns whether it added new bytes.
    pub fn insert(&mut self, offset: u64, data: &[u8], fin: bool) -> Result<bool, Error> {
        let end = offset + data.len() as u64;
        if let Some(total) = self.total_size {
            if end > total || (fin && end != total) {
                return Err(TransportError::FinalSizeError.into());
            }
        }
        let mut new_fin = false;
        if fin && self.total_size.is_none() {
            if self.ranges.last().is_some_and(|r| r.end > end) {
                return Err(TransportError::FinalSizeError.into());
            }
            self.total_size = Some(end);
            new_fin = true;
        }

        if end <= self.from_offset || !self.ranges.add(offset, end) {
            return Ok(new_fin);
        }
        self.chunks
            .entry(offset)
            .and_modify(|held| {
                if data.len() > held.len() {
                    *held = data.to_vec();
                }
            })
            .or_insert_with(|| data.to_vec());
        self.need_check = true;
        Ok(true)
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn from_offset(&self) -> u64 {
        self.from_offset
    }

    /// End of the data received contiguously from offset zero.
    pub fn contiguous_end(&self) -> u64 {
        match self.ranges.first() {
            Some(r) if r.start == 0 => r.end,
            _ => 0,
        }
    }

    /// Every byte up to the final size has arrived.
    pub fn is_complete(&self) -> bool {
        self.total_size
            .is_some_and(|total| self.contiguous_end() == total)
    }

    /// Contiguous bytes from the read position onward.
    pub fn readable(&self) -> Vec<u8> {
        let end = self.contiguous_end();
        let mut out = Vec::with_capacity(end.saturating_sub(self.from_offset) as usize);
        let mut cursor = self.from_offset;
        for (&offset, data) in self.chunks.range(..end) {
            let chunk_end = offset + data.len() as u64;
            if chunk_end <= cursor {
                continue;
            }
            if offset > cursor {
                break;
            }
            let stop = chunk_end.min(end);
            out.extend_from_slice(&data[(cursor - offset) as usize..(stop - offset) as usize]);
            cursor = stop;
            if cursor >= end {
                break;
            }
        }
        out
    }

    /// Advance the read position to `offset` and drop consumed chunks.
    pub fn consume(&mut self, offset: u64) {
        self.from_offset = self.from_offset.max(offset.min(self.contiguous_end()));
        let from = self.from_offset;
        self.chunks.retain(|&start, data| start + data.len() as u64 > from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_overhead(_: u64, _: usize) -> usize {
        0
    }

    #[test]
    fn select_resumes_from_tail() {
        let mut s = SendStream::new();
        s.write(&[7u8; 100], false).unwrap();
        let plan = s.select_chunks(40, &no_overhead);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].offset, 0);
        assert_eq!(plan.chunks[0].data.len(), 40);
        assert_eq!(plan.send_offset_next, 40);
        s.on_sent(0, &plan);

        let plan = s.select_chunks(40, &no_overhead);
        assert_eq!(plan.chunks[0].offset, 40);
        assert_eq!(plan.send_offset_next, 80);
    }

    #[test]
    fn fin_marked_at_total_size() {
        let mut s = SendStream::new();
        s.write(b"hello", true).unwrap();
        let plan = s.select_chunks(100, &no_overhead);
        assert_eq!(
            plan.chunks,
            vec![StreamChunk {
                offset: 0,
                data: b"hello".to_vec(),
                fin: true
            }]
        );
        s.on_sent(3, &plan);
        assert!(!s.has_pending());
        assert!(s.on_packet_acked(3));
        assert!(s.is_finished());
    }

    #[test]
    fn empty_fin_after_data_was_sent() {
        let mut s = SendStream::new();
        s.write(b"abc", false).unwrap();
        let plan = s.select_chunks(100, &no_overhead);
        s.on_sent(0, &plan);
        s.write(&[], true).unwrap();
        assert!(s.has_pending());

        let plan = s.select_chunks(100, &no_overhead);
        assert_eq!(
            plan.chunks,
            vec![StreamChunk {
                offset: 3,
                data: vec![],
                fin: true
            }]
        );
        s.on_sent(1, &plan);
        s.on_packet_acked(0);
        assert!(!s.is_finished());
        s.on_packet_acked(1);
        assert!(s.is_finished());
    }

    #[test]
    fn lost_ranges_are_sent_again() {
        let mut s = SendStream::new();
        s.write(&[1u8; 30], false).unwrap();
        for pn in 0..3 {
            let plan = s.select_chunks(10, &no_overhead);
            s.on_sent(pn, &plan);
        }
        assert!(!s.has_pending());
        s.on_packet_acked(0);
        s.on_packet_acked(2);
        s.on_packet_lost(1);
        assert_eq!(s.send_offset(), 10);

        let plan = s.select_chunks(100, &no_overhead);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].offset, 10);
        assert_eq!(plan.chunks[0].data.len(), 10);
    }

    #[test]
    fn gap_filled_after_tail() {
        let mut s = SendStream::new();
        s.write(&[1u8; 30], false).unwrap();
        let first = s.select_chunks(10, &no_overhead);
        s.on_sent(0, &first);
        s.on_packet_lost(0);
        // cursor rewound to 0, so the gap is also the tail
        let mut s2 = s.clone();
        let plan = s2.select_chunks(15, &no_overhead);
        assert_eq!(plan.chunks[0].offset, 0);
        assert_eq!(plan.chunks[0].data.len(), 15);
        s2.on_sent(1, &plan);
        assert_eq!(s2.send_offset(), 15);

        // tail first, then the front gap with the remaining budget
        s.write(&[2u8; 10], false).unwrap();
        s.send_offset_next = 30;
        let plan = s.select_chunks(25, &no_overhead);
        assert_eq!(plan.chunks[0].offset, 30);
        assert_eq!(plan.chunks[0].data.len(), 10);
        assert_eq!(plan.chunks[1].offset, 0);
        assert_eq!(plan.chunks[1].data.len(), 15);
        assert_eq!(plan.send_offset_next, 40);
    }

    #[test]
    fn acked_prefix_is_released() {
        let mut s = SendStream::new();
        s.write(&[9u8; 20], false).unwrap();
        let plan = s.select_chunks(20, &no_overhead);
        s.on_sent(0, &plan);
        s.on_packet_acked(0);
        assert_eq!(s.pending_data.len(), 0);
        assert_eq!(s.pending_offset_start, 20);

        s.write(b"xyz", true).unwrap();
        let plan = s.select_chunks(20, &no_overhead);
        assert_eq!(plan.chunks[0].offset, 20);
        assert_eq!(plan.chunks[0].data, b"xyz");
        assert!(plan.chunks[0].fin);
    }

    #[test]
    fn write_appends_behind_partially_acked_data() {
        let mut s = SendStream::new();
        s.write(&[1u8; 10], false).unwrap();
        let plan = s.select_chunks(4, &no_overhead);
        s.on_sent(0, &plan);
        s.on_packet_acked(0);
        assert_eq!(s.pending_offset_start, 4);

        s.write(&[2u8; 5], true).unwrap();
        assert_eq!(s.pending_offset_start, 4);
        assert_eq!(s.pending_data.len(), 11);
        let plan = s.select_chunks(100, &no_overhead);
        assert_eq!(plan.chunks[0].offset, 4);
        assert_eq!(plan.chunks[0].data, [&[1u8; 6][..], &[2u8; 5][..]].concat());
        assert!(plan.chunks[0].fin);
    }

    #[test]
    fn overhead_is_charged() {
        let mut s = SendStream::new();
        s.write(&[0u8; 100], false).unwrap();
        let plan = s.select_chunks(50, &|_, _| 5);
        assert_eq!(plan.data_len(), 45);
    }

    #[test]
    fn write_after_fin_rejected() {
        let mut s = SendStream::new();
        s.write(b"a", true).unwrap();
        assert_eq!(s.write(b"b", false), Err(TransportError::FinalSizeError.into()));
    }

    #[test]
    fn reassembly_out_of_order() {
        let mut r = RecvStream::new();
        assert!(r.insert(5, b"world", true).unwrap());
        assert_eq!(r.readable(), b"");
        assert!(!r.is_complete());
        assert!(r.insert(0, b"hello", false).unwrap());
        assert_eq!(r.readable(), b"helloworld");
        assert!(r.is_complete());

        // duplicate adds nothing
        assert!(!r.insert(0, b"hel", false).unwrap());

        r.consume(7);
        assert_eq!(r.readable(), b"rld");
        assert_eq!(r.from_offset(), 7);
    }

    #[test]
    fn overlapping_chunks_reassemble() {
        let mut r = RecvStream::new();
        r.insert(0, b"abcd", false).unwrap();
        r.insert(2, b"cdef", false).unwrap();
        r.insert(0, b"abcdefgh", false).unwrap();
        assert_eq!(r.readable(), b"abcdefgh");
        r.consume(3);
        assert_eq!(r.readable(), b"defgh");
    }

    #[test]
    fn final_size_violations() {
        let mut r = RecvStream::new();
        r.insert(0, b"abc", true).unwrap();
        assert_eq!(
            r.insert(2, b"cd", false),
            Err(TransportError::FinalSizeError.into())
        );
        let mut r = RecvStream::new();
        r.insert(4, b"efg", false).unwrap();
        assert_eq!(
            r.insert(0, b"ab", true),
            Err(TransportError::FinalSizeError.into())
        );
    }
}
