//! 1-RTT send scheduler.
//!
//! Sending is paced by a rolling one-second window of packet and byte
//! counts plus caps on what may be unacknowledged at once. Each pass
//! builds at most one packet: pending ACK first, then HANDSHAKE_DONE,
//! PATH_RESPONSE, queued DATAGRAMs and finally stream data, with the
//! leftover budget split evenly between streams that have data. A pending
//! ACK still goes out alone when the budget is spent.

use crate::crypto::{Level, TAG_LEN};
use crate::error::Error;
use crate::frame::{self, stream_frame_overhead, AckFrame, Frame, StreamFrame};
use crate::ranges::RangeSet;
use crate::transport::{Instant, MICROS_PER_SEC};
use crate::varint::varint_len;

use super::stream::ChunkPlan;
use super::Connection;

/// ACK frames carry at most this many ranges, newest first.
const MAX_ACK_RANGES: usize = 32;

/// Largest packet number encoding.
const MAX_PN_LEN: usize = 4;

impl Connection {
    /// Run scheduler passes while the send wake-up time has arrived.
    pub(super) fn drive_send(&mut self, now: Instant) {
        if self.keys[Level::Application.index()].is_none() {
            return;
        }
        while !self.is_closed() && self.send_wake.is_some_and(|t| t <= now) {
            self.send_wake = None;
            if let Err(e) = self.prepare_and_send(now) {
                self.close(e);
            }
        }
    }

    fn prepare_and_send(&mut self, now: Instant) -> Result<(), Error> {
        if self.busy {
            return Ok(());
        }
        self.busy = true;
        let result = self.send_one(now);
        self.busy = false;
        result
    }

    fn send_one(&mut self, now: Instant) -> Result<(), Error> {
        let limits = self.limits;
        let space = &mut self.spaces[Level::Application.index()];
        space.prune_history(now.saturating_sub(MICROS_PER_SEC));

        let window_packets = space.history.len();
        let window_bytes: usize = space.history.iter().map(|r| r.size).sum();
        let bytes_left = limits
            .bytes_per_sec
            .saturating_sub(window_bytes)
            .min(limits.max_bytes_in_flight.saturating_sub(space.bytes_in_flight()));
        let allowed = bytes_left.min(limits.max_packet_size);

        if window_packets >= limits.packets_per_sec
            || space.in_flight.len() >= limits.max_packets_in_flight
            || allowed < limits.min_packet_size
        {
            // acknowledgements wake us earlier if the in-flight caps bind
            self.send_wake = space
                .history
                .front()
                .map(|r| r.time_sent + MICROS_PER_SEC)
                .filter(|&t| t > now);
            tracing::trace!(window_packets, window_bytes, wake = ?self.send_wake, "send budget exhausted");
            // ACK-only packets are not ack-eliciting and bypass the caps
            let mut payload = Vec::new();
            self.encode_pending_ack(now, &mut payload)?;
            if !payload.is_empty() {
                self.send_packet(Level::Application, &payload, false)?;
                self.spaces[Level::Application.index()].pending_ack.clear();
            }
            return Ok(());
        }

        let max_room = limits
            .max_packet_size
            .saturating_sub(1 + self.peer_cid.len() + MAX_PN_LEN + TAG_LEN);
        let room = allowed.saturating_sub(1 + self.peer_cid.len() + MAX_PN_LEN + TAG_LEN);
        let mut payload = Vec::with_capacity(room);
        let mut ack_eliciting = false;

        self.encode_pending_ack(now, &mut payload)?;

        let with_handshake_done = self.handshake_done_pending;
        if with_handshake_done {
            frame::encode(&Frame::HandshakeDone, &mut payload)?;
            ack_eliciting = true;
        }
        if let Some(data) = self.path_response.take() {
            frame::encode(&Frame::PathResponse(data), &mut payload)?;
            ack_eliciting = true;
        }

        while let Some(datagram) = self.datagrams.front() {
            let needed = 1 + varint_len(datagram.len() as u64) + datagram.len();
            if needed > max_room {
                tracing::debug!(len = datagram.len(), "datagram too large, dropping");
                self.datagrams.pop_front();
                continue;
            }
            if payload.len() + needed > room {
                break;
            }
            frame::encode(&Frame::Datagram(datagram), &mut payload)?;
            self.datagrams.pop_front();
            ack_eliciting = true;
        }

        let active: Vec<u64> = self
            .send_streams
            .iter()
            .filter(|(_, s)| s.has_pending())
            .map(|(&id, _)| id)
            .collect();
        let mut plans: Vec<(u64, ChunkPlan)> = Vec::new();
        for (i, &id) in active.iter().enumerate() {
            let share = room.saturating_sub(payload.len()) / (active.len() - i);
            let Some(stream) = self.send_streams.get(&id) else {
                continue;
            };
            let plan = stream.select_chunks(share, &|offset, len| stream_frame_overhead(id, offset, len));
            if plan.is_empty() {
                continue;
            }
            for chunk in &plan.chunks {
                frame::encode(
                    &Frame::Stream(StreamFrame {
                        stream_id: id,
                        offset: chunk.offset,
                        data: &chunk.data,
                        fin: chunk.fin,
                    }),
                    &mut payload,
                )?;
            }
            plans.push((id, plan));
        }
        ack_eliciting |= !plans.is_empty();

        if payload.is_empty() {
            return Ok(());
        }

        let pn = self.send_packet(Level::Application, &payload, ack_eliciting)?;
        if with_handshake_done {
            self.handshake_done_pending = false;
            self.handshake_done_pn = Some(pn);
        }
        for (id, plan) in &plans {
            if let Some(stream) = self.send_streams.get_mut(id) {
                stream.on_sent(pn, plan);
            }
        }
        self.spaces[Level::Application.index()].pending_ack.clear();
        self.send_wake = Some(now);
        Ok(())
    }

    fn encode_pending_ack(&self, now: Instant, payload: &mut Vec<u8>) -> Result<(), Error> {
        let space = &self.spaces[Level::Application.index()];
        if space.pending_ack.is_empty() {
            return Ok(());
        }
        let delay = space
            .largest_received
            .and_then(|pn| space.received_at(pn))
            .map_or(0, |t| now.saturating_sub(t))
            >> self.local_ack_delay_exponent;
        if let Some(ack) = AckFrame::from_ranges(&newest_ranges(&space.received), delay) {
            frame::encode(&Frame::Ack(ack), payload)?;
        }
        Ok(())
    }
}

/// The highest `MAX_ACK_RANGES` ranges of `received`.
fn newest_ranges(received: &RangeSet) -> RangeSet {
    let mut out = RangeSet::new();
    for range in received.iter().rev().take(MAX_ACK_RANGES) {
        out.add(range.start, range.end);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_ranges_are_capped() {
        let mut received = RangeSet::new();
        for pn in 0..100 {
            received.add(pn * 2, pn * 2 + 1);
        }
        let newest = newest_ranges(&received);
        assert_eq!(newest.len(), MAX_ACK_RANGES);
        assert_eq!(newest.last(), Some(198..199));
        assert_eq!(newest.first(), Some(136..137));
    }
}
