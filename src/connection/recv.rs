//! Receive path: packet decryption and frame dispatch.

use crate::crypto::Level;
use crate::error::{Error, TransportError};
use crate::frame::{ack_info_to_ranges, parse_frames, AckFrame, Frame, StreamFrame};
use crate::packet::{open_packet, parse_header, CoalescedPackets, PacketHeader, PacketType};
use crate::transport::{Instant, Rng};

use super::rtt::RttSample;
use super::{Connection, ConnectionId, ConnectionStatus, Event};

/// Used until the client's transport parameters say otherwise.
const DEFAULT_ACK_DELAY_EXPONENT: u64 = 3;

impl Connection {
    /// Process one UDP datagram from the peer.
    ///
    /// Undecryptable and malformed packets are dropped. Protocol errors
    /// in a decrypted packet close the connection.
    pub fn handle_datagram(&mut self, now: Instant, datagram: &[u8], rng: &mut dyn Rng) {
        if self.is_closed() {
            return;
        }
        self.now = now;

        for packet in CoalescedPackets::new(datagram) {
            let result = match packet {
                Ok(packet) => self.handle_packet(now, packet, rng),
                Err(e) => {
                    tracing::trace!(error = %e, "dropping malformed packet");
                    break;
                }
            };
            if let Err(e) = result {
                self.close(e);
                return;
            }
            if self.is_closed() {
                return;
            }
        }

        self.check_connected();
        if let Err(e) = self.flush_handshake() {
            self.close(e);
            return;
        }
        self.drive_send(now);
    }

    fn handle_packet(&mut self, now: Instant, packet: &[u8], rng: &mut dyn Rng) -> Result<(), Error> {
        let (header, pn_offset) = match parse_header(packet, self.local_cid.len()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::trace!(error = %e, "dropping packet with bad header");
                return Ok(());
            }
        };
        let level = match &header {
            PacketHeader::Long(long) => {
                if long.version != self.version {
                    tracing::trace!(version = long.version, "dropping packet of another version");
                    return Ok(());
                }
                match long.packet_type.level() {
                    Some(level) => level,
                    None => {
                        tracing::trace!(packet_type = ?long.packet_type, "ignoring packet");
                        return Ok(());
                    }
                }
            }
            PacketHeader::Short(_) => Level::Application,
            PacketHeader::VersionNegotiation { .. } => return Ok(()),
        };

        let Some(keys) = self.keys[level.index()].as_ref() else {
            tracing::trace!(?level, "no keys for packet, dropping");
            return Ok(());
        };
        let space = &mut self.spaces[level.index()];
        let opened = match open_packet(&keys.read, packet, pn_offset, space.expected_pn()) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::trace!(?level, error = %e, "could not decrypt packet");
                return Ok(());
            }
        };
        let pn = opened.packet_number;
        if !space.on_received(pn, now, packet.len()) {
            tracing::trace!(?level, pn, "duplicate packet");
            return Ok(());
        }
        tracing::trace!(?level, pn, len = packet.len(), "packet received");

        if let PacketHeader::Long(long) = &header {
            if long.packet_type == PacketType::Initial && long.scid != self.peer_cid.as_slice() {
                self.peer_cid = ConnectionId::from_slice(long.scid)?;
            }
        }
        self.idle_deadline = self.idle_timeout.map(|t| now + t);

        let mut ack_eliciting = false;
        for frame in parse_frames(&opened.payload) {
            ack_eliciting |= frame.is_ack_eliciting();
            self.on_frame(level, frame, now, rng)?;
            if self.is_closed() {
                return Ok(());
            }
        }

        // keys may be gone if this packet completed the handshake
        if ack_eliciting && self.keys[level.index()].is_some() {
            self.spaces[level.index()].pending_ack.add(pn, pn + 1);
            if level == Level::Application {
                self.wake_scheduler();
            }
        }
        // the client has our ServerHello once it sends Handshake packets
        if level == Level::Handshake {
            self.discard_keys(Level::Initial);
        }
        Ok(())
    }

    fn on_frame(
        &mut self,
        level: Level,
        frame: Frame<'_>,
        now: Instant,
        rng: &mut dyn Rng,
    ) -> Result<(), Error> {
        if level != Level::Application
            && !matches!(
                frame,
                Frame::Padding(_)
                    | Frame::Ping
                    | Frame::Ack(_)
                    | Frame::Crypto(_)
                    | Frame::ConnectionClose(_)
            )
        {
            tracing::debug!(?level, ?frame, "frame not allowed in handshake packet");
            return Err(TransportError::ProtocolViolation.into());
        }

        match frame {
            Frame::Padding(_) | Frame::Ping | Frame::ImmediateAck => {}
            Frame::Ack(ack) => self.on_ack(level, &ack, now)?,
            Frame::Crypto(crypto) => self.on_crypto(level, crypto.offset, crypto.data, rng)?,
            Frame::Stream(stream) => self.on_stream(&stream, now)?,
            Frame::Datagram(data) => self.events.push_back(Event::Datagram(data.to_vec())),
            Frame::ResetStream(reset) => {
                tracing::debug!(stream_id = reset.stream_id, code = reset.error_code, "stream reset by peer");
                self.recv_streams.remove(&reset.stream_id);
            }
            Frame::StopSending(stop) => {
                tracing::debug!(stream_id = stop.stream_id, code = stop.error_code, "peer stopped reading");
                self.send_streams.remove(&stop.stream_id);
            }
            Frame::PathChallenge(data) => {
                self.path_response = Some(data);
                self.wake_scheduler();
            }
            Frame::ConnectionClose(close) => {
                tracing::debug!(
                    code = close.error_code,
                    application = close.is_application,
                    reason = %String::from_utf8_lossy(close.reason),
                    "closed by peer"
                );
                let error = peer_close_error(close.is_application, close.error_code);
                self.status = ConnectionStatus::Closed;
                self.events.push_back(Event::Closed { error });
            }
            Frame::HandshakeDone | Frame::NewToken(_) => {
                return Err(TransportError::ProtocolViolation.into());
            }
            other => tracing::trace!(frame = ?other, "ignoring frame"),
        }
        Ok(())
    }

    fn on_stream(&mut self, frame: &StreamFrame<'_>, now: Instant) -> Result<(), Error> {
        let id = frame.stream_id;
        // bit 0: server initiated, bit 1: unidirectional
        let locally_unopened = id & 0x3 == 0x1 && !self.send_streams.contains_key(&id);
        if id & 0x3 == 0x3 || locally_unopened {
            return Err(TransportError::StreamStateError.into());
        }
        let stream = self.recv_streams.entry(id).or_default();
        if !stream.insert(frame.offset, frame.data, frame.fin)? {
            return Ok(());
        }
        if stream.is_complete() {
            stream.need_check = false;
            self.events.push_back(Event::StreamReadable(id));
        } else {
            let at = now + self.stream_check_delay;
            self.stream_check_at = Some(self.stream_check_at.map_or(at, |t| t.min(at)));
        }
        Ok(())
    }

    fn on_ack(&mut self, level: Level, ack: &AckFrame, now: Instant) -> Result<(), Error> {
        let acked = ack_info_to_ranges(ack)?;
        let space = &mut self.spaces[level.index()];
        if ack.largest >= space.peek_pn() {
            return Err(TransportError::ProtocolViolation.into());
        }
        let newly = space.on_ack(&acked);

        if level != Level::Application {
            for pn in newly {
                self.crypto_send[level.index()].on_packet_acked(pn);
            }
            return Ok(());
        }

        self.sample_rtt(ack, now);
        for &pn in &newly {
            for stream in self.send_streams.values_mut() {
                stream.on_packet_acked(pn);
            }
            if self.handshake_done_pn == Some(pn) {
                self.handshake_done_pn = None;
            }
        }
        self.send_streams.retain(|id, stream| {
            let done = stream.is_finished();
            if done {
                tracing::trace!(stream_id = id, "send stream finished");
            }
            !done
        });
        if !newly.is_empty() {
            self.wake_scheduler();
        }
        Ok(())
    }

    /// Measure against the largest acknowledged packet. The peer's ack
    /// delay is removed from the arrival time.
    fn sample_rtt(&mut self, ack: &AckFrame, now: Instant) {
        let space = &self.spaces[Level::Application.index()];
        let Some(sent_at) = space
            .history
            .iter()
            .find(|r| r.packet_number == ack.largest)
            .map(|r| r.time_sent)
        else {
            return;
        };
        let exponent = self
            .tls
            .peer_transport_params()
            .map_or(DEFAULT_ACK_DELAY_EXPONENT, |p| p.ack_delay_exponent);
        let ack_delay = ack.delay.checked_shl(exponent as u32).unwrap_or(0);
        let received_at = now.saturating_sub(ack_delay).max(sent_at);

        let (sent_packets, sent_bytes) = space
            .history
            .iter()
            .filter(|r| r.time_sent >= sent_at && r.time_sent <= received_at)
            .fold((0, 0), |(n, b), r| (n + 1, b + r.size));
        let (received_packets, received_bytes) = space
            .recv_history
            .iter()
            .filter(|r| r.time_received >= sent_at && r.time_received <= received_at)
            .fold((0, 0), |(n, b), r| (n + 1, b + r.size));

        self.rtt.push(RttSample {
            sent_at,
            received_at,
            sent_bytes,
            sent_packets,
            received_bytes,
            received_packets,
            rtt: received_at - sent_at,
        });
    }
}

fn peer_close_error(is_application: bool, code: u64) -> Option<Error> {
    if is_application {
        // H3_NO_ERROR
        (code != 0x0100).then_some(Error::Transport(TransportError::ApplicationError))
    } else {
        match TransportError::from_code(code) {
            Some(TransportError::NoError) => None,
            Some(e) => Some(e.into()),
            None => Some(TransportError::ProtocolViolation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_close_codes() {
        assert_eq!(peer_close_error(false, 0), None);
        assert_eq!(peer_close_error(true, 0x0100), None);
        assert_eq!(
            peer_close_error(false, 0x0a),
            Some(Error::Transport(TransportError::ProtocolViolation))
        );
        assert_eq!(
            peer_close_error(true, 0x0101),
            Some(Error::Transport(TransportError::ApplicationError))
        );
    }
}
