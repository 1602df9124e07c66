//! Handshake epochs: CRYPTO reassembly, TLS events and Initial/Handshake
//! packet assembly.

use crate::crypto::{KeyPair, Level};
use crate::error::{Error, TransportError};
use crate::frame::{self, AckFrame, ConnectionCloseFrame, CryptoFrame, Frame};
use crate::packet::{build_packet, OutgoingHeader, PacketType, MIN_INITIAL_PACKET_SIZE};
use crate::tls::messages::{read_handshake_header, HANDSHAKE_HEADER_LEN};
use crate::tls::TlsEvent;
use crate::transport::{Rng, MICROS_PER_MS};
use crate::varint::varint_len;

use super::{Connection, ConnectionStatus, Event};

/// Unconsumed CRYPTO data allowed per epoch.
const MAX_CRYPTO_BUFFER: u64 = 64 * 1024;

/// Payload budget of one Initial or Handshake packet, leaving room for
/// the long header and AEAD tag inside a 1200 byte datagram.
const MAX_HANDSHAKE_PAYLOAD: usize = 1100;

fn crypto_frame_overhead(offset: u64, len: usize) -> usize {
    1 + varint_len(offset) + varint_len(len as u64)
}

impl Connection {
    /// Store CRYPTO data and feed every complete handshake message to TLS.
    pub(super) fn on_crypto(
        &mut self,
        level: Level,
        offset: u64,
        data: &[u8],
        rng: &mut dyn Rng,
    ) -> Result<(), Error> {
        let buffer = &mut self.crypto_recv[level.index()];
        if offset + data.len() as u64 > buffer.from_offset() + MAX_CRYPTO_BUFFER {
            return Err(TransportError::CryptoBufferExceeded.into());
        }
        if !buffer.insert(offset, data, false)? {
            return Ok(());
        }

        loop {
            let buffer = &mut self.crypto_recv[level.index()];
            let readable = buffer.readable();
            let Some((_, body_len)) = read_handshake_header(&readable) else {
                break;
            };
            let total = HANDSHAKE_HEADER_LEN + body_len;
            if readable.len() < total {
                break;
            }
            buffer.consume(buffer.from_offset() + total as u64);
            self.tls.read_handshake(level, &readable[..total], rng)?;
        }
        self.process_tls_events()
    }

    pub(super) fn process_tls_events(&mut self) -> Result<(), Error> {
        while let Some(event) = self.tls.poll_event() {
            match event {
                TlsEvent::Send { level, data } => {
                    self.crypto_send[level.index()].write(&data, false)?;
                }
                TlsEvent::Secrets {
                    level,
                    suite,
                    secrets,
                } => {
                    tracing::trace!(?level, ?suite, "installing keys");
                    self.keys[level.index()] =
                        Some(KeyPair::from_secrets(suite, &secrets.client, &secrets.server)?);
                }
                TlsEvent::CertificateRequested { server_name } => {
                    self.events
                        .push_back(Event::CertificateRequested { server_name });
                }
                TlsEvent::Complete => {
                    tracing::debug!(cid = %self.local_cid, alpn = ?self.tls.alpn(), "handshake complete");
                }
            }
        }
        Ok(())
    }

    /// The handshake is done once TLS finished and the client has sent
    /// 1-RTT data. Queues HANDSHAKE_DONE and drops handshake keys.
    pub(super) fn check_connected(&mut self) {
        if self.status != ConnectionStatus::Connecting || !self.tls.is_complete() {
            return;
        }
        if self.spaces[Level::Application.index()]
            .largest_received
            .is_none()
        {
            return;
        }
        self.status = ConnectionStatus::Connected;
        self.handshake_done_pending = true;
        // the smaller of the two advertised idle timeouts applies
        if let Some(peer) = self
            .tls
            .peer_transport_params()
            .map(|p| p.max_idle_timeout * MICROS_PER_MS)
            .filter(|&t| t > 0)
        {
            self.idle_timeout = Some(self.idle_timeout.map_or(peer, |t| t.min(peer)));
            self.idle_deadline = self.idle_timeout.map(|t| self.now + t);
        }
        for level in [Level::Initial, Level::Handshake] {
            self.discard_keys(level);
        }
        self.tls.discard_handshake_state();
        self.events.push_back(Event::Connected);
        self.wake_scheduler();
    }

    pub(super) fn discard_keys(&mut self, level: Level) {
        if self.keys[level.index()].take().is_some() {
            tracing::trace!(?level, "discarding keys");
            self.spaces[level.index()].discard();
            self.crypto_send[level.index()] = Default::default();
            self.crypto_recv[level.index()] = Default::default();
        }
    }

    pub(super) fn flush_handshake(&mut self) -> Result<(), Error> {
        self.flush_handshake_level(Level::Initial)?;
        self.flush_handshake_level(Level::Handshake)
    }

    /// Send pending ACKs and CRYPTO data of one handshake epoch.
    fn flush_handshake_level(&mut self, level: Level) -> Result<(), Error> {
        if self.keys[level.index()].is_none() {
            return Ok(());
        }
        loop {
            let mut payload = Vec::new();
            let space = &mut self.spaces[level.index()];
            if !space.pending_ack.is_empty() {
                if let Some(ack) = AckFrame::from_ranges(&space.received, 0) {
                    frame::encode(&Frame::Ack(ack), &mut payload)?;
                }
                space.pending_ack.clear();
            }

            let budget = MAX_HANDSHAKE_PAYLOAD.saturating_sub(payload.len());
            let plan = self.crypto_send[level.index()].select_chunks(budget, &crypto_frame_overhead);
            for chunk in &plan.chunks {
                frame::encode(
                    &Frame::Crypto(CryptoFrame {
                        offset: chunk.offset,
                        data: &chunk.data,
                    }),
                    &mut payload,
                )?;
            }
            if payload.is_empty() {
                return Ok(());
            }

            let ack_eliciting = !plan.is_empty();
            let pn = self.send_packet(level, &payload, ack_eliciting)?;
            if !ack_eliciting {
                return Ok(());
            }
            self.crypto_send[level.index()].on_sent(pn, &plan);
        }
    }

    /// Seal `payload` into a packet at `level` and queue it.
    /// Returns the packet number used.
    pub(super) fn send_packet(
        &mut self,
        level: Level,
        payload: &[u8],
        ack_eliciting: bool,
    ) -> Result<u64, Error> {
        let keys = self.keys[level.index()]
            .as_ref()
            .ok_or(Error::InvalidState)?;
        let space = &mut self.spaces[level.index()];
        let pn = space.take_pn();
        let min_size = if level == Level::Initial && ack_eliciting {
            MIN_INITIAL_PACKET_SIZE
        } else {
            0
        };
        let header = OutgoingHeader {
            packet_type: PacketType::for_level(level),
            version: self.version,
            dcid: self.peer_cid.as_slice(),
            scid: self.local_cid.as_slice(),
        };
        let packet = build_packet(&header, &keys.write, pn, space.largest_acked, payload, min_size)?;
        space.on_sent(pn, self.now, packet.len(), ack_eliciting);
        tracing::trace!(?level, pn, len = packet.len(), "packet sent");
        self.transmits.push_back(packet);
        Ok(pn)
    }

    pub(super) fn send_connection_close(
        &mut self,
        level: Level,
        is_application: bool,
        error_code: u64,
    ) -> Result<(), Error> {
        let mut payload = Vec::new();
        frame::encode(
            &Frame::ConnectionClose(ConnectionCloseFrame {
                is_application,
                error_code,
                frame_type: 0,
                reason: &[],
            }),
            &mut payload,
        )?;
        self.send_packet(level, &payload, false).map(drop)
    }
}
