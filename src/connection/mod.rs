//! QUIC connection state machine, server side.
//!
//! A `Connection` owns everything about one client: the TLS engine, the
//! keys and packet number space of each epoch, CRYPTO and stream buffers
//! and the 1-RTT send scheduler. It is sans-io: datagrams go in through
//! [`Connection::handle_datagram`], and datagrams to send and [`Event`]s
//! come out of [`Connection::poll_transmit`] and
//! [`Connection::poll_event`]. Timers are deadlines reported by
//! [`Connection::poll_timeout`] and serviced by
//! [`Connection::handle_timeout`].

mod handshake;
mod recv;
pub mod rtt;
mod scheduler;
pub mod space;
pub mod stream;

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;

use crate::config::{SendLimits, ServerConfig};
use crate::crypto::sign::SigningKey;
use crate::crypto::{KeyPair, Level};
use crate::error::{Error, TransportError};
use crate::packet::{LongHeader, MAX_CID_LEN};
use crate::tls::TlsServer;
use crate::transport::{Instant, Rng, MICROS_PER_MS};

use self::rtt::RttEstimator;
use self::space::PacketSpace;
use self::stream::{RecvStream, SendStream};

// ---------------------------------------------------------------------------
// ConnectionId
// ---------------------------------------------------------------------------

/// A QUIC connection ID (up to 20 bytes).
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(heapless::Vec<u8, MAX_CID_LEN>);

impl ConnectionId {
    pub fn from_slice(data: &[u8]) -> Result<Self, Error> {
        heapless::Vec::from_slice(data)
            .map(Self)
            .map_err(|_| TransportError::ProtocolViolation.into())
    }

    pub fn generate(rng: &mut dyn Rng, len: usize) -> Self {
        let mut bytes = [0u8; MAX_CID_LEN];
        let len = len.min(MAX_CID_LEN);
        rng.fill(&mut bytes[..len]);
        let mut cid = heapless::Vec::new();
        // cannot fail, len <= MAX_CID_LEN
        let _ = cid.extend_from_slice(&bytes[..len]);
        Self(cid)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.0.iter() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Status and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting,
    /// A 1-RTT packet from the client has been processed.
    Connected,
    Closed,
}

/// Things the layer above has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// ClientHello processed; answer with
    /// [`Connection::install_certificate`].
    CertificateRequested { server_name: Option<String> },
    Connected,
    /// New contiguous data on a receive stream.
    StreamReadable(u64),
    /// Payload of a DATAGRAM frame.
    Datagram(Vec<u8>),
    /// `None` for an idle timeout or a peer close without error.
    Closed { error: Option<Error> },
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

pub struct Connection {
    status: ConnectionStatus,
    version: u32,
    peer_address: SocketAddr,
    local_cid: ConnectionId,
    peer_cid: ConnectionId,
    original_dcid: ConnectionId,

    tls: TlsServer,
    keys: [Option<KeyPair>; 3],
    spaces: [PacketSpace; 3],
    crypto_recv: [RecvStream; 3],
    crypto_send: [SendStream; 3],

    send_streams: BTreeMap<u64, SendStream>,
    recv_streams: BTreeMap<u64, RecvStream>,
    datagrams: VecDeque<Vec<u8>>,
    handshake_done_pending: bool,
    handshake_done_pn: Option<u64>,
    path_response: Option<[u8; 8]>,

    rtt: RttEstimator,
    limits: SendLimits,
    local_ack_delay_exponent: u64,
    stream_check_delay: u64,
    /// `None` when the idle timer is disabled.
    idle_timeout: Option<u64>,

    /// Scheduler re-entry guard.
    busy: bool,
    send_wake: Option<Instant>,
    stream_check_at: Option<Instant>,
    idle_deadline: Option<Instant>,
    /// Latest time seen from the caller.
    now: Instant,

    transmits: VecDeque<Vec<u8>>,
    events: VecDeque<Event>,
}

impl core::fmt::Debug for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status)
            .field("local_cid", &self.local_cid)
            .field("peer", &self.peer_address)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Set up a connection for the client Initial carrying `header`.
    pub fn accept(
        config: &ServerConfig,
        header: &LongHeader<'_>,
        peer_address: SocketAddr,
        now: Instant,
        rng: &mut dyn Rng,
    ) -> Result<Self, Error> {
        let original_dcid = ConnectionId::from_slice(header.dcid)?;
        let peer_cid = ConnectionId::from_slice(header.scid)?;
        let local_cid = ConnectionId::generate(rng, config.cid_len);

        let mut params = config.transport_params.clone();
        params.original_destination_connection_id = Some(original_dcid.as_slice().to_vec());
        params.initial_source_connection_id = Some(local_cid.as_slice().to_vec());
        let mut token = [0u8; 16];
        rng.fill(&mut token);
        params.stateless_reset_token = Some(token);
        let idle_timeout =
            (params.max_idle_timeout > 0).then(|| params.max_idle_timeout * MICROS_PER_MS);
        let local_ack_delay_exponent = params.ack_delay_exponent;

        let initial = KeyPair::initial(original_dcid.as_slice())?;
        tracing::debug!(
            odcid = %original_dcid,
            cid = %local_cid,
            peer = %peer_address,
            "accepting connection"
        );

        Ok(Self {
            status: ConnectionStatus::Connecting,
            version: header.version,
            peer_address,
            local_cid,
            peer_cid,
            original_dcid,
            tls: TlsServer::new(config.alpn.clone(), params),
            keys: [Some(initial), None, None],
            spaces: Default::default(),
            crypto_recv: Default::default(),
            crypto_send: Default::default(),
            send_streams: BTreeMap::new(),
            recv_streams: BTreeMap::new(),
            datagrams: VecDeque::new(),
            handshake_done_pending: false,
            handshake_done_pn: None,
            path_response: None,
            rtt: RttEstimator::new(),
            limits: config.limits,
            local_ack_delay_exponent,
            stream_check_delay: config.stream_check_delay,
            idle_timeout,
            busy: false,
            send_wake: None,
            stream_check_at: None,
            idle_deadline: idle_timeout.map(|t| now + t),
            now,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        })
    }

    // -- accessors ----------------------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_closed(&self) -> bool {
        self.status == ConnectionStatus::Closed
    }

    pub fn local_cid(&self) -> &ConnectionId {
        &self.local_cid
    }

    pub fn original_dcid(&self) -> &ConnectionId {
        &self.original_dcid
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.peer_address
    }

    pub fn server_name(&self) -> Option<&str> {
        self.tls.server_name()
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.tls.alpn()
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn send_stream(&self, stream_id: u64) -> Option<&SendStream> {
        self.send_streams.get(&stream_id)
    }

    pub fn recv_stream(&self, stream_id: u64) -> Option<&RecvStream> {
        self.recv_streams.get(&stream_id)
    }

    /// Packet numbers of 1-RTT packets awaiting acknowledgement.
    pub fn packets_in_flight(&self) -> impl Iterator<Item = u64> + '_ {
        self.spaces[Level::Application.index()].in_flight.keys().copied()
    }

    // -- application operations ---------------------------------------------

    /// Answer [`Event::CertificateRequested`] and continue the handshake.
    pub fn install_certificate<C: AsRef<[u8]>>(
        &mut self,
        chain: &[C],
        key: &SigningKey,
    ) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if let Err(e) = self
            .tls
            .install_certificate(chain, key)
            .and_then(|()| self.process_tls_events())
        {
            if matches!(e, Error::Handshake(_)) {
                self.close(e.clone());
            }
            return Err(e);
        }
        self.flush_handshake()
    }

    /// Queue bytes on a stream. They go out on the next scheduler pass.
    pub fn stream_write(&mut self, stream_id: u64, data: &[u8], fin: bool) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.send_streams
            .entry(stream_id)
            .or_default()
            .write(data, fin)?;
        self.wake_scheduler();
        Ok(())
    }

    /// Queue a DATAGRAM frame payload.
    pub fn send_datagram(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        if self.status != ConnectionStatus::Connected {
            return Err(Error::InvalidState);
        }
        self.datagrams.push_back(payload);
        self.wake_scheduler();
        Ok(())
    }

    /// Everything up to the reader's position has been consumed.
    pub fn consume_stream(&mut self, stream_id: u64, offset: u64) {
        if let Some(stream) = self.recv_streams.get_mut(&stream_id) {
            stream.consume(offset);
        }
    }

    /// Forget a receive stream the reader is done with.
    pub fn finish_recv_stream(&mut self, stream_id: u64) {
        self.recv_streams.remove(&stream_id);
    }

    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    // -- timers --------------------------------------------------------------

    fn wake_scheduler(&mut self) {
        let now = self.now;
        self.send_wake = Some(self.send_wake.map_or(now, |t| t.min(now)));
    }

    /// Earliest deadline at which [`Connection::handle_timeout`] has work.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.is_closed() {
            return None;
        }
        let pto = self.rtt.pto();
        let loss = self
            .spaces
            .iter()
            .filter_map(PacketSpace::oldest_in_flight)
            .map(|t| t + pto)
            .min();
        [
            self.idle_deadline,
            self.stream_check_at,
            self.send_wake,
            loss,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        if self.is_closed() {
            return;
        }
        self.now = now;

        if self.idle_deadline.is_some_and(|t| now >= t) {
            tracing::debug!(cid = %self.local_cid, "idle timeout");
            self.status = ConnectionStatus::Closed;
            self.events.push_back(Event::Closed { error: None });
            return;
        }

        if self.stream_check_at.is_some_and(|t| t <= now) {
            self.stream_check_at = None;
            self.check_streams();
        }

        self.detect_lost(now);
        if let Err(e) = self.flush_handshake() {
            self.close(e);
            return;
        }
        if self.send_wake.is_some_and(|t| t <= now) {
            self.drive_send(now);
        }
    }

    /// Send whatever the scheduler allows right now.
    pub fn flush(&mut self, now: Instant) {
        if self.is_closed() {
            return;
        }
        self.now = now;
        self.drive_send(now);
    }

    fn check_streams(&mut self) {
        for (&id, stream) in self.recv_streams.iter_mut() {
            if stream.need_check {
                stream.need_check = false;
                self.events.push_back(Event::StreamReadable(id));
            }
        }
    }

    /// Requeue the contents of packets older than one probe timeout.
    fn detect_lost(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.rtt.pto()) else {
            return;
        };
        for level in Level::ALL {
            let lost = self.spaces[level.index()].take_lost(cutoff);
            if lost.is_empty() {
                continue;
            }
            tracing::debug!(?level, packets = lost.len(), "probe timeout, requeueing");
            for pn in lost {
                if level == Level::Application {
                    for stream in self.send_streams.values_mut() {
                        stream.on_packet_lost(pn);
                    }
                    if self.handshake_done_pn == Some(pn) {
                        self.handshake_done_pn = None;
                        self.handshake_done_pending = true;
                    }
                } else {
                    self.crypto_send[level.index()].on_packet_lost(pn);
                }
            }
            if level == Level::Application {
                self.wake_scheduler();
            }
        }
    }

    // -- closing -------------------------------------------------------------

    /// Close with CONNECTION_CLOSE and report `error`.
    pub fn close(&mut self, error: Error) {
        if self.is_closed() {
            return;
        }
        tracing::debug!(cid = %self.local_cid, %error, "closing connection");
        let (is_application, code) = match &error {
            Error::Http3(e) => (true, e.to_code()),
            other => (false, other.close_code()),
        };
        let levels: &[Level] = if self.status == ConnectionStatus::Connected {
            &[Level::Application]
        } else {
            &[Level::Initial, Level::Handshake]
        };
        for &level in levels {
            // application closes are only allowed in 1-RTT packets
            let (is_application, code) = if level == Level::Application || !is_application {
                (is_application, code)
            } else {
                (false, TransportError::ApplicationError.to_code())
            };
            if let Err(e) = self.send_connection_close(level, is_application, code) {
                tracing::trace!(?level, error = %e, "could not send CONNECTION_CLOSE");
            }
        }
        self.status = ConnectionStatus::Closed;
        self.events.push_back(Event::Closed { error: Some(error) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SystemRng;

    #[test]
    fn connection_id_basics() {
        let cid = ConnectionId::from_slice(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(cid.len(), 4);
        assert_eq!(format!("{cid}"), "deadbeef");
        assert!(ConnectionId::from_slice(&[0; 21]).is_err());

        let generated = ConnectionId::generate(&mut SystemRng, 8);
        assert_eq!(generated.len(), 8);
        assert!(ConnectionId::default().is_empty());
    }
}
