//! A hand-driven QUIC client for talking to [`Server`] in tests.
//!
//! It speaks just enough of the protocol to get through a handshake with
//! one x25519 key share and AES-128-GCM, then sends STREAM, DATAGRAM and
//! ACK frames in 1-RTT packets. Server flights are decrypted and sorted
//! into per-stream buffers the tests inspect.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;

use quico::connection::stream::RecvStream;
use quico::crypto::sign::SigningKey;
use quico::crypto::{CipherSuite, KeyPair, Level, PacketKeys};
use quico::frame::{self, parse_frames, AckFrame, CryptoFrame, Frame, StreamFrame};
use quico::h3::frame as h3_frame;
use quico::h3::qpack::{self, Decoded, DynamicTable, MAX_TABLE_CAPACITY};
use quico::h3::H3Frame;
use quico::packet::{
    build_packet, open_packet, parse_header, CoalescedPackets, OutgoingHeader, PacketHeader,
    PacketType, MIN_INITIAL_PACKET_SIZE, QUIC_VERSION_1,
};
use quico::ranges::RangeSet;
use quico::server::{CertifiedKey, DatagramSender};
use quico::tls::messages::{self, ClientHello, KeyShareEntry};
use quico::tls::{TlsKeySchedule, TrafficSecrets, Transcript, TransportParams};
use quico::varint::write_varint;
use quico::{Command, ConnectionId, Instant, Rng};

// ---------------------------------------------------------------------------
// Shared fixtures
// ---------------------------------------------------------------------------

pub const T0: Instant = 1_000_000;

pub struct TestRng(pub u8);

impl Rng for TestRng {
    fn fill(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.0;
            self.0 = self.0.wrapping_add(1);
        }
    }
}

pub fn client_addr() -> SocketAddr {
    "192.0.2.10:50000".parse().unwrap()
}

/// Self-signed ECDSA P-256 certificate for `localhost`.
pub fn test_certificate() -> CertifiedKey {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    CertifiedKey {
        chain: vec![generated.cert.der().to_vec()],
        key: SigningKey::from_pkcs8_der(&generated.key_pair.serialize_der()).unwrap(),
    }
}

/// Collects whatever `dispatch` sends.
#[derive(Debug, Default)]
pub struct Outbox(pub Vec<(SocketAddr, Vec<u8>)>);

impl DatagramSender for Outbox {
    fn send_to(&mut self, to: SocketAddr, bytes: &[u8]) -> std::io::Result<()> {
        self.0.push((to, bytes.to_vec()));
        Ok(())
    }
}

/// Feed every Transmit addressed to `client` into it and return the
/// other commands. Datagrams for other addresses are dropped.
pub fn deliver(client: &mut TestClient, commands: Vec<Command>) -> Vec<Command> {
    let mut rest = Vec::new();
    for command in commands {
        match command {
            Command::Transmit { to, bytes } => {
                if to == client.addr {
                    client.receive(&bytes);
                }
            }
            other => rest.push(other),
        }
    }
    rest
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct Keys {
    seal: PacketKeys,
    open: PacketKeys,
}

/// What one received 1-RTT packet carried, for ACK bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedStreamData {
    pub packet_number: u64,
    pub stream_id: u64,
    pub offset: u64,
    pub len: usize,
}

pub struct TestClient {
    pub addr: SocketAddr,
    pub original_dcid: Vec<u8>,
    /// The server's connection ID once its first packet arrived.
    pub server_cid: Option<Vec<u8>>,
    pub scid: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    secret: x25519_dalek::StaticSecret,
    hello: Vec<u8>,

    keys: [Option<Keys>; 3],
    next_pn: [u64; 3],
    received: [RangeSet; 3],
    crypto: [RecvStream; 3],

    key_schedule: Option<TlsKeySchedule>,
    transcript: Option<Transcript>,
    handshake_secrets: Option<TrafficSecrets>,
    pub handshake_finished: bool,

    pub streams: BTreeMap<u64, RecvStream>,
    pub stream_log: Vec<ReceivedStreamData>,
    /// Frames of every decrypted 1-RTT packet, by packet number.
    pub packets: Vec<(u64, Vec<Frame<'static>>)>,
    pub datagrams: Vec<Vec<u8>>,
    pub handshake_done: bool,
    pub close: Option<(bool, u64)>,
    outgoing: Vec<Vec<u8>>,
}

impl TestClient {
    pub fn new(seed: u8) -> Self {
        Self {
            addr: client_addr(),
            original_dcid: vec![seed; 8],
            server_cid: None,
            scid: vec![seed.wrapping_add(1); 8],
            cipher_suites: vec![0x1301],
            secret: x25519_dalek::StaticSecret::from([seed.wrapping_add(2); 32]),
            hello: Vec::new(),
            keys: [None, None, None],
            next_pn: [0; 3],
            received: [RangeSet::new(), RangeSet::new(), RangeSet::new()],
            crypto: Default::default(),
            key_schedule: None,
            transcript: None,
            handshake_secrets: None,
            handshake_finished: false,
            streams: BTreeMap::new(),
            stream_log: Vec::new(),
            packets: Vec::new(),
            datagrams: Vec::new(),
            handshake_done: false,
            close: None,
            outgoing: Vec::new(),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        *x25519_dalek::PublicKey::from(&self.secret).as_bytes()
    }

    pub fn client_hello(&self) -> Vec<u8> {
        let mut params = Vec::new();
        TransportParams {
            max_idle_timeout: 30_000,
            initial_source_connection_id: Some(self.scid.clone()),
            max_datagram_frame_size: Some(65_536),
            ..TransportParams::default()
        }
        .encode(&mut params)
        .unwrap();

        ClientHello {
            random: [7; 32],
            session_id: vec![],
            cipher_suites: self.cipher_suites.clone(),
            supported_versions: vec![0x0304],
            supported_groups: vec![0x001d],
            signature_algorithms: vec![0x0403, 0x0807, 0x0804],
            alpn: vec![b"h3".to_vec()],
            key_shares: vec![KeyShareEntry {
                group: 0x001d,
                key_exchange: self.public_key().to_vec(),
            }],
            server_name: Some("localhost".into()),
            transport_params: Some(params),
        }
        .encode()
    }

    /// The first datagram: an Initial carrying the ClientHello.
    pub fn initial_datagram(&mut self) -> Vec<u8> {
        let initial = KeyPair::initial(&self.original_dcid).unwrap();
        self.keys[Level::Initial.index()] = Some(Keys {
            seal: initial.read,
            open: initial.write,
        });
        self.hello = self.client_hello();

        let mut payload = Vec::new();
        frame::encode(
            &Frame::Crypto(CryptoFrame {
                offset: 0,
                data: &self.hello,
            }),
            &mut payload,
        )
        .unwrap();
        self.seal(Level::Initial, &payload, MIN_INITIAL_PACKET_SIZE)
    }

    /// Decrypt the Initial packet this client would send, as the server sees it.
    pub fn open_own_initial(&self, datagram: &[u8]) -> Vec<u8> {
        let (header, pn_offset) = parse_header(datagram, 8).unwrap();
        let PacketHeader::Long(long) = header else {
            panic!("expected a long header");
        };
        let end = pn_offset + long.length;
        let server_view = KeyPair::initial(&self.original_dcid).unwrap();
        open_packet(&server_view.read, &datagram[..end], pn_offset, 0)
            .unwrap()
            .payload
    }

    fn seal(&mut self, level: Level, payload: &[u8], min_size: usize) -> Vec<u8> {
        let dcid = self
            .server_cid
            .clone()
            .unwrap_or_else(|| self.original_dcid.clone());
        let header = OutgoingHeader {
            packet_type: PacketType::for_level(level),
            version: QUIC_VERSION_1,
            dcid: &dcid,
            scid: &self.scid,
        };
        let pn = self.next_pn[level.index()];
        self.next_pn[level.index()] += 1;
        let keys = self.keys[level.index()].as_ref().expect("keys for level");
        build_packet(&header, &keys.seal, pn, None, payload, min_size).unwrap()
    }

    /// Datagrams queued by the handshake (the client Finished).
    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outgoing)
    }

    /// Process one datagram from the server.
    pub fn receive(&mut self, datagram: &[u8]) {
        for packet in CoalescedPackets::new(datagram) {
            let Ok(packet) = packet else { break };
            self.receive_packet(packet);
        }
        self.advance_handshake();
    }

    fn receive_packet(&mut self, packet: &[u8]) {
        let (header, pn_offset) = parse_header(packet, self.scid.len()).unwrap();
        let level = match &header {
            PacketHeader::Long(long) => {
                if self.server_cid.is_none() {
                    self.server_cid = Some(long.scid.to_vec());
                }
                long.packet_type.level().unwrap()
            }
            PacketHeader::Short(_) => Level::Application,
            PacketHeader::VersionNegotiation { .. } => panic!("unexpected version negotiation"),
        };
        let Some(keys) = self.keys[level.index()].as_ref() else {
            return;
        };
        let expected = self.received[level.index()].last().map_or(0, |r| r.end);
        let opened = open_packet(&keys.open, packet, pn_offset, expected).unwrap();
        let pn = opened.packet_number;
        self.received[level.index()].add(pn, pn + 1);

        let mut kept = Vec::new();
        for frame in parse_frames(&opened.payload) {
            match &frame {
                Frame::Crypto(crypto) => {
                    self.crypto[level.index()]
                        .insert(crypto.offset, crypto.data, false)
                        .unwrap();
                }
                Frame::Stream(stream) => {
                    self.stream_log.push(ReceivedStreamData {
                        packet_number: pn,
                        stream_id: stream.stream_id,
                        offset: stream.offset,
                        len: stream.data.len(),
                    });
                    self.streams
                        .entry(stream.stream_id)
                        .or_default()
                        .insert(stream.offset, stream.data, stream.fin)
                        .unwrap();
                }
                Frame::Datagram(data) => self.datagrams.push(data.to_vec()),
                Frame::HandshakeDone => self.handshake_done = true,
                Frame::ConnectionClose(close) => {
                    self.close = Some((close.is_application, close.error_code));
                }
                _ => {}
            }
            if level == Level::Application {
                kept.push(into_owned(frame));
            }
        }
        if level == Level::Application {
            self.packets.push((pn, kept));
        }
    }

    fn advance_handshake(&mut self) {
        if self.key_schedule.is_none() {
            let data = self.crypto[Level::Initial.index()].readable();
            let Some((_, len)) = messages::read_handshake_header(&data) else {
                return;
            };
            if data.len() < 4 + len {
                return;
            }
            let server_hello = &data[..4 + len];
            let sh = messages::parse_server_hello(&server_hello[4..]).unwrap();
            let suite = CipherSuite::from_code(sh.cipher_suite).unwrap();
            let server_public: [u8; 32] = sh.key_share.unwrap().key_exchange.try_into().unwrap();
            let shared = self
                .secret
                .diffie_hellman(&x25519_dalek::PublicKey::from(server_public));

            let mut key_schedule = TlsKeySchedule::new(suite);
            key_schedule.derive_handshake_secret(shared.as_bytes()).unwrap();
            let mut transcript = Transcript::new(suite);
            transcript.update(&self.hello);
            transcript.update(server_hello);
            let secrets = key_schedule
                .handshake_traffic_secrets(&transcript.current_hash())
                .unwrap();
            self.keys[Level::Handshake.index()] = Some(Keys {
                seal: PacketKeys::from_secret(suite, &secrets.client).unwrap(),
                open: PacketKeys::from_secret(suite, &secrets.server).unwrap(),
            });
            self.key_schedule = Some(key_schedule);
            self.transcript = Some(transcript);
            self.handshake_secrets = Some(secrets);
        }

        if self.handshake_finished {
            return;
        }
        let data = self.crypto[Level::Handshake.index()].readable();
        let mut pos = 0;
        let flight_end = loop {
            let Some((msg_type, len)) = messages::read_handshake_header(&data[pos..]) else {
                return;
            };
            let end = pos + 4 + len;
            if end > data.len() {
                return;
            }
            pos = end;
            // Finished
            if msg_type == 20 {
                break end;
            }
        };

        let (Some(key_schedule), Some(transcript), Some(secrets)) = (
            self.key_schedule.as_mut(),
            self.transcript.as_mut(),
            self.handshake_secrets.as_ref(),
        ) else {
            return;
        };
        transcript.update(&data[..flight_end]);
        let hash = transcript.current_hash();
        key_schedule.derive_master_secret().unwrap();
        let app = key_schedule.app_traffic_secrets(&hash).unwrap();
        let verify = key_schedule.finished_verify_data(&secrets.client, &hash).unwrap();
        let suite = key_schedule.suite();
        self.keys[Level::Application.index()] = Some(Keys {
            seal: PacketKeys::from_secret(suite, &app.client).unwrap(),
            open: PacketKeys::from_secret(suite, &app.server).unwrap(),
        });
        self.handshake_finished = true;

        let finished = messages::encode_finished(&verify);
        let mut payload = Vec::new();
        self.ack_frame(Level::Handshake, &mut payload);
        frame::encode(
            &Frame::Crypto(CryptoFrame {
                offset: 0,
                data: &finished,
            }),
            &mut payload,
        )
        .unwrap();
        let packet = self.seal(Level::Handshake, &payload, 0);
        self.outgoing.push(packet);
    }

    fn ack_frame(&self, level: Level, out: &mut Vec<u8>) {
        if let Some(ack) = AckFrame::from_ranges(&self.received[level.index()], 0) {
            frame::encode(&Frame::Ack(ack), out).unwrap();
        }
    }

    // -----------------------------------------------------------------------
    // 1-RTT traffic
    // -----------------------------------------------------------------------

    /// One 1-RTT packet carrying `frames`.
    pub fn packet(&mut self, frames: &[Frame<'_>]) -> Vec<u8> {
        let mut payload = Vec::new();
        for f in frames {
            frame::encode(f, &mut payload).unwrap();
        }
        self.seal(Level::Application, &payload, 0)
    }

    pub fn stream_packet(&mut self, stream_id: u64, offset: u64, data: &[u8], fin: bool) -> Vec<u8> {
        self.packet(&[Frame::Stream(StreamFrame {
            stream_id,
            offset,
            data,
            fin,
        })])
    }

    /// Our control stream with an empty SETTINGS frame.
    pub fn control_stream_packet(&mut self) -> Vec<u8> {
        let mut data = vec![0x00];
        h3_frame::encode(&H3Frame::Settings(quico::h3::Settings::new()), &mut data).unwrap();
        self.stream_packet(2, 0, &data, false)
    }

    /// A HEADERS frame for `fields`.
    pub fn headers_frame(fields: &[(&str, &str)]) -> Vec<u8> {
        let block = qpack::encode_field_section(fields);
        let mut out = Vec::new();
        h3_frame::encode(&H3Frame::Headers(&block), &mut out).unwrap();
        out
    }

    pub fn datagram_packet(&mut self, session_id: u64, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        write_varint(session_id, &mut data).unwrap();
        data.extend_from_slice(payload);
        self.packet(&[Frame::Datagram(&data)])
    }

    /// ACK exactly `acked` in the application space.
    pub fn ack_packet(&mut self, acked: &RangeSet) -> Vec<u8> {
        let ack = AckFrame::from_ranges(acked, 0).expect("non-empty ack");
        self.packet(&[Frame::Ack(ack)])
    }

    pub fn received_app_packets(&self) -> &RangeSet {
        &self.received[Level::Application.index()]
    }

    // -----------------------------------------------------------------------
    // Reading what the server sent
    // -----------------------------------------------------------------------

    pub fn stream_data(&self, stream_id: u64) -> Vec<u8> {
        self.streams
            .get(&stream_id)
            .map(RecvStream::readable)
            .unwrap_or_default()
    }

    pub fn stream_complete(&self, stream_id: u64) -> bool {
        self.streams.get(&stream_id).is_some_and(RecvStream::is_complete)
    }

    /// Decode the HTTP/3 frames on a request stream into header fields
    /// and body bytes.
    pub fn response(&self, stream_id: u64) -> (Vec<(String, String)>, Vec<u8>) {
        let data = self.stream_data(stream_id);
        let (frames, _) = h3_frame::extract_frames(&data, 0).unwrap();
        let table = DynamicTable::new(MAX_TABLE_CAPACITY);
        let mut headers = Vec::new();
        let mut body = Vec::new();
        for frame in frames {
            match frame {
                H3Frame::Headers(block) => match qpack::decode_field_section(block, &table).unwrap() {
                    Decoded::Complete(section) => headers.extend(section.fields),
                    Decoded::Blocked { .. } => panic!("server used the dynamic table"),
                },
                H3Frame::Data(data) => body.extend_from_slice(data),
                _ => {}
            }
        }
        (headers, body)
    }
}

fn into_owned(frame: Frame<'_>) -> Frame<'static> {
    // Only the frame kinds the tests look at are kept.
    match frame {
        Frame::Ack(ack) => Frame::Ack(ack),
        Frame::HandshakeDone => Frame::HandshakeDone,
        Frame::Stream(s) => Frame::Stream(StreamFrame {
            stream_id: s.stream_id,
            offset: s.offset,
            data: Box::leak(s.data.to_vec().into_boxed_slice()),
            fin: s.fin,
        }),
        Frame::Datagram(d) => Frame::Datagram(Box::leak(d.to_vec().into_boxed_slice())),
        _ => Frame::Ping,
    }
}

// ---------------------------------------------------------------------------
// Handshake driver
// ---------------------------------------------------------------------------

/// Run a full handshake: Initial, certificate, client Finished, and a
/// first 1-RTT packet opening the client control stream.
///
/// Returns the server's ID for the connection and any non-transmit
/// commands produced along the way.
pub fn connect(
    server: &mut quico::Server,
    client: &mut TestClient,
    cert: &CertifiedKey,
    now: Instant,
) -> (ConnectionId, Vec<Command>) {
    let mut other = Vec::new();
    let initial = client.initial_datagram();
    let commands = server.handle_datagram(now, client.addr, &initial).unwrap();
    let mut connection = None;
    for command in deliver(client, commands) {
        match command {
            Command::CertificateRequested { connection: id, server_name } => {
                assert_eq!(server_name.as_deref(), Some("localhost"));
                connection = Some(id);
            }
            other_command => other.push(other_command),
        }
    }
    let connection = connection.expect("certificate requested");

    server
        .install_certificate(&connection, &cert.chain, &cert.key)
        .unwrap();
    other.extend(deliver(client, server.poll(now)));
    assert!(client.handshake_finished, "client did not see the server Finished");

    for datagram in client.take_outgoing() {
        let commands = server.handle_datagram(now, client.addr, &datagram).unwrap();
        other.extend(deliver(client, commands));
    }

    let control = client.control_stream_packet();
    let commands = server.handle_datagram(now, client.addr, &control).unwrap();
    other.extend(deliver(client, commands));
    (connection, other)
}
