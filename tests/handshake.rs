//! Handshake tests: a hand-built client against [`Server`].
//!
//! The client in `common` derives its own keys from the server's flights,
//! so a completed handshake also proves the server's key schedule,
//! transcript and CertificateVerify line up with an independent peer.

mod common;

use common::{connect, deliver, test_certificate, TestClient, TestRng, T0};
use quico::crypto::CipherSuite;
use quico::error::HandshakeError;
use quico::frame::{parse_frames, Frame};
use quico::h3::{extract_frames, H3Frame};
use quico::tls::messages::parse_client_hello;
use quico::{Command, ConnectionStatus, Error, Server, ServerConfig};

// ---------------------------------------------------------------------------
// ClientHello processing
// ---------------------------------------------------------------------------

#[test]
fn initial_client_hello_negotiates_x25519_and_aes128() {
    let mut client = TestClient::new(0x30);
    let datagram = client.initial_datagram();
    assert_eq!(datagram.len(), 1200);

    let payload = client.open_own_initial(&datagram);
    let crypto = parse_frames(&payload)
        .into_iter()
        .find_map(|f| match f {
            Frame::Crypto(c) => Some(c.data.to_vec()),
            _ => None,
        })
        .expect("CRYPTO frame in Initial");
    let hello = parse_client_hello(&crypto[4..]).unwrap();
    assert_eq!(hello.server_name.as_deref(), Some("localhost"));
    assert_eq!(hello.alpn, vec![b"h3".to_vec()]);

    let negotiated = quico::tls::negotiate(&hello, &mut TestRng(0x90)).unwrap();
    assert_eq!(negotiated.suite, CipherSuite::Aes128GcmSha256);
    assert_eq!(negotiated.suite.code(), 0x1301);
    assert_eq!(negotiated.key_share.public.len(), 32);
    assert_eq!(negotiated.key_share.shared_secret.len(), 32);

    // both ends arrive at the same secret
    let server_public: [u8; 32] = negotiated.key_share.public.clone().try_into().unwrap();
    let client_secret = x25519_dalek::StaticSecret::from([0x32; 32]);
    let shared = client_secret.diffie_hellman(&x25519_dalek::PublicKey::from(server_public));
    assert_eq!(shared.as_bytes(), &negotiated.key_share.shared_secret);
}

#[test]
fn short_initial_datagram_is_ignored() {
    let mut server = Server::with_rng(ServerConfig::default(), TestRng(0x40));
    let mut client = TestClient::new(0x30);
    let datagram = client.initial_datagram();
    let commands = server
        .handle_datagram(T0, client.addr, &datagram[..1000])
        .unwrap();
    assert!(commands.is_empty());
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn garbage_datagram_is_ignored() {
    let mut server = Server::with_rng(ServerConfig::default(), TestRng(0x40));
    let commands = server
        .handle_datagram(T0, common::client_addr(), &[0x40, 1, 2, 3])
        .unwrap();
    assert!(commands.is_empty());
}

// ---------------------------------------------------------------------------
// Full handshake
// ---------------------------------------------------------------------------

#[test]
fn full_handshake_reaches_connected() {
    let cert = test_certificate();
    let mut server = Server::with_rng(ServerConfig::default(), TestRng(0x40));
    let mut client = TestClient::new(0x30);

    let (id, other) = connect(&mut server, &mut client, &cert, T0);
    assert!(other.is_empty(), "unexpected commands: {other:?}");
    assert_eq!(server.connection_count(), 1);

    let conn = server.connection(&id).unwrap();
    assert_eq!(conn.status(), ConnectionStatus::Connected);
    assert_eq!(conn.alpn(), Some(&b"h3"[..]));
    assert_eq!(conn.server_name(), Some("localhost"));
    assert_eq!(conn.original_dcid().as_slice(), &client.original_dcid[..]);
    assert_eq!(client.server_cid.as_deref(), Some(id.as_slice()));
    assert!(client.handshake_done);

    // control stream: type byte then SETTINGS advertising WebTransport
    let control = client.stream_data(3);
    assert_eq!(control[0], 0x00);
    let (frames, _) = extract_frames(&control[1..], 0).unwrap();
    match &frames[0] {
        H3Frame::Settings(settings) => {
            assert!(settings.webtransport());
            assert!(settings.h3_datagram());
        }
        other => panic!("expected SETTINGS, got {other:?}"),
    }
    assert_eq!(client.stream_data(7), vec![0x02]);
    assert_eq!(client.stream_data(11), vec![0x03]);
}

#[test]
fn handshake_waits_for_first_application_packet() {
    let cert = test_certificate();
    let mut server = Server::with_rng(ServerConfig::default(), TestRng(0x40));
    let mut client = TestClient::new(0x30);

    let initial = client.initial_datagram();
    let commands = server.handle_datagram(T0, client.addr, &initial).unwrap();
    let rest = deliver(&mut client, commands);
    let Some(Command::CertificateRequested { connection, .. }) = rest.into_iter().next() else {
        panic!("expected a certificate request");
    };
    server
        .install_certificate(&connection, &cert.chain, &cert.key)
        .unwrap();
    deliver(&mut client, server.poll(T0));

    for datagram in client.take_outgoing() {
        let commands = server.handle_datagram(T0, client.addr, &datagram).unwrap();
        deliver(&mut client, commands);
    }
    // Finished verified, but the client has not spoken 1-RTT yet
    assert_eq!(
        server.connection(&connection).unwrap().status(),
        ConnectionStatus::Connecting
    );
    assert!(!client.handshake_done);
}

#[test]
fn zero_length_connection_ids_route_by_address() {
    let cert = test_certificate();
    let config = ServerConfig {
        cid_len: 0,
        ..ServerConfig::default()
    };
    let mut server = Server::with_rng(config, TestRng(0x40));
    let mut first = TestClient::new(0x30);
    let mut second = TestClient::new(0x50);
    second.addr = "192.0.2.11:50001".parse().unwrap();

    let (first_id, _) = connect(&mut server, &mut first, &cert, T0);
    let (second_id, _) = connect(&mut server, &mut second, &cert, T0 + 100);
    assert_ne!(first_id, second_id);
    assert_eq!(server.connection_count(), 2);
    for (client, id) in [(&first, &first_id), (&second, &second_id)] {
        assert_eq!(client.server_cid.as_deref(), Some(&[][..]));
        assert!(client.handshake_done);
        let conn = server.connection(id).unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Connected);
        assert_eq!(conn.peer_address(), client.addr);
    }

    // an empty DCID reaches the connection bound to the sender's address
    let request = TestClient::headers_frame(&[(":method", "GET"), (":path", "/second")]);
    let datagram = second.stream_packet(0, 0, &request, true);
    let commands = server.handle_datagram(T0 + 1000, second.addr, &datagram).unwrap();
    let requests: Vec<_> = commands
        .iter()
        .filter_map(|c| match c {
            Command::Request { connection, request } => Some((connection.clone(), request.path.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(requests, vec![(second_id, Some("/second".to_string()))]);
}

#[test]
fn retransmitted_initial_does_not_open_second_connection() {
    let mut server = Server::with_rng(ServerConfig::default(), TestRng(0x40));
    let mut client = TestClient::new(0x30);
    let initial = client.initial_datagram();
    server.handle_datagram(T0, client.addr, &initial).unwrap();
    // same original DCID routes to the existing connection
    server.handle_datagram(T0 + 10, client.addr, &initial).unwrap();
    assert_eq!(server.connection_count(), 1);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn no_common_cipher_suite_closes_with_crypto_error() {
    let mut server = Server::with_rng(ServerConfig::default(), TestRng(0x40));
    let mut client = TestClient::new(0x30);
    // TLS_CHACHA20_POLY1305_SHA256 only
    client.cipher_suites = vec![0x1303];

    let initial = client.initial_datagram();
    let commands = server.handle_datagram(T0, client.addr, &initial).unwrap();
    let rest = deliver(&mut client, commands);

    assert!(rest.iter().any(|c| matches!(
        c,
        Command::ConnectionClosed {
            error: Some(Error::Handshake(HandshakeError::UnsupportedCipherSuite)),
            ..
        }
    )));
    // CRYPTO_ERROR carrying handshake_failure (40)
    assert_eq!(client.close, Some((false, 0x128)));
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn idle_connection_closes_silently() {
    let cert = test_certificate();
    let mut server = Server::with_rng(ServerConfig::default(), TestRng(0x40));
    let mut client = TestClient::new(0x30);
    let (id, _) = connect(&mut server, &mut client, &cert, T0);

    // server_defaults: 30 s idle timeout
    let deadline = T0 + 30 * quico::transport::MICROS_PER_SEC;
    assert!(server.poll_timeout().is_some_and(|t| t <= deadline));

    let commands = server.handle_timeout(deadline);
    let closed: Vec<_> = commands
        .iter()
        .filter(|c| matches!(c, Command::ConnectionClosed { .. }))
        .collect();
    assert_eq!(
        closed,
        vec![&Command::ConnectionClosed {
            connection: id,
            error: None,
        }]
    );
    // no CONNECTION_CLOSE on idle expiry
    assert!(!commands.iter().any(|c| matches!(c, Command::Transmit { .. })));
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn application_close_reaches_client() {
    let cert = test_certificate();
    let mut server = Server::with_rng(ServerConfig::default(), TestRng(0x40));
    let mut client = TestClient::new(0x30);
    let (id, _) = connect(&mut server, &mut client, &cert, T0);

    server
        .close(&id, Error::Http3(quico::error::H3Error::GeneralProtocolError))
        .unwrap();
    let rest = deliver(&mut client, server.poll(T0));
    assert!(matches!(
        rest.as_slice(),
        [Command::ConnectionClosed { error: Some(Error::Http3(_)), .. }]
    ));
    assert_eq!(client.close, Some((true, 0x0101)));
    assert!(server.connection(&id).is_none());
}
