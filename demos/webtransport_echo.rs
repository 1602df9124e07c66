//! HTTP/3 and WebTransport echo server.
//!
//! Binds `0.0.0.0:4433` (or the address given as the first argument),
//! answers every HTTP/3 request with a small text page and echoes every
//! WebTransport datagram back to its session.
//!
//! Usage (self-signed certificate, generated at startup):
//!   RUST_LOG=quico=debug cargo run --example webtransport_echo
//!
//! With a certificate and PKCS#8 key in DER form:
//!   cargo run --example webtransport_echo -- 0.0.0.0:4433 --cert cert.der --key key.der
//!
//! Then:
//!   curl -k --http3-only https://127.0.0.1:4433/

use std::io;
use std::net::UdpSocket;
use std::time::{Duration, Instant as StdInstant};

use quico::connection::ConnectionId;
use quico::crypto::sign::SigningKey;
use quico::server::{dispatch, CertifiedKey, Handler, Request, Response, WebTransportSession};
use quico::{Error, Server, ServerConfig};

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

fn arg_after(flag: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    let idx = args.iter().position(|a| a == flag)?;
    args.get(idx + 1).cloned()
}

fn load_or_generate_certificate() -> Result<CertifiedKey, Box<dyn std::error::Error>> {
    if let (Some(cert), Some(key)) = (arg_after("--cert"), arg_after("--key")) {
        let chain = vec![std::fs::read(&cert)?];
        let key = SigningKey::from_pkcs8_der(&std::fs::read(&key)?)?;
        tracing::info!(%cert, "loaded certificate");
        return Ok(CertifiedKey { chain, key });
    }
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    tracing::info!("generated self-signed certificate for localhost");
    Ok(CertifiedKey {
        chain: vec![generated.cert.der().to_vec()],
        key: SigningKey::from_pkcs8_der(&generated.key_pair.serialize_der())?,
    })
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

struct Echo {
    cert: CertifiedKey,
    requests: u64,
}

impl Handler for Echo {
    fn certificate(&mut self, server_name: Option<&str>) -> Result<&CertifiedKey, Error> {
        tracing::debug!(?server_name, "certificate requested");
        Ok(&self.cert)
    }

    fn on_request(&mut self, request: Request, mut response: Response<'_>) -> Result<(), Error> {
        self.requests += 1;
        tracing::info!(method = ?request.method, path = ?request.path, "request");
        let body = format!(
            "quico echo server\npath: {}\nrequests served: {}\n",
            request.path.as_deref().unwrap_or("/"),
            self.requests
        );
        response.write_head(200, &[("content-type", "text/plain; charset=utf-8")])?;
        response.end(Some(body.as_bytes()))
    }

    fn accepts_sessions(&self) -> bool {
        true
    }

    fn on_session(&mut self, session: WebTransportSession<'_>) -> Result<(), Error> {
        tracing::info!(
            cid = %session.connection_id(),
            session = session.session_id(),
            "webtransport session opened"
        );
        Ok(())
    }

    fn on_datagram(&mut self, mut session: WebTransportSession<'_>, payload: &[u8]) -> Result<(), Error> {
        tracing::debug!(session = session.session_id(), len = payload.len(), "echoing datagram");
        session.send_datagram(payload)
    }

    fn on_session_closed(&mut self, connection: &ConnectionId, session_id: u64) -> Result<(), Error> {
        tracing::info!(cid = %connection, session = session_id, "webtransport session closed");
        Ok(())
    }

    fn on_connection_closed(&mut self, connection: &ConnectionId, error: Option<&Error>) {
        match error {
            Some(e) => tracing::info!(cid = %connection, error = %e, "connection closed"),
            None => tracing::info!(cid = %connection, "connection closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .filter(|a| !a.starts_with("--"))
        .unwrap_or_else(|| "0.0.0.0:4433".to_string());
    let mut socket = UdpSocket::bind(&addr)?;
    tracing::info!(%addr, "listening");

    let mut app = Echo {
        cert: load_or_generate_certificate()?,
        requests: 0,
    };
    let mut server = Server::new(ServerConfig::default());
    let epoch = StdInstant::now();
    let micros = || epoch.elapsed().as_micros() as u64;
    let mut buf = vec![0u8; 65_536];

    loop {
        let timeout = server
            .poll_timeout()
            .map(|t| Duration::from_micros(t.saturating_sub(micros()).max(1)));
        socket.set_read_timeout(timeout)?;

        let commands = match socket.recv_from(&mut buf) {
            Ok((len, from)) => server.handle_datagram(micros(), from, &buf[..len])?,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                server.handle_timeout(micros())
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = dispatch(&mut server, micros(), commands, &mut app, &mut socket) {
            tracing::warn!(error = %e, "handler failed");
        }
    }
}
