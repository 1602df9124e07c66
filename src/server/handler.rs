//! Running [`Command`]s against application callbacks and a socket.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::connection::ConnectionId;
use crate::crypto::sign::SigningKey;
use crate::error::Error;
use crate::transport::Instant;

use super::{Command, Request, Response, Server, WebTransportSession};

/// Outgoing half of a UDP socket.
pub trait DatagramSender {
    fn send_to(&mut self, to: SocketAddr, bytes: &[u8]) -> io::Result<()>;
}

impl DatagramSender for UdpSocket {
    fn send_to(&mut self, to: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        UdpSocket::send_to(self, bytes, to).map(drop)
    }
}

impl<T: DatagramSender + ?Sized> DatagramSender for &mut T {
    fn send_to(&mut self, to: SocketAddr, bytes: &[u8]) -> io::Result<()> {
        (**self).send_to(to, bytes)
    }
}

/// A certificate chain (leaf first, DER) and its private key.
#[derive(Debug)]
pub struct CertifiedKey {
    pub chain: Vec<Vec<u8>>,
    pub key: SigningKey,
}

/// Application callbacks.
pub trait Handler {
    /// Certificate to present for `server_name` (the SNI, if any).
    fn certificate(&mut self, server_name: Option<&str>) -> Result<&CertifiedKey, Error>;

    fn on_request(&mut self, request: Request, response: Response<'_>) -> Result<(), Error>;

    /// Whether WebTransport CONNECTs open sessions. Otherwise they reach
    /// [`Handler::on_request`] like any other request.
    fn accepts_sessions(&self) -> bool {
        false
    }

    fn on_session(&mut self, session: WebTransportSession<'_>) -> Result<(), Error> {
        let _ = session;
        Ok(())
    }

    fn on_datagram(&mut self, session: WebTransportSession<'_>, payload: &[u8]) -> Result<(), Error> {
        let _ = (session, payload);
        Ok(())
    }

    fn on_session_closed(&mut self, connection: &ConnectionId, session_id: u64) -> Result<(), Error> {
        let _ = (connection, session_id);
        Ok(())
    }

    fn on_connection_closed(&mut self, connection: &ConnectionId, error: Option<&Error>) {
        let _ = (connection, error);
    }
}

/// Execute `commands`, then keep polling `server` until it has nothing
/// more to do at `now`.
///
/// Handler errors abort and are returned. Socket errors are logged.
pub fn dispatch<H, S>(
    server: &mut Server,
    now: Instant,
    commands: Vec<Command>,
    handler: &mut H,
    sender: &mut S,
) -> Result<(), Error>
where
    H: Handler + ?Sized,
    S: DatagramSender + ?Sized,
{
    let mut queue: VecDeque<Command> = commands.into();
    loop {
        while let Some(command) = queue.pop_front() {
            run(server, command, handler, sender)?;
        }
        let more = server.poll(now);
        if more.is_empty() {
            return Ok(());
        }
        queue.extend(more);
    }
}

fn run<H, S>(server: &mut Server, command: Command, handler: &mut H, sender: &mut S) -> Result<(), Error>
where
    H: Handler + ?Sized,
    S: DatagramSender + ?Sized,
{
    match command {
        Command::Transmit { to, bytes } => {
            if let Err(e) = sender.send_to(to, &bytes) {
                tracing::warn!(%to, error = %e, "send failed");
            }
        }
        Command::CertificateRequested {
            connection,
            server_name,
        } => {
            let certified = handler.certificate(server_name.as_deref())?;
            // a failed handshake closes the connection and is reported
            // through ConnectionClosed
            if let Err(e) = server.install_certificate(&connection, &certified.chain, &certified.key) {
                tracing::debug!(cid = %connection, error = %e, "certificate not accepted");
            }
        }
        Command::Request {
            connection,
            request,
        } => match server.response(&connection, request.stream_id) {
            Ok(response) => handler.on_request(request, response)?,
            Err(e) => tracing::trace!(cid = %connection, error = %e, "request dropped"),
        },
        // connections and sessions may be gone by the time a command runs
        Command::SessionRequested {
            connection,
            request,
        } => {
            let session_id = request.stream_id;
            if handler.accepts_sessions() {
                match server.accept_session(&connection, session_id) {
                    Ok(session) => handler.on_session(session)?,
                    Err(e) => tracing::trace!(cid = %connection, session_id, error = %e, "session gone"),
                }
            } else {
                match server.decline_session(&connection, session_id) {
                    Ok(response) => handler.on_request(request, response)?,
                    Err(e) => tracing::trace!(cid = %connection, session_id, error = %e, "request dropped"),
                }
            }
        }
        Command::Datagram {
            connection,
            session_id,
            payload,
        } => {
            match server.session(&connection, session_id) {
                Ok(session) => handler.on_datagram(session, &payload)?,
                Err(e) => tracing::trace!(cid = %connection, session_id, error = %e, "datagram dropped"),
            }
        }
        Command::SessionClosed {
            connection,
            session_id,
        } => handler.on_session_closed(&connection, session_id)?,
        Command::ConnectionClosed { connection, error } => {
            tracing::debug!(cid = %connection, error = ?error, "connection closed");
            handler.on_connection_closed(&connection, error.as_ref());
        }
    }
    Ok(())
}
