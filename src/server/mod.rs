//! HTTP/3 and WebTransport server over many QUIC connections.
//!
//! [`Server`] owns the connection table and turns each input into a list
//! of [`Command`]s: datagrams to send plus things the application has to
//! act on. [`dispatch`] runs those commands against a [`Handler`] and a
//! [`DatagramSender`].

mod handler;
mod http3;
mod request;

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId, Event};
use crate::crypto::sign::SigningKey;
use crate::error::Error;
use crate::packet::{parse_header, PacketHeader, PacketType, MIN_INITIAL_PACKET_SIZE, QUIC_VERSION_1};
use crate::transport::{Instant, Rng, SystemRng};

pub use handler::{dispatch, CertifiedKey, DatagramSender, Handler};
pub use http3::{H3State, CLOSE_WEBTRANSPORT_SESSION, CONTROL_STREAM_ID, DECODER_STREAM_ID, ENCODER_STREAM_ID};
pub use request::{Request, Response, WebTransportSession};

/// Side effects requested by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Transmit {
        to: SocketAddr,
        bytes: Vec<u8>,
    },
    /// Answer with [`Server::install_certificate`].
    CertificateRequested {
        connection: ConnectionId,
        server_name: Option<String>,
    },
    /// Answer through [`Server::response`].
    Request {
        connection: ConnectionId,
        request: Request,
    },
    /// A WebTransport CONNECT. Answer with [`Server::accept_session`], or
    /// with [`Server::decline_session`] to serve it as a plain request.
    SessionRequested {
        connection: ConnectionId,
        request: Request,
    },
    Datagram {
        connection: ConnectionId,
        session_id: u64,
        payload: Vec<u8>,
    },
    SessionClosed {
        connection: ConnectionId,
        session_id: u64,
    },
    ConnectionClosed {
        connection: ConnectionId,
        error: Option<Error>,
    },
}

struct Entry {
    conn: Connection,
    h3: H3State,
}

/// Length of the table key given to connections that issue zero-length
/// connection IDs.
const HANDLE_LEN: usize = 8;

pub struct Server {
    config: ServerConfig,
    rng: Box<dyn Rng + Send>,
    connections: HashMap<ConnectionId, Entry>,
    /// Client-chosen original DCIDs, until the client switches to ours.
    aliases: HashMap<ConnectionId, ConnectionId>,
    /// Last connection seen from each address, for packets whose DCID
    /// we do not know or that carry an empty one.
    address_binds: HashMap<SocketAddr, ConnectionId>,
}

impl core::fmt::Debug for Server {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Server")
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_rng(config, SystemRng)
    }

    pub fn with_rng(config: ServerConfig, rng: impl Rng + Send + 'static) -> Self {
        Self {
            config,
            rng: Box::new(rng),
            connections: HashMap::new(),
            aliases: HashMap::new(),
            address_binds: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id).map(|e| &e.conn)
    }

    /// Feed one UDP datagram received from `from`.
    pub fn handle_datagram(
        &mut self,
        now: Instant,
        from: SocketAddr,
        bytes: &[u8],
    ) -> Result<Vec<Command>, Error> {
        let mut commands = Vec::new();
        let Some(key) = self.route(now, from, bytes)? else {
            return Ok(commands);
        };
        if let Some(entry) = self.connections.get_mut(&key) {
            entry.conn.handle_datagram(now, bytes, &mut *self.rng);
        }
        self.address_binds.insert(from, key.clone());
        self.process(&key, now, &mut commands);
        Ok(commands)
    }

    /// Find the connection for a datagram, creating one for a new
    /// client Initial.
    fn route(
        &mut self,
        now: Instant,
        from: SocketAddr,
        bytes: &[u8],
    ) -> Result<Option<ConnectionId>, Error> {
        let header = match parse_header(bytes, self.config.cid_len) {
            Ok((header, _)) => header,
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping unparsable datagram");
                return Ok(None);
            }
        };

        // zero-length connection IDs leave only the address to go by
        if header.dcid().is_empty() {
            return Ok(self.bound(from));
        }
        if let Ok(dcid) = ConnectionId::from_slice(header.dcid()) {
            if self.connections.contains_key(&dcid) {
                return Ok(Some(dcid));
            }
            if let Some(key) = self.aliases.get(&dcid) {
                return Ok(Some(key.clone()));
            }
        }

        match header {
            PacketHeader::Long(long) if long.packet_type == PacketType::Initial => {
                if long.version != QUIC_VERSION_1 {
                    tracing::debug!(%from, version = long.version, "unsupported version");
                    return Ok(None);
                }
                if bytes.len() < MIN_INITIAL_PACKET_SIZE {
                    tracing::trace!(%from, len = bytes.len(), "short Initial datagram");
                    return Ok(None);
                }
                let conn = Connection::accept(&self.config, &long, from, now, &mut *self.rng)?;
                let key = if conn.local_cid().is_empty() {
                    ConnectionId::generate(&mut *self.rng, HANDLE_LEN)
                } else {
                    conn.local_cid().clone()
                };
                self.aliases.insert(conn.original_dcid().clone(), key.clone());
                self.connections.insert(
                    key.clone(),
                    Entry {
                        conn,
                        h3: H3State::new(key.clone(), &self.config.settings),
                    },
                );
                Ok(Some(key))
            }
            _ => Ok(self.bound(from)),
        }
    }

    fn bound(&self, from: SocketAddr) -> Option<ConnectionId> {
        let bound = self
            .address_binds
            .get(&from)
            .filter(|key| self.connections.contains_key(*key))
            .cloned();
        if bound.is_none() {
            tracing::trace!(%from, "datagram for unknown connection");
        }
        bound
    }

    /// Continue a handshake paused on [`Command::CertificateRequested`].
    pub fn install_certificate<C: AsRef<[u8]>>(
        &mut self,
        connection: &ConnectionId,
        chain: &[C],
        key: &SigningKey,
    ) -> Result<(), Error> {
        let entry = self
            .connections
            .get_mut(connection)
            .ok_or(Error::UnknownConnection)?;
        entry.conn.install_certificate(chain, key)
    }

    /// Response writer for a request delivered in [`Command::Request`].
    pub fn response(&mut self, connection: &ConnectionId, stream_id: u64) -> Result<Response<'_>, Error> {
        let entry = self
            .connections
            .get_mut(connection)
            .ok_or(Error::UnknownConnection)?;
        if !entry.h3.responses.contains_key(&stream_id) {
            return Err(Error::InvalidState);
        }
        Ok(Response::new(&mut entry.conn, &mut entry.h3, stream_id))
    }

    /// Open the WebTransport session asked for in [`Command::SessionRequested`].
    pub fn accept_session(
        &mut self,
        connection: &ConnectionId,
        session_id: u64,
    ) -> Result<WebTransportSession<'_>, Error> {
        let entry = self
            .connections
            .get_mut(connection)
            .ok_or(Error::UnknownConnection)?;
        entry.h3.accept_session(&mut entry.conn, session_id)?;
        Ok(WebTransportSession::new(&mut entry.conn, &mut entry.h3, session_id))
    }

    /// Refuse a WebTransport CONNECT and answer it as an ordinary request.
    pub fn decline_session(&mut self, connection: &ConnectionId, session_id: u64) -> Result<Response<'_>, Error> {
        let entry = self
            .connections
            .get_mut(connection)
            .ok_or(Error::UnknownConnection)?;
        if !entry.h3.decline_session(session_id) {
            return Err(Error::InvalidState);
        }
        Ok(Response::new(&mut entry.conn, &mut entry.h3, session_id))
    }

    pub fn session(
        &mut self,
        connection: &ConnectionId,
        session_id: u64,
    ) -> Result<WebTransportSession<'_>, Error> {
        let entry = self
            .connections
            .get_mut(connection)
            .ok_or(Error::UnknownConnection)?;
        if !entry.h3.has_session(session_id) {
            return Err(Error::InvalidState);
        }
        Ok(WebTransportSession::new(&mut entry.conn, &mut entry.h3, session_id))
    }

    pub fn session_send_datagram(
        &mut self,
        connection: &ConnectionId,
        session_id: u64,
        payload: &[u8],
    ) -> Result<(), Error> {
        self.session(connection, session_id)?.send_datagram(payload)
    }

    pub fn close_session(&mut self, connection: &ConnectionId, session_id: u64) -> Result<(), Error> {
        self.session(connection, session_id)?.close(0, "")
    }

    /// Close a connection with `error`.
    pub fn close(&mut self, connection: &ConnectionId, error: Error) -> Result<(), Error> {
        let entry = self
            .connections
            .get_mut(connection)
            .ok_or(Error::UnknownConnection)?;
        entry.conn.close(error);
        Ok(())
    }

    /// Flush every connection and collect what it produced.
    pub fn poll(&mut self, now: Instant) -> Vec<Command> {
        let mut commands = Vec::new();
        let keys: Vec<ConnectionId> = self.connections.keys().cloned().collect();
        for key in keys {
            self.process(&key, now, &mut commands);
        }
        commands
    }

    /// Earliest timer deadline over all connections.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.connections
            .values()
            .filter_map(|e| e.conn.poll_timeout())
            .min()
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Vec<Command> {
        for entry in self.connections.values_mut() {
            if entry.conn.poll_timeout().is_some_and(|t| t <= now) {
                entry.conn.handle_timeout(now);
            }
        }
        self.poll(now)
    }

    /// Drain a connection's events through the HTTP/3 layer, send what
    /// is allowed and forget the connection once closed.
    fn process(&mut self, key: &ConnectionId, now: Instant, commands: &mut Vec<Command>) {
        let Some(entry) = self.connections.get_mut(key) else {
            return;
        };
        Self::drain_events(&self.config, entry, commands);
        entry.conn.flush(now);
        Self::drain_events(&self.config, entry, commands);

        let to = entry.conn.peer_address();
        while let Some(bytes) = entry.conn.poll_transmit() {
            commands.push(Command::Transmit { to, bytes });
        }

        if entry.conn.is_closed() {
            self.connections.remove(key);
            self.aliases.retain(|_, v| v != key);
            self.address_binds.retain(|_, v| v != key);
            tracing::debug!(cid = %key, remaining = self.connections.len(), "connection removed");
        }
    }

    fn drain_events(config: &ServerConfig, entry: &mut Entry, commands: &mut Vec<Command>) {
        let connection = entry.h3.connection_id().clone();
        while let Some(event) = entry.conn.poll_event() {
            let result = match event {
                Event::CertificateRequested { server_name } => {
                    commands.push(Command::CertificateRequested {
                        connection: connection.clone(),
                        server_name,
                    });
                    Ok(())
                }
                Event::Connected => entry.h3.open_streams(&mut entry.conn, &config.settings),
                Event::StreamReadable(stream_id) => {
                    entry.h3.on_stream(&mut entry.conn, stream_id, commands)
                }
                Event::Datagram(payload) => {
                    commands.extend(entry.h3.on_datagram(&connection, &payload));
                    Ok(())
                }
                Event::Closed { error } => {
                    for session_id in entry.h3.session_ids() {
                        commands.push(Command::SessionClosed {
                            connection: connection.clone(),
                            session_id,
                        });
                    }
                    commands.push(Command::ConnectionClosed {
                        connection: connection.clone(),
                        error,
                    });
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::debug!(cid = %connection, error = %e, "http/3 error");
                entry.conn.close(e);
            }
        }
    }
}
