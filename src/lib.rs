//! Sans-io server side of QUIC v1 with TLS 1.3, HTTP/3, QPACK and
//! WebTransport.
//!
//! The caller owns the UDP socket and the clock. Datagrams go into
//! [`Server::handle_datagram`]; what comes back is a list of
//! [`server::Command`]s to execute, most of them handled by
//! [`server::dispatch`].

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod frame;
pub mod ranges;
pub mod varint;

pub mod transport;
pub use transport::{Instant, Rng, SystemRng};

pub mod crypto;
pub mod packet;
pub mod tls;

pub mod connection;
pub use connection::{Connection, ConnectionId, ConnectionStatus, Event};

pub mod h3;

pub mod server;
pub use server::{Command, Handler, Server};

pub use config::{SendLimits, ServerConfig};
pub use error::Error;
