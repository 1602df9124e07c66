//! Request, response and WebTransport session façades.

use crate::connection::{Connection, ConnectionId};
use crate::error::Error;
use crate::h3::frame::{self, H3Frame};
use crate::h3::qpack::encode_field_section;
use crate::varint::write_varint;

use super::http3::{H3State, CLOSE_WEBTRANSPORT_SESSION};

/// A decoded HTTP/3 request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Option<String>,
    pub path: Option<String>,
    /// Every field line in arrival order, pseudo-headers included.
    pub headers: Vec<(String, String)>,
    pub stream_id: u64,
}

impl Request {
    pub(crate) fn from_fields(stream_id: u64, headers: Vec<(String, String)>) -> Self {
        let find = |name: &str| {
            headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };
        Self {
            method: find(":method"),
            path: find(":path"),
            stream_id,
            headers,
        }
    }

    /// First value of `name`. Names are lower-case on the wire.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response state kept per request stream.
#[derive(Debug, Default)]
pub(crate) struct ResponseState {
    pub head_sent: bool,
}

/// Writes the response to one request. HEADERS and DATA frames are queued
/// on the request stream and go out through the connection's scheduler.
#[derive(Debug)]
pub struct Response<'a> {
    conn: &'a mut Connection,
    h3: &'a mut H3State,
    stream_id: u64,
}

impl<'a> Response<'a> {
    pub(crate) fn new(conn: &'a mut Connection, h3: &'a mut H3State, stream_id: u64) -> Self {
        Self {
            conn,
            h3,
            stream_id,
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn headers_sent(&self) -> bool {
        self.h3
            .responses
            .get(&self.stream_id)
            .map_or(true, |r| r.head_sent)
    }

    /// Send the status line and headers. Allowed once.
    pub fn write_head(&mut self, status: u16, headers: &[(&str, &str)]) -> Result<(), Error> {
        let state = self
            .h3
            .responses
            .get_mut(&self.stream_id)
            .ok_or(Error::InvalidState)?;
        if state.head_sent {
            return Err(Error::InvalidState);
        }
        let status = status.to_string();
        let mut fields: Vec<(&str, &str)> = Vec::with_capacity(headers.len() + 1);
        fields.push((":status", &status));
        fields.extend_from_slice(headers);

        let block = encode_field_section(&fields);
        let mut out = Vec::with_capacity(block.len() + 8);
        frame::encode(&H3Frame::Headers(&block), &mut out)?;
        self.conn.stream_write(self.stream_id, &out, false)?;
        state.head_sent = true;
        Ok(())
    }

    /// Queue a DATA frame. Sends a `200` head first if none was written.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), Error> {
        self.ensure_head()?;
        if chunk.is_empty() {
            return Ok(());
        }
        let mut out = Vec::with_capacity(chunk.len() + 8);
        frame::encode(&H3Frame::Data(chunk), &mut out)?;
        self.conn.stream_write(self.stream_id, &out, false)
    }

    /// Write an optional last chunk and finish the stream.
    pub fn end(mut self, chunk: Option<&[u8]>) -> Result<(), Error> {
        self.ensure_head()?;
        let mut out = Vec::new();
        if let Some(chunk) = chunk.filter(|c| !c.is_empty()) {
            frame::encode(&H3Frame::Data(chunk), &mut out)?;
        }
        self.conn.stream_write(self.stream_id, &out, true)?;
        self.h3.responses.remove(&self.stream_id);
        Ok(())
    }

    fn ensure_head(&mut self) -> Result<(), Error> {
        if self.headers_sent() {
            return Ok(());
        }
        self.write_head(200, &[])
    }
}

/// A WebTransport session, identified by its CONNECT stream.
#[derive(Debug)]
pub struct WebTransportSession<'a> {
    conn: &'a mut Connection,
    h3: &'a mut H3State,
    session_id: u64,
}

impl<'a> WebTransportSession<'a> {
    pub(crate) fn new(conn: &'a mut Connection, h3: &'a mut H3State, session_id: u64) -> Self {
        Self {
            conn,
            h3,
            session_id,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        self.h3.connection_id()
    }

    /// Send a datagram to the peer, prefixed with the session id.
    pub fn send_datagram(&mut self, payload: &[u8]) -> Result<(), Error> {
        let mut out = Vec::with_capacity(payload.len() + 8);
        write_varint(self.session_id, &mut out)?;
        out.extend_from_slice(payload);
        self.conn.send_datagram(out)
    }

    /// Send CLOSE_WEBTRANSPORT_SESSION and finish the CONNECT stream.
    pub fn close(self, code: u32, reason: &str) -> Result<(), Error> {
        let mut capsule = Vec::with_capacity(4 + reason.len());
        capsule.extend_from_slice(&code.to_be_bytes());
        capsule.extend_from_slice(reason.as_bytes());

        let mut out = Vec::new();
        write_varint(CLOSE_WEBTRANSPORT_SESSION, &mut out)?;
        write_varint(capsule.len() as u64, &mut out)?;
        out.extend_from_slice(&capsule);
        self.conn.stream_write(self.session_id, &out, true)?;
        self.h3.sessions.remove(&self.session_id);
        tracing::debug!(session = self.session_id, code, "webtransport session closed");
        Ok(())
    }
}
