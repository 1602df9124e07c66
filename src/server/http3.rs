//! HTTP/3 on top of one QUIC connection: control and QPACK streams,
//! request streams and WebTransport sessions.

use std::collections::{BTreeMap, BTreeSet};

use crate::connection::{Connection, ConnectionId};
use crate::error::{Error, H3Error};
use crate::h3::frame::{self, extract_frames, H3Frame};
use crate::h3::qpack::{
    decode_field_section, insert_count_increment, parse_encoder_instructions,
    encode_field_section, section_acknowledgment, Decoded, DynamicTable, FieldSection,
};
use crate::h3::stream_type::{
    STREAM_TYPE_CONTROL, STREAM_TYPE_QPACK_DECODER, STREAM_TYPE_QPACK_ENCODER,
};
use crate::h3::{Settings, StreamKind};
use crate::varint::decode_varint;

use super::request::{Request, ResponseState};
use super::Command;

/// Our unidirectional streams, opened once the handshake completes.
pub const CONTROL_STREAM_ID: u64 = 3;
pub const ENCODER_STREAM_ID: u64 = 7;
pub const DECODER_STREAM_ID: u64 = 11;

/// Capsule type closing a WebTransport session.
pub const CLOSE_WEBTRANSPORT_SESSION: u64 = 0x2843;

/// Field sections allowed to wait for encoder stream inserts at once.
const MAX_BLOCKED_SECTIONS: usize = 16;

#[derive(Debug)]
struct BlockedSection {
    stream_id: u64,
    block: Vec<u8>,
}

/// HTTP/3 state of one connection.
#[derive(Debug)]
pub struct H3State {
    /// Server-side handle of the connection, as carried in [`Command`]s.
    connection: ConnectionId,
    webtransport: bool,
    peer_settings: Option<Settings>,
    table: DynamicTable,
    /// Insert count the peer's encoder knows we have.
    acked_insert_count: u64,
    uni_streams: BTreeMap<u64, StreamKind>,
    /// Request streams whose HEADERS were handled.
    seen_requests: BTreeSet<u64>,
    blocked: Vec<BlockedSection>,
    pub(crate) responses: BTreeMap<u64, ResponseState>,
    /// Open WebTransport sessions, by CONNECT stream id.
    pub(crate) sessions: BTreeSet<u64>,
    /// WebTransport CONNECTs not yet accepted or declined.
    pending_sessions: BTreeSet<u64>,
}

impl H3State {
    /// `settings` are the ones we advertise: they enable WebTransport and
    /// bound the QPACK table the peer's encoder may ask for.
    pub fn new(connection: ConnectionId, settings: &Settings) -> Self {
        let table_capacity = usize::try_from(settings.qpack_max_table_capacity()).unwrap_or(usize::MAX);
        Self {
            connection,
            webtransport: settings.webtransport(),
            peer_settings: None,
            table: DynamicTable::new(table_capacity),
            acked_insert_count: 0,
            uni_streams: BTreeMap::new(),
            seen_requests: BTreeSet::new(),
            blocked: Vec::new(),
            responses: BTreeMap::new(),
            sessions: BTreeSet::new(),
            pending_sessions: BTreeSet::new(),
        }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection
    }

    pub fn peer_settings(&self) -> Option<&Settings> {
        self.peer_settings.as_ref()
    }

    pub fn has_session(&self, session_id: u64) -> bool {
        self.sessions.contains(&session_id)
    }

    /// Open the control stream with our SETTINGS and the two QPACK streams.
    pub fn open_streams(&mut self, conn: &mut Connection, settings: &Settings) -> Result<(), Error> {
        let mut control = vec![STREAM_TYPE_CONTROL];
        frame::encode(&H3Frame::Settings(settings.clone()), &mut control)?;
        conn.stream_write(CONTROL_STREAM_ID, &control, false)?;
        conn.stream_write(ENCODER_STREAM_ID, &[STREAM_TYPE_QPACK_ENCODER], false)?;
        conn.stream_write(DECODER_STREAM_ID, &[STREAM_TYPE_QPACK_DECODER], false)?;
        tracing::debug!(cid = %self.connection, "http/3 streams opened");
        Ok(())
    }

    /// Parse newly readable data of `stream_id`.
    pub fn on_stream(
        &mut self,
        conn: &mut Connection,
        stream_id: u64,
        commands: &mut Vec<Command>,
    ) -> Result<(), Error> {
        if stream_id & 0x02 == 0 {
            return self.on_request_stream(conn, stream_id, commands);
        }

        let Some(stream) = conn.recv_stream(stream_id) else {
            return Ok(());
        };
        let mut data = stream.readable();
        let mut offset = stream.from_offset();
        let complete = stream.is_complete();

        let kind = match self.uni_streams.get(&stream_id) {
            Some(&kind) => kind,
            None => {
                let Some(&first) = data.first() else {
                    return Ok(());
                };
                let kind = StreamKind::classify(stream_id, first);
                tracing::trace!(stream_id, ?kind, "peer opened stream");
                self.uni_streams.insert(stream_id, kind);
                data.remove(0);
                offset += 1;
                kind
            }
        };

        let used = match kind {
            StreamKind::Control => self.on_control(&data)?,
            StreamKind::QpackEncoder => self.on_encoder(conn, &data, commands)?,
            _ => data.len(),
        };
        conn.consume_stream(stream_id, offset + used as u64);

        if complete {
            if matches!(
                kind,
                StreamKind::Control | StreamKind::QpackEncoder | StreamKind::QpackDecoder
            ) {
                return Err(H3Error::ClosedCriticalStream.into());
            }
            conn.finish_recv_stream(stream_id);
        }
        Ok(())
    }

    fn on_control(&mut self, data: &[u8]) -> Result<usize, Error> {
        let (frames, used) = extract_frames(data, 0)?;
        for frame in frames {
            match (frame, self.peer_settings.is_some()) {
                (H3Frame::Settings(settings), false) => {
                    tracing::debug!(?settings, "peer settings");
                    self.peer_settings = Some(settings);
                }
                (_, false) => return Err(H3Error::MissingSettings.into()),
                (H3Frame::Settings(_), true)
                | (H3Frame::Data(_), true)
                | (H3Frame::Headers(_), true)
                | (H3Frame::PushPromise { .. }, true) => {
                    return Err(H3Error::FrameUnexpected.into());
                }
                (other, true) => tracing::trace!(frame = ?other, "control frame ignored"),
            }
        }
        Ok(used as usize)
    }

    fn on_encoder(
        &mut self,
        conn: &mut Connection,
        data: &[u8],
        commands: &mut Vec<Command>,
    ) -> Result<usize, Error> {
        let (instructions, used) = parse_encoder_instructions(data)
            .map_err(|_| Error::from(H3Error::QpackEncoderStreamError))?;
        for instruction in &instructions {
            instruction
                .apply(&mut self.table)
                .map_err(|_| Error::from(H3Error::QpackEncoderStreamError))?;
        }

        let inserted = self.table.insert_count();
        if inserted > self.acked_insert_count {
            let mut out = Vec::new();
            insert_count_increment(inserted - self.acked_insert_count, &mut out);
            conn.stream_write(DECODER_STREAM_ID, &out, false)?;
            self.acked_insert_count = inserted;
            self.retry_blocked(conn, commands)?;
        }
        Ok(used)
    }

    fn retry_blocked(&mut self, conn: &mut Connection, commands: &mut Vec<Command>) -> Result<(), Error> {
        let blocked = std::mem::take(&mut self.blocked);
        for section in blocked {
            match decode_field_section(&section.block, &self.table)? {
                Decoded::Complete(fields) => {
                    tracing::trace!(stream_id = section.stream_id, "blocked section decoded");
                    self.on_headers(conn, section.stream_id, fields, commands)?;
                }
                Decoded::Blocked { .. } => self.blocked.push(section),
            }
        }
        Ok(())
    }

    fn on_request_stream(
        &mut self,
        conn: &mut Connection,
        stream_id: u64,
        commands: &mut Vec<Command>,
    ) -> Result<(), Error> {
        let Some(stream) = conn.recv_stream(stream_id) else {
            return Ok(());
        };
        let data = stream.readable();
        let complete = stream.is_complete();
        let (frames, end) = extract_frames(&data, stream.from_offset())?;

        let mut session_closed = false;
        for frame in frames {
            match frame {
                H3Frame::Headers(block) if !self.seen_requests.contains(&stream_id) => {
                    self.seen_requests.insert(stream_id);
                    match decode_field_section(block, &self.table)? {
                        Decoded::Complete(fields) => {
                            self.on_headers(conn, stream_id, fields, commands)?;
                        }
                        Decoded::Blocked {
                            required_insert_count,
                        } => {
                            if self.blocked.len() >= MAX_BLOCKED_SECTIONS {
                                return Err(H3Error::QpackDecompressionFailed.into());
                            }
                            tracing::trace!(stream_id, required_insert_count, "field section blocked");
                            self.blocked.push(BlockedSection {
                                stream_id,
                                block: block.to_vec(),
                            });
                        }
                    }
                }
                H3Frame::Unknown(CLOSE_WEBTRANSPORT_SESSION) if self.has_session(stream_id) => {
                    session_closed = true;
                }
                // request bodies and trailers are not surfaced
                H3Frame::Data(_) | H3Frame::Headers(_) | H3Frame::Unknown(_) => {}
                other => {
                    tracing::debug!(stream_id, frame = ?other, "unexpected frame on request stream");
                    return Err(H3Error::FrameUnexpected.into());
                }
            }
        }
        conn.consume_stream(stream_id, end);

        if (session_closed || complete) && self.sessions.remove(&stream_id) {
            tracing::debug!(stream_id, "webtransport session closed by peer");
            commands.push(Command::SessionClosed {
                connection: self.connection.clone(),
                session_id: stream_id,
            });
        }
        if complete {
            conn.finish_recv_stream(stream_id);
        }
        Ok(())
    }

    fn on_headers(
        &mut self,
        conn: &mut Connection,
        stream_id: u64,
        section: FieldSection,
        commands: &mut Vec<Command>,
    ) -> Result<(), Error> {
        if section.required_insert_count > 0 {
            let mut out = Vec::new();
            section_acknowledgment(stream_id, &mut out);
            conn.stream_write(DECODER_STREAM_ID, &out, false)?;
            self.acked_insert_count = self.acked_insert_count.max(section.required_insert_count);
        }

        let connection = self.connection.clone();
        let is_webtransport = section
            .fields
            .iter()
            .any(|(n, v)| n == ":protocol" && v == "webtransport");
        let request = Request::from_fields(stream_id, section.fields);
        self.responses.insert(stream_id, ResponseState::default());

        if is_webtransport && self.webtransport {
            tracing::debug!(cid = %connection, session = stream_id, "webtransport session requested");
            self.pending_sessions.insert(stream_id);
            commands.push(Command::SessionRequested {
                connection,
                request,
            });
        } else {
            tracing::debug!(
                cid = %connection,
                stream_id,
                method = ?request.method,
                path = ?request.path,
                "request"
            );
            commands.push(Command::Request {
                connection,
                request,
            });
        }
        Ok(())
    }

    /// Answer a pending CONNECT with `:status 200` and open the session.
    pub(crate) fn accept_session(&mut self, conn: &mut Connection, session_id: u64) -> Result<(), Error> {
        if !self.pending_sessions.remove(&session_id) {
            return Err(Error::InvalidState);
        }
        self.responses.remove(&session_id);
        let block = encode_field_section(&[(":status", "200")]);
        let mut out = Vec::new();
        frame::encode(&H3Frame::Headers(&block), &mut out)?;
        conn.stream_write(session_id, &out, false)?;
        self.sessions.insert(session_id);
        tracing::debug!(cid = %self.connection, session = session_id, "webtransport session opened");
        Ok(())
    }

    /// Drop a pending CONNECT so it is answered as a plain request.
    pub(crate) fn decline_session(&mut self, session_id: u64) -> bool {
        self.pending_sessions.remove(&session_id)
    }

    /// Split the session id prefix off a received DATAGRAM payload.
    pub fn on_datagram(&self, connection: &ConnectionId, payload: &[u8]) -> Option<Command> {
        let (session_id, used) = match decode_varint(payload) {
            Ok(prefix) => prefix,
            Err(e) => {
                tracing::trace!(error = %e, "datagram without session prefix");
                return None;
            }
        };
        if !self.has_session(session_id) {
            tracing::trace!(session_id, "datagram for unknown session");
            return None;
        }
        Some(Command::Datagram {
            connection: connection.clone(),
            session_id,
            payload: payload[used..].to_vec(),
        })
    }

    /// Session ids still open; reported closed with the connection.
    pub fn session_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.sessions.iter().copied()
    }
}
