//! QUIC transport parameters (RFC 9000 section 18).
//!
//! Encoded as a sequence of (id: varint, length: varint, value: bytes)
//! where integer values are varint-encoded. Unknown ids are skipped.

use crate::error::{Error, TransportError};
use crate::varint::{decode_varint, varint_len, write_varint};

const PARAM_ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
const PARAM_MAX_IDLE_TIMEOUT: u64 = 0x01;
const PARAM_STATELESS_RESET_TOKEN: u64 = 0x02;
const PARAM_MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
const PARAM_INITIAL_MAX_DATA: u64 = 0x04;
const PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
const PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
const PARAM_INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
const PARAM_INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
const PARAM_INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
const PARAM_ACK_DELAY_EXPONENT: u64 = 0x0a;
const PARAM_MAX_ACK_DELAY: u64 = 0x0b;
const PARAM_DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
const PARAM_ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
const PARAM_INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
const PARAM_RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;
const PARAM_MAX_DATAGRAM_FRAME_SIZE: u64 = 0x20;
/// Private WebTransport extension; one entry per accepted origin.
const PARAM_WEB_ACCEPTED_ORIGIN: u64 = 0x2b60_3742;

/// QUIC transport parameters exchanged during the TLS handshake.
///
/// Integer fields hold the RFC 9000 default when absent from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    pub original_destination_connection_id: Option<Vec<u8>>,
    /// Milliseconds; 0 disables the idle timeout.
    pub max_idle_timeout: u64,
    pub stateless_reset_token: Option<[u8; 16]>,
    pub max_udp_payload_size: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub ack_delay_exponent: u64,
    /// Milliseconds.
    pub max_ack_delay: u64,
    pub disable_active_migration: bool,
    pub active_connection_id_limit: u64,
    pub initial_source_connection_id: Option<Vec<u8>>,
    pub retry_source_connection_id: Option<Vec<u8>>,
    /// `None` means DATAGRAM frames are not supported.
    pub max_datagram_frame_size: Option<u64>,
    pub web_accepted_origins: Vec<String>,
}

impl Default for TransportParams {
    /// RFC 9000 defaults, as assumed for parameters the peer omits.
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: 0,
            stateless_reset_token: None,
            max_udp_payload_size: 65527,
            initial_max_data: 0,
            initial_max_stream_data_bidi_local: 0,
            initial_max_stream_data_bidi_remote: 0,
            initial_max_stream_data_uni: 0,
            initial_max_streams_bidi: 0,
            initial_max_streams_uni: 0,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            disable_active_migration: false,
            active_connection_id_limit: 2,
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            max_datagram_frame_size: None,
            web_accepted_origins: Vec::new(),
        }
    }
}

impl TransportParams {
    /// What this server advertises. Connection IDs and the reset token
    /// are filled in per connection.
    pub fn server_defaults() -> Self {
        Self {
            max_idle_timeout: 30_000,
            max_udp_payload_size: 65527,
            initial_max_data: 1_048_576,
            initial_max_stream_data_bidi_local: 262_144,
            initial_max_stream_data_bidi_remote: 262_144,
            initial_max_stream_data_uni: 131_072,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 3,
            ack_delay_exponent: 3,
            max_ack_delay: 25,
            disable_active_migration: true,
            active_connection_id_limit: 4,
            max_datagram_frame_size: Some(65527),
            web_accepted_origins: vec!["*".into()],
            ..Self::default()
        }
    }

    /// Append the encoded parameters to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        let bytes = |out: &mut Vec<u8>, id: u64, value: &[u8]| -> Result<(), Error> {
            write_varint(id, out)?;
            write_varint(value.len() as u64, out)?;
            out.extend_from_slice(value);
            Ok(())
        };
        let int = |out: &mut Vec<u8>, id: u64, value: u64| -> Result<(), Error> {
            write_varint(id, out)?;
            write_varint(varint_len(value) as u64, out)?;
            write_varint(value, out)
        };

        if let Some(cid) = &self.original_destination_connection_id {
            bytes(out, PARAM_ORIGINAL_DESTINATION_CONNECTION_ID, cid)?;
        }
        int(out, PARAM_MAX_IDLE_TIMEOUT, self.max_idle_timeout)?;
        if let Some(token) = &self.stateless_reset_token {
            bytes(out, PARAM_STATELESS_RESET_TOKEN, token)?;
        }
        int(out, PARAM_MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size)?;
        int(out, PARAM_INITIAL_MAX_DATA, self.initial_max_data)?;
        int(
            out,
            PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local,
        )?;
        int(
            out,
            PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote,
        )?;
        int(
            out,
            PARAM_INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni,
        )?;
        int(out, PARAM_INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi)?;
        int(out, PARAM_INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni)?;
        int(out, PARAM_ACK_DELAY_EXPONENT, self.ack_delay_exponent)?;
        int(out, PARAM_MAX_ACK_DELAY, self.max_ack_delay)?;
        if self.disable_active_migration {
            bytes(out, PARAM_DISABLE_ACTIVE_MIGRATION, &[])?;
        }
        int(
            out,
            PARAM_ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
        )?;
        if let Some(cid) = &self.initial_source_connection_id {
            bytes(out, PARAM_INITIAL_SOURCE_CONNECTION_ID, cid)?;
        }
        if let Some(cid) = &self.retry_source_connection_id {
            bytes(out, PARAM_RETRY_SOURCE_CONNECTION_ID, cid)?;
        }
        if let Some(size) = self.max_datagram_frame_size {
            int(out, PARAM_MAX_DATAGRAM_FRAME_SIZE, size)?;
        }
        for origin in &self.web_accepted_origins {
            bytes(out, PARAM_WEB_ACCEPTED_ORIGIN, origin.as_bytes())?;
        }
        Ok(())
    }

    /// Decode the peer's parameters.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let malformed = || Error::Transport(TransportError::TransportParameterError);
        let int = |value: &[u8]| -> Result<u64, Error> {
            match decode_varint(value) {
                Ok((v, n)) if n == value.len() => Ok(v),
                _ => Err(malformed()),
            }
        };

        let mut params = Self::default();
        let mut off = 0;
        while off < buf.len() {
            let (id, n) = decode_varint(&buf[off..]).map_err(|_| malformed())?;
            off += n;
            let (len, n) = decode_varint(&buf[off..]).map_err(|_| malformed())?;
            off += n;
            let end = off
                .checked_add(usize::try_from(len).map_err(|_| malformed())?)
                .filter(|&end| end <= buf.len())
                .ok_or_else(malformed)?;
            let value = &buf[off..end];
            off = end;

            match id {
                PARAM_ORIGINAL_DESTINATION_CONNECTION_ID => {
                    params.original_destination_connection_id = Some(value.to_vec())
                }
                PARAM_MAX_IDLE_TIMEOUT => params.max_idle_timeout = int(value)?,
                PARAM_STATELESS_RESET_TOKEN => {
                    params.stateless_reset_token =
                        Some(value.try_into().map_err(|_| malformed())?)
                }
                PARAM_MAX_UDP_PAYLOAD_SIZE => params.max_udp_payload_size = int(value)?,
                PARAM_INITIAL_MAX_DATA => params.initial_max_data = int(value)?,
                PARAM_INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    params.initial_max_stream_data_bidi_local = int(value)?
                }
                PARAM_INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    params.initial_max_stream_data_bidi_remote = int(value)?
                }
                PARAM_INITIAL_MAX_STREAM_DATA_UNI => {
                    params.initial_max_stream_data_uni = int(value)?
                }
                PARAM_INITIAL_MAX_STREAMS_BIDI => params.initial_max_streams_bidi = int(value)?,
                PARAM_INITIAL_MAX_STREAMS_UNI => params.initial_max_streams_uni = int(value)?,
                PARAM_ACK_DELAY_EXPONENT => params.ack_delay_exponent = int(value)?,
                PARAM_MAX_ACK_DELAY => params.max_ack_delay = int(value)?,
                PARAM_DISABLE_ACTIVE_MIGRATION => params.disable_active_migration = true,
                PARAM_ACTIVE_CONNECTION_ID_LIMIT => {
                    params.active_connection_id_limit = int(value)?
                }
                PARAM_INITIAL_SOURCE_CONNECTION_ID => {
                    params.initial_source_connection_id = Some(value.to_vec())
                }
                PARAM_RETRY_SOURCE_CONNECTION_ID => {
                    params.retry_source_connection_id = Some(value.to_vec())
                }
                PARAM_MAX_DATAGRAM_FRAME_SIZE => {
                    params.max_datagram_frame_size = Some(int(value)?)
                }
                PARAM_WEB_ACCEPTED_ORIGIN => params
                    .web_accepted_origins
                    .push(String::from_utf8_lossy(value).into_owned()),
                _ => {}
            }
        }

        if params.ack_delay_exponent > 20 {
            return Err(malformed());
        }
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults_roundtrip() {
        let mut params = TransportParams::server_defaults();
        params.original_destination_connection_id = Some(vec![1, 2, 3, 4]);
        params.initial_source_connection_id = Some(vec![9; 8]);
        params.stateless_reset_token = Some([0x5a; 16]);
        params.web_accepted_origins.push("https://example.com".into());

        let mut buf = Vec::new();
        params.encode(&mut buf).unwrap();
        assert_eq!(TransportParams::decode(&buf).unwrap(), params);
    }

    #[test]
    fn absent_params_take_rfc_defaults() {
        let params = TransportParams::decode(&[]).unwrap();
        assert_eq!(params.ack_delay_exponent, 3);
        assert_eq!(params.max_udp_payload_size, 65527);
        assert_eq!(params.max_datagram_frame_size, None);
        assert!(!params.disable_active_migration);
    }

    #[test]
    fn unknown_params_ignored() {
        let mut buf = Vec::new();
        // max_idle_timeout = 1000
        buf.extend_from_slice(&[0x01, 0x02, 0x43, 0xe8]);
        // GREASE id 0x1b (27) with two opaque bytes
        buf.extend_from_slice(&[0x1b, 0x02, 0xff, 0xff]);
        let params = TransportParams::decode(&buf).unwrap();
        assert_eq!(params.max_idle_timeout, 1000);
    }

    #[test]
    fn truncated_value_rejected() {
        // initial_max_data claims 4 bytes, only 1 present
        let buf = [0x04, 0x04, 0x80];
        assert_eq!(
            TransportParams::decode(&buf),
            Err(Error::Transport(TransportError::TransportParameterError))
        );
    }

    #[test]
    fn origins_repeat() {
        let mut buf = Vec::new();
        for origin in ["*", "https://a.test"] {
            buf.extend_from_slice(&[0x80 | 0x2b, 0x60, 0x37, 0x42, origin.len() as u8]);
            buf.extend_from_slice(origin.as_bytes());
        }
        let params = TransportParams::decode(&buf).unwrap();
        assert_eq!(params.web_accepted_origins, vec!["*", "https://a.test"]);
    }
}
