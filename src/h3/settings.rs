//! HTTP/3 SETTINGS (RFC 9114 §7.2.4) and the extension settings used by
//! WebTransport and HTTP datagrams.

use std::collections::BTreeMap;

use crate::error::{Error, H3Error};
use crate::varint::{decode_varint, write_varint};

pub const QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
pub const MAX_FIELD_SECTION_SIZE: u64 = 0x06;
pub const QPACK_BLOCKED_STREAMS: u64 = 0x07;
pub const ENABLE_CONNECT_PROTOCOL: u64 = 0x08;
pub const H3_DATAGRAM: u64 = 0x33;
pub const ENABLE_WEBTRANSPORT: u64 = 0x2b60_3742;
pub const NO_RFC9114_LEGACY_CODEPOINT: u64 = 0x0d;
pub const WT_MAX_SESSIONS: u64 = 0x14e9_cd29;
pub const ENABLE_METADATA: u64 = 0x4d44;

const NAMES: [(u64, &str); 9] = [
    (QPACK_MAX_TABLE_CAPACITY, "SETTINGS_QPACK_MAX_TABLE_CAPACITY"),
    (MAX_FIELD_SECTION_SIZE, "SETTINGS_MAX_FIELD_SECTION_SIZE"),
    (QPACK_BLOCKED_STREAMS, "SETTINGS_QPACK_BLOCKED_STREAMS"),
    (ENABLE_CONNECT_PROTOCOL, "SETTINGS_ENABLE_CONNECT_PROTOCOL"),
    (H3_DATAGRAM, "SETTINGS_H3_DATAGRAM"),
    (ENABLE_WEBTRANSPORT, "SETTINGS_ENABLE_WEBTRANSPORT"),
    (NO_RFC9114_LEGACY_CODEPOINT, "SETTINGS_NO_RFC9114_LEGACY_CODEPOINT"),
    (WT_MAX_SESSIONS, "SETTINGS_WT_MAX_SESSIONS"),
    (ENABLE_METADATA, "SETTINGS_ENABLE_METADATA"),
];

/// Map of setting identifier to value. Unknown identifiers received from
/// a peer are kept but carry no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<u64, u64>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// What we advertise on our control stream.
    pub fn server_defaults() -> Self {
        let mut s = Self::new();
        s.set(QPACK_MAX_TABLE_CAPACITY, 65536)
            .set(MAX_FIELD_SECTION_SIZE, 65536)
            .set(ENABLE_WEBTRANSPORT, 1)
            .set(H3_DATAGRAM, 1)
            .set(ENABLE_CONNECT_PROTOCOL, 1)
            .set(WT_MAX_SESSIONS, 1);
        s
    }

    /// Build settings from their `SETTINGS_*` names.
    pub fn from_named(named: &[(&str, u64)]) -> Result<Self, Error> {
        let mut s = Self::new();
        for &(name, value) in named {
            let id = Self::id_of(name).ok_or_else(|| Error::UnknownSetting(name.to_string()))?;
            s.set(id, value);
        }
        Ok(s)
    }

    pub fn id_of(name: &str) -> Option<u64> {
        NAMES.iter().find(|(_, n)| *n == name).map(|(id, _)| *id)
    }

    pub fn name_of(id: u64) -> Option<&'static str> {
        NAMES.iter().find(|(i, _)| *i == id).map(|(_, n)| *n)
    }

    pub fn set(&mut self, id: u64, value: u64) -> &mut Self {
        self.values.insert(id, value);
        self
    }

    pub fn get(&self, id: u64) -> Option<u64> {
        self.values.get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.values.iter().map(|(&id, &v)| (id, v))
    }

    pub fn qpack_max_table_capacity(&self) -> u64 {
        self.get(QPACK_MAX_TABLE_CAPACITY).unwrap_or(0)
    }

    pub fn max_field_section_size(&self) -> Option<u64> {
        self.get(MAX_FIELD_SECTION_SIZE)
    }

    pub fn h3_datagram(&self) -> bool {
        self.get(H3_DATAGRAM).is_some_and(|v| v > 0)
    }

    pub fn webtransport(&self) -> bool {
        self.get(ENABLE_WEBTRANSPORT).is_some_and(|v| v > 0)
    }

    /// Append the SETTINGS frame payload: `(id, value)` varint pairs.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), Error> {
        for (id, value) in self.iter() {
            write_varint(id, out)?;
            write_varint(value, out)?;
        }
        Ok(())
    }

    /// Parse a SETTINGS frame payload.
    ///
    /// A repeated identifier or one reserved from HTTP/2 (0x02 to 0x05)
    /// is a `SETTINGS_ERROR`; a truncated pair is a `FRAME_ERROR`.
    pub fn decode(mut payload: &[u8]) -> Result<Self, Error> {
        let mut s = Self::new();
        while !payload.is_empty() {
            let (id, n) = decode_varint(payload).map_err(|_| H3Error::FrameError)?;
            let (value, m) = decode_varint(&payload[n..]).map_err(|_| H3Error::FrameError)?;
            payload = &payload[n + m..];
            if (0x02..=0x05).contains(&id) || s.values.insert(id, value).is_some() {
                return Err(H3Error::SettingsError.into());
            }
        }
        Ok(s)
    }
}
