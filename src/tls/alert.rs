//! TLS alerts raised by the server handshake (RFC 8446 section 6).
//!
//! QUIC has no alert records: a fatal alert becomes a `CRYPTO_ERROR`
//! transport close code, `0x0100 + description`.

use crate::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    UnexpectedMessage = 10,
    HandshakeFailure = 40,
    IllegalParameter = 47,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InternalError = 80,
    MissingExtension = 109,
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            10 => Self::UnexpectedMessage,
            40 => Self::HandshakeFailure,
            47 => Self::IllegalParameter,
            50 => Self::DecodeError,
            51 => Self::DecryptError,
            70 => Self::ProtocolVersion,
            80 => Self::InternalError,
            109 => Self::MissingExtension,
            120 => Self::NoApplicationProtocol,
            _ => return None,
        })
    }

    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Transport close code carrying this alert.
    pub const fn close_code(self) -> u64 {
        TransportError::crypto_error(self as u8)
    }
}
