use crate::tls::alert::AlertDescription;

/// QUIC transport error codes (RFC 9000 §20).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum TransportError {
    NoError = 0x00,
    InternalError = 0x01,
    ConnectionRefused = 0x02,
    FlowControlError = 0x03,
    StreamLimitError = 0x04,
    StreamStateError = 0x05,
    FinalSizeError = 0x06,
    FrameEncodingError = 0x07,
    TransportParameterError = 0x08,
    ConnectionIdLimitError = 0x09,
    ProtocolViolation = 0x0a,
    InvalidToken = 0x0b,
    ApplicationError = 0x0c,
    CryptoBufferExceeded = 0x0d,
    KeyUpdateError = 0x0e,
    AeadLimitReached = 0x0f,
    NoViablePath = 0x10,
}

impl TransportError {
    /// Convert a transport error to its RFC 9000 wire code.
    pub const fn to_code(self) -> u64 {
        self as u64
    }

    /// Wire code of a `CRYPTO_ERROR` carrying a TLS alert (0x0100 + alert).
    pub const fn crypto_error(alert_code: u8) -> u64 {
        0x0100 + alert_code as u64
    }

    /// Parse a wire error code into a `TransportError`.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x00 => Some(Self::NoError),
            0x01 => Some(Self::InternalError),
            0x02 => Some(Self::ConnectionRefused),
            0x03 => Some(Self::FlowControlError),
            0x04 => Some(Self::StreamLimitError),
            0x05 => Some(Self::StreamStateError),
            0x06 => Some(Self::FinalSizeError),
            0x07 => Some(Self::FrameEncodingError),
            0x08 => Some(Self::TransportParameterError),
            0x09 => Some(Self::ConnectionIdLimitError),
            0x0a => Some(Self::ProtocolViolation),
            0x0b => Some(Self::InvalidToken),
            0x0c => Some(Self::ApplicationError),
            0x0d => Some(Self::CryptoBufferExceeded),
            0x0e => Some(Self::KeyUpdateError),
            0x0f => Some(Self::AeadLimitReached),
            0x10 => Some(Self::NoViablePath),
            _ => None,
        }
    }
}

/// HTTP/3 and QPACK error codes (RFC 9114 §8.1, RFC 9204 §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum H3Error {
    NoError = 0x0100,
    GeneralProtocolError = 0x0101,
    InternalError = 0x0102,
    StreamCreationError = 0x0103,
    ClosedCriticalStream = 0x0104,
    FrameUnexpected = 0x0105,
    FrameError = 0x0106,
    ExcessiveLoad = 0x0107,
    IdError = 0x0108,
    SettingsError = 0x0109,
    MissingSettings = 0x010a,
    RequestRejected = 0x010b,
    RequestCancelled = 0x010c,
    RequestIncomplete = 0x010d,
    MessageError = 0x010e,
    ConnectError = 0x010f,
    VersionFallback = 0x0110,
    QpackDecompressionFailed = 0x0200,
    QpackEncoderStreamError = 0x0201,
    QpackDecoderStreamError = 0x0202,
}

impl H3Error {
    pub const fn to_code(self) -> u64 {
        self as u64
    }
}

/// Failures that abort the TLS handshake of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("no cipher suite in common with the client")]
    UnsupportedCipherSuite,
    #[error("no key share for a supported group")]
    UnsupportedGroup,
    #[error("client did not offer a signature scheme usable with the configured key")]
    NoCompatibleSignatureScheme,
    #[error("unsupported private key type")]
    UnsupportedKeyType,
    #[error("client Finished did not verify")]
    BadFinished,
    #[error("unexpected handshake message")]
    UnexpectedMessage,
    #[error("malformed handshake message")]
    Decode,
    #[error("client does not offer TLS 1.3")]
    UnsupportedVersion,
    #[error("no application protocol in common with the client")]
    NoApplicationProtocol,
    #[error("required extension missing from ClientHello")]
    MissingExtension,
    #[error("key share does not contribute to the shared secret")]
    IllegalParameter,
}

impl HandshakeError {
    /// TLS alert reported to the peer inside `CRYPTO_ERROR`.
    pub const fn alert(self) -> AlertDescription {
        match self {
            Self::UnsupportedCipherSuite
            | Self::UnsupportedGroup
            | Self::NoCompatibleSignatureScheme => AlertDescription::HandshakeFailure,
            Self::UnsupportedKeyType => AlertDescription::InternalError,
            Self::BadFinished => AlertDescription::DecryptError,
            Self::UnexpectedMessage => AlertDescription::UnexpectedMessage,
            Self::Decode => AlertDescription::DecodeError,
            Self::UnsupportedVersion => AlertDescription::ProtocolVersion,
            Self::NoApplicationProtocol => AlertDescription::NoApplicationProtocol,
            Self::MissingExtension => AlertDescription::MissingExtension,
            Self::IllegalParameter => AlertDescription::IllegalParameter,
        }
    }
}

/// Top-level crate error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// QUIC transport error; the connection must close.
    #[error("transport error: {0:?}")]
    Transport(TransportError),
    /// HTTP/3 or QPACK error.
    #[error("HTTP/3 error: {0:?}")]
    Http3(H3Error),
    /// Fatal TLS handshake failure.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    /// AEAD open/seal or key construction failed.
    #[error("cryptographic error")]
    Crypto,
    /// Input ended early, or an output buffer is too small.
    #[error("buffer too small, need {needed} bytes")]
    BufferTooSmall { needed: usize },
    /// Value does not fit in a 62-bit QUIC varint.
    #[error("value {0} exceeds the varint range")]
    VarintOverflow(u64),
    /// Settings builder was given a name it does not know.
    #[error("unknown HTTP/3 setting {0:?}")]
    UnknownSetting(String),
    /// No connection with the given id.
    #[error("unknown connection")]
    UnknownConnection,
    /// Invalid state for the requested operation.
    #[error("invalid state")]
    InvalidState,
    /// Connection is closed.
    #[error("connection closed")]
    Closed,
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<H3Error> for Error {
    fn from(e: H3Error) -> Self {
        Error::Http3(e)
    }
}

impl Error {
    /// Error code carried by a transport `CONNECTION_CLOSE` frame.
    pub fn close_code(&self) -> u64 {
        match self {
            Error::Transport(e) => e.to_code(),
            Error::Handshake(e) => TransportError::crypto_error(e.alert().to_u8()),
            Error::BufferTooSmall { .. } => TransportError::FrameEncodingError.to_code(),
            _ => TransportError::InternalError.to_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_codes_roundtrip() {
        for code in 0x00..=0x10 {
            let e = TransportError::from_code(code).unwrap();
            assert_eq!(e.to_code(), code);
        }
        assert_eq!(TransportError::from_code(0x11), None);
    }

    #[test]
    fn handshake_errors_close_with_crypto_code() {
        let e = Error::from(HandshakeError::NoCompatibleSignatureScheme);
        // handshake_failure(40)
        assert_eq!(e.close_code(), 0x0128);
        let e = Error::from(HandshakeError::BadFinished);
        assert_eq!(e.close_code(), 0x0100 + 51);
    }

    #[test]
    fn display_mentions_cause() {
        let e = Error::UnknownSetting("SETTINGS_BOGUS".into());
        assert_eq!(e.to_string(), "unknown HTTP/3 setting \"SETTINGS_BOGUS\"");
    }
}
