//! Stream classification (RFC 9114 §6).

pub const STREAM_TYPE_CONTROL: u8 = 0x00;
pub const STREAM_TYPE_PUSH: u8 = 0x01;
pub const STREAM_TYPE_QPACK_ENCODER: u8 = 0x02;
pub const STREAM_TYPE_QPACK_DECODER: u8 = 0x03;

/// Bit 1 of a stream id is set on unidirectional streams.
pub const fn is_unidirectional(stream_id: u64) -> bool {
    stream_id & 0x02 != 0
}

/// Bit 0 of a stream id is set on server-initiated streams.
pub const fn is_server_initiated(stream_id: u64) -> bool {
    stream_id & 0x01 != 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Bidirectional streams always carry a request and its response.
    Request,
    Control,
    Push,
    QpackEncoder,
    QpackDecoder,
    /// Unidirectional stream of a type we do not handle; its data is
    /// ignored.
    Unknown(u8),
}

impl StreamKind {
    /// Classify a stream from its id and, for unidirectional streams, the
    /// first byte of its data.
    pub fn classify(stream_id: u64, first_byte: u8) -> Self {
        if !is_unidirectional(stream_id) {
            return Self::Request;
        }
        match first_byte {
            STREAM_TYPE_CONTROL => Self::Control,
            STREAM_TYPE_PUSH => Self::Push,
            STREAM_TYPE_QPACK_ENCODER => Self::QpackEncoder,
            STREAM_TYPE_QPACK_DECODER => Self::QpackDecoder,
            other => Self::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_direction_and_type() {
        // client bidi 0 is a request regardless of content
        assert_eq!(StreamKind::classify(0, 0x01), StreamKind::Request);
        assert_eq!(StreamKind::classify(2, 0x00), StreamKind::Control);
        assert_eq!(StreamKind::classify(6, 0x02), StreamKind::QpackEncoder);
        assert_eq!(StreamKind::classify(10, 0x03), StreamKind::QpackDecoder);
        assert_eq!(StreamKind::classify(14, 0x01), StreamKind::Push);
        assert_eq!(StreamKind::classify(18, 0x40), StreamKind::Unknown(0x40));
    }

    #[test]
    fn stream_id_bits() {
        assert!(!is_unidirectional(4));
        assert!(is_unidirectional(3));
        assert!(is_server_initiated(3));
        assert!(!is_server_initiated(2));
    }
}
