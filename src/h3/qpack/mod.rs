//! QPACK header compression (RFC 9204).
//!
//! Decoding supports the full dynamic table: the peer's encoder stream
//! feeds [`DynamicTable`] and field sections may reference it. Encoding
//! only uses the static table and literals, so our own encoder stream
//! never carries instructions.

pub mod field_section;
pub mod huffman;
pub mod instructions;
pub mod integer;
pub mod static_table;
mod table;

pub use field_section::{decode_field_section, encode_field_section, Decoded, FieldSection};
pub use instructions::{
    insert_count_increment, parse_encoder_instructions, section_acknowledgment,
    EncoderInstruction,
};
pub use table::{DynamicTable, ENTRY_OVERHEAD};

use crate::error::{Error, H3Error};

/// Largest dynamic table we let the peer's encoder use.
pub const MAX_TABLE_CAPACITY: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QpackError {
    #[error("truncated QPACK input")]
    Truncated,
    #[error("QPACK integer overflow")]
    IntegerOverflow,
    #[error("invalid Huffman string")]
    Huffman,
    #[error("invalid table index {0}")]
    InvalidIndex(u64),
    #[error("entry larger than the dynamic table capacity")]
    EntryTooLarge,
    #[error("table capacity {0} exceeds the advertised maximum")]
    CapacityExceeded(u64),
    #[error("invalid required insert count or base")]
    InvalidInsertCount,
}

impl From<QpackError> for Error {
    fn from(_: QpackError) -> Self {
        Error::Http3(H3Error::QpackDecompressionFailed)
    }
}
