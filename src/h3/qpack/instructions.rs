//! Encoder and decoder stream instructions (RFC 9204 §4.3, §4.4).

use super::integer::{decode_integer, decode_string, encode_integer, encode_string};
use super::{static_table, DynamicTable, QpackError};

/// An instruction received on the peer's QPACK encoder stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInstruction {
    /// `1T` + 6-bit name index, then a value string.
    InsertWithNameRef {
        static_table: bool,
        name_index: u64,
        value: Vec<u8>,
    },
    /// `01H` + 5-bit name length, then a value string.
    InsertWithLiteralName { name: Vec<u8>, value: Vec<u8> },
    /// `001` + 5-bit capacity.
    SetCapacity(u64),
    /// `000` + 5-bit relative index.
    Duplicate(u64),
}

impl EncoderInstruction {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::InsertWithNameRef {
                static_table,
                name_index,
                value,
            } => {
                let flags = if *static_table { 0xc0 } else { 0x80 };
                encode_integer(*name_index, 6, flags, out);
                encode_string(value, 7, 0, out);
            }
            Self::InsertWithLiteralName { name, value } => {
                encode_string(name, 5, 0x40, out);
                encode_string(value, 7, 0, out);
            }
            Self::SetCapacity(capacity) => encode_integer(*capacity, 5, 0x20, out),
            Self::Duplicate(index) => encode_integer(*index, 5, 0x00, out),
        }
    }

    /// Apply the instruction to `table`.
    pub fn apply(&self, table: &mut DynamicTable) -> Result<(), QpackError> {
        let inserted = match self {
            Self::SetCapacity(capacity) => return table.set_capacity(*capacity),
            Self::Duplicate(index) => table.duplicate(*index)?,
            Self::InsertWithNameRef {
                static_table: true,
                name_index,
                value,
            } => {
                let (name, _) =
                    static_table::get(*name_index).ok_or(QpackError::InvalidIndex(*name_index))?;
                table.insert(name.to_string(), text(value))
            }
            Self::InsertWithNameRef {
                static_table: false,
                name_index,
                value,
            } => {
                let name = table
                    .get_relative(table.insert_count(), *name_index)
                    .map(|(name, _)| name.clone())
                    .ok_or(QpackError::InvalidIndex(*name_index))?;
                table.insert(name, text(value))
            }
            Self::InsertWithLiteralName { name, value } => table.insert(text(name), text(value)),
        };
        if inserted {
            Ok(())
        } else {
            Err(QpackError::EntryTooLarge)
        }
    }
}

pub(crate) fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_one(buf: &[u8]) -> Result<(EncoderInstruction, usize), QpackError> {
    let first = *buf.first().ok_or(QpackError::Truncated)?;
    if first & 0x80 != 0 {
        let (name_index, n) = decode_integer(buf, 6)?;
        let (value, m) = decode_string(&buf[n..], 7)?;
        let insn = EncoderInstruction::InsertWithNameRef {
            static_table: first & 0x40 != 0,
            name_index,
            value,
        };
        Ok((insn, n + m))
    } else if first & 0x40 != 0 {
        let (name, n) = decode_string(buf, 5)?;
        let (value, m) = decode_string(&buf[n..], 7)?;
        Ok((EncoderInstruction::InsertWithLiteralName { name, value }, n + m))
    } else if first & 0x20 != 0 {
        let (capacity, n) = decode_integer(buf, 5)?;
        Ok((EncoderInstruction::SetCapacity(capacity), n))
    } else {
        let (index, n) = decode_integer(buf, 5)?;
        Ok((EncoderInstruction::Duplicate(index), n))
    }
}

/// Parse every complete instruction at the start of `buf`.
///
/// Returns the instructions and the number of bytes they used. A trailing
/// partial instruction is left unconsumed for the next call.
pub fn parse_encoder_instructions(
    buf: &[u8],
) -> Result<(Vec<EncoderInstruction>, usize), QpackError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        match parse_one(&buf[pos..]) {
            Ok((insn, used)) => {
                out.push(insn);
                pos += used;
            }
            Err(QpackError::Truncated) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((out, pos))
}

/// Section Acknowledgment: `1` + 7-bit stream id.
pub fn section_acknowledgment(stream_id: u64, out: &mut Vec<u8>) {
    encode_integer(stream_id, 7, 0x80, out);
}

/// Insert Count Increment: `00` + 6-bit increment.
pub fn insert_count_increment(increment: u64, out: &mut Vec<u8>) {
    encode_integer(increment, 6, 0x00, out);
}
