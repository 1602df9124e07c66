//! Encoded field sections: the payload of HEADERS frames.

use super::instructions::text;
use super::integer::{decode_integer, decode_string, encode_integer, encode_string};
use super::static_table::{self, StaticMatch};
use super::{DynamicTable, QpackError};

/// A decoded header list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSection {
    pub fields: Vec<(String, String)>,
    /// Non-zero when the section referenced the dynamic table and must be
    /// acknowledged on the decoder stream.
    pub required_insert_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Complete(FieldSection),
    /// The section needs dynamic table entries that have not arrived yet.
    Blocked { required_insert_count: u64 },
}

/// Reverse the Required Insert Count wire encoding (RFC 9204 §4.5.1.1).
fn required_insert_count(encoded: u64, table: &DynamicTable) -> Result<u64, QpackError> {
    if encoded == 0 {
        return Ok(0);
    }
    let max_entries = table.max_entries();
    let full_range = 2 * max_entries;
    if encoded > full_range {
        return Err(QpackError::InvalidInsertCount);
    }
    let max_value = table.insert_count() + max_entries;
    let max_wrapped = (max_value / full_range) * full_range;
    let mut ric = max_wrapped + encoded - 1;
    if ric > max_value {
        if ric <= full_range {
            return Err(QpackError::InvalidInsertCount);
        }
        ric -= full_range;
    }
    if ric == 0 {
        return Err(QpackError::InvalidInsertCount);
    }
    Ok(ric)
}

struct Ctx<'a> {
    table: &'a DynamicTable,
    base: u64,
    ric: u64,
}

impl Ctx<'_> {
    fn dynamic(&self, absolute: Option<u64>, index: u64) -> Result<&(String, String), QpackError> {
        absolute
            .filter(|&abs| abs < self.ric)
            .and_then(|abs| self.table.get_absolute(abs))
            .ok_or(QpackError::InvalidIndex(index))
    }

    fn relative(&self, index: u64) -> Result<&(String, String), QpackError> {
        let abs = self.base.checked_sub(index).and_then(|v| v.checked_sub(1));
        self.dynamic(abs, index)
    }

    fn post_base(&self, index: u64) -> Result<&(String, String), QpackError> {
        self.dynamic(self.base.checked_add(index), index)
    }
}

fn static_entry(index: u64) -> Result<(&'static str, &'static str), QpackError> {
    static_table::get(index).ok_or(QpackError::InvalidIndex(index))
}

/// Decode one encoded field section against the current dynamic table.
///
/// A section whose Required Insert Count is beyond the table's insert
/// count is reported as `Blocked` and nothing is resolved.
pub fn decode_field_section(block: &[u8], table: &DynamicTable) -> Result<Decoded, QpackError> {
    let (encoded_ric, mut pos) = decode_integer(block, 8)?;
    let ric = required_insert_count(encoded_ric, table)?;

    let sign = *block.get(pos).ok_or(QpackError::Truncated)? & 0x80 != 0;
    let (delta, used) = decode_integer(&block[pos..], 7)?;
    pos += used;
    let base = if sign {
        ric.checked_sub(delta)
            .and_then(|v| v.checked_sub(1))
            .ok_or(QpackError::InvalidInsertCount)?
    } else {
        ric.checked_add(delta).ok_or(QpackError::InvalidInsertCount)?
    };

    if ric > table.insert_count() {
        return Ok(Decoded::Blocked {
            required_insert_count: ric,
        });
    }

    let ctx = Ctx { table, base, ric };
    let mut fields = Vec::new();
    while pos < block.len() {
        let rest = &block[pos..];
        let first = rest[0];
        let (field, used) = if first & 0x80 != 0 {
            // 1T: indexed field line
            let (index, n) = decode_integer(rest, 6)?;
            let field = if first & 0x40 != 0 {
                let (name, value) = static_entry(index)?;
                (name.to_string(), value.to_string())
            } else {
                ctx.relative(index)?.clone()
            };
            (field, n)
        } else if first & 0x40 != 0 {
            // 01NT: literal with name reference
            let (index, n) = decode_integer(rest, 4)?;
            let name = if first & 0x10 != 0 {
                static_entry(index)?.0.to_string()
            } else {
                ctx.relative(index)?.0.clone()
            };
            let (value, m) = decode_string(&rest[n..], 7)?;
            ((name, text(&value)), n + m)
        } else if first & 0x20 != 0 {
            // 001NH: literal with literal name
            let (name, n) = decode_string(rest, 3)?;
            let (value, m) = decode_string(&rest[n..], 7)?;
            ((text(&name), text(&value)), n + m)
        } else if first & 0x10 != 0 {
            // 0001: indexed field line with post-base index
            let (index, n) = decode_integer(rest, 4)?;
            (ctx.post_base(index)?.clone(), n)
        } else {
            // 0000N: literal with post-base name reference
            let (index, n) = decode_integer(rest, 3)?;
            let name = ctx.post_base(index)?.0.clone();
            let (value, m) = decode_string(&rest[n..], 7)?;
            ((name, text(&value)), n + m)
        };
        fields.push(field);
        pos += used;
    }

    Ok(Decoded::Complete(FieldSection {
        fields,
        required_insert_count: ric,
    }))
}

/// Encode a header list without touching the dynamic table.
///
/// Exact static matches become indexed lines, name matches become
/// literals with a static name reference, everything else is a literal
/// with a literal name.
pub fn encode_field_section<N: AsRef<str>, V: AsRef<str>>(headers: &[(N, V)]) -> Vec<u8> {
    // Required Insert Count 0, Delta Base 0
    let mut out = vec![0x00, 0x00];
    for (name, value) in headers {
        let (name, value) = (name.as_ref(), value.as_ref());
        match static_table::lookup(name, value) {
            Some(StaticMatch::Exact(index)) => encode_integer(index as u64, 6, 0xc0, &mut out),
            Some(StaticMatch::Name(index)) => {
                encode_integer(index as u64, 4, 0x50, &mut out);
                encode_string(value.as_bytes(), 7, 0, &mut out);
            }
            None => {
                encode_string(name.as_bytes(), 3, 0x20, &mut out);
                encode_string(value.as_bytes(), 7, 0, &mut out);
            }
        }
    }
    out
}
