//! Little-endian varint / fixed32 / fixed64 / length-delimited readers
//! over a borrowed byte slice, plus the writer-side counterparts used
//! to build test fixtures (and by callers assembling wire-format
//! messages rather than just decoding them).

use crate::error::{DecError, DecResult};
use crate::field::{Field, WireType};

/// Reads a little-endian base-128 varint (7 data bits per byte, high
/// bit set means "continue"). Returns the decoded value and the number
/// of bytes consumed.
pub fn read_varint(buf: &[u8]) -> DecResult<(u64, usize)> {
    let mut result: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i == 10 {
            return Err(DecError::VarintTooLong);
        }
        let data = (byte & 0x7F) as u64;
        if i == 9 && data > 1 {
            return Err(DecError::VarintTooLong);
        }
        result |= data << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(DecError::Truncated("varint"))
}

pub fn read_fixed32(buf: &[u8]) -> DecResult<(u32, usize)> {
    if buf.len() < 4 {
        return Err(DecError::Truncated("fixed32"));
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[..4]);
    Ok((u32::from_le_bytes(bytes), 4))
}

pub fn read_fixed64(buf: &[u8]) -> DecResult<(u64, usize)> {
    if buf.len() < 8 {
        return Err(DecError::Truncated("fixed64"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    Ok((u64::from_le_bytes(bytes), 8))
}

/// Reads `tag` then dispatches on its wire type to produce a `Field`
/// borrowed from `buf`. Returns the field and the number of bytes of
/// `buf` consumed (tag + payload).
pub fn read_field(buf: &[u8]) -> DecResult<(Field<'_>, usize)> {
    let (tag, tag_len) = read_varint(buf)?;
    let id = (tag >> 3) as u16;
    let wire_bits = tag & 0x7;
    let wire_type = WireType::from_tag_bits(wire_bits).ok_or(DecError::UnknownWireType(wire_bits))?;
    let rest = &buf[tag_len..];
    let (field, payload_len) = match wire_type {
        WireType::VarInt => {
            let (v, n) = read_varint(rest)?;
            (Field::scalar(id, WireType::VarInt, v), n)
        }
        WireType::Fixed32 => {
            let (v, n) = read_fixed32(rest)?;
            (Field::scalar(id, WireType::Fixed32, v as u64), n)
        }
        WireType::Fixed64 => {
            let (v, n) = read_fixed64(rest)?;
            (Field::scalar(id, WireType::Fixed64, v), n)
        }
        WireType::LengthDelimited => {
            let (len, len_bytes) = read_varint(rest)?;
            let len = len as usize;
            if rest.len() < len_bytes + len {
                return Err(DecError::Truncated("length-delimited payload"));
            }
            let data = &rest[len_bytes..len_bytes + len];
            (Field::bytes(id, data), len_bytes + len)
        }
    };
    Ok((field, tag_len + payload_len))
}

/// Iterates every top-level field in `buf` in source order. Malformed
/// trailing bytes surface as the iterator's final `Err` item.
pub fn iter_fields(buf: &[u8]) -> FieldIter<'_> {
    FieldIter { buf, done: false }
}

pub struct FieldIter<'a> {
    buf: &'a [u8],
    done: bool,
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = DecResult<Field<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.buf.is_empty() {
            return None;
        }
        match read_field(self.buf) {
            Ok((field, consumed)) => {
                self.buf = &self.buf[consumed..];
                Some(Ok(field))
            }
            Err(e) => {
                self.done = true;
                tracing::warn!(error = %e, "malformed field while iterating buffer");
                Some(Err(e))
            }
        }
    }
}

/// Writer-side helpers, used to assemble test fixtures and by callers
/// constructing wire-format messages rather than merely decoding them.
pub mod encode {
    pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    pub fn write_tag(out: &mut Vec<u8>, field_id: u16, wire_type: u8) {
        write_varint(out, ((field_id as u64) << 3) | wire_type as u64);
    }

    pub fn write_varint_field(out: &mut Vec<u8>, field_id: u16, value: u64) {
        write_tag(out, field_id, 0);
        write_varint(out, value);
    }

    pub fn write_fixed32_field(out: &mut Vec<u8>, field_id: u16, value: u32) {
        write_tag(out, field_id, 5);
        out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_fixed64_field(out: &mut Vec<u8>, field_id: u16, value: u64) {
        write_tag(out, field_id, 1);
        out.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes_field(out: &mut Vec<u8>, field_id: u16, data: &[u8]) {
        write_tag(out, field_id, 2);
        write_varint(out, data.len() as u64);
        out.extend_from_slice(data);
    }

    pub fn write_message_field(out: &mut Vec<u8>, field_id: u16, body: &[u8]) {
        write_bytes_field(out, field_id, body);
    }
}
