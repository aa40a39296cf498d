use crate::error::{Status, StatusOr};

/// Wire type tag embedded in the low 3 bits of every field tag.
/// Start/End-group (3/4 in the protobuf numbering this mirrors) are
/// deliberately not represented: this decoder never accepts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    VarInt = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    pub fn from_tag_bits(bits: u64) -> Option<WireType> {
        match bits {
            0 => Some(WireType::VarInt),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

/// Tagged scalar payload, decoded from a `VarInt`, `Fixed32`, or
/// `Fixed64` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    VarInt(u64),
    Fixed32(u32),
    Fixed64(u64),
}

/// Either a scalar payload or a borrowed slice, depending on the
/// field's wire type. Rust's borrow checker already gives zero-copy
/// safety for the `LengthDelimited` case, so this holds a real slice
/// reference rather than a pointer-cast-to-integer the way the
/// original's POD `Field` does to stay allocation-free.
#[derive(Debug, Clone, Copy)]
enum Payload<'a> {
    Scalar(u64),
    Bytes(&'a [u8]),
}

/// A single decoded field: `(id, wire_type, payload)`. The zero-id
/// field is the invalid sentinel, returned when a lookup finds
/// nothing (see `Cursor`).
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    pub id: u16,
    pub wire_type: WireType,
    payload: Payload<'a>,
}

impl<'a> Field<'a> {
    pub(crate) fn scalar(id: u16, wire_type: WireType, raw: u64) -> Self {
        Field {
            id,
            wire_type,
            payload: Payload::Scalar(raw),
        }
    }

    pub(crate) fn bytes(id: u16, data: &'a [u8]) -> Self {
        Field {
            id,
            wire_type: WireType::LengthDelimited,
            payload: Payload::Bytes(data),
        }
    }

    /// The invalid sentinel: `id == 0`. Returned by cursor lookups that
    /// find nothing to decode, never read from a buffer.
    pub fn invalid() -> Self {
        Field {
            id: 0,
            wire_type: WireType::VarInt,
            payload: Payload::Scalar(0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id != 0
    }

    fn raw_numeric(&self) -> Option<u64> {
        match self.payload {
            Payload::Scalar(v) => Some(v),
            Payload::Bytes(_) => None,
        }
    }

    /// Accepts `VarInt` or `Fixed32`; fails loudly in debug builds and
    /// returns `0` in release on any other wire type.
    pub fn as_int32(&self) -> i32 {
        self.as_uint32() as i32
    }

    pub fn as_uint32(&self) -> u32 {
        match (self.wire_type, self.raw_numeric()) {
            (WireType::VarInt, Some(v)) | (WireType::Fixed32, Some(v)) => v as u32,
            _ => {
                debug_assert!(false, "as_uint32 on field {} of wire type {:?}", self.id, self.wire_type);
                0
            }
        }
    }

    /// Accepts any numeric wire type.
    pub fn as_int64(&self) -> i64 {
        self.as_uint64() as i64
    }

    pub fn as_uint64(&self) -> u64 {
        match self.raw_numeric() {
            Some(v) => v,
            None => {
                debug_assert!(false, "as_uint64 on field {} of wire type {:?}", self.id, self.wire_type);
                0
            }
        }
    }

    /// Requires `Fixed32`.
    pub fn as_float(&self) -> f32 {
        match (self.wire_type, self.raw_numeric()) {
            (WireType::Fixed32, Some(v)) => f32::from_bits(v as u32),
            _ => {
                debug_assert!(false, "as_float on field {} of wire type {:?}", self.id, self.wire_type);
                0.0
            }
        }
    }

    /// Requires `Fixed64`.
    pub fn as_double(&self) -> f64 {
        match (self.wire_type, self.raw_numeric()) {
            (WireType::Fixed64, Some(v)) => f64::from_bits(v),
            _ => {
                debug_assert!(false, "as_double on field {} of wire type {:?}", self.id, self.wire_type);
                0.0
            }
        }
    }

    /// Requires `LengthDelimited`.
    pub fn as_bytes(&self) -> &'a [u8] {
        match self.payload {
            Payload::Bytes(b) => b,
            Payload::Scalar(_) => {
                debug_assert!(false, "as_bytes on field {} of wire type {:?}", self.id, self.wire_type);
                &[]
            }
        }
    }

    /// Requires `LengthDelimited`; fails loudly in debug if the bytes
    /// are not valid UTF-8 or the wire type is wrong, returns `""` in
    /// release.
    pub fn as_string(&self) -> &'a str {
        match std::str::from_utf8(self.as_bytes()) {
            Ok(s) => s,
            Err(_) => {
                debug_assert!(false, "as_string on field {} is not valid utf-8", self.id);
                ""
            }
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.as_bytes()
    }

    pub fn size(&self) -> usize {
        self.as_bytes().len()
    }

    /// `StatusOr` variant of the scalar accessors (§1.2): `DataAbsent`
    /// if the field is the invalid sentinel, `Abort` if present but
    /// `LengthDelimited`, instead of silently zeroing.
    pub fn as_scalar(&self) -> StatusOr<Scalar> {
        if !self.is_valid() {
            return Err(Status::error("field is absent"));
        }
        match (self.wire_type, self.payload) {
            (WireType::VarInt, Payload::Scalar(v)) => Ok(Scalar::VarInt(v)),
            (WireType::Fixed32, Payload::Scalar(v)) => Ok(Scalar::Fixed32(v as u32)),
            (WireType::Fixed64, Payload::Scalar(v)) => Ok(Scalar::Fixed64(v)),
            _ => Err(Status::abort(format!(
                "field {} is LengthDelimited, not scalar",
                self.id
            ))),
        }
    }

    /// `StatusOr` variant of `as_bytes` (§1.2).
    pub fn as_status_bytes(&self) -> StatusOr<&'a [u8]> {
        if !self.is_valid() {
            return Err(Status::error("field is absent"));
        }
        match self.payload {
            Payload::Bytes(b) => Ok(b),
            Payload::Scalar(_) => Err(Status::abort(format!(
                "field {} is {:?}, not LengthDelimited",
                self.id, self.wire_type
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_is_id_zero() {
        let f = Field::invalid();
        assert!(!f.is_valid());
        assert_eq!(f.id, 0);
    }

    #[test]
    fn scalar_accessors_respect_wire_type() {
        let f = Field::scalar(1, WireType::VarInt, 42);
        assert_eq!(f.as_uint64(), 42);
        assert_eq!(f.as_scalar().unwrap(), Scalar::VarInt(42));
    }

    #[test]
    fn as_scalar_aborts_on_length_delimited() {
        let data = [1, 2, 3];
        let f = Field::bytes(2, &data);
        assert!(f.as_scalar().unwrap_err().is_abort());
    }

    #[test]
    fn as_status_bytes_absent_for_invalid_field() {
        let f = Field::invalid();
        assert!(!f.as_status_bytes().unwrap_err().is_abort());
    }

    #[test]
    fn fixed32_float_roundtrip() {
        let bits = 3.5f32.to_bits() as u64;
        let f = Field::scalar(3, WireType::Fixed32, bits);
        assert_eq!(f.as_float(), 3.5);
    }

    #[test]
    fn fixed64_double_roundtrip() {
        let bits = 2.25f64.to_bits();
        let f = Field::scalar(4, WireType::Fixed64, bits);
        assert_eq!(f.as_double(), 2.25);
    }

    #[test]
    fn bytes_field_exposes_data_and_size() {
        let data = b"hello";
        let f = Field::bytes(5, data);
        assert_eq!(f.data(), data);
        assert_eq!(f.size(), 5);
        assert_eq!(f.as_string(), "hello");
    }
}
