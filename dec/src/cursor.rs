//! Stack-free navigational cursor over a nested tree of length-delimited
//! records, mirroring protobuf message-merging semantics for repeated
//! fields (last-occurrence wins on a plain `enter_field`).

use crate::error::{Status, StatusOr};
use crate::field::{Field, Scalar, WireType};
use crate::wire::iter_fields;

#[derive(Clone, Copy)]
enum Payload<'a> {
    Bytes(&'a [u8]),
    Scalar(Scalar),
}

/// A value type: copy to fork exploration without disturbing the
/// original position. Never owns the backing buffer.
#[derive(Clone, Copy)]
pub struct Cursor<'a> {
    payload: Payload<'a>,
}

impl<'a> Cursor<'a> {
    /// Wraps a top-level record.
    pub fn new(bytes: &'a [u8]) -> Self {
        Cursor {
            payload: Payload::Bytes(bytes),
        }
    }

    fn from_field(field: Field<'a>) -> Self {
        match field.wire_type {
            WireType::LengthDelimited => Cursor {
                payload: Payload::Bytes(field.data()),
            },
            _ => Cursor {
                payload: Payload::Scalar(
                    field
                        .as_scalar()
                        .expect("non-LengthDelimited field always decodes to a scalar"),
                ),
            },
        }
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self.payload, Payload::Bytes(_))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.payload, Payload::Scalar(_))
    }

    fn record(&self) -> Option<&'a [u8]> {
        match self.payload {
            Payload::Bytes(b) => Some(b),
            Payload::Scalar(_) => None,
        }
    }

    /// Descends into the *last* occurrence of field `id` in the current
    /// record (protobuf message-merging semantics).
    pub fn enter_field(&mut self, id: u16) -> Result<(), Status> {
        let record = self
            .record()
            .ok_or_else(|| Status::abort("enter_field on a cursor that is not a record"))?;
        let mut last = None;
        for parsed in iter_fields(record) {
            let field = parsed.map_err(|e| Status::abort(e.to_string()))?;
            if field.id == id {
                last = Some(field);
            }
        }
        match last {
            Some(field) => {
                *self = Cursor::from_field(field);
                Ok(())
            }
            None => Err(Status::error(format!("field {} is absent", id))),
        }
    }

    /// Descends into the `index`-th occurrence (0-based) of field `id`.
    pub fn enter_repeated_field_at(&mut self, id: u16, index: usize) -> Result<(), Status> {
        let record = self.record().ok_or_else(|| {
            Status::abort("enter_repeated_field_at on a cursor that is not a record")
        })?;
        let mut seen = 0usize;
        for parsed in iter_fields(record) {
            let field = parsed.map_err(|e| Status::abort(e.to_string()))?;
            if field.id == id {
                if seen == index {
                    *self = Cursor::from_field(field);
                    return Ok(());
                }
                seen += 1;
            }
        }
        Err(Status::error(format!(
            "field {} occurrence {} is absent",
            id, index
        )))
    }

    /// Yields a child cursor per occurrence of field `id`, in source
    /// order. `Abort`s if the current payload is a scalar; if the
    /// field is simply absent, the returned iterator yields nothing
    /// without signalling an error.
    pub fn iterate_repeated_field(&self, id: u16) -> StatusOr<RepeatedFieldIter<'a>> {
        let record = self.record().ok_or_else(|| {
            Status::abort("iterate_repeated_field on a cursor that is not a record")
        })?;
        Ok(RepeatedFieldIter {
            remaining: record,
            id,
        })
    }

    pub fn get_scalar(&self) -> StatusOr<Scalar> {
        match self.payload {
            Payload::Scalar(s) => Ok(s),
            Payload::Bytes(_) => Err(Status::abort("get_scalar on a cursor that is a record")),
        }
    }

    pub fn get_bytes(&self) -> StatusOr<&'a [u8]> {
        self.record()
            .ok_or_else(|| Status::abort("get_bytes on a cursor that is a scalar"))
    }
}

/// Re-scans the remaining bytes from its last position on every
/// `next()`, yielding a child `Cursor` per occurrence of the target id.
pub struct RepeatedFieldIter<'a> {
    remaining: &'a [u8],
    id: u16,
}

impl<'a> Iterator for RepeatedFieldIter<'a> {
    type Item = Cursor<'a>;

    fn next(&mut self) -> Option<Cursor<'a>> {
        while !self.remaining.is_empty() {
            match crate::wire::read_field(self.remaining) {
                Ok((field, consumed)) => {
                    self.remaining = &self.remaining[consumed..];
                    if field.id == self.id {
                        return Some(Cursor::from_field(field));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed field while iterating repeated field");
                    return None;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode;

    fn init_test_log() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn element(id: u32, value: u64) -> Vec<u8> {
        let mut body = Vec::new();
        encode::write_varint_field(&mut body, 1, id as u64);
        encode::write_varint_field(&mut body, 2, value);
        body
    }

    #[test]
    fn enter_field_takes_last_occurrence() {
        init_test_log();
        let mut outer = Vec::new();
        encode::write_varint_field(&mut outer, 5, 1);
        encode::write_varint_field(&mut outer, 5, 2);
        encode::write_varint_field(&mut outer, 5, 3);
        let mut cursor = Cursor::new(&outer);
        cursor.enter_field(5).unwrap();
        assert_eq!(cursor.get_scalar().unwrap(), Scalar::VarInt(3));
    }

    #[test]
    fn enter_field_on_scalar_cursor_aborts() {
        init_test_log();
        let mut outer = Vec::new();
        encode::write_varint_field(&mut outer, 1, 10);
        let mut cursor = Cursor::new(&outer);
        cursor.enter_field(1).unwrap();
        assert!(cursor.enter_field(2).unwrap_err().is_abort());
    }

    #[test]
    fn enter_field_missing_is_plain_error_not_abort() {
        init_test_log();
        let outer: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&outer);
        let status = cursor.enter_field(9).unwrap_err();
        assert!(!status.is_abort());
    }

    #[test]
    fn iterate_repeated_field_yields_source_order() {
        init_test_log();
        let mut outer = Vec::new();
        encode::write_bytes_field(&mut outer, 10, &element(0, 10));
        encode::write_bytes_field(&mut outer, 10, &element(1, 11));
        let cursor = Cursor::new(&outer);
        let children: Vec<_> = cursor.iterate_repeated_field(10).unwrap().collect();
        assert_eq!(children.len(), 2);

        for (i, mut child) in children.into_iter().enumerate() {
            child.enter_field(1).unwrap();
            assert_eq!(child.get_scalar().unwrap(), Scalar::VarInt(i as u64));
        }
    }

    #[test]
    fn iterate_repeated_field_absent_yields_nothing_not_error() {
        init_test_log();
        let outer: Vec<u8> = Vec::new();
        let cursor = Cursor::new(&outer);
        let iter = cursor.iterate_repeated_field(42).unwrap();
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn get_bytes_requires_record_payload() {
        init_test_log();
        let mut outer = Vec::new();
        encode::write_varint_field(&mut outer, 1, 7);
        let mut cursor = Cursor::new(&outer);
        cursor.enter_field(1).unwrap();
        assert!(cursor.get_bytes().unwrap_err().is_abort());
    }
}
