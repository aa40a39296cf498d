//! Zero-copy reader for length-delimited tagged wire records, plus a
//! stack-free navigational `Cursor` for descending a nested record tree
//! (the tree navigator used by structured-query consumers).

mod cursor;
mod error;
mod field;
mod wire;

pub use cursor::{Cursor, RepeatedFieldIter};
pub use error::{DecError, DecResult, Status, StatusKind, StatusOr};
pub use field::{Field, Scalar, WireType};
pub use wire::{encode, iter_fields, read_field, read_fixed32, read_fixed64, read_varint, FieldIter};
