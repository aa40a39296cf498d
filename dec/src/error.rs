use thiserror::Error;

use crate::field::WireType;

pub type DecResult<T> = Result<T, DecError>;

/// Errors from the low-level varint/fixed/length-delimited readers.
/// Cursor navigation uses `Status`/`StatusOr` instead (§7's
/// `TypeMismatch (Abort)` / `DataAbsent` rows need a third, non-error
/// "absent but not wrong" case that a plain `Result` doesn't model
/// well); this enum covers the wire-format layer underneath it.
#[derive(Debug, Clone, Error)]
pub enum DecError {
    #[error("buffer truncated while reading a {0}")]
    Truncated(&'static str),
    #[error("varint is longer than 10 bytes")]
    VarintTooLong,
    #[error("wire type mismatch: expected {expected}, found {found:?}")]
    TypeMismatch {
        expected: &'static str,
        found: WireType,
    },
    #[error("tag {0} does not encode a recognized wire type")]
    UnknownWireType(u64),
}

/// Status kind for cursor navigation (§4.2, §7): `Error` for absent
/// data the caller's contract allows treating as empty, `Abort` for a
/// wire-type/schema disagreement that the caller should propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Error,
    Abort,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

impl Status {
    pub fn error(message: impl Into<String>) -> Self {
        Status {
            kind: StatusKind::Error,
            message: message.into(),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Status {
            kind: StatusKind::Abort,
            message: message.into(),
        }
    }

    pub fn is_abort(&self) -> bool {
        self.kind == StatusKind::Abort
    }
}

/// `Ok(T)` is success; `Err(Status)` carries the `Error`/`Abort`
/// distinction the original's `StatusOr<T>` exposes via `status().code`.
pub type StatusOr<T> = Result<T, Status>;
