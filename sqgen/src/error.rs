use thiserror::Error;

pub type SqgenResult<T> = Result<T, SqgenError>;

/// Error taxonomy (§7): `Decode` covers malformed wire input, `Semantic`
/// covers everything about a structurally valid query that still can't
/// be lowered (missing id, duplicate id, cycle, unknown module).
#[derive(Debug, Error)]
pub enum SqgenError {
    #[error("failed to decode structured query: {0}")]
    Decode(#[from] dec::DecError),
    #[error("{0}")]
    Semantic(String),
    #[error(transparent)]
    Sql(#[from] sqlpp::SqlppError),
}

impl SqgenError {
    pub fn semantic(msg: impl Into<String>) -> Self {
        SqgenError::Semantic(msg.into())
    }
}
