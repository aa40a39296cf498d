use thiserror::Error;

pub type SqlppResult<T> = Result<T, SqlppError>;

/// Taxonomy from the error-handling design: `LexicalError` stops the
/// current statement outright, `SemanticError` covers everything else
/// returned to the embedder (missing fields, cycles, duplicate ids).
/// Both carry a pre-rendered message that already embeds the
/// `SqlSource` traceback, so a caller printing `{err}` sees the full
/// chain without re-deriving it.
#[derive(Debug, Clone, Error)]
pub enum SqlppError {
    #[error("{0}")]
    Lexical(String),
    #[error("{0}")]
    Semantic(String),
}

impl SqlppError {
    pub fn is_lexical(&self) -> bool {
        matches!(self, SqlppError::Lexical(_))
    }
}
