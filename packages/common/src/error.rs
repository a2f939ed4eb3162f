use thiserror::Error;

/// Errors raised while decoding identifiers from their string form
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Empty node id")]
    Empty,

    #[error("Unknown node kind prefix: {0}")]
    UnknownKind(char),

    #[error("Malformed node id: {0}")]
    Malformed(String),
}

impl From<std::num::ParseIntError> for IdError {
    fn from(e: std::num::ParseIntError) -> Self {
        IdError::Malformed(e.to_string())
    }
}

/// Common Result type alias
pub type IdResult<T> = Result<T, IdError>;
