use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Corruption error: {0}")]
    CorruptionError(String),

    #[error("Type mismatch: {0}")]
    Mismatch(String),

    #[error("Operation aborted: {0}")]
    Abort(String),
}

impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Io(e) => DbError::Storage(e.to_string()),
            DbError::Storage(s) => DbError::Storage(s.clone()),
            DbError::NotFound(s) => DbError::NotFound(s.clone()),
            DbError::AlreadyExists(s) => DbError::AlreadyExists(s.clone()),
            DbError::InvalidInput(s) => DbError::InvalidInput(s.clone()),
            DbError::InvalidOperation(s) => DbError::InvalidOperation(s.clone()),
            DbError::Internal(s) => DbError::Internal(s.clone()),
            DbError::OutOfMemory(s) => DbError::OutOfMemory(s.clone()),
            DbError::CorruptionError(s) => DbError::CorruptionError(s.clone()),
            DbError::Mismatch(s) => DbError::Mismatch(s.clone()),
            DbError::Abort(s) => DbError::Abort(s.clone()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
