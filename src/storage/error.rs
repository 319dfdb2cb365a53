// Error taxonomy for the hierarchical store, distinct from the crate-wide
// `DbError` so call sites inside `storage` can match on the exact kind the
// spec names (PARAM, MISMATCH, NOMEM, NOTFOUND, EXISTS, IOERR, CORRUPT,
// INVOPER, INTERNAL, ABORT) before it gets folded into `DbError` at the
// module boundary, the same layering the rest of this crate uses for its
// subsystem-specific error enums.

use crate::error::DbError;
use std::cell::RefCell;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum HiveError {
    #[error("bad argument: {0}")]
    Param(String),

    #[error("node type mismatch: {0}")]
    Mismatch(String),

    #[error("out of memory: {0}")]
    NoMem(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("corrupt page or file: {0}")]
    Corrupt(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("internal invariant broken: {0}")]
    Internal(String),

    #[error("aborted: {0}")]
    Abort(String),
}

pub type HiveResult<T> = std::result::Result<T, HiveError>;

impl From<std::io::Error> for HiveError {
    fn from(e: std::io::Error) -> Self {
        HiveError::Io(e.to_string())
    }
}

impl From<HiveError> for DbError {
    fn from(e: HiveError) -> Self {
        match e {
            HiveError::Param(s) => DbError::InvalidInput(s),
            HiveError::Mismatch(s) => DbError::Mismatch(s),
            HiveError::NoMem(s) => DbError::OutOfMemory(s),
            HiveError::NotFound(s) => DbError::NotFound(s),
            HiveError::Exists(s) => DbError::AlreadyExists(s),
            HiveError::Io(s) => DbError::Storage(s),
            HiveError::Corrupt(s) => DbError::CorruptionError(s),
            HiveError::InvalidOperation(s) => DbError::InvalidOperation(s),
            HiveError::Internal(s) => DbError::Internal(s),
            HiveError::Abort(s) => DbError::Abort(s),
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = RefCell::new(None);
}

/// Record `err` as the calling thread's last error, then return it unchanged.
/// Every public `Hive` operation routes its error return through this so
/// `Hive::last_error()` always reflects the most recent failure on the
/// current thread.
pub fn record(err: HiveError) -> HiveError {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = Some(err.to_string());
    });
    err
}

/// The calling thread's most recently recorded error message, if any.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_roundtrip() {
        assert!(last_error().is_none());
        let _ = record(HiveError::NotFound("x".into()));
        assert_eq!(last_error().unwrap(), "not found: x");
    }
}
