use std::fmt;
use std::io;

use crate::act::ActError;
use crate::id::IdError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by archive operations.
///
/// Every variant maps onto an HTTP status the host can answer with, see
/// [`Error::status`]. Filesystem errors never leak as `io::Error`; they are
/// translated by kind on the way out.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("internal server error: {0}")]
    InternalServerError(String),

    #[error("access control tree: {0}")]
    Exception(#[from] ActError),
}

impl Error {
    pub fn status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Forbidden(_) => 403,
            Error::BadRequest(_) => 400,
            Error::Conflict(_) => 409,
            Error::MethodNotAllowed(_) => 405,
            Error::InternalServerError(_) | Error::Exception(_) => 500,
        }
    }

    /// Translate an I/O failure on `subject` into the archive taxonomy.
    pub fn io<S: fmt::Display>(subject: S, err: io::Error) -> Error {
        let message = format!("{}: {}", subject, err);
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(message),
            io::ErrorKind::PermissionDenied => Error::Forbidden(message),
            io::ErrorKind::AlreadyExists => Error::Conflict(message),
            io::ErrorKind::InvalidInput => Error::BadRequest(message),
            _ => Error::InternalServerError(message),
        }
    }
}

impl From<IdError> for Error {
    fn from(err: IdError) -> Self {
        Error::BadRequest(err.to_string())
    }
}

/// Attach a subject to an `io::Result`, translating the error.
pub(crate) trait IoContext<T> {
    fn subject<S: fmt::Display>(self, subject: S) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    #[inline(always)]
    fn subject<S: fmt::Display>(self, subject: S) -> Result<T> {
        self.map_err(|e| Error::io(subject, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_taxonomy() {
        let err = Error::io("a01000001", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.status(), 404);

        let err = Error::io("a01000001", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, Error::Forbidden(_)));

        let err = Error::io("a01000001", io::Error::from(io::ErrorKind::AlreadyExists));
        assert!(matches!(err, Error::Conflict(_)));

        let err = Error::io("a01000001", io::Error::new(io::ErrorKind::Other, "disk on fire"));
        assert_eq!(err.status(), 500);
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn act_errors_are_internal() {
        let err: Error = ActError::UndefinedVariable("user_id".into()).into();
        assert_eq!(err.status(), 500);
    }
}
