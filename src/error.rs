//! Error types for the HS2 client.
//!
//! Every fallible call in the crate returns [`Error`]. The variants follow the
//! categories a caller needs to pick a retry policy: transport failures are
//! retryable, handle and protocol failures require re-opening, and decode
//! failures make the current operation unusable.
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{Response, ResponseError, TransportError, WireTag};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure. The caller may retry.
    #[error("connection error: {0}")]
    Connection(String),

    /// Version negotiation failed or the peer sent a malformed message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server refused to open a session.
    #[error("session error: {0}")]
    Session(String),

    /// A session or operation handle was rejected, closed or expired.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// The statement was rejected or ended in the ERROR state.
    #[error("query failed: {message}")]
    Query { message: String },

    /// The operation has not reached the state the call requires.
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("statement has no result set")]
    NoResultSet,

    /// The operation ended in the CANCELED state.
    #[error("operation was canceled")]
    Canceled,

    #[error("column {column}: expected {expected} wire data for {declared}, found {found}")]
    TypeMismatch {
        column: usize,
        declared: String,
        expected: WireTag,
        found: WireTag,
    },

    #[error("decode error: {0}")]
    Decode(String),

    /// The deadline passed; the operation was canceled before returning.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::NotReady(_))
    }

    pub(crate) fn from_response(code: ResponseError, description: String) -> Self {
        match code {
            ResponseError::Protocol => Error::Protocol(description),
            ResponseError::Session => Error::Session(description),
            ResponseError::InvalidHandle => Error::InvalidHandle(description),
            ResponseError::Query => Error::Query {
                message: description,
            },
            ResponseError::StillExecuting => Error::NotReady(description),
            ResponseError::NoResultSet => Error::NoResultSet,
        }
    }

    /// The peer answered `request` with a message that does not belong to it.
    pub(crate) fn unexpected(request: &str, response: &Response) -> Self {
        Error::Protocol(format!("unexpected response to {request}: {response:?}"))
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        if err.is_io() {
            Error::Connection(err.to_string())
        } else {
            Error::Protocol(err.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}
