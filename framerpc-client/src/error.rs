//! Typed call failures
//!
//! A [`CallError`] tells a caller *why* a call failed without string
//! matching on the remote message. Remote variants keep the original
//! [`ErrorPayload`] so `data` and the exact code stay reachable.

use framerpc_core::{Error, ErrorPayload, Id};
use thiserror::Error;

/// Failure of one outgoing call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The peer could not parse the request (-32700) or rejected its shape (-32600)
    #[error("malformed request: {0}")]
    MalformedRequest(ErrorPayload),

    #[error("method not found: {0}")]
    MethodNotFound(ErrorPayload),

    #[error("invalid params: {0}")]
    InvalidParams(ErrorPayload),

    /// InternalError or ServerNotInitialized
    #[error("server error: {0}")]
    ServerError(ErrorPayload),

    /// Any code the mapping policy does not recognise
    #[error("remote error: {0}")]
    Remote(ErrorPayload),

    #[error("call cancelled")]
    Cancelled,

    #[error("call timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    /// The request could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// The result did not deserialize into the expected type
    #[error("decode error: {0}")]
    Decode(String),
}

impl CallError {
    /// The remote error object, if the failure came from the peer
    pub fn payload(&self) -> Option<&ErrorPayload> {
        match self {
            CallError::MalformedRequest(p)
            | CallError::MethodNotFound(p)
            | CallError::InvalidParams(p)
            | CallError::ServerError(p)
            | CallError::Remote(p) => Some(p),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<i32> {
        self.payload().map(|p| p.code)
    }
}

impl From<Error> for CallError {
    fn from(err: Error) -> Self {
        match err {
            Error::ConnectionClosed => CallError::ConnectionClosed,
            Error::Serialization(msg) => CallError::Encode(msg),
            other => CallError::Encode(other.to_string()),
        }
    }
}

/// A response that could not be applied to any pending call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// No call with this id was ever pending, or it was cancelled
    #[error("response for unknown id {0}")]
    UnknownId(Id),

    /// The call with this id has already been completed
    #[error("duplicate response for id {0}")]
    Duplicate(Id),

    /// A success response without a usable id
    #[error("response without id")]
    MissingId,
}
