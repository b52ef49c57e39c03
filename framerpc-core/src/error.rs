//! Error types for framerpc
//!
//! This module provides the two error vocabularies used across the runtime:
//!
//! - **Error**: Application-level errors for internal use (uses thiserror)
//! - **ErrorPayload**: The JSON-RPC 2.0 error object exactly as it appears on the wire
//!
//! # Standard Error Codes
//!
//! JSON-RPC 2.0 defines standard error codes:
//! - `-32700`: Parse error (invalid JSON)
//! - `-32600`: Invalid request (JSON, but not a valid envelope)
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//! - `-32099 to -32000`: Server error (implementation-defined)
//!
//! Two implementation-defined codes from the language-server family of protocols
//! are also recognised: `-32002` (server not initialized) and `-32800`
//! (request cancelled).
//!
//! # Examples
//!
//! ```rust
//! use framerpc_core::{Error, ErrorPayload};
//!
//! let error = Error::InvalidParams("expected 2 positional params".into());
//! let payload = ErrorPayload::from(&error);
//! assert_eq!(payload.code, -32602);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Result type for framerpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reserved JSON-RPC error codes
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s).
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// The server received a request before it was initialized.
    pub const SERVER_NOT_INITIALIZED: i32 = -32002;
    /// The request was cancelled by the caller.
    pub const REQUEST_CANCELLED: i32 = -32800;
}

/// Application-level error type for framerpc operations
///
/// # Error Categories
///
/// - **Protocol errors**: InvalidRequest, MethodNotFound, InvalidParams
/// - **Transport errors**: Io, FrameTooLarge, ConnectionClosed
/// - **Processing errors**: Serialization, Internal
/// - **Registration errors**: DuplicateMethod, Signature
///
/// Handlers return this type (or something convertible into it); the dispatch
/// table turns it into an [`ErrorPayload`] with `ErrorPayload::from(&error)`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// JSON-RPC protocol error already in wire format
    ///
    /// Handlers use this to pick an exact code; it also holds errors
    /// received from a remote peer.
    #[error("JSON-RPC error: {0}")]
    Rpc(#[from] ErrorPayload),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Input/output error from the underlying transport
    #[error("IO error: {0}")]
    Io(String),

    /// Invalid JSON-RPC request format
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Method not found in the dispatch table
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid method parameters (arity, shape or type mismatch)
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Internal error raised while running a handler
    #[error("Internal error: {0}")]
    Internal(String),

    /// A frame declared a content length above the configured limit
    #[error("Frame size limit exceeded: limit={limit}, actual={actual}")]
    FrameTooLarge {
        /// The maximum allowed message size
        limit: usize,
        /// The declared message size that was rejected
        actual: usize,
    },

    /// The connection is closed; no more frames can be written
    #[error("Connection closed")]
    ConnectionClosed,

    /// A method with this name is already registered
    #[error("Method already registered: {0}")]
    DuplicateMethod(String),

    /// A handler signature does not match its parameter names
    #[error("Invalid handler signature: {0}")]
    Signature(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// JSON-RPC 2.0 error object
///
/// Mirrors the `error` member of a response. `data` is kept as raw JSON so it
/// can be forwarded or lazily deserialized without building a value tree.
///
/// # Examples
///
/// ```rust
/// use framerpc_core::ErrorPayload;
///
/// let error = ErrorPayload::method_not_found("calculate");
/// assert_eq!(error.code, -32601);
///
/// let custom = ErrorPayload::with_data(1001, "Insufficient funds", &[50, 100]).unwrap();
/// assert_eq!(custom.data.unwrap().get(), "[50,100]");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Numeric error code; -32768 to -32000 are reserved by the protocol
    pub code: i32,

    /// Short description of the error
    pub message: String,

    /// Optional additional information, kept in its raw JSON form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

impl ErrorPayload {
    /// Create an error with code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error carrying serialized `data`
    pub fn with_data<T: Serialize + ?Sized>(
        code: i32,
        message: impl Into<String>,
        data: &T,
    ) -> Result<Self> {
        let raw = serde_json::value::to_raw_value(data)?;
        Ok(Self {
            code,
            message: message.into(),
            data: Some(raw),
        })
    }

    /// Parse error (-32700)
    pub fn parse_error() -> Self {
        Self::new(codes::PARSE_ERROR, "Parse error")
    }

    /// Invalid request error (-32600)
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, msg)
    }

    /// Method not found error (-32601)
    pub fn method_not_found(method: impl AsRef<str>) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method.as_ref()),
        )
    }

    /// Invalid params error (-32602)
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, msg)
    }

    /// Internal error (-32603)
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, msg)
    }

    /// Server not initialized (-32002)
    pub fn server_not_initialized(msg: impl Into<String>) -> Self {
        Self::new(codes::SERVER_NOT_INITIALIZED, msg)
    }

    /// Request cancelled (-32800)
    pub fn request_cancelled() -> Self {
        Self::new(codes::REQUEST_CANCELLED, "Request cancelled")
    }

    /// Deserialize the `data` member, if present
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T>> {
        self.data
            .as_ref()
            .map(|raw| serde_json::from_str(raw.get()).map_err(Error::from))
    }
}

impl PartialEq for ErrorPayload {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.message == other.message
            && self.data.as_ref().map(|d| d.get()) == other.data.as_ref().map(|d| d.get())
    }
}

impl Eq for ErrorPayload {}

impl std::fmt::Display for ErrorPayload {
    /// Formats as "[code] message", e.g. "[-32601] Method not found: foo"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorPayload {}

impl From<&Error> for ErrorPayload {
    /// Failure-to-response policy used by the dispatch table.
    ///
    /// Explicit wire errors pass through; validation failures keep their
    /// protocol code; anything else is an internal error.
    fn from(err: &Error) -> Self {
        match err {
            Error::Rpc(payload) => payload.clone(),
            Error::InvalidParams(msg) => ErrorPayload::invalid_params(msg.clone()),
            Error::InvalidRequest(msg) => ErrorPayload::invalid_request(msg.clone()),
            Error::MethodNotFound(method) => ErrorPayload::method_not_found(method),
            other => ErrorPayload::internal_error(other.to_string()),
        }
    }
}

impl From<Error> for ErrorPayload {
    fn from(err: Error) -> Self {
        match err {
            Error::Rpc(payload) => payload,
            other => ErrorPayload::from(&other),
        }
    }
}
