//! Framing, envelope classification and wire types for framerpc
//!
//! This crate is the inbound half of the runtime's data path plus the types
//! every other layer shares:
//!
//! - **Framing**: header-delimited frame reader and writer over async byte streams
//! - **Envelope**: single-pass classification of a message into a [`MessageView`]
//! - **Codec**: encoding of outgoing requests, notifications and responses
//! - **Pool**: shared message buffers returned on drop
//! - **Error handling**: the crate error type and the JSON-RPC error object
//! - **Observability**: OpenTelemetry integration for tracing, metrics, and logs
//!
//! # Architecture
//!
//! Nothing here builds a full JSON value tree. The classifier records byte
//! ranges for `params` and `result`; the dispatch table in `framerpc-server`
//! and the pending request registry in `framerpc-client` deserialize those
//! ranges lazily into the types they actually need.
//!
//! # Example
//!
//! ```rust
//! use framerpc_core::{classify, codec, Id, MessageKind, PooledBuffer};
//!
//! let bytes = codec::encode_request("add", &Id::Number(1), &[5, 3]).unwrap();
//! let view = classify(PooledBuffer::from(bytes));
//!
//! assert_eq!(view.kind(), MessageKind::Request);
//! assert_eq!(view.method_bytes(), Some(&b"add"[..]));
//! assert_eq!(view.params(), Some(&b"[5,3]"[..]));
//! ```

pub mod codec;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod observability;
pub mod pool;
pub mod types;

pub use envelope::{classify, MessageView};
pub use error::{codes, Error, ErrorPayload, Result};
pub use framing::{encode_frame, Frame, FrameReader, FrameWriter};
pub use observability::{
    init_observability, shutdown_observability, LogFormat, ObservabilityConfig,
};
pub use pool::{BufferPool, PooledBuffer};
pub use types::{decode_escaped, decode_escaped_lossy, Id, MessageKind, WireString};
