//! framerpc - JSON-RPC 2.0 over header-delimited byte streams
//!
//! This is the main convenience crate. It composes the sub-crates into a
//! [`Connection`] that both answers calls from its peer and issues its own.
//!
//! # Architecture
//!
//! framerpc is organized into modular crates:
//!
//! - **framerpc-core**: frame reader/writer, envelope classifier, codec,
//!   buffer pool, error types, observability
//! - **framerpc-server**: method dispatch table and typed handlers
//! - **framerpc-client**: pending request registry and typed call failures
//!
//! # Quick Start
//!
//! ```rust
//! use framerpc::{ConnectionBuilder, MethodTable, Result, from_sync_fn};
//!
//! fn multiply(a: i64, b: i64) -> Result<i64> {
//!     Ok(a * b)
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (left, right) = tokio::io::duplex(64 * 1024);
//! let (left_read, left_write) = tokio::io::split(left);
//! let (right_read, right_write) = tokio::io::split(right);
//!
//! let server = ConnectionBuilder::new()
//!     .methods(MethodTable::builder().method("multiply", from_sync_fn(multiply)).build().unwrap())
//!     .spawn(left_read, left_write);
//! let client = ConnectionBuilder::new().spawn(right_read, right_write);
//!
//! let product: i64 = client.call("multiply", &[114, 514]).await.unwrap();
//! assert_eq!(product, 58596);
//! # server.shutdown();
//! # }
//! ```
//!
//! # Wire Format
//!
//! ```text
//! Content-Length: <decimal-byte-length>\r\n\r\n<json-bytes>
//! ```

pub mod builder;
pub mod connection;

pub use builder::{ConnectionBuilder, ConnectionConfig, DEFAULT_CANCEL_METHOD};
pub use connection::{Connection, ConnectionStats};

pub use framerpc_core::{
    init_observability, shutdown_observability, Error, ErrorPayload, Id, LogFormat,
    ObservabilityConfig, Result,
};
pub use framerpc_server::{
    from_async_fn, from_sync_fn, Cancellation, MethodSpec, MethodTable, RequestId,
};
pub use framerpc_client::{CallError, CorrelationError, ErrorMapper, IdGenerator};

pub use framerpc_client as client;
pub use framerpc_core as core;
pub use framerpc_server as server;
