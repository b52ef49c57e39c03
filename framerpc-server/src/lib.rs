//! Method dispatch for framerpc
//!
//! This crate turns plain Rust functions into JSON-RPC methods and resolves
//! incoming calls against them:
//!
//! - **Handlers**: sync and async functions with typed arguments
//! - **Parameter binding**: positional, named and whole-params forms
//! - **Ambient arguments**: the request id and a cancellation token are
//!   injected into handlers that ask for them and never consume a parameter
//! - **Dispatch table**: O(1) lookup by the escaped method name bytes
//! - **Metrics**: optional OpenTelemetry counters and histograms
//!
//! # Quick Start
//!
//! ```rust
//! use framerpc_core::{Id, Result};
//! use framerpc_server::{from_sync_fn, CallScope, MethodTable};
//!
//! fn multiply(a: i64, b: i64) -> Result<i64> {
//!     Ok(a * b)
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let table = MethodTable::builder()
//!     .method("multiply", from_sync_fn(multiply))
//!     .build()
//!     .unwrap();
//!
//! let outcome = table
//!     .dispatch(b"multiply", Some(&b"[114,514]"[..]), CallScope::request(Id::Number(1)))
//!     .outcome()
//!     .await;
//! assert_eq!(
//!     outcome.response.unwrap(),
//!     br#"{"jsonrpc":"2.0","id":1,"result":58596}"#
//! );
//! # }
//! ```
//!
//! # Errors
//!
//! Handlers return `Result<T, E>` where `E: Into<framerpc_core::Error>`.
//! Parameter problems become InvalidParams (-32602), an
//! [`ErrorPayload`](framerpc_core::ErrorPayload) passes through unchanged and
//! anything else, including a panic, becomes InternalError (-32603).

pub mod entry;
pub mod handler;
pub mod metrics;
pub mod params;
pub mod table;

pub use entry::{CallScope, Invocation, MethodEntry, Outcome, Reply, Status};
pub use handler::{from_async_fn, from_sync_fn, AsyncHandler, MethodSpec, SyncHandler};
pub use metrics::DispatchMetrics;
pub use params::{Arg, ArgList, Cancellation, ParamModifier, ParamSignature, RequestId};
pub use table::{MethodTable, MethodTableBuilder};
