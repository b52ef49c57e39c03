//! Call correlation for framerpc
//!
//! The calling side of a connection: every outgoing request gets a slot in a
//! [`PendingRequests`] registry, and every response is matched back to its
//! slot by id. Responses may arrive in any order.
//!
//! - **Registry**: [`PendingRequests`] and the awaitable [`PendingCall`]
//! - **Typed failures**: [`CallError`] distinguishes missing methods, bad
//!   arguments, remote internal errors, cancellation and timeouts
//! - **Policies**: pluggable [`IdGenerator`] and [`ErrorMapper`]
//! - **Metrics**: optional [`CallMetrics`]
//!
//! # Example
//!
//! ```rust
//! use framerpc_client::PendingRequests;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = PendingRequests::new();
//! let (id, call) = registry.begin("multiply").unwrap();
//!
//! // ... the request is written, and later the response arrives:
//! registry.complete(&id, b"58596").unwrap();
//!
//! let product: i64 = call.await.unwrap().deserialize().unwrap();
//! assert_eq!(product, 58596);
//! # }
//! ```

pub mod error;
pub mod metrics;
pub mod policy;
pub mod request;

pub use error::{CallError, CorrelationError};
pub use metrics::CallMetrics;
pub use policy::{ErrorMapper, IdGenerator, RandomIds, SequentialIds, StandardErrorMapper};
pub use request::{CallResult, PendingCall, PendingRequests, RawResult, DEFAULT_DUPLICATE_WINDOW};
