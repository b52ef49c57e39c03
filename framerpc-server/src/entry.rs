//! The uniform "bytes in, bytes out" contract of a registered method
//!
//! A [`MethodEntry`] is built once per handler and invoked concurrently for
//! every call. It binds the raw params, runs the handler and encodes the
//! complete response envelope. Notifications (no id) never produce bytes.

use crate::params::ParamSignature;
use framerpc_core::{codec, Error, ErrorPayload, Id};
use futures::future::BoxFuture;
use serde::Serialize;
use std::any::Any;
use tokio_util::sync::CancellationToken;

/// Ambient values of one call
#[derive(Debug, Clone, Default)]
pub struct CallScope {
    /// The request id; `None` for notifications
    pub id: Option<Id>,
    /// Token handed to handlers that take a `Cancellation` argument
    pub cancellation: Option<CancellationToken>,
}

impl CallScope {
    pub fn request(id: Id) -> Self {
        Self {
            id: Some(id),
            cancellation: None,
        }
    }

    pub fn notification() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// How a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    Panicked,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::Failure => "error",
            Status::Panicked => "panic",
        }
    }
}

/// Encoded response (if any) plus how the call ended
#[derive(Debug)]
pub struct Outcome {
    pub response: Option<Vec<u8>>,
    pub status: Status,
}

/// Result of invoking an entry
pub enum Invocation {
    /// Synchronous handlers finish inside `invoke`
    Ready(Outcome),
    /// Asynchronous handlers; params are already bound, the future owns everything it needs
    Pending(BoxFuture<'static, Outcome>),
}

impl Invocation {
    pub async fn outcome(self) -> Outcome {
        match self {
            Invocation::Ready(outcome) => outcome,
            Invocation::Pending(future) => future.await,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Invocation::Ready(_))
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::Ready(outcome) => f.debug_tuple("Ready").field(outcome).finish(),
            Invocation::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// A registered method, specialized for its handler's exact argument types
pub trait MethodEntry: Send + Sync + 'static {
    /// Bind `params`, run the handler and encode the response for `scope.id`
    fn invoke(&self, params: Option<&[u8]>, scope: CallScope) -> Invocation;

    fn signature(&self) -> &ParamSignature;
}

/// A handler return value that can be turned into a response
pub trait Reply: Send + 'static {
    fn into_outcome(self, id: Option<&Id>) -> Outcome;
}

impl<T, E> Reply for std::result::Result<T, E>
where
    T: Serialize + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    fn into_outcome(self, id: Option<&Id>) -> Outcome {
        match self {
            Ok(value) => success(id, &value),
            Err(err) => failure(id, &err.into()),
        }
    }
}

impl Reply for () {
    fn into_outcome(self, id: Option<&Id>) -> Outcome {
        success(id, &())
    }
}

/// Encode a success response; notifications get nothing
pub fn success<T: Serialize + ?Sized>(id: Option<&Id>, value: &T) -> Outcome {
    let Some(id) = id else {
        return Outcome {
            response: None,
            status: Status::Success,
        };
    };
    match codec::encode_result(id, value) {
        Ok(bytes) => Outcome {
            response: Some(bytes),
            status: Status::Success,
        },
        Err(err) => {
            tracing::error!(%id, error = %err, "failed to serialize handler result");
            failure(Some(id), &err)
        }
    }
}

/// Encode an error response using the crate's failure policy
pub fn failure(id: Option<&Id>, err: &Error) -> Outcome {
    let payload = ErrorPayload::from(err);
    tracing::debug!(id = ?id, code = payload.code, message = %payload.message, "call failed");
    Outcome {
        response: id.and_then(|id| encode_error(id, &payload)),
        status: Status::Failure,
    }
}

/// Encode an InternalError response for a handler that panicked
pub fn panicked(id: Option<&Id>, panic: Box<dyn Any + Send>) -> Outcome {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    tracing::error!(id = ?id, panic = %message, "handler panicked");

    let payload = ErrorPayload::internal_error(message);
    Outcome {
        response: id.and_then(|id| encode_error(id, &payload)),
        status: Status::Panicked,
    }
}

fn encode_error(id: &Id, payload: &ErrorPayload) -> Option<Vec<u8>> {
    match codec::encode_error(Some(id), payload) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            tracing::error!(%id, error = %err, "failed to encode error response");
            None
        }
    }
}
