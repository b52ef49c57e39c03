//! Pending request registry
//!
//! Correlates responses with the calls that are waiting for them.
//!
//! # Request Lifecycle
//!
//! 1. **Begin**: draw a fresh id and insert a pending slot ([`PendingRequests::begin`])
//! 2. **Send**: the connection encodes and writes the request frame
//! 3. **Wait**: the caller awaits the returned [`PendingCall`]
//! 4. **Settle**: exactly one of `complete`, `fail`, `cancel` or `fail_all`
//!    removes the slot and resolves the awaitable
//!
//! A response whose id has no slot is reported as a [`CorrelationError`].
//! Ids completed recently are remembered in a bounded window so a second
//! delivery can be told apart from an id that was never issued. Cancelled
//! ids are not remembered: a late response for them is an unknown id.

use crate::error::{CallError, CorrelationError};
use crate::metrics::CallMetrics;
use crate::policy::{ErrorMapper, IdGenerator, SequentialIds, StandardErrorMapper};
use framerpc_core::{ErrorPayload, Id};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;

/// Default number of completed ids remembered for duplicate detection
pub const DEFAULT_DUPLICATE_WINDOW: usize = 1024;

const MAX_ID_ATTEMPTS: usize = 64;

/// Outcome delivered to a [`PendingCall`]
pub type CallResult = std::result::Result<RawResult, CallError>;

/// The `result` of a successful response, still in wire form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    bytes: Vec<u8>,
}

impl RawResult {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Deserialize into the type the caller expects
    pub fn deserialize<T: DeserializeOwned>(&self) -> std::result::Result<T, CallError> {
        serde_json::from_slice(&self.bytes).map_err(|e| CallError::Decode(e.to_string()))
    }
}

struct Slot {
    tx: oneshot::Sender<CallResult>,
    method: Option<Box<str>>,
    started: Instant,
}

#[derive(Default)]
struct State {
    pending: HashMap<Id, Slot>,
    recent: VecDeque<Id>,
    recent_set: HashSet<Id>,
    unidentified: Vec<ErrorPayload>,
    /// Set by `fail_all`; no call may begin afterwards
    closed: bool,
}

impl State {
    fn remember(&mut self, id: Id, window: usize) {
        if window == 0 {
            return;
        }
        if self.recent.len() >= window {
            if let Some(oldest) = self.recent.pop_front() {
                self.recent_set.remove(&oldest);
            }
        }
        self.recent_set.insert(id.clone());
        self.recent.push_back(id);
    }

    fn missing(&self, id: &Id) -> CorrelationError {
        if self.recent_set.contains(id) {
            CorrelationError::Duplicate(id.clone())
        } else {
            CorrelationError::UnknownId(id.clone())
        }
    }
}

struct Inner {
    state: Mutex<State>,
    ids: Arc<dyn IdGenerator>,
    errors: Arc<dyn ErrorMapper>,
    window: usize,
    metrics: Option<CallMetrics>,
}

/// Concurrent id → completion registry
///
/// Cheap to clone; clones share the same slots.
#[derive(Clone)]
pub struct PendingRequests {
    inner: Arc<Inner>,
}

impl PendingRequests {
    /// Sequential ids, standard error mapping
    pub fn new() -> Self {
        Self::with_policies(Arc::new(SequentialIds::new()), Arc::new(StandardErrorMapper))
    }

    pub fn with_policies(ids: Arc<dyn IdGenerator>, errors: Arc<dyn ErrorMapper>) -> Self {
        Self::build(ids, errors, DEFAULT_DUPLICATE_WINDOW, None)
    }

    /// Full constructor used by the connection builder
    pub fn build(
        ids: Arc<dyn IdGenerator>,
        errors: Arc<dyn ErrorMapper>,
        duplicate_window: usize,
        metrics: Option<CallMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                ids,
                errors,
                window: duplicate_window,
                metrics,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an id and insert a pending slot for a call to `method`
    ///
    /// Ids still pending or recently completed are re-drawn; a generator that
    /// keeps colliding fails the call instead of looping forever. Once
    /// [`fail_all`](Self::fail_all) has run every call fails with
    /// [`CallError::ConnectionClosed`].
    pub fn begin(&self, method: &str) -> std::result::Result<(Id, PendingCall), CallError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state();
        if state.closed {
            return Err(CallError::ConnectionClosed);
        }

        let mut id = self.inner.ids.next_id();
        let mut attempts = 1;
        while state.pending.contains_key(&id) || state.recent_set.contains(&id) || id.is_null() {
            if attempts >= MAX_ID_ATTEMPTS {
                tracing::error!(method, "id generator produced no free id");
                return Err(CallError::Encode("no free request id".to_string()));
            }
            id = self.inner.ids.next_id();
            attempts += 1;
        }

        let slot = Slot {
            tx,
            method: self.inner.metrics.as_ref().map(|_| method.into()),
            started: Instant::now(),
        };
        state.pending.insert(id.clone(), slot);
        drop(state);

        tracing::trace!(%id, method, "call pending");
        Ok((id.clone(), PendingCall { id, rx }))
    }

    /// Deliver a success response
    pub fn complete(&self, id: &Id, result: &[u8]) -> std::result::Result<(), CorrelationError> {
        if id.is_null() {
            self.violation("missing_id");
            return Err(CorrelationError::MissingId);
        }
        let slot = self.take(id)?;
        self.finish(slot, "success", Ok(RawResult::new(result)));
        Ok(())
    }

    /// Deliver an error response
    ///
    /// Errors without a usable id cannot be correlated; they are kept for
    /// [`take_unidentified`](Self::take_unidentified) instead of being dropped.
    pub fn fail(&self, id: Option<&Id>, payload: ErrorPayload) -> std::result::Result<(), CorrelationError> {
        let Some(id) = id.filter(|id| !id.is_null()) else {
            tracing::warn!(code = payload.code, message = %payload.message, "error response without id");
            self.state().unidentified.push(payload);
            return Ok(());
        };
        let slot = self.take(id)?;
        let failure = self.inner.errors.map_error(payload);
        self.finish(slot, "error", Err(failure));
        Ok(())
    }

    /// Remove a pending call and resolve it as cancelled
    ///
    /// Returns false when the call already settled.
    pub fn cancel(&self, id: &Id) -> bool {
        self.abandon(id, CallError::Cancelled)
    }

    /// Remove a pending call and resolve it with `error`
    pub fn abandon(&self, id: &Id, error: CallError) -> bool {
        let Some(slot) = self.state().pending.remove(id) else {
            return false;
        };
        tracing::debug!(%id, error = %error, "call abandoned");
        if let (Some(metrics), Some(method)) = (&self.inner.metrics, &slot.method) {
            metrics.record_cancellation(method);
        }
        let _ = slot.tx.send(Err(error));
        true
    }

    /// Resolve every pending call with `error` and close the registry
    pub fn fail_all(&self, error: CallError) -> usize {
        let drained: Vec<Slot> = {
            let mut state = self.state();
            state.closed = true;
            state.pending.drain().map(|(_, slot)| slot).collect()
        };
        let count = drained.len();
        for slot in drained {
            let _ = slot.tx.send(Err(error.clone()));
        }
        if count > 0 {
            tracing::debug!(count, error = %error, "failed all pending calls");
        }
        count
    }

    /// Error responses that carried no id, oldest first; clears the sink
    pub fn take_unidentified(&self) -> Vec<ErrorPayload> {
        std::mem::take(&mut self.state().unidentified)
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.state().pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, id: &Id) -> std::result::Result<Slot, CorrelationError> {
        let mut state = self.state();
        match state.pending.remove(id) {
            Some(slot) => {
                state.remember(id.clone(), self.inner.window);
                Ok(slot)
            }
            None => {
                let err = state.missing(id);
                drop(state);
                self.violation(match err {
                    CorrelationError::Duplicate(_) => "duplicate",
                    _ => "unknown_id",
                });
                Err(err)
            }
        }
    }

    fn finish(&self, slot: Slot, status: &str, result: CallResult) {
        if let (Some(metrics), Some(method)) = (&self.inner.metrics, &slot.method) {
            metrics.record_call(method, status, slot.started.elapsed().as_secs_f64());
        }
        // The caller may have stopped waiting.
        let _ = slot.tx.send(result);
    }

    fn violation(&self, kind: &str) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_violation(kind);
        }
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("pending", &self.len())
            .field("duplicate_window", &self.inner.window)
            .finish()
    }
}

/// Awaitable side of one pending call
#[derive(Debug)]
pub struct PendingCall {
    id: Id,
    rx: oneshot::Receiver<CallResult>,
}

impl PendingCall {
    pub fn id(&self) -> &Id {
        &self.id
    }
}

impl Future for PendingCall {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(CallError::ConnectionClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_begin_and_complete() {
        let registry = PendingRequests::new();
        let (id, call) = registry.begin("add").unwrap();
        assert_eq!(id, Id::Number(1));
        assert!(registry.contains(&id));

        registry.complete(&id, b"42").unwrap();
        assert!(registry.is_empty());

        let result = call.await.unwrap();
        assert_eq!(result.deserialize::<i32>().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_error_is_mapped() {
        let registry = PendingRequests::new();
        let (id, call) = registry.begin("nope").unwrap();
        registry
            .fail(Some(&id), ErrorPayload::method_not_found("nope"))
            .unwrap();
        assert!(matches!(call.await, Err(CallError::MethodNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown() {
        let registry = PendingRequests::new();
        let (id, _call) = registry.begin("x").unwrap();
        registry.complete(&id, b"1").unwrap();

        assert_eq!(
            registry.complete(&id, b"1"),
            Err(CorrelationError::Duplicate(id.clone()))
        );
        assert_eq!(
            registry.complete(&Id::Number(999), b"1"),
            Err(CorrelationError::UnknownId(Id::Number(999)))
        );
        assert_eq!(registry.complete(&Id::Null, b"1"), Err(CorrelationError::MissingId));
    }

    #[tokio::test]
    async fn test_cancel_then_late_response_is_unknown() {
        let registry = PendingRequests::new();
        let (id, call) = registry.begin("slow").unwrap();

        assert!(registry.cancel(&id));
        assert!(!registry.cancel(&id));
        assert_eq!(call.await, Err(CallError::Cancelled));

        assert_eq!(
            registry.complete(&id, b"null"),
            Err(CorrelationError::UnknownId(id))
        );
    }

    #[test]
    fn test_unidentified_errors_are_kept() {
        let registry = PendingRequests::new();
        registry.fail(None, ErrorPayload::parse_error()).unwrap();
        registry
            .fail(Some(&Id::Null), ErrorPayload::invalid_request("bad"))
            .unwrap();

        let errors = registry.take_unidentified();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code, -32700);
        assert!(registry.take_unidentified().is_empty());
    }

    #[tokio::test]
    async fn test_fail_all() {
        let registry = PendingRequests::new();
        let (_, a) = registry.begin("a").unwrap();
        let (_, b) = registry.begin("b").unwrap();

        assert_eq!(registry.fail_all(CallError::ConnectionClosed), 2);
        assert_eq!(a.await, Err(CallError::ConnectionClosed));
        assert_eq!(b.await, Err(CallError::ConnectionClosed));
    }

    #[test]
    fn test_begin_after_fail_all_is_refused() {
        let registry = PendingRequests::new();
        assert_eq!(registry.fail_all(CallError::ConnectionClosed), 0);
        assert!(registry.is_closed());

        assert_eq!(registry.begin("late").err(), Some(CallError::ConnectionClosed));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_colliding_generator() {
        let registry = PendingRequests::with_policies(
            Arc::new(|| Id::from("same")),
            Arc::new(StandardErrorMapper),
        );
        let (_id, _call) = registry.begin("first").unwrap();
        assert!(matches!(registry.begin("second"), Err(CallError::Encode(_))));
    }

    #[test]
    fn test_window_is_bounded() {
        let registry = PendingRequests::build(
            Arc::new(SequentialIds::new()),
            Arc::new(StandardErrorMapper),
            2,
            None,
        );
        for _ in 0..3 {
            let (id, _call) = registry.begin("m").unwrap();
            registry.complete(&id, b"0").unwrap();
        }
        assert!(matches!(
            registry.complete(&Id::Number(1), b"0"),
            Err(CorrelationError::UnknownId(_))
        ));
        assert!(matches!(
            registry.complete(&Id::Number(3), b"0"),
            Err(CorrelationError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_registry_closes_call() {
        let registry = PendingRequests::new();
        let (_, call) = registry.begin("m").unwrap();
        drop(registry);
        assert_eq!(call.await, Err(CallError::ConnectionClosed));
    }
}
