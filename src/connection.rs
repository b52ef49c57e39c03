//! One JSON-RPC connection over a byte stream pair
//!
//! # Task Model
//!
//! [`ConnectionBuilder::spawn`](crate::ConnectionBuilder::spawn) starts two tasks:
//!
//! - **Read task**: frames and classifies messages in wire order. Calls are
//!   handed to their own task right after classification, so a slow handler
//!   never delays framing of the next message. Responses go to the pending
//!   request registry.
//! - **Write task**: drains an unbounded channel of encoded messages into the
//!   frame writer. Responses therefore leave in completion order, not in
//!   arrival order.
//!
//! The [`Connection`] handle is cheap to clone and issues calls and
//! notifications to the peer.
//!
//! # Lifecycle
//!
//! When the stream ends, or [`Connection::shutdown`] is called, every pending
//! call fails with [`CallError::ConnectionClosed`] and every running handler's
//! cancellation token is cancelled. [`Connection::closed`] resolves afterwards.

use crate::builder::ConnectionConfig;
use framerpc_client::{CallError, CorrelationError, PendingCall, PendingRequests};
use framerpc_core::{
    classify, codec, BufferPool, ErrorPayload, Frame, FrameReader, FrameWriter, Id, MessageKind,
    MessageView, WireString,
};
use framerpc_server::{CallScope, MethodTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Params of the cancellation notification
#[derive(Debug, Serialize, Deserialize)]
struct CancelParams {
    id: Id,
}

/// Snapshot of a connection's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Complete frames read
    pub messages_received: u64,
    /// Requests and notifications handed to the method table
    pub calls_dispatched: u64,
    /// Frames without a usable `Content-Length`
    pub malformed_frames: u64,
    /// Messages classified as invalid JSON or invalid envelopes
    pub invalid_messages: u64,
    /// Responses for ids that were never pending or were cancelled
    pub unknown_responses: u64,
    /// Responses for ids that were already completed
    pub duplicate_responses: u64,
    /// Responses without a usable id
    pub unidentified_responses: u64,
    /// Handler results dropped because the request was cancelled
    pub discarded_results: u64,
}

/// Cancellation tokens of running handlers, by request id
///
/// A peer may reuse an id while an earlier request with it is still running,
/// so each dispatch is tracked under its own ticket.
#[derive(Default)]
struct InFlight {
    next_ticket: u64,
    tokens: HashMap<Id, Vec<(u64, CancellationToken)>>,
}

impl InFlight {
    fn insert(&mut self, id: Id, token: CancellationToken) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.tokens.entry(id).or_default().push((ticket, token));
        ticket
    }

    fn remove(&mut self, id: &Id, ticket: u64) {
        if let Some(running) = self.tokens.get_mut(id) {
            running.retain(|(t, _)| *t != ticket);
            if running.is_empty() {
                self.tokens.remove(id);
            }
        }
    }

    /// Remove every dispatch running under `id`
    fn take(&mut self, id: &Id) -> Vec<CancellationToken> {
        self.tokens
            .remove(id)
            .map(|running| running.into_iter().map(|(_, token)| token).collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct Counters {
    messages_received: AtomicU64,
    calls_dispatched: AtomicU64,
    malformed_frames: AtomicU64,
    invalid_messages: AtomicU64,
    unknown_responses: AtomicU64,
    duplicate_responses: AtomicU64,
    unidentified_responses: AtomicU64,
    discarded_results: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Counters {
    fn snapshot(&self) -> ConnectionStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ConnectionStats {
            messages_received: load(&self.messages_received),
            calls_dispatched: load(&self.calls_dispatched),
            malformed_frames: load(&self.malformed_frames),
            invalid_messages: load(&self.invalid_messages),
            unknown_responses: load(&self.unknown_responses),
            duplicate_responses: load(&self.duplicate_responses),
            unidentified_responses: load(&self.unidentified_responses),
            discarded_results: load(&self.discarded_results),
        }
    }
}

struct Inner {
    methods: MethodTable,
    pending: PendingRequests,
    config: ConnectionConfig,
    cancel_name: Option<WireString>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pool: BufferPool,
    /// Parent of every in-flight handler token
    shutdown: CancellationToken,
    /// Cancelled once the read task has finished cleaning up
    closed: CancellationToken,
    in_flight: Mutex<InFlight>,
    counters: Counters,
}

/// Handle to a running connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub(crate) fn spawn<R, W>(
        methods: MethodTable,
        pending: PendingRequests,
        config: ConnectionConfig,
        reader: R,
        writer: W,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let pool = BufferPool::new(config.pooled_buffers);
        let reader = FrameReader::new(reader, pool.clone(), config.max_message_size);

        let inner = Arc::new(Inner {
            methods,
            pending,
            cancel_name: config.cancel_method.as_deref().map(WireString::new),
            config,
            outgoing,
            pool,
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
            in_flight: Mutex::new(InFlight::default()),
            counters: Counters::default(),
        });

        tokio::spawn(write_loop(FrameWriter::new(writer), outgoing_rx));
        tokio::spawn(read_loop(Arc::clone(&inner), reader));

        Self { inner }
    }

    /// Issue a request and return its id with the awaitable for its response
    #[tracing::instrument(skip(self, params), fields(id))]
    pub fn begin_call<P>(&self, method: &str, params: &P) -> Result<(Id, PendingCall), CallError>
    where
        P: Serialize + ?Sized,
    {
        if self.is_closed() {
            return Err(CallError::ConnectionClosed);
        }
        let (id, call) = self.inner.pending.begin(method)?;
        tracing::Span::current().record("id", tracing::field::display(&id));

        let bytes = match codec::encode_request(method, &id, params) {
            Ok(bytes) => bytes,
            Err(err) => {
                let failure = CallError::Encode(err.to_string());
                self.inner.pending.abandon(&id, failure.clone());
                return Err(failure);
            }
        };
        if self.inner.outgoing.send(bytes).is_err() {
            self.inner.pending.abandon(&id, CallError::ConnectionClosed);
            return Err(CallError::ConnectionClosed);
        }
        Ok((id, call))
    }

    /// Call `method` and deserialize its result
    ///
    /// Honours the configured request timeout: on expiry the call is removed,
    /// the peer is sent a cancellation notification and the call fails with
    /// [`CallError::Timeout`].
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, CallError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let (id, call) = self.begin_call(method, params)?;
        let raw = match self.inner.config.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::debug!(%id, method, "call timed out");
                    self.withdraw(&id, CallError::Timeout);
                    return Err(CallError::Timeout);
                }
            },
            None => call.await?,
        };
        raw.deserialize()
    }

    /// Call `method`, giving up when `cancel` fires
    pub async fn call_with_cancellation<P, R>(
        &self,
        method: &str,
        params: &P,
        cancel: CancellationToken,
    ) -> Result<R, CallError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let (id, call) = self.begin_call(method, params)?;
        tokio::select! {
            result = call => result?.deserialize(),
            _ = cancel.cancelled() => {
                self.cancel(&id);
                Err(CallError::Cancelled)
            }
        }
    }

    /// Cancel a pending call
    ///
    /// Its awaitable resolves to [`CallError::Cancelled`] at once; the peer is
    /// told best-effort. Returns false when the call has already settled.
    #[tracing::instrument(skip(self))]
    pub fn cancel(&self, id: &Id) -> bool {
        self.withdraw(id, CallError::Cancelled)
    }

    fn withdraw(&self, id: &Id, reason: CallError) -> bool {
        if !self.inner.pending.abandon(id, reason) {
            return false;
        }
        if let Some(method) = &self.inner.config.cancel_method {
            let params = CancelParams { id: id.clone() };
            match codec::encode_notification(method, &params) {
                Ok(bytes) => {
                    let _ = self.inner.outgoing.send(bytes);
                }
                Err(err) => tracing::warn!(%id, error = %err, "failed to encode cancellation"),
            }
        }
        true
    }

    /// Send a notification; no response is expected
    #[tracing::instrument(skip(self, params))]
    pub fn notify<P>(&self, method: &str, params: &P) -> Result<(), CallError>
    where
        P: Serialize + ?Sized,
    {
        if self.is_closed() {
            return Err(CallError::ConnectionClosed);
        }
        let bytes = codec::encode_notification(method, params)
            .map_err(|e| CallError::Encode(e.to_string()))?;
        self.inner
            .outgoing
            .send(bytes)
            .map_err(|_| CallError::ConnectionClosed)
    }

    /// Stop reading, fail pending calls and cancel running handlers
    pub fn shutdown(&self) {
        tracing::debug!("connection shutdown requested");
        self.inner.shutdown.cancel();
    }

    /// Resolves once the connection has stopped reading and cleaned up
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled() || self.inner.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.counters.snapshot()
    }

    /// The registry of calls awaiting a response
    pub fn pending(&self) -> &PendingRequests {
        &self.inner.pending
    }

    /// Message buffers currently borrowed from the connection's pool
    pub fn buffers_outstanding(&self) -> usize {
        self.inner.pool.outstanding()
    }

    pub fn methods(&self) -> &MethodTable {
        &self.inner.methods
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("methods", &self.inner.methods.len())
            .field("pending", &self.inner.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn write_loop<W>(mut writer: FrameWriter<W>, mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = outgoing.recv().await {
        if let Err(err) = writer.write_frame(&bytes).await {
            tracing::error!(error = %err, "failed to write frame");
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        tracing::debug!(error = %err, "failed to shut down writer");
    }
}

#[tracing::instrument(skip_all)]
async fn read_loop<R>(inner: Arc<Inner>, mut reader: FrameReader<R>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.next_message(&inner.shutdown).await {
            Ok(Frame::Message(buffer)) => {
                bump(&inner.counters.messages_received);
                route(&inner, classify(buffer));
            }
            Ok(Frame::Malformed(header)) => {
                bump(&inner.counters.malformed_frames);
                tracing::warn!(header = %header, "frame without a usable Content-Length");
                inner.send_error(None, &ErrorPayload::parse_error());
            }
            Ok(Frame::End) => {
                tracing::debug!("stream ended");
                break;
            }
            Ok(Frame::Cancelled) => {
                tracing::debug!("read cancelled");
                break;
            }
            Err(err) => {
                tracing::error!(error = %err, "unrecoverable read failure");
                break;
            }
        }
    }

    inner.shutdown.cancel();
    let failed = inner.pending.fail_all(CallError::ConnectionClosed);
    tracing::debug!(failed, "connection closed");
    inner.closed.cancel();
}

fn route(inner: &Arc<Inner>, mut view: MessageView) {
    match view.kind() {
        MessageKind::Request | MessageKind::Notification => {
            if view.kind() == MessageKind::Notification && inner.is_cancel_notification(&view) {
                inner.cancel_in_flight(&view);
                return;
            }
            bump(&inner.counters.calls_dispatched);
            let token = inner.shutdown.child_token();
            // Registered before the task starts so an immediate cancellation finds it.
            let ticket = match (view.id(), view.method_bytes()) {
                (Some(id), Some(method)) if inner.accepts_cancellation(method) => {
                    Some(inner.in_flight().insert(id.clone(), token.clone()))
                }
                _ => None,
            };
            tokio::spawn(dispatch(Arc::clone(inner), view, token, ticket));
        }
        MessageKind::ResultResponse => {
            let id = view.id().cloned().unwrap_or(Id::Null);
            let result = view.result().unwrap_or(&b"null"[..]);
            if let Err(err) = inner.pending.complete(&id, result) {
                inner.correlation_failed(err);
            }
        }
        MessageKind::ErrorResponse => {
            let Some(payload) = view.take_error() else {
                return;
            };
            if view.id().map_or(true, Id::is_null) {
                bump(&inner.counters.unidentified_responses);
            }
            if let Err(err) = inner.pending.fail(view.id(), payload) {
                inner.correlation_failed(err);
            }
        }
        MessageKind::InvalidJson => {
            bump(&inner.counters.invalid_messages);
            tracing::warn!(problem = ?view.problem(), "message is not valid JSON");
            inner.send_error(None, &ErrorPayload::parse_error());
        }
        MessageKind::InvalidMessage => {
            bump(&inner.counters.invalid_messages);
            let problem = view.problem().unwrap_or("Invalid Request");
            tracing::warn!(id = ?view.id(), problem, "invalid envelope");
            if let Some(id) = view.id() {
                inner.send_error(Some(id), &ErrorPayload::invalid_request(problem));
            }
        }
    }
}

async fn dispatch(
    inner: Arc<Inner>,
    view: MessageView,
    token: CancellationToken,
    ticket: Option<u64>,
) {
    let id = view.id().cloned();
    let scope = CallScope {
        id: id.clone(),
        cancellation: Some(token.clone()),
    };
    let method = view.method_bytes().unwrap_or_default();
    let invocation = inner.methods.dispatch(method, view.params(), scope);
    // Params are bound; the message buffer goes back to the pool now.
    drop(view);
    let outcome = invocation.outcome().await;

    if let Some(ticket) = ticket {
        if let Some(id) = &id {
            inner.in_flight().remove(id, ticket);
        }
        if token.is_cancelled() {
            bump(&inner.counters.discarded_results);
            tracing::debug!(id = ?id, "discarding result of cancelled request");
            return;
        }
    }
    if let Some(bytes) = outcome.response {
        if inner.outgoing.send(bytes).is_err() {
            tracing::debug!(id = ?id, "response dropped, writer is gone");
        }
    }
}

impl Inner {
    fn in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accepts_cancellation(&self, method: &[u8]) -> bool {
        self.methods
            .try_get(method)
            .is_some_and(|entry| entry.signature().accepts_cancellation())
    }

    fn is_cancel_notification(&self, view: &MessageView) -> bool {
        match (&self.cancel_name, view.method_bytes()) {
            (Some(cancel), Some(method)) => cancel.as_bytes() == method,
            _ => false,
        }
    }

    fn cancel_in_flight(&self, view: &MessageView) {
        let params = view
            .params()
            .and_then(|raw| serde_json::from_slice::<CancelParams>(raw).ok());
        let Some(CancelParams { id }) = params else {
            tracing::warn!("cancellation notification without an id");
            return;
        };
        let running = self.in_flight().take(&id);
        if running.is_empty() {
            tracing::trace!(%id, "cancellation for a request that is not running");
            return;
        }
        tracing::debug!(%id, count = running.len(), "request cancelled by peer");
        for token in running {
            token.cancel();
        }
    }

    fn correlation_failed(&self, err: CorrelationError) {
        let counter = match &err {
            CorrelationError::UnknownId(_) => &self.counters.unknown_responses,
            CorrelationError::Duplicate(_) => &self.counters.duplicate_responses,
            CorrelationError::MissingId => &self.counters.unidentified_responses,
        };
        bump(counter);
        tracing::warn!(error = %err, "response could not be correlated");
    }

    fn send_error(&self, id: Option<&Id>, payload: &ErrorPayload) {
        match codec::encode_error(id, payload) {
            Ok(bytes) => {
                let _ = self.outgoing.send(bytes);
            }
            Err(err) => tracing::error!(error = %err, "failed to encode error response"),
        }
    }
}
