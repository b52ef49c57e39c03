//! Connection builder and configuration
//!
//! The builder wires a method table, the pending request registry and its
//! policies to one byte stream pair, then spawns the connection tasks.
//!
//! # Examples
//!
//! ```rust,no_run
//! use framerpc::{Connection, ConnectionBuilder, MethodTable};
//! use std::time::Duration;
//!
//! # async fn example(table: MethodTable) {
//! let connection: Connection = ConnectionBuilder::new()
//!     .methods(table)
//!     .request_timeout(Duration::from_secs(30))
//!     .max_message_size(16 * 1024 * 1024)
//!     .with_metrics("calculator")
//!     .spawn(tokio::io::stdin(), tokio::io::stdout());
//! # }
//! ```

use crate::connection::Connection;
use framerpc_client::{
    CallMetrics, ErrorMapper, IdGenerator, PendingRequests, SequentialIds, StandardErrorMapper,
    DEFAULT_DUPLICATE_WINDOW,
};
use framerpc_server::{DispatchMetrics, MethodTable};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Notification method used for in-band cancellation unless configured otherwise
pub const DEFAULT_CANCEL_METHOD: &str = "$/cancelRequest";

/// Tunables of one connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Largest accepted `Content-Length`; larger frames end the connection
    pub max_message_size: usize,
    /// Idle message buffers kept for reuse
    pub pooled_buffers: usize,
    /// Deadline applied by [`Connection::call`]
    pub request_timeout: Option<Duration>,
    /// Notification carrying `{"id": ..}` that cancels a request, in both directions
    pub cancel_method: Option<String>,
    /// Completed ids remembered to recognise duplicate responses
    pub duplicate_window: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024 * 1024,
            pooled_buffers: 64,
            request_timeout: None,
            cancel_method: Some(DEFAULT_CANCEL_METHOD.to_string()),
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }
}

/// Builder for a [`Connection`]
pub struct ConnectionBuilder {
    methods: MethodTable,
    config: ConnectionConfig,
    ids: Arc<dyn IdGenerator>,
    errors: Arc<dyn ErrorMapper>,
    service_name: Option<String>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            methods: MethodTable::new(),
            config: ConnectionConfig::default(),
            ids: Arc::new(SequentialIds::new()),
            errors: Arc::new(StandardErrorMapper),
            service_name: None,
        }
    }

    /// Methods this side answers
    pub fn methods(mut self, methods: MethodTable) -> Self {
        self.methods = methods;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.config.max_message_size = bytes;
        self
    }

    pub fn pooled_buffers(mut self, count: usize) -> Self {
        self.config.pooled_buffers = count;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Set the cancellation notification method; `None` disables in-band cancellation
    pub fn cancel_method(mut self, method: Option<impl Into<String>>) -> Self {
        self.config.cancel_method = method.map(Into::into);
        self
    }

    pub fn duplicate_window(mut self, ids: usize) -> Self {
        self.config.duplicate_window = ids;
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn error_mapper(mut self, errors: impl ErrorMapper) -> Self {
        self.errors = Arc::new(errors);
        self
    }

    /// Record dispatch and call metrics under `service_name`
    pub fn with_metrics(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Start the reader and writer tasks; must be called inside a Tokio runtime
    pub fn spawn<R, W>(self, reader: R, writer: W) -> Connection
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut methods = self.methods;
        let call_metrics = match &self.service_name {
            Some(name) => {
                methods.set_metrics(DispatchMetrics::new(name.clone()));
                Some(CallMetrics::new(name.clone()))
            }
            None => None,
        };
        let pending = PendingRequests::build(
            self.ids,
            self.errors,
            self.config.duplicate_window,
            call_metrics,
        );

        tracing::debug!(
            methods = methods.len(),
            max_message_size = self.config.max_message_size,
            "spawning connection"
        );
        Connection::spawn(methods, pending, self.config, reader, writer)
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
