//! Method dispatch table
//!
//! Maps escaped method names to their entries. Lookups hash the raw name
//! bytes taken from the message buffer, so dispatching a call never decodes
//! or allocates the method name, and the cost of a lookup does not depend on
//! how many methods are registered.
//!
//! Tables are cheaply cloneable (`Arc`-based). Registration goes through
//! `Arc::make_mut`, so it is meant to happen before the table is shared with
//! running connections; concurrent readers never lock.
//!
//! # Examples
//!
//! ```rust
//! use framerpc_core::Result;
//! use framerpc_server::{from_sync_fn, MethodTable};
//!
//! let table = MethodTable::builder()
//!     .method("ping", from_sync_fn(|| -> Result<&'static str> { Ok("pong") }))
//!     .build()
//!     .unwrap();
//!
//! assert!(table.contains("ping"));
//! assert_eq!(table.len(), 1);
//! ```

use crate::entry::{failure, CallScope, Invocation, MethodEntry, Outcome};
use crate::metrics::DispatchMetrics;
use framerpc_core::{decode_escaped_lossy, Error, Result, WireString};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Name → entry mapping with O(1) dispatch
#[derive(Clone, Default)]
pub struct MethodTable {
    entries: Arc<HashMap<WireString, Arc<dyn MethodEntry>>>,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::new()
    }

    /// Bind `name` to `entry`; returns false if the name is already bound
    pub fn register(&mut self, name: &str, entry: Arc<dyn MethodEntry>) -> bool {
        let key = WireString::new(name);
        if self.entries.contains_key(&key) {
            return false;
        }
        Arc::make_mut(&mut self.entries).insert(key, entry);
        true
    }

    /// Record dispatch metrics for every call through this table
    pub fn set_metrics(&mut self, metrics: DispatchMetrics) {
        self.metrics = Some(Arc::new(metrics));
    }

    /// Look an entry up by its escaped name bytes
    pub fn try_get(&self, name: &[u8]) -> Option<&Arc<dyn MethodEntry>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&WireString::new(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered method names, decoded
    pub fn methods(&self) -> Vec<String> {
        self.entries.keys().map(|name| name.to_string()).collect()
    }

    /// Resolve a call
    ///
    /// Unknown methods produce a MethodNotFound response for requests and
    /// nothing for notifications.
    pub fn dispatch(&self, method: &[u8], params: Option<&[u8]>, scope: CallScope) -> Invocation {
        let Some(entry) = self.entries.get(method) else {
            let name = decode_escaped_lossy(method);
            tracing::debug!(method = %name, id = ?scope.id, "method not found");
            if let Some(metrics) = &self.metrics {
                metrics.record_unknown_method();
            }
            return Invocation::Ready(failure(scope.id.as_ref(), &Error::MethodNotFound(name)));
        };

        let Some(metrics) = &self.metrics else {
            return entry.invoke(params, scope);
        };

        let started = Instant::now();
        match entry.invoke(params, scope) {
            Invocation::Ready(outcome) => {
                record(metrics, method, &outcome, started);
                Invocation::Ready(outcome)
            }
            Invocation::Pending(future) => {
                let metrics = Arc::clone(metrics);
                let method = decode_escaped_lossy(method);
                Invocation::Pending(Box::pin(async move {
                    let outcome = future.await;
                    metrics.record_call(&method, outcome.status.as_str(), started.elapsed().as_secs_f64());
                    outcome
                }))
            }
        }
    }
}

fn record(metrics: &DispatchMetrics, method: &[u8], outcome: &Outcome, started: Instant) {
    metrics.record_call(
        &decode_escaped_lossy(method),
        outcome.status.as_str(),
        started.elapsed().as_secs_f64(),
    );
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.entries.len())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Builder for a [`MethodTable`]; duplicate names fail at `build`
#[derive(Default)]
pub struct MethodTableBuilder {
    table: MethodTable,
    duplicate: Option<String>,
}

impl MethodTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method
    pub fn method(mut self, name: &str, entry: Arc<dyn MethodEntry>) -> Self {
        if !self.table.register(name, entry) && self.duplicate.is_none() {
            self.duplicate = Some(name.to_string());
        }
        self
    }

    pub fn metrics(mut self, metrics: DispatchMetrics) -> Self {
        self.table.set_metrics(metrics);
        self
    }

    pub fn build(self) -> Result<MethodTable> {
        match self.duplicate {
            Some(name) => Err(Error::DuplicateMethod(name)),
            None => Ok(self.table),
        }
    }
}
