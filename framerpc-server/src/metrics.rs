//! Dispatch metrics
//!
//! OpenTelemetry instruments for the method dispatch table. All metrics are
//! prefixed with `framerpc.dispatch.*`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use framerpc_server::DispatchMetrics;
//!
//! let metrics = DispatchMetrics::new("my-service");
//! metrics.record_call("add", "success", 0.0004);
//! ```

use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    InstrumentationScope, KeyValue,
};

/// Instruments recorded by [`MethodTable::dispatch`](crate::MethodTable::dispatch)
pub struct DispatchMetrics {
    /// Calls dispatched, by method and status
    pub calls_total: Counter<u64>,
    /// Handler duration in seconds, including async completion
    pub call_duration: Histogram<f64>,
    /// Calls naming a method that is not registered
    pub unknown_method_total: Counter<u64>,
    /// Handlers that panicked
    pub panics_total: Counter<u64>,
}

impl DispatchMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            calls_total: meter
                .u64_counter("framerpc.dispatch.calls.total")
                .with_description("Total number of calls dispatched")
                .build(),
            call_duration: meter
                .f64_histogram("framerpc.dispatch.call.duration")
                .with_description("Handler duration in seconds")
                .build(),
            unknown_method_total: meter
                .u64_counter("framerpc.dispatch.unknown_method.total")
                .with_description("Calls for methods that are not registered")
                .build(),
            panics_total: meter
                .u64_counter("framerpc.dispatch.panics.total")
                .with_description("Handlers that panicked")
                .build(),
        }
    }

    /// Record a finished call; `status` is one of `success`, `error`, `panic`
    pub fn record_call(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.calls_total.add(1, attributes);
        self.call_duration.record(duration_secs, attributes);
        if status == "panic" {
            self.panics_total
                .add(1, &[KeyValue::new("method", method.to_string())]);
        }
    }

    pub fn record_unknown_method(&self) {
        self.unknown_method_total.add(1, &[]);
    }
}

impl std::fmt::Debug for DispatchMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DispatchMetrics")
    }
}
