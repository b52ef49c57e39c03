//! Call metrics
//!
//! OpenTelemetry instruments for outgoing calls, prefixed with
//! `framerpc.client.*`.
//!
//! # Metrics Collected
//!
//! - **calls_total**: finished calls by method and status (counter)
//! - **call_duration**: time from issue to completion (histogram)
//! - **cancellations_total**: calls cancelled or timed out locally (counter)
//! - **protocol_violations_total**: responses that matched no pending call (counter)
//!
//! # Examples
//!
//! ```rust,no_run
//! use framerpc_client::CallMetrics;
//!
//! let metrics = CallMetrics::new("my-client");
//! metrics.record_call("add", "success", 0.002);
//! ```

use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    InstrumentationScope, KeyValue,
};

pub struct CallMetrics {
    pub calls_total: Counter<u64>,
    pub call_duration: Histogram<f64>,
    pub cancellations_total: Counter<u64>,
    pub protocol_violations_total: Counter<u64>,
}

impl CallMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            calls_total: meter
                .u64_counter("framerpc.client.calls.total")
                .with_description("Total number of calls completed")
                .build(),
            call_duration: meter
                .f64_histogram("framerpc.client.call.duration")
                .with_description("Call duration in seconds")
                .build(),
            cancellations_total: meter
                .u64_counter("framerpc.client.cancellations.total")
                .with_description("Calls cancelled before a response arrived")
                .build(),
            protocol_violations_total: meter
                .u64_counter("framerpc.client.protocol_violations.total")
                .with_description("Responses that could not be correlated")
                .build(),
        }
    }

    pub fn record_call(&self, method: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.calls_total.add(1, attributes);
        self.call_duration.record(duration_secs, attributes);
    }

    pub fn record_cancellation(&self, method: &str) {
        self.cancellations_total
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    /// `kind` is one of `unknown_id`, `duplicate`, `missing_id`
    pub fn record_violation(&self, kind: &str) {
        self.protocol_violations_total
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    }
}

impl std::fmt::Debug for CallMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CallMetrics")
    }
}
