//! OpenTelemetry observability configuration and initialization
//!
//! This module wires the `tracing` ecosystem to OpenTelemetry: spans go to an
//! OTLP collector, metrics are exported periodically, and log events are
//! written locally as JSON or compact text.
//!
//! # Log Output
//!
//! Local log output always goes to **stderr**. Header-delimited JSON-RPC is
//! very often spoken over stdin/stdout, and a single stray log line on stdout
//! would corrupt the framing.
//!
//! # Usage Pattern
//!
//! Initialize observability at application startup, before spawning connections:
//!
//! ```rust,no_run
//! use framerpc_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("my-language-server")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("debug");
//!
//!     framerpc_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... run connections ...
//!
//!     framerpc_core::shutdown_observability();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint
//! - `RUST_LOG`: Log level filter (e.g., "info", "framerpc=debug")

use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Providers installed by [`init_observability`], kept for shutdown
static PROVIDERS: Mutex<Option<Providers>> = Mutex::new(None);

struct Providers {
    tracer: Option<SdkTracerProvider>,
    meter: Option<SdkMeterProvider>,
}

/// Format of locally written log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event
    Json,
    /// Single-line human readable output
    Compact,
}

/// Observability configuration for OpenTelemetry
///
/// # Defaults
///
/// - Service name: "framerpc"
/// - Service version: Current crate version
/// - OTLP endpoint: From `OTEL_EXPORTER_OTLP_ENDPOINT`, or "http://localhost:4317"
/// - Traces and metrics exported, local logs enabled
/// - Log level: From `RUST_LOG`, or "info"
/// - Log format: JSON
///
/// # Examples
///
/// ```rust
/// use framerpc_core::{LogFormat, ObservabilityConfig};
///
/// let config = ObservabilityConfig::new("rpc-worker")
///     .with_endpoint("http://collector:4317")
///     .with_log_format(LogFormat::Compact)
///     .with_metrics(false);
/// assert!(!config.enable_metrics);
/// ```
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,

    /// Service version attached to every span and metric
    pub service_version: String,

    /// gRPC endpoint of the OpenTelemetry collector
    pub otlp_endpoint: String,

    /// Export spans over OTLP
    pub enable_traces: bool,

    /// Export metrics over OTLP
    pub enable_metrics: bool,

    /// Write log events locally (to stderr)
    pub enable_logs: bool,

    /// Log level filter, used when `RUST_LOG` is not set
    pub log_level: String,

    /// Format of local log output
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "framerpc".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            enable_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: LogFormat::Json,
        }
    }
}

impl ObservabilityConfig {
    /// Create a new configuration with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    /// Set the log level filter ("error", "warn", "info", "debug", "trace" or directives)
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable or disable span export
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Enable or disable metric export
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Enable or disable local log output
    pub fn with_logs(mut self, enable: bool) -> Self {
        self.enable_logs = enable;
        self
    }

    /// Choose the local log format
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    fn resource(&self) -> opentelemetry_sdk::Resource {
        opentelemetry_sdk::Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Initialize tracing, metrics and local logging
///
/// Call this once at startup. A second call returns an error (the global
/// subscriber is already set) instead of panicking.
///
/// # Errors
///
/// - The OTLP exporters cannot be built (bad endpoint, missing runtime)
/// - The log filter directive is invalid
/// - A global subscriber is already installed
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    let tracer_provider = if config.enable_traces {
        Some(init_tracer_provider(&config)?)
    } else {
        None
    };

    let meter_provider = if config.enable_metrics {
        Some(init_meter_provider(&config)?)
    } else {
        None
    };

    init_tracing_subscriber(&config, tracer_provider.as_ref())?;

    if let Some(provider) = &tracer_provider {
        global::set_tracer_provider(provider.clone());
    }
    if let Some(provider) = &meter_provider {
        global::set_meter_provider(provider.clone());
    }
    if let Ok(mut slot) = PROVIDERS.lock() {
        *slot = Some(Providers {
            tracer: tracer_provider,
            meter: meter_provider,
        });
    }

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        logs = config.enable_logs,
        "observability initialized"
    );

    Ok(())
}

/// Build a batching tracer provider exporting over OTLP/gRPC
fn init_tracer_provider(config: &ObservabilityConfig) -> Result<SdkTracerProvider, BoxError> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_id_generator(RandomIdGenerator::default())
        .build())
}

/// Build a meter provider exporting every 30 seconds over OTLP/gRPC
fn init_meter_provider(config: &ObservabilityConfig) -> Result<SdkMeterProvider, BoxError> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(30))
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build())
}

/// Install the global subscriber: filter, optional OTLP span layer, optional stderr output
fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer_provider: Option<&SdkTracerProvider>,
) -> Result<(), BoxError> {
    use opentelemetry::trace::TracerProvider as _;

    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = tracer_provider.map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let json_layer = (config.enable_logs && config.log_format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
    });

    let compact_layer = (config.enable_logs && config.log_format == LogFormat::Compact).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()?;

    Ok(())
}

/// Flush and shut down the providers installed by [`init_observability`]
///
/// Safe to call more than once; later calls find nothing to shut down.
pub fn shutdown_observability() {
    let providers = match PROVIDERS.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => None,
    };
    let Some(providers) = providers else {
        return;
    };

    tracing::info!("shutting down observability");
    if let Some(tracer) = providers.tracer {
        if let Err(err) = tracer.shutdown() {
            tracing::warn!(error = %err, "tracer provider shutdown failed");
        }
    }
    if let Some(meter) = providers.meter {
        if let Err(err) = meter.shutdown() {
            tracing::warn!(error = %err, "meter provider shutdown failed");
        }
    }
}
