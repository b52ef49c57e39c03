//! Calculator served over stdin/stdout
//!
//! Speaks header-delimited JSON-RPC 2.0 on stdio, the way editors talk to
//! language servers. Logs go to stderr.
//!
//! Run with: cargo run --example stdio_calculator
//!
//! Then paste a frame, e.g.
//!
//! ```text
//! Content-Length: 63
//!
//! {"jsonrpc":"2.0","method":"multiply","params":[114,514],"id":1}
//! ```

use framerpc::{
    from_sync_fn, Cancellation, ConnectionBuilder, Error, LogFormat, MethodSpec,
    MethodTable, ObservabilityConfig, RequestId, Result,
};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct Range {
    from: u64,
    to: u64,
}

fn add(a: f64, b: f64) -> Result<f64> {
    Ok(a + b)
}

fn multiply(a: i64, b: i64) -> Result<i64> {
    a.checked_mul(b)
        .ok_or_else(|| Error::InvalidParams("product overflows a 64-bit integer".into()))
}

fn divide(dividend: f64, divisor: f64) -> Result<f64> {
    if divisor == 0.0 {
        return Err(Error::InvalidParams("division by zero".into()));
    }
    Ok(dividend / divisor)
}

/// Sums a range slowly; cancellable with `$/cancelRequest`
async fn slow_sum(range: Range, id: RequestId, cancel: Cancellation) -> Result<u64> {
    let mut total = 0;
    for n in range.from..=range.to {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(id = ?id.0, at = n, "sum cancelled");
                return Err(Error::Internal("cancelled".into()));
            }
            _ = tokio::time::sleep(Duration::from_millis(10)) => total += n,
        }
    }
    Ok(total)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let otel = ObservabilityConfig::new("stdio-calculator")
        .with_traces(false)
        .with_metrics(false)
        .with_log_format(LogFormat::Compact);
    framerpc::init_observability(otel)?;

    let methods = MethodTable::builder()
        .method("add", from_sync_fn(add))
        .method("multiply", from_sync_fn(multiply))
        .method(
            "divide",
            MethodSpec::new().named(["dividend", "divisor"]).sync(divide)?,
        )
        .method(
            "slow_sum",
            MethodSpec::new().whole_params().future(slow_sum)?,
        )
        .method(
            "log",
            from_sync_fn(|line: String| tracing::info!(%line, "client says")),
        )
        .build()?;

    let connection = ConnectionBuilder::new()
        .methods(methods)
        .spawn(tokio::io::stdin(), tokio::io::stdout());

    tracing::info!("calculator ready on stdio");
    tokio::select! {
        _ = connection.closed() => tracing::info!("stdin closed"),
        _ = tokio::signal::ctrl_c() => connection.shutdown(),
    }

    tracing::info!(stats = ?connection.stats(), "exiting");
    framerpc::shutdown_observability();
    Ok(())
}
