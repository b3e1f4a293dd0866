//! # Arena Telemetry
//!
//! Structured logging and Prometheus metrics for the Turing Arena client.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use arena_telemetry::{TelemetryConfig, init_telemetry};
//!
//! fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("telemetry");
//!     // Logs and metrics are now being collected
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ARENA_SERVICE_NAME` | `turing-arena` | Service name in logs |
//! | `ARENA_LOG_LEVEL` | `info` | Log level filter |
//! | `ARENA_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `ARENA_JSON_LOGS` | `false` | JSON formatted logs |

mod config;
mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, MetricsHandle, ACTIONS, AGENT_REQUESTS,
    CATCH_UP_SIGNALS, DUPLICATE_EVENTS, EVENTS_APPLIED, INTEGRITY_VIOLATIONS,
    RECONCILIATION_TIMEOUTS, SESSION_REFRESHES, SNAPSHOT_POLLS, SNAPSHOT_POLL_DURATION,
    STALE_ROOMS, STORE_VERSION,
};
pub use tracing_setup::init_tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first (synchronous, no global subscriber needed)
    let metrics_handle = register_metrics()?;

    tracing_setup::init_tracing(&config)?;

    Ok(TelemetryGuard {
        _metrics: metrics_handle,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("bad filter".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad filter");
    }

    #[test]
    fn test_metric_inc_macro() {
        metric_inc!(CATCH_UP_SIGNALS);
        metric_inc!(SNAPSHOT_POLLS, &["ok"]);
        assert!(CATCH_UP_SIGNALS.get() >= 1.0);
    }
}
