//! Prometheus metrics for the arena client.
//!
//! All metrics follow the naming convention: `arena_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // REDUCER / STORE
    // =========================================================================

    /// Ledger events applied, by kind
    pub static ref EVENTS_APPLIED: CounterVec = CounterVec::new(
        Opts::new("arena_sync_events_applied_total", "Ledger events applied to the store"),
        &["kind"]  // kind: chat/vote/elimination/phase
    ).expect("metric creation failed");

    /// Events dropped because their dedup key was already seen
    pub static ref DUPLICATE_EVENTS: Counter = Counter::new(
        "arena_sync_duplicate_events_total",
        "Events dropped as duplicates"
    ).expect("metric creation failed");

    /// Snapshot regressions rejected by the reducer
    pub static ref INTEGRITY_VIOLATIONS: CounterVec = CounterVec::new(
        Opts::new("arena_sync_integrity_violations_total", "Rejected monotonic regressions"),
        &["field"]
    ).expect("metric creation failed");

    /// Current store version
    pub static ref STORE_VERSION: Gauge = Gauge::new(
        "arena_sync_store_version",
        "Number of applied deltas"
    ).expect("metric creation failed");

    // =========================================================================
    // POLLER / INGESTOR
    // =========================================================================

    /// Snapshot polls by outcome
    pub static ref SNAPSHOT_POLLS: CounterVec = CounterVec::new(
        Opts::new("arena_poller_polls_total", "Snapshot polls"),
        &["outcome"]  // outcome: ok/retried/stale
    ).expect("metric creation failed");

    /// Snapshot poll duration
    pub static ref SNAPSHOT_POLL_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "arena_poller_poll_duration_seconds",
            "Time spent polling one room including retries"
        ).buckets(exponential_buckets(0.001, 2.0, 15).unwrap())
    ).expect("metric creation failed");

    /// Rooms currently marked stale
    pub static ref STALE_ROOMS: Gauge = Gauge::new(
        "arena_poller_stale_rooms",
        "Rooms whose last poll exhausted its retries"
    ).expect("metric creation failed");

    /// Catch-up signals sent by the ingestor
    pub static ref CATCH_UP_SIGNALS: Counter = Counter::new(
        "arena_ingestor_catch_up_signals_total",
        "Event ranges that could not be fetched"
    ).expect("metric creation failed");

    // =========================================================================
    // SUBMITTER / SESSION
    // =========================================================================

    /// Actions by kind and outcome
    pub static ref ACTIONS: CounterVec = CounterVec::new(
        Opts::new("arena_submitter_actions_total", "Submitted actions"),
        &["kind", "outcome"]  // outcome: confirmed/unconfirmed/rejected/invalid/unauthorized/transient
    ).expect("metric creation failed");

    /// Optimistic entries that timed out waiting for confirmation
    pub static ref RECONCILIATION_TIMEOUTS: Counter = Counter::new(
        "arena_submitter_reconciliation_timeouts_total",
        "Optimistic entries marked unconfirmed"
    ).expect("metric creation failed");

    /// Session status refreshes by resulting state
    pub static ref SESSION_REFRESHES: CounterVec = CounterVec::new(
        Opts::new("arena_session_refreshes_total", "Session status refreshes"),
        &["state"]
    ).expect("metric creation failed");

    // =========================================================================
    // AGENT
    // =========================================================================

    /// Agent commands by method and outcome
    pub static ref AGENT_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("arena_agent_requests_total", "Agent commands handled"),
        &["method", "outcome"]  // outcome: ok/error
    ).expect("metric creation failed");
}

/// Handle returned once metrics are registered
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Reducer / store
        Box::new(EVENTS_APPLIED.clone()),
        Box::new(DUPLICATE_EVENTS.clone()),
        Box::new(INTEGRITY_VIOLATIONS.clone()),
        Box::new(STORE_VERSION.clone()),
        // Poller / ingestor
        Box::new(SNAPSHOT_POLLS.clone()),
        Box::new(SNAPSHOT_POLL_DURATION.clone()),
        Box::new(STALE_ROOMS.clone()),
        Box::new(CATCH_UP_SIGNALS.clone()),
        // Submitter / session
        Box::new(ACTIONS.clone()),
        Box::new(RECONCILIATION_TIMEOUTS.clone()),
        Box::new(SESSION_REFRESHES.clone()),
        // Agent
        Box::new(AGENT_REQUESTS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
