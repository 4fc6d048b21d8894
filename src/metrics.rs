//! Metrics collection with Prometheus text exposition and health endpoint.
//!
//! A [`Metrics`] value is created at startup and handed to every component
//! that records into it. There is no global registry: tests build their own
//! instance and read the counters back directly.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Stage;

/// Label value for the only RPC method the service exposes.
pub const METHOD: &str = "GetRateFromExchange";

// ---------------------------------------------------------------------------
// Prometheus histogram
// ---------------------------------------------------------------------------

const NUM_BUCKETS: usize = 6;

/// Upper bounds in nanoseconds + Prometheus `le` label strings.
const BUCKETS: [(u64, &str); NUM_BUCKETS] = [
    (10_000_000, "0.01"),
    (50_000_000, "0.05"),
    (100_000_000, "0.1"),
    (500_000_000, "0.5"),
    (1_000_000_000, "1"),
    (5_000_000_000, "5"),
];

pub struct PromHistogram {
    /// Cumulative bucket counters. Index i counts observations <= BUCKETS[i].
    buckets: [AtomicU64; NUM_BUCKETS],
    sum_ns: AtomicU64,
    count: AtomicU64,
}

impl Default for PromHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl PromHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_ns: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a duration observation. Increments all cumulative buckets
    /// whose upper bound >= the observed value.
    pub fn record(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);

        if let Some(first) = BUCKETS.iter().position(|&(bound_ns, _)| nanos <= bound_ns) {
            for bucket in &self.buckets[first..] {
                bucket.fetch_add(1, Relaxed);
            }
        }

        self.sum_ns.fetch_add(nanos, Relaxed);
        self.count.fetch_add(1, Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Relaxed)
    }

    /// Render as Prometheus histogram lines. `labels` is empty or e.g. `method="X"`.
    fn render(&self, name: &str, labels: &str, out: &mut String) {
        let sep = if labels.is_empty() { "" } else { "," };
        for (i, &(_, le)) in BUCKETS.iter().enumerate() {
            let count = self.buckets[i].load(Relaxed);
            let _ = writeln!(out, "{name}_bucket{{{labels}{sep}le=\"{le}\"}} {count}");
        }

        let total = self.count.load(Relaxed);
        let _ = writeln!(out, "{name}_bucket{{{labels}{sep}le=\"+Inf\"}} {total}");

        let sum_secs = self.sum_ns.load(Relaxed) as f64 / 1_000_000_000.0;
        if labels.is_empty() {
            let _ = writeln!(out, "{name}_sum {sum_secs}");
            let _ = writeln!(out, "{name}_count {total}");
        } else {
            let _ = writeln!(out, "{name}_sum{{{labels}}} {sum_secs}");
            let _ = writeln!(out, "{name}_count{{{labels}}} {total}");
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

pub struct Metrics {
    // RPC
    pub rate_calls: AtomicU64,
    pub rate_latency: PromHistogram,
    rate_failures: [AtomicU64; Stage::ALL.len()],

    // Upstream
    pub upstream_requests: AtomicU64,

    // Repository
    pub db_saves: AtomicU64,
    pub db_save_failures: AtomicU64,
    pub db_save_latency: PromHistogram,

    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            rate_calls: AtomicU64::new(0),
            rate_latency: PromHistogram::new(),
            rate_failures: std::array::from_fn(|_| AtomicU64::new(0)),
            upstream_requests: AtomicU64::new(0),
            db_saves: AtomicU64::new(0),
            db_save_failures: AtomicU64::new(0),
            db_save_latency: PromHistogram::new(),
            start_time: Instant::now(),
        }
    }
}

impl Metrics {
    pub fn record_failure(&self, stage: Stage) {
        self.rate_failures[stage.index()].fetch_add(1, Relaxed);
    }

    pub fn failures(&self, stage: Stage) -> u64 {
        self.rate_failures[stage.index()].load(Relaxed)
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);
        let method = format!("method=\"{METHOD}\"");

        // -- Counters --
        let _ = writeln!(out, "# HELP rate_exchange_calls_total Total number of calls to GetRateFromExchange");
        let _ = writeln!(out, "# TYPE rate_exchange_calls_total counter");
        let _ = writeln!(out, "rate_exchange_calls_total{{{method}}} {}", self.rate_calls.load(Relaxed));

        let _ = writeln!(out, "# HELP rate_exchange_failures_total Failed GetRateFromExchange calls by pipeline stage");
        let _ = writeln!(out, "# TYPE rate_exchange_failures_total counter");
        for stage in Stage::ALL {
            let _ = writeln!(out, "rate_exchange_failures_total{{stage=\"{stage}\"}} {}", self.failures(stage));
        }

        let _ = writeln!(out, "# HELP binance_api_requests_total Total number of requests to Binance API");
        let _ = writeln!(out, "# TYPE binance_api_requests_total counter");
        let _ = writeln!(out, "binance_api_requests_total {}", self.upstream_requests.load(Relaxed));

        let _ = writeln!(out, "# HELP db_saves_total Total number of successful saves to database");
        let _ = writeln!(out, "# TYPE db_saves_total counter");
        let _ = writeln!(out, "db_saves_total {}", self.db_saves.load(Relaxed));

        let _ = writeln!(out, "# HELP db_save_failures_total Total number of failed saves to database");
        let _ = writeln!(out, "# TYPE db_save_failures_total counter");
        let _ = writeln!(out, "db_save_failures_total {}", self.db_save_failures.load(Relaxed));

        // -- Gauges --
        let _ = writeln!(out, "# HELP process_uptime_seconds Seconds since process start");
        let _ = writeln!(out, "# TYPE process_uptime_seconds gauge");
        let _ = writeln!(out, "process_uptime_seconds {}", self.start_time.elapsed().as_secs());

        // -- Histograms --
        let _ = writeln!(out, "# HELP rate_exchange_latency_seconds Latency of GetRateFromExchange method");
        let _ = writeln!(out, "# TYPE rate_exchange_latency_seconds histogram");
        self.rate_latency.render("rate_exchange_latency_seconds", &method, &mut out);

        let _ = writeln!(out, "# HELP db_save_latency_seconds Latency of saving data to database");
        let _ = writeln!(out, "# TYPE db_save_latency_seconds histogram");
        self.db_save_latency.render("db_save_latency_seconds", "", &mut out);

        out
    }
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// Serve `/health` and `/metrics` on the given port.
///
/// Best-effort: a bind or serve failure is logged and the function returns.
pub async fn serve_http(port: u16, metrics: Arc<Metrics>, cancel: CancellationToken) {
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prom_metrics))
        .with_state(metrics);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port, error = %e, "failed to bind metrics port");
            return;
        }
    };

    info!(port, "metrics/health HTTP server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
    {
        error!(error = %e, "metrics server failed");
    }
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK\n")
}

async fn prom_metrics(State(m): State<Arc<Metrics>>) -> String {
    m.to_prometheus()
}
