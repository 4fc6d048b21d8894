//! Rate ingestion pipeline.
//!
//! One invocation runs `fetch → decode → validate → persist` and stops at the
//! first failure. A failed run returns only a [`PipelineError`]; a successful
//! one returns the persisted [`Rate`]. There is no partial result.
//!
//! Concurrent invocations are independent: each issues its own upstream fetch
//! and writes its own row.

use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Error, PipelineError, Stage};
use crate::metrics::Metrics;
use crate::repository::{Database, RateRepository};
use crate::source::QuoteSource;
use crate::types::Rate;

pub struct RateIngestionService<S, D> {
    source: S,
    repository: Arc<RateRepository<D>>,
    metrics: Arc<Metrics>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl<S: QuoteSource, D: Database> RateIngestionService<S, D> {
    /// `request_timeout` bounds fetch and persist together. Once `shutdown` is
    /// cancelled new invocations are rejected.
    pub fn new(
        source: S,
        repository: Arc<RateRepository<D>>,
        metrics: Arc<Metrics>,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            repository,
            metrics,
            request_timeout,
            shutdown,
        }
    }

    /// Run the pipeline once.
    pub async fn ingest(&self) -> Result<Rate, PipelineError> {
        let start = std::time::Instant::now();
        self.metrics.rate_calls.fetch_add(1, Relaxed);

        let result = self.run().await;

        self.metrics.rate_latency.record(start.elapsed());
        match &result {
            Ok(rate) => info!(ask = rate.ask, bid = rate.bid, "rate saved"),
            Err(e) => {
                self.metrics.record_failure(e.stage);
                warn!(stage = %e.stage, error = %e.source, "rate ingestion failed");
            }
        }
        result
    }

    async fn run(&self) -> Result<Rate, PipelineError> {
        if self.shutdown.is_cancelled() {
            return Err(PipelineError::new(Stage::Admission, Error::ShuttingDown));
        }
        let deadline = Instant::now() + self.request_timeout;

        debug!(endpoint = self.source.endpoint(), "fetching depth");
        let raw = timeout_at(deadline, self.source.fetch())
            .await
            .unwrap_or_else(|_| Err(Error::DeadlineExceeded(self.request_timeout)))
            .map_err(PipelineError::at(Stage::Fetch))?;

        let snapshot = codec::decode(&raw).map_err(PipelineError::at(Stage::Decode))?;
        let (best_ask, best_bid) =
            codec::extract_best(&snapshot).map_err(PipelineError::at(Stage::Validate))?;
        debug!(sequence_id = snapshot.sequence_id, "extracted best levels");

        let rate = Rate::from_best(best_ask, best_bid, Utc::now());

        self.repository
            .save_rate(&rate, deadline)
            .await
            .map_err(PipelineError::at(Stage::Persist))?;

        Ok(rate)
    }
}
