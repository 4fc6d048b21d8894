//! Upstream quote source.
//!
//! [`QuoteSource`] is the seam between the pipeline and the network: the
//! service only ever sees raw bytes or an error, so tests swap in a scripted
//! source and never touch a socket.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Issues one read against a fixed endpoint.
///
/// Implementations must not retry. Dropping the returned future aborts the
/// request.
pub trait QuoteSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Bytes>> + Send;

    /// Endpoint the source reads from, for logging.
    fn endpoint(&self) -> &str;
}

/// HTTP `GET` against the exchange depth endpoint.
pub struct HttpQuoteSource {
    client: Client,
    url: String,
    metrics: Arc<Metrics>,
}

impl HttpQuoteSource {
    pub fn new(url: impl Into<String>, timeout: Duration, metrics: Arc<Metrics>) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            metrics,
        })
    }
}

impl QuoteSource for HttpQuoteSource {
    async fn fetch(&self) -> Result<Bytes> {
        self.metrics.upstream_requests.fetch_add(1, Relaxed);

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Response(status.to_string()));
        }

        let body = response.bytes().await?;
        debug!(url = %self.url, bytes = body.len(), "fetched depth snapshot");
        Ok(body)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
