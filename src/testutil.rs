//! Shared test fixtures and helpers.
//!
//! In-memory stand-ins for the I/O seams ([`Database`], [`QuoteSource`]), a
//! span-capturing subscriber, and JSON bodies used across test modules.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, Registry};

use crate::error::{Error, Result};
use crate::repository::Database;
use crate::source::QuoteSource;
use crate::types::Rate;

// ---------------------------------------------------------------------------
// JSON fixtures
// ---------------------------------------------------------------------------

/// 3-level Binance depth snapshot (compact, matches production wire format).
pub(crate) const BINANCE_JSON_3L: &str = r#"{"lastUpdateId":123456789,"bids":[["0.06824000","12.50000000"],["0.06823000","8.30000000"],["0.06822000","5.00000000"]],"asks":[["0.06825000","10.00000000"],["0.06826000","7.20000000"],["0.06827000","3.50000000"]]}"#;

/// One level per side, no `lastUpdateId`.
pub(crate) const SIMPLE_BOOK_JSON: &str = r#"{"asks":[["100.0","1.0"]],"bids":[["99.0","2.0"]]}"#;

pub(crate) const EMPTY_BOOK_JSON: &str = r#"{"asks":[],"bids":[]}"#;

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

type Rows = Arc<Mutex<Vec<(&'static str, Rate)>>>;

/// In-memory [`Database`] that records executed statements.
#[derive(Default)]
pub(crate) struct MemoryDatabase {
    rows: Rows,
    closes: Arc<AtomicUsize>,
    unreachable: bool,
    fail_writes: AtomicBool,
    write_delay: Option<std::time::Duration>,
}

impl MemoryDatabase {
    pub(crate) fn unreachable() -> Self {
        Self { unreachable: true, ..Default::default() }
    }

    pub(crate) fn failing_writes() -> Self {
        Self { fail_writes: AtomicBool::new(true), ..Default::default() }
    }

    /// Every insert sleeps for `delay` before landing.
    pub(crate) fn slow_writes(delay: std::time::Duration) -> Self {
        Self { write_delay: Some(delay), ..Default::default() }
    }

    pub(crate) fn rows(&self) -> Rows {
        self.rows.clone()
    }

    pub(crate) fn close_calls(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

impl Database for MemoryDatabase {
    async fn ping(&self) -> std::result::Result<(), sqlx::Error> {
        if self.unreachable {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }

    async fn execute(&self, statement: &'static str, rate: &Rate) -> std::result::Result<u64, sqlx::Error> {
        if self.fail_writes.load(Relaxed) {
            return Err(sqlx::Error::Protocol("connection reset".into()));
        }
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.rows.lock().unwrap().push((statement, *rate));
        Ok(1)
    }

    async fn close(&self) -> std::result::Result<(), sqlx::Error> {
        self.closes.fetch_add(1, Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Quote source
// ---------------------------------------------------------------------------

/// [`QuoteSource`] that replays a fixed outcome and counts calls.
pub(crate) struct ScriptedSource {
    outcome: Box<dyn Fn() -> Result<Bytes> + Send + Sync>,
    calls: Arc<AtomicUsize>,
    delay: Option<std::time::Duration>,
}

impl ScriptedSource {
    pub(crate) fn body(body: &'static str) -> Self {
        Self::new(move || Ok(Bytes::from_static(body.as_bytes())))
    }

    pub(crate) fn status(status: &'static str) -> Self {
        Self::new(move || Err(Error::Response(status.to_string())))
    }

    pub(crate) fn new(outcome: impl Fn() -> Result<Bytes> + Send + Sync + 'static) -> Self {
        Self {
            outcome: Box::new(outcome),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Sleep before answering.
    pub(crate) fn delayed(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl QuoteSource for ScriptedSource {
    async fn fetch(&self) -> Result<Bytes> {
        self.calls.fetch_add(1, Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.outcome)()
    }

    fn endpoint(&self) -> &str {
        "scripted://depth"
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Serve `app` on an ephemeral localhost port for the lifetime of the runtime.
pub(crate) async fn spawn_http(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

// ---------------------------------------------------------------------------
// Span capture
// ---------------------------------------------------------------------------

type SpanFields = Arc<Mutex<HashMap<String, HashMap<String, String>>>>;

/// Records the fields of every span, keyed by span name. Later spans with the
/// same name overwrite earlier ones.
#[derive(Clone, Default)]
pub(crate) struct SpanCapture {
    spans: SpanFields,
}

impl SpanCapture {
    /// Install as the thread-local default subscriber.
    pub(crate) fn set_default(&self) -> DefaultGuard {
        let subscriber = Registry::default().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub(crate) fn fields(&self, span: &str) -> HashMap<String, String> {
        self.spans.lock().unwrap().get(span).cloned().unwrap_or_default()
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S> Layer<S> for SpanCapture
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let mut spans = self.spans.lock().unwrap();
        let fields = spans.entry(attrs.metadata().name().to_string()).or_default();
        fields.clear();
        attrs.record(&mut FieldVisitor(fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut spans = self.spans.lock().unwrap();
        let fields = spans.entry(span.name().to_string()).or_default();
        values.record(&mut FieldVisitor(fields));
    }
}
