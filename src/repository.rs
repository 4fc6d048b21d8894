//! Rate repository.
//!
//! [`RateRepository`] owns the connection lifecycle (`open → migrate → save* →
//! close`) and instruments every write. The driver ([`Database`]) and the
//! migration runner ([`Migrator`]) are capability traits so the repository can
//! be exercised without a running Postgres.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::time::Duration;

use sqlx::migrate::MigrateError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::time::{Instant, timeout_at};
use tracing::field::{Empty, display};
use tracing::{Instrument, info, info_span, warn};

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::types::Rate;

pub const INSERT_RATE: &str = "INSERT INTO rates(ask, bid, ask_amount, bid_amount, timestamp) \
                               VALUES($1, $2, $3, $4, $5)";

/// Connection-level operations the repository needs from a driver.
///
/// Implementations must be safe for concurrent use; the repository adds no
/// locking of its own.
pub trait Database: Send + Sync + 'static {
    /// Liveness probe.
    fn ping(&self) -> impl Future<Output = std::result::Result<(), sqlx::Error>> + Send;

    /// Execute `statement` with the five rate fields bound in column order.
    /// Returns the number of affected rows.
    fn execute(
        &self,
        statement: &'static str,
        rate: &Rate,
    ) -> impl Future<Output = std::result::Result<u64, sqlx::Error>> + Send;

    fn close(&self) -> impl Future<Output = std::result::Result<(), sqlx::Error>> + Send;
}

/// Applies pending migrations from `source` against `database_url`.
///
/// Must succeed when nothing is pending.
pub trait Migrator: Send + Sync {
    fn up(
        &self,
        source: &Path,
        database_url: &str,
    ) -> impl Future<Output = std::result::Result<(), MigrateError>> + Send;
}

// ---------------------------------------------------------------------------
// Postgres implementations
// ---------------------------------------------------------------------------

/// `sqlx` Postgres pool.
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Builds the pool without connecting. The first query opens a connection.
    pub fn connect_lazy(dsn: &str, max_connections: u32) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(dsn)?;
        Ok(Self { pool })
    }
}

impl Database for PgDatabase {
    async fn ping(&self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn execute(&self, statement: &'static str, rate: &Rate) -> std::result::Result<u64, sqlx::Error> {
        let done = sqlx::query(statement)
            .bind(rate.ask)
            .bind(rate.bid)
            .bind(rate.ask_amount)
            .bind(rate.bid_amount)
            .bind(rate.observed_at)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn close(&self) -> std::result::Result<(), sqlx::Error> {
        self.pool.close().await;
        Ok(())
    }
}

/// Runs `sqlx` file migrations over a dedicated single-connection pool.
///
/// Applied versions are tracked in `_sqlx_migrations`.
pub struct SqlxMigrator;

impl Migrator for SqlxMigrator {
    async fn up(&self, source: &Path, database_url: &str) -> std::result::Result<(), MigrateError> {
        let migrator = sqlx::migrate::Migrator::new(source).await?;
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let result = migrator.run(&pool).await;
        pool.close().await;
        result
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Migration source and database locators derived from a path and a DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTarget {
    pub source: PathBuf,
    pub database_url: String,
}

impl MigrationTarget {
    pub fn resolve(path: &str, dsn: &str) -> std::result::Result<Self, MigrateError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(MigrateError::Source("migrations path cannot be empty".into()));
        }

        let base = dsn.split('?').next().unwrap_or(dsn);
        Ok(Self {
            source: PathBuf::from(path),
            database_url: format!("{base}?sslmode=disable"),
        })
    }

    /// `file://` locator for the migration source.
    pub fn source_url(&self) -> String {
        format!("file://{}", self.source.display())
    }
}

pub struct RateRepository<D> {
    db: D,
    dsn: String,
    closed: AtomicBool,
    metrics: Arc<Metrics>,
}

impl RateRepository<PgDatabase> {
    /// Open a Postgres-backed repository.
    pub async fn connect(dsn: &str, max_connections: u32, metrics: Arc<Metrics>) -> Result<Self> {
        let db = PgDatabase::connect_lazy(dsn, max_connections).map_err(Error::Connection)?;
        Self::open(dsn, db, metrics).await
    }
}

impl<D: Database> RateRepository<D> {
    /// Wrap a driver and probe it. A failed probe is a [`Error::Connection`].
    pub async fn open(dsn: &str, db: D, metrics: Arc<Metrics>) -> Result<Self> {
        db.ping().await.map_err(Error::Connection)?;
        info!("database connection established");
        Ok(Self {
            db,
            dsn: dsn.to_string(),
            closed: AtomicBool::new(false),
            metrics,
        })
    }

    /// Apply pending migrations from `path`. Succeeds when none are pending.
    pub async fn migrate(&self, path: &str, migrator: &impl Migrator) -> Result<()> {
        let target = MigrationTarget::resolve(path, &self.dsn)?;
        info!(source = %target.source_url(), "applying migrations");

        migrator.up(&target.source, &target.database_url).await?;

        info!("migrations up to date");
        Ok(())
    }

    /// Insert one rate row, giving up at `deadline`.
    ///
    /// Latency is recorded for every attempt, including one cut off by the
    /// deadline; `db_saves_total` only counts successful inserts.
    pub async fn save_rate(&self, rate: &Rate, deadline: Instant) -> Result<()> {
        let start = Instant::now();
        let span = info_span!(
            "save_rate",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = INSERT_RATE,
            ask = Empty,
            bid = Empty,
            timestamp = Empty,
            otel.status_code = Empty,
            error = Empty,
        );

        let result = async {
            if self.closed.load(Relaxed) {
                return Err(Error::Persist(sqlx::Error::PoolClosed));
            }
            match timeout_at(deadline, self.db.execute(INSERT_RATE, rate)).await {
                Ok(done) => done.map_err(Error::Persist),
                Err(_) => Err(Error::DeadlineExceeded(deadline.saturating_duration_since(start))),
            }
        }
        .instrument(span.clone())
        .await;

        self.metrics.db_save_latency.record(start.elapsed());

        match result {
            Ok(_) => {
                span.record("ask", rate.ask);
                span.record("bid", rate.bid);
                span.record("timestamp", rate.timestamp().as_str());
                self.metrics.db_saves.fetch_add(1, Relaxed);
                Ok(())
            }
            Err(e) => {
                span.record("otel.status_code", "ERROR");
                span.record("error", display(&e));
                self.metrics.db_save_failures.fetch_add(1, Relaxed);
                Err(e)
            }
        }
    }

    /// Release the connection. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Relaxed) {
            return Ok(());
        }
        self.db.close().await.map_err(Error::Close)?;
        info!("database connection closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Relaxed)
    }
}

impl<D> Drop for RateRepository<D> {
    fn drop(&mut self) {
        if !*self.closed.get_mut() {
            warn!("rate repository dropped without close");
        }
    }
}
