//! Process lifecycle: ordered startup and signal-driven shutdown.
//!
//! Startup is fail-fast:
//! tracing → repository open → migrations → service → gRPC listener →
//! health self-probe → metrics listener (best-effort).
//!
//! Shutdown starts on SIGINT/SIGTERM: the gRPC server stops accepting work and
//! its task is raced against the grace period, then the repository is
//! released.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::{self, Metrics};
use crate::repository::{RateRepository, SqlxMigrator};
use crate::server::{self, proto::health};
use crate::service::RateIngestionService;
use crate::source::HttpQuoteSource;
use crate::telemetry;

const PROBE_ATTEMPTS: u32 = 20;
const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// How the transport finished during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// All in-flight calls completed within the grace period.
    Drained,
    /// The grace period expired and the transport task was aborted.
    TimedOut,
}

/// Run the service until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    telemetry::init(config.log_json)?;
    config.log();

    let metrics = Arc::new(Metrics::default());

    let repository = Arc::new(
        RateRepository::connect(&config.dsn(), config.db_max_connections, metrics.clone()).await?,
    );
    repository.migrate(&config.migrations_path, &SqlxMigrator).await?;

    let shutdown = CancellationToken::new();
    let source = HttpQuoteSource::new(
        config.binance_api_url.clone(),
        config.request_timeout(),
        metrics.clone(),
    )?;
    let service = RateIngestionService::new(
        source,
        repository.clone(),
        metrics.clone(),
        config.request_timeout(),
        shutdown.clone(),
    );

    // Bind eagerly so a taken port fails startup before the server task exists.
    let listener = TcpListener::bind(("0.0.0.0", config.grpc_port)).await?;
    let port = listener.local_addr()?.port();
    info!(port, env = %config.env, "starting gRPC server");
    let server = tokio::spawn(server::serve(listener, service, shutdown.clone()));

    probe_health(port).await?;

    let http = {
        let metrics = metrics.clone();
        let cancel = shutdown.clone();
        tokio::spawn(metrics::serve_http(config.metrics_port, metrics, cancel))
    };

    wait_for_signal().await?;
    info!("received shutdown signal, draining");
    shutdown.cancel();

    let drain = drain(server, config.shutdown_grace()).await;
    join_metrics(http).await;

    if let Err(e) = repository.close().await {
        error!(error = %e, "error closing repository");
    }
    info!(?drain, "shutdown complete");
    Ok(())
}

/// Dial the local gRPC listener and require a `SERVING` health check.
///
/// Dialing is retried briefly since the server task may not be polled yet.
pub async fn probe_health(port: u16) -> Result<()> {
    let url = format!("http://127.0.0.1:{port}");

    let mut attempts = 0;
    let mut client = loop {
        match health::health_client::HealthClient::connect(url.clone()).await {
            Ok(client) => break client,
            Err(_) if attempts < PROBE_ATTEMPTS => {
                attempts += 1;
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
            Err(e) => return Err(Error::HealthCheck(e.to_string())),
        }
    };

    let response = client
        .check(health::HealthCheckRequest::default())
        .await
        .map_err(|status| Error::HealthCheck(status.to_string()))?
        .into_inner();

    if response.status() != health::health_check_response::ServingStatus::Serving {
        return Err(Error::HealthCheck(format!(
            "server is not serving: {:?}",
            response.status()
        )));
    }

    info!("healthcheck passed");
    Ok(())
}

/// Wait for the server task to finish, for at most `grace`.
///
/// The server task resolving is the only completion signal; it is raced
/// against a single deadline. On expiry the task is aborted, which drops any
/// calls still in flight.
pub async fn drain(mut server: JoinHandle<Result<()>>, grace: Duration) -> Drain {
    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(Ok(()))) => {
            info!("server stopped gracefully");
            Drain::Drained
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server exited with error");
            Drain::Drained
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task failed");
            Drain::Drained
        }
        Err(_) => {
            warn!(grace_secs = grace.as_secs_f64(), "shutdown timed out, forcing exit");
            server.abort();
            Drain::TimedOut
        }
    }
}

/// Wait for the metrics listener task. Returns `false` if it panicked or was cancelled.
async fn join_metrics(http: JoinHandle<()>) -> bool {
    match http.await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "metrics task failed");
            false
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
pub async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}
