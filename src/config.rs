//! CLI configuration via clap. Every option can also be set from the environment.

use std::time::Duration;

use clap::Parser;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "usdt-rates")]
#[command(about = "Fetches the best USDT bid/ask from the exchange, stores it in Postgres and serves it via gRPC")]
pub struct Config {
    /// Deployment environment label, only used in logs
    #[arg(long, env = "ENV", default_value = "local")]
    pub env: String,

    /// Database user
    #[arg(long, env = "DB_USER")]
    pub db_user: String,

    /// Database password
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: String,

    /// Database host
    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    /// Database port
    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    /// Database name
    #[arg(long, env = "DB_NAME")]
    pub db_name: String,

    /// Connection pool size
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// Directory holding the SQL migrations
    #[arg(long, env = "MIGRATIONS_PATH", default_value = "migrations")]
    pub migrations_path: String,

    /// gRPC server port
    #[arg(long, env = "GRPC_PORT", default_value_t = 50051)]
    pub grpc_port: u16,

    /// Prometheus metrics / HTTP health port
    #[arg(long, env = "METRICS_PORT", default_value_t = 2112)]
    pub metrics_port: u16,

    /// Depth endpoint to read quotes from (e.g. https://api.binance.com/api/v3/depth?symbol=USDTTRY&limit=5)
    #[arg(long, env = "BINANCE_API_URL")]
    pub binance_api_url: String,

    /// Deadline for one fetch + persist cycle, in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 5000)]
    pub request_timeout_ms: u64,

    /// Grace period for in-flight calls on shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    /// Postgres connection string. User and password are percent-encoded.
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            urlencoding::encode(&self.db_user),
            urlencoding::encode(&self.db_password),
            self.db_host,
            self.db_port,
            self.db_name,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Log the effective configuration. The password is never logged.
    pub fn log(&self) {
        info!(
            env = %self.env,
            db_host = %self.db_host,
            db_port = self.db_port,
            db_name = %self.db_name,
            migrations_path = %self.migrations_path,
            grpc_port = self.grpc_port,
            metrics_port = self.metrics_port,
            binance_url = %self.binance_api_url,
            "loaded configuration"
        );
    }
}
