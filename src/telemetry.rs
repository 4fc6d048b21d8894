//! Log subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{Error, Result};

pub const SERVICE_NAME: &str = "usdt-service";

/// Install the global subscriber. Filter comes from `RUST_LOG`, default `info`.
///
/// Fails if a global subscriber is already set.
pub fn init(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Tracing(e.to_string()))?;

    tracing::info!(service = SERVICE_NAME, json, "tracing initialized");
    Ok(())
}
