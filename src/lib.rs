//! USDT rate ingestion service.
//!
//! Fetches the exchange depth snapshot on demand, extracts the best ask and
//! bid, persists them to Postgres and returns them over gRPC.

pub mod codec;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod repository;
pub mod server;
pub mod service;
pub mod source;
pub mod telemetry;
#[cfg(test)]
pub(crate) mod testutil;
pub mod types;
