//! Unified error types for the rate service.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::Side;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("fetch rates failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("upstream returned status: {0}")]
    Response(String),

    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("decode response failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("empty {0} side in order book")]
    EmptyBook(Side),

    #[error("{side} {field} parsing error: {reason}")]
    MalformedOrder {
        side: Side,
        field: OrderField,
        reason: String,
    },

    #[error("save rate failed: {0}")]
    Persist(#[source] sqlx::Error),

    #[error("database close failed: {0}")]
    Close(#[source] sqlx::Error),

    #[error("service is shutting down")]
    ShuttingDown,

    #[error("health check failed: {0}")]
    HealthCheck(String),

    #[error("tracing setup failed: {0}")]
    Tracing(String),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which part of an order entry failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderField {
    /// The entry did not have both a price and a volume.
    Entry,
    Price,
    Volume,
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderField::Entry => "entry",
            OrderField::Price => "price",
            OrderField::Volume => "volume",
        })
    }
}

/// Step of the ingestion pipeline that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Admission,
    Fetch,
    Decode,
    Validate,
    Persist,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Admission,
        Stage::Fetch,
        Stage::Decode,
        Stage::Validate,
        Stage::Persist,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Admission => "admission",
            Stage::Fetch => "fetch",
            Stage::Decode => "decode",
            Stage::Validate => "validate",
            Stage::Persist => "persist",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-request failure tagged with the stage that produced it.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(stage: Stage, source: Error) -> Self {
        Self { stage, source }
    }

    /// Returns a closure that tags an error with `stage`, for use with `map_err`.
    pub fn at(stage: Stage) -> impl FnOnce(Error) -> Self {
        move |source| Self::new(stage, source)
    }
}

impl From<PipelineError> for tonic::Status {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err.stage {
            Stage::Admission | Stage::Fetch => tonic::Status::unavailable(message),
            Stage::Decode | Stage::Validate | Stage::Persist => tonic::Status::internal(message),
        }
    }
}
