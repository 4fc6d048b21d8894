//! Core domain types for quotes and order book snapshots.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

/// Side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ask,
    Bid,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Ask => "ask",
            Side::Bid => "bid",
        })
    }
}

/// A single parsed price level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub price: f64,
    pub volume: f64,
}

/// Depth snapshot as returned by the upstream endpoint.
///
/// Entries stay as raw strings until extraction so that a malformed entry can be
/// reported with the side and field that failed.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookSnapshot {
    #[serde(rename = "lastUpdateId", default)]
    pub sequence_id: i64,
    /// Asks as published, best first.
    pub asks: Vec<Vec<String>>,
    /// Bids as published, best first.
    pub bids: Vec<Vec<String>>,
}

/// One persisted quote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub ask: f64,
    pub bid: f64,
    pub ask_amount: f64,
    pub bid_amount: f64,
    pub observed_at: DateTime<Utc>,
}

impl Rate {
    /// Builds a rate from the best levels of each side.
    ///
    /// `ask_amount` carries the best bid's volume and `bid_amount` the best
    /// ask's volume. Downstream consumers of the `rates` table read the amounts
    /// with this mapping.
    pub fn from_best(best_ask: Level, best_bid: Level, observed_at: DateTime<Utc>) -> Self {
        Self {
            ask: best_ask.price,
            bid: best_bid.price,
            ask_amount: best_bid.volume,
            bid_amount: best_ask.volume,
            observed_at,
        }
    }

    /// RFC 3339 timestamp in UTC with second precision.
    pub fn timestamp(&self) -> String {
        self.observed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
