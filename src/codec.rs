//! Depth response codec.
//!
//! [`decode`] turns the raw upstream body into an [`OrderBookSnapshot`];
//! [`extract_best`] pulls the first entry of each side. The feed is published
//! best-first, so nothing is re-sorted here.

use crate::error::{Error, OrderField, Result};
use crate::types::{Level, OrderBookSnapshot, Side};

/// Decode a depth response body.
///
/// Unknown fields are ignored; `asks` and `bids` are required.
pub fn decode(raw: &[u8]) -> Result<OrderBookSnapshot> {
    Ok(serde_json::from_slice(raw)?)
}

/// Best ask and best bid of a snapshot, in that order.
pub fn extract_best(snapshot: &OrderBookSnapshot) -> Result<(Level, Level)> {
    let ask = snapshot.asks.first().ok_or(Error::EmptyBook(Side::Ask))?;
    let bid = snapshot.bids.first().ok_or(Error::EmptyBook(Side::Bid))?;

    Ok((parse_entry(Side::Ask, ask)?, parse_entry(Side::Bid, bid)?))
}

/// Parse a `[price, volume]` entry. Extra trailing elements are ignored.
pub fn parse_entry(side: Side, entry: &[String]) -> Result<Level> {
    let [price, volume, ..] = entry else {
        return Err(Error::MalformedOrder {
            side,
            field: OrderField::Entry,
            reason: format!("expected [price, volume], got {} element(s)", entry.len()),
        });
    };

    Ok(Level {
        price: parse_number(side, OrderField::Price, price)?,
        volume: parse_number(side, OrderField::Volume, volume)?,
    })
}

fn parse_number(side: Side, field: OrderField, raw: &str) -> Result<f64> {
    let malformed = |reason: String| Error::MalformedOrder { side, field, reason };

    let value: f64 = raw
        .parse()
        .map_err(|e| malformed(format!("{e} ({raw:?})")))?;
    if !value.is_finite() {
        return Err(malformed(format!("non-finite value ({raw:?})")));
    }
    Ok(value)
}
