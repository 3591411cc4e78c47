//! Book message normalization.
//!
//! Turns a wire-level [`BookData`] into a validated [`Snapshot`] and
//! enforces per-symbol timestamp monotonicity. One normalizer belongs to
//! one worker and lives across its reconnects.

use crate::error::FeedError;
use bookrec_core::{Price, PriceLevel, Size, Snapshot};
use bookrec_ws::BookData;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

/// Why a message was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Undecodable payload, bad level, or wrong instrument.
    Malformed(String),
    /// Timestamp older than the last applied snapshot.
    OutOfOrder { last_ms: i64, got_ms: i64 },
}

impl Rejection {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::OutOfOrder { .. } => "out_of_order",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed message: {msg}"),
            Self::OutOfOrder { last_ms, got_ms } => {
                write!(f, "out-of-order timestamp {got_ms} < {last_ms}")
            }
        }
    }
}

impl From<Rejection> for FeedError {
    fn from(r: Rejection) -> Self {
        FeedError::Protocol(r.to_string())
    }
}

/// Per-symbol book normalizer.
#[derive(Debug)]
pub struct BookNormalizer {
    symbol: String,
    exchange: String,
    last_timestamp: Option<DateTime<Utc>>,
}

impl BookNormalizer {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            last_timestamp: None,
        }
    }

    /// Timestamp of the last accepted snapshot.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Validate `book` and build a snapshot.
    ///
    /// Equal timestamps are accepted; older ones are rejected. The
    /// normalizer only advances on success.
    pub fn normalize(&mut self, book: &BookData) -> Result<Snapshot, Rejection> {
        if book.instrument_name != self.symbol {
            return Err(Rejection::Malformed(format!(
                "instrument {} on feed for {}",
                book.instrument_name, self.symbol
            )));
        }

        let timestamp = DateTime::from_timestamp_millis(book.timestamp).ok_or_else(|| {
            Rejection::Malformed(format!("timestamp {} out of range", book.timestamp))
        })?;

        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Err(Rejection::OutOfOrder {
                    last_ms: last.timestamp_millis(),
                    got_ms: book.timestamp,
                });
            }
        }

        let bids = levels(&book.bids, Side::Bid)?;
        let asks = levels(&book.asks, Side::Ask)?;

        self.last_timestamp = Some(timestamp);
        Ok(Snapshot::new(
            self.symbol.clone(),
            self.exchange.clone(),
            timestamp,
            bids,
            asks,
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Bid,
    Ask,
}

fn levels(raw: &[(Decimal, Decimal)], side: Side) -> Result<Vec<PriceLevel>, Rejection> {
    let mut out: Vec<PriceLevel> = Vec::with_capacity(raw.len());
    for &(px, sz) in raw {
        let price = Price::new(px);
        let size = Size::new(sz);
        if !price.is_positive() {
            return Err(Rejection::Malformed(format!("non-positive price {px}")));
        }
        if size.is_negative() {
            return Err(Rejection::Malformed(format!("negative size {sz}")));
        }
        if let Some(prev) = out.last() {
            let ordered = match side {
                Side::Bid => price < prev.price,
                Side::Ask => price > prev.price,
            };
            if !ordered {
                return Err(Rejection::Malformed(format!(
                    "{side:?} levels not strictly sorted at {px}"
                )));
            }
        }
        out.push(PriceLevel::new(price, size));
    }
    Ok(out)
}
