//! Leveled order-book snapshots.
//!
//! A `Snapshot` is the full top-N state of one instrument's book at a
//! point in time. Every feed message replaces the previous snapshot
//! wholesale; snapshots are never mutated after construction.
//!
//! A crossed book (best bid above best ask) is kept as-is and reported
//! through [`BookState::Crossed`].

use crate::{Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-of-book classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookState {
    /// Both sides present, best bid below best ask.
    Normal,
    /// Both sides present, best bid equal to best ask.
    Locked,
    /// Both sides present, best bid above best ask.
    Crossed,
    /// Exactly one side present.
    OneSided,
    /// No levels on either side.
    Empty,
}

impl BookState {
    pub fn is_crossed(&self) -> bool {
        matches!(self, Self::Crossed)
    }
}

impl std::fmt::Display for BookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Locked => write!(f, "LOCKED"),
            Self::Crossed => write!(f, "CROSSED"),
            Self::OneSided => write!(f, "ONE_SIDED"),
            Self::Empty => write!(f, "EMPTY"),
        }
    }
}

/// One price level of a leveled book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Size,
}

impl PriceLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

/// Point-in-time leveled order book for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub symbol: String,
    pub exchange: String,
    /// Exchange timestamp of the book.
    pub timestamp: DateTime<Utc>,
    /// Bid levels, best (highest) first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best (lowest) first.
    pub asks: Vec<PriceLevel>,
}

impl Snapshot {
    pub fn new(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        timestamp: DateTime<Utc>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            timestamp,
            bids,
            asks,
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.first().map(|l| l.price)
    }

    /// Mid price: (best_bid + best_ask) / 2. Computed for crossed books too.
    pub fn mid(&self) -> Option<Price> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(Price::new((bid.inner() + ask.inner()) / Decimal::TWO))
    }

    /// Spread: best_ask - best_bid. Negative when the book is crossed.
    pub fn spread(&self) -> Option<Price> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Spread in basis points relative to mid.
    pub fn spread_bps(&self) -> Option<Decimal> {
        let mid = self.mid()?;
        if mid.is_zero() {
            return None;
        }
        Some(self.spread()?.inner() / mid.inner() * Decimal::from(10000))
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn book_state(&self) -> BookState {
        match (self.best_bid(), self.best_ask()) {
            (None, None) => BookState::Empty,
            (Some(_), None) | (None, Some(_)) => BookState::OneSided,
            (Some(bid), Some(ask)) => match bid.cmp(&ask) {
                std::cmp::Ordering::Less => BookState::Normal,
                std::cmp::Ordering::Equal => BookState::Locked,
                std::cmp::Ordering::Greater => BookState::Crossed,
            },
        }
    }

    pub fn is_crossed(&self) -> bool {
        self.book_state().is_crossed()
    }

    /// Exchange timestamp in Unix milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}
