//! Record shapes written to disk.

use bookrec_core::{PriceLevel, Snapshot};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Summary of one snapshot: the fixed CSV columns and the head of a
/// JSON Lines record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub exchange: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub mid: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub bid_depth: usize,
    pub ask_depth: usize,
    pub crossed: bool,
}

impl SnapshotRecord {
    pub fn from_snapshot(s: &Snapshot) -> Self {
        Self {
            timestamp: s.timestamp,
            symbol: s.symbol.clone(),
            exchange: s.exchange.clone(),
            best_bid: s.best_bid().map(|p| p.inner()),
            best_ask: s.best_ask().map(|p| p.inner()),
            mid: s.mid().map(|p| p.inner()),
            spread: s.spread().map(|p| p.inner()),
            bid_depth: s.bid_depth(),
            ask_depth: s.ask_depth(),
            crossed: s.is_crossed(),
        }
    }
}

/// One JSON Lines record: summary plus full levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonlRecord {
    #[serde(flatten)]
    pub summary: SnapshotRecord,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl JsonlRecord {
    pub fn from_snapshot(s: &Snapshot) -> Self {
        Self {
            summary: SnapshotRecord::from_snapshot(s),
            bids: s.bids.clone(),
            asks: s.asks.clone(),
        }
    }

    /// Rebuild the snapshot this record was written from.
    pub fn into_snapshot(self) -> Snapshot {
        Snapshot::new(
            self.summary.symbol,
            self.summary.exchange,
            self.summary.timestamp,
            self.bids,
            self.asks,
        )
    }
}

/// One Parquet row. Prices and sizes are stored as `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnarRecord {
    pub timestamp_ms: i64,
    pub symbol: String,
    pub exchange: String,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub mid: Option<f64>,
    pub spread: Option<f64>,
    pub bid_depth: u32,
    pub ask_depth: u32,
    pub crossed: bool,
    pub bid_prices: Vec<f64>,
    pub bid_sizes: Vec<f64>,
    pub ask_prices: Vec<f64>,
    pub ask_sizes: Vec<f64>,
}

impl ColumnarRecord {
    pub fn from_snapshot(s: &Snapshot) -> Self {
        Self {
            timestamp_ms: s.timestamp_ms(),
            symbol: s.symbol.clone(),
            exchange: s.exchange.clone(),
            best_bid: s.best_bid().map(|p| p.to_f64()),
            best_ask: s.best_ask().map(|p| p.to_f64()),
            mid: s.mid().map(|p| p.to_f64()),
            spread: s.spread().map(|p| p.to_f64()),
            bid_depth: s.bid_depth() as u32,
            ask_depth: s.ask_depth() as u32,
            crossed: s.is_crossed(),
            bid_prices: s.bids.iter().map(|l| l.price.to_f64()).collect(),
            bid_sizes: s.bids.iter().map(|l| l.size.to_f64()).collect(),
            ask_prices: s.asks.iter().map(|l| l.price.to_f64()).collect(),
            ask_sizes: s.asks.iter().map(|l| l.size.to_f64()).collect(),
        }
    }
}
