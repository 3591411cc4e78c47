//! Core domain types for the bookrec order-book recorder.
//!
//! This crate provides fundamental types used throughout the system:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Instrument`: Exchange instrument metadata (futures and options)
//! - `PriceLevel`, `Snapshot`: Leveled order-book state for one instrument
//! - `BookState`: Classification of a snapshot's top of book

pub mod decimal;
pub mod error;
pub mod instrument;
pub mod snapshot;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use instrument::{ExpiryMonth, Instrument, InstrumentKind, OptionRight};
pub use snapshot::{BookState, PriceLevel, Snapshot};
