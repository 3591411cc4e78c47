//! Instrument identification and metadata.
//!
//! An `Instrument` is discovered once from the exchange's metadata
//! endpoint and is read-only afterwards.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Derivative type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    /// Dated future or perpetual swap.
    Future,
    /// Call or put option.
    Option,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Future => "future",
            Self::Option => "option",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    /// Parse the exchange's option type field ("call"/"put", "C"/"P").
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "call" | "c" => Some(Self::Call),
            "put" | "p" => Some(Self::Put),
            _ => None,
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Put => write!(f, "put"),
        }
    }
}

/// Calendar month of an expiry, used for catalog filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpiryMonth {
    pub year: i32,
    pub month: u32,
}

impl ExpiryMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for ExpiryMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Exchange-traded derivative instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Exchange symbol (e.g., "BTC-PERPETUAL", "BTC-27DEC24-50000-C").
    pub symbol: String,
    /// Exchange id (e.g., "deribit").
    pub exchange: String,
    pub kind: InstrumentKind,
    /// Underlying/base currency (e.g., "BTC").
    pub underlying_currency: String,
    /// Expiry date. `None` for perpetuals.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    /// Strike price (options only).
    #[serde(default)]
    pub strike: Option<Decimal>,
    /// Call/put (options only).
    #[serde(default)]
    pub option_right: Option<OptionRight>,
}

impl Instrument {
    /// Create a future (dated or perpetual).
    pub fn future(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        underlying_currency: impl Into<String>,
        expiry: Option<NaiveDate>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            kind: InstrumentKind::Future,
            underlying_currency: underlying_currency.into(),
            expiry,
            strike: None,
            option_right: None,
        }
    }

    /// Create an option.
    pub fn option(
        symbol: impl Into<String>,
        exchange: impl Into<String>,
        underlying_currency: impl Into<String>,
        expiry: NaiveDate,
        strike: Decimal,
        right: OptionRight,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            kind: InstrumentKind::Option,
            underlying_currency: underlying_currency.into(),
            expiry: Some(expiry),
            strike: Some(strike),
            option_right: Some(right),
        }
    }

    pub fn is_perpetual(&self) -> bool {
        self.kind == InstrumentKind::Future && self.expiry.is_none()
    }

    pub fn expiry_month(&self) -> Option<ExpiryMonth> {
        self.expiry.map(ExpiryMonth::of)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_perpetual_has_no_expiry_month() {
        let perp = Instrument::future("BTC-PERPETUAL", "deribit", "BTC", None);
        assert!(perp.is_perpetual());
        assert!(perp.expiry_month().is_none());
    }

    #[test]
    fn test_option_expiry_month() {
        let expiry = NaiveDate::from_ymd_opt(2024, 12, 27).unwrap();
        let opt = Instrument::option(
            "BTC-27DEC24-50000-C",
            "deribit",
            "BTC",
            expiry,
            dec!(50000),
            OptionRight::Call,
        );
        assert!(!opt.is_perpetual());
        assert_eq!(opt.expiry_month(), Some(ExpiryMonth::new(2024, 12)));
        assert_eq!(opt.expiry_month().unwrap().to_string(), "2024-12");
    }

    #[test]
    fn test_option_right_parse() {
        assert_eq!(OptionRight::parse("call"), Some(OptionRight::Call));
        assert_eq!(OptionRight::parse("P"), Some(OptionRight::Put));
        assert_eq!(OptionRight::parse("straddle"), None);
    }
}
