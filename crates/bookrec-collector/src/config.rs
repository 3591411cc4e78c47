//! Application configuration.

use crate::error::{CollectorError, CollectorResult};
use bookrec_core::{ExpiryMonth, InstrumentKind, OptionRight};
use bookrec_feed::{HistoryConfig, WorkerConfig};
use bookrec_persistence::{OutputFormat, RecorderConfig};
use bookrec_registry::InstrumentFilter;
use bookrec_ws::{BackoffConfig, BackoffKind, ConnectionConfig};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

fn default_exchange_id() -> String {
    "deribit".to_string()
}

fn default_ws_url() -> String {
    "wss://www.deribit.com/ws/api/v2".to_string()
}

fn default_metadata_url() -> String {
    "https://www.deribit.com/api/v2".to_string()
}

fn default_depth() -> u32 {
    20
}

fn default_channel_template() -> String {
    "book.{instrument}.none.{depth}.100ms".to_string()
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_max_snapshots_per_symbol() -> usize {
    1_000
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Jsonl]
}

fn default_parquet_batch_size() -> usize {
    1_000
}

fn default_channel_capacity() -> usize {
    4_096
}

/// Snapshot recording settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Files go under `<root_dir>/<exchange_id>/<format>/`.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,
    #[serde(default = "default_parquet_batch_size")]
    pub parquet_batch_size: usize,
    /// Per-level CSV column groups. 0 = summary columns only.
    #[serde(default)]
    pub csv_depth_levels: usize,
    /// Recorder queue length; workers wait when it is full.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Delete files older than this many days at start. 0 keeps everything.
    #[serde(default)]
    pub retention_days: u64,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            root_dir: default_root_dir(),
            formats: default_formats(),
            parquet_batch_size: default_parquet_batch_size(),
            csv_depth_levels: 0,
            channel_capacity: default_channel_capacity(),
            retention_days: 0,
        }
    }
}

impl PersistenceSettings {
    pub fn recorder_config(&self, exchange_id: &str) -> RecorderConfig {
        RecorderConfig {
            root_dir: self.root_dir.join(exchange_id),
            formats: self.formats.clone(),
            parquet_batch_size: self.parquet_batch_size,
            csv_depth_levels: self.csv_depth_levels,
        }
    }

    pub fn retention(&self) -> Option<Duration> {
        (self.retention_days > 0).then(|| Duration::from_secs(self.retention_days * 86_400))
    }
}

/// Configuration of one exchange collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_exchange_id")]
    pub exchange_id: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// REST base URL for instrument metadata.
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    /// Levels per side requested for each book.
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default = "default_channel_template")]
    pub channel_template: String,
    /// Exchange heartbeat interval. Unset = no heartbeats.
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,

    // --- Reconnect policy ---
    #[serde(default)]
    pub backoff: BackoffKind,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Consecutive failures before a worker gives up. 0 = never.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Silence longer than this counts as a lost connection. 0 disables.
    #[serde(default)]
    pub stale_timeout_ms: u64,

    // --- Store ---
    #[serde(default = "default_true")]
    pub store_snapshots: bool,
    #[serde(default = "default_max_snapshots_per_symbol")]
    pub max_snapshots_per_symbol: usize,
    /// Concurrently connected workers. 0 = no cap.
    #[serde(default)]
    pub max_concurrent_workers: usize,

    #[serde(default)]
    pub persistence: PersistenceSettings,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            exchange_id: default_exchange_id(),
            ws_url: default_ws_url(),
            metadata_url: default_metadata_url(),
            depth: default_depth(),
            channel_template: default_channel_template(),
            heartbeat_interval_secs: None,
            backoff: BackoffKind::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
            stale_timeout_ms: 0,
            store_snapshots: true,
            max_snapshots_per_symbol: default_max_snapshots_per_symbol(),
            max_concurrent_workers: 0,
            persistence: PersistenceSettings::default(),
        }
    }
}

impl CollectorConfig {
    /// Reject settings no collector could run with.
    pub fn validate(&self) -> CollectorResult<()> {
        let fail = |msg: String| Err(CollectorError::Config(format!("{}: {msg}", self.exchange_id)));

        if self.exchange_id.trim().is_empty() {
            return Err(CollectorError::Config("exchange_id must not be empty".to_string()));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return fail(format!("ws_url must be ws:// or wss://, got {}", self.ws_url));
        }
        if !self.channel_template.contains("{instrument}") {
            return fail("channel_template must contain {instrument}".to_string());
        }
        if self.depth == 0 {
            return fail("depth must be positive".to_string());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return fail(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        if self.connect_timeout_ms == 0 {
            return fail("connect_timeout_ms must be positive".to_string());
        }
        if self.persistence.enabled {
            if self.persistence.formats.is_empty() {
                return fail("persistence enabled with no formats".to_string());
            }
            if self.persistence.parquet_batch_size == 0 {
                return fail("parquet_batch_size must be positive".to_string());
            }
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.ws_url.clone(),
            channel_template: self.channel_template.clone(),
            depth: self.depth,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
        }
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            kind: self.backoff,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_ms: self.jitter_ms,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            exchange: self.exchange_id.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            stale_timeout: (self.stale_timeout_ms > 0)
                .then(|| Duration::from_millis(self.stale_timeout_ms)),
            max_reconnect_attempts: self.max_reconnect_attempts,
            backoff: self.backoff_config(),
        }
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig {
            enabled: self.store_snapshots,
            max_per_symbol: self.max_snapshots_per_symbol,
        }
    }
}

/// Instruments to subscribe on one exchange at startup.
///
/// With `symbols`, exactly those symbols of `kind` (default future).
/// Without, every catalog instrument matching the filter fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub exchange: String,
    #[serde(default)]
    pub kind: Option<InstrumentKind>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub option_right: Option<OptionRight>,
    /// Any expiry in this month, `{ year = 2024, month = 12 }`.
    #[serde(default)]
    pub expiry_month: Option<ExpiryMonth>,
    /// Exact expiry date, `"YYYY-MM-DD"`.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
}

impl SubscriptionPlan {
    pub fn filter(&self) -> InstrumentFilter {
        let mut filter = InstrumentFilter::new();
        if let Some(kind) = self.kind {
            filter = filter.kind(kind);
        }
        if let Some(currency) = &self.currency {
            filter = filter.currency(currency.clone());
        }
        if let Some(right) = self.option_right {
            filter = filter.option_right(right);
        }
        if let Some(month) = self.expiry_month {
            filter = filter.expiry_month(month);
        }
        if let Some(expiry) = self.expiry {
            filter = filter.expiry(expiry);
        }
        filter
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchanges: Vec<CollectorConfig>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionPlan>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchanges: vec![CollectorConfig::default()],
            subscriptions: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> CollectorResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CollectorError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> CollectorResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CollectorError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CollectorResult<()> {
        let mut ids = HashSet::new();
        for exchange in &self.exchanges {
            exchange.validate()?;
            if !ids.insert(exchange.exchange_id.as_str()) {
                return Err(CollectorError::Config(format!(
                    "duplicate exchange_id {}",
                    exchange.exchange_id
                )));
            }
        }
        for plan in &self.subscriptions {
            if !ids.contains(plan.exchange.as_str()) {
                return Err(CollectorError::Config(format!(
                    "subscription for unconfigured exchange {}",
                    plan.exchange
                )));
            }
            if let Some(month) = plan.expiry_month {
                if !(1..=12).contains(&month.month) {
                    return Err(CollectorError::Config(format!(
                        "expiry_month {month} is not a calendar month"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookrec_core::Instrument;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.exchanges.len(), 1);
        assert!(config.validate().is_ok());

        let c = &config.exchanges[0];
        assert_eq!(c.exchange_id, "deribit");
        assert!(c.worker_config().stale_timeout.is_none());
        assert!(!c.persistence.enabled);
    }

    #[test]
    fn test_parse_toml() {
        let config = AppConfig::from_toml(
            r#"
            [[exchanges]]
            exchange_id = "deribit"
            ws_url = "wss://test.deribit.com/ws/api/v2"
            backoff = "fixed"
            base_delay_ms = 500
            max_reconnect_attempts = 0
            stale_timeout_ms = 30000
            max_concurrent_workers = 50

            [exchanges.persistence]
            enabled = true
            root_dir = "/var/lib/bookrec"
            formats = ["jsonl", "parquet"]

            [[subscriptions]]
            exchange = "deribit"
            kind = "option"
            currency = "BTC"
            option_right = "call"
            expiry = "2024-12-27"

            [[subscriptions]]
            exchange = "deribit"
            symbols = ["BTC-PERPETUAL"]
            "#,
        )
        .unwrap();

        let c = &config.exchanges[0];
        assert_eq!(c.backoff, BackoffKind::Fixed);
        assert_eq!(c.depth, 20);
        let worker = c.worker_config();
        assert_eq!(worker.stale_timeout, Some(Duration::from_secs(30)));
        assert_eq!(worker.max_reconnect_attempts, 0);
        assert_eq!(worker.backoff.base_delay_ms, 500);

        let rec = c.persistence.recorder_config(&c.exchange_id);
        assert_eq!(rec.root_dir, PathBuf::from("/var/lib/bookrec/deribit"));
        assert_eq!(rec.formats, vec![OutputFormat::Jsonl, OutputFormat::Parquet]);

        let plan = &config.subscriptions[0];
        assert_eq!(plan.option_right, Some(OptionRight::Call));
        assert_eq!(plan.expiry, NaiveDate::from_ymd_opt(2024, 12, 27));
        assert_eq!(config.subscriptions[1].symbols, vec!["BTC-PERPETUAL"]);
    }

    #[test]
    fn test_plan_expiry_month_filters_catalog() {
        let config = AppConfig::from_toml(
            r#"
            [[exchanges]]
            exchange_id = "deribit"

            [[subscriptions]]
            exchange = "deribit"
            kind = "option"
            expiry_month = { year = 2024, month = 12 }
            "#,
        )
        .unwrap();
        let plan = &config.subscriptions[0];
        assert_eq!(plan.expiry_month, Some(ExpiryMonth::new(2024, 12)));
        assert_eq!(plan.expiry, None);

        let option = |symbol: &str, expiry: NaiveDate| {
            Instrument::option(symbol, "deribit", "BTC", expiry, dec!(50000), OptionRight::Call)
        };
        let filter = plan.filter();
        let dec_27 = NaiveDate::from_ymd_opt(2024, 12, 27).unwrap();
        let mar_28 = NaiveDate::from_ymd_opt(2025, 3, 28).unwrap();
        assert!(filter.matches(&option("BTC-27DEC24-50000-C", dec_27)));
        assert!(!filter.matches(&option("BTC-28MAR25-50000-C", mar_28)));
        assert!(!filter.matches(&Instrument::future("BTC-PERPETUAL", "deribit", "BTC", None)));

        let bad = AppConfig::from_toml(
            r#"
            [[exchanges]]
            exchange_id = "deribit"

            [[subscriptions]]
            exchange = "deribit"
            expiry_month = { year = 2024, month = 13 }
            "#,
        );
        assert!(matches!(bad, Err(CollectorError::Config(_))));
    }

    #[test]
    fn test_validation_errors() {
        let bad_url = CollectorConfig {
            ws_url: "https://example.com".to_string(),
            ..Default::default()
        };
        assert!(bad_url.validate().is_err());

        let bad_backoff = CollectorConfig {
            base_delay_ms: 10_000,
            max_delay_ms: 1_000,
            ..Default::default()
        };
        assert!(bad_backoff.validate().is_err());

        let duplicate = AppConfig {
            exchanges: vec![CollectorConfig::default(), CollectorConfig::default()],
            subscriptions: Vec::new(),
        };
        assert!(duplicate.validate().is_err());

        let orphan = AppConfig {
            subscriptions: vec![SubscriptionPlan {
                exchange: "nowhere".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(orphan.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("exchange_id"));
        assert!(toml_str.contains("channel_template"));
    }
}
