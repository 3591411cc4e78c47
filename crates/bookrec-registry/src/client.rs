//! HTTP client for fetching exchange instrument metadata.
//!
//! Queries `public/get_instruments` once per derivative kind and maps the
//! raw entries into [`Instrument`]s.

use crate::error::{RegistryError, RegistryResult};
use crate::source::MetadataSource;
use bookrec_core::{Instrument, OptionRight};
use bookrec_ws::BoxFuture;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Kinds requested from the exchange.
const KINDS: [&str; 2] = ["future", "option"];

/// JSON-RPC envelope returned by the REST API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    result: Option<Vec<RawInstrument>>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    message: String,
}

/// Raw instrument entry from `public/get_instruments`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawInstrument {
    pub instrument_name: String,
    pub kind: String,
    pub base_currency: String,
    /// Unix milliseconds.
    #[serde(default)]
    pub expiration_timestamp: Option<i64>,
    /// "perpetual" for perpetual swaps.
    #[serde(default)]
    pub settlement_period: Option<String>,
    #[serde(default)]
    pub strike: Option<Decimal>,
    #[serde(default)]
    pub option_type: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Client for the exchange's instrument metadata endpoint.
pub struct DeribitMetaClient {
    client: Client,
    /// REST base URL (e.g., "https://www.deribit.com/api/v2").
    base_url: String,
    exchange_id: String,
}

impl DeribitMetaClient {
    /// Create a new metadata client.
    pub fn new(base_url: impl Into<String>, exchange_id: impl Into<String>) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RegistryError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            exchange_id: exchange_id.into(),
        })
    }

    /// Fetch active, non-expired instruments of one kind.
    pub async fn fetch_kind(&self, kind: &str) -> RegistryResult<Vec<RawInstrument>> {
        let url = format!("{}/public/get_instruments", self.base_url);
        debug!(%url, kind, "Fetching instruments");

        let response = self
            .client
            .get(&url)
            .query(&[("currency", "any"), ("kind", kind), ("expired", "false")])
            .send()
            .await
            .map_err(|e| RegistryError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::HttpClient(format!("HTTP {status}: {body}")));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse response: {e}")))?;

        if let Some(err) = body.error {
            return Err(RegistryError::Api {
                code: err.code,
                message: err.message,
            });
        }
        Ok(body.result.unwrap_or_default())
    }

    async fn fetch_all(&self) -> RegistryResult<Vec<Instrument>> {
        let mut instruments = Vec::new();
        for kind in KINDS {
            let raw = self.fetch_kind(kind).await?;
            let total = raw.len();
            instruments.extend(
                raw.iter()
                    .filter(|r| r.is_active)
                    .filter_map(|r| to_instrument(r, &self.exchange_id)),
            );
            debug!(kind, total, "Fetched instrument kind");
        }
        info!(
            exchange = %self.exchange_id,
            count = instruments.len(),
            "Fetched instrument metadata"
        );
        Ok(instruments)
    }
}

impl MetadataSource for DeribitMetaClient {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn fetch_instruments(&self) -> BoxFuture<'_, RegistryResult<Vec<Instrument>>> {
        Box::pin(self.fetch_all())
    }
}

/// Map a raw entry to an [`Instrument`]. Unknown kinds and incomplete
/// options are skipped.
pub fn to_instrument(raw: &RawInstrument, exchange_id: &str) -> Option<Instrument> {
    let expiry = if raw.settlement_period.as_deref() == Some("perpetual") {
        None
    } else {
        raw.expiration_timestamp.and_then(date_from_millis)
    };

    match raw.kind.as_str() {
        "future" => Some(Instrument::future(
            &raw.instrument_name,
            exchange_id,
            &raw.base_currency,
            expiry,
        )),
        "option" => {
            let right = raw.option_type.as_deref().and_then(OptionRight::parse);
            match (expiry, raw.strike, right) {
                (Some(expiry), Some(strike), Some(right)) => Some(Instrument::option(
                    &raw.instrument_name,
                    exchange_id,
                    &raw.base_currency,
                    expiry,
                    strike,
                    right,
                )),
                _ => {
                    warn!(symbol = %raw.instrument_name, "Skipping option with incomplete metadata");
                    None
                }
            }
        }
        other => {
            debug!(symbol = %raw.instrument_name, kind = other, "Skipping unsupported kind");
            None
        }
    }
}

fn date_from_millis(ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}
