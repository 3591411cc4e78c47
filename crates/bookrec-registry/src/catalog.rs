//! Filterable instrument catalog.
//!
//! The catalog loads from its [`MetadataSource`] on first use and keeps
//! the result for its whole lifetime. A failed first load leaves the
//! catalog empty so the next call tries again.

use crate::error::{RegistryError, RegistryResult};
use crate::source::MetadataSource;
use bookrec_core::{ExpiryMonth, Instrument, InstrumentKind, OptionRight};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Criteria for selecting instruments. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentFilter {
    /// Underlying currency, compared case-insensitively.
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub kind: Option<InstrumentKind>,
    #[serde(default)]
    pub expiry_month: Option<ExpiryMonth>,
    /// Exact expiry date.
    #[serde(default)]
    pub expiry: Option<NaiveDate>,
    #[serde(default)]
    pub option_right: Option<OptionRight>,
}

impl InstrumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn expiry_month(mut self, month: ExpiryMonth) -> Self {
        self.expiry_month = Some(month);
        self
    }

    pub fn expiry(mut self, date: NaiveDate) -> Self {
        self.expiry = Some(date);
        self
    }

    pub fn option_right(mut self, right: OptionRight) -> Self {
        self.option_right = Some(right);
        self
    }

    pub fn matches(&self, inst: &Instrument) -> bool {
        if let Some(ccy) = &self.currency {
            if !inst.underlying_currency.eq_ignore_ascii_case(ccy) {
                return false;
            }
        }
        if self.kind.is_some_and(|k| k != inst.kind) {
            return false;
        }
        if self.expiry_month.is_some() && self.expiry_month != inst.expiry_month() {
            return false;
        }
        if self.expiry.is_some() && self.expiry != inst.expiry {
            return false;
        }
        if self.option_right.is_some() && self.option_right != inst.option_right {
            return false;
        }
        true
    }
}

/// Lazily loaded, read-only instrument catalog for one exchange.
pub struct InstrumentCatalog {
    source: Arc<dyn MetadataSource>,
    instruments: OnceCell<BTreeMap<String, Instrument>>,
}

impl InstrumentCatalog {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            instruments: OnceCell::new(),
        }
    }

    pub fn exchange_id(&self) -> &str {
        self.source.exchange_id()
    }

    /// Load the catalog if it has not been loaded yet.
    pub async fn load(&self) -> RegistryResult<()> {
        self.loaded().await.map(|_| ())
    }

    pub fn is_loaded(&self) -> bool {
        self.instruments.initialized()
    }

    async fn loaded(&self) -> RegistryResult<&BTreeMap<String, Instrument>> {
        self.instruments
            .get_or_try_init(|| async {
                let instruments = self.source.fetch_instruments().await.map_err(|e| {
                    warn!(exchange = %self.exchange_id(), error = %e, "Instrument load failed");
                    RegistryError::CatalogUnavailable(e.to_string())
                })?;
                let map: BTreeMap<String, Instrument> = instruments
                    .into_iter()
                    .map(|i| (i.symbol.clone(), i))
                    .collect();
                info!(exchange = %self.exchange_id(), count = map.len(), "Instrument catalog loaded");
                Ok(map)
            })
            .await
    }

    /// Instruments matching `filter`, sorted by symbol.
    pub async fn list(&self, filter: &InstrumentFilter) -> RegistryResult<Vec<Instrument>> {
        Ok(self
            .loaded()
            .await?
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    /// Symbols matching `filter`, sorted.
    pub async fn symbols(&self, filter: &InstrumentFilter) -> RegistryResult<Vec<String>> {
        Ok(self
            .loaded()
            .await?
            .values()
            .filter(|i| filter.matches(i))
            .map(|i| i.symbol.clone())
            .collect())
    }

    pub async fn get(&self, symbol: &str) -> RegistryResult<Option<Instrument>> {
        Ok(self.loaded().await?.get(symbol).cloned())
    }

    /// Number of instruments; 0 before the first successful load.
    pub fn len(&self) -> usize {
        self.instruments.get().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
