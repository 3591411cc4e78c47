//! Instrument metadata sources.

use crate::error::RegistryResult;
use bookrec_core::Instrument;
use bookrec_ws::BoxFuture;

/// Where the catalog gets its instruments from.
pub trait MetadataSource: Send + Sync {
    /// Exchange id the instruments belong to.
    fn exchange_id(&self) -> &str;

    /// Fetch every currently tradable future and option.
    fn fetch_instruments(&self) -> BoxFuture<'_, RegistryResult<Vec<Instrument>>>;
}

/// Fixed instrument list.
#[derive(Debug, Clone)]
pub struct StaticSource {
    exchange_id: String,
    instruments: Vec<Instrument>,
}

impl StaticSource {
    pub fn new(exchange_id: impl Into<String>, instruments: Vec<Instrument>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            instruments,
        }
    }
}

impl MetadataSource for StaticSource {
    fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    fn fetch_instruments(&self) -> BoxFuture<'_, RegistryResult<Vec<Instrument>>> {
        let instruments = self.instruments.clone();
        Box::pin(async move { Ok(instruments) })
    }
}
