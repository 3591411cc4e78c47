//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Instrument metadata could not be loaded.
    #[error("Instrument catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Instrument parse error: {0}")]
    ParseError(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Exchange API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
