use async_trait::async_trait;
use thiserror::Error;

use guardquote_core::audit::AuditEvent;
use guardquote_core::cpq::catalog::{RateCatalog, RATE_CATALOG_SETTINGS_KEY};
use guardquote_core::domain::quote::{NewQuote, Quote, QuoteId, QuoteStatus};
use guardquote_core::errors::ApplicationError;

pub mod audit;
pub mod memory;
pub mod quote;
pub mod settings;

pub use audit::SqlAuditRepository;
pub use memory::{InMemoryAuditRepository, InMemoryQuoteRepository, InMemorySettingsRepository};
pub use quote::SqlQuoteRepository;
pub use settings::SqlSettingsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => Self::Conflict(message),
            RepositoryError::NotFound(id) => Self::QuoteNotFound(id),
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
    /// Stores a new quote under a fresh id. A taken quote number is a `Conflict`.
    async fn insert(&self, quote: NewQuote) -> Result<Quote, RepositoryError>;
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError>;
    /// Newest first. Quotes created in the same instant fall back to their numeric sequence.
    async fn list(&self) -> Result<Vec<Quote>, RepositoryError>;
    /// Writes `quote` only while the stored row is still in `expected` status. A row that moved
    /// on since it was read is a `Conflict`; a missing row is `NotFound`.
    async fn update(&self, quote: &Quote, expected: QuoteStatus) -> Result<(), RepositoryError>;
    /// Hard delete. Returns whether a row was removed.
    async fn delete(&self, id: &QuoteId) -> Result<bool, RepositoryError>;
    /// Atomically reserves the next 1-based sequence for `prefix` within `year`.
    async fn next_sequence(&self, prefix: &str, year: i32) -> Result<u32, RepositoryError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError>;
    async fn upsert(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError>;

    async fn load_rate_catalog(&self) -> Result<Option<RateCatalog>, RepositoryError> {
        match self.get(RATE_CATALOG_SETTINGS_KEY).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|error| RepositoryError::Decode(format!("rate catalog: {error}"))),
            None => Ok(None),
        }
    }

    async fn save_rate_catalog(&self, catalog: &RateCatalog) -> Result<(), RepositoryError> {
        let value = serde_json::to_value(catalog)
            .map_err(|error| RepositoryError::Decode(format!("rate catalog: {error}")))?;
        self.upsert(RATE_CATALOG_SETTINGS_KEY, &value).await
    }
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError>;
    /// Oldest first.
    async fn list_for_quote(&self, quote_id: &QuoteId) -> Result<Vec<AuditEvent>, RepositoryError>;
}
