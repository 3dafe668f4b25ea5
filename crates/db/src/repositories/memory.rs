use std::collections::HashMap;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use guardquote_core::audit::{AuditEvent, AuditSink, InMemoryAuditSink};
use guardquote_core::domain::quote::{NewQuote, Quote, QuoteId, QuoteStatus};

use super::{AuditRepository, QuoteRepository, RepositoryError, SettingsRepository};

#[derive(Default)]
pub struct InMemoryQuoteRepository {
    quotes: RwLock<HashMap<String, Quote>>,
    sequences: Mutex<HashMap<(String, i32), u32>>,
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn insert(&self, quote: NewQuote) -> Result<Quote, RepositoryError> {
        let mut quotes = self.quotes.write().await;
        if quotes.values().any(|existing| existing.quote_number == quote.quote_number) {
            return Err(RepositoryError::Conflict(format!(
                "quote number `{}` is already taken",
                quote.quote_number
            )));
        }

        let quote = quote.into_quote(QuoteId(Uuid::new_v4().to_string()));
        quotes.insert(quote.id.0.clone(), quote.clone());
        Ok(quote)
    }

    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        let mut listed = quotes.values().cloned().collect::<Vec<_>>();
        listed.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.quote_number.sequence().cmp(&a.quote_number.sequence()))
        });
        Ok(listed)
    }

    async fn update(&self, quote: &Quote, expected: QuoteStatus) -> Result<(), RepositoryError> {
        let mut quotes = self.quotes.write().await;
        match quotes.get_mut(&quote.id.0) {
            Some(stored) if stored.status == expected => {
                *stored = quote.clone();
                Ok(())
            }
            Some(stored) => Err(RepositoryError::Conflict(format!(
                "quote `{}` is {}, expected {expected}",
                stored.quote_number, stored.status
            ))),
            None => Err(RepositoryError::NotFound(quote.id.0.clone())),
        }
    }

    async fn delete(&self, id: &QuoteId) -> Result<bool, RepositoryError> {
        let mut quotes = self.quotes.write().await;
        Ok(quotes.remove(&id.0).is_some())
    }

    async fn next_sequence(&self, prefix: &str, year: i32) -> Result<u32, RepositoryError> {
        let mut sequences = self.sequences.lock().await;
        let value = sequences.entry((prefix.to_string(), year)).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

#[derive(Default)]
pub struct InMemorySettingsRepository {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

#[async_trait::async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let values = self.values.read().await;
        Ok(values.get(key).cloned())
    }

    async fn upsert(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Audit store backed by the core in-memory sink, so tests can inspect emitted events.
#[derive(Clone, Default)]
pub struct InMemoryAuditRepository {
    sink: InMemoryAuditSink,
}

impl InMemoryAuditRepository {
    pub fn sink(&self) -> &InMemoryAuditSink {
        &self.sink
    }
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        self.sink.emit(event.clone());
        Ok(())
    }

    async fn list_for_quote(&self, quote_id: &QuoteId) -> Result<Vec<AuditEvent>, RepositoryError> {
        Ok(self
            .sink
            .events()
            .into_iter()
            .filter(|event| event.quote_id.as_ref() == Some(quote_id))
            .collect())
    }
}
