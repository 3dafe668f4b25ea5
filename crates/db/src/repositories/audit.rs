use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::Row;

use guardquote_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use guardquote_core::domain::quote::{QuoteId, QuoteNumber};

use super::{AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let event_id: String = row.try_get("id").map_err(decode)?;
    let quote_id: Option<String> = row.try_get("quote_id").map_err(decode)?;
    let quote_number: Option<String> = row.try_get("quote_number").map_err(decode)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(decode)?;
    let event_type: String = row.try_get("event_type").map_err(decode)?;
    let category: String = row.try_get("category").map_err(decode)?;
    let actor: String = row.try_get("actor").map_err(decode)?;
    let outcome: String = row.try_get("outcome").map_err(decode)?;
    let metadata_json: String = row.try_get("metadata_json").map_err(decode)?;
    let occurred_at: String = row.try_get("occurred_at").map_err(decode)?;

    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|e| RepositoryError::Decode(format!("metadata_json: {e}")))?;
    let occurred_at = DateTime::parse_from_rfc3339(&occurred_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("occurred_at: {e}")))?;

    Ok(AuditEvent {
        event_id,
        quote_id: quote_id.map(QuoteId),
        quote_number: quote_number.map(QuoteNumber),
        correlation_id,
        event_type,
        category: AuditCategory::from_str(&category)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        actor,
        outcome: AuditOutcome::from_str(&outcome)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?,
        metadata,
        occurred_at,
    })
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn record(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata_json = serde_json::to_string(&event.metadata)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        sqlx::query(
            "INSERT INTO audit_event (id, quote_id, quote_number, correlation_id, event_type,
                                      category, actor, outcome, metadata_json, occurred_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.quote_id.as_ref().map(|id| id.0.as_str()))
        .bind(event.quote_number.as_ref().map(|number| number.0.as_str()))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(&metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_quote(&self, quote_id: &QuoteId) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, quote_id, quote_number, correlation_id, event_type, category, actor,
                    outcome, metadata_json, occurred_at
             FROM audit_event WHERE quote_id = ? ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&quote_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use guardquote_core::audit::{
        AuditCategory, AuditEvent, AuditOutcome, QUOTE_CREATED, QUOTE_DELETED,
    };
    use guardquote_core::domain::quote::{QuoteId, QuoteNumber};

    use super::SqlAuditRepository;
    use crate::repositories::AuditRepository;
    use crate::{connect_with_settings, migrations};

    fn event(event_type: &str) -> AuditEvent {
        let mut event =
            AuditEvent::new("req-1", event_type, AuditCategory::Quote, "operator", AuditOutcome::Success)
                .with_metadata("status", "draft");
        event.quote_id = Some(QuoteId::new("q-1"));
        event.quote_number = Some(QuoteNumber::new("OSG", 2026, 1));
        event
    }

    #[tokio::test]
    async fn records_survive_quote_deletion_and_keep_order() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlAuditRepository::new(pool);

        let created = event(QUOTE_CREATED);
        let deleted = event(QUOTE_DELETED);
        repo.record(&created).await.expect("created");
        repo.record(&deleted).await.expect("deleted");

        let events = repo.list_for_quote(&QuoteId::new("q-1")).await.expect("list");
        assert_eq!(events, vec![created, deleted]);
        assert!(repo.list_for_quote(&QuoteId::new("other")).await.expect("list").is_empty());
    }
}
