use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use guardquote_core::domain::quote::{
    AddonLine, ClientDetails, NewQuote, PersonnelLine, Quote, QuoteId, QuoteNumber, QuotePricing,
    QuoteStatus, TaxSource,
};
use guardquote_core::domain::service::ServiceId;

use super::{QuoteRepository, RepositoryError};
use crate::DbPool;

const QUOTE_COLUMNS: &str = "id, quote_number, contact_id, client_name, client_email, \
     client_phone, client_state, service_id, event_date, duration_hours, expected_attendance, \
     personnel_lines_json, addon_lines_json, personnel_cost, addons_cost, subtotal, tax_rate, \
     tax_source, tax_amount, total, payment_terms, valid_until, status, sent_at, decided_at, \
     created_at, updated_at";

/// Digits after the last `-` of the quote number, as an integer.
const SEQUENCE_EXPR: &str = "CAST(substr(quote_number, \
     length(rtrim(quote_number, replace(quote_number, '-', ''))) + 1) AS INTEGER)";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn column<'r, T>(row: &'r sqlx::sqlite::SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn decimal(row: &sqlx::sqlite::SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(&raw).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn timestamp(raw: &str, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn optional_timestamp(
    row: &sqlx::sqlite::SqliteRow,
    name: &str,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    let raw: Option<String> = column(row, name)?;
    raw.as_deref().map(|value| timestamp(value, name)).transpose()
}

fn date(raw: &str, name: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::from_str(raw).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn row_to_quote(row: &sqlx::sqlite::SqliteRow) -> Result<Quote, RepositoryError> {
    let personnel_json: String = column(row, "personnel_lines_json")?;
    let addon_json: String = column(row, "addon_lines_json")?;
    let personnel_lines: Vec<PersonnelLine> = serde_json::from_str(&personnel_json)
        .map_err(|e| RepositoryError::Decode(format!("personnel_lines_json: {e}")))?;
    let addon_lines: Vec<AddonLine> = serde_json::from_str(&addon_json)
        .map_err(|e| RepositoryError::Decode(format!("addon_lines_json: {e}")))?;

    let tax_source: String = column(row, "tax_source")?;
    let status: String = column(row, "status")?;
    let event_date: Option<String> = column(row, "event_date")?;
    let valid_until: String = column(row, "valid_until")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;
    let expected_attendance: Option<i64> = column(row, "expected_attendance")?;

    Ok(Quote {
        id: QuoteId(column(row, "id")?),
        quote_number: QuoteNumber(column(row, "quote_number")?),
        contact_id: column(row, "contact_id")?,
        client: ClientDetails {
            name: column(row, "client_name")?,
            email: column(row, "client_email")?,
            phone: column(row, "client_phone")?,
            state: column(row, "client_state")?,
        },
        service_id: ServiceId(column(row, "service_id")?),
        event_date: event_date.as_deref().map(|raw| date(raw, "event_date")).transpose()?,
        duration_hours: decimal(row, "duration_hours")?,
        expected_attendance: expected_attendance
            .map(u32::try_from)
            .transpose()
            .map_err(|e| RepositoryError::Decode(format!("expected_attendance: {e}")))?,
        pricing: QuotePricing {
            personnel_lines,
            addon_lines,
            personnel_cost: decimal(row, "personnel_cost")?,
            addons_cost: decimal(row, "addons_cost")?,
            subtotal: decimal(row, "subtotal")?,
            tax_rate: decimal(row, "tax_rate")?,
            tax_source: TaxSource::from_str(&tax_source)
                .map_err(|e| RepositoryError::Decode(e.to_string()))?,
            tax_amount: decimal(row, "tax_amount")?,
            total: decimal(row, "total")?,
        },
        payment_terms: column(row, "payment_terms")?,
        valid_until: date(&valid_until, "valid_until")?,
        status: QuoteStatus::from_str(&status).map_err(|e| RepositoryError::Decode(e.to_string()))?,
        sent_at: optional_timestamp(row, "sent_at")?,
        decided_at: optional_timestamp(row, "decided_at")?,
        created_at: timestamp(&created_at, "created_at")?,
        updated_at: timestamp(&updated_at, "updated_at")?,
    })
}

fn lines_json(quote: &Quote) -> Result<(String, String), RepositoryError> {
    let personnel = serde_json::to_string(&quote.pricing.personnel_lines)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let addons = serde_json::to_string(&quote.pricing.addon_lines)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    Ok((personnel, addons))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn insert(&self, quote: NewQuote) -> Result<Quote, RepositoryError> {
        let quote = quote.into_quote(QuoteId(Uuid::new_v4().to_string()));
        let (personnel_json, addon_json) = lines_json(&quote)?;

        let result = sqlx::query(&format!(
            "INSERT INTO quotes ({QUOTE_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&quote.id.0)
        .bind(&quote.quote_number.0)
        .bind(&quote.contact_id)
        .bind(&quote.client.name)
        .bind(&quote.client.email)
        .bind(&quote.client.phone)
        .bind(&quote.client.state)
        .bind(&quote.service_id.0)
        .bind(quote.event_date.map(|date| date.to_string()))
        .bind(quote.duration_hours.to_string())
        .bind(quote.expected_attendance.map(i64::from))
        .bind(&personnel_json)
        .bind(&addon_json)
        .bind(quote.pricing.personnel_cost.to_string())
        .bind(quote.pricing.addons_cost.to_string())
        .bind(quote.pricing.subtotal.to_string())
        .bind(quote.pricing.tax_rate.to_string())
        .bind(quote.pricing.tax_source.as_str())
        .bind(quote.pricing.tax_amount.to_string())
        .bind(quote.pricing.total.to_string())
        .bind(&quote.payment_terms)
        .bind(quote.valid_until.to_string())
        .bind(quote.status.as_str())
        .bind(quote.sent_at.map(|dt| dt.to_rfc3339()))
        .bind(quote.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(quote.created_at.to_rfc3339())
        .bind(quote.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(quote),
            Err(error) if is_unique_violation(&error) => Err(RepositoryError::Conflict(format!(
                "quote number `{}` is already taken",
                quote.quote_number
            ))),
            Err(error) => Err(error.into()),
        }
    }

    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_quote(r)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Quote>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes ORDER BY created_at DESC, {SEQUENCE_EXPR} DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_quote).collect::<Result<Vec<_>, _>>()
    }

    async fn update(&self, quote: &Quote, expected: QuoteStatus) -> Result<(), RepositoryError> {
        let (personnel_json, addon_json) = lines_json(quote)?;

        let result = sqlx::query(
            "UPDATE quotes SET
                 contact_id = ?, client_name = ?, client_email = ?, client_phone = ?,
                 client_state = ?, event_date = ?, expected_attendance = ?,
                 personnel_lines_json = ?, addon_lines_json = ?, personnel_cost = ?,
                 addons_cost = ?, subtotal = ?, tax_rate = ?, tax_source = ?, tax_amount = ?,
                 total = ?, payment_terms = ?, valid_until = ?, status = ?, sent_at = ?,
                 decided_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(&quote.contact_id)
        .bind(&quote.client.name)
        .bind(&quote.client.email)
        .bind(&quote.client.phone)
        .bind(&quote.client.state)
        .bind(quote.event_date.map(|date| date.to_string()))
        .bind(quote.expected_attendance.map(i64::from))
        .bind(&personnel_json)
        .bind(&addon_json)
        .bind(quote.pricing.personnel_cost.to_string())
        .bind(quote.pricing.addons_cost.to_string())
        .bind(quote.pricing.subtotal.to_string())
        .bind(quote.pricing.tax_rate.to_string())
        .bind(quote.pricing.tax_source.as_str())
        .bind(quote.pricing.tax_amount.to_string())
        .bind(quote.pricing.total.to_string())
        .bind(&quote.payment_terms)
        .bind(quote.valid_until.to_string())
        .bind(quote.status.as_str())
        .bind(quote.sent_at.map(|dt| dt.to_rfc3339()))
        .bind(quote.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(quote.updated_at.to_rfc3339())
        .bind(&quote.id.0)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current = sqlx::query("SELECT status FROM quotes WHERE id = ?")
            .bind(&quote.id.0)
            .fetch_optional(&self.pool)
            .await?;
        match current {
            Some(row) => {
                let status: String = column(&row, "status")?;
                Err(RepositoryError::Conflict(format!(
                    "quote `{}` is {status}, expected {expected}",
                    quote.quote_number
                )))
            }
            None => Err(RepositoryError::NotFound(quote.id.0.clone())),
        }
    }

    async fn delete(&self, id: &QuoteId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM quotes WHERE id = ?").bind(&id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn next_sequence(&self, prefix: &str, year: i32) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO quote_number_sequence (prefix, year, last_value)
             VALUES (?, ?, 1)
             ON CONFLICT(prefix, year) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value",
        )
        .bind(prefix)
        .bind(year)
        .fetch_one(&self.pool)
        .await?;

        let value: i64 = column(&row, "last_value")?;
        u32::try_from(value).map_err(|e| RepositoryError::Decode(format!("last_value: {e}")))
    }
}
