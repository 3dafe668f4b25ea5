//! Quote API: service orchestration plus the axum handlers that expose it.
//!
//! Endpoints:
//! - `POST   /api/v1/quotes/preview`        price a request without storing anything
//! - `POST   /api/v1/quotes`                create a draft quote
//! - `GET    /api/v1/quotes?status=&q=`     list quotes, newest first
//! - `GET    /api/v1/quotes/stats`          board summary
//! - `POST   /api/v1/quotes/expire`         expire open quotes past their validity date
//! - `GET    /api/v1/quotes/{id}`           fetch one quote
//! - `POST   /api/v1/quotes/{id}/send`      email the quote, then mark it sent
//! - `POST   /api/v1/quotes/{id}/accept`    record acceptance
//! - `POST   /api/v1/quotes/{id}/decline`   record decline
//! - `DELETE /api/v1/quotes/{id}`           hard delete

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, NaiveDate, Utc};
use guardquote_core::audit::{
    AuditCategory, AuditEvent, AuditOutcome, CATALOG_UPDATED, QUOTE_ACCEPTED, QUOTE_CREATED,
    QUOTE_DECLINED, QUOTE_DELETED, QUOTE_EXPIRED, QUOTE_SENT,
};
use guardquote_core::cpq::board::{filter_by_status, search, QuoteStats, StatusFilter};
use guardquote_core::cpq::builder::{QuoteDefaults, ServiceDetails};
use guardquote_core::cpq::catalog::RateCatalog;
use guardquote_core::cpq::pricing::{
    format_usd, DeterministicPricingEngine, PricingBreakdown, PricingRequest,
};
use guardquote_core::cpq::{CpqRuntime, DeterministicCpqRuntime, DraftQuoteInput};
use guardquote_core::domain::inquiry::InquiryDetails;
use guardquote_core::domain::quote::{ClientDetails, Quote, QuoteId, QuoteStatus};
use guardquote_core::domain::service::ServiceId;
use guardquote_core::errors::{ApplicationError, DomainError, InterfaceError};
use guardquote_core::notify::{EmailDispatcher, EmailError};
use guardquote_db::{AuditRepository, QuoteRepository, RepositoryError, SettingsRepository};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::email::QuoteMailer;

/// Attempts at reserving a quote number before giving up on a conflict.
pub const MAX_NUMBER_ATTEMPTS: u32 = 3;

const ACTOR: &str = "quote-service";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CreateQuoteRequest {
    pub pricing: PricingRequest,
    pub client: ClientDetails,
    #[serde(default)]
    pub service: ServiceDetails,
}

pub struct QuoteService {
    quotes: Arc<dyn QuoteRepository>,
    settings: Arc<dyn SettingsRepository>,
    audit: Arc<dyn AuditRepository>,
    email: Arc<dyn EmailDispatcher>,
    mailer: QuoteMailer,
    runtime: DeterministicCpqRuntime<DeterministicPricingEngine>,
    admin_email: Option<String>,
}

impl QuoteService {
    pub fn new(
        quotes: Arc<dyn QuoteRepository>,
        settings: Arc<dyn SettingsRepository>,
        audit: Arc<dyn AuditRepository>,
        email: Arc<dyn EmailDispatcher>,
        mailer: QuoteMailer,
    ) -> Self {
        Self {
            quotes,
            settings,
            audit,
            email,
            mailer,
            runtime: DeterministicCpqRuntime::default(),
            admin_email: None,
        }
    }

    /// Sends a best-effort notification to `admin_email` whenever a quote is created.
    pub fn with_admin_notifications(mut self, admin_email: impl Into<String>) -> Self {
        self.admin_email = Some(admin_email.into());
        self
    }

    pub async fn catalog(&self) -> Result<RateCatalog, ApplicationError> {
        self.settings.load_rate_catalog().await?.ok_or_else(|| {
            ApplicationError::Configuration(
                "rate catalog has not been seeded; run `guardquote seed`".to_string(),
            )
        })
    }

    pub async fn save_catalog(
        &self,
        catalog: RateCatalog,
        correlation_id: &str,
    ) -> Result<RateCatalog, ApplicationError> {
        catalog.validate()?;
        self.settings.save_rate_catalog(&catalog).await?;

        self.record(AuditEvent::new(
            correlation_id,
            CATALOG_UPDATED,
            AuditCategory::Catalog,
            ACTOR,
            AuditOutcome::Success,
        ))
        .await;
        info!(
            event_name = CATALOG_UPDATED,
            correlation_id = %correlation_id,
            positions = catalog.position_rates.len(),
            services = catalog.service_addon_catalogs.len(),
            "rate catalog updated"
        );
        Ok(catalog)
    }

    /// Applies one admin edit to the stored catalog and saves it through `save_catalog`.
    pub async fn edit_catalog<T, F>(
        &self,
        correlation_id: &str,
        edit: F,
    ) -> Result<(RateCatalog, T), ApplicationError>
    where
        F: FnOnce(&mut RateCatalog) -> Result<T, DomainError>,
    {
        let mut catalog = self.catalog().await?;
        let outcome = edit(&mut catalog)?;
        let saved = self.save_catalog(catalog, correlation_id).await?;
        Ok((saved, outcome))
    }

    pub async fn quote_defaults(
        &self,
        service_id: &ServiceId,
        client_state: &str,
        inquiry_message: &str,
        today: NaiveDate,
    ) -> Result<QuoteDefaults, ApplicationError> {
        let catalog = self.catalog().await?;
        if !catalog.offers_service(service_id) {
            return Err(DomainError::UnknownService(service_id.to_string()).into());
        }

        let details = InquiryDetails::parse(inquiry_message);
        Ok(QuoteDefaults::for_inquiry(&catalog, service_id, client_state, &details, today))
    }

    pub async fn preview(&self, request: &PricingRequest) -> Result<PricingBreakdown, ApplicationError> {
        let catalog = self.catalog().await?;
        Ok(self.runtime.preview(&catalog, request)?)
    }

    pub async fn create(
        &self,
        request: CreateQuoteRequest,
        correlation_id: &str,
    ) -> Result<Quote, ApplicationError> {
        let catalog = self.catalog().await?;
        let created_at = Utc::now();
        let draft_input = |sequence| DraftQuoteInput {
            catalog: &catalog,
            request: &request.pricing,
            client: request.client.clone(),
            service: request.service.clone(),
            sequence,
            created_at,
        };

        // A rejected request must not consume a quote number.
        self.runtime.draft_quote(draft_input(1))?;

        let mut attempt = 1;
        let quote = loop {
            let sequence = self
                .quotes
                .next_sequence(&catalog.quote_number_prefix, created_at.year())
                .await?;
            let draft = self.runtime.draft_quote(draft_input(sequence))?;

            match self.quotes.insert(draft.quote).await {
                Ok(quote) => break quote,
                Err(RepositoryError::Conflict(reason)) if attempt < MAX_NUMBER_ATTEMPTS => {
                    warn!(
                        event_name = "quote.number_conflict",
                        correlation_id = %correlation_id,
                        attempt,
                        reason = %reason,
                        "quote number already taken, reserving another"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error.into()),
            }
        };

        self.record(AuditEvent::for_quote(&quote, correlation_id, QUOTE_CREATED, ACTOR)).await;
        info!(
            event_name = QUOTE_CREATED,
            correlation_id = %correlation_id,
            quote_id = %quote.id,
            quote_number = %quote.quote_number,
            total = %quote.pricing.total,
            "quote created"
        );

        self.notify_admin(&quote, &catalog, correlation_id).await;
        Ok(quote)
    }

    pub async fn get(&self, id: &QuoteId) -> Result<Quote, ApplicationError> {
        self.quotes
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::QuoteNotFound(id.to_string()))
    }

    pub async fn list(
        &self,
        filter: StatusFilter,
        term: &str,
        today: NaiveDate,
    ) -> Result<Vec<Quote>, ApplicationError> {
        let quotes = self.quotes.list().await?;
        let filtered = filter_by_status(&quotes, filter, today);
        if term.trim().is_empty() {
            return Ok(filtered.into_iter().cloned().collect());
        }

        let catalog = self.catalog().await?;
        Ok(search(&filtered, &catalog, term).into_iter().cloned().collect())
    }

    pub async fn stats(&self, today: NaiveDate) -> Result<QuoteStats, ApplicationError> {
        let quotes = self.quotes.list().await?;
        Ok(QuoteStats::collect(&quotes, today))
    }

    /// Emails the quote and only then records it as sent. A failed delivery leaves the quote
    /// untouched.
    pub async fn send(&self, id: &QuoteId, correlation_id: &str) -> Result<Quote, ApplicationError> {
        let mut quote = self.get(id).await?;
        if !quote.can_transition_to(QuoteStatus::Sent) {
            return Err(DomainError::InvalidQuoteTransition {
                from: quote.status,
                to: QuoteStatus::Sent,
            }
            .into());
        }

        let catalog = self.catalog().await?;
        let delivery = match self.mailer.quote_email(&quote, &catalog) {
            Ok(message) => self.email.send(&message).await,
            Err(error) => Err(error),
        };
        if let Err(error) = delivery {
            self.record(
                AuditEvent::for_quote(&quote, correlation_id, QUOTE_SENT, ACTOR)
                    .with_outcome(AuditOutcome::Failed)
                    .with_metadata("provider", self.email.provider())
                    .with_metadata("error", error.to_string()),
            )
            .await;
            warn!(
                event_name = "quote.send_failed",
                correlation_id = %correlation_id,
                quote_id = %quote.id,
                quote_number = %quote.quote_number,
                provider = self.email.provider(),
                error = %error,
                "quote email was not delivered"
            );
            return Err(delivery_error(error));
        }

        quote.mark_sent(Utc::now())?;
        self.quotes.update(&quote, QuoteStatus::Draft).await?;

        self.record(
            AuditEvent::for_quote(&quote, correlation_id, QUOTE_SENT, ACTOR)
                .with_metadata("provider", self.email.provider()),
        )
        .await;
        info!(
            event_name = QUOTE_SENT,
            correlation_id = %correlation_id,
            quote_id = %quote.id,
            quote_number = %quote.quote_number,
            provider = self.email.provider(),
            "quote sent"
        );
        Ok(quote)
    }

    pub async fn accept(&self, id: &QuoteId, correlation_id: &str) -> Result<Quote, ApplicationError> {
        self.decide(id, correlation_id, QuoteStatus::Accepted).await
    }

    pub async fn decline(&self, id: &QuoteId, correlation_id: &str) -> Result<Quote, ApplicationError> {
        self.decide(id, correlation_id, QuoteStatus::Declined).await
    }

    async fn decide(
        &self,
        id: &QuoteId,
        correlation_id: &str,
        decision: QuoteStatus,
    ) -> Result<Quote, ApplicationError> {
        let mut quote = self.get(id).await?;
        let previous = quote.status;
        let now = Utc::now();
        let event_type = match decision {
            QuoteStatus::Accepted => {
                quote.accept(now)?;
                QUOTE_ACCEPTED
            }
            _ => {
                quote.decline(now)?;
                QUOTE_DECLINED
            }
        };
        self.quotes.update(&quote, previous).await?;

        self.record(AuditEvent::for_quote(&quote, correlation_id, event_type, ACTOR)).await;
        info!(
            event_name = event_type,
            correlation_id = %correlation_id,
            quote_id = %quote.id,
            quote_number = %quote.quote_number,
            "quote decision recorded"
        );
        Ok(quote)
    }

    /// Persists `expired` for every open quote past its validity date. Meant to run from a
    /// scheduler; listing already shows such quotes as expired without it.
    pub async fn expire_stale(
        &self,
        today: NaiveDate,
        correlation_id: &str,
    ) -> Result<Vec<Quote>, ApplicationError> {
        let now = Utc::now();
        let mut expired = Vec::new();

        for mut quote in self.quotes.list().await? {
            if quote.status.is_terminal() || !quote.is_past_validity(today) {
                continue;
            }
            let previous = quote.status;
            quote.expire(now)?;
            match self.quotes.update(&quote, previous).await {
                Ok(()) => {}
                // Decided or deleted since the listing; nothing left to expire.
                Err(RepositoryError::Conflict(_) | RepositoryError::NotFound(_)) => continue,
                Err(error) => return Err(error.into()),
            }
            self.record(AuditEvent::for_quote(&quote, correlation_id, QUOTE_EXPIRED, ACTOR)).await;
            expired.push(quote);
        }

        info!(
            event_name = QUOTE_EXPIRED,
            correlation_id = %correlation_id,
            expired = expired.len(),
            "stale quotes expired"
        );
        Ok(expired)
    }

    pub async fn delete(&self, id: &QuoteId, correlation_id: &str) -> Result<(), ApplicationError> {
        let quote = self.get(id).await?;
        if !self.quotes.delete(id).await? {
            return Err(ApplicationError::QuoteNotFound(id.to_string()));
        }

        self.record(AuditEvent::for_quote(&quote, correlation_id, QUOTE_DELETED, ACTOR)).await;
        info!(
            event_name = QUOTE_DELETED,
            correlation_id = %correlation_id,
            quote_id = %quote.id,
            quote_number = %quote.quote_number,
            "quote deleted"
        );
        Ok(())
    }

    async fn notify_admin(&self, quote: &Quote, catalog: &RateCatalog, correlation_id: &str) {
        let Some(admin_email) = &self.admin_email else {
            return;
        };

        let delivery = match self.mailer.admin_notification(quote, catalog, admin_email) {
            Ok(message) => self.email.send(&message).await,
            Err(error) => Err(error),
        };
        if let Err(error) = delivery {
            warn!(
                event_name = "quote.admin_notification_failed",
                correlation_id = %correlation_id,
                quote_id = %quote.id,
                quote_number = %quote.quote_number,
                error = %error,
                "admin notification was not delivered"
            );
        }
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(error) = self.audit.record(&event).await {
            warn!(
                event_name = "audit.record_failed",
                correlation_id = %event.correlation_id,
                audit_event = %event.event_type,
                error = %error,
                "audit event could not be persisted"
            );
        }
    }
}

fn delivery_error(error: EmailError) -> ApplicationError {
    match error {
        EmailError::Rejected(reason) => {
            ApplicationError::Domain(DomainError::InvalidInput(format!("email rejected: {reason}")))
        }
        EmailError::Transport(reason) | EmailError::Template(reason) => {
            ApplicationError::Integration(reason)
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<QuoteService>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

/// Maps an application error onto its HTTP status and JSON error body.
pub fn api_error(error: ApplicationError, correlation_id: &str) -> (StatusCode, Json<ApiError>) {
    let error = error.into_interface(correlation_id);
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        warn!(
            event_name = "api.request_failed",
            correlation_id = %error.correlation_id(),
            status = status.as_u16(),
            error = %error,
            "request failed"
        );
    }

    let message = match &error {
        InterfaceError::Internal { .. } => error.user_message().to_string(),
        other => other.message().to_string(),
    };
    (status, Json(ApiError { error: message, correlation_id: error.correlation_id().to_string() }))
}

/// Uses the caller's `x-correlation-id` when present, otherwise a fresh id.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get("x-correlation-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[derive(Debug, Serialize)]
pub struct DisplayTotals {
    pub subtotal: String,
    pub tax_amount: String,
    pub total: String,
}

impl DisplayTotals {
    fn new(subtotal: Decimal, tax_amount: Decimal, total: Decimal) -> Self {
        Self {
            subtotal: format_usd(subtotal),
            tax_amount: format_usd(tax_amount),
            total: format_usd(total),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    #[serde(flatten)]
    pub breakdown: PricingBreakdown,
    pub display: DisplayTotals,
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    #[serde(flatten)]
    pub quote: Quote,
    pub effective_status: QuoteStatus,
    pub display: DisplayTotals,
}

impl QuoteResponse {
    fn new(quote: Quote, today: NaiveDate) -> Self {
        let display =
            DisplayTotals::new(quote.pricing.subtotal, quote.pricing.tax_amount, quote.pricing.total);
        Self { effective_status: quote.effective_status(today), display, quote }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: Vec<String>,
}

pub fn router(service: Arc<QuoteService>) -> Router {
    Router::new()
        .route("/api/v1/quotes", get(list_quotes).post(create_quote))
        .route("/api/v1/quotes/preview", post(preview_quote))
        .route("/api/v1/quotes/stats", get(quote_stats))
        .route("/api/v1/quotes/expire", post(expire_quotes))
        .route("/api/v1/quotes/{id}", get(get_quote).delete(delete_quote))
        .route("/api/v1/quotes/{id}/send", post(send_quote))
        .route("/api/v1/quotes/{id}/accept", post(accept_quote))
        .route("/api/v1/quotes/{id}/decline", post(decline_quote))
        .with_state(ApiState { service })
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub async fn preview_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<PricingRequest>,
) -> ApiResult<Json<PreviewResponse>> {
    let correlation_id = correlation_id(&headers);
    let breakdown =
        state.service.preview(&request).await.map_err(|e| api_error(e, &correlation_id))?;
    let display = DisplayTotals::new(breakdown.subtotal, breakdown.tax_amount, breakdown.total);
    Ok(Json(PreviewResponse { breakdown, display }))
}

pub async fn create_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<CreateQuoteRequest>,
) -> ApiResult<(StatusCode, Json<QuoteResponse>)> {
    let correlation_id = correlation_id(&headers);
    let quote = state
        .service
        .create(request, &correlation_id)
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(QuoteResponse::new(quote, today()))))
}

pub async fn list_quotes(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<QuoteResponse>>> {
    let correlation_id = correlation_id(&headers);
    let filter = StatusFilter::from_str(query.status.as_deref().unwrap_or_default())
        .map_err(|e| api_error(e.into(), &correlation_id))?;
    let today = today();

    let quotes = state
        .service
        .list(filter, query.q.as_deref().unwrap_or_default(), today)
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(quotes.into_iter().map(|quote| QuoteResponse::new(quote, today)).collect()))
}

pub async fn quote_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<QuoteStats>> {
    let correlation_id = correlation_id(&headers);
    let stats = state.service.stats(today()).await.map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(stats))
}

pub async fn get_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<QuoteResponse>> {
    let correlation_id = correlation_id(&headers);
    let quote =
        state.service.get(&QuoteId(id)).await.map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(QuoteResponse::new(quote, today())))
}

pub async fn send_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<QuoteResponse>> {
    let correlation_id = correlation_id(&headers);
    let quote = state
        .service
        .send(&QuoteId(id), &correlation_id)
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(QuoteResponse::new(quote, today())))
}

pub async fn accept_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<QuoteResponse>> {
    let correlation_id = correlation_id(&headers);
    let quote = state
        .service
        .accept(&QuoteId(id), &correlation_id)
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(QuoteResponse::new(quote, today())))
}

pub async fn decline_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<QuoteResponse>> {
    let correlation_id = correlation_id(&headers);
    let quote = state
        .service
        .decline(&QuoteId(id), &correlation_id)
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(QuoteResponse::new(quote, today())))
}

pub async fn delete_quote(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let correlation_id = correlation_id(&headers);
    state
        .service
        .delete(&QuoteId(id), &correlation_id)
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn expire_quotes(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<ExpireResponse>> {
    let correlation_id = correlation_id(&headers);
    let expired = state
        .service
        .expire_stale(today(), &correlation_id)
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(ExpireResponse {
        expired: expired.into_iter().map(|quote| quote.quote_number.0).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        Json,
    };
    use chrono::{Datelike, Days, Utc};
    use guardquote_core::audit::{
        AuditOutcome, QUOTE_ACCEPTED, QUOTE_CREATED, QUOTE_DELETED, QUOTE_EXPIRED, QUOTE_SENT,
    };
    use guardquote_core::cpq::board::StatusFilter;
    use guardquote_core::cpq::builder::{QuoteRecordBuilder, ServiceDetails};
    use guardquote_core::cpq::catalog::RateCatalog;
    use guardquote_core::cpq::pricing::{price_request, PersonnelSelection};
    use guardquote_core::domain::quote::{
        NewQuote, Quote, QuoteId, QuoteNumber, QuoteStatus, TaxSource,
    };
    use guardquote_core::domain::service::PositionId;
    use guardquote_core::errors::{ApplicationError, DomainError};
    use guardquote_core::notify::{EmailError, RecordingEmailDispatcher};
    use guardquote_db::{
        AuditRepository, InMemoryAuditRepository, InMemoryQuoteRepository,
        InMemorySettingsRepository, QuoteRepository, RepositoryError,
    };
    use rust_decimal::Decimal;

    use super::{
        create_quote, decline_quote, get_quote, list_quotes, preview_quote, send_quote, ApiState,
        ListQuery, QuoteService,
    };
    use crate::email::QuoteMailer;
    use crate::test_support::{
        harness, harness_with_email, sample_client, sample_create_request, sample_request,
    };

    #[tokio::test]
    async fn create_prices_and_numbers_the_quote() {
        let harness = harness().await;

        let first = harness.service.create(sample_create_request(), "req-1").await.expect("first");
        let second =
            harness.service.create(sample_create_request(), "req-2").await.expect("second");

        let year = Utc::now().format("%Y").to_string();
        assert_eq!(first.quote_number.as_str(), format!("OSG-{year}-001"));
        assert_eq!(second.quote_number.as_str(), format!("OSG-{year}-002"));
        assert_eq!(first.status, QuoteStatus::Draft);
        assert_eq!(first.pricing.total, Decimal::new(38_663_625, 4));
        assert_eq!(first.pricing.tax_source, TaxSource::State);
        assert_eq!(first.client.state, "CA");
        assert_eq!(first.payment_terms, "50% deposit, balance due day of event");
        assert_eq!(first.valid_until, Utc::now().date_naive() + Days::new(30));
        assert_eq!(harness.audit.sink().event_types(), vec![QUOTE_CREATED, QUOTE_CREATED]);
    }

    #[tokio::test]
    async fn create_retries_when_the_number_is_taken() {
        let harness = harness().await;
        let catalog = RateCatalog::default();
        let now = Utc::now();
        let breakdown = price_request(&catalog, &sample_request()).expect("price");
        let imported = QuoteRecordBuilder
            .build(&catalog, &breakdown, sample_client(), ServiceDetails::default(), 1, now)
            .expect("build");

        // A quote imported outside the counter already holds sequence 1.
        let quotes = Arc::new(InMemoryQuoteRepository::default());
        quotes.insert(imported).await.expect("seed");
        let service = QuoteService::new(
            quotes.clone(),
            harness.settings.clone(),
            Arc::new(InMemoryAuditRepository::default()),
            Arc::new(RecordingEmailDispatcher::default()),
            QuoteMailer::new("Open Shield Group", "quotes@osg.test").expect("mailer"),
        );

        let created = service.create(sample_create_request(), "req-1").await.expect("retry");

        assert_eq!(created.quote_number, QuoteNumber::new("OSG", now.year(), 2));
        assert_eq!(quotes.list().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn create_rejects_unknown_position() {
        let harness = harness().await;
        let mut request = sample_create_request();
        request.pricing.personnel.push(PersonnelSelection::new("sniper", 1));

        let error = harness.service.create(request, "req-1").await.expect_err("unknown position");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::UnknownPosition(ref id)) if id == "sniper"
        ));
        assert!(harness.audit.sink().events().is_empty());
    }

    #[tokio::test]
    async fn rejected_create_does_not_consume_a_quote_number() {
        let harness = harness().await;
        let mut unknown = sample_create_request();
        unknown.pricing.personnel.push(PersonnelSelection::new("sniper", 1));
        harness.service.create(unknown, "req-1").await.expect_err("unknown position");

        let created = harness.service.create(sample_create_request(), "req-2").await.expect("create");

        assert_eq!(created.quote_number, QuoteNumber::new("OSG", Utc::now().year(), 1));
    }

    #[tokio::test]
    async fn create_rejects_a_client_state_that_differs_from_the_taxed_state() {
        let harness = harness().await;
        let mut request = sample_create_request();
        request.client.state = "OR".to_string();

        let error = harness.service.create(request, "req-1").await.expect_err("OR vs CA");

        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InvalidInput(ref message))
                if message.contains("OR") && message.contains("CA")
        ));
        let created = harness.service.create(sample_create_request(), "req-2").await.expect("create");
        assert_eq!(created.quote_number, QuoteNumber::new("OSG", Utc::now().year(), 1));
    }

    #[tokio::test]
    async fn create_taxes_at_the_client_state_when_pricing_names_none() {
        let harness = harness().await;
        let mut request = sample_create_request();
        request.pricing.client_state = String::new();
        request.client.state = "or".to_string();

        let quote = harness.service.create(request, "req-1").await.expect("create");

        assert_eq!(quote.client.state, "OR");
        assert_eq!(quote.pricing.tax_source, TaxSource::State);
        assert_eq!(quote.pricing.tax_rate, Decimal::ZERO);
        assert_eq!(quote.pricing.total, quote.pricing.subtotal);
    }

    #[tokio::test]
    async fn admin_is_notified_without_blocking_creation() {
        let email = RecordingEmailDispatcher::failing(EmailError::Transport("down".to_string()));
        let harness = harness_with_email(email).await;
        let service = QuoteService::new(
            Arc::new(InMemoryQuoteRepository::default()),
            harness.settings.clone(),
            Arc::new(harness.audit.clone()),
            Arc::new(harness.email.clone()),
            QuoteMailer::new("Open Shield Group", "quotes@osg.test").expect("mailer"),
        )
        .with_admin_notifications("dispatch@osg.test");

        let quote = service.create(sample_create_request(), "req-1").await;

        assert!(quote.is_ok(), "failed notification must not fail creation");

        let recording = RecordingEmailDispatcher::default();
        let service = QuoteService::new(
            Arc::new(InMemoryQuoteRepository::default()),
            harness.settings.clone(),
            Arc::new(InMemoryAuditRepository::default()),
            Arc::new(recording.clone()),
            QuoteMailer::new("Open Shield Group", "quotes@osg.test").expect("mailer"),
        )
        .with_admin_notifications("dispatch@osg.test");
        service.create(sample_create_request(), "req-2").await.expect("create");

        let sent = recording.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "dispatch@osg.test");
    }

    #[tokio::test]
    async fn send_dispatches_before_marking_sent() {
        let harness = harness().await;
        let quote = harness.service.create(sample_create_request(), "req-1").await.expect("create");

        let sent = harness.service.send(&quote.id, "req-2").await.expect("send");

        assert_eq!(sent.status, QuoteStatus::Sent);
        assert!(sent.sent_at.is_some());
        let messages = harness.email.sent();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to, "events@summit.test");
        assert!(messages[0].subject.starts_with(&format!("Quote {}", quote.quote_number)));

        let again = harness.service.send(&quote.id, "req-3").await.expect_err("already sent");
        assert!(matches!(
            again,
            ApplicationError::Domain(DomainError::InvalidQuoteTransition { .. })
        ));
        assert_eq!(harness.email.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_leaves_quote_in_draft() {
        let email = RecordingEmailDispatcher::failing(EmailError::Transport("timeout".to_string()));
        let harness = harness_with_email(email).await;
        let quote = harness.service.create(sample_create_request(), "req-1").await.expect("create");

        let error = harness.service.send(&quote.id, "req-2").await.expect_err("delivery fails");

        assert!(matches!(error, ApplicationError::Integration(_)));
        let stored = harness.service.get(&quote.id).await.expect("get");
        assert_eq!(stored.status, QuoteStatus::Draft);
        assert!(stored.sent_at.is_none());

        let events = harness.audit.list_for_quote(&quote.id).await.expect("events");
        assert_eq!(events.last().map(|event| event.outcome), Some(AuditOutcome::Failed));
    }

    #[tokio::test]
    async fn accept_requires_a_sent_quote() {
        let harness = harness().await;
        let quote = harness.service.create(sample_create_request(), "req-1").await.expect("create");

        let premature = harness.service.accept(&quote.id, "req-2").await.expect_err("draft");
        assert!(matches!(
            premature,
            ApplicationError::Domain(DomainError::InvalidQuoteTransition {
                from: QuoteStatus::Draft,
                to: QuoteStatus::Accepted,
            })
        ));

        harness.service.send(&quote.id, "req-3").await.expect("send");
        let accepted = harness.service.accept(&quote.id, "req-4").await.expect("accept");
        assert_eq!(accepted.status, QuoteStatus::Accepted);
        assert!(accepted.decided_at.is_some());

        let declined = harness.service.decline(&quote.id, "req-5").await.expect_err("terminal");
        assert!(matches!(declined, ApplicationError::Domain(_)));
        assert!(harness.audit.sink().event_types().contains(&QUOTE_ACCEPTED.to_string()));
        assert!(harness.audit.sink().event_types().contains(&QUOTE_SENT.to_string()));
    }

    /// Always answers reads with the copy it was built with, like a request that loaded the
    /// quote before another request changed it.
    struct FrozenReads {
        inner: Arc<InMemoryQuoteRepository>,
        snapshot: Quote,
    }

    #[async_trait::async_trait]
    impl QuoteRepository for FrozenReads {
        async fn insert(&self, quote: NewQuote) -> Result<Quote, RepositoryError> {
            self.inner.insert(quote).await
        }

        async fn find_by_id(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
            Ok((self.snapshot.id == *id).then(|| self.snapshot.clone()))
        }

        async fn list(&self) -> Result<Vec<Quote>, RepositoryError> {
            self.inner.list().await
        }

        async fn update(&self, quote: &Quote, expected: QuoteStatus) -> Result<(), RepositoryError> {
            self.inner.update(quote, expected).await
        }

        async fn delete(&self, id: &QuoteId) -> Result<bool, RepositoryError> {
            self.inner.delete(id).await
        }

        async fn next_sequence(&self, prefix: &str, year: i32) -> Result<u32, RepositoryError> {
            self.inner.next_sequence(prefix, year).await
        }
    }

    #[tokio::test]
    async fn decision_on_a_stale_read_is_a_conflict() {
        let harness = harness().await;
        let quotes = Arc::new(InMemoryQuoteRepository::default());
        let service = QuoteService::new(
            quotes.clone(),
            harness.settings.clone(),
            Arc::new(InMemoryAuditRepository::default()),
            Arc::new(RecordingEmailDispatcher::default()),
            QuoteMailer::new("Open Shield Group", "quotes@osg.test").expect("mailer"),
        );
        let quote = service.create(sample_create_request(), "req-1").await.expect("create");
        let sent = service.send(&quote.id, "req-2").await.expect("send");

        let stale = QuoteService::new(
            Arc::new(FrozenReads { inner: quotes.clone(), snapshot: sent.clone() }),
            harness.settings.clone(),
            Arc::new(InMemoryAuditRepository::default()),
            Arc::new(RecordingEmailDispatcher::default()),
            QuoteMailer::new("Open Shield Group", "quotes@osg.test").expect("mailer"),
        );
        service.accept(&sent.id, "req-3").await.expect("accept");

        let error = decline_quote(
            State(ApiState { service: Arc::new(stale) }),
            HeaderMap::new(),
            Path(sent.id.0.clone()),
        )
        .await
        .expect_err("stale decline");

        assert_eq!(error.0, StatusCode::CONFLICT);
        let stored = quotes.find_by_id(&sent.id).await.expect("find").expect("present");
        assert_eq!(stored.status, QuoteStatus::Accepted);
    }

    #[tokio::test]
    async fn expire_stale_only_touches_open_quotes_past_validity() {
        let harness = harness().await;
        let open = harness.service.create(sample_create_request(), "req-1").await.expect("open");
        let decided =
            harness.service.create(sample_create_request(), "req-2").await.expect("decided");
        harness.service.send(&decided.id, "req-3").await.expect("send");
        harness.service.decline(&decided.id, "req-4").await.expect("decline");

        let before = harness
            .service
            .expire_stale(Utc::now().date_naive(), "req-5")
            .await
            .expect("nothing stale");
        assert!(before.is_empty());

        let later = open.valid_until + Days::new(1);
        let expired = harness.service.expire_stale(later, "req-6").await.expect("expire");

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, open.id);
        assert_eq!(harness.service.get(&open.id).await.expect("get").status, QuoteStatus::Expired);
        assert_eq!(
            harness.service.get(&decided.id).await.expect("get").status,
            QuoteStatus::Declined
        );
        assert!(harness.audit.sink().event_types().contains(&QUOTE_EXPIRED.to_string()));
    }

    #[tokio::test]
    async fn list_filters_and_searches() {
        let harness = harness().await;
        let summit = harness.service.create(sample_create_request(), "req-1").await.expect("a");
        let mut other = sample_create_request();
        other.client.name = "Harbor Gala".to_string();
        other.client.email = "gala@harbor.test".to_string();
        harness.service.create(other, "req-2").await.expect("b");
        harness.service.send(&summit.id, "req-3").await.expect("send");
        let today = Utc::now().date_naive();

        let all = harness.service.list(StatusFilter::All, "", today).await.expect("all");
        let sent = harness
            .service
            .list(StatusFilter::Only(QuoteStatus::Sent), "", today)
            .await
            .expect("sent");
        let harbor = harness.service.list(StatusFilter::All, "HARBOR", today).await.expect("search");
        let stats = harness.service.stats(today).await.expect("stats");

        assert_eq!(all.len(), 2);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, summit.id);
        assert_eq!(harbor.len(), 1);
        assert_eq!(harbor[0].client.name, "Harbor Gala");
        assert_eq!((stats.total, stats.draft, stats.sent), (2, 1, 1));
    }

    #[tokio::test]
    async fn delete_removes_quote_and_records_event() {
        let harness = harness().await;
        let quote = harness.service.create(sample_create_request(), "req-1").await.expect("create");

        harness.service.delete(&quote.id, "req-2").await.expect("delete");

        let missing = harness.service.get(&quote.id).await.expect_err("gone");
        assert!(matches!(missing, ApplicationError::QuoteNotFound(_)));
        let again = harness.service.delete(&quote.id, "req-3").await.expect_err("gone");
        assert!(matches!(again, ApplicationError::QuoteNotFound(_)));
        let events = harness.audit.list_for_quote(&quote.id).await.expect("events");
        assert_eq!(events.last().map(|event| event.event_type.as_str()), Some(QUOTE_DELETED));
    }

    #[tokio::test]
    async fn missing_catalog_is_a_configuration_error() {
        let service = QuoteService::new(
            Arc::new(InMemoryQuoteRepository::default()),
            Arc::new(InMemorySettingsRepository::default()),
            Arc::new(InMemoryAuditRepository::default()),
            Arc::new(RecordingEmailDispatcher::default()),
            QuoteMailer::new("Open Shield Group", "quotes@osg.test").expect("mailer"),
        );

        let error = service.preview(&sample_request()).await.expect_err("no catalog");

        assert!(matches!(error, ApplicationError::Configuration(_)));
    }

    #[tokio::test]
    async fn preview_handler_returns_breakdown_with_display_totals() {
        let harness = harness().await;

        let Json(response) = preview_quote(
            State(ApiState { service: harness.service.clone() }),
            HeaderMap::new(),
            Json(sample_request()),
        )
        .await
        .expect("preview");

        assert_eq!(response.breakdown.subtotal, Decimal::from(3605));
        assert_eq!(response.display.total, "$3,866.36");
        assert_eq!(response.display.tax_amount, "$261.36");
    }

    #[tokio::test]
    async fn handlers_map_errors_to_status_codes() {
        let harness = harness().await;
        let state = State(ApiState { service: harness.service.clone() });
        let mut headers = HeaderMap::new();
        headers.insert("x-correlation-id", HeaderValue::from_static("req-abc"));

        let missing = get_quote(state.clone(), headers.clone(), Path("nope".to_string()))
            .await
            .expect_err("not found");
        assert_eq!(missing.0, StatusCode::NOT_FOUND);
        assert_eq!(missing.1.correlation_id, "req-abc");

        let mut request = sample_request();
        request.personnel.push(PersonnelSelection::new("sniper", 1));
        let bad = preview_quote(state.clone(), headers.clone(), Json(request))
            .await
            .expect_err("bad request");
        assert_eq!(bad.0, StatusCode::BAD_REQUEST);
        assert!(bad.1.error.contains("sniper"));

        let bad_filter = list_quotes(
            state.clone(),
            headers.clone(),
            Query(ListQuery { status: Some("archived".to_string()), q: None }),
        )
        .await
        .expect_err("unknown status");
        assert_eq!(bad_filter.0, StatusCode::BAD_REQUEST);

        let mut catalog = harness.service.catalog().await.expect("catalog");
        catalog.position_rates.remove(&PositionId::new("agent"));
        harness.service.save_catalog(catalog, "req-cat").await.expect("save");
        let unpriced = create_quote(state, headers, Json(sample_create_request()))
            .await
            .expect_err("unknown agent rate");
        assert_eq!(unpriced.0, StatusCode::BAD_REQUEST);
        assert!(unpriced.1.error.contains("agent"));
    }

    #[tokio::test]
    async fn send_handler_reports_unavailable_provider() {
        let email = RecordingEmailDispatcher::failing(EmailError::Transport("timeout".to_string()));
        let harness = harness_with_email(email).await;
        let quote = harness.service.create(sample_create_request(), "req-1").await.expect("create");

        let error = send_quote(
            State(ApiState { service: harness.service.clone() }),
            HeaderMap::new(),
            Path(quote.id.0.clone()),
        )
        .await
        .expect_err("provider down");

        assert_eq!(error.0, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!error.1.correlation_id.is_empty());
    }
}
