//! Rate catalog administration and quote-form defaults.
//!
//! - `GET /api/v1/settings/rate-catalog`
//! - `PUT /api/v1/settings/rate-catalog`
//! - `PUT /api/v1/settings/position-rates/{position_id}`
//! - `PUT /api/v1/settings/state-tax-rates/{state}`
//! - `PUT /api/v1/settings/service-durations/{service_id}`
//! - `POST /api/v1/settings/payment-terms`
//! - `DELETE /api/v1/settings/payment-terms/{index}`
//! - `POST /api/v1/settings/services/{service_id}/addons`
//! - `PUT /api/v1/settings/services/{service_id}/addons/{addon_id}`
//! - `DELETE /api/v1/settings/services/{service_id}/addons/{addon_id}`
//! - `GET /api/v1/quote-defaults?service=&state=&message=`
//!
//! Every edit returns the saved catalog.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use guardquote_core::cpq::builder::QuoteDefaults;
use guardquote_core::cpq::catalog::RateCatalog;
use guardquote_core::domain::service::{AddonId, PositionId, ServiceId};
use guardquote_core::errors::DomainError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::quotes::{api_error, correlation_id, ApiResult, ApiState, QuoteService};

#[derive(Debug, Default, Deserialize)]
pub struct QuoteDefaultsQuery {
    pub service: String,
    #[serde(default)]
    pub state: String,
    /// Inquiry message; a `--- Service Details ---` block in it prefills the form.
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RateUpdate {
    pub rate: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct DurationUpdate {
    pub hours: u32,
}

#[derive(Debug, Deserialize)]
pub struct PaymentTermRequest {
    pub term: String,
}

#[derive(Debug, Deserialize)]
pub struct AddonRequest {
    pub name: String,
    pub price: Decimal,
    /// Blank falls back to `per unit`.
    #[serde(default)]
    pub unit: String,
}

/// Omitted or blank fields keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct AddonPatch {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub unit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddonCreated {
    pub addon_id: AddonId,
    pub catalog: RateCatalog,
}

pub fn router(service: Arc<QuoteService>) -> Router {
    Router::new()
        .route("/api/v1/settings/rate-catalog", get(get_rate_catalog).put(put_rate_catalog))
        .route("/api/v1/settings/position-rates/{position_id}", put(put_position_rate))
        .route("/api/v1/settings/state-tax-rates/{state}", put(put_state_tax_rate))
        .route("/api/v1/settings/service-durations/{service_id}", put(put_service_duration))
        .route("/api/v1/settings/payment-terms", post(add_payment_term))
        .route("/api/v1/settings/payment-terms/{index}", delete(remove_payment_term))
        .route("/api/v1/settings/services/{service_id}/addons", post(add_addon))
        .route(
            "/api/v1/settings/services/{service_id}/addons/{addon_id}",
            put(update_addon).delete(remove_addon),
        )
        .route("/api/v1/quote-defaults", get(quote_defaults))
        .with_state(ApiState { service })
}

pub async fn get_rate_catalog(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<RateCatalog>> {
    let correlation_id = correlation_id(&headers);
    let catalog = state.service.catalog().await.map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(catalog))
}

pub async fn put_rate_catalog(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(catalog): Json<RateCatalog>,
) -> ApiResult<Json<RateCatalog>> {
    let correlation_id = correlation_id(&headers);
    let saved = state
        .service
        .save_catalog(catalog, &correlation_id)
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(saved))
}

async fn edit<T, F>(state: &ApiState, headers: &HeaderMap, apply: F) -> ApiResult<(RateCatalog, T)>
where
    F: FnOnce(&mut RateCatalog) -> Result<T, DomainError>,
{
    let correlation_id = correlation_id(headers);
    state
        .service
        .edit_catalog(&correlation_id, apply)
        .await
        .map_err(|e| api_error(e, &correlation_id))
}

pub async fn put_position_rate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(position_id): Path<String>,
    Json(update): Json<RateUpdate>,
) -> ApiResult<Json<RateCatalog>> {
    let (saved, ()) = edit(&state, &headers, |catalog| {
        catalog.set_position_rate(PositionId::new(position_id.trim()), update.rate)
    })
    .await?;
    Ok(Json(saved))
}

pub async fn put_state_tax_rate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(jurisdiction): Path<String>,
    Json(update): Json<RateUpdate>,
) -> ApiResult<Json<RateCatalog>> {
    let (saved, ()) =
        edit(&state, &headers, |catalog| catalog.set_state_tax_rate(&jurisdiction, update.rate))
            .await?;
    Ok(Json(saved))
}

pub async fn put_service_duration(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Json(update): Json<DurationUpdate>,
) -> ApiResult<Json<RateCatalog>> {
    let (saved, ()) = edit(&state, &headers, |catalog| {
        let service_id = ServiceId::new(service_id.trim());
        if !catalog.offers_service(&service_id) {
            return Err(DomainError::UnknownService(service_id.to_string()));
        }
        catalog.set_service_duration(service_id, update.hours)
    })
    .await?;
    Ok(Json(saved))
}

pub async fn add_payment_term(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<PaymentTermRequest>,
) -> ApiResult<Json<RateCatalog>> {
    let (saved, ()) =
        edit(&state, &headers, |catalog| catalog.add_payment_term(&request.term)).await?;
    Ok(Json(saved))
}

/// Removes the option at `index`; the first remaining option becomes the default.
pub async fn remove_payment_term(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(index): Path<usize>,
) -> ApiResult<Json<RateCatalog>> {
    let (saved, _) = edit(&state, &headers, |catalog| {
        catalog.remove_payment_term(index).ok_or_else(|| {
            DomainError::InvalidInput(format!("no payment term at position {index}"))
        })
    })
    .await?;
    Ok(Json(saved))
}

pub async fn add_addon(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(service_id): Path<String>,
    Json(request): Json<AddonRequest>,
) -> ApiResult<Json<AddonCreated>> {
    let (catalog, addon_id) = edit(&state, &headers, |catalog| {
        let service_id = ServiceId::new(service_id.trim());
        if !catalog.offers_service(&service_id) {
            return Err(DomainError::UnknownService(service_id.to_string()));
        }
        catalog.add_addon(&service_id, &request.name, request.price, &request.unit)
    })
    .await?;
    Ok(Json(AddonCreated { addon_id, catalog }))
}

pub async fn update_addon(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((service_id, addon_id)): Path<(String, String)>,
    Json(patch): Json<AddonPatch>,
) -> ApiResult<Json<RateCatalog>> {
    let (saved, ()) = edit(&state, &headers, |catalog| {
        catalog.update_addon(
            &ServiceId::new(service_id.trim()),
            &AddonId::new(addon_id.trim()),
            patch.name.as_deref(),
            patch.price,
            patch.unit.as_deref(),
        )
    })
    .await?;
    Ok(Json(saved))
}

pub async fn remove_addon(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((service_id, addon_id)): Path<(String, String)>,
) -> ApiResult<Json<RateCatalog>> {
    let (saved, ()) = edit(&state, &headers, |catalog| {
        let service_id = ServiceId::new(service_id.trim());
        let addon_id = AddonId::new(addon_id.trim());
        if catalog.remove_addon(&service_id, &addon_id) {
            Ok(())
        } else {
            Err(DomainError::UnknownAddon {
                service_id: service_id.to_string(),
                addon_id: addon_id.to_string(),
            })
        }
    })
    .await?;
    Ok(Json(saved))
}

pub async fn quote_defaults(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<QuoteDefaultsQuery>,
) -> ApiResult<Json<QuoteDefaults>> {
    let correlation_id = correlation_id(&headers);
    let defaults = state
        .service
        .quote_defaults(
            &ServiceId::new(query.service.trim()),
            &query.state,
            &query.message,
            Utc::now().date_naive(),
        )
        .await
        .map_err(|e| api_error(e, &correlation_id))?;
    Ok(Json(defaults))
}
