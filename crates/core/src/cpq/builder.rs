use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::catalog::RateCatalog;
use crate::cpq::pricing::PricingBreakdown;
use crate::domain::inquiry::InquiryDetails;
use crate::domain::quote::{ClientDetails, NewQuote, QuoteNumber, TaxSource};
use crate::domain::service::{AddonId, PositionId, ServiceId};
use crate::errors::DomainError;

pub const FALLBACK_DURATION_HOURS: u32 = 8;

/// Service-side metadata recorded on the quote next to the price.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDetails {
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub event_date: Option<NaiveDate>,
    #[serde(default)]
    pub expected_attendance: Option<u32>,
    /// Free text is allowed; the first catalog option is used when absent.
    #[serde(default)]
    pub payment_terms: Option<String>,
}

/// Turns a price breakdown into a persistable quote. Performs no I/O.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuoteRecordBuilder;

impl QuoteRecordBuilder {
    pub fn build(
        &self,
        catalog: &RateCatalog,
        breakdown: &PricingBreakdown,
        client: ClientDetails,
        service: ServiceDetails,
        sequence: u32,
        created_at: DateTime<Utc>,
    ) -> Result<NewQuote, DomainError> {
        if client.name.trim().is_empty() {
            return Err(DomainError::InvalidInput("client name is required".to_string()));
        }
        if sequence == 0 {
            return Err(DomainError::InvalidInput("quote sequence starts at 1".to_string()));
        }

        let client_state = client.normalized_state();
        if client_state != breakdown.client_state {
            return Err(DomainError::InvalidInput(format!(
                "client state `{client_state}` does not match the priced jurisdiction `{}`",
                breakdown.client_state
            )));
        }

        let pricing = breakdown.to_quote_pricing();
        if !pricing.is_consistent() {
            return Err(DomainError::InvariantViolation(
                "breakdown totals do not match its lines".to_string(),
            ));
        }

        let quote_number =
            QuoteNumber::new(&catalog.quote_number_prefix, created_at.year(), sequence);
        let valid_until = created_at
            .date_naive()
            .checked_add_days(Days::new(u64::from(catalog.validity_days)))
            .ok_or_else(|| {
                DomainError::InvalidInput(format!(
                    "validity of {} days overflows the calendar",
                    catalog.validity_days
                ))
            })?;
        let payment_terms = service
            .payment_terms
            .map(|terms| terms.trim().to_string())
            .filter(|terms| !terms.is_empty())
            .or_else(|| catalog.default_payment_terms().map(str::to_string))
            .unwrap_or_default();

        let client = ClientDetails {
            name: client.name.trim().to_string(),
            email: client.email.trim().to_string(),
            phone: client.phone.trim().to_string(),
            state: client_state,
        };

        Ok(NewQuote {
            quote_number,
            contact_id: service.contact_id,
            client,
            service_id: breakdown.service_id.clone(),
            event_date: service.event_date,
            duration_hours: breakdown.duration_hours,
            expected_attendance: service.expected_attendance,
            pricing,
            payment_terms,
            valid_until,
            created_at,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRate {
    pub position_id: PositionId,
    pub label: String,
    pub hourly_rate: Decimal,
}

/// Starting values for the quote form, derived from the catalog and an inquiry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteDefaults {
    pub service_id: ServiceId,
    pub service_name: String,
    pub duration_hours: Decimal,
    pub event_date: Option<NaiveDate>,
    pub expected_attendance: Option<u32>,
    pub addons: Vec<AddonId>,
    pub positions: Vec<PositionRate>,
    pub tax_rate: Decimal,
    pub tax_source: TaxSource,
    pub payment_terms: Option<String>,
    pub valid_until: NaiveDate,
}

impl QuoteDefaults {
    pub fn for_inquiry(
        catalog: &RateCatalog,
        service_id: &ServiceId,
        client_state: &str,
        details: &InquiryDetails,
        today: NaiveDate,
    ) -> Self {
        let duration_hours = details
            .event_duration_hours
            .or_else(|| catalog.default_duration_hours(service_id).map(Decimal::from))
            .unwrap_or_else(|| Decimal::from(FALLBACK_DURATION_HOURS));
        let addons = details
            .addons
            .iter()
            .filter(|addon_id| catalog.addon(service_id, addon_id).is_some())
            .cloned()
            .collect();
        let positions = catalog
            .position_rates
            .iter()
            .map(|(position_id, rate)| PositionRate {
                position_id: position_id.clone(),
                label: catalog.position_label(position_id).to_string(),
                hourly_rate: *rate,
            })
            .collect();
        let (tax_rate, tax_source) = match catalog.state_tax_rate(client_state) {
            Some(rate) => (rate, TaxSource::State),
            None => (catalog.default_tax_rate, TaxSource::Default),
        };

        Self {
            service_id: service_id.clone(),
            service_name: catalog.service_name(service_id).to_string(),
            duration_hours,
            event_date: details.event_date,
            expected_attendance: details.expected_attendance,
            addons,
            positions,
            tax_rate,
            tax_source,
            payment_terms: catalog.default_payment_terms().map(str::to_string),
            valid_until: today
                .checked_add_days(Days::new(u64::from(catalog.validity_days)))
                .unwrap_or(today),
        }
    }
}
