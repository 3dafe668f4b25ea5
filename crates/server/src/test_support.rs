use std::sync::Arc;

use chrono::{TimeZone, Utc};
use guardquote_core::cpq::builder::{QuoteRecordBuilder, ServiceDetails};
use guardquote_core::cpq::catalog::RateCatalog;
use guardquote_core::cpq::pricing::{price_request, PersonnelSelection, PricingRequest};
use guardquote_core::domain::quote::{ClientDetails, Quote, QuoteId};
use guardquote_core::domain::service::{AddonId, ServiceId};
use guardquote_core::notify::RecordingEmailDispatcher;
use guardquote_db::{
    InMemoryAuditRepository, InMemoryQuoteRepository, InMemorySettingsRepository,
    SettingsRepository,
};
use rust_decimal::Decimal;

use crate::email::QuoteMailer;
use crate::quotes::{CreateQuoteRequest, QuoteService};

/// Ten agents and two safety supervisors for eight hours in CA, with a radio: $3,866.36.
pub fn sample_request() -> PricingRequest {
    PricingRequest {
        service_id: ServiceId::new("event-security"),
        duration_hours: Decimal::from(8),
        personnel: vec![
            PersonnelSelection::new("agent", 10),
            PersonnelSelection::new("safety-supervisor", 2),
        ],
        addons: vec![AddonId::new("radio")],
        client_state: "CA".to_string(),
        tax_rate_override: None,
    }
}

pub fn sample_client() -> ClientDetails {
    ClientDetails {
        name: "Summit Events".to_string(),
        email: "events@summit.test".to_string(),
        phone: "555-0100".to_string(),
        state: "ca".to_string(),
    }
}

pub fn sample_create_request() -> CreateQuoteRequest {
    CreateQuoteRequest {
        pricing: sample_request(),
        client: sample_client(),
        service: ServiceDetails::default(),
    }
}

pub fn sample_quote() -> Quote {
    let catalog = RateCatalog::default();
    let breakdown = price_request(&catalog, &sample_request()).expect("sample prices");
    let created_at = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).single().expect("timestamp");

    QuoteRecordBuilder
        .build(&catalog, &breakdown, sample_client(), ServiceDetails::default(), 1, created_at)
        .expect("sample builds")
        .into_quote(QuoteId::new("q-sample"))
}

pub struct TestHarness {
    pub service: Arc<QuoteService>,
    pub email: RecordingEmailDispatcher,
    pub audit: InMemoryAuditRepository,
    pub settings: Arc<InMemorySettingsRepository>,
}

pub async fn harness() -> TestHarness {
    harness_with_email(RecordingEmailDispatcher::default()).await
}

pub async fn harness_with_email(email: RecordingEmailDispatcher) -> TestHarness {
    let settings = Arc::new(InMemorySettingsRepository::default());
    settings.save_rate_catalog(&RateCatalog::default()).await.expect("seed catalog");
    let audit = InMemoryAuditRepository::default();

    let service = QuoteService::new(
        Arc::new(InMemoryQuoteRepository::default()),
        settings.clone(),
        Arc::new(audit.clone()),
        Arc::new(email.clone()),
        QuoteMailer::new("Open Shield Group", "quotes@osg.test").expect("mailer"),
    );

    TestHarness { service: Arc::new(service), email, audit, settings }
}
