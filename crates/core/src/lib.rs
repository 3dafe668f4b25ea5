pub mod audit;
pub mod config;
pub mod cpq;
pub mod domain;
pub mod errors;
pub mod notify;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use cpq::board::{QuoteStats, StatusFilter};
pub use cpq::builder::{QuoteDefaults, QuoteRecordBuilder, ServiceDetails};
pub use cpq::catalog::RateCatalog;
pub use cpq::pricing::{
    format_usd, DeterministicPricingEngine, PersonnelSelection, PricingBreakdown, PricingEngine,
    PricingRequest,
};
pub use cpq::{CpqRuntime, DeterministicCpqRuntime, DraftQuote, DraftQuoteInput};
pub use domain::inquiry::InquiryDetails;
pub use domain::quote::{
    AddonLine, ClientDetails, NewQuote, PersonnelLine, Quote, QuoteId, QuoteNumber, QuotePricing,
    QuoteStatus, TaxSource,
};
pub use domain::service::{AddonId, AddonOffering, PositionId, ServiceId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use notify::{EmailDispatcher, EmailError, EmailMessage, RecordingEmailDispatcher};
