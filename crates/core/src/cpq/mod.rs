pub mod board;
pub mod builder;
pub mod catalog;
pub mod pricing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quote::{ClientDetails, NewQuote};
use crate::errors::DomainError;

use self::{
    builder::{QuoteRecordBuilder, ServiceDetails},
    catalog::RateCatalog,
    pricing::{DeterministicPricingEngine, PricingBreakdown, PricingEngine, PricingRequest},
};

#[derive(Clone, Debug)]
pub struct DraftQuoteInput<'a> {
    pub catalog: &'a RateCatalog,
    pub request: &'a PricingRequest,
    pub client: ClientDetails,
    pub service: ServiceDetails,
    pub sequence: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftQuote {
    pub breakdown: PricingBreakdown,
    pub quote: NewQuote,
}

pub trait CpqRuntime: Send + Sync {
    fn preview(
        &self,
        catalog: &RateCatalog,
        request: &PricingRequest,
    ) -> Result<PricingBreakdown, DomainError>;

    fn draft_quote(&self, input: DraftQuoteInput<'_>) -> Result<DraftQuote, DomainError>;
}

pub struct DeterministicCpqRuntime<P> {
    pricing_engine: P,
    builder: QuoteRecordBuilder,
}

impl<P> DeterministicCpqRuntime<P> {
    pub fn new(pricing_engine: P) -> Self {
        Self { pricing_engine, builder: QuoteRecordBuilder }
    }
}

impl Default for DeterministicCpqRuntime<DeterministicPricingEngine> {
    fn default() -> Self {
        Self::new(DeterministicPricingEngine)
    }
}

impl<P> CpqRuntime for DeterministicCpqRuntime<P>
where
    P: PricingEngine,
{
    fn preview(
        &self,
        catalog: &RateCatalog,
        request: &PricingRequest,
    ) -> Result<PricingBreakdown, DomainError> {
        catalog.validate()?;
        self.pricing_engine.price(catalog, request)
    }

    /// Tax follows the client's state. When only one of the request and the client names a
    /// state, the other adopts it; two different states are rejected by the builder.
    fn draft_quote(&self, input: DraftQuoteInput<'_>) -> Result<DraftQuote, DomainError> {
        let mut client = input.client;
        let mut request = input.request.clone();
        if request.client_state.trim().is_empty() {
            request.client_state = client.state.clone();
        } else if client.state.trim().is_empty() {
            client.state = request.client_state.clone();
        }

        let breakdown = self.preview(input.catalog, &request)?;
        let quote = self.builder.build(
            input.catalog,
            &breakdown,
            client,
            input.service,
            input.sequence,
            input.created_at,
        )?;

        Ok(DraftQuote { breakdown, quote })
    }
}
