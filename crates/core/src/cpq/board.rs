//! Listing helpers for the quote board: status filter, free-text search and summary stats.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::cpq::catalog::RateCatalog;
use crate::domain::quote::{Quote, QuoteStatus};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Only(QuoteStatus),
}

impl StatusFilter {
    /// Matches against the status as displayed, so stale open quotes count as expired.
    pub fn matches(self, quote: &Quote, today: NaiveDate) -> bool {
        match self {
            Self::All => true,
            Self::Only(status) => quote.effective_status(today) == status,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = DomainError;

    /// `pending` is the dashboard's name for drafts.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "pending" => Ok(Self::Only(QuoteStatus::Draft)),
            other => other.parse().map(Self::Only),
        }
    }
}

pub fn filter_by_status(quotes: &[Quote], filter: StatusFilter, today: NaiveDate) -> Vec<&Quote> {
    quotes.iter().filter(|quote| filter.matches(quote, today)).collect()
}

/// Case-insensitive match on quote number, client name, client email and service name.
pub fn search<'a>(quotes: &[&'a Quote], catalog: &RateCatalog, term: &str) -> Vec<&'a Quote> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return quotes.to_vec();
    }

    quotes
        .iter()
        .copied()
        .filter(|quote| {
            quote.quote_number.as_str().to_lowercase().contains(&needle)
                || quote.client.name.to_lowercase().contains(&needle)
                || quote.client.email.to_lowercase().contains(&needle)
                || catalog.service_name(&quote.service_id).to_lowercase().contains(&needle)
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteStats {
    pub total: usize,
    pub draft: usize,
    pub sent: usize,
    pub accepted: usize,
    pub declined: usize,
    pub expired: usize,
    pub accepted_revenue: Decimal,
}

impl QuoteStats {
    pub fn collect<'a>(quotes: impl IntoIterator<Item = &'a Quote>, today: NaiveDate) -> Self {
        let mut stats = Self::default();
        for quote in quotes {
            stats.total += 1;
            match quote.effective_status(today) {
                QuoteStatus::Draft => stats.draft += 1,
                QuoteStatus::Sent => stats.sent += 1,
                QuoteStatus::Accepted => {
                    stats.accepted += 1;
                    stats.accepted_revenue += quote.pricing.total;
                }
                QuoteStatus::Declined => stats.declined += 1,
                QuoteStatus::Expired => stats.expired += 1,
            }
        }
        stats
    }
}
