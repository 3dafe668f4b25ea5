use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::service::{AddonId, PositionId, ServiceId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Human-readable quote identifier: `{prefix}-{year}-{sequence:03}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteNumber(pub String);

impl QuoteNumber {
    pub fn new(prefix: &str, year: i32, sequence: u32) -> Self {
        Self(format!("{}-{year}-{sequence:03}", prefix.trim()))
    }

    /// Number derived from the quotes visible in the current session. Two sessions working from
    /// the same stale count produce the same number; the store's unique constraint is the
    /// authority.
    pub fn next_in_session(prefix: &str, year: i32, existing_count: usize) -> Self {
        let sequence = u32::try_from(existing_count).unwrap_or(u32::MAX - 1) + 1;
        Self::new(prefix, year, sequence)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric suffix after the last `-`, so `OSG-2026-1000` sorts after `OSG-2026-999`.
    pub fn sequence(&self) -> Option<u32> {
        self.0.rsplit_once('-').and_then(|(_, suffix)| suffix.parse().ok())
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    Draft,
    Sent,
    Accepted,
    Declined,
    Expired,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 5] =
        [Self::Draft, Self::Sent, Self::Accepted, Self::Declined, Self::Expired];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Declined | Self::Expired)
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "sent" => Ok(Self::Sent),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            other => Err(DomainError::InvalidInput(format!(
                "unknown quote status `{other}` (expected draft|sent|accepted|declined|expired)"
            ))),
        }
    }
}

/// Where the applied tax rate came from. Shown to the operator next to the rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxSource {
    Override,
    State,
    Default,
}

impl TaxSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::State => "state",
            Self::Default => "default",
        }
    }
}

impl FromStr for TaxSource {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "override" => Ok(Self::Override),
            "state" => Ok(Self::State),
            "default" => Ok(Self::Default),
            other => Err(DomainError::InvalidInput(format!("unknown tax source `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonnelLine {
    pub position_id: PositionId,
    pub label: String,
    pub count: u32,
    pub hourly_rate: Decimal,
    pub hours: Decimal,
    pub line_total: Decimal,
}

impl PersonnelLine {
    /// `count * hourly_rate * hours`. A product outside the decimal range is `InvalidInput`.
    pub fn new(
        position_id: PositionId,
        label: impl Into<String>,
        count: u32,
        hourly_rate: Decimal,
        hours: Decimal,
    ) -> Result<Self, DomainError> {
        let line_total = Decimal::from(count)
            .checked_mul(hourly_rate)
            .and_then(|amount| amount.checked_mul(hours))
            .ok_or_else(|| {
                DomainError::InvalidInput(format!(
                    "line total for `{position_id}` ({count} x {hourly_rate} x {hours} hrs) is out of range"
                ))
            })?;
        Ok(Self { position_id, label: label.into(), count, hourly_rate, hours, line_total })
    }

    pub fn description(&self) -> String {
        format!("{} ({} x {} hrs)", self.label, self.count, self.hours.normalize())
    }
}

/// Add-on as issued on a quote. The price is copied from the catalog at creation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonLine {
    pub addon_id: AddonId,
    pub name: String,
    pub unit: String,
    pub price: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotePricing {
    pub personnel_lines: Vec<PersonnelLine>,
    pub addon_lines: Vec<AddonLine>,
    pub personnel_cost: Decimal,
    pub addons_cost: Decimal,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_source: TaxSource,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedTotals {
    pub personnel_cost: Decimal,
    pub addons_cost: Decimal,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

impl QuotePricing {
    /// Recomputes every total from the stored lines and rate.
    pub fn rederive(&self) -> DerivedTotals {
        let personnel_cost = self
            .personnel_lines
            .iter()
            .map(|line| Decimal::from(line.count) * line.hourly_rate * line.hours)
            .sum::<Decimal>();
        let addons_cost = self.addon_lines.iter().map(|line| line.price).sum::<Decimal>();
        let subtotal = personnel_cost + addons_cost;
        let tax_amount = subtotal * self.tax_rate;

        DerivedTotals {
            personnel_cost,
            addons_cost,
            subtotal,
            tax_amount,
            total: subtotal + tax_amount,
        }
    }

    pub fn is_consistent(&self) -> bool {
        let derived = self.rederive();
        derived.personnel_cost == self.personnel_cost
            && derived.addons_cost == self.addons_cost
            && derived.subtotal == self.subtotal
            && derived.tax_amount == self.tax_amount
            && derived.total == self.total
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDetails {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    /// Two-letter jurisdiction code, or empty when unknown.
    #[serde(default)]
    pub state: String,
}

impl ClientDetails {
    pub fn normalized_state(&self) -> String {
        self.state.trim().to_ascii_uppercase()
    }
}

/// A fully priced quote that has not been persisted yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuote {
    pub quote_number: QuoteNumber,
    pub contact_id: Option<String>,
    pub client: ClientDetails,
    pub service_id: ServiceId,
    pub event_date: Option<NaiveDate>,
    pub duration_hours: Decimal,
    pub expected_attendance: Option<u32>,
    pub pricing: QuotePricing,
    pub payment_terms: String,
    pub valid_until: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl NewQuote {
    pub fn into_quote(self, id: QuoteId) -> Quote {
        Quote {
            id,
            quote_number: self.quote_number,
            contact_id: self.contact_id,
            client: self.client,
            service_id: self.service_id,
            event_date: self.event_date,
            duration_hours: self.duration_hours,
            expected_attendance: self.expected_attendance,
            pricing: self.pricing,
            payment_terms: self.payment_terms,
            valid_until: self.valid_until,
            status: QuoteStatus::Draft,
            sent_at: None,
            decided_at: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub quote_number: QuoteNumber,
    pub contact_id: Option<String>,
    pub client: ClientDetails,
    pub service_id: ServiceId,
    pub event_date: Option<NaiveDate>,
    pub duration_hours: Decimal,
    pub expected_attendance: Option<u32>,
    pub pricing: QuotePricing,
    pub payment_terms: String,
    pub valid_until: NaiveDate,
    pub status: QuoteStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        matches!(
            (self.status, next),
            (QuoteStatus::Draft, QuoteStatus::Sent)
                | (QuoteStatus::Sent, QuoteStatus::Accepted)
                | (QuoteStatus::Sent, QuoteStatus::Declined)
                | (QuoteStatus::Draft, QuoteStatus::Expired)
                | (QuoteStatus::Sent, QuoteStatus::Expired)
        )
    }

    pub fn transition_to(
        &mut self,
        next: QuoteStatus,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidQuoteTransition { from: self.status, to: next });
        }

        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    /// Records a successful delivery. Call only after the email went out.
    pub fn mark_sent(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(QuoteStatus::Sent, at)?;
        self.sent_at = Some(at);
        Ok(())
    }

    pub fn accept(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(QuoteStatus::Accepted, at)?;
        self.decided_at = Some(at);
        Ok(())
    }

    pub fn decline(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(QuoteStatus::Declined, at)?;
        self.decided_at = Some(at);
        Ok(())
    }

    pub fn expire(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition_to(QuoteStatus::Expired, at)
    }

    pub fn is_past_validity(&self, today: NaiveDate) -> bool {
        today > self.valid_until
    }

    /// Status as displayed: open quotes past `valid_until` read as expired without being
    /// rewritten in the store.
    pub fn effective_status(&self, today: NaiveDate) -> QuoteStatus {
        match self.status {
            QuoteStatus::Draft | QuoteStatus::Sent if self.is_past_validity(today) => {
                QuoteStatus::Expired
            }
            status => status,
        }
    }
}
