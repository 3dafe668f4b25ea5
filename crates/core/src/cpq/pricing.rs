use std::collections::BTreeSet;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::cpq::catalog::RateCatalog;
use crate::domain::quote::{AddonLine, PersonnelLine, QuotePricing, TaxSource};
use crate::domain::service::{AddonId, PositionId, ServiceId};
use crate::errors::DomainError;

pub const CURRENCY: &str = "USD";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonnelSelection {
    pub position_id: PositionId,
    pub count: u32,
    /// Used verbatim instead of the catalog rate when present.
    #[serde(default)]
    pub rate_override: Option<Decimal>,
}

impl PersonnelSelection {
    pub fn new(position_id: impl Into<String>, count: u32) -> Self {
        Self { position_id: PositionId::new(position_id), count, rate_override: None }
    }

    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.rate_override = Some(rate);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRequest {
    pub service_id: ServiceId,
    pub duration_hours: Decimal,
    #[serde(default)]
    pub personnel: Vec<PersonnelSelection>,
    #[serde(default)]
    pub addons: Vec<AddonId>,
    #[serde(default)]
    pub client_state: String,
    #[serde(default)]
    pub tax_rate_override: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTrace {
    pub service_id: ServiceId,
    pub currency: String,
    pub steps: Vec<PricingTraceStep>,
}

impl PricingTrace {
    fn step(&mut self, stage: &str, detail: String, amount: Decimal) {
        self.steps.push(PricingTraceStep { stage: stage.to_string(), detail, amount });
    }
}

/// Fully itemized, unrounded price of a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub service_id: ServiceId,
    pub duration_hours: Decimal,
    pub personnel_lines: Vec<PersonnelLine>,
    pub addon_lines: Vec<AddonLine>,
    pub personnel_cost: Decimal,
    pub addons_cost: Decimal,
    pub subtotal: Decimal,
    /// Upper-cased jurisdiction the request was priced for; empty when none was given.
    #[serde(default)]
    pub client_state: String,
    pub tax_rate: Decimal,
    pub tax_source: TaxSource,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub trace: PricingTrace,
}

impl PricingBreakdown {
    pub fn to_quote_pricing(&self) -> QuotePricing {
        QuotePricing {
            personnel_lines: self.personnel_lines.clone(),
            addon_lines: self.addon_lines.clone(),
            personnel_cost: self.personnel_cost,
            addons_cost: self.addons_cost,
            subtotal: self.subtotal,
            tax_rate: self.tax_rate,
            tax_source: self.tax_source,
            tax_amount: self.tax_amount,
            total: self.total,
        }
    }
}

pub trait PricingEngine: Send + Sync {
    fn price(
        &self,
        catalog: &RateCatalog,
        request: &PricingRequest,
    ) -> Result<PricingBreakdown, DomainError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DeterministicPricingEngine;

impl PricingEngine for DeterministicPricingEngine {
    fn price(
        &self,
        catalog: &RateCatalog,
        request: &PricingRequest,
    ) -> Result<PricingBreakdown, DomainError> {
        price_request(catalog, request)
    }
}

pub fn price_request(
    catalog: &RateCatalog,
    request: &PricingRequest,
) -> Result<PricingBreakdown, DomainError> {
    if request.duration_hours <= Decimal::ZERO {
        return Err(DomainError::InvalidInput(format!(
            "duration must be greater than zero hours, got {}",
            request.duration_hours
        )));
    }
    if !catalog.offers_service(&request.service_id) {
        return Err(DomainError::UnknownService(request.service_id.to_string()));
    }

    let mut trace = PricingTrace {
        service_id: request.service_id.clone(),
        currency: CURRENCY.to_string(),
        steps: Vec::new(),
    };

    let personnel_lines = resolve_personnel(catalog, request)?;
    let personnel_cost =
        checked_sum(personnel_lines.iter().map(|line| line.line_total), "personnel cost")?;
    for line in &personnel_lines {
        trace.step("personnel", line.description(), line.line_total);
    }
    trace.step("personnel_cost", "sum(count * rate * hours)".to_string(), personnel_cost);

    let addon_lines = resolve_addons(catalog, request)?;
    let addons_cost = checked_sum(addon_lines.iter().map(|line| line.price), "add-on cost")?;
    trace.step("addons_cost", format!("{} flat-priced add-on(s)", addon_lines.len()), addons_cost);

    let subtotal = in_range(personnel_cost.checked_add(addons_cost), "subtotal")?;
    trace.step("subtotal", "personnel_cost + addons_cost".to_string(), subtotal);

    let (tax_rate, tax_source) = resolve_tax_rate(catalog, request)?;
    let tax_amount = in_range(subtotal.checked_mul(tax_rate), "tax amount")?;
    trace.step("tax", format!("subtotal * {tax_rate} ({})", tax_source.as_str()), tax_amount);

    let total = in_range(subtotal.checked_add(tax_amount), "total")?;
    trace.step("total", "subtotal + tax".to_string(), total);

    Ok(PricingBreakdown {
        service_id: request.service_id.clone(),
        duration_hours: request.duration_hours,
        personnel_lines,
        addon_lines,
        personnel_cost,
        addons_cost,
        subtotal,
        client_state: request.client_state.trim().to_ascii_uppercase(),
        tax_rate,
        tax_source,
        tax_amount,
        total,
        trace,
    })
}

fn resolve_personnel(
    catalog: &RateCatalog,
    request: &PricingRequest,
) -> Result<Vec<PersonnelLine>, DomainError> {
    let mut seen = BTreeSet::new();
    let mut lines = Vec::with_capacity(request.personnel.len());

    for selection in &request.personnel {
        if !seen.insert(&selection.position_id) {
            return Err(DomainError::InvalidInput(format!(
                "position `{}` is selected more than once",
                selection.position_id
            )));
        }
        if selection.count == 0 {
            continue;
        }

        let rate = match selection.rate_override {
            Some(rate) if rate.is_sign_negative() => {
                return Err(DomainError::InvalidInput(format!(
                    "rate override for `{}` must not be negative",
                    selection.position_id
                )));
            }
            Some(rate) => rate,
            None => catalog
                .position_rate(&selection.position_id)
                .ok_or_else(|| DomainError::UnknownPosition(selection.position_id.to_string()))?,
        };

        lines.push(PersonnelLine::new(
            selection.position_id.clone(),
            catalog.position_label(&selection.position_id),
            selection.count,
            rate,
            request.duration_hours,
        )?);
    }

    Ok(lines)
}

fn in_range(amount: Option<Decimal>, what: &str) -> Result<Decimal, DomainError> {
    amount.ok_or_else(|| DomainError::InvalidInput(format!("{what} is out of range")))
}

fn checked_sum(
    amounts: impl IntoIterator<Item = Decimal>,
    what: &str,
) -> Result<Decimal, DomainError> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |sum, amount| in_range(sum.checked_add(amount), what))
}

/// Lines follow catalog order so the result does not depend on selection order.
fn resolve_addons(
    catalog: &RateCatalog,
    request: &PricingRequest,
) -> Result<Vec<AddonLine>, DomainError> {
    let selected = request.addons.iter().collect::<BTreeSet<_>>();
    for addon_id in &selected {
        if catalog.addon(&request.service_id, addon_id).is_none() {
            return Err(DomainError::UnknownAddon {
                service_id: request.service_id.to_string(),
                addon_id: addon_id.to_string(),
            });
        }
    }

    Ok(catalog
        .addons_for(&request.service_id)
        .iter()
        .filter(|offering| selected.contains(&offering.addon_id))
        .map(|offering| AddonLine {
            addon_id: offering.addon_id.clone(),
            name: offering.name.clone(),
            unit: offering.unit.clone(),
            price: offering.price,
        })
        .collect())
}

fn resolve_tax_rate(
    catalog: &RateCatalog,
    request: &PricingRequest,
) -> Result<(Decimal, TaxSource), DomainError> {
    if let Some(rate) = request.tax_rate_override {
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(DomainError::InvalidInput(format!(
                "tax rate override must be within [0, 1], got {rate}"
            )));
        }
        return Ok((rate, TaxSource::Override));
    }

    match catalog.state_tax_rate(&request.client_state) {
        Some(rate) => Ok((rate, TaxSource::State)),
        None => Ok((catalog.default_tax_rate, TaxSource::Default)),
    }
}

/// Renders an amount for display, e.g. `$3,866.36`. Halves round away from zero.
pub fn format_usd(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("{sign}${grouped}.{cents}")
}
