use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::service::{AddonId, AddonOffering, PositionId, ServiceId};
use crate::errors::DomainError;

pub const RATE_CATALOG_SETTINGS_KEY: &str = "rate_catalog";
pub const DEFAULT_ADDON_UNIT: &str = "per unit";

/// Prices, tax rates and defaults used to compute quotes.
///
/// Passed explicitly into pricing and record building; nothing reads it from ambient state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCatalog {
    pub position_rates: BTreeMap<PositionId, Decimal>,
    #[serde(default)]
    pub position_labels: BTreeMap<PositionId, String>,
    pub state_tax_rates: BTreeMap<String, Decimal>,
    pub default_tax_rate: Decimal,
    pub service_addon_catalogs: BTreeMap<ServiceId, Vec<AddonOffering>>,
    pub service_default_durations: BTreeMap<ServiceId, u32>,
    #[serde(default)]
    pub service_names: BTreeMap<ServiceId, String>,
    pub quote_number_prefix: String,
    pub validity_days: u32,
    pub payment_terms_options: Vec<String>,
}

impl RateCatalog {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.quote_number_prefix.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "quote_number_prefix must not be empty".to_string(),
            ));
        }
        if self.validity_days == 0 {
            return Err(DomainError::InvariantViolation(
                "validity_days must be greater than zero".to_string(),
            ));
        }
        if !is_fraction(self.default_tax_rate) {
            return Err(DomainError::InvariantViolation(format!(
                "default_tax_rate must be within [0, 1], got {}",
                self.default_tax_rate
            )));
        }
        for (state, rate) in &self.state_tax_rates {
            if !is_fraction(*rate) {
                return Err(DomainError::InvariantViolation(format!(
                    "tax rate for `{state}` must be within [0, 1], got {rate}"
                )));
            }
        }
        for (position, rate) in &self.position_rates {
            if rate.is_sign_negative() {
                return Err(DomainError::InvariantViolation(format!(
                    "hourly rate for `{position}` must not be negative, got {rate}"
                )));
            }
        }
        for (service, addons) in &self.service_addon_catalogs {
            for addon in addons {
                if addon.price.is_sign_negative() {
                    return Err(DomainError::InvariantViolation(format!(
                        "add-on `{}` of `{service}` must not have a negative price",
                        addon.addon_id
                    )));
                }
            }
            let mut ids = addons.iter().map(|addon| &addon.addon_id).collect::<Vec<_>>();
            ids.sort();
            ids.dedup();
            if ids.len() != addons.len() {
                return Err(DomainError::InvariantViolation(format!(
                    "add-on ids of `{service}` must be unique"
                )));
            }
        }
        for (service, hours) in &self.service_default_durations {
            if *hours == 0 {
                return Err(DomainError::InvariantViolation(format!(
                    "default duration for `{service}` must be greater than zero"
                )));
            }
        }

        Ok(())
    }

    pub fn position_rate(&self, position_id: &PositionId) -> Option<Decimal> {
        self.position_rates.get(position_id).copied()
    }

    pub fn position_label<'a>(&'a self, position_id: &'a PositionId) -> &'a str {
        self.position_labels.get(position_id).map(String::as_str).unwrap_or(position_id.as_str())
    }

    pub fn state_tax_rate(&self, state: &str) -> Option<Decimal> {
        let code = state.trim().to_ascii_uppercase();
        if code.is_empty() {
            return None;
        }
        self.state_tax_rates.get(&code).copied()
    }

    pub fn offers_service(&self, service_id: &ServiceId) -> bool {
        self.service_addon_catalogs.contains_key(service_id)
            || self.service_default_durations.contains_key(service_id)
            || self.service_names.contains_key(service_id)
    }

    pub fn addons_for(&self, service_id: &ServiceId) -> &[AddonOffering] {
        self.service_addon_catalogs.get(service_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn addon(&self, service_id: &ServiceId, addon_id: &AddonId) -> Option<&AddonOffering> {
        self.addons_for(service_id).iter().find(|addon| &addon.addon_id == addon_id)
    }

    pub fn default_duration_hours(&self, service_id: &ServiceId) -> Option<u32> {
        self.service_default_durations.get(service_id).copied()
    }

    pub fn service_name<'a>(&'a self, service_id: &'a ServiceId) -> &'a str {
        self.service_names.get(service_id).map(String::as_str).unwrap_or(service_id.as_str())
    }

    pub fn default_payment_terms(&self) -> Option<&str> {
        self.payment_terms_options.first().map(String::as_str)
    }

    pub fn set_position_rate(
        &mut self,
        position_id: PositionId,
        rate: Decimal,
    ) -> Result<(), DomainError> {
        if rate.is_sign_negative() {
            return Err(DomainError::InvalidInput(format!(
                "hourly rate for `{position_id}` must not be negative"
            )));
        }
        self.position_rates.insert(position_id, rate);
        Ok(())
    }

    pub fn set_state_tax_rate(&mut self, state: &str, rate: Decimal) -> Result<(), DomainError> {
        let code = state.trim().to_ascii_uppercase();
        if code.len() != 2 || !code.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidInput(format!(
                "jurisdiction must be a two-letter code, got `{state}`"
            )));
        }
        if !is_fraction(rate) {
            return Err(DomainError::InvalidInput(format!(
                "tax rate must be within [0, 1], got {rate}"
            )));
        }
        self.state_tax_rates.insert(code, rate);
        Ok(())
    }

    pub fn set_service_duration(
        &mut self,
        service_id: ServiceId,
        hours: u32,
    ) -> Result<(), DomainError> {
        if hours == 0 {
            return Err(DomainError::InvalidInput(format!(
                "default duration for `{service_id}` must be greater than zero"
            )));
        }
        self.service_default_durations.insert(service_id, hours);
        Ok(())
    }

    pub fn add_payment_term(&mut self, term: &str) -> Result<(), DomainError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(DomainError::InvalidInput("payment term must not be empty".to_string()));
        }
        if self.payment_terms_options.iter().any(|existing| existing == term) {
            return Err(DomainError::InvalidInput(format!(
                "payment term `{term}` already exists"
            )));
        }
        self.payment_terms_options.push(term.to_string());
        Ok(())
    }

    pub fn remove_payment_term(&mut self, index: usize) -> Option<String> {
        (index < self.payment_terms_options.len())
            .then(|| self.payment_terms_options.remove(index))
    }

    /// Appends an add-on to a service and returns its generated id.
    pub fn add_addon(
        &mut self,
        service_id: &ServiceId,
        name: &str,
        price: Decimal,
        unit: &str,
    ) -> Result<AddonId, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::InvalidInput("add-on name must not be empty".to_string()));
        }
        if price.is_sign_negative() {
            return Err(DomainError::InvalidInput(format!(
                "add-on `{name}` must not have a negative price"
            )));
        }

        let addons = self.service_addon_catalogs.entry(service_id.clone()).or_default();
        let base = slugify(name);
        let mut candidate = base.clone();
        let mut suffix = 2;
        while addons.iter().any(|addon| addon.addon_id.as_str() == candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }

        let unit = match unit.trim() {
            "" => DEFAULT_ADDON_UNIT,
            unit => unit,
        };
        let addon_id = AddonId::new(candidate);
        addons.push(AddonOffering {
            addon_id: addon_id.clone(),
            name: name.to_string(),
            price,
            unit: unit.to_string(),
        });

        Ok(addon_id)
    }

    pub fn update_addon(
        &mut self,
        service_id: &ServiceId,
        addon_id: &AddonId,
        name: Option<&str>,
        price: Option<Decimal>,
        unit: Option<&str>,
    ) -> Result<(), DomainError> {
        let addon = self
            .service_addon_catalogs
            .get_mut(service_id)
            .and_then(|addons| addons.iter_mut().find(|addon| &addon.addon_id == addon_id))
            .ok_or_else(|| DomainError::UnknownAddon {
                service_id: service_id.to_string(),
                addon_id: addon_id.to_string(),
            })?;

        if let Some(price) = price {
            if price.is_sign_negative() {
                return Err(DomainError::InvalidInput(format!(
                    "add-on `{addon_id}` must not have a negative price"
                )));
            }
            addon.price = price;
        }
        if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
            addon.name = name.to_string();
        }
        if let Some(unit) = unit.map(str::trim).filter(|unit| !unit.is_empty()) {
            addon.unit = unit.to_string();
        }

        Ok(())
    }

    pub fn remove_addon(&mut self, service_id: &ServiceId, addon_id: &AddonId) -> bool {
        let Some(addons) = self.service_addon_catalogs.get_mut(service_id) else {
            return false;
        };
        let before = addons.len();
        addons.retain(|addon| &addon.addon_id != addon_id);
        addons.len() != before
    }
}

impl Default for RateCatalog {
    fn default() -> Self {
        let position_rates = [
            ("admin", 50),
            ("event-staff", 30),
            ("agent", 35),
            ("safety-agent", 40),
            ("safety-supervisor", 50),
            ("manager", 60),
        ]
        .into_iter()
        .map(|(id, rate)| (PositionId::new(id), Decimal::from(rate)))
        .collect();

        let position_labels = [
            ("admin", "Admin"),
            ("event-staff", "Event Staff"),
            ("agent", "Agent"),
            ("safety-agent", "Safety Agent"),
            ("safety-supervisor", "Safety Supervisor"),
            ("manager", "Manager"),
        ]
        .into_iter()
        .map(|(id, label)| (PositionId::new(id), label.to_string()))
        .collect();

        // Hundred-thousandths: 7250 -> 0.0725.
        let state_tax_rates = [
            ("AL", 4000), ("AK", 0), ("AZ", 5600), ("AR", 6500), ("CA", 7250),
            ("CO", 2900), ("CT", 6350), ("DE", 0), ("FL", 6000), ("GA", 4000),
            ("HI", 4000), ("ID", 6000), ("IL", 6250), ("IN", 7000), ("IA", 6000),
            ("KS", 6500), ("KY", 6000), ("LA", 4450), ("ME", 5500), ("MD", 6000),
            ("MA", 6250), ("MI", 6000), ("MN", 6875), ("MS", 7000), ("MO", 4225),
            ("MT", 0), ("NE", 5500), ("NV", 6850), ("NH", 0), ("NJ", 6625),
            ("NM", 5125), ("NY", 4000), ("NC", 4750), ("ND", 5000), ("OH", 5750),
            ("OK", 4500), ("OR", 0), ("PA", 6000), ("RI", 7000), ("SC", 6000),
            ("SD", 4500), ("TN", 7000), ("TX", 6250), ("UT", 4850), ("VT", 6000),
            ("VA", 5300), ("WA", 6500), ("WV", 6000), ("WI", 5000), ("WY", 4000),
            ("DC", 6000),
        ]
        .into_iter()
        .map(|(state, rate): (&str, i64)| (state.to_string(), Decimal::new(rate, 5).normalize()))
        .collect();

        let service_addon_catalogs = [
            (
                "event-security",
                vec![
                    AddonOffering::new("radio", "Radio Equipment", Decimal::from(5), "per unit"),
                    AddonOffering::new("vehicle", "Vehicle Patrol", Decimal::from(150), "per shift"),
                    AddonOffering::new("k9", "K9 Unit", Decimal::from(200), "per shift"),
                ],
            ),
            (
                "executive-protection",
                vec![
                    AddonOffering::new(
                        "armored-vehicle",
                        "Armored Vehicle",
                        Decimal::from(500),
                        "per day",
                    ),
                    AddonOffering::new(
                        "advance-team",
                        "Advance Security Team",
                        Decimal::from(1000),
                        "per event",
                    ),
                    AddonOffering::new(
                        "background-check",
                        "Enhanced Background Check",
                        Decimal::from(200),
                        "per person",
                    ),
                ],
            ),
            (
                "crowd-management",
                vec![
                    AddonOffering::new(
                        "barriers",
                        "Crowd Control Barriers",
                        Decimal::from(10),
                        "per barrier",
                    ),
                    AddonOffering::new("signage", "Directional Signage", Decimal::from(50), "per set"),
                    AddonOffering::new(
                        "communication",
                        "Communication System",
                        Decimal::from(100),
                        "per event",
                    ),
                ],
            ),
            (
                "risk-assessment",
                vec![
                    AddonOffering::new(
                        "detailed-report",
                        "Detailed Written Report",
                        Decimal::from(300),
                        "per report",
                    ),
                    AddonOffering::new("site-visit", "On-Site Visit", Decimal::from(500), "per visit"),
                    AddonOffering::new(
                        "training",
                        "Staff Training Session",
                        Decimal::from(750),
                        "per session",
                    ),
                ],
            ),
        ]
        .into_iter()
        .map(|(service, addons)| (ServiceId::new(service), addons))
        .collect();

        let service_default_durations = [
            ("event-security", 8),
            ("executive-protection", 24),
            ("crowd-management", 6),
            ("risk-assessment", 1),
        ]
        .into_iter()
        .map(|(service, hours)| (ServiceId::new(service), hours))
        .collect();

        let service_names = [
            ("event-security", "Event Security"),
            ("executive-protection", "Executive Protection"),
            ("crowd-management", "Crowd Management"),
            ("risk-assessment", "Risk Assessment"),
        ]
        .into_iter()
        .map(|(service, name)| (ServiceId::new(service), name.to_string()))
        .collect();

        Self {
            position_rates,
            position_labels,
            state_tax_rates,
            default_tax_rate: Decimal::new(6, 2),
            service_addon_catalogs,
            service_default_durations,
            service_names,
            quote_number_prefix: "OSG".to_string(),
            validity_days: 30,
            payment_terms_options: vec![
                "50% deposit, balance due day of event".to_string(),
                "50% deposit, balance due 24 hours before service".to_string(),
                "Net 30".to_string(),
                "Net 15".to_string(),
                "Due upon service".to_string(),
            ],
        }
    }
}

fn is_fraction(rate: Decimal) -> bool {
    rate >= Decimal::ZERO && rate <= Decimal::ONE
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        "addon".to_string()
    } else {
        trimmed.to_string()
    }
}
