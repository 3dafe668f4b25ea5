//! Structured details carried inside a contact inquiry.
//!
//! The public contact form appends a block to the free-text message:
//!
//! ```text
//! --- Service Details ---
//! eventDate: 2026-06-14
//! eventDuration: 10
//! expectedAttendance: 2500
//! addons: radio, k9
//! ```
//!
//! Lines that are not `key: value` pairs are ignored.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::service::AddonId;

pub const SERVICE_DETAILS_MARKER: &str = "--- Service Details ---";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryDetails {
    pub event_date: Option<NaiveDate>,
    pub event_duration_hours: Option<Decimal>,
    pub expected_attendance: Option<u32>,
    pub venue_location: Option<String>,
    pub addons: Vec<AddonId>,
    /// Every recognised pair, including the ones mapped to typed fields above.
    pub fields: BTreeMap<String, String>,
}

impl InquiryDetails {
    pub fn parse(message: &str) -> Self {
        let Some((_, block)) = message.split_once(SERVICE_DETAILS_MARKER) else {
            return Self::default();
        };

        let mut details = Self::default();
        for line in block.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            let valid_key = !key.is_empty()
                && key.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
            if !valid_key || value.is_empty() {
                continue;
            }

            match key {
                "eventDate" | "startDate" if details.event_date.is_none() => {
                    details.event_date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok();
                }
                "eventDuration" => {
                    details.event_duration_hours =
                        value.parse::<Decimal>().ok().filter(|hours| *hours > Decimal::ZERO);
                }
                "expectedAttendance" => {
                    details.expected_attendance = value.replace(',', "").parse::<u32>().ok();
                }
                "venueLocation" => details.venue_location = Some(value.to_string()),
                "addons" => {
                    details.addons = value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(AddonId::new)
                        .collect();
                }
                _ => {}
            }

            details.fields.insert(key.to_string(), value.to_string());
        }

        details
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::InquiryDetails;
    use crate::domain::service::AddonId;

    #[test]
    fn parses_service_details_block() {
        let message = "We need staff for the harbor festival.\n\n--- Service Details ---\n\
                       eventDate: 2026-06-14\n\
                       expectedAttendance: 2,500\n\
                       eventDuration: 10.5\n\
                       venueLocation: Pier 6, Baltimore\n\
                       addons: radio, k9\n";

        let details = InquiryDetails::parse(message);

        assert_eq!(details.event_date, NaiveDate::from_ymd_opt(2026, 6, 14));
        assert_eq!(details.expected_attendance, Some(2500));
        assert_eq!(details.event_duration_hours, Some(Decimal::new(105, 1)));
        assert_eq!(details.venue_location.as_deref(), Some("Pier 6, Baltimore"));
        assert_eq!(details.addons, vec![AddonId::new("radio"), AddonId::new("k9")]);
        assert_eq!(details.fields.len(), 5);
    }

    #[test]
    fn message_without_block_yields_empty_details() {
        let details = InquiryDetails::parse("eventDate: 2026-06-14 but no marker");
        assert!(details.is_empty());
        assert_eq!(details.event_date, None);
    }

    #[test]
    fn malformed_values_are_skipped() {
        let message = "--- Service Details ---\neventDate: next friday\neventDuration: 0\n\
                       not a pair\nbad key!: value\n";

        let details = InquiryDetails::parse(message);

        assert_eq!(details.event_date, None);
        assert_eq!(details.event_duration_hours, None);
        assert!(details.fields.contains_key("eventDate"));
        assert!(!details.fields.contains_key("bad key!"));
    }

    #[test]
    fn executive_protection_start_date_fills_event_date() {
        let details = InquiryDetails::parse(
            "--- Service Details ---\nstartDate: 2026-09-01\nendDate: 2026-09-03\n",
        );
        assert_eq!(details.event_date, NaiveDate::from_ymd_opt(2026, 9, 1));
    }
}
