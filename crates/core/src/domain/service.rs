use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddonId(pub String);

macro_rules! string_id {
    ($($name:ident),+) => {
        $(
            impl $name {
                pub fn new(value: impl Into<String>) -> Self {
                    Self(value.into())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

string_id!(ServiceId, PositionId, AddonId);

/// An optional extra offered with a service.
///
/// `unit` is descriptive only ("per shift", "per unit"); pricing always adds `price` once per
/// selected add-on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonOffering {
    pub addon_id: AddonId,
    pub name: String,
    pub price: Decimal,
    pub unit: String,
}

impl AddonOffering {
    pub fn new(
        addon_id: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
        unit: impl Into<String>,
    ) -> Self {
        Self { addon_id: AddonId::new(addon_id), name: name.into(), price, unit: unit.into() }
    }
}
