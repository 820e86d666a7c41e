use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationResult;
use crate::domain::quote::CostEstimate;
use crate::domain::tariff::TariffCode;
use crate::flows::{FlowContext, FlowState, Slot};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Ars,
    Eur,
    Brl,
    Cny,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Ars => "ARS",
            Self::Eur => "EUR",
            Self::Brl => "BRL",
            Self::Cny => "CNY",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "USD" | "US$" | "U$S" => Some(Self::Usd),
            "ARS" => Some(Self::Ars),
            "EUR" => Some(Self::Eur),
            "BRL" => Some(Self::Brl),
            "CNY" | "RMB" => Some(Self::Cny),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn usd(amount: Decimal) -> Self {
        Self { amount, currency: Currency::Usd }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingProfile {
    Light,
    Medium,
    Heavy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    Fixed,
    Range,
}

/// Price published by a product source, possibly a range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceHint {
    pub kind: PriceKind,
    pub min: Decimal,
    pub max: Decimal,
    pub currency: Currency,
    pub unit: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub title: String,
    pub description: String,
    pub source_link: Option<String>,
    pub origin: Option<String>,
    pub price: Option<PriceHint>,
    pub images: Vec<String>,
}

impl ProductSnapshot {
    /// Text used for classification: title plus description when they differ.
    pub fn classification_text(&self) -> String {
        if self.description.is_empty() || self.description == self.title {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.description)
        }
    }
}

/// Per-conversation working state, persisted with a version for compare-and-swap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub session_id: SessionId,
    pub version: i64,
    pub stage: FlowState,
    pub turn_count: u32,
    pub product: Option<ProductSnapshot>,
    pub tariff_code: Option<TariffCode>,
    pub tariff_label: Option<String>,
    pub classification: Option<ClassificationResult>,
    pub unit_price: Option<Money>,
    pub quantity: Option<u32>,
    pub origin_country: Option<String>,
    pub shipping_profile: Option<ShippingProfile>,
    pub target_budget: Option<Money>,
    pub last_estimate: Option<CostEstimate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuoteDraft {
    pub fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            version: 0,
            stage: FlowState::AwaitingProduct,
            turn_count: 0,
            product: None,
            tariff_code: None,
            tariff_label: None,
            classification: None,
            unit_price: None,
            quantity: None,
            origin_country: None,
            shipping_profile: None,
            target_budget: None,
            last_estimate: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn missing_slots(&self) -> Vec<Slot> {
        let mut missing = Vec::new();
        if self.product.is_none() {
            missing.push(Slot::Product);
        }
        if self.unit_price.is_none() && !self.product_has_price() {
            missing.push(Slot::UnitPrice);
        }
        if self.quantity.is_none() {
            missing.push(Slot::Quantity);
        }
        missing
    }

    pub fn product_has_price(&self) -> bool {
        self.product.as_ref().is_some_and(|product| product.price.is_some())
    }

    /// An unresolved code with candidates to choose from blocks the quote; an empty candidate
    /// set does not (heuristic rates apply).
    pub fn classification_pending(&self) -> bool {
        if self.product.is_none() || self.tariff_code.is_some() {
            return false;
        }
        self.classification.as_ref().is_some_and(|result| !result.candidates.is_empty())
    }

    pub fn flow_context(&self) -> FlowContext {
        FlowContext {
            missing_slots: self.missing_slots(),
            classification_pending: self.classification_pending(),
            previously_quoted: self.last_estimate.is_some(),
        }
    }

    /// Drops everything derived from the current product. The declared price survives only
    /// when `keep_price` is set.
    pub fn clear_product_dependents(&mut self, keep_price: bool) {
        if !keep_price {
            self.unit_price = None;
        }
        self.quantity = None;
        self.tariff_code = None;
        self.tariff_label = None;
        self.classification = None;
        self.last_estimate = None;
    }

    pub fn known_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.product.is_some() {
            fields.push("product".to_string());
        }
        if self.unit_price.is_some() || self.product_has_price() {
            fields.push("unit_price".to_string());
        }
        if self.quantity.is_some() {
            fields.push("quantity".to_string());
        }
        if self.tariff_code.is_some() {
            fields.push("tariff_code".to_string());
        }
        if self.origin_country.is_some() {
            fields.push("origin".to_string());
        }
        if self.shipping_profile.is_some() {
            fields.push("shipping_profile".to_string());
        }
        if self.target_budget.is_some() {
            fields.push("target_budget".to_string());
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{Money, ProductSnapshot, QuoteDraft, SessionId};
    use crate::flows::Slot;

    #[test]
    fn new_draft_misses_every_slot() {
        let draft = QuoteDraft::new(SessionId("s-1".to_owned()), Utc::now());
        assert_eq!(draft.missing_slots(), vec![Slot::Product, Slot::UnitPrice, Slot::Quantity]);
        assert!(!draft.classification_pending());
    }

    #[test]
    fn clearing_dependents_can_keep_price() {
        let mut draft = QuoteDraft::new(SessionId("s-2".to_owned()), Utc::now());
        draft.product = Some(ProductSnapshot { title: "ascensor".to_owned(), ..Default::default() });
        draft.unit_price = Some(Money::usd(Decimal::new(500, 0)));
        draft.quantity = Some(10);

        draft.clear_product_dependents(true);
        assert!(draft.unit_price.is_some());
        assert!(draft.quantity.is_none());

        draft.clear_product_dependents(false);
        assert_eq!(draft.missing_slots(), vec![Slot::UnitPrice, Slot::Quantity]);
    }
}
