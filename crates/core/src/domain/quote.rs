use std::ops::Add;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A USD `(min, max)` pair. Arithmetic is applied to each bound independently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsdRange {
    pub min: Decimal,
    pub max: Decimal,
}

impl UsdRange {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn point(value: Decimal) -> Self {
        Self { min: value, max: value }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Applies a percentage range: `min * min_pct / 100`, `max * max_pct / 100`.
    pub fn percent(&self, min_pct: Decimal, max_pct: Decimal) -> Self {
        Self {
            min: self.min * min_pct / Decimal::ONE_HUNDRED,
            max: self.max * max_pct / Decimal::ONE_HUNDRED,
        }
    }

    /// Scales both bounds; `None` when either product leaves the `Decimal` range.
    pub fn checked_times(&self, factor: Decimal) -> Option<Self> {
        Some(Self { min: self.min.checked_mul(factor)?, max: self.max.checked_mul(factor)? })
    }

    pub fn map_bounds(&self, mut f: impl FnMut(Decimal, Bound) -> Decimal) -> Self {
        Self { min: f(self.min, Bound::Min), max: f(self.max, Bound::Max) }
    }

    pub fn rounded(&self) -> Self {
        Self { min: round_cents(self.min), max: round_cents(self.max) }
    }
}

impl Add for UsdRange {
    type Output = UsdRange;

    fn add(self, rhs: Self) -> Self::Output {
        Self { min: self.min + rhs.min, max: self.max + rhs.max }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    Min,
    Max,
}

pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateMode {
    Quote,
    Budget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatesSource {
    Authoritative,
    Heuristic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlingBand {
    IndustrialMachinery,
    Default,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlingBreakdown {
    pub broker_fee: UsdRange,
    pub port_deposit: UsdRange,
    pub local_transport: UsdRange,
    pub transfer_fee: UsdRange,
    pub subtotal: UsdRange,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub unit_fob: UsdRange,
    pub quantity: u32,
    pub fob_total: UsdRange,
    pub freight: UsdRange,
    pub insurance: UsdRange,
    pub cif: UsdRange,
    pub cif_insurance: UsdRange,
    pub statistical_fee: UsdRange,
    pub import_duty: UsdRange,
    pub vat: UsdRange,
    pub vat_surcharge: UsdRange,
    pub internal_tax: UsdRange,
    pub tax_subtotal: UsdRange,
    pub handling: HandlingBreakdown,
    pub grand_total: UsdRange,
    /// Advance withholdings; informational, not part of `grand_total`.
    pub income_tax_withholding: UsdRange,
    pub gross_receipts_withholding: UsdRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSizing {
    pub target: Decimal,
    pub fob_budget: UsdRange,
    pub affordable_units: Option<(u32, u32)>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTraceStep {
    pub stage: String,
    pub detail: String,
    pub min: Decimal,
    pub max: Decimal,
}

impl PricingTraceStep {
    pub fn new(stage: impl Into<String>, detail: impl Into<String>, range: UsdRange) -> Self {
        let range = range.rounded();
        Self { stage: stage.into(), detail: detail.into(), min: range.min, max: range.max }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub mode: EstimateMode,
    pub breakdown: Option<CostBreakdown>,
    pub budget: Option<BudgetSizing>,
    pub explanation: Vec<PricingTraceStep>,
    pub quality_score: u8,
    pub known_fields: Vec<String>,
    pub assumptions: Vec<String>,
    pub rates_source: RatesSource,
}
