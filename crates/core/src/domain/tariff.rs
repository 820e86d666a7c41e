use std::fmt;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

static CODE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}\.\d{2}\.\d{2}(?:\.\d{3}[A-Z]?)?$").expect("valid regex")
});

/// Customs classification code in `dddd.dd.dd` form, optionally followed by a
/// statistical suffix (`.ddd` plus check letter).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TariffCode(String);

impl TariffCode {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim().to_ascii_uppercase();
        if CODE_SHAPE.is_match(&trimmed) {
            return Ok(Self(trimmed));
        }

        // Bare 8 digit form coming from upstream APIs.
        let digits: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() == 8 && digits.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self(format!("{}.{}.{}", &digits[0..4], &digits[4..6], &digits[6..8])));
        }

        Err(DomainError::InvalidTariffCode(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Four digit heading, e.g. `8704`.
    pub fn heading(&self) -> &str {
        &self.0[0..4]
    }

    pub fn chapter(&self) -> &str {
        &self.0[0..2]
    }
}

impl fmt::Display for TariffCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TariffCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TariffCode> for String {
    fn from(value: TariffCode) -> Self {
        value.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Explicit,
    Semantic,
    LocalIndex,
    Authoritative,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffCandidate {
    pub code: TariffCode,
    pub label: Option<String>,
    pub source: CandidateSource,
}

impl TariffCandidate {
    pub fn new(code: TariffCode, label: Option<String>, source: CandidateSource) -> Self {
        Self { code, label, source }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxKind {
    StatisticalFee,
    ImportDuty,
    Vat,
    VatSurcharge,
    IncomeTaxWithholding,
    GrossReceiptsWithholding,
}

/// Flat percentage rates (e.g. `21` means 21 %). Missing kinds do not apply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRates {
    pub statistical_fee: Option<Decimal>,
    pub import_duty: Option<Decimal>,
    pub vat: Option<Decimal>,
    pub vat_surcharge: Option<Decimal>,
    pub income_tax_withholding: Option<Decimal>,
    pub gross_receipts_withholding: Option<Decimal>,
}

impl TaxRates {
    pub fn get(&self, kind: TaxKind) -> Option<Decimal> {
        match kind {
            TaxKind::StatisticalFee => self.statistical_fee,
            TaxKind::ImportDuty => self.import_duty,
            TaxKind::Vat => self.vat,
            TaxKind::VatSurcharge => self.vat_surcharge,
            TaxKind::IncomeTaxWithholding => self.income_tax_withholding,
            TaxKind::GrossReceiptsWithholding => self.gross_receipts_withholding,
        }
    }

    pub fn set(&mut self, kind: TaxKind, rate: Decimal) {
        let slot = match kind {
            TaxKind::StatisticalFee => &mut self.statistical_fee,
            TaxKind::ImportDuty => &mut self.import_duty,
            TaxKind::Vat => &mut self.vat,
            TaxKind::VatSurcharge => &mut self.vat_surcharge,
            TaxKind::IncomeTaxWithholding => &mut self.income_tax_withholding,
            TaxKind::GrossReceiptsWithholding => &mut self.gross_receipts_withholding,
        };
        *slot = Some(rate);
    }

    /// True when at least the duty or VAT layer is known.
    pub fn is_usable(&self) -> bool {
        self.import_duty.is_some() || self.vat.is_some()
    }
}

/// One `(lower, upper]` band of the internal-tax schedule, in local currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTaxTier {
    pub lower_exclusive: Decimal,
    pub upper_inclusive: Option<Decimal>,
    pub rate_pct: Decimal,
}

impl InternalTaxTier {
    pub fn contains(&self, value: Decimal) -> bool {
        value > self.lower_exclusive && self.upper_inclusive.map_or(true, |upper| value <= upper)
    }
}

/// Contiguous, non-overlapping tiers covering `(0, ∞)`. Only constructible through
/// [`InternalTaxSchedule::from_bands`], which enforces the partition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<InternalTaxTier>", into = "Vec<InternalTaxTier>")]
pub struct InternalTaxSchedule {
    tiers: Vec<InternalTaxTier>,
}

impl InternalTaxSchedule {
    /// Builds the schedule from `(upper_inclusive, rate_pct)` bands in any order.
    /// Exactly one band must be unbounded and it becomes the last tier.
    pub fn from_bands(mut bands: Vec<(Option<Decimal>, Decimal)>) -> Result<Self, DomainError> {
        if bands.is_empty() {
            return Err(DomainError::InvalidTierSchedule("schedule has no tiers".to_string()));
        }
        match bands.iter().filter(|(upper, _)| upper.is_none()).count() {
            0 => {
                return Err(DomainError::InvalidTierSchedule("last tier must be unbounded".to_string()))
            }
            1 => {}
            _ => {
                return Err(DomainError::InvalidTierSchedule(
                    "more than one unbounded tier".to_string(),
                ))
            }
        }
        bands.sort_by(|(left, _), (right, _)| match (left, right) {
            (Some(left), Some(right)) => left.cmp(right),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        let mut tiers = Vec::with_capacity(bands.len());
        let mut lower = Decimal::ZERO;
        for (upper, rate_pct) in bands {
            if rate_pct < Decimal::ZERO || rate_pct > Decimal::ONE_HUNDRED {
                return Err(DomainError::InvalidTierSchedule(format!(
                    "rate {rate_pct} outside 0..=100"
                )));
            }
            if let Some(upper) = upper {
                if upper <= lower {
                    return Err(DomainError::InvalidTierSchedule(format!(
                        "tier bound {upper} does not exceed previous bound {lower}"
                    )));
                }
            }
            tiers.push(InternalTaxTier { lower_exclusive: lower, upper_inclusive: upper, rate_pct });
            if let Some(upper) = upper {
                lower = upper;
            }
        }

        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[InternalTaxTier] {
        &self.tiers
    }

    /// Tier containing `value`; `None` only for non-positive values.
    pub fn select(&self, value: Decimal) -> Option<&InternalTaxTier> {
        if value <= Decimal::ZERO {
            return None;
        }
        self.tiers.iter().find(|tier| tier.contains(value))
    }
}

impl TryFrom<Vec<InternalTaxTier>> for InternalTaxSchedule {
    type Error = DomainError;

    fn try_from(tiers: Vec<InternalTaxTier>) -> Result<Self, Self::Error> {
        Self::from_bands(tiers.into_iter().map(|tier| (tier.upper_inclusive, tier.rate_pct)).collect())
    }
}

impl From<InternalTaxSchedule> for Vec<InternalTaxTier> {
    fn from(value: InternalTaxSchedule) -> Self {
        value.tiers
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailSource {
    Authoritative,
    Cache,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: DetailSource,
    pub fetched_at: DateTime<Utc>,
    pub document_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffDetail {
    pub code: TariffCode,
    pub label: String,
    pub breadcrumb: Vec<String>,
    pub rates: TaxRates,
    pub internal_tax: Option<InternalTaxSchedule>,
    pub interventions: Vec<String>,
    pub provenance: Provenance,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{InternalTaxSchedule, TariffCode};

    fn schedule() -> InternalTaxSchedule {
        InternalTaxSchedule::from_bands(vec![
            (None, Decimal::new(35, 0)),
            (Some(Decimal::new(22_000_000, 0)), Decimal::ZERO),
            (Some(Decimal::new(41_000_000, 0)), Decimal::new(20, 0)),
        ])
        .expect("valid schedule")
    }

    #[test]
    fn parses_dotted_and_bare_codes() {
        assert_eq!(TariffCode::parse("8704.21.00").expect("dotted").as_str(), "8704.21.00");
        assert_eq!(TariffCode::parse("87042100").expect("bare").as_str(), "8704.21.00");
        assert_eq!(
            TariffCode::parse("8427.10.19.100z").expect("suffix").as_str(),
            "8427.10.19.100Z"
        );
        assert!(TariffCode::parse("8704.2").is_err());
        assert_eq!(TariffCode::parse("8704.21.00").expect("code").heading(), "8704");
    }

    #[test]
    fn tiers_partition_the_positive_line() {
        let schedule = schedule();
        let tiers = schedule.tiers();
        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[0].lower_exclusive, Decimal::ZERO);
        for pair in tiers.windows(2) {
            assert_eq!(pair[0].upper_inclusive, Some(pair[1].lower_exclusive));
        }
        assert!(tiers[2].upper_inclusive.is_none());

        for value in [1i64, 21_999_999, 22_000_000, 22_000_001, 41_000_000, 900_000_000] {
            let value = Decimal::new(value, 0);
            let matches = tiers.iter().filter(|tier| tier.contains(value)).count();
            assert_eq!(matches, 1, "value {value} must match exactly one tier");
        }
    }

    #[test]
    fn selection_uses_exclusive_lower_and_inclusive_upper_bounds() {
        let schedule = schedule();
        let at_bound = schedule.select(Decimal::new(22_000_000, 0)).expect("tier");
        assert_eq!(at_bound.rate_pct, Decimal::ZERO);
        let above = schedule.select(Decimal::new(22_000_001, 0)).expect("tier");
        assert_eq!(above.rate_pct, Decimal::new(20, 0));
        let fraction = schedule.select(Decimal::new(1, 2)).expect("tier");
        assert_eq!(fraction.rate_pct, Decimal::ZERO);
    }

    #[test]
    fn non_positive_values_select_no_tier() {
        let schedule = schedule();
        assert!(schedule.select(Decimal::ZERO).is_none());
        assert!(schedule.select(Decimal::new(-5, 0)).is_none());
    }

    #[test]
    fn rejects_overlapping_or_duplicate_bounds() {
        let duplicate = InternalTaxSchedule::from_bands(vec![
            (Some(Decimal::new(10, 0)), Decimal::ONE),
            (Some(Decimal::new(10, 0)), Decimal::TWO),
        ]);
        assert!(duplicate.is_err());

        let two_open = InternalTaxSchedule::from_bands(vec![(None, Decimal::ONE), (None, Decimal::TWO)]);
        assert!(two_open.is_err());
    }

    #[test]
    fn bounded_only_schedules_leave_a_gap_and_are_rejected() {
        let bounded = InternalTaxSchedule::from_bands(vec![
            (Some(Decimal::new(10_000_000, 0)), Decimal::ZERO),
            (Some(Decimal::new(20_000_000, 0)), Decimal::new(20, 0)),
        ]);
        assert!(bounded.is_err());

        let schedule = schedule();
        let huge = schedule.select(Decimal::new(i64::MAX, 0)).expect("open tier");
        assert_eq!(huge.rate_pct, Decimal::new(35, 0));
    }

    #[test]
    fn serde_round_trip_revalidates() {
        let json = serde_json::to_string(&schedule()).expect("serialize");
        let parsed: InternalTaxSchedule = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, schedule());

        let broken = r#"[{"lower_exclusive":"0","upper_inclusive":"5","rate_pct":"1"},{"lower_exclusive":"0","upper_inclusive":"5","rate_pct":"2"}]"#;
        assert!(serde_json::from_str::<InternalTaxSchedule>(broken).is_err());

        let gapped = r#"[{"lower_exclusive":"0","upper_inclusive":"5","rate_pct":"1"}]"#;
        assert!(serde_json::from_str::<InternalTaxSchedule>(gapped).is_err());
    }
}
