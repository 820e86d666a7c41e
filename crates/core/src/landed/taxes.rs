use rust_decimal::Decimal;

use crate::domain::quote::{Bound, UsdRange};
use crate::domain::tariff::{InternalTaxSchedule, TaxRates};
use crate::errors::LandedCostError;

pub const HEURISTIC_DUTY_PCT_MIN: Decimal = Decimal::from_parts(8, 0, 0, false, 0);
pub const HEURISTIC_DUTY_PCT_MAX: Decimal = Decimal::from_parts(28, 0, 0, false, 0);
pub const HEURISTIC_VAT_PCT_MIN: Decimal = Decimal::from_parts(21, 0, 0, false, 0);
pub const HEURISTIC_VAT_PCT_MAX: Decimal = Decimal::from_parts(31, 0, 0, false, 0);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaxLayers {
    pub statistical_fee: UsdRange,
    pub import_duty: UsdRange,
    /// CIF+insurance + statistical fee + duty.
    pub vat_base: UsdRange,
    pub vat: UsdRange,
    pub vat_surcharge: UsdRange,
    pub internal_tax: UsdRange,
    /// Tier rate applied per bound, when an internal-tax schedule matched.
    pub internal_tax_rates: Option<(Decimal, Decimal)>,
    pub subtotal: UsdRange,
    pub income_tax_withholding: UsdRange,
    pub gross_receipts_withholding: UsdRange,
}

fn flat(base: UsdRange, rate: Option<Decimal>) -> UsdRange {
    match rate {
        Some(rate) => base.percent(rate, rate),
        None => UsdRange::zero(),
    }
}

/// Taxes from published rates. Internal-tax tiers are selected per bound after converting
/// that bound of CIF+insurance to local currency. A positive local value no tier covers is
/// an error rather than a silent zero rate.
pub fn authoritative(
    cif_insurance: UsdRange,
    rates: &TaxRates,
    schedule: Option<&InternalTaxSchedule>,
    local_per_usd: Decimal,
) -> Result<TaxLayers, LandedCostError> {
    let statistical_fee = flat(cif_insurance, rates.statistical_fee);
    let import_duty = flat(cif_insurance, rates.import_duty);
    let vat_base = cif_insurance + statistical_fee + import_duty;
    let vat = flat(vat_base, rates.vat);
    let vat_surcharge = flat(vat_base, rates.vat_surcharge);

    let (internal_tax, internal_tax_rates) = match schedule {
        Some(schedule) => {
            let rate_for = |bound: Bound| -> Result<Decimal, LandedCostError> {
                let dutiable = match bound {
                    Bound::Min => cif_insurance.min,
                    Bound::Max => cif_insurance.max,
                };
                let local = dutiable
                    .checked_mul(local_per_usd)
                    .ok_or(LandedCostError::AmountOutOfRange { stage: "internal_tax" })?;
                if local <= Decimal::ZERO {
                    return Ok(Decimal::ZERO);
                }
                schedule
                    .select(local)
                    .map(|tier| tier.rate_pct)
                    .ok_or(LandedCostError::UncoveredInternalTax(local))
            };
            let min_rate = rate_for(Bound::Min)?;
            let max_rate = rate_for(Bound::Max)?;
            (vat_base.percent(min_rate, max_rate), Some((min_rate, max_rate)))
        }
        None => (UsdRange::zero(), None),
    };

    let subtotal = statistical_fee + import_duty + vat + vat_surcharge + internal_tax;
    let withholding_base = vat_base + vat + vat_surcharge;

    Ok(TaxLayers {
        statistical_fee,
        import_duty,
        vat_base,
        vat,
        vat_surcharge,
        internal_tax,
        internal_tax_rates,
        subtotal,
        income_tax_withholding: flat(withholding_base, rates.income_tax_withholding),
        gross_receipts_withholding: flat(withholding_base, rates.gross_receipts_withholding),
    })
}

/// Wide duty and VAT-like bands used when no published rates are available.
pub fn heuristic(cif_insurance: UsdRange) -> TaxLayers {
    let import_duty = cif_insurance.percent(HEURISTIC_DUTY_PCT_MIN, HEURISTIC_DUTY_PCT_MAX);
    let vat_base = cif_insurance + import_duty;
    let vat = vat_base.percent(HEURISTIC_VAT_PCT_MIN, HEURISTIC_VAT_PCT_MAX);
    TaxLayers {
        import_duty,
        vat_base,
        vat,
        subtotal: import_duty + vat,
        ..TaxLayers::default()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{authoritative, heuristic};
    use crate::domain::quote::UsdRange;
    use crate::domain::tariff::{InternalTaxSchedule, TaxRates};
    use crate::errors::LandedCostError;

    fn dec(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    #[test]
    fn published_rates_stack_on_the_vat_base() {
        let rates = TaxRates {
            statistical_fee: Some(dec(3)),
            import_duty: Some(dec(14)),
            vat: Some(dec(21)),
            ..TaxRates::default()
        };
        let layers = authoritative(UsdRange::point(dec(10_000)), &rates, None, dec(1_000)).expect("layers");

        assert_eq!(layers.statistical_fee.min, dec(300));
        assert_eq!(layers.import_duty.min, dec(1_400));
        assert_eq!(layers.vat_base.min, dec(11_700));
        assert_eq!(layers.vat.min, dec(2_457));
        assert_eq!(layers.subtotal.min, dec(4_157));
        assert_eq!(layers.subtotal.max, dec(4_157));
        assert_eq!(layers.internal_tax, UsdRange::zero());
    }

    #[test]
    fn internal_tax_tier_is_chosen_per_bound() {
        let schedule = InternalTaxSchedule::from_bands(vec![
            (Some(dec(10_000_000)), dec(0)),
            (None, dec(20)),
        ])
        .expect("schedule");
        let rates = TaxRates { vat: Some(dec(21)), ..TaxRates::default() };
        // 8 000 USD -> 8M local (first tier); 12 000 USD -> 12M local (second tier).
        let cif = UsdRange::new(dec(8_000), dec(12_000));
        let layers = authoritative(cif, &rates, Some(&schedule), dec(1_000)).expect("layers");

        assert_eq!(layers.internal_tax_rates, Some((dec(0), dec(20))));
        assert_eq!(layers.internal_tax.min, dec(0));
        assert_eq!(layers.internal_tax.max, dec(2_400));
    }

    #[test]
    fn values_beyond_every_bound_take_the_open_tier() {
        let schedule = InternalTaxSchedule::from_bands(vec![
            (Some(dec(10_000_000)), dec(0)),
            (Some(dec(20_000_000)), dec(10)),
            (None, dec(20)),
        ])
        .expect("schedule");
        let rates = TaxRates { vat: Some(dec(21)), ..TaxRates::default() };
        let layers = authoritative(UsdRange::point(dec(50_000)), &rates, Some(&schedule), dec(1_000))
            .expect("layers");
        assert_eq!(layers.internal_tax_rates, Some((dec(20), dec(20))));
        assert_eq!(layers.internal_tax.min, dec(10_000));

        let zero = authoritative(UsdRange::zero(), &rates, Some(&schedule), dec(1_000)).expect("zero value");
        assert_eq!(zero.internal_tax_rates, Some((dec(0), dec(0))));
    }

    #[test]
    fn unrepresentable_local_value_is_reported() {
        let schedule = InternalTaxSchedule::from_bands(vec![(None, dec(20))]).expect("schedule");
        let rates = TaxRates { vat: Some(dec(21)), ..TaxRates::default() };
        let huge = UsdRange::point(Decimal::MAX / dec(1_000));
        let error = authoritative(huge, &rates, Some(&schedule), dec(1_000_000)).expect_err("overflow");
        assert_eq!(error, LandedCostError::AmountOutOfRange { stage: "internal_tax" });
    }

    #[test]
    fn withholdings_are_reported_outside_the_subtotal() {
        let rates = TaxRates {
            vat: Some(dec(10)),
            income_tax_withholding: Some(dec(6)),
            gross_receipts_withholding: Some(dec(2)),
            ..TaxRates::default()
        };
        let layers = authoritative(UsdRange::point(dec(1_000)), &rates, None, dec(1_000)).expect("layers");
        assert_eq!(layers.subtotal.min, dec(100));
        assert_eq!(layers.income_tax_withholding.min, dec(66));
        assert_eq!(layers.gross_receipts_withholding.min, dec(22));
    }

    #[test]
    fn heuristic_bands_widen_the_range() {
        let layers = heuristic(UsdRange::point(dec(10_000)));
        assert_eq!(layers.import_duty.min, dec(800));
        assert_eq!(layers.import_duty.max, dec(2_800));
        assert_eq!(layers.vat.min, dec(2_268));
        assert_eq!(layers.vat.max, dec(3_968));
    }
}
