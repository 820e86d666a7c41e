//! Landed-cost calculation: FOB, freight, insurance, taxes and local handling as USD ranges.

pub mod freight;
pub mod handling;
pub mod quality;
pub mod taxes;

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::LandedCostConfig;
use crate::domain::quote::{
    BudgetSizing, CostBreakdown, CostEstimate, EstimateMode, HandlingBand, HandlingBreakdown, PricingTraceStep,
    RatesSource, UsdRange,
};
use crate::domain::session::{Currency, Money, PriceKind, QuoteDraft};
use crate::domain::tariff::TariffDetail;
use crate::errors::LandedCostError;
use crate::fx::{ExchangeRate, ExchangeRateCache};

use handling::BandReason;
use quality::QualitySignals;

/// Total landed cost as a multiple of FOB, used to size a budget.
pub const LANDED_MULTIPLIER_MIN: Decimal = Decimal::from_parts(155, 0, 0, false, 2);
pub const LANDED_MULTIPLIER_MAX: Decimal = Decimal::from_parts(230, 0, 0, false, 2);
/// Largest FOB total or budget, in USD, the engine will price.
pub const MAX_PRICED_USD: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LandedCostSettings {
    pub insurance_pct: Decimal,
    pub default_unit_price: UsdRange,
}

impl Default for LandedCostSettings {
    fn default() -> Self {
        Self {
            insurance_pct: Decimal::ONE,
            default_unit_price: UsdRange::new(Decimal::new(500, 0), Decimal::new(2_500, 0)),
        }
    }
}

impl From<&LandedCostConfig> for LandedCostSettings {
    fn from(config: &LandedCostConfig) -> Self {
        Self {
            insurance_pct: config.insurance_pct,
            default_unit_price: UsdRange::new(config.default_unit_price_min, config.default_unit_price_max),
        }
    }
}

pub struct LandedCostEngine {
    settings: LandedCostSettings,
    fx: Arc<ExchangeRateCache>,
}

impl LandedCostEngine {
    pub fn new(settings: LandedCostSettings, fx: Arc<ExchangeRateCache>) -> Self {
        Self { settings, fx }
    }

    pub fn settings(&self) -> &LandedCostSettings {
        &self.settings
    }

    /// Fetches the current exchange rate and computes the estimate for `draft`.
    pub async fn calculate(
        &self,
        draft: &QuoteDraft,
        mode: EstimateMode,
        detail: Option<&TariffDetail>,
    ) -> Result<CostEstimate, LandedCostError> {
        let rate = self.fx.get().await;
        let estimate = match calculate_with_rate(&self.settings, draft, mode, detail, rate) {
            Ok(estimate) => estimate,
            Err(error) => {
                tracing::warn!(
                    event_name = "landed.estimate.rejected",
                    session_id = %draft.session_id,
                    mode = ?mode,
                    error = %error,
                    "landed cost inputs rejected"
                );
                return Err(error);
            }
        };
        tracing::info!(
            event_name = "landed.estimate.computed",
            session_id = %draft.session_id,
            mode = ?estimate.mode,
            rates_source = ?estimate.rates_source,
            quality_score = estimate.quality_score,
            "landed cost estimate computed"
        );
        Ok(estimate)
    }
}

/// Pure calculation given an already resolved exchange rate. Amounts the arithmetic cannot
/// represent, or that exceed [`MAX_PRICED_USD`], are rejected instead of priced.
pub fn calculate_with_rate(
    settings: &LandedCostSettings,
    draft: &QuoteDraft,
    mode: EstimateMode,
    detail: Option<&TariffDetail>,
    rate: ExchangeRate,
) -> Result<CostEstimate, LandedCostError> {
    let mut calc = Calculation::new(draft, rate);
    match mode {
        EstimateMode::Budget => calc.budget(),
        EstimateMode::Quote => calc.quote(settings, detail),
    }
}

struct Calculation<'a> {
    draft: &'a QuoteDraft,
    rate: ExchangeRate,
    trace: Vec<PricingTraceStep>,
    assumptions: Vec<String>,
}

impl<'a> Calculation<'a> {
    fn new(draft: &'a QuoteDraft, rate: ExchangeRate) -> Self {
        Self { draft, rate, trace: Vec::new(), assumptions: Vec::new() }
    }

    fn step(&mut self, stage: &str, detail: impl Into<String>, range: UsdRange) {
        self.trace.push(PricingTraceStep::new(stage, detail, range));
    }

    fn assume(&mut self, assumption: impl Into<String>) {
        let assumption = assumption.into();
        if !self.assumptions.contains(&assumption) {
            self.assumptions.push(assumption);
        }
    }

    /// Converts an amount to USD. ARS goes through the exchange rate; other currencies are
    /// taken at parity.
    fn to_usd(
        &mut self,
        amount: Decimal,
        currency: Currency,
        stage: &'static str,
    ) -> Result<Decimal, LandedCostError> {
        let usd = match currency {
            Currency::Usd => amount,
            Currency::Ars => {
                if self.rate.is_assumed() {
                    self.assume(format!(
                        "tipo de cambio de referencia ({} ARS por USD)",
                        self.rate.local_per_usd.round_dp(2)
                    ));
                }
                amount
                    .checked_div(self.rate.local_per_usd)
                    .ok_or(LandedCostError::AmountOutOfRange { stage })?
            }
            other => {
                self.assume(format!("precio en {} tomado a la par con USD", other.code()));
                amount
            }
        };
        within_limit(usd, stage)
    }

    fn unit_fob(&mut self, settings: &LandedCostSettings) -> Result<(UsdRange, bool), LandedCostError> {
        let hint = self.draft.product.as_ref().and_then(|product| product.price.clone());
        if let Some(hint) = hint.as_ref().filter(|hint| hint.kind == PriceKind::Range) {
            let min = self.to_usd(hint.min, hint.currency, "unit_price")?;
            let max = self.to_usd(hint.max, hint.currency, "unit_price")?;
            return Ok((UsdRange::new(min, max), true));
        }
        if let Some(Money { amount, currency }) = self.draft.unit_price {
            let usd = self.to_usd(amount, currency, "unit_price")?;
            return Ok((UsdRange::point(usd), true));
        }
        if let Some(hint) = hint {
            let usd = self.to_usd(hint.min, hint.currency, "unit_price")?;
            return Ok((UsdRange::point(usd), true));
        }
        self.assume(format!(
            "precio unitario no informado: rango conservador USD {} a {}",
            settings.default_unit_price.min, settings.default_unit_price.max
        ));
        Ok((settings.default_unit_price, false))
    }

    fn budget(&mut self) -> Result<CostEstimate, LandedCostError> {
        let target = match self.draft.target_budget {
            Some(Money { amount, currency }) => self.to_usd(amount, currency, "budget")?,
            None => Decimal::ZERO,
        };
        let fob_budget = UsdRange::new(target / LANDED_MULTIPLIER_MAX, target / LANDED_MULTIPLIER_MIN);
        self.step(
            "fob_budget",
            format!("presupuesto / {LANDED_MULTIPLIER_MIN}..{LANDED_MULTIPLIER_MAX}"),
            fob_budget,
        );

        let unit_price = match self.draft.unit_price {
            Some(Money { amount, currency }) => Some(self.to_usd(amount, currency, "unit_price")?),
            None => None,
        };
        let affordable_units = unit_price.filter(|price| *price > Decimal::ZERO).map(|price| {
            let units = |budget: Decimal| (budget / price).floor().to_u32().unwrap_or(u32::MAX);
            (units(fob_budget.min), units(fob_budget.max))
        });
        if affordable_units.is_none() {
            self.assume("precio unitario pendiente: no se calcula cantidad alcanzable");
        }

        let signals = QualitySignals {
            declared_price: unit_price.is_some(),
            declared_quantity: self.draft.quantity.is_some(),
            resolved_code: self.draft.tariff_code.is_some(),
            known_origin: self.draft.origin_country.is_some(),
            known_shipping_profile: self.draft.shipping_profile.is_some(),
            ..QualitySignals::default()
        };

        Ok(CostEstimate {
            mode: EstimateMode::Budget,
            breakdown: None,
            budget: Some(BudgetSizing { target, fob_budget: fob_budget.rounded(), affordable_units }),
            explanation: std::mem::take(&mut self.trace),
            quality_score: quality::score(signals),
            known_fields: self.draft.known_fields(),
            assumptions: std::mem::take(&mut self.assumptions),
            rates_source: RatesSource::Heuristic,
        })
    }

    fn quote(
        &mut self,
        settings: &LandedCostSettings,
        detail: Option<&TariffDetail>,
    ) -> Result<CostEstimate, LandedCostError> {
        let (unit_fob, declared_price) = self.unit_fob(settings)?;
        self.step("unit_fob", "precio unitario FOB", unit_fob);

        let quantity = match self.draft.quantity {
            Some(quantity) if quantity > 0 => quantity,
            _ => {
                self.assume("cantidad no informada: 1 unidad");
                1
            }
        };
        let fob_total = unit_fob
            .checked_times(Decimal::from(quantity))
            .ok_or(LandedCostError::AmountOutOfRange { stage: "fob_total" })?;
        within_limit(fob_total.max, "fob_total")?;
        self.step("fob_total", format!("FOB unitario x {quantity}"), fob_total);

        if self.draft.shipping_profile.is_none() {
            self.assume("perfil de envío medio");
        }
        let freight = freight::estimate(unit_fob, self.draft.shipping_profile);
        self.step(
            "freight",
            format!(
                "{}-{} % del FOB unitario, con topes por extremo",
                freight::FREIGHT_PCT_MIN,
                freight::FREIGHT_PCT_MAX
            ),
            freight,
        );

        let insurance = fob_total.percent(settings.insurance_pct, settings.insurance_pct);
        self.step("insurance", format!("{} % del FOB", settings.insurance_pct), insurance);

        let cif = fob_total + freight;
        self.step("cif", "FOB + flete", cif);
        let cif_insurance = cif + insurance;
        self.step("cif_insurance", "CIF + seguro", cif_insurance);

        let published = detail.filter(|detail| detail.rates.is_usable());
        let (layers, rates_source) = match published {
            Some(detail) => {
                let layers = taxes::authoritative(
                    cif_insurance,
                    &detail.rates,
                    detail.internal_tax.as_ref(),
                    self.rate.local_per_usd,
                )?;
                (layers, RatesSource::Authoritative)
            }
            None => {
                self.assume("alícuotas estimadas sin posición arancelaria confirmada");
                (taxes::heuristic(cif_insurance), RatesSource::Heuristic)
            }
        };

        match (rates_source, published) {
            (RatesSource::Authoritative, Some(detail)) => {
                let rates = &detail.rates;
                self.step(
                    "statistical_fee",
                    format!("tasa estadística {} % sobre CIF + seguro", pct(rates.statistical_fee)),
                    layers.statistical_fee,
                );
                self.step(
                    "import_duty",
                    format!("derecho de importación {} % sobre CIF + seguro", pct(rates.import_duty)),
                    layers.import_duty,
                );
                self.step("vat_base", "CIF + seguro + tasa + derecho", layers.vat_base);
                self.step("vat", format!("IVA {} % sobre base IVA", pct(rates.vat)), layers.vat);
                self.step(
                    "vat_surcharge",
                    format!("IVA adicional {} % sobre base IVA", pct(rates.vat_surcharge)),
                    layers.vat_surcharge,
                );
                if let Some((min_rate, max_rate)) = layers.internal_tax_rates {
                    if self.rate.is_assumed() {
                        self.assume(format!(
                            "tramo de impuestos internos con tipo de cambio de referencia ({} ARS por USD)",
                            self.rate.local_per_usd.round_dp(2)
                        ));
                    }
                    self.step(
                        "internal_tax",
                        format!("impuestos internos {min_rate} % / {max_rate} % según tramo"),
                        layers.internal_tax,
                    );
                }
            }
            _ => {
                self.step(
                    "import_duty",
                    format!(
                        "derecho estimado {}-{} % sobre CIF + seguro (confianza baja)",
                        taxes::HEURISTIC_DUTY_PCT_MIN,
                        taxes::HEURISTIC_DUTY_PCT_MAX
                    ),
                    layers.import_duty,
                );
                self.step(
                    "vat",
                    format!(
                        "IVA y percepciones estimados {}-{} % (confianza baja)",
                        taxes::HEURISTIC_VAT_PCT_MIN,
                        taxes::HEURISTIC_VAT_PCT_MAX
                    ),
                    layers.vat,
                );
            }
        }
        self.step("tax_subtotal", "subtotal de tributos", layers.subtotal);

        let draft = self.draft;
        let title = draft.product.as_ref().map(|product| product.title.as_str()).unwrap_or_default();
        let (band, reason) = handling::choose_band(draft.tariff_code.as_ref(), title);
        let handling = handling::breakdown(band);
        let band_name = match band {
            HandlingBand::IndustrialMachinery => "maquinaria industrial",
            HandlingBand::Default => "general",
        };
        self.step("handling", format!("gastos locales, banda {band_name}"), handling.subtotal);

        let grand_total = cif_insurance.rounded() + layers.subtotal.rounded() + handling.subtotal.rounded();
        self.step("grand_total", "CIF + seguro + tributos + gastos locales", grand_total);

        if layers.income_tax_withholding != UsdRange::zero() || layers.gross_receipts_withholding != UsdRange::zero() {
            self.step(
                "advance_withholdings",
                "percepciones a cuenta (no suman al total)",
                layers.income_tax_withholding + layers.gross_receipts_withholding,
            );
        }

        let signals = QualitySignals {
            declared_price,
            declared_quantity: self.draft.quantity.is_some(),
            resolved_code: self.draft.tariff_code.is_some(),
            authoritative_rates: rates_source == RatesSource::Authoritative,
            known_origin: self.draft.origin_country.is_some()
                || self.draft.product.as_ref().is_some_and(|product| product.origin.is_some()),
            known_shipping_profile: self.draft.shipping_profile.is_some(),
            machinery_heuristic: band == HandlingBand::IndustrialMachinery && reason != BandReason::Fallback,
        };

        let breakdown = CostBreakdown {
            unit_fob: unit_fob.rounded(),
            quantity,
            fob_total: fob_total.rounded(),
            freight: freight.rounded(),
            insurance: insurance.rounded(),
            cif: cif.rounded(),
            cif_insurance: cif_insurance.rounded(),
            statistical_fee: layers.statistical_fee.rounded(),
            import_duty: layers.import_duty.rounded(),
            vat: layers.vat.rounded(),
            vat_surcharge: layers.vat_surcharge.rounded(),
            internal_tax: layers.internal_tax.rounded(),
            tax_subtotal: layers.subtotal.rounded(),
            handling: round_handling(handling),
            grand_total: grand_total.rounded(),
            income_tax_withholding: layers.income_tax_withholding.rounded(),
            gross_receipts_withholding: layers.gross_receipts_withholding.rounded(),
        };

        Ok(CostEstimate {
            mode: EstimateMode::Quote,
            breakdown: Some(breakdown),
            budget: None,
            explanation: std::mem::take(&mut self.trace),
            quality_score: quality::score(signals),
            known_fields: self.draft.known_fields(),
            assumptions: std::mem::take(&mut self.assumptions),
            rates_source,
        })
    }
}

fn within_limit(value: Decimal, stage: &'static str) -> Result<Decimal, LandedCostError> {
    if value.abs() > MAX_PRICED_USD {
        return Err(LandedCostError::AmountOutOfRange { stage });
    }
    Ok(value)
}

fn pct(rate: Option<Decimal>) -> Decimal {
    rate.unwrap_or(Decimal::ZERO).normalize()
}

fn round_handling(handling: HandlingBreakdown) -> HandlingBreakdown {
    HandlingBreakdown {
        broker_fee: handling.broker_fee.rounded(),
        port_deposit: handling.port_deposit.rounded(),
        local_transport: handling.local_transport.rounded(),
        transfer_fee: handling.transfer_fee.rounded(),
        subtotal: handling.subtotal.rounded(),
    }
}
