//! JSON payloads of the tariff service and their conversion into domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use landcost_core::domain::tariff::{
    CandidateSource, DetailSource, InternalTaxSchedule, Provenance, TariffCandidate, TariffCode,
    TariffDetail, TaxKind, TaxRates,
};

use crate::error::TariffClientError;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WireSearchHit {
    pub code: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WireRates {
    pub statistical_fee: Option<Decimal>,
    pub import_duty: Option<Decimal>,
    pub vat: Option<Decimal>,
    pub vat_surcharge: Option<Decimal>,
    pub income_tax_withholding: Option<Decimal>,
    pub gross_receipts_withholding: Option<Decimal>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WireTier {
    #[serde(default)]
    pub up_to: Option<Decimal>,
    pub rate: Decimal,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WireInternalTax {
    pub tiers: Vec<WireTier>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WirePosition {
    pub code: String,
    pub label: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub rates: WireRates,
    #[serde(default)]
    pub internal_tax: Option<WireInternalTax>,
    #[serde(default)]
    pub internal_tax_document: Option<String>,
    #[serde(default)]
    pub interventions: Vec<String>,
}

/// Search hits with a malformed code are dropped rather than failing the whole result.
pub fn candidates_from_hits(hits: Vec<WireSearchHit>, limit: usize) -> Vec<TariffCandidate> {
    let mut candidates: Vec<TariffCandidate> = Vec::new();
    for hit in hits {
        let Ok(code) = TariffCode::parse(&hit.code) else {
            tracing::debug!(event_name = "tariff.client.hit_dropped", code = %hit.code, "malformed code in search hit");
            continue;
        };
        if candidates.iter().any(|candidate| candidate.code == code) {
            continue;
        }
        let label = hit.label.map(|label| label.trim().to_string()).filter(|label| !label.is_empty());
        candidates.push(TariffCandidate::new(code, label, CandidateSource::Authoritative));
        if candidates.len() >= limit {
            break;
        }
    }
    candidates
}

fn validate_rate(kind: TaxKind, rate: Option<Decimal>) -> Result<Option<Decimal>, TariffClientError> {
    match rate {
        Some(rate) if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED => Err(
            TariffClientError::InvalidPayload(format!("{kind:?} rate {rate} outside 0..=100")),
        ),
        other => Ok(other),
    }
}

impl WirePosition {
    /// Validates the payload into a `TariffDetail`: code shape, rates within 0..=100 and
    /// contiguous internal-tax tiers.
    pub fn into_detail(
        self,
        source: DetailSource,
        fetched_at: DateTime<Utc>,
    ) -> Result<TariffDetail, TariffClientError> {
        let code = TariffCode::parse(&self.code)
            .map_err(|error| TariffClientError::InvalidPayload(error.to_string()))?;
        let label = self.label.trim().to_string();
        if label.is_empty() {
            return Err(TariffClientError::InvalidPayload(format!("empty label for {code}")));
        }

        let mut rates = TaxRates::default();
        for (kind, value) in [
            (TaxKind::StatisticalFee, self.rates.statistical_fee),
            (TaxKind::ImportDuty, self.rates.import_duty),
            (TaxKind::Vat, self.rates.vat),
            (TaxKind::VatSurcharge, self.rates.vat_surcharge),
            (TaxKind::IncomeTaxWithholding, self.rates.income_tax_withholding),
            (TaxKind::GrossReceiptsWithholding, self.rates.gross_receipts_withholding),
        ] {
            if let Some(rate) = validate_rate(kind, value)? {
                rates.set(kind, rate);
            }
        }

        let internal_tax = match self.internal_tax {
            Some(wire) if !wire.tiers.is_empty() => Some(
                InternalTaxSchedule::from_bands(wire.tiers.into_iter().map(|tier| (tier.up_to, tier.rate)).collect())
                    .map_err(|error| TariffClientError::InvalidPayload(error.to_string()))?,
            ),
            _ => None,
        };

        let document_url = self
            .internal_tax_document
            .map(|url| url.trim().to_string())
            .filter(|url| url.starts_with("http://") || url.starts_with("https://"));

        Ok(TariffDetail {
            code,
            label,
            breadcrumb: self.path.into_iter().map(|part| part.trim().to_string()).filter(|part| !part.is_empty()).collect(),
            rates,
            internal_tax,
            interventions: self.interventions,
            provenance: Provenance { source, fetched_at, document_url },
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use landcost_core::domain::tariff::DetailSource;
    use rust_decimal::Decimal;

    use super::{candidates_from_hits, WirePosition, WireSearchHit};

    #[test]
    fn converts_valid_position() {
        let payload = r#"{
            "code": "8704.21.10",
            "label": " Volquetes hasta 5 t ",
            "path": ["Sección XVII", " ", "Capítulo 87"],
            "rates": {"statistical_fee": 3, "import_duty": "35", "vat": 21},
            "internal_tax": {"tiers": [{"up_to": 10000000, "rate": 0}, {"rate": 20}]},
            "internal_tax_document": "https://example.test/tiers",
            "interventions": ["INTI"]
        }"#;
        let position: WirePosition = serde_json::from_str(payload).expect("payload");
        let detail = position.into_detail(DetailSource::Authoritative, Utc::now()).expect("valid");

        assert_eq!(detail.label, "Volquetes hasta 5 t");
        assert_eq!(detail.breadcrumb.len(), 2);
        assert_eq!(detail.rates.import_duty, Some(Decimal::new(35, 0)));
        assert_eq!(detail.internal_tax.as_ref().map(|schedule| schedule.tiers().len()), Some(2));
        assert_eq!(detail.provenance.document_url.as_deref(), Some("https://example.test/tiers"));
    }

    #[test]
    fn rejects_out_of_range_rates_and_broken_tiers() {
        let bad_rate: WirePosition =
            serde_json::from_str(r#"{"code":"8704.21.10","label":"x","rates":{"vat":121}}"#).expect("payload");
        assert!(bad_rate.into_detail(DetailSource::Authoritative, Utc::now()).is_err());

        let bad_tiers: WirePosition = serde_json::from_str(
            r#"{"code":"8704.21.10","label":"x","internal_tax":{"tiers":[{"rate":5},{"rate":10}]}}"#,
        )
        .expect("payload");
        assert!(bad_tiers.into_detail(DetailSource::Authoritative, Utc::now()).is_err());
    }

    #[test]
    fn search_hits_drop_malformed_codes_and_duplicates() {
        let hits = vec![
            WireSearchHit { code: "8427.10.19".to_string(), label: Some("Carretillas".to_string()) },
            WireSearchHit { code: "84-27".to_string(), label: None },
            WireSearchHit { code: "8427.10.19".to_string(), label: None },
            WireSearchHit { code: "84271090".to_string(), label: Some(" ".to_string()) },
        ];
        let candidates = candidates_from_hits(hits, 8);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].code.as_str(), "8427.10.90");
        assert!(candidates[1].label.is_none());
    }
}
