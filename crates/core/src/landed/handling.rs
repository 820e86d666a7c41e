use rust_decimal::Decimal;

use crate::domain::quote::{HandlingBand, HandlingBreakdown, UsdRange};
use crate::domain::tariff::TariffCode;
use crate::text;

const MACHINERY_HEADINGS: &[&str] = &["8427", "8429", "8701", "8704", "8705"];
const MACHINERY_KEYWORDS: &[&str] = &[
    "autoelevador",
    "montacargas",
    "excavadora",
    "retroexcavadora",
    "grua",
    "tractor",
    "camion",
    "hormigonera",
    "topadora",
    "motoniveladora",
    "cargadora",
    "maquina",
    "maquinaria",
];

/// How the handling band was chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BandReason {
    TariffHeading,
    TitleKeyword,
    Fallback,
}

pub fn choose_band(code: Option<&TariffCode>, title: &str) -> (HandlingBand, BandReason) {
    if let Some(code) = code {
        if code.chapter() == "84" || MACHINERY_HEADINGS.contains(&code.heading()) {
            return (HandlingBand::IndustrialMachinery, BandReason::TariffHeading);
        }
    }
    let tokens = text::tokens(title, 3);
    let keyword_hit = tokens
        .iter()
        .any(|token| MACHINERY_KEYWORDS.iter().any(|keyword| token.starts_with(keyword)));
    if keyword_hit {
        (HandlingBand::IndustrialMachinery, BandReason::TitleKeyword)
    } else {
        (HandlingBand::Default, BandReason::Fallback)
    }
}

pub fn band_total(band: HandlingBand) -> UsdRange {
    match band {
        HandlingBand::IndustrialMachinery => UsdRange::new(Decimal::new(1_800, 0), Decimal::new(4_200, 0)),
        HandlingBand::Default => UsdRange::new(Decimal::new(900, 0), Decimal::new(1_800, 0)),
    }
}

/// Splits the band 40 / 30 / 20 / 10 into broker, port-deposit, transport and transfer.
pub fn breakdown(band: HandlingBand) -> HandlingBreakdown {
    let total = band_total(band);
    let share = |pct: i64| total.percent(Decimal::new(pct, 0), Decimal::new(pct, 0));
    let broker_fee = share(40);
    let port_deposit = share(30);
    let local_transport = share(20);
    let transfer_fee = share(10);
    HandlingBreakdown {
        broker_fee,
        port_deposit,
        local_transport,
        transfer_fee,
        subtotal: broker_fee + port_deposit + local_transport + transfer_fee,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{breakdown, choose_band, BandReason};
    use crate::domain::quote::HandlingBand;
    use crate::domain::tariff::TariffCode;

    #[test]
    fn machinery_headings_and_keywords_select_industrial_band() {
        let code = TariffCode::parse("8704.21.10").expect("code");
        assert_eq!(
            choose_band(Some(&code), "Volcador"),
            (HandlingBand::IndustrialMachinery, BandReason::TariffHeading)
        );
        assert_eq!(
            choose_band(None, "Autoelevador eléctrico 3T"),
            (HandlingBand::IndustrialMachinery, BandReason::TitleKeyword)
        );
        let shoes = TariffCode::parse("6403.99.90").expect("code");
        assert_eq!(choose_band(Some(&shoes), "Zapatillas"), (HandlingBand::Default, BandReason::Fallback));
    }

    #[test]
    fn split_adds_up_to_band() {
        let handling = breakdown(HandlingBand::Default);
        assert_eq!(handling.broker_fee.min, Decimal::new(360, 0));
        assert_eq!(handling.transfer_fee.max, Decimal::new(180, 0));
        assert_eq!(handling.subtotal.min, Decimal::new(900, 0));
        assert_eq!(handling.subtotal.max, Decimal::new(1_800, 0));
    }
}
