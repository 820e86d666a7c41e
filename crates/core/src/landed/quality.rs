/// Facts that raise confidence in an estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QualitySignals {
    pub declared_price: bool,
    pub declared_quantity: bool,
    pub resolved_code: bool,
    pub authoritative_rates: bool,
    pub known_origin: bool,
    pub known_shipping_profile: bool,
    pub machinery_heuristic: bool,
}

/// Additive 0..=100 score. Informational only; never gates a quote.
pub fn score(signals: QualitySignals) -> u8 {
    let weights = [
        (signals.declared_price, 25u32),
        (signals.declared_quantity, 15),
        (signals.resolved_code, 20),
        (signals.authoritative_rates, 20),
        (signals.known_origin, 5),
        (signals.known_shipping_profile, 5),
        (signals.machinery_heuristic, 10),
    ];
    let total: u32 = weights.iter().filter(|(present, _)| *present).map(|(_, weight)| weight).sum();
    total.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::{score, QualitySignals};

    #[test]
    fn sums_present_signals() {
        assert_eq!(score(QualitySignals::default()), 0);
        let partial = QualitySignals { declared_price: true, declared_quantity: true, ..Default::default() };
        assert_eq!(score(partial), 40);
        let all = QualitySignals {
            declared_price: true,
            declared_quantity: true,
            resolved_code: true,
            authoritative_rates: true,
            known_origin: true,
            known_shipping_profile: true,
            machinery_heuristic: true,
        };
        assert_eq!(score(all), 100);
    }
}
