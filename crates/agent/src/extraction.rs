//! Slot values carried by a user turn: prices, quantities, budgets, origin and shipping profile.
//!
//! Extraction runs in two layers. The strict layer only accepts values with an explicit
//! marker (a currency next to the amount, a unit word or `x` next to the quantity). The
//! fallback layer accepts a bare number when the conversation context says which field it
//! answers, or when trigger words name the field without contradicting the other one.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rust_decimal::Decimal;

use landcost_core::domain::session::{Currency, Money, ShippingProfile};
use landcost_core::flows::FlowState;
use landcost_core::text;

use crate::signals;
use crate::turn::{PriorTurn, Role};

static PREFIXED_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(u\$s|us\$|usd|ars|eur|brl|cny|rmb)|(€|\$))\s*([0-9][0-9.,]*)(\s*(?:k|mil)\b)?")
        .expect("valid regex")
});
static SUFFIXED_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b([0-9][0-9.,]*)(\s*(?:k|mil)\b)?\s*(usd|u\$s|d[oó]lares|d[oó]lar|pesos|ars|euros|eur|€|reales|brl|yuanes|cny|rmb)",
    )
    .expect("valid regex")
});
static UNIT_QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,6})\s*(?:unidades|unidad|unid|uds|ud|piezas|pieza|pzas|pza|equipos|equipo|pcs|u)\b")
        .expect("valid regex")
});
static TIMES_QUANTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[\s,;(])x\s*(\d{1,6})\b").expect("valid regex"));
static LABELLED_QUANTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bcantidad\s*(?:de|:|=|es)?\s*(\d{1,6})\b").expect("valid regex"));
static NUMBER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9][0-9.,]*[A-Za-z]*").expect("valid regex"));
static LEADING_INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:hola[,.!]?\s*)?(?:(?:ah|eh)[,.]?\s+)?(?:no[,.]?\s+)?(?:(?:mejor|en realidad|perd[oó]n|corrijo)[,:]?\s+)?(?:(?:quiero|necesito|quisiera|me gustar[ií]a|busco|deseo|queremos|necesitamos)\s+)?(?:(?:importar|cotizar|traer|comprar)\s+)?(?:(?:un|una|unos|unas|el|la|los|las)\s+)?",
    )
    .expect("valid regex")
});

/// Largest amount a turn may carry, in its own currency (10^12).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);
/// Largest quantity a turn may carry; the unit patterns stop at six digits too.
pub const MAX_QUANTITY: u32 = 999_999;

const COUNTRIES: &[(&str, &str)] = &[
    ("china", "China"),
    ("eeuu", "Estados Unidos"),
    ("usa", "Estados Unidos"),
    ("brasil", "Brasil"),
    ("alemania", "Alemania"),
    ("italia", "Italia"),
    ("espana", "España"),
    ("japon", "Japón"),
    ("corea", "Corea del Sur"),
    ("india", "India"),
    ("turquia", "Turquía"),
    ("mexico", "México"),
    ("chile", "Chile"),
    ("taiwan", "Taiwán"),
    ("francia", "Francia"),
    ("canada", "Canadá"),
    ("vietnam", "Vietnam"),
];

const LIGHT_WORDS: &[&str] = &["liviano", "liviana", "ligero", "ligera", "pequeno", "pequena", "compacto", "compacta"];
const HEAVY_WORDS: &[&str] = &["pesado", "pesada", "voluminoso", "voluminosa", "sobredimensionado", "sobredimensionada"];
const MEDIUM_WORDS: &[&str] = &["mediano", "mediana"];

/// Field a bare number would answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedField {
    Price,
    Quantity,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmountMatch {
    pub value: Decimal,
    pub currency: Currency,
    pub span: Range<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Extraction {
    pub price: Option<Money>,
    pub quantity: Option<u32>,
    pub budget: Option<Money>,
    pub origin: Option<String>,
    pub shipping_profile: Option<ShippingProfile>,
    /// Price taken from a bare number, reported as an assumed currency.
    pub price_currency_assumed: bool,
}

impl Extraction {
    pub fn has_slot_value(&self) -> bool {
        self.price.is_some() || self.quantity.is_some() || self.budget.is_some()
    }
}

/// Parses an amount written with either separator convention.
///
/// `1.500,50` and `1,500.50` are both 1500.50; a single separator followed by exactly three
/// digits is a thousands separator (`9,800`, `15.000`), otherwise it is the decimal mark.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let raw = raw.trim().trim_end_matches(['.', ',']);
    if raw.is_empty() {
        return None;
    }
    let last_dot = raw.rfind('.');
    let last_comma = raw.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => raw.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => raw.replace(',', ""),
        (Some(_), None) => single_separator(raw, '.'),
        (None, Some(_)) => single_separator(raw, ','),
        (None, None) => raw.to_string(),
    };
    normalized.parse::<Decimal>().ok()
}

fn single_separator(raw: &str, separator: char) -> String {
    let groups: Vec<&str> = raw.split(separator).collect();
    let thousands = groups.len() > 2 || groups.last().is_some_and(|tail| tail.len() == 3);
    if thousands {
        groups.concat()
    } else {
        raw.replace(separator, ".")
    }
}

fn currency_from_marker(marker: &str) -> Option<Currency> {
    let marker = text::normalize(marker);
    match marker.as_str() {
        "u$s" | "us$" | "usd" | "$" | "dolares" | "dolar" => Some(Currency::Usd),
        "ars" | "pesos" => Some(Currency::Ars),
        "eur" | "€" | "euros" => Some(Currency::Eur),
        "brl" | "reales" => Some(Currency::Brl),
        "cny" | "rmb" | "yuanes" => Some(Currency::Cny),
        _ => None,
    }
}

fn within_cap(amount: Decimal) -> Option<Decimal> {
    (amount <= MAX_AMOUNT).then_some(amount)
}

fn scaled(amount: Decimal, multiplier: Option<regex::Match<'_>>) -> Option<Decimal> {
    let amount = match multiplier {
        Some(_) => amount.checked_mul(Decimal::ONE_THOUSAND)?,
        None => amount,
    };
    within_cap(amount)
}

fn amount_from(captures: &Captures<'_>, amount_group: usize, multiplier_group: usize, currency: Currency) -> Option<AmountMatch> {
    let whole = captures.get(0)?;
    let value = parse_amount(captures.get(amount_group)?.as_str())?;
    Some(AmountMatch { value: scaled(value, captures.get(multiplier_group))?, currency, span: whole.range() })
}

/// Amounts with an explicit currency marker, in text order.
pub fn strict_amounts(input: &str) -> Vec<AmountMatch> {
    let mut found: Vec<AmountMatch> = Vec::new();
    for captures in PREFIXED_AMOUNT.captures_iter(input) {
        let marker = captures.get(1).or_else(|| captures.get(2)).map(|marker| marker.as_str()).unwrap_or_default();
        if let Some(currency) = currency_from_marker(marker) {
            if let Some(amount) = amount_from(&captures, 3, 4, currency) {
                found.push(amount);
            }
        }
    }
    for captures in SUFFIXED_AMOUNT.captures_iter(input) {
        let Some(currency) = captures.get(3).and_then(|marker| currency_from_marker(marker.as_str())) else {
            continue;
        };
        if let Some(amount) = amount_from(&captures, 1, 2, currency) {
            if !found.iter().any(|existing| overlaps(&existing.span, &amount.span)) {
                found.push(amount);
            }
        }
    }
    found.sort_by_key(|amount| amount.span.start);
    found
}

/// Quantity with an explicit unit word, `x` prefix or `cantidad` label.
pub fn strict_quantity(input: &str) -> Option<(u32, Range<usize>)> {
    for pattern in [&*UNIT_QUANTITY, &*TIMES_QUANTITY, &*LABELLED_QUANTITY] {
        if let Some(captures) = pattern.captures(input) {
            let (Some(whole), Some(number)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if let Ok(quantity) = number.as_str().parse::<u32>() {
                if quantity > 0 && quantity <= MAX_QUANTITY {
                    return Some((quantity, whole.range()));
                }
            }
        }
    }
    None
}

fn overlaps(left: &Range<usize>, right: &Range<usize>) -> bool {
    left.start < right.end && right.start < left.end
}

/// Numbers with no unit letters attached (`500`, `1.200,50`), outside `excluded` spans.
fn bare_numbers(input: &str, excluded: &[Range<usize>]) -> Vec<Decimal> {
    NUMBER_TOKEN
        .find_iter(input)
        .filter(|found| !excluded.iter().any(|span| overlaps(span, &found.range())))
        .filter(|found| found.as_str().chars().last().is_some_and(|last| !last.is_alphabetic()))
        .filter(|found| {
            // Weight answers such as `<=5` or `> 5` are not amounts.
            let before = input[..found.start()].trim_end();
            !(before.ends_with('<') || before.ends_with('>') || before.ends_with('=') || before.ends_with('≤'))
        })
        .filter_map(|found| parse_amount(found.as_str()).and_then(within_cap))
        .collect()
}

/// Input with every strictly-marked amount and quantity removed.
pub fn strip_slot_values(input: &str) -> String {
    let mut spans: Vec<Range<usize>> = strict_amounts(input).into_iter().map(|amount| amount.span).collect();
    if let Some((_, span)) = strict_quantity(input) {
        spans.push(span);
    }
    spans.sort_by_key(|span| span.start);

    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;
    for span in spans {
        if span.start < cursor {
            continue;
        }
        output.push_str(&input[cursor..span.start]);
        output.push(' ');
        cursor = span.end;
    }
    output.push_str(&input[cursor..]);
    output
}

/// Product phrase of a turn: slot values, links and leading intent words removed.
pub fn product_phrase(input: &str) -> String {
    let without_link = match signals::contains_link(input) {
        Some(link) => input.replace(link, " "),
        None => input.to_string(),
    };
    let stripped = strip_slot_values(&without_link);
    let collapsed = stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" ,", ",");
    let trimmed = collapsed.trim_matches(|character: char| character.is_whitespace() || ",;.:-".contains(character));
    LEADING_INTENT.replace(trimmed, "").trim_matches(|character: char| character.is_whitespace() || ",;.".contains(character)).to_string()
}

/// Display name for a normalized country token.
pub fn country_name(token: &str) -> Option<&'static str> {
    COUNTRIES.iter().find(|(key, _)| *key == token).map(|(_, name)| *name)
}

pub fn origin_country(input: &str) -> Option<String> {
    let normalized = text::normalize(input);
    if normalized.contains("estados unidos") {
        return Some("Estados Unidos".to_string());
    }
    text::tokens(&normalized, 3).iter().find_map(|token| country_name(token)).map(str::to_string)
}

pub fn shipping_profile(input: &str) -> Option<ShippingProfile> {
    let tokens = text::tokens(input, 3);
    let has = |words: &[&str]| tokens.iter().any(|token| words.contains(&token.as_str()));
    if has(HEAVY_WORDS) {
        Some(ShippingProfile::Heavy)
    } else if has(LIGHT_WORDS) {
        Some(ShippingProfile::Light)
    } else if has(MEDIUM_WORDS) {
        Some(ShippingProfile::Medium)
    } else {
        None
    }
}

/// Field the last assistant turn asked for; without history, the field of the current stage.
pub fn expected_field(history: &[PriorTurn], stage: FlowState) -> Option<ExpectedField> {
    let last_assistant = history.iter().rev().find(|turn| turn.role == Role::Assistant);
    match last_assistant {
        Some(turn) => {
            let normalized = text::normalize(&turn.text);
            // Only the final question counts; earlier sentences may quote labels or amounts.
            let asked = normalized.rsplit('¿').next().unwrap_or_default();
            if asked.contains("cuantas unidades") || asked.contains("cantidad") {
                Some(ExpectedField::Quantity)
            } else if asked.contains("precio") || asked.contains("cuanto cuesta") || asked.contains("valor unitario") {
                Some(ExpectedField::Price)
            } else {
                None
            }
        }
        None => match stage {
            FlowState::AwaitingPrice => Some(ExpectedField::Price),
            FlowState::AwaitingQuantity => Some(ExpectedField::Quantity),
            _ => None,
        },
    }
}

/// Runs both extraction layers over `input`.
pub fn extract(input: &str, expected: Option<ExpectedField>) -> Extraction {
    let mut extraction = Extraction {
        origin: origin_country(input),
        shipping_profile: shipping_profile(input),
        ..Extraction::default()
    };

    let amounts = strict_amounts(input);
    let quantity = strict_quantity(input);
    let budget_signal = signals::has_budget_signal(input);

    let mut amounts_iter = amounts.iter();
    if budget_signal {
        if let Some(amount) = amounts_iter.next() {
            extraction.budget = Some(Money { amount: amount.value, currency: amount.currency });
        }
    }
    if let Some(amount) = amounts_iter.next() {
        extraction.price = Some(Money { amount: amount.value, currency: amount.currency });
    }
    if let Some((value, _)) = &quantity {
        extraction.quantity = Some(*value);
    }

    let mut excluded: Vec<Range<usize>> = amounts.iter().map(|amount| amount.span.clone()).collect();
    if let Some((_, span)) = &quantity {
        excluded.push(span.clone());
    }
    let bare = bare_numbers(input, &excluded);
    let [number] = bare.as_slice() else {
        return extraction;
    };
    let number = *number;

    if budget_signal && extraction.budget.is_none() {
        extraction.budget = Some(Money::usd(number));
        return extraction;
    }

    let price_trigger = signals::has_price_trigger(input);
    let quantity_trigger = signals::has_quantity_trigger(input);
    let target = if price_trigger && !quantity_trigger {
        Some(ExpectedField::Price)
    } else if quantity_trigger && !price_trigger && !signals::has_currency_signal(input) {
        Some(ExpectedField::Quantity)
    } else {
        expected
    };

    match target {
        Some(ExpectedField::Price) if extraction.price.is_none() && number > Decimal::ZERO => {
            extraction.price = Some(Money::usd(number));
            extraction.price_currency_assumed = true;
        }
        Some(ExpectedField::Quantity) if extraction.quantity.is_none() => {
            if number.fract().is_zero() && number > Decimal::ZERO {
                extraction.quantity = u32::try_from(number.mantissa() / 10_i128.pow(number.scale()))
                    .ok()
                    .filter(|quantity| *quantity <= MAX_QUANTITY);
            }
        }
        _ => {}
    }
    extraction
}

#[cfg(test)]
mod tests {
    use landcost_core::domain::session::{Currency, Money, ShippingProfile};
    use landcost_core::flows::FlowState;
    use rust_decimal::Decimal;

    use super::*;
    use crate::turn::{PriorTurn, Role};

    #[test]
    fn parses_both_separator_conventions() {
        assert_eq!(parse_amount("1.500,50"), Some(Decimal::new(150_050, 2)));
        assert_eq!(parse_amount("9,800"), Some(Decimal::new(9_800, 0)));
        assert_eq!(parse_amount("15.000"), Some(Decimal::new(15_000, 0)));
        assert_eq!(parse_amount("120.50"), Some(Decimal::new(12_050, 2)));
        assert_eq!(parse_amount("1,500.50"), Some(Decimal::new(150_050, 2)));
        assert_eq!(parse_amount("1.250.000"), Some(Decimal::new(1_250_000, 0)));
        assert_eq!(parse_amount("10,5"), Some(Decimal::new(105, 1)));
        assert_eq!(parse_amount("4180,"), Some(Decimal::new(4_180, 0)));
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn strict_layer_needs_markers() {
        let amounts = strict_amounts("autoelevador eléctrico 3T, USD 4180, x1");
        assert_eq!(amounts.len(), 1);
        assert_eq!(amounts[0].value, Decimal::new(4_180, 0));
        assert_eq!(amounts[0].currency, Currency::Usd);

        assert_eq!(strict_amounts("cuesta 2.500.000 pesos")[0].currency, Currency::Ars);
        assert_eq!(strict_amounts("US$ 46k")[0].value, Decimal::new(46_000, 0));
        assert!(strict_amounts("500").is_empty());

        assert_eq!(strict_quantity("x1").map(|(value, _)| value), Some(1));
        assert_eq!(strict_quantity("10 unidades").map(|(value, _)| value), Some(10));
        assert_eq!(strict_quantity("cantidad: 4").map(|(value, _)| value), Some(4));
        assert_eq!(strict_quantity("autoelevador 3T"), None);
        assert_eq!(strict_quantity("10 usd"), None);
    }

    #[test]
    fn oversized_values_are_not_taken_as_slots() {
        assert!(strict_amounts("USD 79228162514264337593543950335k").is_empty());
        assert!(strict_amounts("USD 2.000.000.000.000").is_empty());
        assert_eq!(strict_amounts("USD 900.000.000")[0].value, Decimal::new(900_000_000, 0));

        let huge = extract("USD 99999999999999999999, 999999 unidades", None);
        assert_eq!(huge.price, None);
        assert_eq!(huge.quantity, Some(999_999));

        assert_eq!(extract("4294967295", Some(ExpectedField::Quantity)).quantity, None);
        assert_eq!(extract("99999999999999999999", Some(ExpectedField::Price)).price, None);
    }

    #[test]
    fn one_turn_can_fill_several_slots() {
        let extraction = extract("autoelevador eléctrico 3T, USD 4180, x1 desde China", None);
        assert_eq!(extraction.price, Some(Money::usd(Decimal::new(4_180, 0))));
        assert_eq!(extraction.quantity, Some(1));
        assert_eq!(extraction.origin.as_deref(), Some("China"));
        assert!(!extraction.price_currency_assumed);
    }

    #[test]
    fn bare_number_follows_the_expected_field() {
        let priced = extract("500", Some(ExpectedField::Price));
        assert_eq!(priced.price, Some(Money::usd(Decimal::new(500, 0))));
        assert!(priced.price_currency_assumed);

        assert_eq!(extract("12", Some(ExpectedField::Quantity)).quantity, Some(12));
        assert_eq!(extract("500", None), Extraction::default());
        assert_eq!(extract("2,5", Some(ExpectedField::Quantity)).quantity, None);
    }

    #[test]
    fn trigger_words_override_expectation_without_conflict() {
        let quantity = extract("serían 20 unidades", Some(ExpectedField::Price));
        assert_eq!(quantity.quantity, Some(20));
        assert!(quantity.price.is_none());

        let price = extract("el precio es 750", Some(ExpectedField::Quantity));
        assert_eq!(price.price, Some(Money::usd(Decimal::new(750, 0))));
        assert!(price.quantity.is_none());
    }

    #[test]
    fn budget_takes_the_first_amount() {
        let extraction = extract("tengo un presupuesto de USD 46.000", Some(ExpectedField::Price));
        assert_eq!(extraction.budget, Some(Money::usd(Decimal::new(46_000, 0))));
        assert!(extraction.price.is_none());

        let bare = extract("mi presupuesto es 30000", None);
        assert_eq!(bare.budget, Some(Money::usd(Decimal::new(30_000, 0))));
    }

    #[test]
    fn weight_answers_are_not_amounts() {
        assert_eq!(extract("<=5t", Some(ExpectedField::Price)), Extraction::default());
        assert_eq!(extract("<= 5", Some(ExpectedField::Quantity)).quantity, None);
    }

    #[test]
    fn product_phrase_drops_intent_and_values() {
        assert_eq!(product_phrase("quiero importar un ascensor"), "ascensor");
        assert_eq!(product_phrase("autoelevador eléctrico 3T, USD 4180, x1"), "autoelevador eléctrico 3T");
        assert_eq!(product_phrase("Hola! necesito cotizar una hormigonera"), "hormigonera");
        assert_eq!(product_phrase("ah no, mejor una hormigonera"), "hormigonera");
    }

    #[test]
    fn profile_and_origin() {
        assert_eq!(shipping_profile("es un equipo bastante pesado"), Some(ShippingProfile::Heavy));
        assert_eq!(shipping_profile("algo liviano"), Some(ShippingProfile::Light));
        assert_eq!(origin_country("viene de Estados Unidos"), Some("Estados Unidos".to_string()));
        assert_eq!(origin_country("sin origen"), None);
    }

    #[test]
    fn expected_field_prefers_last_assistant_turn() {
        let history = vec![
            PriorTurn { role: Role::User, text: "quiero importar un ascensor".to_string() },
            PriorTurn { role: Role::Assistant, text: "¿Cuál es el precio unitario?".to_string() },
        ];
        assert_eq!(expected_field(&history, FlowState::AwaitingQuantity), Some(ExpectedField::Price));
        let quoted_label = vec![PriorTurn {
            role: Role::Assistant,
            text: "Posición 9999.99.99 (cantidad variable). ¿Cuál es el precio unitario?".to_string(),
        }];
        assert_eq!(expected_field(&quoted_label, FlowState::AwaitingProduct), Some(ExpectedField::Price));
        assert_eq!(expected_field(&[], FlowState::AwaitingQuantity), Some(ExpectedField::Quantity));
        assert_eq!(expected_field(&[], FlowState::Quoted), None);
    }
}
