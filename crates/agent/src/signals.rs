//! Named predicates over a single user turn.
//!
//! Every predicate works on the raw text and normalizes internally, so callers can test them
//! in isolation. [`TurnSignals::detect`] evaluates all of them once per turn.

use once_cell::sync::Lazy;
use regex::Regex;

use landcost_core::text;

use crate::extraction;

static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bhttps?://[^\s<>()]+").expect("valid regex"));
static EXPLICIT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}\.\d{2}\.\d{2}(?:\.\d{3}[A-Za-z]?)?\b").expect("valid regex"));
static CURRENCY_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:usd|u\$s|us\$|ars|eur|brl|cny|rmb|dolares|dolar|pesos|euros|reales|yuanes)\b|\$|€)")
        .expect("valid regex")
});
static AFFIRMATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:si|sip|dale|ok|okay|de acuerdo|confirmo|acepto|perfecto|avancemos|adelante|claro|listo|correcto|me interesa)\b",
    )
    .expect("valid regex")
});
static NEGATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:no|nop|negativo|todavia no|aun no|por ahora no)\b").expect("valid regex"));
static DISPUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:no es (?:ese|esa|ese codigo|esa posicion|correcto|correcta|asi)|no corresponde|incorrect[oa]|equivocad[oa]|esta mal|no coincide|otra posicion|otro codigo|otra partida|mal clasificad[oa])\b",
    )
    .expect("valid regex")
});
static DECISION_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:como sigo|como seguimos|como sigue|que sigue|proximo paso|siguiente paso|como avanzo|como avanzamos|quiero avanzar|como continuo|como contin[uú]amos|como lo compro|como compro)\b",
    )
    .expect("valid regex")
});
static BUDGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:presupuesto|budget|dispongo de|cuento con|tengo para invertir|puedo invertir|quiero invertir|puedo gastar)\b")
        .expect("valid regex")
});
static PRICE_TRIGGER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:precio|cuesta|cuestan|vale|valen|valor|sale|salen|pague|pagamos|fob|cotizaron|me cobran)\b")
        .expect("valid regex")
});
static QUANTITY_TRIGGER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:unidades|unidad|cantidad|piezas|equipos|serian|seran)\b").expect("valid regex")
});

/// Vocabulary that shows up in answers and small talk rather than product descriptions.
const NON_PRODUCT_WORDS: &[&str] = &[
    "precio", "cuesta", "cuestan", "valor", "vale", "valen", "salen", "pague", "unidades", "unidad",
    "cantidad", "piezas", "equipos", "presupuesto", "toneladas", "tonelada", "kilos", "peso", "total",
    "fueran", "fuera", "serian", "ahora", "mejor", "entonces", "cambiar", "cambia", "aproximado",
    "aproximadamente", "liviano", "liviana", "pesado", "pesada", "mediano", "mediana", "origen",
    "dolares", "pesos", "euros", "reales", "yuanes", "perfecto", "bueno", "genial", "listo",
    "seguimos", "sigo", "sigue", "avanzar", "continuar", "envio", "flete", "costo", "costos",
    "gastos", "impuestos", "viene", "vienen", "fabricado", "fabricada", "recalcular", "calcular",
];

pub fn has_currency_signal(text: &str) -> bool {
    CURRENCY_WORD.is_match(&text::normalize(text))
}

pub fn has_quantity_hint(text: &str) -> bool {
    extraction::strict_quantity(text).is_some()
}

pub fn contains_link(text: &str) -> Option<&str> {
    LINK.find(text).map(|found| found.as_str().trim_end_matches(['.', ',', ';', ')']))
}

pub fn explicit_tariff_code(text: &str) -> Option<&str> {
    EXPLICIT_CODE.find(text).map(|found| found.as_str())
}

pub fn is_affirmative(text: &str) -> bool {
    AFFIRMATIVE.is_match(text::normalize(text).trim_start_matches(['¡', '¿', ' ']))
}

pub fn is_negative(text: &str) -> bool {
    NEGATIVE.is_match(text::normalize(text).trim_start_matches(['¡', '¿', ' ']))
}

pub fn is_dispute(text: &str) -> bool {
    DISPUTE.is_match(&text::normalize(text))
}

pub fn is_decision_request(text: &str) -> bool {
    DECISION_REQUEST.is_match(&text::normalize(text))
}

pub fn has_budget_signal(text: &str) -> bool {
    BUDGET.is_match(&text::normalize(text))
}

pub fn has_price_trigger(text: &str) -> bool {
    PRICE_TRIGGER.is_match(&text::normalize(text))
}

pub fn has_quantity_trigger(text: &str) -> bool {
    QUANTITY_TRIGGER.is_match(&text::normalize(text))
}

/// Text that still names a thing once amounts, quantities, links and answer vocabulary are
/// removed. Bare confirmations, numbers and weight answers are not product text.
pub fn looks_like_product_text(text: &str) -> bool {
    if is_affirmative(text) || is_negative(text) || is_dispute(text) || is_decision_request(text) {
        return false;
    }
    let without_link = LINK.replace_all(text, " ");
    let remainder = extraction::strip_slot_values(&without_link);
    text::query_tokens(&remainder).iter().any(|token| {
        !NON_PRODUCT_WORDS.contains(&token.as_str())
            && extraction::country_name(token).is_none()
            && token.chars().any(char::is_alphabetic)
    })
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnSignals {
    pub currency: bool,
    pub quantity_hint: bool,
    pub link: Option<String>,
    pub product_text: bool,
    pub affirmative: bool,
    pub negative: bool,
    pub dispute: bool,
    pub decision_request: bool,
    pub budget: bool,
    pub price_trigger: bool,
    pub quantity_trigger: bool,
    pub explicit_code: Option<String>,
}

impl TurnSignals {
    pub fn detect(text: &str) -> Self {
        Self {
            currency: has_currency_signal(text),
            quantity_hint: has_quantity_hint(text),
            link: contains_link(text).map(str::to_string),
            product_text: looks_like_product_text(text),
            affirmative: is_affirmative(text),
            negative: is_negative(text),
            dispute: is_dispute(text),
            decision_request: is_decision_request(text),
            budget: has_budget_signal(text),
            price_trigger: has_price_trigger(text),
            quantity_trigger: has_quantity_trigger(text),
            explicit_code: explicit_tariff_code(text).map(str::to_string),
        }
    }
}
