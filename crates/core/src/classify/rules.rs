//! Declarative disambiguation rules.
//!
//! A rule table lists, per four digit heading, the attributes that usually separate sibling
//! tariff codes: weight classes (parsed from labels such as "inferior o igual a 5 t") and
//! keyword features (refrigerated body, tipping bed, electric drive, ...). When a
//! classification is ambiguous, the attributes that actually split the candidate set become
//! short yes/no or categorical questions. Later answers are matched back against candidate
//! labels through the same attributes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::classify::scoring::{self, AliasLookup};
use crate::classify::{DisambiguationQuestion, QuestionKind, QuestionOption, ScoredCandidate};
use crate::text;

const EMBEDDED_RULES: &str = include_str!("../../rules/disambiguation.toml");

/// Upper bound on questions derived for one ambiguous set.
pub const MAX_QUESTIONS: usize = 4;

#[derive(Debug, Error)]
pub enum RuleTableError {
    #[error("could not read rule table `{path}`: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("could not parse rule table: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid rule for heading `{heading}`: {reason}")]
    Invalid { heading: String, reason: String },
}

/// Keyword feature of a heading, e.g. a refrigerated body under 8704.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FeatureRule {
    /// Stable identifier, also used as option key prefix.
    pub key: String,
    /// Yes/no question shown to the user.
    pub question: String,
    /// Accent-folded substrings that mark a label as having the feature.
    pub keywords: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HeadingRules {
    pub heading: String,
    /// Weight-class split points in tonnes.
    #[serde(default)]
    pub weight_thresholds_t: Vec<Decimal>,
    #[serde(default, rename = "feature")]
    pub features: Vec<FeatureRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RuleTable {
    #[serde(default)]
    aliases: BTreeMap<String, Vec<String>>,
    #[serde(default, rename = "heading")]
    headings: Vec<HeadingRules>,
}

impl RuleTable {
    pub fn embedded() -> Result<Self, RuleTableError> {
        Self::from_toml(EMBEDDED_RULES)
    }

    pub fn from_path(path: &Path) -> Result<Self, RuleTableError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| RuleTableError::Read { path: path.display().to_string(), source })?;
        Self::from_toml(&raw)
    }

    /// Loads `path` when given, otherwise the table compiled into the binary.
    pub fn load(path: Option<&Path>) -> Result<Self, RuleTableError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::embedded(),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, RuleTableError> {
        let mut table: RuleTable = toml::from_str(raw)?;
        for rules in &mut table.headings {
            if rules.heading.len() != 4 || !rules.heading.chars().all(|c| c.is_ascii_digit()) {
                return Err(RuleTableError::Invalid {
                    heading: rules.heading.clone(),
                    reason: "heading must be four digits".to_string(),
                });
            }
            if rules.weight_thresholds_t.iter().any(|threshold| *threshold <= Decimal::ZERO) {
                return Err(RuleTableError::Invalid {
                    heading: rules.heading.clone(),
                    reason: "weight thresholds must be positive".to_string(),
                });
            }
            for feature in &mut rules.features {
                feature.keywords = feature.keywords.iter().map(|keyword| text::normalize(keyword)).collect();
                if feature.keywords.is_empty() {
                    return Err(RuleTableError::Invalid {
                        heading: rules.heading.clone(),
                        reason: format!("feature `{}` has no keywords", feature.key),
                    });
                }
            }
        }
        table.aliases = table
            .aliases
            .into_iter()
            .map(|(token, expansions)| (text::normalize(&token), expansions))
            .collect();
        Ok(table)
    }

    pub fn heading(&self, heading: &str) -> Option<&HeadingRules> {
        self.headings.iter().find(|rules| rules.heading == heading)
    }

    pub fn headings(&self) -> &[HeadingRules] {
        &self.headings
    }

    /// Alias phrases to issue as extra search queries for `text`.
    pub fn expand_query(&self, text: &str) -> Vec<String> {
        let mut expansions = Vec::new();
        for token in text::tokens(text, 3) {
            if let Some(aliases) = self.aliases.get(&token) {
                for alias in aliases {
                    if !expansions.contains(alias) {
                        expansions.push(alias.clone());
                    }
                }
            }
        }
        expansions
    }
}

impl AliasLookup for RuleTable {
    fn aliases(&self, token: &str) -> Vec<String> {
        self.aliases.get(token).cloned().unwrap_or_default()
    }
}

/// Weight class `(lower, upper]` in tonnes parsed from a tariff label.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WeightClass {
    pub above: Option<Decimal>,
    pub up_to: Option<Decimal>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightSide {
    AtMost,
    Above,
}

static LABEL_UP_TO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:inferior o igual a|menor o igual a|no superior a|hasta)\s*(\d+(?:[.,]\d+)?)\s*(?:t\b|tn\b|ton)")
        .expect("valid regex")
});

static LABEL_ABOVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:superior a|mayor a|mayor de|mas de|exceda de|excede de)\s*(\d+(?:[.,]\d+)?)\s*(?:t\b|tn\b|ton)")
        .expect("valid regex")
});

fn parse_number(raw: &str) -> Option<Decimal> {
    raw.replace(',', ".").parse::<Decimal>().ok()
}

impl WeightClass {
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = text::normalize(label);
        let up_to = LABEL_UP_TO.captures(&normalized).and_then(|caps| parse_number(&caps[1]));
        let above = LABEL_ABOVE.captures(&normalized).and_then(|caps| parse_number(&caps[1]));
        (up_to.is_some() || above.is_some()).then_some(Self { above, up_to })
    }

    pub fn side_of(&self, threshold: Decimal) -> Option<WeightSide> {
        if self.up_to.is_some_and(|upper| upper <= threshold) {
            return Some(WeightSide::AtMost);
        }
        if self.above.is_some_and(|lower| lower >= threshold) {
            return Some(WeightSide::Above);
        }
        None
    }
}

fn label_of(candidate: &ScoredCandidate) -> String {
    candidate.candidate.label.as_deref().map(text::normalize).unwrap_or_default()
}

fn has_feature(label: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| label.contains(keyword.as_str()))
}

pub fn format_tonnes(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Value of one attribute for one candidate; `None` when the label says nothing about it.
type Signature = Vec<Option<bool>>;

/// Questions expected to collapse `candidates` (all under `rules.heading`) to one.
/// Attributes are tried in table order: weight thresholds first, then features, and only
/// those that split the current set are kept.
pub fn derive_questions(
    rules: &HeadingRules,
    candidates: &[ScoredCandidate],
) -> Vec<DisambiguationQuestion> {
    let labels: Vec<String> = candidates.iter().map(label_of).collect();
    let mut questions = Vec::new();
    let mut signatures: Vec<Signature> = vec![Vec::new(); candidates.len()];

    let weight_classes: Vec<Option<WeightClass>> =
        candidates.iter().map(|c| c.candidate.label.as_deref().and_then(WeightClass::from_label)).collect();

    for threshold in &rules.weight_thresholds_t {
        if questions.len() >= MAX_QUESTIONS || all_distinct(&signatures) {
            break;
        }
        let sides: Vec<Option<bool>> = weight_classes
            .iter()
            .map(|class| class.and_then(|class| class.side_of(*threshold)).map(|side| side == WeightSide::AtMost))
            .collect();
        if splits(&sides) && refines(&signatures, &sides) {
            push_column(&mut signatures, &sides);
            let tonnes = format_tonnes(*threshold);
            questions.push(DisambiguationQuestion {
                prompt: format!("¿Peso total ≤{tonnes}t o >{tonnes}t?"),
                kind: QuestionKind::WeightClass { threshold_tonnes: *threshold },
                options: vec![
                    QuestionOption { key: format!("le_{tonnes}"), label: format!("≤{tonnes}t") },
                    QuestionOption { key: format!("gt_{tonnes}"), label: format!(">{tonnes}t") },
                ],
            });
        }
    }

    for feature in &rules.features {
        if questions.len() >= MAX_QUESTIONS || all_distinct(&signatures) {
            break;
        }
        let values: Vec<Option<bool>> =
            labels.iter().map(|label| Some(has_feature(label, &feature.keywords))).collect();
        if splits(&values) && refines(&signatures, &values) {
            push_column(&mut signatures, &values);
            questions.push(DisambiguationQuestion {
                prompt: feature.question.clone(),
                kind: QuestionKind::Feature {
                    key: feature.key.clone(),
                    keywords: feature.keywords.clone(),
                },
                options: vec![
                    QuestionOption { key: format!("{}_yes", feature.key), label: "Sí".to_string() },
                    QuestionOption { key: format!("{}_no", feature.key), label: "No".to_string() },
                ],
            });
        }
    }

    questions
}

fn splits(values: &[Option<bool>]) -> bool {
    values.iter().any(|value| *value == Some(true)) && values.iter().any(|value| *value == Some(false))
}

/// True when adding `column` separates at least one pair of currently identical signatures.
fn refines(signatures: &[Signature], column: &[Option<bool>]) -> bool {
    for left in 0..signatures.len() {
        for right in (left + 1)..signatures.len() {
            if signatures[left] == signatures[right]
                && column[left].is_some()
                && column[right].is_some()
                && column[left] != column[right]
            {
                return true;
            }
        }
    }
    false
}

fn push_column(signatures: &mut [Signature], column: &[Option<bool>]) {
    for (signature, value) in signatures.iter_mut().zip(column) {
        signature.push(*value);
    }
}

fn all_distinct(signatures: &[Signature]) -> bool {
    if signatures.first().map_or(true, Vec::is_empty) {
        return false;
    }
    for left in 0..signatures.len() {
        for right in (left + 1)..signatures.len() {
            if signatures[left] == signatures[right] {
                return false;
            }
        }
    }
    true
}

/// Categorical fallback over the top candidates.
pub fn choice_question(candidates: &[ScoredCandidate]) -> DisambiguationQuestion {
    let options = candidates
        .iter()
        .take(MAX_QUESTIONS)
        .enumerate()
        .map(|(index, candidate)| QuestionOption {
            key: candidate.candidate.code.to_string(),
            label: format!(
                "{}. {} ({})",
                index + 1,
                candidate.candidate.label.as_deref().unwrap_or("sin descripción"),
                candidate.candidate.code
            ),
        })
        .collect();
    DisambiguationQuestion {
        prompt: "¿Cuál de estas opciones describe mejor tu producto?".to_string(),
        kind: QuestionKind::Choice,
        options,
    }
}

static ANSWER_AT_MOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:<=|=<|≤|<|hasta|menos de|menor a|menor de|menor o igual a|inferior a|no supera|como maximo)\s*(\d+(?:[.,]\d+)?)\s*(kg|kilos?|t|tn|ton|toneladas?)?")
        .expect("valid regex")
});

static ANSWER_ABOVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:>=|≥|>|mas de|mayor a|mayor de|superior a|supera|arriba de|por encima de)\s*(\d+(?:[.,]\d+)?)\s*(kg|kilos?|t|tn|ton|toneladas?)?")
        .expect("valid regex")
});

static ANSWER_WEIGHT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:[.,]\d+)?)\s*(kg|kilos?|t|tn|ton|toneladas?)\b").expect("valid regex")
});

fn tonnes(number: &str, unit: Option<&str>) -> Option<Decimal> {
    let value = parse_number(number)?;
    match unit {
        Some(unit) if unit.starts_with('k') => Some(value / Decimal::ONE_THOUSAND),
        _ => Some(value),
    }
}

/// Side of `threshold` the answer points to, if any.
pub fn weight_answer(answer: &str, threshold: Decimal) -> Option<WeightSide> {
    let normalized = text::normalize(answer);
    if let Some(caps) = ANSWER_AT_MOST.captures(&normalized) {
        let bound = tonnes(&caps[1], caps.get(2).map(|m| m.as_str()))?;
        return (bound <= threshold).then_some(WeightSide::AtMost);
    }
    if let Some(caps) = ANSWER_ABOVE.captures(&normalized) {
        let bound = tonnes(&caps[1], caps.get(2).map(|m| m.as_str()))?;
        return (bound >= threshold).then_some(WeightSide::Above);
    }
    if let Some(caps) = ANSWER_WEIGHT.captures(&normalized) {
        let weight = tonnes(&caps[1], caps.get(2).map(|m| m.as_str()))?;
        return Some(if weight <= threshold { WeightSide::AtMost } else { WeightSide::Above });
    }
    None
}

const YES_WORDS: &[&str] = &["si", "claro", "correcto", "afirmativo", "exacto", "yes", "dale"];
const NEGATION_WORDS: &[&str] = &["no", "sin", "tampoco", "nop"];

fn bare_yes_no(answer_tokens: &[String]) -> Option<bool> {
    let yes = answer_tokens.iter().any(|token| YES_WORDS.contains(&token.as_str()));
    let no = answer_tokens.iter().any(|token| NEGATION_WORDS.contains(&token.as_str()));
    match (yes, no) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

/// Tokens before a feature keyword that a negation may sit in and still apply to it.
const NEGATION_REACH: usize = 3;

fn clauses(normalized: &str) -> impl Iterator<Item = &str> {
    normalized
        .split([',', ';', '.'])
        .flat_map(|part| part.split(" pero "))
        .flat_map(|part| part.split(" y "))
}

/// Feature value stated by the answer, only when it names the feature's vocabulary.
///
/// The first clause naming the feature decides. It is negated by a negation word shortly
/// before the keyword or by a trailing `no`; negations elsewhere in the answer belong to
/// other features.
pub fn feature_answer(answer: &str, keywords: &[String]) -> Option<bool> {
    let normalized = text::normalize(answer);
    if !has_feature(&normalized, keywords) {
        return None;
    }
    let answer = clauses(&normalized).find_map(|clause| {
        let tokens = text::tokens(clause, 1);
        let position =
            tokens.iter().position(|token| keywords.iter().any(|keyword| token.contains(keyword.as_str())))?;
        let before = &tokens[position.saturating_sub(NEGATION_REACH)..position];
        let negated = before.iter().any(|token| NEGATION_WORDS.contains(&token.as_str()))
            || tokens[position + 1..] == ["no"];
        Some(!negated)
    });
    answer
}

const ORDINALS: &[(&str, usize)] = &[
    ("primera", 0),
    ("primero", 0),
    ("segunda", 1),
    ("segundo", 1),
    ("tercera", 2),
    ("tercero", 2),
    ("cuarta", 3),
    ("cuarto", 3),
];

fn option_index(answer: &str, option_count: usize) -> Option<usize> {
    let tokens = text::tokens(answer, 1);
    if tokens.len() <= 3 {
        for token in &tokens {
            if let Ok(number) = token.parse::<usize>() {
                if (1..=option_count).contains(&number) {
                    return Some(number - 1);
                }
            }
        }
    }
    tokens
        .iter()
        .find_map(|token| ORDINALS.iter().find(|(word, _)| word == token).map(|(_, index)| *index))
        .filter(|index| *index < option_count)
}

/// Filters `candidates` with the attributes stated in `answer`. Returns `None` when the
/// answer addresses none of the pending questions.
pub fn apply_answer(
    questions: &[DisambiguationQuestion],
    candidates: &[ScoredCandidate],
    answer: &str,
) -> Option<Vec<ScoredCandidate>> {
    let answer_tokens = text::tokens(answer, 1);
    let feature_questions =
        questions.iter().filter(|question| matches!(question.kind, QuestionKind::Feature { .. })).count();
    let mut survivors: Vec<ScoredCandidate> = candidates.to_vec();
    let mut matched_any = false;

    for (position, question) in questions.iter().enumerate() {
        match &question.kind {
            QuestionKind::WeightClass { threshold_tonnes } => {
                // A bare option number answers the question on screen, which is the first.
                let side = weight_answer(answer, *threshold_tonnes).or_else(|| {
                    (position == 0)
                        .then(|| option_index(answer, 2))
                        .flatten()
                        .map(|index| if index == 0 { WeightSide::AtMost } else { WeightSide::Above })
                });
                if let Some(side) = side {
                    matched_any = true;
                    survivors.retain(|candidate| {
                        candidate
                            .candidate
                            .label
                            .as_deref()
                            .and_then(WeightClass::from_label)
                            .and_then(|class| class.side_of(*threshold_tonnes))
                            == Some(side)
                    });
                }
            }
            QuestionKind::Feature { keywords, .. } => {
                let value = feature_answer(answer, keywords).or_else(|| {
                    (feature_questions == 1).then(|| bare_yes_no(&answer_tokens)).flatten()
                });
                if let Some(value) = value {
                    matched_any = true;
                    survivors.retain(|candidate| has_feature(&label_of(candidate), keywords) == value);
                }
            }
            QuestionKind::Choice => {
                if let Some(chosen) = choose_option(question, candidates, answer) {
                    matched_any = true;
                    survivors.retain(|candidate| candidate.candidate.code.as_str() == chosen);
                }
            }
            QuestionKind::Open => {}
        }
    }

    matched_any.then_some(survivors)
}

fn choose_option(
    question: &DisambiguationQuestion,
    candidates: &[ScoredCandidate],
    answer: &str,
) -> Option<String> {
    if let Some(index) = option_index(answer, question.options.len()) {
        return question.options.get(index).map(|option| option.key.clone());
    }
    let normalized = text::normalize(answer);
    if let Some(option) = question.options.iter().find(|option| normalized.contains(&option.key)) {
        return Some(option.key.clone());
    }
    if question.options.len() == 1 && bare_yes_no(&text::tokens(answer, 1)) == Some(true) {
        return question.options.first().map(|option| option.key.clone());
    }

    // Pick by label overlap when one option clearly wins.
    let answer_tokens = text::query_tokens(answer);
    if answer_tokens.is_empty() {
        return None;
    }
    let mut scored: Vec<(f64, &str)> = candidates
        .iter()
        .filter(|candidate| question.options.iter().any(|option| option.key == candidate.candidate.code.as_str()))
        .map(|candidate| {
            let score = candidate
                .candidate
                .label
                .as_deref()
                .map(|label| scoring::score_label(&answer_tokens, label, &()))
                .unwrap_or(0.0);
            (score, candidate.candidate.code.as_str())
        })
        .collect();
    scored.sort_by(|left, right| right.0.partial_cmp(&left.0).unwrap_or(std::cmp::Ordering::Equal));
    match scored.as_slice() {
        [(best, code), rest @ ..]
            if *best >= 0.5 && rest.first().map_or(true, |(second, _)| second < best) =>
        {
            Some((*code).to_string())
        }
        _ => None,
    }
}
