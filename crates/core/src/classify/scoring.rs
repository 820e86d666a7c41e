use std::cmp::Ordering;

use crate::classify::{ClassificationThresholds, ScoredCandidate};
use crate::domain::tariff::TariffCandidate;
use crate::text;

/// Alias expansion used while scoring: each query token also matches through its aliases.
pub trait AliasLookup {
    fn aliases(&self, token: &str) -> Vec<String>;
}

impl AliasLookup for () {
    fn aliases(&self, _token: &str) -> Vec<String> {
        Vec::new()
    }
}

fn token_matches(query_token: &str, label_token: &str) -> bool {
    if label_token == query_token || label_token.contains(query_token) {
        return true;
    }
    // Label token that prefixes the query token (`camion` vs `camiones`).
    label_token.chars().count() >= 4 && query_token.starts_with(label_token)
}

/// Fraction of query tokens found in the label, in `0.0..=1.0`.
pub fn score_label(query_tokens: &[String], label: &str, aliases: &dyn AliasLookup) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let label_tokens = text::tokens(label, 1);
    let matched = query_tokens
        .iter()
        .filter(|query_token| {
            let direct = label_tokens.iter().any(|label_token| token_matches(query_token, label_token));
            direct
                || aliases.aliases(query_token).iter().any(|alias| {
                    text::tokens(alias, 4)
                        .iter()
                        .any(|alias_token| label_tokens.iter().any(|label_token| token_matches(alias_token, label_token)))
                })
        })
        .count();
    matched as f64 / query_tokens.len() as f64
}

/// Scores and orders candidates by descending score. Ties keep their input order.
pub fn rank(
    query_tokens: &[String],
    candidates: Vec<TariffCandidate>,
    aliases: &dyn AliasLookup,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|candidate| {
            let score = candidate
                .label
                .as_deref()
                .map(|label| score_label(query_tokens, label, aliases))
                .unwrap_or(0.0);
            ScoredCandidate { candidate, score }
        })
        .collect();
    scored.sort_by(|left, right| right.score.partial_cmp(&left.score).unwrap_or(Ordering::Equal));
    scored
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Acceptance {
    Accepted { score: f64 },
    Ambiguous,
    NoCandidates,
}

/// Accepts the top-ranked candidate when it clears the token-count threshold and dominates
/// the runner-up.
pub fn accept(
    ranked: &[ScoredCandidate],
    query_token_count: usize,
    thresholds: &ClassificationThresholds,
) -> Acceptance {
    let Some(top) = ranked.first() else {
        return Acceptance::NoCandidates;
    };
    let min_score = thresholds.min_score_for(query_token_count);
    if top.score < min_score {
        return Acceptance::Ambiguous;
    }
    match ranked.get(1) {
        None => Acceptance::Accepted { score: top.score },
        Some(runner_up)
            if runner_up.score < min_score
                || top.score - runner_up.score >= thresholds.dominance_margin - f64::EPSILON =>
        {
            Acceptance::Accepted { score: top.score }
        }
        Some(_) => Acceptance::Ambiguous,
    }
}
