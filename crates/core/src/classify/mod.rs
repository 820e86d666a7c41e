//! Tariff classification and disambiguation.
//!
//! Candidates come from an explicit code in the text, the semantic classifier, the local
//! index and the authoritative service. They are scored against the query with a pure
//! token-overlap function; an ambiguous set turns into a few targeted questions.

pub mod rules;
pub mod scoring;
pub mod semantic;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ClassificationConfig;
use crate::domain::tariff::{CandidateSource, TariffCandidate, TariffCode};
use crate::tariff::{DetailOptions, IndexSearchOptions, TariffDataSource, TariffIndex};
use crate::text;

pub use rules::{RuleTable, RuleTableError};
pub use scoring::Acceptance;
pub use semantic::{RawSemanticPayload, SemanticClassifier, SemanticSuggestion};

static EXPLICIT_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{4}\.\d{2}\.\d{2}(?:\.\d{3}[A-Za-z]?)?\b").expect("valid regex")
});

/// Acceptance thresholds for the top-ranked candidate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationThresholds {
    /// Minimum score for queries of one or two tokens.
    pub short_query_min_score: f64,
    /// Minimum score for queries of three or more tokens.
    pub long_query_min_score: f64,
    /// Required lead over a runner-up that itself clears the threshold.
    pub dominance_margin: f64,
}

impl Default for ClassificationThresholds {
    fn default() -> Self {
        Self { short_query_min_score: 0.75, long_query_min_score: 0.6, dominance_margin: 0.2 }
    }
}

impl ClassificationThresholds {
    pub fn min_score_for(&self, query_token_count: usize) -> f64 {
        if query_token_count <= 2 {
            self.short_query_min_score
        } else {
            self.long_query_min_score
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: TariffCandidate,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    WeightClass { threshold_tonnes: Decimal },
    Feature { key: String, keywords: Vec<String> },
    Choice,
    Open,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub key: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationQuestion {
    pub prompt: String,
    pub kind: QuestionKind,
    pub options: Vec<QuestionOption>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub best_code: Option<TariffCode>,
    pub best_label: Option<String>,
    pub confidence: f64,
    pub candidates: Vec<ScoredCandidate>,
    pub heading_hint: Option<String>,
    pub kind_hint: Option<String>,
    pub questions: Vec<DisambiguationQuestion>,
    pub ambiguous: bool,
    pub source: Option<CandidateSource>,
}

impl ClassificationResult {
    pub fn empty() -> Self {
        Self {
            best_code: None,
            best_label: None,
            confidence: 0.0,
            candidates: Vec::new(),
            heading_hint: None,
            kind_hint: None,
            questions: Vec::new(),
            ambiguous: false,
            source: None,
        }
    }

    /// True when neither an accepted code nor any candidate exists.
    pub fn is_unclassified(&self) -> bool {
        self.best_code.is_none() && self.candidates.is_empty()
    }

    fn accept(&mut self, chosen: ScoredCandidate) {
        self.best_code = Some(chosen.candidate.code.clone());
        self.best_label = chosen.candidate.label.clone();
        self.confidence = chosen.score.max(self.confidence);
        self.source = Some(chosen.candidate.source);
        self.ambiguous = false;
        self.questions.clear();
        self.candidates = vec![chosen];
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnswerResolution {
    /// Exactly one candidate survived.
    Resolved(ClassificationResult),
    /// Several candidates remain; new questions were derived for them.
    Narrowed(ClassificationResult),
    /// The answer addressed a question but excluded every candidate.
    NoMatch,
    /// The answer did not address any pending question.
    Unrelated,
}

#[derive(Clone, Debug)]
pub struct ClassificationSettings {
    pub thresholds: ClassificationThresholds,
    pub max_candidates: usize,
    pub enrich_detail_limit: usize,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self { thresholds: ClassificationThresholds::default(), max_candidates: 8, enrich_detail_limit: 3 }
    }
}

impl From<&ClassificationConfig> for ClassificationSettings {
    fn from(config: &ClassificationConfig) -> Self {
        Self {
            thresholds: config.thresholds(),
            max_candidates: config.max_candidates.max(1),
            enrich_detail_limit: config.enrich_detail_limit,
        }
    }
}

pub struct ClassificationService {
    index: Arc<dyn TariffIndex>,
    source: Arc<dyn TariffDataSource>,
    semantic: Option<Arc<dyn SemanticClassifier>>,
    rules: RuleTable,
    settings: ClassificationSettings,
}

impl ClassificationService {
    pub fn new(
        index: Arc<dyn TariffIndex>,
        source: Arc<dyn TariffDataSource>,
        semantic: Option<Arc<dyn SemanticClassifier>>,
        rules: RuleTable,
        settings: ClassificationSettings,
    ) -> Self {
        Self { index, source, semantic, rules, settings }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub async fn classify(&self, free_text: &str) -> ClassificationResult {
        if let Some(found) = EXPLICIT_CODE.find(free_text) {
            if let Ok(code) = TariffCode::parse(found.as_str()) {
                return self.explicit(code).await;
            }
        }

        let suggestion = match &self.semantic {
            Some(classifier) => classifier.classify(free_text).await,
            None => None,
        };

        let text_tokens = text::query_tokens(free_text);
        let mut queries: Vec<String> = suggestion
            .as_ref()
            .map(|suggestion| suggestion.search_terms.clone())
            .unwrap_or_default();
        if queries.is_empty() {
            // Stop-words and origin names never appear in labels; searching them drops every hit.
            let phrase = text_tokens.join(" ");
            queries.push(if phrase.is_empty() { free_text.to_string() } else { phrase });
        }
        for expansion in self.rules.expand_query(free_text) {
            if !queries.contains(&expansion) {
                queries.push(expansion);
            }
        }

        let mut candidates: Vec<TariffCandidate> = Vec::new();
        if let Some(suggestion) = &suggestion {
            if let Some(code) = &suggestion.code {
                push_candidate(&mut candidates, TariffCandidate::new(code.clone(), None, CandidateSource::Semantic));
            }
            for code in &suggestion.candidates {
                push_candidate(&mut candidates, TariffCandidate::new(code.clone(), None, CandidateSource::Semantic));
            }
        }

        self.search_all(&queries, &mut candidates).await;
        if candidates.is_empty() && text_tokens.len() > 1 {
            tracing::debug!(
                event_name = "classification.search_relaxed",
                tokens = text_tokens.len(),
                "no entry matched every token; searching tokens one by one"
            );
            self.search_all(&text_tokens, &mut candidates).await;
        }
        candidates.truncate(self.settings.max_candidates);
        self.enrich_labels(&mut candidates).await;

        let mut query_tokens = text_tokens;
        if query_tokens.is_empty() {
            for token in queries.iter().flat_map(|query| text::query_tokens(query)) {
                if !query_tokens.contains(&token) {
                    query_tokens.push(token);
                }
            }
        }

        let ranked = scoring::rank(&query_tokens, candidates, &self.rules);
        let acceptance = scoring::accept(&ranked, query_tokens.len(), &self.settings.thresholds);

        let mut result = ClassificationResult::empty();
        result.heading_hint = suggestion.as_ref().and_then(|suggestion| suggestion.heading_hint.clone());
        result.kind_hint = suggestion.as_ref().and_then(|suggestion| suggestion.kind_hint.clone());

        match acceptance {
            Acceptance::NoCandidates => {}
            Acceptance::Accepted { score } => {
                if let Some(top) = ranked.first() {
                    result.best_code = Some(top.candidate.code.clone());
                    result.best_label = top.candidate.label.clone();
                    result.source = Some(top.candidate.source);
                }
                result.confidence = score;
                result.candidates = ranked;
            }
            Acceptance::Ambiguous => {
                result.confidence = ranked.first().map(|top| top.score).unwrap_or(0.0);
                result.ambiguous = true;
                result.questions = self.questions_for(&ranked, suggestion.as_ref());
                result.candidates = ranked;
            }
        }

        tracing::info!(
            event_name = "classification.completed",
            candidates = result.candidates.len(),
            ambiguous = result.ambiguous,
            best_code = result.best_code.as_ref().map(|code| code.as_str()).unwrap_or("-"),
            confidence = result.confidence,
            "classification completed"
        );
        result
    }

    /// Local index and tariff service hits for every query, in query order.
    async fn search_all(&self, queries: &[String], candidates: &mut Vec<TariffCandidate>) {
        let options = IndexSearchOptions { limit: self.settings.max_candidates, heading_filter: None };
        for query in queries {
            match self.index.search(query, &options).await {
                Ok(entries) => {
                    for entry in entries {
                        push_candidate(
                            candidates,
                            TariffCandidate::new(entry.code, Some(entry.label), CandidateSource::LocalIndex),
                        );
                    }
                }
                Err(error) => tracing::warn!(
                    event_name = "classification.index_search_failed",
                    error = %error,
                    "local tariff index search failed"
                ),
            }
            for found in self.source.search_code(query, self.settings.max_candidates).await {
                push_candidate(candidates, found);
            }
        }
    }

    async fn explicit(&self, code: TariffCode) -> ClassificationResult {
        let label = match self.index.get(&code).await {
            Ok(entry) => entry.map(|entry| entry.label),
            Err(_) => None,
        };
        let chosen = ScoredCandidate {
            candidate: TariffCandidate::new(code, label, CandidateSource::Explicit),
            score: 1.0,
        };
        let mut result = ClassificationResult::empty();
        result.heading_hint = Some(chosen.candidate.code.heading().to_string());
        result.accept(chosen);
        result.confidence = 1.0;
        result
    }

    async fn enrich_labels(&self, candidates: &mut [TariffCandidate]) {
        for candidate in candidates.iter_mut().filter(|candidate| candidate.label.is_none()) {
            if let Ok(Some(entry)) = self.index.get(&candidate.code).await {
                candidate.label = Some(entry.label);
            }
        }
        for candidate in candidates
            .iter_mut()
            .take(self.settings.enrich_detail_limit)
            .filter(|candidate| candidate.label.is_none())
        {
            if let Some(detail) = self.source.get_detail(&candidate.code, DetailOptions::default()).await {
                candidate.label = Some(detail.label);
            }
        }
    }

    /// Rule-derived questions for the top heading group, then the classifier's own questions,
    /// then a categorical pick.
    fn questions_for(
        &self,
        ranked: &[ScoredCandidate],
        suggestion: Option<&SemanticSuggestion>,
    ) -> Vec<DisambiguationQuestion> {
        if let Some(top) = ranked.first() {
            let heading = top.candidate.code.heading();
            let group: Vec<ScoredCandidate> =
                ranked.iter().filter(|candidate| candidate.candidate.code.heading() == heading).cloned().collect();
            if group.len() >= 2 {
                if let Some(heading_rules) = self.rules.heading(heading) {
                    let questions = rules::derive_questions(heading_rules, &group);
                    if !questions.is_empty() {
                        return questions;
                    }
                }
            }
        }

        if let Some(suggestion) = suggestion {
            if !suggestion.missing_info_questions.is_empty() {
                return suggestion
                    .missing_info_questions
                    .iter()
                    .map(|prompt| DisambiguationQuestion {
                        prompt: prompt.clone(),
                        kind: QuestionKind::Open,
                        options: Vec::new(),
                    })
                    .collect();
            }
        }

        if ranked.is_empty() {
            return Vec::new();
        }
        vec![rules::choice_question(ranked)]
    }

    /// Matches a follow-up answer against the pending questions of `previous`.
    pub async fn resolve_answer(
        &self,
        previous: &ClassificationResult,
        answer: &str,
        original_text: &str,
    ) -> AnswerResolution {
        if let Some(found) = EXPLICIT_CODE.find(answer) {
            if let Ok(code) = TariffCode::parse(found.as_str()) {
                if let Some(candidate) = previous.candidates.iter().find(|candidate| candidate.candidate.code == code) {
                    let mut result = previous.clone();
                    result.accept(candidate.clone());
                    return AnswerResolution::Resolved(result);
                }
                return AnswerResolution::Resolved(self.explicit(code).await);
            }
        }

        let Some(survivors) = rules::apply_answer(&previous.questions, &previous.candidates, answer) else {
            if previous.questions.iter().all(|question| question.kind == QuestionKind::Open) {
                // Open questions cannot be matched; fold the answer into a fresh classification.
                let combined = format!("{original_text} {answer}");
                let result = self.classify(&combined).await;
                return if result.best_code.is_some() {
                    AnswerResolution::Resolved(result)
                } else {
                    AnswerResolution::Narrowed(result)
                };
            }
            return AnswerResolution::Unrelated;
        };

        match survivors.len() {
            0 => AnswerResolution::NoMatch,
            1 => {
                let mut result = previous.clone();
                if let Some(chosen) = survivors.into_iter().next() {
                    result.accept(chosen);
                }
                tracing::info!(
                    event_name = "classification.disambiguated",
                    best_code = result.best_code.as_ref().map(|code| code.as_str()).unwrap_or("-"),
                    "ambiguity resolved by answer"
                );
                AnswerResolution::Resolved(result)
            }
            _ => {
                let mut result = previous.clone();
                result.questions = self.questions_for(&survivors, None);
                result.candidates = survivors;
                AnswerResolution::Narrowed(result)
            }
        }
    }

    /// Removes a disputed code. Regenerates candidates when the list ends up empty or the
    /// code was never part of it.
    pub async fn dispute(
        &self,
        previous: Option<&ClassificationResult>,
        disputed: &TariffCode,
        product_text: &str,
    ) -> ClassificationResult {
        let mut remaining: Vec<ScoredCandidate> = previous
            .map(|result| result.candidates.clone())
            .unwrap_or_default();
        let was_listed = remaining.iter().any(|candidate| &candidate.candidate.code == disputed);
        remaining.retain(|candidate| &candidate.candidate.code != disputed);

        if !was_listed || remaining.is_empty() {
            tracing::info!(
                event_name = "classification.regenerated",
                disputed = disputed.as_str(),
                "regenerating candidates after dispute"
            );
            let mut fresh = self.classify(product_text).await;
            fresh.candidates.retain(|candidate| &candidate.candidate.code != disputed);
            if fresh.best_code.as_ref() == Some(disputed) {
                fresh.best_code = None;
                fresh.best_label = None;
            }
            return self.reopen(fresh);
        }

        let mut result = previous.cloned().unwrap_or_else(ClassificationResult::empty);
        result.candidates = remaining;
        result.best_code = None;
        result.best_label = None;
        self.reopen(result)
    }

    /// Marks the result as awaiting a user choice over its current candidates.
    fn reopen(&self, mut result: ClassificationResult) -> ClassificationResult {
        result.best_code = None;
        result.best_label = None;
        result.ambiguous = !result.candidates.is_empty();
        result.questions = if result.candidates.len() >= 2 {
            self.questions_for(&result.candidates, None)
        } else if result.candidates.len() == 1 {
            vec![rules::choice_question(&result.candidates)]
        } else {
            Vec::new()
        };
        result
    }
}

fn push_candidate(candidates: &mut Vec<TariffCandidate>, candidate: TariffCandidate) {
    if let Some(existing) = candidates.iter_mut().find(|existing| existing.code == candidate.code) {
        if existing.label.is_none() {
            existing.label = candidate.label;
        }
        return;
    }
    candidates.push(candidate);
}
