use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::tariff::TariffCode;

/// Upper bounds applied when sanitizing a suggestion.
const MAX_SEARCH_TERMS: usize = 6;
const MAX_QUESTIONS: usize = 4;
const MAX_CANDIDATES: usize = 8;
const MAX_KIND_LEN: usize = 80;

/// Best-effort guess from an external (usually LLM backed) classifier.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticSuggestion {
    pub code: Option<TariffCode>,
    pub confidence: f64,
    pub rationale: Option<String>,
    pub candidates: Vec<TariffCode>,
    pub heading_hint: Option<String>,
    pub kind_hint: Option<String>,
    pub search_terms: Vec<String>,
    pub missing_info_questions: Vec<String>,
}

/// Untrusted payload as produced by the classifier. Every field is optional and loosely typed.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawSemanticPayload {
    pub code: Option<String>,
    pub confidence: Option<serde_json::Value>,
    pub rationale: Option<String>,
    pub candidates: Vec<serde_json::Value>,
    pub heading_hint: Option<String>,
    pub kind_hint: Option<String>,
    pub search_terms: Vec<String>,
    pub missing_info_questions: Vec<String>,
}

impl SemanticSuggestion {
    /// The single validation boundary for classifier output: malformed codes are dropped,
    /// confidence is clamped to `0..=1`, lists are trimmed and bounded.
    pub fn from_payload(raw: RawSemanticPayload) -> Self {
        let code = raw.code.as_deref().and_then(|code| TariffCode::parse(code).ok());

        let confidence = match raw.confidence {
            Some(serde_json::Value::Number(number)) => number.as_f64().unwrap_or(0.0),
            Some(serde_json::Value::String(text)) => text.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        };
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };

        let mut candidates: Vec<TariffCode> = Vec::new();
        for value in raw.candidates {
            let parsed = match value {
                serde_json::Value::String(code) => TariffCode::parse(&code).ok(),
                serde_json::Value::Object(object) => object
                    .get("code")
                    .and_then(serde_json::Value::as_str)
                    .and_then(|code| TariffCode::parse(code).ok()),
                _ => None,
            };
            if let Some(code) = parsed {
                if !candidates.contains(&code) && candidates.len() < MAX_CANDIDATES {
                    candidates.push(code);
                }
            }
        }

        let heading_hint = raw
            .heading_hint
            .map(|hint| hint.chars().filter(char::is_ascii_digit).take(4).collect::<String>())
            .filter(|hint| hint.len() == 4)
            .or_else(|| code.as_ref().map(|code| code.heading().to_string()));

        let kind_hint = raw
            .kind_hint
            .map(|kind| kind.trim().chars().take(MAX_KIND_LEN).collect::<String>())
            .filter(|kind| !kind.is_empty());

        let mut search_terms: Vec<String> = Vec::new();
        for term in raw.search_terms {
            let term = term.trim().to_string();
            if term.chars().count() >= 3 && !search_terms.contains(&term) {
                search_terms.push(term);
            }
        }
        search_terms.truncate(MAX_SEARCH_TERMS);

        let missing_info_questions = raw
            .missing_info_questions
            .into_iter()
            .map(|question| question.trim().to_string())
            .filter(|question| question.chars().count() >= 5)
            .take(MAX_QUESTIONS)
            .collect();

        Self {
            code,
            confidence,
            rationale: raw.rationale.map(|text| text.trim().to_string()).filter(|text| !text.is_empty()),
            candidates,
            heading_hint,
            kind_hint,
            search_terms,
            missing_info_questions,
        }
    }

    /// Extracts the first JSON object from free-form model output and sanitizes it.
    pub fn from_model_output(output: &str) -> Option<Self> {
        let start = output.find('{')?;
        let end = output.rfind('}')?;
        if end <= start {
            return None;
        }
        let raw: RawSemanticPayload = serde_json::from_str(&output[start..=end]).ok()?;
        Some(Self::from_payload(raw))
    }
}

/// External semantic classification function. `None` means unavailable (timeout, transport
/// failure or unusable output).
#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Option<SemanticSuggestion>;
}

#[cfg(test)]
mod tests {
    use super::SemanticSuggestion;

    #[test]
    fn sanitizes_untrusted_payload() {
        let output = r#"Sure! {"code":"8427.10.19","confidence":1.7,"candidates":["8427.20.90",{"code":"bad"},"8427.10.19"],
            "heading_hint":"84.27","kind_hint":"  autoelevador  ","search_terms":["carretilla apiladora"," ","ab","carretilla apiladora","motor eléctrico"],
            "missing_info_questions":["¿Es eléctrico?","?"]} trailing"#;
        let suggestion = SemanticSuggestion::from_model_output(output).expect("json object");

        assert_eq!(suggestion.code.as_ref().map(|code| code.as_str()), Some("8427.10.19"));
        assert!((suggestion.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(suggestion.candidates.len(), 2);
        assert_eq!(suggestion.heading_hint.as_deref(), Some("8427"));
        assert_eq!(suggestion.kind_hint.as_deref(), Some("autoelevador"));
        assert_eq!(suggestion.search_terms, vec!["carretilla apiladora", "motor eléctrico"]);
        assert_eq!(suggestion.missing_info_questions, vec!["¿Es eléctrico?"]);
    }

    #[test]
    fn invalid_code_is_dropped_and_output_without_json_is_rejected() {
        let suggestion =
            SemanticSuggestion::from_model_output(r#"{"code":"87-04","confidence":"0.4"}"#).expect("json");
        assert!(suggestion.code.is_none());
        assert!((suggestion.confidence - 0.4).abs() < f64::EPSILON);
        assert!(suggestion.heading_hint.is_none());

        assert!(SemanticSuggestion::from_model_output("no json here").is_none());
    }
}
